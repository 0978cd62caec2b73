/// cardpacks - Daggerheart card pack catalog
///
/// Core library providing batch storage, taxonomy aggregation, validated
/// imports and image caching for user-supplied card packs.

pub mod config;
pub mod core;

#[cfg(test)]
mod tests;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
