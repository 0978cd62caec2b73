
pub mod assets;
pub mod logging;

// Batch storage, aggregation, validation and import of card packs
pub mod catalog;
