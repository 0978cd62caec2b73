//! Property-based tests for the card catalog
//!
//! Property tests verify invariants that should hold for all inputs, rather
//! than testing specific cases.
//!
//! ## Test Modules
//!
//! - `catalog_props`: Tests for catalog storage and aggregation
//!   - Index totals always match the per-batch mirrors
//!   - Aggregated field names are the set union of enabled batches
//!   - Disabled batches never contribute
//!   - Path segment normalization is idempotent and path-safe
//!
//! ## Configuration
//!
//! By default, proptest runs 256 cases per property. This can be configured
//! via the `PROPTEST_CASES` environment variable:
//!
//! ```sh
//! PROPTEST_CASES=1000 cargo test property --release
//! ```

mod catalog_props;
