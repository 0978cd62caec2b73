//! Card Pack Catalog
//!
//! Batch-oriented storage and aggregation for the Daggerheart card catalog.
//! Users import JSON card packs; each import becomes a *batch* that carries
//! its cards plus the taxonomy it declares (custom field names and variant
//! type definitions). The catalog merges every enabled batch into one view
//! and validates new packs against it.
//!
//! # Architecture
//!
//! ```text
//!                      +--------------------+
//!                      |    CardManager     |
//!                      +--------------------+
//!                        |        |       |
//!            +-----------+        |       +-------------+
//!            v                    v                     v
//!   +-----------------+  +------------------+  +-----------------+
//!   | ImportPipeline  |  | UnifiedCardState |  |   ImageCache    |
//!   +-----------------+  | AggregationEngine|  +-----------------+
//!     |            |     +------------------+           |
//!     v            v                                    v
//! +-----------+ +------------------+             +-------------+
//! | Validation| | BatchRecordStore |             |  BlobStore  |
//! |  Engine   | |  (KeyValueStore) |             +-------------+
//! +-----------+ +------------------+
//! ```
//!
//! # Storage Layout
//!
//! | Key | Content |
//! |-----|---------|
//! | `daggerheart_custom_cards_index` | [`CatalogIndex`] |
//! | `daggerheart_custom_cards_batch_<id>` | one [`BatchRecord`] |
//! | `daggerheart_custom_cards_schema_version` | schema stamp |
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crate::core::catalog::prelude::*;
//!
//! let manager = CardManager::new(
//!     Arc::new(MemoryKeyValueStore::new()),
//!     Arc::new(MemoryBlobStore::real()),
//!     Arc::new(ObjectUrlRegistry::new()),
//!     CatalogConfig::default(),
//!     ImageCacheConfig::default(),
//! );
//! manager.initialize().await?;
//!
//! let result = manager.import_json_str(&text, "harvest.json").await;
//! if !result.success {
//!     for line in &result.errors {
//!         eprintln!("{}", line);
//!     }
//! }
//! ```
//!
//! # Module Structure
//!
//! - [`error`]: Error types and path-qualified field errors
//! - [`types`]: Cards, batches and the index
//! - [`kv`], [`blob`]: Storage collaborators
//! - [`store`]: Index and batch persistence, quota and integrity
//! - [`migration`]: Schema stamping and legacy store migration
//! - [`aggregation`]: Merged taxonomy and validation contexts
//! - [`preprocess`], [`validation`], [`convert`]: Import front half
//! - [`import`]: Import, removal and toggle pipelines
//! - [`state`]: In-memory card view
//! - [`image_cache`]: LRU of image handles
//! - [`manager`]: The facade tying it together

// ============================================================================
// Module Declarations
// ============================================================================

pub mod aggregation;
pub mod blob;
pub mod convert;
pub mod error;
pub mod image_cache;
pub mod import;
pub mod kv;
pub mod manager;
pub mod migration;
pub mod preprocess;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;

// ============================================================================
// Re-exports: Error Types
// ============================================================================

pub use error::{CatalogError, FieldError, Result};

// ============================================================================
// Re-exports: Core Types
// ============================================================================

pub use types::{
    Batch,
    BatchInfo,
    BatchMetadata,
    BatchRecord,
    Card,
    CardSelectDisplay,
    CardSource,
    CardType,
    CatalogIndex,
    CustomFieldDefinitions,
    ProfessionSpecial,
    VariantSpecial,
    VariantTypeDefinition,
    VariantTypeMap,
    SYSTEM_BATCH_ID,
    SYSTEM_BATCH_NAME,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use blob::{
    BlobRecord, BlobStore, BlobTable, FileBlobStore, MemoryBlobStore, ObjectUrlFactory,
    ObjectUrlRegistry,
};
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use migration::{MigrationManager, MigrationReport, CURRENT_SCHEMA_VERSION};
pub use store::{BatchRecordStore, CleanupReport, IntegrityReport, StorageUsage};

// ============================================================================
// Re-exports: Import and Aggregation
// ============================================================================

pub use aggregation::{AggregationDiagnostic, AggregationEngine, ValidationContext};
pub use convert::{CardConverter, StandardCardConverter};
pub use import::{ImportPipeline, ImportResult, ImportStage, RemovalResult};
pub use validation::{describe_variant_type, ValidatedImportData, ValidationEngine};

// ============================================================================
// Re-exports: State, Images and Facade
// ============================================================================

pub use image_cache::{ImageCache, ImageCacheConfig, ImageCacheStats};
pub use manager::{CardManager, CatalogConfig, CatalogStats, InitReport};
pub use state::UnifiedCardState;

// ============================================================================
// Prelude Module
// ============================================================================

/// Convenient imports for common catalog operations.
pub mod prelude {
    pub use super::{
        CardManager,
        CatalogConfig,
        ImageCacheConfig,
        MemoryBlobStore,
        MemoryKeyValueStore,
        ObjectUrlRegistry,
        // Results
        ImportResult,
        RemovalResult,
        // Types
        Card,
        CardType,
        Batch,
    };
}
