pub mod annotate;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod genotypes;
pub mod header;
pub mod input;
pub mod resources;
pub mod store;
pub mod task;
pub mod variant;

pub use config::{ReingestPolicy, StoreConfig};
pub use db::{DatabaseController, GroupField, GroupedVariants, SortOrder, SqliteController, VariantFilter};
pub use error::{Result, VariantStoreError};
pub use header::{InputFormat, VariantHeader};
pub use input::{open_iterator, VariantIterator};
pub use store::{IndividualStatus, VariantStore};
pub use task::{CancelToken, Task};
pub use variant::{Call, CallInfoField, VariantInfoField, VariantRecord};
