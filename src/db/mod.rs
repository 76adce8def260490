//! Backend abstraction. Nothing outside this module talks to the storage engine.

pub mod expression;
pub mod schema;
pub mod sqlite;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::Result;
use crate::input::VariantIterator;
use crate::task::CancelToken;
use crate::variant::VariantRecord;

pub use sqlite::SqliteController;

/// Query results: group value to the records in that group, in backend order.
pub type GroupedVariants = IndexMap<String, Vec<VariantRecord>>;

/// Field used to partition query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupField {
    #[default]
    Individual,
    Chromosome,
    Gene,
    GeneEffect,
    Filter,
}

impl GroupField {
    pub fn column(&self) -> &'static str {
        match self {
            GroupField::Individual => schema::INDIVIDUAL_ID,
            GroupField::Chromosome => schema::CHROM,
            GroupField::Gene => schema::GENE,
            GroupField::GeneEffect => schema::GENE_EFFECT,
            GroupField::Filter => schema::FILTER,
        }
    }
}

impl FromStr for GroupField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "individual" => Ok(GroupField::Individual),
            "chrom" | "chromosome" => Ok(GroupField::Chromosome),
            "gene" => Ok(GroupField::Gene),
            "effect" | "gene_effect" => Ok(GroupField::GeneEffect),
            "filter" => Ok(GroupField::Filter),
            _ => Err(format!("cannot group by '{}'", s)),
        }
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Order of records within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Position,
    /// Highest variant score first; records without a score come last.
    VariantScoreDesc,
}

/// Restrictions applied to a query.
///
/// Without `individual`, only individuals stored as public are searched.
#[derive(Debug, Clone, Default)]
pub struct VariantFilter {
    pub individual: Option<String>,
    pub chromosome: Option<String>,
    pub gene: Option<String>,
    pub gene_effect: Option<String>,
    /// Keeps variants at or below this frequency and those without one.
    pub max_exac_af: Option<f64>,
    pub min_variant_score: Option<f64>,
    /// Lua predicate, see [`expression`].
    pub expression: Option<String>,
    pub order: SortOrder,
    pub limit_per_group: Option<usize>,
}

impl VariantFilter {
    pub fn for_individual(id: impl Into<String>) -> Self {
        VariantFilter {
            individual: Some(id.into()),
            ..Default::default()
        }
    }
}

/// Capabilities every backend adapter provides.
pub trait DatabaseController: Send + Sync {
    /// Open or create the backend under `path`, which is already provisioned.
    fn init(&self, path: &Path) -> Result<()>;

    /// Drain `variants` and make all of its records visible in one commit.
    ///
    /// Documents previously stored for the same individual are replaced in
    /// that commit. Nothing is written if the iterator fails or `cancel` fires
    /// before the drain completes. Returns the number of stored variants.
    fn add_individual(&self, variants: &mut dyn VariantIterator, cancel: &CancelToken) -> Result<usize>;

    /// Delete every document of `id`. Returns the number removed.
    fn remove_individual(&self, id: &str) -> Result<usize>;

    fn query(&self, filter: &VariantFilter, group_by: GroupField) -> Result<GroupedVariants>;

    /// Stored individual ids, sorted.
    fn list_individuals(&self) -> Result<Vec<String>>;

    fn contains_individual(&self, id: &str) -> Result<bool>;

    /// Release the backend. Later calls fail with `BackendUnavailable`.
    fn stop(&self) -> Result<()>;
}
