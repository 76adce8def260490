//! Store configuration.

use std::path::PathBuf;
use std::str::FromStr;

/// What to do when an individual that is already stored is submitted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReingestPolicy {
    /// Replace the stored variants in the same commit that adds the new ones.
    #[default]
    Overwrite,
    /// Refuse the submission with `AlreadyStored`.
    Reject,
}

impl FromStr for ReingestPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(ReingestPolicy::Overwrite),
            "reject" => Ok(ReingestPolicy::Reject),
            _ => Err(format!("unknown re-ingest policy '{}'", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub storage_path: PathBuf,
    /// Size of the ingestion/removal worker pool. Must be at least 1.
    pub worker_threads: usize,
    pub reingest: ReingestPolicy,
}

impl StoreConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            storage_path: storage_path.into(),
            worker_threads: 1,
            reingest: ReingestPolicy::default(),
        }
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    pub fn with_reingest(mut self, policy: ReingestPolicy) -> Self {
        self.reingest = policy;
        self
    }

    /// Directory holding the backend and its bundled resources.
    pub fn db_path(&self) -> PathBuf {
        self.storage_path.join("db")
    }

    /// Directory holding a copy of every stored individual's input file.
    pub fn cache_path(&self) -> PathBuf {
        self.storage_path.join(crate::cache::CACHE_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/tmp/vs")
            .with_worker_threads(0)
            .with_reingest(ReingestPolicy::Reject);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.reingest, ReingestPolicy::Reject);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/vs/db"));
        assert_eq!(config.cache_path(), PathBuf::from("/tmp/vs/vcf"));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("Reject".parse::<ReingestPolicy>().unwrap(), ReingestPolicy::Reject);
        assert!("keep".parse::<ReingestPolicy>().is_err());
    }
}
