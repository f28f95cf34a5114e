use std::time::Duration;

use anyhow::{Context, Result};

use crate::memory::DEFAULT_MAX_DOCUMENTS;

/// URL scheme of the process-local document store.
pub const MEMORY_SCHEME: &str = "memory";

/// Weights with which the operations of a workload are sampled.
///
/// A weight of zero disables the operation. At least one weight has to be
/// positive, otherwise no operation could ever be chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationWeights {
    pub insert: u64,
    pub find: u64,
    pub bulk_insert: u64,
    pub aggregate: u64,
}

impl OperationWeights {
    pub fn total(&self) -> u64 {
        self.insert + self.find + self.bulk_insert + self.aggregate
    }
}

impl Default for OperationWeights {
    fn default() -> Self {
        Self {
            insert: 0,
            find: 0,
            bulk_insert: 1,
            aggregate: 0,
        }
    }
}

/// Immutable configuration of a run.
///
/// Resolved once at startup (see [`Settings::from_env`]) and then shared
/// between workers behind an `Arc`. Nothing mutates it afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub db_name: String,
    pub collection_name: String,
    /// Selects the store by its scheme, see [`Settings::store_scheme`].
    pub cluster_url: String,
    /// Documents kept per collection by the in-memory store before
    /// the oldest ones are evicted. Must not be zero.
    pub memory_max_documents: usize,

    /// Number of documents written by a single bulk insert. Must not be zero.
    pub docs_per_batch: usize,
    pub weights: OperationWeights,

    /// Number of concurrently running workers. Must not be zero.
    pub workers: u64,
    /// If `None`, the run lasts until it's stopped from the outside
    /// or `operation_count` operations were issued.
    pub max_duration: Option<Duration>,
    /// Operations per second, summed over all workers.
    pub rate_limit_per_second: Option<f64>,
    /// Total number of operations issued, summed over all workers.
    pub operation_count: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_name: "loadtest".to_string(),
            collection_name: "measurements".to_string(),
            cluster_url: format!("{MEMORY_SCHEME}://"),
            memory_max_documents: DEFAULT_MAX_DOCUMENTS,
            docs_per_batch: 1000,
            weights: OperationWeights::default(),
            workers: 1,
            max_duration: None,
            rate_limit_per_second: None,
            operation_count: None,
        }
    }
}

impl Settings {
    /// Reads the settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the settings from the defaults, overriding every parameter
    /// for which `lookup` returns a non-empty value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(db_name) = get("DB_NAME") {
            settings.db_name = db_name;
        }
        if let Some(collection_name) = get("COLLECTION_NAME") {
            settings.collection_name = collection_name;
        }
        if let Some(cluster_url) = get("CLUSTER_URL") {
            settings.cluster_url = cluster_url;
        }

        let count = |key: &str| -> Result<Option<u64>> {
            get(key)
                .map(|value| parse_count(&value).with_context(|| format!("invalid {key}")))
                .transpose()
        };

        if let Some(max) = count("MEMORY_MAX_DOCUMENTS")? {
            settings.memory_max_documents =
                usize::try_from(max).context("MEMORY_MAX_DOCUMENTS does not fit in usize")?;
        }
        if let Some(batch) = count("DOCS_PER_BATCH")? {
            settings.docs_per_batch =
                usize::try_from(batch).context("DOCS_PER_BATCH does not fit in usize")?;
        }
        if let Some(weight) = count("INSERT_WEIGHT")? {
            settings.weights.insert = weight;
        }
        if let Some(weight) = count("FIND_WEIGHT")? {
            settings.weights.find = weight;
        }
        if let Some(weight) = count("BULK_INSERT_WEIGHT")? {
            settings.weights.bulk_insert = weight;
        }
        if let Some(weight) = count("AGG_PIPE_WEIGHT")? {
            settings.weights.aggregate = weight;
        }
        if let Some(workers) = count("WORKERS")? {
            settings.workers = workers;
        }
        if let Some(secs) = count("DURATION_SECS")? {
            settings.max_duration = Some(Duration::from_secs(secs));
        }
        if let Some(limit) = count("OPERATION_COUNT")? {
            settings.operation_count = Some(limit);
        }
        if let Some(rate) = get("RATE_LIMIT") {
            let rate: f64 = rate
                .trim()
                .parse()
                .with_context(|| format!("invalid RATE_LIMIT: {rate}"))?;
            settings.rate_limit_per_second = Some(rate);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.weights.total() > 0,
            "At least one operation weight must be positive",
        );
        anyhow::ensure!(self.docs_per_batch > 0, "DOCS_PER_BATCH must be positive");
        anyhow::ensure!(self.workers > 0, "WORKERS must be positive");
        anyhow::ensure!(!self.db_name.is_empty(), "DB_NAME must not be empty");
        anyhow::ensure!(
            !self.collection_name.is_empty(),
            "COLLECTION_NAME must not be empty"
        );
        anyhow::ensure!(
            self.memory_max_documents > 0,
            "MEMORY_MAX_DOCUMENTS must be positive"
        );
        let scheme = self.store_scheme()?;
        anyhow::ensure!(
            scheme == MEMORY_SCHEME,
            "No driver for the {:?} scheme of CLUSTER_URL is built in, only {}:// is supported",
            scheme,
            MEMORY_SCHEME,
        );
        if let Some(rate) = self.rate_limit_per_second {
            anyhow::ensure!(
                rate.is_finite() && rate > 0.0,
                "RATE_LIMIT must be a positive number, got {}",
                rate,
            );
        }
        Ok(())
    }

    /// The scheme of `cluster_url`, e.g. `memory` for `memory://`.
    pub fn store_scheme(&self) -> Result<&str> {
        self.cluster_url
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .filter(|scheme| !scheme.is_empty())
            .with_context(|| format!("CLUSTER_URL has no scheme: {}", self.cluster_url))
    }

    pub fn print_settings(&self) {
        // The URL may carry credentials, only the scheme is logged.
        tracing::info!(
            store = self.store_scheme().unwrap_or("unknown"),
            memory_max_documents = self.memory_max_documents,
            db = %self.db_name,
            collection = %self.collection_name,
            workers = self.workers,
            docs_per_batch = self.docs_per_batch,
            insert_weight = self.weights.insert,
            find_weight = self.weights.find,
            bulk_insert_weight = self.weights.bulk_insert,
            aggregate_weight = self.weights.aggregate,
            max_duration = ?self.max_duration,
            rate_limit = ?self.rate_limit_per_second,
            operation_count = ?self.operation_count,
            "workload settings",
        );
    }
}

// Parses a non-negative integer, optionally followed by one of
// the case-insensitive multiplier suffixes: 'k', 'm' or 'b'.
fn parse_count(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().next_back().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&s[..s.len() - 1], 1_000),
        Some('m') => (&s[..s.len() - 1], 1_000_000),
        Some('b') => (&s[..s.len() - 1], 1_000_000_000),
        _ => (s, 1),
    };
    let value: u64 = digits.parse()?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("{} is out of range", s))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = from_map(&[]).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.docs_per_batch, 1000);
        assert_eq!(settings.weights.bulk_insert, 1);
        assert_eq!(settings.weights.total(), 1);
        assert_eq!(settings.collection_name, "measurements");
        assert_eq!(settings.cluster_url, "memory://");
        assert_eq!(settings.store_scheme().unwrap(), MEMORY_SCHEME);
        assert_eq!(settings.memory_max_documents, DEFAULT_MAX_DOCUMENTS);
    }

    #[test]
    fn test_store_selection() {
        let settings = from_map(&[
            ("CLUSTER_URL", "memory://local"),
            ("DB_NAME", "fleet"),
            ("MEMORY_MAX_DOCUMENTS", "5k"),
        ])
        .unwrap();
        assert_eq!(settings.store_scheme().unwrap(), "memory");
        assert_eq!(settings.db_name, "fleet");
        assert_eq!(settings.memory_max_documents, 5000);

        let err = from_map(&[("CLUSTER_URL", "mongodb://localhost:27017")]).unwrap_err();
        assert!(err.to_string().contains("\"mongodb\""));
        from_map(&[("CLUSTER_URL", "localhost")]).unwrap_err();
        from_map(&[("CLUSTER_URL", "://host")]).unwrap_err();
        from_map(&[("MEMORY_MAX_DOCUMENTS", "0")]).unwrap_err();
    }

    #[test]
    fn test_overrides() {
        let settings = from_map(&[
            ("COLLECTION_NAME", "vehicles"),
            ("DOCS_PER_BATCH", "2k"),
            ("INSERT_WEIGHT", "3"),
            ("FIND_WEIGHT", "5"),
            ("BULK_INSERT_WEIGHT", "0"),
            ("AGG_PIPE_WEIGHT", "1"),
            ("WORKERS", "16"),
            ("DURATION_SECS", "60"),
            ("RATE_LIMIT", "250.5"),
            ("OPERATION_COUNT", "1m"),
        ])
        .unwrap();

        assert_eq!(settings.collection_name, "vehicles");
        assert_eq!(settings.docs_per_batch, 2000);
        assert_eq!(
            settings.weights,
            OperationWeights {
                insert: 3,
                find: 5,
                bulk_insert: 0,
                aggregate: 1,
            }
        );
        assert_eq!(settings.workers, 16);
        assert_eq!(settings.max_duration, Some(Duration::from_secs(60)));
        assert_eq!(settings.rate_limit_per_second, Some(250.5));
        assert_eq!(settings.operation_count, Some(1_000_000));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let settings = from_map(&[("DB_NAME", ""), ("DOCS_PER_BATCH", "  ")]).unwrap();
        assert_eq!(settings.db_name, "loadtest");
        assert_eq!(settings.docs_per_batch, 1000);
    }

    #[test]
    fn test_invalid_settings() {
        from_map(&[("BULK_INSERT_WEIGHT", "0")]).unwrap_err();
        from_map(&[("DOCS_PER_BATCH", "0")]).unwrap_err();
        from_map(&[("WORKERS", "0")]).unwrap_err();
        from_map(&[("INSERT_WEIGHT", "-1")]).unwrap_err();
        from_map(&[("FIND_WEIGHT", "abc")]).unwrap_err();
        from_map(&[("RATE_LIMIT", "-3")]).unwrap_err();
        from_map(&[("OPERATION_COUNT", "99999999999b")]).unwrap_err();
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("123").unwrap(), 123);
        assert_eq!(parse_count("12K").unwrap(), 12_000);
        assert_eq!(parse_count(" 34m ").unwrap(), 34_000_000);
        assert_eq!(parse_count("5b").unwrap(), 5_000_000_000);
        parse_count("0x10").unwrap_err();
        parse_count("k").unwrap_err();
        parse_count("1 2").unwrap_err();
    }
}
