use crate::{
    error::{ArrearsError, ArrearsResult},
    retry::RetryPolicy,
};
use serde::{Deserialize, Serialize};

/// Parameters of the full recompute job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrearsJobConfig {
    /// Worker threads, one database connection each.
    pub thread_pool_size: usize,
    /// Target loans per sub-batch.
    pub batch_size: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Seed for the backoff jitter streams.
    #[serde(default)]
    pub jitter_seed: u64,
}

impl Default for ArrearsJobConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 4,
            batch_size: 100,
            retry: RetryPolicy::default(),
            jitter_seed: 0,
        }
    }
}

impl ArrearsJobConfig {
    /// Load from the data/ directory.
    /// In tests, use ArrearsJobConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/arrears/arrears_job.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: ArrearsJobConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Small batches, two workers, retries that never sleep.
    pub fn default_test() -> Self {
        Self {
            thread_pool_size: 2,
            batch_size: 2,
            retry: RetryPolicy::immediate(3),
            jitter_seed: 42,
        }
    }

    pub fn validate(&self) -> ArrearsResult<()> {
        if self.thread_pool_size == 0 {
            return Err(ArrearsError::InvalidJobParameter {
                name: "thread_pool_size",
                value: self.thread_pool_size.to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ArrearsError::InvalidJobParameter {
                name: "batch_size",
                value: self.batch_size.to_string(),
            });
        }
        Ok(())
    }

    /// IDs fetched per keyset page: one full sub-batch per worker.
    pub fn page_size(&self) -> usize {
        self.batch_size.saturating_mul(self.thread_pool_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_from_data_dir_with_default_retry() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("arrears")).unwrap();
        fs::write(
            dir.path().join("arrears/arrears_job.json"),
            r#"{ "thread_pool_size": 8, "batch_size": 250 }"#,
        )
        .unwrap();

        let config = ArrearsJobConfig::load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config.thread_pool_size, 8);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.page_size(), 2_000);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = ArrearsJobConfig::load("/nonexistent/data").unwrap_err();
        assert!(err.to_string().contains("arrears_job.json"), "got {err}");
    }

    #[test]
    fn zero_sized_pool_or_batch_is_rejected() {
        let mut config = ArrearsJobConfig::default_test();
        config.thread_pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ArrearsError::InvalidJobParameter { name: "thread_pool_size", .. })
        ));
        config.thread_pool_size = 1;
        config.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ArrearsError::InvalidJobParameter { name: "batch_size", .. })
        ));
    }
}
