//! Named buckets of one process

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::info;

use crate::bucket::Bucket;
use crate::collector::{Collector, CollectorConfig};
use crate::config::Config;
use crate::error::{Result, StorageError};

/// Buckets by name. Built once at startup and handed to whatever serves
/// requests.
#[derive(Debug, Default)]
pub struct Registry {
    buckets: HashMap<String, Arc<Bucket>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every bucket in `config`, all sharing its catalog database.
    pub fn from_config(config: &Config) -> Result<Self> {
        // each bucket collects from its own tables
        let mut tables = HashSet::new();
        for bucket_config in &config.buckets {
            for table in [&bucket_config.files_table, &bucket_config.links_table] {
                if !tables.insert(table.as_str()) {
                    return Err(StorageError::Config(format!(
                        "table {} is used by more than one bucket",
                        table
                    )));
                }
            }
        }

        let mut registry = Self::new();
        for bucket_config in &config.buckets {
            let bucket = Bucket::open(bucket_config, &config.database_path)?;
            registry.insert(bucket)?;
        }
        info!(buckets = registry.len(), "Registry ready");
        Ok(registry)
    }

    /// Add a bucket. Names must be unique.
    pub fn insert(&mut self, bucket: Bucket) -> Result<Arc<Bucket>> {
        if self.buckets.contains_key(bucket.name()) {
            return Err(StorageError::Config(format!(
                "duplicate bucket name: {}",
                bucket.name()
            )));
        }
        let bucket = Arc::new(bucket);
        self.buckets
            .insert(bucket.name().to_string(), Arc::clone(&bucket));
        Ok(bucket)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Bucket>> {
        self.buckets
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::UnknownBucket(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Start a collector for every bucket whose configuration enables one.
    /// Must be called inside a tokio runtime.
    pub fn start_collectors(&self, config: &Config) -> Vec<Collector> {
        let mut collectors = Vec::new();
        for bucket_config in &config.buckets {
            let Some((interval, grace)) = bucket_config.clean_schedule() else {
                info!(bucket = %bucket_config.name, "Garbage collector disabled");
                continue;
            };
            if let Some(bucket) = self.buckets.get(&bucket_config.name) {
                collectors.push(Collector::start(
                    Arc::clone(bucket),
                    CollectorConfig { interval, grace },
                ));
            }
        }
        collectors
    }
}
