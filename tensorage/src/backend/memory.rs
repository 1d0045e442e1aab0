//! A dataset registry held in process memory.
use std::{
    collections::BTreeMap,
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{BackendErrorKind, BackendResult, DatabaseContext};
use crate::{
    dataset::{Dataset, DatasetId},
    tensor::DataType,
};

#[derive(Debug)]
pub struct InMemoryDatabase {
    datasets: RwLock<BTreeMap<String, Dataset>>,
    next_id: AtomicU64,
    schema_installed: bool,
    shared_by_default: bool,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            datasets: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            schema_installed: true,
            shared_by_default: false,
        }
    }

    /// Pretend the registry's tables are (or are not) installed.
    pub fn with_schema_installed(mut self, installed: bool) -> Self {
        self.schema_installed = installed;
        self
    }

    /// Visibility flag recorded on newly registered datasets.
    pub fn with_shared_by_default(mut self, shared: bool) -> Self {
        self.shared_by_default = shared;
        self
    }

    fn lock_error() -> BackendErrorKind {
        BackendErrorKind::PoisonedLock("in-memory dataset registry".to_string())
    }
}

#[async_trait]
impl DatabaseContext for InMemoryDatabase {
    async fn check_schema_installed(&self) -> BackendResult<bool> {
        Ok(self.schema_installed)
    }

    #[instrument(skip(self))]
    async fn insert_dataset(
        &self,
        key: &str,
        shape: &[usize],
        dim: usize,
        dtype: DataType,
    ) -> BackendResult<Dataset> {
        if dim != shape.len() {
            return Err(BackendErrorKind::InvalidDataset(format!(
                "dim {dim} does not match shape {shape:?}"
            ))
            .into());
        }

        let mut datasets = self.datasets.write().or(Err(Self::lock_error()))?;
        if datasets.contains_key(key) {
            return Err(BackendErrorKind::DuplicateKey(key.to_string()).into());
        }
        let id = DatasetId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let dataset = Dataset::new(id, key, shape.to_vec(), dtype, self.shared_by_default);
        datasets.insert(key.to_string(), dataset.clone());
        debug!(%id, "dataset registered");
        Ok(dataset)
    }

    #[instrument(skip(self))]
    async fn remove_dataset(&self, key: &str) -> BackendResult<bool> {
        let mut datasets = self.datasets.write().or(Err(Self::lock_error()))?;
        Ok(datasets.remove(key).is_some())
    }

    async fn list_dataset_keys(&self) -> BackendResult<Vec<String>> {
        let datasets = self.datasets.read().or(Err(Self::lock_error()))?;
        Ok(datasets.keys().cloned().collect())
    }

    async fn get_dataset(&self, key: &str) -> BackendResult<Dataset> {
        let datasets = self.datasets.read().or(Err(Self::lock_error()))?;
        datasets
            .get(key)
            .cloned()
            .ok_or_else(|| BackendErrorKind::NotFound(key.to_string()).into())
    }

    #[instrument(skip(self))]
    async fn update_dataset_shape(
        &self,
        key: &str,
        shape: &[usize],
    ) -> BackendResult<Dataset> {
        let mut datasets = self.datasets.write().or(Err(Self::lock_error()))?;
        let current =
            datasets.get(key).ok_or_else(|| BackendErrorKind::NotFound(key.to_string()))?;
        if current.dim() != shape.len() {
            return Err(BackendErrorKind::InvalidDataset(format!(
                "cannot change rank of `{key}` from {} to {}",
                current.dim(),
                shape.len()
            ))
            .into());
        }
        let updated = current.with_shape(shape.to_vec());
        datasets.insert(key.to_string(), updated.clone());
        Ok(updated)
    }
}
