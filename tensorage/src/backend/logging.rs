use std::{
    ops::Range,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{BackendResult, DatabaseContext, StorageContext};
use crate::{
    dataset::{Dataset, DatasetId},
    tensor::{DataType, Tensor},
};

/// Operations seen by a logging wrapper, as `(operation, argument)` pairs.
#[derive(Debug, Default)]
pub struct OperationLog(Mutex<Vec<(String, String)>>);

#[allow(clippy::expect_used)] // this implementation is intended for tests only
impl OperationLog {
    fn push(&self, op: &str, arg: impl ToString) {
        self.0.lock().expect("poison lock").push((op.to_string(), arg.to_string()));
    }

    pub fn operations(&self) -> Vec<(String, String)> {
        self.0.lock().expect("poison lock").clone()
    }

    /// How many times `op` was called.
    pub fn count(&self, op: &str) -> usize {
        self.0.lock().expect("poison lock").iter().filter(|(name, _)| name == op).count()
    }

    pub fn clear(&self) {
        self.0.lock().expect("poison lock").clear();
    }
}

#[derive(Debug)]
pub struct LoggingDatabase {
    backend: Arc<dyn DatabaseContext>,
    log: Arc<OperationLog>,
}

impl LoggingDatabase {
    pub fn new(backend: Arc<dyn DatabaseContext>, log: Arc<OperationLog>) -> Self {
        Self { backend, log }
    }
}

#[async_trait]
impl DatabaseContext for LoggingDatabase {
    async fn check_schema_installed(&self) -> BackendResult<bool> {
        self.log.push("check_schema_installed", "");
        self.backend.check_schema_installed().await
    }

    async fn insert_dataset(
        &self,
        key: &str,
        shape: &[usize],
        dim: usize,
        dtype: DataType,
    ) -> BackendResult<Dataset> {
        self.log.push("insert_dataset", format!("{key} {shape:?} {dim} {dtype}"));
        self.backend.insert_dataset(key, shape, dim, dtype).await
    }

    async fn remove_dataset(&self, key: &str) -> BackendResult<bool> {
        self.log.push("remove_dataset", key);
        self.backend.remove_dataset(key).await
    }

    async fn list_dataset_keys(&self) -> BackendResult<Vec<String>> {
        self.log.push("list_dataset_keys", "");
        self.backend.list_dataset_keys().await
    }

    async fn get_dataset(&self, key: &str) -> BackendResult<Dataset> {
        self.log.push("get_dataset", key);
        self.backend.get_dataset(key).await
    }

    async fn update_dataset_shape(
        &self,
        key: &str,
        shape: &[usize],
    ) -> BackendResult<Dataset> {
        self.log.push("update_dataset_shape", format!("{key} {shape:?}"));
        self.backend.update_dataset_shape(key, shape).await
    }
}

#[derive(Debug)]
pub struct LoggingStorage {
    backend: Arc<dyn StorageContext>,
    log: Arc<OperationLog>,
}

impl LoggingStorage {
    pub fn new(backend: Arc<dyn StorageContext>, log: Arc<OperationLog>) -> Self {
        Self { backend, log }
    }
}

fn shapes(batches: &[Tensor]) -> String {
    format!("{:?}", batches.iter().map(Tensor::shape).collect::<Vec<_>>())
}

#[async_trait]
impl StorageContext for LoggingStorage {
    async fn has_bucket(&self) -> BackendResult<bool> {
        self.log.push("has_bucket", "");
        self.backend.has_bucket().await
    }

    async fn create_user_bucket(&self) -> BackendResult<()> {
        self.log.push("create_user_bucket", "");
        self.backend.create_user_bucket().await
    }

    async fn insert_tensor(
        &self,
        dataset_id: DatasetId,
        batches: Vec<Tensor>,
        offset: usize,
    ) -> BackendResult<bool> {
        self.log.push("insert_tensor", format!("{dataset_id} {offset} {}", shapes(&batches)));
        self.backend.insert_tensor(dataset_id, batches, offset).await
    }

    async fn append_tensor(
        &self,
        dataset_id: DatasetId,
        batches: Vec<Tensor>,
    ) -> BackendResult<bool> {
        self.log.push("append_tensor", format!("{dataset_id} {}", shapes(&batches)));
        self.backend.append_tensor(dataset_id, batches).await
    }

    async fn get_tensor(
        &self,
        dataset_id: DatasetId,
        rows: Range<usize>,
        slices: &[Range<usize>],
    ) -> BackendResult<Tensor> {
        self.log.push("get_tensor", format!("{dataset_id} {rows:?} {slices:?}"));
        self.backend.get_tensor(dataset_id, rows, slices).await
    }

    async fn remove_tensor(&self, dataset_id: DatasetId) -> BackendResult<u64> {
        self.log.push("remove_tensor", dataset_id);
        self.backend.remove_tensor(dataset_id).await
    }

    async fn truncate_tensor(&self, dataset_id: DatasetId, rows: usize) -> BackendResult<u64> {
        self.log.push("truncate_tensor", format!("{dataset_id} {rows}"));
        self.backend.truncate_tensor(dataset_id, rows).await
    }

    async fn list_datasets(&self) -> BackendResult<Vec<DatasetId>> {
        self.log.push("list_datasets", "");
        self.backend.list_datasets().await
    }
}
