//! The two halves of the remote backend the tensor store talks to.
//!
//! - [`DatabaseContext`] is the dataset registry: one record per stored tensor.
//! - [`StorageContext`] holds the chunk payloads, in one bucket per account.
//!
//! Both are traits so the concrete backend can be swapped; the store only ever sees
//! `Arc<dyn DatabaseContext>` and `Arc<dyn StorageContext>`.
use core::fmt;
use std::ops::Range;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    dataset::{Dataset, DatasetId},
    error::TGError,
    tensor::{DataType, Tensor, TensorError},
};

pub mod memory;
pub mod object_store;

#[cfg(test)]
pub mod logging;

pub use self::memory::InMemoryDatabase;
pub use self::object_store::{
    ObjectStorage, new_in_memory_storage, new_local_filesystem_storage, new_s3_storage,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendErrorKind {
    #[error("object not found: `{0}`")]
    NotFound(String),
    #[error("a dataset with key `{0}` already exists")]
    DuplicateKey(String),
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),
    #[error("invalid row range {start}..{end}")]
    InvalidRange { start: usize, end: usize },
    #[error("operation requires the owner's credential: {0}")]
    Unauthorized(String),
    #[error("error contacting object store: {0}")]
    ObjectStore(#[from] Box<::object_store::Error>),
    #[error("messagepack decode error: {0}")]
    MsgPackDecodeError(#[from] rmp_serde::decode::Error),
    #[error("messagepack encode error: {0}")]
    MsgPackEncodeError(#[from] rmp_serde::encode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad tensor data: {0}")]
    Tensor(#[from] TensorError),
    #[error("backend method `{0}` is not implemented")]
    Unimplemented(&'static str),
    #[error("a lock was poisoned: {0}")]
    PoisonedLock(String),
}

impl From<::object_store::Error> for BackendErrorKind {
    fn from(value: ::object_store::Error) -> Self {
        Self::ObjectStore(Box::new(value))
    }
}

pub type BackendError = TGError<BackendErrorKind>;

// it would be great to define this impl in error.rs, but it conflicts with the blanket
// `impl From<T> for T`
impl<E> From<E> for BackendError
where
    E: Into<BackendErrorKind>,
{
    fn from(value: E) -> Self {
        Self::new(value.into())
    }
}

pub type BackendResult<A> = Result<A, BackendError>;

/// The dataset registry.
#[async_trait]
pub trait DatabaseContext: fmt::Debug + Send + Sync {
    /// Whether the registry's tables exist. Advisory: callers only warn when it is false.
    async fn check_schema_installed(&self) -> BackendResult<bool>;

    /// Register a new dataset and return it with its assigned id.
    async fn insert_dataset(
        &self,
        key: &str,
        shape: &[usize],
        dim: usize,
        dtype: DataType,
    ) -> BackendResult<Dataset>;

    /// Remove the dataset registered under `key`. Returns false if there was none.
    async fn remove_dataset(&self, key: &str) -> BackendResult<bool>;

    async fn list_dataset_keys(&self) -> BackendResult<Vec<String>>;

    async fn get_dataset(&self, key: &str) -> BackendResult<Dataset>;

    /// Record a new extent for an existing dataset after rows were appended. The id is
    /// kept.
    async fn update_dataset_shape(
        &self,
        key: &str,
        shape: &[usize],
    ) -> BackendResult<Dataset>;
}

/// Chunk storage in the account's bucket.
///
/// Batches are stored along the first axis of their dataset. A rank-1 batch stands for a
/// single row.
#[async_trait]
pub trait StorageContext: fmt::Debug + Send + Sync {
    /// Whether the account's bucket exists. A not-found answer from the backend is
    /// `Ok(false)`, never an error.
    async fn has_bucket(&self) -> BackendResult<bool>;

    /// Create the account's bucket. Succeeds if it already exists.
    async fn create_user_bucket(&self) -> BackendResult<()>;

    /// Store `batches` in order, the first one starting at row `offset`. Every batch is
    /// placed at its precomputed starting row, independently of upload order. Returns
    /// false if there was nothing to store.
    async fn insert_tensor(
        &self,
        dataset_id: DatasetId,
        batches: Vec<Tensor>,
        offset: usize,
    ) -> BackendResult<bool>;

    /// Store `batches` after the rows already stored for `dataset_id`.
    async fn append_tensor(
        &self,
        dataset_id: DatasetId,
        batches: Vec<Tensor>,
    ) -> BackendResult<bool>;

    /// Rows `rows` of the dataset, restricted along the trailing axes by `slices`
    /// (`slices[k]` applies to axis `k + 1`; missing entries keep the whole axis).
    async fn get_tensor(
        &self,
        dataset_id: DatasetId,
        rows: Range<usize>,
        slices: &[Range<usize>],
    ) -> BackendResult<Tensor>;

    /// Delete every chunk of `dataset_id`, returning how many there were.
    async fn remove_tensor(&self, dataset_id: DatasetId) -> BackendResult<u64>;

    /// Delete the chunks of `dataset_id` starting at or after row `rows`, returning how
    /// many there were. Used to undo a write that the registry never recorded.
    async fn truncate_tensor(&self, dataset_id: DatasetId, rows: usize) -> BackendResult<u64>;

    /// Ids of the datasets with chunks in the bucket.
    async fn list_datasets(&self) -> BackendResult<Vec<DatasetId>> {
        Err(BackendErrorKind::Unimplemented("list_datasets").into())
    }
}

/// Number of dataset rows a stored batch covers.
pub fn batch_rows(batch: &Tensor) -> usize {
    match batch.shape() {
        [] => 0,
        [_] => 1,
        [rows, ..] => *rows,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::{Array1, Array2, Array3};
    use pretty_assertions::assert_eq;

    use super::*;

    #[tensorage_macros::test]
    fn test_batch_rows() {
        assert_eq!(batch_rows(&Tensor::from(Array1::<f32>::zeros(12))), 1);
        assert_eq!(batch_rows(&Tensor::from(Array2::<f32>::zeros((4, 3)))), 4);
        assert_eq!(batch_rows(&Tensor::from(Array3::<u8>::zeros((2, 3, 3)))), 2);
    }

    #[derive(Debug)]
    struct ListingLess;

    #[async_trait]
    impl StorageContext for ListingLess {
        async fn has_bucket(&self) -> BackendResult<bool> {
            Ok(false)
        }
        async fn create_user_bucket(&self) -> BackendResult<()> {
            Ok(())
        }
        async fn insert_tensor(
            &self,
            _: DatasetId,
            _: Vec<Tensor>,
            _: usize,
        ) -> BackendResult<bool> {
            Ok(false)
        }
        async fn append_tensor(&self, _: DatasetId, _: Vec<Tensor>) -> BackendResult<bool> {
            Ok(false)
        }
        async fn get_tensor(
            &self,
            id: DatasetId,
            _: Range<usize>,
            _: &[Range<usize>],
        ) -> BackendResult<Tensor> {
            Err(BackendErrorKind::NotFound(id.to_string()).into())
        }
        async fn remove_tensor(&self, _: DatasetId) -> BackendResult<u64> {
            Ok(0)
        }
        async fn truncate_tensor(&self, _: DatasetId, _: usize) -> BackendResult<u64> {
            Ok(0)
        }
    }

    #[tensorage_macros::tokio_test]
    async fn test_listing_is_an_optional_capability() {
        let err = ListingLess.list_datasets().await.unwrap_err();
        assert!(matches!(err.kind(), BackendErrorKind::Unimplemented("list_datasets")));
    }
}
