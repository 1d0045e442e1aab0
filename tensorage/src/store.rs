//! The key-value façade over the dataset registry and the chunk storage.
//!
//! A [`TensorStore`] maps string keys to tensors. Writing a key registers a dataset, splits
//! the tensor along its first axis into batches of at most `chunk_size` elements and hands
//! all batches to the storage context in one call. Reading a key looks the dataset up and
//! fetches its rows back by id.
use std::{ops::Range, sync::Arc};

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    backend::{BackendError, BackendErrorKind, DatabaseContext, StorageContext},
    chunking::BatchPlan,
    config::StoreConfig,
    dataset::Dataset,
    error::TGError,
    tensor::{Tensor, TensorError},
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreErrorKind {
    #[error(
        "The key '{key}' already exists in the TensorStore. Set allow_overwrite=True to overwrite the existing dataset."
    )]
    OverwriteConflict { key: String },
    #[error("invalid tensor: {0}")]
    InvalidTensor(String),
    #[error("tensor is incompatible with dataset `{key}`: {reason}")]
    IncompatibleTensor { key: String, reason: String },
    #[error("dataset `{key}` was read back with shape {found:?}, expected {expected:?}")]
    ShapeMismatch { key: String, expected: Vec<usize>, found: Vec<usize> },
    #[error("range {start}..{end} on axis {axis} is out of bounds for dataset `{key}` of length {len}")]
    OutOfBounds { key: String, axis: usize, start: usize, end: usize, len: usize },
    #[error("bad tensor data: {0}")]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type StoreError = TGError<StoreErrorKind>;

impl<E> From<E> for StoreError
where
    E: Into<StoreErrorKind>,
{
    fn from(value: E) -> Self {
        Self::new(value.into())
    }
}

pub type StoreResult<A> = Result<A, StoreError>;

#[derive(Debug)]
pub struct TensorStore {
    database: Arc<dyn DatabaseContext>,
    storage: Arc<dyn StorageContext>,
    config: StoreConfig,
}

impl TensorStore {
    /// Connect the store to its backend.
    ///
    /// A registry without its schema is not an error, it only produces a warning.
    #[instrument(skip(database, storage))]
    pub async fn new(
        database: Arc<dyn DatabaseContext>,
        storage: Arc<dyn StorageContext>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        if !database.check_schema_installed().await? {
            warn!(
                "The schema for the TensorStore is not installed. Datasets cannot be registered until it is."
            );
        }
        Ok(Self { database, storage, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<dyn DatabaseContext> {
        &self.database
    }

    pub fn storage(&self) -> &Arc<dyn StorageContext> {
        &self.storage
    }

    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.database.list_dataset_keys().await?)
    }

    pub async fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.keys().await?.iter().any(|k| k == key))
    }

    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.keys().await?.len())
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// The full tensor stored under `key`.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> StoreResult<Tensor> {
        let dataset = self.database.get_dataset(key).await?;
        let tensor = self.storage.get_tensor(dataset.id(), 0..dataset.rows(), &[]).await?;
        check_shape(&dataset, dataset.shape(), tensor)
    }

    /// Rows `rows` of the tensor stored under `key`, optionally restricted along the
    /// trailing axes (`slices[k]` applies to axis `k + 1`).
    #[instrument(skip(self))]
    pub async fn get_range(
        &self,
        key: &str,
        rows: Range<usize>,
        slices: &[Range<usize>],
    ) -> StoreResult<Tensor> {
        let dataset = self.database.get_dataset(key).await?;
        let shape = dataset.shape();
        if slices.len() + 1 > shape.len() {
            return Err(StoreErrorKind::Tensor(TensorError::TooManySlices {
                given: slices.len(),
                ndim: shape.len(),
            })
            .into());
        }

        let mut expected = shape.to_vec();
        for (axis, range) in std::iter::once(&rows).chain(slices).enumerate() {
            if range.start >= range.end || range.end > shape[axis] {
                return Err(StoreErrorKind::OutOfBounds {
                    key: key.to_string(),
                    axis,
                    start: range.start,
                    end: range.end,
                    len: shape[axis],
                }
                .into());
            }
            expected[axis] = range.len();
        }

        let tensor = self.storage.get_tensor(dataset.id(), rows, slices).await?;
        check_shape(&dataset, &expected, tensor)
    }

    /// Store `value` under `key`.
    ///
    /// Fails with [`StoreErrorKind::OverwriteConflict`] if the key exists and the store was
    /// not configured to overwrite. Otherwise the old dataset is removed first and a new one
    /// is registered, with a new id.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: impl Into<Tensor>) -> StoreResult<Dataset> {
        let value = value.into();
        let shape = registered_shape(&value)?;

        if self.contains(key).await? {
            if !self.config.allow_overwrite {
                return Err(StoreErrorKind::OverwriteConflict { key: key.to_string() }.into());
            }
            debug!("replacing existing dataset");
            self.remove(key).await?;
        }

        let dataset =
            self.database.insert_dataset(key, &shape, shape.len(), value.dtype()).await?;
        let batches = self.batches(value)?;
        debug!(id = %dataset.id(), batches = batches.len(), "submitting batches");
        self.storage.insert_tensor(dataset.id(), batches, 0).await?;
        Ok(dataset)
    }

    /// Add rows to the end of the tensor stored under `key`.
    ///
    /// `value` must have the dataset's element type and the same extent on every axis but
    /// the first. A one-dimensional `value` is a single row.
    #[instrument(skip(self, value))]
    pub async fn append(&self, key: &str, value: impl Into<Tensor>) -> StoreResult<Dataset> {
        let value = value.into();
        let dataset = self.database.get_dataset(key).await?;
        let incompatible = |reason: String| StoreErrorKind::IncompatibleTensor {
            key: key.to_string(),
            reason,
        };

        if value.dtype() != dataset.dtype() {
            return Err(incompatible(format!(
                "element type {} does not match {}",
                value.dtype(),
                dataset.dtype()
            ))
            .into());
        }
        let added = registered_shape(&value)?;
        if added.get(1..) != dataset.shape().get(1..) {
            return Err(incompatible(format!(
                "rows of shape {:?} cannot extend a dataset of shape {:?}",
                &added[1..],
                dataset.shape()
            ))
            .into());
        }

        let offset = dataset.rows();
        let batches = self.batches(value)?;
        if let Err(err) = self.storage.insert_tensor(dataset.id(), batches, offset).await {
            self.discard_rows(&dataset, offset).await;
            return Err(err.into());
        }

        let mut shape = dataset.shape().to_vec();
        if let Some(rows) = shape.first_mut() {
            *rows += added[0];
        }
        match self.database.update_dataset_shape(key, &shape).await {
            Ok(updated) => Ok(updated),
            Err(err) => {
                self.discard_rows(&dataset, offset).await;
                Err(err.into())
            }
        }
    }

    /// Drop chunks written past the registered rows, so the next append can reuse them.
    async fn discard_rows(&self, dataset: &Dataset, rows: usize) {
        match self.storage.truncate_tensor(dataset.id(), rows).await {
            Ok(removed) => debug!(id = %dataset.id(), removed, "unrecorded rows discarded"),
            Err(err) => {
                warn!(id = %dataset.id(), error = %err, "could not discard unrecorded rows")
            }
        }
    }

    /// Remove the dataset under `key` and its chunks. Returns false if there was none.
    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> StoreResult<bool> {
        let dataset = match self.database.get_dataset(key).await {
            Ok(dataset) => dataset,
            Err(err) if matches!(err.kind(), BackendErrorKind::NotFound(_)) => {
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        self.database.remove_dataset(key).await?;
        let chunks = self.storage.remove_tensor(dataset.id()).await?;
        debug!(id = %dataset.id(), chunks, "dataset removed");
        Ok(true)
    }

    /// Split `value` along its first axis. A one-dimensional tensor is a single batch.
    fn batches(&self, value: Tensor) -> StoreResult<Vec<Tensor>> {
        if value.ndim() == 1 {
            return Ok(vec![value]);
        }
        let plan = BatchPlan::new(value.shape(), self.config.chunk_size);
        Ok(plan.split(&value)?)
    }
}

/// Shape recorded in the registry for `value`: one-dimensional tensors become a single
/// row.
fn registered_shape(value: &Tensor) -> StoreResult<Vec<usize>> {
    match value.shape() {
        [] => Err(StoreErrorKind::InvalidTensor("cannot store a scalar".to_string()).into()),
        shape if shape.contains(&0) => Err(StoreErrorKind::InvalidTensor(format!(
            "cannot store a tensor with an empty axis, shape {shape:?}"
        ))
        .into()),
        [len] => Ok(vec![1, *len]),
        shape => Ok(shape.to_vec()),
    }
}

fn check_shape(dataset: &Dataset, expected: &[usize], tensor: Tensor) -> StoreResult<Tensor> {
    if tensor.shape() == expected {
        Ok(tensor)
    } else {
        Err(StoreErrorKind::ShapeMismatch {
            key: dataset.key().to_string(),
            expected: expected.to_vec(),
            found: tensor.shape().to_vec(),
        }
        .into())
    }
}
