use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tensor::DataType;

/// Registry-assigned identifier of a stored tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(pub u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DatasetId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Registry record describing one stored tensor.
///
/// `dim` is derived from `shape` on construction, so the two can never disagree. Records
/// are never mutated in place: an overwrite removes the record and registers a new one
/// with a fresh id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DatasetRecord")]
pub struct Dataset {
    id: DatasetId,
    key: String,
    shape: Vec<usize>,
    dim: usize,
    dtype: DataType,
    is_shared: bool,
}

impl Dataset {
    pub fn new(
        id: impl Into<DatasetId>,
        key: impl Into<String>,
        shape: Vec<usize>,
        dtype: DataType,
        is_shared: bool,
    ) -> Self {
        let dim = shape.len();
        Self { id: id.into(), key: key.into(), shape, dim, dtype, is_shared }
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    /// Number of rows along the first axis.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// The same dataset with a new extent, used for append bookkeeping.
    pub fn with_shape(&self, shape: Vec<usize>) -> Self {
        Self::new(self.id, self.key.clone(), shape, self.dtype, self.is_shared)
    }
}

/// Wire form of [`Dataset`], checked on the way in.
#[derive(Deserialize)]
struct DatasetRecord {
    id: DatasetId,
    key: String,
    shape: Vec<usize>,
    dim: usize,
    dtype: DataType,
    #[serde(default)]
    is_shared: bool,
}

impl TryFrom<DatasetRecord> for Dataset {
    type Error = String;

    fn try_from(value: DatasetRecord) -> Result<Self, Self::Error> {
        if value.dim != value.shape.len() {
            return Err(format!(
                "dataset `{}` has dim {} but a shape of length {}",
                value.key,
                value.dim,
                value.shape.len()
            ));
        }
        Ok(Dataset::new(value.id, value.key, value.shape, value.dtype, value.is_shared))
    }
}
