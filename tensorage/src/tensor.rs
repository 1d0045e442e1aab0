//! Dtype-tagged n-dimensional arrays.
//!
//! A [`Tensor`] wraps an [`ndarray::ArrayD`] of one of the supported element types. The
//! chunking engine only needs a handful of shape operations on it: slicing along the
//! first axis, concatenating along the first axis, and slicing the trailing axes.
use std::{fmt::Display, ops::Range};

use ndarray::{Array, ArrayD, Axis, Dimension, Slice};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl TryFrom<&str> for DataType {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "int8" => Ok(DataType::Int8),
            "int16" => Ok(DataType::Int16),
            "int32" => Ok(DataType::Int32),
            "int64" => Ok(DataType::Int64),
            "uint8" => Ok(DataType::UInt8),
            "uint16" => Ok(DataType::UInt16),
            "uint32" => Ok(DataType::UInt32),
            "uint64" => Ok(DataType::UInt64),
            "float32" => Ok(DataType::Float32),
            "float64" => Ok(DataType::Float64),
            _ => Err("Unknown data type, cannot parse"),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use DataType::*;
        match self {
            Int8 => f.write_str("int8"),
            Int16 => f.write_str("int16"),
            Int32 => f.write_str("int32"),
            Int64 => f.write_str("int64"),
            UInt8 => f.write_str("uint8"),
            UInt16 => f.write_str("uint16"),
            UInt32 => f.write_str("uint32"),
            UInt64 => f.write_str("uint64"),
            Float32 => f.write_str("float32"),
            Float64 => f.write_str("float64"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum TensorError {
    #[error("expected a tensor of type {expected}, got {found}")]
    DtypeMismatch { expected: DataType, found: DataType },
    #[error("range {start}..{end} is out of bounds for axis {axis} of length {len}")]
    OutOfBounds { axis: usize, start: usize, end: usize, len: usize },
    #[error("cannot slice {given} trailing axes of a tensor with {ndim} dimensions")]
    TooManySlices { given: usize, ndim: usize },
    #[error("scalar tensors have no axes to slice")]
    Scalar,
    #[error("cannot concatenate an empty list of tensors")]
    NothingToConcatenate,
    #[error("incompatible shapes: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type TensorResult<A> = Result<A, TensorError>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tensor {
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    UInt8(ArrayD<u8>),
    UInt16(ArrayD<u16>),
    UInt32(ArrayD<u32>),
    UInt64(ArrayD<u64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

/// Runs `$body` with `$arr` bound to the inner array, whatever the element type.
macro_rules! with_array {
    ($tensor:expr, $arr:ident => $body:expr) => {
        match $tensor {
            Tensor::Int8($arr) => $body,
            Tensor::Int16($arr) => $body,
            Tensor::Int32($arr) => $body,
            Tensor::Int64($arr) => $body,
            Tensor::UInt8($arr) => $body,
            Tensor::UInt16($arr) => $body,
            Tensor::UInt32($arr) => $body,
            Tensor::UInt64($arr) => $body,
            Tensor::Float32($arr) => $body,
            Tensor::Float64($arr) => $body,
        }
    };
}

/// Like `with_array!` but wraps the resulting array back into the same variant.
macro_rules! map_array {
    ($tensor:expr, $arr:ident => $body:expr) => {
        match $tensor {
            Tensor::Int8($arr) => Tensor::Int8($body),
            Tensor::Int16($arr) => Tensor::Int16($body),
            Tensor::Int32($arr) => Tensor::Int32($body),
            Tensor::Int64($arr) => Tensor::Int64($body),
            Tensor::UInt8($arr) => Tensor::UInt8($body),
            Tensor::UInt16($arr) => Tensor::UInt16($body),
            Tensor::UInt32($arr) => Tensor::UInt32($body),
            Tensor::UInt64($arr) => Tensor::UInt64($body),
            Tensor::Float32($arr) => Tensor::Float32($body),
            Tensor::Float64($arr) => Tensor::Float64($body),
        }
    };
}

impl Tensor {
    pub fn dtype(&self) -> DataType {
        match self {
            Tensor::Int8(_) => DataType::Int8,
            Tensor::Int16(_) => DataType::Int16,
            Tensor::Int32(_) => DataType::Int32,
            Tensor::Int64(_) => DataType::Int64,
            Tensor::UInt8(_) => DataType::UInt8,
            Tensor::UInt16(_) => DataType::UInt16,
            Tensor::UInt32(_) => DataType::UInt32,
            Tensor::UInt64(_) => DataType::UInt64,
            Tensor::Float32(_) => DataType::Float32,
            Tensor::Float64(_) => DataType::Float64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        with_array!(self, a => a.ndim())
    }

    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the rows `range` along the first axis.
    pub fn slice_rows(&self, range: Range<usize>) -> TensorResult<Tensor> {
        let rows = *self.shape().first().ok_or(TensorError::Scalar)?;
        check_range(0, &range, rows)?;
        Ok(map_array!(self, a => a.slice_axis(Axis(0), Slice::from(range)).to_owned()))
    }

    /// Copy restricted along the trailing axes: `slices[k]` applies to axis `k + 1`,
    /// trailing axes without an entry are kept whole.
    pub fn slice_inner(&self, slices: &[Range<usize>]) -> TensorResult<Tensor> {
        let shape = self.shape();
        if slices.len() + 1 > shape.len() {
            return Err(TensorError::TooManySlices {
                given: slices.len(),
                ndim: shape.len(),
            });
        }
        for (k, range) in slices.iter().enumerate() {
            check_range(k + 1, range, shape[k + 1])?;
        }
        let select = |axis: usize| match axis.checked_sub(1).and_then(|k| slices.get(k)) {
            Some(range) => Slice::from(range.clone()),
            None => Slice::from(..),
        };
        Ok(map_array!(self, a => a.slice_each_axis(|d| select(d.axis.index())).to_owned()))
    }

    /// Adds a new axis of length one in front, `(L,)` becomes `(1, L)`.
    pub fn insert_leading_axis(self) -> Tensor {
        map_array!(self, a => a.insert_axis(Axis(0)))
    }

    /// Concatenates `parts` along the first axis, in order.
    pub fn concatenate(parts: &[Tensor]) -> TensorResult<Tensor> {
        let first = parts.first().ok_or(TensorError::NothingToConcatenate)?;

        macro_rules! concat_as {
            ($variant:ident) => {{
                let views = parts
                    .iter()
                    .map(|t| match t {
                        Tensor::$variant(a) => Ok(a.view()),
                        other => Err(TensorError::DtypeMismatch {
                            expected: DataType::$variant,
                            found: other.dtype(),
                        }),
                    })
                    .collect::<TensorResult<Vec<_>>>()?;
                Tensor::$variant(ndarray::concatenate(Axis(0), &views)?)
            }};
        }

        let res = match first {
            Tensor::Int8(_) => concat_as!(Int8),
            Tensor::Int16(_) => concat_as!(Int16),
            Tensor::Int32(_) => concat_as!(Int32),
            Tensor::Int64(_) => concat_as!(Int64),
            Tensor::UInt8(_) => concat_as!(UInt8),
            Tensor::UInt16(_) => concat_as!(UInt16),
            Tensor::UInt32(_) => concat_as!(UInt32),
            Tensor::UInt64(_) => concat_as!(UInt64),
            Tensor::Float32(_) => concat_as!(Float32),
            Tensor::Float64(_) => concat_as!(Float64),
        };
        Ok(res)
    }

    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::peek(self)
    }

    pub fn into_array<T: Element>(self) -> TensorResult<ArrayD<T>> {
        T::extract(self).map_err(|other| TensorError::DtypeMismatch {
            expected: T::DTYPE,
            found: other.dtype(),
        })
    }
}

fn check_range(axis: usize, range: &Range<usize>, len: usize) -> TensorResult<()> {
    if range.start > range.end || range.end > len {
        Err(TensorError::OutOfBounds { axis, start: range.start, end: range.end, len })
    } else {
        Ok(())
    }
}

/// Element types a [`Tensor`] can hold.
pub trait Element: Clone + Sized {
    const DTYPE: DataType;

    fn wrap(array: ArrayD<Self>) -> Tensor;
    fn peek(tensor: &Tensor) -> Option<&ArrayD<Self>>;
    fn extract(tensor: Tensor) -> Result<ArrayD<Self>, Tensor>;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DTYPE: DataType = DataType::$variant;

            fn wrap(array: ArrayD<Self>) -> Tensor {
                Tensor::$variant(array)
            }

            fn peek(tensor: &Tensor) -> Option<&ArrayD<Self>> {
                match tensor {
                    Tensor::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn extract(tensor: Tensor) -> Result<ArrayD<Self>, Tensor> {
                match tensor {
                    Tensor::$variant(a) => Ok(a),
                    other => Err(other),
                }
            }
        }
    };
}

impl_element!(i8, Int8);
impl_element!(i16, Int16);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, UInt8);
impl_element!(u16, UInt16);
impl_element!(u32, UInt32);
impl_element!(u64, UInt64);
impl_element!(f32, Float32);
impl_element!(f64, Float64);

impl<T: Element, D: Dimension> From<Array<T, D>> for Tensor {
    fn from(array: Array<T, D>) -> Self {
        T::wrap(array.into_dyn())
    }
}
