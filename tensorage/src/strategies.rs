#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
use std::{fmt::Debug, num::NonZeroUsize};

use ndarray::{Array, IxDyn};
use proptest::prelude::*;
use proptest::{collection::vec, strategy::Strategy};

use crate::tensor::{Element, Tensor};

const MAX_NDIM: usize = 4;
const MAX_AXIS_LEN: usize = 7;

/// Shapes with 1 to `MAX_NDIM` axes, every axis non-empty.
pub fn shapes() -> impl Strategy<Value = Vec<usize>> {
    vec(1..=MAX_AXIS_LEN, 1..=MAX_NDIM)
}

fn tensors_of<T, S>(values: S) -> impl Strategy<Value = Tensor>
where
    T: Element + Debug,
    S: Strategy<Value = T> + Clone,
{
    shapes().prop_flat_map(move |shape| {
        let len: usize = shape.iter().product();
        vec(values.clone(), len).prop_map(move |data| {
            Tensor::from(Array::from_shape_vec(IxDyn(&shape), data).expect("invalid shape"))
        })
    })
}

pub fn tensors() -> BoxedStrategy<Tensor> {
    prop_oneof![tensors_of(-1e6f64..1e6), tensors_of(any::<i32>())].boxed()
}

pub fn chunk_sizes() -> impl Strategy<Value = NonZeroUsize> {
    (1usize..500).prop_map(|n| NonZeroUsize::new(n).expect("chunk size is positive"))
}
