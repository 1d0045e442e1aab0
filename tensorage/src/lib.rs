//! Chunked tensor storage over a dataset registry and an object store.
//!
//! General design:
//! - Callers see a key-value interface, [`TensorStore`], mapping string keys to
//!   n-dimensional arrays ([`Tensor`]).
//! - Each stored tensor is described by a [`Dataset`] record in a registry, the
//!   [`DatabaseContext`]. The registry assigns the id that addresses the tensor's chunks.
//! - Chunk payloads live in the account owner's bucket, reached through a
//!   [`StorageContext`]. Tensors are split along their first axis so that every chunk
//!   holds whole rows, see [`chunking`].
//! - The backend client is shared and normally carries a low-privilege key. Bucket
//!   operations run with the owner's token installed through a scoped guard, see
//!   [`client::BackendClient::elevate`].
pub mod backend;
pub mod chunking;
pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod session;
pub mod store;
#[cfg(test)]
pub mod strategies;
pub mod tensor;

pub use backend::{
    DatabaseContext, InMemoryDatabase, ObjectStorage, StorageContext,
    new_in_memory_storage, new_local_filesystem_storage, new_s3_storage,
};
pub use config::{BackendConfig, StoreConfig};
pub use dataset::{Dataset, DatasetId};
pub use session::{Authenticator, BackendSession, login, signup};
pub use store::{StoreError, TensorStore};
pub use tensor::{DataType, Tensor};

#[cfg(feature = "logs")]
pub fn initialize_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{
        EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
    };

    // We have two Layers. One keeps track of the spans to feed the TGError span traces.
    // The other is the one that does formatting and filtering of the log output.
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(EnvFilter::from_env("TENSORAGE_LOG"));

    let error_span_layer = ErrorLayer::default();

    if let Err(err) = Registry::default().with(error_span_layer).with(stdout_layer).try_init()
    {
        tracing::warn!("tracing was already initialized: {err}");
    }
}
