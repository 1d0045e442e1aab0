//! Chunk storage on top of the `object_store` crate.
//!
//! Every account owns one bucket, a prefix named after its user id. The prefix holds a
//! `.bucket` marker describing the bucket and one directory per dataset with a chunk per
//! stored batch:
//!
//! ```text
//! <user_id>/.bucket
//! <user_id>/<dataset_id>/<first row:020>-<end row:020>
//! ```
//!
//! Chunk names carry their row range, so the stored extent of a dataset is known from a
//! listing without reading any payload.
use std::{fs::create_dir_all, ops::Range, path::Path, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use itertools::Itertools;
use object_store::{
    ObjectStore, PutMode, PutOptions, PutPayload, aws::AmazonS3Builder,
    local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use super::{
    BackendError, BackendErrorKind, BackendResult, StorageContext, batch_rows,
};
use crate::{
    client::ElevatedClient,
    config::{S3Options, StorageSettings},
    dataset::DatasetId,
    session::{BackendSession, User},
    tensor::{Tensor, TensorError},
};

const BUCKET_MARKER: &str = ".bucket";

/// Contents of the `.bucket` marker object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: String,
    pub name: String,
    pub public: bool,
}

/// A stored batch and the dataset rows it covers.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ChunkRef {
    rows: Range<usize>,
    path: ObjectPath,
}

pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    session: Arc<BackendSession>,
    settings: StorageSettings,
}

pub fn new_in_memory_storage(session: Arc<BackendSession>) -> ObjectStorage {
    ObjectStorage::new(Arc::new(InMemory::new()), session)
}

pub fn new_local_filesystem_storage(
    session: Arc<BackendSession>,
    root: &Path,
) -> BackendResult<ObjectStorage> {
    create_dir_all(root)?;
    let store = LocalFileSystem::new_with_prefix(root)?.with_automatic_cleanup(true);
    Ok(ObjectStorage::new(Arc::new(store), session))
}

pub fn new_s3_storage(
    session: Arc<BackendSession>,
    bucket: impl Into<String>,
    options: &S3Options,
) -> BackendResult<ObjectStorage> {
    let builder = match &options.credentials {
        Some(creds) => {
            let builder = AmazonS3Builder::new()
                .with_access_key_id(&creds.access_key_id)
                .with_secret_access_key(&creds.secret_access_key);
            match &creds.session_token {
                Some(token) => builder.with_token(token),
                None => builder,
            }
        }
        None => AmazonS3Builder::from_env(),
    };
    let builder = match &options.region {
        Some(region) => builder.with_region(region),
        None => builder,
    };
    let builder = match &options.endpoint_url {
        Some(endpoint) => builder.with_endpoint(endpoint),
        None => builder,
    };
    let store = builder.with_allow_http(options.allow_http).with_bucket_name(bucket).build()?;
    Ok(ObjectStorage::new(Arc::new(store), session))
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>, session: Arc<BackendSession>) -> Self {
        Self { store, session, settings: StorageSettings::default() }
    }

    pub fn with_settings(mut self, settings: StorageSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    /// The client with the session owner's token installed.
    async fn elevated(&self) -> ElevatedClient<'_> {
        let token = self.session.access_token().await;
        self.session.client().elevate(&token).await
    }

    fn bucket_path(user: &User) -> ObjectPath {
        ObjectPath::from(format!("{}/{}", user.id, BUCKET_MARKER))
    }

    fn dataset_path(user: &User, dataset_id: DatasetId) -> ObjectPath {
        ObjectPath::from(format!("{}/{}", user.id, dataset_id))
    }

    fn chunk_path(user: &User, dataset_id: DatasetId, rows: &Range<usize>) -> ObjectPath {
        ObjectPath::from(format!(
            "{}/{}/{:020}-{:020}",
            user.id, dataset_id, rows.start, rows.end
        ))
    }

    fn parse_chunk_rows(name: &str) -> Option<Range<usize>> {
        let (start, end) = name.split_once('-')?;
        Some(start.parse().ok()?..end.parse().ok()?)
    }

    fn authorize(client: &ElevatedClient<'_>) -> BackendResult<()> {
        let credential = client.credential();
        if credential.is_elevated() && !credential.token().is_empty() {
            Ok(())
        } else {
            Err(BackendErrorKind::Unauthorized(format!(
                "bucket access on {} without an owner token",
                client.url()
            ))
            .into())
        }
    }

    async fn has_bucket_in(
        &self,
        client: &ElevatedClient<'_>,
        user: &User,
    ) -> BackendResult<bool> {
        Self::authorize(client)?;
        match self.store.head(&Self::bucket_path(user)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_bucket_in(
        &self,
        client: &ElevatedClient<'_>,
        user: &User,
    ) -> BackendResult<()> {
        Self::authorize(client)?;
        let info = BucketInfo { id: user.id.clone(), name: user.email.clone(), public: false };
        let payload = PutPayload::from(serde_json::to_vec(&info)?);
        let opts = PutOptions { mode: PutMode::Create, ..PutOptions::default() };
        match self.store.put_opts(&Self::bucket_path(user), payload, opts).await {
            Ok(_) => {
                debug!(bucket = %user.id, "bucket created");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                trace!(bucket = %user.id, "bucket already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn ensure_bucket_in(
        &self,
        client: &ElevatedClient<'_>,
        user: &User,
    ) -> BackendResult<()> {
        if !self.has_bucket_in(client, user).await? {
            self.create_bucket_in(client, user).await?;
        }
        Ok(())
    }

    /// Stored chunks of a dataset, ordered by row.
    async fn chunks_in(
        &self,
        client: &ElevatedClient<'_>,
        user: &User,
        dataset_id: DatasetId,
    ) -> BackendResult<Vec<ChunkRef>> {
        Self::authorize(client)?;
        let prefix = Self::dataset_path(user, dataset_id);
        let listed: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        let chunks = listed
            .into_iter()
            .filter_map(|meta| {
                let rows = meta.location.filename().and_then(Self::parse_chunk_rows);
                if rows.is_none() {
                    warn!(path = %meta.location, "ignoring unexpected object in dataset");
                }
                Some(ChunkRef { rows: rows?, path: meta.location })
            })
            .sorted_by_key(|chunk| chunk.rows.start)
            .collect();
        Ok(chunks)
    }

    async fn write_batches_in(
        &self,
        client: &ElevatedClient<'_>,
        user: &User,
        dataset_id: DatasetId,
        batches: Vec<Tensor>,
        offset: usize,
    ) -> BackendResult<bool> {
        Self::authorize(client)?;
        if batches.iter().any(|batch| batch.ndim() == 0) {
            return Err(BackendErrorKind::Tensor(TensorError::Scalar).into());
        }

        let mut start = offset;
        let placed: Vec<(Range<usize>, Tensor)> = batches
            .into_iter()
            .map(|batch| {
                let rows = start..start + batch_rows(&batch);
                start = rows.end;
                let batch =
                    if batch.ndim() == 1 { batch.insert_leading_axis() } else { batch };
                (rows, batch)
            })
            .filter(|(rows, _)| !rows.is_empty())
            .collect();
        if placed.is_empty() {
            return Ok(false);
        }

        let limit = usize::from(self.settings.max_concurrent_uploads.get());
        stream::iter(placed.into_iter().map(Ok::<_, BackendError>))
            .try_for_each_concurrent(limit, |(rows, batch)| async move {
                let path = Self::chunk_path(user, dataset_id, &rows);
                let bytes = Bytes::from(rmp_serde::to_vec(&batch)?);
                self.store.put(&path, PutPayload::from(bytes)).await?;
                trace!(%path, "chunk written");
                Ok::<_, BackendError>(())
            })
            .await?;
        Ok(true)
    }

    async fn fetch_rows(&self, chunk: &ChunkRef, rows: &Range<usize>) -> BackendResult<Tensor> {
        let bytes = self.store.get(&chunk.path).await?.bytes().await?;
        let tensor: Tensor = rmp_serde::from_slice(&bytes)?;
        let from = rows.start.max(chunk.rows.start) - chunk.rows.start;
        let to = rows.end.min(chunk.rows.end) - chunk.rows.start;
        Ok(tensor.slice_rows(from..to)?)
    }
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectStorage(store={}, client={:?})", self.store, self.session.client())
    }
}

#[async_trait]
impl StorageContext for ObjectStorage {
    #[instrument(skip(self))]
    async fn has_bucket(&self) -> BackendResult<bool> {
        let user = self.session.user().await;
        let client = self.elevated().await;
        self.has_bucket_in(&client, &user).await
    }

    #[instrument(skip(self))]
    async fn create_user_bucket(&self) -> BackendResult<()> {
        let user = self.session.user().await;
        let client = self.elevated().await;
        self.create_bucket_in(&client, &user).await
    }

    #[instrument(skip(self, batches), fields(batches = batches.len()))]
    async fn insert_tensor(
        &self,
        dataset_id: DatasetId,
        batches: Vec<Tensor>,
        offset: usize,
    ) -> BackendResult<bool> {
        let user = self.session.user().await;
        let client = self.elevated().await;
        self.ensure_bucket_in(&client, &user).await?;
        self.write_batches_in(&client, &user, dataset_id, batches, offset).await
    }

    #[instrument(skip(self, batches), fields(batches = batches.len()))]
    async fn append_tensor(
        &self,
        dataset_id: DatasetId,
        batches: Vec<Tensor>,
    ) -> BackendResult<bool> {
        let user = self.session.user().await;
        let client = self.elevated().await;
        self.ensure_bucket_in(&client, &user).await?;
        let offset = self
            .chunks_in(&client, &user, dataset_id)
            .await?
            .last()
            .map(|chunk| chunk.rows.end)
            .unwrap_or(0);
        debug!(offset, "appending after stored rows");
        self.write_batches_in(&client, &user, dataset_id, batches, offset).await
    }

    #[instrument(skip(self))]
    async fn get_tensor(
        &self,
        dataset_id: DatasetId,
        rows: Range<usize>,
        slices: &[Range<usize>],
    ) -> BackendResult<Tensor> {
        let user = self.session.user().await;
        let client = self.elevated().await;
        let chunks = self.chunks_in(&client, &user, dataset_id).await?;
        let stored = match chunks.last() {
            Some(last) => last.rows.end,
            None => {
                return Err(BackendErrorKind::NotFound(
                    Self::dataset_path(&user, dataset_id).to_string(),
                )
                .into());
            }
        };
        if rows.start >= rows.end || rows.end > stored {
            return Err(
                BackendErrorKind::InvalidRange { start: rows.start, end: rows.end }.into()
            );
        }

        let limit = usize::from(self.settings.max_concurrent_uploads.get());
        let fetches: Vec<_> = chunks
            .iter()
            .filter(|chunk| chunk.rows.start < rows.end && chunk.rows.end > rows.start)
            .map(|chunk| self.fetch_rows(chunk, &rows))
            .collect();
        let parts: Vec<Tensor> = stream::iter(fetches)
        .buffered(limit)
        .try_collect()
        .await?;

        Ok(Tensor::concatenate(&parts)?.slice_inner(slices)?)
    }

    #[instrument(skip(self))]
    async fn remove_tensor(&self, dataset_id: DatasetId) -> BackendResult<u64> {
        let user = self.session.user().await;
        let client = self.elevated().await;
        Self::authorize(&client)?;
        let prefix = Self::dataset_path(&user, dataset_id);
        let listed: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        let mut removed = 0;
        for meta in listed {
            match self.store.delete(&meta.location).await {
                Ok(()) => removed += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        debug!(removed, "chunks removed");
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn truncate_tensor(&self, dataset_id: DatasetId, rows: usize) -> BackendResult<u64> {
        let user = self.session.user().await;
        let client = self.elevated().await;
        let chunks = self.chunks_in(&client, &user, dataset_id).await?;
        let mut removed = 0;
        for chunk in chunks.into_iter().filter(|chunk| chunk.rows.start >= rows) {
            match self.store.delete(&chunk.path).await {
                Ok(()) => removed += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        debug!(removed, "trailing chunks removed");
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn list_datasets(&self) -> BackendResult<Vec<DatasetId>> {
        let user = self.session.user().await;
        let client = self.elevated().await;
        Self::authorize(&client)?;
        let root = ObjectPath::from(user.id.as_str());
        // a dataset is listed while it has at least one chunk, empty directories
        // left behind by a filesystem store do not count
        let listed: Vec<_> = self.store.list(Some(&root)).try_collect().await?;
        let ids = listed
            .iter()
            .filter_map(|meta| {
                let mut parts = meta.location.prefix_match(&root)?;
                let dataset = parts.next()?;
                let chunk = parts.next()?;
                Self::parse_chunk_rows(chunk.as_ref())?;
                dataset.as_ref().parse().ok().map(DatasetId)
            })
            .sorted()
            .dedup()
            .collect();
        Ok(ids)
    }
}
