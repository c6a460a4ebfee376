//! Resources: a metadata document and a data file sharing one version.

use crate::command::{AttachmentSource, Database, OCTET_STREAM};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::net::{Direction, Progress};
use crate::storage::fs::FileSystem;
use crate::transaction::{drive, DownloadResource, UploadResource};
use crate::version::{ResourceId, Version, VersionId};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const FIELD_RESOURCE: &str = "resource_id";
const FIELD_VERSION: &str = "version_id";
const FIELD_VERSION_NUMBER: &str = "version_number";
const FIELD_DATA_LENGTH: &str = "data_length";
const FIELD_CONTENT_TYPE: &str = "data_content_type";
const FIELD_REV: &str = "_rev";
const FIELD_ID: &str = "_id";

const PARTIAL_SUFFIX: &str = ".partial";

/// Where a resource lives on the server, and how to reach it.
#[derive(Clone)]
pub struct RemoteStore {
    pub database: Database,
    pub connection: ConnectionConfig,
    pub fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("database", &self.database.name())
            .field("connection", &self.connection)
            .finish()
    }
}

// =============================================================================
// Progress subscription
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetProgress {
    pub bytes_complete: u64,
    /// 0 while the total is unknown
    pub bytes_total: u64,
}

impl AssetProgress {
    pub fn is_complete(&self) -> bool {
        self.bytes_total > 0 && self.bytes_complete >= self.bytes_total
    }

    pub fn percent(&self) -> Option<u8> {
        (self.bytes_total > 0)
            .then(|| ((self.bytes_complete.min(self.bytes_total) * 100) / self.bytes_total) as u8)
    }
}

type ProgressHandler = Arc<dyn Fn(AssetProgress) + Send + Sync>;

#[derive(Default)]
struct ProgressState {
    complete: AtomicU64,
    total: AtomicU64,
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, ProgressHandler)>>,
}

impl ProgressState {
    fn handlers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, ProgressHandler)>> {
        self.handlers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn begin(&self, total: u64) {
        self.complete.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Record `bytes` more and notify handlers. A declared total replaces an
    /// unknown one.
    fn advance(&self, bytes: u64, total: Option<u64>) {
        if let Some(total) = total {
            if self.total.load(Ordering::SeqCst) == 0 {
                self.total.store(total, Ordering::SeqCst);
            }
        }
        let complete = self.complete.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let progress = AssetProgress {
            bytes_complete: complete,
            bytes_total: self.total.load(Ordering::SeqCst),
        };
        // Call outside the lock so a handler may drop its own subscription
        let handlers: Vec<ProgressHandler> =
            self.handlers().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(progress);
        }
    }

    fn snapshot(&self) -> AssetProgress {
        AssetProgress {
            bytes_complete: self.complete.load(Ordering::SeqCst),
            bytes_total: self.total.load(Ordering::SeqCst),
        }
    }
}

/// Keeps a progress handler registered; dropping it removes the handler.
#[must_use = "the handler is removed when the subscription is dropped"]
pub struct ProgressSubscription {
    state: Weak<ProgressState>,
    id: u64,
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.handlers().retain(|(id, _)| *id != self.id);
        }
    }
}

// =============================================================================
// Assets
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaAsset {
    pub resource: Option<ResourceId>,
    pub version: Option<VersionId>,
    pub version_number: Option<u32>,
    /// Server revision of the version document
    pub revision: Option<String>,
    /// User-visible properties (title, creator, tags, ...)
    pub properties: Map<String, Value>,
}

impl MetaAsset {
    pub fn new(properties: Map<String, Value>) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    /// Document to store: properties plus identity and data description.
    /// Reserved keys in `properties` are overwritten.
    pub fn to_document(&self, data: &DataAsset) -> Result<Value> {
        let (resource, version) = match (self.resource, self.version) {
            (Some(resource), Some(version)) => (resource, version),
            _ => {
                return Err(Error::protocol(
                    "Meta asset has no version; assign one before storing",
                ))
            }
        };
        let mut document = self.properties.clone();
        document.remove(FIELD_ID);
        document.remove(FIELD_REV);
        document.insert(FIELD_RESOURCE.into(), Value::String(resource.to_string()));
        document.insert(FIELD_VERSION.into(), Value::String(version.to_string()));
        if let Some(number) = self.version_number {
            document.insert(FIELD_VERSION_NUMBER.into(), Value::from(number));
        }
        document.insert(FIELD_DATA_LENGTH.into(), Value::from(data.length));
        document.insert(
            FIELD_CONTENT_TYPE.into(),
            Value::String(data.content_type.clone()),
        );
        Ok(Value::Object(document))
    }

    /// Rebuild from a stored document. Returns the meta asset plus the data
    /// length and content type the document records.
    pub fn from_document(document: &Value) -> Result<(Self, u64, String)> {
        let object = document
            .as_object()
            .ok_or_else(|| Error::reply("Resource document is not a JSON object"))?;
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::reply(format!("Resource document is missing {}", key)))
        };

        let resource = ResourceId::parse(text(FIELD_RESOURCE)?).map_err(as_reply)?;
        let version = VersionId::parse(text(FIELD_VERSION)?).map_err(as_reply)?;
        let revision = object.get(FIELD_REV).and_then(Value::as_str).map(str::to_string);
        let version_number = object
            .get(FIELD_VERSION_NUMBER)
            .and_then(Value::as_u64)
            .map(|n| n as u32);
        let length = object
            .get(FIELD_DATA_LENGTH)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let content_type = object
            .get(FIELD_CONTENT_TYPE)
            .and_then(Value::as_str)
            .unwrap_or(OCTET_STREAM)
            .to_string();

        let properties = object
            .iter()
            .filter(|(key, _)| {
                !matches!(
                    key.as_str(),
                    FIELD_ID
                        | FIELD_REV
                        | FIELD_RESOURCE
                        | FIELD_VERSION
                        | FIELD_VERSION_NUMBER
                        | FIELD_DATA_LENGTH
                        | FIELD_CONTENT_TYPE
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok((
            Self {
                resource: Some(resource),
                version: Some(version),
                version_number,
                revision,
                properties,
            },
            length,
            content_type,
        ))
    }
}

fn as_reply(err: Error) -> Error {
    Error::reply(err.to_string())
}

/// The binary part of a resource, stored in the local file system.
#[derive(Clone)]
pub struct DataAsset {
    pub version: Option<VersionId>,
    /// Path relative to the file system root
    pub path: PathBuf,
    pub content_type: String,
    pub length: u64,
    progress: Arc<ProgressState>,
}

impl std::fmt::Debug for DataAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAsset")
            .field("version", &self.version)
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("length", &self.length)
            .finish()
    }
}

impl DataAsset {
    pub fn new(path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            version: None,
            path: path.into(),
            content_type: OCTET_STREAM.to_string(),
            length,
            progress: Arc::default(),
        }
    }

    /// Data asset for an existing file; the length is read from `fs`.
    pub async fn from_file(fs: &dyn FileSystem, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let length = fs.len(&path).await?;
        Ok(Self::new(path, length))
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Register a handler called after every transferred packet. It may run
    /// on any thread and stays registered while the subscription lives.
    pub fn on_progress<F>(&self, handler: F) -> ProgressSubscription
    where
        F: Fn(AssetProgress) + Send + Sync + 'static,
    {
        let id = self.progress.next_id.fetch_add(1, Ordering::SeqCst);
        self.progress.handlers().push((id, Arc::new(handler)));
        ProgressSubscription {
            state: Arc::downgrade(&self.progress),
            id,
        }
    }

    pub fn progress(&self) -> AssetProgress {
        self.progress.snapshot()
    }

    pub fn subscriber_count(&self) -> usize {
        self.progress.handlers().len()
    }

    /// Forward progress from step `data_step` of a transfer in `direction`.
    fn transfer_observer(
        &self,
        data_step: usize,
        direction: Direction,
    ) -> impl FnMut(Progress) + Send + 'static {
        let state = Arc::clone(&self.progress);
        move |progress: Progress| {
            if progress.step == data_step && progress.direction == direction {
                state.advance(progress.bytes as u64, progress.total);
            }
        }
    }
}

// =============================================================================
// Resource
// =============================================================================

/// Cheap snapshot handed to requestors with every report.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    pub resource: Option<ResourceId>,
    pub version: Option<VersionId>,
    pub revision: Option<String>,
    pub data_path: PathBuf,
    pub data_length: u64,
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub meta: MetaAsset,
    pub data: DataAsset,
}

impl Resource {
    pub fn new(meta: MetaAsset, data: DataAsset) -> Self {
        Self { meta, data }
    }

    /// Placeholder for a version that is about to be checked out to `path`.
    pub fn for_checkout(version: VersionId, path: impl Into<PathBuf>) -> Self {
        let mut resource = Self::new(MetaAsset::default(), DataAsset::new(path, 0));
        resource.meta.version = Some(version);
        resource.data.version = Some(version);
        resource
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            resource: self.meta.resource,
            version: self.meta.version,
            revision: self.meta.revision.clone(),
            data_path: self.data.path.clone(),
            data_length: self.data.length,
        }
    }

    /// Stamp both parts with one version.
    pub fn assign_version(&mut self, version: &Version) {
        self.meta.resource = Some(version.resource);
        self.meta.version = Some(version.id);
        self.meta.version_number = Some(version.number);
        self.meta.revision = None;
        self.data.version = Some(version.id);
    }

    fn document_id(&self) -> Result<String> {
        match (self.meta.version, self.data.version) {
            (Some(meta), Some(data)) if meta == data => Ok(meta.to_string()),
            (Some(_), Some(_)) => Err(Error::protocol(
                "Meta and data assets carry different versions",
            )),
            _ => Err(Error::protocol("Resource has no version")),
        }
    }

    /// Store a brand new resource: its first version document plus data.
    pub async fn create_on_remote(&mut self, store: &RemoteStore) -> Result<()> {
        if self.meta.version_number.is_some_and(|n| n != 1) {
            return Err(Error::protocol(format!(
                "Create expects a first version, got version {}",
                self.meta.version_number.unwrap_or_default()
            )));
        }
        self.upload(store).await
    }

    /// Store a new version of an existing resource.
    pub async fn update_on_remote(&mut self, store: &RemoteStore) -> Result<()> {
        if self.meta.resource.is_none() {
            return Err(Error::protocol("Update requires an existing resource"));
        }
        self.upload(store).await
    }

    async fn upload(&mut self, store: &RemoteStore) -> Result<()> {
        let id = self.document_id()?;
        let document = self.meta.to_document(&self.data)?;
        let task = UploadResource::new(
            store.database.clone(),
            store.connection.clone(),
            &id,
            &document,
            AttachmentSource::File {
                fs: Arc::clone(&store.fs),
                path: self.data.path.clone(),
            },
            self.data.length,
            &self.data.content_type,
        )?;

        self.data.progress.begin(self.data.length);
        let observer = self
            .data
            .transfer_observer(UploadResource::DATA_STEP, Direction::Send);
        let receipt = drive(task, observer).await?;

        debug!(id = %id, rev = %receipt.rev, "Resource stored");
        self.meta.revision = Some(receipt.rev);
        Ok(())
    }

    /// Fetch this version's document and data, writing the data to the
    /// local file system at `data.path`.
    pub async fn checkout_from_remote(&mut self, store: &RemoteStore) -> Result<()> {
        let id = self.document_id()?;
        let task = DownloadResource::new(store.database.clone(), store.connection.clone(), &id)?;

        self.data.progress.begin(0);
        let observer = self
            .data
            .transfer_observer(DownloadResource::DATA_STEP, Direction::Receive);
        let downloaded = drive(task, observer).await?;

        let (mut meta, length, content_type) = MetaAsset::from_document(&downloaded.document.document)?;
        if meta.version != self.meta.version {
            return Err(Error::reply(format!(
                "Requested version {} but the document records {:?}",
                id, meta.version
            )));
        }
        let data = downloaded.data.data;
        if length != 0 && data.len() as u64 != length {
            return Err(Error::reply(format!(
                "Document records {} data bytes but {} arrived",
                length,
                data.len()
            )));
        }

        write_atomically(store.fs.as_ref(), &self.data.path, &data).await?;

        meta.revision = Some(downloaded.document.rev);
        self.meta = meta;
        self.data.length = data.len() as u64;
        self.data.content_type = downloaded.data.content_type.unwrap_or(content_type);
        debug!(id = %id, bytes = data.len(), "Resource checked out");
        Ok(())
    }
}

/// Write `data` beside `path`, then move it into place. A failed write
/// leaves no file at `path`.
async fn write_atomically(fs: &dyn FileSystem, path: &Path, data: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let written = async {
        let mut file = fs.create(&partial).await?;
        file.write_all(data).await?;
        file.shutdown().await
    }
    .await;
    if let Err(e) = written {
        if let Err(cleanup) = fs.remove(&partial).await {
            debug!(path = %partial.display(), error = %cleanup, "Partial file not removed");
        }
        return Err(e.into());
    }
    fs.rename(&partial, path).await?;
    Ok(())
}
