use crate::command::{
    AttachmentReply, AttachmentSource, Database, DeleteDocument, DocumentReply, GetAttachment,
    GetDocument, GetView, PutAttachment, PutDocument, Search, SearchQuery, SearchRow,
};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::remoting::{EventSink, Remoting};
use crate::transaction::transition::{self, User};
use crate::transaction::{step, Task};
use crate::version::VersionAuthority;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attachment holding a resource's data asset
pub const DATA_ATTACHMENT: &str = "data";

// =============================================================================
// DownloadUsers
// =============================================================================

/// All users, from the `users/GetAll` view.
pub struct DownloadUsers {
    db: Database,
    connection: ConnectionConfig,
}

impl DownloadUsers {
    pub fn new(db: Database, connection: ConnectionConfig) -> Self {
        Self { db, connection }
    }

    async fn execute(&self, events: &EventSink<Vec<User>>) -> Result<Vec<User>> {
        let view = GetView::new(self.db.clone(), "users", "GetAll")?;
        let reply = step(&self.connection, &view, 0, events).await?;
        transition::users(&reply)
    }
}

#[async_trait]
impl Task for DownloadUsers {
    type Output = Vec<User>;

    fn name(&self) -> &'static str {
        "DownloadUsers"
    }

    async fn process(self, events: EventSink<Vec<User>>) {
        info!(db = self.db.name(), "Downloading users");
        let result = self.execute(&events).await;
        if let Ok(users) = &result {
            debug!(count = users.len(), "Users downloaded");
        }
        events.finish(result);
    }
}

// =============================================================================
// UploadResource
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub id: String,
    /// Revision after the metadata write
    pub document_rev: String,
    /// Revision after the data write; the document's current revision
    pub rev: String,
}

/// Metadata document first, then the data attachment against the revision
/// the first write returned.
pub struct UploadResource {
    db: Database,
    connection: ConnectionConfig,
    document: PutDocument,
    attachment: PutAttachment,
}

impl UploadResource {
    pub const DOCUMENT_STEP: usize = 0;
    pub const DATA_STEP: usize = 1;

    pub fn new(
        db: Database,
        connection: ConnectionConfig,
        id: &str,
        document: &Value,
        data: AttachmentSource,
        length: u64,
        content_type: &str,
    ) -> Result<Self> {
        let attachment = PutAttachment::new(db.clone(), id, DATA_ATTACHMENT, data, length)?
            .with_content_type(content_type);
        let document = PutDocument::new(db.clone(), id, document)?;
        Ok(Self {
            db,
            connection,
            document,
            attachment,
        })
    }

    async fn execute(&self, events: &EventSink<UploadReceipt>) -> Result<UploadReceipt> {
        let written = step(&self.connection, &self.document, Self::DOCUMENT_STEP, events).await?;
        debug!(id = %written.id, rev = %written.rev, "Metadata stored");

        let attachment = self.attachment.clone().with_rev(written.rev.clone());
        let attached = match step(&self.connection, &attachment, Self::DATA_STEP, events).await {
            Ok(attached) => attached,
            Err(e) => {
                self.remove_orphan(&written.rev).await;
                return Err(e);
            }
        };
        Ok(UploadReceipt {
            id: attached.id,
            document_rev: written.rev,
            rev: attached.rev,
        })
    }

    /// Best-effort delete of a metadata document whose data never arrived.
    /// The data step's error is what the caller sees either way.
    async fn remove_orphan(&self, rev: &str) {
        let id = self.document.id();
        let delete = match DeleteDocument::new(self.db.clone(), id, rev) {
            Ok(delete) => delete,
            Err(e) => {
                warn!(id, error = %e, "Orphaned metadata document left on server");
                return;
            }
        };
        match Remoting::new(self.connection.clone()).call(&delete, |_| {}).await {
            Ok(reply) => debug!(id, rev = %reply.rev, "Removed metadata without data"),
            Err(e) => warn!(id, rev, error = %e, "Orphaned metadata document left on server"),
        }
    }
}

#[async_trait]
impl Task for UploadResource {
    type Output = UploadReceipt;

    fn name(&self) -> &'static str {
        "UploadResource"
    }

    async fn process(self, events: EventSink<UploadReceipt>) {
        info!(
            id = self.document.id(),
            bytes = self.attachment.length(),
            "Uploading resource"
        );
        let result = self.execute(&events).await;
        events.finish(result);
    }
}

// =============================================================================
// DownloadResource
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedResource {
    pub document: DocumentReply,
    pub data: AttachmentReply,
}

/// Metadata document, then its data attachment.
pub struct DownloadResource {
    connection: ConnectionConfig,
    document: GetDocument,
    attachment: GetAttachment,
}

impl DownloadResource {
    pub const DOCUMENT_STEP: usize = 0;
    pub const DATA_STEP: usize = 1;

    pub fn new(db: Database, connection: ConnectionConfig, id: &str) -> Result<Self> {
        Ok(Self {
            connection,
            document: GetDocument::new(db.clone(), id)?,
            attachment: GetAttachment::new(db, id, DATA_ATTACHMENT)?,
        })
    }

    async fn execute(&self, events: &EventSink<DownloadedResource>) -> Result<DownloadedResource> {
        let document = step(&self.connection, &self.document, Self::DOCUMENT_STEP, events).await?;
        let data = step(&self.connection, &self.attachment, Self::DATA_STEP, events).await?;
        Ok(DownloadedResource { document, data })
    }
}

#[async_trait]
impl Task for DownloadResource {
    type Output = DownloadedResource;

    fn name(&self) -> &'static str {
        "DownloadResource"
    }

    async fn process(self, events: EventSink<DownloadedResource>) {
        info!(id = self.document.id(), "Downloading resource");
        let result = self.execute(&events).await;
        events.finish(result);
    }
}

// =============================================================================
// SearchResources
// =============================================================================

/// Full-text search narrowed to the current version of each resource.
pub struct SearchResources {
    connection: ConnectionConfig,
    search: Search,
    versions: Arc<dyn VersionAuthority>,
}

impl SearchResources {
    pub const SEARCH_DESIGN: &'static str = "search";
    pub const SEARCH_INDEX: &'static str = "by_all";

    pub fn new(
        db: Database,
        connection: ConnectionConfig,
        query: SearchQuery,
        versions: Arc<dyn VersionAuthority>,
    ) -> Result<Self> {
        Ok(Self {
            connection,
            search: Search::new(db, Self::SEARCH_DESIGN, Self::SEARCH_INDEX, query)?,
            versions,
        })
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.search = self.search.with_limit(limit);
        self
    }

    async fn execute(&self, events: &EventSink<Vec<SearchRow>>) -> Result<Vec<SearchRow>> {
        let reply = step(&self.connection, &self.search, 0, events).await?;
        let ids = transition::search_version_ids(&reply);
        let current = self.versions.get_current_versions(&ids).await?;
        Ok(transition::current_results(reply, &current))
    }
}

#[async_trait]
impl Task for SearchResources {
    type Output = Vec<SearchRow>;

    fn name(&self) -> &'static str {
        "SearchResources"
    }

    async fn process(self, events: EventSink<Vec<SearchRow>>) {
        info!(query = %self.search.query().to_query_string(), "Searching resources");
        let result = self.execute(&events).await;
        events.finish(result);
    }
}
