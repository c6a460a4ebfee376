mod support;

use bytes::Bytes;
use dms_engine::command::{
    AttachmentSource, GetDocument, GetView, PostAttachmentForm, PutAttachment, PutDocument,
    SearchQuery,
};
use dms_engine::net::Direction;
use dms_engine::remoting::{channel, Event, Remoting};
use dms_engine::storage::{FileSystem, LocalFileSystem};
use dms_engine::transaction::{drive, DownloadUsers, SearchResources, UploadResource};
use dms_engine::version::{InMemoryVersionAuthority, VersionAuthority};
use dms_engine::Error;
use serde_json::json;
use std::sync::Arc;
use support::{attachment_ok, fast_connection, put_ok, Reply, ScriptedServer};

#[tokio::test]
async fn test_put_document_round_trip() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![Reply::Echo(put_ok)]).await;
    let document = json!({"title": "Quarterly plan", "tags": ["finance"]});
    let command = PutDocument::new(server.database("documents"), "doc-1", &document)?;

    let reply = Remoting::new(fast_connection()).call(&command, |_| {}).await?;
    assert!(reply.ok);
    assert_eq!(reply.id, "doc-1");
    assert_eq!(reply.rev, "1-aaa");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method(), "PUT");
    assert_eq!(requests[0].target(), "/documents/doc-1");
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    assert_eq!(
        requests[0].header("host"),
        Some(format!("127.0.0.1:{}", server.port()).as_str())
    );
    assert_eq!(requests[0].json(), document);
    Ok(())
}

#[tokio::test]
async fn test_get_document_round_trip() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![Reply::Json(
        200,
        json!({"_id": "doc-2", "_rev": "3-ccc", "title": "Minutes"}),
    )])
    .await;
    let command = GetDocument::new(server.database("documents"), "doc-2")?;

    let reply = Remoting::new(fast_connection()).call(&command, |_| {}).await?;
    assert_eq!(reply.id, "doc-2");
    assert_eq!(reply.rev, "3-ccc");
    assert_eq!(reply.document["title"], "Minutes");

    let requests = server.requests();
    assert_eq!(requests[0].method(), "GET");
    assert_eq!(requests[0].target(), "/documents/doc-2");
    assert_eq!(requests[0].header("accept"), Some("application/json"));
    Ok(())
}

#[tokio::test]
async fn test_notification_sequence_ends_with_one_complete() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![Reply::Echo(attachment_ok)]).await;
    let data = Bytes::from(vec![7u8; 200_000]);
    let command = PutAttachment::new(
        server.database("documents"),
        "doc-3",
        "data",
        AttachmentSource::Bytes(data),
        200_000,
    )?
    .with_rev("1-aaa");

    let (sink, stream) = channel();
    let (_, events) = tokio::join!(
        Remoting::new(fast_connection()).run(&command, sink),
        stream.collect()
    );

    let (last, progress) = events.split_last().unwrap();
    assert_eq!(last.kind(), "complete");
    assert!(progress.iter().all(|e| !e.is_terminal()));
    let sent: usize = progress
        .iter()
        .filter_map(|e| match e {
            Event::Progress(p) if p.direction == Direction::Send => Some(p.bytes),
            _ => None,
        })
        .sum();
    assert_eq!(sent, 200_000);

    let requests = server.requests();
    assert_eq!(requests[0].target(), "/documents/doc-3/data?rev=1-aaa");
    assert_eq!(requests[0].body.len(), 200_000);
    Ok(())
}

#[tokio::test]
async fn test_form_upload_streams_file_part() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    std::fs::write(temp.path().join("scan.pdf"), vec![5u8; 150_000])?;
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(temp.path()));

    let server = ScriptedServer::start(vec![Reply::Echo(put_ok)]).await;
    let command = PostAttachmentForm::new(
        server.database("documents"),
        "doc-10",
        "1-aaa",
        fs,
        "scan.pdf",
        150_000,
    )?;

    let reply = Remoting::new(fast_connection()).call(&command, |_| {}).await?;
    assert_eq!(reply.id, "doc-10");

    let requests = server.requests();
    assert_eq!(requests[0].method(), "POST");
    assert_eq!(requests[0].target(), "/documents/doc-10");
    assert!(requests[0]
        .header("content-type")
        .is_some_and(|v| v.starts_with("multipart/form-data; boundary=")));
    assert_eq!(requests[0].declared_length, requests[0].body.len());
    assert!(requests[0].body.len() > 150_000);
    Ok(())
}

#[tokio::test]
async fn test_dropped_connection_is_error_not_timeout() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![Reply::DropAfter(64 * 1024)]).await;
    let command = PutAttachment::new(
        server.database("documents"),
        "doc-4",
        "data",
        AttachmentSource::Bytes(Bytes::from(vec![1u8; 4 * 1024 * 1024])),
        4 * 1024 * 1024,
    )?;

    let (sink, stream) = channel();
    let (_, events) = tokio::join!(
        Remoting::new(fast_connection()).run(&command, sink),
        stream.collect()
    );

    let last = events.last().unwrap();
    match last {
        Event::Error { cause, .. } => assert!(cause.is_transport(), "{}", cause),
        other => panic!("expected error, got {}", other.kind()),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stalled_server_is_timeout() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![Reply::Stall]).await;
    let command = GetDocument::new(server.database("documents"), "doc-5")?;

    let (sink, stream) = channel();
    let (_, events) = tokio::join!(
        Remoting::new(fast_connection()).run(&command, sink),
        stream.collect()
    );

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), "timeout");
    Ok(())
}

#[tokio::test]
async fn test_malformed_status_line_is_protocol_error() -> anyhow::Result<()> {
    let server =
        ScriptedServer::start(vec![Reply::Raw(b"HTTP/1.1 two-hundred OK\r\n\r\n".to_vec())]).await;
    let command = GetDocument::new(server.database("documents"), "doc-6")?;

    let err = Remoting::new(fast_connection())
        .call(&command, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{}", err);
    Ok(())
}

#[tokio::test]
async fn test_conflict_is_reply_construction_error() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![Reply::Json(
        409,
        json!({"error": "conflict", "reason": "Document update conflict."}),
    )])
    .await;
    let command = PutDocument::new(server.database("documents"), "doc-7", &json!({}))?;

    let err = Remoting::new(fast_connection())
        .call(&command, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReplyConstruction(_)));
    assert!(err.to_string().contains("Document update conflict."));
    Ok(())
}

#[tokio::test]
async fn test_second_command_waits_for_first_complete() -> anyhow::Result<()> {
    let server =
        ScriptedServer::start(vec![Reply::Echo(put_ok), Reply::Echo(attachment_ok)]).await;
    let task = UploadResource::new(
        server.database("documents"),
        fast_connection(),
        "doc-8",
        &json!({"title": "Scan"}),
        AttachmentSource::Bytes(Bytes::from_static(b"%PDF-1.4")),
        8,
        "application/pdf",
    )?;

    let mut steps = Vec::new();
    let receipt = drive(task, |p| steps.push(p.step)).await?;
    assert_eq!(receipt.document_rev, "1-aaa");
    assert_eq!(receipt.rev, "2-bbb");

    // The attachment write carries the revision the first reply returned
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].target(), "/documents/doc-8");
    assert_eq!(requests[1].target(), "/documents/doc-8/data?rev=1-aaa");
    assert_eq!(requests[1].header("content-type"), Some("application/pdf"));

    assert!(steps.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(steps.last(), Some(&UploadResource::DATA_STEP));
    Ok(())
}

#[tokio::test]
async fn test_failed_first_step_skips_second() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![
        Reply::Json(409, json!({"error": "conflict"})),
        Reply::Echo(attachment_ok),
    ])
    .await;
    let task = UploadResource::new(
        server.database("documents"),
        fast_connection(),
        "doc-9",
        &json!({}),
        AttachmentSource::Bytes(Bytes::from_static(b"abc")),
        3,
        "text/plain",
    )?;

    assert!(drive(task, |_| {}).await.is_err());
    assert_eq!(server.requests().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_data_step_removes_metadata_document() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![
        Reply::Echo(put_ok),
        Reply::Json(500, json!({"error": "disk_full"})),
        Reply::Echo(put_ok),
    ])
    .await;
    let task = UploadResource::new(
        server.database("documents"),
        fast_connection(),
        "doc-11",
        &json!({"title": "Draft"}),
        AttachmentSource::Bytes(Bytes::from_static(b"abc")),
        3,
        "text/plain",
    )?;

    let err = drive(task, |_| {}).await.unwrap_err();
    assert!(matches!(err, Error::ReplyConstruction(_)));
    assert!(err.to_string().contains("disk_full"));

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].method(), "DELETE");
    assert_eq!(requests[2].target(), "/documents/doc-11?rev=1-aaa");
    Ok(())
}

#[tokio::test]
async fn test_download_users_maps_rows() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![Reply::Json(
        200,
        json!({
            "total_rows": 2,
            "offset": 0,
            "rows": [
                {"id": "u1", "key": "ada", "value": {"username": "ada", "firstname": "Ada", "groups": ["admin"], "superuser": true}},
                {"id": "u2", "key": "bob", "value": {"username": "bob", "lastname": "Stone"}}
            ]
        }),
    )])
    .await;

    let users = drive(
        DownloadUsers::new(server.database("users"), fast_connection()),
        |_| {},
    )
    .await?;

    assert_eq!(users.len(), 2);
    assert_eq!(users[0].id, "u1");
    assert_eq!(users[0].first_name, "Ada");
    assert!(users[0].superuser);
    assert_eq!(users[1].last_name, "Stone");
    assert!(server.requests()[0]
        .target()
        .starts_with("/users/_design/users/_view/GetAll"));
    Ok(())
}

#[tokio::test]
async fn test_view_params_are_json_encoded() -> anyhow::Result<()> {
    let server = ScriptedServer::start(vec![Reply::Json(
        200,
        json!({"total_rows": 0, "offset": 0, "rows": []}),
    )])
    .await;
    let view = GetView::new(server.database("documents"), "resources", "by_title")?
        .with_param("key", &json!("Plan"))?;

    let reply = Remoting::new(fast_connection()).call(&view, |_| {}).await?;
    assert!(reply.rows.is_empty());
    assert!(server.requests()[0].target().contains("key=%22Plan%22"));
    Ok(())
}

#[tokio::test]
async fn test_search_keeps_current_versions_only() -> anyhow::Result<()> {
    let versions = Arc::new(InMemoryVersionAuthority::new());
    let first = versions.create_new_version(None).await?;
    let second = versions.create_new_version(Some(first.resource)).await?;

    let server = ScriptedServer::start(vec![Reply::Json(
        200,
        json!({
            "total_rows": 3,
            "rows": [
                {"id": first.id.to_string(), "score": 2.0},
                {"id": second.id.to_string(), "score": 1.5},
                {"id": "_design/search", "score": 0.1}
            ]
        }),
    )])
    .await;

    let query = SearchQuery::new().text("title", "plan");
    let task = SearchResources::new(
        server.database("documents"),
        fast_connection(),
        query,
        versions,
    )?;
    let rows = drive(task, |_| {}).await?;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, second.id.to_string());
    assert!(server.requests()[0]
        .target()
        .starts_with("/documents/_fti/_design/search/by_all?q=title%3Aplan"));
    Ok(())
}
