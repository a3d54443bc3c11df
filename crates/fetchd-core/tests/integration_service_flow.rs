//! Integration tests: real curl transfers against a local scripted server,
//! through the request service, the worker pool and the reconciliation loop.

mod common;

use std::io::Read;
use std::time::Duration;

use common::http_server::{Route, TestServer};
use fetchd_core::blob_store::{blob_file_name, TEMP_SUFFIX};
use fetchd_core::config::FetchdConfig;
use fetchd_core::model::{DownloadView, IncomingRequest};
use fetchd_core::service::DownloadEvent;
use fetchd_core::store::Page;
use fetchd_core::Services;
use sha2::{Digest, Sha256};
use tempfile::{tempdir, TempDir};
use tokio::sync::broadcast::Receiver;

async fn open(dir: &TempDir) -> Services {
    let mut cfg = FetchdConfig::with_data_dir(dir.path());
    cfg.http.connect_timeout_secs = 5;
    cfg.http.probe_timeout_secs = 10;
    Services::open(&cfg).await.expect("open services")
}

async fn next_event(events: &mut Receiver<DownloadEvent>) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(20), events.recv())
        .await
        .expect("no download event in time")
        .expect("event channel closed")
}

fn payload(len: usize) -> Vec<u8> {
    (0u8..=250).cycle().take(len).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_stores_payload_and_checksum() {
    let server = TestServer::start();
    let body = payload(70_000);
    server.route("/pkg/file.iso", Route::ok(body.clone()).header("ETag", "\"v1\""));
    let expected = hex::encode(Sha256::digest(&body));

    let dir = tempdir().unwrap();
    let services = open(&dir).await;
    let mut events = services.downloads.subscribe();

    let mut incoming = IncomingRequest::new(server.url("/pkg/file.iso"));
    incoming.checksum = Some(expected.to_uppercase());
    let request = services.requests.submit(incoming).await.unwrap();
    assert!(request.errors.is_empty(), "{:?}", request.errors);
    let download_id = request.download_id.clone().expect("linked to a download");

    let event = next_event(&mut events).await;
    assert!(matches!(event, DownloadEvent::Finished(_)), "{event:?}");
    let download = services.downloads.find_by_id(&download_id).await.unwrap().unwrap();
    assert!(download.finished);
    assert!(!download.failed);
    assert_eq!(download.status.bytes_read, body.len() as u64);
    assert_eq!(download.checksum, expected);
    assert!(download.errors.is_empty(), "{:?}", download.errors);
    assert_eq!(download.metadata.as_ref().and_then(|m| m.etag.as_deref()), Some("v1"));

    let blob = dir.path().join("blobs").join(&download.id).join(blob_file_name(&download.url));
    assert_eq!(std::fs::read(&blob).unwrap(), body);
    let mut temp = blob.clone().into_os_string();
    temp.push(TEMP_SUFFIX);
    assert!(!std::path::Path::new(&temp).exists());

    assert!(services.downloads.verify(&download).await.unwrap());
    let mut stored = Vec::new();
    services.downloads.reader(&download).unwrap().read_to_end(&mut stored).unwrap();
    assert_eq!(stored.len(), body.len());
    assert!(services.downloads.recompute_checksum(&download).await.unwrap().matches());

    let view = DownloadView::from(&download);
    assert_eq!(view.percent_complete, Some(100.0));

    services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_submissions_fetch_once() {
    let server = TestServer::start();
    server.route("/dup.bin", Route::ok(payload(4096)).header("ETag", "\"d\""));

    let dir = tempdir().unwrap();
    let services = open(&dir).await;
    let mut events = services.downloads.subscribe();

    let first = services.requests.submit(IncomingRequest::new(server.url("/dup.bin"))).await.unwrap();
    let second = services.requests.submit(IncomingRequest::new(server.url("/dup.bin"))).await.unwrap();
    assert_ne!(first.id, second.id);
    assert!(first.download_id.is_some());
    assert_eq!(first.download_id, second.download_id);

    assert!(matches!(next_event(&mut events).await, DownloadEvent::Finished(_)));
    assert_eq!(services.downloads.list_all(Page::all()).await.unwrap().len(), 1);
    assert_eq!(services.requests.list_all(Page::all()).await.unwrap().len(), 2);
    assert_eq!(server.requests("GET", "/dup.bin").len(), 1);
    assert_eq!(server.requests("HEAD", "/dup.bin").len(), 2);

    services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn head_404_records_error_without_download() {
    let server = TestServer::start();

    let dir = tempdir().unwrap();
    let services = open(&dir).await;

    let url = server.url("/missing");
    let request = services.requests.submit(IncomingRequest::new(url.clone())).await.unwrap();
    assert_eq!(request.errors.len(), 1);
    assert!(request.errors[0].message.contains("404"), "{:?}", request.errors);
    assert!(request.download_id.is_none());
    assert_eq!(request.metadata.as_ref().map(|m| m.status_code), Some(404));

    assert!(services.downloads.list_all(Page::all()).await.unwrap().is_empty());
    let stored = services.requests.find_by_id(&request.id).await.unwrap().unwrap();
    assert_eq!(stored, request);
    assert!(server.requests("GET", "/missing").is_empty());

    services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn webhook_is_delivered_once() {
    let server = TestServer::start();
    server.route("/data.tar", Route::ok(payload(10_000)));
    server.route("/hook", Route::ok(Vec::new()));

    let dir = tempdir().unwrap();
    let services = open(&dir).await;
    let mut events = services.downloads.subscribe();

    let mut incoming = IncomingRequest::new(server.url("/data.tar"));
    incoming.callback = Some(server.url("/hook"));
    let request = services.requests.submit(incoming).await.unwrap();
    let download_id = request.download_id.clone().unwrap();

    assert!(matches!(next_event(&mut events).await, DownloadEvent::Finished(_)));
    services.hooks.drain().await;

    // A later duplicate without a callback must not re-deliver.
    services.requests.submit(IncomingRequest::new(server.url("/data.tar"))).await.unwrap();
    services.hooks.drain().await;

    let posts = server.requests("POST", "/hook");
    assert_eq!(posts.len(), 1);
    let view: serde_json::Value = serde_json::from_slice(&posts[0].body).unwrap();
    assert_eq!(view["id"], download_id.as_str());
    assert_eq!(view["finished"], true);

    let hooks = services.requests.hooks_for_request(&request.id).await.unwrap();
    assert_eq!(hooks.len(), 1);
    let result = hooks[0].result.as_ref().expect("delivery recorded");
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.status_code, Some(200));

    services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn webhook_error_status_is_recorded() {
    let server = TestServer::start();
    server.route("/small", Route::ok(b"tiny".to_vec()));
    server.route("/broken-hook", Route::status(500));

    let dir = tempdir().unwrap();
    let services = open(&dir).await;
    let mut events = services.downloads.subscribe();

    let mut incoming = IncomingRequest::new(server.url("/small"));
    incoming.callback = Some(server.url("/broken-hook"));
    let request = services.requests.submit(incoming).await.unwrap();

    assert!(matches!(next_event(&mut events).await, DownloadEvent::Finished(_)));
    services.hooks.drain().await;

    let hooks = services.requests.hooks_for_request(&request.id).await.unwrap();
    let result = hooks[0].result.as_ref().expect("delivery recorded");
    assert!(!result.is_success());
    assert_eq!(result.status_code, Some(500));
    assert_eq!(server.requests("POST", "/broken-hook").len(), 1);

    services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_500_leaves_download_failed() {
    let server = TestServer::start();
    server.route("/flaky", Route::ok(payload(2048)).fail_get(500));

    let dir = tempdir().unwrap();
    let services = open(&dir).await;
    let mut events = services.downloads.subscribe();

    let request = services.requests.submit(IncomingRequest::new(server.url("/flaky"))).await.unwrap();
    let download_id = request.download_id.clone().unwrap();

    let event = next_event(&mut events).await;
    assert!(matches!(event, DownloadEvent::Failed(_)), "{event:?}");
    let download = services.downloads.find_by_id(&download_id).await.unwrap().unwrap();
    assert!(download.failed);
    assert!(!download.finished);
    assert_eq!(download.errors.len(), 1);
    assert!(download.errors[0].message.contains("HTTP 500"), "{:?}", download.errors);
    assert!(!dir.path().join("blobs").join(&download.id).join("flaky").exists());
    assert!(!services.downloads.verify(&download).await.unwrap());

    services.shutdown().await;
}
