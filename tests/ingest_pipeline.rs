//! End-to-end ingest pipeline tests: a real registry and the real Google
//! Drive provider against a mock HTTP server, with a recording store double
//! verifying the write-path ordering and payload contract.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexer_core::config::Settings;
use indexer_core::drive::{DriveClient, TokenSource};
use indexer_core::extract;
use indexer_core::ingest::{IngestService, IngestStore};
use indexer_core::limiter::RateLimiter;
use indexer_core::provider::GoogleDriveProvider;
use indexer_core::shutdown::ShutdownSignal;
use indexer_core::store::StoreError;
use serde_json::{Map, Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingStore {
    exists: bool,
    calls: Mutex<Vec<String>>,
    payloads: Mutex<Vec<Map<String, Value>>>,
}

impl RecordingStore {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestStore for RecordingStore {
    async fn exists_file_mtime(
        &self,
        file_id: &str,
        modified_time: &str,
    ) -> Result<bool, StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("exists:{file_id}:{modified_time}"));
        Ok(self.exists)
    }

    async fn delete_by_file_id(&self, file_id: &str) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(format!("delete:{file_id}"));
        Ok(())
    }

    async fn upsert_document(
        &self,
        doc_id: &str,
        source: &str,
        text: &str,
        payload: &Map<String, Value>,
    ) -> Result<usize, StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("upsert:{doc_id}:{source}:{text}"));
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(1)
    }
}

fn test_settings() -> Arc<Settings> {
    Arc::new(
        Settings::from_lookup(|name| match name {
            "STORAGE_GOOGLE_DRIVE_ALL_ACCESSIBLE" => Some("true".to_string()),
            "TEXT_MAX_FILE_SIZE_MB" => Some("1".to_string()),
            _ => None,
        })
        .unwrap(),
    )
}

fn harness(
    server: &MockServer,
    store: Arc<RecordingStore>,
) -> (IngestService, Arc<RateLimiter>, ShutdownSignal) {
    let settings = test_settings();
    let base = server.uri();
    let client = DriveClient::with_bases(
        reqwest::Client::new(),
        TokenSource::fixed("test-token"),
        format!("{base}/drive/v3"),
        format!("{base}/docs/v1"),
        format!("{base}/sheets/v4"),
        format!("{base}/slides/v1"),
    );
    let provider = Arc::new(GoogleDriveProvider::new(
        Arc::new(client),
        Arc::clone(&settings),
    ));
    let registry = Box::leak(Box::new(extract::build_registry(&settings)));

    let stop = ShutdownSignal::new();
    let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0, stop.clone()));
    let service = IngestService::new(store, provider, registry, settings);
    (service, limiter, stop)
}

async fn mount_listing(server: &MockServer, files: Value) {
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"files": files})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn plain_text_file_flows_to_the_store() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        json!([{
            "id": "F2", "name": "n.py", "mimeType": "text/x-python",
            "fileExtension": "py", "size": "12", "modifiedTime": "2024-03-03T00:00:00Z",
        }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/F2"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"print('ok')\n".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(RecordingStore::default());
    let (service, limiter, stop) = harness(&server, Arc::clone(&store));

    let stats = service.run_once(&limiter, &stop).await.unwrap();

    assert_eq!(stats.ok, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(
        store.calls(),
        vec![
            "exists:F2:2024-03-03T00:00:00Z".to_string(),
            "delete:F2".to_string(),
            "upsert:F2:google_drive:print('ok')".to_string(),
        ]
    );

    let payloads = store.payloads.lock().unwrap();
    assert_eq!(payloads[0]["file_type"], "python");
    assert_eq!(payloads[0]["file_name"], "n.py");
    assert_eq!(payloads[0]["file_id"], "F2");
    assert_eq!(payloads[0]["modified_time"], "2024-03-03T00:00:00Z");
}

#[tokio::test]
async fn unchanged_file_skips_without_download_or_writes() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        json!([{
            "id": "F1", "name": "a.txt", "mimeType": "text/plain",
            "modifiedTime": "2024-01-01T00:00:00Z",
        }]),
    )
    .await;
    // Any media download would 404 and fail the run; expect none.

    let store = Arc::new(RecordingStore {
        exists: true,
        ..RecordingStore::default()
    });
    let (service, limiter, stop) = harness(&server, Arc::clone(&store));

    let stats = service.run_once(&limiter, &stop).await.unwrap();

    assert_eq!(stats.skipped_unchanged, 1);
    assert_eq!(
        store.calls(),
        vec!["exists:F1:2024-01-01T00:00:00Z".to_string()]
    );
}

#[tokio::test]
async fn oversize_file_reports_skipped_empty_without_download() {
    let server = MockServer::start().await;
    // 2 MiB against the 1 MiB cap configured in test_settings().
    mount_listing(
        &server,
        json!([{
            "id": "F3", "name": "big.txt", "mimeType": "text/plain",
            "size": (2 * 1024 * 1024).to_string(),
        }]),
    )
    .await;

    let store = Arc::new(RecordingStore::default());
    let (service, limiter, stop) = harness(&server, Arc::clone(&store));

    let stats = service.run_once(&limiter, &stop).await.unwrap();

    assert_eq!(stats.skipped_empty, 1);
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn failed_download_counts_failed_and_other_files_proceed() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        json!([
            {"id": "BAD", "name": "bad.txt", "mimeType": "text/plain", "size": "3"},
            {"id": "GOOD", "name": "good.txt", "mimeType": "text/plain", "size": "4"},
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/BAD"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/GOOD"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"body".to_vec()))
        .mount(&server)
        .await;

    let store = Arc::new(RecordingStore::default());
    let (service, limiter, stop) = harness(&server, Arc::clone(&store));

    let stats = service.run_once(&limiter, &stop).await.unwrap();

    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.ok, 1);
    assert!(!stop.is_set());
}

#[tokio::test]
async fn hosted_doc_is_fetched_from_the_docs_api() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        json!([{
            "id": "D1", "name": "Notes", "mimeType": "application/vnd.google-apps.document",
        }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/docs/v1/documents/D1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": {"content": [
                {"paragraph": {"elements": [{"textRun": {"content": "Hello docs\n"}}]}},
            ]},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(RecordingStore::default());
    let (service, limiter, stop) = harness(&server, Arc::clone(&store));

    let stats = service.run_once(&limiter, &stop).await.unwrap();

    assert_eq!(stats.ok, 1);
    let payloads = store.payloads.lock().unwrap();
    assert_eq!(payloads[0]["file_type"], "gdoc");
    assert!(store.calls().iter().any(|c| c == "upsert:D1:google_drive:Hello docs"));
}
