//! Azure blob backend tests against a fake Blob service.
//!
//! The backend uses a blocking HTTP client, so the fake service runs on its
//! own runtime thread and the tests stay synchronous.

#![cfg(feature = "azure")]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use reqwest::Url;
use service_catalog::catalog::Record;
use service_catalog::storage::blob::{BlobCredential, BlobStorageBackend};
use service_catalog::storage::{StorageBackend, StorageError};

const SAS: &str = "sv=2021&sig=test";

#[derive(Default)]
struct FakeBlobService {
    containers: Mutex<HashSet<String>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl FakeBlobService {
    fn log(&self, entry: String) {
        self.requests.lock().unwrap().push(entry);
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn container_creates(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.starts_with("PUT container"))
            .count()
    }
}

async fn container(
    State(service): State<Arc<FakeBlobService>>,
    Path((_account, container)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
) -> StatusCode {
    service.log(format!("{method} container {container} {}", query.unwrap_or_default()));

    if service.fail.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if method != Method::PUT {
        return StatusCode::METHOD_NOT_ALLOWED;
    }
    if service.containers.lock().unwrap().insert(container) {
        StatusCode::CREATED
    } else {
        StatusCode::CONFLICT
    }
}

async fn blob(
    State(service): State<Arc<FakeBlobService>>,
    Path((_account, container, blob)): Path<(String, String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let blob_type = headers
        .get("x-ms-blob-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    service.log(format!(
        "{method} blob {container}/{blob} {blob_type} {}",
        query.unwrap_or_default()
    ));

    if service.fail.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let key = format!("{container}/{blob}");
    match method {
        Method::GET => match service.blobs.lock().unwrap().get(&key) {
            Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Method::PUT => {
            if !service.containers.lock().unwrap().contains(&container) {
                return StatusCode::NOT_FOUND.into_response();
            }
            service.blobs.lock().unwrap().insert(key, body.to_vec());
            StatusCode::CREATED.into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Serve the fake on an ephemeral port from a background runtime thread.
fn start_fake(service: Arc<FakeBlobService>) -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new()
        .route("/:account/:container", any(container))
        .route("/:account/:container/:blob", any(blob))
        .with_state(service);

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    Url::parse(&format!("http://{addr}/acct")).unwrap()
}

fn backend_for(service: &Arc<FakeBlobService>) -> BlobStorageBackend {
    let endpoint = start_fake(Arc::clone(service));
    BlobStorageBackend::new(
        endpoint,
        "data",
        "services.json",
        BlobCredential::Sas(SAS.to_string()),
    )
    .unwrap()
}

#[test]
fn missing_blob_reads_as_empty() {
    let service = Arc::new(FakeBlobService::default());
    let backend = backend_for(&service);

    assert!(backend.read().unwrap().is_empty());
    assert_eq!(service.container_creates(), 0);
    assert!(service.blobs.lock().unwrap().is_empty());
}

#[test]
fn first_write_creates_container_once() {
    let service = Arc::new(FakeBlobService::default());
    let backend = backend_for(&service);

    backend
        .write(&[Record::new("VM", "Compute", "d1"), Record::new("DB", "Data", "d2")])
        .unwrap();
    backend.write(&[Record::new("VM", "Compute", "d1")]).unwrap();

    let requests = service.requests();
    assert_eq!(service.container_creates(), 1);
    assert_eq!(
        requests[0],
        format!("PUT container data restype=container&{SAS}")
    );
    assert_eq!(
        requests[1],
        format!("PUT blob data/services.json BlockBlob {SAS}")
    );
    assert_eq!(requests.len(), 3);
}

#[test]
fn existing_container_conflict_is_accepted() {
    let service = Arc::new(FakeBlobService::default());
    service.containers.lock().unwrap().insert("data".to_string());
    let backend = backend_for(&service);

    backend.write(&[Record::new("VM", "Compute", "d1")]).unwrap();

    assert_eq!(service.container_creates(), 1);
    assert_eq!(backend.read().unwrap().len(), 1);
}

#[test]
fn write_then_read_preserves_order() {
    let service = Arc::new(FakeBlobService::default());
    let backend = backend_for(&service);
    let records = vec![
        Record::new("Zeta", "B", "first in order"),
        Record::new("Alpha", "A", "second"),
        Record::new("Mid", "C", "ünïcödé"),
    ];

    backend.write(&records).unwrap();

    assert_eq!(backend.read().unwrap(), records);

    let stored = service.blobs.lock().unwrap()["data/services.json"].clone();
    let document: serde_json::Value = serde_json::from_slice(&stored).unwrap();
    assert_eq!(document["services"][0]["service"], "Zeta");
}

#[test]
fn bare_array_blob_is_readable() {
    let service = Arc::new(FakeBlobService::default());
    service.blobs.lock().unwrap().insert(
        "data/services.json".to_string(),
        br#"[{"service": "VM", "category": "Compute", "description": "d"}]"#.to_vec(),
    );
    let backend = backend_for(&service);

    assert_eq!(
        backend.read().unwrap(),
        vec![Record::new("VM", "Compute", "d")]
    );
}

#[test]
fn server_errors_map_to_storage_errors() {
    let service = Arc::new(FakeBlobService::default());
    service.fail.store(true, Ordering::SeqCst);
    let backend = backend_for(&service);

    let err = backend.read().unwrap_err();
    assert!(matches!(err, StorageError::Read(_)), "got {err:?}");
    assert!(err.to_string().contains("500"));

    let err = backend.write(&[Record::new("VM", "Compute", "d")]).unwrap_err();
    assert!(matches!(err, StorageError::Write(_)), "got {err:?}");

    // The container was never confirmed, so the next write retries it.
    service.fail.store(false, Ordering::SeqCst);
    backend.write(&[Record::new("VM", "Compute", "d")]).unwrap();
    assert_eq!(service.container_creates(), 2);
}
