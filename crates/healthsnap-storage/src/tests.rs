use crate::error::StorageError;
use crate::gcs::GcsStore;
use crate::memory::MemoryStore;
use crate::s3::S3Store;
use crate::ObjectStore;
use healthsnap_common::credentials::{AwsCredentials, StaticToken};
use healthsnap_common::types::PublishTarget;
use mockito::Matcher;
use std::sync::Arc;
use std::time::Duration;

const CSV: &str = "instanceId,availabilityZone,state,cpuUtilization\ni-1,us-east-1a,running,12.5";

fn target() -> PublishTarget {
    PublishTarget {
        bucket: "healthsnap-reports".to_string(),
        key: "InstanceHealth.csv".to_string(),
    }
}

fn http_client() -> reqwest::Client {
    crate::build_http_client(Duration::from_secs(5)).unwrap()
}

fn s3_store(endpoint: String) -> S3Store {
    S3Store::new(
        "us-east-1",
        Some(endpoint),
        AwsCredentials::new("AKIDEXAMPLE", "secret"),
        http_client(),
    )
    .unwrap()
}

fn gcs_store(endpoint: String) -> GcsStore {
    GcsStore::new(
        Some(endpoint),
        Arc::new(StaticToken::new("gcs-token")),
        http_client(),
    )
}

#[tokio::test]
async fn second_publish_replaces_first() {
    let store = MemoryStore::with_buckets(["healthsnap-reports"]);

    store.publish(&target(), "header\nold").await.unwrap();
    store.publish(&target(), "header\nnew").await.unwrap();

    assert_eq!(store.get(&target()).await.as_deref(), Some("header\nnew"));
    assert_eq!(store.object_count().await, 1);
    assert_eq!(store.writes(), 2);
}

#[tokio::test]
async fn memory_store_rejects_missing_bucket() {
    let store = MemoryStore::with_buckets(["other"]);

    let err = store.publish(&target(), CSV).await.unwrap_err();

    assert!(matches!(err, StorageError::TargetMissing { ref bucket, .. } if bucket == "healthsnap-reports"));
    assert_eq!(store.object_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_observe_whole_documents_only() {
    let store = Arc::new(MemoryStore::with_buckets(["healthsnap-reports"]));
    let documents: Vec<String> = (0..50)
        .map(|i| format!("header\n{}", format!("row-{i},").repeat(200)))
        .collect();
    store.publish(&target(), &documents[0]).await.unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let documents = documents.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..200 {
                let seen = store.get(&target()).await.unwrap();
                assert!(documents.contains(&seen));
                tokio::task::yield_now().await;
            }
        }));
    }

    for document in &documents[1..] {
        store.publish(&target(), document).await.unwrap();
        tokio::task::yield_now().await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(store.get(&target()).await.as_ref(), documents.last());
}

#[tokio::test]
async fn s3_publish_checks_bucket_then_puts_object() {
    let mut server = mockito::Server::new_async().await;
    let head = server
        .mock("HEAD", "/healthsnap-reports")
        .match_header("authorization", Matcher::Regex("^AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/".to_string()))
        .with_status(200)
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/healthsnap-reports/InstanceHealth.csv")
        .match_header("content-type", "text/csv")
        .match_header("x-amz-content-sha256", healthsnap_common::sigv4::sha256_hex(CSV.as_bytes()).as_str())
        .match_body(Matcher::Exact(CSV.to_string()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    s3_store(server.url()).publish(&target(), CSV).await.unwrap();

    head.assert_async().await;
    put.assert_async().await;
}

#[tokio::test]
async fn s3_missing_bucket_writes_nothing() {
    let mut server = mockito::Server::new_async().await;
    let _head = server
        .mock("HEAD", "/healthsnap-reports")
        .with_status(404)
        .create_async()
        .await;
    let put = server
        .mock("PUT", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let err = s3_store(server.url()).publish(&target(), CSV).await.unwrap_err();

    assert!(matches!(err, StorageError::TargetMissing { store: "s3", .. }));
    put.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn s3_rejected_write_is_a_publish_error() {
    let mut server = mockito::Server::new_async().await;
    let _head = server
        .mock("HEAD", "/healthsnap-reports")
        .with_status(200)
        .create_async()
        .await;
    let _put = server
        .mock("PUT", "/healthsnap-reports/InstanceHealth.csv")
        .with_status(403)
        .with_body("<Error><Code>AccessDenied</Code></Error>")
        .create_async()
        .await;

    let err = s3_store(server.url()).publish(&target(), CSV).await.unwrap_err();

    match err {
        StorageError::PublishError { status, body, .. } => {
            assert_eq!(status, 403);
            assert!(body.contains("AccessDenied"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn gcs_publish_uses_media_upload() {
    let mut server = mockito::Server::new_async().await;
    let bucket = server
        .mock("GET", "/storage/v1/b/healthsnap-reports")
        .match_header("authorization", "Bearer gcs-token")
        .with_status(200)
        .with_body(r#"{"name": "healthsnap-reports"}"#)
        .create_async()
        .await;
    let upload = server
        .mock("POST", "/upload/storage/v1/b/healthsnap-reports/o")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("uploadType".to_string(), "media".to_string()),
            Matcher::UrlEncoded("name".to_string(), "InstanceHealth.csv".to_string()),
        ]))
        .match_header("authorization", "Bearer gcs-token")
        .match_header("content-type", "text/csv")
        .match_body(Matcher::Exact(CSV.to_string()))
        .with_status(200)
        .with_body(r#"{"name": "InstanceHealth.csv"}"#)
        .expect(1)
        .create_async()
        .await;

    gcs_store(server.url()).publish(&target(), CSV).await.unwrap();

    bucket.assert_async().await;
    upload.assert_async().await;
}

#[tokio::test]
async fn gcs_missing_bucket_writes_nothing() {
    let mut server = mockito::Server::new_async().await;
    let _bucket = server
        .mock("GET", "/storage/v1/b/healthsnap-reports")
        .with_status(404)
        .with_body(r#"{"error": {"code": 404, "message": "The specified bucket does not exist."}}"#)
        .create_async()
        .await;
    let upload = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let err = gcs_store(server.url()).publish(&target(), CSV).await.unwrap_err();

    assert!(matches!(err, StorageError::TargetMissing { store: "gcs", .. }));
    upload.assert_async().await;
}

#[tokio::test]
async fn gcs_token_failure_surfaces_before_any_request() {
    let server = mockito::Server::new_async().await;
    let store = GcsStore::new(Some(server.url()), Arc::new(StaticToken::new("  ")), http_client());

    let err = store.publish(&target(), CSV).await.unwrap_err();

    assert!(matches!(err, StorageError::CredentialError(_)));
}
