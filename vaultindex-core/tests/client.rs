use serde_json::json;
use vaultindex_core::{ApiErrorClass, ChunkingParams, IndexClient, MetadataEntry, UploadRequest};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn create_or_find_store_returns_existing_store() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/stores"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stores": [
                { "id": "store-1", "name": "my-vault" },
                { "id": "store-2", "name": "other" }
            ]
        })))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    let id = client.create_or_find_store("my-vault").await.unwrap();

    assert_eq!(id, "store-1");
}

#[tokio::test]
async fn create_or_find_store_creates_when_absent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/stores"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "stores": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/stores"))
        .and(body_partial_json(json!({ "name": "my-vault" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "store-9",
            "name": "my-vault"
        })))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    let id = client.create_or_find_store("my-vault").await.unwrap();

    assert_eq!(id, "store-9");
}

#[tokio::test]
async fn upload_document_starts_operation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/stores/store-1/documents"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "display_name": "Idea.md",
            "metadata": [{ "key": "vault-path", "value": "Notes/Idea.md" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "operations/op-1",
            "done": false
        })))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    let op = client
        .upload_document(
            "store-1",
            &UploadRequest {
                display_name: "Idea.md".into(),
                content: "Hello".into(),
                metadata: vec![MetadataEntry {
                    key: "vault-path".into(),
                    value: "Notes/Idea.md".into(),
                }],
                chunking: ChunkingParams::default(),
            },
        )
        .await
        .unwrap();

    assert_eq!(op.name, "operations/op-1");
    assert!(!op.done);
}

#[tokio::test]
async fn get_operation_returns_document_when_done() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "operations/op-1",
            "done": true,
            "document": {
                "id": "doc-1",
                "display_name": "Idea.md",
                "metadata": [{ "key": "content-fingerprint", "value": "f1" }]
            }
        })))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    let op = client.get_operation("operations/op-1").await.unwrap();

    assert!(op.done);
    let document = op.document.unwrap();
    assert_eq!(document.id, "doc-1");
    assert_eq!(document.content_fingerprint(), Some("f1"));
}

#[tokio::test]
async fn delete_document_succeeds_on_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/documents/doc-1"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    client.delete_document("doc-1").await.unwrap();
}

#[tokio::test]
async fn delete_document_classifies_missing_as_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/documents/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    let err = client.delete_document("gone").await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.classification(), ApiErrorClass::NotFound);
}

#[tokio::test]
async fn list_all_documents_follows_page_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/stores/store-1/documents"))
        .and(query_param("page_token", "next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{ "id": "doc-2" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/stores/store-1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{ "id": "doc-1" }],
            "next_page_token": "next"
        })))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    let mut page_counts = Vec::new();
    let documents = client
        .list_all_documents("store-1", |count| page_counts.push(count))
        .await
        .unwrap();

    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].id, "doc-1");
    assert_eq!(documents[1].id, "doc-2");
    assert_eq!(page_counts, vec![1, 2]);
}

#[tokio::test]
async fn get_store_stats_parses_counts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/stores/store-1/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "document_count": 42,
            "total_size_bytes": 8192
        })))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    let stats = client.get_store_stats("store-1").await.unwrap();

    assert_eq!(stats.document_count, 42);
    assert_eq!(stats.total_size_bytes, 8192);
}

#[tokio::test]
async fn api_error_carries_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/stores/store-1/stats"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
    let err = client.get_store_stats("store-1").await.unwrap_err();

    assert!(err.is_auth());
    assert!(err.to_string().contains("bad key"));
}
