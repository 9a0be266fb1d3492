use std::time::Duration;

use vaultindex_core::{IndexApiError, IndexClient, RemoteDocument, UploadRequest};

use super::backoff::Backoff;

const MAX_POLLS: u32 = 20;

/// The replace-document primitive. The remote service has no in-place
/// update, so a replace is delete-then-create: the old copy is removed
/// (already-gone counts as removed), then the new document is uploaded
/// and its long-running operation polled to completion.
///
/// Not transactional: a crash between the two steps leaves zero remote
/// copies until the next reconcile pass re-enqueues the document.
pub struct DocumentReplacer {
    client: IndexClient,
    store_id: String,
    poll: Backoff,
    max_polls: u32,
}

impl DocumentReplacer {
    pub fn new(client: IndexClient, store_id: String) -> Self {
        Self {
            client,
            store_id,
            poll: Backoff::new(Duration::from_millis(250), Duration::from_secs(5), false),
            max_polls: MAX_POLLS,
        }
    }

    pub fn with_poll(mut self, poll: Backoff, max_polls: u32) -> Self {
        self.poll = poll;
        self.max_polls = max_polls;
        self
    }

    pub async fn replace(
        &self,
        existing_remote_id: Option<&str>,
        request: &UploadRequest,
    ) -> Result<RemoteDocument, IndexApiError> {
        if let Some(id) = existing_remote_id {
            match self.client.delete_document(id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }

        let mut op = self.client.upload_document(&self.store_id, request).await?;
        let mut polls = 0u32;
        while !op.done {
            if polls >= self.max_polls {
                return Err(IndexApiError::UploadFailed(
                    "timed out waiting for upload operation".to_string(),
                ));
            }
            tokio::time::sleep(self.poll.delay(polls)).await;
            polls += 1;
            op = self.client.get_operation(&op.name).await?;
        }
        if let Some(error) = op.error {
            return Err(IndexApiError::UploadFailed(error.message));
        }
        op.document.ok_or(IndexApiError::MissingDocument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vaultindex_core::ChunkingParams;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_replacer(server: &MockServer) -> DocumentReplacer {
        let client = IndexClient::with_base_url(&server.uri(), "test-key").unwrap();
        DocumentReplacer::new(client, "store-1".into()).with_poll(
            Backoff::new(Duration::from_millis(1), Duration::from_millis(2), false),
            5,
        )
    }

    fn request() -> UploadRequest {
        UploadRequest {
            display_name: "Idea.md".into(),
            content: "Hello".into(),
            metadata: Vec::new(),
            chunking: ChunkingParams::default(),
        }
    }

    #[tokio::test]
    async fn replace_deletes_old_copy_then_creates() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/documents/doc-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/stores/store-1/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "operations/op-1",
                "done": true,
                "document": { "id": "doc-2" }
            })))
            .mount(&server)
            .await;

        let replacer = fast_replacer(&server);
        let document = replacer.replace(Some("doc-1"), &request()).await.unwrap();
        assert_eq!(document.id, "doc-2");
    }

    #[tokio::test]
    async fn already_gone_old_copy_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/documents/doc-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/stores/store-1/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "operations/op-1",
                "done": true,
                "document": { "id": "doc-2" }
            })))
            .mount(&server)
            .await;

        let replacer = fast_replacer(&server);
        let document = replacer.replace(Some("doc-1"), &request()).await.unwrap();
        assert_eq!(document.id, "doc-2");
    }

    #[tokio::test]
    async fn polls_operation_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/stores/store-1/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "operations/op-1",
                "done": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/operations/op-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "operations/op-1",
                "done": true,
                "document": { "id": "doc-3" }
            })))
            .mount(&server)
            .await;

        let replacer = fast_replacer(&server);
        let document = replacer.replace(None, &request()).await.unwrap();
        assert_eq!(document.id, "doc-3");
    }

    #[tokio::test]
    async fn failed_operation_surfaces_its_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/stores/store-1/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "operations/op-1",
                "done": true,
                "error": { "message": "chunking rejected" }
            })))
            .mount(&server)
            .await;

        let replacer = fast_replacer(&server);
        let err = replacer.replace(None, &request()).await.unwrap_err();
        assert!(err.to_string().contains("chunking rejected"));
    }

    #[tokio::test]
    async fn delete_failure_aborts_before_create() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/documents/doc-1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/stores/store-1/documents"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let replacer = fast_replacer(&server);
        assert!(replacer.replace(Some("doc-1"), &request()).await.is_err());
    }
}
