use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.vaultindex.dev";

/// Well-known owner metadata keys attached to every uploaded document.
pub mod meta_keys {
    pub const VAULT_PATH: &str = "vault-path";
    pub const PATH_FINGERPRINT: &str = "path-fingerprint";
    pub const CONTENT_FINGERPRINT: &str = "content-fingerprint";
    pub const VAULT_ID: &str = "vault-id";
}

#[derive(Debug, Error)]
pub enum IndexApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("upload operation failed: {0}")]
    UploadFailed(String),
    #[error("upload operation finished without a document")]
    MissingDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    NotFound,
    Permanent,
}

impl IndexApiError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            IndexApiError::Api { status, .. } => classify_api_status(*status),
            // Transport-level failures (connect, timeout, DNS) are
            // indistinguishable from being offline.
            IndexApiError::Request(_) => ApiErrorClass::Transient,
            _ => ApiErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            ApiErrorClass::RateLimit | ApiErrorClass::Transient
        )
    }

    pub fn is_auth(&self) -> bool {
        self.classification() == ApiErrorClass::Auth
    }

    pub fn is_not_found(&self) -> bool {
        self.classification() == ApiErrorClass::NotFound
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Clone)]
pub struct IndexClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl IndexClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, IndexApiError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, IndexApiError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
        })
    }

    /// Returns the id of the store named `name`, creating it when absent.
    pub async fn create_or_find_store(&self, name: &str) -> Result<String, IndexApiError> {
        let url = self.endpoint("/v1/stores")?;
        let response = self
            .http
            .get(url.clone())
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let listing: StoreListResponse = Self::handle_response(response).await?;
        if let Some(store) = listing.stores.into_iter().find(|store| store.name == name) {
            return Ok(store.id);
        }

        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&CreateStoreRequest { name })
            .send()
            .await?;
        let store: Store = Self::handle_response(response).await?;
        Ok(store.id)
    }

    /// Starts a long-running upload. Poll the returned operation with
    /// [`get_operation`](Self::get_operation) until `done`.
    pub async fn upload_document(
        &self,
        store_id: &str,
        request: &UploadRequest,
    ) -> Result<UploadOperation, IndexApiError> {
        let url = self.endpoint(&format!("/v1/stores/{store_id}/documents"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(request)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_operation(&self, name: &str) -> Result<UploadOperation, IndexApiError> {
        let url = self.endpoint(&format!("/v1/{name}"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Deletes a remote document. The service treats delete as idempotent,
    /// so callers typically map NotFound to success.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), IndexApiError> {
        let url = self.endpoint(&format!("/v1/documents/{document_id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(IndexApiError::Api { status, body })
    }

    pub async fn list_documents(
        &self,
        store_id: &str,
        page_token: Option<&str>,
    ) -> Result<DocumentPage, IndexApiError> {
        let mut url = self.endpoint(&format!("/v1/stores/{store_id}/documents"))?;
        if let Some(token) = page_token.filter(|token| !token.is_empty()) {
            url.query_pairs_mut().append_pair("page_token", token);
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Fetches every page of the store listing, invoking `on_page` with the
    /// running document count after each round trip.
    pub async fn list_all_documents<F>(
        &self,
        store_id: &str,
        mut on_page: F,
    ) -> Result<Vec<RemoteDocument>, IndexApiError>
    where
        F: FnMut(usize),
    {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_documents(store_id, page_token.as_deref()).await?;
            documents.extend(page.documents);
            on_page(documents.len());
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(documents)
    }

    pub async fn get_store_stats(&self, store_id: &str) -> Result<StoreStats, IndexApiError> {
        let url = self.endpoint(&format!("/v1/stores/{store_id}/stats"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn endpoint(&self, path: &str) -> Result<Url, IndexApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, IndexApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(IndexApiError::Api { status, body })
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateStoreRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Store {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct StoreListResponse {
    #[serde(default)]
    stores: Vec<Store>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteDocument {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

impl RemoteDocument {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    pub fn owner_path(&self) -> Option<&str> {
        self.meta(meta_keys::VAULT_PATH)
    }

    pub fn owner_path_fingerprint(&self) -> Option<&str> {
        self.meta(meta_keys::PATH_FINGERPRINT)
    }

    pub fn content_fingerprint(&self) -> Option<&str> {
        self.meta(meta_keys::CONTENT_FINGERPRINT)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChunkingParams {
    pub max_tokens: u32,
    pub overlap_tokens: u32,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub display_name: String,
    pub content: String,
    pub metadata: Vec<MetadataEntry>,
    pub chunking: ChunkingParams,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UploadOperation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub document: Option<RemoteDocument>,
    #[serde(default)]
    pub error: Option<OperationError>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OperationError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DocumentPage {
    #[serde(default)]
    pub documents: Vec<RemoteDocument>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StoreStats {
    pub document_count: u64,
    #[serde(default)]
    pub total_size_bytes: u64,
}
