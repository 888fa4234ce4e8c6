//! Firestore REST API client.
//!
//! Thin client over the v1 REST surface with:
//! - Service account auth via gcp_auth (or none, against the emulator)
//! - HTTP client tuning (pooling, timeouts)
//! - Observability (tracing spans, metrics)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_call;
use crate::types::{
    CommitRequest, CommitResponse, Document, DocumentTransform, FieldTransform,
    FromFirestoreValue, Precondition, RunQueryRequest, RunQueryResponse, StructuredQuery, Value,
    Write,
};

/// OAuth scope for Firestore access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

// =============================================================================
// Configuration
// =============================================================================

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// `host:port` of a local emulator; disables auth when set
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            emulator_host: None,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
        })
    }

    fn root_path(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }
}

// =============================================================================
// Client
// =============================================================================

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    base_url: String,
    root_path: String,
    auth: Option<Arc<dyn TokenProvider>>,
}

impl FirestoreClient {
    /// Create a new Firestore client.
    pub fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let root_path = config.root_path();
        let (base_url, auth) = match &config.emulator_host {
            Some(host) => (format!("http://{}/v1/{}", host, root_path), None),
            None => (
                format!("https://firestore.googleapis.com/v1/{}", root_path),
                Some(Self::create_auth_provider()?),
            ),
        };

        Ok(Self {
            http: Self::build_http(&config)?,
            base_url,
            root_path,
            auth,
        })
    }

    /// Client against an explicit endpoint without authentication.
    pub fn with_base_url(config: FirestoreConfig, endpoint: &str) -> FirestoreResult<Self> {
        let root_path = config.root_path();
        Ok(Self {
            http: Self::build_http(&config)?,
            base_url: format!("{}/v1/{}", endpoint.trim_end_matches('/'), root_path),
            root_path,
            auth: None,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?)
    }

    fn build_http(config: &FirestoreConfig) -> FirestoreResult<Client> {
        Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("clipper-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    /// Attach a bearer token when running against the real service.
    async fn authorize(&self, request: RequestBuilder) -> FirestoreResult<RequestBuilder> {
        match &self.auth {
            Some(provider) => {
                let token = provider
                    .token(&[FIRESTORE_SCOPE])
                    .await
                    .map_err(|e| FirestoreError::auth_error(e.to_string()))?;
                Ok(request.bearer_auth(token.as_str()))
            }
            None => Ok(request),
        }
    }

    fn document_path(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    /// Full resource name, as used in commit writes.
    pub fn document_name(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.root_path, collection, doc_id)
    }

    // =========================================================================
    // CRUD Operations
    // =========================================================================

    /// Get a document.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_path(collection, doc_id);

        self.execute_request("get_document", collection, Some(doc_id), async {
            let response = self.authorize(self.http.get(&url)).await?.send().await?;

            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Create a document with an explicit ID.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);

        self.execute_request("create_document", collection, Some(doc_id), async {
            let response = self
                .authorize(self.http.post(&url).json(&body))
                .await?
                .send()
                .await?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Write fields to a document (upsert). With a mask only the listed
    /// fields are touched.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
    ) -> FirestoreResult<Document> {
        self.patch_document("update_document", collection, doc_id, fields, update_mask, None)
            .await
    }

    /// Update with optimistic concurrency control.
    pub async fn update_document_with_precondition(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
        update_time: &str,
    ) -> FirestoreResult<Document> {
        self.patch_document(
            "update_document_precondition",
            collection,
            doc_id,
            fields,
            update_mask,
            Some(update_time),
        )
        .await
    }

    async fn patch_document(
        &self,
        operation: &str,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
        update_time: Option<&str>,
    ) -> FirestoreResult<Document> {
        let mut url = self.document_path(collection, doc_id);
        let mut params: Vec<String> = Vec::new();

        if let Some(mask) = update_mask {
            params.extend(mask.iter().map(|f| format!("updateMask.fieldPaths={}", f)));
        }
        if let Some(ts) = update_time {
            params.push(format!("currentDocument.updateTime={}", urlencoding::encode(ts)));
        }
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        let body = Document::new(fields);

        self.execute_request(operation, collection, Some(doc_id), async {
            let response = self
                .authorize(self.http.patch(&url).json(&body))
                .await?
                .send()
                .await?;

            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                    let body_text = response.text().await.unwrap_or_default();
                    Err(FirestoreError::PreconditionFailed(body_text))
                }
                StatusCode::NOT_FOUND => Err(FirestoreError::not_found(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Delete a document. Deleting a missing document succeeds.
    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<()> {
        let url = self.document_path(collection, doc_id);

        self.execute_request("delete_document", collection, Some(doc_id), async {
            let response = self.authorize(self.http.delete(&url)).await?.send().await?;

            match response.status() {
                StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
                StatusCode::NOT_FOUND => {
                    debug!("Document {}/{} already deleted", collection, doc_id);
                    Ok(())
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    // =========================================================================
    // Query and Transform Operations
    // =========================================================================

    /// Run a structured query against top-level collections.
    pub async fn run_query(&self, query: StructuredQuery) -> FirestoreResult<Vec<Document>> {
        let url = format!("{}:runQuery", self.base_url);
        let collection = query
            .from
            .first()
            .map(|c| c.collection_id.clone())
            .unwrap_or_default();
        let request = RunQueryRequest {
            structured_query: query,
        };

        self.execute_request("run_query", &collection, None, async {
            let response = self
                .authorize(self.http.post(&url).json(&request))
                .await?
                .send()
                .await?;

            match response.status() {
                StatusCode::OK => {
                    // runQuery returns a JSON array of RunQueryResponse objects
                    let responses: Vec<RunQueryResponse> = response.json().await?;
                    Ok(responses.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Atomically add `delta` to an integer field on an existing document.
    ///
    /// Returns the field value after the increment.
    pub async fn increment_field(
        &self,
        collection: &str,
        doc_id: &str,
        field: &str,
        delta: i64,
    ) -> FirestoreResult<i64> {
        let url = format!("{}:commit", self.base_url);
        let request = CommitRequest {
            writes: vec![Write {
                transform: DocumentTransform {
                    document: self.document_name(collection, doc_id),
                    field_transforms: vec![FieldTransform {
                        field_path: field.to_string(),
                        increment: Value::IntegerValue(delta.to_string()),
                    }],
                },
                current_document: Some(Precondition {
                    exists: Some(true),
                    update_time: None,
                }),
            }],
        };

        self.execute_request("increment_field", collection, Some(doc_id), async {
            let response = self
                .authorize(self.http.post(&url).json(&request))
                .await?
                .send()
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let commit: CommitResponse = response.json().await?;
                    commit
                        .write_results
                        .as_ref()
                        .and_then(|r| r.first())
                        .and_then(|r| r.transform_results.as_ref())
                        .and_then(|t| t.first())
                        .and_then(i64::from_firestore_value)
                        .ok_or_else(|| {
                            FirestoreError::request_failed("commit returned no transform result")
                        })
                }
                StatusCode::NOT_FOUND => Err(FirestoreError::not_found(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = match doc_id {
            Some(id) => info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %id),
            None => info_span!("firestore_request", operation = %operation, collection = %collection),
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_call(operation, collection, status, start.elapsed());

        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: reqwest::Response,
    ) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

// =============================================================================
// Tests
// =============================================================================
