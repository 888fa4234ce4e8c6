//! Firestore-backed repositories.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use clipper_models::{Clip, FileId, FileStatus, UploadedFile};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_debit_retry;
use crate::repository::{ClipRepository, CreditRepository, DebitOutcome, FileRepository};
use crate::types::{Document, StructuredQuery, ToFirestoreValue, Value};

const FILES: &str = "uploaded_files";
const CLIPS: &str = "clips";
const USERS: &str = "users";

/// Field holding the spendable balance on user documents.
const CREDITS_FIELD: &str = "credits";

/// Maximum attempts for an optimistic-locked write.
const MAX_CAS_ATTEMPTS: u32 = 5;

/// Base delay between debit attempts (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 50;

// =============================================================================
// Uploaded Files
// =============================================================================

/// Repository for `uploaded_files` documents.
#[derive(Clone)]
pub struct FirestoreFileRepository {
    client: FirestoreClient,
}

impl FirestoreFileRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FileRepository for FirestoreFileRepository {
    async fn create(&self, file: &UploadedFile) -> FirestoreResult<()> {
        self.client
            .create_document(FILES, file.id.as_str(), file_to_fields(file))
            .await?;
        info!(file_id = %file.id, user_id = %file.user_id, "Created file record");
        Ok(())
    }

    async fn get(&self, id: &FileId) -> FirestoreResult<Option<UploadedFile>> {
        match self.client.get_document(FILES, id.as_str()).await? {
            Some(doc) => Ok(Some(document_to_file(&doc, id)?)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        id: &FileId,
        status: FileStatus,
        clip_count: Option<u32>,
    ) -> FirestoreResult<bool> {
        let mut mask = vec!["status".to_string(), "updated_at".to_string()];
        if clip_count.is_some() {
            mask.push("clip_count".to_string());
        }

        // Admission and the worker race on the same record; the stored status
        // is compared and written under its updateTime so it never moves back.
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let doc = self
                .client
                .get_document(FILES, id.as_str())
                .await?
                .ok_or_else(|| FirestoreError::not_found(format!("file {}", id)))?;
            let current = document_to_file(&doc, id)?.status;
            if !current.can_advance_to(status) {
                debug!(file_id = %id, from = %current, to = %status, "Skipped backward status write");
                return Ok(false);
            }
            let update_time = doc.update_time.clone().ok_or_else(|| {
                FirestoreError::invalid_document(format!("file {} has no updateTime", id))
            })?;

            let mut fields = HashMap::new();
            fields.insert("status".to_string(), status.as_str().to_firestore_value());
            fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());
            if let Some(count) = clip_count {
                fields.insert("clip_count".to_string(), count.to_firestore_value());
            }

            match self
                .client
                .update_document_with_precondition(
                    FILES,
                    id.as_str(),
                    fields,
                    Some(mask.clone()),
                    &update_time,
                )
                .await
            {
                Ok(_) => {
                    debug!(file_id = %id, from = %current, to = %status, "Updated file status");
                    return Ok(true);
                }
                Err(e) if e.is_precondition_failed() => {
                    debug!(file_id = %id, attempt = attempt + 1, "File status changed underneath, reloading");
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * (attempt as u64 + 1));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(FirestoreError::Contention(format!("{}/{}", FILES, id)))
    }

    async fn delete(&self, id: &FileId) -> FirestoreResult<()> {
        self.client.delete_document(FILES, id.as_str()).await
    }

    async fn list_by_user(&self, user_id: &str) -> FirestoreResult<Vec<UploadedFile>> {
        let docs = self
            .client
            .run_query(StructuredQuery::field_equals(
                FILES,
                "user_id",
                user_id.to_firestore_value(),
            ))
            .await?;

        let mut files = Vec::with_capacity(docs.len());
        for doc in &docs {
            let id = FileId::from(doc.id().unwrap_or_default());
            match document_to_file(doc, &id) {
                Ok(file) => files.push(file),
                Err(e) => warn!(file_id = %id, "Skipping malformed file document: {}", e),
            }
        }
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }
}

fn file_to_fields(file: &UploadedFile) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), file.user_id.to_firestore_value());
    fields.insert("file_name".to_string(), file.file_name.to_firestore_value());
    fields.insert("file_path".to_string(), file.file_path.to_firestore_value());
    fields.insert("file_size".to_string(), file.file_size.to_firestore_value());
    fields.insert("mime_type".to_string(), file.mime_type.to_firestore_value());
    fields.insert("status".to_string(), file.status.as_str().to_firestore_value());
    fields.insert("clip_count".to_string(), file.clip_count.to_firestore_value());
    fields.insert("created_at".to_string(), file.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), file.updated_at.to_firestore_value());
    fields
}

fn document_to_file(doc: &Document, id: &FileId) -> FirestoreResult<UploadedFile> {
    let status_str: String = doc.get("status").unwrap_or_default();
    let status = FileStatus::parse(&status_str).ok_or_else(|| {
        FirestoreError::invalid_document(format!("file {} has unknown status {:?}", id, status_str))
    })?;

    Ok(UploadedFile {
        id: id.clone(),
        user_id: doc
            .get("user_id")
            .ok_or_else(|| FirestoreError::invalid_document(format!("file {} has no user_id", id)))?,
        file_name: doc.get("file_name").unwrap_or_default(),
        file_path: doc.get("file_path").ok_or_else(|| {
            FirestoreError::invalid_document(format!("file {} has no file_path", id))
        })?,
        file_size: doc.get("file_size").unwrap_or(0),
        mime_type: doc.get("mime_type").unwrap_or_default(),
        status,
        clip_count: doc.get("clip_count").unwrap_or(0),
        created_at: doc.get("created_at").unwrap_or_else(Utc::now),
        updated_at: doc.get("updated_at").unwrap_or_else(Utc::now),
    })
}

// =============================================================================
// Clips
// =============================================================================

/// Repository for `clips` documents.
#[derive(Clone)]
pub struct FirestoreClipRepository {
    client: FirestoreClient,
}

impl FirestoreClipRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    async fn query(&self, field: &str, value: &str) -> FirestoreResult<Vec<Clip>> {
        let docs = self
            .client
            .run_query(StructuredQuery::field_equals(
                CLIPS,
                field,
                value.to_firestore_value(),
            ))
            .await?;

        let mut clips: Vec<Clip> = docs
            .iter()
            .filter_map(|doc| match document_to_clip(doc) {
                Ok(clip) => Some(clip),
                Err(e) => {
                    warn!("Skipping malformed clip document: {}", e);
                    None
                }
            })
            .filter(|clip| !clip.is_deleted())
            .collect();
        clips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(clips)
    }
}

#[async_trait]
impl ClipRepository for FirestoreClipRepository {
    async fn save(&self, clip: &Clip) -> FirestoreResult<()> {
        // PATCH without a mask replaces the document, creating it if absent
        self.client
            .update_document(CLIPS, &clip.id, clip_to_fields(clip), None)
            .await?;
        debug!(clip_id = %clip.id, path = %clip.file_path, "Saved clip");
        Ok(())
    }

    async fn get(&self, id: &str) -> FirestoreResult<Option<Clip>> {
        match self.client.get_document(CLIPS, id).await? {
            Some(doc) => Ok(Some(document_to_clip(&doc)?)),
            None => Ok(None),
        }
    }

    async fn list_by_user(&self, user_id: &str) -> FirestoreResult<Vec<Clip>> {
        self.query("user_id", user_id).await
    }

    async fn list_by_file(&self, file_id: &FileId) -> FirestoreResult<Vec<Clip>> {
        self.query("uploaded_file_id", file_id.as_str()).await
    }
}

fn clip_to_fields(clip: &Clip) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), clip.user_id.to_firestore_value());
    fields.insert(
        "uploaded_file_id".to_string(),
        clip.uploaded_file_id.as_str().to_firestore_value(),
    );
    fields.insert("source_name".to_string(), clip.source_name.to_firestore_value());
    fields.insert("file_path".to_string(), clip.file_path.to_firestore_value());
    fields.insert("created_at".to_string(), clip.created_at.to_firestore_value());
    fields.insert("deleted_at".to_string(), clip.deleted_at.to_firestore_value());
    fields
}

fn document_to_clip(doc: &Document) -> FirestoreResult<Clip> {
    let id = doc
        .id()
        .ok_or_else(|| FirestoreError::invalid_document("clip document has no name"))?
        .to_string();

    Ok(Clip {
        user_id: doc
            .get("user_id")
            .ok_or_else(|| FirestoreError::invalid_document(format!("clip {} has no user_id", id)))?,
        uploaded_file_id: FileId::from(doc.get::<String>("uploaded_file_id").unwrap_or_default()),
        source_name: doc.get("source_name").unwrap_or_default(),
        file_path: doc.get("file_path").ok_or_else(|| {
            FirestoreError::invalid_document(format!("clip {} has no file_path", id))
        })?,
        created_at: doc.get("created_at").unwrap_or_else(Utc::now),
        deleted_at: doc.get("deleted_at"),
        id,
    })
}

// =============================================================================
// Credits
// =============================================================================

/// Credit balance on `users/{id}`.
///
/// Debits use optimistic locking on the document's `updateTime`; credits use
/// a server-side increment so they never overwrite a concurrent change.
#[derive(Clone)]
pub struct FirestoreCreditRepository {
    client: FirestoreClient,
}

impl FirestoreCreditRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    async fn load(&self, user_id: &str) -> FirestoreResult<(u32, Option<String>)> {
        let doc = self
            .client
            .get_document(USERS, user_id)
            .await?
            .ok_or_else(|| FirestoreError::not_found(format!("user {}", user_id)))?;
        Ok((doc.get(CREDITS_FIELD).unwrap_or(0), doc.update_time.clone()))
    }
}

#[async_trait]
impl CreditRepository for FirestoreCreditRepository {
    async fn balance(&self, user_id: &str) -> FirestoreResult<u32> {
        Ok(self.load(user_id).await?.0)
    }

    async fn try_debit(&self, user_id: &str, amount: u32) -> FirestoreResult<DebitOutcome> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let (balance, update_time) = self.load(user_id).await?;
            if balance < amount {
                return Ok(DebitOutcome::Insufficient { balance });
            }

            let update_time = update_time.ok_or_else(|| {
                FirestoreError::invalid_document(format!("user {} has no updateTime", user_id))
            })?;
            let remaining = balance - amount;

            let mut fields = HashMap::new();
            fields.insert(CREDITS_FIELD.to_string(), remaining.to_firestore_value());
            fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());

            match self
                .client
                .update_document_with_precondition(
                    USERS,
                    user_id,
                    fields,
                    Some(vec![CREDITS_FIELD.to_string(), "updated_at".to_string()]),
                    &update_time,
                )
                .await
            {
                Ok(_) => {
                    info!(user_id = %user_id, amount, remaining, "Debited credits");
                    return Ok(DebitOutcome::Debited { remaining });
                }
                Err(e) if e.is_precondition_failed() => {
                    // Another writer updated the document; reload and retry
                    record_debit_retry();
                    debug!(
                        user_id = %user_id,
                        attempt = attempt + 1,
                        "Credit debit precondition failed, retrying"
                    );
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * (attempt as u64 + 1));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(FirestoreError::Contention(format!("{}/{}", USERS, user_id)))
    }

    async fn credit(&self, user_id: &str, amount: u32) -> FirestoreResult<u32> {
        let after = self
            .client
            .increment_field(USERS, user_id, CREDITS_FIELD, amount as i64)
            .await?;
        info!(user_id = %user_id, amount, balance = after, "Credited credits");
        Ok(u32::try_from(after).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER_DOC: &str = "/v1/projects/p/databases/(default)/documents/users/u1";

    fn repo(server: &MockServer) -> FirestoreCreditRepository {
        let client =
            FirestoreClient::with_base_url(FirestoreConfig::new("p"), &server.uri()).unwrap();
        FirestoreCreditRepository::new(client)
    }

    fn user_doc(credits: u32) -> serde_json::Value {
        serde_json::json!({
            "name": "projects/p/databases/(default)/documents/users/u1",
            "fields": {"credits": {"integerValue": credits.to_string()}},
            "updateTime": "2025-01-01T00:00:00.000001Z"
        })
    }

    #[tokio::test]
    async fn test_debit_refuses_empty_balance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_DOC))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_doc(0)))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = repo(&server).try_debit("u1", 1).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Insufficient { balance: 0 });
    }

    #[tokio::test]
    async fn test_debit_retries_on_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_DOC))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_doc(5)))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(USER_DOC))
            .respond_with(ResponseTemplate::new(412))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(USER_DOC))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_doc(4)))
            .mount(&server)
            .await;

        let outcome = repo(&server).try_debit("u1", 1).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Debited { remaining: 4 });
    }

    const FILE_DOC: &str = "/v1/projects/p/databases/(default)/documents/uploaded_files/f1";

    fn file_repo(server: &MockServer) -> FirestoreFileRepository {
        let client =
            FirestoreClient::with_base_url(FirestoreConfig::new("p"), &server.uri()).unwrap();
        FirestoreFileRepository::new(client)
    }

    fn file_doc(status: &str) -> serde_json::Value {
        serde_json::json!({
            "name": "projects/p/databases/(default)/documents/uploaded_files/f1",
            "fields": {
                "user_id": {"stringValue": "u1"},
                "file_path": {"stringValue": "user-u1/f1-a.mp4"},
                "status": {"stringValue": status}
            },
            "updateTime": "2025-01-01T00:00:00.000001Z"
        })
    }

    #[tokio::test]
    async fn test_status_write_skips_backward_transition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FILE_DOC))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_doc("processing")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let written = file_repo(&server)
            .update_status(&FileId::from("f1"), FileStatus::Queued, None)
            .await
            .unwrap();
        assert!(!written);
    }

    #[tokio::test]
    async fn test_status_write_rechecks_after_conflict() {
        let server = MockServer::start().await;
        // The record moves on to no_credit between our read and write
        Mock::given(method("GET"))
            .and(path(FILE_DOC))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_doc("uploaded")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(FILE_DOC))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_doc("no_credit")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(FILE_DOC))
            .respond_with(ResponseTemplate::new(412))
            .expect(1)
            .mount(&server)
            .await;

        let written = file_repo(&server)
            .update_status(&FileId::from("f1"), FileStatus::Queued, None)
            .await
            .unwrap();
        assert!(!written);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = repo(&server).balance("u1").await.unwrap_err();
        assert!(matches!(err, FirestoreError::NotFound(_)));
    }
}
