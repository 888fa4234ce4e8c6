//! Cloudflare R2 backed artifact store.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageOp, StorageResult};
use crate::store::{folder_prefix, upload_key, ArtifactStore};

const DEFAULT_BUCKET: &str = "uploaded_files";

/// Connection settings for the R2 S3 endpoint.
#[derive(Debug, Clone)]
pub struct R2Settings {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// R2 accepts "auto".
    pub region: String,
}

impl R2Settings {
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint: required("R2_ENDPOINT_URL")?,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket: std::env::var("R2_BUCKET_NAME").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

fn required(name: &str) -> StorageResult<String> {
    std::env::var(name).map_err(|_| StorageError::config(format!("{} is not set", name)))
}

/// Artifact store on an R2 bucket.
#[derive(Clone)]
pub struct R2Store {
    s3: Client,
    bucket: String,
}

impl R2Store {
    pub fn new(settings: R2Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id,
            settings.secret_access_key,
            None,
            None,
            "clipper-r2",
        );
        let conf = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(settings.endpoint)
            .region(Region::new(settings.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            s3: Client::from_conf(conf),
            bucket: settings.bucket,
        }
    }

    pub fn from_env() -> StorageResult<Self> {
        R2Settings::from_env().map(Self::new)
    }
}

fn get_error(path: &str, err: SdkError<GetObjectError>) -> StorageError {
    match err.as_service_error() {
        Some(GetObjectError::NoSuchKey(_)) => StorageError::not_found(path),
        _ => StorageError::backend(StorageOp::Get, path, DisplayErrorContext(err)),
    }
}

#[async_trait]
impl ArtifactStore for R2Store {
    async fn upload(
        &self,
        data: Vec<u8>,
        file_name: &str,
        owner_id: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let key = upload_key(owner_id, file_name);
        let size = data.len();

        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::backend(StorageOp::Put, &key, DisplayErrorContext(e)))?;

        info!(key = %key, size, "Stored upload");
        Ok(key)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.s3
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| StorageError::backend(StorageOp::Delete, path, DisplayErrorContext(e)))?;
        debug!(path, "Deleted object");
        Ok(())
    }

    /// Direct children only; placeholder keys ending in `/` are skipped.
    async fn list_files(&self, folder: &str) -> StorageResult<Vec<String>> {
        let prefix = folder_prefix(folder);
        let mut pages = self
            .s3
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .delimiter("/")
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|e| StorageError::backend(StorageOp::List, &prefix, DisplayErrorContext(e)))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string),
            );
        }

        debug!(folder, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn download(&self, path: &str) -> StorageResult<Vec<u8>> {
        let object = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| get_error(path, e))?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::backend(StorageOp::Get, path, e))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        let presigning =
            PresigningConfig::expires_in(ttl).map_err(|e| StorageError::backend(StorageOp::Sign, path, e))?;

        let request = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::backend(StorageOp::Sign, path, DisplayErrorContext(e)))?;

        Ok(request.uri().to_string())
    }
}
