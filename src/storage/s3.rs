//! S3-compatible object store backed by the AWS SDK.
//!
//! Works against AWS proper and against MinIO via a custom endpoint with
//! path-style addressing.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::ObjectStore;
use crate::types::{Error, Result, StorageConfig};

/// S3 client wrapper.
pub struct S3Store {
    client: Client,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").finish()
    }
}

impl S3Store {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();
        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
            return Ok(());
        }
        tracing::info!("Bucket '{}' does not exist, creating", bucket);
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Lost the creation race; the bucket existing is all we need.
                let service_error = e.to_string();
                if service_error.contains("BucketAlreadyOwnedByYou")
                    || service_error.contains("BucketAlreadyExists")
                {
                    return Ok(());
                }
                Err(Error::storage(format!(
                    "create bucket '{}' failed: {}",
                    bucket, service_error
                )))
            }
        }
    }

    async fn put_json(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Error::storage(format!("put s3://{}/{} failed: {}", bucket, key, e)))?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Ok(None);
                }
                return Err(Error::storage(format!(
                    "get s3://{}/{} failed: {}",
                    bucket, key, service_error
                )));
            }
        };
        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| Error::storage(format!("read s3://{}/{} failed: {}", bucket, key, e)))?;
        Ok(Some(bytes.into_bytes().to_vec()))
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| Error::storage(format!("list s3://{} failed: {}", bucket, e)))?;
            for object in response.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }
}
