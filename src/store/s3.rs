use crate::error::{PipelineError, Result};
use crate::models::RemoteObjectRef;
use crate::store::object_store::{ListPage, ObjectStore};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use chrono::DateTime;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// S3-backed object store. Public NOAA buckets are read without credentials.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn anonymous(region: &str, endpoint: Option<&str>) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .no_credentials()
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(region, endpoint = ?endpoint, "Object store client initialized");
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(|e| {
            PipelineError::Remote(format!(
                "Listing s3://{}/{} failed: {}",
                bucket,
                prefix,
                DisplayErrorContext(&e)
            ))
        })?;

        let objects: Vec<RemoteObjectRef> = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                let size = obj.size().unwrap_or(0).max(0) as u64;
                let object = RemoteObjectRef::new(bucket, key, size);
                let modified = obj
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()));
                Some(match modified {
                    Some(ts) => object.with_last_modified(ts),
                    None => object,
                })
            })
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        debug!(count = objects.len(), truncated = next_token.is_some(), "Listed page");
        Ok(ListPage {
            objects,
            next_token,
        })
    }

    #[instrument(skip(self, dest), fields(key = %object.key))]
    async fn download(&self, object: &RemoteObjectRef, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Remote(format!(
                    "Download of s3://{}/{} failed: {}",
                    object.bucket,
                    object.key,
                    DisplayErrorContext(&e)
                ))
            })?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(|e| {
            PipelineError::Remote(format!("Body of {} interrupted: {}", object.key, e))
        })? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}
