use crate::error::{PipelineError, Result};
use crate::models::RemoteObjectRef;
use crate::store::object_store::{ListPage, ObjectStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Object store held in memory, for tests and dry runs.
///
/// Keys list in lexical order; continuation tokens are plain offsets.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    objects: BTreeMap<(String, String), Vec<u8>>,
    page_size: usize,
    failing_keys: HashSet<String>,
    listing_error: Option<String>,
    downloads: AtomicUsize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            page_size: 1000,
            failing_keys: HashSet::new(),
            listing_error: None,
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn with_object(
        mut self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        self.objects.insert((bucket.into(), key.into()), body.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Downloads of `key` fail with a remote error.
    pub fn with_failing_key(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }

    /// Every listing call fails with `message`.
    pub fn with_listing_error(mut self, message: impl Into<String>) -> Self {
        self.listing_error = Some(message.into());
        self
    }

    /// Number of completed `download` calls.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        if let Some(message) = &self.listing_error {
            return Err(PipelineError::Remote(message.clone()));
        }

        let offset = match continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| PipelineError::Remote(format!("Invalid continuation token: {}", token)))?,
            None => 0,
        };

        let matching: Vec<RemoteObjectRef> = self
            .objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((b, key), body)| RemoteObjectRef::new(b.as_str(), key.as_str(), body.len() as u64))
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let objects = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < matching.len()).then(|| end.to_string());

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn download(&self, object: &RemoteObjectRef, dest: &Path) -> Result<u64> {
        if self.failing_keys.contains(&object.key) {
            return Err(PipelineError::Remote(format!(
                "Simulated failure for {}",
                object.key
            )));
        }

        let body = self
            .objects
            .get(&(object.bucket.clone(), object.key.clone()))
            .ok_or_else(|| PipelineError::Remote(format!("NoSuchKey: {}", object.key)))?;

        tokio::fs::write(dest, body).await?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(body.len() as u64)
    }
}
