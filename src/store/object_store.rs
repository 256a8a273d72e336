use crate::error::Result;
use crate::models::RemoteObjectRef;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// One page of a listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<RemoteObjectRef>,
    /// Present while the listing is truncated.
    pub next_token: Option<String>,
}

/// Read-only view of a remote object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under `prefix`, resuming from `continuation` when given.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage>;

    /// Stream the object body into `dest`, returning the bytes written.
    async fn download(&self, object: &RemoteObjectRef, dest: &Path) -> Result<u64>;
}

/// Follow continuation tokens until the listing is exhausted.
pub async fn list_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<RemoteObjectRef>> {
    let mut objects = Vec::new();
    let mut continuation = None;
    let mut pages = 0usize;

    loop {
        let page = store.list_page(bucket, prefix, continuation).await?;
        pages += 1;
        objects.extend(page.objects);
        match page.next_token {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    debug!(bucket, prefix, pages, objects = objects.len(), "Listing complete");
    Ok(objects)
}
