//! Cluster client resolution.
//!
//! Every cluster a job can target is addressed by id; the special id
//! `local` means the cluster the orchestrator itself runs in. Attached
//! clusters are reached through the hub-server proxy. Resolution is cached
//! per id; clients are cheap to clone and safe to share once built.

use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Id of the cluster hosting the orchestrator process.
pub const LOCAL_CLUSTER_ID: &str = "local";

/// Namespace executor pods use on attached clusters.
pub const ATTACHED_CLUSTER_NAMESPACE: &str = "koderover-agent";

#[must_use]
pub fn is_local_cluster(cluster_id: &str) -> bool {
    cluster_id.is_empty() || cluster_id == LOCAL_CLUSTER_ID
}

/// A resolved cluster: one client covers control-plane and typed access.
#[derive(Clone)]
pub struct ClusterHandle {
    pub cluster_id: String,
    pub client: kube::Client,
}

#[async_trait]
pub trait ClusterResolver: Send + Sync {
    async fn resolve(&self, cluster_id: &str) -> Result<ClusterHandle>;
}

/// Resolver that reuses the in-process client for the local cluster and goes
/// through the hub-server proxy for everything else.
pub struct HubClusterResolver {
    local: kube::Client,
    hub_server_addr: String,
}

impl HubClusterResolver {
    #[must_use]
    pub fn new(local: kube::Client, hub_server_addr: impl Into<String>) -> Self {
        Self { local, hub_server_addr: hub_server_addr.into() }
    }
}

#[async_trait]
impl ClusterResolver for HubClusterResolver {
    async fn resolve(&self, cluster_id: &str) -> Result<ClusterHandle> {
        if is_local_cluster(cluster_id) {
            return Ok(ClusterHandle {
                cluster_id: LOCAL_CLUSTER_ID.to_string(),
                client: self.local.clone(),
            });
        }
        if self.hub_server_addr.is_empty() {
            return Err(Error::cluster(cluster_id, "hub server address not configured"));
        }

        let proxy = format!("{}/kube/{}", self.hub_server_addr.trim_end_matches('/'), cluster_id);
        let uri = http::Uri::from_str(&proxy)
            .map_err(|err| Error::cluster(cluster_id, format!("bad hub proxy url: {err}")))?;
        let config = kube::Config::new(uri);
        let client = kube::Client::try_from(config)
            .map_err(|err| Error::cluster(cluster_id, format!("build client: {err}")))?;
        debug!(cluster_id, proxy = %proxy, "resolved attached cluster via hub server");
        Ok(ClusterHandle { cluster_id: cluster_id.to_string(), client })
    }
}

/// Caching layer over any resolver, keyed by cluster id.
pub struct CachingClusterResolver<R> {
    inner: R,
    cache: Mutex<HashMap<String, ClusterHandle>>,
}

impl<R: ClusterResolver> CachingClusterResolver<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, cache: Mutex::new(HashMap::new()) }
    }

    /// Drop a cached client, forcing re-resolution on next use.
    pub fn invalidate(&self, cluster_id: &str) {
        self.cache.lock().expect("cluster cache poisoned").remove(cluster_id);
    }
}

#[async_trait]
impl<R: ClusterResolver> ClusterResolver for CachingClusterResolver<R> {
    async fn resolve(&self, cluster_id: &str) -> Result<ClusterHandle> {
        let key = if is_local_cluster(cluster_id) { LOCAL_CLUSTER_ID } else { cluster_id };
        if let Some(handle) = self.cache.lock().expect("cluster cache poisoned").get(key) {
            return Ok(handle.clone());
        }
        let handle = self.inner.resolve(key).await?;
        self.cache
            .lock()
            .expect("cluster cache poisoned")
            .insert(key.to_string(), handle.clone());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver(AtomicUsize);

    #[async_trait]
    impl ClusterResolver for CountingResolver {
        async fn resolve(&self, cluster_id: &str) -> Result<ClusterHandle> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::cluster(cluster_id, "offline test resolver"))
        }
    }

    #[test]
    fn local_detection() {
        assert!(is_local_cluster(""));
        assert!(is_local_cluster("local"));
        assert!(!is_local_cluster("prod-eu"));
    }

    #[tokio::test]
    async fn cache_normalizes_empty_id_to_local() {
        let resolver = CachingClusterResolver::new(CountingResolver(AtomicUsize::new(0)));
        let _ = resolver.resolve("").await;
        let _ = resolver.resolve("local").await;
        // errors are not cached, so both calls reach the inner resolver with
        // the normalized id
        assert_eq!(resolver.inner.0.load(Ordering::SeqCst), 2);
    }
}
