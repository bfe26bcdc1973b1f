//! Namespace registry for managing per-namespace informers

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Background tasks watching one namespace
#[derive(Debug, Default)]
pub struct InformerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl InformerHandle {
    pub fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    pub fn abort(self) {
        for task in self.tasks {
            task.abort();
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Starts and stops the watch sources of a namespace
#[async_trait]
pub trait InformerFactory: Send + Sync {
    async fn start(&self, namespace: &str) -> InformerHandle;

    async fn stop(&self, namespace: &str, handle: InformerHandle) {
        debug!("Stopping informers for namespace {}", namespace);
        handle.abort();
    }
}

/// NamespaceRegistry maintains the set of watched namespaces and their
/// informer handles. It has its own lock so namespace lifecycle events do
/// not contend with the resource store.
pub struct NamespaceRegistry {
    // Map of namespace to the informers watching it
    namespaces: Arc<RwLock<BTreeMap<String, InformerHandle>>>,
    factory: Arc<dyn InformerFactory>,
}

impl NamespaceRegistry {
    pub fn new(factory: Arc<dyn InformerFactory>) -> Self {
        Self {
            namespaces: Arc::new(RwLock::new(BTreeMap::new())),
            factory,
        }
    }

    /// Start watching a namespace. Returns false if it is already watched.
    pub async fn start(&self, namespace: &str) -> bool {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.contains_key(namespace) {
            return false;
        }
        let handle = self.factory.start(namespace).await;
        info!("Started {} informers for namespace {}", handle.task_count(), namespace);
        namespaces.insert(namespace.to_string(), handle);
        true
    }

    /// Stop watching a namespace. Returns false if it was not watched.
    pub async fn stop(&self, namespace: &str) -> bool {
        let handle = self.namespaces.write().await.remove(namespace);
        match handle {
            Some(handle) => {
                self.factory.stop(namespace, handle).await;
                info!("Stopped informers for namespace {}", namespace);
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, namespace: &str) -> bool {
        self.namespaces.read().await.contains_key(namespace)
    }

    pub async fn list(&self) -> Vec<String> {
        self.namespaces.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.namespaces.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFactory {
        started: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InformerFactory for RecordingFactory {
        async fn start(&self, namespace: &str) -> InformerHandle {
            self.started.lock().unwrap().push(namespace.to_string());
            InformerHandle::new(vec![tokio::spawn(std::future::pending::<()>())])
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let factory = Arc::new(RecordingFactory::default());
        let registry = NamespaceRegistry::new(factory.clone());

        assert!(registry.start("ns1").await);
        assert!(!registry.start("ns1").await);
        assert!(registry.start("ns2").await);

        assert_eq!(registry.list().await, vec!["ns1", "ns2"]);
        assert_eq!(factory.started.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_removes_namespace() {
        let registry = NamespaceRegistry::new(Arc::new(RecordingFactory::default()));
        registry.start("ns1").await;

        assert!(registry.stop("ns1").await);
        assert!(!registry.contains("ns1").await);
        assert!(!registry.stop("ns1").await);
        assert_eq!(registry.count().await, 0);
    }
}
