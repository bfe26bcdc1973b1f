//! Single logical worker dispatching queued events to the reconciler

use crate::error::Result;
use crate::metrics::ControllerMetrics;
use crate::queue::{QueueKey, Resource, WorkItem, WorkQueue};
use crate::reconciler::Reconciler;
use crate::registry::NamespaceRegistry;
use crate::resource::ResourceKind;
use crate::store::ConfigRequest;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives consolidated snapshots on every drain cycle
#[async_trait]
pub trait ConfigAgent: Send + Sync {
    async fn post_config(&self, request: ConfigRequest);
}

/// Global options copied into every snapshot
#[derive(Clone, Debug, Default)]
pub struct WorkerSettings {
    pub share_nodes: bool,
    pub default_route_domain: i32,
}

pub struct Worker {
    queue: Arc<WorkQueue>,
    reconciler: Reconciler,
    namespaces: Arc<NamespaceRegistry>,
    agent: Arc<dyn ConfigAgent>,
    metrics: ControllerMetrics,
    settings: WorkerSettings,
    init_state: bool,
    initial_service_count: usize,
    next_request_id: u64,
}

impl Worker {
    pub fn new(
        queue: Arc<WorkQueue>,
        reconciler: Reconciler,
        namespaces: Arc<NamespaceRegistry>,
        agent: Arc<dyn ConfigAgent>,
        metrics: ControllerMetrics,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            reconciler,
            namespaces,
            agent,
            metrics,
            settings,
            init_state: true,
            initial_service_count: 0,
            next_request_id: 0,
        }
    }

    /// Number of Services that must be seen before routes are synthesized.
    /// Zero skips the bulk-load phase.
    pub fn set_initial_service_count(&mut self, count: usize) {
        self.initial_service_count = count;
        if count == 0 {
            self.init_state = false;
        }
    }

    pub fn is_initialising(&self) -> bool {
        self.init_state
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Load the global extended spec before any event is processed
    pub async fn initialise_extended_spec(&mut self, cm: Option<&ConfigMap>) -> Result<()> {
        match cm {
            Some(cm) => self.reconciler.process_config_map(cm, false, true).await,
            None => {
                warn!("Global extended spec ConfigMap not found, route groups wait for it");
                Ok(())
            }
        }
    }

    pub async fn run(&mut self) {
        info!("Starting worker");
        while self.process_next_item().await {}
        info!("Worker stopped");
    }

    /// Handle one queued item. Returns false once the queue is shut down.
    pub async fn process_next_item(&mut self) -> bool {
        let Some((key, item)) = self.queue.get().await else {
            return false;
        };
        let kind = item.kind();

        if self.init_state {
            match kind {
                ResourceKind::Service => {
                    self.initial_service_count = self.initial_service_count.saturating_sub(1);
                    if self.initial_service_count == 0 {
                        info!("Initial services seen, leaving bulk-load phase");
                        self.init_state = false;
                    }
                }
                ResourceKind::Namespace => {}
                _ => {
                    debug!("Deferring {} until initial services are seen", key);
                    self.queue.add_rate_limited(item).await;
                    self.queue.done(&key).await;
                    return true;
                }
            }
        }

        match self.dispatch(&key, &item).await {
            Ok(()) => {
                self.queue.forget(&key).await;
                self.metrics.record_item(kind, "ok");
            }
            Err(e) if e.is_retryable() => {
                warn!(key = %key, "Requeueing after error: {}", e);
                self.metrics.retries_total.inc();
                self.metrics.record_item(kind, "retry");
                self.queue.add_rate_limited(item).await;
            }
            Err(e) => {
                error!(key = %key, "Dropping item: {}", e);
                self.queue.forget(&key).await;
                self.metrics.record_item(kind, "error");
            }
        }
        self.queue.done(&key).await;

        if self.queue.is_empty().await && self.reconciler.store().is_config_updated() {
            self.post_snapshot();
        }
        true
    }

    async fn dispatch(&mut self, key: &QueueKey, item: &WorkItem) -> Result<()> {
        debug!("Processing {} (delete: {})", key, item.is_delete);
        match &item.resource {
            Resource::Route(route) => {
                // Deleted routes are already gone from the index, so a
                // plain resync drops them.
                let namespace = route.namespace().unwrap_or_default();
                let timer = self.metrics.sync_duration_seconds.start_timer();
                let result = self.reconciler.process_routes(&namespace, false).await;
                timer.observe_duration();
                result.map(|_| ())
            }
            Resource::ConfigMap(cm) => self.reconciler.process_config_map(cm, item.is_delete, false).await,
            Resource::Service(service) => {
                if !self.init_state {
                    let namespace = service.namespace().unwrap_or_default();
                    self.reconciler.update_pool_members_for_routes(&namespace).await;
                }
                Ok(())
            }
            Resource::Endpoints(endpoints) => {
                let namespace = endpoints.namespace().unwrap_or_default();
                let service = self.reconciler.index().service(&namespace, &endpoints.name_any()).await;
                if service.is_some() {
                    self.reconciler.update_pool_members_for_routes(&namespace).await;
                }
                Ok(())
            }
            Resource::Namespace(ns) => {
                let name = ns.name_any();
                if item.is_delete {
                    self.reconciler.teardown(&name).await;
                    self.namespaces.stop(&name).await;
                } else {
                    self.namespaces.start(&name).await;
                }
                Ok(())
            }
        }
    }

    fn post_snapshot(&mut self) {
        self.next_request_id += 1;
        let store = self.reconciler.store();
        let request = ConfigRequest {
            ltm_config: store.ltm_deep_copy(),
            dns_config: store.dns_copy(),
            share_nodes: self.settings.share_nodes,
            default_route_domain: self.settings.default_route_domain,
            request_id: self.next_request_id,
        };
        self.metrics.virtual_servers.set(store.virtual_server_count() as f64);

        info!("Posting config request {}", request.request_id);
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            agent.post_config(request).await;
        });

        self.reconciler.store_mut().mark_flushed();
        self.init_state = false;
        self.metrics.config_posts_total.inc();
    }
}
