//! De-duplicating, rate-limited work queue feeding the worker

use crate::resource::ResourceKind;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Namespace, Service};
use kube::ResourceExt;
use routegroup_api::Route;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// The object carried by a work item, one variant per watched kind
#[derive(Clone, Debug)]
pub enum Resource {
    Route(Arc<Route>),
    Service(Arc<Service>),
    Endpoints(Arc<Endpoints>),
    ConfigMap(Arc<ConfigMap>),
    Namespace(Arc<Namespace>),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Route(_) => ResourceKind::Route,
            Resource::Service(_) => ResourceKind::Service,
            Resource::Endpoints(_) => ResourceKind::Endpoints,
            Resource::ConfigMap(_) => ResourceKind::ConfigMap,
            Resource::Namespace(_) => ResourceKind::Namespace,
        }
    }

    fn namespace_and_name(&self) -> (String, String) {
        match self {
            Resource::Route(r) => (r.namespace().unwrap_or_default(), r.name_any()),
            Resource::Service(s) => (s.namespace().unwrap_or_default(), s.name_any()),
            Resource::Endpoints(e) => (e.namespace().unwrap_or_default(), e.name_any()),
            Resource::ConfigMap(c) => (c.namespace().unwrap_or_default(), c.name_any()),
            Resource::Namespace(n) => (String::new(), n.name_any()),
        }
    }
}

impl From<Route> for Resource {
    fn from(route: Route) -> Self {
        Resource::Route(Arc::new(route))
    }
}

impl From<Service> for Resource {
    fn from(service: Service) -> Self {
        Resource::Service(Arc::new(service))
    }
}

impl From<Endpoints> for Resource {
    fn from(endpoints: Endpoints) -> Self {
        Resource::Endpoints(Arc::new(endpoints))
    }
}

impl From<ConfigMap> for Resource {
    fn from(cm: ConfigMap) -> Self {
        Resource::ConfigMap(Arc::new(cm))
    }
}

impl From<Namespace> for Resource {
    fn from(ns: Namespace) -> Self {
        Resource::Namespace(Arc::new(ns))
    }
}

/// Identity of a work item: kind, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkItem {
    pub resource: Resource,
    pub is_delete: bool,
}

impl WorkItem {
    pub fn new(resource: impl Into<Resource>, is_delete: bool) -> Self {
        Self {
            resource: resource.into(),
            is_delete,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.resource.kind()
    }

    pub fn key(&self) -> QueueKey {
        let (namespace, name) = self.resource.namespace_and_name();
        QueueKey {
            kind: self.kind(),
            namespace,
            name,
        }
    }
}

/// Per-key exponential backoff
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(30),
        }
    }
}

impl RateLimiter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt after `failures` prior failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let base = self.base.as_millis() as u64;
        let exponential = 2u64.checked_pow(failures).unwrap_or(u64::MAX);
        let backoff_ms = base.saturating_mul(exponential).min(self.max.as_millis() as u64);
        Duration::from_millis(backoff_ms)
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueueKey>,
    dirty: HashMap<QueueKey, WorkItem>,
    processing: HashSet<QueueKey>,
    /// Token of the delayed re-add scheduled per key
    pending_retries: HashMap<QueueKey, u64>,
    next_retry: u64,
    failures: HashMap<QueueKey, u32>,
    shutting_down: bool,
}

/// WorkQueue coalesces items by key: a key is queued at most once, the
/// latest payload wins, and a key being processed is not handed out again
/// until [`WorkQueue::done`] is called for it.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: RateLimiter,
}

impl WorkQueue {
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            limiter,
        }
    }

    pub async fn add(&self, item: WorkItem) {
        let key = item.key();
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }

        state.pending_retries.remove(&key);
        let already_dirty = state.dirty.insert(key.clone(), item).is_some();
        if already_dirty || state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Re-add after a per-key exponential delay. The delayed add is dropped
    /// if a newer event for the same key arrives in the meantime.
    pub async fn add_rate_limited(self: &Arc<Self>, item: WorkItem) {
        let key = item.key();
        let (delay, token) = {
            let mut state = self.state.lock().await;
            if state.shutting_down || state.dirty.contains_key(&key) {
                return;
            }
            let failures = state.failures.entry(key.clone()).or_default();
            let delay = self.limiter.backoff(*failures);
            *failures += 1;

            state.next_retry += 1;
            let token = state.next_retry;
            state.pending_retries.insert(key.clone(), token);
            (delay, token)
        };

        debug!("Requeueing {} in {:?}", key, delay);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.fire_retry(key, token, item).await;
        });
    }

    async fn fire_retry(&self, key: QueueKey, token: u64, item: WorkItem) {
        {
            let mut state = self.state.lock().await;
            if state.pending_retries.get(&key) != Some(&token) {
                return;
            }
            state.pending_retries.remove(&key);
        }
        self.add(item).await;
    }

    /// Wait for the next item; `None` once the queue is shut down and empty
    pub async fn get(&self) -> Option<(QueueKey, WorkItem)> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                while let Some(key) = state.queue.pop_front() {
                    if let Some(item) = state.dirty.remove(&key) {
                        state.processing.insert(key.clone());
                        return Some((key, item));
                    }
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a key as processed; a newer event that arrived meanwhile is queued
    pub async fn done(&self, key: &QueueKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains_key(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Clear the retry history of a key
    pub async fn forget(&self, key: &QueueKey) {
        self.state.lock().await.failures.remove(key);
    }

    pub async fn num_requeues(&self, key: &QueueKey) -> u32 {
        self.state.lock().await.failures.get(key).copied().unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(RateLimiter::default())
    }
}
