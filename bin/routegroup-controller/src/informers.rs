//! Watch sources feeding the work queue and the reflector caches behind
//! the resource index

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Namespace, Node, Service};
use kube::api::{Api, ListParams};
use kube::{Client, Resource as KubeResource, ResourceExt};
use kube_runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube_runtime::{watcher, WatchStreamExt};
use routegroup_api::{Route, EXTENDED_SPEC_KEY};
use routegroup_core::{
    InformerFactory, InformerHandle, Resource, ResourceIndex, Result as CoreResult, WorkItem, WorkQueue,
};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reflector stores of one watched namespace
struct NamespaceCaches {
    routes: Store<Route>,
    services: Store<Service>,
    endpoints: Store<Endpoints>,
}

/// ClusterIndex serves lookups from the reflector stores
pub struct ClusterIndex {
    namespaces: RwLock<BTreeMap<String, NamespaceCaches>>,
    nodes: Store<Node>,
}

impl ClusterIndex {
    pub fn new(nodes: Store<Node>) -> Self {
        Self {
            namespaces: RwLock::new(BTreeMap::new()),
            nodes,
        }
    }
}

#[async_trait]
impl ResourceIndex for ClusterIndex {
    async fn routes(&self, namespace: &str) -> Option<Vec<Arc<Route>>> {
        let namespaces = self.namespaces.read().await;
        namespaces.get(namespace).map(|caches| caches.routes.state())
    }

    async fn service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .and_then(|caches| caches.services.get(&ObjectRef::new(name).within(namespace)))
    }

    async fn endpoints(&self, namespace: &str, name: &str) -> Option<Arc<Endpoints>> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .and_then(|caches| caches.endpoints.get(&ObjectRef::new(name).within(namespace)))
    }

    async fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.state()
    }
}

/// Forward watch events of one kind into the queue, keeping an optional
/// reflector store current. Objects rejected by `accept` are cached but
/// not queued.
fn spawn_informer<K>(
    api: Api<K>,
    config: watcher::Config,
    writer: Option<Writer<K>>,
    queue: Arc<WorkQueue>,
    accept: fn(&K) -> bool,
) -> JoinHandle<()>
where
    K: KubeResource + Clone + DeserializeOwned + Debug + Send + Sync + Into<Resource> + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let events = watcher(api, config).default_backoff();
    let mut events = match writer {
        Some(writer) => reflector::reflector(writer, events).boxed(),
        None => events.boxed(),
    };

    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                    if accept(&obj) {
                        queue.add(WorkItem::new(obj, false)).await;
                    }
                }
                Ok(watcher::Event::Delete(obj)) => {
                    if accept(&obj) {
                        queue.add(WorkItem::new(obj, true)).await;
                    }
                }
                Ok(watcher::Event::Init) => debug!("{} watcher initialized", kind),
                Ok(watcher::Event::InitDone) => debug!("{} watcher initial sync complete", kind),
                Err(e) => warn!("{} watcher error: {}", kind, e),
            }
        }
    })
}

fn accept_all<K>(_: &K) -> bool {
    true
}

fn has_extended_spec(cm: &ConfigMap) -> bool {
    cm.data
        .as_ref()
        .map(|data| data.contains_key(EXTENDED_SPEC_KEY))
        .unwrap_or(false)
}

/// Starts Route, Service, Endpoints and ConfigMap informers per namespace
pub struct KubeInformerFactory {
    client: Client,
    queue: Arc<WorkQueue>,
    index: Arc<ClusterIndex>,
}

impl KubeInformerFactory {
    pub fn new(client: Client, queue: Arc<WorkQueue>, index: Arc<ClusterIndex>) -> Self {
        Self { client, queue, index }
    }
}

#[async_trait]
impl InformerFactory for KubeInformerFactory {
    async fn start(&self, namespace: &str) -> InformerHandle {
        let (routes, routes_writer) = reflector::store();
        let (services, services_writer) = reflector::store();
        let (endpoints, endpoints_writer) = reflector::store();

        // Caches are registered before the watchers start so events never
        // reference a namespace the index does not know.
        self.index.namespaces.write().await.insert(
            namespace.to_string(),
            NamespaceCaches {
                routes,
                services,
                endpoints,
            },
        );

        let tasks = vec![
            spawn_informer(
                Api::<Route>::namespaced(self.client.clone(), namespace),
                watcher::Config::default(),
                Some(routes_writer),
                self.queue.clone(),
                accept_all,
            ),
            spawn_informer(
                Api::<Service>::namespaced(self.client.clone(), namespace),
                watcher::Config::default(),
                Some(services_writer),
                self.queue.clone(),
                accept_all,
            ),
            spawn_informer(
                Api::<Endpoints>::namespaced(self.client.clone(), namespace),
                watcher::Config::default(),
                Some(endpoints_writer),
                self.queue.clone(),
                accept_all,
            ),
            spawn_informer(
                Api::<ConfigMap>::namespaced(self.client.clone(), namespace),
                watcher::Config::default(),
                None,
                self.queue.clone(),
                has_extended_spec,
            ),
        ];
        InformerHandle::new(tasks)
    }

    async fn stop(&self, namespace: &str, handle: InformerHandle) {
        handle.abort();
        self.index.namespaces.write().await.remove(namespace);
        debug!("Dropped caches for namespace {}", namespace);
    }
}

/// Cluster-wide node cache used by the node-port member strategy
pub fn spawn_node_reflector(client: Client) -> (Store<Node>, JoinHandle<()>) {
    let (store, writer) = reflector::store();
    let events = reflector::reflector(
        writer,
        watcher(Api::<Node>::all(client), watcher::Config::default()).default_backoff(),
    );

    let task = tokio::spawn(async move {
        let mut events = events.boxed();
        while let Some(event) = events.next().await {
            if let Err(e) = event {
                warn!("Node watcher error: {}", e);
            }
        }
    });
    (store, task)
}

/// Watch the global extended spec ConfigMap only
pub fn spawn_global_spec_watcher(client: Client, queue: Arc<WorkQueue>, namespace: &str, name: &str) -> JoinHandle<()> {
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    spawn_informer(
        Api::<ConfigMap>::namespaced(client, namespace),
        config,
        None,
        queue,
        accept_all,
    )
}

/// Watch namespaces matching `label`; their events drive the registry
pub fn spawn_namespace_watcher(client: Client, queue: Arc<WorkQueue>, label: &str) -> JoinHandle<()> {
    spawn_informer(
        Api::<Namespace>::all(client),
        watcher::Config::default().labels(label),
        None,
        queue,
        accept_all,
    )
}

pub async fn fetch_config_map(client: &Client, namespace: &str, name: &str) -> CoreResult<Option<ConfigMap>> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    Ok(api.get_opt(name).await?)
}

pub async fn list_namespaces(client: &Client, label: &str) -> CoreResult<Vec<String>> {
    let api: Api<Namespace> = Api::all(client.clone());
    let list = api.list(&ListParams::default().labels(label)).await?;
    Ok(list.items.iter().map(|ns| ns.name_any()).collect())
}

/// Number of Services across the watched namespaces at boot
pub async fn count_services(client: &Client, namespaces: &[String]) -> CoreResult<usize> {
    let mut count = 0;
    for namespace in namespaces {
        let api: Api<Service> = Api::namespaced(client.clone(), namespace);
        count += api.list(&ListParams::default()).await?.items.len();
    }
    info!("Found {} services in {} namespaces", count, namespaces.len());
    Ok(count)
}
