use anyhow::Result;
use kube::Client;
use routegroup_core::{
    ControllerMetrics, NamespaceRegistry, RateLimiter, Reconciler, ReconcilerSettings, RouteTlsProfiles, WorkQueue,
    Worker, WorkerSettings,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod agent;
mod config;
mod http;
mod informers;

use agent::LoggingAgent;
use config::ControllerConfig;
use informers::{ClusterIndex, KubeInformerFactory};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting routegroup-controller...");

    let config = ControllerConfig::from_env()?;
    let client = Client::try_default().await?;
    let metrics = ControllerMetrics::new()?;
    let queue = Arc::new(WorkQueue::new(RateLimiter::new(config.retry_base, config.retry_max)));

    let (nodes, node_task) = informers::spawn_node_reflector(client.clone());
    let index = Arc::new(ClusterIndex::new(nodes));
    let factory = Arc::new(KubeInformerFactory::new(client.clone(), queue.clone(), index.clone()));
    let registry = Arc::new(NamespaceRegistry::new(factory));

    let reconciler = Reconciler::new(
        index,
        Arc::new(RouteTlsProfiles::new(
            config.default_client_ssl.clone(),
            config.default_server_ssl.clone(),
        )),
        ReconcilerSettings {
            pool_member_type: config.pool_member_type,
            global_spec_configmap: config.global_spec_key(),
        },
    );
    let mut worker = Worker::new(
        queue.clone(),
        reconciler,
        registry.clone(),
        Arc::new(LoggingAgent),
        metrics.clone(),
        WorkerSettings {
            share_nodes: config.share_nodes,
            default_route_domain: config.default_route_domain,
        },
    );

    // The global spec is loaded before any route is synthesized
    let global_spec =
        informers::fetch_config_map(&client, &config.global_spec_namespace, &config.global_spec_name).await?;
    worker.initialise_extended_spec(global_spec.as_ref()).await?;

    let namespaces = match &config.namespace_label {
        Some(label) => informers::list_namespaces(&client, label).await?,
        None => config.watch_namespaces.clone(),
    };
    worker.set_initial_service_count(informers::count_services(&client, &namespaces).await?);
    for namespace in &namespaces {
        registry.start(namespace).await;
    }

    let mut background = vec![
        node_task,
        informers::spawn_global_spec_watcher(
            client.clone(),
            queue.clone(),
            &config.global_spec_namespace,
            &config.global_spec_name,
        ),
    ];
    if let Some(label) = &config.namespace_label {
        background.push(informers::spawn_namespace_watcher(client.clone(), queue.clone(), label));
    }

    let metrics_addr = config.metrics_addr;
    background.push(tokio::spawn(async move {
        if let Err(e) = http::serve(metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    }));

    let worker_task = tokio::spawn(async move { worker.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting...");

    queue.shut_down().await;
    if let Err(e) = worker_task.await {
        error!("Worker task failed: {}", e);
    }
    for namespace in registry.list().await {
        registry.stop(&namespace).await;
    }
    for task in background {
        task.abort();
    }

    Ok(())
}
