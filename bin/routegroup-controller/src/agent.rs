//! Device agent that logs every snapshot it receives

use async_trait::async_trait;
use routegroup_core::{ConfigAgent, ConfigRequest};
use tracing::{debug, info, warn};

/// LoggingAgent stands in for the device connector: it reports a summary
/// of each request and dumps the full payload at debug level.
#[derive(Clone, Debug, Default)]
pub struct LoggingAgent;

#[async_trait]
impl ConfigAgent for LoggingAgent {
    async fn post_config(&self, request: ConfigRequest) {
        let virtual_servers: usize = request.ltm_config.values().map(|vs| vs.len()).sum();
        info!(
            request_id = request.request_id,
            partitions = request.ltm_config.len(),
            virtual_servers,
            "Received config request"
        );

        match serde_json::to_string(&request) {
            Ok(payload) => debug!(request_id = request.request_id, "{}", payload),
            Err(e) => warn!("Failed to serialize config request {}: {}", request.request_id, e),
        }
    }
}
