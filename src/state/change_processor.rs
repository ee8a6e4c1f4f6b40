use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use typed_builder::TypedBuilder;

use super::{
    backend_refs::resolve_backend_refs,
    configuration::{build_configuration, Configuration, ConfigurationError},
    graph::build_graph,
    statuses::{build_statuses, Statuses},
};
use crate::kubernetes::{ChangeEvent, ClusterStore};

/// Output collaborator that renders and applies the configuration. Owns the
/// value after publication.
#[async_trait]
pub trait ConfigSink: Send + Sync {
    async fn publish(&self, configuration: Configuration);
}

/// Output collaborator that writes conditions back to the API server.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn apply(&self, statuses: Statuses);
}

/// The single writer of the control plane: consumes change events in
/// arrival order and runs one rebuild-resolve-emit cycle per event. No
/// state survives between cycles.
#[derive(TypedBuilder)]
pub struct ChangeProcessor<S, P, W> {
    store: Arc<S>,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    controller_name: String,
    sink: P,
    status_writer: W,
}

impl<S, P, W> ChangeProcessor<S, P, W>
where
    S: ClusterStore,
    P: ConfigSink,
    W: StatusWriter,
{
    pub async fn start(mut self) -> crate::Result<()> {
        info!("change processor started");
        while let Some(event) = self.events.recv().await {
            debug!(kind = %event.kind, "rebuilding configuration");
            match self.process() {
                Ok((configuration, statuses)) => {
                    self.sink.publish(configuration).await;
                    self.status_writer.apply(statuses).await;
                }
                Err(err) => {
                    // nothing partial is emitted; the next event retries
                    // from a fresh snapshot
                    error!("configuration cycle aborted: {err}");
                }
            }
        }
        info!("change processor stopped");
        Ok(())
    }

    fn process(&self) -> Result<(Configuration, Statuses), ConfigurationError> {
        let mut graph = build_graph(self.store.as_ref(), &self.controller_name);
        let warnings = resolve_backend_refs(self.store.as_ref(), &mut graph.routes);
        let configuration = build_configuration(&graph)?;
        let statuses = build_statuses(&graph, &warnings);
        Ok((configuration, statuses))
    }
}

/// Publishes configurations to the log. Deployments that drive a data plane
/// wire a templating sink here instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl ConfigSink for LoggingSink {
    async fn publish(&self, configuration: Configuration) {
        info!(
            http_servers = configuration.http_servers.len(),
            ssl_servers = configuration.ssl_servers.len(),
            upstreams = configuration.upstreams.len(),
            backend_groups = configuration.backend_groups.len(),
            "configuration published",
        );
        debug!("{configuration:#?}");
    }
}

/// Reports condition records to the log instead of the API server.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingStatusWriter;

#[async_trait]
impl StatusWriter for LoggingStatusWriter {
    async fn apply(&self, statuses: Statuses) {
        info!(
            listeners = statuses.listeners.len(),
            routes = statuses.routes.len(),
            "statuses recorded",
        );
        debug!("{statuses:#?}");
    }
}
