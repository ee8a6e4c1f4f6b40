use std::sync::Arc;

use kube::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;
use typed_builder::TypedBuilder;

mod common;
mod kubernetes;
mod state;

pub use common::{ResourceKey, INVALID_BACKEND_REF, LOOPBACK_502_SERVER, WILDCARD_HOSTNAME};
pub use kubernetes::{ChangeEvent, ClusterStore, KubeClusterStore, ResourceKind, WatchError};
pub use state::{
    build_configuration, build_graph, build_locations, build_statuses, invalid_backend_upstream, resolve_backend_refs,
    validate_backend_ref, BackendGroup, BackendRef, BackendRefError, BackendRefs, ChangeProcessor, ConfigSink,
    Configuration, ConfigurationError, Endpoint, Filters, GatewayClassInfo, GatewayClassStatus, GatewayInfo, Graph,
    Listener, ListenerStatus, Location, LoggingSink, LoggingStatusWriter, MatchRule, PathRule, ResolverError, Return,
    Route, RouteStatus, SplitClient, SplitClientDistribution, Ssl, Statuses, StatusWriter, Upstream, UpstreamServer,
    VirtualServer, Warnings,
};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime configuration of the controller instance.
#[derive(Debug, TypedBuilder, Deserialize)]
pub struct ControllerConfig {
    /// Controller name this instance claims on GatewayClasses.
    pub gateway_class: String,
}

#[derive(Error, Debug)]
enum ControllerConfigError {
    #[error("gateway class controller name must not be empty")]
    GatewayClass,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gateway_class.is_empty() {
            return Err(ControllerConfigError::GatewayClass.into());
        }
        Ok(())
    }
}

/// Wires the watches to the change processor and runs until the event
/// stream ends. Startup fails if the watch caches cannot be established.
pub async fn start(
    config: ControllerConfig,
    sink: impl ConfigSink + 'static,
    status_writer: impl StatusWriter + 'static,
) -> Result<()> {
    config.validate()?;
    info!("portcullis started");

    let client = Client::try_default().await?;

    let (event_sender, event_receiver) = mpsc::unbounded_channel();
    let store = KubeClusterStore::watch(&client, event_sender).await?;

    let processor = ChangeProcessor::builder()
        .store(Arc::new(store))
        .events(event_receiver)
        .controller_name(config.gateway_class)
        .sink(sink)
        .status_writer(status_writer)
        .build();

    processor.start().await?;
    info!("portcullis stopped");
    Ok(())
}
