use std::{fmt::Debug, sync::Arc, time::Duration};

use futures::TryStreamExt;
use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway, httproutes::HTTPRoute};
use k8s_openapi::api::{
    core::v1::{Secret, Service},
    discovery::v1::EndpointSlice,
};
use kube::{
    runtime::{
        reflector::{self, ObjectRef, Store},
        watcher, WatchStreamExt,
    },
    Api, Client, Resource,
};
use thiserror::Error;
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, warn};

use crate::common::ResourceKey;

/// Label that ties an EndpointSlice to the Service that owns it. The
/// EndpointSlice listing below is indexed by this extractor.
const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// How long the controller waits for the watch caches to sync before giving
/// up on startup.
const STORE_READY_TIMEOUT: Duration = Duration::from_secs(2 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    GatewayClass,
    Gateway,
    HttpRoute,
    Service,
    EndpointSlice,
    Secret,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A change notification from the event source. Events carry no payload:
/// every reconciliation rebuilds from the live cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ResourceKind,
}

/// Read side of the event source. One implementation wraps the live watch
/// caches; tests provide an in-memory snapshot.
pub trait ClusterStore: Send + Sync {
    fn gateway_classes(&self) -> Vec<Arc<GatewayClass>>;
    fn gateways(&self) -> Vec<Arc<Gateway>>;
    fn http_routes(&self) -> Vec<Arc<HTTPRoute>>;
    fn service(&self, key: &ResourceKey) -> Option<Arc<Service>>;
    fn secret(&self, key: &ResourceKey) -> Option<Arc<Secret>>;
    /// EndpointSlices of the given Service, via the owning-service index.
    fn endpoint_slices(&self, service: &ResourceKey) -> Vec<Arc<EndpointSlice>>;
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("timed out waiting for the watch caches to sync")]
    StoreSyncTimeout,
    #[error("a watch task stopped before its cache was ready")]
    WriterDropped,
}

/// The key the EndpointSlice index is built on.
fn owning_service(slice: &EndpointSlice) -> Option<ResourceKey> {
    let namespace = slice.meta().namespace.as_ref()?;
    let name = slice.meta().labels.as_ref()?.get(SERVICE_NAME_LABEL)?;
    Some(ResourceKey::namespaced(name, namespace))
}

/// Watch caches for every kind the control plane observes. Each cache is fed
/// by its own watcher task; the tasks forward payload-light [`ChangeEvent`]s
/// to the change processor.
pub struct KubeClusterStore {
    gateway_classes: Store<GatewayClass>,
    gateways: Store<Gateway>,
    http_routes: Store<HTTPRoute>,
    services: Store<Service>,
    endpoint_slices: Store<EndpointSlice>,
    secrets: Store<Secret>,
}

impl KubeClusterStore {
    /// Registers the watches and waits until every cache has completed its
    /// initial list. Startup fails if the caches cannot be established in
    /// time.
    pub async fn watch(client: &Client, events: mpsc::UnboundedSender<ChangeEvent>) -> Result<Self, WatchError> {
        let store = Self {
            gateway_classes: watch_resource(client, ResourceKind::GatewayClass, events.clone()),
            gateways: watch_resource(client, ResourceKind::Gateway, events.clone()),
            http_routes: watch_resource(client, ResourceKind::HttpRoute, events.clone()),
            services: watch_resource(client, ResourceKind::Service, events.clone()),
            endpoint_slices: watch_resource(client, ResourceKind::EndpointSlice, events.clone()),
            secrets: watch_resource(client, ResourceKind::Secret, events),
        };
        store.wait_ready().await?;
        Ok(store)
    }

    async fn wait_ready(&self) -> Result<(), WatchError> {
        let all_ready = async {
            self.gateway_classes.wait_until_ready().await?;
            self.gateways.wait_until_ready().await?;
            self.http_routes.wait_until_ready().await?;
            self.services.wait_until_ready().await?;
            self.endpoint_slices.wait_until_ready().await?;
            self.secrets.wait_until_ready().await?;
            Ok(())
        };
        timeout(STORE_READY_TIMEOUT, all_ready)
            .await
            .map_err(|_| WatchError::StoreSyncTimeout)?
            .map_err(|_: reflector::store::WriterDropped| WatchError::WriterDropped)
    }
}

impl ClusterStore for KubeClusterStore {
    fn gateway_classes(&self) -> Vec<Arc<GatewayClass>> {
        self.gateway_classes.state()
    }

    fn gateways(&self) -> Vec<Arc<Gateway>> {
        self.gateways.state()
    }

    fn http_routes(&self) -> Vec<Arc<HTTPRoute>> {
        self.http_routes.state()
    }

    fn service(&self, key: &ResourceKey) -> Option<Arc<Service>> {
        self.services.get(&ObjectRef::new(&key.name).within(&key.namespace))
    }

    fn secret(&self, key: &ResourceKey) -> Option<Arc<Secret>> {
        self.secrets.get(&ObjectRef::new(&key.name).within(&key.namespace))
    }

    fn endpoint_slices(&self, service: &ResourceKey) -> Vec<Arc<EndpointSlice>> {
        self.endpoint_slices
            .state()
            .into_iter()
            .filter(|slice| owning_service(slice).as_ref() == Some(service))
            .collect()
    }
}

fn watch_resource<K>(client: &Client, kind: ResourceKind, events: mpsc::UnboundedSender<ChangeEvent>) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
    K: k8s_openapi::serde::de::DeserializeOwned,
{
    let (store, mut writer) = reflector::store();
    let api: Api<K> = Api::all(client.clone());

    tokio::spawn(async move {
        let stream = watcher(api, watcher::Config::default().any_semantic()).default_backoff();
        let mut stream = std::pin::pin!(stream);
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    writer.apply_watcher_event(&event);
                    if events.send(ChangeEvent { kind }).is_err() {
                        debug!(%kind, "watch ended: change processor is gone");
                        break;
                    }
                }
                Ok(None) => {
                    debug!(%kind, "watch stream ended");
                    break;
                }
                Err(err) => {
                    warn!(%kind, error = %err, "watch error");
                }
            }
        }
    });

    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_slice_index_key() {
        let slice: EndpointSlice = serde_yaml::from_str(
            r"
            addressType: IPv4
            metadata:
              name: svc1-abc12
              namespace: test
              labels:
                kubernetes.io/service-name: svc1
            endpoints: []
            ",
        )
        .unwrap();

        assert_eq!(owning_service(&slice), Some(ResourceKey::namespaced("svc1", "test")));
    }

    #[test]
    fn endpoint_slice_without_owner_label() {
        let slice: EndpointSlice = serde_yaml::from_str(
            r"
            addressType: IPv4
            metadata:
              name: orphan
              namespace: test
            endpoints: []
            ",
        )
        .unwrap();

        assert_eq!(owning_service(&slice), None);
    }
}
