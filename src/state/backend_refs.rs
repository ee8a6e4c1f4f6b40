use std::{
    collections::BTreeMap,
    sync::Arc,
};

use gateway_api::apis::standard::httproutes::HTTPRouteRulesBackendRefs;
use k8s_openapi::api::core::v1::Service;
use thiserror::Error;
use tracing::debug;

use super::{
    backend_group::{BackendGroup, BackendRef},
    graph::Route,
    resolver::{self, Endpoint},
};
use crate::{common::ResourceKey, kubernetes::ClusterStore};

/// Per-resource warning messages collected while building a cycle.
pub type Warnings = BTreeMap<ResourceKey, Vec<String>>;

/// Backend state of one route: resolution errors, the resolved upstream
/// endpoints keyed by upstream name, and the backend group of every rule.
#[derive(Clone, Debug, Default)]
pub struct BackendRefs {
    pub errors: Vec<String>,
    pub resolved: BTreeMap<String, Vec<Endpoint>>,
    pub by_rule: BTreeMap<usize, BackendGroup>,
}

#[derive(Error, Debug, PartialEq)]
pub enum BackendRefError {
    #[error("the Kind must be Service; got {0}")]
    KindNotService(String),
    #[error("cross-namespace routing is not permitted; namespace {0} does not match the HTTPRoute namespace {1}")]
    CrossNamespace(String, String),
    #[error("port is missing")]
    PortMissing,
    #[error("the Service {0} does not exist")]
    ServiceNotFound(ResourceKey),
}

/// Resolves the backend refs of every route in the graph and returns the
/// collected warnings.
pub fn resolve_backend_refs(store: &dyn ClusterStore, routes: &mut BTreeMap<ResourceKey, Route>) -> Warnings {
    for (key, route) in routes.iter_mut() {
        resolve_refs_for_route(store, key, route);
    }

    let mut warnings = Warnings::new();
    for (key, route) in routes.iter() {
        for msg in &route.backend_refs.errors {
            warnings
                .entry(key.clone())
                .or_default()
                .push(format!("cannot resolve backend ref: {msg}"));
        }
    }
    warnings
}

fn resolve_refs_for_route(store: &dyn ClusterStore, route_key: &ResourceKey, route: &mut Route) {
    let source = Arc::clone(&route.source);
    let rules = source.spec.rules.as_deref().unwrap_or_default();

    for (rule_idx, rule) in rules.iter().enumerate() {
        let refs = rule.backend_refs.as_deref().unwrap_or_default();
        let mut backends = Vec::with_capacity(refs.len());

        for backend_ref in refs {
            let weight = backend_ref.weight.unwrap_or(1);

            let (service, port) = match service_and_port_from_ref(store, backend_ref, &route_key.namespace) {
                Ok(found) => found,
                Err(err) => {
                    // The slot is kept so backend indices stay stable.
                    backends.push(BackendRef {
                        weight,
                        ..Default::default()
                    });
                    route.backend_refs.errors.push(err.to_string());
                    continue;
                }
            };

            let service_key = ResourceKey::from(service.as_ref());
            let name = upstream_name(&service_key, port);
            backends.push(BackendRef {
                name: name.clone(),
                valid: true,
                weight,
            });

            let endpoints = match resolver::resolve(&service, &store.endpoint_slices(&service_key), port) {
                Ok(endpoints) => endpoints,
                Err(err) => {
                    debug!(route = %route_key, upstream = %name, "endpoint resolution failed: {err}");
                    route.backend_refs.errors.push(err.to_string());
                    Vec::new()
                }
            };

            // The endpoints are recorded even when resolution failed, so an
            // upstream is emitted for every valid Service reference.
            route.backend_refs.resolved.insert(name, endpoints);
        }

        route.backend_refs.by_rule.insert(
            rule_idx,
            BackendGroup {
                source: route_key.clone(),
                rule_idx,
                backends,
            },
        );
    }
}

fn service_and_port_from_ref(
    store: &dyn ClusterStore,
    backend_ref: &HTTPRouteRulesBackendRefs,
    route_namespace: &str,
) -> Result<(Arc<Service>, i32), BackendRefError> {
    validate_backend_ref(backend_ref, route_namespace)?;

    let service_key = ResourceKey::namespaced(&backend_ref.name, route_namespace);
    let service = store
        .service(&service_key)
        .ok_or(BackendRefError::ServiceNotFound(service_key))?;

    let port = backend_ref.port.ok_or(BackendRefError::PortMissing)?;
    Ok((service, port))
}

/// Rejects backend refs this implementation cannot route to. No cluster
/// access happens here.
pub fn validate_backend_ref(backend_ref: &HTTPRouteRulesBackendRefs, route_namespace: &str) -> Result<(), BackendRefError> {
    if let Some(kind) = backend_ref.kind.as_ref() {
        if kind != "Service" {
            return Err(BackendRefError::KindNotService(kind.clone()));
        }
    }

    if let Some(namespace) = backend_ref.namespace.as_ref() {
        if namespace != route_namespace {
            return Err(BackendRefError::CrossNamespace(namespace.clone(), route_namespace.to_owned()));
        }
    }

    if backend_ref.port.is_none() {
        return Err(BackendRefError::PortMissing);
    }

    Ok(())
}

/// Upstream names are unique per Service/port combination.
pub fn upstream_name(service: &ResourceKey, port: i32) -> String {
    format!("{}_{}_{}", service.namespace, service.name, port)
}
