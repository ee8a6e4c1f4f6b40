use std::sync::Arc;

use itertools::Itertools;
use k8s_openapi::{
    api::{
        core::v1::{Service, ServicePort},
        discovery::v1::{Endpoint as SliceEndpoint, EndpointSlice},
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
use serde::Serialize;
use thiserror::Error;

use crate::common::ResourceKey;

/// A single address/port pair the data plane can proxy to.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct Endpoint {
    pub address: String,
    pub port: i32,
}

#[derive(Error, Debug, PartialEq)]
pub enum ResolverError {
    #[error("no valid port for Service {0} and port {1}")]
    NoMatchingPort(ResourceKey, i32),
    #[error("no ready endpoints for Service {0} and port {1}")]
    NoReadyEndpoints(ResourceKey, i32),
}

/// Flattens the ready endpoints of `service` for the given Service port out
/// of the EndpointSlices owned by it. Duplicate address/port pairs are
/// elided; order follows the slices. An upstream without ready endpoints is
/// reported as [`ResolverError::NoReadyEndpoints`], which callers downgrade
/// to a warning and an empty endpoint list.
pub fn resolve(service: &Service, slices: &[Arc<EndpointSlice>], port: i32) -> Result<Vec<Endpoint>, ResolverError> {
    let service_key = ResourceKey::from(service);

    let service_port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.iter().find(|p| p.port == port))
        .ok_or_else(|| ResolverError::NoMatchingPort(service_key.clone(), port))?;

    let endpoints: Vec<Endpoint> = slices
        .iter()
        .filter_map(|slice| matching_slice_port(service_port, slice).map(|port| (slice, port)))
        .flat_map(|(slice, port)| {
            slice
                .endpoints
                .iter()
                .filter(|endpoint| is_ready(endpoint))
                .flat_map(move |endpoint| {
                    endpoint.addresses.iter().map(move |address| Endpoint {
                        address: address.clone(),
                        port,
                    })
                })
        })
        .unique()
        .collect();

    if endpoints.is_empty() {
        return Err(ResolverError::NoReadyEndpoints(service_key, port));
    }
    Ok(endpoints)
}

/// The slice port backing the Service port: an integer target port matches
/// the slice port number, a named or absent target port matches the slice
/// port name.
fn matching_slice_port(service_port: &ServicePort, slice: &EndpointSlice) -> Option<i32> {
    for slice_port in slice.ports.as_ref()? {
        let Some(number) = slice_port.port else {
            continue;
        };
        let matched = match service_port.target_port.as_ref() {
            Some(IntOrString::Int(target)) => number == *target,
            Some(IntOrString::String(_)) | None => slice_port.name == service_port.name,
        };
        if matched {
            return Some(number);
        }
    }
    None
}

fn is_ready(endpoint: &SliceEndpoint) -> bool {
    endpoint
        .conditions
        .as_ref()
        .and_then(|conditions| conditions.ready)
        .unwrap_or(false)
}
