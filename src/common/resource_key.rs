use std::fmt::Display;

use gateway_api::apis::standard::{gateways::Gateway, httproutes::HTTPRoute};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{Resource, ResourceExt};
use serde::Serialize;

pub const DEFAULT_NAMESPACE_NAME: &str = "default";

/// Namespaced name of a resource in the cluster snapshot. All cross-entity
/// references in the graph are carried as keys rather than back-pointers.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn namespaced(name: &str, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&Gateway> for ResourceKey {
    fn from(value: &Gateway) -> Self {
        Self {
            namespace: value.meta().namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE_NAME.to_owned()),
            name: value.name_any(),
        }
    }
}

impl From<&HTTPRoute> for ResourceKey {
    fn from(value: &HTTPRoute) -> Self {
        Self {
            namespace: value.meta().namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE_NAME.to_owned()),
            name: value.name_any(),
        }
    }
}

impl From<&Service> for ResourceKey {
    fn from(value: &Service) -> Self {
        Self {
            namespace: value.meta().namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE_NAME.to_owned()),
            name: value.name_any(),
        }
    }
}

impl From<&Secret> for ResourceKey {
    fn from(value: &Secret) -> Self {
        Self {
            namespace: value.meta().namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE_NAME.to_owned()),
            name: value.name_any(),
        }
    }
}
