use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;

use super::{backend_refs::Warnings, graph::Graph};
use crate::common::ResourceKey;

/// Condition records produced alongside the configuration. The status
/// writer collaborator translates them into API conditions; the core only
/// decides what they say.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statuses {
    pub gateway_class: Option<GatewayClassStatus>,
    pub ignored_gateways: BTreeMap<ResourceKey, String>,
    /// Listener conditions of the selected Gateway, keyed by section name.
    pub listeners: BTreeMap<String, ListenerStatus>,
    pub routes: BTreeMap<ResourceKey, RouteStatus>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayClassStatus {
    pub name: String,
    pub accepted: bool,
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerStatus {
    pub accepted: bool,
    pub message: Option<String>,
    pub attached_routes: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteStatus {
    pub attached_section_refs: BTreeSet<String>,
    pub invalid_section_refs: BTreeSet<String>,
    pub warnings: Vec<String>,
}

pub fn build_statuses(graph: &Graph, warnings: &Warnings) -> Statuses {
    let mut statuses = Statuses {
        gateway_class: graph.gateway_class.as_ref().map(|class| GatewayClassStatus {
            name: class.source.name_any(),
            accepted: class.valid,
            message: class.error.clone(),
        }),
        ignored_gateways: graph.ignored_gateways.clone(),
        listeners: BTreeMap::new(),
        routes: BTreeMap::new(),
    };

    if let Some(gateway) = graph.gateway.as_ref() {
        for (name, listener) in &gateway.listeners {
            statuses.listeners.insert(
                name.clone(),
                ListenerStatus {
                    accepted: listener.valid,
                    message: listener.error.clone(),
                    attached_routes: listener.routes.len(),
                },
            );
        }
    }

    for (key, route) in &graph.routes {
        statuses.routes.insert(
            key.clone(),
            RouteStatus {
                attached_section_refs: route.valid_section_refs.clone(),
                invalid_section_refs: route.invalid_section_refs.clone(),
                warnings: warnings.get(key).cloned().unwrap_or_default(),
            },
        );
    }

    statuses
}
