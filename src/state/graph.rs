use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use gateway_api::apis::standard::{
    gatewayclasses::GatewayClass,
    gateways::{Gateway, GatewayListeners, GatewayListenersTlsCertificateRefs, GatewayListenersTlsMode},
    httproutes::{HTTPRoute, HTTPRouteParentRefs},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tracing::debug;

use super::backend_refs::BackendRefs;
use crate::{
    common::{ResourceKey, WILDCARD_HOSTNAME},
    kubernetes::ClusterStore,
};

const HTTP_PORT: i32 = 80;
const HTTPS_PORT: i32 = 443;

/// The validated binding graph of one reconciliation cycle. Edges point
/// downward only; routes are looked up by key from the listeners that bind
/// them.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub gateway_class: Option<GatewayClassInfo>,
    pub gateway: Option<GatewayInfo>,
    pub ignored_gateways: BTreeMap<ResourceKey, String>,
    pub routes: BTreeMap<ResourceKey, Route>,
}

#[derive(Clone, Debug)]
pub struct GatewayClassInfo {
    pub source: Arc<GatewayClass>,
    pub valid: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct GatewayInfo {
    pub source: Arc<Gateway>,
    /// Listeners keyed by section name.
    pub listeners: BTreeMap<String, Listener>,
}

#[derive(Clone, Debug)]
pub struct Listener {
    pub source: GatewayListeners,
    pub valid: bool,
    pub error: Option<String>,
    /// Where the data plane finds the terminating certificate, for HTTPS
    /// listeners that validated.
    pub secret_path: Option<String>,
    /// Bound routes keyed by namespaced name, each with the hostnames the
    /// binding accepted.
    pub routes: BTreeMap<ResourceKey, BTreeSet<String>>,
}

impl Listener {
    pub fn is_https(&self) -> bool {
        self.source.protocol == "HTTPS"
    }

    pub fn hostname(&self) -> Option<&str> {
        self.source.hostname.as_deref().filter(|hostname| !hostname.is_empty())
    }

    /// Union of the hostnames accepted across all bound routes.
    pub fn accepted_hostnames(&self) -> BTreeSet<String> {
        self.routes.values().flatten().cloned().collect()
    }
}

#[derive(Clone, Debug)]
pub struct Route {
    pub source: Arc<HTTPRoute>,
    pub valid_section_refs: BTreeSet<String>,
    pub invalid_section_refs: BTreeSet<String>,
    pub backend_refs: BackendRefs,
}

impl Route {
    pub fn new(source: Arc<HTTPRoute>) -> Self {
        Self {
            source,
            valid_section_refs: BTreeSet::new(),
            invalid_section_refs: BTreeSet::new(),
            backend_refs: BackendRefs::default(),
        }
    }

    /// Route hostnames considered for intersection. IP address literals are
    /// not legal hostnames and are dropped.
    pub fn hostnames(&self) -> Vec<String> {
        self.source
            .spec
            .hostnames
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|hostname| hostname.parse::<IpAddr>().is_err())
            .cloned()
            .collect()
    }

    pub fn creation_timestamp(&self) -> DateTime<Utc> {
        creation_timestamp(&self.source.metadata)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ListenerError {
    #[error("protocol {0} is not supported")]
    UnsupportedProtocol(String),
    #[error("port {0} is not supported for {1} listeners, only {2}")]
    UnsupportedPort(i32, String, i32),
    #[error("TLS configuration is missing")]
    TlsConfigMissing,
    #[error("TLS mode must be Terminate")]
    TlsModeNotTerminate,
    #[error("TLS configuration has no certificate refs")]
    NoCertificateRefs,
    #[error("invalid certificate ref {0}: {1}")]
    InvalidCertificateRef(String, CertificateError),
    #[error("conflicts with listener {0}: same port and hostname")]
    Conflict(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum CertificateError {
    #[error("kind must be Secret")]
    KindNotSecret,
    #[error("namespace must be the Gateway namespace")]
    CrossNamespace,
    #[error("the Secret {0} does not exist")]
    SecretNotFound(ResourceKey),
    #[error("secret type must be kubernetes.io/tls")]
    WrongType,
    #[error("secret does not contain a valid tls.crt/tls.key pair")]
    InvalidKeyPair,
}

/// Builds the binding graph from the current snapshot. Purely computational;
/// the result is deterministic for a given snapshot.
pub fn build_graph(store: &dyn ClusterStore, controller_name: &str) -> Graph {
    let Some(gateway_class) = select_gateway_class(store.gateway_classes(), controller_name) else {
        debug!(controller_name, "no GatewayClass claims this controller");
        return Graph::default();
    };

    let (selected, ignored_gateways) = select_gateway(store.gateways(), &gateway_class.source.name_any());

    let mut graph = Graph {
        gateway_class: Some(gateway_class),
        gateway: None,
        ignored_gateways,
        routes: BTreeMap::new(),
    };

    let Some(gateway_source) = selected else {
        return graph;
    };

    let mut listeners = build_listeners(store, &gateway_source);
    for route_source in store.http_routes() {
        bind_route(&gateway_source, &mut listeners, &mut graph.routes, route_source);
    }

    graph.gateway = Some(GatewayInfo {
        source: gateway_source,
        listeners,
    });
    graph
}

fn select_gateway_class(classes: Vec<Arc<GatewayClass>>, controller_name: &str) -> Option<GatewayClassInfo> {
    let mut matching: Vec<_> = classes
        .into_iter()
        .filter(|class| class.spec.controller_name == controller_name)
        .collect();
    matching.sort_by_key(|class| class.name_any());

    let source = matching.into_iter().next()?;
    let error = source
        .spec
        .parameters_ref
        .as_ref()
        .map(|_| "parametersRef is not supported".to_owned());

    Some(GatewayClassInfo {
        valid: error.is_none(),
        error,
        source,
    })
}

/// At most one Gateway is programmed per cycle: the oldest one referencing
/// the class, ties broken by namespaced name.
fn select_gateway(gateways: Vec<Arc<Gateway>>, class_name: &str) -> (Option<Arc<Gateway>>, BTreeMap<ResourceKey, String>) {
    let mut candidates: Vec<_> = gateways
        .into_iter()
        .filter(|gateway| gateway.spec.gateway_class_name == class_name)
        .collect();
    candidates.sort_by(|a, b| {
        creation_timestamp(&a.metadata)
            .cmp(&creation_timestamp(&b.metadata))
            .then_with(|| ResourceKey::from(a.as_ref()).cmp(&ResourceKey::from(b.as_ref())))
    });

    let mut candidates = candidates.into_iter();
    let selected = candidates.next();

    let mut ignored = BTreeMap::new();
    if let Some(winner) = selected.as_ref().map(|gateway| ResourceKey::from(gateway.as_ref())) {
        for gateway in candidates {
            ignored.insert(
                ResourceKey::from(gateway.as_ref()),
                format!("this Gateway is ignored: the controller uses Gateway {winner}"),
            );
        }
    }
    (selected, ignored)
}

fn creation_timestamp(meta: &ObjectMeta) -> DateTime<Utc> {
    meta.creation_timestamp
        .as_ref()
        .map_or(DateTime::<Utc>::MIN_UTC, |time| time.0)
}

fn build_listeners(store: &dyn ClusterStore, gateway: &Gateway) -> BTreeMap<String, Listener> {
    let gateway_namespace = ResourceKey::from(gateway).namespace;

    let mut listeners = BTreeMap::new();
    for source in &gateway.spec.listeners {
        let mut listener = Listener {
            source: source.clone(),
            valid: true,
            error: None,
            secret_path: None,
            routes: BTreeMap::new(),
        };

        match validate_listener(store, &gateway_namespace, source) {
            Ok(secret_path) => listener.secret_path = secret_path,
            Err(err) => {
                debug!(listener = %source.name, "listener rejected: {err}");
                listener.valid = false;
                listener.error = Some(err.to_string());
            }
        }

        listeners.insert(source.name.clone(), listener);
    }

    invalidate_conflicting_listeners(&mut listeners);
    listeners
}

fn validate_listener(
    store: &dyn ClusterStore,
    gateway_namespace: &str,
    listener: &GatewayListeners,
) -> Result<Option<String>, ListenerError> {
    match listener.protocol.as_str() {
        "HTTP" => {
            if listener.port != HTTP_PORT {
                return Err(ListenerError::UnsupportedPort(listener.port, "HTTP".to_owned(), HTTP_PORT));
            }
            Ok(None)
        }
        "HTTPS" => {
            if listener.port != HTTPS_PORT {
                return Err(ListenerError::UnsupportedPort(listener.port, "HTTPS".to_owned(), HTTPS_PORT));
            }

            let tls = listener.tls.as_ref().ok_or(ListenerError::TlsConfigMissing)?;
            // An absent mode defaults to Terminate per the API.
            if matches!(tls.mode, Some(GatewayListenersTlsMode::Passthrough)) {
                return Err(ListenerError::TlsModeNotTerminate);
            }

            let certificate_refs = tls.certificate_refs.as_deref().unwrap_or_default();
            if certificate_refs.is_empty() {
                return Err(ListenerError::NoCertificateRefs);
            }

            let mut secret_path = None;
            for certificate_ref in certificate_refs {
                let path = validate_certificate_ref(store, gateway_namespace, certificate_ref)
                    .map_err(|err| ListenerError::InvalidCertificateRef(certificate_ref.name.clone(), err))?;
                secret_path.get_or_insert(path);
            }
            Ok(secret_path)
        }
        other => Err(ListenerError::UnsupportedProtocol(other.to_owned())),
    }
}

fn validate_certificate_ref(
    store: &dyn ClusterStore,
    gateway_namespace: &str,
    certificate_ref: &GatewayListenersTlsCertificateRefs,
) -> Result<String, CertificateError> {
    if let Some(kind) = certificate_ref.kind.as_ref() {
        if kind != "Secret" {
            return Err(CertificateError::KindNotSecret);
        }
    }
    if let Some(namespace) = certificate_ref.namespace.as_ref() {
        if namespace != gateway_namespace {
            return Err(CertificateError::CrossNamespace);
        }
    }

    let key = ResourceKey::namespaced(&certificate_ref.name, gateway_namespace);
    let secret = store.secret(&key).ok_or_else(|| CertificateError::SecretNotFound(key.clone()))?;

    if secret.type_.as_deref() != Some("kubernetes.io/tls") {
        return Err(CertificateError::WrongType);
    }

    let data = secret.data.as_ref().ok_or(CertificateError::InvalidKeyPair)?;
    let (Some(certificate), Some(private_key)) = (data.get("tls.crt"), data.get("tls.key")) else {
        return Err(CertificateError::InvalidKeyPair);
    };
    if CertificateDer::from_pem_slice(&certificate.0).is_err() || PrivateKeyDer::from_pem_slice(&private_key.0).is_err() {
        return Err(CertificateError::InvalidKeyPair);
    }

    Ok(format!("/etc/nginx/secrets/{}_{}", key.namespace, key.name))
}

/// Listeners that share a port and a hostname shadow each other, so both are
/// taken out of service. A listener with a distinct hostname on the same
/// port stays independent.
fn invalidate_conflicting_listeners(listeners: &mut BTreeMap<String, Listener>) {
    let names: Vec<String> = listeners.keys().cloned().collect();

    let mut conflicts = Vec::new();
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            let first = &listeners[a];
            let second = &listeners[b];
            if first.source.port == second.source.port && first.hostname() == second.hostname() {
                conflicts.push((a.clone(), b.clone()));
            }
        }
    }

    for (a, b) in conflicts {
        mark_conflicted(listeners, &a, &b);
        mark_conflicted(listeners, &b, &a);
    }
}

fn mark_conflicted(listeners: &mut BTreeMap<String, Listener>, name: &str, other: &str) {
    if let Some(listener) = listeners.get_mut(name) {
        listener.valid = false;
        if listener.error.is_none() {
            listener.error = Some(ListenerError::Conflict(other.to_owned()).to_string());
        }
    }
}

fn bind_route(
    gateway: &Gateway,
    listeners: &mut BTreeMap<String, Listener>,
    routes: &mut BTreeMap<ResourceKey, Route>,
    source: Arc<HTTPRoute>,
) {
    let route_key = ResourceKey::from(source.as_ref());
    let gateway_key = ResourceKey::from(gateway);

    let parent_refs = source.spec.parent_refs.clone().unwrap_or_default();
    let gateway_refs: Vec<&HTTPRouteParentRefs> = parent_refs
        .iter()
        .filter(|parent_ref| references_gateway(parent_ref, &route_key.namespace, &gateway_key))
        .collect();
    if gateway_refs.is_empty() {
        return;
    }

    let mut route = Route::new(Arc::clone(&source));
    let route_hostnames = route.hostnames();

    for parent_ref in gateway_refs {
        match parent_ref.section_name.as_ref() {
            Some(section_name) => match listeners.get_mut(section_name) {
                Some(listener) if listener.valid => {
                    route.valid_section_refs.insert(section_name.clone());
                    attach(listener, &route_key, &route_hostnames);
                }
                _ => {
                    route.invalid_section_refs.insert(section_name.clone());
                }
            },
            // A parent ref without a section name attaches to every
            // listener that accepts the route's hostnames.
            None => {
                for listener in listeners.values_mut().filter(|listener| listener.valid) {
                    attach(listener, &route_key, &route_hostnames);
                }
            }
        }
    }

    routes.insert(route_key, route);
}

/// An empty intersection drops the binding silently: the route simply does
/// not attach to this listener.
fn attach(listener: &mut Listener, route_key: &ResourceKey, route_hostnames: &[String]) {
    let accepted = accepted_hostnames(listener.hostname(), route_hostnames);
    if accepted.is_empty() {
        return;
    }
    listener.routes.entry(route_key.clone()).or_default().extend(accepted);
}

fn references_gateway(parent_ref: &HTTPRouteParentRefs, route_namespace: &str, gateway: &ResourceKey) -> bool {
    let ref_namespace = parent_ref.namespace.as_deref().unwrap_or(route_namespace);
    parent_ref.name == gateway.name && ref_namespace == gateway.namespace
}

/// Intersection of a listener hostname with the route's hostnames, the more
/// specific name winning on wildcard overlap.
fn accepted_hostnames(listener_hostname: Option<&str>, route_hostnames: &[String]) -> BTreeSet<String> {
    let mut accepted = BTreeSet::new();

    if route_hostnames.is_empty() {
        accepted.insert(listener_hostname.unwrap_or(WILDCARD_HOSTNAME).to_owned());
        return accepted;
    }

    let Some(listener_hostname) = listener_hostname else {
        accepted.extend(route_hostnames.iter().cloned());
        return accepted;
    };

    for route_hostname in route_hostnames {
        if let Some(hostname) = intersect(listener_hostname, route_hostname) {
            accepted.insert(hostname);
        }
    }
    accepted
}

fn intersect(listener_hostname: &str, route_hostname: &str) -> Option<String> {
    if listener_hostname == route_hostname {
        return Some(route_hostname.to_owned());
    }
    if wildcard_matches(listener_hostname, route_hostname) {
        return Some(route_hostname.to_owned());
    }
    if wildcard_matches(route_hostname, listener_hostname) {
        return Some(listener_hostname.to_owned());
    }
    None
}

/// `*.example.com` covers `foo.example.com` and `a.b.example.com`, but not
/// `example.com` itself.
fn wildcard_matches(pattern: &str, hostname: &str) -> bool {
    let Some(suffix) = pattern.strip_prefix("*.") else {
        return false;
    };
    hostname
        .strip_suffix(suffix)
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|labels| !labels.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_util::{http_route, MemoryStore};

    const CONTROLLER_NAME: &str = "example.com/gateway-controller";

    fn claimed_class() -> &'static str {
        r"
        apiVersion: gateway.networking.k8s.io/v1
        kind: GatewayClass
        metadata:
          name: portcullis
        spec:
          controllerName: example.com/gateway-controller
        "
    }

    fn store_with_gateway(listeners_yaml: &str) -> MemoryStore {
        let mut store = MemoryStore::default();
        store.add_gateway_class(claimed_class());
        store.add_gateway(&format!(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: Gateway
            metadata:
              name: gateway
              namespace: test
            spec:
              gatewayClassName: portcullis
              listeners:
{listeners_yaml}
            ",
        ));
        store
    }

    #[test]
    fn no_matching_gateway_class_yields_an_empty_graph() {
        let mut store = MemoryStore::default();
        store.add_gateway_class(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: GatewayClass
            metadata:
              name: other
            spec:
              controllerName: example.com/other-controller
            ",
        );

        let graph = build_graph(&store, CONTROLLER_NAME);
        assert!(graph.gateway_class.is_none());
        assert!(graph.gateway.is_none());
        assert!(graph.routes.is_empty());
    }

    #[test]
    fn gateway_class_with_parameters_ref_is_invalid() {
        let mut store = MemoryStore::default();
        store.add_gateway_class(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: GatewayClass
            metadata:
              name: portcullis
            spec:
              controllerName: example.com/gateway-controller
              parametersRef:
                group: example.com
                kind: Config
                name: config
            ",
        );

        let graph = build_graph(&store, CONTROLLER_NAME);
        let class = graph.gateway_class.unwrap();
        assert!(!class.valid);
        assert_eq!(class.error.as_deref(), Some("parametersRef is not supported"));
    }

    #[test]
    fn oldest_gateway_wins_then_namespaced_name() {
        let mut store = MemoryStore::default();
        store.add_gateway_class(claimed_class());
        store.add_gateway(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: Gateway
            metadata:
              name: newer
              namespace: test
              creationTimestamp: '2022-08-15T11:30:00Z'
            spec:
              gatewayClassName: portcullis
              listeners:
              - name: http
                port: 80
                protocol: HTTP
            ",
        );
        store.add_gateway(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: Gateway
            metadata:
              name: older
              namespace: test
              creationTimestamp: '2022-08-14T11:30:00Z'
            spec:
              gatewayClassName: portcullis
              listeners:
              - name: http
                port: 80
                protocol: HTTP
            ",
        );
        store.add_gateway(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: Gateway
            metadata:
              name: also-older
              namespace: test
              creationTimestamp: '2022-08-14T11:30:00Z'
            spec:
              gatewayClassName: portcullis
              listeners:
              - name: http
                port: 80
                protocol: HTTP
            ",
        );

        let graph = build_graph(&store, CONTROLLER_NAME);
        let selected = graph.gateway.unwrap();
        assert_eq!(ResourceKey::from(selected.source.as_ref()), ResourceKey::namespaced("also-older", "test"));

        assert_eq!(graph.ignored_gateways.len(), 2);
        assert_eq!(
            graph.ignored_gateways.get(&ResourceKey::namespaced("newer", "test")).unwrap(),
            "this Gateway is ignored: the controller uses Gateway test/also-older",
        );
    }

    #[test]
    fn http_listener_on_unsupported_port_is_invalid() {
        let store = store_with_gateway(
            r"
              - name: http
                port: 8080
                protocol: HTTP
            ",
        );
        let graph = build_graph(&store, CONTROLLER_NAME);
        let listener = &graph.gateway.unwrap().listeners["http"];
        assert!(!listener.valid);
        assert_eq!(listener.error.as_deref(), Some("port 8080 is not supported for HTTP listeners, only 80"));
    }

    #[test]
    fn https_listener_with_valid_secret_records_the_secret_path() {
        let mut store = store_with_gateway(
            r"
              - name: https
                port: 443
                protocol: HTTPS
                hostname: secure.example.com
                tls:
                  mode: Terminate
                  certificateRefs:
                  - kind: Secret
                    name: cafe-secret
            ",
        );
        store.add_tls_secret("cafe-secret", "test");

        let graph = build_graph(&store, CONTROLLER_NAME);
        let listener = &graph.gateway.unwrap().listeners["https"];
        assert!(listener.valid);
        assert_eq!(listener.secret_path.as_deref(), Some("/etc/nginx/secrets/test_cafe-secret"));
    }

    #[test]
    fn https_listener_with_missing_secret_is_invalid() {
        let store = store_with_gateway(
            r"
              - name: https
                port: 443
                protocol: HTTPS
                tls:
                  mode: Terminate
                  certificateRefs:
                  - kind: Secret
                    name: dne
            ",
        );
        let graph = build_graph(&store, CONTROLLER_NAME);
        let listener = &graph.gateway.unwrap().listeners["https"];
        assert!(!listener.valid);
        assert_eq!(
            listener.error.as_deref(),
            Some("invalid certificate ref dne: the Secret test/dne does not exist"),
        );
        assert!(listener.secret_path.is_none());
    }

    #[test]
    fn listeners_sharing_port_and_hostname_conflict() {
        let mut store = store_with_gateway(
            r"
              - name: https-one
                port: 443
                protocol: HTTPS
                tls:
                  mode: Terminate
                  certificateRefs:
                  - kind: Secret
                    name: cafe-secret
              - name: https-two
                port: 443
                protocol: HTTPS
                tls:
                  mode: Terminate
                  certificateRefs:
                  - kind: Secret
                    name: cafe-secret
              - name: https-three
                port: 443
                protocol: HTTPS
                hostname: other.example.com
                tls:
                  mode: Terminate
                  certificateRefs:
                  - kind: Secret
                    name: cafe-secret
            ",
        );
        store.add_tls_secret("cafe-secret", "test");

        let graph = build_graph(&store, CONTROLLER_NAME);
        let listeners = graph.gateway.unwrap().listeners;
        assert!(!listeners["https-one"].valid);
        assert!(!listeners["https-two"].valid);
        assert_eq!(
            listeners["https-one"].error.as_deref(),
            Some("conflicts with listener https-two: same port and hostname"),
        );
        // A distinct hostname keeps the third listener independent.
        assert!(listeners["https-three"].valid);
    }

    #[test]
    fn route_binds_through_valid_section_refs_and_records_invalid_ones() {
        let mut store = store_with_gateway(
            r"
              - name: http
                port: 80
                protocol: HTTP
                hostname: '*.example.com'
            ",
        );
        store.add_http_route(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: HTTPRoute
            metadata:
              name: hr1
              namespace: test
            spec:
              parentRefs:
              - name: gateway
                sectionName: http
              - name: gateway
                sectionName: dne
              hostnames:
              - foo.example.com
              - unrelated.net
              rules:
              - matches:
                - path:
                    type: PathPrefix
                    value: /
            ",
        );

        let graph = build_graph(&store, CONTROLLER_NAME);
        let route_key = ResourceKey::namespaced("hr1", "test");
        let route = graph.routes.get(&route_key).unwrap();
        assert_eq!(route.valid_section_refs, BTreeSet::from(["http".to_owned()]));
        assert_eq!(route.invalid_section_refs, BTreeSet::from(["dne".to_owned()]));

        let listener = &graph.gateway.unwrap().listeners["http"];
        assert_eq!(
            listener.routes.get(&route_key).unwrap(),
            &BTreeSet::from(["foo.example.com".to_owned()]),
        );
    }

    #[test]
    fn empty_hostname_intersection_drops_the_binding_silently() {
        let mut store = store_with_gateway(
            r"
              - name: http
                port: 80
                protocol: HTTP
                hostname: cafe.example.com
            ",
        );
        store.add_http_route(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: HTTPRoute
            metadata:
              name: hr1
              namespace: test
            spec:
              parentRefs:
              - name: gateway
                sectionName: http
              hostnames:
              - tea.example.com
              rules:
              - matches:
                - path:
                    type: PathPrefix
                    value: /
            ",
        );

        let graph = build_graph(&store, CONTROLLER_NAME);
        let route_key = ResourceKey::namespaced("hr1", "test");
        let route = graph.routes.get(&route_key).unwrap();
        // The section ref stays valid; only the binding is dropped.
        assert_eq!(route.valid_section_refs, BTreeSet::from(["http".to_owned()]));
        assert!(route.invalid_section_refs.is_empty());
        assert!(graph.gateway.unwrap().listeners["http"].routes.is_empty());
    }

    #[test]
    fn parent_ref_without_section_name_binds_to_all_accepting_listeners() {
        let store = {
            let mut store = store_with_gateway(
                r"
                  - name: http-one
                    port: 80
                    protocol: HTTP
                    hostname: one.example.com
                  - name: http-two
                    port: 80
                    protocol: HTTP
                    hostname: two.example.com
                ",
            );
            store.add_http_route(
                r"
                apiVersion: gateway.networking.k8s.io/v1
                kind: HTTPRoute
                metadata:
                  name: hr1
                  namespace: test
                spec:
                  parentRefs:
                  - name: gateway
                  hostnames:
                  - one.example.com
                  rules:
                  - matches:
                    - path:
                        type: PathPrefix
                        value: /
                ",
            );
            store
        };

        let graph = build_graph(&store, CONTROLLER_NAME);
        let route_key = ResourceKey::namespaced("hr1", "test");
        let listeners = graph.gateway.unwrap().listeners;
        assert!(listeners["http-one"].routes.contains_key(&route_key));
        assert!(!listeners["http-two"].routes.contains_key(&route_key));
    }

    #[test]
    fn route_without_matching_parent_ref_is_not_considered() {
        let mut store = store_with_gateway(
            r"
              - name: http
                port: 80
                protocol: HTTP
            ",
        );
        store.add_http_route(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: HTTPRoute
            metadata:
              name: hr1
              namespace: test
            spec:
              parentRefs:
              - name: some-other-gateway
              rules:
              - matches:
                - path:
                    type: PathPrefix
                    value: /
            ",
        );

        let graph = build_graph(&store, CONTROLLER_NAME);
        assert!(graph.routes.is_empty());
    }

    #[test]
    fn hostname_intersection_rules() {
        // No route hostnames: the listener hostname (or the wildcard
        // sentinel) is accepted.
        assert_eq!(
            accepted_hostnames(Some("cafe.example.com"), &[]),
            BTreeSet::from(["cafe.example.com".to_owned()]),
        );
        assert_eq!(accepted_hostnames(None, &[]), BTreeSet::from([WILDCARD_HOSTNAME.to_owned()]));

        // No listener hostname: all route hostnames are accepted.
        assert_eq!(
            accepted_hostnames(None, &["a.example.com".to_owned(), "b.example.com".to_owned()]),
            BTreeSet::from(["a.example.com".to_owned(), "b.example.com".to_owned()]),
        );

        // Wildcard listener: the more specific route hostname wins; the
        // bare domain does not match.
        assert_eq!(
            accepted_hostnames(
                Some("*.example.com"),
                &["foo.example.com".to_owned(), "example.com".to_owned(), "a.b.example.com".to_owned()],
            ),
            BTreeSet::from(["foo.example.com".to_owned(), "a.b.example.com".to_owned()]),
        );

        // Wildcard route hostname against a concrete listener: the listener
        // name is the more specific one.
        assert_eq!(
            accepted_hostnames(Some("cafe.example.com"), &["*.example.com".to_owned()]),
            BTreeSet::from(["cafe.example.com".to_owned()]),
        );

        assert!(accepted_hostnames(Some("cafe.example.com"), &["tea.example.com".to_owned()]).is_empty());
    }

    #[test]
    fn ip_literal_route_hostnames_are_ignored() {
        let source = http_route(
            r"
            apiVersion: gateway.networking.k8s.io/v1
            kind: HTTPRoute
            metadata:
              name: hr1
              namespace: test
            spec:
              parentRefs:
              - name: gateway
              hostnames:
              - 10.0.0.1
              - cafe.example.com
            ",
        );
        let route = Route::new(Arc::new(source));
        assert_eq!(route.hostnames(), vec!["cafe.example.com".to_owned()]);
    }
}
