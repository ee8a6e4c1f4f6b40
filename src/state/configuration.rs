use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use gateway_api::apis::standard::httproutes::{
    HTTPRouteRulesFilters, HTTPRouteRulesFiltersRequestRedirect, HTTPRouteRulesFiltersRequestRedirectScheme,
    HTTPRouteRulesFiltersType, HTTPRouteRulesMatches, HTTPRouteRulesMatchesHeadersType, HTTPRouteRulesMatchesMethod,
    HTTPRouteRulesMatchesPath, HTTPRouteRulesMatchesPathType, HTTPRouteRulesMatchesQueryParamsType,
};
use serde::Serialize;
use thiserror::Error;

use super::{
    backend_group::{BackendGroup, BackendRef},
    graph::{GatewayInfo, Graph, Listener, Route},
    resolver::Endpoint,
};
use crate::common::{ResourceKey, INVALID_BACKEND_REF, LOOPBACK_502_SERVER, WILDCARD_HOSTNAME};

const STATUS_FOUND: u16 = 302;
const STATUS_NOT_FOUND: u16 = 404;

const HTTP_LISTENER_PORT: i32 = 80;
const HTTPS_LISTENER_PORT: i32 = 443;

/// The intermediate representation handed to the config sink. Every ordered
/// collection is sorted by an explicit comparator so identical snapshots
/// produce identical output.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Configuration {
    pub http_servers: Vec<VirtualServer>,
    pub ssl_servers: Vec<VirtualServer>,
    pub upstreams: Vec<Upstream>,
    pub backend_groups: Vec<BackendGroup>,
    pub split_clients: Vec<SplitClient>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VirtualServer {
    pub hostname: String,
    pub path_rules: Vec<PathRule>,
    pub ssl: Option<Ssl>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Ssl {
    pub certificate_path: String,
}

/// Routing rules that share a path on one virtual server.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PathRule {
    pub path: String,
    pub match_rules: Vec<MatchRule>,
}

/// One match of one rule of an HTTPRoute, carrying everything the data
/// plane needs: the match itself, the folded filters and the backend group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchRule {
    pub match_idx: usize,
    pub rule_idx: usize,
    pub source: ResourceKey,
    #[serde(skip)]
    pub source_creation: DateTime<Utc>,
    pub route_match: HTTPRouteRulesMatches,
    pub filters: Filters,
    pub backend_group: BackendGroup,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Filters {
    pub request_redirect: Option<HTTPRouteRulesFiltersRequestRedirect>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Upstream {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpstreamServer {
    pub address: String,
}

impl Upstream {
    /// Servers the data plane proxies to. An upstream without endpoints
    /// keeps its references valid through the local 502 server.
    pub fn servers(&self) -> Vec<UpstreamServer> {
        if self.endpoints.is_empty() {
            return vec![UpstreamServer {
                address: LOOPBACK_502_SERVER.to_owned(),
            }];
        }
        self.endpoints
            .iter()
            .map(|endpoint| UpstreamServer {
                address: format!("{}:{}", endpoint.address, endpoint.port),
            })
            .collect()
    }
}

/// The upstream backing the invalid-backend sentinel.
pub fn invalid_backend_upstream() -> Upstream {
    Upstream {
        name: INVALID_BACKEND_REF.to_owned(),
        endpoints: Vec::new(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SplitClient {
    pub variable_name: String,
    pub distributions: Vec<SplitClientDistribution>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SplitClientDistribution {
    pub percent: String,
    pub value: String,
}

/// A server location, ready for templating by the sink.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Location {
    pub path: String,
    pub proxy_pass: Option<String>,
    pub return_directive: Option<Return>,
    pub http_match_var: Option<String>,
    pub internal: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Return {
    pub code: u16,
    pub url: String,
}

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("route {0} is bound to a listener but missing from the graph")]
    UnboundRoute(ResourceKey),
    #[error("could not serialize match descriptor: {0}")]
    MatchDescriptor(#[from] serde_json::Error),
}

/// Folds the graph and the resolved backends into the IR. An invalid or
/// missing GatewayClass or Gateway yields an empty configuration.
pub fn build_configuration(graph: &Graph) -> Result<Configuration, ConfigurationError> {
    if !graph.gateway_class.as_ref().is_some_and(|class| class.valid) {
        return Ok(Configuration::default());
    }
    let Some(gateway) = graph.gateway.as_ref() else {
        return Ok(Configuration::default());
    };

    let (http_servers, ssl_servers) = build_servers(gateway, &graph.routes)?;
    let upstreams = build_upstreams(gateway, &graph.routes);
    let backend_groups = build_backend_groups(gateway, &graph.routes)?;
    let split_clients = build_split_clients(&backend_groups);

    Ok(Configuration {
        http_servers,
        ssl_servers,
        upstreams,
        backend_groups,
        split_clients,
    })
}

fn build_servers(
    gateway: &GatewayInfo,
    routes: &BTreeMap<ResourceKey, Route>,
) -> Result<(Vec<VirtualServer>, Vec<VirtualServer>), ConfigurationError> {
    let mut http_rules = HostPathRules::default();
    let mut ssl_rules = HostPathRules::default();

    for listener in gateway.listeners.values().filter(|listener| listener.valid) {
        match listener.source.protocol.as_str() {
            "HTTP" => http_rules.upsert_listener(listener, routes)?,
            "HTTPS" => ssl_rules.upsert_listener(listener, routes)?,
            _ => {}
        }
    }

    Ok((http_rules.build_servers(), ssl_rules.build_servers()))
}

/// Accumulates (hostname -> path -> rule) while listeners are folded in, the
/// same shape the servers are eventually emitted in.
#[derive(Default)]
struct HostPathRules {
    rules_per_host: BTreeMap<String, BTreeMap<String, PathRule>>,
    ssl_for_host: BTreeMap<String, Option<String>>,
    /// Certificate of the catch-all SSL server; present once any HTTPS
    /// listener joined this bucket.
    default_ssl: Option<Option<String>>,
}

impl HostPathRules {
    fn upsert_listener(&mut self, listener: &Listener, routes: &BTreeMap<ResourceKey, Route>) -> Result<(), ConfigurationError> {
        if listener.is_https() {
            self.default_ssl.get_or_insert_with(|| listener.secret_path.clone());
        }

        for (route_key, accepted_hostnames) in &listener.routes {
            let route = routes
                .get(route_key)
                .ok_or_else(|| ConfigurationError::UnboundRoute(route_key.clone()))?;

            // A bound hostname gets a server even when the route carries no
            // usable rules.
            for hostname in accepted_hostnames {
                self.ssl_for_host
                    .entry(hostname.clone())
                    .or_insert_with(|| listener.secret_path.clone());
                self.rules_per_host.entry(hostname.clone()).or_default();
            }

            let rules = route.source.spec.rules.as_deref().unwrap_or_default();
            for (rule_idx, rule) in rules.iter().enumerate() {
                let filters = create_filters(rule.filters.as_deref().unwrap_or_default());
                let backend_group = route
                    .backend_refs
                    .by_rule
                    .get(&rule_idx)
                    .cloned()
                    .unwrap_or_else(|| BackendGroup {
                        source: route_key.clone(),
                        rule_idx,
                        backends: Vec::new(),
                    });

                let mut matches = rule.matches.clone().unwrap_or_default();
                if matches.is_empty() {
                    matches.push(default_match());
                }

                for hostname in accepted_hostnames {
                    let host_rules = self.rules_per_host.entry(hostname.clone()).or_default();

                    for (match_idx, route_match) in matches.iter().enumerate() {
                        // Regex path matches are recognized but skipped.
                        if is_regex_path(route_match) {
                            continue;
                        }
                        let path = get_path(route_match.path.as_ref());
                        host_rules
                            .entry(path.clone())
                            .or_insert_with(|| PathRule {
                                path,
                                match_rules: Vec::new(),
                            })
                            .match_rules
                            .push(MatchRule {
                                match_idx,
                                rule_idx,
                                source: route_key.clone(),
                                source_creation: route.creation_timestamp(),
                                route_match: route_match.clone(),
                                filters: filters.clone(),
                                backend_group: backend_group.clone(),
                            });
                    }
                }
            }
        }
        Ok(())
    }

    fn build_servers(self) -> Vec<VirtualServer> {
        let mut servers: Vec<VirtualServer> = Vec::with_capacity(self.rules_per_host.len() + 1);

        for (hostname, rules) in self.rules_per_host {
            let ssl = self
                .ssl_for_host
                .get(&hostname)
                .and_then(|secret_path| secret_path.clone())
                .map(|certificate_path| Ssl { certificate_path });

            let mut path_rules: Vec<PathRule> = rules.into_values().collect();
            for path_rule in &mut path_rules {
                sort_match_rules(&mut path_rule.match_rules);
            }

            servers.push(VirtualServer {
                hostname,
                path_rules,
                ssl,
            });
        }

        // The 404 catch-all for SSL traffic that matched no hostname, also
        // covering HTTPS listeners with no bound routes.
        if let Some(secret_path) = self.default_ssl {
            if !servers.iter().any(|server| server.hostname == WILDCARD_HOSTNAME) {
                servers.push(VirtualServer {
                    hostname: WILDCARD_HOSTNAME.to_owned(),
                    path_rules: Vec::new(),
                    ssl: secret_path.map(|certificate_path| Ssl { certificate_path }),
                });
            }
        }

        servers.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        servers
    }
}

/// Match rules under one path are ordered by route age, then namespaced
/// name, then rule and match index.
fn sort_match_rules(match_rules: &mut [MatchRule]) {
    match_rules.sort_by(|a, b| {
        a.source_creation
            .cmp(&b.source_creation)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.rule_idx.cmp(&b.rule_idx))
            .then_with(|| a.match_idx.cmp(&b.match_idx))
    });
}

fn build_upstreams(gateway: &GatewayInfo, routes: &BTreeMap<ResourceKey, Route>) -> Vec<Upstream> {
    // Routes attached to several listeners would produce duplicates; the
    // first occurrence wins.
    let mut unique: BTreeMap<String, Upstream> = BTreeMap::new();

    for listener in gateway.listeners.values().filter(|listener| listener.valid) {
        for route_key in listener.routes.keys() {
            let Some(route) = routes.get(route_key) else {
                continue;
            };
            for (name, endpoints) in &route.backend_refs.resolved {
                unique.entry(name.clone()).or_insert_with(|| Upstream {
                    name: name.clone(),
                    endpoints: endpoints.clone(),
                });
            }
        }
    }

    let mut upstreams: Vec<Upstream> = unique.into_values().collect();
    // The sentinel upstream always exists, so match rules and split
    // distributions that point at it never dangle.
    upstreams.push(invalid_backend_upstream());
    upstreams
}

fn build_backend_groups(
    gateway: &GatewayInfo,
    routes: &BTreeMap<ResourceKey, Route>,
) -> Result<Vec<BackendGroup>, ConfigurationError> {
    let mut unique: BTreeMap<String, BackendGroup> = BTreeMap::new();

    for listener in gateway.listeners.values().filter(|listener| listener.valid) {
        for route_key in listener.routes.keys() {
            let route = routes
                .get(route_key)
                .ok_or_else(|| ConfigurationError::UnboundRoute(route_key.clone()))?;
            for group in route.backend_refs.by_rule.values() {
                unique.entry(group.group_name()).or_insert_with(|| group.clone());
            }
        }
    }

    Ok(unique.into_values().collect())
}

fn build_split_clients(backend_groups: &[BackendGroup]) -> Vec<SplitClient> {
    backend_groups
        .iter()
        .filter_map(|group| {
            let distributions = create_split_client_distributions(group)?;
            Some(SplitClient {
                variable_name: safe_variable_name(&group.group_name()),
                distributions,
            })
        })
        .collect()
}

fn create_split_client_distributions(group: &BackendGroup) -> Option<Vec<SplitClientDistribution>> {
    if !group.needs_split() {
        return None;
    }

    let backends = &group.backends;
    let total_weight: i64 = backends.iter().map(|backend| i64::from(backend.weight)).sum();

    if total_weight == 0 {
        return Some(vec![SplitClientDistribution {
            percent: "100".to_owned(),
            value: INVALID_BACKEND_REF.to_owned(),
        }]);
    }

    let mut distributions = Vec::with_capacity(backends.len());

    // Percentages are floored to two decimals so their sum never exceeds
    // 100; the last backend gets the remainder, so the sum is exactly 100.
    let mut remaining_basis_points: i64 = 10_000;
    let (last, rest) = backends.split_last()?;
    for backend in rest {
        let basis_points = i64::from(backend.weight) * 10_000 / total_weight;
        remaining_basis_points -= basis_points;
        distributions.push(SplitClientDistribution {
            percent: format_percent(basis_points),
            value: split_client_value(backend),
        });
    }
    distributions.push(SplitClientDistribution {
        percent: format_percent(remaining_basis_points),
        value: split_client_value(last),
    });

    Some(distributions)
}

fn split_client_value(backend: &BackendRef) -> String {
    if backend.valid {
        backend.name.clone()
    } else {
        INVALID_BACKEND_REF.to_owned()
    }
}

fn format_percent(basis_points: i64) -> String {
    format!("{}.{:02}", basis_points / 100, basis_points % 100)
}

/// Group names become data-plane variable names; dashes are not legal there.
fn safe_variable_name(name: &str) -> String {
    name.replace('-', "_")
}

/// Serialized form of a match that cannot be expressed as a plain location:
/// the dispatch location carries a list of these and the data plane matches
/// the request against them at runtime.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
struct HttpMatch {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    any: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<String>,
    #[serde(rename = "params", skip_serializing_if = "Vec::is_empty")]
    query_params: Vec<String>,
    #[serde(rename = "redirectPath", skip_serializing_if = "String::is_empty")]
    redirect_path: String,
}

/// Expands the path rules of one virtual server into locations. A rule with
/// a single path-only match proxies directly; anything richer becomes one
/// internal location per match plus a dispatch location carrying the match
/// descriptor.
pub fn build_locations(server: &VirtualServer) -> Result<Vec<Location>, ConfigurationError> {
    let listener_port = if server.ssl.is_some() { HTTPS_LISTENER_PORT } else { HTTP_LISTENER_PORT };

    if server.path_rules.is_empty() {
        return Ok(vec![Location {
            path: "/".to_owned(),
            return_directive: Some(Return {
                code: STATUS_NOT_FOUND,
                url: String::new(),
            }),
            ..Default::default()
        }]);
    }

    let mut locations = Vec::new();
    for rule in &server.path_rules {
        let mut matches = Vec::with_capacity(rule.match_rules.len());

        for (match_rule_idx, match_rule) in rule.match_rules.iter().enumerate() {
            let mut location = if rule.match_rules.len() == 1 && is_path_only_match(&match_rule.route_match) {
                Location {
                    path: rule.path.clone(),
                    ..Default::default()
                }
            } else {
                let path = path_for_match(&rule.path, match_rule_idx);
                matches.push(http_match(&match_rule.route_match, &path));
                Location {
                    path,
                    internal: true,
                    ..Default::default()
                }
            };

            // A redirect suppresses proxying for this location.
            if let Some(redirect) = match_rule.filters.request_redirect.as_ref() {
                location.return_directive = Some(redirect_return(redirect, listener_port));
                locations.push(location);
                continue;
            }

            let backend_name = match_rule
                .backend_group
                .name()
                .unwrap_or_else(|| INVALID_BACKEND_REF.to_owned());
            location.proxy_pass = Some(if match_rule.backend_group.needs_split() {
                format!("http://${}", safe_variable_name(&backend_name))
            } else {
                format!("http://{backend_name}")
            });
            locations.push(location);
        }

        if !matches.is_empty() {
            locations.push(Location {
                path: rule.path.clone(),
                http_match_var: Some(serde_json::to_string(&matches)?),
                ..Default::default()
            });
        }
    }

    Ok(locations)
}

fn redirect_return(redirect: &HTTPRouteRulesFiltersRequestRedirect, listener_port: i32) -> Return {
    let scheme = redirect.scheme.as_ref().map_or("$scheme", |scheme| match scheme {
        HTTPRouteRulesFiltersRequestRedirectScheme::Http => "http",
        HTTPRouteRulesFiltersRequestRedirectScheme::Https => "https",
    });
    let hostname = redirect.hostname.as_deref().unwrap_or("$host");
    let code = redirect
        .status_code
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(STATUS_FOUND);
    let port = redirect.port.unwrap_or(listener_port);

    Return {
        code,
        url: format!("{scheme}://{hostname}:{port}$request_uri"),
    }
}

fn http_match(route_match: &HTTPRouteRulesMatches, redirect_path: &str) -> HttpMatch {
    let mut result = HttpMatch {
        redirect_path: redirect_path.to_owned(),
        ..Default::default()
    };

    if is_path_only_match(route_match) {
        result.any = true;
        return result;
    }

    if let Some(method) = route_match.method.as_ref() {
        result.method = Some(method_name(method).to_owned());
    }

    if let Some(headers) = route_match.headers.as_ref() {
        let mut seen = HashSet::new();
        for header in headers {
            // Only exact matches are supported; an absent type means exact.
            let exact = header
                .r#type
                .as_ref()
                .map_or(true, |kind| matches!(kind, HTTPRouteRulesMatchesHeadersType::Exact));
            if !exact {
                continue;
            }
            // Header names are case-insensitive and may not repeat; the
            // first entry for a name wins.
            if seen.insert(header.name.to_lowercase()) {
                result.headers.push(format!("{}:{}", header.name, header.value));
            }
        }
    }

    if let Some(query_params) = route_match.query_params.as_ref() {
        result.query_params = query_params
            .iter()
            .filter(|param| {
                param
                    .r#type
                    .as_ref()
                    .map_or(true, |kind| matches!(kind, HTTPRouteRulesMatchesQueryParamsType::Exact))
            })
            .map(|param| format!("{}={}", param.name, param.value))
            .collect();
    }

    result
}

fn method_name(method: &HTTPRouteRulesMatchesMethod) -> &'static str {
    match method {
        HTTPRouteRulesMatchesMethod::Get => "GET",
        HTTPRouteRulesMatchesMethod::Head => "HEAD",
        HTTPRouteRulesMatchesMethod::Post => "POST",
        HTTPRouteRulesMatchesMethod::Put => "PUT",
        HTTPRouteRulesMatchesMethod::Delete => "DELETE",
        HTTPRouteRulesMatchesMethod::Connect => "CONNECT",
        HTTPRouteRulesMatchesMethod::Options => "OPTIONS",
        HTTPRouteRulesMatchesMethod::Trace => "TRACE",
        HTTPRouteRulesMatchesMethod::Patch => "PATCH",
    }
}

fn is_path_only_match(route_match: &HTTPRouteRulesMatches) -> bool {
    route_match.method.is_none() && route_match.headers.is_none() && route_match.query_params.is_none()
}

fn is_regex_path(route_match: &HTTPRouteRulesMatches) -> bool {
    matches!(
        route_match.path.as_ref().and_then(|path| path.r#type.as_ref()),
        Some(HTTPRouteRulesMatchesPathType::RegularExpression)
    )
}

fn get_path(path: Option<&HTTPRouteRulesMatchesPath>) -> String {
    match path.and_then(|path| path.value.as_deref()) {
        None | Some("") => "/".to_owned(),
        Some(value) => value.to_owned(),
    }
}

fn path_for_match(path: &str, match_rule_idx: usize) -> String {
    format!("{path}_route{match_rule_idx}")
}

fn default_match() -> HTTPRouteRulesMatches {
    HTTPRouteRulesMatches {
        headers: None,
        method: None,
        path: Some(HTTPRouteRulesMatchesPath {
            r#type: Some(HTTPRouteRulesMatchesPathType::PathPrefix),
            value: Some("/".to_owned()),
        }),
        query_params: None,
    }
}

fn create_filters(filters: &[HTTPRouteRulesFilters]) -> Filters {
    let mut result = Filters::default();
    for filter in filters {
        if matches!(filter.r#type, HTTPRouteRulesFiltersType::RequestRedirect) {
            // only the first redirect filter is honored
            result.request_redirect = filter.request_redirect.clone();
            break;
        }
    }
    result
}
