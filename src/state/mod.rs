mod backend_group;
mod backend_refs;
mod change_processor;
mod configuration;
mod graph;
mod resolver;
mod statuses;

#[cfg(test)]
pub(crate) mod test_util;

pub use backend_group::{BackendGroup, BackendRef};
pub use backend_refs::{resolve_backend_refs, validate_backend_ref, BackendRefError, BackendRefs, Warnings};
pub use change_processor::{ChangeProcessor, ConfigSink, LoggingSink, LoggingStatusWriter, StatusWriter};
pub use configuration::{
    build_configuration, build_locations, invalid_backend_upstream, Configuration, ConfigurationError, Filters,
    Location, MatchRule, PathRule, Return, SplitClient, SplitClientDistribution, Ssl, Upstream, UpstreamServer,
    VirtualServer,
};
pub use graph::{build_graph, GatewayClassInfo, GatewayInfo, Graph, Listener, Route};
pub use resolver::{Endpoint, ResolverError};
pub use statuses::{build_statuses, GatewayClassStatus, ListenerStatus, RouteStatus, Statuses};
