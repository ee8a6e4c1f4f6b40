mod resource_key;

pub use resource_key::{ResourceKey, DEFAULT_NAMESPACE_NAME};

/// Hostname token that tells the data plane to match any server name.
pub const WILDCARD_HOSTNAME: &str = "~^";

/// Upstream name used wherever a dangling backend reference must still
/// produce a routable target.
pub const INVALID_BACKEND_REF: &str = "invalid-backend-ref";

/// Address of the local server that answers 502 for upstreams with no
/// resolvable endpoints.
pub const LOOPBACK_502_SERVER: &str = "unix:/var/lib/nginx/nginx-502-server.sock";
