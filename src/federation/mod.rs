/// Federation support for the media repository
///
/// Resolves logical homeserver names to concrete HTTPS endpoints and
/// fetches remote media over TLS tuned for federation's certificate model
/// (peer identity is proven by protocol-level signatures, not certificates).

pub mod cache;
pub mod client;
pub mod resolver;

pub use cache::ResolverCache;
pub use client::FederationClient;
pub use resolver::{
    DnsSrvResolver, HttpWellKnownClient, ServerResolver, SrvRecord, SrvResolver, WellKnownClient,
    WellKnownServer,
};

use bytes::Bytes;
use hyper::{header, HeaderMap, StatusCode};

/// User-Agent sent on outbound federation requests
pub const FEDERATION_USER_AGENT: &str = "matrix-media-repo";

/// Port federation traffic defaults to when discovery yields none
pub const DEFAULT_FEDERATION_PORT: u16 = 8448;

/// A resolved federation endpoint
///
/// `base_url` is `https://host:port` with no trailing slash. `host_header`
/// is the name the caller must present as TLS SNI and as the HTTP `Host`
/// header on any subsequent request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedServer {
    pub base_url: String,
    pub host_header: String,
}

/// A federation response, surfaced verbatim (redirects are not followed)
#[derive(Debug)]
pub struct FederatedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FederatedResponse {
    /// The Content-Type header, when present and readable
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}
