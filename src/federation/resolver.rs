/// Homeserver endpoint resolution
///
/// Maps a logical server name to the HTTPS endpoint federation requests go
/// to, in discovery order:
/// 1. IP literals as given
/// 2. Explicit ports as given
/// 3. `.well-known/matrix/server` delegation, re-checked for IP literals,
///    explicit ports, and SRV records on the delegated host
/// 4. SRV records for the original name
/// 5. The hostname with the default federation port
///
/// Results are cached per exact input; `.well-known` and DNS failures
/// degrade the step to "no result" and never fail the call.
use crate::{
    error::{MediaError, MediaResult},
    federation::{ResolvedServer, ResolverCache, DEFAULT_FEDERATION_PORT, FEDERATION_USER_AGENT},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use trust_dns_resolver::TokioAsyncResolver;

/// `.well-known/matrix/server` response body. `m.server` is canonical;
/// `server_addr` is accepted for older deployments.
#[derive(Debug, Clone, Deserialize)]
pub struct WellKnownServer {
    #[serde(rename = "m.server", alias = "server_addr")]
    pub server_addr: String,
}

/// Fetches delegation documents. Failures of any kind mean "no delegation".
#[async_trait]
pub trait WellKnownClient: Send + Sync {
    async fn fetch(&self, host: &str) -> Option<WellKnownServer>;
}

/// Looks up `_matrix._tcp` SRV records. Failures mean "no records".
#[async_trait]
pub trait SrvResolver: Send + Sync {
    async fn lookup(&self, name: &str) -> Vec<SrvRecord>;
}

/// One SRV record, best candidate first in the resolver's output
#[derive(Debug, Clone)]
pub struct SrvRecord {
    pub target: String,
    pub port: u16,
}

/// Production `.well-known` client over HTTPS
pub struct HttpWellKnownClient {
    http: reqwest::Client,
}

impl HttpWellKnownClient {
    pub fn new(timeout: Duration) -> MediaResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(FEDERATION_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| MediaError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl WellKnownClient for HttpWellKnownClient {
    async fn fetch(&self, host: &str) -> Option<WellKnownServer> {
        let url = format!("https://{}/.well-known/matrix/server", host);
        debug!("Doing .well-known lookup on {}", url);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("No .well-known from {}: {}", host, e);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!("No .well-known from {}: HTTP {}", host, response.status());
            return None;
        }

        match response.json::<WellKnownServer>().await {
            Ok(wk) if !wk.server_addr.is_empty() => Some(wk),
            Ok(_) => None,
            Err(e) => {
                debug!("Unparseable .well-known from {}: {}", host, e);
                None
            }
        }
    }
}

/// Production SRV resolver over the system DNS configuration
pub struct DnsSrvResolver {
    resolver: TokioAsyncResolver,
}

impl DnsSrvResolver {
    pub fn from_system_conf() -> MediaResult<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| MediaError::Internal(format!("Failed to create DNS resolver: {}", e)))?;

        Ok(Self { resolver })
    }
}

#[async_trait]
impl SrvResolver for DnsSrvResolver {
    async fn lookup(&self, name: &str) -> Vec<SrvRecord> {
        let query = format!("_matrix._tcp.{}", name);
        debug!("Doing SRV lookup for {}", query);

        match self.resolver.srv_lookup(query.as_str()).await {
            Ok(lookup) => {
                let mut records: Vec<_> = lookup
                    .iter()
                    .map(|srv| (srv.priority(), srv.weight(), srv.target().to_utf8(), srv.port()))
                    .collect();
                // Lowest priority first, heaviest weight breaking ties
                records.sort_by_key(|(priority, weight, _, _)| (*priority, std::cmp::Reverse(*weight)));
                records
                    .into_iter()
                    .map(|(_, _, target, port)| SrvRecord { target, port })
                    .collect()
            }
            Err(e) => {
                debug!("No SRV records for {}: {}", query, e);
                Vec::new()
            }
        }
    }
}

/// Resolves logical server names to federation endpoints
pub struct ServerResolver {
    cache: Arc<ResolverCache>,
    well_known: Arc<dyn WellKnownClient>,
    srv: Arc<dyn SrvResolver>,
}

impl ServerResolver {
    pub fn new(
        cache: Arc<ResolverCache>,
        well_known: Arc<dyn WellKnownClient>,
        srv: Arc<dyn SrvResolver>,
    ) -> Self {
        Self {
            cache,
            well_known,
            srv,
        }
    }

    /// Resolve `hostname` to an endpoint. Parse failures are fatal; network
    /// failures along the way only skip their step.
    pub async fn resolve(&self, hostname: &str) -> MediaResult<ResolvedServer> {
        if let Some(cached) = self.cache.get(hostname).await {
            info!("Endpoint for {} is {} (cache)", hostname, cached.base_url);
            return Ok(cached);
        }

        let (host, port, explicit_port) = split_host_port(hostname)?;

        // Step 1: IP literals are used with the explicit or default port
        if host.parse::<IpAddr>().is_ok() {
            return self
                .finish(hostname, base_url(&host, port), hostname.to_string(), "IP address")
                .await;
        }

        // Step 2: an explicit port wins over discovery
        if explicit_port {
            return self
                .finish(hostname, base_url(&host, port), host, "explicit port")
                .await;
        }

        // Step 3: .well-known delegation
        if let Some(wk) = self.well_known.fetch(&host).await {
            if let Ok((wk_host, wk_port, wk_explicit)) = split_host_port(&wk.server_addr) {
                // Step 3a: delegated IP literals, regardless of port
                if wk_host.parse::<IpAddr>().is_ok() {
                    return self
                        .finish(
                            hostname,
                            base_url(&wk_host, wk_port),
                            wk.server_addr.clone(),
                            "well-known; IP address",
                        )
                        .await;
                }

                // Step 3b: explicit port on the delegated host
                if wk_explicit {
                    return self
                        .finish(
                            hostname,
                            base_url(&wk_host, wk_port),
                            wk_host,
                            "well-known; explicit port",
                        )
                        .await;
                }

                // Step 3c: SRV records for the delegated host
                if let Some((target, srv_port)) = self.first_srv(&wk_host).await {
                    return self
                        .finish(hostname, base_url(&target, srv_port), wk_host, "well-known; SRV")
                        .await;
                }

                // Step 3d: the delegated host as-is
                return self
                    .finish(
                        hostname,
                        base_url(&wk_host, wk_port),
                        wk_host,
                        "well-known; fallback",
                    )
                    .await;
            }

            debug!(
                "Ignoring unparseable .well-known address {:?} from {}",
                wk.server_addr, host
            );
        }

        // Step 4: SRV records for the original name
        if let Some((target, srv_port)) = self.first_srv(hostname).await {
            return self
                .finish(hostname, base_url(&target, srv_port), host, "SRV")
                .await;
        }

        // Step 5: the hostname as-is
        self.finish(hostname, base_url(&host, port), host, "fallback").await
    }

    async fn first_srv(&self, name: &str) -> Option<(String, u16)> {
        let record = self.srv.lookup(name).await.into_iter().next()?;
        let target = record
            .target
            .strip_suffix('.')
            .map(str::to_string)
            .unwrap_or(record.target);
        Some((target, record.port))
    }

    async fn finish(
        &self,
        hostname: &str,
        base_url: String,
        host_header: String,
        source: &str,
    ) -> MediaResult<ResolvedServer> {
        info!("Endpoint for {} is {} ({})", hostname, base_url, source);
        let resolved = ResolvedServer {
            base_url,
            host_header,
        };
        self.cache.insert(hostname, resolved.clone()).await;
        Ok(resolved)
    }
}

fn base_url(host: &str, port: u16) -> String {
    // IPv6 literals need brackets to form a valid authority
    if host.contains(':') {
        format!("https://[{}]:{}", host, port)
    } else {
        format!("https://{}:{}", host, port)
    }
}

/// Split `host[:port]`, defaulting the federation port when none is given.
/// The boolean reports whether the port was explicit. Anything that is not
/// a plain host, a `host:port` pair, or a bracketed IPv6 literal is a parse
/// error.
fn split_host_port(hostname: &str) -> MediaResult<(String, u16, bool)> {
    if hostname.is_empty() {
        return Err(MediaError::HostParse("empty server name".to_string()));
    }

    if let Some(rest) = hostname.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| MediaError::HostParse(format!("missing ']' in {}", hostname)))?;
        if host.is_empty() {
            return Err(MediaError::HostParse(format!("empty host in {}", hostname)));
        }
        if after.is_empty() {
            return Ok((host.to_string(), DEFAULT_FEDERATION_PORT, false));
        }
        let port = after
            .strip_prefix(':')
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| MediaError::HostParse(format!("invalid port in {}", hostname)))?;
        return Ok((host.to_string(), port, true));
    }

    match hostname.matches(':').count() {
        0 => Ok((hostname.to_string(), DEFAULT_FEDERATION_PORT, false)),
        1 => {
            let (host, port) = hostname
                .split_once(':')
                .ok_or_else(|| MediaError::HostParse(format!("invalid server name {}", hostname)))?;
            if host.is_empty() {
                return Err(MediaError::HostParse(format!("empty host in {}", hostname)));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| MediaError::HostParse(format!("invalid port in {}", hostname)))?;
            Ok((host.to_string(), port, true))
        }
        _ => Err(MediaError::HostParse(format!(
            "too many colons in {}",
            hostname
        ))),
    }
}
