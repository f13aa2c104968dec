/// Federation HTTP client
///
/// Dials resolved endpoints with a handshake the repository controls:
/// certificate verification is off (peers prove identity with protocol
/// signatures, not certificates) and the resolved host header is sent as
/// SNI. Peers that present a broken certificate for that virtual host get
/// one retry on a fresh connection with SNI withheld, which lets them fall
/// back to their default certificate.
use crate::{
    error::{MediaError, MediaResult},
    federation::{FederatedResponse, FEDERATION_USER_AGENT},
};
use hyper::{header, Body, Request};
use rustls::{
    client::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    Certificate, ClientConfig, DigitallySignedStruct, ServerName,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, info, warn};
use url::Url;

/// Accepts any peer certificate. Federation authenticates servers with
/// JSON signatures, so the transport only provides confidentiality.
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &Certificate,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &Certificate,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }
}

/// HTTP/1.1 client for federation endpoints
pub struct FederationClient {
    timeout: Duration,
    tls: TlsConnector,
    tls_no_sni: TlsConnector,
}

impl FederationClient {
    pub fn new(timeout: Duration) -> Self {
        let base = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();

        let mut no_sni = base.clone();
        no_sni.enable_sni = false;

        Self {
            timeout,
            tls: TlsConnector::from(Arc::new(base)),
            tls_no_sni: TlsConnector::from(Arc::new(no_sni)),
        }
    }

    /// GET `url` with the `Host` header (and SNI) set to `host_header`.
    /// The response is surfaced verbatim; redirects are not followed.
    pub async fn federated_get(
        &self,
        url: &str,
        host_header: &str,
    ) -> MediaResult<FederatedResponse> {
        info!("Federated GET {} with host {}", url, host_header);

        let parsed = Url::parse(url)
            .map_err(|e| MediaError::Network(format!("Invalid federation URL {}: {}", url, e)))?;
        if parsed.scheme() != "https" {
            return Err(MediaError::Network(format!(
                "Refusing non-HTTPS federation URL {}",
                url
            )));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| MediaError::Network(format!("No host in federation URL {}", url)))?
            .to_string();
        let port = parsed.port().unwrap_or(443);

        let stream = self.connect_tls(&host, port, host_header).await?;

        let (mut sender, connection) = hyper::client::conn::handshake(stream)
            .await
            .map_err(|e| MediaError::Network(format!("HTTP handshake with {} failed: {}", host, e)))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Federation connection closed with error: {}", e);
            }
        });

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let request = Request::get(path.as_str())
            .header(header::HOST, host_header)
            .header(header::USER_AGENT, FEDERATION_USER_AGENT)
            .body(Body::empty())
            .map_err(|e| MediaError::Internal(format!("Failed to build federation request: {}", e)))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| MediaError::Network(format!("Federation request to {} failed: {}", url, e)))?;

        let (parts, body) = response.into_parts();
        let body = hyper::body::to_bytes(body)
            .await
            .map_err(|e| MediaError::Network(format!("Failed to read body from {}: {}", url, e)))?;

        Ok(FederatedResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Handshake with SNI first; on failure, retry once on a fresh
    /// connection with SNI withheld. The second failure surfaces the
    /// original error.
    async fn connect_tls(
        &self,
        host: &str,
        port: u16,
        host_header: &str,
    ) -> MediaResult<TlsStream<TcpStream>> {
        let first_failure = match ServerName::try_from(host_header) {
            Ok(server_name) => {
                let stream = self.dial(host, port).await?;
                match timeout(self.timeout, self.tls.connect(server_name, stream)).await {
                    Ok(Ok(tls)) => return Ok(tls),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("handshake timed out after {:?}", self.timeout),
                }
            }
            // Host headers such as IP-with-port literals are not valid SNI
            // values at all; go straight to the no-SNI attempt.
            Err(e) => e.to_string(),
        };

        warn!(
            "Handshake with {} as {} failed ({}), retrying without SNI",
            host, host_header, first_failure
        );

        let placeholder = ServerName::try_from(host)
            .or_else(|_| ServerName::try_from("no-sni.invalid"))
            .map_err(|e| MediaError::Internal(format!("Invalid fallback server name: {}", e)))?;

        let stream = self.dial(host, port).await?;
        match timeout(self.timeout, self.tls_no_sni.connect(placeholder, stream)).await {
            Ok(Ok(tls)) => Ok(tls),
            Ok(Err(retry_failure)) => {
                debug!("Retry without SNI also failed: {}", retry_failure);
                Err(MediaError::HandshakeFailed(first_failure))
            }
            Err(_) => Err(MediaError::HandshakeFailed(first_failure)),
        }
    }

    async fn dial(&self, host: &str, port: u16) -> MediaResult<TcpStream> {
        match timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(MediaError::Network(format!(
                "Failed to connect to {}:{}: {}",
                host, port, e
            ))),
            Err(_) => Err(MediaError::Network(format!(
                "Connection to {}:{} timed out after {:?}",
                host, port, self.timeout
            ))),
        }
    }
}
