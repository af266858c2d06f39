//! Outbound connection to the upstream realtime service.

use std::fmt;
use std::time::Duration;

use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, http};
use tracing::{debug, info};
use url::Url;
use zeroize::Zeroizing;

use super::connection::{Connection, Direction};
use super::error::{RelayError, RelayResult};

/// Header carrying the upstream protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "OpenAI-Beta";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens authenticated upstream WebSockets. Built once at startup and shared
/// by every session; the credential never leaves this type.
pub struct UpstreamConnector {
    url: Url,
    credential: Zeroizing<String>,
    protocol_version: String,
    connect_timeout: Duration,
}

impl fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("url", &self.url.as_str())
            .field("credential", &"[REDACTED]")
            .field("protocol_version", &self.protocol_version)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl UpstreamConnector {
    pub fn new(
        url: &str,
        credential: Zeroizing<String>,
        protocol_version: impl Into<String>,
        connect_timeout: Duration,
    ) -> RelayResult<Self> {
        let url = Url::parse(url).map_err(|e| {
            RelayError::InvalidConfiguration(format!("invalid upstream URL '{url}': {e}"))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RelayError::InvalidConfiguration(format!(
                "upstream URL must use ws or wss, got '{}'",
                url.scheme()
            )));
        }
        if credential.trim().is_empty() {
            return Err(RelayError::InvalidConfiguration(
                "upstream credential is empty".to_string(),
            ));
        }
        if connect_timeout.is_zero() {
            return Err(RelayError::InvalidConfiguration(
                "upstream connect timeout must be positive".to_string(),
            ));
        }

        Ok(Self {
            url,
            credential,
            protocol_version: protocol_version.into(),
            connect_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Handshake request with the bearer credential and protocol header.
    pub fn build_request(&self) -> RelayResult<http::Request<()>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::InvalidConfiguration(e.to_string()))?;

        let bearer = Zeroizing::new(format!("Bearer {}", self.credential.as_str()));
        let mut authorization = http::HeaderValue::from_str(&bearer).map_err(|_| {
            RelayError::InvalidConfiguration("credential is not a valid header value".to_string())
        })?;
        authorization.set_sensitive(true);

        let headers = request.headers_mut();
        headers.insert(http::header::AUTHORIZATION, authorization);
        if !self.protocol_version.is_empty() {
            let version = http::HeaderValue::from_str(&self.protocol_version).map_err(|_| {
                RelayError::InvalidConfiguration(format!(
                    "protocol version '{}' is not a valid header value",
                    self.protocol_version
                ))
            })?;
            headers.insert(PROTOCOL_VERSION_HEADER, version);
        }

        Ok(request)
    }

    /// Open the upstream connection, bounded by the connect timeout.
    pub async fn connect(&self) -> RelayResult<Connection> {
        let request = self.build_request()?;
        debug!(url = %self.url, "Connecting to upstream");

        let (socket, response) = match timeout(self.connect_timeout, connect_async(request)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(classify_handshake_error(e)),
            Err(_) => {
                return Err(RelayError::UpstreamUnavailable(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                )));
            }
        };

        info!(status = %response.status(), "Upstream connection established");
        Ok(Connection::from_tungstenite(Direction::Outbound, socket))
    }
}

/// 401/403 during the handshake means the credential was refused; anything
/// else is treated as the service being unreachable.
pub fn classify_handshake_error(error: tungstenite::Error) -> RelayError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
                RelayError::UpstreamRejected(format!("upstream refused credential ({status})"))
            } else {
                RelayError::UpstreamUnavailable(format!("upstream handshake failed ({status})"))
            }
        }
        other => RelayError::UpstreamUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17";

    fn connector() -> UpstreamConnector {
        UpstreamConnector::new(
            URL,
            Zeroizing::new("sk-test".to_string()),
            "realtime=v1",
            DEFAULT_CONNECT_TIMEOUT,
        )
        .unwrap()
    }

    #[test]
    fn test_request_carries_credential_and_version() {
        let request = connector().build_request().unwrap();
        let headers = request.headers();
        assert_eq!(headers[http::header::AUTHORIZATION], "Bearer sk-test");
        assert!(headers[http::header::AUTHORIZATION].is_sensitive());
        assert_eq!(headers[PROTOCOL_VERSION_HEADER], "realtime=v1");
        assert_eq!(request.uri().to_string(), URL);
    }

    #[test]
    fn test_empty_protocol_version_omits_header() {
        let connector = UpstreamConnector::new(
            URL,
            Zeroizing::new("sk-test".to_string()),
            "",
            DEFAULT_CONNECT_TIMEOUT,
        )
        .unwrap();
        let request = connector.build_request().unwrap();
        assert!(request.headers().get(PROTOCOL_VERSION_HEADER).is_none());
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let key = || Zeroizing::new("sk-test".to_string());
        assert!(matches!(
            UpstreamConnector::new("not a url", key(), "v", DEFAULT_CONNECT_TIMEOUT),
            Err(RelayError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            UpstreamConnector::new("https://example.com", key(), "v", DEFAULT_CONNECT_TIMEOUT),
            Err(RelayError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            UpstreamConnector::new(URL, Zeroizing::new("  ".to_string()), "v", DEFAULT_CONNECT_TIMEOUT),
            Err(RelayError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            UpstreamConnector::new(URL, key(), "v", Duration::ZERO),
            Err(RelayError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_debug_redacts_credential() {
        let debug = format!("{:?}", connector());
        assert!(!debug.contains("sk-test"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_classify_handshake_status() {
        let response = |status: u16| {
            http::Response::builder()
                .status(status)
                .body(None::<Vec<u8>>)
                .unwrap()
        };
        assert!(matches!(
            classify_handshake_error(tungstenite::Error::Http(response(401).into())),
            RelayError::UpstreamRejected(_)
        ));
        assert!(matches!(
            classify_handshake_error(tungstenite::Error::Http(response(403).into())),
            RelayError::UpstreamRejected(_)
        ));
        assert!(matches!(
            classify_handshake_error(tungstenite::Error::Http(response(502).into())),
            RelayError::UpstreamUnavailable(_)
        ));
        assert!(matches!(
            classify_handshake_error(tungstenite::Error::ConnectionClosed),
            RelayError::UpstreamUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = UpstreamConnector::new(
            &format!("ws://127.0.0.1:{port}/v1/realtime"),
            Zeroizing::new("sk-test".to_string()),
            "realtime=v1",
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(matches!(
            connector.connect().await,
            Err(RelayError::UpstreamUnavailable(_))
        ));
    }
}
