//! Relay (STUN/TURN) credential request specification.
//!
//! Wire format:
//! ```text
//! PUT <endpoint>
//! Authorization: Basic base64(user:secret)
//!
//! 200 OK
//! {"s":"ok","v":{"iceServers":[
//!     {"url":"stun:relay.example.net"},
//!     {"url":"turn:relay.example.net:3478?transport=udp","username":"u","credential":"c"}
//! ]}}
//! ```
//! Failures are reported as `{"s":"error","v":"<reason>"}`.

use crate::media::IceServer;
use crate::net::{HttpRequest, HttpResponse};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay request failed: {0}")]
    Request(String),

    #[error("relay endpoint returned HTTP {0}")]
    Status(u16),

    #[error("relay endpoint reported failure: {0}")]
    Rejected(String),

    #[error("malformed relay response: {0}")]
    Malformed(String),

    #[error("relay response contained no servers")]
    NoServers,
}

#[derive(Debug, Deserialize)]
struct RelayEnvelope {
    s: Option<String>,
    v: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RelayServerList {
    #[serde(rename = "iceServers", default)]
    ice_servers: Vec<RelayServerEntry>,
}

#[derive(Debug, Deserialize)]
struct RelayServerEntry {
    url: Option<String>,
    // Newer responses carry `urls`, either a string or a list
    urls: Option<serde_json::Value>,
    username: Option<String>,
    credential: Option<String>,
}

impl RelayServerEntry {
    fn into_servers(self) -> Vec<IceServer> {
        let mut urls = Vec::new();
        if let Some(url) = self.url {
            urls.push(url);
        }
        match self.urls {
            Some(serde_json::Value::String(url)) => urls.push(url),
            Some(serde_json::Value::Array(list)) => urls.extend(
                list.into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string)),
            ),
            _ => {}
        }
        urls.dedup();

        urls.into_iter()
            .map(|url| IceServer {
                url,
                username: self.username.clone(),
                credential: self.credential.clone(),
            })
            .collect()
    }
}

/// Request specification for fetching relay servers.
#[derive(Debug, Clone)]
pub struct RelayCredentialsSpec {
    pub endpoint: String,
    pub username: Option<String>,
    pub secret: Option<String>,
}

impl RelayCredentialsSpec {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: None,
            secret: None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.secret = Some(secret.into());
        self
    }

    pub fn build_request(&self) -> HttpRequest {
        let request = HttpRequest::put(&self.endpoint);
        match (&self.username, &self.secret) {
            (Some(user), Some(secret)) => {
                let token = STANDARD.encode(format!("{user}:{secret}"));
                request.with_header("Authorization", format!("Basic {token}"))
            }
            _ => request,
        }
    }

    pub fn parse_response(&self, response: &HttpResponse) -> Result<Vec<IceServer>, RelayError> {
        if !response.is_success() {
            return Err(RelayError::Status(response.status_code));
        }

        let envelope: RelayEnvelope = serde_json::from_slice(&response.body)
            .map_err(|e| RelayError::Malformed(e.to_string()))?;

        match envelope.s.as_deref() {
            Some("ok") => {}
            Some(status) => {
                let reason = envelope
                    .v
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .unwrap_or(status)
                    .to_string();
                return Err(RelayError::Rejected(reason));
            }
            None => return Err(RelayError::Malformed("missing status".to_string())),
        }

        let list: RelayServerList = match envelope.v {
            Some(value) => {
                serde_json::from_value(value).map_err(|e| RelayError::Malformed(e.to_string()))?
            }
            None => return Err(RelayError::NoServers),
        };

        let servers: Vec<IceServer> = list
            .ice_servers
            .into_iter()
            .flat_map(RelayServerEntry::into_servers)
            .collect();

        if servers.is_empty() {
            return Err(RelayError::NoServers);
        }
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status_code: 200,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_build_request_uses_basic_auth() {
        let spec = RelayCredentialsSpec::new("https://relay.example.net/_turn/app")
            .with_basic_auth("user", "secret");
        let request = spec.build_request();

        assert_eq!(request.method, "PUT");
        assert_eq!(request.url, "https://relay.example.net/_turn/app");
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Basic dXNlcjpzZWNyZXQ=")
        );
    }

    #[test]
    fn test_build_request_without_auth() {
        let request = RelayCredentialsSpec::new("https://relay.example.net").build_request();
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_parse_mixed_servers() {
        let spec = RelayCredentialsSpec::new("https://relay.example.net");
        let servers = spec
            .parse_response(&ok(r#"{"s":"ok","v":{"iceServers":[
                {"url":"stun:relay.example.net"},
                {"url":"turn:relay.example.net:3478?transport=udp","username":"u","credential":"c"},
                {"urls":["turn:a.example.net","turns:a.example.net:443"],"username":"u2","credential":"c2"}
            ]}}"#))
            .unwrap();

        assert_eq!(servers.len(), 4);
        assert!(!servers[0].has_credentials());
        assert!(servers[1].has_credentials());
        assert_eq!(servers[3].url, "turns:a.example.net:443");
        assert_eq!(servers[3].username.as_deref(), Some("u2"));
    }

    #[test]
    fn test_parse_rejected() {
        let spec = RelayCredentialsSpec::new("https://relay.example.net");
        let err = spec
            .parse_response(&ok(r#"{"s":"error","v":"unauthorized"}"#))
            .unwrap_err();
        assert!(matches!(err, RelayError::Rejected(ref r) if r == "unauthorized"));
    }

    #[test]
    fn test_parse_http_failure_and_empty_list() {
        let spec = RelayCredentialsSpec::new("https://relay.example.net");
        let err = spec
            .parse_response(&HttpResponse {
                status_code: 503,
                body: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, RelayError::Status(503)));

        let err = spec
            .parse_response(&ok(r#"{"s":"ok","v":{"iceServers":[]}}"#))
            .unwrap_err();
        assert!(matches!(err, RelayError::NoServers));
    }

    #[test]
    fn test_parse_requires_status() {
        let spec = RelayCredentialsSpec::new("https://relay.example.net");
        let err = spec
            .parse_response(&ok(r#"{"v":{"iceServers":[{"url":"stun:relay.example.net"}]}}"#))
            .unwrap_err();
        assert!(matches!(err, RelayError::Malformed(_)));
    }
}
