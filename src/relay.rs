//! Relay server lookup.
//!
//! Protocol types are defined in `rtccore::relay`.

use async_trait::async_trait;
use log::{debug, info};
use rtccore::media::IceServer;
use rtccore::net::HttpClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub use rtccore::relay::{RelayCredentialsSpec, RelayError};

/// Supplies the STUN/TURN servers handed to new peer connections.
#[async_trait]
pub trait RelaySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IceServer>, RelayError>;
}

/// A fixed server list.
#[derive(Debug, Clone, Default)]
pub struct StaticRelaySource {
    servers: Vec<IceServer>,
}

impl StaticRelaySource {
    pub fn new(servers: Vec<IceServer>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl RelaySource for StaticRelaySource {
    async fn fetch(&self) -> Result<Vec<IceServer>, RelayError> {
        Ok(self.servers.clone())
    }
}

#[derive(Debug, Clone)]
struct CachedServers {
    servers: Vec<IceServer>,
    fetched_at: Instant,
}

impl CachedServers {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

/// Fetches servers from a credential endpoint, optionally reusing them for
/// `ttl`.
pub struct HttpRelaySource {
    spec: RelayCredentialsSpec,
    http: Arc<dyn HttpClient>,
    ttl: Option<Duration>,
    cache: RwLock<Option<CachedServers>>,
}

impl HttpRelaySource {
    pub fn new(spec: RelayCredentialsSpec, http: Arc<dyn HttpClient>, ttl: Option<Duration>) -> Self {
        Self {
            spec,
            http,
            ttl,
            cache: RwLock::new(None),
        }
    }
}

#[async_trait]
impl RelaySource for HttpRelaySource {
    async fn fetch(&self) -> Result<Vec<IceServer>, RelayError> {
        if let Some(ttl) = self.ttl {
            let guard = self.cache.read().await;
            if let Some(cached) = &*guard
                && !cached.is_expired(ttl)
            {
                debug!("Reusing {} cached relay servers", cached.servers.len());
                return Ok(cached.servers.clone());
            }
        }

        let response = self
            .http
            .execute(self.spec.build_request())
            .await
            .map_err(|e| RelayError::Request(e.to_string()))?;
        let servers = self.spec.parse_response(&response)?;
        info!("Fetched {} relay servers", servers.len());

        if self.ttl.is_some() {
            *self.cache.write().await = Some(CachedServers {
                servers: servers.clone(),
                fetched_at: Instant::now(),
            });
        }

        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtccore::net::{HttpRequest, HttpResponse};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHttpClient {
        requests: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpClient for RecordingHttpClient {
        async fn execute(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse {
                status_code: 200,
                body: br#"{"s":"ok","v":{"iceServers":[{"url":"stun:relay.example.net"}]}}"#
                    .to_vec(),
            })
        }
    }

    struct FailingHttpClient;

    #[async_trait]
    impl HttpClient for FailingHttpClient {
        async fn execute(&self, _request: HttpRequest) -> anyhow::Result<HttpResponse> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    fn spec() -> RelayCredentialsSpec {
        RelayCredentialsSpec::new("https://relay.example.net/_turn/app")
            .with_basic_auth("user", "secret")
    }

    #[tokio::test]
    async fn test_fetch_without_cache_hits_endpoint_each_time() {
        let http = Arc::new(RecordingHttpClient::default());
        let source = HttpRelaySource::new(spec(), http.clone(), None);

        source.fetch().await.unwrap();
        let servers = source.fetch().await.unwrap();

        assert_eq!(servers, vec![IceServer::new("stun:relay.example.net")]);
        let requests = http.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "PUT");
    }

    #[tokio::test]
    async fn test_fetch_reuses_cached_servers() {
        let http = Arc::new(RecordingHttpClient::default());
        let source = HttpRelaySource::new(spec(), http.clone(), Some(Duration::from_secs(300)));

        source.fetch().await.unwrap();
        source.fetch().await.unwrap();

        assert_eq!(http.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_request_failure_is_reported() {
        let source = HttpRelaySource::new(spec(), Arc::new(FailingHttpClient), None);
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, RelayError::Request(ref e) if e.contains("refused")));
    }
}
