use anyhow::Result;
use async_trait::async_trait;
use rtccore::net::{HttpClient, HttpRequest, HttpResponse};
use std::time::Duration;
use ureq::Agent;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client backed by a blocking `ureq` agent.
///
/// Requests run on tokio's blocking pool. Non-2xx responses are returned as
/// ordinary [`HttpResponse`]s so callers can report the status themselves.
#[derive(Debug, Clone)]
pub struct UreqHttpClient {
    agent: Agent,
}

impl UreqHttpClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Client whose requests give up after `timeout` in total.
    pub fn with_timeout(timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn send(agent: &Agent, request: HttpRequest) -> Result<HttpResponse> {
    let HttpRequest {
        url,
        method,
        headers,
        body,
    } = request;

    let mut response = match method.as_str() {
        "GET" => {
            let mut req = agent.get(&url);
            for (key, value) in &headers {
                req = req.header(key, value);
            }
            req.call()?
        }
        "POST" | "PUT" => {
            let mut req = if method == "POST" {
                agent.post(&url)
            } else {
                agent.put(&url)
            };
            for (key, value) in &headers {
                req = req.header(key, value);
            }
            req.send(body.as_deref().unwrap_or_default())?
        }
        other => anyhow::bail!("Unsupported HTTP method: {other}"),
    };

    Ok(HttpResponse {
        status_code: response.status().as_u16(),
        body: response.body_mut().read_to_vec()?,
    })
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || send(&agent, request)).await?
    }
}
