//! Proxy-routed request strategy backed by a FlareSolverr server.
//!
//! The server solves bot-mitigation challenges in a real browser and hands
//! back the rendered page. Requests reuse one server-side session; a 4xx from
//! the target rotates to the next configured outbound proxy and opens a new
//! session.

use crate::descriptor::RequestKind;
use crate::error::ScanError;
use crate::request::{FetchRequest, FetchResponse, HttpMethod, RequestStrategy};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct ProxyRotator {
    proxies: Vec<String>,
    current_index: usize,
    last_rotation: Instant,
    rotation_interval: Duration,
}

impl ProxyRotator {
    pub fn new(proxies: Vec<String>, rotation_interval_secs: u64) -> Self {
        Self {
            proxies,
            current_index: 0,
            last_rotation: Instant::now(),
            rotation_interval: Duration::from_secs(rotation_interval_secs),
        }
    }

    /// Current proxy, rotating first if the interval has passed.
    pub fn get_current(&mut self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        if self.last_rotation.elapsed() >= self.rotation_interval {
            self.advance();
        }
        Some(self.proxies[self.current_index].clone())
    }

    pub fn advance(&mut self) {
        if self.proxies.is_empty() {
            return;
        }
        self.current_index = (self.current_index + 1) % self.proxies.len();
        self.last_rotation = Instant::now();
        log::info!(
            "[flaresolverr] Rotated to proxy {}/{}",
            self.current_index + 1,
            self.proxies.len()
        );
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlareSolverrConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_timeout_ms: u64,
    pub proxies: Vec<String>,
    pub rotation_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
struct FlareReply {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    solution: Option<Solution>,
}

#[derive(Debug, Deserialize)]
struct Solution {
    url: String,
    status: u16,
    #[serde(default)]
    response: String,
}

#[derive(Debug, Serialize)]
struct ProxySpec {
    url: String,
}

pub struct FlareSolverrClient {
    http: Client,
    config: FlareSolverrConfig,
    rotator: Mutex<ProxyRotator>,
    session: tokio::sync::Mutex<Option<String>>,
}

impl FlareSolverrClient {
    pub fn new(config: FlareSolverrConfig) -> Result<Self, reqwest::Error> {
        // the server itself waits up to max_timeout_ms for the browser
        let http = Client::builder()
            .timeout(Duration::from_millis(config.max_timeout_ms + 10_000))
            .build()?;
        let rotator = ProxyRotator::new(config.proxies.clone(), config.rotation_interval_secs);
        Ok(Self {
            http,
            config,
            rotator: Mutex::new(rotator),
            session: tokio::sync::Mutex::new(None),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1", self.config.base_url.trim_end_matches('/'))
    }

    fn current_proxy(&self) -> Option<ProxySpec> {
        let mut rotator = self.rotator.lock().unwrap_or_else(|p| p.into_inner());
        rotator.get_current().map(|url| ProxySpec { url })
    }

    async fn command(&self, payload: serde_json::Value) -> Result<FlareReply, ScanError> {
        let endpoint = self.endpoint();
        let mut builder = self.http.post(&endpoint).json(&payload);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", key.as_str());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ScanError::network(&endpoint, &e))?;
        response
            .json::<FlareReply>()
            .await
            .map_err(|e| ScanError::network(&endpoint, &e))
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                log::error!("[flaresolverr] Health check answered {}", response.status());
                false
            }
            Err(e) => {
                log::error!("[flaresolverr] Health check failed: {}", e);
                false
            }
        }
    }

    async fn session_id(&self) -> Result<String, ScanError> {
        let mut session = self.session.lock().await;
        if let Some(id) = session.as_ref() {
            return Ok(id.clone());
        }
        let mut payload = json!({ "cmd": "sessions.create" });
        if let Some(proxy) = self.current_proxy() {
            payload["proxy"] = json!(proxy);
        }
        let reply = self.command(payload).await?;
        let id = reply.session.ok_or_else(|| ScanError::Fetch {
            url: self.endpoint(),
            status: None,
            timed_out: false,
            message: format!("session was not created: {}", reply.message),
        })?;
        log::debug!("[flaresolverr] New session {} created", id);
        *session = Some(id.clone());
        Ok(id)
    }

    async fn drop_session(&self) {
        let old = self.session.lock().await.take();
        if let Some(id) = old {
            let payload = json!({ "cmd": "sessions.destroy", "session": id });
            if let Err(e) = self.command(payload).await {
                log::warn!("[flaresolverr] Failed to destroy session {}: {}", id, e);
            }
        }
    }

    fn target_url(request: &FetchRequest) -> Result<String, ScanError> {
        if request.params.is_empty() {
            return Ok(request.url.clone());
        }
        Url::parse_with_params(&request.url, &request.params)
            .map(|u| u.to_string())
            .map_err(|e| ScanError::Fetch {
                url: request.url.clone(),
                status: None,
                timed_out: false,
                message: format!("invalid url: {}", e),
            })
    }
}

#[async_trait]
impl RequestStrategy for FlareSolverrClient {
    fn kind(&self) -> RequestKind {
        RequestKind::ProxyRouted
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ScanError> {
        let session = self.session_id().await?;
        let url = Self::target_url(request)?;

        let mut payload = json!({
            "cmd": "request.get",
            "url": url,
            "session": session,
            "maxTimeout": self.config.max_timeout_ms,
        });
        if request.method == HttpMethod::Post {
            payload["cmd"] = json!("request.post");
            let form = request
                .form
                .as_ref()
                .map(|f| {
                    f.iter()
                        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                        .collect::<Vec<_>>()
                        .join("&")
                })
                .unwrap_or_default();
            payload["postData"] = json!(form);
        }

        let reply = self.command(payload).await?;
        let solution = match (reply.status.as_str(), reply.solution) {
            ("ok", Some(solution)) => solution,
            (_, _) => {
                self.drop_session().await;
                return Err(ScanError::Fetch {
                    url: request.url.clone(),
                    status: None,
                    timed_out: reply.message.to_lowercase().contains("timeout"),
                    message: format!("flaresolverr: {}", reply.message),
                });
            }
        };

        if (400..500).contains(&solution.status) {
            log::error!(
                "[flaresolverr] {} answered {}, rotating proxy",
                request.url,
                solution.status
            );
            self.rotator
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .advance();
            self.drop_session().await;
        }

        Ok(FetchResponse {
            status: solution.status,
            body: solution.response,
            url: solution.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_rotator_without_proxies() {
        let mut rotator = ProxyRotator::new(Vec::new(), 0);
        assert!(rotator.get_current().is_none());
        rotator.advance();
        assert!(rotator.get_current().is_none());
    }

    #[test]
    fn test_rotator_cycles() {
        let mut rotator = ProxyRotator::new(
            vec!["http://p1:8080".to_string(), "http://p2:8080".to_string()],
            3600,
        );
        assert_eq!(rotator.get_current().as_deref(), Some("http://p1:8080"));
        rotator.advance();
        assert_eq!(rotator.get_current().as_deref(), Some("http://p2:8080"));
        rotator.advance();
        assert_eq!(rotator.get_current().as_deref(), Some("http://p1:8080"));
    }

    #[test]
    fn test_target_url_appends_params() {
        let mut params = BTreeMap::new();
        params.insert("s".to_string(), "solo leveling".to_string());
        let request = FetchRequest::get("https://toonsite.example/").with_params(params);
        let url = FlareSolverrClient::target_url(&request).unwrap();
        assert!(url.starts_with("https://toonsite.example/?s=solo"));
    }

    #[test]
    fn test_reply_parsing() {
        let reply: FlareReply = serde_json::from_str(
            r#"{"status":"ok","message":"","solution":{"url":"https://x.example/","status":200,"response":"<html></html>"}}"#,
        )
        .unwrap();
        let solution = reply.solution.unwrap();
        assert_eq!(solution.status, 200);
        assert_eq!(solution.response, "<html></html>");
    }
}
