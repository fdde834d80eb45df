use crate::cache::{CacheKey, ResponseCache};
use crate::descriptor::RequestKind;
use crate::error::ScanError;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// One outbound request, independent of the strategy that sends it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub form: Option<BTreeMap<String, String>>,
    /// Skip the cache read; a successful response still refreshes it.
    pub bypass_cache: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            form: None,
            bypass_cache: false,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_form(mut self, form: BTreeMap<String, String>) -> Self {
        self.form = Some(form);
        self.method = HttpMethod::Post;
        self
    }

    pub fn fresh(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        let mut pairs: Vec<(String, String)> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(form) = &self.form {
            pairs.extend(form.iter().map(|(k, v)| (format!("form:{}", k), v.clone())));
        }
        CacheKey::new(&self.url, self.method, pairs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    /// Final URL after redirects.
    pub url: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// How a site is reached. Implementations return every HTTP response as is
/// and only fail on transport errors; status handling lives in [`Fetcher`].
#[async_trait]
pub trait RequestStrategy: Send + Sync {
    fn kind(&self) -> RequestKind;

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ScanError>;
}

pub(crate) fn build_request(client: &Client, request: &FetchRequest) -> RequestBuilder {
    let mut builder = match request.method {
        HttpMethod::Get => client.get(&request.url),
        HttpMethod::Post => client.post(&request.url),
    };
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.params.is_empty() {
        builder = builder.query(&request.params);
    }
    if let Some(form) = &request.form {
        builder = builder.form(form);
    }
    builder
}

pub(crate) async fn read_response(
    request_url: &str,
    response: reqwest::Response,
) -> Result<FetchResponse, ScanError> {
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| ScanError::network(request_url, &e))?;
    Ok(FetchResponse { status, body, url })
}

/// Plain reqwest client, no browser disguise.
pub struct DirectHttp {
    client: Client,
}

impl DirectHttp {
    pub fn new(timeout: Duration, proxy_url: Option<&str>) -> Result<Self, reqwest::Error> {
        let mut builder = ClientBuilder::new()
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true);
        if let Some(proxy) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestStrategy for DirectHttp {
    fn kind(&self) -> RequestKind {
        RequestKind::Direct
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ScanError> {
        let response = build_request(&self.client, request)
            .send()
            .await
            .map_err(|e| ScanError::network(&request.url, &e))?;
        read_response(&request.url, response).await
    }
}

/// Bot-mitigation interstitials served instead of the page.
fn looks_like_challenge(body: &str) -> bool {
    body.contains("cf-chl")
        || body.contains("challenge-platform")
        || body.contains("<title>Just a moment...</title>")
}

pub(crate) fn classify(url: &str, response: &FetchResponse) -> Result<(), ScanError> {
    match response.status {
        200..=299 => Ok(()),
        401 | 403 => Err(ScanError::Blocked {
            url: url.to_string(),
            status: response.status,
        }),
        404 | 410 => Err(ScanError::NotFound {
            url: url.to_string(),
        }),
        503 if looks_like_challenge(&response.body) => Err(ScanError::Blocked {
            url: url.to_string(),
            status: response.status,
        }),
        status => Err(ScanError::Fetch {
            url: url.to_string(),
            status: Some(status),
            timed_out: false,
            message: format!("unexpected status {}", status),
        }),
    }
}

/// Routes requests to the strategy a site is configured for and keeps the
/// shared response cache honest.
pub struct Fetcher {
    strategies: HashMap<RequestKind, Arc<dyn RequestStrategy>>,
    cache: ResponseCache,
}

impl Fetcher {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            strategies: HashMap::new(),
            cache: ResponseCache::new(cache_ttl),
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn RequestStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn supports(&self, kind: RequestKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn fetch(
        &self,
        kind: RequestKind,
        request: &FetchRequest,
    ) -> Result<FetchResponse, ScanError> {
        let key = request.cache_key();
        if !request.bypass_cache {
            if let Some(hit) = self.cache.get(&key) {
                log::debug!("[fetch] cache hit for {}", request.url);
                return Ok(hit);
            }
        }

        let strategy = self.strategies.get(&kind).ok_or_else(|| {
            ScanError::configuration(
                kind.as_str(),
                format!("no {} request strategy is configured", kind.as_str()),
            )
        })?;

        log::debug!(
            "[fetch] {} {} via {}",
            request.method.as_str(),
            request.url,
            kind.as_str()
        );
        let response = strategy.fetch(request).await?;

        match classify(&request.url, &response) {
            Ok(()) => {
                self.cache.insert(key, response.clone());
                Ok(response)
            }
            Err(err) => {
                if matches!(err, ScanError::Blocked { .. }) && self.cache.invalidate(&key) {
                    log::warn!(
                        "[fetch] {} answered {}, dropped cached copy",
                        request.url,
                        response.status
                    );
                }
                Err(err)
            }
        }
    }

    pub async fn fetch_text(
        &self,
        kind: RequestKind,
        request: &FetchRequest,
    ) -> Result<String, ScanError> {
        Ok(self.fetch(kind, request).await?.body)
    }
}
