use crate::config::Config;
use crate::upstream::provider::Provider;
use axum::body::Bytes;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// 健康探测的固定超时。
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// 不转发给上游的入站头：鉴权头由 provider 重新设置，其余由 HTTP 客户端自行管理。
const STRIPPED_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "accept-encoding",
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("invalid upstream credential for {0}")]
    InvalidCredential(Provider),

    #[error("request to {provider} timed out after {timeout:?}")]
    Timeout { provider: Provider, timeout: Duration },

    #[error("failed to send request to {provider}: {source}")]
    Transport {
        provider: Provider,
        source: reqwest::Error,
    },

    #[error("failed to read response body from {provider}: {source}")]
    ResponseBody {
        provider: Provider,
        source: reqwest::Error,
    },
}

/// 一次转发的结果：上游原始响应体与状态码（非 2xx 也在此返回）。
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderHealth {
    fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
        }
    }

    fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
        }
    }
}

/// 无状态的上游转发器：只做请求翻译与透传，不解析响应体。
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    endpoints: HashMap<Provider, String>,
}

impl ProviderClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if !cfg.proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?);
        }

        let mut endpoints = HashMap::new();
        for provider in Provider::ALL {
            let url = endpoint_override(cfg, provider).unwrap_or(provider.default_endpoint());
            endpoints.insert(provider, url.to_string());
        }

        Ok(Self {
            http: builder.build()?,
            endpoints,
        })
    }

    pub fn endpoint(&self, provider: Provider) -> &str {
        self.endpoints
            .get(&provider)
            .map(String::as_str)
            .unwrap_or(provider.default_endpoint())
    }

    /// 把调用方请求转发到 provider，整个请求（含读取响应体）受 deadline 约束。
    pub async fn forward(
        &self,
        provider_name: &str,
        secret: &str,
        body: Bytes,
        inbound_headers: &HeaderMap,
        deadline: Duration,
    ) -> Result<ForwardOutcome, UpstreamError> {
        let Some(provider) = Provider::parse(provider_name) else {
            return Err(UpstreamError::UnsupportedProvider(provider_name.to_string()));
        };

        let mut headers = outbound_headers(inbound_headers);
        provider
            .apply_headers(&mut headers, secret)
            .map_err(|_| UpstreamError::InvalidCredential(provider))?;

        let url = self.endpoint(provider);
        tracing::debug!(%provider, url, bytes = body.len(), "转发请求到上游");

        let send = async {
            let resp = self
                .http
                .post(url)
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|source| UpstreamError::Transport { provider, source })?;
            let status = resp.status().as_u16();
            let body = resp
                .bytes()
                .await
                .map_err(|source| UpstreamError::ResponseBody { provider, source })?;
            Ok::<_, UpstreamError>(ForwardOutcome { status, body })
        };

        match tokio::time::timeout(deadline, send).await {
            Ok(res) => res,
            Err(_) => Err(UpstreamError::Timeout {
                provider,
                timeout: deadline,
            }),
        }
    }

    /// 可用性探测：200-499 视为可达，只有网络错误、超时或 5xx 视为不健康。
    pub async fn check_health(&self, provider_name: &str, secret: &str) -> ProviderHealth {
        let Some(provider) = Provider::parse(provider_name) else {
            return ProviderHealth::unhealthy(
                UpstreamError::UnsupportedProvider(provider_name.to_string()).to_string(),
            );
        };

        let probe = Bytes::from(provider.probe_body());
        match self
            .forward(
                provider_name,
                secret,
                probe,
                &HeaderMap::new(),
                HEALTH_PROBE_TIMEOUT,
            )
            .await
        {
            Ok(out) if (200..500).contains(&out.status) => ProviderHealth::healthy(),
            Ok(out) => ProviderHealth::unhealthy(format!("upstream returned status {}", out.status)),
            Err(e) => ProviderHealth::unhealthy(e.to_string()),
        }
    }
}

fn endpoint_override(cfg: &Config, provider: Provider) -> Option<&str> {
    match provider {
        Provider::OpenAI => cfg.openai_endpoint.as_deref(),
        Provider::Anthropic => cfg.anthropic_endpoint.as_deref(),
    }
}

fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound.iter() {
        if STRIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
