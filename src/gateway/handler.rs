use super::auth;
use crate::config::Config;
use crate::credential::registry::KeyRegistry;
use crate::error::AppError;
use crate::logging::{InteractionLog, InteractionRecord, capture_body, mask_key};
use crate::quota::{QuotaTracker, UsageStats};
use crate::upstream::client::{ForwardOutcome, ProviderClient, ProviderHealth};
use crate::upstream::validate::validate_shape;
use axum::Json;
use axum::body::Body;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// 所有路由共享的网关状态；除 QuotaTracker 外均为只读。
pub struct GatewayState {
    pub cfg: Config,
    pub keys: Arc<KeyRegistry>,
    pub tracker: Arc<QuotaTracker>,
    pub upstream: ProviderClient,
    pub interactions: Arc<InteractionLog>,
}

/// 单个请求在各阶段收集到的、用于交互日志的信息。
#[derive(Default)]
struct RequestContext {
    virtual_key: String,
    provider: String,
    request: Option<sonic_rs::Value>,
}

pub async fn handle_chat_completions(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let start = Instant::now();
    let started_at = Utc::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut ctx = RequestContext::default();

    let result = run_lifecycle(&state, &headers, body, start, &mut ctx).await;

    let level = state.interactions.level();
    let (mut resp, status, response, error) = match result {
        Ok(out) => {
            let captured = capture_body(level, &out.body);
            let status = StatusCode::from_u16(out.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let resp = (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                out.body,
            )
                .into_response();
            (resp, out.status, captured, None)
        }
        Err(e) => {
            if matches!(e, AppError::Upstream(_)) {
                tracing::warn!(%request_id, provider = %ctx.provider, error = %e, "上游转发失败");
            } else {
                tracing::debug!(%request_id, error = %e, "请求被拒绝");
            }
            let status = e.status().as_u16();
            let message = e.to_string();
            (e.into_response(), status, None, Some(message))
        }
    };

    state
        .interactions
        .record(&InteractionRecord {
            timestamp: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            request_id: request_id.clone(),
            virtual_key: ctx.virtual_key,
            provider: ctx.provider,
            method: method.to_string(),
            path: uri.0.path().to_string(),
            status,
            duration_ms: elapsed_ms(start),
            request: ctx.request,
            response,
            error,
        })
        .await;

    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

/// 鉴权 → 配额 → 读取并校验请求体 → 转发 → 记录用量。
///
/// 任一阶段失败立即返回，后续阶段不执行；只有转发成功完成（含上游 4xx/5xx）才记录用量。
async fn run_lifecycle(
    state: &GatewayState,
    headers: &HeaderMap,
    body: Body,
    start: Instant,
    ctx: &mut RequestContext,
) -> Result<ForwardOutcome, AppError> {
    let (token, key) = auth::authenticate(&state.keys, headers)?;
    ctx.virtual_key = mask_key(token);
    ctx.provider = key.provider.clone();

    let admission = state.tracker.admit(token).await;
    if let Some(reason) = admission.reason() {
        return Err(AppError::QuotaExceeded(reason.to_string()));
    }

    let body = axum::body::to_bytes(body, state.cfg.max_body_bytes)
        .await
        .map_err(|_| AppError::bad_request("failed to read request body"))?;
    ctx.request = capture_body(state.interactions.level(), &body);
    validate_shape(&body)?;

    let out = state
        .upstream
        .forward(
            &key.provider,
            &key.api_key,
            body,
            headers,
            state.cfg.request_timeout(),
        )
        .await?;

    state.tracker.record(&key.provider, elapsed_ms(start)).await;
    Ok(out)
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub providers: BTreeMap<String, ProviderHealth>,
}

pub async fn handle_health(State(state): State<Arc<GatewayState>>) -> Json<HealthReport> {
    let credentials = state.keys.provider_credentials();
    let upstream = &state.upstream;

    let probes = credentials.iter().map(|(provider, secret)| async move {
        (provider.clone(), upstream.check_health(provider, secret).await)
    });
    let providers: BTreeMap<String, ProviderHealth> =
        futures::future::join_all(probes).await.into_iter().collect();

    let unhealthy: Vec<&str> = providers
        .iter()
        .filter(|(_, p)| !p.healthy)
        .map(|(name, _)| name.as_str())
        .collect();
    let all_healthy = unhealthy.is_empty();
    if !all_healthy {
        tracing::warn!(?unhealthy, "provider 健康检查失败");
    }

    Json(HealthReport {
        status: if all_healthy { "healthy" } else { "degraded" },
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        providers,
    })
}

pub async fn handle_metrics(State(state): State<Arc<GatewayState>>) -> Json<UsageStats> {
    Json(state.tracker.snapshot().await)
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: [&'static str; 3],
}

pub async fn handle_root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "LLM Gateway",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: ["/chat/completions", "/health", "/metrics"],
    })
}
