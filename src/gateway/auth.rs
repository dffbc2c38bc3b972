use crate::credential::registry::KeyRegistry;
use crate::credential::types::VirtualKey;
use crate::error::AppError;
use axum::http::{HeaderMap, header};

/// 从 `Authorization: Bearer <token>` 中取出 token。
///
/// 头部必须恰好是以单个空格分隔的两段，且第一段不区分大小写等于 "bearer"。
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    if raw.is_empty() {
        return Err(AppError::unauthorized("missing Authorization header"));
    }

    let invalid = || AppError::unauthorized("invalid Authorization header format");
    let value = std::str::from_utf8(raw).map_err(|_| invalid())?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(invalid()),
    }
}

/// 鉴权：解析 bearer token 并在注册表中查找，返回 token 与其绑定的上游凭证。
pub fn authenticate<'a>(
    registry: &'a KeyRegistry,
    headers: &'a HeaderMap,
) -> Result<(&'a str, &'a VirtualKey), AppError> {
    let token = bearer_token(headers)?;
    let key = registry
        .resolve(token)
        .ok_or_else(|| AppError::unauthorized("invalid virtual key"))?;
    Ok((token, key))
}
