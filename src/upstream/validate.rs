use sonic_rs::{JsonContainerTrait, JsonValueTrait};
use thiserror::Error;

/// 调用方请求体的形状错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid JSON format: {0}")]
    InvalidJson(String),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

const REQUIRED_FIELDS: [&str; 2] = ["model", "messages"];

/// 仅校验请求体是 JSON 对象且包含 model 与 messages 字段；不检查字段内容。
pub fn validate_shape(body: &[u8]) -> Result<(), ValidationError> {
    let value: sonic_rs::Value =
        sonic_rs::from_slice(body).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    let Some(obj) = value.as_object() else {
        return Err(ValidationError::NotAnObject);
    };

    for field in REQUIRED_FIELDS {
        if obj.get(&field).is_none() {
            return Err(ValidationError::MissingField(field));
        }
    }
    Ok(())
}
