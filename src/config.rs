use crate::logging::LogLevel;
use anyhow::Context;
use figment::Figment;
use figment::providers::Env;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_KEYS_FILE_PATH: &str = "keys.json";
const DEFAULT_LOG_FILE_PATH: &str = "gateway.log";
const DEFAULT_QUOTA_LIMIT: u64 = 100;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// 启动时确定、运行期不可变的配置。
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub keys_file_path: String,

    pub quota_enabled: bool,
    /// 每个 virtual key 每小时最多放行的请求数。
    pub quota_limit: u64,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,

    pub log_to_file: bool,
    pub log_file_path: String,
    pub log_format: String,
    pub debug: String,

    pub openai_endpoint: Option<String>,
    pub anthropic_endpoint: Option<String>,
    pub proxy: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(default, alias = "HOST", deserialize_with = "de_text")]
    host: Option<String>,
    #[serde(alias = "SERVER_PORT")]
    server_port: Option<u16>,

    #[serde(default, alias = "KEYS_FILE_PATH", deserialize_with = "de_text")]
    keys_file_path: Option<String>,

    #[serde(default, alias = "QUOTA_ENABLED", deserialize_with = "de_flag")]
    quota_enabled: Option<bool>,
    #[serde(alias = "QUOTA_LIMIT")]
    quota_limit: Option<u64>,
    #[serde(alias = "REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,
    #[serde(alias = "MAX_BODY_BYTES")]
    max_body_bytes: Option<usize>,

    #[serde(default, alias = "LOG_TO_FILE", deserialize_with = "de_flag")]
    log_to_file: Option<bool>,
    #[serde(default, alias = "LOG_FILE_PATH", deserialize_with = "de_text")]
    log_file_path: Option<String>,
    #[serde(default, alias = "LOG_FORMAT", deserialize_with = "de_text")]
    log_format: Option<String>,
    #[serde(default, alias = "DEBUG", deserialize_with = "de_text")]
    debug: Option<String>,

    #[serde(default, alias = "OPENAI_ENDPOINT", deserialize_with = "de_text")]
    openai_endpoint: Option<String>,
    #[serde(default, alias = "ANTHROPIC_ENDPOINT", deserialize_with = "de_text")]
    anthropic_endpoint: Option<String>,
    #[serde(default, alias = "PROXY", deserialize_with = "de_text")]
    proxy: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Figment::from(Env::raw()))
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let raw = figment
            .extract::<RawEnv>()
            .context("解析环境变量配置失败")?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawEnv) -> Self {
        Self {
            host: non_empty(raw.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.server_port.unwrap_or(DEFAULT_PORT),
            keys_file_path: non_empty(raw.keys_file_path)
                .unwrap_or_else(|| DEFAULT_KEYS_FILE_PATH.to_string()),
            quota_enabled: raw.quota_enabled.unwrap_or(true),
            quota_limit: raw.quota_limit.unwrap_or(DEFAULT_QUOTA_LIMIT),
            request_timeout_secs: raw
                .request_timeout
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_body_bytes: raw.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            log_to_file: raw.log_to_file.unwrap_or(false),
            log_file_path: non_empty(raw.log_file_path)
                .unwrap_or_else(|| DEFAULT_LOG_FILE_PATH.to_string()),
            log_format: non_empty(raw.log_format).unwrap_or_else(|| "text".to_string()),
            debug: non_empty(raw.debug).unwrap_or_else(|| "low".to_string()),
            openai_endpoint: non_empty(raw.openai_endpoint),
            anthropic_endpoint: non_empty(raw.anthropic_endpoint),
            proxy: raw.proxy.unwrap_or_default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.debug)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.trim().eq_ignore_ascii_case("json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawEnv::default())
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// 环境变量的值会被 figment 推断为 bool/数字/字符串，这里统一接收。
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s,
        }
    }
}

fn de_text<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(d)?.map(Scalar::into_text))
}

/// 只有 "true" 与 "1" 视为开启，其余非空值视为关闭。
fn de_flag<'de, D>(d: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(d)?.map(|v| match v {
        Scalar::Bool(b) => b,
        Scalar::Int(n) => n == 1,
        Scalar::Float(_) => false,
        Scalar::Text(s) => matches!(s.trim(), "true" | "1"),
    }))
}
