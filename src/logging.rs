use crate::config::Config;
use anyhow::Context;
use serde::Serialize;
use sonic_rs::{JsonContainerTrait, JsonValueTrait};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// 交互日志中请求/响应体的详细程度：
/// - off：只记录元数据
/// - low：记录请求/响应体，截断内联的 base64 数据（默认）
/// - high：原样记录请求/响应体
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    High = 2,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "off" | "none" => Self::Off,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Low,
        }
    }

    pub fn bodies_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

/// 每个请求一条的结构化交互记录。
#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub timestamp: String,
    pub request_id: String,
    pub virtual_key: String,
    pub provider: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<sonic_rs::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<sonic_rs::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 交互日志输出：始终写入 tracing，可选追加到文件。
///
/// 任何写入失败只上报到 tracing，不影响请求处理。
#[derive(Debug)]
pub struct InteractionLog {
    level: LogLevel,
    file: Option<Mutex<tokio::fs::File>>,
}

impl InteractionLog {
    pub async fn open(cfg: &Config) -> anyhow::Result<Self> {
        let file = if cfg.log_to_file {
            let f = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&cfg.log_file_path)
                .await
                .with_context(|| format!("打开日志文件失败: {}", cfg.log_file_path))?;
            Some(Mutex::new(f))
        } else {
            None
        };

        Ok(Self {
            level: cfg.log_level(),
            file,
        })
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub async fn record(&self, entry: &InteractionRecord) {
        let line = match sonic_rs::to_string(entry) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, request_id = %entry.request_id, "序列化交互日志失败");
                return;
            }
        };

        tracing::info!(target: "llm_gateway::interaction", "{line}");

        let Some(file) = &self.file else {
            return;
        };
        let mut f = file.lock().await;
        let mut buf = line.into_bytes();
        buf.push(b'\n');
        if let Err(e) = write_line(&mut f, &buf).await {
            tracing::error!(error = %e, "写入日志文件失败");
        }
    }
}

async fn write_line(f: &mut tokio::fs::File, buf: &[u8]) -> std::io::Result<()> {
    f.write_all(buf).await?;
    f.flush().await
}

/// 按日志等级把请求/响应体转换为可记录的 JSON。
pub fn capture_body(level: LogLevel, body: &[u8]) -> Option<sonic_rs::Value> {
    if !level.bodies_enabled() || body.is_empty() {
        return None;
    }

    // 超大包体不解析，避免日志占用大量内存与 CPU。
    const MAX_PARSE_BYTES: usize = 2 * 1024 * 1024;
    if body.len() > MAX_PARSE_BYTES {
        return Some(sonic_rs::Value::from(
            format!("(body too large: {} bytes)", body.len()).as_str(),
        ));
    }

    match sonic_rs::from_slice::<sonic_rs::Value>(body) {
        Ok(v) if level.raw_enabled() => Some(v),
        Ok(v) => Some(sanitize(&v)),
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            Some(sonic_rs::Value::from(truncate_text(&text).as_str()))
        }
    }
}

/// 日志中只保留 virtual key 的前缀。
pub fn mask_key(key: &str) -> String {
    if key.chars().count() <= 8 {
        return "***".to_string();
    }
    let prefix: String = key.chars().take(6).collect();
    format!("{prefix}***")
}

fn sanitize(v: &sonic_rs::Value) -> sonic_rs::Value {
    if let Some(obj) = v.as_object() {
        let mut out = sonic_rs::Object::new();
        for (key, child) in obj.iter() {
            out.insert(key, sanitize(child));
        }
        return out.into_value();
    }

    if let Some(arr) = v.as_array() {
        let items: Vec<sonic_rs::Value> = arr.iter().map(sanitize).collect();
        return sonic_rs::Value::from(items);
    }

    if let Some(s) = v.as_str()
        && let Some(short) = truncate_inline_data(s)
    {
        return sonic_rs::Value::from(short.as_str());
    }

    v.to_owned()
}

const KEEP: usize = 20;

/// 截断 data URL 或裸 base64 字符串；普通文本返回 None。按字符计数，不会在多字节字符中间切开。
fn truncate_inline_data(s: &str) -> Option<String> {
    if s.len() <= 100 {
        return None;
    }

    if let Some(idx) = s.find(";base64,") {
        let data_start = idx + ";base64,".len();
        let data = &s[data_start..];
        let total = data.chars().count();
        if total <= KEEP * 2 {
            return None;
        }
        return Some(format!(
            "{}{}...[TRUNCATED: {} chars]",
            &s[..data_start],
            head_chars(data, KEEP),
            total - KEEP
        ));
    }

    let looks_like_base64 = s.len() > 200
        && s.bytes()
            .take(100)
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='));
    if !looks_like_base64 {
        return None;
    }

    let total = s.chars().count();
    Some(format!(
        "{}...[TRUNCATED: {} chars]...{}",
        head_chars(s, KEEP),
        total.saturating_sub(KEEP * 2),
        tail_chars(s, KEEP)
    ))
}

fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

fn truncate_text(s: &str) -> String {
    const MAX_CHARS: usize = 32 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}
