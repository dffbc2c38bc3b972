use reqwest::header::{
    AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue,
};
use serde::Serialize;

/// Anthropic Messages API 固定版本。
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// 支持的上游 provider。新增 provider 只需在 `spec()` 中添加一行 ProviderSpec。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

/// 上游鉴权方式。
#[derive(Debug, Clone, Copy)]
enum AuthScheme {
    /// `Authorization: Bearer <secret>`
    Bearer,
    /// 自定义头直接携带密钥。
    Header(&'static str),
}

#[derive(Debug)]
struct ProviderSpec {
    name: &'static str,
    endpoint: &'static str,
    auth: AuthScheme,
    fixed_headers: &'static [(&'static str, &'static str)],
    probe_model: &'static str,
}

const OPENAI: ProviderSpec = ProviderSpec {
    name: "openai",
    endpoint: "https://api.openai.com/v1/chat/completions",
    auth: AuthScheme::Bearer,
    fixed_headers: &[],
    probe_model: "gpt-3.5-turbo",
};

const ANTHROPIC: ProviderSpec = ProviderSpec {
    name: "anthropic",
    endpoint: "https://api.anthropic.com/v1/messages",
    auth: AuthScheme::Header("x-api-key"),
    fixed_headers: &[("anthropic-version", ANTHROPIC_VERSION)],
    probe_model: "claude-3-haiku-20240307",
};

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::OpenAI, Provider::Anthropic];

    fn spec(self) -> &'static ProviderSpec {
        match self {
            Self::OpenAI => &OPENAI,
            Self::Anthropic => &ANTHROPIC,
        }
    }

    /// 按 keys.json 中的名称解析（大小写敏感）。
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.spec().name == name)
    }

    pub fn as_str(self) -> &'static str {
        self.spec().name
    }

    pub fn default_endpoint(self) -> &'static str {
        self.spec().endpoint
    }

    /// 写入 provider 的鉴权头与固定头（覆盖同名入站头）。
    pub fn apply_headers(
        self,
        headers: &mut HeaderMap,
        secret: &str,
    ) -> Result<(), InvalidHeaderValue> {
        let spec = self.spec();
        match spec.auth {
            AuthScheme::Bearer => {
                let mut value = HeaderValue::from_str(&format!("Bearer {secret}"))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            AuthScheme::Header(name) => {
                let mut value = HeaderValue::from_str(secret)?;
                value.set_sensitive(true);
                headers.insert(HeaderName::from_static(name), value);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for &(name, value) in spec.fixed_headers {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        Ok(())
    }

    /// 健康探测用的最小请求体（1 token）。
    pub fn probe_body(self) -> Vec<u8> {
        #[derive(Serialize)]
        struct ProbeMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ProbeRequest<'a> {
            model: &'a str,
            messages: [ProbeMessage<'a>; 1],
            max_tokens: u32,
        }

        let req = ProbeRequest {
            model: self.spec().probe_model,
            messages: [ProbeMessage {
                role: "user",
                content: "test",
            }],
            max_tokens: 1,
        };
        sonic_rs::to_vec(&req).unwrap_or_default()
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
