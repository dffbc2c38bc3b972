use crate::credential::types::{KeysFile, VirtualKey};
use anyhow::{Context, anyhow, bail};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// 启动时加载一次的 virtual key 映射，之后只读共享。
#[derive(Debug)]
pub struct KeyRegistry {
    keys: HashMap<String, VirtualKey>,
}

impl KeyRegistry {
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("读取 keys 文件失败: {}", path.display()))?;
        let file: KeysFile = sonic_rs::from_slice(&data)
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("解析 keys 文件失败: {}", path.display()))?;
        Self::from_keys(file.virtual_keys)
    }

    pub fn from_keys(keys: HashMap<String, VirtualKey>) -> anyhow::Result<Self> {
        if keys.is_empty() {
            bail!("no virtual keys configured");
        }
        Ok(Self { keys })
    }

    /// 查找 virtual key；不存在返回 None（由调用方转换为 401）。
    pub fn resolve(&self, token: &str) -> Option<&VirtualKey> {
        self.keys.get(token)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// 每个 provider 取一个密钥用于健康探测。
    ///
    /// 按 token 排序后取第一个，保证多次探测使用同一凭证。
    pub fn provider_credentials(&self) -> BTreeMap<String, String> {
        let mut tokens: Vec<&String> = self.keys.keys().collect();
        tokens.sort();

        let mut out = BTreeMap::new();
        for token in tokens {
            let key = &self.keys[token];
            out.entry(key.provider.clone())
                .or_insert_with(|| key.api_key.clone());
        }
        out
    }
}
