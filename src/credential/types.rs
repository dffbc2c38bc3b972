use serde::Deserialize;
use std::collections::HashMap;

/// 单个 virtual key 对应的上游身份：provider 名称 + 真实密钥。
#[derive(Clone, Deserialize)]
pub struct VirtualKey {
    pub provider: String,
    pub api_key: String,
}

impl std::fmt::Debug for VirtualKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualKey")
            .field("provider", &self.provider)
            .field("api_key", &"***")
            .finish()
    }
}

/// keys.json 的文件结构。
#[derive(Debug, Default, Deserialize)]
pub struct KeysFile {
    #[serde(default)]
    pub virtual_keys: HashMap<String, VirtualKey>,
}
