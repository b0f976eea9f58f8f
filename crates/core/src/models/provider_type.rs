//! Provider 类型定义
//!
//! 网关可转发的上游 Provider，每种 Provider 拥有独立的凭证池和备用凭证库存。

use serde::{Deserialize, Serialize};

/// Provider 类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Factory（droid）API Key，按 token 额度计费
    Factory,
    /// OpenHands LLM 代理 Key，按预算计费
    #[serde(rename = "openhands")]
    OpenHands,
    /// OhMyGPT API Key
    #[serde(rename = "ohmygpt")]
    OhMyGpt,
}

impl ProviderType {
    /// 所有 Provider（按固定顺序）
    pub const ALL: [ProviderType; 3] = [
        ProviderType::Factory,
        ProviderType::OpenHands,
        ProviderType::OhMyGpt,
    ];

    /// 存储中使用的标识
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Factory => "factory",
            ProviderType::OpenHands => "openhands",
            ProviderType::OhMyGpt => "ohmygpt",
        }
    }

    /// 上游返回的"额度耗尽"提示文本（小写匹配）
    ///
    /// Factory 在额度用完时返回 200/4xx 均可能出现的引导文案，
    /// 只能靠响应体识别。
    pub fn quota_markers(&self) -> &'static [&'static str] {
        match self {
            ProviderType::Factory => &[
                "ready for more? reload your tokens",
                "ready to get started? subscribe",
                "app.factory.ai/settings/billing",
            ],
            ProviderType::OpenHands | ProviderType::OhMyGpt => &[
                "insufficient credits",
                "insufficient_quota",
            ],
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "factory" | "droid" | "troll" => Ok(ProviderType::Factory),
            "openhands" | "open_hands" | "open-hands" => Ok(ProviderType::OpenHands),
            "ohmygpt" | "oh_my_gpt" | "oh-my-gpt" => Ok(ProviderType::OhMyGpt),
            _ => Err(format!("Unknown provider: {s}")),
        }
    }
}
