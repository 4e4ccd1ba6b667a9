use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/**
 * \brief 参与对比的两个模型服务。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
}

impl ProviderKind {
    /** \brief 面板与日志中显示的名称。 */
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "Gemini",
            ProviderKind::Groq => "Groq",
        }
    }

    /** \brief 保存该 Provider API Key 的存储键。 */
    pub fn credential_key(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-api-key",
            ProviderKind::Groq => "groq-api-key",
        }
    }
}

/**
 * \brief 单次 Provider 调用的统一结果。
 * \details 只要 `error` 有值即视为失败，不论 `text` 内容。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /**
     * \brief 写入历史的内容：优先正文，其次错误信息，否则为占位文本。
     */
    pub fn history_value(&self) -> String {
        if !self.text.is_empty() {
            self.text.clone()
        } else if let Some(err) = self.error.as_deref().filter(|e| !e.is_empty()) {
            err.to_string()
        } else {
            NO_RESPONSE_PLACEHOLDER.to_string()
        }
    }
}

pub const NO_RESPONSE_PLACEHOLDER: &str = "No response";

/**
 * \brief 一次完成的对比记录。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub prompt: String,
    pub gemini_response: String,
    pub groq_response: String,
    /** \brief Unix 毫秒时间戳。 */
    pub timestamp: i64,
}

impl HistoryEntry {
    pub fn new(prompt: &str, gemini: &ProviderResult, groq: &ProviderResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            gemini_response: gemini.history_value(),
            groq_response: groq.history_value(),
            timestamp: now_millis(),
        }
    }

    /** \brief `timestamp` 的 RFC 3339 表示（UTC）。 */
    pub fn formatted_time(&self) -> String {
        OffsetDateTime::from_unix_timestamp_nanos(self.timestamp as i128 * 1_000_000)
            .ok()
            .and_then(|t| t.format(&Rfc3339).ok())
            .unwrap_or_else(|| self.timestamp.to_string())
    }
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/**
 * \brief Provider 模型列表中的一项。
 */
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelOption {
    pub id: &'static str,
    pub name: &'static str,
}

pub const GEMINI_MODELS: &[ModelOption] = &[
    ModelOption {
        id: "gemini-1.5-flash",
        name: "Gemini 1.5 Flash",
    },
    ModelOption {
        id: "gemini-1.5-pro",
        name: "Gemini 1.5 Pro",
    },
    ModelOption {
        id: "gemini-2.0-flash",
        name: "Gemini 2.0 Flash",
    },
];

pub const GROQ_MODELS: &[ModelOption] = &[
    ModelOption {
        id: "llama-3.3-70b-versatile",
        name: "Llama 3.3 70B Versatile",
    },
    ModelOption {
        id: "llama-3.1-8b-instant",
        name: "Llama 3.1 8B Instant",
    },
    ModelOption {
        id: "gemma2-9b-it",
        name: "Gemma 2 9B",
    },
    ModelOption {
        id: "mixtral-8x7b-32768",
        name: "Mixtral 8x7B",
    },
];

/** \brief 某 Provider 可选的模型列表。 */
pub fn catalog(kind: ProviderKind) -> &'static [ModelOption] {
    match kind {
        ProviderKind::Gemini => GEMINI_MODELS,
        ProviderKind::Groq => GROQ_MODELS,
    }
}

/** \brief 未选择时使用列表第一项。 */
pub fn default_model(kind: ProviderKind) -> &'static str {
    catalog(kind)[0].id
}

/**
 * \brief 单次提交选择的模型，不持久化。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub gemini: String,
    pub groq: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            gemini: default_model(ProviderKind::Gemini).to_string(),
            groq: default_model(ProviderKind::Groq).to_string(),
        }
    }
}

impl ModelSelection {
    /** \brief 未选择（或为空）的一侧使用默认模型。 */
    pub fn with_overrides(gemini: Option<String>, groq: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            gemini: gemini
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(defaults.gemini),
            groq: groq.filter(|m| !m.trim().is_empty()).unwrap_or(defaults.groq),
        }
    }
}
