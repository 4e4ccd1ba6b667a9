use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Config;
use crate::models::ProviderResult;
use crate::telemetry;

const TEMPERATURE: f64 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 1024;

const GEMINI_DEFAULT_ERROR: &str = "Failed to get response from Gemini";
const GROQ_DEFAULT_ERROR: &str = "Failed to get response from Groq";

/**
 * \brief 所选 Groq 模型不可用时依次尝试的模型。
 */
pub const GROQ_FALLBACK_MODELS: &[&str] = &[
    "llama-3.3-70b-versatile",
    "llama-3.1-8b-instant",
    "gemma2-9b-it",
];

const MODEL_UNAVAILABLE_CODES: &[&str] = &[
    "model_decommissioned",
    "model_not_found",
    "model_not_supported",
];

static MODEL_UNAVAILABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)model.*(decommissioned|deprecated|not supported|unsupported|no longer|does not exist|not found)",
    )
    .expect("regex should compile")
});

/**
 * \brief Provider 调用失败的原因，最终展开为 `ProviderResult.error`。
 */
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Transport(reqwest::Error),
    #[error("{0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
}

/**
 * \brief 请求 URL 会带上 Gemini 的 `?key=`，转换时一律去掉，错误文本里不出现密钥。
 */
impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.without_url())
    }
}

impl FetchError {
    /**
     * \brief 服务是否因模型本身不可用而拒绝（错误码或消息文本）。
     */
    pub fn is_model_unavailable(&self) -> bool {
        match self {
            FetchError::Rejected { code, message, .. } => {
                code.as_deref()
                    .map(|c| MODEL_UNAVAILABLE_CODES.contains(&c))
                    .unwrap_or(false)
                    || MODEL_UNAVAILABLE_RE.is_match(message)
            }
            _ => false,
        }
    }

    pub fn into_result(self) -> ProviderResult {
        ProviderResult::failure(format!("Error: {}", self))
    }
}

/**
 * \brief 两个模型服务共用的 HTTP 客户端。
 */
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    gemini_base: String,
    groq_base: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_bases(&config.gemini_base, &config.groq_base, config.timeout)
    }

    /**
     * \brief 指定 API 基地址（本地假服务、代理）。
     */
    pub fn with_bases(gemini_base: &str, groq_base: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            gemini_base: gemini_base.trim_end_matches('/').to_string(),
            groq_base: groq_base.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /**
     * \brief 单次 generateContent 调用；不返回 Err，错误放在 `error` 中。
     */
    pub async fn fetch_gemini(&self, prompt: &str, api_key: &str, model: &str) -> ProviderResult {
        tracing::debug!(model, "calling gemini");
        let outcome = tokio::time::timeout(self.timeout, self.try_gemini(prompt, api_key, model))
            .await
            .unwrap_or_else(|_| Err(FetchError::TimedOut(self.timeout)));
        match outcome {
            Ok(text) => ProviderResult::success(text),
            Err(err) => {
                tracing::warn!(model, error = %err, "gemini call failed");
                telemetry::log_error("llm.gemini", &format!("model={} error={}", model, err));
                err.into_result()
            }
        }
    }

    /**
     * \brief 带模型回退的 Chat Completion 调用。
     * \details 先试所选模型，再依次试 `GROQ_FALLBACK_MODELS`；只有模型不可用的拒绝才换下一个，其他错误直接返回。
     */
    pub async fn fetch_groq(&self, prompt: &str, api_key: &str, model: &str) -> ProviderResult {
        tokio::time::timeout(self.timeout, self.groq_with_fallback(prompt, api_key, model))
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(model, "groq call timed out");
                FetchError::TimedOut(self.timeout).into_result()
            })
    }

    async fn groq_with_fallback(&self, prompt: &str, api_key: &str, model: &str) -> ProviderResult {
        let mut last_err = None;
        for candidate in groq_candidates(model) {
            tracing::debug!(model = %candidate, "calling groq");
            match self.try_groq(prompt, api_key, &candidate).await {
                Ok(text) => {
                    if candidate != model {
                        telemetry::log_event(
                            "llm.groq",
                            &format!("fallback selected={} served_by={}", model, candidate),
                        );
                    }
                    return ProviderResult::success(text);
                }
                Err(err) if err.is_model_unavailable() => {
                    tracing::warn!(model = %candidate, error = %err, "groq model unavailable, trying next");
                    last_err = Some(err);
                }
                Err(err) => {
                    tracing::warn!(model = %candidate, error = %err, "groq call failed");
                    telemetry::log_error("llm.groq", &format!("model={} error={}", candidate, err));
                    return err.into_result();
                }
            }
        }
        telemetry::log_error("llm.groq", &format!("no usable model, selected={}", model));
        last_err
            .map(FetchError::into_result)
            .unwrap_or_else(|| ProviderResult::failure(format!("Error: {}", GROQ_DEFAULT_ERROR)))
    }

    async fn try_gemini(
        &self,
        prompt: &str,
        api_key: &str,
        model: &str,
    ) -> Result<String, FetchError> {
        let url = format!("{}/models/{}:generateContent", self.gemini_base, model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            }
        });

        let resp = self
            .http
            .post(url)
            .query(&[("key", api_key)])
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &text, GEMINI_DEFAULT_ERROR));
        }
        let v: Value = serde_json::from_str(&text)?;
        Ok(extract_gemini_content(&v))
    }

    async fn try_groq(&self, prompt: &str, api_key: &str, model: &str) -> Result<String, FetchError> {
        let url = format!("{}/chat/completions", self.groq_base);
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_OUTPUT_TOKENS,
        });

        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &text, GROQ_DEFAULT_ERROR));
        }
        let v: Value = serde_json::from_str(&text)?;
        Ok(extract_openai_content(&v))
    }
}

/**
 * \brief 所选模型在前，随后是回退模型，去重。
 */
pub fn groq_candidates(selected: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for model in std::iter::once(selected.trim()).chain(GROQ_FALLBACK_MODELS.iter().copied()) {
        if !model.is_empty() && !out.iter().any(|m| m == model) {
            out.push(model.to_string());
        }
    }
    out
}

/**
 * \brief 把非 2xx 响应体转为 `FetchError`；非 JSON 时为 `Malformed`。
 */
fn rejection(status: u16, body: &str, default_message: &str) -> FetchError {
    let v: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(err) => return FetchError::Malformed(err),
    };
    let error = v.get("error");
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .or_else(|| error.and_then(|e| e.get("status")).and_then(|s| s.as_str()))
        .map(|s| s.to_string());
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or(default_message)
        .to_string();
    FetchError::Rejected {
        status,
        code,
        message,
    }
}

fn extract_openai_content(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_gemini_content(v: &Value) -> String {
    v.get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string()
}
