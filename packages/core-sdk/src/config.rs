use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/**
 * \brief 运行配置，读取 `DUELBOX_*` 环境变量。
 */
#[derive(Debug, Clone)]
pub struct Config {
    /** \brief 键值存储使用的 SQLite 文件。 */
    pub db_path: PathBuf,
    /** \brief `serve` 提供的静态文件目录。 */
    pub ui_dir: PathBuf,
    pub gemini_base: String,
    pub groq_base: String,
    /** \brief 单个 Provider 调用（含回退）的超时上限。 */
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("duelbox.db"),
            ui_dir: PathBuf::from("web"),
            gemini_base: GEMINI_API_BASE.to_string(),
            groq_base: GROQ_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(path) = lookup("DUELBOX_DB") {
            cfg.db_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("DUELBOX_UI_DIR") {
            cfg.ui_dir = PathBuf::from(dir);
        }
        if let Some(base) = lookup("DUELBOX_GEMINI_BASE") {
            cfg.gemini_base = base;
        }
        if let Some(base) = lookup("DUELBOX_GROQ_BASE") {
            cfg.groq_base = base;
        }
        if let Some(secs) = lookup("DUELBOX_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("DUELBOX_TIMEOUT_SECS is not a number: {}", secs))?;
            cfg.timeout = Duration::from_secs(secs.max(1));
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("duelbox.db"));
        assert_eq!(cfg.groq_base, GROQ_API_BASE);
        assert_eq!(cfg.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("DUELBOX_DB", "/tmp/x.db"),
            ("DUELBOX_GEMINI_BASE", "http://127.0.0.1:9000"),
            ("DUELBOX_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.gemini_base, "http://127.0.0.1:9000");
        assert_eq!(cfg.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_bad_timeout_is_an_error() {
        assert!(Config::from_lookup(lookup_from(&[("DUELBOX_TIMEOUT_SECS", "soon")])).is_err());
    }
}
