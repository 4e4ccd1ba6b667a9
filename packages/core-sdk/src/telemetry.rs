use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::storage::{self, KeyValueStore};

/** \brief 遥测开关的存储键。 */
pub const TELEMETRY_KEY: &str = "telemetry-enabled";

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

/**
 * \brief 更新进程内开关。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 从存储加载开关到进程内。
 */
pub fn load(store: &dyn KeyValueStore) -> Result<bool> {
    let enabled = storage::get_bool(store, TELEMETRY_KEY, false)?;
    set_enabled(enabled);
    Ok(enabled)
}

/**
 * \brief 持久化开关并立即生效。
 */
pub fn save(store: &dyn KeyValueStore, enabled: bool) -> Result<()> {
    storage::set_bool(store, TELEMETRY_KEY, enabled)?;
    set_enabled(enabled);
    Ok(())
}

/**
 * \brief 记录普通事件。
 */
pub fn log_event(category: &str, message: &str) {
    tracing::debug!(category, "{}", message);
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("INFO", category, message) {
        tracing::warn!(error = %err, "telemetry write failed");
    }
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    tracing::debug!(category, "{}", message);
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("ERROR", category, message) {
        tracing::warn!(error = %err, "telemetry write failed");
    }
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    let log_dir = PathBuf::from("logs");
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("duelbox.log"))?;
    writeln!(file, "{}", format_line(level, category, message)?)?;
    Ok(())
}

fn format_line(level: &str, category: &str, message: &str) -> Result<String> {
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    Ok(format!("{} [{}] {} - {}", timestamp, level, category, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_flag_persists_through_store() {
        let store = MemoryStore::new();
        assert!(!load(&store).unwrap());
        save(&store, true).unwrap();
        assert_eq!(store.get(TELEMETRY_KEY).unwrap().as_deref(), Some("1"));
        assert!(load(&store).unwrap());
        save(&store, false).unwrap();
        assert!(!is_enabled());
    }

    #[test]
    fn test_line_layout() {
        let line = format_line("INFO", "compare", "prompt_len=5").unwrap();
        assert!(line.ends_with(" [INFO] compare - prompt_len=5"));
    }
}
