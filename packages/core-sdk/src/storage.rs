use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

/**
 * \brief 持久化字符串键值存储，供凭据与历史模块注入使用。
 */
pub trait KeyValueStore: Send + Sync {
    /** \brief 读取键值；从未写入时返回 None。 */
    fn get(&self, key: &str) -> Result<Option<String>>;

    /** \brief 写入或覆盖键值。 */
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /**
     * \brief 原子地读-改-写一个键：读取、`apply` 计算新值、写回，期间不会插入其他写入。
     * \details `apply` 返回错误时不写入。
     */
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<String>) -> Result<String>,
    ) -> Result<()>;
}

/**
 * \brief 进程内存储，用于测试与一次性运行。
 */
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self
            .values
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<String>) -> Result<String>,
    ) -> Result<()> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        let next = apply(guard.get(key).cloned())?;
        guard.insert(key.to_string(), next);
        Ok(())
    }
}

/**
 * \brief 读取 "1"/"0" 形式的开关。
 */
pub fn get_bool(store: &dyn KeyValueStore, key: &str, default: bool) -> Result<bool> {
    Ok(store.get(key)?.map(|s| s == "1").unwrap_or(default))
}

pub fn set_bool(store: &dyn KeyValueStore, key: &str, value: bool) -> Result<()> {
    store.set(key, if value { "1" } else { "0" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip_and_overwrite() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_update_skips_write_on_error() {
        let store = MemoryStore::new();
        store.set("k", "kept").unwrap();
        let res = store.update("k", &mut |_| Err(anyhow!("refused")));
        assert!(res.is_err());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("kept"));

        store
            .update("k", &mut |cur| Ok(format!("{}+1", cur.unwrap_or_default())))
            .unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("kept+1"));
    }

    #[test]
    fn test_bool_flags_default_when_unset() {
        let store = MemoryStore::new();
        assert!(!get_bool(&store, "flag", false).unwrap());
        set_bool(&store, "flag", true).unwrap();
        assert!(get_bool(&store, "flag", false).unwrap());
    }
}
