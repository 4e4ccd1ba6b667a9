use anyhow::{Context, Result};

use crate::models::HistoryEntry;
use crate::storage::KeyValueStore;

pub const HISTORY_KEY: &str = "prompt-history";
pub const HISTORY_LIMIT: usize = 50;

/**
 * \brief 对比历史：最新在前、最多 50 条，整体存为一个 JSON 数组。
 */
pub struct HistoryStore<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyValueStore + ?Sized> HistoryStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /**
     * \brief 插入到最前，超出上限的旧记录丢弃。
     */
    pub fn append(&self, entry: HistoryEntry) -> Result<()> {
        self.store.update(HISTORY_KEY, &mut |current| {
            let mut entries = current.as_deref().map(decode).unwrap_or_default();
            entries.insert(0, entry.clone());
            entries.truncate(HISTORY_LIMIT);
            serde_json::to_string(&entries).context("encode history")
        })
    }

    /**
     * \brief 全部记录，最新在前。
     * \details 存储内容无法解析时按空历史处理，后续写入会覆盖。
     */
    pub fn list(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .store
            .get(HISTORY_KEY)?
            .as_deref()
            .map(decode)
            .unwrap_or_default())
    }

    /**
     * \brief 只在 prompt 上做不区分大小写的子串匹配。
     */
    pub fn search(&self, term: &str) -> Result<Vec<HistoryEntry>> {
        let needle = term.to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .filter(|e| e.prompt.to_lowercase().contains(&needle))
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Option<HistoryEntry>> {
        Ok(self.list()?.into_iter().find(|e| e.id == id))
    }
}

fn decode(raw: &str) -> Vec<HistoryEntry> {
    serde_json::from_str(raw).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "stored history is unreadable, starting fresh");
        Vec::new()
    })
}
