use anyhow::Result;

use crate::models::ProviderKind;
use crate::storage::KeyValueStore;

/** \brief `looks_valid` 接受的最短密钥长度。 */
pub const MIN_KEY_LEN: usize = 8;

/**
 * \brief 各 Provider 的 API Key，以明文存于 `<provider>-api-key`。
 */
pub struct CredentialStore<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyValueStore + ?Sized> CredentialStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /**
     * \brief 已保存的密钥；未设置或为空白时返回 None。
     */
    pub fn get(&self, provider: ProviderKind) -> Result<Option<String>> {
        Ok(self
            .store
            .get(provider.credential_key())?
            .filter(|v| !v.trim().is_empty()))
    }

    pub fn set(&self, provider: ProviderKind, value: &str) -> Result<()> {
        self.store.set(provider.credential_key(), value.trim())
    }

    pub fn has_both(&self, a: ProviderKind, b: ProviderKind) -> Result<bool> {
        Ok(self.get(a)?.is_some() && self.get(b)?.is_some())
    }

    /**
     * \brief 显式长度检查；提交时只要求密钥存在。
     */
    pub fn looks_valid(&self, provider: ProviderKind) -> Result<bool> {
        Ok(self
            .get(provider)?
            .map(|k| k.chars().count() >= MIN_KEY_LEN)
            .unwrap_or(false))
    }

    /** \brief 打码后的密钥，只保留最后四位。 */
    pub fn masked(&self, provider: ProviderKind) -> Result<Option<String>> {
        Ok(self.get(provider)?.map(|k| mask_key(&k)))
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}
