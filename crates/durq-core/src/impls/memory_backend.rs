//! InMemoryBackend - プロセス内の共有ストア
//!
//! # 学習ポイント
//! - `Arc<InMemoryBackend>` を複数インスタンスに渡すと、同じ名前空間を共有できる
//! - 容量（バイト数）を指定すると書き込み拒否を再現できる（フォールバックのテスト用）

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::ports::{BackendError, StorageBackend};

/// InMemoryBackend は BTreeMap ベースの StorageBackend
///
/// # 実装詳細
/// - BTreeMap なので `key(index)` と `keys()` の順序は安定（辞書順）
/// - 容量はキーと値のバイト長の合計で数える
pub struct InMemoryBackend {
    data: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl InMemoryBackend {
    /// 容量無制限のストアを作成
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            quota: None,
        }
    }

    /// `quota` バイトを超える書き込みを拒否するストアを作成
    pub fn with_quota(quota: usize) -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            quota: Some(quota),
        }
    }

    /// 現在の使用バイト数
    pub fn used_bytes(&self) -> usize {
        let data = self.data.lock();
        data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut data = self.data.lock();
        if let Some(limit) = self.quota {
            let used: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > limit {
                return Err(BackendError::QuotaExceeded {
                    key: key.to_string(),
                    limit,
                });
            }
        }
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn clear(&self) {
        self.data.lock().clear();
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.data.lock().keys().nth(index).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.data.lock().keys().cloned().collect()
    }
}
