//! StorageBackend port - 共有キーバリューストア
//!
//! 同じキュー名で動く全インスタンスが共有する唯一の可変リソースです。
//! 値は常に文字列（JSON）で、部分更新はありません。
//!
//! # 実装
//! - **InMemoryBackend**: プロセス内の共有マップ（容量制限のシミュレーション可）

use thiserror::Error;

/// StorageBackend は文字列キー・文字列値のストア
///
/// # 設計原則
/// - 各操作は単独でアトミック（複数操作をまたぐトランザクションはない）
/// - インスタンス間の調整はこのストアの読み書きだけで行う
pub trait StorageBackend: Send + Sync {
    /// 値を書き込む（容量超過なら `QuotaExceeded`）
    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// 値を読む（存在しなければ `None`）
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// 値を削除する（存在しなくてもエラーにしない）
    fn remove_item(&self, key: &str) -> Result<(), BackendError>;

    /// 全キーを削除する
    fn clear(&self);

    /// 保存されているキーの数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `index` 番目のキー
    fn key(&self, index: usize) -> Option<String>;

    /// 全キーの列挙
    fn keys(&self) -> Vec<String>;
}

/// BackendError はストア操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("quota exceeded while writing {key} (limit {limit} bytes)")]
    QuotaExceeded { key: String, limit: usize },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, BackendError::QuotaExceeded { .. })
    }
}
