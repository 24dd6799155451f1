//! NamespacedStore - インスタンスごとのレコード群
//!
//! キーは `"<queueName>.<instanceId>.<field>"` 形式です。値は JSON 文字列。
//!
//! # 学習ポイント
//! - 読み出し失敗・壊れた JSON は「値なし」として扱う（エンジンを止めない）
//! - 容量超過時は全フィールドをフォールバック先へ移し、以後そちらだけを使う
//! - 他インスタンス（peer）のレコードはフォールバックなしで開く

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::domain::InstanceId;
use crate::ports::StorageBackend;

/// インスタンスのレコードを構成するフィールド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Ack,
    ReclaimStart,
    ReclaimEnd,
    InProgress,
    Queue,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Ack,
        Field::ReclaimStart,
        Field::ReclaimEnd,
        Field::InProgress,
        Field::Queue,
    ];

    /// 永続化キーに使う名前
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Ack => "ack",
            Field::ReclaimStart => "reclaimStart",
            Field::ReclaimEnd => "reclaimEnd",
            Field::InProgress => "inProgress",
            Field::Queue => "queue",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NamespacedStore は 1 インスタンス分のレコードへのビュー
///
/// # 実装詳細
/// - `migrated` が立つと以後の読み書きは全て fallback に向く（戻らない）
/// - 一つの操作は一回のバックエンド呼び出しに対応する
pub struct NamespacedStore {
    name: String,
    id: InstanceId,
    primary: Arc<dyn StorageBackend>,
    fallback: Option<Arc<dyn StorageBackend>>,
    migrated: AtomicBool,
}

impl NamespacedStore {
    /// 自インスタンス用のストアを作成
    pub fn new(
        name: impl Into<String>,
        id: InstanceId,
        primary: Arc<dyn StorageBackend>,
        fallback: Option<Arc<dyn StorageBackend>>,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            primary,
            fallback,
            migrated: AtomicBool::new(false),
        }
    }

    /// 他インスタンスのレコードを開く（フォールバックなし）
    pub fn peer(name: impl Into<String>, id: InstanceId, backend: Arc<dyn StorageBackend>) -> Self {
        Self::new(name, id, backend, None)
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// フォールバックへ移行済みか
    pub fn is_migrated(&self) -> bool {
        self.migrated.load(Ordering::SeqCst)
    }

    pub fn key(&self, field: Field) -> String {
        format!("{}.{}.{}", self.name, self.id, field)
    }

    /// 値を読む
    ///
    /// 存在しない・読み出し失敗・デシリアライズ失敗はすべて `None`。
    pub fn get<V: DeserializeOwned>(&self, field: Field) -> Option<V> {
        let key = self.key(field);
        let raw = match self.active().get_item(&key) {
            Ok(raw) => raw?,
            Err(err) => {
                debug!(%key, error = %err, "store read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(%key, error = %err, "ignoring unreadable record");
                None
            }
        }
    }

    /// 値を書く
    ///
    /// 容量超過ならフォールバックへ移行して書き直す。
    /// それでも書けない場合はログを残して諦める。
    pub fn set<V: Serialize + ?Sized>(&self, field: Field, value: &V) {
        let key = self.key(field);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%key, error = %err, "failed to serialize record");
                return;
            }
        };

        let err = match self.active().set_item(&key, &raw) {
            Ok(()) => return,
            Err(err) => err,
        };
        if !err.is_quota_exceeded() {
            warn!(%key, error = %err, "store write failed");
            return;
        }
        match self.fall_back() {
            Some(fallback) => {
                if let Err(err) = fallback.set_item(&key, &raw) {
                    warn!(%key, error = %err, "fallback store write failed");
                }
            }
            None => warn!(%key, error = %err, "dropping write"),
        }
    }

    /// 値を削除する（存在しなくてもよい）
    pub fn remove(&self, field: Field) {
        let key = self.key(field);
        if let Err(err) = self.active().remove_item(&key) {
            debug!(%key, error = %err, "store remove failed");
        }
    }

    /// 全フィールドを削除する
    pub fn remove_all(&self) {
        for field in Field::ALL {
            self.remove(field);
        }
    }

    fn active(&self) -> &dyn StorageBackend {
        match &self.fallback {
            Some(fallback) if self.is_migrated() => fallback.as_ref(),
            _ => self.primary.as_ref(),
        }
    }

    /// 全フィールドを primary から fallback へコピーして primary 側を消す
    ///
    /// 移行済み・fallback なしの場合は `None`。
    fn fall_back(&self) -> Option<&Arc<dyn StorageBackend>> {
        let fallback = self.fallback.as_ref()?;
        if self.migrated.swap(true, Ordering::SeqCst) {
            return None;
        }
        warn!(queue = %self.name, instance = %self.id, "primary store over quota, moving records to fallback");

        for field in Field::ALL {
            let key = self.key(field);
            match self.primary.get_item(&key) {
                Ok(Some(raw)) => {
                    if let Err(err) = fallback.set_item(&key, &raw) {
                        warn!(%key, error = %err, "failed to copy record to fallback");
                    }
                }
                Ok(None) => {}
                Err(err) => debug!(%key, error = %err, "store read failed"),
            }
            if let Err(err) = self.primary.remove_item(&key) {
                debug!(%key, error = %err, "store remove failed");
            }
        }
        Some(fallback)
    }
}

/// `name` 配下で ack を持つインスタンス ID をキー順に列挙
///
/// 中間セグメントに `.` を含むキーは別のキュー名のものなので除外する。
pub fn enumerate_instances(backend: &dyn StorageBackend, name: &str) -> Vec<InstanceId> {
    let prefix = format!("{name}.");
    let suffix = format!(".{}", Field::Ack);
    let mut seen = HashSet::new();
    let mut instances = Vec::new();

    for key in backend.keys() {
        let Some(id) = key
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
        else {
            continue;
        };
        if id.is_empty() || id.contains('.') {
            continue;
        }
        if seen.insert(id.to_string()) {
            instances.push(InstanceId::from(id));
        }
    }
    instances
}
