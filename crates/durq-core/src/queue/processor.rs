//! Processor - 処理関数と完了通知
//!
//! # 学習ポイント
//! - `Done` は所有権で「一度だけ完了できる」ことを表す（`self` を消費する）
//! - `Done` はエンジンへの Weak 参照しか持たない（キューを drop しても循環しない）
//! - `Done` を完了せずに drop すると、エントリは処理中のまま残る

use std::sync::Weak;

use tracing::debug;

use super::{Inner, Item};
use crate::domain::ClaimId;
use crate::error::ProcessError;

/// Processor はキューから取り出されたアイテムを処理する
///
/// エンジンの処理中に同期的に呼ばれます。非同期処理をしたい場合は
/// `done` を別タスクへ move して、後から完了させてください。
///
/// # 使用例
/// ```ignore
/// let processor = |item: Job, done: Done<Job>| {
///     tokio::spawn(async move {
///         match send(&item).await {
///             Ok(()) => done.success(),
///             Err(e) => done.fail(e.to_string()),
///         }
///     });
/// };
/// ```
pub trait Processor<T>: Send + Sync {
    fn process(&self, item: T, done: Done<T>);
}

impl<T, F> Processor<T> for F
where
    F: Fn(T, Done<T>) + Send + Sync,
{
    fn process(&self, item: T, done: Done<T>) {
        self(item, done)
    }
}

/// Done は 1 回分の処理の完了通知
pub struct Done<T> {
    engine: Weak<Inner<T>>,
    claim: ClaimId,
    item: T,
    attempt_number: u32,
    id: Option<String>,
}

impl<T: Item> Done<T> {
    pub(crate) fn new(
        engine: Weak<Inner<T>>,
        claim: ClaimId,
        item: T,
        attempt_number: u32,
        id: Option<String>,
    ) -> Self {
        Self {
            engine,
            claim,
            item,
            attempt_number,
            id,
        }
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    /// これまでに失敗した回数（初回は 0）
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn claim_id(&self) -> &ClaimId {
        &self.claim
    }

    /// 追加時に渡された重複排除用 ID
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// 完了を通知する
    ///
    /// `error` があれば `attempt_number + 1` で再投入を試みる（ID は引き継ぐ）。
    pub fn complete(self, error: Option<ProcessError>, response: Option<serde_json::Value>) {
        let Some(engine) = self.engine.upgrade() else {
            debug!(claim = %self.claim, "queue dropped before completion");
            return;
        };
        engine.complete(
            self.claim,
            self.item,
            self.attempt_number,
            self.id,
            error,
            response,
        );
    }

    pub fn success(self) {
        self.complete(None, None);
    }

    pub fn success_with(self, response: serde_json::Value) {
        self.complete(None, Some(response));
    }

    pub fn fail(self, error: impl Into<ProcessError>) {
        self.complete(Some(error.into()), None);
    }
}
