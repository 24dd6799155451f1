//! Events - キューが発行するイベント
//!
//! 購読者（`EventSink`）へ状態変化と同期して届けられます。

use crate::error::ProcessError;

/// QueueEvent はキューで発生したイベント
///
/// # イベント種類
/// - Processed: 処理関数が完了を通知した（成功・失敗どちらも）
/// - Discard: リトライが拒否されてアイテムが捨てられた
/// - Overflow: 容量超過で最も古いエントリが押し出された
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent<T> {
    Processed {
        error: Option<ProcessError>,
        response: Option<serde_json::Value>,
        item: T,
    },
    Discard {
        item: T,
        attempt_number: u32,
    },
    Overflow {
        item: T,
        attempt_number: u32,
    },
}

impl<T> QueueEvent<T> {
    /// イベント種別名（ログ用）
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Processed { .. } => "processed",
            QueueEvent::Discard { .. } => "discard",
            QueueEvent::Overflow { .. } => "overflow",
        }
    }

    pub fn item(&self) -> &T {
        match self {
            QueueEvent::Processed { item, .. }
            | QueueEvent::Discard { item, .. }
            | QueueEvent::Overflow { item, .. } => item,
        }
    }
}
