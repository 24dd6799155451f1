//! EventSink port - キューイベントの購読
//!
//! エンジンは状態変化と同期してイベントを発行します。
//! 購読者は trait 実装・クロージャ・チャネルのいずれでも構いません。
//!
//! # 実装
//! - **NoopEventSink**: 何もしない
//! - **ChannelSink**: tokio の mpsc チャネルへ転送（impls 側）

use crate::domain::QueueEvent;

/// EventSink はキューイベントを受け取る
///
/// # 注意
/// - `emit` はエンジンの処理中に同期的に呼ばれる
/// - 重い処理はチャネル経由で別タスクに逃がすこと
pub trait EventSink<T>: Send + Sync {
    fn emit(&self, event: &QueueEvent<T>);
}

impl<T, F> EventSink<T> for F
where
    F: Fn(&QueueEvent<T>) + Send + Sync,
{
    fn emit(&self, event: &QueueEvent<T>) {
        self(event)
    }
}

/// NoopEventSink は全てのイベントを捨てる
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl<T> EventSink<T> for NoopEventSink {
    fn emit(&self, _event: &QueueEvent<T>) {}
}
