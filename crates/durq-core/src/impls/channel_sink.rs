//! ChannelSink - イベントを tokio の mpsc チャネルへ流す
//!
//! # 学習ポイント
//! - エンジン側は同期的に `send` するだけ（unbounded なのでブロックしない）
//! - 受信側は async タスクでゆっくり処理できる

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::domain::QueueEvent;
use crate::ports::EventSink;

/// ChannelSink は受け取ったイベントを複製してチャネルに送る
///
/// 受信側が drop された後のイベントは黙って捨てる。
pub struct ChannelSink<T> {
    tx: UnboundedSender<QueueEvent<T>>,
}

impl<T> ChannelSink<T> {
    /// 送信側（sink）と受信側のペアを作成
    pub fn channel() -> (Self, UnboundedReceiver<QueueEvent<T>>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<T: Clone + Send + Sync> EventSink<T> for ChannelSink<T> {
    fn emit(&self, event: &QueueEvent<T>) {
        let _ = self.tx.send(event.clone());
    }
}
