//! Ports - 抽象化レイヤー
//!
//! このモジュールはエンジンが外部に依存する境界を trait として定義します。
//! 具体的な実装（ストア・時計・イベント配送）は `impls` に置きます。
//!
//! # 設計原則
//! - 共有ストアがインスタンス間の唯一の共有状態
//! - 時計は注入する（グローバルな差し替えはしない）
//! - イベントは状態変化と同期して発行する

pub mod backend;
pub mod clock;
pub mod event_sink;
pub mod id_generator;

// 主要な trait を再エクスポート
pub use self::backend::{BackendError, StorageBackend};
pub use self::clock::{Clock, TimerCallback, TimerId, Timestamp};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
