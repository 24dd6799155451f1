//! durq-core
//!
//! A durable, at-least-once work queue that persists its state to a shared
//! key-value store. Several instances may run under the same queue name; when
//! one goes silent, a live peer reclaims its queued and in-flight items.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, entry, liveness, events）
//! - **ports**: 抽象化レイヤー（StorageBackend, Clock, EventSink, IdGenerator）
//! - **impls**: 実装（InMemoryBackend, TokioClock, VirtualClock, ChannelSink）
//! - **schedule**: インスタンスごとのタイマー管理と遅延タスクの扱い
//! - **store**: `<queue>.<instance>.<field>` 形式の名前空間つきストア
//! - **queue**: キューエンジン（処理ループ、リトライ、ハートビート、回収）
//! - **config**: TOML で読めるキュー設定
//! - **error**: エラー型
//! - **observability**: 件数ビュー

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod schedule;
pub mod store;

pub use config::{QueueOptions, Timeouts};
pub use domain::{InstanceId, QueueEntry, QueueEvent};
pub use error::{BuildError, ConfigError, ProcessError};
pub use queue::{Done, Item, Processor, Queue, QueueBuilder, RetryPolicy};
