//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBackend**: プロセス内の共有ストア（容量制限つきも可）
//! - **TokioClock**: 本番用の時計
//! - **VirtualClock**: テスト用の決定的な時計
//! - **ChannelSink**: イベントを mpsc チャネルへ流す EventSink
//!
//! # 本番用ストア
//! ファイルや共有メモリ上のストアは `StorageBackend` を実装した別クレートに置く想定です。

pub mod channel_sink;
pub mod memory_backend;
pub mod tokio_clock;
pub mod virtual_clock;

// 主要な型を再エクスポート
pub use self::channel_sink::ChannelSink;
pub use self::memory_backend::InMemoryBackend;
pub use self::tokio_clock::TokioClock;
pub use self::virtual_clock::VirtualClock;
