//! QueueBuilder - キューインスタンスの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 省略された依存はデフォルト実装で埋める

use std::sync::Arc;

use super::{Item, Processor, QuadraticBackoff, Queue, RetryPolicy, Wiring};
use crate::config::{QueueOptions, Timeouts};
use crate::error::BuildError;
use crate::impls::{InMemoryBackend, TokioClock};
use crate::ports::{Clock, EventSink, StorageBackend};

/// QueueBuilder は Queue を構築
///
/// # 使用例
/// ```ignore
/// let queue = Queue::builder("jobs", processor)
///     .backend(shared.clone())
///     .clock(clock.clone())
///     .max_items(100)
///     .build()?;
/// ```
///
/// # デフォルト
/// - backend: このインスタンス専用の InMemoryBackend（共有したい場合は必ず指定する）
/// - fallback: InMemoryBackend
/// - clock: 現在の tokio ランタイム上の TokioClock
/// - retry_policy: `options.base_delay` を使う QuadraticBackoff
///
/// # Fail-fast 設計
/// - build() 時にキュー名とオプションを検証する
/// - 時計が指定されず tokio ランタイムもなければ BuildError を返す
pub struct QueueBuilder<T> {
    name: String,
    processor: Box<dyn Processor<T>>,
    backend: Option<Arc<dyn StorageBackend>>,
    fallback: Option<Arc<dyn StorageBackend>>,
    clock: Option<Arc<dyn Clock>>,
    options: QueueOptions,
    retry: Option<Box<dyn RetryPolicy<T>>>,
    sinks: Vec<Arc<dyn EventSink<T>>>,
}

impl<T: Item> QueueBuilder<T> {
    pub fn new(name: impl Into<String>, processor: impl Processor<T> + 'static) -> Self {
        Self {
            name: name.into(),
            processor: Box::new(processor),
            backend: None,
            fallback: None,
            clock: None,
            options: QueueOptions::default(),
            retry: None,
            sinks: Vec::new(),
        }
    }

    /// 共有ストアを設定
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 容量超過時の移行先を設定
    pub fn fallback(mut self, fallback: Arc<dyn StorageBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// オプションをまとめて設定（以前の max_items などは上書きされる）
    pub fn options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.options.max_items = Some(max_items);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.options.max_attempts = Some(max_attempts);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.options.timeouts = timeouts;
        self
    }

    pub fn retry_policy(mut self, policy: impl RetryPolicy<T> + 'static) -> Self {
        self.retry = Some(Box::new(policy));
        self
    }

    /// イベント購読者を追加（build 後は `Queue::subscribe`）
    pub fn subscribe(mut self, sink: impl EventSink<T> + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Queue を構築
    ///
    /// 構築時に空の queue / inProgress と最初の ack が書き込まれる。
    /// 処理は `start()` まで始まらない。
    pub fn build(self) -> Result<Queue<T>, BuildError> {
        if self.name.is_empty() {
            return Err(BuildError::EmptyName);
        }
        self.options.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(
                TokioClock::try_current().map_err(|e| BuildError::NoRuntime(e.to_string()))?,
            ),
        };
        let retry = self
            .retry
            .unwrap_or_else(|| Box::new(QuadraticBackoff::new(self.options.base_delay)));

        Ok(Queue::wire(Wiring {
            name: self.name,
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(InMemoryBackend::new())),
            fallback: Some(
                self.fallback
                    .unwrap_or_else(|| Arc::new(InMemoryBackend::new())),
            ),
            clock,
            processor: self.processor,
            retry,
            options: self.options,
            sinks: self.sinks,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::impls::VirtualClock;
    use crate::queue::Done;
    use std::time::Duration;

    fn noop(_item: String, _done: Done<String>) {}

    #[test]
    fn test_build_success() {
        let queue = QueueBuilder::new("q", noop)
            .clock(Arc::new(VirtualClock::new(0)))
            .build();
        assert!(queue.is_ok());
    }

    #[test]
    fn test_build_empty_name() {
        let queue = QueueBuilder::new("", noop)
            .clock(Arc::new(VirtualClock::new(0)))
            .build();
        assert!(matches!(queue, Err(BuildError::EmptyName)));
    }

    #[test]
    fn test_build_invalid_timeouts() {
        let queue = QueueBuilder::new("q", noop)
            .clock(Arc::new(VirtualClock::new(0)))
            .timeouts(Timeouts {
                reclaim_timeout: Duration::from_millis(500),
                ..Timeouts::default()
            })
            .build();
        assert!(matches!(
            queue,
            Err(BuildError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_build_without_clock_or_runtime() {
        let queue = QueueBuilder::new("q", noop).build();
        assert!(matches!(queue, Err(BuildError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_build_defaults_to_tokio_clock() {
        let queue = QueueBuilder::new("q", noop).build();
        assert!(queue.is_ok());
    }

    #[test]
    fn test_build_writes_initial_records() {
        let backend = Arc::new(InMemoryBackend::new());
        let queue = QueueBuilder::new("q", noop)
            .backend(backend.clone())
            .clock(Arc::new(VirtualClock::new(42)))
            .build()
            .unwrap();

        let prefix = format!("q.{}", queue.id());
        assert_eq!(backend.get_item(&format!("{prefix}.queue")).unwrap().as_deref(), Some("[]"));
        assert_eq!(backend.get_item(&format!("{prefix}.inProgress")).unwrap().as_deref(), Some("{}"));
        assert_eq!(backend.get_item(&format!("{prefix}.ack")).unwrap().as_deref(), Some("42"));
        assert!(!queue.is_running());
    }

    #[test]
    fn test_options_then_overrides() {
        let queue = QueueBuilder::new("q", noop)
            .clock(Arc::new(VirtualClock::new(0)))
            .options(QueueOptions {
                max_items: Some(5),
                ..QueueOptions::default()
            })
            .max_attempts(3)
            .build()
            .unwrap();

        assert_eq!(queue.options().max_items, Some(5));
        assert_eq!(queue.options().max_attempts, Some(3));
    }
}
