//! Clock port - 時刻とタイマーの抽象化
//!
//! Scheduler はこの trait だけを通して時刻を読み、タイマーを仕掛けます。
//! グローバルな時計の差し替えは行わず、コンストラクタで注入します。
//!
//! # 実装
//! - **TokioClock**: 本番用（壁時計 + tokio ランタイム上のタイマー）
//! - **VirtualClock**: テスト用（`tick` で決定的に時間を進める）

use std::sync::Arc;
use std::time::Duration;

/// ミリ秒単位の UNIX 時刻（永続化フォーマットと同じ表現）
pub type Timestamp = i64;

/// タイマー発火時に一度だけ呼ばれるコールバック
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Clock が払い出すタイマーの識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Clock は現在時刻とワンショットタイマーを提供
///
/// # 契約
/// - `set_timeout` のコールバックは `delay` 経過前に呼ばれてはならない
/// - `clear_timeout` は未知の / 発火済みの id に対しては何もしない
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数のインスタンス・スレッドから共有される）
pub trait Clock: Send + Sync {
    /// 現在時刻（ミリ秒）
    fn now(&self) -> Timestamp;

    /// `delay` 後に `callback` を一度だけ実行する
    fn set_timeout(&self, callback: TimerCallback, delay: Duration) -> TimerId;

    /// タイマーを取り消す
    fn clear_timeout(&self, id: TimerId);
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }

    fn set_timeout(&self, callback: TimerCallback, delay: Duration) -> TimerId {
        (**self).set_timeout(callback, delay)
    }

    fn clear_timeout(&self, id: TimerId) {
        (**self).clear_timeout(id)
    }
}

/// `Duration` をミリ秒の `Timestamp` 差分に変換
pub fn duration_millis(duration: Duration) -> Timestamp {
    Timestamp::try_from(duration.as_millis()).unwrap_or(Timestamp::MAX)
}
