//! TokioClock - 本番用の時計
//!
//! 現在時刻は `chrono::Utc::now()`、タイマーは tokio ランタイム上の
//! `sleep` タスクで実装します。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::AbortHandle;

use crate::ports::{Clock, TimerCallback, TimerId, Timestamp};

/// TokioClock は壁時計と tokio タイマーを組み合わせた Clock
///
/// # 実装詳細
/// - タイマーごとに `sleep` タスクを spawn し、AbortHandle で取り消す
/// - 発火したタイマーは自分のエントリを表から外してからコールバックを呼ぶ
/// - Drop 時に残っているタイマーを全て abort する
pub struct TokioClock {
    handle: Handle,
    timers: Arc<Mutex<HashMap<u64, AbortHandle>>>,
    next_id: AtomicU64,
}

impl TokioClock {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// 現在のランタイムを使う TokioClock を作成
    pub fn try_current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }

    /// 未発火のタイマー数
    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp_millis()
    }

    fn set_timeout(&self, callback: TimerCallback, delay: Duration) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        // 登録が終わるまでタスク側の remove を待たせる
        let mut guard = self.timers.lock();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            timers.lock().remove(&id);
            callback();
        });
        guard.insert(id, task.abort_handle());
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        if let Some(task) = self.timers.lock().remove(&id.0) {
            task.abort();
        }
    }
}

impl Drop for TokioClock {
    fn drop(&mut self) {
        for (_, task) in self.timers.lock().drain() {
            task.abort();
        }
    }
}
