//! VirtualClock - テスト用の決定的な時計
//!
//! # 学習ポイント
//! - 時間は `tick` / `next` を呼んだときだけ進む
//! - 同じ時刻のタイマーは登録順に発火する
//! - `set_system_time` は壁時計のジャンプ（サスペンドからの復帰）を再現する
//!
//! # 使用例
//! ```ignore
//! let clock = Arc::new(VirtualClock::new(0));
//! let queue = Queue::builder("test", processor).clock(clock.clone()).build()?;
//! queue.start();
//! clock.tick(3_000);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;

use crate::ports::clock::duration_millis;
use crate::ports::{Clock, TimerCallback, TimerId, Timestamp};

/// VirtualClock は手動で進める時計
///
/// # 実装詳細
/// - タイマーは (発火時刻, 登録番号) をキーにした BTreeMap に保持
/// - コールバックはロックを外してから実行する（コールバック内で再登録できる）
pub struct VirtualClock {
    state: Mutex<VirtualState>,
}

struct VirtualState {
    now: Timestamp,
    next_id: u64,
    timers: BTreeMap<(Timestamp, u64), TimerCallback>,
    due: HashMap<u64, Timestamp>,
    frozen: bool,
}

impl VirtualClock {
    /// `start`（ミリ秒）から始まる時計を作成
    pub fn new(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(VirtualState {
                now: start,
                next_id: 1,
                timers: BTreeMap::new(),
                due: HashMap::new(),
                frozen: false,
            }),
        }
    }

    /// 時間を `ms` 進め、その間に期限が来たタイマーを順に発火させる
    pub fn tick(&self, ms: u64) {
        let target = {
            let state = self.state.lock();
            state.now.saturating_add(Timestamp::try_from(ms).unwrap_or(Timestamp::MAX))
        };
        while let Some(callback) = self.pop_due(target) {
            callback();
        }
        let mut state = self.state.lock();
        state.now = state.now.max(target);
    }

    /// 次のタイマーまで時間を進めて発火させる（タイマーがなければ false）
    pub fn next(&self) -> bool {
        match self.pop_due(Timestamp::MAX) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// `condition` が成立するまでタイマーを一つずつ発火させる
    ///
    /// 成立までに経過した時間を返す。`limit` を超えるか、
    /// タイマーが尽きた場合は `None`。
    pub fn run_until(&self, mut condition: impl FnMut() -> bool, limit: Duration) -> Option<Duration> {
        let start = self.now();
        let limit = duration_millis(limit);
        while !condition() {
            if self.now() - start > limit || !self.next() {
                return None;
            }
        }
        Some(Duration::from_millis((self.now() - start).max(0) as u64))
    }

    /// 壁時計を `time` に飛ばす（タイマーは発火させず、相対的な残り時間を保つ）
    pub fn set_system_time(&self, time: Timestamp) {
        let mut state = self.state.lock();
        let difference = time - state.now;
        state.now = time;
        let timers = std::mem::take(&mut state.timers);
        for ((due, id), callback) in timers {
            state.timers.insert((due + difference, id), callback);
            state.due.insert(id, due + difference);
        }
    }

    /// 時計を凍結する（保留中のタイマーを捨て、以降の登録も無視する）
    ///
    /// バックグラウンドで停止したプロセスの再現に使う。
    pub fn freeze(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.frozen = true;
            state.due.clear();
            std::mem::take(&mut state.timers)
        };
        drop(dropped);
    }

    /// 保留中のタイマー数
    pub fn pending(&self) -> usize {
        self.state.lock().timers.len()
    }

    fn pop_due(&self, limit: Timestamp) -> Option<TimerCallback> {
        let mut state = self.state.lock();
        let (&(due, id), _) = state.timers.first_key_value()?;
        if due > limit {
            return None;
        }
        let callback = state.timers.remove(&(due, id))?;
        state.due.remove(&id);
        state.now = state.now.max(due);
        Some(callback)
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Timestamp {
        self.state.lock().now
    }

    fn set_timeout(&self, callback: TimerCallback, delay: Duration) -> TimerId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        if state.frozen {
            return TimerId(id);
        }
        let due = state.now.saturating_add(duration_millis(delay));
        state.timers.insert((due, id), callback);
        state.due.insert(id, due);
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        let removed = {
            let mut state = self.state.lock();
            match state.due.remove(&id.0) {
                Some(due) => state.timers.remove(&(due, id.0)),
                None => None,
            }
        };
        drop(removed);
    }
}
