//! IdGenerator port - ID 生成の抽象化
//!
//! IdGenerator は調整なしで複数インスタンスが生成できる ID を払い出します。
//! テスト容易性のために、trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock の時刻を使う）

use crate::domain::ids::{ClaimId, InstanceId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator はインスタンス ID と claim ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（タイマーのコールバックから使われる）
pub trait IdGenerator: Send + Sync {
    /// インスタンス ID を生成
    fn generate_instance_id(&self) -> InstanceId;

    /// claim ID を生成（処理中エントリのキー）
    fn generate_claim_id(&self) -> ClaimId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の現在時刻をタイムスタンプ部に使います。
/// VirtualClock を使えば、タイムスタンプ部は決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_instance_id(&self) -> InstanceId {
        InstanceId::from_ulid(self.next_ulid())
    }

    fn generate_claim_id(&self) -> ClaimId {
        ClaimId::from_ulid(self.next_ulid())
    }
}
