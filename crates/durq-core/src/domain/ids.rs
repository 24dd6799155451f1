//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom Type
//! 生成される ID は `<prefix><ULID>` 形式の文字列です。
//! ストアから読み戻した ID（他インスタンスが書いたもの）は任意の文字列を受け付けます。
//!
//! ## Phantom Type パターン
//! `Id<T>` というジェネリック型で共通実装を提供しつつ、
//! `T` はコンパイル時だけのマーカー型として使います。
//! InstanceId と ClaimId を取り違えるとコンパイルエラーになります。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// 生成時に付けるプレフィックス（"instance-", "claim-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// シリアライズ時は中身の文字列そのもの（transparent）になります。
/// キーの区切り文字 `.` を含む ID は名前空間キーを壊すので、生成側では作りません。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成（プレフィックス付き）
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self::from(format!("{}{}", T::prefix(), ulid))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Instance のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Instance {}

impl IdMarker for Instance {
    fn prefix() -> &'static str {
        "instance-"
    }
}

/// Claim のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Claim {}

impl IdMarker for Claim {
    fn prefix() -> &'static str {
        "claim-"
    }
}

/// Identifier of one running queue engine.
pub type InstanceId = Id<Instance>;

/// Ephemeral identifier of one popped entry while it is being processed.
pub type ClaimId = Id<Claim>;
