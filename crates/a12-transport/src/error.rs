//! a12-transport エラー型

use a12_crypto::CryptoError;

use crate::frame::FrameClass;

/// フレーム層のエラー
///
/// いずれもプロトコル違反として扱われ、デコーダーは `Dead` に遷移する。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// ヘッダー/フラグメント/チャンクが短すぎる
    #[error("frame or fragment too short")]
    TooShort,
    /// 未知のフレーム種別
    #[error("unknown frame class {0}")]
    UnknownClass(u8),
    /// 長さフィールドが上限を超えている（確保前に検出）
    #[error("frame body of {len} bytes exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },
    /// 現在の状態では受け付けない種別
    #[error("unexpected {0:?} frame")]
    UnexpectedClass(FrameClass),
    /// 認証・復号の失敗
    #[error("frame authentication failed: {0}")]
    Crypto(#[from] CryptoError),
    /// フラグメント番号が 15 ビットに収まらない
    #[error("too many fragments for one media frame")]
    TooManyFragments,
    /// 再組み立て後のサイズが上限を超える
    #[error("reassembled media frame exceeds {max} bytes")]
    ReassemblyTooLarge { max: usize },
    /// すでに死んだデコーダーへの操作
    #[error("decoder is dead")]
    Dead,
}
