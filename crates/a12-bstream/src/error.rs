//! a12-bstream エラー型

use alloc::string::String;

/// 転送単位のエラー
///
/// セッションには影響せず、該当する転送が `Cancelled` で終わる。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    /// 今は読めない（ストリーミングソースが空）。次の flush で再試行
    #[error("source not ready")]
    WouldBlock,
    /// ソース/シンクの入出力エラー
    #[error("blob i/o failed: {0}")]
    Io(String),
    /// チャンクの位置が受信済みバイト数と一致しない
    #[error("chunk offset {got} does not follow {expected}")]
    OffsetMismatch { expected: u64, got: u64 },
    /// 宣言サイズと実際のサイズが一致しない
    #[error("blob size mismatch: announced {announced}, got {got}")]
    SizeMismatch { announced: u64, got: u64 },
}
