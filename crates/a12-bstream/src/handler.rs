//! キャッシュ/ストアハンドラーとのやり取り
//!
//! 受信側の転送ではハンドラーはちょうど 2 回呼ばれる:
//!
//! ```text
//! Initialize(meta) ──> Cached | NewSink(sink) | DontWant
//!                          │          │             │
//!                          ▼          ▼             ▼
//!                     Cancelled   Completed     Cancelled
//!                                 / Cancelled
//! ```
//!
//! 送信側の転送では終了時に 1 回だけ呼ばれ、ソースが返却される。

use alloc::boxed::Box;

use a12_proto::BlobKind;

use crate::source::{BlobSink, BlobSource};

/// 転送の向き（自分から見て）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobDirection {
    Inbound,
    Outbound,
}

/// 転送サイズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobSize {
    /// 終端まで読む
    Streaming,
    Known(u64),
}

/// 転送の属性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    pub channel: u8,
    pub stream_id: u64,
    pub kind: BlobKind,
    pub direction: BlobDirection,
    pub size: BlobSize,
    /// キャッシュ照合用。検証はしない
    pub checksum: Option<[u8; 16]>,
}

/// 返却される記述子
pub enum BlobDescriptor {
    Source(Box<dyn BlobSource>),
    Sink(Box<dyn BlobSink>),
    /// シンクが割り当てられる前に終わった
    None,
}

impl BlobDescriptor {
    /// 受信内容をメモリから取り出す（`MemorySink` の場合）
    pub fn take_bytes(&mut self) -> Option<alloc::vec::Vec<u8>> {
        match self {
            BlobDescriptor::Sink(sink) => sink.take_bytes(),
            _ => None,
        }
    }
}

impl core::fmt::Debug for BlobDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BlobDescriptor::Source(_) => f.write_str("Source(..)"),
            BlobDescriptor::Sink(_) => f.write_str("Sink(..)"),
            BlobDescriptor::None => f.write_str("None"),
        }
    }
}

/// ハンドラーに渡すイベント
#[derive(Debug)]
pub enum BlobEvent {
    Initialize(BlobMeta),
    Completed {
        meta: BlobMeta,
        descriptor: BlobDescriptor,
    },
    Cancelled {
        meta: BlobMeta,
        descriptor: BlobDescriptor,
    },
}

impl BlobEvent {
    pub fn meta(&self) -> &BlobMeta {
        match self {
            BlobEvent::Initialize(meta) => meta,
            BlobEvent::Completed { meta, .. } | BlobEvent::Cancelled { meta, .. } => meta,
        }
    }
}

/// Initialize への応答
pub enum BlobResponse {
    /// 手元にある。転送は不要
    Cached,
    /// このシンクに書き込む
    NewSink(Box<dyn BlobSink>),
    /// 受け取らない
    DontWant,
}

impl core::fmt::Debug for BlobResponse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BlobResponse::Cached => f.write_str("Cached"),
            BlobResponse::NewSink(_) => f.write_str("NewSink(..)"),
            BlobResponse::DontWant => f.write_str("DontWant"),
        }
    }
}

/// バイナリ転送のハンドラー
///
/// 戻り値は `Initialize` に対してだけ意味を持つ。
pub trait BlobHandler {
    fn on_event(&mut self, event: BlobEvent) -> BlobResponse;
}

impl<F> BlobHandler for F
where
    F: FnMut(BlobEvent) -> BlobResponse,
{
    fn on_event(&mut self, event: BlobEvent) -> BlobResponse {
        self(event)
    }
}

/// ハンドラー未設定時の既定動作: すべて断り、返却されたものは捨てる
pub struct DiscardHandler;

impl BlobHandler for DiscardHandler {
    fn on_event(&mut self, _event: BlobEvent) -> BlobResponse {
        BlobResponse::DontWant
    }
}
