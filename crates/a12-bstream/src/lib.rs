//! # a12-bstream
//!
//! A12 のバイナリ転送（フォント・状態・任意のブロブ）。
//!
//! ## 転送の流れ
//!
//! ```text
//! 送信側                                    受信側
//!   enqueue_bstream ──> BlobAnnounce ──────> handler: Initialize
//!                                             ├ NewSink  ──> BlobAccept
//!                     <────────────────────── └ Cached / DontWant ──> BlobCancel
//!   BlobChunk × n  ──────────────────────────> sink.write
//!   BlobComplete   ──────────────────────────> handler: Completed
//!   handler: Completed (ソース返却)
//! ```
//!
//! 転送はチャンネルごとに送信 1 本・受信 1 本まで。
//! 2 本目以降はキューに入り、種別の優先度順に開始する。

#![no_std]
extern crate alloc;

pub mod error;
pub mod handler;
pub mod inbound;
pub mod outbound;
pub mod source;
pub mod transfers;

pub use error::BlobError;
pub use handler::{
    BlobDescriptor, BlobDirection, BlobEvent, BlobHandler, BlobMeta, BlobResponse, BlobSize,
    DiscardHandler,
};
pub use inbound::InboundTransfers;
pub use outbound::{BlobFrame, BlobLimits, BlobRequest, ChunkPolicy, OutboundScheduler, DEFAULT_CHUNK_SIZE};
pub use source::{BlobSink, BlobSource, MemorySink, MemorySource};
pub use transfers::BlobTransfers;
