//! # a12-session
//!
//! A12 のセッションエンジン。ハンドシェイク・チャンネル多重化・送信スケジューリングを担当する。
//!
//! ## 使い方の概要
//!
//! ```text
//! let mut session = Session::open(ContextOptions::new(None)?)?;   // 接続側
//! transport.write(session.flush(BlobMode::All));                  // Hello を送る
//! session.unpack(&received, &mut sink)?;                          // 受信
//! session.channel_enqueue(&event)?;                               // 送信
//! ```
//!
//! ## 送信の優先順位
//!
//! handshake > control > event > audio > video > blob chunk。
//! ブロブのチャンクは `BlobMode` と映像/音声の有無で量が変わる。
//!
//! ## エラー
//!
//! プロトコル違反はセッションを Dead にする（`poll() < 0`）。
//! 送信の混雑は `EnqueueStatus::Congested` で、エラーではない。

#![no_std]
extern crate alloc;

pub mod channel;
pub mod codec;
pub mod diag;
pub mod error;
mod handshake;
pub mod options;
mod output;
pub mod session;
pub mod sink;

pub use channel::Channel;
pub use codec::{AudioFrame, CodecError, MediaCodec, RawCodec, VideoFrame, VideoOptions};
pub use diag::{Diagnostics, TraceGroups};
pub use error::SessionError;
pub use options::{
    ContextOptions, PkLookup, PkResponse, SessionLimits, DEFAULT_HIGH_WATER, DEFAULT_UNBOUND_LIMIT,
};
pub use output::{EnqueueStatus, SessionStats};
pub use session::{BlobMode, Session};
pub use sink::{DecodedAudio, DecodedVideo, DestinationId, DisplaySink, NullSink};

pub use a12_proto::A12_VERSION;
