//! # a12-proto
//!
//! A12 フレーム本体のメッセージ定義。
//!
//! ## 本体の種類
//!
//! - ハンドシェイク・制御: Protobuf（[`control`]）
//! - 入力イベント: 60 バイト固定長（[`event`]）
//! - 映像/音声: 固定長ヘッダー + ペイロード（[`media`]）
//!
//! 多バイト整数はすべてビッグエンディアン。
//!
//! ## プロトコルバージョン
//!
//! A12 のプロトコルバージョンは 1 ([`A12_VERSION`])。
//! ハンドシェイクでバージョンが一致しない場合、セッションは破棄される。

#![no_std]
extern crate alloc;

pub mod control;
pub mod error;
pub mod event;
pub mod media;

pub use control::{
    encode_message, BlobAccept, BlobAnnounce, BlobCancel, BlobComplete, BlobKind, ChannelNew,
    Close, Command, Control, Hello, HelloPhase, Shutdown,
};
pub use error::ProtoError;
pub use event::{Event, EventCategory, EVENT_SIZE};
pub use media::{
    AudioHeader, AudioMethod, CompressionBias, RateControl, VideoHeader, VideoMethod,
    AUDIO_HEADER_SIZE, VIDEO_HEADER_SIZE,
};

/// A12 プロトコルバージョン
pub const A12_VERSION: u32 = 1;

/// 固定長レイアウトの読み出し補助
pub(crate) fn ensure_len(buf: &[u8], needed: usize) -> Result<(), ProtoError> {
    if buf.len() < needed {
        return Err(ProtoError::Truncated {
            needed,
            got: buf.len(),
        });
    }
    Ok(())
}
