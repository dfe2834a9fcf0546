//! 入力/システムイベントの固定長エンコーディング
//!
//! ```text
//! [category: u8][reserved: u8][kind: u16][ioevs: i32 x 6][message: 32 bytes]
//! ```
//!
//! 合計 60 バイト。すべてビッグエンディアン。

use core::fmt;

use crate::ensure_len;
use crate::error::ProtoError;

/// エンコード後のイベントサイズ
pub const EVENT_SIZE: usize = 60;

/// 汎用 io 値の数
pub const EVENT_IO_SLOTS: usize = 6;

/// メッセージ領域の長さ
pub const EVENT_MESSAGE_LEN: usize = 32;

/// イベントカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventCategory {
    System = 1,
    Io = 2,
    Video = 4,
    Audio = 8,
    Target = 16,
    FrameServer = 32,
    External = 64,
}

impl TryFrom<u8> for EventCategory {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => EventCategory::System,
            2 => EventCategory::Io,
            4 => EventCategory::Video,
            8 => EventCategory::Audio,
            16 => EventCategory::Target,
            32 => EventCategory::FrameServer,
            64 => EventCategory::External,
            other => return Err(ProtoError::UnknownCategory(other)),
        })
    }
}

/// デコード済みイベント
#[derive(Clone, PartialEq, Eq)]
pub struct Event {
    pub category: EventCategory,
    pub kind: u16,
    pub ioevs: [i32; EVENT_IO_SLOTS],
    /// NUL 終端または埋め尽くしの UTF-8 断片
    pub message: [u8; EVENT_MESSAGE_LEN],
}

impl Event {
    pub fn new(category: EventCategory, kind: u16) -> Self {
        Event {
            category,
            kind,
            ioevs: [0; EVENT_IO_SLOTS],
            message: [0; EVENT_MESSAGE_LEN],
        }
    }

    /// io 値を設定する（ビルダー形式）
    pub fn with_ioevs(mut self, ioevs: [i32; EVENT_IO_SLOTS]) -> Self {
        self.ioevs = ioevs;
        self
    }

    /// メッセージを設定する。32 バイトを超える分は切り捨てる
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = [0; EVENT_MESSAGE_LEN];
        let bytes = message.as_bytes();
        let n = bytes.len().min(EVENT_MESSAGE_LEN);
        self.message[..n].copy_from_slice(&bytes[..n]);
        self
    }

    /// メッセージのバイト列（最初の NUL まで）
    pub fn message_bytes(&self) -> &[u8] {
        let end = self
            .message
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(EVENT_MESSAGE_LEN);
        &self.message[..end]
    }

    /// メッセージを文字列として返す（不正な UTF-8 なら None）
    pub fn message_str(&self) -> Option<&str> {
        core::str::from_utf8(self.message_bytes()).ok()
    }

    pub fn encode(&self) -> [u8; EVENT_SIZE] {
        let mut out = [0u8; EVENT_SIZE];
        out[0] = self.category as u8;
        out[2..4].copy_from_slice(&self.kind.to_be_bytes());
        for (i, v) in self.ioevs.iter().enumerate() {
            let at = 4 + i * 4;
            out[at..at + 4].copy_from_slice(&v.to_be_bytes());
        }
        out[28..].copy_from_slice(&self.message);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        ensure_len(buf, EVENT_SIZE)?;
        let category = EventCategory::try_from(buf[0])?;
        let kind = u16::from_be_bytes([buf[2], buf[3]]);

        let mut ioevs = [0i32; EVENT_IO_SLOTS];
        for (i, slot) in ioevs.iter_mut().enumerate() {
            let at = 4 + i * 4;
            *slot = i32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        }

        let mut message = [0u8; EVENT_MESSAGE_LEN];
        message.copy_from_slice(&buf[28..EVENT_SIZE]);

        Ok(Event {
            category,
            kind,
            ioevs,
            message,
        })
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("category", &self.category)
            .field("kind", &self.kind)
            .field("ioevs", &self.ioevs)
            .field("message", &self.message_str())
            .finish()
    }
}
