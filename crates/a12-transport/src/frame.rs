//! フレームヘッダーと封緘
//!
//! ## Wire Format
//! ```text
//! [class: u8][channel: u8][length: u32 BE][body: length bytes]
//! ```
//!
//! `length` は封緘後の本体長（暗号文 + 16 バイトタグ）。
//! ヘッダー 6 バイトはそのまま AEAD の AAD になる。

use alloc::vec::Vec;

use a12_crypto::{FrameCipher, TAG_LEN};

use crate::error::TransportError;

/// フレームヘッダー長
pub const FRAME_HEADER_SIZE: usize = 6;

/// 1 フレームに載せられる平文の最大長（256 KiB）
pub const MAX_FRAME_PAYLOAD: usize = 256 * 1024;

/// 封緘後の本体の最大長
pub const MAX_FRAME_BODY: usize = MAX_FRAME_PAYLOAD + TAG_LEN;

/// フレーム種別
///
/// 送信時の優先度もこの順（数値が小さいほど先）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FrameClass {
    Handshake = 0,
    Control = 1,
    Event = 2,
    Audio = 3,
    Video = 4,
    Blob = 5,
}

impl FrameClass {
    /// 統計用の添字
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// 映像・音声か
    pub fn is_media(&self) -> bool {
        matches!(self, FrameClass::Audio | FrameClass::Video)
    }

    pub const COUNT: usize = 6;
}

impl TryFrom<u8> for FrameClass {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => FrameClass::Handshake,
            1 => FrameClass::Control,
            2 => FrameClass::Event,
            3 => FrameClass::Audio,
            4 => FrameClass::Video,
            5 => FrameClass::Blob,
            other => return Err(TransportError::UnknownClass(other)),
        })
    }
}

/// フレームヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub class: FrameClass,
    pub channel: u8,
    /// 封緘後の本体長
    pub len: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[0] = self.class as u8;
        out[1] = self.channel;
        out[2..6].copy_from_slice(&self.len.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(TransportError::TooShort);
        }
        Ok(FrameHeader {
            class: FrameClass::try_from(bytes[0])?,
            channel: bytes[1],
            len: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        })
    }
}

/// 開封済みのフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub class: FrameClass,
    pub channel: u8,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(class: FrameClass, channel: u8, body: Vec<u8>) -> Self {
        Frame {
            class,
            channel,
            body,
        }
    }
}

/// フレームを封緘し、ヘッダー付きのワイヤ表現を `out` に追記する
///
/// 戻り値は追記したバイト数。
pub fn seal_frame_into(
    cipher: &mut FrameCipher,
    class: FrameClass,
    channel: u8,
    body: &[u8],
    out: &mut Vec<u8>,
) -> Result<usize, TransportError> {
    if body.len() > MAX_FRAME_PAYLOAD {
        return Err(TransportError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_PAYLOAD,
        });
    }

    let header = FrameHeader {
        class,
        channel,
        len: (body.len() + cipher.overhead()) as u32,
    };
    let aad = header.encode();
    let sealed = cipher.seal(&aad, body)?;

    out.extend_from_slice(&aad);
    out.extend_from_slice(&sealed);
    Ok(FRAME_HEADER_SIZE + sealed.len())
}

/// `seal_frame_into` の Vec を返す版
pub fn seal_frame(
    cipher: &mut FrameCipher,
    class: FrameClass,
    channel: u8,
    body: &[u8],
) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len() + cipher.overhead());
    seal_frame_into(cipher, class, channel, body, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_big_endian() {
        let header = FrameHeader {
            class: FrameClass::Video,
            channel: 3,
            len: 0x0001_0203,
        };
        let bytes = header.encode();
        assert_eq!(bytes, [4, 3, 0x00, 0x01, 0x02, 0x03]);
        assert_eq!(FrameHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_unknown_class() {
        let result = FrameHeader::decode(&[9, 0, 0, 0, 0, 0]);
        assert_eq!(result, Err(TransportError::UnknownClass(9)));
    }

    #[test]
    fn test_seal_plaintext_layout() {
        let mut cipher = FrameCipher::Plaintext;
        let wire = seal_frame(&mut cipher, FrameClass::Event, 1, b"abc").unwrap();
        assert_eq!(wire, alloc::vec![2, 1, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_seal_rejects_oversized_body() {
        let mut cipher = FrameCipher::Plaintext;
        let body = alloc::vec![0u8; MAX_FRAME_PAYLOAD + 1];
        let result = seal_frame(&mut cipher, FrameClass::Blob, 0, &body);
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_class_priority_order() {
        assert!(FrameClass::Handshake < FrameClass::Control);
        assert!(FrameClass::Event < FrameClass::Audio);
        assert!(FrameClass::Video < FrameClass::Blob);
    }
}
