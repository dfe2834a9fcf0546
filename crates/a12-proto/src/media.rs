//! 映像/音声フレームのヘッダー
//!
//! 再組み立て後のペイロードの先頭に置かれる固定長ヘッダー。
//!
//! ```text
//! video: [method: u8][bias: u8][width: u16][height: u16]                    (6 bytes)
//! audio: [method: u8][channels: u8][samplerate: u32][samples: u32]          (10 bytes)
//! ```

use crate::ensure_len;
use crate::error::ProtoError;

pub const VIDEO_HEADER_SIZE: usize = 6;
pub const AUDIO_HEADER_SIZE: usize = 10;

/// 映像の圧縮方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum VideoMethod {
    /// 既定（RGBA 32bit をそのまま）
    #[default]
    Normal = 0,
    RawNoAlpha = 1,
    RawRgb565 = 2,
    Dpng = 3,
    H264 = 4,
    Flif = 5,
    Av1 = 6,
}

impl TryFrom<u8> for VideoMethod {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => VideoMethod::Normal,
            1 => VideoMethod::RawNoAlpha,
            2 => VideoMethod::RawRgb565,
            3 => VideoMethod::Dpng,
            4 => VideoMethod::H264,
            5 => VideoMethod::Flif,
            6 => VideoMethod::Av1,
            other => return Err(ProtoError::UnknownMethod(other)),
        })
    }
}

/// 圧縮時に何を優先するか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CompressionBias {
    Latency = 0,
    #[default]
    Balanced = 1,
    Quality = 2,
}

impl TryFrom<u8> for CompressionBias {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => CompressionBias::Latency,
            1 => CompressionBias::Balanced,
            2 => CompressionBias::Quality,
            other => return Err(ProtoError::UnknownMethod(other)),
        })
    }
}

/// レート制御（外部コーデックへのヒント。ワイヤには載らない）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RateControl {
    /// コーデック任せ
    #[default]
    Auto,
    /// 固定ビットレート（Mbit/s）
    Bitrate(f32),
    /// 可変レートファクター
    RateFactor(u8),
}

/// 音声の方式（現状は無圧縮のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AudioMethod {
    #[default]
    Raw = 0,
}

impl TryFrom<u8> for AudioMethod {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AudioMethod::Raw),
            other => Err(ProtoError::UnknownMethod(other)),
        }
    }
}

/// 映像フレームヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHeader {
    pub method: VideoMethod,
    pub bias: CompressionBias,
    pub width: u16,
    pub height: u16,
}

impl VideoHeader {
    pub fn encode(&self) -> [u8; VIDEO_HEADER_SIZE] {
        let mut out = [0u8; VIDEO_HEADER_SIZE];
        out[0] = self.method as u8;
        out[1] = self.bias as u8;
        out[2..4].copy_from_slice(&self.width.to_be_bytes());
        out[4..6].copy_from_slice(&self.height.to_be_bytes());
        out
    }

    /// ヘッダーをデコードし、残りのペイロードと一緒に返す
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), ProtoError> {
        ensure_len(buf, VIDEO_HEADER_SIZE)?;
        let header = VideoHeader {
            method: VideoMethod::try_from(buf[0])?,
            bias: CompressionBias::try_from(buf[1])?,
            width: u16::from_be_bytes([buf[2], buf[3]]),
            height: u16::from_be_bytes([buf[4], buf[5]]),
        };
        Ok((header, &buf[VIDEO_HEADER_SIZE..]))
    }

    /// ピクセル数
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// 音声フレームヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub method: AudioMethod,
    pub channels: u8,
    pub samplerate: u32,
    /// フレーム内のサンプル数（全チャンネル合計）
    pub samples: u32,
}

impl AudioHeader {
    pub fn encode(&self) -> [u8; AUDIO_HEADER_SIZE] {
        let mut out = [0u8; AUDIO_HEADER_SIZE];
        out[0] = self.method as u8;
        out[1] = self.channels;
        out[2..6].copy_from_slice(&self.samplerate.to_be_bytes());
        out[6..10].copy_from_slice(&self.samples.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), ProtoError> {
        ensure_len(buf, AUDIO_HEADER_SIZE)?;
        let header = AudioHeader {
            method: AudioMethod::try_from(buf[0])?,
            channels: buf[1],
            samplerate: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            samples: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        };
        Ok((header, &buf[AUDIO_HEADER_SIZE..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_header_layout() {
        let header = VideoHeader {
            method: VideoMethod::RawRgb565,
            bias: CompressionBias::Quality,
            width: 640,
            height: 480,
        };
        let mut buf = header.encode().to_vec();
        buf.extend_from_slice(&[0xAA, 0xBB]);

        assert_eq!(&buf[..6], &[2, 2, 0x02, 0x80, 0x01, 0xE0]);

        let (decoded, rest) = VideoHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(rest, &[0xAA, 0xBB]);
        assert_eq!(decoded.pixels(), 640 * 480);
    }

    #[test]
    fn test_video_unknown_method() {
        let buf = [9u8, 0, 0, 1, 0, 1];
        assert_eq!(VideoHeader::decode(&buf), Err(ProtoError::UnknownMethod(9)));
    }

    #[test]
    fn test_audio_header_layout() {
        let header = AudioHeader {
            method: AudioMethod::Raw,
            channels: 2,
            samplerate: 48000,
            samples: 1024,
        };
        let bytes = header.encode();
        assert_eq!(&bytes[2..6], &48000u32.to_be_bytes());

        let (decoded, rest) = AudioHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_audio_truncated() {
        assert_eq!(
            AudioHeader::decode(&[0u8; 4]),
            Err(ProtoError::Truncated { needed: 10, got: 4 })
        );
    }
}
