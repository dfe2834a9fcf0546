//! 映像/音声コーデックの接続点
//!
//! セッションが決めるのはメソッドタグとバイアスだけで、圧縮そのものは
//! [`MediaCodec`] の実装に任せる。既定の [`RawCodec`] は無圧縮の
//! 3 方式だけを扱う。

use alloc::vec::Vec;

use a12_proto::{
    AudioHeader, AudioMethod, CompressionBias, RateControl, VideoHeader, VideoMethod,
};

/// コーデックのエラー（該当フレームだけが失われる）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("video method {0:?} not supported by this codec")]
    UnsupportedVideo(VideoMethod),
    #[error("audio method {0:?} not supported by this codec")]
    UnsupportedAudio(AudioMethod),
    /// ピクセル数・サンプル数がヘッダーと合わない
    #[error("buffer size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch { expected: usize, got: usize },
}

/// 送信する映像フレーム
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub width: u16,
    pub height: u16,
    /// 0xRRGGBBAA のピクセル列
    pub pixels: &'a [u32],
}

/// 送信する音声フレーム
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub channels: u8,
    pub samplerate: u32,
    /// インターリーブ済みサンプル
    pub samples: &'a [i16],
}

/// 映像の送信オプション
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoOptions {
    pub method: VideoMethod,
    pub bias: CompressionBias,
    pub rate: RateControl,
}

/// 映像/音声コーデック
pub trait MediaCodec {
    fn encode_video(&mut self, opts: &VideoOptions, frame: &VideoFrame<'_>) -> Result<Vec<u8>, CodecError>;

    fn decode_video(&mut self, header: &VideoHeader, payload: &[u8]) -> Result<Vec<u32>, CodecError>;

    fn encode_audio(&mut self, method: AudioMethod, frame: &AudioFrame<'_>) -> Result<Vec<u8>, CodecError>;

    fn decode_audio(&mut self, header: &AudioHeader, payload: &[u8]) -> Result<Vec<i16>, CodecError>;
}

/// 無圧縮コーデック
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl RawCodec {
    fn bytes_per_pixel(method: VideoMethod) -> Result<usize, CodecError> {
        match method {
            VideoMethod::Normal => Ok(4),
            VideoMethod::RawNoAlpha => Ok(3),
            VideoMethod::RawRgb565 => Ok(2),
            other => Err(CodecError::UnsupportedVideo(other)),
        }
    }
}

impl MediaCodec for RawCodec {
    fn encode_video(&mut self, opts: &VideoOptions, frame: &VideoFrame<'_>) -> Result<Vec<u8>, CodecError> {
        let bpp = Self::bytes_per_pixel(opts.method)?;
        let count = frame.width as usize * frame.height as usize;
        if frame.pixels.len() != count {
            return Err(CodecError::SizeMismatch {
                expected: count * 4,
                got: frame.pixels.len() * 4,
            });
        }

        let mut out = Vec::with_capacity(count * bpp);
        for &px in frame.pixels {
            let [r, g, b, a] = px.to_be_bytes();
            match opts.method {
                VideoMethod::Normal => out.extend_from_slice(&[r, g, b, a]),
                VideoMethod::RawNoAlpha => out.extend_from_slice(&[r, g, b]),
                _ => {
                    let v = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
        }
        Ok(out)
    }

    fn decode_video(&mut self, header: &VideoHeader, payload: &[u8]) -> Result<Vec<u32>, CodecError> {
        let bpp = Self::bytes_per_pixel(header.method)?;
        let expected = header.pixels() * bpp;
        if payload.len() != expected {
            return Err(CodecError::SizeMismatch {
                expected,
                got: payload.len(),
            });
        }

        Ok(payload
            .chunks_exact(bpp)
            .map(|px| match header.method {
                VideoMethod::Normal => u32::from_be_bytes([px[0], px[1], px[2], px[3]]),
                VideoMethod::RawNoAlpha => u32::from_be_bytes([px[0], px[1], px[2], 0xFF]),
                _ => {
                    let v = u16::from_be_bytes([px[0], px[1]]);
                    let r = ((v >> 11) & 0x1F) as u8;
                    let g = ((v >> 5) & 0x3F) as u8;
                    let b = (v & 0x1F) as u8;
                    u32::from_be_bytes([r << 3 | r >> 2, g << 2 | g >> 4, b << 3 | b >> 2, 0xFF])
                }
            })
            .collect())
    }

    fn encode_audio(&mut self, method: AudioMethod, frame: &AudioFrame<'_>) -> Result<Vec<u8>, CodecError> {
        match method {
            AudioMethod::Raw => Ok(frame.samples.iter().flat_map(|s| s.to_be_bytes()).collect()),
        }
    }

    fn decode_audio(&mut self, header: &AudioHeader, payload: &[u8]) -> Result<Vec<i16>, CodecError> {
        match header.method {
            AudioMethod::Raw => {
                let expected = header.samples as usize * 2;
                if payload.len() != expected {
                    return Err(CodecError::SizeMismatch {
                        expected,
                        got: payload.len(),
                    });
                }
                Ok(payload
                    .chunks_exact(2)
                    .map(|s| i16::from_be_bytes([s[0], s[1]]))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(method: VideoMethod, width: u16, height: u16) -> VideoHeader {
        VideoHeader {
            method,
            bias: CompressionBias::Balanced,
            width,
            height,
        }
    }

    #[test]
    fn test_normal_is_lossless() {
        let pixels = [0x1122_3344u32, 0xAABB_CCDD];
        let frame = VideoFrame {
            width: 2,
            height: 1,
            pixels: &pixels,
        };
        let mut codec = RawCodec;
        let bytes = codec.encode_video(&VideoOptions::default(), &frame).unwrap();
        assert_eq!(bytes, alloc::vec![0x11, 0x22, 0x33, 0x44, 0xAA, 0xBB, 0xCC, 0xDD]);

        let decoded = codec.decode_video(&header(VideoMethod::Normal, 2, 1), &bytes).unwrap();
        assert_eq!(decoded, pixels.to_vec());
    }

    #[test]
    fn test_no_alpha_drops_alpha() {
        let pixels = [0x1020_3040u32];
        let frame = VideoFrame {
            width: 1,
            height: 1,
            pixels: &pixels,
        };
        let opts = VideoOptions {
            method: VideoMethod::RawNoAlpha,
            ..VideoOptions::default()
        };
        let mut codec = RawCodec;
        let bytes = codec.encode_video(&opts, &frame).unwrap();
        assert_eq!(bytes.len(), 3);
        let decoded = codec.decode_video(&header(VideoMethod::RawNoAlpha, 1, 1), &bytes).unwrap();
        assert_eq!(decoded, alloc::vec![0x1020_30FF]);
    }

    #[test]
    fn test_rgb565_white_stays_white() {
        let pixels = [0xFFFF_FFFFu32];
        let frame = VideoFrame {
            width: 1,
            height: 1,
            pixels: &pixels,
        };
        let opts = VideoOptions {
            method: VideoMethod::RawRgb565,
            ..VideoOptions::default()
        };
        let mut codec = RawCodec;
        let bytes = codec.encode_video(&opts, &frame).unwrap();
        assert_eq!(bytes, alloc::vec![0xFF, 0xFF]);
        let decoded = codec.decode_video(&header(VideoMethod::RawRgb565, 1, 1), &bytes).unwrap();
        assert_eq!(decoded, alloc::vec![0xFFFF_FFFF]);
    }

    #[test]
    fn test_compressed_methods_unsupported() {
        let mut codec = RawCodec;
        let opts = VideoOptions {
            method: VideoMethod::H264,
            ..VideoOptions::default()
        };
        let frame = VideoFrame {
            width: 0,
            height: 0,
            pixels: &[],
        };
        assert_eq!(
            codec.encode_video(&opts, &frame),
            Err(CodecError::UnsupportedVideo(VideoMethod::H264))
        );
    }

    #[test]
    fn test_pixel_count_mismatch() {
        let mut codec = RawCodec;
        let result = codec.decode_video(&header(VideoMethod::Normal, 2, 2), &[0u8; 8]);
        assert_eq!(result, Err(CodecError::SizeMismatch { expected: 16, got: 8 }));
    }

    #[test]
    fn test_audio_roundtrip() {
        let samples = [0i16, -1, 1234, i16::MIN];
        let frame = AudioFrame {
            channels: 2,
            samplerate: 48000,
            samples: &samples,
        };
        let mut codec = RawCodec;
        let bytes = codec.encode_audio(AudioMethod::Raw, &frame).unwrap();
        let header = AudioHeader {
            method: AudioMethod::Raw,
            channels: 2,
            samplerate: 48000,
            samples: 4,
        };
        assert_eq!(codec.decode_audio(&header, &bytes).unwrap(), samples.to_vec());
    }
}
