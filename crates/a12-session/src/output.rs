//! 送信キューと出力バッファ
//!
//! ハンドシェイクフレームは即座に封緘してバッファへ書く。
//! それ以外は未封緘のまま種別ごとのキューに積み、`flush` のときに
//! control > event > audio > video > blob の順で封緘する。
//! 一度封緘したフレームの順序は変えない。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use a12_bstream::BlobFrame;
use a12_crypto::FrameCipher;
use a12_proto::{encode_message, Command, Control};
use a12_transport::{seal_frame_into, FrameClass, TransportError};

/// `channel_enqueue` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    Queued,
    /// 送信待ちが上限を超えている。flush 後に再試行する
    Congested,
}

/// セッション統計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// 種別ごとの受信フレーム数（添字は `FrameClass::index`）
    pub frames_in: [u64; FrameClass::COUNT],
    pub frames_out: [u64; FrameClass::COUNT],
    /// 未封緘の送信待ちバイト数
    pub queued_bytes: usize,
    pub blob_bytes_in: u64,
    pub blob_bytes_out: u64,
    /// 宛先待ちで溜めているバイト数
    pub unbound_bytes: usize,
}

/// 未封緘フレームのキュー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lane {
    Control = 0,
    Event = 1,
    Audio = 2,
    Video = 3,
}

impl Lane {
    const ORDER: [Lane; 4] = [Lane::Control, Lane::Event, Lane::Audio, Lane::Video];

    fn class(self) -> FrameClass {
        match self {
            Lane::Control => FrameClass::Control,
            Lane::Event => FrameClass::Event,
            Lane::Audio => FrameClass::Audio,
            Lane::Video => FrameClass::Video,
        }
    }
}

struct QueuedFrame {
    channel: u8,
    body: Vec<u8>,
}

pub(crate) struct OutputQueue {
    lanes: [VecDeque<QueuedFrame>; 4],
    queued_bytes: usize,
    /// 封緘済みのワイヤバイト
    buf: Vec<u8>,
    /// 前回の flush で渡した先頭部分
    handed_out: usize,
    bytes_out: u64,
    frames_out: [u64; FrameClass::COUNT],
    blob_bytes_out: u64,
}

impl OutputQueue {
    pub fn new() -> Self {
        OutputQueue {
            lanes: Default::default(),
            queued_bytes: 0,
            buf: Vec::new(),
            handed_out: 0,
            bytes_out: 0,
            frames_out: [0; FrameClass::COUNT],
            blob_bytes_out: 0,
        }
    }

    /// 未封緘のまま積む
    pub fn push(&mut self, lane: Lane, channel: u8, body: Vec<u8>) {
        self.queued_bytes += body.len();
        self.lanes[lane as usize].push_back(QueuedFrame { channel, body });
    }

    /// 制御コマンドを積む
    pub fn push_command(&mut self, channel: u8, command: Command) {
        self.push(Lane::Control, channel, encode_message(&Control::new(command)));
    }

    /// キューを経由せずに封緘してバッファへ書く（ハンドシェイク・終了通知）
    pub fn push_sealed(
        &mut self,
        cipher: &mut FrameCipher,
        class: FrameClass,
        channel: u8,
        body: &[u8],
    ) -> Result<(), TransportError> {
        let n = seal_frame_into(cipher, class, channel, body, &mut self.buf)?;
        self.bytes_out += n as u64;
        self.frames_out[class.index()] += 1;
        Ok(())
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// 映像・音声が送信待ち
    pub fn media_pending(&self) -> bool {
        !self.lanes[Lane::Audio as usize].is_empty() || !self.lanes[Lane::Video as usize].is_empty()
    }

    pub fn has_queued(&self) -> bool {
        self.lanes.iter().any(|l| !l.is_empty())
    }

    /// まだ渡していない封緘済みバイトがある
    pub fn has_unsent(&self) -> bool {
        self.buf.len() > self.handed_out
    }

    /// 前回渡したバイトを捨てる
    pub fn begin_flush(&mut self) {
        self.buf.drain(..self.handed_out);
        self.handed_out = 0;
    }

    /// 積まれているフレームを優先度順にすべて封緘する
    pub fn seal_queued(&mut self, cipher: &mut FrameCipher) -> Result<(), TransportError> {
        for lane in Lane::ORDER {
            while let Some(frame) = self.lanes[lane as usize].pop_front() {
                self.queued_bytes -= frame.body.len();
                self.push_sealed(cipher, lane.class(), frame.channel, &frame.body)?;
            }
        }
        Ok(())
    }

    /// 指定チャンネルのフレームだけを優先度順に封緘する。他のチャンネルは残す
    pub fn seal_channel(&mut self, cipher: &mut FrameCipher, channel: u8) -> Result<(), TransportError> {
        for lane in Lane::ORDER {
            let (mine, rest): (VecDeque<_>, VecDeque<_>) = core::mem::take(&mut self.lanes[lane as usize])
                .into_iter()
                .partition(|f| f.channel == channel);
            self.lanes[lane as usize] = rest;
            for frame in mine {
                self.queued_bytes -= frame.body.len();
                self.push_sealed(cipher, lane.class(), frame.channel, &frame.body)?;
            }
        }
        Ok(())
    }

    /// ブロブ区間のフレームを順に封緘する
    pub fn seal_blob(&mut self, cipher: &mut FrameCipher, frames: Vec<BlobFrame>) -> Result<(), TransportError> {
        for frame in frames {
            match frame {
                BlobFrame::Chunk { channel, chunk } => {
                    self.push_sealed(cipher, FrameClass::Blob, channel, &chunk.to_bytes())?;
                    self.blob_bytes_out += chunk.data.len() as u64;
                }
                BlobFrame::Control { channel, command } => {
                    let body = encode_message(&Control::new(command));
                    self.push_sealed(cipher, FrameClass::Control, channel, &body)?;
                }
            }
        }
        Ok(())
    }

    /// 封緘済みのバイトを渡す。次の flush までは変更しない
    pub fn hand_out(&mut self) -> &[u8] {
        self.handed_out = self.buf.len();
        &self.buf
    }

    /// 未封緘のキューを捨てる
    pub fn discard_queued(&mut self) {
        for lane in self.lanes.iter_mut() {
            lane.clear();
        }
        self.queued_bytes = 0;
    }

    pub(crate) fn fill_stats(&self, stats: &mut SessionStats) {
        stats.bytes_out = self.bytes_out;
        stats.frames_out = self.frames_out;
        stats.queued_bytes = self.queued_bytes;
        stats.blob_bytes_out = self.blob_bytes_out;
    }
}
