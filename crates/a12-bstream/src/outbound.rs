//! 送信側の転送スケジューラー
//!
//! - チャンネルごとに同時に 1 つだけ転送する。残りはキューで待つ
//! - 開始順は種別の優先度 (FONT > FONT_SUPPL > STATE > BLOB)、同じ種別なら先着順
//! - 受信側の Accept が来るまではチャンクを送らない。ただしフォントは
//!   先頭の数チャンク（ramp）を先行して送れる
//! - 映像/音声が待っている間は flush 1 回あたり少量（burst）だけ、
//!   そうでなければ上限まで送る。複数チャンネルはラウンドロビン

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use a12_proto::{BlobAnnounce, BlobCancel, BlobComplete, BlobKind, Command};
use a12_transport::BlobChunk;

use crate::error::BlobError;
use crate::handler::{BlobDescriptor, BlobDirection, BlobEvent, BlobMeta, BlobSize};
use crate::source::BlobSource;

/// チャンクの既定サイズ
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// 送出量の制限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLimits {
    pub chunk_size: usize,
    /// 映像/音声と競合しているときの 1 flush あたりのチャンク数
    pub burst: u32,
    /// 同上、フォントの場合
    pub font_burst: u32,
    /// Accept 前に送ってよいフォントのチャンク数
    pub font_ramp: u32,
    /// 競合がないときの 1 flush あたりの上限バイト数
    pub full_speed_bytes: usize,
}

impl Default for BlobLimits {
    fn default() -> Self {
        BlobLimits {
            chunk_size: DEFAULT_CHUNK_SIZE,
            burst: 4,
            font_burst: 16,
            font_ramp: 4,
            full_speed_bytes: 1024 * 1024,
        }
    }
}

/// 送出する転送の要求
pub struct BlobRequest {
    pub kind: BlobKind,
    pub size: BlobSize,
    pub checksum: Option<[u8; 16]>,
    pub source: Box<dyn BlobSource>,
}

impl BlobRequest {
    /// ソースのサイズヒントからサイズを決める
    pub fn new(kind: BlobKind, source: Box<dyn BlobSource>) -> Self {
        let size = match source.size_hint() {
            Some(n) => BlobSize::Known(n),
            None => BlobSize::Streaming,
        };
        BlobRequest {
            kind,
            size,
            checksum: None,
            source,
        }
    }

    pub fn with_checksum(mut self, checksum: [u8; 16]) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// 1 回の flush での送出条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkPolicy {
    /// 映像/音声が送出待ち
    pub media_pending: bool,
    /// このチャンネルだけ送る
    pub only_channel: Option<u8>,
}

/// ブロブ区間で順に封緘するフレーム
#[derive(Debug, Clone, PartialEq)]
pub enum BlobFrame {
    Chunk { channel: u8, chunk: BlobChunk },
    /// Complete / Cancel / 次の Announce（チャンクとの順序を保つ）
    Control { channel: u8, command: Command },
}

struct Pending {
    seq: u64,
    meta: BlobMeta,
    source: Box<dyn BlobSource>,
}

struct Active {
    meta: BlobMeta,
    source: Box<dyn BlobSource>,
    accepted: bool,
    offset: u64,
    ramp_left: u32,
}

impl Active {
    fn may_send(&self) -> bool {
        self.accepted || self.ramp_left > 0
    }

    fn may_complete(&self) -> bool {
        self.accepted || self.meta.kind.is_font()
    }
}

#[derive(Default)]
struct OutboundChannel {
    active: Option<Active>,
    queue: Vec<Pending>,
}

/// 1 チャンネル 1 ステップの結果
enum Step {
    Idle,
    Sent(usize),
    Finished,
}

/// 送信側スケジューラー
pub struct OutboundScheduler {
    channels: BTreeMap<u8, OutboundChannel>,
    next_stream_id: u64,
    next_seq: u64,
    /// 前回最初に送ったチャンネル（ラウンドロビンの起点）
    cursor: Option<u8>,
    limits: BlobLimits,
    bytes_sent: u64,
}

impl OutboundScheduler {
    pub fn new(limits: BlobLimits) -> Self {
        OutboundScheduler {
            channels: BTreeMap::new(),
            next_stream_id: 1,
            next_seq: 0,
            cursor: None,
            limits,
            bytes_sent: 0,
        }
    }

    /// 転送をキューに積む。戻り値はストリーム ID
    pub fn enqueue(&mut self, channel: u8, request: BlobRequest) -> u64 {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let meta = BlobMeta {
            channel,
            stream_id,
            kind: request.kind,
            direction: BlobDirection::Outbound,
            size: request.size,
            checksum: request.checksum,
        };
        self.channels.entry(channel).or_default().queue.push(Pending {
            seq,
            meta,
            source: request.source,
        });
        stream_id
    }

    /// チャンネルが空いていれば、優先度の最も高い転送を開始する
    pub fn start_next(&mut self, channel: u8) -> Option<BlobAnnounce> {
        let ch = self.channels.get_mut(&channel)?;
        if ch.active.is_some() {
            return None;
        }
        let (idx, _) = ch
            .queue
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.meta.kind.priority(), p.seq))?;
        let pending = ch.queue.remove(idx);

        let announce = announce_for(&pending.meta);
        let ramp_left = if pending.meta.kind.is_font() {
            self.limits.font_ramp
        } else {
            0
        };
        ch.active = Some(Active {
            meta: pending.meta,
            source: pending.source,
            accepted: false,
            offset: 0,
            ramp_left,
        });
        Some(announce)
    }

    /// 受信側が受け入れた
    pub fn accept(&mut self, channel: u8, stream_id: u64) -> bool {
        match self.active_mut(channel, stream_id) {
            Some(active) => {
                active.accepted = true;
                true
            }
            None => false,
        }
    }

    /// 進行中の転送を取り除く（`stream_id` が None なら ID を問わない）
    pub fn take_active(&mut self, channel: u8, stream_id: Option<u64>) -> Option<BlobEvent> {
        let ch = self.channels.get_mut(&channel)?;
        let matches = ch
            .active
            .as_ref()
            .is_some_and(|a| stream_id.map_or(true, |id| a.meta.stream_id == id));
        if !matches {
            return None;
        }
        let active = ch.active.take()?;
        Some(BlobEvent::Cancelled {
            meta: active.meta,
            descriptor: BlobDescriptor::Source(active.source),
        })
    }

    /// チャンネルの転送をすべて取り除く（進行中 + キュー）
    pub fn drain_channel(&mut self, channel: u8) -> Vec<BlobEvent> {
        let mut events = Vec::new();
        if let Some(ch) = self.channels.remove(&channel) {
            let queued = ch.queue.into_iter().map(|p| (p.meta, p.source));
            let active = ch.active.map(|a| (a.meta, a.source));
            for (meta, source) in active.into_iter().chain(queued) {
                events.push(BlobEvent::Cancelled {
                    meta,
                    descriptor: BlobDescriptor::Source(source),
                });
            }
        }
        events
    }

    /// 今回の flush で送るチャンクを作る
    ///
    /// 終了した転送のイベントは `finished` に積む。
    pub fn next_frames(
        &mut self,
        policy: ChunkPolicy,
        frames: &mut Vec<BlobFrame>,
        finished: &mut Vec<BlobEvent>,
    ) {
        let order = self.service_order(policy.only_channel);
        if order.is_empty() {
            return;
        }

        let mut sent: BTreeMap<u8, u32> = BTreeMap::new();
        let mut total = 0usize;
        let mut first_served = None;

        'rounds: loop {
            let mut progressed = false;
            for &channel in &order {
                if total >= self.limits.full_speed_bytes {
                    break 'rounds;
                }
                let count = sent.get(&channel).copied().unwrap_or(0);
                if policy.media_pending && count >= self.burst_for(channel) {
                    continue;
                }
                match self.step(channel, frames, finished) {
                    Step::Idle => {}
                    Step::Sent(n) => {
                        total += n;
                        *sent.entry(channel).or_insert(0) += 1;
                        first_served.get_or_insert(channel);
                        progressed = true;
                    }
                    Step::Finished => progressed = true,
                }
            }
            if !progressed {
                break;
            }
        }

        if first_served.is_some() {
            self.cursor = first_served;
        }
        self.bytes_sent += total as u64;
    }

    /// ラウンドロビン順のチャンネル列（前回の起点の次から）
    fn service_order(&self, only: Option<u8>) -> Vec<u8> {
        let mut ids: Vec<u8> = self
            .channels
            .iter()
            .filter(|(id, ch)| ch.active.is_some() && only.map_or(true, |o| o == **id))
            .map(|(id, _)| *id)
            .collect();
        if let Some(cursor) = self.cursor {
            let split = ids.iter().position(|&id| id > cursor).unwrap_or(0);
            ids.rotate_left(split);
        }
        ids
    }

    fn burst_for(&self, channel: u8) -> u32 {
        let is_font = self
            .channels
            .get(&channel)
            .and_then(|ch| ch.active.as_ref())
            .is_some_and(|a| a.meta.kind.is_font());
        if is_font {
            self.limits.font_burst
        } else {
            self.limits.burst
        }
    }

    fn step(&mut self, channel: u8, frames: &mut Vec<BlobFrame>, finished: &mut Vec<BlobEvent>) -> Step {
        let chunk_size = self.limits.chunk_size;
        let Some(active) = self.channels.get_mut(&channel).and_then(|ch| ch.active.as_mut()) else {
            return Step::Idle;
        };

        let exhausted = matches!(active.meta.size, BlobSize::Known(n) if active.offset >= n);
        if exhausted {
            return self.complete(channel, frames, finished);
        }
        if !active.may_send() {
            return Step::Idle;
        }

        let mut buf = alloc::vec![0u8; chunk_size];
        match active.source.read(&mut buf) {
            Ok(0) => self.complete(channel, frames, finished),
            Ok(n) => {
                buf.truncate(n);
                frames.push(BlobFrame::Chunk {
                    channel,
                    chunk: BlobChunk {
                        stream_id: active.meta.stream_id,
                        offset: active.offset,
                        data: buf,
                    },
                });
                active.offset += n as u64;
                if !active.accepted {
                    active.ramp_left = active.ramp_left.saturating_sub(1);
                }
                Step::Sent(n)
            }
            Err(BlobError::WouldBlock) => Step::Idle,
            Err(err) => {
                tracing::debug!(channel, stream_id = active.meta.stream_id, error = %err, "blob source failed");
                self.abort(channel, frames, finished);
                Step::Finished
            }
        }
    }

    fn complete(&mut self, channel: u8, frames: &mut Vec<BlobFrame>, finished: &mut Vec<BlobEvent>) -> Step {
        let Some(ch) = self.channels.get_mut(&channel) else {
            return Step::Idle;
        };
        if !ch.active.as_ref().is_some_and(Active::may_complete) {
            return Step::Idle;
        }
        let Some(active) = ch.active.take() else {
            return Step::Idle;
        };

        frames.push(BlobFrame::Control {
            channel,
            command: Command::BlobComplete(BlobComplete {
                stream_id: active.meta.stream_id,
                total: active.offset,
            }),
        });
        finished.push(BlobEvent::Completed {
            meta: active.meta,
            descriptor: BlobDescriptor::Source(active.source),
        });
        self.announce_next(channel, frames);
        Step::Finished
    }

    fn abort(&mut self, channel: u8, frames: &mut Vec<BlobFrame>, finished: &mut Vec<BlobEvent>) {
        if let Some(event) = self.take_active(channel, None) {
            frames.push(BlobFrame::Control {
                channel,
                command: Command::BlobCancel(BlobCancel {
                    stream_id: event.meta().stream_id,
                    from_sender: true,
                }),
            });
            finished.push(event);
        }
        self.announce_next(channel, frames);
    }

    fn announce_next(&mut self, channel: u8, frames: &mut Vec<BlobFrame>) {
        if let Some(announce) = self.start_next(channel) {
            frames.push(BlobFrame::Control {
                channel,
                command: Command::BlobAnnounce(announce),
            });
        }
    }

    fn active_mut(&mut self, channel: u8, stream_id: u64) -> Option<&mut Active> {
        self.channels
            .get_mut(&channel)?
            .active
            .as_mut()
            .filter(|a| a.meta.stream_id == stream_id)
    }

    /// 進行中の転送がある
    pub fn has_active(&self, channel: u8) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|ch| ch.active.is_some())
    }

    /// 進行中の転送のストリーム ID
    pub fn active_stream(&self, channel: u8) -> Option<u64> {
        self.channels
            .get(&channel)?
            .active
            .as_ref()
            .map(|a| a.meta.stream_id)
    }

    /// キューで待っている転送の数
    pub fn queued(&self, channel: u8) -> usize {
        self.channels.get(&channel).map_or(0, |ch| ch.queue.len())
    }

    /// いずれかのチャンネルに進行中または待ちの転送がある
    pub fn is_busy(&self) -> bool {
        self.channels
            .values()
            .any(|ch| ch.active.is_some() || !ch.queue.is_empty())
    }

    /// 次の flush で送るものがある
    pub fn wants_send(&self) -> bool {
        self.channels.values().any(|ch| {
            ch.active.as_ref().is_some_and(|a| {
                let exhausted = matches!(a.meta.size, BlobSize::Known(n) if a.offset >= n);
                if exhausted {
                    a.may_complete()
                } else {
                    a.may_send()
                }
            })
        })
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

fn announce_for(meta: &BlobMeta) -> BlobAnnounce {
    let (streaming, known_size) = match meta.size {
        BlobSize::Streaming => (true, 0),
        BlobSize::Known(n) => (false, n),
    };
    BlobAnnounce {
        stream_id: meta.stream_id,
        kind: meta.kind as i32,
        streaming,
        known_size,
        checksum: meta.checksum.map(|c| c.to_vec()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn request(kind: BlobKind, len: usize) -> BlobRequest {
        BlobRequest::new(kind, Box::new(MemorySource::new(alloc::vec![0x5A; len])))
    }

    fn small_limits() -> BlobLimits {
        BlobLimits {
            chunk_size: 4,
            burst: 2,
            font_burst: 3,
            font_ramp: 2,
            full_speed_bytes: 64,
        }
    }

    fn chunks_on(frames: &[BlobFrame], channel: u8) -> usize {
        frames
            .iter()
            .filter(|f| matches!(f, BlobFrame::Chunk { channel: c, .. } if *c == channel))
            .count()
    }

    #[test]
    fn test_start_order_by_priority_then_fifo() {
        let mut sched = OutboundScheduler::new(BlobLimits::default());
        let blob = sched.enqueue(1, request(BlobKind::Blob, 1));
        let state = sched.enqueue(1, request(BlobKind::State, 1));
        let font_a = sched.enqueue(1, request(BlobKind::Font, 1));
        let suppl = sched.enqueue(1, request(BlobKind::FontSuppl, 1));
        let font_b = sched.enqueue(1, request(BlobKind::Font, 1));

        let mut started = Vec::new();
        while let Some(announce) = sched.start_next(1) {
            started.push(announce.stream_id);
            sched.take_active(1, None);
        }
        assert_eq!(started, alloc::vec![font_a, font_b, suppl, state, blob]);
    }

    #[test]
    fn test_one_active_per_channel() {
        let mut sched = OutboundScheduler::new(BlobLimits::default());
        sched.enqueue(1, request(BlobKind::Blob, 1));
        sched.enqueue(1, request(BlobKind::Blob, 1));

        assert!(sched.start_next(1).is_some());
        assert!(sched.start_next(1).is_none());
        assert!(sched.has_active(1));
        assert_eq!(sched.queued(1), 1);
    }

    #[test]
    fn test_no_chunks_before_accept() {
        let mut sched = OutboundScheduler::new(small_limits());
        sched.enqueue(1, request(BlobKind::State, 10));
        sched.start_next(1);

        let (mut frames, mut finished) = (Vec::new(), Vec::new());
        sched.next_frames(ChunkPolicy::default(), &mut frames, &mut finished);
        assert!(frames.is_empty());
        assert!(!sched.wants_send());
    }

    #[test]
    fn test_font_ramp_before_accept() {
        let mut sched = OutboundScheduler::new(small_limits());
        sched.enqueue(1, request(BlobKind::Font, 40));
        sched.start_next(1);

        let (mut frames, mut finished) = (Vec::new(), Vec::new());
        sched.next_frames(ChunkPolicy::default(), &mut frames, &mut finished);
        assert_eq!(chunks_on(&frames, 1), 2);
        assert!(finished.is_empty());
    }

    #[test]
    fn test_full_speed_completes_and_reports() {
        let mut sched = OutboundScheduler::new(small_limits());
        let id = sched.enqueue(2, request(BlobKind::Blob, 10));
        sched.start_next(2);
        assert!(sched.accept(2, id));

        let (mut frames, mut finished) = (Vec::new(), Vec::new());
        sched.next_frames(ChunkPolicy::default(), &mut frames, &mut finished);

        assert_eq!(chunks_on(&frames, 2), 3);
        assert!(matches!(
            frames.last(),
            Some(BlobFrame::Control { command: Command::BlobComplete(c), .. }) if c.total == 10
        ));
        assert_eq!(finished.len(), 1);
        assert!(matches!(finished[0], BlobEvent::Completed { .. }));
        assert!(!sched.is_busy());
    }

    #[test]
    fn test_burst_when_media_pending() {
        let mut sched = OutboundScheduler::new(small_limits());
        let id = sched.enqueue(1, request(BlobKind::Blob, 40));
        sched.start_next(1);
        sched.accept(1, id);

        let policy = ChunkPolicy {
            media_pending: true,
            only_channel: None,
        };
        let (mut frames, mut finished) = (Vec::new(), Vec::new());
        sched.next_frames(policy, &mut frames, &mut finished);
        assert_eq!(chunks_on(&frames, 1), 2);
    }

    #[test]
    fn test_round_robin_and_channel_only() {
        let mut sched = OutboundScheduler::new(small_limits());
        for ch in [1u8, 2] {
            let id = sched.enqueue(ch, request(BlobKind::Blob, 400));
            sched.start_next(ch);
            sched.accept(ch, id);
        }

        let only = ChunkPolicy {
            media_pending: false,
            only_channel: Some(2),
        };
        let (mut frames, mut finished) = (Vec::new(), Vec::new());
        sched.next_frames(only, &mut frames, &mut finished);
        assert_eq!(chunks_on(&frames, 1), 0);
        assert!(chunks_on(&frames, 2) > 0);

        let policy = ChunkPolicy {
            media_pending: true,
            only_channel: None,
        };
        frames.clear();
        sched.next_frames(policy, &mut frames, &mut finished);
        assert_eq!(chunks_on(&frames, 1), 2);
        assert_eq!(chunks_on(&frames, 2), 2);
    }

    #[test]
    fn test_completion_announces_next() {
        let mut sched = OutboundScheduler::new(small_limits());
        let first = sched.enqueue(3, request(BlobKind::Blob, 2));
        let second = sched.enqueue(3, request(BlobKind::Blob, 2));
        sched.start_next(3);
        sched.accept(3, first);

        let (mut frames, mut finished) = (Vec::new(), Vec::new());
        sched.next_frames(ChunkPolicy::default(), &mut frames, &mut finished);

        assert!(matches!(
            frames.last(),
            Some(BlobFrame::Control { command: Command::BlobAnnounce(a), .. }) if a.stream_id == second
        ));
        assert_eq!(sched.active_stream(3), Some(second));
    }

    #[test]
    fn test_drain_channel_returns_sources() {
        let mut sched = OutboundScheduler::new(BlobLimits::default());
        sched.enqueue(4, request(BlobKind::Blob, 1));
        sched.enqueue(4, request(BlobKind::State, 1));
        sched.start_next(4);

        let events = sched.drain_channel(4);
        assert_eq!(events.len(), 2);
        assert!(!sched.is_busy());
    }
}
