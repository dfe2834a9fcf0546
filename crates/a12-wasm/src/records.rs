//! 受信結果の記録
//!
//! `unpack` の間にセッションから届いたものを JS に渡せる形で溜めておく。
//! ピクセル・サンプル・ブロブ本体は JSON に載せず、別のメソッドで取り出す。

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;

use a12_bstream::{BlobDirection, BlobEvent, BlobHandler, BlobResponse, MemorySink};
use a12_proto::{BlobKind, Event};
use a12_session::{DecodedAudio, DecodedVideo, DestinationId, DisplaySink, SessionStats};
use a12_transport::FrameClass;

/// 受信ブロブ 1 つの上限
pub const MAX_INBOUND_BLOB: usize = 64 * 1024 * 1024;

/// JS に渡す 1 件分
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Record {
    #[serde(rename_all = "camelCase")]
    Event {
        dest: u32,
        channel: u8,
        category: u8,
        kind: u16,
        ioevs: [i32; 6],
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Video {
        dest: u32,
        channel: u8,
        width: u16,
        height: u16,
    },
    #[serde(rename_all = "camelCase")]
    Audio {
        dest: u32,
        channel: u8,
        channels: u8,
        samplerate: u32,
        samples: u32,
    },
    #[serde(rename_all = "camelCase")]
    ChannelNew {
        channel: u8,
        segkind: u32,
        cookie: u32,
        output: bool,
    },
    #[serde(rename_all = "camelCase")]
    Shutdown { channel: u8, last_words: String },
    #[serde(rename_all = "camelCase")]
    ChannelClose { channel: u8, dest: Option<u32> },
    #[serde(rename_all = "camelCase")]
    BlobCompleted {
        channel: u8,
        stream_id: u64,
        kind: &'static str,
        inbound: bool,
        size: usize,
    },
    #[serde(rename_all = "camelCase")]
    BlobCancelled {
        channel: u8,
        stream_id: u64,
        kind: &'static str,
        inbound: bool,
    },
}

#[derive(Default)]
struct InboxState {
    records: Vec<Record>,
    /// 宛先ごとの最新の映像フレーム
    frames: BTreeMap<u32, Vec<u32>>,
    /// 宛先ごとの未読の音声サンプル
    audio: BTreeMap<u32, Vec<i16>>,
    /// 完了した受信ブロブ
    blobs: BTreeMap<u64, Vec<u8>>,
}

/// セッションからの受け取り口
///
/// クローンは同じ状態を共有する。
#[derive(Clone, Default)]
pub struct Inbox {
    state: Rc<RefCell<InboxState>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 溜まった記録を取り出す
    pub fn take_records(&self) -> Vec<Record> {
        std::mem::take(&mut self.state.borrow_mut().records)
    }

    pub fn take_frame(&self, dest: u32) -> Option<Vec<u32>> {
        self.state.borrow_mut().frames.remove(&dest)
    }

    pub fn take_audio(&self, dest: u32) -> Option<Vec<i16>> {
        self.state.borrow_mut().audio.remove(&dest)
    }

    pub fn take_blob(&self, stream_id: u64) -> Option<Vec<u8>> {
        self.state.borrow_mut().blobs.remove(&stream_id)
    }

    /// 受信ブロブをメモリに受け取り、終了を記録するハンドラー
    pub fn blob_handler(&self) -> impl BlobHandler + 'static {
        let inbox = self.clone();
        move |event: BlobEvent| inbox.on_blob(event)
    }

    fn on_blob(&self, event: BlobEvent) -> BlobResponse {
        let mut state = self.state.borrow_mut();
        match event {
            BlobEvent::Initialize(_) => {
                return BlobResponse::NewSink(Box::new(MemorySink::with_limit(MAX_INBOUND_BLOB)));
            }
            BlobEvent::Completed {
                meta,
                mut descriptor,
            } => {
                let inbound = meta.direction == BlobDirection::Inbound;
                let data = descriptor.take_bytes().unwrap_or_default();
                state.records.push(Record::BlobCompleted {
                    channel: meta.channel,
                    stream_id: meta.stream_id,
                    kind: kind_name(meta.kind),
                    inbound,
                    size: data.len(),
                });
                if inbound {
                    state.blobs.insert(meta.stream_id, data);
                }
            }
            BlobEvent::Cancelled { meta, .. } => {
                state.records.push(Record::BlobCancelled {
                    channel: meta.channel,
                    stream_id: meta.stream_id,
                    kind: kind_name(meta.kind),
                    inbound: meta.direction == BlobDirection::Inbound,
                });
            }
        }
        BlobResponse::DontWant
    }

    fn push(&self, record: Record) {
        self.state.borrow_mut().records.push(record);
    }
}

impl DisplaySink for Inbox {
    fn on_event(&mut self, dest: DestinationId, channel: u8, event: &Event) {
        self.push(Record::Event {
            dest: dest.0,
            channel,
            category: event.category as u8,
            kind: event.kind,
            ioevs: event.ioevs,
            message: String::from_utf8_lossy(event.message_bytes()).into_owned(),
        });
    }

    fn on_video(&mut self, dest: DestinationId, channel: u8, frame: DecodedVideo) {
        self.push(Record::Video {
            dest: dest.0,
            channel,
            width: frame.header.width,
            height: frame.header.height,
        });
        self.state.borrow_mut().frames.insert(dest.0, frame.pixels);
    }

    fn on_audio(&mut self, dest: DestinationId, channel: u8, frame: DecodedAudio) {
        self.push(Record::Audio {
            dest: dest.0,
            channel,
            channels: frame.header.channels,
            samplerate: frame.header.samplerate,
            samples: frame.header.samples,
        });
        self.state
            .borrow_mut()
            .audio
            .entry(dest.0)
            .or_default()
            .extend_from_slice(&frame.samples);
    }

    fn on_channel_new(&mut self, channel: u8, segkind: u32, cookie: u32, output: bool) {
        self.push(Record::ChannelNew {
            channel,
            segkind,
            cookie,
            output,
        });
    }

    fn on_channel_shutdown(&mut self, channel: u8, last_words: &str) {
        self.push(Record::Shutdown {
            channel,
            last_words: last_words.to_string(),
        });
    }

    fn on_channel_close(&mut self, channel: u8, dest: Option<DestinationId>) {
        self.push(Record::ChannelClose {
            channel,
            dest: dest.map(|d| d.0),
        });
    }
}

/// `getStats` の JSON
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsJson {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frames_in: [u64; FrameClass::COUNT],
    pub frames_out: [u64; FrameClass::COUNT],
    pub queued_bytes: usize,
    pub blob_bytes_in: u64,
    pub blob_bytes_out: u64,
    pub unbound_bytes: usize,
    pub active_channel: u8,
    pub dead: bool,
}

impl StatsJson {
    pub fn new(stats: &SessionStats, active_channel: u8, dead: bool) -> Self {
        StatsJson {
            bytes_in: stats.bytes_in,
            bytes_out: stats.bytes_out,
            frames_in: stats.frames_in,
            frames_out: stats.frames_out,
            queued_bytes: stats.queued_bytes,
            blob_bytes_in: stats.blob_bytes_in,
            blob_bytes_out: stats.blob_bytes_out,
            unbound_bytes: stats.unbound_bytes,
            active_channel,
            dead,
        }
    }
}

pub fn kind_name(kind: BlobKind) -> &'static str {
    match kind {
        BlobKind::State => "state",
        BlobKind::Font => "font",
        BlobKind::FontSuppl => "fontSuppl",
        BlobKind::Blob => "blob",
    }
}

/// JS から来た種別番号をブロブ種別にする
pub fn parse_blob_kind(kind: u8) -> Option<BlobKind> {
    BlobKind::try_from(kind as i32).ok()
}
