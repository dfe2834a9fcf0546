//! 受信側の転送

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use a12_proto::{BlobAnnounce, ProtoError};
use a12_transport::BlobChunk;

use crate::error::BlobError;
use crate::handler::{BlobDescriptor, BlobDirection, BlobEvent, BlobMeta, BlobSize};
use crate::source::BlobSink;

struct Inbound {
    meta: BlobMeta,
    sink: Box<dyn BlobSink>,
    received: u64,
}

impl Inbound {
    fn into_event(self, completed: bool) -> BlobEvent {
        let descriptor = BlobDescriptor::Sink(self.sink);
        if completed {
            BlobEvent::Completed {
                meta: self.meta,
                descriptor,
            }
        } else {
            BlobEvent::Cancelled {
                meta: self.meta,
                descriptor,
            }
        }
    }
}

/// チャンクを書き込んだ結果
#[derive(Debug)]
pub enum ChunkOutcome {
    /// 書き込んだ
    Written(usize),
    /// 該当する転送がない（キャンセル済みなど）。読み捨てる
    Unknown,
    /// 転送単位の失敗。転送は取り除かれている
    Failed(BlobError, BlobEvent),
}

/// チャンネルごとの受信中の転送
#[derive(Default)]
pub struct InboundTransfers {
    channels: BTreeMap<u8, Inbound>,
    bytes_received: u64,
}

/// Announce から受信側の属性を作る
pub fn meta_from_announce(channel: u8, announce: &BlobAnnounce) -> Result<BlobMeta, ProtoError> {
    let size = if announce.streaming {
        BlobSize::Streaming
    } else {
        BlobSize::Known(announce.known_size)
    };
    let checksum = <[u8; 16]>::try_from(announce.checksum.as_slice()).ok();
    Ok(BlobMeta {
        channel,
        stream_id: announce.stream_id,
        kind: announce.blob_kind()?,
        direction: BlobDirection::Inbound,
        size,
        checksum,
    })
}

impl InboundTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 受信を開始する。同じチャンネルに残っていた転送があれば返す
    pub fn insert(&mut self, meta: BlobMeta, sink: Box<dyn BlobSink>) -> Option<BlobEvent> {
        let channel = meta.channel;
        let old = self.channels.insert(
            channel,
            Inbound {
                meta,
                sink,
                received: 0,
            },
        );
        old.map(|t| t.into_event(false))
    }

    /// チャンクを書き込む
    pub fn write_chunk(&mut self, channel: u8, chunk: &BlobChunk) -> ChunkOutcome {
        let Some(transfer) = self
            .channels
            .get_mut(&channel)
            .filter(|t| t.meta.stream_id == chunk.stream_id)
        else {
            return ChunkOutcome::Unknown;
        };

        let result = if chunk.offset != transfer.received {
            Err(BlobError::OffsetMismatch {
                expected: transfer.received,
                got: chunk.offset,
            })
        } else {
            let end = transfer.received + chunk.data.len() as u64;
            match transfer.meta.size {
                BlobSize::Known(n) if end > n => Err(BlobError::SizeMismatch {
                    announced: n,
                    got: end,
                }),
                _ => transfer.sink.write(&chunk.data),
            }
        };

        match result {
            Ok(()) => {
                transfer.received += chunk.data.len() as u64;
                self.bytes_received += chunk.data.len() as u64;
                ChunkOutcome::Written(chunk.data.len())
            }
            Err(err) => match self.channels.remove(&channel) {
                Some(t) => ChunkOutcome::Failed(err, t.into_event(false)),
                None => ChunkOutcome::Unknown,
            },
        }
    }

    /// 送信側の Complete を処理する
    ///
    /// サイズが合えば `Completed`、合わなければ `Cancelled` を返す。
    /// 該当する転送がなければ None。
    pub fn finish(&mut self, channel: u8, stream_id: u64, total: u64) -> Option<BlobEvent> {
        let matches = self
            .channels
            .get(&channel)
            .is_some_and(|t| t.meta.stream_id == stream_id);
        if !matches {
            return None;
        }
        let transfer = self.channels.remove(&channel)?;
        let size_ok = match transfer.meta.size {
            BlobSize::Known(n) => n == transfer.received,
            BlobSize::Streaming => true,
        };
        let completed = size_ok && total == transfer.received;
        Some(transfer.into_event(completed))
    }

    /// 受信中の転送を中止する（`stream_id` が None なら ID を問わない）
    pub fn cancel(&mut self, channel: u8, stream_id: Option<u64>) -> Option<BlobEvent> {
        let matches = self
            .channels
            .get(&channel)
            .is_some_and(|t| stream_id.map_or(true, |id| t.meta.stream_id == id));
        if !matches {
            return None;
        }
        self.channels.remove(&channel).map(|t| t.into_event(false))
    }

    pub fn active_stream(&self, channel: u8) -> Option<u64> {
        self.channels.get(&channel).map(|t| t.meta.stream_id)
    }

    pub fn is_busy(&self) -> bool {
        !self.channels.is_empty()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}
