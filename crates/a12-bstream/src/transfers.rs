//! 送受信の転送とハンドラーをまとめる
//!
//! セッションはブロブ関連の制御コマンドとチャンクをここへ渡し、
//! 送出すべき制御コマンド・チャンクを受け取る。

use alloc::boxed::Box;
use alloc::vec::Vec;

use a12_proto::{BlobAccept, BlobAnnounce, BlobCancel, Command};
use a12_transport::BlobChunk;

use crate::handler::{BlobEvent, BlobHandler, BlobResponse, DiscardHandler};
use crate::inbound::{meta_from_announce, ChunkOutcome, InboundTransfers};
use crate::outbound::{BlobFrame, BlobLimits, BlobRequest, ChunkPolicy, OutboundScheduler};

/// バイナリ転送の管理
pub struct BlobTransfers {
    outbound: OutboundScheduler,
    inbound: InboundTransfers,
    handler: Box<dyn BlobHandler>,
    /// 制御キューに積むコマンド（Announce / Accept / Cancel）
    control: Vec<(u8, Command)>,
    trace: bool,
}

impl BlobTransfers {
    pub fn new(limits: BlobLimits) -> Self {
        BlobTransfers {
            outbound: OutboundScheduler::new(limits),
            inbound: InboundTransfers::new(),
            handler: Box::new(DiscardHandler),
            control: Vec::new(),
            trace: false,
        }
    }

    pub fn set_handler(&mut self, handler: Box<dyn BlobHandler>) {
        self.handler = handler;
    }

    /// BTRANSFER グループのトレースを出すか
    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    /// 送信を登録する。チャンネルが空いていればすぐに Announce を出す
    pub fn enqueue(&mut self, channel: u8, request: BlobRequest) -> u64 {
        let stream_id = self.outbound.enqueue(channel, request);
        if self.trace {
            tracing::debug!(channel, stream_id, "blob enqueued");
        }
        self.announce_next(channel);
        stream_id
    }

    /// ブロブ関連の制御コマンドを処理する。関係ないコマンドなら false
    pub fn handle_command(&mut self, channel: u8, command: &Command) -> bool {
        match command {
            Command::BlobAnnounce(announce) => self.on_announce(channel, announce),
            Command::BlobAccept(accept) => {
                let known = self.outbound.accept(channel, accept.stream_id);
                if self.trace {
                    tracing::debug!(channel, stream_id = accept.stream_id, known, "blob accepted");
                }
            }
            Command::BlobComplete(complete) => {
                if let Some(event) = self.inbound.finish(channel, complete.stream_id, complete.total) {
                    if matches!(event, BlobEvent::Cancelled { .. }) {
                        tracing::debug!(channel, stream_id = complete.stream_id, "blob size mismatch");
                    }
                    self.notify(event);
                }
            }
            Command::BlobCancel(cancel) => self.on_remote_cancel(channel, cancel),
            _ => return false,
        }
        true
    }

    /// 受信したチャンクを書き込む
    pub fn on_chunk(&mut self, channel: u8, chunk: &BlobChunk) {
        match self.inbound.write_chunk(channel, chunk) {
            ChunkOutcome::Written(_) => {}
            ChunkOutcome::Unknown => {
                if self.trace {
                    tracing::trace!(channel, stream_id = chunk.stream_id, "chunk for unknown stream");
                }
            }
            ChunkOutcome::Failed(err, event) => {
                tracing::debug!(channel, stream_id = chunk.stream_id, error = %err, "inbound blob failed");
                self.push_cancel(channel, event.meta().stream_id, false);
                self.notify(event);
            }
        }
    }

    /// 今回の flush で送るチャンク（と順序を保つべき制御）
    pub fn next_frames(&mut self, policy: ChunkPolicy) -> Vec<BlobFrame> {
        let mut frames = Vec::new();
        let mut finished = Vec::new();
        self.outbound.next_frames(policy, &mut frames, &mut finished);
        for event in finished {
            self.notify(event);
        }
        frames
    }

    /// チャンネル上の進行中の転送（送信・受信とも）を中止する
    ///
    /// 戻り値は中止した転送の数。
    pub fn cancel(&mut self, channel: u8) -> usize {
        let mut cancelled = 0;
        if let Some(event) = self.outbound.take_active(channel, None) {
            self.push_cancel(channel, event.meta().stream_id, true);
            self.notify(event);
            cancelled += 1;
        }
        if let Some(event) = self.inbound.cancel(channel, None) {
            self.push_cancel(channel, event.meta().stream_id, false);
            self.notify(event);
            cancelled += 1;
        }
        if cancelled > 0 {
            self.announce_next(channel);
        }
        cancelled
    }

    /// チャンネルが閉じられた。待ち分も含めて破棄する（相手には通知しない）
    pub fn close_channel(&mut self, channel: u8) {
        for event in self.outbound.drain_channel(channel) {
            self.notify(event);
        }
        if let Some(event) = self.inbound.cancel(channel, None) {
            self.notify(event);
        }
        self.control.retain(|(ch, _)| *ch != channel);
    }

    /// 制御キューへ移すコマンドを取り出す
    pub fn take_control(&mut self) -> Vec<(u8, Command)> {
        core::mem::take(&mut self.control)
    }

    pub fn has_control(&self) -> bool {
        !self.control.is_empty()
    }

    /// 次の flush で送るチャンクがある
    pub fn wants_send(&self) -> bool {
        self.outbound.wants_send()
    }

    /// 進行中または待ちの転送がある
    pub fn is_busy(&self) -> bool {
        self.outbound.is_busy() || self.inbound.is_busy()
    }

    fn on_announce(&mut self, channel: u8, announce: &BlobAnnounce) {
        let meta = match meta_from_announce(channel, announce) {
            Ok(meta) => meta,
            Err(err) => {
                tracing::debug!(channel, error = %err, "malformed blob announce");
                self.push_cancel(channel, announce.stream_id, false);
                return;
            }
        };

        // 前の転送が残っていたら打ち切る
        if let Some(stale) = self.inbound.cancel(channel, None) {
            self.notify(stale);
        }

        match self.handler.on_event(BlobEvent::Initialize(meta.clone())) {
            BlobResponse::NewSink(sink) => {
                if self.trace {
                    tracing::debug!(channel, stream_id = meta.stream_id, kind = ?meta.kind, "blob accepted locally");
                }
                self.control.push((
                    channel,
                    Command::BlobAccept(BlobAccept {
                        stream_id: meta.stream_id,
                    }),
                ));
                self.inbound.insert(meta, sink);
            }
            response => {
                if self.trace {
                    tracing::debug!(channel, stream_id = meta.stream_id, ?response, "blob declined");
                }
                self.push_cancel(channel, meta.stream_id, false);
                self.notify(BlobEvent::Cancelled {
                    meta,
                    descriptor: crate::handler::BlobDescriptor::None,
                });
            }
        }
    }

    fn on_remote_cancel(&mut self, channel: u8, cancel: &BlobCancel) {
        // 送り手が送信側なら自分の受信を、受信側なら自分の送信を止める
        let event = if cancel.from_sender {
            self.inbound.cancel(channel, Some(cancel.stream_id))
        } else {
            self.outbound.take_active(channel, Some(cancel.stream_id))
        };
        if let Some(event) = event {
            if self.trace {
                tracing::debug!(channel, stream_id = cancel.stream_id, "blob cancelled by peer");
            }
            self.notify(event);
            if !cancel.from_sender {
                self.announce_next(channel);
            }
        }
    }

    fn announce_next(&mut self, channel: u8) {
        if let Some(announce) = self.outbound.start_next(channel) {
            self.control.push((channel, Command::BlobAnnounce(announce)));
        }
    }

    fn push_cancel(&mut self, channel: u8, stream_id: u64, from_sender: bool) {
        self.control.push((
            channel,
            Command::BlobCancel(BlobCancel {
                stream_id,
                from_sender,
            }),
        ));
    }

    /// ハンドラーに終了を通知する（戻り値は使わない）
    fn notify(&mut self, event: BlobEvent) {
        let _ = self.handler.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BlobSize;
    use crate::source::{MemorySink, MemorySource};
    use a12_proto::{BlobComplete, BlobKind};
    use alloc::rc::Rc;
    use core::cell::RefCell;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn logging_handler(log: Log, accept: bool) -> Box<dyn BlobHandler> {
        Box::new(move |event: BlobEvent| {
            let tag = match &event {
                BlobEvent::Initialize(_) => "init",
                BlobEvent::Completed { .. } => "completed",
                BlobEvent::Cancelled { .. } => "cancelled",
            };
            log.borrow_mut().push(tag);
            if accept {
                BlobResponse::NewSink(Box::new(MemorySink::new()))
            } else {
                BlobResponse::Cached
            }
        })
    }

    fn announce(stream_id: u64, size: u64) -> Command {
        Command::BlobAnnounce(BlobAnnounce {
            stream_id,
            kind: BlobKind::Blob as i32,
            streaming: false,
            known_size: size,
            checksum: Vec::new(),
        })
    }

    #[test]
    fn test_inbound_accept_then_complete() {
        let log: Log = Rc::default();
        let mut transfers = BlobTransfers::new(BlobLimits::default());
        transfers.set_handler(logging_handler(log.clone(), true));

        assert!(transfers.handle_command(2, &announce(1, 3)));
        let control = transfers.take_control();
        assert!(matches!(control[..], [(2, Command::BlobAccept(BlobAccept { stream_id: 1 }))]));

        transfers.on_chunk(
            2,
            &BlobChunk {
                stream_id: 1,
                offset: 0,
                data: alloc::vec![1, 2, 3],
            },
        );
        transfers.handle_command(2, &Command::BlobComplete(BlobComplete { stream_id: 1, total: 3 }));

        assert_eq!(*log.borrow(), alloc::vec!["init", "completed"]);
        assert!(!transfers.is_busy());
    }

    #[test]
    fn test_inbound_cached_cancels_immediately() {
        let log: Log = Rc::default();
        let mut transfers = BlobTransfers::new(BlobLimits::default());
        transfers.set_handler(logging_handler(log.clone(), false));

        transfers.handle_command(1, &announce(9, 100));

        assert_eq!(*log.borrow(), alloc::vec!["init", "cancelled"]);
        let control = transfers.take_control();
        assert!(matches!(
            control[..],
            [(1, Command::BlobCancel(BlobCancel { stream_id: 9, from_sender: false }))]
        ));
    }

    #[test]
    fn test_local_cancel_invokes_handler_once() {
        let log: Log = Rc::default();
        let mut transfers = BlobTransfers::new(BlobLimits::default());
        transfers.set_handler(logging_handler(log.clone(), true));

        let first = transfers.enqueue(
            3,
            BlobRequest::new(BlobKind::Blob, Box::new(MemorySource::new(alloc::vec![0; 8]))),
        );
        let second = transfers.enqueue(
            3,
            BlobRequest::new(BlobKind::Blob, Box::new(MemorySource::new(alloc::vec![0; 8]))),
        );
        transfers.take_control();

        assert_eq!(transfers.cancel(3), 1);
        assert_eq!(*log.borrow(), alloc::vec!["cancelled"]);

        let control = transfers.take_control();
        assert!(matches!(
            &control[..],
            [
                (3, Command::BlobCancel(BlobCancel { stream_id: c, from_sender: true })),
                (3, Command::BlobAnnounce(BlobAnnounce { stream_id: a, .. })),
            ] if *c == first && *a == second
        ));
    }

    #[test]
    fn test_remote_cancel_of_outbound() {
        let log: Log = Rc::default();
        let mut transfers = BlobTransfers::new(BlobLimits::default());
        transfers.set_handler(logging_handler(log.clone(), true));

        let id = transfers.enqueue(
            1,
            BlobRequest {
                kind: BlobKind::State,
                size: BlobSize::Streaming,
                checksum: None,
                source: Box::new(MemorySource::new(alloc::vec![0; 4])),
            },
        );
        transfers.handle_command(
            1,
            &Command::BlobCancel(BlobCancel {
                stream_id: id,
                from_sender: false,
            }),
        );
        assert_eq!(*log.borrow(), alloc::vec!["cancelled"]);
        assert!(!transfers.is_busy());
    }

    #[test]
    fn test_non_blob_command_not_handled() {
        let mut transfers = BlobTransfers::new(BlobLimits::default());
        let close = Command::Close(a12_proto::Close {});
        assert!(!transfers.handle_command(0, &close));
    }
}
