//! A12 セッション
//!
//! 1 本の物理接続につき 1 つ。受信バイトは `unpack` で、送信バイトは
//! `flush` で受け渡す。ソケットは持たず、タイマーもない。
//!
//! ```text
//! Handshake ──(鍵交換完了)──> Ready ──(Close / 違反)──> Dead
//!     │
//!     └──(相手の鍵を拒否)──> Untrusted ──(猶予バイト超過)──> Dead
//! ```

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::vec::Vec;

use a12_bstream::{BlobHandler, BlobRequest, BlobTransfers, ChunkPolicy};
use a12_crypto::{CryptoSession, PublicKey, Role, TAG_LEN};
use a12_proto::{
    encode_message, AudioHeader, AudioMethod, ChannelNew, Close, Command, Control, Event, Shutdown,
    VideoHeader, AUDIO_HEADER_SIZE, VIDEO_HEADER_SIZE,
};
use a12_transport::{BlobChunk, Fragment, Fragmenter, Frame, FrameClass, FrameDecoder};

use crate::channel::{Channel, ChannelTable};
use crate::codec::{AudioFrame, MediaCodec, RawCodec, VideoFrame, VideoOptions};
use crate::diag::{a12_trace, Diagnostics, TraceGroups};
use crate::error::SessionError;
use crate::handshake::{Handshake, HandshakeProgress};
use crate::options::{ContextOptions, SessionLimits};
use crate::output::{EnqueueStatus, Lane, OutputQueue, SessionStats};
use crate::sink::{DecodedAudio, DecodedVideo, DestinationId, DisplaySink};

/// `flush` でブロブのチャンクをどこまで含めるか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMode {
    /// チャンクを送らない
    NoBlob,
    /// 現在のチャンネルのチャンクだけ送る
    ChannelOnly,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshake,
    Ready,
    /// 拒否した相手から読み捨てる残りバイト数
    Untrusted { remaining: usize },
    Dead,
}

/// A12 セッション
pub struct Session {
    role: Role,
    phase: Phase,
    crypto: CryptoSession,
    decoder: FrameDecoder,
    handshake: Handshake,
    channels: ChannelTable,
    /// 送信操作の対象チャンネル
    active: u8,
    output: OutputQueue,
    transfers: BlobTransfers,
    fragmenter: Fragmenter,
    codec: Box<dyn MediaCodec>,
    diag: Diagnostics,
    limits: SessionLimits,
    bytes_in: u64,
    frames_in: [u64; FrameClass::COUNT],
    blob_bytes_in: u64,
}

impl Session {
    /// 接続側のセッションを作り、最初のハンドシェイクフレームを送信バッファに積む
    pub fn open(options: ContextOptions) -> Result<Self, SessionError> {
        Self::new(Role::Initiator, options)
    }

    /// 受け入れ側のセッションを作る
    pub fn build(options: ContextOptions) -> Result<Self, SessionError> {
        Self::new(Role::Responder, options)
    }

    fn new(role: Role, options: ContextOptions) -> Result<Self, SessionError> {
        options.validate()?;
        let ContextOptions {
            authk,
            pk_lookup,
            disable_ephemeral_k,
            disable_authenticity,
            local_key,
            diagnostics,
            limits,
        } = options;

        let (crypto, decoder) = if disable_authenticity {
            (
                CryptoSession::plaintext(),
                FrameDecoder::without_handshake(limits.max_frame_payload),
            )
        } else {
            (
                CryptoSession::new(&authk.preauth_keys(role)?),
                FrameDecoder::with_limit(limits.max_frame_payload + TAG_LEN),
            )
        };

        let mut transfers = BlobTransfers::new(limits.blob);
        transfers.set_trace(diagnostics.enabled(TraceGroups::BTRANSFER));

        let mut session = Session {
            role,
            phase: if disable_authenticity {
                Phase::Ready
            } else {
                Phase::Handshake
            },
            crypto,
            decoder,
            handshake: Handshake::new(role, authk, !disable_ephemeral_k, pk_lookup, local_key),
            channels: ChannelTable::new(limits.unbound_limit, limits.max_media_frame),
            active: 0,
            output: OutputQueue::new(),
            transfers,
            fragmenter: Fragmenter::new(limits.max_frame_payload),
            codec: Box::new(RawCodec),
            diag: diagnostics,
            limits,
            bytes_in: 0,
            frames_in: [0; FrameClass::COUNT],
            blob_bytes_in: 0,
        };

        if !disable_authenticity {
            session.handshake.begin(&mut session.crypto, &mut session.output)?;
        }
        a12_trace!(session.diag, CRYPTO, ?role, plaintext = disable_authenticity, "session created");
        Ok(session)
    }

    /// セッションを破棄する
    ///
    /// 進行中のバイナリ転送があれば拒否し、セッションをそのまま返す。
    pub fn free(self) -> Result<(), Self> {
        if self.transfers.is_busy() {
            return Err(self);
        }
        Ok(())
    }

    /// 受信バイトを処理し、デコードしたものを `sink` に渡す
    ///
    /// 宛先待ちで溜めていたフレームのうち、宛先が決まったものを先に再生する。
    ///
    /// # エラー
    /// 致命的なエラーを返した時点でセッションは Dead になっている。
    pub fn unpack(&mut self, bytes: &[u8], sink: &mut dyn DisplaySink) -> Result<(), SessionError> {
        self.bytes_in += bytes.len() as u64;
        match self.phase {
            Phase::Dead => return Err(SessionError::Dead),
            Phase::Untrusted { remaining } => return self.consume_untrusted(remaining, bytes.len()),
            Phase::Handshake | Phase::Ready => {}
        }

        self.replay(sink)?;
        self.decoder.feed(bytes);

        while matches!(self.phase, Phase::Handshake | Phase::Ready) {
            let frame = match self.decoder.poll_frame(self.crypto.recv()) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => return Err(self.fail(err.into())),
            };
            self.frames_in[frame.class.index()] += 1;

            if let Err(err) = self.dispatch(frame, sink) {
                if err.is_fatal() {
                    return Err(self.fail(err));
                }
                a12_trace!(self.diag, DEBUG, error = %err, "frame dropped");
            }
            self.pull_transfer_control();
        }
        Ok(())
    }

    /// 状態を問い合わせる
    ///
    /// # 戻り値
    /// - `-1`: Dead
    /// - `0`: 待機中
    /// - `1`: すぐに処理できるデータがある（`unpack` を空で呼べば進む）
    pub fn poll(&self) -> i32 {
        match self.phase {
            Phase::Dead => -1,
            Phase::Untrusted { .. } => 0,
            _ if self.channels.has_ready() || self.decoder.has_frame() => 1,
            _ => 0,
        }
    }

    /// 送信バイトを取り出す
    ///
    /// 前回返した分は捨て、積まれているフレームを優先度順に封緘してから返す。
    /// 返したスライスは次の変更操作まで有効。Dead でも残りのバイトは返す。
    pub fn flush(&mut self, mode: BlobMode) -> &[u8] {
        self.output.begin_flush();
        if self.phase == Phase::Ready {
            if let Err(err) = self.seal_pending(mode) {
                self.fail(err);
            }
        }
        self.output.hand_out()
    }

    /// 次の `flush` で送るものがある
    pub fn wants_flush(&self) -> bool {
        self.output.has_unsent()
            || (self.phase == Phase::Ready
                && (self.output.has_queued() || self.transfers.has_control() || self.transfers.wants_send()))
    }

    /// チャンネルに宛先を結びつける
    pub fn set_destination(&mut self, channel: u8, dest: DestinationId) -> Result<(), SessionError> {
        self.ensure_alive()?;
        self.channels.set_destination(channel, dest)?;
        a12_trace!(self.diag, SYSTEM, channel, dest = dest.0, "destination bound");
        Ok(())
    }

    /// 宛先を外す。表示面を解放する前に呼ぶ
    pub fn detach_destination(&mut self, channel: u8) -> Option<DestinationId> {
        self.channels.detach_destination(channel)
    }

    /// 送信操作の対象チャンネルを切り替える
    pub fn set_channel(&mut self, channel: u8) -> Result<(), SessionError> {
        self.ensure_alive()?;
        if !self.channels.contains(channel) {
            return Err(SessionError::NoSuchChannel(channel));
        }
        self.active = channel;
        Ok(())
    }

    pub fn active_channel(&self) -> u8 {
        self.active
    }

    /// 開いているチャンネルの ID
    pub fn channel_ids(&self) -> Vec<u8> {
        self.channels.ids()
    }

    pub fn channel(&self, channel: u8) -> Option<&Channel> {
        self.channels.get(channel)
    }

    /// 新しいチャンネルを開き、相手に通知する
    pub fn channel_new(&mut self, channel: u8, segkind: u32, cookie: u32, output: bool) -> Result<(), SessionError> {
        self.ensure_alive()?;
        self.channels.insert(channel, segkind, cookie, output)?;
        self.output.push_command(
            channel,
            Command::ChannelNew(ChannelNew {
                segkind,
                cookie,
                output,
            }),
        );
        a12_trace!(self.diag, SYSTEM, channel, segkind, cookie, output, "channel opened");
        Ok(())
    }

    /// 現在のチャンネルにイベントを積む
    ///
    /// 送信待ちが上限を超えている間は積まずに `Congested` を返す。
    pub fn channel_enqueue(&mut self, event: &Event) -> Result<EnqueueStatus, SessionError> {
        self.ensure_alive()?;
        if self.output.queued_bytes() > self.limits.high_water {
            a12_trace!(self.diag, EVENT, queued = self.output.queued_bytes(), "congested");
            return Ok(EnqueueStatus::Congested);
        }
        self.output.push(Lane::Event, self.active, event.encode().to_vec());
        a12_trace!(self.diag, EVENT, channel = self.active, category = ?event.category, kind = event.kind, "event queued");
        Ok(EnqueueStatus::Queued)
    }

    /// 映像フレームをエンコードして積む
    ///
    /// コーデックのエラーはそのフレームだけの失敗で、セッションは生きている。
    pub fn channel_vframe(&mut self, frame: &VideoFrame<'_>, opts: &VideoOptions) -> Result<(), SessionError> {
        self.ensure_alive()?;
        let payload = self.codec.encode_video(opts, frame)?;
        let header = VideoHeader {
            method: opts.method,
            bias: opts.bias,
            width: frame.width,
            height: frame.height,
        };

        let mut body = Vec::with_capacity(VIDEO_HEADER_SIZE + payload.len());
        body.extend_from_slice(&header.encode());
        body.extend_from_slice(&payload);
        self.queue_media(Lane::Video, &body)?;

        a12_trace!(self.diag, VIDEO, channel = self.active, method = ?opts.method, bytes = body.len(), "video frame queued");
        a12_trace!(self.diag, VDETAIL, width = frame.width, height = frame.height, bias = ?opts.bias, rate = ?opts.rate);
        Ok(())
    }

    /// 音声フレームをエンコードして積む
    pub fn channel_aframe(&mut self, frame: &AudioFrame<'_>) -> Result<(), SessionError> {
        self.ensure_alive()?;
        let payload = self.codec.encode_audio(AudioMethod::Raw, frame)?;
        let header = AudioHeader {
            method: AudioMethod::Raw,
            channels: frame.channels,
            samplerate: frame.samplerate,
            samples: frame.samples.len() as u32,
        };

        let mut body = Vec::with_capacity(AUDIO_HEADER_SIZE + payload.len());
        body.extend_from_slice(&header.encode());
        body.extend_from_slice(&payload);
        self.queue_media(Lane::Audio, &body)?;

        a12_trace!(self.diag, AUDIO, channel = self.active, samples = header.samples, "audio frame queued");
        Ok(())
    }

    /// 現在のチャンネルに終了予告を送る
    pub fn channel_shutdown(&mut self, last_words: &str) -> Result<(), SessionError> {
        self.ensure_alive()?;
        self.output.push_command(
            self.active,
            Command::Shutdown(Shutdown {
                last_words: last_words.to_string(),
            }),
        );
        Ok(())
    }

    /// 現在のチャンネルを閉じる
    ///
    /// チャンネル 0 ならセッション全体を閉じる。そのチャンネルに積まれていた
    /// フレームと Close はすぐに封緘され、次の `flush` で返る。
    pub fn channel_close(&mut self) -> Result<(), SessionError> {
        self.ensure_alive()?;
        let channel = self.active;

        if channel == 0 {
            if self.phase == Phase::Ready {
                if let Err(err) = self.seal_close() {
                    return Err(self.fail(err));
                }
            }
            a12_trace!(self.diag, SYSTEM, "session closed locally");
            self.channels.clear();
            self.kill();
            return Ok(());
        }

        self.transfers.close_channel(channel);
        if self.phase == Phase::Ready {
            if let Err(err) = self.seal_channel_close(channel) {
                return Err(self.fail(err));
            }
        } else {
            self.output.push_command(channel, Command::Close(Close {}));
        }
        self.channels.remove(channel);
        self.active = 0;
        a12_trace!(self.diag, SYSTEM, channel, "channel closed");
        Ok(())
    }

    /// 現在のチャンネルにバイナリ転送を登録する
    ///
    /// ソースの所有権は転送に移り、終了時にハンドラーへ返される。
    pub fn enqueue_bstream(&mut self, request: BlobRequest) -> Result<u64, SessionError> {
        self.ensure_alive()?;
        let stream_id = self.transfers.enqueue(self.active, request);
        self.pull_transfer_control();
        a12_trace!(self.diag, TRANSFER, channel = self.active, stream_id, "bstream enqueued");
        Ok(stream_id)
    }

    /// チャンネル上の進行中の転送を中止し、相手に通知する
    ///
    /// 戻り値は中止した転送の数。
    pub fn stream_cancel(&mut self, channel: u8) -> Result<usize, SessionError> {
        self.ensure_alive()?;
        let cancelled = self.transfers.cancel(channel);
        self.pull_transfer_control();
        a12_trace!(self.diag, TRANSFER, channel, cancelled, "bstream cancelled");
        Ok(cancelled)
    }

    /// バイナリ転送のハンドラーを設定する
    pub fn set_bhandler(&mut self, handler: impl BlobHandler + 'static) {
        self.transfers.set_handler(Box::new(handler));
    }

    /// 映像/音声コーデックを差し替える
    pub fn set_codec(&mut self, codec: impl MediaCodec + 'static) {
        self.codec = Box::new(codec);
    }

    pub fn set_trace_mask(&mut self, mask: TraceGroups) {
        self.diag.set_mask(mask);
        self.transfers.set_trace(mask.contains(TraceGroups::BTRANSFER));
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diag
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            bytes_in: self.bytes_in,
            frames_in: self.frames_in,
            blob_bytes_in: self.blob_bytes_in,
            unbound_bytes: self.channels.deferred_bytes(),
            ..SessionStats::default()
        };
        self.output.fill_stats(&mut stats);
        stats
    }

    /// 相手の identity 公開鍵（ハンドシェイク完了後）
    pub fn peer_public_key(&self) -> Option<PublicKey> {
        self.handshake.peer_key().copied()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// ハンドシェイクが完了し、通常フレームを送受信できる
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn is_dead(&self) -> bool {
        self.phase == Phase::Dead
    }

    fn ensure_alive(&self) -> Result<(), SessionError> {
        if self.is_dead() {
            return Err(SessionError::Dead);
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: Frame, sink: &mut dyn DisplaySink) -> Result<(), SessionError> {
        let Frame { class, channel, body } = frame;
        match class {
            FrameClass::Handshake => self.on_handshake(&body),
            FrameClass::Control => self.on_control(channel, &body, sink),
            FrameClass::Event | FrameClass::Audio | FrameClass::Video => {
                if !self.check_channel(channel, class)? {
                    return Ok(());
                }
                match self.channels.deliverable(channel) {
                    Some(dest) => self.deliver(dest, channel, class, body, sink),
                    None => {
                        a12_trace!(self.diag, MISSING, channel, ?class, "no destination, buffering");
                        self.channels.defer(channel, class, body)?;
                        a12_trace!(self.diag, ALLOC, channel, unbound = self.channels.deferred_bytes(), "unbound buffer grew");
                        Ok(())
                    }
                }
            }
            FrameClass::Blob => {
                if !self.check_channel(channel, class)? {
                    return Ok(());
                }
                let chunk = BlobChunk::from_bytes(&body)?;
                self.blob_bytes_in += chunk.data.len() as u64;
                self.transfers.on_chunk(channel, &chunk);
                Ok(())
            }
        }
    }

    /// 開いているチャンネルなら true
    ///
    /// 閉じたチャンネルへのフレームは読み捨てる。一度も開いていなければ違反。
    fn check_channel(&self, channel: u8, class: FrameClass) -> Result<bool, SessionError> {
        if self.channels.contains(channel) {
            return Ok(true);
        }
        if self.channels.was_closed(channel) {
            a12_trace!(self.diag, MISSING, channel, ?class, "frame for closed channel dropped");
            return Ok(false);
        }
        Err(SessionError::Protocol("frame for unknown channel"))
    }

    fn on_handshake(&mut self, body: &[u8]) -> Result<(), SessionError> {
        match self.handshake.on_frame(body, &mut self.crypto, &mut self.output)? {
            HandshakeProgress::Pending => {}
            HandshakeProgress::Complete => {
                debug_assert!(self.handshake.is_complete());
                self.decoder.complete_handshake();
                self.phase = Phase::Ready;
                a12_trace!(self.diag, CRYPTO, role = ?self.role, "handshake complete");
            }
            HandshakeProgress::Untrusted(budget) => {
                // 以後のフレームは開封しない
                let remaining = budget.saturating_sub(self.decoder.buffered());
                self.decoder.kill();
                self.phase = Phase::Untrusted { remaining };
                a12_trace!(self.diag, CRYPTO, budget, "peer key rejected");
                if remaining == 0 {
                    return Err(SessionError::Handshake("peer key rejected"));
                }
            }
        }
        Ok(())
    }

    fn on_control(&mut self, channel: u8, body: &[u8], sink: &mut dyn DisplaySink) -> Result<(), SessionError> {
        let command = Control::decode_command(body)?;
        if self.transfers.handle_command(channel, &command) {
            return Ok(());
        }

        match command {
            Command::ChannelNew(ChannelNew {
                segkind,
                cookie,
                output,
            }) => {
                if channel == 0 {
                    return Err(SessionError::Protocol("channel 0 cannot be reopened"));
                }
                self.channels.upsert(channel, segkind, cookie, output);
                a12_trace!(self.diag, SYSTEM, channel, segkind, cookie, "channel opened by peer");
                sink.on_channel_new(channel, segkind, cookie, output);
            }
            Command::Shutdown(Shutdown { last_words }) => {
                if self.channels.contains(channel) {
                    sink.on_channel_shutdown(channel, &last_words);
                } else {
                    a12_trace!(self.diag, MISSING, channel, "shutdown for unknown channel");
                }
            }
            Command::Close(_) => self.on_close(channel, sink),
            Command::BlobAnnounce(_)
            | Command::BlobAccept(_)
            | Command::BlobComplete(_)
            | Command::BlobCancel(_) => {}
        }
        Ok(())
    }

    fn on_close(&mut self, channel: u8, sink: &mut dyn DisplaySink) {
        if channel == 0 {
            a12_trace!(self.diag, SYSTEM, "session closed by peer");
            for closed in self.channels.clear().into_iter().rev() {
                sink.on_channel_close(closed.id, closed.destination);
            }
            self.kill();
            return;
        }

        match self.channels.remove(channel) {
            Some(closed) => {
                self.transfers.close_channel(channel);
                if self.active == channel {
                    self.active = 0;
                }
                a12_trace!(self.diag, SYSTEM, channel, "channel closed by peer");
                sink.on_channel_close(channel, closed.destination);
            }
            None => a12_trace!(self.diag, MISSING, channel, "close for unknown channel"),
        }
    }

    fn deliver(
        &mut self,
        dest: DestinationId,
        channel: u8,
        class: FrameClass,
        body: Vec<u8>,
        sink: &mut dyn DisplaySink,
    ) -> Result<(), SessionError> {
        match class {
            FrameClass::Event => {
                let event = Event::decode(&body)?;
                a12_trace!(self.diag, EVENT, channel, category = ?event.category, kind = event.kind, "event");
                sink.on_event(dest, channel, &event);
            }
            FrameClass::Video | FrameClass::Audio => {
                let fragment = Fragment::from_bytes(&body)?;
                let Some(ch) = self.channels.get_mut(channel) else {
                    return Ok(());
                };
                let assembly = if class == FrameClass::Video {
                    &mut ch.video
                } else {
                    &mut ch.audio
                };
                let Some(frame) = assembly.add_fragment(fragment)? else {
                    return Ok(());
                };

                if class == FrameClass::Video {
                    match self.decode_video(&frame) {
                        Ok(video) => {
                            a12_trace!(self.diag, VIDEO, channel, width = video.header.width, height = video.header.height, "video frame");
                            sink.on_video(dest, channel, video);
                        }
                        Err(err) => a12_trace!(self.diag, VIDEO, channel, error = %err, "video frame dropped"),
                    }
                } else {
                    match self.decode_audio(&frame) {
                        Ok(audio) => {
                            a12_trace!(self.diag, AUDIO, channel, samples = audio.header.samples, "audio frame");
                            sink.on_audio(dest, channel, audio);
                        }
                        Err(err) => a12_trace!(self.diag, AUDIO, channel, error = %err, "audio frame dropped"),
                    }
                }
            }
            FrameClass::Handshake | FrameClass::Control | FrameClass::Blob => {}
        }
        Ok(())
    }

    fn decode_video(&mut self, frame: &[u8]) -> Result<DecodedVideo, SessionError> {
        let (header, payload) = VideoHeader::decode(frame)?;
        let pixels = self.codec.decode_video(&header, payload)?;
        Ok(DecodedVideo { header, pixels })
    }

    fn decode_audio(&mut self, frame: &[u8]) -> Result<DecodedAudio, SessionError> {
        let (header, payload) = AudioHeader::decode(frame)?;
        let samples = self.codec.decode_audio(&header, payload)?;
        Ok(DecodedAudio { header, samples })
    }

    /// 宛先が決まったチャンネルの溜まったフレームを配送する
    fn replay(&mut self, sink: &mut dyn DisplaySink) -> Result<(), SessionError> {
        for (dest, deferred) in self.channels.take_ready() {
            a12_trace!(self.diag, MISSING, channel = deferred.channel, class = ?deferred.class, "replaying buffered frame");
            if let Err(err) = self.deliver(dest, deferred.channel, deferred.class, deferred.body, sink) {
                return Err(self.fail(err));
            }
        }
        Ok(())
    }

    fn queue_media(&mut self, lane: Lane, body: &[u8]) -> Result<(), SessionError> {
        for fragment in self.fragmenter.make_fragments(body)? {
            self.output.push(lane, self.active, fragment.to_bytes());
        }
        a12_trace!(self.diag, ALLOC, ?lane, queued = self.output.queued_bytes(), "send queue grew");
        Ok(())
    }

    fn seal_pending(&mut self, mode: BlobMode) -> Result<(), SessionError> {
        self.pull_transfer_control();
        let media_pending = self.output.media_pending();
        self.output.seal_queued(self.crypto.send())?;

        if mode != BlobMode::NoBlob {
            let policy = ChunkPolicy {
                media_pending,
                only_channel: (mode == BlobMode::ChannelOnly).then_some(self.active),
            };
            let frames = self.transfers.next_frames(policy);
            if !frames.is_empty() {
                a12_trace!(self.diag, BTRANSFER, frames = frames.len(), media_pending, "blob frames");
            }
            self.output.seal_blob(self.crypto.send(), frames)?;
        }
        Ok(())
    }

    fn seal_close(&mut self) -> Result<(), SessionError> {
        self.pull_transfer_control();
        self.output.seal_queued(self.crypto.send())?;
        let body = encode_message(&Control::new(Command::Close(Close {})));
        self.output
            .push_sealed(self.crypto.send(), FrameClass::Control, 0, &body)?;
        Ok(())
    }

    /// チャンネルに積まれていたフレームを封緘し、その後ろに Close を置く
    fn seal_channel_close(&mut self, channel: u8) -> Result<(), SessionError> {
        self.output.seal_channel(self.crypto.send(), channel)?;
        let body = encode_message(&Control::new(Command::Close(Close {})));
        self.output
            .push_sealed(self.crypto.send(), FrameClass::Control, channel, &body)?;
        Ok(())
    }

    /// 転送が出した制御コマンドを制御キューへ移す
    fn pull_transfer_control(&mut self) {
        for (channel, command) in self.transfers.take_control() {
            self.output.push_command(channel, command);
        }
    }

    fn consume_untrusted(&mut self, remaining: usize, len: usize) -> Result<(), SessionError> {
        if len >= remaining {
            return Err(self.fail(SessionError::Handshake("peer key rejected")));
        }
        self.phase = Phase::Untrusted {
            remaining: remaining - len,
        };
        Ok(())
    }

    /// セッションを Dead にしてエラーを返す
    fn fail(&mut self, err: SessionError) -> SessionError {
        tracing::debug!(error = %err, role = ?self.role, "session dead");
        self.kill();
        err
    }

    /// 以後の入力を拒否し、未送信のキューと転送を破棄する
    fn kill(&mut self) {
        self.phase = Phase::Dead;
        self.decoder.kill();
        self.output.discard_queued();
        for channel in 0..=u8::MAX {
            self.transfers.close_channel(channel);
        }
        self.transfers.take_control();
    }
}
