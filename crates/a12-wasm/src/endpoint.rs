//! A12Endpoint wasm-bindgen エクスポート
//!
//! JS 側の接続（WebSocket など）とセッションを結ぶ。
//! 受信結果は `Inbox` に溜め、`unpack` の戻り値として JSON で返す。

use wasm_bindgen::prelude::*;
use js_sys::Uint8Array;

use a12_bstream::{BlobRequest, MemorySource};
use a12_crypto::{decode_public_key, encode_public_key, random_secret, PublicKey};
use a12_proto::{CompressionBias, Event, EventCategory, VideoMethod};
use a12_session::{
    AudioFrame, BlobMode, ContextOptions, DestinationId, EnqueueStatus, PkResponse, Session,
    TraceGroups, VideoFrame, VideoOptions,
};

use crate::records::{parse_blob_kind, Inbox, StatsJson};

/// `flush` のモード文字列を解釈する（省略時は "all"）
pub fn parse_blob_mode(mode: &str) -> Option<BlobMode> {
    match mode {
        "none" => Some(BlobMode::NoBlob),
        "channel" => Some(BlobMode::ChannelOnly),
        "all" => Some(BlobMode::All),
        _ => None,
    }
}

/// `trusted` と一致する鍵だけを受け入れるオプションを作る
///
/// 受け入れた場合、自分側の鍵はセッションごとに新しく作る。
pub fn trusting_options(secret: Option<&str>, trusted: PublicKey) -> Result<ContextOptions, String> {
    let options = ContextOptions::new(secret).map_err(|e| e.to_string())?;
    Ok(options.with_pk_lookup(move |peer: &PublicKey| {
        if *peer != trusted {
            return PkResponse::Reject;
        }
        match random_secret() {
            Ok(secret) => PkResponse::Accept(secret),
            Err(_) => PkResponse::Reject,
        }
    }))
}

fn js_err(context: &str, err: impl core::fmt::Display) -> JsError {
    JsError::new(&format!("{}: {}", context, err))
}

/// A12 セッションの片側
///
/// ## 内部構成
///
/// ```text
/// A12Endpoint
///   ├── Session (a12-session) - ハンドシェイク・多重化・送信順序
///   └── Inbox   (records)     - 受信イベント/映像/音声/ブロブの受け取り口
/// ```
///
/// WASM はシングルスレッドなので `Inbox` は `Rc<RefCell<_>>` で共有している。
#[wasm_bindgen]
pub struct A12Endpoint {
    /// `release` 後は None
    session: Option<Session>,
    inbox: Inbox,
}

impl A12Endpoint {
    fn with_session(mut session: Session) -> Self {
        let inbox = Inbox::new();
        session.set_bhandler(inbox.blob_handler());
        A12Endpoint {
            session: Some(session),
            inbox,
        }
    }

    fn session(&mut self) -> Result<&mut Session, JsError> {
        self.session
            .as_mut()
            .ok_or_else(|| JsError::new("endpoint already released"))
    }
}

#[wasm_bindgen]
impl A12Endpoint {
    /// 接続側として開く。最初の `flush` で Hello が出る
    ///
    /// # 例（TypeScript）
    /// ```typescript
    /// const ep = A12Endpoint.open("my secret");
    /// socket.send(ep.flush());
    /// ```
    #[wasm_bindgen]
    pub fn open(secret: Option<String>) -> Result<A12Endpoint, JsError> {
        let options = ContextOptions::new(secret.as_deref()).map_err(|e| js_err("Invalid options", e))?;
        let session = Session::open(options).map_err(|e| js_err("Open failed", e))?;
        Ok(Self::with_session(session))
    }

    /// 受け入れ側として作る
    ///
    /// `trusted_key`（Base64）を渡すとその鍵だけを受け入れる。省略時はすべて受け入れる。
    #[wasm_bindgen]
    pub fn build(secret: Option<String>, trusted_key: Option<String>) -> Result<A12Endpoint, JsError> {
        let options = match trusted_key {
            Some(key) => {
                let trusted = decode_public_key(&key).map_err(|e| js_err("Invalid trusted key", e))?;
                trusting_options(secret.as_deref(), trusted).map_err(|e| js_err("Invalid options", e))?
            }
            None => ContextOptions::new(secret.as_deref()).map_err(|e| js_err("Invalid options", e))?,
        };
        let session = Session::build(options).map_err(|e| js_err("Build failed", e))?;
        Ok(Self::with_session(session))
    }

    /// 受信バイト列を処理し、届いたものを JSON 配列で返す
    ///
    /// エラー時は記録が残る。`takeRecords` で取り出せる。
    #[wasm_bindgen]
    pub fn unpack(&mut self, bytes: &[u8]) -> Result<String, JsError> {
        let mut inbox = self.inbox.clone();
        self.session()?
            .unpack(bytes, &mut inbox)
            .map_err(|e| js_err("Unpack failed", e))?;
        self.take_records()
    }

    #[wasm_bindgen(js_name = "takeRecords")]
    pub fn take_records(&mut self) -> Result<String, JsError> {
        serde_json::to_string(&self.inbox.take_records()).map_err(|e| js_err("Serialize failed", e))
    }

    /// 送信すべきバイト列（なければ長さ 0）
    ///
    /// `mode`: "none" | "channel" | "all"
    #[wasm_bindgen]
    pub fn flush(&mut self, mode: Option<String>) -> Result<Uint8Array, JsError> {
        let mode = match mode.as_deref() {
            None => BlobMode::All,
            Some(text) => parse_blob_mode(text)
                .ok_or_else(|| JsError::new(&format!("Unknown flush mode: {}", text)))?,
        };
        let out = self.session()?.flush(mode);
        let arr = Uint8Array::new_with_length(out.len() as u32);
        arr.copy_from(out);
        Ok(arr)
    }

    /// 1: 処理待ちあり / 0: なし / -1: セッション終了
    #[wasm_bindgen]
    pub fn poll(&self) -> i32 {
        self.session.as_ref().map_or(-1, |s| s.poll())
    }

    #[wasm_bindgen(js_name = "wantsFlush")]
    pub fn wants_flush(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.wants_flush())
    }

    /// アクティブチャンネルにイベントを積む。混雑していれば false
    #[wasm_bindgen]
    pub fn enqueue(
        &mut self,
        category: u8,
        kind: u16,
        ioevs: &[i32],
        message: Option<String>,
    ) -> Result<bool, JsError> {
        let category = EventCategory::try_from(category).map_err(|e| js_err("Invalid category", e))?;
        let mut slots = [0i32; 6];
        for (slot, value) in slots.iter_mut().zip(ioevs) {
            *slot = *value;
        }
        let mut event = Event::new(category, kind).with_ioevs(slots);
        if let Some(message) = message.as_deref() {
            event = event.with_message(message);
        }
        let status = self
            .session()?
            .channel_enqueue(&event)
            .map_err(|e| js_err("Enqueue failed", e))?;
        Ok(status == EnqueueStatus::Queued)
    }

    /// 映像フレーム（0xRRGGBBAA）を送る
    #[wasm_bindgen(js_name = "enqueueVideo")]
    pub fn enqueue_video(
        &mut self,
        width: u16,
        height: u16,
        pixels: &[u32],
        method: Option<u8>,
        bias: Option<u8>,
    ) -> Result<(), JsError> {
        let mut opts = VideoOptions::default();
        if let Some(method) = method {
            opts.method = VideoMethod::try_from(method).map_err(|e| js_err("Invalid video method", e))?;
        }
        if let Some(bias) = bias {
            opts.bias = CompressionBias::try_from(bias).map_err(|e| js_err("Invalid bias", e))?;
        }
        let frame = VideoFrame {
            width,
            height,
            pixels,
        };
        self.session()?
            .channel_vframe(&frame, &opts)
            .map_err(|e| js_err("Video failed", e))
    }

    #[wasm_bindgen(js_name = "enqueueAudio")]
    pub fn enqueue_audio(&mut self, channels: u8, samplerate: u32, samples: &[i16]) -> Result<(), JsError> {
        let frame = AudioFrame {
            channels,
            samplerate,
            samples,
        };
        self.session()?
            .channel_aframe(&frame)
            .map_err(|e| js_err("Audio failed", e))
    }

    #[wasm_bindgen(js_name = "setDestination")]
    pub fn set_destination(&mut self, channel: u8, dest: u32) -> Result<(), JsError> {
        self.session()?
            .set_destination(channel, DestinationId(dest))
            .map_err(|e| js_err("setDestination failed", e))
    }

    /// 宛先を外す。外した宛先番号を返す
    #[wasm_bindgen(js_name = "detachDestination")]
    pub fn detach_destination(&mut self, channel: u8) -> Result<Option<u32>, JsError> {
        Ok(self.session()?.detach_destination(channel).map(|d| d.0))
    }

    #[wasm_bindgen(js_name = "setChannel")]
    pub fn set_channel(&mut self, channel: u8) -> Result<(), JsError> {
        self.session()?
            .set_channel(channel)
            .map_err(|e| js_err("setChannel failed", e))
    }

    #[wasm_bindgen(js_name = "channelNew")]
    pub fn channel_new(&mut self, channel: u8, segkind: u32, cookie: u32, output: bool) -> Result<(), JsError> {
        self.session()?
            .channel_new(channel, segkind, cookie, output)
            .map_err(|e| js_err("channelNew failed", e))
    }

    #[wasm_bindgen(js_name = "channelShutdown")]
    pub fn channel_shutdown(&mut self, last_words: &str) -> Result<(), JsError> {
        self.session()?
            .channel_shutdown(last_words)
            .map_err(|e| js_err("channelShutdown failed", e))
    }

    /// アクティブチャンネルを閉じる（チャンネル 0 ならセッション終了）
    #[wasm_bindgen(js_name = "channelClose")]
    pub fn channel_close(&mut self) -> Result<(), JsError> {
        self.session()?
            .channel_close()
            .map_err(|e| js_err("channelClose failed", e))
    }

    /// メモリ上のデータをブロブとして送る。ストリーム ID を返す
    ///
    /// `kind`: 0 = state, 1 = font, 2 = font suppl, 3 = blob
    #[wasm_bindgen(js_name = "enqueueBlob")]
    pub fn enqueue_blob(&mut self, kind: u8, data: &[u8]) -> Result<f64, JsError> {
        let kind = parse_blob_kind(kind).ok_or_else(|| JsError::new(&format!("Unknown blob kind: {}", kind)))?;
        let source = MemorySource::new(data.to_vec());
        let request = BlobRequest::new(kind, Box::new(source));
        let stream_id = self
            .session()?
            .enqueue_bstream(request)
            .map_err(|e| js_err("enqueueBlob failed", e))?;
        Ok(stream_id as f64)
    }

    /// チャンネル上の転送を取り消す。取り消した数を返す
    #[wasm_bindgen(js_name = "streamCancel")]
    pub fn stream_cancel(&mut self, channel: u8) -> Result<u32, JsError> {
        let cancelled = self
            .session()?
            .stream_cancel(channel)
            .map_err(|e| js_err("streamCancel failed", e))?;
        Ok(cancelled as u32)
    }

    /// 受信済みブロブの本体
    #[wasm_bindgen(js_name = "takeBlob")]
    pub fn take_blob(&mut self, stream_id: f64) -> Option<Vec<u8>> {
        self.inbox.take_blob(stream_id as u64)
    }

    /// 宛先の最新フレーム（0xRRGGBBAA）
    #[wasm_bindgen(js_name = "takeFrame")]
    pub fn take_frame(&mut self, dest: u32) -> Option<Vec<u32>> {
        self.inbox.take_frame(dest)
    }

    /// 宛先に溜まった音声サンプル
    #[wasm_bindgen(js_name = "takeAudio")]
    pub fn take_audio(&mut self, dest: u32) -> Option<Vec<i16>> {
        self.inbox.take_audio(dest)
    }

    #[wasm_bindgen(js_name = "setTraceMask")]
    pub fn set_trace_mask(&mut self, mask: u32) -> Result<(), JsError> {
        self.session()?.set_trace_mask(TraceGroups::from_bits_truncate(mask));
        Ok(())
    }

    /// 相手の identity 公開鍵（Base64）。ハンドシェイク前は undefined
    #[wasm_bindgen(js_name = "peerPublicKey")]
    pub fn peer_public_key(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|s| s.peer_public_key())
            .map(|key| encode_public_key(&key))
    }

    #[wasm_bindgen(js_name = "isReady")]
    pub fn is_ready(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_ready())
    }

    #[wasm_bindgen(js_name = "isDead")]
    pub fn is_dead(&self) -> bool {
        self.session.as_ref().map_or(true, |s| s.is_dead())
    }

    /// 統計（JSON）
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> Result<String, JsError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| JsError::new("endpoint already released"))?;
        let stats = StatsJson::new(&session.stats(), session.active_channel(), session.is_dead());
        serde_json::to_string(&stats).map_err(|e| js_err("Serialize failed", e))
    }

    /// セッションを解放する。転送中なら false を返し、何もしない
    #[wasm_bindgen]
    pub fn release(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return true;
        };
        match session.free() {
            Ok(()) => true,
            Err(session) => {
                self.session = Some(session);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a12_crypto::KeyPair;
    use a12_session::NullSink;

    #[test]
    fn test_parse_blob_mode() {
        assert_eq!(parse_blob_mode("none"), Some(BlobMode::NoBlob));
        assert_eq!(parse_blob_mode("channel"), Some(BlobMode::ChannelOnly));
        assert_eq!(parse_blob_mode("all"), Some(BlobMode::All));
        assert_eq!(parse_blob_mode("ALL"), None);
    }

    fn run_handshake(client: &mut Session, server: &mut Session) {
        for _ in 0..4 {
            let out = client.flush(BlobMode::All).to_vec();
            server.unpack(&out, &mut NullSink).unwrap();
            let out = server.flush(BlobMode::All).to_vec();
            client.unpack(&out, &mut NullSink).unwrap();
        }
    }

    #[test]
    fn test_trusting_options_accepts_matching_key() {
        let secret = random_secret().unwrap();
        let pair = KeyPair::from_secret(secret.expose());
        let options = ContextOptions::new(None).unwrap().with_local_key(*secret.expose());
        let mut client = Session::open(options).unwrap();
        let mut server = Session::build(trusting_options(None, pair.public()).unwrap()).unwrap();

        run_handshake(&mut client, &mut server);
        assert!(client.is_ready());
        assert!(server.is_ready());
        assert_eq!(server.peer_public_key(), Some(pair.public()));
    }

    #[test]
    fn test_trusting_options_rejects_other_key() {
        let trusted = KeyPair::generate().unwrap().public();
        let mut client = Session::open(ContextOptions::new(None).unwrap()).unwrap();
        let mut server = Session::build(trusting_options(None, trusted).unwrap()).unwrap();

        run_handshake(&mut client, &mut server);
        assert!(!server.is_ready());
    }
}
