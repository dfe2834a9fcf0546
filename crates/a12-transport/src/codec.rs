//! 受信バイト列 → フレームの状態機械
//!
//! ```text
//! AwaitingHandshake ──(handshake 完了)──> AwaitingHeader
//!        │                                   │ ▲
//!        ▼                                   ▼ │
//!   AwaitingBody ─────> Dispatch ─────> (次のヘッダーへ)
//!
//! 認証失敗・不正な長さ・想定外の種別 → Dead（以後すべて拒否）
//! ```
//!
//! フレームは 1 つずつ開封する。ハンドシェイク中は 1 フレームごとに
//! 鍵が切り替わるため、呼び出し側が開封のたびに正しい暗号状態を渡す。

use alloc::vec::Vec;

use a12_crypto::FrameCipher;

use crate::error::TransportError;
use crate::frame::{Frame, FrameClass, FrameHeader, FRAME_HEADER_SIZE, MAX_FRAME_BODY};

/// デコーダーの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// ハンドシェイクフレームのヘッダー待ち
    AwaitingHandshake,
    /// 通常フレームのヘッダー待ち
    AwaitingHeader,
    /// ヘッダーを読み終え、本体待ち
    AwaitingBody(FrameHeader),
    /// フレームを呼び出し側に渡した直後
    Dispatch,
    /// 回復不能
    Dead,
}

/// フレームデコーダー
pub struct FrameDecoder {
    buf: Vec<u8>,
    state: DecodeState,
    handshake_done: bool,
    max_body: usize,
}

impl FrameDecoder {
    /// ハンドシェイク待ちから始めるデコーダー
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_BODY)
    }

    /// 本体長の上限を指定して作る
    pub fn with_limit(max_body: usize) -> Self {
        FrameDecoder {
            buf: Vec::new(),
            state: DecodeState::AwaitingHandshake,
            handshake_done: false,
            max_body: max_body.min(MAX_FRAME_BODY),
        }
    }

    /// ハンドシェイクを省略する（平文セッション）
    pub fn without_handshake(max_body: usize) -> Self {
        let mut dec = Self::with_limit(max_body);
        dec.complete_handshake();
        dec
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == DecodeState::Dead
    }

    /// ハンドシェイク完了を通知する。以後は通常フレームを受け付ける
    pub fn complete_handshake(&mut self) {
        self.handshake_done = true;
        if self.state == DecodeState::AwaitingHandshake {
            self.state = DecodeState::AwaitingHeader;
        }
    }

    /// 以後の入力をすべて拒否する
    pub fn kill(&mut self) {
        self.state = DecodeState::Dead;
        self.buf.clear();
    }

    /// 受信バイト列を追加する
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.is_dead() {
            return;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// 未処理のバイト数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 今すぐ 1 フレーム取り出せるだけのバイトがあるか
    pub fn has_frame(&self) -> bool {
        match self.state {
            DecodeState::Dead => false,
            DecodeState::AwaitingBody(h) => self.buf.len() >= h.len as usize,
            _ => match FrameHeader::decode(&self.buf) {
                Ok(h) => self.buf.len() >= FRAME_HEADER_SIZE + h.len as usize,
                // 不正なヘッダーも「処理すべきデータ」として扱う
                Err(TransportError::TooShort) => false,
                Err(_) => true,
            },
        }
    }

    /// 次のフレームを 1 つ取り出して開封する
    ///
    /// # 戻り値
    /// - `Ok(Some(frame))`: 開封済みのフレーム
    /// - `Ok(None)`: バイトが足りない
    /// - `Err(_)`: プロトコル違反。デコーダーは `Dead` になる
    pub fn poll_frame(&mut self, cipher: &mut FrameCipher) -> Result<Option<Frame>, TransportError> {
        match self.step(cipher) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                tracing::debug!(error = %err, "frame decoder dead");
                self.kill();
                Err(err)
            }
        }
    }

    fn step(&mut self, cipher: &mut FrameCipher) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.state {
                DecodeState::Dead => return Err(TransportError::Dead),
                DecodeState::Dispatch => {
                    self.state = self.idle_state();
                }
                DecodeState::AwaitingHandshake | DecodeState::AwaitingHeader => {
                    if self.buf.len() < FRAME_HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = FrameHeader::decode(&self.buf)?;
                    self.validate(&header, cipher)?;
                    self.buf.drain(..FRAME_HEADER_SIZE);
                    self.state = DecodeState::AwaitingBody(header);
                }
                DecodeState::AwaitingBody(header) => {
                    let len = header.len as usize;
                    if self.buf.len() < len {
                        return Ok(None);
                    }
                    let sealed: Vec<u8> = self.buf.drain(..len).collect();
                    let body = cipher.open(&header.encode(), &sealed)?;
                    self.state = DecodeState::Dispatch;
                    return Ok(Some(Frame::new(header.class, header.channel, body)));
                }
            }
        }
    }

    /// 本体を確保する前にヘッダーを検証する
    fn validate(&self, header: &FrameHeader, cipher: &FrameCipher) -> Result<(), TransportError> {
        let len = header.len as usize;
        if len > self.max_body {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_body,
            });
        }
        if len < cipher.overhead() {
            return Err(TransportError::TooShort);
        }

        let is_handshake = header.class == FrameClass::Handshake;
        if self.handshake_done == is_handshake {
            return Err(TransportError::UnexpectedClass(header.class));
        }
        Ok(())
    }

    fn idle_state(&self) -> DecodeState {
        if self.handshake_done {
            DecodeState::AwaitingHeader
        } else {
            DecodeState::AwaitingHandshake
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::seal_frame;
    use a12_crypto::{plain_kdf, CryptoSession, Role};

    fn pair() -> (CryptoSession, CryptoSession) {
        let authk = plain_kdf(None).unwrap();
        (
            CryptoSession::new(&authk.preauth_keys(Role::Initiator).unwrap()),
            CryptoSession::new(&authk.preauth_keys(Role::Responder).unwrap()),
        )
    }

    #[test]
    fn test_decode_split_across_feeds() {
        let (mut tx, mut rx) = pair();
        let wire = seal_frame(tx.send(), FrameClass::Handshake, 0, b"hello").unwrap();

        let mut dec = FrameDecoder::new();
        dec.feed(&wire[..3]);
        assert_eq!(dec.poll_frame(rx.recv()).unwrap(), None);
        dec.feed(&wire[3..10]);
        assert_eq!(dec.poll_frame(rx.recv()).unwrap(), None);
        assert!(matches!(dec.state(), DecodeState::AwaitingBody(_)));
        dec.feed(&wire[10..]);

        let frame = dec.poll_frame(rx.recv()).unwrap().unwrap();
        assert_eq!(frame.class, FrameClass::Handshake);
        assert_eq!(frame.body, b"hello");
        assert_eq!(dec.state(), DecodeState::Dispatch);
    }

    #[test]
    fn test_decode_many_in_one_feed() {
        let (mut tx, mut rx) = pair();
        let mut wire = Vec::new();
        for i in 0..3u8 {
            wire.extend(seal_frame(tx.send(), FrameClass::Event, i, &[i; 4]).unwrap());
        }

        let mut dec = FrameDecoder::new();
        dec.complete_handshake();
        dec.feed(&wire);

        for i in 0..3u8 {
            assert!(dec.has_frame());
            let frame = dec.poll_frame(rx.recv()).unwrap().unwrap();
            assert_eq!(frame.channel, i);
            assert_eq!(frame.body, alloc::vec![i; 4]);
        }
        assert!(!dec.has_frame());
        assert_eq!(dec.poll_frame(rx.recv()).unwrap(), None);
    }

    #[test]
    fn test_oversized_length_kills_before_body() {
        let mut dec = FrameDecoder::new();
        let mut rx = FrameCipher::Plaintext;
        dec.feed(&[0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);

        let result = dec.poll_frame(&mut rx);
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
        assert!(dec.is_dead());
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_non_handshake_before_handshake_rejected() {
        let (mut tx, mut rx) = pair();
        let wire = seal_frame(tx.send(), FrameClass::Event, 0, b"early").unwrap();
        let mut dec = FrameDecoder::new();
        dec.feed(&wire);

        assert_eq!(
            dec.poll_frame(rx.recv()),
            Err(TransportError::UnexpectedClass(FrameClass::Event))
        );
    }

    #[test]
    fn test_tampered_body_kills() {
        let (mut tx, mut rx) = pair();
        let mut wire = seal_frame(tx.send(), FrameClass::Handshake, 0, b"hello").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let mut dec = FrameDecoder::new();
        dec.feed(&wire);
        assert!(matches!(dec.poll_frame(rx.recv()), Err(TransportError::Crypto(_))));

        // 以後のフィードは無視される
        dec.feed(&[0u8; 16]);
        assert_eq!(dec.buffered(), 0);
        assert_eq!(dec.poll_frame(rx.recv()), Err(TransportError::Dead));
    }

    #[test]
    fn test_plaintext_decoder() {
        let mut cipher = FrameCipher::Plaintext;
        let wire = seal_frame(&mut cipher, FrameClass::Control, 0, b"ctl").unwrap();

        let mut dec = FrameDecoder::without_handshake(MAX_FRAME_BODY);
        dec.feed(&wire);
        let frame = dec.poll_frame(&mut FrameCipher::Plaintext).unwrap().unwrap();
        assert_eq!(frame.body, b"ctl");
    }
}
