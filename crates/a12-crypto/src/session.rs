//! AES-256-OCB3 によるフレームの封緘/開封
//!
//! 方向ごとに独立した鍵と nonce カウンタを持つ。

use alloc::vec::Vec;

use aead::{Aead, KeyInit, Payload};
use aes::Aes256;
use ocb3::Ocb3;

use crate::error::CryptoError;
use crate::kdf::{CipherKey, DirectionKeys};
use crate::nonce::FrameNonce;

/// AES-256-OCB3 (12バイト nonce, 16バイト tag) の型エイリアス
type Aes256Ocb3 = Ocb3<Aes256>;

/// 認証タグ長
pub const TAG_LEN: usize = 16;

/// 1 方向分のフレーム暗号状態
pub enum FrameCipher {
    /// 平文（`disable_authenticity` を明示した場合のみ）
    Plaintext,
    /// AEAD で封緘する
    Sealed {
        cipher: Aes256Ocb3,
        /// 次に使うシーケンス番号
        seq: u64,
    },
}

impl FrameCipher {
    /// 鍵から暗号状態を作る。シーケンス番号は 0 から
    pub fn sealed(key: &CipherKey) -> Self {
        let cipher = Aes256Ocb3::new(key.expose().into());
        FrameCipher::Sealed { cipher, seq: 0 }
    }

    /// 封緘で増えるバイト数
    pub fn overhead(&self) -> usize {
        match self {
            FrameCipher::Plaintext => 0,
            FrameCipher::Sealed { .. } => TAG_LEN,
        }
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self, FrameCipher::Plaintext)
    }

    /// フレーム本体を封緘する
    ///
    /// # 引数
    /// - `aad`: フレームヘッダー（認証のみ、暗号化しない）
    /// - `body`: フレーム本体
    pub fn seal(&mut self, aad: &[u8], body: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            FrameCipher::Plaintext => Ok(body.to_vec()),
            FrameCipher::Sealed { cipher, seq } => {
                let nonce = next_nonce(seq)?;
                cipher
                    .encrypt(nonce.as_bytes().into(), Payload { msg: body, aad })
                    .map_err(|_| CryptoError::EncryptionFailed)
            }
        }
    }

    /// 受信したフレーム本体を開封する
    ///
    /// 認証に失敗した場合もシーケンス番号は進む。失敗したセッションは
    /// 呼び出し側で破棄する前提。
    pub fn open(&mut self, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            FrameCipher::Plaintext => Ok(sealed.to_vec()),
            FrameCipher::Sealed { cipher, seq } => {
                if sealed.len() < TAG_LEN {
                    return Err(CryptoError::CiphertextTooShort);
                }
                let nonce = next_nonce(seq)?;
                cipher
                    .decrypt(nonce.as_bytes().into(), Payload { msg: sealed, aad })
                    .map_err(|_| CryptoError::DecryptionFailed)
            }
        }
    }

    /// 次に使うシーケンス番号（テスト用）
    pub fn seq(&self) -> Option<u64> {
        match self {
            FrameCipher::Plaintext => None,
            FrameCipher::Sealed { seq, .. } => Some(*seq),
        }
    }
}

fn next_nonce(seq: &mut u64) -> Result<FrameNonce, CryptoError> {
    let nonce = FrameNonce::new(*seq);
    *seq = seq.checked_add(1).ok_or(CryptoError::NonceExhausted)?;
    Ok(nonce)
}

/// 送受信 2 方向の暗号状態
///
/// ハンドシェイクの段階が進むたびに `rekey` で丸ごと差し替える。
pub struct CryptoSession {
    send: FrameCipher,
    recv: FrameCipher,
}

impl CryptoSession {
    /// 方向別の鍵からセッションを作る
    pub fn new(keys: &DirectionKeys) -> Self {
        CryptoSession {
            send: FrameCipher::sealed(&keys.send),
            recv: FrameCipher::sealed(&keys.recv),
        }
    }

    /// 平文セッション（デバッグ・信頼済みネットワーク専用）
    pub fn plaintext() -> Self {
        CryptoSession {
            send: FrameCipher::Plaintext,
            recv: FrameCipher::Plaintext,
        }
    }

    /// 送信側だけ鍵を差し替える
    pub fn rekey_send(&mut self, key: &CipherKey) {
        self.send = FrameCipher::sealed(key);
    }

    /// 受信側だけ鍵を差し替える
    pub fn rekey_recv(&mut self, key: &CipherKey) {
        self.recv = FrameCipher::sealed(key);
    }

    /// 両方向の鍵を差し替える
    pub fn rekey(&mut self, keys: &DirectionKeys) {
        self.rekey_send(&keys.send);
        self.rekey_recv(&keys.recv);
    }

    pub fn send(&mut self) -> &mut FrameCipher {
        &mut self.send
    }

    pub fn recv(&mut self) -> &mut FrameCipher {
        &mut self.recv
    }

    pub fn is_plaintext(&self) -> bool {
        self.send.is_plaintext() && self.recv.is_plaintext()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::plain_kdf;
    use crate::Role;

    fn pair() -> (CryptoSession, CryptoSession) {
        let authk = plain_kdf(None).unwrap();
        let a = CryptoSession::new(&authk.preauth_keys(Role::Initiator).unwrap());
        let b = CryptoSession::new(&authk.preauth_keys(Role::Responder).unwrap());
        (a, b)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (mut a, mut b) = pair();
        let header = [2u8, 0, 0, 0, 0, 28];

        let sealed = a.send().seal(&header, b"Hello, a12!").unwrap();
        assert_eq!(sealed.len(), 11 + TAG_LEN);

        let opened = b.recv().open(&header, &sealed).unwrap();
        assert_eq!(opened, b"Hello, a12!");
    }

    #[test]
    fn test_seq_increments_per_frame() {
        let (mut a, _) = pair();
        assert_eq!(a.send().seq(), Some(0));
        a.send().seal(&[], b"").unwrap();
        a.send().seal(&[], b"").unwrap();
        assert_eq!(a.send().seq(), Some(2));
    }

    #[test]
    fn test_tampered_header_fails() {
        let (mut a, mut b) = pair();
        let sealed = a.send().seal(&[1, 2, 3], b"payload").unwrap();
        let result = b.recv().open(&[1, 2, 4], &sealed);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_wrong_direction_fails() {
        let (mut a, _) = pair();
        let sealed = a.send().seal(&[], b"payload").unwrap();
        // 自分の送信鍵で作ったものは自分の受信鍵では開けない
        let result = a.recv().open(&[], &sealed);
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_order_fails() {
        let (mut a, mut b) = pair();
        let _first = a.send().seal(&[], b"one").unwrap();
        let second = a.send().seal(&[], b"two").unwrap();
        // 1 つ目を飛ばすと nonce がずれて認証に失敗する
        assert!(b.recv().open(&[], &second).is_err());
    }

    #[test]
    fn test_too_short_fails() {
        let (_, mut b) = pair();
        let result = b.recv().open(&[], &[0u8; 5]);
        assert_eq!(result, Err(CryptoError::CiphertextTooShort));
    }

    #[test]
    fn test_plaintext_passthrough() {
        let mut s = CryptoSession::plaintext();
        assert!(s.is_plaintext());
        assert_eq!(s.send().seal(&[], b"raw").unwrap(), b"raw");
        assert_eq!(s.send().overhead(), 0);
    }
}
