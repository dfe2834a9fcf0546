//! # a12-crypto
//!
//! A12 のセキュアチャンネル確立に使う暗号プリミティブ。
//! `no_std` + `alloc` 環境（WASM を含む）で動作する。
//!
//! ## 鍵の階層
//!
//! ```text
//! shared secret (低エントロピー, 既定値 "SETECASTRONOMY")
//!   └─ plain_kdf (HKDF-SHA256, 固定 salt) → AuthKey (64 bytes)
//!        ├─ preauth 鍵 (i2r / r2i)            : ハンドシェイク最初のフレーム
//!        ├─ ephemeral 鍵 (X25519 一時鍵の DH)   : identity 公開鍵の転送
//!        └─ session 鍵 (X25519 identity の DH) : 以降の全フレーム
//! ```
//!
//! ## フレーム暗号化
//!
//! ```text
//! Nonce（12バイト）:
//!   bytes[0..4]  = 0x00000000
//!   bytes[4..12] = seq as u64, big-endian（方向ごとのカウンタ、鍵切り替えで 0 に戻る）
//!
//! AAD = フレームヘッダー 6 バイト
//! ```

#![no_std]
extern crate alloc;

mod error;
mod exchange;
mod kdf;
mod nonce;
mod sensitive;
mod session;

pub use error::CryptoError;
pub use exchange::{KeyPair, PublicKey, SharedSecret, PUBLIC_KEY_LEN};
pub use kdf::{plain_kdf, AuthKey, CipherKey, DirectionKeys, KeyStage, DEFAULT_SECRET};
pub use nonce::FrameNonce;
pub use sensitive::Sensitive;
pub use session::{CryptoSession, FrameCipher, TAG_LEN};

/// セッションにおける役割
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 接続側（`open`）
    Initiator,
    /// 受け入れ側（`build`）
    Responder,
}

impl Role {
    /// 相手側の役割
    pub fn peer(&self) -> Self {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// Base64 文字列（43文字, URL-safe, パディングなし）を 32 バイトの公開鍵にデコードする
///
/// 鍵ストアやログに公開鍵を記録する際のテキスト表現。
pub fn decode_public_key(key_b64: &str) -> Result<PublicKey, CryptoError> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(key_b64)
        .map_err(|_| CryptoError::InvalidBase64)?;

    PublicKey::from_slice(&bytes)
}

/// 32 バイトの公開鍵を Base64 文字列にエンコードする
pub fn encode_public_key(key: &PublicKey) -> alloc::string::String {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// OS 乱数で `buf` を埋める
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomUnavailable)
}

/// OS 乱数から u32 を 1 つ取り出す
///
/// 信頼されなかった鍵の猶予バイト数のような、予測されたくない値に使う。
pub fn random_u32() -> Result<u32, CryptoError> {
    let mut buf = [0u8; 4];
    fill_random(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// 新しい X25519 秘密鍵の素材（`pk_lookup` の応答に使う）
pub fn random_secret() -> Result<Sensitive<[u8; 32]>, CryptoError> {
    let mut secret = Sensitive::<[u8; 32]>::zeroed();
    fill_random(secret.expose_mut())?;
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_peer() {
        assert_eq!(Role::Initiator.peer(), Role::Responder);
        assert_eq!(Role::Responder.peer(), Role::Initiator);
    }

    #[test]
    fn test_random_secret_differs() {
        let a = random_secret().unwrap();
        let b = random_secret().unwrap();
        assert_ne!(a.expose(), b.expose());
        assert_ne!(KeyPair::from_secret(a.expose()).public(), KeyPair::from_secret(b.expose()).public());
    }

    #[test]
    fn test_public_key_base64_roundtrip() {
        let pair = KeyPair::generate().unwrap();
        let text = encode_public_key(&pair.public());
        assert_eq!(text.len(), 43);

        let decoded = decode_public_key(&text).unwrap();
        assert_eq!(decoded, pair.public());
    }

    #[test]
    fn test_decode_public_key_invalid_length() {
        // 16 バイト分しかない
        let result = decode_public_key("AAAAAAAAAAAAAAAAAAAAAA");
        assert_eq!(result, Err(CryptoError::InvalidKeyLength));
    }

    #[test]
    fn test_decode_public_key_invalid_base64() {
        let result = decode_public_key("!!!not base64!!!");
        assert_eq!(result, Err(CryptoError::InvalidBase64));
    }
}
