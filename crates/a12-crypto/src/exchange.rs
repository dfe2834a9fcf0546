//! X25519 鍵交換

use core::fmt;

use x25519_dalek::StaticSecret;

use crate::error::CryptoError;
use crate::sensitive::Sensitive;

/// 公開鍵の長さ
pub const PUBLIC_KEY_LEN: usize = 32;

/// X25519 公開鍵
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// 32 バイトから構築する
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        PublicKey(bytes)
    }

    /// 受信したバイト列から構築する。長さが 32 でなければエラー
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(PublicKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 先頭 4 バイトだけ表示する（トレース出力用の指紋）
        write!(
            f,
            "PublicKey({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// DH の結果（解放時にゼロクリアされる）
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

/// X25519 鍵ペア
///
/// 一時鍵・identity 鍵の両方に使う。秘密鍵は `zeroize` feature により
/// 解放時にゼロクリアされる。
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// OS 乱数から新しい鍵ペアを生成する
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = Sensitive::<[u8; 32]>::zeroed();
        crate::fill_random(seed.expose_mut())?;
        Ok(Self::from_secret(seed.expose()))
    }

    /// 既知の秘密鍵から鍵ペアを復元する（`pk_lookup` が返す鍵素材など）
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*secret);
        let public = PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes());
        KeyPair { secret, public }
    }

    /// 公開鍵
    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// 相手の公開鍵と DH を行う
    pub fn agree(&self, peer: &PublicKey) -> SharedSecret {
        let peer = x25519_dalek::PublicKey::from(peer.0);
        SharedSecret(self.secret.diffie_hellman(&peer))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agree_is_symmetric() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_eq!(a.agree(&b.public()).as_bytes(), b.agree(&a.public()).as_bytes());
    }

    #[test]
    fn test_from_secret_is_deterministic() {
        let a = KeyPair::from_secret(&[7u8; 32]);
        let b = KeyPair::from_secret(&[7u8; 32]);
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn test_generate_differs() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public(), b.public());
    }

    #[test]
    fn test_public_key_from_slice_length() {
        assert_eq!(
            PublicKey::from_slice(&[0u8; 31]),
            Err(CryptoError::InvalidKeyLength)
        );
        assert!(PublicKey::from_slice(&[0u8; 32]).is_ok());
    }
}
