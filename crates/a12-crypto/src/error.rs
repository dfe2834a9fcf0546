//! 暗号エラー型

/// 暗号操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// 鍵の長さが不正
    #[error("invalid key length (expected 32 bytes)")]
    InvalidKeyLength,
    /// Base64 デコードに失敗
    #[error("invalid Base64 encoding")]
    InvalidBase64,
    /// 暗号化に失敗
    #[error("encryption failed")]
    EncryptionFailed,
    /// 復号に失敗（認証タグ検証失敗を含む）
    #[error("decryption failed (authentication tag mismatch)")]
    DecryptionFailed,
    /// 暗号文が認証タグより短い
    #[error("ciphertext shorter than the authentication tag")]
    CiphertextTooShort,
    /// 鍵導出に失敗（出力長が HKDF の上限を超えた）
    #[error("key derivation failed")]
    KeyDerivation,
    /// nonce カウンタを使い切った
    #[error("nonce counter exhausted")]
    NonceExhausted,
    /// OS 乱数が取得できない
    #[error("random source unavailable")]
    RandomUnavailable,
}
