//! フレーム Nonce 実装
//!
//! ## Nonce 構造（12バイト）
//! ```text
//! bytes[0..4]  = 0x00000000  (ゼロパディング)
//! bytes[4..12] = seq as u64, big-endian
//! ```
//!
//! A12 は順序保証のあるバイトパイプ上で動くため、nonce は送信しない。
//! 送受信の両側が方向ごとのカウンタを同じ順序で進める。

/// A12 フレームの Nonce（12バイト）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameNonce([u8; 12]);

impl FrameNonce {
    /// シーケンス番号から Nonce を構築する
    ///
    /// # 例
    /// ```
    /// use a12_crypto::FrameNonce;
    /// let nonce = FrameNonce::new(42);
    /// assert_eq!(nonce.seq(), 42);
    /// ```
    pub fn new(seq: u64) -> Self {
        let mut bytes = [0u8; 12];
        bytes[4..12].copy_from_slice(&seq.to_be_bytes());
        FrameNonce(bytes)
    }

    /// シーケンス番号を取得する
    pub fn seq(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[4..12]);
        u64::from_be_bytes(buf)
    }

    /// 12 バイトの nonce データへの参照を返す
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_layout() {
        let nonce = FrameNonce::new(0x0102030405060708);
        assert_eq!(&nonce.as_bytes()[0..4], &[0, 0, 0, 0]);
        assert_eq!(&nonce.as_bytes()[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_nonce_seq_roundtrip() {
        for seq in [0u64, 1, 255, u64::MAX] {
            assert_eq!(FrameNonce::new(seq).seq(), seq);
        }
    }
}
