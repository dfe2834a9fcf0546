//! セッションの設定

use alloc::boxed::Box;

use a12_bstream::BlobLimits;
use a12_crypto::{plain_kdf, AuthKey, PublicKey, Sensitive};
use a12_transport::{MAX_FRAME_PAYLOAD, MAX_REASSEMBLY};

use crate::diag::Diagnostics;
use crate::error::SessionError;

/// 送信待ちバイト数の既定の上限（これを超えるとイベントを断る）
pub const DEFAULT_HIGH_WATER: usize = 256 * 1024;

/// 宛先未設定のチャンネル向けに溜めておける既定のバイト数
pub const DEFAULT_UNBOUND_LIMIT: usize = 1024 * 1024;

/// 公開鍵照会の結果
pub enum PkResponse {
    /// 信頼する。このセッションで使う自分側の秘密鍵を返す
    Accept(Sensitive<[u8; 32]>),
    Reject,
}

impl PkResponse {
    pub fn accept(secret: [u8; 32]) -> Self {
        PkResponse::Accept(Sensitive::new(secret))
    }
}

/// 相手の identity 公開鍵の照会（鍵ストア）
pub trait PkLookup {
    fn lookup(&mut self, peer: &PublicKey) -> PkResponse;
}

impl<F> PkLookup for F
where
    F: FnMut(&PublicKey) -> PkResponse,
{
    fn lookup(&mut self, peer: &PublicKey) -> PkResponse {
        self(peer)
    }
}

/// 量的な上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// 送信待ち（未封緘）のバイト数の上限
    pub high_water: usize,
    /// 1 フレームの平文の上限
    pub max_frame_payload: usize,
    /// 宛先未設定のチャンネル向けバッファの上限（超過はプロトコル違反）
    pub unbound_limit: usize,
    /// 再組み立て後の映像/音声フレームの上限
    pub max_media_frame: usize,
    pub blob: BlobLimits,
}

impl Default for SessionLimits {
    fn default() -> Self {
        SessionLimits {
            high_water: DEFAULT_HIGH_WATER,
            max_frame_payload: MAX_FRAME_PAYLOAD,
            unbound_limit: DEFAULT_UNBOUND_LIMIT,
            max_media_frame: MAX_REASSEMBLY,
            blob: BlobLimits::default(),
        }
    }
}

/// `open` / `build` に渡す設定
pub struct ContextOptions {
    /// 共有シークレットから導出した認証鍵
    pub authk: AuthKey,
    /// 受け入れ側で相手の公開鍵を照会する
    pub pk_lookup: Option<Box<dyn PkLookup>>,
    /// 一時鍵の交換を省き、identity 鍵を preauth 鍵のまま送る
    pub disable_ephemeral_k: bool,
    /// 平文で通信する。両側で明示的に指定した場合のみ
    pub disable_authenticity: bool,
    /// 接続側の identity 秘密鍵。None なら毎回生成する
    pub local_key: Option<Sensitive<[u8; 32]>>,
    pub diagnostics: Diagnostics,
    pub limits: SessionLimits,
}

impl ContextOptions {
    /// 共有シークレットから設定を作る（None なら既定のシークレット）
    pub fn new(secret: Option<&str>) -> Result<Self, SessionError> {
        Ok(Self::from_authk(plain_kdf(secret)?))
    }

    pub fn from_authk(authk: AuthKey) -> Self {
        ContextOptions {
            authk,
            pk_lookup: None,
            disable_ephemeral_k: false,
            disable_authenticity: false,
            local_key: None,
            diagnostics: Diagnostics::default(),
            limits: SessionLimits::default(),
        }
    }

    pub fn with_pk_lookup(mut self, lookup: impl PkLookup + 'static) -> Self {
        self.pk_lookup = Some(Box::new(lookup));
        self
    }

    pub fn with_local_key(mut self, secret: [u8; 32]) -> Self {
        self.local_key = Some(Sensitive::new(secret));
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 一時鍵の交換を省く
    pub fn without_ephemeral(mut self) -> Self {
        self.disable_ephemeral_k = true;
        self
    }

    /// 平文セッション（デバッグ・信頼済みネットワーク専用）
    pub fn insecure_plaintext(mut self) -> Self {
        self.disable_authenticity = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        if self.disable_authenticity && self.pk_lookup.is_some() {
            return Err(SessionError::InvalidOptions(
                "disable_authenticity cannot be combined with pk_lookup",
            ));
        }
        if self.limits.max_frame_payload == 0 || self.limits.max_frame_payload > MAX_FRAME_PAYLOAD {
            return Err(SessionError::InvalidOptions("max_frame_payload out of range"));
        }
        if self.limits.blob.chunk_size == 0
            || self.limits.blob.chunk_size + a12_transport::BLOB_CHUNK_HEADER > self.limits.max_frame_payload
        {
            return Err(SessionError::InvalidOptions("blob chunk does not fit in a frame"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = SessionLimits::default();
        assert_eq!(limits.high_water, 256 * 1024);
        assert_eq!(limits.blob.chunk_size, 16 * 1024);
    }

    #[test]
    fn test_plaintext_with_lookup_rejected() {
        let opts = ContextOptions::new(None)
            .unwrap()
            .insecure_plaintext()
            .with_pk_lookup(|_: &PublicKey| PkResponse::Reject);
        assert!(matches!(opts.validate(), Err(SessionError::InvalidOptions(_))));
    }

    #[test]
    fn test_closure_lookup() {
        let mut lookup = |_: &PublicKey| PkResponse::accept([3u8; 32]);
        let peer = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(lookup.lookup(&peer), PkResponse::Accept(_)));
    }
}
