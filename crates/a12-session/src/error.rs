//! a12-session エラー型

use a12_crypto::CryptoError;
use a12_proto::ProtoError;
use a12_transport::TransportError;

use crate::codec::CodecError;

/// セッション操作のエラー
///
/// `Dead` 以外のプロトコル違反が返った時点で、セッションは `Dead` になっている。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// セッションはすでに死んでいる
    #[error("session is dead")]
    Dead,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed message: {0}")]
    Proto(#[from] ProtoError),
    /// ハンドシェイクの手順違反
    #[error("handshake failed: {0}")]
    Handshake(&'static str),
    /// 相手のプロトコル違反
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("no such channel {0}")]
    NoSuchChannel(u8),
    #[error("channel {0} already exists")]
    ChannelExists(u8),
    /// 宛先未設定のチャンネルのバッファが溢れた
    #[error("unbound channel buffer exceeded {limit} bytes")]
    UnboundOverflow { limit: usize },
    /// 映像/音声のエンコードに失敗した（セッションは生きている）
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// 矛盾した設定
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),
}

impl SessionError {
    /// セッションを終わらせる種類のエラーか
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::NoSuchChannel(_)
                | SessionError::ChannelExists(_)
                | SessionError::Codec(_)
                | SessionError::InvalidOptions(_)
        )
    }
}
