//! a12-proto エラー型

/// メッセージのエンコード/デコードのエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    /// Protobuf デコード失敗
    #[error("proto decode failed: {0}")]
    DecodeFailed(prost::DecodeError),
    /// プロトコルバージョン不一致
    #[error("invalid protocol version: {0} (expected {expected})", expected = crate::A12_VERSION)]
    InvalidProtocolVersion(u32),
    /// 固定長レイアウトに対してバイト数が足りない
    #[error("truncated body: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    /// 未知のイベントカテゴリ
    #[error("unknown event category {0:#04x}")]
    UnknownCategory(u8),
    /// 未知の映像/音声メソッド
    #[error("unknown media method {0}")]
    UnknownMethod(u8),
    /// 列挙値が範囲外
    #[error("unknown enumeration value {0}")]
    UnknownEnumValue(i32),
    /// Control メッセージに command が入っていない
    #[error("control message without command")]
    MissingCommand,
}

impl From<prost::DecodeError> for ProtoError {
    fn from(err: prost::DecodeError) -> Self {
        ProtoError::DecodeFailed(err)
    }
}
