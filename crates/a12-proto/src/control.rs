//! ハンドシェイク・制御メッセージ（Protobuf）
//!
//! フレームの class が Handshake / Control の場合、本体はここの
//! メッセージを Protobuf でエンコードしたもの。
//! チャンネル ID はフレームヘッダー側に載るので、メッセージには含めない。

use alloc::string::String;
use alloc::vec::Vec;

use prost::Message;

use crate::error::ProtoError;
use crate::A12_VERSION;

/// ハンドシェイクの段階
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HelloPhase {
    /// 一時鍵（中間者が identity 鍵の再利用を追跡できないようにする）
    Ephemeral = 0,
    /// identity 鍵
    Identity = 1,
}

/// バイナリ転送の種別
///
/// 同じチャンネルに複数溜まった場合、開始順はこの優先度で決まる
/// （[`BlobKind::priority`]）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum BlobKind {
    State = 0,
    Font = 1,
    FontSuppl = 2,
    Blob = 3,
}

impl BlobKind {
    /// 開始優先度（小さいほど先）: FONT > FONT_SUPPL > STATE > BLOB
    pub fn priority(&self) -> u8 {
        match self {
            BlobKind::Font => 0,
            BlobKind::FontSuppl => 1,
            BlobKind::State => 2,
            BlobKind::Blob => 3,
        }
    }

    /// フォント系（ramp 対象）か
    pub fn is_font(&self) -> bool {
        matches!(self, BlobKind::Font | BlobKind::FontSuppl)
    }
}

/// ハンドシェイクフレームの本体
#[derive(Clone, PartialEq, Message)]
pub struct Hello {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(enumeration = "HelloPhase", tag = "2")]
    pub phase: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub public_key: Vec<u8>,
}

impl Hello {
    pub fn new(phase: HelloPhase, public_key: &[u8]) -> Self {
        Hello {
            version: A12_VERSION,
            phase: phase as i32,
            public_key: public_key.to_vec(),
        }
    }

    /// バイト列から Hello をデコードする
    ///
    /// # エラー
    /// - `ProtoError::DecodeFailed`: protobuf デコード失敗
    /// - `ProtoError::InvalidProtocolVersion`: バージョン不一致
    /// - `ProtoError::UnknownEnumValue`: phase が範囲外
    pub fn decode_from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        let hello = Hello::decode(bytes)?;
        if hello.version != A12_VERSION {
            return Err(ProtoError::InvalidProtocolVersion(hello.version));
        }
        HelloPhase::try_from(hello.phase).map_err(|_| ProtoError::UnknownEnumValue(hello.phase))?;
        Ok(hello)
    }

    /// 検証済みの phase
    pub fn hello_phase(&self) -> HelloPhase {
        HelloPhase::try_from(self.phase).unwrap_or(HelloPhase::Ephemeral)
    }
}

/// 新しいチャンネル（サブセグメント）の通知
#[derive(Clone, PartialEq, Message)]
pub struct ChannelNew {
    #[prost(uint32, tag = "1")]
    pub segkind: u32,
    /// 相手側の SEGREQ と対応付けるクッキー
    #[prost(uint32, tag = "2")]
    pub cookie: u32,
    /// 出力セグメント（サーバー側がバッファを埋める）か
    #[prost(bool, tag = "3")]
    pub output: bool,
}

/// チャンネルの終了通知（最後のメッセージ付き）
#[derive(Clone, PartialEq, Message)]
pub struct Shutdown {
    #[prost(string, tag = "1")]
    pub last_words: String,
}

/// チャンネルの破棄。チャンネル 0 なら接続全体
#[derive(Clone, PartialEq, Message)]
pub struct Close {}

/// バイナリ転送の開始通知
#[derive(Clone, PartialEq, Message)]
pub struct BlobAnnounce {
    #[prost(uint64, tag = "1")]
    pub stream_id: u64,
    #[prost(enumeration = "BlobKind", tag = "2")]
    pub kind: i32,
    /// サイズ不明のストリームか
    #[prost(bool, tag = "3")]
    pub streaming: bool,
    #[prost(uint64, tag = "4")]
    pub known_size: u64,
    /// 16 バイト、または空（不明）
    #[prost(bytes = "vec", tag = "5")]
    pub checksum: Vec<u8>,
}

impl BlobAnnounce {
    /// 検証済みの種別
    pub fn blob_kind(&self) -> Result<BlobKind, ProtoError> {
        BlobKind::try_from(self.kind).map_err(|_| ProtoError::UnknownEnumValue(self.kind))
    }
}

/// 受信側が転送を受け入れた
#[derive(Clone, PartialEq, Message)]
pub struct BlobAccept {
    #[prost(uint64, tag = "1")]
    pub stream_id: u64,
}

/// 送信側がすべて送り終えた
#[derive(Clone, PartialEq, Message)]
pub struct BlobComplete {
    #[prost(uint64, tag = "1")]
    pub stream_id: u64,
    #[prost(uint64, tag = "2")]
    pub total: u64,
}

/// 転送の中止
#[derive(Clone, PartialEq, Message)]
pub struct BlobCancel {
    #[prost(uint64, tag = "1")]
    pub stream_id: u64,
    /// このメッセージの送り手がストリームの送信側か
    #[prost(bool, tag = "2")]
    pub from_sender: bool,
}

/// 制御フレームの本体
#[derive(Clone, PartialEq, Message)]
pub struct Control {
    #[prost(oneof = "control::Command", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub command: Option<control::Command>,
}

pub mod control {
    /// 制御コマンド
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Command {
        #[prost(message, tag = "1")]
        ChannelNew(super::ChannelNew),
        #[prost(message, tag = "2")]
        Shutdown(super::Shutdown),
        #[prost(message, tag = "3")]
        Close(super::Close),
        #[prost(message, tag = "4")]
        BlobAnnounce(super::BlobAnnounce),
        #[prost(message, tag = "5")]
        BlobAccept(super::BlobAccept),
        #[prost(message, tag = "6")]
        BlobComplete(super::BlobComplete),
        #[prost(message, tag = "7")]
        BlobCancel(super::BlobCancel),
    }
}

pub use control::Command;

impl Control {
    pub fn new(command: Command) -> Self {
        Control {
            command: Some(command),
        }
    }

    /// バイト列から Control をデコードし、コマンドを取り出す
    pub fn decode_command(bytes: &[u8]) -> Result<Command, ProtoError> {
        let control = Control::decode(bytes)?;
        control.command.ok_or(ProtoError::MissingCommand)
    }
}

/// Protobuf メッセージをバイト列にエンコードする
pub fn encode_message<M: Message>(msg: &M) -> Vec<u8> {
    msg.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let hello = Hello::new(HelloPhase::Identity, &[9u8; 32]);
        let bytes = encode_message(&hello);
        let decoded = Hello::decode_from_bytes(&bytes).unwrap();

        assert_eq!(decoded.hello_phase(), HelloPhase::Identity);
        assert_eq!(decoded.public_key, alloc::vec![9u8; 32]);
    }

    #[test]
    fn test_hello_wrong_version_rejected() {
        let mut hello = Hello::new(HelloPhase::Ephemeral, &[1u8; 32]);
        hello.version = A12_VERSION + 1;
        let bytes = encode_message(&hello);
        assert_eq!(
            Hello::decode_from_bytes(&bytes),
            Err(ProtoError::InvalidProtocolVersion(A12_VERSION + 1))
        );
    }

    #[test]
    fn test_hello_unknown_phase_rejected() {
        let mut hello = Hello::new(HelloPhase::Ephemeral, &[1u8; 32]);
        hello.phase = 7;
        let bytes = encode_message(&hello);
        assert_eq!(
            Hello::decode_from_bytes(&bytes),
            Err(ProtoError::UnknownEnumValue(7))
        );
    }

    #[test]
    fn test_control_announce_roundtrip() {
        let announce = BlobAnnounce {
            stream_id: 42,
            kind: BlobKind::Font as i32,
            streaming: false,
            known_size: 1024,
            checksum: alloc::vec![0xCC; 16],
        };
        let bytes = encode_message(&Control::new(Command::BlobAnnounce(announce.clone())));

        match Control::decode_command(&bytes).unwrap() {
            Command::BlobAnnounce(decoded) => {
                assert_eq!(decoded, announce);
                assert_eq!(decoded.blob_kind(), Ok(BlobKind::Font));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_control_without_command() {
        let bytes = encode_message(&Control { command: None });
        assert_eq!(Control::decode_command(&bytes), Err(ProtoError::MissingCommand));
    }

    #[test]
    fn test_blob_priority_order() {
        let mut kinds = [BlobKind::Blob, BlobKind::State, BlobKind::FontSuppl, BlobKind::Font];
        kinds.sort_by_key(|k| k.priority());
        assert_eq!(
            kinds,
            [BlobKind::Font, BlobKind::FontSuppl, BlobKind::State, BlobKind::Blob]
        );
    }
}
