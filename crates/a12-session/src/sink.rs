//! 表示側（デコード結果の受け取り手）

use alloc::vec::Vec;

use a12_proto::{AudioHeader, Event, VideoHeader};

/// アプリケーションが持つ表示面テーブルへのハンドル
///
/// セッションは表示メモリを所有しない。表示面を解放する前に
/// `detach_destination` を呼ぶこと。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationId(pub u32);

/// デコード済みの映像フレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedVideo {
    pub header: VideoHeader,
    /// 0xRRGGBBAA のピクセル列（width * height）
    pub pixels: Vec<u32>,
}

/// デコード済みの音声フレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub header: AudioHeader,
    /// チャンネル順にインターリーブされたサンプル
    pub samples: Vec<i16>,
}

/// デコード結果の受け取り手
///
/// `unpack` の間だけ借用される。イベント以外は既定で何もしない。
pub trait DisplaySink {
    /// イベント 1 つにつき 1 回呼ばれる
    fn on_event(&mut self, dest: DestinationId, channel: u8, event: &Event);

    fn on_video(&mut self, _dest: DestinationId, _channel: u8, _frame: DecodedVideo) {}

    fn on_audio(&mut self, _dest: DestinationId, _channel: u8, _frame: DecodedAudio) {}

    /// 相手が新しいチャンネルを開いた。宛先は後から `set_destination` で結びつける
    fn on_channel_new(&mut self, _channel: u8, _segkind: u32, _cookie: u32, _output: bool) {}

    fn on_channel_shutdown(&mut self, _channel: u8, _last_words: &str) {}

    /// チャンネルが破棄された（チャンネル 0 ならセッション全体）
    fn on_channel_close(&mut self, _channel: u8, _dest: Option<DestinationId>) {}
}

/// 何も受け取らないシンク（ハンドシェイクだけを進めたい場合など）
pub struct NullSink;

impl DisplaySink for NullSink {
    fn on_event(&mut self, _dest: DestinationId, _channel: u8, _event: &Event) {}
}
