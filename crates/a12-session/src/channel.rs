//! チャンネル表
//!
//! 1 本の接続上の論理チャンネル（0 = 主チャンネル、1..=255 = サブセグメント）。
//! 宛先が結びついていないチャンネル向けのイベント・映像・音声は
//! 上限付きで溜めておき、宛先が決まった後の `unpack` で再生する。

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::vec::Vec;

use a12_transport::{FragmentAssembly, FrameClass};

use crate::error::SessionError;
use crate::sink::DestinationId;

/// 1 チャンネル分の状態
pub struct Channel {
    pub id: u8,
    pub destination: Option<DestinationId>,
    pub segkind: u32,
    pub cookie: u32,
    /// 出力セグメント（受け手がバッファを埋める側）か
    pub output: bool,
    pub(crate) video: FragmentAssembly,
    pub(crate) audio: FragmentAssembly,
}

impl Channel {
    fn new(id: u8, segkind: u32, cookie: u32, output: bool, max_media: usize) -> Self {
        Channel {
            id,
            destination: None,
            segkind,
            cookie,
            output,
            video: FragmentAssembly::with_limit(max_media),
            audio: FragmentAssembly::with_limit(max_media),
        }
    }
}

/// 宛先待ちのフレーム
pub(crate) struct Deferred {
    pub channel: u8,
    pub class: FrameClass,
    pub body: Vec<u8>,
}

pub(crate) struct ChannelTable {
    channels: BTreeMap<u8, Channel>,
    /// 閉じた後、まだ開き直されていないチャンネル
    closed: BTreeSet<u8>,
    deferred: VecDeque<Deferred>,
    deferred_bytes: usize,
    deferred_limit: usize,
    max_media: usize,
}

impl ChannelTable {
    /// チャンネル 0 だけを持つ表
    pub fn new(deferred_limit: usize, max_media: usize) -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(0, Channel::new(0, 0, 0, false, max_media));
        ChannelTable {
            channels,
            closed: BTreeSet::new(),
            deferred: VecDeque::new(),
            deferred_bytes: 0,
            deferred_limit,
            max_media,
        }
    }

    pub fn get(&self, id: u8) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn contains(&self, id: u8) -> bool {
        self.channels.contains_key(&id)
    }

    /// 一度開いて閉じたチャンネルか（閉じる前に送られたフレームが遅れて届きうる）
    pub fn was_closed(&self, id: u8) -> bool {
        self.closed.contains(&id)
    }

    pub fn ids(&self) -> Vec<u8> {
        self.channels.keys().copied().collect()
    }

    /// チャンネルを追加する。既にあればエラー
    pub fn insert(&mut self, id: u8, segkind: u32, cookie: u32, output: bool) -> Result<(), SessionError> {
        if self.channels.contains_key(&id) {
            return Err(SessionError::ChannelExists(id));
        }
        self.closed.remove(&id);
        self.channels
            .insert(id, Channel::new(id, segkind, cookie, output, self.max_media));
        Ok(())
    }

    /// 相手からの ChannelNew。同じ ID があれば属性を上書きする
    pub fn upsert(&mut self, id: u8, segkind: u32, cookie: u32, output: bool) {
        let max_media = self.max_media;
        self.closed.remove(&id);
        let ch = self
            .channels
            .entry(id)
            .or_insert_with(|| Channel::new(id, segkind, cookie, output, max_media));
        ch.segkind = segkind;
        ch.cookie = cookie;
        ch.output = output;
    }

    /// チャンネルを取り除く。溜まっていたフレームも捨てる
    pub fn remove(&mut self, id: u8) -> Option<Channel> {
        let removed = self.channels.remove(&id)?;
        self.closed.insert(id);
        self.drop_deferred(id);
        Some(removed)
    }

    /// すべてのチャンネルを取り除く
    pub fn clear(&mut self) -> Vec<Channel> {
        self.deferred.clear();
        self.deferred_bytes = 0;
        core::mem::take(&mut self.channels).into_values().collect()
    }

    pub fn set_destination(&mut self, id: u8, dest: DestinationId) -> Result<(), SessionError> {
        let ch = self.channels.get_mut(&id).ok_or(SessionError::NoSuchChannel(id))?;
        ch.destination = Some(dest);
        Ok(())
    }

    pub fn detach_destination(&mut self, id: u8) -> Option<DestinationId> {
        self.channels.get_mut(&id)?.destination.take()
    }

    /// このチャンネルのフレームを今すぐ配送できるか
    ///
    /// 宛先があり、先に溜まっているフレームがないこと。
    pub fn deliverable(&self, id: u8) -> Option<DestinationId> {
        let dest = self.channels.get(&id)?.destination?;
        if self.deferred.iter().any(|d| d.channel == id) {
            return None;
        }
        Some(dest)
    }

    /// 宛先待ちのフレームを溜める
    pub fn defer(&mut self, channel: u8, class: FrameClass, body: Vec<u8>) -> Result<(), SessionError> {
        if self.deferred_bytes + body.len() > self.deferred_limit {
            return Err(SessionError::UnboundOverflow {
                limit: self.deferred_limit,
            });
        }
        self.deferred_bytes += body.len();
        self.deferred.push_back(Deferred {
            channel,
            class,
            body,
        });
        Ok(())
    }

    /// 宛先が決まったチャンネルの溜まったフレームを、到着順に取り出す
    pub fn take_ready(&mut self) -> Vec<(DestinationId, Deferred)> {
        let mut ready = Vec::new();
        let mut kept = VecDeque::new();
        for d in self.deferred.drain(..) {
            match self.channels.get(&d.channel).and_then(|c| c.destination) {
                Some(dest) => {
                    self.deferred_bytes -= d.body.len();
                    ready.push((dest, d));
                }
                None => kept.push_back(d),
            }
        }
        self.deferred = kept;
        ready
    }

    /// 再生待ちのフレームがある（宛先が決まったもの）
    pub fn has_ready(&self) -> bool {
        self.deferred.iter().any(|d| {
            self.channels
                .get(&d.channel)
                .is_some_and(|c| c.destination.is_some())
        })
    }

    pub fn deferred_bytes(&self) -> usize {
        self.deferred_bytes
    }

    fn drop_deferred(&mut self, id: u8) {
        let mut freed = 0;
        self.deferred.retain(|d| {
            if d.channel == id {
                freed += d.body.len();
                false
            } else {
                true
            }
        });
        self.deferred_bytes -= freed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_channel_exists() {
        let table = ChannelTable::new(1024, 1024);
        assert!(table.contains(0));
        assert_eq!(table.ids(), alloc::vec![0]);
    }

    #[test]
    fn test_insert_twice_fails() {
        let mut table = ChannelTable::new(1024, 1024);
        table.insert(2, 1, 77, true).unwrap();
        assert_eq!(table.insert(2, 1, 77, true), Err(SessionError::ChannelExists(2)));
        assert_eq!(table.get(2).map(|c| c.cookie), Some(77));
    }

    #[test]
    fn test_deferred_replay_after_bind() {
        let mut table = ChannelTable::new(1024, 1024);
        table.upsert(1, 0, 0, false);
        table.defer(1, FrameClass::Event, alloc::vec![1; 10]).unwrap();
        table.defer(1, FrameClass::Event, alloc::vec![2; 10]).unwrap();

        assert!(!table.has_ready());
        assert!(table.take_ready().is_empty());

        table.set_destination(1, DestinationId(9)).unwrap();
        assert!(table.has_ready());
        // 溜まっている間は直接配送しない
        assert_eq!(table.deliverable(1), None);

        let ready = table.take_ready();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].0, DestinationId(9));
        assert_eq!(ready[0].1.body[0], 1);
        assert_eq!(ready[1].1.body[0], 2);
        assert_eq!(table.deferred_bytes(), 0);
        assert_eq!(table.deliverable(1), Some(DestinationId(9)));
    }

    #[test]
    fn test_deferred_overflow() {
        let mut table = ChannelTable::new(16, 1024);
        table.defer(0, FrameClass::Video, alloc::vec![0; 10]).unwrap();
        assert_eq!(
            table.defer(0, FrameClass::Video, alloc::vec![0; 10]),
            Err(SessionError::UnboundOverflow { limit: 16 })
        );
    }

    #[test]
    fn test_remove_drops_deferred() {
        let mut table = ChannelTable::new(1024, 1024);
        table.upsert(3, 0, 0, false);
        table.defer(3, FrameClass::Audio, alloc::vec![0; 8]).unwrap();
        assert!(table.remove(3).is_some());
        assert_eq!(table.deferred_bytes(), 0);
        assert_eq!(table.detach_destination(3), None);
    }

    #[test]
    fn test_closed_until_reopened() {
        let mut table = ChannelTable::new(1024, 1024);
        assert!(!table.was_closed(4));
        table.insert(4, 0, 0, false).unwrap();
        table.remove(4);
        assert!(table.was_closed(4));
        assert!(!table.contains(4));

        table.upsert(4, 0, 0, false);
        assert!(!table.was_closed(4));
    }
}
