//! 映像/音声フレームの分割と再組み立て
//!
//! ## Fragment Wire Format
//! ```text
//! [frame_id: u64 BE (8 bytes)]
//! [fragment_num_with_final: u16 BE (2 bytes)]
//!   - bit 15: is_final (最後の Fragment の場合 1)
//!   - bit 0..14: fragment 番号 (0 始まり)
//! [payload: variable]
//! ```
//!
//! 下位のバイトストリームは順序を保証するので、通常は番号順に届く。
//! 再組み立てのサイズ上限を超えた時点でプロトコル違反とする。

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::TransportError;

/// 再組み立て後の既定の上限（32 MiB）
pub const MAX_REASSEMBLY: usize = 32 * 1024 * 1024;

/// 分割された映像/音声フレームの 1 片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// この Fragment が属するメディアフレームの ID
    pub frame_id: u64,
    /// Fragment 番号（0 始まり）
    pub fragment_num: u16,
    /// 最後の Fragment かどうか
    pub is_final: bool,
    pub payload: Vec<u8>,
}

impl Fragment {
    /// Fragment ヘッダー長（frame_id: 8 + fragment_num_with_final: 2）
    pub const HEADER_LEN: usize = 10;

    /// フレーム本体（開封後）から Fragment を復元する
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(TransportError::TooShort);
        }

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&bytes[0..8]);
        let frame_id = u64::from_be_bytes(id_bytes);

        let frag_word = u16::from_be_bytes([bytes[8], bytes[9]]);

        Ok(Fragment {
            frame_id,
            fragment_num: frag_word & 0x7FFF,
            is_final: (frag_word >> 15) == 1,
            payload: bytes[Self::HEADER_LEN..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.frame_id.to_be_bytes());
        let frag_word: u16 = self.fragment_num | if self.is_final { 0x8000 } else { 0 };
        bytes.extend_from_slice(&frag_word.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// メディアフレームを Fragment 列に分割する
///
/// チャンネルごとではなく送信側セッションに 1 つ。frame_id は単調増加。
pub struct Fragmenter {
    next_frame_id: u64,
    /// Fragment ペイロードの最大バイト数
    max_payload: usize,
}

impl Fragmenter {
    /// # 引数
    /// - `max_frame_payload`: フレーム本体の上限。Fragment ヘッダー分を差し引いて使う
    pub fn new(max_frame_payload: usize) -> Self {
        Fragmenter {
            next_frame_id: 1,
            max_payload: max_frame_payload.saturating_sub(Fragment::HEADER_LEN).max(1),
        }
    }

    /// メディアフレームを分割する。空でも Fragment 1 つを返す
    pub fn make_fragments(&mut self, frame: &[u8]) -> Result<Vec<Fragment>, TransportError> {
        let id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        if frame.is_empty() {
            return Ok(alloc::vec![Fragment {
                frame_id: id,
                fragment_num: 0,
                is_final: true,
                payload: alloc::vec![],
            }]);
        }

        let num_chunks = frame.len().div_ceil(self.max_payload);
        if num_chunks > 0x8000 {
            return Err(TransportError::TooManyFragments);
        }

        Ok(frame
            .chunks(self.max_payload)
            .enumerate()
            .map(|(i, chunk)| Fragment {
                frame_id: id,
                fragment_num: i as u16,
                is_final: i == num_chunks - 1,
                payload: chunk.to_vec(),
            })
            .collect())
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

/// Fragment を受け取り、メディアフレームに再組み立てする
///
/// チャンネルごとに 1 つ持つ。新しい frame_id が来たら組み立て中のものは捨てる。
pub struct FragmentAssembly {
    current_id: Option<u64>,
    arrived: BTreeMap<u16, Fragment>,
    final_fragment_num: Option<u16>,
    /// 受信済みペイロードの合計
    size: usize,
    max_size: usize,
}

impl FragmentAssembly {
    pub fn new() -> Self {
        Self::with_limit(MAX_REASSEMBLY)
    }

    pub fn with_limit(max_size: usize) -> Self {
        FragmentAssembly {
            current_id: None,
            arrived: BTreeMap::new(),
            final_fragment_num: None,
            size: 0,
            max_size,
        }
    }

    /// Fragment を追加する
    ///
    /// # 戻り値
    /// - `Ok(Some(bytes))`: すべて揃い、再組み立てしたフレーム
    /// - `Ok(None)`: まだ足りない
    /// - `Err(ReassemblyTooLarge)`: 上限超過
    pub fn add_fragment(&mut self, frag: Fragment) -> Result<Option<Vec<u8>>, TransportError> {
        self.reset_if_new_id(frag.frame_id);

        if frag.is_final {
            self.final_fragment_num = Some(frag.fragment_num);
        }

        self.size += frag.payload.len();
        if let Some(old) = self.arrived.insert(frag.fragment_num, frag) {
            self.size -= old.payload.len();
        }
        if self.size > self.max_size {
            self.clear();
            return Err(TransportError::ReassemblyTooLarge { max: self.max_size });
        }

        Ok(self.try_assemble())
    }

    /// 新しい frame_id が来たら古い状態をリセットする
    pub fn reset_if_new_id(&mut self, id: u64) -> bool {
        match self.current_id {
            Some(current) if current == id => false,
            _ => {
                self.clear();
                self.current_id = Some(id);
                true
            }
        }
    }

    fn clear(&mut self) {
        self.arrived.clear();
        self.final_fragment_num = None;
        self.size = 0;
    }

    fn try_assemble(&mut self) -> Option<Vec<u8>> {
        let final_num = self.final_fragment_num?;
        if (0..=final_num).any(|num| !self.arrived.contains_key(&num)) {
            return None;
        }

        let mut assembled = Vec::with_capacity(self.size);
        for frag in self.arrived.values().take(final_num as usize + 1) {
            assembled.extend_from_slice(&frag.payload);
        }
        self.clear();
        self.current_id = None;
        Some(assembled)
    }

    /// 組み立て途中のバイト数
    pub fn pending_bytes(&self) -> usize {
        self.size
    }
}

impl Default for FragmentAssembly {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_bytes_layout() {
        let frag = Fragment {
            frame_id: 42,
            fragment_num: 3,
            is_final: true,
            payload: alloc::vec![1, 2, 3],
        };
        let bytes = frag.to_bytes();
        assert_eq!(&bytes[..8], &42u64.to_be_bytes());
        assert_eq!(u16::from_be_bytes([bytes[8], bytes[9]]), 0x8003);
        assert_eq!(Fragment::from_bytes(&bytes).unwrap(), frag);
    }

    #[test]
    fn test_fragment_too_short() {
        assert_eq!(Fragment::from_bytes(&[0u8; 9]), Err(TransportError::TooShort));
    }

    #[test]
    fn test_fragmenter_splits_on_payload_limit() {
        let mut fragmenter = Fragmenter::new(Fragment::HEADER_LEN + 10);
        let frags = fragmenter.make_fragments(&[0u8; 25]).unwrap();

        assert_eq!(frags.len(), 3);
        assert!(!frags[0].is_final);
        assert!(frags[2].is_final);
        assert_eq!(frags[2].payload.len(), 5);
        assert!(frags.iter().all(|f| f.frame_id == 1));

        let next = fragmenter.make_fragments(&[1]).unwrap();
        assert_eq!(next[0].frame_id, 2);
    }

    #[test]
    fn test_fragmenter_assembly_roundtrip() {
        let mut fragmenter = Fragmenter::new(64);
        let original: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let mut assembly = FragmentAssembly::new();
        let mut result = None;
        for frag in fragmenter.make_fragments(&original).unwrap() {
            result = assembly.add_fragment(frag).unwrap();
        }
        assert_eq!(result.unwrap(), original);
        assert_eq!(assembly.pending_bytes(), 0);
    }

    #[test]
    fn test_assembly_out_of_order() {
        let mut assembly = FragmentAssembly::new();
        let second = Fragment {
            frame_id: 1,
            fragment_num: 1,
            is_final: true,
            payload: alloc::vec![4, 5],
        };
        let first = Fragment {
            frame_id: 1,
            fragment_num: 0,
            is_final: false,
            payload: alloc::vec![1, 2, 3],
        };
        assert_eq!(assembly.add_fragment(second).unwrap(), None);
        assert_eq!(
            assembly.add_fragment(first).unwrap(),
            Some(alloc::vec![1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn test_assembly_new_id_discards_partial() {
        let mut assembly = FragmentAssembly::new();
        assembly
            .add_fragment(Fragment {
                frame_id: 1,
                fragment_num: 0,
                is_final: false,
                payload: alloc::vec![1, 2, 3],
            })
            .unwrap();

        let result = assembly
            .add_fragment(Fragment {
                frame_id: 2,
                fragment_num: 0,
                is_final: true,
                payload: alloc::vec![9],
            })
            .unwrap();
        assert_eq!(result, Some(alloc::vec![9]));
    }

    #[test]
    fn test_assembly_limit() {
        let mut assembly = FragmentAssembly::with_limit(8);
        let frag = Fragment {
            frame_id: 1,
            fragment_num: 0,
            is_final: false,
            payload: alloc::vec![0; 6],
        };
        assembly.add_fragment(frag.clone()).unwrap();

        let over = Fragment {
            fragment_num: 1,
            ..frag
        };
        assert_eq!(
            assembly.add_fragment(over),
            Err(TransportError::ReassemblyTooLarge { max: 8 })
        );
        assert_eq!(assembly.pending_bytes(), 0);
    }
}
