//! 転送元・転送先の抽象
//!
//! セッションはファイルディスクリプタを持たない。埋め込み側が
//! [`BlobSource`] / [`BlobSink`] を実装したオブジェクトを渡し、
//! 転送が終わるとハンドラー経由で所有権を返す。

use alloc::vec::Vec;

use crate::error::BlobError;

/// 送信側のデータ源
pub trait BlobSource {
    /// 最大 `buf.len()` バイトを読み込む。0 は終端
    ///
    /// まだデータがないストリーミングソースは `BlobError::WouldBlock` を返す。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BlobError>;

    /// 全体のサイズが分かっていれば返す
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// 受信側の書き込み先
pub trait BlobSink {
    fn write(&mut self, data: &[u8]) -> Result<(), BlobError>;

    /// メモリ上に保持している場合は内容を取り出す
    fn take_bytes(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// メモリ上のバイト列を送るソース
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        MemorySource { data, pos: 0 }
    }

    /// 読み出し済みのバイト数
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl BlobSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BlobError> {
        let rest = &self.data[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// 受信内容をメモリに溜めるシンク
#[derive(Default)]
pub struct MemorySink {
    data: Vec<u8>,
    /// これを超える書き込みはエラー
    limit: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        MemorySink {
            data: Vec::new(),
            limit: Some(limit),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl BlobSink for MemorySink {
    fn write(&mut self, data: &[u8]) -> Result<(), BlobError> {
        if let Some(limit) = self.limit {
            if self.data.len() + data.len() > limit {
                return Err(BlobError::Io(alloc::format!(
                    "memory sink limit {} exceeded",
                    limit
                )));
            }
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn take_bytes(&mut self) -> Option<Vec<u8>> {
        Some(core::mem::take(&mut self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads_in_chunks() {
        let mut src = MemorySource::new(alloc::vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];

        assert_eq!(src.read(&mut buf), Ok(2));
        assert_eq!(buf, [1, 2]);
        assert_eq!(src.read(&mut buf), Ok(2));
        assert_eq!(src.read(&mut buf), Ok(1));
        assert_eq!(buf[0], 5);
        assert_eq!(src.read(&mut buf), Ok(0));
        assert_eq!(src.size_hint(), Some(5));
    }

    #[test]
    fn test_memory_sink_limit() {
        let mut sink = MemorySink::with_limit(4);
        sink.write(&[1, 2, 3]).unwrap();
        assert!(matches!(sink.write(&[4, 5]), Err(BlobError::Io(_))));
        assert_eq!(sink.take_bytes(), Some(alloc::vec![1, 2, 3]));
    }
}
