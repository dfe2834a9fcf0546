//! 鍵素材用のスコープ付きメモリ
//!
//! ヒープに確保し、解放時（エラー経路を含むすべての経路）で必ずゼロ埋めする。
//! 値はムーブしてもヒープ上の実体はコピーされない。
//! レジスタやスタックへの一時的な漏れまでは防げない。

use alloc::boxed::Box;
use core::fmt;

use zeroize::Zeroize;

/// 解放時にゼロクリアされる鍵素材
pub struct Sensitive<T: Zeroize>(Box<T>);

impl<T: Zeroize> Sensitive<T> {
    /// 値をヒープに移して保護する
    pub fn new(value: T) -> Self {
        Sensitive(Box::new(value))
    }

    /// 中身への参照
    pub fn expose(&self) -> &T {
        &self.0
    }

    /// 中身への可変参照（その場で鍵を書き込むとき用）
    pub fn expose_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<const N: usize> Sensitive<[u8; N]> {
    /// ゼロ埋めの領域を確保する
    pub fn zeroed() -> Self {
        Sensitive(Box::new([0u8; N]))
    }

    /// スライスからコピーして確保する。長さが違えば `None`
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != N {
            return None;
        }
        let mut out = Self::zeroed();
        out.0.copy_from_slice(bytes);
        Some(out)
    }
}

impl<T: Zeroize + Clone> Clone for Sensitive<T> {
    fn clone(&self) -> Self {
        Sensitive(Box::new((*self.0).clone()))
    }
}

impl<T: Zeroize> Drop for Sensitive<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_length_checked() {
        assert!(Sensitive::<[u8; 4]>::from_slice(&[1, 2, 3]).is_none());
        let s = Sensitive::<[u8; 4]>::from_slice(&[1, 2, 3, 4]).unwrap();
        assert_eq!(s.expose(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_debug_redacts() {
        let s = Sensitive::new([0xAAu8; 8]);
        assert_eq!(alloc::format!("{:?}", s), "Sensitive(..)");
    }

    #[test]
    fn test_zeroize_on_request() {
        let mut s = Sensitive::new([0x55u8; 16]);
        s.expose_mut().zeroize();
        assert_eq!(s.expose(), &[0u8; 16]);
    }
}
