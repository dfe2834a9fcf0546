//! 診断トレース
//!
//! トレースの出力先は埋め込み側の `tracing` subscriber が決める。
//! セッションはどのグループを出すかのマスクだけを持つ。

use bitflags::bitflags;

bitflags! {
    /// トレースグループ
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TraceGroups: u32 {
        const VIDEO     = 1;
        const AUDIO     = 2;
        const SYSTEM    = 4;
        const EVENT     = 8;
        const TRANSFER  = 16;
        const DEBUG     = 32;
        const MISSING   = 64;
        const ALLOC     = 128;
        const CRYPTO    = 256;
        const VDETAIL   = 512;
        const BTRANSFER = 1024;
    }
}

/// セッションごとの診断設定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diagnostics {
    mask: TraceGroups,
}

impl Diagnostics {
    pub fn new(mask: TraceGroups) -> Self {
        Diagnostics { mask }
    }

    /// すべてのグループを有効にする
    pub fn verbose() -> Self {
        Self::new(TraceGroups::all())
    }

    pub fn mask(&self) -> TraceGroups {
        self.mask
    }

    pub fn set_mask(&mut self, mask: TraceGroups) {
        self.mask = mask;
    }

    pub fn enabled(&self, group: TraceGroups) -> bool {
        self.mask.intersects(group)
    }
}

/// マスクで有効なグループのときだけ `tracing::debug!` を出す
///
/// ```ignore
/// a12_trace!(self.diag, VIDEO, channel, bytes = n, "video frame queued");
/// ```
macro_rules! a12_trace {
    ($diag:expr, $group:ident, $($arg:tt)+) => {
        if $diag.enabled($crate::diag::TraceGroups::$group) {
            tracing::debug!(group = stringify!($group), $($arg)+);
        }
    };
}

pub(crate) use a12_trace;
