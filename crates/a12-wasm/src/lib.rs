//! # a12-wasm
//!
//! wasm-bindgen エクスポート：JS（ブラウザ / Node.js）から呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { A12Endpoint, init_panic_hook } from '../a12-wasm-pkg/a12_wasm';
//!
//! // パニック時のスタックトレースを有効化（開発時）
//! init_panic_hook();
//!
//! // 接続側（省略時は既定の共有シークレット）
//! const ep = A12Endpoint.open("my secret");
//! socket.send(ep.flush());
//!
//! // 受信
//! socket.onmessage = (msg) => {
//!     const records = JSON.parse(ep.unpack(new Uint8Array(msg.data)));
//!     for (const rec of records) {
//!         if (rec.type === "event") handleEvent(rec);
//!         if (rec.type === "video") draw(ep.takeFrame(rec.dest));
//!     }
//!     const out = ep.flush("all");
//!     if (out.length > 0) socket.send(out);
//! };
//!
//! // 送信（混雑時は false。flush してから再送する）
//! if (!ep.enqueue(2, 1, [65, 0, 0, 0, 0, 0], "A")) {
//!     socket.send(ep.flush());
//! }
//! ```

use wasm_bindgen::prelude::*;

pub mod endpoint;
pub mod records;

pub use endpoint::{parse_blob_mode, trusting_options, A12Endpoint};
pub use records::{Inbox, Record, StatsJson};

/// パニック時にブラウザコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Base64 公開鍵（43文字）を 32 バイトの Uint8Array に変換するユーティリティ
///
/// `A12Endpoint.build` に渡す前の検証用。
///
/// # エラー
/// - Base64 デコード失敗
/// - 鍵長が 32 バイト以外
#[wasm_bindgen(js_name = "decodePublicKey")]
pub fn decode_public_key(key_b64: &str) -> Result<js_sys::Uint8Array, JsError> {
    let key = a12_crypto::decode_public_key(key_b64).map_err(|e| JsError::new(&format!("{}", e)))?;
    let arr = js_sys::Uint8Array::new_with_length(32);
    arr.copy_from(key.as_bytes());
    Ok(arr)
}
