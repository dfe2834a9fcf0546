//! # a12-transport
//!
//! A12 のフレーム層。
//!
//! 1 本のバイトストリーム上に、種別とチャンネル ID 付きのフレームを並べる。
//!
//! ## フレームの Wire Format
//!
//! ```text
//! [class: u8][channel: u8][length: u32 BE][sealed body: length bytes]
//!  └──────── AAD (6 bytes) ────────────┘   └ AES-256-OCB3 暗号文 + 16 バイトタグ
//! ```
//!
//! ## 本体の中身
//!
//! ```text
//! Audio / Video : [frame_id: u64][fragment_num_with_final: u16][payload...]
//! Blob          : [stream_id: u64][offset: u64][data...]
//! その他        : a12-proto のメッセージ
//! ```

#![no_std]
extern crate alloc;

pub mod blob;
pub mod codec;
pub mod error;
pub mod fragment;
pub mod frame;

pub use blob::{BlobChunk, BLOB_CHUNK_HEADER};
pub use codec::{DecodeState, FrameDecoder};
pub use error::TransportError;
pub use fragment::{Fragment, FragmentAssembly, Fragmenter, MAX_REASSEMBLY};
pub use frame::{
    seal_frame, seal_frame_into, Frame, FrameClass, FrameHeader, FRAME_HEADER_SIZE,
    MAX_FRAME_BODY, MAX_FRAME_PAYLOAD,
};
