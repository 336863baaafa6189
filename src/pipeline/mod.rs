//! 流水线模块：把后端的原始字节流解码为文本片段，并附加进度与取消语义。
//!
//! # Streaming Pipeline
//!
//! ```text
//! HTTP bytes → Decoder (SSE / NDJSON) → map_frames (adapter) → FragmentStream → caller
//!                 │                          │                      │
//!              framing                 token extraction     progress events,
//!                                                           cancellation
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | Frame decoders and frame-to-fragment mapping |
//! | [`fragments`] | [`FragmentStream`], the caller-facing fragment sequence |

pub mod decode;
pub mod fragments;

pub use decode::{map_frames, Decoder, Frame, NdjsonDecoder, SseDecoder};
pub use fragments::{FragmentStream, OpenFuture};
