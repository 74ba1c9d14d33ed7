//! Tag/value codec.
//!
//! A value is a 6-byte [`TagNode`](crate::wire::TagNode) plus optional
//! auxiliary bytes. Segments store every tag first and then the auxiliary
//! bytes of each tag in table order; the two are never interleaved.
//! References to heap objects are numeric IDs resolved through a
//! [`LoadContext`](crate::context::LoadContext) on the way in and a
//! [`SaveContext`](crate::context::SaveContext) on the way out.

mod decode;
mod encode;

pub use decode::ValueLoader;
pub use encode::{encode_float, ValueSaver};

#[cfg(test)]
#[path = "../tests/codec_tests.rs"]
mod tests;
