//! Common utilities and byte-level codecs

pub mod bytes;
pub mod splice;
pub mod text;

pub use bytes::{decode_synchsafe, encode_synchsafe, read_u24_be, u24_be_bytes, write_u24_be};
pub use splice::{lengthen, shorten};
pub use text::TextEncoding;
