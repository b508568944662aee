//! File source handling: decompression and multi-format parsing.
//!
//! A file source goes through two stages before it looks like any other
//! response payload: `decompress` (gzip/deflate/zip, or magic-byte
//! auto-detection) and `parse` (CSV/JSON/XML, or content sniffing). The
//! result is a `serde_json::Value` that the extractor navigates with the
//! same dot-path logic as HTTP responses.

mod decompress;
mod parse;

pub use decompress::decompress;
pub use parse::parse;
