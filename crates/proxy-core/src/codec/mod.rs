//! File tree payload codec.
//!
//! A directory tree travels as a single binary message holding a
//! boundary-delimited multipart container, one part per regular file. Each
//! part carries the file's slash-separated path relative to the tree root in
//! the `X-Concourse-Filename` header, and the raw file content as its body.
//!
//! The boundary is not sent out of band: the decoder recovers it from the
//! first line of the payload (`--<boundary>`, or `--<boundary>--` for an
//! empty container). That quirk is confined to [`decode::boundary_from_payload`],
//! so a transport that carries the boundary separately only needs to call
//! [`decode::decode_with_boundary`] instead.
//!
//! This module is the only place with byte-level knowledge of the format.

pub mod decode;
pub mod encode;

use bytes::Bytes;
use std::collections::BTreeMap;

pub use decode::{boundary_from_payload, decode_into, decode_with_boundary, PartReader, RawPart};
pub use encode::{encode_directory, encode_files};

const CRLF: &[u8] = b"\r\n";
const DASHES: &[u8] = b"--";

/// One file carried by a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Slash-separated path relative to the payload root.
    pub relative_path: String,
    /// Raw file content.
    pub content: Bytes,
    /// Part headers as they appeared on the wire.
    pub headers: BTreeMap<String, String>,
}

impl FileEntry {
    /// Look up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup_header(&self.headers, name)
    }
}

fn lookup_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}
