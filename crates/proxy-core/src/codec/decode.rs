//! Payload to files.
//!
//! Decoding is strictly sequential: parts are parsed and written one after
//! another, so no two parts ever write the same path concurrently.

use super::{find_subslice, lookup_header, FileEntry, CRLF, DASHES};
use crate::config::CodecConfig;
use crate::error::{ProxyError, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Recover the boundary from the first line of a payload.
///
/// The first line is `--<boundary>` when the container has parts and
/// `--<boundary>--` when it is empty; both markers are stripped.
pub fn boundary_from_payload(payload: &[u8]) -> Result<String> {
    let line_end = find_subslice(payload, CRLF, 0).unwrap_or(payload.len());
    let line = std::str::from_utf8(&payload[..line_end]).map_err(|_| malformed("first line is not UTF-8"))?;

    let without_prefix = line
        .strip_prefix("--")
        .ok_or_else(|| malformed("first line does not start with a boundary marker"))?;
    let boundary = without_prefix.strip_suffix("--").unwrap_or(without_prefix);

    if boundary.is_empty() {
        return Err(malformed("empty boundary"));
    }

    Ok(boundary.to_string())
}

/// Decode a payload into `destination`, taking the boundary from its first line.
pub fn decode_into(payload: Bytes, destination: &Path) -> Result<Vec<FileEntry>> {
    let boundary = boundary_from_payload(&payload)?;
    decode_with_boundary(payload, &boundary, destination)
}

/// Decode a payload with a known boundary into `destination`.
///
/// Parts without a filename header, with a path escaping `destination`, or
/// whose file cannot be written are logged and skipped. Only a structurally
/// broken container fails the call; files written before the break stay.
pub fn decode_with_boundary(
    payload: Bytes,
    boundary: &str,
    destination: &Path,
) -> Result<Vec<FileEntry>> {
    let mut reader = PartReader::new(payload, boundary)?;
    let mut entries = Vec::new();

    while let Some(part) = reader.next_part()? {
        let Some(file_name) = part.header(CodecConfig::FILENAME_HEADER) else {
            warn!(
                "Skipping part because it has no {} set",
                CodecConfig::FILENAME_HEADER
            );
            continue;
        };

        let Some(relative) = contained_path(file_name) else {
            warn!("Skipping part {:?}: path leaves the destination", file_name);
            continue;
        };

        let target = destination.join(&relative);

        if let Some(parent) = target.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Could not create {}: {}", parent.display(), e);
                continue;
            }
        }

        if let Err(e) = fs::write(&target, &part.body) {
            warn!("Could not write {}: {}", target.display(), e);
            continue;
        }

        info!(
            "Part {:?}: {} bytes written to {}",
            file_name,
            part.body.len(),
            target.display()
        );

        entries.push(FileEntry {
            relative_path: file_name.to_string(),
            content: part.body,
            headers: part.headers,
        });
    }

    Ok(entries)
}

/// A part as parsed from the container, before any filesystem work.
#[derive(Debug, Clone)]
pub struct RawPart {
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl RawPart {
    /// Look up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup_header(&self.headers, name)
    }
}

/// Iterates the parts between the opening and the closing boundary.
#[derive(Debug)]
pub struct PartReader {
    payload: Bytes,
    delimiter: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl PartReader {
    /// Position a reader after the opening `--<boundary>` marker.
    pub fn new(payload: Bytes, boundary: &str) -> Result<Self> {
        let mut dash_boundary = DASHES.to_vec();
        dash_boundary.extend_from_slice(boundary.as_bytes());

        if !payload.starts_with(&dash_boundary) {
            return Err(malformed("payload does not open with its boundary"));
        }

        let mut delimiter = CRLF.to_vec();
        delimiter.extend_from_slice(&dash_boundary);

        Ok(Self {
            pos: dash_boundary.len(),
            payload,
            delimiter,
            finished: false,
        })
    }

    /// Parse the next part, or `None` once the closing boundary was reached.
    pub fn next_part(&mut self) -> Result<Option<RawPart>> {
        if self.finished {
            return Ok(None);
        }

        // After a boundary: "--" closes the container, otherwise the line ends.
        let rest = &self.payload[self.pos..];
        if rest.starts_with(DASHES) {
            self.finished = true;
            return Ok(None);
        }
        let padding = rest
            .iter()
            .take_while(|b| **b == b' ' || **b == b'\t')
            .count();
        if !rest[padding..].starts_with(CRLF) {
            return Err(malformed("boundary line is not terminated"));
        }
        let header_start = self.pos + padding + CRLF.len();

        let (headers, body_start) = self.parse_headers(header_start)?;

        let body_end = self
            .find_delimiter(body_start)
            .ok_or_else(|| malformed("part is not followed by a boundary"))?;

        self.pos = body_end + self.delimiter.len();

        Ok(Some(RawPart {
            headers,
            body: self.payload.slice(body_start..body_end),
        }))
    }

    fn parse_headers(&self, start: usize) -> Result<(BTreeMap<String, String>, usize)> {
        let mut headers = BTreeMap::new();

        if self.payload[start..].starts_with(CRLF) {
            return Ok((headers, start + CRLF.len()));
        }

        let end = find_subslice(&self.payload, b"\r\n\r\n", start)
            .ok_or_else(|| malformed("part headers are not terminated"))?;
        let block = std::str::from_utf8(&self.payload[start..end])
            .map_err(|_| malformed("part headers are not UTF-8"))?;

        for line in block.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                return Err(malformed("part header without a colon"));
            };
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }

        Ok((headers, end + 4))
    }

    /// Find the next delimiter that really ends a part.
    ///
    /// A `\r\n--<boundary>` sequence only counts when it is followed by `--`
    /// or by optional whitespace and a line break; anything else is content.
    fn find_delimiter(&self, from: usize) -> Option<usize> {
        let mut search = from;
        while let Some(found) = find_subslice(&self.payload, &self.delimiter, search) {
            let after = &self.payload[found + self.delimiter.len()..];
            let padding = after
                .iter()
                .take_while(|b| **b == b' ' || **b == b'\t')
                .count();
            if after.starts_with(DASHES) || after[padding..].starts_with(CRLF) {
                return Some(found);
            }
            search = found + 1;
        }
        None
    }
}

/// Turn a slash-separated wire path into a relative path that stays inside
/// its destination, or `None` if it would escape it.
fn contained_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut relative = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

fn malformed(message: &str) -> ProxyError {
    ProxyError::MalformedPayload {
        message: message.to_string(),
    }
}
