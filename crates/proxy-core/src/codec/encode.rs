//! Directory tree to payload.

use super::{find_subslice, CRLF, DASHES};
use crate::config::CodecConfig;
use crate::error::{ProxyError, Result};
use std::fs;
use std::path::{Component, Path};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Encode every regular file below `root` into one payload.
///
/// Symlinks and special files are skipped. A file that cannot be read is
/// logged and left out; only a root that cannot be listed fails the call.
pub fn encode_directory(root: &Path) -> Result<Vec<u8>> {
    let metadata = fs::metadata(root).map_err(|e| ProxyError::io_with_path(e, root))?;
    if !metadata.is_dir() {
        return Err(ProxyError::Io {
            message: "not a directory".to_string(),
            path: Some(root.to_path_buf()),
            source: None,
        });
    }
    fs::read_dir(root).map_err(|e| ProxyError::io_with_path(e, root))?;

    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry below {}: {}", root.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(relative) = slash_path(entry.path(), root) else {
            warn!("Skipping {}: path is not valid UTF-8", entry.path().display());
            continue;
        };

        match fs::read(entry.path()) {
            Ok(content) => {
                debug!("Adding part for {} ({} bytes)", relative, content.len());
                files.push((relative, content));
            }
            Err(e) => warn!("Could not read file {}: {}", entry.path().display(), e),
        }
    }

    Ok(encode_files(&files))
}

/// Encode `(relative path, content)` pairs into one payload.
pub fn encode_files<P: AsRef<str>, C: AsRef<[u8]>>(files: &[(P, C)]) -> Vec<u8> {
    let bodies: Vec<&[u8]> = files.iter().map(|(_, content)| content.as_ref()).collect();
    let boundary = choose_boundary(&bodies);
    write_container(&boundary, files)
}

fn write_container<P: AsRef<str>, C: AsRef<[u8]>>(boundary: &str, files: &[(P, C)]) -> Vec<u8> {
    let body_len: usize = files.iter().map(|(_, c)| c.as_ref().len()).sum();
    let mut out = Vec::with_capacity(body_len + (files.len() + 1) * (boundary.len() + 96));

    for (index, (path, content)) in files.iter().enumerate() {
        if index > 0 {
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(DASHES);
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(CRLF);

        write_header(&mut out, "Content-Type", CodecConfig::PART_CONTENT_TYPE);
        write_header(&mut out, CodecConfig::FILENAME_HEADER, path.as_ref());
        out.extend_from_slice(CRLF);

        out.extend_from_slice(content.as_ref());
    }

    if !files.is_empty() {
        out.extend_from_slice(CRLF);
    }
    out.extend_from_slice(DASHES);
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(DASHES);
    out.extend_from_slice(CRLF);

    out
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(CRLF);
}

/// Draw random boundaries until one does not occur in any body.
fn choose_boundary(bodies: &[&[u8]]) -> String {
    loop {
        let candidate = random_boundary();
        let collides = bodies
            .iter()
            .any(|body| find_subslice(body, candidate.as_bytes(), 0).is_some());
        if !collides {
            return candidate;
        }
        debug!("Boundary {} collides with file content, drawing another", candidate);
    }
}

fn random_boundary() -> String {
    let bytes: [u8; CodecConfig::BOUNDARY_BYTES] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Relative path of `path` below `root`, joined with `/`.
fn slash_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::boundary_from_payload;
    use tempfile::TempDir;

    #[test]
    fn test_empty_container_is_single_closing_line() {
        let files: [(&str, &[u8]); 0] = [];
        let payload = encode_files(&files);
        let text = String::from_utf8(payload).unwrap();

        assert!(text.starts_with("--"));
        assert!(text.ends_with("--\r\n"));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_layout_matches_multipart_grammar() {
        let payload = write_container("XYZ", &[("a.txt", b"hi".as_slice())]);
        let expected = "--XYZ\r\n\
                        Content-Type: application/octet-stream\r\n\
                        X-Concourse-Filename: a.txt\r\n\
                        \r\n\
                        hi\r\n\
                        --XYZ--\r\n";
        assert_eq!(String::from_utf8(payload).unwrap(), expected);
    }

    #[test]
    fn test_boundary_is_hex_of_expected_length() {
        let boundary = random_boundary();
        assert_eq!(boundary.len(), CodecConfig::BOUNDARY_BYTES * 2);
        assert!(boundary.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_boundary_avoids_file_content() {
        let payload = encode_files(&[("x", b"plain".as_slice())]);
        let boundary = boundary_from_payload(&payload).unwrap();
        assert!(find_subslice(b"plain", boundary.as_bytes(), 0).is_none());
    }

    #[test]
    fn test_encode_missing_root_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = encode_directory(&temp_dir.path().join("missing"));
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_file_root_fails() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, "x").unwrap();

        assert!(encode_directory(&file).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("real"), "content").unwrap();
        std::os::unix::fs::symlink(
            temp_dir.path().join("real"),
            temp_dir.path().join("link"),
        )
        .unwrap();

        let payload = encode_directory(temp_dir.path()).unwrap();
        let text = String::from_utf8_lossy(&payload);

        assert!(text.contains("X-Concourse-Filename: real\r\n"));
        assert!(!text.contains("X-Concourse-Filename: link\r\n"));
    }

    #[test]
    fn test_slash_path_joins_nested_components() {
        let root = Path::new("/data");
        assert_eq!(
            slash_path(Path::new("/data/sub/deep/f.txt"), root),
            Some("sub/deep/f.txt".to_string())
        );
        assert_eq!(slash_path(Path::new("/data"), root), None);
        assert_eq!(slash_path(Path::new("/elsewhere/f"), root), None);
    }
}
