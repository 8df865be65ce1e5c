//! Mapping between request URL paths and root-relative storage paths.
//!
//! Every path inside the server is a root-relative string with `/`
//! separators, regardless of host OS. Conversion to `PathBuf` happens only
//! at the filesystem boundary.

use crate::error::CoreError;
use std::path::PathBuf;

/// Maps URL paths to paths under a fixed storage root and back.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
}

impl PathMapper {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// The absolute storage root.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Normalize a request URL path into a root-relative path.
    ///
    /// Leading and trailing slashes are stripped, percent-escapes decoded,
    /// and `.`/`..` segments collapsed lexically. An empty result becomes
    /// `"."`. A path that climbs out of the root fails with
    /// [`CoreError::InvalidPath`].
    pub fn to_relative(&self, url_path: &str) -> Result<String, CoreError> {
        let decoded = percent_decode(url_path)
            .ok_or_else(|| CoreError::InvalidPath(url_path.to_string()))?;

        let mut segments: Vec<&str> = Vec::new();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(CoreError::InvalidPath(url_path.to_string()));
                    }
                }
                other => segments.push(other),
            }
        }

        if segments.is_empty() {
            Ok(".".to_string())
        } else {
            Ok(segments.join("/"))
        }
    }

    /// Resolve a normalized relative path to an absolute path under the root.
    pub fn to_absolute(&self, relative: &str) -> PathBuf {
        if relative == "." {
            return self.root.clone();
        }
        let mut abs = self.root.clone();
        for segment in relative.split('/') {
            abs.push(segment);
        }
        abs
    }
}

/// Decode `%XX` escapes. Returns `None` on truncated or non-hex escapes or
/// when the result is not valid UTF-8.
fn percent_decode(input: &str) -> Option<String> {
    if !input.contains('%') {
        return Some(input.to_string());
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_val(*bytes.get(i + 1)?)?;
            let lo = hex_val(*bytes.get(i + 2)?)?;
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
