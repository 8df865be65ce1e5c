//! WebDAV `multistatus` documents.
//!
//! The client understands a slim subset of RFC 4918 plus one extension
//! element, `<td:cursor>`, carried in the
//! `http://dav.tampermonkey.net/ns` namespace.

use crate::paths::PathMapper;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::time::SystemTime;

const TD_NS: &str = "http://dav.tampermonkey.net/ns";

/// Build a `multistatus` document for a set of root-relative paths.
///
/// Each path is stat'ed through `mapper`; entries whose stat fails are
/// still emitted, with `size = -1` and the current time as mtime, so a
/// directory listing survives files disappearing mid-walk.
pub fn multistatus(mapper: &PathMapper, relatives: &[String], cursor: Option<u64>) -> String {
    let mut doc = String::with_capacity(256 + relatives.len() * 256);
    doc.push_str("<?xml version=\"1.0\"?>\n");
    doc.push_str(&format!(
        "<d:multistatus xmlns:d=\"DAV:\" xmlns:td=\"{}\">\n",
        TD_NS
    ));
    for relative in relatives {
        push_response(&mut doc, mapper, relative);
    }
    if let Some(value) = cursor {
        doc.push_str(&format!("<td:cursor>{}</td:cursor>\n", value));
    }
    doc.push_str("</d:multistatus>\n");
    doc
}

/// A DAV error body naming the failed condition.
pub fn error_document(exception: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<d:error xmlns:d=\"DAV:\" xmlns:td=\"{}\">\n\
         <td:exception>{}</td:exception>\n</d:error>\n",
        TD_NS,
        escape_text(exception)
    )
}

fn push_response(doc: &mut String, mapper: &PathMapper, relative: &str) {
    let absolute = mapper.to_absolute(relative);
    let (is_dir, size, modified) = match fs::metadata(&absolute) {
        Ok(meta) => (
            meta.is_dir(),
            meta.len() as i64,
            meta.modified().unwrap_or_else(|_| SystemTime::now()),
        ),
        Err(_) => (false, -1, SystemTime::now()),
    };

    doc.push_str("<d:response>\n");
    doc.push_str(&format!("<d:href>{}</d:href>\n", escape_text(&href_for(relative))));
    doc.push_str("<d:propstat>\n<d:prop>\n");
    doc.push_str(&format!(
        "<d:getlastmodified>{}</d:getlastmodified>\n",
        format_mtime(modified)
    ));
    if is_dir {
        doc.push_str("<d:resourcetype><d:collection/></d:resourcetype>\n");
        doc.push_str("<d:getcontentlength />\n");
    } else {
        doc.push_str("<d:resourcetype />\n");
        doc.push_str(&format!(
            "<d:getcontentlength>{}</d:getcontentlength>\n",
            size
        ));
    }
    doc.push_str("</d:prop>\n<d:status>HTTP/1.1 200 OK</d:status>\n</d:propstat>\n");
    doc.push_str("</d:response>\n");
}

/// URL-style href for a root-relative path. The root itself is `/`.
fn href_for(relative: &str) -> String {
    if relative == "." {
        "/".to_string()
    } else {
        format!("/{}", relative)
    }
}

fn format_mtime(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn lists_root_and_file() {
        let dir = TempDir::new().unwrap();
        let mut file = fs::File::create(dir.path().join("test.txt")).unwrap();
        file.write_all(b"Hello, world!").unwrap();

        let mapper = PathMapper::new(dir.path());
        let doc = multistatus(
            &mapper,
            &[".".to_string(), "test.txt".to_string()],
            None,
        );

        assert!(doc.contains("<d:href>/</d:href>"));
        assert!(doc.contains("<d:resourcetype><d:collection/></d:resourcetype>"));
        assert!(doc.contains("<d:href>/test.txt</d:href>"));
        assert!(doc.contains("<d:getcontentlength>13</d:getcontentlength>"));
        assert!(!doc.contains("<td:cursor>"));
    }

    #[test]
    fn missing_file_degrades_to_negative_size() {
        let dir = TempDir::new().unwrap();
        let mapper = PathMapper::new(dir.path());
        let doc = multistatus(&mapper, &["gone.user.js".to_string()], None);

        assert!(doc.contains("<d:href>/gone.user.js</d:href>"));
        assert!(doc.contains("<d:getcontentlength>-1</d:getcontentlength>"));
        assert!(doc.contains("<d:getlastmodified>"));
    }

    #[test]
    fn cursor_is_emitted_when_supplied() {
        let dir = TempDir::new().unwrap();
        let mapper = PathMapper::new(dir.path());
        let doc = multistatus(&mapper, &[".".to_string()], Some(7));
        assert!(doc.contains("<td:cursor>7</td:cursor>"));
    }

    #[test]
    fn mtime_is_iso8601_utc() {
        let stamp = format_mtime(SystemTime::UNIX_EPOCH);
        assert_eq!(stamp, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn error_document_names_the_exception() {
        let doc = error_document("MethodNotAllowed");
        assert!(doc.contains("<td:exception>MethodNotAllowed</td:exception>"));
        assert!(doc.starts_with("<?xml"));
    }
}
