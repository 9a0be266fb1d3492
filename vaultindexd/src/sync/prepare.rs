use sha2::{Digest, Sha256};

/// A vault document read and digested for indexing: fingerprints for
/// identity and change detection plus lightweight inline tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDocument {
    pub path: String,
    pub content: String,
    pub content_fingerprint: String,
    pub path_fingerprint: String,
    pub tags: Vec<String>,
    pub modified_ms: i64,
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Pure function of the collaborator-supplied inputs. Returns `None` when
/// the trimmed content is empty; such documents are tombstoned rather
/// than uploaded.
pub fn prepare(path: &str, content: String, modified_ms: i64) -> Option<PreparedDocument> {
    if content.trim().is_empty() {
        return None;
    }
    Some(PreparedDocument {
        path: path.to_string(),
        content_fingerprint: fingerprint(content.as_bytes()),
        path_fingerprint: fingerprint(path.as_bytes()),
        tags: extract_tags(&content),
        content,
        modified_ms,
    })
}

/// Collects inline `#tag` tokens. A tag starts at a word boundary, begins
/// with an alphabetic character, and may contain `- _ /` separators.
/// Heading markers (`# Title`, `## Title`) never match.
pub fn extract_tags(content: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for line in content.lines() {
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'#' {
                let at_boundary = i == 0 || bytes[i - 1].is_ascii_whitespace();
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_tag_char(bytes[end]) {
                    end += 1;
                }
                if at_boundary
                    && end > start
                    && bytes[start].is_ascii_alphabetic()
                {
                    let tag = &line[start..end];
                    if !tags.iter().any(|existing| existing == tag) {
                        tags.push(tag.to_string());
                    }
                }
                i = end.max(i + 1);
            } else {
                i += 1;
            }
        }
    }
    tags
}

fn is_tag_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'/')
}
