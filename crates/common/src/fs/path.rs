//! Path helpers for the virtual filesystem.
//!
//! Paths are always absolute and `/` separated, independent of the host OS.
//! Every entry is identified by the standard base64 encoding of its
//! cleaned path, so ids are stable and reversible.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const ROOT: &str = "/";

/// Lexically normalize `path`: collapse separators, resolve `.` and `..`,
///  drop any trailing slash. Relative paths are taken from the root.
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

pub fn encode_id(path: &str) -> String {
    STANDARD.encode(clean(path))
}

/// The cleaned path behind `id`, `None` if it is not a valid id
pub fn decode_id(id: &str) -> Option<String> {
    let bytes = STANDARD.decode(id).ok()?;
    let path = String::from_utf8(bytes).ok()?;
    Some(clean(&path))
}

/// Directory component of a cleaned path, `None` for the root
pub fn parent(path: &str) -> Option<String> {
    let path = clean(path);
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) | None => Some(ROOT.to_string()),
        Some(i) => Some(path[..i].to_string()),
    }
}

/// Last component of a cleaned path, empty for the root
pub fn file_name(path: &str) -> String {
    let path = clean(path);
    path.rsplit('/').next().unwrap_or_default().to_string()
}

pub fn join(dir: &str, name: &str) -> String {
    clean(&format!("{}/{}", dir, name))
}

/// Whether `path` sits directly inside `dir`
pub fn is_direct_child(dir: &str, path: &str) -> bool {
    parent(path).is_some_and(|p| p == clean(dir))
}

/// Whether `path` sits anywhere below `ancestor`
pub fn is_descendant(ancestor: &str, path: &str) -> bool {
    let ancestor = clean(ancestor);
    let path = clean(path);
    if ancestor == ROOT {
        return path != ROOT;
    }
    path.strip_prefix(&ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Move `path` from under `from` to under `to`
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    let path = clean(path);
    let from = clean(from);
    match path.strip_prefix(&from) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            clean(&format!("{}/{}", to, rest))
        }
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean(""), "/");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("a/b"), "/a/b");
        assert_eq!(clean("//a///b/"), "/a/b");
        assert_eq!(clean("/a/./b/../c"), "/a/c");
        assert_eq!(clean("/../.."), "/");
    }

    #[test]
    fn test_id_round_trip() {
        for path in ["/", "/a", "/a/b c/ü.txt"] {
            assert_eq!(decode_id(&encode_id(path)).unwrap(), path);
        }
        assert_eq!(encode_id("/a/"), encode_id("/a"));
        assert_eq!(encode_id("/"), "Lw==");
        assert!(decode_id("not base64!").is_none());
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a").as_deref(), Some("/"));
        assert_eq!(parent("/a/b/").as_deref(), Some("/a"));
        assert_eq!(file_name("/a/b"), "b");
        assert_eq!(file_name("/"), "");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_direct_child() {
        assert!(is_direct_child("/", "/a"));
        assert!(is_direct_child("/a", "/a/b"));
        assert!(is_direct_child("/a/", "/a/b/"));
        assert!(!is_direct_child("/a", "/a/b/c"));
        assert!(!is_direct_child("/a", "/ab"));
        assert!(!is_direct_child("/a", "/a"));
        assert!(!is_direct_child("/", "/"));
    }

    #[test]
    fn test_descendant_and_rebase() {
        assert!(is_descendant("/a", "/a/b/c"));
        assert!(!is_descendant("/a", "/ab"));
        assert!(!is_descendant("/a", "/a"));
        assert!(is_descendant("/", "/a"));
        assert_eq!(rebase("/a/b/c", "/a", "/x/y"), "/x/y/b/c");
        assert_eq!(rebase("/a", "/a", "/z"), "/z");
        assert_eq!(rebase("/q", "/a", "/z"), "/q");
        assert_eq!(rebase("/ab", "/a", "/z"), "/ab");
    }
}
