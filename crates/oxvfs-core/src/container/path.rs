//! Path keys inside a container.
//!
//! Every node is keyed by its normalized absolute path: a leading `/`, no
//! empty, `.` or `..` components, no trailing slash. `..` above the root stays
//! at the root.

/// Normalize `path` into a container key. Relative paths are taken relative
/// to the root. An empty path has no key (`ENOENT`, as for `open("")`).
pub fn normalize(path: &str) -> Result<String, i32> {
    if path.is_empty() {
        return Err(libc::ENOENT);
    }
    if path.contains('\0') {
        return Err(libc::EINVAL);
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    if parts.is_empty() {
        return Ok("/".to_string());
    }
    let mut key = String::with_capacity(path.len() + 1);
    for part in parts {
        key.push('/');
        key.push_str(part);
    }
    Ok(key)
}

/// Parent key of a normalized key; `None` for the root.
pub fn parent(key: &str) -> Option<&str> {
    if key == "/" {
        return None;
    }
    match key.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&key[..idx]),
        None => None,
    }
}

/// Final component of a normalized key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Prefix shared by every descendant of `key`.
pub fn child_prefix(key: &str) -> String {
    if key == "/" {
        "/".to_string()
    } else {
        format!("{key}/")
    }
}

/// Whether `key` lies strictly below `ancestor`.
pub fn is_descendant(key: &str, ancestor: &str) -> bool {
    key != ancestor && key.starts_with(&child_prefix(ancestor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/a/b").unwrap(), "/a/b");
        assert_eq!(normalize("a/b/").unwrap(), "/a/b");
        assert_eq!(normalize("//a///b").unwrap(), "/a/b");
        assert_eq!(normalize("/a/./b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("/../..").unwrap(), "/");
    }

    #[test]
    fn test_normalize_rejects_empty_and_nul() {
        assert_eq!(normalize(""), Err(libc::ENOENT));
        assert_eq!(normalize("/a\0b"), Err(libc::EINVAL));
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(file_name("/a/b"), "b");
        assert_eq!(file_name("/"), "");
    }

    #[test]
    fn test_is_descendant() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(is_descendant("/a", "/"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(path in "[a-z./]{1,24}") {
            let once = normalize(&path).unwrap();
            let twice = normalize(&once).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.starts_with('/'));
            prop_assert!(once == "/" || !once.ends_with('/'));
        }
    }
}
