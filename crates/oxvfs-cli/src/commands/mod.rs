pub mod cat;
pub mod chmod;
pub mod df;
pub mod init;
pub mod ls;
pub mod mkdir;
pub mod mv;
pub mod rm;
pub mod stat;
pub mod write;

/// Make a user-supplied path absolute within the container.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Join a directory path and an entry name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Parse an octal permission string such as `755` or `0o640`.
pub fn parse_mode(text: &str) -> Result<u32, String> {
    let digits = text.strip_prefix("0o").unwrap_or(text);
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode {text:?}: {e}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {text} out of range"));
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("docs/a.txt"), "/docs/a.txt");
        assert_eq!(normalize_path("/docs/"), "/docs");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/d", "a"), "/d/a");
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755"), Ok(0o755));
        assert_eq!(parse_mode("0o640"), Ok(0o640));
        assert!(parse_mode("999").is_err());
        assert!(parse_mode("17777").is_err());
    }
}
