//! Remote path helpers
//!
//! Remote paths always use `/`, whatever the local or remote OS.

/// Join remote path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.is_empty() {
        format!("/{}", component)
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Directory form used for listings: `""` and `"."` mean root, and the
/// result always ends in exactly one `/`.
pub fn normalize_dir(path: &str) -> String {
    if path.is_empty() || path == "." {
        return "/".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Parent of a remote path, dropping the last `/`-delimited segment.
///
/// Returns `None` at root.
pub fn parent_path(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => Some("/".to_string()),
    }
}

/// Last path component (`/a/b.txt` -> `b.txt`).
pub fn file_name(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("/home", "file.txt"), "/home/file.txt");
        assert_eq!(join_remote_path("/home/", "file.txt"), "/home/file.txt");
        assert_eq!(join_remote_path("/", "home"), "/home");
        assert_eq!(join_remote_path("", "pub"), "/pub");
    }

    #[test]
    fn test_normalize_dir() {
        assert_eq!(normalize_dir(""), "/");
        assert_eq!(normalize_dir("."), "/");
        assert_eq!(normalize_dir("/"), "/");
        assert_eq!(normalize_dir("/var/log"), "/var/log/");
        assert_eq!(normalize_dir("/var/log//"), "/var/log/");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path(""), None);
        assert_eq!(parent_path("/a").as_deref(), Some("/"));
        assert_eq!(parent_path("/a/b").as_deref(), Some("/a"));
        assert_eq!(parent_path("/a/b/").as_deref(), Some("/a"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/a/b.txt"), Some("b.txt"));
        assert_eq!(file_name("/a/dir/"), Some("dir"));
        assert_eq!(file_name("/"), None);
    }
}
