//! Node path normalization.
//!
//! Node paths are absolute `/`-separated strings. `.` and empty segments are
//! dropped, `..` never climbs above `/`, and directory paths end in `/`.

/// Normalize `path` against `/`.
pub fn normalize(path: &str, directory: bool) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut out = String::with_capacity(path.len() + 2);
    out.push('/');
    out.push_str(&parts.join("/"));
    if directory && !parts.is_empty() {
        out.push('/');
    }
    out
}

/// Resolve `relative` below directory `dir`.
///
/// `relative` is normalized on its own first, so it can never reach
/// outside `dir`.
pub fn join(dir: &str, relative: &str, directory: bool) -> String {
    let relative = normalize(relative, false);
    normalize(&format!("{}{}", dir, relative), directory)
}

/// Final path segment; empty for the root.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parent directory path, or `None` for the root.
pub fn parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let idx = trimmed.rfind('/')?;
    Some(normalize(&trimmed[..idx], true))
}

/// Every directory from the root down to `path`'s parent, then `path`.
pub fn chain(path: &str) -> Vec<String> {
    let mut chain = vec![path.to_string()];
    let mut current = parent(path);
    while let Some(dir) = current {
        current = parent(&dir);
        chain.push(dir);
    }
    chain.reverse();
    chain
}

/// Path relative to the root, without a leading `/`.
pub fn relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// Human-readable size with binary units.
///
/// Magnitudes of at most 10 bits print as `"<n> bytes"`; anything larger
/// is scaled by the largest power of 1024 its bit length allows (capped at
/// PB) and printed with two decimals.
pub fn format_size(bytes: i64) -> String {
    let bit_length = 64 - bytes.unsigned_abs().leading_zeros();
    if bit_length <= 10 {
        return format!("{} bytes", bytes);
    }
    let exponent = UNITS.len().min(((bit_length - 1) / 10) as usize);
    let scaled = bytes as f64 / 1024f64.powi(exponent as i32);
    format!("{:.2}{}", scaled, UNITS[exponent - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("", false), "/");
        assert_eq!(normalize("/", true), "/");
        assert_eq!(normalize("a//b/./c", false), "/a/b/c");
        assert_eq!(normalize("a/b", true), "/a/b/");
        assert_eq!(normalize("/a/../../..", true), "/");
        assert_eq!(normalize("../x", false), "/x");
        assert_eq!(normalize("/a/b/../c/", false), "/a/c");
    }

    #[test]
    fn test_join_stays_below_dir() {
        assert_eq!(join("/x/", "f.txt", false), "/x/f.txt");
        assert_eq!(join("/x/", "../../etc/passwd", false), "/x/etc/passwd");
        assert_eq!(join("/x/", "..", true), "/x/");
        assert_eq!(join("/", "a/b", true), "/a/b/");
    }

    #[test]
    fn test_basename_and_parent() {
        assert_eq!(basename("/"), "");
        assert_eq!(basename("/x/"), "x");
        assert_eq!(basename("/x/f.txt"), "f.txt");
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/x/").as_deref(), Some("/"));
        assert_eq!(parent("/x/y/f").as_deref(), Some("/x/y/"));
    }

    #[test]
    fn test_chain_is_root_first() {
        assert_eq!(chain("/"), vec!["/"]);
        assert_eq!(chain("/a/b/f"), vec!["/", "/a/", "/a/b/", "/a/b/f"]);
        assert_eq!(chain("/a/"), vec!["/", "/a/"]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 bytes");
        assert_eq!(format_size(1023), "1023 bytes");
        assert_eq!(format_size(-5), "-5 bytes");
        assert_eq!(format_size(1024), "1.00KB");
        assert_eq!(format_size(4096), "4.00KB");
        assert_eq!(format_size(1536), "1.50KB");
        assert_eq!(format_size(1 << 20), "1.00MB");
        assert_eq!(format_size(1 << 30), "1.00GB");
        assert_eq!(format_size(1 << 60), "1024.00PB");
        assert_eq!(format_size(-2048), "-2.00KB");
    }
}
