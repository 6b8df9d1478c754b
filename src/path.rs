//! Slash-separated virtual paths.
//!
//! Every backend normalizes paths before any lookup:
//!
//! | Input | Normalized |
//! |-------|------------|
//! | `""` | `/` |
//! | `a/b` | `/a/b` |
//! | `/a//b/./c/../` | `/a/b` |
//! | `/../x` | `/x` |
//!
//! Normalized paths never carry a trailing separator except the root itself.
//! Paths *reported* for directories (events, snapshot entries) use
//! [`as_dir_path`] to append one.

use std::path::Path;

/// The path separator of virtual paths.
pub const SEPARATOR: char = '/';

/// Lexically clean a path: collapse separators, drop `.` elements and
/// resolve `..` against the preceding element.
///
/// Rooted paths stay rooted and `..` never climbs above the root; relative
/// paths keep leading `..` elements. An empty result is `"."`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with(SEPARATOR);
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split(SEPARATOR) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Normalize a path to its absolute form.
///
/// ```rust
/// use anyfs_store::path::normalize;
///
/// assert_eq!(normalize(""), "/");
/// assert_eq!(normalize("dir/file.txt"), "/dir/file.txt");
/// assert_eq!(normalize("/dir/"), "/dir");
/// ```
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let cleaned = clean(path);
    if cleaned == "." {
        "/".to_string()
    } else if cleaned.starts_with(SEPARATOR) {
        cleaned
    } else {
        clean(&format!("/{cleaned}"))
    }
}

/// Normalize a [`Path`] argument of the public API.
pub fn normalize_path(path: &Path) -> String {
    normalize(&path.to_string_lossy())
}

/// Join path elements with the separator and clean the result.
///
/// Empty elements are ignored; joining nothing yields an empty string.
pub fn join(elements: &[&str]) -> String {
    let non_empty: Vec<&str> = elements.iter().copied().filter(|e| !e.is_empty()).collect();
    if non_empty.is_empty() {
        return String::new();
    }
    clean(&non_empty.join("/"))
}

/// Parent of a normalized path. The parent of `/` is `/`.
pub fn parent(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

/// Last element of a normalized path; `/` for the root.
pub fn basename(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    match path.rfind(SEPARATOR) {
        Some(index) => &path[index + 1..],
        None => path,
    }
}

/// Path of `name` inside the normalized directory `dir`.
pub fn child(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Append a trailing separator if not already present.
pub fn as_dir_path(path: &str) -> String {
    if path.ends_with(SEPARATOR) {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Returns `true` if `path` is `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return true;
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Rewrite `path`, which lies within `from`, to the same relative location
/// under `to`.
pub fn relocate(path: &str, from: &str, to: &str) -> String {
    let rest = &path[from.len()..];
    if to == "/" {
        normalize(rest)
    } else {
        format!("{to}{rest}")
    }
}

/// Strict ancestors of a normalized path, nearest first, ending with `/`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = Some(path);
    std::iter::from_fn(move || {
        let here = current?;
        if here == "/" {
            current = None;
            return None;
        }
        let up = parent(here);
        current = Some(up);
        Some(up)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_resolves_dots_and_separators() {
        assert_eq!(clean("/a//b/./c/../"), "/a/b");
        assert_eq!(clean("a/../.."), "..");
        assert_eq!(clean("/../x"), "/x");
        assert_eq!(clean(""), ".");
    }

    #[test]
    fn normalize_makes_paths_absolute() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("."), "/");
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("../a"), "/a");
        assert_eq!(normalize("/dir/"), "/dir");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn join_cleans_and_skips_empty_elements() {
        assert_eq!(join(&["/a", "", "b/", "../c"]), "/a/c");
        assert_eq!(join(&["a", "b"]), "a/b");
        assert_eq!(join(&[]), "");
    }

    #[test]
    fn parent_and_basename() {
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(basename("/a/b.txt"), "b.txt");
        assert_eq!(basename("/"), "/");
    }

    #[test]
    fn is_within_respects_element_boundaries() {
        assert!(is_within("/src/a", "/src"));
        assert!(is_within("/src", "/src"));
        assert!(!is_within("/srcx/a", "/src"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn relocate_moves_relative_part() {
        assert_eq!(relocate("/src/a/b", "/src", "/dst"), "/dst/a/b");
        assert_eq!(relocate("/src", "/src", "/dst"), "/dst");
        assert_eq!(relocate("/src/a", "/src", "/"), "/a");
    }

    #[test]
    fn ancestors_end_at_root() {
        let all: Vec<&str> = ancestors("/a/b/c").collect();
        assert_eq!(all, vec!["/a/b", "/a", "/"]);
        assert_eq!(ancestors("/").count(), 0);
    }

    #[test]
    fn dir_path_gets_single_trailing_separator() {
        assert_eq!(as_dir_path("/dir"), "/dir/");
        assert_eq!(as_dir_path("/"), "/");
        assert_eq!(child("/", "a"), "/a");
        assert_eq!(child("/d", "a"), "/d/a");
    }
}
