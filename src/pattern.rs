//! Path patterns used by watcher filters and snapshot inclusion.
//!
//! # Syntax
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `/dir/file.txt` | exactly that path |
//! | `/dir/...` | `/dir/` and everything below it |
//! | `/dir/*.txt` | `.txt` files directly in `/dir` (`*` and `?` stop at `/`) |
//! | `/dir/**/*.rs` | `.rs` files anywhere below `/dir` |
//! | `/[a-c]*` | top-level entries starting with `a`, `b` or `c` |
//! | `/conf/*.{json,toml}` | files with either extension in `/conf` |
//!
//! Globs are compiled with [`globset`].
//! Directory paths are matched both with and without their trailing `/`, so
//! `/dir/*` accepts the directory event path `/dir/sub/`.

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::{FsError, path};

const PREFIX_SUFFIX: &str = "/...";

/// A parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PathPattern {
    /// A single normalized path.
    Exact(String),
    /// A directory and all of its descendants; stores the directory path.
    Prefix(String),
    /// A compiled glob expression.
    Glob(PathGlob),
}

/// A glob compiled with `*` and `?` confined to one path segment.
#[derive(Clone)]
pub struct PathGlob {
    source: String,
    matcher: GlobMatcher,
}

impl PathGlob {
    fn compile(source: String) -> Result<Self, globset::Error> {
        let matcher = GlobBuilder::new(&source)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(Self { source, matcher })
    }

    /// The expression as written, made absolute.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn is_match(&self, candidate: &str) -> bool {
        self.matcher.is_match(candidate)
    }
}

impl PartialEq for PathGlob {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PathGlob {}

impl std::fmt::Debug for PathGlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PathGlob").field(&self.source).finish()
    }
}

impl PathPattern {
    /// Parse a pattern string.
    ///
    /// A glob that does not compile, such as one with an unclosed `[`, is
    /// taken as an exact path. Use [`PathPattern::try_parse`] to reject it.
    ///
    /// ```rust
    /// use anyfs_store::PathPattern;
    ///
    /// let pattern = PathPattern::parse("/dir/...");
    /// assert!(pattern.matches("/dir/a/b.txt"));
    /// assert!(!pattern.matches("/other"));
    /// ```
    pub fn parse(pattern: &str) -> Self {
        Self::try_parse(pattern).unwrap_or_else(|_| PathPattern::Exact(path::normalize(pattern)))
    }

    /// Parse a pattern string, failing on a malformed glob.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidPath`] if the glob does not compile
    pub fn try_parse(pattern: &str) -> Result<Self, FsError> {
        if let Some(dir) = pattern.strip_suffix(PREFIX_SUFFIX) {
            return Ok(PathPattern::Prefix(path::normalize(dir)));
        }
        if !pattern.contains(['*', '?', '[', '{']) {
            return Ok(PathPattern::Exact(path::normalize(pattern)));
        }
        let absolute = if pattern.starts_with('/') {
            pattern.to_string()
        } else {
            format!("/{pattern}")
        };
        PathGlob::compile(absolute)
            .map(PathPattern::Glob)
            .map_err(|_| FsError::InvalidPath {
                path: pattern.into(),
                reason: "malformed glob pattern",
            })
    }

    /// Pattern matching every path.
    pub fn everything() -> Self {
        PathPattern::Prefix("/".to_string())
    }

    /// Test a path against the pattern.
    pub fn matches(&self, candidate: &str) -> bool {
        let normalized = path::normalize(candidate);
        match self {
            PathPattern::Exact(exact) => *exact == normalized,
            PathPattern::Prefix(dir) => path::is_within(&normalized, dir),
            PathPattern::Glob(glob) => {
                glob.is_match(&normalized)
                    || (normalized != "/" && glob.is_match(&path::as_dir_path(&normalized)))
            }
        }
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathPattern::Exact(exact) => f.write_str(exact),
            PathPattern::Prefix(dir) if dir == "/" => f.write_str(PREFIX_SUFFIX),
            PathPattern::Prefix(dir) => write!(f, "{dir}{PREFIX_SUFFIX}"),
            PathPattern::Glob(glob) => f.write_str(glob.as_str()),
        }
    }
}

impl From<&str> for PathPattern {
    fn from(pattern: &str) -> Self {
        PathPattern::parse(pattern)
    }
}

impl TryFrom<String> for PathPattern {
    type Error = FsError;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        PathPattern::try_parse(&pattern)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.to_string()
    }
}
