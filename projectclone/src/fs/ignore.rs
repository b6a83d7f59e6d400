//! Path exclusion rules.
//!
//! A pattern matches a path when any of these hold:
//! - it glob-matches the path (relative to the root when one is known),
//! - it glob-matches the final path component,
//! - it names a run of whole path segments (`subdir` matches `a/subdir/b.txt`
//!   but not `a/subdirectory/b.txt`).
//!
//! A leading `./` is stripped before comparison, a trailing `/` is ignored
//! and `*` also matches `/` and leading dots. Patterns are evaluated in
//! order; a pattern starting with `!` re-includes what earlier patterns
//! excluded, and the last matching pattern wins.

use crate::Result;
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Name of the per-source ignore file.
pub const IGNORE_FILE_NAME: &str = ".vaultignore";

/// Patterns that are always excluded from a snapshot.
pub const DEFAULT_IGNORES: &[&str] = &[".git", "__pycache__", ".DS_Store", IGNORE_FILE_NAME];

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    negated: bool,
    matcher: Option<GlobMatcher>,
}

impl Rule {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (negated, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let mut body = body;
        while let Some(rest) = body.strip_prefix("./") {
            body = rest;
        }
        let body = body.trim_end_matches('/');
        if body.is_empty() {
            return None;
        }

        let matcher = match GlobBuilder::new(body).literal_separator(false).build() {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(e) => {
                warn!(pattern = %body, error = %e, "Invalid glob, using literal segment match only");
                None
            }
        };

        Some(Self {
            needle: body.to_string(),
            negated,
            matcher,
        })
    }

    fn matches(&self, candidate: &str, file_name: Option<&str>) -> bool {
        if let Some(matcher) = &self.matcher {
            if matcher.is_match(candidate) {
                return true;
            }
            if let Some(name) = file_name {
                if matcher.is_match(name) {
                    return true;
                }
            }
        }

        let haystack = format!("/{}/", candidate.trim_matches('/'));
        let needle = format!("/{}/", self.needle.trim_matches('/'));
        haystack.contains(&needle)
    }
}

/// A compiled, ordered set of ignore patterns, optionally anchored at a root.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    root: Option<PathBuf>,
    rules: Vec<Rule>,
}

impl IgnoreSet {
    /// Patterns matched against whatever path they are given (CLI excludes).
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            root: None,
            rules: patterns.iter().filter_map(|p| Rule::parse(p.as_ref())).collect(),
        }
    }

    /// Patterns matched against paths relative to `root`.
    pub fn with_root<S: AsRef<str>>(patterns: &[S], root: &Path) -> Self {
        Self {
            root: Some(root.to_path_buf()),
            ..Self::new(patterns)
        }
    }

    /// Defaults plus the source's `.vaultignore` (when present) plus `extra`.
    pub fn for_source<S: AsRef<str>>(source: &Path, extra: &[S]) -> Result<Self> {
        let mut patterns = load_patterns(source)?;
        patterns.extend(extra.iter().map(|p| p.as_ref().to_string()));
        Ok(Self::with_root(&patterns, source))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rules as rsync `--include`/`--exclude` flags.
    ///
    /// Patterns are the normalized needles (no `./`, no trailing `/`).
    /// rsync stops at the first matching rule, so rules are emitted last to
    /// first to keep last-match-wins; negated rules become `--include`.
    pub fn rsync_filter_args(&self) -> Vec<String> {
        self.rules
            .iter()
            .rev()
            .flat_map(|rule| {
                let flag = if rule.negated { "--include" } else { "--exclude" };
                [flag.to_string(), rule.needle.clone()]
            })
            .collect()
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let relative = match &self.root {
            Some(root) => path.strip_prefix(root).unwrap_or(path),
            None => path,
        };
        let candidate = normalize(relative);
        if candidate.is_empty() {
            return false;
        }
        let file_name = relative.file_name().map(|n| n.to_string_lossy());

        let mut ignored = false;
        for rule in &self.rules {
            if rule.matches(&candidate, file_name.as_deref()) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}

/// True if `path` (relative to `root`) is matched by `patterns`.
pub fn should_ignore<S: AsRef<str>>(path: &Path, patterns: &[S], root: &Path) -> bool {
    IgnoreSet::with_root(patterns, root).is_ignored(path)
}

/// Same policy as [`should_ignore`], for user-supplied exclude lists that
/// are not anchored at a root.
pub fn matches_excludes<S: AsRef<str>>(path: &Path, excludes: &[S]) -> bool {
    IgnoreSet::new(excludes).is_ignored(path)
}

/// One pattern per line; blank lines and `#` comments are skipped.
pub fn parse_ignore_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Built-in defaults followed by the patterns in `<source>/.vaultignore`.
pub fn load_patterns(source: &Path) -> Result<Vec<String>> {
    let mut patterns: Vec<String> = DEFAULT_IGNORES.iter().map(|p| p.to_string()).collect();
    let ignore_file = source.join(IGNORE_FILE_NAME);
    if ignore_file.is_file() {
        patterns.extend(parse_ignore_file(&ignore_file)?);
    }
    Ok(patterns)
}

/// Join path components with `/` regardless of platform.
pub fn normalize(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in path.components() {
        match component {
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::Prefix(prefix) => parts.push(prefix.as_os_str().to_string_lossy().to_string()),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}
