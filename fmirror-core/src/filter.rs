use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};

/// Exclusion filter compiled from the patterns of one watched root.
///
/// Patterns are matched against single path segments: `*` stands for any
/// run of characters, `?` for exactly one, everything else is literal. A
/// path is excluded when any segment of its root-relative form matches any
/// pattern, so excluding a directory name excludes its whole subtree.
#[derive(Debug, Clone)]
pub struct Filter {
    root: PathBuf,
    exclude: GlobSet,
}

impl Filter {
    /// Compile `patterns` for paths living under `root`.
    pub fn new<P, S>(root: P, patterns: &[S]) -> Result<Self>
    where
        P: Into<PathBuf>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            let pat = pat.as_ref();
            let glob = GlobBuilder::new(&segment_glob(pat))
                .literal_separator(true)
                .backslash_escape(false)
                .build()
                .with_context(|| format!("invalid filter pattern {pat:?}"))?;
            builder.add(glob);
        }
        Ok(Self {
            root: root.into(),
            exclude: builder.build().context("compile filter patterns")?,
        })
    }

    /// Filter that excludes nothing.
    pub fn empty<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            exclude: GlobSet::empty(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Determine whether `path` is out of the mirrored scope.
    pub fn is_excluded<P: AsRef<Path>>(&self, path: P) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let path = path.as_ref();
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.components().any(|component| match component {
            Component::Normal(name) => self.exclude.is_match(Path::new(name)),
            _ => false,
        })
    }
}

// Only `*` and `?` keep their wildcard meaning; every other glob
// metacharacter is wrapped in a single-character class.
fn segment_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '[' | ']' | '{' | '}' => {
                glob.push('[');
                glob.push(c);
                glob.push(']');
            }
            c => glob.push(c),
        }
    }
    glob
}
