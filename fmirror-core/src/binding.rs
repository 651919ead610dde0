use crate::filter::Filter;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

/// One configured mirror: a watched source root, the destination it is
/// copied to, and the exclusion filter for the source tree.
#[derive(Debug)]
pub struct RootBinding {
    source_root: PathBuf,
    dest_root: PathBuf,
    filter: Filter,
}

impl RootBinding {
    /// Bind `source_root` to `dest_root`, compiling `patterns` relative to the source.
    pub fn new<S: AsRef<str>>(
        source_root: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
        patterns: &[S],
    ) -> Result<Self> {
        let source_root = source_root.into();
        let filter = Filter::new(source_root.clone(), patterns)?;
        Ok(Self::with_filter(source_root, dest_root, filter))
    }

    pub fn with_filter(
        source_root: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
        filter: Filter,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            dest_root: dest_root.into(),
            filter,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Map a path under the source root onto the destination tree.
    pub fn dest_path(&self, source_path: &Path) -> Result<PathBuf> {
        let rel = source_path.strip_prefix(&self.source_root).map_err(|_| {
            anyhow!(
                "{} is outside of watched root {}",
                source_path.display(),
                self.source_root.display()
            )
        })?;
        if rel.as_os_str().is_empty() {
            Ok(self.dest_root.clone())
        } else {
            Ok(self.dest_root.join(rel))
        }
    }
}
