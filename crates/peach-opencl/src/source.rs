//! Kernel source loading.
//!
//! The probe compiles one shared source module for every device. The
//! [`SourceLoader`] trait keeps the file system out of the pipeline so tests
//! can hand in source text directly.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ProbeError, Result};

/// Default source file name, relative to the working directory.
pub const DEFAULT_KERNEL_PATH: &str = "cl_minimal.cl";

/// Default ceiling on kernel source size in bytes.
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 102_400;

/// Kernel source text together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    /// Origin, used in diagnostics.
    pub origin: PathBuf,
    /// Raw OpenCL C source.
    pub text: String,
}

impl KernelSource {
    #[must_use]
    pub fn new(origin: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self { origin: origin.into(), text: text.into() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Supplies kernel source text by name.
pub trait SourceLoader {
    fn load(&self, path: &Path) -> Result<KernelSource>;
}

/// Reads kernel sources from the local file system, bounded in size.
#[derive(Debug, Clone)]
pub struct FileSourceLoader {
    max_bytes: usize,
}

impl FileSourceLoader {
    #[must_use]
    pub const fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    #[must_use]
    pub const fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for FileSourceLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SOURCE_BYTES)
    }
}

impl SourceLoader for FileSourceLoader {
    fn load(&self, path: &Path) -> Result<KernelSource> {
        let failed = |reason: String| ProbeError::SourceLoadFailed { path: path.to_path_buf(), reason };

        let file = fs::File::open(path).map_err(|e| failed(e.to_string()))?;

        // Read one byte past the ceiling so oversized files are detected
        // instead of silently truncated.
        let limit = u64::try_from(self.max_bytes).unwrap_or(u64::MAX).saturating_add(1);
        let mut bytes = Vec::new();
        file.take(limit)
            .read_to_end(&mut bytes)
            .map_err(|e| failed(e.to_string()))?;
        if bytes.len() > self.max_bytes {
            return Err(failed(format!("source exceeds the {} byte limit", self.max_bytes)));
        }

        let text = String::from_utf8(bytes).map_err(|e| failed(format!("not UTF-8: {e}")))?;
        debug!("Loaded kernel source {} ({} bytes)", path.display(), text.len());
        Ok(KernelSource { origin: path.to_path_buf(), text })
    }
}

/// Serves a fixed source regardless of the requested path.
#[derive(Debug, Clone)]
pub struct StaticSourceLoader {
    text: String,
}

impl StaticSourceLoader {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl SourceLoader for StaticSourceLoader {
    fn load(&self, path: &Path) -> Result<KernelSource> {
        Ok(KernelSource::new(path, self.text.clone()))
    }
}
