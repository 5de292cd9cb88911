//! Target location and name resolution.
//!
//! With temporary names enabled a recording is written as `<name>.mjr.<ext>` and
//! renamed to `<name>.mjr` once it is closed, so anything watching the directory
//! only ever sees complete recordings under the canonical name.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::Error;

pub const EXTENSION: &str = "mjr";
pub const DEFAULT_TEMP_EXTENSION: &str = "tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub dir: Option<PathBuf>,
    /// `<name>.mjr`
    pub canonical: String,
    /// Name used while the recording is open.
    pub working: String,
}

impl Target {
    /// Resolves where a recording lives.
    ///
    /// A `filename` with a parent path and no `dir` splits into directory and
    /// base name. When both are given the filename is taken verbatim. Without a
    /// filename a random `recording-<n>` base name is generated.
    pub fn resolve(
        dir: Option<&Path>,
        filename: Option<&str>,
        temp_extension: Option<&str>,
    ) -> Self {
        let (dir, base) = match (dir, filename) {
            (None, Some(filename)) => {
                let path = Path::new(filename);
                let parent = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf);
                let base = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filename.to_string());
                (parent, base)
            }
            (Some(dir), Some(filename)) => {
                let path = Path::new(filename);
                if path.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
                    warn!(?dir, filename, "unsupported combination of dir and filename");
                }
                (Some(dir.to_path_buf()), filename.to_string())
            }
            (dir, None) => (dir.map(Path::to_path_buf), random_base_name()),
        };
        Self::new(dir, &base, temp_extension)
    }

    pub fn new(dir: Option<PathBuf>, base: &str, temp_extension: Option<&str>) -> Self {
        let canonical = format!("{base}.{EXTENSION}");
        let working = match temp_extension {
            Some(ext) => format!("{canonical}.{ext}"),
            None => canonical.clone(),
        };
        Self {
            dir,
            canonical,
            working,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.working != self.canonical
    }

    pub fn working_path(&self) -> PathBuf {
        self.join(&self.working)
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.join(&self.canonical)
    }

    fn join(&self, name: &str) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

pub fn random_base_name() -> String {
    format!("recording-{}", fastrand::u32(..))
}

/// Makes sure `dir` exists and is a directory, creating it (and any parents) if needed.
pub fn ensure_dir(dir: &Path) -> Result<(), Error> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {
            debug!(?dir, "directory exists");
            Ok(())
        }
        Ok(_) => Err(Error::NotADirectory(dir.to_path_buf())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(dir)?;
            info!(?dir, "created recording directory");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
