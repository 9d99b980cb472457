use crate::token::TokenBundle;
use snafu::{ResultExt, Snafu};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, Snafu)]
pub enum TokenCacheError {
    #[snafu(display("TokenCacheError: No token file at '{}'", path.display()))]
    NotFound { path: PathBuf },

    #[snafu(display("TokenCacheError: Token file at '{}' is corrupt", path.display()))]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("TokenCacheError: Could not serialize token bundle"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("TokenCacheError: I/O error on '{}'", path.display()))]
    Io { path: PathBuf, source: io::Error },
}

impl TokenCacheError {
    /// Absent or unreadable content. Callers treat these as a cache miss.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            TokenCacheError::NotFound { .. } | TokenCacheError::Corrupt { .. }
        )
    }
}

/// A token bundle persisted as JSON in a single owner-only file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<TokenBundle, TokenCacheError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return NotFoundSnafu {
                    path: self.path.clone(),
                }
                .fail();
            }
            Err(source) => {
                return Err(source).context(IoSnafu {
                    path: self.path.clone(),
                });
            }
        };
        serde_json::from_slice(&data).context(CorruptSnafu {
            path: self.path.clone(),
        })
    }

    /// Replaces the token file atomically.
    ///
    /// The bundle is written to a sibling temporary file created with mode `0600`, flushed to disk
    /// and then renamed over the target. A crash leaves either the old or the new file in place.
    pub fn save(&self, bundle: &TokenBundle) -> Result<(), TokenCacheError> {
        let data = serde_json::to_vec(bundle).context(SerializeSnafu {})?;

        if let Some(parent) = self.path.parent().filter(|it| !it.as_os_str().is_empty()) {
            create_private_dir_all(parent).context(IoSnafu { path: parent })?;
        }

        let tmp_path = self.tmp_path();
        let written = write_private_file(&tmp_path, &data)
            .and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(source).context(IoSnafu {
                path: self.path.clone(),
            });
        }

        tracing::debug!(path = %self.path.display(), "Saved token bundle");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut file_name = self
            .path
            .file_name()
            .map(|it| it.to_os_string())
            .unwrap_or_default();
        file_name.push(".tmp");
        self.path.with_file_name(file_name)
    }
}

fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    // A stale temporary file may carry broader permissions. Start fresh.
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn create_private_dir_all(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}
