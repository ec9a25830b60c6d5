use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced while persisting credentials.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    #[error("token is empty")]
    EmptyToken,

    #[error("credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token, trimming surrounding whitespace.
    ///
    /// Returns `None` for blank input.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

/// Source of the ambient credential used for API calls.
///
/// `clear` is called when the API rejects the credential, so the next `get`
/// reports it as absent.
pub trait CredentialProvider: Send + Sync {
    fn get(&self) -> Option<BearerToken>;

    fn clear(&self);
}

/// Credential held in memory, shared between clones.
#[derive(Clone, Default)]
pub struct InMemoryCredentials {
    token: Arc<Mutex<Option<BearerToken>>>,
}

impl InMemoryCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: BearerToken) -> Self {
        Self {
            token: Arc::new(Mutex::new(Some(token))),
        }
    }

    pub fn set(&self, token: BearerToken) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }
}

impl CredentialProvider for InMemoryCredentials {
    fn get(&self) -> Option<BearerToken> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear(&self) {
        debug!("clearing in-memory credential");
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Credential stored as a single line in a file; clearing deletes the file.
#[derive(Clone, Debug)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `raw` as the stored token, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::EmptyToken` for blank input, or `CredentialError::Io`
    /// if the file cannot be written.
    pub fn store(&self, raw: &str) -> Result<BearerToken, CredentialError> {
        let token = BearerToken::new(raw).ok_or(CredentialError::EmptyToken)?;
        fs::write(&self.path, format!("{}\n", token.expose())).map_err(|source| {
            CredentialError::Io {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(token)
    }

    /// Remove the stored token. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Io` if the file exists but cannot be removed.
    pub fn remove(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CredentialError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl CredentialProvider for FileCredentials {
    fn get(&self) -> Option<BearerToken> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => BearerToken::new(contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read credential file");
                None
            }
        }
    }

    fn clear(&self) {
        if let Err(err) = self.remove() {
            warn!(error = %err, "failed to clear credential file");
        } else {
            debug!(path = %self.path.display(), "cleared credential file");
        }
    }
}
