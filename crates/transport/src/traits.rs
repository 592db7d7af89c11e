//! Transport trait and shared types.

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where files are copied to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    /// `[user@]host:/abs/path`, reached over ssh.
    Remote {
        user: Option<String>,
        host: String,
        path: String,
    },
    /// `host::module/subpath`, an rsync daemon module.
    Daemon { host: String, module_path: String },
    /// A path on this machine.
    Local(PathBuf),
}

impl Destination {
    pub fn parse(input: &str) -> TransportResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidDestination("empty destination".to_string()));
        }

        if let Some((host, module_path)) = input.split_once("::") {
            if host.is_empty() || module_path.is_empty() {
                return Err(TransportError::InvalidDestination(input.to_string()));
            }
            return Ok(Self::Daemon {
                host: host.to_string(),
                module_path: module_path.to_string(),
            });
        }

        match input.split_once(':') {
            Some((login, path)) => {
                let (user, host) = match login.split_once('@') {
                    Some((user, host)) => (Some(user.to_string()), host),
                    None => (None, login),
                };
                if host.is_empty() || !path.starts_with('/') {
                    return Err(TransportError::InvalidDestination(format!(
                        "{input}: expected [user@]host:/absolute/path"
                    )));
                }
                Ok(Self::Remote {
                    user,
                    host: host.to_string(),
                    path: path.to_string(),
                })
            }
            None => Ok(Self::Local(PathBuf::from(input))),
        }
    }

    /// A remote destination for `user@host:path`.
    pub fn remote(user: impl Into<String>, host: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::Remote {
            user: Some(user.into()),
            host: host.into(),
            path: path.as_ref().display().to_string(),
        }
    }

    /// `[user@]host`, for remote destinations.
    pub fn login(&self) -> Option<String> {
        match self {
            Self::Remote {
                user: Some(user),
                host,
                ..
            } => Some(format!("{user}@{host}")),
            Self::Remote { user: None, host, .. } => Some(host.clone()),
            _ => None,
        }
    }

    /// Directory part of the destination.
    pub fn path(&self) -> String {
        match self {
            Self::Remote { path, .. } => path.clone(),
            Self::Daemon { module_path, .. } => module_path.clone(),
            Self::Local(path) => path.display().to_string(),
        }
    }

    /// Same destination, one directory deeper.
    pub fn join(&self, name: &str) -> Self {
        let join = |base: &str| format!("{}/{}", base.trim_end_matches('/'), name);
        match self {
            Self::Remote { user, host, path } => Self::Remote {
                user: user.clone(),
                host: host.clone(),
                path: join(path),
            },
            Self::Daemon { host, module_path } => Self::Daemon {
                host: host.clone(),
                module_path: join(module_path),
            },
            Self::Local(path) => Self::Local(path.join(name)),
        }
    }
}

fn with_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Formats as the command-line target, with a trailing slash.
impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { path, .. } => {
                let login = self.login().unwrap_or_default();
                write!(f, "{login}:{}", with_slash(path))
            }
            Self::Daemon { host, module_path } => write!(f, "{host}::{}", with_slash(module_path)),
            Self::Local(path) => f.write_str(&with_slash(&path.display().to_string())),
        }
    }
}

/// What the tool reported for one file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileReport {
    pub filename: String,
    /// Length of the file on disk.
    pub size: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_per_sec: f64,
}

/// Everything parsed out of one transfer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferSummary {
    pub files: Vec<FileReport>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_per_sec: f64,
    /// Size of the transferred tree, when the tool reports it.
    pub total_size: Option<u64>,
    pub unparsed_lines: usize,
}

impl TransferSummary {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Copies local paths to a destination.
///
/// Directories are copied recursively. Implementations report what the
/// underlying tool printed; retrying with another backend is up to the
/// caller.
#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn copy(&self, files: &[PathBuf], destination: &Destination) -> TransportResult<TransferSummary>;
}
