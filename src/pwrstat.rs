use std::{
    io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
    string::FromUtf8Error,
};

use thiserror::Error;
use tracing::debug;

use crate::{
    parser::{parse_status, ParseError},
    privilege::{self, PrivilegeError},
    status::StatusResult,
};

pub const DEFAULT_PATH: &str = "/usr/sbin/pwrstat";
const STATUS_ARG: &str = "-status";

/// Why `pwrstat -status` could not produce a report.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("failed to execute '{} -status': {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{} -status' exited with {status}: {stderr}", .path.display())]
    Exit {
        path: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("'{} -status' printed invalid UTF-8: {source}", .path.display())]
    Utf8 {
        path: PathBuf,
        #[source]
        source: FromUtf8Error,
    },
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Something that can be asked for a fresh UPS status.
pub trait StatusSource: Send + Sync {
    fn status(&self) -> Result<StatusResult, StatusError>;
}

/// Runs the CyberPower `pwrstat` tool.
#[derive(Debug, Clone)]
pub struct Pwrstat {
    path: PathBuf,
    root: bool,
}

impl Pwrstat {
    /// With `root` set, every run happens as root and steps back down
    /// afterwards. `pwrstat` refuses to talk to the daemon otherwise.
    pub fn new(path: impl Into<PathBuf>, root: bool) -> Pwrstat {
        Pwrstat {
            path: path.into(),
            root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whatever `pwrstat -status` printed, untouched.
    pub fn fetch(&self) -> Result<String, FetchError> {
        let elevated = if self.root {
            Some(privilege::elevate()?)
        } else {
            None
        };

        debug!(path = %self.path.display(), root = self.root, "running pwrstat");
        let mut command = Command::new(&self.path);
        command.arg(STATUS_ARG);
        if elevated.is_some() {
            // The child gets root as its real uid too, not only the effective one.
            command.uid(0);
        }
        let output = command
            .output()
            .map_err(|source| FetchError::Spawn {
                path: self.path.clone(),
                source,
            });
        drop(elevated);
        let output = output?;

        if !output.status.success() {
            return Err(FetchError::Exit {
                path: self.path.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|source| FetchError::Utf8 {
            path: self.path.clone(),
            source,
        })
    }
}

impl StatusSource for Pwrstat {
    fn status(&self) -> Result<StatusResult, StatusError> {
        let report = self.fetch()?;
        debug!(bytes = report.len(), "parsing pwrstat report");
        Ok(parse_status(&report)?)
    }
}
