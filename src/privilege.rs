use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::unistd::{geteuid, getuid, seteuid, Uid};
use thiserror::Error;
use tracing::{debug, error, info, warn};

// The effective uid belongs to the whole process, so only one caller may
// hold root at a time.
static ELEVATION: Mutex<()> = Mutex::new(());

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("root is not available to this process (uid {uid}, euid {euid})")]
    Unavailable { uid: Uid, euid: Uid },

    #[error("failed to set effective uid to {uid}: {source}")]
    SetEffective {
        uid: Uid,
        #[source]
        source: nix::Error,
    },
}

/// Gives up effective root until [`elevate`] asks for it back.
///
/// The process must start with root in reach, either as root or from a
/// setuid-root binary. The real uid is left alone so the saved set-user-ID
/// still allows switching back.
///
/// A process started as root has no unprivileged uid to fall back to, so it
/// stays root and serves HTTP as root. Installing the binary setuid root and
/// starting it as an ordinary user avoids that.
pub fn drop_root() -> Result<(), PrivilegeError> {
    let uid = getuid();
    match drop_target(uid, geteuid())? {
        Some(uid) => {
            set_effective(uid)?;
            info!(%uid, "dropped effective root until pwrstat runs");
        }
        None => warn!("started as root, so requests are served as root"),
    }
    Ok(())
}

// The uid to step down to, or `None` when there is nothing below root.
fn drop_target(uid: Uid, euid: Uid) -> Result<Option<Uid>, PrivilegeError> {
    if !euid.is_root() {
        return Err(PrivilegeError::Unavailable { uid, euid });
    }
    Ok((!uid.is_root()).then_some(uid))
}

/// Holds effective root until dropped, then restores the previous effective
/// uid. Restoring happens on every path out of the scope, errors included.
#[derive(Debug)]
pub struct Elevated {
    previous: Uid,
    _lock: MutexGuard<'static, ()>,
}

pub fn elevate() -> Result<Elevated, PrivilegeError> {
    let lock = ELEVATION.lock().unwrap_or_else(PoisonError::into_inner);
    let previous = geteuid();
    if !previous.is_root() {
        set_effective(Uid::from_raw(0))?;
        debug!(%previous, "elevated to root");
    }

    Ok(Elevated {
        previous,
        _lock: lock,
    })
}

impl Drop for Elevated {
    fn drop(&mut self) {
        if geteuid() == self.previous {
            return;
        }
        match set_effective(self.previous) {
            Ok(()) => debug!(uid = %self.previous, "stepped down from root"),
            Err(err) => error!(error = %err, "failed to step down to original uid"),
        }
    }
}

fn set_effective(uid: Uid) -> Result<(), PrivilegeError> {
    seteuid(uid).map_err(|source| PrivilegeError::SetEffective { uid, source })
}
