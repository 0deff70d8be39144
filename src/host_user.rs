//! Identity of the invoking host user.

use std::path::PathBuf;

use nix::unistd::{self, User};

use crate::error::{HuskError, Result};

/// Snapshot of the invoking user's identity, taken once per run.
#[derive(Debug, Clone)]
pub struct HostUser {
    pub uid: u32,
    pub gid: u32,
    pub name: String,
    /// Home directory on the host; also the home path inside the container.
    pub home: PathBuf,
}

impl HostUser {
    /// Look up the current user in the host's account database.
    pub fn current() -> Result<Self> {
        let uid = unistd::getuid();
        let user = User::from_uid(uid)
            .map_err(|e| HuskError::CurrentUser(e.to_string()))?
            .ok_or_else(|| HuskError::CurrentUser(format!("no passwd entry for uid {}", uid)))?;

        Ok(Self {
            uid: uid.as_raw(),
            gid: user.gid.as_raw(),
            name: user.name,
            home: user.dir,
        })
    }

    /// The `uid:gid` string the container runs as.
    pub fn uid_gid(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }

    /// Ownership string handed to the volume driver so the mapped user can
    /// write to ephemeral volumes.
    pub fn volume_owner(&self) -> String {
        format!("uid={},gid={}", self.uid, self.gid)
    }
}
