//! Best-effort teardown of everything a run created.
//!
//! The ledger is filled the moment a resource exists, so the sweep can find
//! it no matter where the run stopped. Sweep steps log their failures and
//! keep going; cleanup never masks the run's own outcome.

use bollard::container::{RemoveContainerOptions, StopContainerOptions};
use bollard::volume::RemoveVolumeOptions;
use bollard::Docker;
use tracing::{debug, info, warn};

use crate::mounts::MountRole;

/// A volume created for this run, and whether the sweep must leave it.
#[derive(Debug, Clone)]
pub struct TrackedVolume {
    pub name: String,
    pub role: MountRole,
    /// Only a home volume under `--persist-home` is ever kept.
    pub keep: bool,
}

/// Ledger of engine resources created during a run.
#[derive(Debug, Default)]
pub struct RunResources {
    pub container_id: Option<String>,
    pub volumes: Vec<TrackedVolume>,
}

impl RunResources {
    /// Record a freshly created volume.
    pub fn track_volume(&mut self, name: String, role: MountRole, persist_home: bool) {
        let keep = role == MountRole::Home && persist_home;
        self.volumes.push(TrackedVolume { name, role, keep });
    }

    /// True when the run created nothing that needs a sweep.
    pub fn is_empty(&self) -> bool {
        self.container_id.is_none() && self.volumes.is_empty()
    }
}

/// Outcome of the sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed_volumes: Vec<String>,
    /// A persisted home volume left behind, by name.
    pub kept_home_volume: Option<String>,
}

/// Tear down everything in the ledger.
///
/// The stop is best-effort (the container has usually exited already), the
/// removal is forced and takes anonymous volumes with it, and every tracked
/// volume not flagged keep is deleted. Each step runs regardless of the ones
/// before it.
pub async fn sweep(
    docker: &Docker,
    resources: &RunResources,
    stop_timeout_secs: i64,
) -> SweepReport {
    let mut report = SweepReport::default();

    if let Some(id) = &resources.container_id {
        if let Err(e) = docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: stop_timeout_secs,
                }),
            )
            .await
        {
            debug!("stop of container {} failed: {}", id, e);
        }

        let rm_opts = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match docker.remove_container(id, Some(rm_opts)).await {
            Ok(()) => debug!("removed container {}", id),
            Err(e) => warn!("failed to remove container {}: {}", id, e),
        }
    }

    for volume in &resources.volumes {
        if volume.keep {
            info!("home volume left behind: {}", volume.name);
            report.kept_home_volume = Some(volume.name.clone());
            continue;
        }

        match docker
            .remove_volume(&volume.name, Some(RemoveVolumeOptions { force: true }))
            .await
        {
            Ok(()) => {
                debug!("removed {} volume {}", volume.role.as_str(), volume.name);
                report.removed_volumes.push(volume.name.clone());
            }
            Err(e) => warn!("failed to remove volume {}: {}", volume.name, e),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_volume_is_kept_only_with_persist_home() {
        let mut resources = RunResources::default();
        resources.track_volume("h1".to_string(), MountRole::Home, true);
        resources.track_volume("h2".to_string(), MountRole::Home, false);

        assert!(resources.volumes[0].keep);
        assert!(!resources.volumes[1].keep);
    }

    #[test]
    fn work_volume_is_never_kept() {
        let mut resources = RunResources::default();
        resources.track_volume("w1".to_string(), MountRole::Work, true);

        assert!(!resources.volumes[0].keep);
    }

    #[test]
    fn empty_ledger_needs_no_sweep() {
        let mut resources = RunResources::default();
        assert!(resources.is_empty());

        resources.container_id = Some("abc".to_string());
        assert!(!resources.is_empty());

        let mut resources = RunResources::default();
        resources.track_volume("v".to_string(), MountRole::Work, false);
        assert!(!resources.is_empty());
    }
}
