//! Mount planning for a run.
//!
//! Every run mounts exactly two things: the work directory and a home
//! directory. Each is either a bind mount of a host path or an ephemeral
//! tmpfs-backed volume owned by the mapped user.

use std::path::{Path, PathBuf};

use bollard::models::{Mount, MountTypeEnum};

use crate::archive::copies_contents;
use crate::error::{HuskError, Result};
use crate::host_user::HostUser;

/// Name of the work directory under the container home.
pub const WORK_DIR_NAME: &str = "work";

/// What a planned mount binds into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// Host path exposed directly; writes are visible on both sides.
    Bind(PathBuf),
    /// Engine-managed tmpfs volume created for this run, writable by the
    /// given `uid=..,gid=..` owner.
    Ephemeral { owner: String },
}

/// Which of the two per-run mounts this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountRole {
    Work,
    Home,
}

impl MountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountRole::Work => "work",
            MountRole::Home => "home",
        }
    }
}

/// A single planned mount, before any volume exists.
#[derive(Debug, Clone)]
pub struct PlannedMount {
    pub role: MountRole,
    pub source: MountSource,
    /// In-container path.
    pub target: String,
}

impl PlannedMount {
    /// Convert to the engine's mount representation. Ephemeral mounts need
    /// the name of the volume provisioned for them.
    pub fn to_engine_mount(&self, volume_name: Option<&str>) -> Mount {
        match &self.source {
            MountSource::Bind(path) => Mount {
                target: Some(self.target.clone()),
                source: Some(path.display().to_string()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            },
            MountSource::Ephemeral { .. } => Mount {
                target: Some(self.target.clone()),
                source: volume_name.map(|n| n.to_string()),
                typ: Some(MountTypeEnum::VOLUME),
                ..Default::default()
            },
        }
    }
}

/// The complete mount plan for one run.
#[derive(Debug, Clone)]
pub struct MountPlan {
    /// Exactly one work mount and one home mount, in that order.
    pub mounts: Vec<PlannedMount>,
    /// Absolute host work directory.
    pub work_src: PathBuf,
    /// Whether the copy step injects the directory's contents or the
    /// directory itself.
    pub work_contents_only: bool,
    /// In-container working directory, `<container home>/work`.
    pub work_target: String,
    /// Whether the work directory is injected by copy instead of bind.
    pub copy_work: bool,
}

/// Plan the mounts for a run.
///
/// Work: `--volatile-work` plans an ephemeral volume later populated by a
/// copy step, otherwise a bind mount of the absolute work path. Home: an
/// explicit `--home-dir` plans a bind mount, otherwise an ephemeral volume.
/// The home target inside the container is the host user's home path, so
/// `$HOME` agrees with the identity databases mounted alongside.
pub fn plan(
    user: &HostUser,
    work_dir: &str,
    home_dir: Option<&Path>,
    volatile_work: bool,
) -> Result<MountPlan> {
    let work_src = absolutize(Path::new(work_dir))?;
    let work_target = user.home.join(WORK_DIR_NAME).display().to_string();
    let home_target = user.home.display().to_string();

    let work = PlannedMount {
        role: MountRole::Work,
        source: if volatile_work {
            MountSource::Ephemeral {
                owner: user.volume_owner(),
            }
        } else {
            MountSource::Bind(work_src.clone())
        },
        target: work_target.clone(),
    };

    let home = PlannedMount {
        role: MountRole::Home,
        source: match home_dir {
            Some(path) => MountSource::Bind(absolutize(path)?),
            None => MountSource::Ephemeral {
                owner: user.volume_owner(),
            },
        },
        target: home_target,
    };

    Ok(MountPlan {
        mounts: vec![work, home],
        work_src,
        work_contents_only: copies_contents(work_dir),
        work_target,
        copy_work: volatile_work,
    })
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| HuskError::ResolvePath {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> HostUser {
        HostUser {
            uid: 1000,
            gid: 1000,
            name: "dev".to_string(),
            home: PathBuf::from("/home/dev"),
        }
    }

    fn mount_for(plan: &MountPlan, role: MountRole) -> &PlannedMount {
        plan.mounts.iter().find(|m| m.role == role).unwrap()
    }

    #[test]
    fn default_flags_bind_work_and_provision_home() {
        let plan = plan(&test_user(), "/tmp/src", None, false).unwrap();

        assert_eq!(plan.mounts.len(), 2);
        assert!(!plan.copy_work);
        assert_eq!(
            mount_for(&plan, MountRole::Work).source,
            MountSource::Bind(PathBuf::from("/tmp/src"))
        );
        assert!(matches!(
            mount_for(&plan, MountRole::Home).source,
            MountSource::Ephemeral { .. }
        ));
    }

    #[test]
    fn explicit_home_binds_home() {
        let plan = plan(&test_user(), "/tmp/src", Some(Path::new("/tmp/h")), false).unwrap();

        assert_eq!(
            mount_for(&plan, MountRole::Home).source,
            MountSource::Bind(PathBuf::from("/tmp/h"))
        );
        assert_eq!(mount_for(&plan, MountRole::Home).target, "/home/dev");
    }

    #[test]
    fn volatile_work_provisions_a_work_volume() {
        let plan = plan(&test_user(), "/tmp/src", None, true).unwrap();

        assert!(plan.copy_work);
        assert_eq!(
            mount_for(&plan, MountRole::Work).source,
            MountSource::Ephemeral {
                owner: "uid=1000,gid=1000".to_string()
            }
        );
        assert!(matches!(
            mount_for(&plan, MountRole::Home).source,
            MountSource::Ephemeral { .. }
        ));
    }

    #[test]
    fn volatile_work_with_explicit_home() {
        let plan = plan(&test_user(), "/tmp/src", Some(Path::new("/tmp/h")), true).unwrap();

        assert!(matches!(
            mount_for(&plan, MountRole::Work).source,
            MountSource::Ephemeral { .. }
        ));
        assert!(matches!(
            mount_for(&plan, MountRole::Home).source,
            MountSource::Bind(_)
        ));
    }

    #[test]
    fn work_target_is_under_container_home() {
        let plan = plan(&test_user(), "/tmp/src", None, false).unwrap();
        assert_eq!(plan.work_target, "/home/dev/work");
        assert_eq!(mount_for(&plan, MountRole::Work).target, "/home/dev/work");
    }

    #[test]
    fn trailing_separator_is_recorded_for_the_copy_step() {
        let plan_contents = plan(&test_user(), "/tmp/src/", None, true).unwrap();
        assert!(plan_contents.work_contents_only);

        let plan_dir = plan(&test_user(), "/tmp/src", None, true).unwrap();
        assert!(!plan_dir.work_contents_only);
    }

    #[test]
    fn engine_mount_conversion() {
        let bind = PlannedMount {
            role: MountRole::Work,
            source: MountSource::Bind(PathBuf::from("/tmp/src")),
            target: "/home/dev/work".to_string(),
        };
        let mount = bind.to_engine_mount(None);
        assert_eq!(mount.typ, Some(MountTypeEnum::BIND));
        assert_eq!(mount.source, Some("/tmp/src".to_string()));
        assert_eq!(mount.target, Some("/home/dev/work".to_string()));

        let ephemeral = PlannedMount {
            role: MountRole::Home,
            source: MountSource::Ephemeral {
                owner: "uid=1000,gid=1000".to_string(),
            },
            target: "/home/dev".to_string(),
        };
        let mount = ephemeral.to_engine_mount(Some("husk-vol"));
        assert_eq!(mount.typ, Some(MountTypeEnum::VOLUME));
        assert_eq!(mount.source, Some("husk-vol".to_string()));
    }
}
