//! Container lifecycle orchestration.
//!
//! One run is a linear pass over the engine: pull, provision volumes, create,
//! start, optionally inject the work directory, run the command, wait, and
//! sweep up afterwards. Every resource is recorded in the ledger the moment
//! it exists, so the sweep finds it wherever the run stops.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, StartContainerOptions,
    StopContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount};
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use clap::ValueEnum;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::archive;
use crate::cleanup::{self, RunResources};
use crate::error::{HuskError, Result};
use crate::host_user::HostUser;
use crate::mounts::{self, MountPlan, MountSource};
use crate::registry;

/// Read-only binds exposing the host identity databases, so the mapped
/// uid/gid resolve to names inside the container.
const IDENTITY_BINDS: [&str; 2] = ["/etc/passwd:/etc/passwd:ro", "/etc/group:/etc/group:ro"];

/// Placeholder main process for exec mode; it only has to outlive the
/// command.
const PLACEHOLDER_CMD: [&str; 2] = ["sleep", "100000"];

/// Label attached to every container and volume this tool creates.
const MANAGED_LABEL: &str = "io.husk.managed";

/// Label carrying an ephemeral volume's role.
const ROLE_LABEL: &str = "io.husk.role";

/// How the command is executed inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// The container's main process is a placeholder; the command runs as an
    /// attached exec session inside it.
    #[default]
    Exec,
    /// The command is the container's own main process.
    Direct,
}

/// Everything one run needs, immutable once built.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub image: String,
    pub command: Vec<String>,
    /// Work directory exactly as given; a trailing separator changes what the
    /// volatile-work copy injects.
    pub work_dir: String,
    pub home_dir: Option<PathBuf>,
    pub persist_home: bool,
    pub volatile_work: bool,
    pub exec_mode: ExecMode,
    pub user: HostUser,
    pub stop_timeout_secs: i64,
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunResult {
    /// Exit status of the in-container command.
    pub status_code: i64,
    /// Abnormal-termination message the engine reported for the container.
    /// The command's failure, not ours.
    pub engine_error: Option<String>,
    /// Name of a persisted home volume left behind.
    pub kept_home_volume: Option<String>,
}

/// Drives one container run against the engine.
pub struct Runner {
    docker: Docker,
}

impl Runner {
    /// Connect to the engine over the local socket and negotiate the API
    /// version once.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(HuskError::Connect)?;
        let docker = docker.negotiate_version().await.map_err(HuskError::Connect)?;
        Ok(Self { docker })
    }

    /// Run the request to completion, sweeping up whatever was created no
    /// matter where a failure occurred.
    pub async fn run(&self, req: &RunRequest) -> Result<RunResult> {
        let mut resources = RunResources::default();
        let outcome = self.execute(req, &mut resources).await;

        if resources.is_empty() {
            return outcome;
        }

        let report = cleanup::sweep(&self.docker, &resources, req.stop_timeout_secs).await;
        outcome.map(|mut result| {
            result.kept_home_volume = report.kept_home_volume;
            result
        })
    }

    async fn execute(&self, req: &RunRequest, resources: &mut RunResources) -> Result<RunResult> {
        let image = self.pull_image(req).await?;

        let plan = mounts::plan(
            &req.user,
            &req.work_dir,
            req.home_dir.as_deref(),
            req.volatile_work,
        )?;
        let engine_mounts = self.provision_volumes(&plan, req, resources).await?;

        let container_id = self
            .create_container(req, &image, &plan, engine_mounts)
            .await?;
        resources.container_id = Some(container_id.clone());

        // In direct mode the main process is the command, so the work copy
        // has to land before start; the engine's copy-up populates the fresh
        // work volume from the container filesystem when it is first mounted.
        if plan.copy_work && req.exec_mode == ExecMode::Direct {
            self.copy_work_dir(&container_id, &plan).await?;
        }

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| HuskError::ContainerStart {
                id: container_id.clone(),
                source: e,
            })?;
        debug!("started container {}", container_id);

        if plan.copy_work && req.exec_mode == ExecMode::Exec {
            self.copy_work_dir(&container_id, &plan).await?;
        }

        match req.exec_mode {
            ExecMode::Exec => self.run_exec(req, &plan, &container_id).await,
            ExecMode::Direct => self.finish_direct(&container_id).await,
        }
    }

    /// Normalize the image name, resolve registry credentials, and pull,
    /// streaming progress as it arrives.
    async fn pull_image(&self, req: &RunRequest) -> Result<String> {
        let credential_path = registry::default_credential_path(&req.user.home);
        let image = registry::resolve_image(&req.image, &credential_path);
        let credentials = image.auth_token.clone().map(|auth| DockerCredentials {
            auth: Some(auth),
            ..Default::default()
        });

        info!("pulling image {}", image.name);
        let options = CreateImageOptions {
            from_image: image.name.clone(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, credentials);
        while let Some(progress) = pull.next().await {
            let update = progress.map_err(|e| HuskError::Pull {
                image: image.name.clone(),
                source: e,
            })?;
            if let Some(status) = update.status {
                match update.id {
                    Some(id) => debug!("{}: {}", id, status),
                    None => debug!("{}", status),
                }
            }
        }

        Ok(image.name)
    }

    /// Create an ephemeral tmpfs volume for each planned ephemeral mount,
    /// recording each one in the ledger before anything else can fail.
    async fn provision_volumes(
        &self,
        plan: &MountPlan,
        req: &RunRequest,
        resources: &mut RunResources,
    ) -> Result<Vec<Mount>> {
        let mut engine_mounts = Vec::with_capacity(plan.mounts.len());

        for planned in &plan.mounts {
            match &planned.source {
                MountSource::Bind(_) => engine_mounts.push(planned.to_engine_mount(None)),
                MountSource::Ephemeral { owner } => {
                    let role = planned.role.as_str();
                    let driver_opts = HashMap::from([
                        ("type".to_string(), "tmpfs".to_string()),
                        ("device".to_string(), "tmpfs".to_string()),
                        ("o".to_string(), owner.clone()),
                    ]);
                    let labels = HashMap::from([
                        (MANAGED_LABEL.to_string(), "true".to_string()),
                        (ROLE_LABEL.to_string(), role.to_string()),
                    ]);

                    let volume = self
                        .docker
                        .create_volume(CreateVolumeOptions {
                            driver: "local".to_string(),
                            driver_opts,
                            labels,
                            ..Default::default()
                        })
                        .await
                        .map_err(|e| HuskError::VolumeCreate { role, source: e })?;

                    info!("created {} volume {}", role, volume.name);
                    resources.track_volume(volume.name.clone(), planned.role, req.persist_home);
                    engine_mounts.push(planned.to_engine_mount(Some(&volume.name)));
                }
            }
        }

        Ok(engine_mounts)
    }

    async fn create_container(
        &self,
        req: &RunRequest,
        image: &str,
        plan: &MountPlan,
        engine_mounts: Vec<Mount>,
    ) -> Result<String> {
        let cmd = match req.exec_mode {
            ExecMode::Direct => req.command.clone(),
            ExecMode::Exec => PLACEHOLDER_CMD.iter().map(|s| s.to_string()).collect(),
        };

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(cmd),
            user: Some(req.user.uid_gid()),
            working_dir: Some(plan.work_target.clone()),
            labels: Some(HashMap::from([(
                MANAGED_LABEL.to_string(),
                "true".to_string(),
            )])),
            host_config: Some(HostConfig {
                binds: Some(IDENTITY_BINDS.iter().map(|s| s.to_string()).collect()),
                mounts: Some(engine_mounts),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| HuskError::ContainerCreate {
                image: image.to_string(),
                source: e,
            })?;

        info!(
            "created container {} running as {}",
            created.id,
            req.user.uid_gid()
        );
        Ok(created.id)
    }

    /// Archive the host work directory and upload it into the container's
    /// working directory.
    async fn copy_work_dir(&self, container_id: &str, plan: &MountPlan) -> Result<()> {
        info!(
            "copying {} into container work directory",
            plan.work_src.display()
        );
        let tarball = archive::tar_work_dir(&plan.work_src, plan.work_contents_only).map_err(
            |e| HuskError::Archive {
                path: plan.work_src.clone(),
                source: e,
            },
        )?;

        let options = UploadToContainerOptions {
            path: plan.work_target.clone(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(container_id, Some(options), tarball.into())
            .await
            .map_err(|e| HuskError::WorkCopy {
                id: container_id.to_string(),
                source: e,
            })?;

        Ok(())
    }

    /// Run the command as an attached exec session, then retire the
    /// placeholder process.
    async fn run_exec(
        &self,
        req: &RunRequest,
        plan: &MountPlan,
        container_id: &str,
    ) -> Result<RunResult> {
        let exec_options = CreateExecOptions {
            cmd: Some(req.command.clone()),
            user: Some(req.user.uid.to_string()),
            working_dir: Some(plan.work_target.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(|e| HuskError::Exec {
                id: container_id.to_string(),
                source: e,
            })?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| HuskError::Exec {
                id: container_id.to_string(),
                source: e,
            })?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(log) => forward_output(log),
                    Err(e) => {
                        warn!("error reading command output: {}", e);
                        break;
                    }
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| HuskError::Exec {
                id: container_id.to_string(),
                source: e,
            })?;
        let status_code = inspect.exit_code.unwrap_or(-1);

        // Retire the placeholder and wait for the container to leave the
        // running state. Its wait status belongs to the placeholder, not the
        // command.
        if let Err(e) = self
            .docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: req.stop_timeout_secs,
                }),
            )
            .await
        {
            debug!("stop of container {} failed: {}", container_id, e);
        }
        let (_, engine_error) = self.wait_not_running(container_id).await?;

        Ok(RunResult {
            status_code,
            engine_error,
            kept_home_volume: None,
        })
    }

    /// Direct mode: the container's main process is the command. Wait for it
    /// and forward the output it produced.
    async fn finish_direct(&self, container_id: &str) -> Result<RunResult> {
        let (status_code, engine_error) = self.wait_not_running(container_id).await?;
        self.forward_logs(container_id).await?;

        Ok(RunResult {
            status_code,
            engine_error,
            kept_home_volume: None,
        })
    }

    /// Block until the container leaves the running state.
    ///
    /// The engine delivers either a status or an error, whichever resolves
    /// first. A per-container runtime error is the command's own abnormal
    /// exit and is reported alongside its status; a transport error is ours
    /// and fatal.
    async fn wait_not_running(&self, container_id: &str) -> Result<(i64, Option<String>)> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.docker.wait_container(container_id, Some(options));

        match wait.next().await {
            Some(Ok(body)) => {
                let engine_error = body.error.and_then(|e| e.message);
                if let Some(message) = &engine_error {
                    warn!("container {} reported: {}", container_id, message);
                }
                Ok((body.status_code, engine_error))
            }
            Some(Err(bollard::errors::Error::DockerContainerWaitError { error, code })) => {
                let engine_error = (!error.is_empty()).then_some(error);
                if let Some(message) = &engine_error {
                    warn!("container {} reported: {}", container_id, message);
                }
                Ok((code, engine_error))
            }
            Some(Err(e)) => Err(HuskError::Wait {
                id: container_id.to_string(),
                source: e,
            }),
            None => Err(HuskError::Wait {
                id: container_id.to_string(),
                source: bollard::errors::Error::IOError {
                    err: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "wait stream ended without a status",
                    ),
                },
            }),
        }
    }

    /// Fetch whatever the command wrote and forward it to our own streams.
    async fn forward_logs(&self, container_id: &str) -> Result<()> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut logs = self.docker.logs(container_id, Some(options));
        while let Some(chunk) = logs.next().await {
            let log = chunk.map_err(|e| HuskError::Logs {
                id: container_id.to_string(),
                source: e,
            })?;
            forward_output(log);
        }

        Ok(())
    }
}

/// Demux one engine output frame onto the matching host stream.
fn forward_output(log: LogOutput) {
    match log {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(&message);
            let _ = stdout.flush();
        }
        LogOutput::StdErr { message } => {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(&message);
            let _ = stderr.flush();
        }
        LogOutput::StdIn { .. } => {}
    }
}
