//! Error types for husk.
//!
//! Engine and transport failures are typed here. An in-container command's
//! nonzero exit is not an error; it travels in
//! [`RunResult`](crate::runner::RunResult).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// All failure modes of a run, other than the command's own exit status.
#[derive(Debug, Error)]
pub enum HuskError {
    /// Failed to connect to the container engine.
    #[error("failed to connect to container engine: {0}")]
    Connect(#[source] bollard::errors::Error),

    /// Could not resolve the invoking user's identity.
    #[error("failed to resolve current user: {0}")]
    CurrentUser(String),

    /// A work or home directory path could not be made absolute.
    #[error("failed to resolve path {path}: {source}")]
    ResolvePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Image pull failed.
    #[error("failed to pull image {image}: {source}")]
    Pull {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },

    /// Ephemeral volume creation failed.
    #[error("failed to create {role} volume: {source}")]
    VolumeCreate {
        role: &'static str,
        #[source]
        source: bollard::errors::Error,
    },

    /// Container creation failed.
    #[error("failed to create container from {image}: {source}")]
    ContainerCreate {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },

    /// Container start failed.
    #[error("failed to start container {id}: {source}")]
    ContainerStart {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    /// Archiving the work directory for upload failed.
    #[error("failed to archive work directory {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Uploading the work archive into the container failed.
    #[error("failed to copy work directory into container {id}: {source}")]
    WorkCopy {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    /// Exec session creation or attachment failed.
    #[error("failed to run command in container {id}: {source}")]
    Exec {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    /// Waiting for the container to terminate failed at the transport level.
    #[error("failed waiting for container {id}: {source}")]
    Wait {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    /// Fetching container logs failed.
    #[error("failed to read logs of container {id}: {source}")]
    Logs {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    /// Config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Config file could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Result type alias using HuskError.
pub type Result<T> = std::result::Result<T, HuskError>;
