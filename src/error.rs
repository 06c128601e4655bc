//! Error types for scene loading, density persistence and VPL tracing.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Density or preintegrated density file is truncated or has a bad header
    #[error("Invalid density file: {0}")]
    InvalidDensityFile(String),

    /// Scene description could not be turned into geometry
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// Settings are out of range or inconsistent
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// A light array is at capacity
    #[error("Light array is full (capacity: {capacity})")]
    LightArrayFull { capacity: usize },

    /// A worker thread exited without sending its result
    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    /// The photon tracer ran out of its path budget before filling the VPL quota
    #[error("VPL quota not met: {vpls} of {target} VPLs after {paths} paths")]
    VplQuotaNotMet {
        vpls: usize,
        target: usize,
        paths: u32,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (settings or scene) parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub fn invalid_scene(msg: impl Into<String>) -> Self {
        Self::InvalidScene(msg.into())
    }

    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
