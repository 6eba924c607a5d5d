//! Session runner for triangulating per-camera 2D landmark files into a 3D
//! pose sequence file.
//!
//! A session is described by a YAML [config::SessionConfig]. The
//! `landmark-triangulate` binary wraps [session::run_session] with logging
//! setup and Ctrl-C handling.
#![deny(rust_2018_idioms)]

pub mod config;
pub mod logging;
pub mod session;

/// The session error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup error on variable: {source}")]
    ShellExpandLookupVarError {
        #[from]
        source: shellexpand::LookupError<std::env::VarError>,
    },
    #[error("path is not valid UTF-8: {0:?}")]
    NonUtf8Path(std::path::PathBuf),
    #[error("reading config {file:?}: {source}")]
    ConfigRead {
        file: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Mvg(#[from] landmark_mvg::LandmarkMvgError),
}

pub type Result<T> = std::result::Result<T, Error>;
