//! Frontend error taxonomy.

use std::path::PathBuf;

/// Errors that terminate the frontend.
///
/// Recoverable persistence misses (missing or empty save files at startup)
/// are `Ok` paths in [`crate::PersistenceManager`], not variants here: every
/// variant below is fatal to the process. There is no retry logic anywhere.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error(transparent)]
    Engine(#[from] palmboy_core::EngineError),

    #[error("engine thread failed to reach its started state")]
    EngineStart,

    #[error("no user directory available for save files")]
    NoUserDir,

    #[error("failed to read {path}")]
    PersistenceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    PersistenceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine rejected snapshot {path}")]
    SnapshotRejected { path: PathBuf },

    #[error("display initialization failed: {0}")]
    Display(String),

    #[error("gamepad initialization failed: {0}")]
    Input(String),

    #[error("event loop failed")]
    EventLoop(#[from] winit::error::EventLoopError),
}
