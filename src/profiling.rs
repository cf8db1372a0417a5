//! # Profiling
//!
//! With the `profiling` feature the store opens `info_span!`s around its hot
//! paths:
//!
//! | span                   | fields                 |
//! |------------------------|------------------------|
//! | `store.create_entity`  | `entities`             |
//! | `store.migrate`        | `from`, `to`           |
//! | `command.playback`     | `commands`             |
//! | `query.chunk_descs`    | `matched`              |
//! | `query.run_parallel`   |                        |
//!
//! Enable it in your Cargo.toml:
//!
//! ```toml
//! [dependencies]
//! archetype_store = { version = "0.3", features = ["profiling"] }
//! ```
//!
//! and install a subscriber before the work you want to measure:
//!
//! ```ignore
//! let _guard = archetype_store::profiling::init_file_subscriber("trace.json")?;
//! ```
//!
//! Without the feature, debug and trace events from the store still go to
//! whatever `tracing` subscriber the application installs.
//! Profile in release mode for accurate timings.

#[cfg(feature = "profiling")]
use std::fs::File;
#[cfg(feature = "profiling")]
use std::io;
#[cfg(feature = "profiling")]
use std::path::Path;

#[cfg(feature = "profiling")]
pub use tracing_appender::non_blocking::WorkerGuard;

/// Install a global JSON subscriber writing every span and event to `path`.
///
/// Keep the returned guard alive until the end of the run; dropping it
/// flushes the writer.
#[cfg(feature = "profiling")]
pub fn init_file_subscriber(path: impl AsRef<Path>) -> io::Result<WorkerGuard> {
    let file = File::create(path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .try_init()
        .map_err(|err| io::Error::other(err.to_string()))?;
    Ok(guard)
}
