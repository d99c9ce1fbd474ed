
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use chrono::Local;
use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use crate::error::{Error, Result};

/// Logging context of one batch run.
///
/// Events go to a timestamped file under the log directory and, message only,
/// to stderr. The subscriber is installed for the current thread until the
/// value is dropped, so nothing leaks into the next run.
pub struct RunLog {
    path: PathBuf,
    _guard: DefaultGuard,
}

impl RunLog {

    pub fn start(log_dir: &Path) -> Result<RunLog> {

        fs::create_dir_all(log_dir).map_err(|e| Error::io(log_dir, e))?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = log_dir.join(format!("matrix_reduction_{}.log", timestamp));
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false);
        let console_layer = fmt::layer()
            .with_writer(io::stderr)
            .without_time()
            .with_level(false)
            .with_target(false);

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(console_layer);

        let guard = tracing::subscriber::set_default(subscriber);
        Ok(Self { path, _guard: guard })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
