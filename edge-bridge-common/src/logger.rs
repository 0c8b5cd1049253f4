use edge_bridge_error::{EBError, EBResult};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::DynFilterFn,
    fmt::{self},
    layer::SubscriberExt,
    Layer, Registry,
};

const LOG_FILE_PREFIX: &str = "edge-bridge.log";

/// Console plus daily rolling file logger with a level adjustable at runtime
pub struct Logger {
    level: Arc<Mutex<Level>>,
    log_dir: PathBuf,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn new(level: Option<Level>, log_dir: impl Into<PathBuf>) -> Self {
        Logger {
            level: Arc::new(Mutex::new(level.unwrap_or(Level::INFO))),
            log_dir: log_dir.into(),
            _file_guard: None,
        }
    }

    #[inline]
    pub fn set_level(&self, new_level: Level) {
        let mut level = self.level.lock().unwrap_or_else(|e| e.into_inner());
        *level = new_level;
    }

    #[inline]
    pub fn get_level(&self) -> Level {
        *self.level.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the global subscriber.
    ///
    /// Fails if another global subscriber is already set.
    pub fn initialize(&mut self) -> EBResult<()> {
        let file_appender = rolling::daily(&self.log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| {
                metadata.level() <= &*level.lock().unwrap_or_else(|e| e.into_inner())
            })
        };
        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| {
                metadata.level() <= &*level.lock().unwrap_or_else(|e| e.into_inner())
            })
        };

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer().with_writer(std::io::stdout).with_target(false);

            layer.with_filter(console_filter)
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);
        set_global_default(subscriber).map_err(|_| EBError::from("Failed to set logger"))?;
        Ok(())
    }
}

/// Parse a configured level name, case-insensitive
pub(crate) fn parse_level(raw: &str) -> Option<Level> {
    raw.trim().parse().ok()
}
