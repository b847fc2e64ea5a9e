use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use tunehub_sync::ClientConfig;

const LOG_FILE_NAME: &str = "tunehub-kiosk.log";

/// Keeps the optional log file open for the life of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

struct MultiWriter {
    file: Option<Arc<Mutex<File>>>,
}

/// `RUST_LOG` wins; otherwise the configured level (forced to debug by
/// `TUNEHUB_DEBUG`). Returns `None` when a global subscriber already exists.
pub fn init(config: &ClientConfig) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let guard = match config.log_dir.as_deref() {
        Some(dir) => open_log_file(dir).unwrap_or_else(|err| {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }),
        None => LogGuard { file: None },
    };
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter { file: file.clone() });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(dir: &Path) -> io::Result<LogGuard> {
    std::fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}
