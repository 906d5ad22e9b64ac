/// Logger setup for training runs
///
/// Records go to stderr and, when a log file is given, to that file as well so
/// the reporter can archive it into the run directory at the end.
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target, WriteStyle};

use crate::Result;

/// Writes every record to stderr and to the run log file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialize the global logger
///
/// `level` is the default filter, `RUST_LOG` still takes precedence. Calling
/// this twice leaves the first logger in place and logs a warning.
pub fn setup_logging(log_file: Option<&Path>, level: &str) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        builder
            .target(Target::Pipe(Box::new(TeeWriter { file })))
            .write_style(WriteStyle::Never);
    }

    if builder.try_init().is_err() {
        log::warn!("Logger already initialized, keeping the existing one");
    }

    Ok(())
}
