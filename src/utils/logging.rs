//! Logger setup with a runtime verbosity switch.
//!
//! env_logger does the formatting and module filtering; a thin wrapper consults the shared
//! `Verbosity` flag on every `enabled`/`log` call, so SIGUSR1 changes the effective level
//! without reinstalling anything.
//!
//! With `logging.file` set, everything goes to a size-rotated file and errors are
//! additionally echoed to stderr.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use env_logger::{Logger, Target};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::LoggingError;

/// Shared normal/verbose switch.
#[derive(Debug, Clone, Default)]
pub struct Verbosity {
    verbose: Arc<AtomicBool>,
}

impl Verbosity {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose: Arc::new(AtomicBool::new(verbose)),
        }
    }

    #[inline]
    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Returns the new setting.
    pub fn toggle(&self) -> bool {
        !self.verbose.fetch_xor(true, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: LevelFilter,
    pub verbose_level: LevelFilter,
    pub file: Option<PathBuf>,
    pub max_bytes: u64,
    pub backup_count: usize,
}

pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    LevelFilter::from_str(level.trim()).map_err(|_| LoggingError::Level(level.to_string()))
}

/// Size-rotated log file: `path` → `path.1` → … → `path.N`, oldest dropped.
/// Rotation is off when either `max_bytes` or `backup_count` is 0.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
    len: u64,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backup_count,
            file,
            len,
        })
    }

    fn backup_path(&self, generation: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{generation}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        match fs::remove_file(self.backup_path(self.backup_count)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        for generation in (1..self.backup_count).rev() {
            let from = self.backup_path(generation);
            if from.exists() {
                fs::rename(&from, self.backup_path(generation + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.len = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let rotating = self.max_bytes > 0 && self.backup_count > 0;
        if rotating && self.len > 0 && self.len + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Error-only logger with a short `LEVEL: message` format.
fn error_echo(target: Target) -> Logger {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Error)
        .write_style(env_logger::WriteStyle::Never)
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
        .target(target)
        .build()
}

struct ToggleLogger {
    inner: Logger,
    /// Set when `inner` writes to a file.
    echo: Option<Logger>,
    level: LevelFilter,
    verbose_level: LevelFilter,
    verbosity: Verbosity,
}

impl ToggleLogger {
    fn current_level(&self) -> LevelFilter {
        if self.verbosity.is_verbose() {
            self.verbose_level
        } else {
            self.level
        }
    }
}

impl Log for ToggleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.current_level() && self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.inner.log(record);
        if let Some(echo) = &self.echo {
            if record.level() == Level::Error {
                echo.log(record);
            }
        }
    }

    fn flush(&self) {
        self.inner.flush();
        if let Some(echo) = &self.echo {
            echo.flush();
        }
    }
}

/// Install the global logger. `RUST_LOG` module directives still apply on top.
pub fn init(options: &LoggingOptions, verbosity: Verbosity) -> Result<(), LoggingError> {
    let ceiling = options.level.max(options.verbose_level);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(ceiling);
    builder.parse_default_env();
    builder.format_timestamp_micros();

    let mut echo = None;
    if let Some(path) = &options.file {
        let file = RotatingFile::open(path, options.max_bytes, options.backup_count).map_err(
            |source| LoggingError::File {
                path: path.clone(),
                source,
            },
        )?;
        builder.target(Target::Pipe(Box::new(file)));
        echo = Some(error_echo(Target::Stderr));
    }

    let logger = ToggleLogger {
        inner: builder.build(),
        echo,
        level: options.level,
        verbose_level: options.verbose_level,
        verbosity,
    };

    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(ceiling);
    Ok(())
}
