/*
================================================================================
                            pathoview Logging System
================================================================================

Logging for the pathoview binary, built on the `log` facade (debug!, info!...).

**Components**:
- `BufferLogger`: keeps the most recent pathoview log lines in memory
- `CompositeLogger`: console output (env_logger) plus the buffer
- `setup_logger()`: installs the composite logger with default filters
- `setup_panic_hook()`: writes panic.log with a backtrace and the buffer
- `export_debug_logs()`: writes the buffer to debug.log

**Log Levels**:
- Debug builds: DEBUG and above for pathoview
- Release builds: `release_level` (the CLI passes INFO) unless RUST_LOG is set
- The buffer always captures DEBUG and above (last 1000 entries)

**File Locations**: `<data_dir>/pathoview/logs/` via the dirs crate.

================================================================================
*/

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use chrono::Utc;
use env_logger::fmt::{Color, Formatter};
use log::{info, Level, LevelFilter, Metadata, Record};

const MAX_LOG_LINES: usize = 1000;
const LOG_TARGET: &str = "pathoview";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub type LogBuffer = Arc<Mutex<VecDeque<String>>>;

struct BufferLogger {
    log_buffer: LogBuffer,
}

impl BufferLogger {
    fn new() -> Self {
        Self {
            log_buffer: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES))),
        }
    }

    fn log_to_buffer(&self, message: &str, target: &str, line: Option<u32>) {
        if !target.starts_with(LOG_TARGET) {
            return;
        }
        // A poisoned buffer only means a panic happened mid-push; keep logging.
        let mut buffer = match self.log_buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.len() == MAX_LOG_LINES {
            buffer.pop_front();
        }

        let formatted_message = match line {
            Some(line_num) => format!("{target}:{line_num} {message}"),
            None => format!("{target} {message}"),
        };
        buffer.push_back(formatted_message);
    }

    fn get_shared_buffer(&self) -> LogBuffer {
        Arc::clone(&self.log_buffer)
    }
}

impl log::Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(LOG_TARGET) && metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!("{:<5} {}", record.level(), record.args());
            self.log_to_buffer(&message, record.target(), record.line());
        }
    }

    fn flush(&self) {}
}

struct CompositeLogger {
    console_logger: env_logger::Logger,
    buffer_logger: BufferLogger,
}

impl log::Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console_logger.enabled(metadata) || self.buffer_logger.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.console_logger.enabled(record.metadata()) {
            self.console_logger.log(record);
        }
        if self.buffer_logger.enabled(record.metadata()) {
            self.buffer_logger.log(record);
        }
    }

    fn flush(&self) {
        self.console_logger.flush();
        self.buffer_logger.flush();
    }
}

/// Install the composite logger. Returns the shared buffer for export and
/// the panic hook.
pub fn setup_logger(release_level: LevelFilter) -> Result<LogBuffer, log::SetLoggerError> {
    let buffer_logger = BufferLogger::new();
    let shared_buffer = buffer_logger.get_shared_buffer();

    let mut builder = env_logger::Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        // Everything but our own crate stays quiet
        builder.filter(None, LevelFilter::Off);
        if cfg!(debug_assertions) {
            builder.filter(Some(LOG_TARGET), LevelFilter::Debug);
        } else {
            builder.filter(Some(LOG_TARGET), release_level);
        }
    }

    // Console goes to stderr so JSON written to stdout stays clean
    builder.target(env_logger::Target::Stderr);

    builder.format(|buf: &mut Formatter, record: &Record| {
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);

        let module_info = match (record.module_path(), record.line()) {
            (Some(module), Some(line)) => format!("{module}:{line}"),
            (Some(module), None) => module.to_string(),
            (None, Some(line)) => format!("line:{line}"),
            (None, None) => "unknown".to_string(),
        };

        let mut level_style = buf.style();
        let mut meta_style = buf.style();

        match record.level() {
            Level::Error => level_style.set_color(Color::Red).set_bold(true),
            Level::Warn => level_style.set_color(Color::Yellow).set_bold(true),
            Level::Info => level_style.set_color(Color::Green).set_bold(true),
            Level::Debug => level_style.set_color(Color::Blue).set_bold(true),
            Level::Trace => level_style.set_color(Color::White),
        };

        // Color::Rgb does not render on the macOS terminal
        #[cfg(target_os = "macos")]
        meta_style.set_color(Color::Blue);
        #[cfg(not(target_os = "macos"))]
        meta_style.set_color(Color::Rgb(120, 120, 120));

        writeln!(
            buf,
            "{} {} {} {}",
            meta_style.value(timestamp),
            level_style.value(record.level()),
            meta_style.value(module_info),
            record.args()
        )
    });

    let composite_logger = CompositeLogger {
        console_logger: builder.build(),
        buffer_logger,
    };

    log::set_boxed_logger(Box::new(composite_logger))?;
    // Filtering happens in the loggers themselves
    log::set_max_level(LevelFilter::Trace);

    Ok(shared_buffer)
}

pub fn get_log_directory(app_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(app_name)
        .join("logs")
}

/// Write the buffered log lines to `debug.log` in the log directory.
///
/// Only lines from the `log` macros are captured, not plain `println!`
/// output.
pub fn export_debug_logs(app_name: &str, log_buffer: &LogBuffer) -> Result<PathBuf, std::io::Error> {
    let log_dir_path = get_log_directory(app_name);
    std::fs::create_dir_all(&log_dir_path)?;
    let debug_log_path = log_dir_path.join("debug.log");
    write_debug_log(&debug_log_path, log_buffer)?;
    // Logged after the copy so the export does not include itself
    info!("Debug logs exported to: {}", debug_log_path.display());
    Ok(debug_log_path)
}

fn write_debug_log(path: &Path, log_buffer: &LogBuffer) -> Result<(), std::io::Error> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let timestamp = Utc::now().format(TIMESTAMP_FORMAT);

    let log_entries: Vec<String> = {
        let buffer = match log_buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.iter().cloned().collect()
    };

    writeln!(file, "{timestamp} [DEBUG EXPORT] =====================================")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] pathoview Debug Log Export")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Maximum captured entries: {MAX_LOG_LINES}")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] =====================================")?;
    writeln!(file)?;

    if log_entries.is_empty() {
        writeln!(file, "{timestamp} [DEBUG EXPORT] No log entries found in buffer")?;
    } else {
        writeln!(file, "{timestamp} [DEBUG EXPORT] Found {} log entries:", log_entries.len())?;
        writeln!(file)?;
        for log_entry in &log_entries {
            writeln!(file, "{timestamp} {log_entry}")?;
        }
    }

    writeln!(file)?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Total entries exported: {}", log_entries.len())?;
    file.flush()
}

pub fn setup_panic_hook(app_name: &str, log_buffer: LogBuffer) {
    let log_file_path = get_log_directory(app_name).join("panic.log");

    panic::set_hook(Box::new(move |info| {
        let backtrace = backtrace::Backtrace::new();
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);

        let location = match info.location() {
            Some(location) => format!("{}:{}", location.file(), location.line()),
            None => "unknown location".to_string(),
        };

        let header_msg = format!("[PANIC] at {location} - {info}");
        let backtrace_lines: Vec<String> = format!("{backtrace:?}")
            .lines()
            .map(|line| format!("[BACKTRACE] {}", line.trim()))
            .collect();

        eprintln!("\n\n{header_msg}");
        eprintln!("[PANIC] Backtrace:");
        for line in &backtrace_lines {
            eprintln!("{line}");
        }

        // Nothing to propagate to from inside a panic hook; a failed write
        // just means no panic.log.
        let written = (|| -> std::io::Result<()> {
            if let Some(parent) = log_file_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&log_file_path)?;

            writeln!(file, "{timestamp} {header_msg}")?;
            writeln!(file, "{timestamp} [PANIC] Backtrace:")?;
            for line in &backtrace_lines {
                writeln!(file, "{timestamp} {line}")?;
            }
            writeln!(file)?;
            writeln!(file)?;

            writeln!(file, "{timestamp} [PANIC] Last {MAX_LOG_LINES} log entries:")?;
            let buffer = match log_buffer.lock() {
                Ok(buffer) => buffer,
                Err(poisoned) => poisoned.into_inner(),
            };
            for log in buffer.iter() {
                writeln!(file, "{timestamp} {log}")?;
            }
            Ok(())
        })();

        match written {
            Ok(()) => eprintln!("\nA complete crash log has been written to: {}", log_file_path.display()),
            Err(e) => eprintln!("\nFailed to write crash log {}: {e}", log_file_path.display()),
        }
    }));
}
