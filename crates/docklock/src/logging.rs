use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use docklock_platform::AppPaths;
#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, WriteLogger};

/// Appends to the log file, reopening it if it was deleted while running.
struct LogFileWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogFileWriter {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn reopen_if_missing(&self) -> io::Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        *self.file.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
        Ok(())
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reopen_if_missing()?;
        match self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("log file not available")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map_or(Ok(()), File::flush)
    }
}

/// Drop the older half of the log, cutting at a line boundary.
fn trim_oversized_log(log_path: &Path, max_log_size: u64) {
    if let Ok(metadata) = std::fs::metadata(log_path)
        && metadata.len() > max_log_size
        && let Ok(contents) = std::fs::read(log_path)
    {
        let half = contents.len() / 2;
        let keep_from = contents[half..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(half, |pos| half + pos + 1);
        let _ = std::fs::write(log_path, &contents[keep_from..]);
    }
}

pub fn init_logging(paths: &AppPaths, debug_enabled: bool, max_log_size: u64) {
    let _ = paths.ensure_dirs();
    let log_path = paths.log_file();

    trim_oversized_log(&log_path, max_log_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("docklock")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));

    if let Ok(writer) = LogFileWriter::open(log_path.clone()) {
        loggers.push(WriteLogger::new(LevelFilter::Debug, config, writer));
    }

    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }

    set_debug_logging(debug_enabled);
    log::info!("Logging to {}", log_path.display());
}

/// Info and above are always recorded; debug logging adds debug records.
pub fn set_debug_logging(enabled: bool) {
    log::set_max_level(if enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use docklock_core::{ErrorKind, Failure, UpdateEvent, UpdateState, Version};
    use docklock_platform::AppPaths;

    use super::{LogFileWriter, init_logging, set_debug_logging, trim_oversized_log};
    use crate::presenter::Presenter;
    use crate::settings::AppSettings;

    #[test]
    fn writer_recreates_deleted_log_file() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("logs").join("debug.log");
        std::fs::create_dir_all(temp_dir.path().join("logs")).expect("log dir should exist");
        let mut writer =
            LogFileWriter::open(log_path.clone()).expect("writer should open log file");

        writer
            .write_all(b"checking for updates\n")
            .expect("initial write should succeed");
        std::fs::remove_dir_all(temp_dir.path().join("logs")).expect("log dir should be removable");
        writer
            .write_all(b"update available\n")
            .expect("writer should recreate file after deletion");

        let contents =
            std::fs::read_to_string(&log_path).expect("recreated file should be readable");
        assert_eq!(contents, "update available\n");
    }

    #[test]
    fn trim_keeps_recent_lines() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("debug.log");
        std::fs::write(&log_path, "check-1\ncheck-2\ncheck-3\ncheck-4\ncheck-5\n")
            .expect("test log file should be written");

        trim_oversized_log(&log_path, 10);

        let trimmed =
            std::fs::read_to_string(&log_path).expect("trimmed log file should be readable");
        assert!(!trimmed.contains("check-1"));
        assert!(trimmed.ends_with("check-5\n"));
    }

    #[test]
    fn small_logs_are_left_alone() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("debug.log");
        std::fs::write(&log_path, "check-1\n").expect("test log file should be written");

        trim_oversized_log(&log_path, 1024);

        assert_eq!(
            std::fs::read_to_string(&log_path).expect("log should be readable"),
            "check-1\n"
        );
    }

    #[test]
    fn default_settings_still_record_background_failures() {
        let temp = tempfile::tempdir().expect("temporary directory should be created");
        let paths = AppPaths::rooted_at(temp.path());
        let settings = AppSettings::default();

        init_logging(&paths, settings.debug_logging, settings.max_log_size_bytes);
        assert_eq!(log::max_level(), log::LevelFilter::Info);

        let presenter = Presenter::new(Version::parse("1.0.0").expect("version should parse"));
        presenter.present(&UpdateEvent::StateChanged {
            state: UpdateState::CheckFailed(Failure::new(ErrorKind::Network, "offline")),
            interactive: false,
        });

        let contents = std::fs::read_to_string(paths.log_file()).expect("log should be readable");
        assert!(contents.contains("Background update check failed: network error: offline"));

        set_debug_logging(true);
        assert_eq!(log::max_level(), log::LevelFilter::Debug);
        set_debug_logging(false);
        assert_eq!(log::max_level(), log::LevelFilter::Info);
    }
}
