//! Minimal process-tagged, leveled logger shared by the master and every
//! worker. Each process sets its own role once at startup; every log line
//! after that carries the role, a level, and a timestamp, colorized when
//! writing to a TTY.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

static ROLE: OnceLock<RwLock<String>> = OnceLock::new();
static TARGET: OnceLock<Mutex<Target>> = OnceLock::new();

enum Target {
    Stderr,
    File { path: PathBuf, handle: File },
}

fn role_cell() -> &'static RwLock<String> {
    ROLE.get_or_init(|| RwLock::new("master".to_string()))
}

fn target_cell() -> &'static Mutex<Target> {
    TARGET.get_or_init(|| Mutex::new(Target::Stderr))
}

/// Sets the role tag (`"master"`, `"worker[3]"`, `"mold"`, ...) used on every
/// subsequent log line written by this process.
pub fn set_role(role: impl Into<String>) {
    *role_cell().write().unwrap() = role.into();
}

pub fn role() -> String {
    role_cell().read().unwrap().clone()
}

/// Directs subsequent log output at a file instead of stderr.
pub fn set_log_file(path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref().to_path_buf();
    let handle = OpenOptions::new().create(true).append(true).open(&path)?;
    *target_cell().lock().unwrap() = Target::File { path, handle };
    Ok(())
}

/// Closes and reopens the current log file target (a no-op for `Stderr`).
/// Called by the master on `SIGUSR1` and propagated to every worker so
/// externally rotated log files pick up a fresh inode.
pub fn reopen() -> std::io::Result<()> {
    let mut guard = target_cell().lock().unwrap();
    if let Target::File { path, handle } = &mut *guard {
        let fresh = OpenOptions::new().create(true).append(true).open(&path)?;
        *handle = fresh;
    }
    Ok(())
}

fn format_time(now: SystemTime) -> String {
    let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let days = secs / 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    let hour = (secs % 86_400) / 3600;
    let minute = (secs % 3600) / 60;
    let second = secs % 60;
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, month, day, hour, minute, second
    )
}

/// Howard Hinnant's civil-from-days algorithm; avoids pulling in a date
/// crate just to render a timestamp in log lines.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[doc(hidden)]
pub fn write_line(level: &str, color: &str, body: std::fmt::Arguments<'_>) {
    let ts = format_time(SystemTime::now());
    let tag = role();
    let mut guard = target_cell().lock().unwrap();
    match &mut *guard {
        Target::Stderr => {
            let _ = writeln!(
                std::io::stderr(),
                "[{ts}] \x1b[2m{tag}\x1b[0m \x1b[{color}m{level}\x1b[0m: {body}"
            );
        }
        Target::File { handle, .. } => {
            let _ = writeln!(handle, "[{ts}] {tag} {level}: {body}");
        }
    }
}

#[macro_export]
macro_rules! log {
    ($level:expr, $color:expr, $($arg:tt)*) => {
        $crate::write_line($level, $color, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! trace { ($($arg:tt)*) => { $crate::log!("TRACE", "34", $($arg)*); }; }
#[macro_export]
macro_rules! debug { ($($arg:tt)*) => { $crate::log!("DEBUG", "36", $($arg)*); }; }
#[macro_export]
macro_rules! info { ($($arg:tt)*) => { $crate::log!("INFO ", "32", $($arg)*); }; }
#[macro_export]
macro_rules! warn { ($($arg:tt)*) => { $crate::log!("WARN ", "33", $($arg)*); }; }
#[macro_export]
macro_rules! error { ($($arg:tt)*) => { $crate::log!("ERROR", "31", $($arg)*); }; }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults_to_master() {
        assert_eq!(role(), "master");
    }

    #[test]
    fn set_role_is_visible_to_subsequent_calls() {
        set_role("worker[4]");
        assert_eq!(role(), "worker[4]");
        set_role("master");
    }

    #[test]
    fn format_time_round_trips_a_known_epoch_second() {
        // 2021-01-01T00:00:00Z
        let t = UNIX_EPOCH + std::time::Duration::from_secs(1_609_459_200);
        assert_eq!(format_time(t), "2021-01-01 00:00:00");
    }

    #[test]
    fn reopen_on_stderr_target_is_a_no_op() {
        assert!(reopen().is_ok());
    }

    #[test]
    fn set_log_file_and_reopen_preserve_the_path() {
        let dir = std::env::temp_dir().join(format!("netlog-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.log");
        set_log_file(&path).unwrap();
        crate::info!("hello {}", "world");
        reopen().unwrap();
        crate::info!("after reopen");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello world"));
        assert!(contents.contains("after reopen"));
        set_log_file(std::env::temp_dir().join(format!("netlog-reset-{}", std::process::id())))
            .unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
