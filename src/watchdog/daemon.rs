//! Launching a detached watchdog.
//!
//! The watchdog runs as a separate process: the `watchdog` executable run
//! with the `serve` subcommand. Its stdin is the read end of the command
//! pipe; the caller keeps the write end inside a [`WatchdogHandle`].
//!
//! The executable is found through `WATCHDOG_BIN`, then as the current
//! executable itself, then next to it or one directory up (`target/debug`
//! for binaries under `target/debug/deps`).
//!
//! A reaper thread waits on the child from the moment it is spawned, so a
//! watchdog that exits never lingers as a zombie of the caller.
//!
//! # Session detachment
//!
//! The watchdog calls [`detach_session`] before building its async runtime,
//! while it is still single-threaded. `setsid()` makes it the leader of a new
//! session without a controlling terminal, so terminal hangups and job
//! control signals aimed at the caller never reach it.

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use crate::ipc::codec::{encode_batch, Command};
use crate::types::{Error, Result, TrackedId, WatchdogConfig};
use crate::validation::validate_non_empty;

/// Subcommand the watchdog executable runs under.
pub const SERVE_SUBCOMMAND: &str = "serve";

/// File name of the watchdog executable, without platform suffix.
pub const PROGRAM_NAME: &str = "watchdog";

/// Environment variable naming the watchdog executable explicitly.
pub const PROGRAM_ENV: &str = "WATCHDOG_BIN";

/// Resolve the watchdog executable for [`Daemonizer::new`].
pub fn locate_program() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(PROGRAM_ENV) {
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(Error::spawn(format!(
                "{} points to {}, which is not a file",
                PROGRAM_ENV,
                path.display()
            )));
        }
        return Ok(path);
    }

    let exe = std::env::current_exe()
        .map_err(|e| Error::spawn(format!("cannot locate current executable: {}", e)))?;
    find_program_near(&exe).ok_or_else(|| {
        Error::spawn(format!(
            "no {} executable near {}; set {}",
            PROGRAM_NAME,
            exe.display(),
            PROGRAM_ENV
        ))
    })
}

/// The executable itself when it is the watchdog, else a `watchdog` in its
/// directory or the parent directory.
fn find_program_near(exe: &Path) -> Option<PathBuf> {
    if exe.file_stem() == Some(OsStr::new(PROGRAM_NAME)) {
        return Some(exe.to_path_buf());
    }
    let file_name = format!("{}{}", PROGRAM_NAME, std::env::consts::EXE_SUFFIX);
    exe.ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

/// Builds and launches watchdog processes.
#[derive(Debug, Clone)]
pub struct Daemonizer {
    program: PathBuf,
    config: WatchdogConfig,
    log_file: Option<PathBuf>,
}

impl Daemonizer {
    /// Launch the watchdog executable found by [`locate_program`].
    pub fn new(config: WatchdogConfig) -> Result<Self> {
        Ok(Self::with_program(locate_program()?, config))
    }

    /// Launch a specific watchdog executable.
    pub fn with_program(program: impl Into<PathBuf>, config: WatchdogConfig) -> Self {
        Self {
            program: program.into(),
            config,
            log_file: None,
        }
    }

    /// Send the watchdog's logs to a file instead of the inherited stderr.
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Arguments passed to the watchdog executable.
    pub fn args(&self) -> Result<Vec<String>> {
        let mut args = vec![
            SERVE_SUBCOMMAND.to_string(),
            "--period-ms".to_string(),
            self.config.period.as_millis().to_string(),
            "--read-buffer-bytes".to_string(),
            self.config.read_buffer_bytes.to_string(),
            "--trip-exit-code".to_string(),
            self.config.trip_exit_code.to_string(),
            "--on-channel-closed".to_string(),
            self.config.on_channel_closed.as_str().to_string(),
        ];
        if let Some(path) = &self.log_file {
            // The watchdog changes directory to `/` once detached.
            let path = if path.is_relative() {
                std::env::current_dir()?.join(path)
            } else {
                path.clone()
            };
            args.push("--log-file".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        Ok(args)
    }

    /// Create the channel and start the watchdog.
    ///
    /// Any failure here means no watchdog is running.
    pub fn spawn(&self) -> Result<WatchdogHandle> {
        self.config.validate()?;
        validate_non_empty(&self.program.to_string_lossy(), "program")?;

        // Started before the child so a failure here leaves nothing behind.
        let (child_tx, exit_rx) = start_reaper()?;

        let mut child = std::process::Command::new(&self.program)
            .args(self.args()?)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::spawn(format!("cannot start {}: {}", self.program.display(), e))
            })?;

        let Some(writer) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::spawn("watchdog channel was not created"));
        };
        let pid = child.id();
        // The reaper only exits early if it panicked; reap inline then.
        if let Err(mpsc::SendError(mut child)) = child_tx.send(child) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::spawn("watchdog reaper is gone"));
        }

        tracing::info!(
            "watchdog_spawned: pid={}, period_ms={}",
            pid,
            self.config.period.as_millis(),
        );

        Ok(WatchdogHandle {
            pid: Some(pid),
            writer: Some(writer),
            exit_rx: Some(exit_rx),
            exit_status: None,
        })
    }
}

/// Spawn the thread that waits on the watchdog child and reports its status.
fn start_reaper() -> Result<(Sender<Child>, Receiver<ExitStatus>)> {
    let (child_tx, child_rx) = mpsc::channel::<Child>();
    let (exit_tx, exit_rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("watchdog-reaper".to_string())
        .spawn(move || {
            if let Ok(child) = child_rx.recv() {
                reap(child, &exit_tx);
            }
        })
        .map_err(|e| Error::spawn(format!("cannot start reaper thread: {}", e)))?;
    Ok((child_tx, exit_rx))
}

fn reap(mut child: Child, exit_tx: &Sender<ExitStatus>) {
    let pid = child.id();
    match child.wait() {
        Ok(status) => {
            tracing::debug!("watchdog_reaped: pid={}, status={}", pid, status);
            let _ = exit_tx.send(status);
        }
        Err(e) => tracing::warn!("watchdog_reap_failed: pid={}, error={}", pid, e),
    }
}

/// Start a watchdog with the given period and default settings.
pub fn spawn_watchdog(period: Duration) -> Result<WatchdogHandle> {
    Daemonizer::new(WatchdogConfig::with_period(period))?.spawn()
}

/// Leave the caller's session. Must run before any thread is started.
///
/// Returns `false` when the process already leads a process group (started
/// by hand from a shell) and cannot create a session; it keeps running
/// attached in that case.
#[cfg(unix)]
pub fn detach_session() -> Result<bool> {
    use nix::errno::Errno;
    use nix::unistd::setsid;

    let detached = match setsid() {
        Ok(_) => true,
        Err(Errno::EPERM) => false,
        Err(e) => return Err(e.into()),
    };

    // Don't pin the caller's working directory.
    std::env::set_current_dir("/")?;
    Ok(detached)
}

#[cfg(not(unix))]
pub fn detach_session() -> Result<bool> {
    Ok(false)
}

/// Caller side of a running watchdog.
///
/// Owns the write end of the channel. Dropping the handle closes the
/// channel; the watchdog then stops hearing arms and trips. The exit status
/// is collected by the reaper thread whether or not anyone waits for it.
#[derive(Debug)]
pub struct WatchdogHandle {
    pid: Option<u32>,
    writer: Option<ChildStdin>,
    exit_rx: Option<Receiver<ExitStatus>>,
    exit_status: Option<ExitStatus>,
}

impl WatchdogHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write raw bytes to the channel.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::channel("channel already closed"))?;
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::channel(format!("write failed: {}", e)))
    }

    /// Write several commands in a single write.
    pub fn send(&mut self, commands: &[Command]) -> Result<()> {
        self.send_raw(&encode_batch(commands))
    }

    pub fn add(&mut self, id: &str) -> Result<()> {
        let id = TrackedId::try_from(id)?;
        self.send(&[Command::Add(id)])
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        let id = TrackedId::try_from(id)?;
        self.send(&[Command::Remove(id)])
    }

    pub fn clear(&mut self) -> Result<()> {
        self.send(&[Command::Clear])
    }

    pub fn dump(&mut self) -> Result<()> {
        self.send(&[Command::Dump])
    }

    pub fn arm(&mut self) -> Result<()> {
        self.send(&[Command::Arm])
    }

    pub fn quit(&mut self) -> Result<()> {
        self.send(&[Command::Quit])
    }

    /// Close the write end without quitting.
    pub fn close(&mut self) {
        self.writer.take();
    }

    /// Exit status if the watchdog has terminated.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let Some(exit_rx) = &self.exit_rx else {
            return Ok(None);
        };
        match exit_rx.try_recv() {
            Ok(status) => {
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(status_lost()),
        }
    }

    /// Block until the watchdog terminates.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let exit_rx = self
            .exit_rx
            .as_ref()
            .ok_or_else(|| Error::internal("watchdog process handle missing"))?;
        let status = exit_rx.recv().map_err(|_| status_lost())?;
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Block until the watchdog terminates or `timeout` elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let Some(exit_rx) = &self.exit_rx else {
            return Ok(None);
        };
        match exit_rx.recv_timeout(timeout) {
            Ok(status) => {
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(status_lost()),
        }
    }
}

fn status_lost() -> Error {
    Error::internal("watchdog exit status could not be collected")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelClosePolicy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_args_carry_config() {
        let config = WatchdogConfig {
            period: Duration::from_millis(250),
            read_buffer_bytes: 64,
            trip_exit_code: 40,
            on_channel_closed: ChannelClosePolicy::Quit,
        };
        let daemonizer = Daemonizer::with_program("/usr/bin/watchdog", config)
            .log_file("/var/log/wd.log");

        assert_eq!(
            daemonizer.args().unwrap(),
            vec![
                "serve",
                "--period-ms",
                "250",
                "--read-buffer-bytes",
                "64",
                "--trip-exit-code",
                "40",
                "--on-channel-closed",
                "quit",
                "--log-file",
                "/var/log/wd.log",
            ]
        );
    }

    #[test]
    fn test_relative_log_file_made_absolute() {
        let daemonizer = Daemonizer::with_program("/usr/bin/watchdog", WatchdogConfig::default())
            .log_file("wd.log");
        let args = daemonizer.args().unwrap();
        let path = PathBuf::from(args.last().unwrap());
        assert!(path.is_absolute());
        assert!(path.ends_with("wd.log"));
    }

    #[test]
    fn test_spawn_missing_program_is_spawn_error() {
        let daemonizer =
            Daemonizer::with_program("/nonexistent/watchdog-binary", WatchdogConfig::default());
        assert!(matches!(daemonizer.spawn(), Err(Error::Spawn(_))));
    }

    #[test]
    fn test_spawn_invalid_config_is_rejected_before_launch() {
        let daemonizer = Daemonizer::with_program(
            "/nonexistent/watchdog-binary",
            WatchdogConfig::with_period(Duration::ZERO),
        );
        assert!(matches!(daemonizer.spawn(), Err(Error::Validation(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_handle_reports_write_to_exited_process() {
        // `true` exits without reading; the pipe breaks once it is gone.
        let daemonizer = Daemonizer::with_program("true", WatchdogConfig::default());
        let mut handle = daemonizer.spawn().unwrap();
        let status = handle.wait().unwrap();
        assert!(status.success());

        let result = handle.send_raw(b"arm;");
        assert!(matches!(result, Err(Error::Channel(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_closed_handle_refuses_writes() {
        let daemonizer = Daemonizer::with_program("true", WatchdogConfig::default());
        let mut handle = daemonizer.spawn().unwrap();
        handle.close();
        assert!(matches!(handle.arm(), Err(Error::Channel(_))));
        assert!(handle.wait().unwrap().success());
    }

    #[test]
    fn test_invalid_id_rejected_before_write() {
        let mut handle = WatchdogHandle {
            pid: None,
            writer: None,
            exit_rx: None,
            exit_status: None,
        };
        assert!(matches!(handle.add("a;b"), Err(Error::Validation(_))));
        assert!(matches!(handle.add(""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_find_program_accepts_the_watchdog_itself() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join(format!("watchdog{}", std::env::consts::EXE_SUFFIX));
        assert_eq!(find_program_near(&exe), Some(exe.clone()));
    }

    #[test]
    fn test_find_program_looks_beside_and_one_level_up() {
        let dir = tempfile::tempdir().unwrap();
        let deps = dir.path().join("deps");
        std::fs::create_dir(&deps).unwrap();
        let runner = deps.join("daemon_e2e-0123abcd");
        std::fs::write(&runner, b"").unwrap();

        assert_eq!(find_program_near(&runner), None);

        let above = dir
            .path()
            .join(format!("watchdog{}", std::env::consts::EXE_SUFFIX));
        std::fs::write(&above, b"").unwrap();
        assert_eq!(find_program_near(&runner), Some(above));

        let beside = deps.join(format!("watchdog{}", std::env::consts::EXE_SUFFIX));
        std::fs::write(&beside, b"").unwrap();
        assert_eq!(find_program_near(&runner), Some(beside));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_collected_without_waiting() {
        let daemonizer = Daemonizer::with_program("true", WatchdogConfig::default());
        let mut handle = daemonizer.spawn().unwrap();
        let status = handle
            .wait_timeout(Duration::from_secs(10))
            .unwrap()
            .expect("child did not exit");
        assert!(status.success());
        assert_eq!(handle.try_wait().unwrap(), Some(status));
    }
}
