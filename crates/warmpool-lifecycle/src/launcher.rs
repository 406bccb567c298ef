//! Host process launcher.
//!
//! Spawns siblings as detached children and ends the current process.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info};
use warmpool_core::ProcessLauncher;

/// Teardown run right before the process exits (e.g. deregistration).
pub type TeardownHook = Box<dyn Fn() + Send + Sync>;

/// [`ProcessLauncher`] backed by `std::process`.
pub struct SystemLauncher {
    /// Arguments passed to every sibling.
    args: Vec<OsString>,
    /// Environment overrides passed to every sibling.
    envs: Vec<(OsString, OsString)>,
    teardown: Option<TeardownHook>,
}

impl SystemLauncher {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            teardown: None,
        }
    }

    /// Siblings receive this process's own arguments, minus `--listen`.
    ///
    /// A fixed listen address would make every sibling fail to bind; pair
    /// this with [`SystemLauncher::with_env`] to hand them a free port.
    pub fn inherit_args() -> Self {
        Self::new(strip_listen_args(std::env::args_os().skip(1)))
    }

    /// Set `key=value` in every sibling's environment.
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run `hook` before exiting in [`ProcessLauncher::terminate_self`].
    pub fn with_teardown(mut self, hook: TeardownHook) -> Self {
        self.teardown = Some(hook);
        self
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

/// Drop `--listen <addr>` and `--listen=<addr>` from an argument list.
pub fn strip_listen_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut kept = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--listen" {
            args.next();
            continue;
        }
        if arg.to_str().is_some_and(|a| a.starts_with("--listen=")) {
            continue;
        }
        kept.push(arg);
    }
    kept
}

impl ProcessLauncher for SystemLauncher {
    fn spawn_sibling(&self, executable: &Path) -> io::Result<()> {
        let mut child = Command::new(executable)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .spawn()?;
        let pid = child.id();
        info!(pid, executable = %executable.display(), "sibling process started");

        // Reap the child when it exits so it does not linger as a zombie.
        thread::Builder::new()
            .name(format!("warmpool-reap-{pid}"))
            .spawn(move || {
                let status = child.wait();
                debug!(pid, ?status, "sibling process exited");
            })?;
        Ok(())
    }

    fn terminate_self(&self) {
        if let Some(teardown) = &self.teardown {
            teardown();
        }
        info!("process exiting");
        std::process::exit(0);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn spawn_missing_executable_fails() {
        let launcher = SystemLauncher::new(Vec::<OsString>::new());
        let err = launcher
            .spawn_sibling(Path::new("/nonexistent/warmpoold"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn spawn_does_not_wait_for_child() {
        let launcher = SystemLauncher::new(["-c", "sleep 5"]);
        let start = std::time::Instant::now();
        launcher.spawn_sibling(Path::new("/bin/sh")).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn args_are_kept() {
        let launcher = SystemLauncher::new(["run", "--config", "/etc/warmpool.toml"]);
        assert_eq!(launcher.args().len(), 3);
        assert_eq!(launcher.args()[0], OsString::from("run"));
    }

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn fixed_listen_address_is_not_inherited() {
        let stripped = strip_listen_args(os(&[
            "--log-format",
            "json",
            "run",
            "--listen",
            "0.0.0.0:7000",
            "--min-reserve",
            "2",
        ]));
        assert_eq!(stripped, os(&["--log-format", "json", "run", "--min-reserve", "2"]));

        let stripped = strip_listen_args(os(&["run", "--listen=0.0.0.0:7000", "--tick-interval", "1"]));
        assert_eq!(stripped, os(&["run", "--tick-interval", "1"]));
    }

    #[test]
    fn sibling_sees_env_overrides() {
        let dir = std::env::temp_dir().join(format!("warmpool-launcher-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("listen");
        let script = format!("printf %s \"$WARMPOOL_LISTEN\" > {}", out.display());

        let launcher =
            SystemLauncher::new(["-c", script.as_str()]).with_env("WARMPOOL_LISTEN", "0.0.0.0:0");
        launcher.spawn_sibling(Path::new("/bin/sh")).unwrap();

        let mut written = String::new();
        for _ in 0..200 {
            written = std::fs::read_to_string(&out).unwrap_or_default();
            if !written.is_empty() {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(written, "0.0.0.0:0");
    }
}
