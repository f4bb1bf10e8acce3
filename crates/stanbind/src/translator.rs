//! Translator invocation
//!
//! Runs `stanc` as a subprocess to turn Stan program text into C++ source,
//! under a hard deadline.

use crate::config::{Config, ENV_STANC};
use crate::error::TranslationError;
use crate::identity::ModelIdentity;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Output of a successful translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Generated C++ source, trimmed
    pub cpp: String,
    /// Translator warnings, trimmed; may be empty
    pub warnings: String,
}

/// Invokes the external translator binary
#[derive(Debug, Clone)]
pub struct Translator {
    program: PathBuf,
    timeout: Duration,
    temp_root: Option<PathBuf>,
}

impl Translator {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            temp_root: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let program = config.stanc.clone().unwrap_or_else(find_stanc);
        Self::new(program, config.translate_timeout)
    }

    /// Create scratch directories under `dir` instead of the system temp dir
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Translate `source` into C++.
    ///
    /// A nonzero exit is the normal outcome for a program with syntax or
    /// semantic errors and yields `TranslationError::Rejected`. The scratch
    /// directory holding the program file is removed on every path.
    pub fn translate(&self, source: &str, identity: &ModelIdentity) -> Result<Translation, TranslationError> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("stanbind_");
            b
        };
        let scratch = match &self.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let program_path = scratch.path().join(format!("{}.stan", identity.name()));
        std::fs::write(&program_path, source)?;

        let mut child = Command::new(&self.program)
            .arg("--name")
            .arg(identity.translator_name())
            .arg("--warn-pedantic")
            .arg("--print-cpp")
            .arg(&program_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TranslationError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_with_deadline(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                reap(&mut child);
                tracing::warn!(identity = %identity, timeout_ms = self.timeout.as_millis() as u64, "translator timed out");
                return Err(TranslationError::TimedOut { timeout: self.timeout });
            },
            Err(e) => {
                reap(&mut child);
                return Err(e.into());
            },
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            tracing::debug!(identity = %identity, code = ?status.code(), "translator rejected program");
            return Err(TranslationError::Rejected {
                diagnostics: stderr.trim().to_string(),
            });
        }

        Ok(Translation {
            cpp: stdout.trim().to_string(),
            warnings: stderr.trim().to_string(),
        })
    }
}

/// Locate the translator: `STANBIND_STANC`, next to the current executable,
/// then `stanc` on `PATH`
pub fn find_stanc() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_STANC) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    let binary = if cfg!(windows) { "stanc.exe" } else { "stanc" };
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(binary);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    PathBuf::from(binary)
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

// Pipes are drained on their own threads so a chatty child cannot block on a
// full pipe while we poll for its exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn id(name: &str) -> ModelIdentity {
        ModelIdentity::new(name).unwrap()
    }

    #[test]
    fn passes_fixed_flags_and_returns_trimmed_streams() {
        let dir = tempfile::tempdir().unwrap();
        let stanc = script(
            dir.path(),
            "stanc",
            r#"echo "  // args: $*  "
echo "  Warning: pedantic  " >&2"#,
        );
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();

        let translation = Translator::new(&stanc, Duration::from_secs(5))
            .with_temp_root(&scratch)
            .translate("parameters { real x; }", &id("m1"))
            .unwrap();

        assert!(translation.cpp.starts_with("// args: --name m1_model --warn-pedantic --print-cpp "));
        assert!(translation.cpp.ends_with("m1.stan"));
        assert_eq!(translation.warnings, "Warning: pedantic");
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn program_file_holds_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let stanc = script(dir.path(), "stanc", r#"for last; do :; done; cat "$last""#);

        let translation = Translator::new(&stanc, Duration::from_secs(5))
            .translate("model { }", &id("echo"))
            .unwrap();
        assert_eq!(translation.cpp, "model { }");
    }

    #[test]
    fn nonzero_exit_carries_stderr_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let stanc = script(
            dir.path(),
            "stanc",
            "printf '\\nSyntax error in m2.stan, line 1, column 0\\n\\n' >&2\nexit 1",
        );

        let err = Translator::new(&stanc, Duration::from_secs(5))
            .translate("parameters {", &id("m2"))
            .unwrap_err();
        assert_eq!(err.diagnostics(), Some("Syntax error in m2.stan, line 1, column 0"));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = Translator::new("/no/such/stanc", Duration::from_secs(1))
            .translate("model { }", &id("m"))
            .unwrap_err();
        assert!(matches!(err, TranslationError::Spawn { .. }));
    }

    #[test]
    fn slow_translator_is_killed_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let stanc = script(dir.path(), "stanc", "exec sleep 10");
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();

        let started = Instant::now();
        let err = Translator::new(&stanc, Duration::from_millis(200))
            .with_temp_root(&scratch)
            .translate("model { }", &id("slow"))
            .unwrap_err();

        assert!(matches!(err, TranslationError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn reap_kills_and_waits_for_the_child() {
        let mut child = Command::new("sleep").arg("10").spawn().unwrap();
        let started = Instant::now();
        reap(&mut child);

        assert!(child.try_wait().unwrap().is_some());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
