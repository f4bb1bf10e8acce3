//! Artifact builder
//!
//! Compiles translated model source together with the fixed glue layer into a
//! shared library, keeping compiler and linker chatter off the caller's
//! stderr.

use crate::capture::StderrCapture;
use crate::config::Config;
use crate::error::BuildError;
use crate::identity::ModelIdentity;
use crate::toolchain::{CxxCompiler, Toolchain};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// C ABI glue compiled into every module
pub const GLUE_SOURCE: &str = include_str!("../glue/stanbind_glue.cpp");

pub const GLUE_FILE_NAME: &str = "stanbind_glue.cpp";

/// File name prefix of every built module
pub const MODULE_PREFIX: &str = "stanbind_model_";

/// A freshly built module
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// The shared library, inside the requested output directory
    pub module_path: PathBuf,
    /// Compiler and linker messages
    pub diagnostics: String,
    /// Compiler that produced the module
    pub compiler: CxxCompiler,
}

#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    toolchain: Toolchain,
    debug: bool,
}

impl ArtifactBuilder {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            debug: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Toolchain::from_config(config)).with_debug(config.debug)
    }

    /// In debug mode toolchain output goes straight to stderr
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Compile `native_source` into a module placed in `output_dir`.
    ///
    /// Unless debug mode is on, fd 2 is redirected for the duration of the
    /// compiler run and its content returned as diagnostics. When redirection
    /// is not possible the build runs unredirected and diagnostics only hold
    /// the compiler's stdout.
    pub fn build(
        &self,
        native_source: &str,
        identity: &ModelIdentity,
        output_dir: &Path,
    ) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let compiler = self.toolchain.compiler()?;

        let scratch = tempfile::Builder::new()
            .prefix("stanbind_build_")
            .tempdir()
            .map_err(|e| BuildError::new(format!("failed to create build directory: {}", e), ""))?;
        let model_cpp = scratch.path().join(format!("{}.cpp", identity.name()));
        let glue_cpp = scratch.path().join(GLUE_FILE_NAME);
        for (path, text) in [(&model_cpp, native_source), (&glue_cpp, GLUE_SOURCE)] {
            std::fs::write(path, text)
                .map_err(|e| BuildError::new(format!("failed to write {}: {}", path.display(), e), ""))?;
        }

        let module_path = output_dir.join(module_file_name(identity, &build_id(native_source)));

        let mut cmd = self
            .toolchain
            .shared_lib_command(&compiler, &[model_cpp.as_path(), glue_cpp.as_path()], &module_path);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::inherit());

        let capture = if self.debug {
            None
        } else {
            match StderrCapture::begin() {
                Ok(capture) => Some(capture),
                Err(e) => {
                    tracing::debug!(error = %e, "stderr not redirectable, building unredirected");
                    None
                },
            }
        };

        let result = cmd.output();

        let captured = match capture.map(StderrCapture::finish).transpose() {
            Ok(text) => text.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read captured compiler output");
                String::new()
            },
        };

        let mut diagnostics = String::new();
        if let Ok(output) = &result {
            diagnostics.push_str(&String::from_utf8_lossy(&output.stdout));
        }
        diagnostics.push_str(&captured);

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                return Err(BuildError::new(
                    format!("failed to run {}: {}", compiler.executable().display(), e),
                    diagnostics,
                ))
            },
        };

        if !output.status.success() {
            return Err(BuildError::new(
                format!("{} exited with {}", compiler.executable().display(), output.status),
                diagnostics,
            ));
        }

        if !module_path.is_file() {
            return Err(BuildError::new(
                format!("compiler produced no module at {}", module_path.display()),
                diagnostics,
            ));
        }

        tracing::info!(
            identity = %identity,
            module = %module_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built model module"
        );

        Ok(BuildOutput {
            module_path,
            diagnostics,
            compiler,
        })
    }
}

/// Module file name for a build; the build id keeps the dynamic loader from
/// confusing a rebuilt module with one it still has mapped
pub fn module_file_name(identity: &ModelIdentity, build_id: &str) -> String {
    format!(
        "{}{}_{}.{}",
        MODULE_PREFIX,
        identity.name(),
        build_id,
        CxxCompiler::shared_lib_extension()
    )
}

/// Whether `file_name` looks like a module produced by this builder
pub fn is_module_file(file_name: &str) -> bool {
    file_name.starts_with(MODULE_PREFIX)
        && Path::new(file_name).extension().and_then(|e| e.to_str()) == Some(CxxCompiler::shared_lib_extension())
}

fn build_id(native_source: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(native_source.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}


#[cfg(all(test, unix))]
mod unix_tests {
    use super::*;
    use crate::capture::serialize_fd_tests;
    use std::os::unix::fs::PermissionsExt;

    fn fake_compiler(dir: &Path, body: &str) -> CxxCompiler {
        let path = dir.join("fake-cxx");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        CxxCompiler::Custom(path)
    }

    // Writes `linked` to the path following -o and a warning to stderr.
    const WORKING: &str = r#"out=""
prev=""
for arg; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  prev="$arg"
done
echo "warning: unused variable 'x'" >&2
echo linked > "$out""#;

    #[test]
    fn captures_compiler_stderr() {
        let _serial = serialize_fd_tests();
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        let builder = ArtifactBuilder::new(Toolchain::new(Some(fake_compiler(dir.path(), WORKING))));

        let output = builder
            .build("// model", &ModelIdentity::new("m").unwrap(), &out_dir)
            .unwrap();

        assert!(output.module_path.starts_with(&out_dir));
        assert_eq!(std::fs::read_to_string(&output.module_path).unwrap(), "linked\n");
        assert!(output.diagnostics.contains("warning: unused variable 'x'"));
    }

    #[test]
    fn failure_keeps_diagnostics() {
        let _serial = serialize_fd_tests();
        let dir = tempfile::tempdir().unwrap();
        let builder = ArtifactBuilder::new(Toolchain::new(Some(fake_compiler(
            dir.path(),
            "echo \"error: no member named 'foo'\" >&2\nexit 1",
        ))));

        let err = builder
            .build("// model", &ModelIdentity::new("m").unwrap(), dir.path())
            .unwrap_err();
        assert!(err.output.contains("error: no member named 'foo'"));
        assert!(err.message.contains("exited with"));
    }

    #[test]
    fn missing_output_is_an_error() {
        let _serial = serialize_fd_tests();
        let dir = tempfile::tempdir().unwrap();
        let builder = ArtifactBuilder::new(Toolchain::new(Some(fake_compiler(dir.path(), "exit 0"))));

        let err = builder
            .build("// model", &ModelIdentity::new("m").unwrap(), dir.path())
            .unwrap_err();
        assert!(err.message.contains("produced no module"));
    }

    #[test]
    fn debug_mode_passes_stderr_through() {
        let _serial = serialize_fd_tests();
        let dir = tempfile::tempdir().unwrap();
        let builder = ArtifactBuilder::new(Toolchain::new(Some(fake_compiler(dir.path(), WORKING)))).with_debug(true);

        let output = builder
            .build("// model", &ModelIdentity::new("m").unwrap(), dir.path())
            .unwrap();
        assert!(!output.diagnostics.contains("unused variable"));
    }
}
