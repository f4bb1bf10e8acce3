//! C++ compiler toolchain abstraction
//!
//! Detects and invokes the C++ compiler that turns translated model source and
//! the glue layer into a shared library.

use crate::config::Config;
use crate::error::BuildError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Supported C++ compilers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CxxCompiler {
    /// clang++ (default on macOS)
    Clang,
    /// g++ (default on Linux)
    Gcc,
    /// MSVC cl.exe (default on Windows)
    Msvc,
    /// Any other driver accepting gcc-style flags
    Custom(PathBuf),
}

impl CxxCompiler {
    /// Get the default compiler for the current platform
    pub fn default_for_platform() -> Self {
        #[cfg(target_os = "macos")]
        {
            CxxCompiler::Clang
        }
        #[cfg(target_os = "windows")]
        {
            CxxCompiler::Msvc
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            CxxCompiler::Gcc
        }
    }

    /// Map a compiler name or path (as found in `CXX`-style settings)
    pub fn from_name(name: &str) -> Self {
        match name {
            "clang++" | "clang" => CxxCompiler::Clang,
            "g++" | "gcc" => CxxCompiler::Gcc,
            "cl" | "cl.exe" => CxxCompiler::Msvc,
            other => CxxCompiler::Custom(PathBuf::from(other)),
        }
    }

    /// Get the compiler executable
    pub fn executable(&self) -> &Path {
        match self {
            CxxCompiler::Clang => Path::new("clang++"),
            CxxCompiler::Gcc => Path::new("g++"),
            CxxCompiler::Msvc => Path::new("cl.exe"),
            CxxCompiler::Custom(path) => path,
        }
    }

    /// Check if the compiler is available
    pub fn is_available(&self) -> bool {
        if let CxxCompiler::Custom(path) = self {
            if path.components().count() > 1 {
                return path.is_file();
            }
        }
        Command::new(self.executable())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Get the shared library extension for the current platform
    pub fn shared_lib_extension() -> &'static str {
        if cfg!(target_os = "windows") {
            "dll"
        } else if cfg!(target_os = "macos") {
            "dylib"
        } else {
            "so"
        }
    }
}

/// Find the best available compiler
pub fn find_compiler() -> Result<CxxCompiler, BuildError> {
    let default = CxxCompiler::default_for_platform();

    if default.is_available() {
        return Ok(default);
    }

    let alternatives = match default {
        CxxCompiler::Clang => vec![CxxCompiler::Gcc],
        CxxCompiler::Gcc => vec![CxxCompiler::Clang],
        CxxCompiler::Msvc => vec![CxxCompiler::Clang, CxxCompiler::Gcc],
        CxxCompiler::Custom(_) => vec![],
    };

    for alt in alternatives {
        if alt.is_available() {
            return Ok(alt);
        }
    }

    Err(BuildError::new(
        format!(
            "no C++ compiler found; install {} or set STANBIND_CXX",
            default.executable().display()
        ),
        "",
    ))
}

/// A configured compiler invocation producing shared libraries
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Compiler to use; discovered lazily when unset
    compiler: Option<CxxCompiler>,
    include_dirs: Vec<PathBuf>,
    defines: Vec<String>,
    cxx_flags: Vec<String>,
    link_args: Vec<String>,
    opt_level: u8,
}

impl Toolchain {
    pub fn new(compiler: Option<CxxCompiler>) -> Self {
        Self {
            compiler,
            include_dirs: Vec::new(),
            defines: Vec::new(),
            cxx_flags: Vec::new(),
            link_args: Vec::new(),
            opt_level: crate::config::DEFAULT_OPT_LEVEL,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            compiler: config.compiler.clone(),
            include_dirs: config.include_dirs.clone(),
            defines: config.defines.clone(),
            cxx_flags: config.cxx_flags.clone(),
            link_args: config.link_args.clone(),
            opt_level: config.opt_level.min(3),
        }
    }

    pub fn with_opt_level(mut self, level: u8) -> Self {
        self.opt_level = level.min(3);
        self
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn with_link_arg(mut self, arg: impl Into<String>) -> Self {
        self.link_args.push(arg.into());
        self
    }

    /// Resolve the compiler, detecting one if none was configured
    pub fn compiler(&self) -> Result<CxxCompiler, BuildError> {
        match &self.compiler {
            Some(c) => Ok(c.clone()),
            None => find_compiler(),
        }
    }

    /// Build the command compiling `sources` into the shared library `output`
    pub fn shared_lib_command(&self, compiler: &CxxCompiler, sources: &[&Path], output: &Path) -> Command {
        let mut cmd = Command::new(compiler.executable());

        match compiler {
            CxxCompiler::Clang | CxxCompiler::Gcc | CxxCompiler::Custom(_) => {
                cmd.arg("-std=c++17")
                    .arg("-shared")
                    .arg("-fPIC")
                    .arg(format!("-O{}", self.opt_level))
                    .arg("-o")
                    .arg(output);

                for inc in &self.include_dirs {
                    cmd.arg("-I").arg(inc);
                }
                for define in &self.defines {
                    cmd.arg(format!("-D{}", define));
                }
                cmd.args(&self.cxx_flags);
                cmd.args(sources);
                cmd.args(&self.link_args);

                #[cfg(target_os = "macos")]
                {
                    cmd.arg("-undefined").arg("dynamic_lookup");
                }

                #[cfg(target_os = "linux")]
                {
                    cmd.arg("-lm");
                    cmd.arg("-lpthread");
                }
            },
            CxxCompiler::Msvc => {
                cmd.arg("/nologo")
                    .arg("/std:c++17")
                    .arg("/EHsc")
                    .arg("/LD")
                    .arg(format!("/O{}", self.opt_level.clamp(1, 2)))
                    .arg(format!("/Fe:{}", output.display()));

                for inc in &self.include_dirs {
                    cmd.arg(format!("/I{}", inc.display()));
                }
                for define in &self.defines {
                    cmd.arg(format!("/D{}", define));
                }
                cmd.args(&self.cxx_flags);
                cmd.args(sources);
                if !self.link_args.is_empty() {
                    cmd.arg("/link").args(&self.link_args);
                }
            },
        }

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn maps_common_compiler_names() {
        assert_eq!(CxxCompiler::from_name("clang++"), CxxCompiler::Clang);
        assert_eq!(CxxCompiler::from_name("g++"), CxxCompiler::Gcc);
        assert_eq!(CxxCompiler::from_name("c++"), CxxCompiler::Custom(PathBuf::from("c++")));
        assert_eq!(CxxCompiler::from_name("c++").executable(), Path::new("c++"));
        assert_eq!(CxxCompiler::from_name("cl.exe"), CxxCompiler::Msvc);
        assert_eq!(
            CxxCompiler::from_name("/opt/bin/fake-cxx"),
            CxxCompiler::Custom(PathBuf::from("/opt/bin/fake-cxx"))
        );
    }

    #[test]
    fn gcc_style_command_orders_sources_before_link_args() {
        let toolchain = Toolchain::new(Some(CxxCompiler::Gcc))
            .with_opt_level(5)
            .with_include_dir("/opt/stan/src")
            .with_link_arg("-ltbb");
        let cmd = toolchain.shared_lib_command(
            &CxxCompiler::Gcc,
            &[Path::new("model.cpp"), Path::new("glue.cpp")],
            Path::new("out/libm.so"),
        );

        assert_eq!(cmd.get_program(), "g++");
        let args = args(&cmd);
        assert!(args.contains(&"-O3".to_string()));
        assert!(args.contains(&"-shared".to_string()));
        let out = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[out + 1], "out/libm.so");
        let inc = args.iter().position(|a| a == "-I").unwrap();
        assert_eq!(args[inc + 1], "/opt/stan/src");
        let model = args.iter().position(|a| a == "model.cpp").unwrap();
        let link = args.iter().position(|a| a == "-ltbb").unwrap();
        assert!(model < link);
    }

    #[test]
    fn custom_compiler_with_missing_path_is_unavailable() {
        let compiler = CxxCompiler::Custom(PathBuf::from("/definitely/not/here/c++"));
        assert!(!compiler.is_available());
    }
}
