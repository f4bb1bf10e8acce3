//! Runtime configuration
//!
//! Settings come from explicit `with_*` calls or from `STANBIND_*`
//! environment variables (`Config::from_env`).

use crate::error::Error;
use crate::toolchain::CxxCompiler;
use std::path::PathBuf;
use std::time::Duration;

/// Default translator deadline
pub const DEFAULT_TRANSLATE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default optimization level passed to the C++ compiler
pub const DEFAULT_OPT_LEVEL: u8 = 2;

pub const ENV_CACHE_DIR: &str = "STANBIND_CACHE_DIR";
pub const ENV_STANC: &str = "STANBIND_STANC";
pub const ENV_CXX: &str = "STANBIND_CXX";
pub const ENV_INCLUDE: &str = "STANBIND_INCLUDE";
pub const ENV_LDFLAGS: &str = "STANBIND_LDFLAGS";
pub const ENV_CXXFLAGS: &str = "STANBIND_CXXFLAGS";
pub const ENV_OPT_LEVEL: &str = "STANBIND_OPT_LEVEL";
pub const ENV_TRANSLATE_TIMEOUT_MS: &str = "STANBIND_TRANSLATE_TIMEOUT_MS";
pub const ENV_DEBUG: &str = "STANBIND_DEBUG";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the artifact cache
    pub cache_dir: PathBuf,
    /// Translator binary; discovered when unset
    pub stanc: Option<PathBuf>,
    /// C++ compiler; discovered when unset
    pub compiler: Option<CxxCompiler>,
    pub include_dirs: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub cxx_flags: Vec<String>,
    pub link_args: Vec<String>,
    pub opt_level: u8,
    pub translate_timeout: Duration,
    /// Let toolchain diagnostics through to the process's stderr
    pub debug: bool,
}

impl Config {
    /// Configuration with defaults and the given cache root
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            stanc: None,
            compiler: None,
            include_dirs: Vec::new(),
            defines: Vec::new(),
            cxx_flags: Vec::new(),
            link_args: Vec::new(),
            opt_level: DEFAULT_OPT_LEVEL,
            translate_timeout: DEFAULT_TRANSLATE_TIMEOUT,
            debug: false,
        }
    }

    /// Default cache root (~/.stanbind/cache)
    pub fn default_cache_dir() -> Result<PathBuf, Error> {
        let home = dirs::home_dir().ok_or_else(|| Error::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".stanbind").join("cache"))
    }

    /// Build a configuration from `STANBIND_*` environment variables
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let cache_dir = match lookup(ENV_CACHE_DIR) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => Self::default_cache_dir()?,
        };
        let mut config = Self::new(cache_dir);

        if let Some(stanc) = lookup(ENV_STANC).filter(|s| !s.is_empty()) {
            config.stanc = Some(PathBuf::from(stanc));
        }
        if let Some(cxx) = lookup(ENV_CXX).filter(|s| !s.is_empty()) {
            config.compiler = Some(CxxCompiler::from_name(&cxx));
        }
        if let Some(paths) = lookup(ENV_INCLUDE) {
            config.include_dirs = std::env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()).collect();
        }
        if let Some(flags) = lookup(ENV_CXXFLAGS) {
            config.cxx_flags = split_flags(&flags);
        }
        if let Some(flags) = lookup(ENV_LDFLAGS) {
            config.link_args = split_flags(&flags);
        }
        if let Some(level) = lookup(ENV_OPT_LEVEL) {
            let level: u8 = level
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} must be an integer, got {:?}", ENV_OPT_LEVEL, level)))?;
            config.opt_level = level.min(3);
        }
        if let Some(ms) = lookup(ENV_TRANSLATE_TIMEOUT_MS) {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be a number of milliseconds, got {:?}", ENV_TRANSLATE_TIMEOUT_MS, ms))
            })?;
            config.translate_timeout = Duration::from_millis(ms);
        }
        if let Some(debug) = lookup(ENV_DEBUG) {
            config.debug = parse_flag(&debug)
                .ok_or_else(|| Error::Config(format!("{} must be a boolean, got {:?}", ENV_DEBUG, debug)))?;
        }

        Ok(config)
    }

    pub fn with_stanc(mut self, path: impl Into<PathBuf>) -> Self {
        self.stanc = Some(path.into());
        self
    }

    pub fn with_compiler(mut self, compiler: CxxCompiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn with_define(mut self, define: impl Into<String>) -> Self {
        self.defines.push(define.into());
        self
    }

    pub fn with_cxx_flag(mut self, flag: impl Into<String>) -> Self {
        self.cxx_flags.push(flag.into());
        self
    }

    pub fn with_link_arg(mut self, arg: impl Into<String>) -> Self {
        self.link_args.push(arg.into());
        self
    }

    pub fn with_opt_level(mut self, level: u8) -> Self {
        self.opt_level = level.min(3);
        self
    }

    pub fn with_translate_timeout(mut self, timeout: Duration) -> Self {
        self.translate_timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(str::to_string).collect()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = Config::from_lookup(lookup(&[(ENV_CACHE_DIR, "/tmp/sb")])).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/sb"));
        assert_eq!(config.translate_timeout, DEFAULT_TRANSLATE_TIMEOUT);
        assert_eq!(config.opt_level, DEFAULT_OPT_LEVEL);
        assert!(!config.debug);
        assert!(config.stanc.is_none());
        assert!(config.compiler.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            (ENV_CACHE_DIR, "/tmp/sb"),
            (ENV_STANC, "/opt/stan/bin/stanc"),
            (ENV_CXX, "g++"),
            (ENV_CXXFLAGS, "-DSTAN_THREADS  -Wno-unused"),
            (ENV_LDFLAGS, "-ltbb"),
            (ENV_OPT_LEVEL, "7"),
            (ENV_TRANSLATE_TIMEOUT_MS, "250"),
            (ENV_DEBUG, "true"),
        ]))
        .unwrap();

        assert_eq!(config.stanc, Some(PathBuf::from("/opt/stan/bin/stanc")));
        assert_eq!(config.compiler, Some(CxxCompiler::Gcc));
        assert_eq!(config.cxx_flags, vec!["-DSTAN_THREADS", "-Wno-unused"]);
        assert_eq!(config.link_args, vec!["-ltbb"]);
        assert_eq!(config.opt_level, 3);
        assert_eq!(config.translate_timeout, Duration::from_millis(250));
        assert!(config.debug);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(Config::from_lookup(lookup(&[(ENV_CACHE_DIR, "/tmp"), (ENV_OPT_LEVEL, "fast")])).is_err());
        assert!(Config::from_lookup(lookup(&[(ENV_CACHE_DIR, "/tmp"), (ENV_DEBUG, "maybe")])).is_err());
        assert!(Config::from_lookup(lookup(&[(ENV_CACHE_DIR, "/tmp"), (ENV_TRANSLATE_TIMEOUT_MS, "-1")])).is_err());
    }

    #[test]
    fn builder_clamps_opt_level() {
        let config = Config::new("/tmp/sb").with_opt_level(9).with_debug(true);
        assert_eq!(config.opt_level, 3);
        assert!(config.debug);
    }
}
