//! Model runtime facade
//!
//! Ties the cache, translator and builder together for compilation, and
//! routes evaluation calls to loaded modules. Compile-time failures are
//! returned as errors. Evaluation failures are contained: the `try_*`
//! methods report them as `EvalError`, the plain methods log them and
//! return `None` or `Evaluation::Invalid`.

use crate::builder::ArtifactBuilder;
use crate::cache::{source_digest, ArtifactCache};
use crate::config::Config;
use crate::data::ModelData;
use crate::error::{EvalError, EvaluationError, ModuleError, NotFoundError, Result};
use crate::identity::ModelIdentity;
use crate::module::{ModelServices, ModuleLoader, NativeLoader, ParamNames, ABI_VERSION};
use crate::registry::{LoadedModule, ModuleRegistry};
use crate::translator::Translator;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of a successful compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    /// Toolchain diagnostics recorded when the module was built
    pub diagnostics: String,
    /// Translator warnings recorded when the module was built
    pub translator_warnings: String,
    /// Whether the entry was served from the cache
    pub cached: bool,
}

/// Result of an evaluation that reached a loaded module
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation<T> {
    Value(T),
    /// The module raised; details are in the log
    Invalid,
}

impl<T> Evaluation<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Evaluation::Value(v) => Some(v),
            Evaluation::Invalid => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Evaluation::Invalid)
    }
}

impl Evaluation<f64> {
    /// The value, or positive infinity for a failed evaluation
    pub fn to_f64(&self) -> f64 {
        match self {
            Evaluation::Value(v) => *v,
            Evaluation::Invalid => f64::INFINITY,
        }
    }
}

pub struct Runtime {
    config: Config,
    cache: ArtifactCache,
    translator: Translator,
    builder: ArtifactBuilder,
    loader: Box<dyn ModuleLoader>,
    registry: ModuleRegistry,
}

impl Runtime {
    /// Runtime loading native modules
    pub fn new(config: Config) -> Self {
        Self::with_loader(config, NativeLoader)
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    pub fn with_loader(config: Config, loader: impl ModuleLoader + 'static) -> Self {
        let cache = ArtifactCache::new(&config.cache_dir);
        let translator = Translator::from_config(&config).with_temp_root(cache.staging_root());
        let builder = ArtifactBuilder::from_config(&config);
        Self {
            config,
            cache,
            translator,
            builder,
            loader: Box::new(loader),
            registry: ModuleRegistry::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn exists(&self, identity: &ModelIdentity) -> bool {
        self.cache.exists(identity)
    }

    /// Make sure a module for `identity` is cached, building it from `source`
    /// on a miss.
    ///
    /// A hit never runs the translator or the toolchain, also across process
    /// restarts. A miss is handled under the identity's lock; a failed build
    /// leaves no entry.
    pub fn compile(&self, identity: &ModelIdentity, source: &str) -> Result<Compiled> {
        if let Some(hit) = self.cached(identity, source) {
            return Ok(hit);
        }

        let _lock = self.cache.lock(identity)?;
        if let Some(hit) = self.cached(identity, source) {
            return Ok(hit);
        }

        let started = Instant::now();
        self.registry.invalidate(identity);
        self.cache.delete(identity)?;

        let entry = self
            .cache
            .compile_model(identity, source, &self.translator, &self.builder)
            .inspect_err(|e| tracing::debug!(identity = %identity, error = %e, "compile failed"))?;

        tracing::info!(
            identity = %identity,
            cached = false,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model ready"
        );

        Ok(Compiled {
            diagnostics: entry.build_output,
            translator_warnings: entry.translator_warnings,
            cached: false,
        })
    }

    /// Drop the loaded module and remove the cache entry
    pub fn delete(&self, identity: &ModelIdentity) -> Result<()> {
        self.registry.invalidate(identity);
        self.cache.delete(identity)?;
        Ok(())
    }

    /// Drop the loaded module, keeping the cache entry
    pub fn unload(&self, identity: &ModelIdentity) -> bool {
        self.registry.invalidate(identity)
    }

    /// Loaded handle for `identity`, loading it from the cache if needed
    pub fn module(&self, identity: &ModelIdentity) -> std::result::Result<Arc<LoadedModule>, NotFoundError> {
        let path = self
            .cache
            .module_path(identity)
            .ok_or_else(|| NotFoundError::Entry(identity.key()))?;
        self.registry
            .get_or_load(identity, &path, self.loader.as_ref())
            .map_err(|e| NotFoundError::Module {
                identity: identity.key(),
                reason: e.to_string(),
            })
    }

    pub fn try_n_pars(&self, identity: &ModelIdentity, data: &ModelData) -> std::result::Result<usize, EvalError> {
        self.evaluate(identity, "n_pars", |m| m.n_pars(data))
    }

    pub fn try_param_names(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        kind: ParamNames,
    ) -> std::result::Result<Vec<String>, EvalError> {
        self.evaluate(identity, "param_names", |m| m.param_names(data, kind))
    }

    /// Map unconstrained parameters to constrained values, optionally with
    /// transformed parameters and generated quantities appended
    pub fn try_constrain_pars(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        upar: &[f64],
        include_tparams: bool,
        include_gqs: bool,
    ) -> std::result::Result<Vec<f64>, EvalError> {
        self.evaluate(identity, "constrain_pars", |m| {
            m.write_array(data, upar, include_tparams, include_gqs)
        })
    }

    pub fn try_unconstrain_pars(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        cpar: &[f64],
    ) -> std::result::Result<Vec<f64>, EvalError> {
        self.evaluate(identity, "unconstrain_pars", |m| m.unconstrain_array(data, cpar))
    }

    pub fn try_log_prob(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        upar: &[f64],
        adjust_transform: bool,
    ) -> std::result::Result<f64, EvalError> {
        self.evaluate(identity, "log_prob", |m| m.log_prob(data, upar, adjust_transform))
    }

    pub fn try_log_prob_grad(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        upar: &[f64],
        adjust_transform: bool,
    ) -> std::result::Result<Vec<f64>, EvalError> {
        self.evaluate(identity, "log_prob_grad", |m| m.log_prob_grad(data, upar, adjust_transform))
    }

    pub fn n_pars(&self, identity: &ModelIdentity, data: &ModelData) -> Option<usize> {
        contain(self.try_n_pars(identity, data)).and_then(Evaluation::value)
    }

    pub fn param_names(&self, identity: &ModelIdentity, data: &ModelData) -> Option<Vec<String>> {
        contain(self.try_param_names(identity, data, ParamNames::Parameters)).and_then(Evaluation::value)
    }

    pub fn constrained_param_names(&self, identity: &ModelIdentity, data: &ModelData) -> Option<Vec<String>> {
        contain(self.try_param_names(identity, data, ParamNames::Constrained)).and_then(Evaluation::value)
    }

    pub fn unconstrained_param_names(&self, identity: &ModelIdentity, data: &ModelData) -> Option<Vec<String>> {
        contain(self.try_param_names(identity, data, ParamNames::Unconstrained)).and_then(Evaluation::value)
    }

    pub fn constrain_pars(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        upar: &[f64],
        include_tparams: bool,
        include_gqs: bool,
    ) -> Option<Evaluation<Vec<f64>>> {
        contain(self.try_constrain_pars(identity, data, upar, include_tparams, include_gqs))
    }

    pub fn unconstrain_pars(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        cpar: &[f64],
    ) -> Option<Evaluation<Vec<f64>>> {
        contain(self.try_unconstrain_pars(identity, data, cpar))
    }

    pub fn log_prob(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        upar: &[f64],
        adjust_transform: bool,
    ) -> Option<Evaluation<f64>> {
        contain(self.try_log_prob(identity, data, upar, adjust_transform))
    }

    pub fn log_prob_grad(
        &self,
        identity: &ModelIdentity,
        data: &ModelData,
        upar: &[f64],
        adjust_transform: bool,
    ) -> Option<Evaluation<Vec<f64>>> {
        contain(self.try_log_prob_grad(identity, data, upar, adjust_transform))
    }

    fn evaluate<T>(
        &self,
        identity: &ModelIdentity,
        operation: &'static str,
        f: impl FnOnce(&dyn ModelServices) -> std::result::Result<T, ModuleError>,
    ) -> std::result::Result<T, EvalError> {
        let module = self.module(identity)?;
        module.call(f).map_err(|e| {
            EvalError::Evaluation(EvaluationError {
                identity: identity.key(),
                operation,
                message: e.to_string(),
            })
        })
    }

    // A hit with an unreadable build output or a stale ABI version is treated
    // as a miss and rebuilt.
    fn cached(&self, identity: &ModelIdentity, source: &str) -> Option<Compiled> {
        if !self.cache.exists(identity) {
            return None;
        }
        let diagnostics = match self.cache.load_build_output(identity) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "cache entry is incomplete, rebuilding");
                return None;
            },
        };
        let translator_warnings = self.cache.load_translator_warnings(identity).unwrap_or_default();

        if let Ok(manifest) = self.cache.load_manifest(identity) {
            if manifest.abi_version != ABI_VERSION {
                tracing::warn!(
                    identity = %identity,
                    found = manifest.abi_version,
                    expected = ABI_VERSION,
                    "cache entry was built for another module ABI, rebuilding"
                );
                return None;
            }
            if manifest.source_sha256 != source_digest(source) {
                tracing::warn!(
                    identity = %identity,
                    "serving cached module built from different source; delete the entry to rebuild"
                );
            }
        }

        tracing::info!(identity = %identity, cached = true, "model ready");
        Some(Compiled {
            diagnostics,
            translator_warnings,
            cached: true,
        })
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("cache", &self.cache.root())
            .field("translator", &self.translator.program())
            .field("loaded", &self.registry.len())
            .finish()
    }
}

fn contain<T>(result: std::result::Result<T, EvalError>) -> Option<Evaluation<T>> {
    match result {
        Ok(value) => Some(Evaluation::Value(value)),
        Err(EvalError::Evaluation(e)) => {
            tracing::warn!(identity = %e.identity, operation = e.operation, error = %e.message, "evaluation failed");
            Some(Evaluation::Invalid)
        },
        Err(EvalError::NotFound(e)) => {
            tracing::warn!(error = %e, "model not available");
            None
        },
    }
}
