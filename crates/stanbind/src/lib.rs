//! stanbind
//!
//! Compiles Stan programs into native modules, caches them per model name and
//! evaluates them in-process.
//!
//! The pipeline runs the `stanc` translator under a deadline, builds the
//! generated C++ together with a small C ABI glue layer into a shared library
//! (keeping compiler output off the terminal), and publishes the result into a
//! directory-per-model cache. Later requests for the same name, also from
//! other processes, load the cached module without rebuilding.
//!
//! # Example
//!
//! ```ignore
//! use stanbind::{Config, Model, ModelData, Runtime};
//! use std::sync::Arc;
//!
//! let runtime = Arc::new(Runtime::new(Config::from_env()?));
//! let data = ModelData::from_json_str(r#"{"N": 2, "y": [0, 1]}"#)?;
//! let mut model = Model::new(runtime, "bernoulli", source, data)?;
//! let compiled = model.compile()?;
//! let lp = model.log_prob(&[0.2], true).map(|e| e.to_f64());
//! ```

mod builder;
mod cache;
mod capture;
mod config;
mod data;
mod error;
mod identity;
mod model;
mod module;
mod registry;
mod runtime;
mod toolchain;
mod translator;

pub use builder::{is_module_file, module_file_name, ArtifactBuilder, BuildOutput, GLUE_SOURCE};
pub use cache::{
    source_digest, ArtifactCache, CompiledEntry, EntryLock, EntryManifest, BUILD_OUTPUT_FILE, MANIFEST_FILE,
    TRANSLATOR_WARNINGS_FILE,
};
pub use capture::StderrCapture;
pub use config::{Config, DEFAULT_OPT_LEVEL, DEFAULT_TRANSLATE_TIMEOUT};
pub use data::ModelData;
pub use error::{
    BuildError, CacheError, Error, EvalError, EvaluationError, ModuleError, NotFoundError, Result, TranslationError,
};
pub use identity::{ModelIdentity, MODEL_NAMESPACE};
pub use model::{Model, ModelState};
pub use module::{ModelServices, ModuleLoader, NativeLoader, NativeModule, ParamNames, ABI_VERSION};
pub use registry::{LoadedModule, ModuleRegistry};
pub use runtime::{Compiled, Evaluation, Runtime};
pub use toolchain::{find_compiler, CxxCompiler, Toolchain};
pub use translator::{find_stanc, Translation, Translator};
