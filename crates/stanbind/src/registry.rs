//! Per-runtime table of loaded modules

use crate::error::ModuleError;
use crate::identity::ModelIdentity;
use crate::module::{ModelServices, ModuleLoader};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// A module loaded into this process
pub struct LoadedModule {
    path: PathBuf,
    services: Box<dyn ModelServices>,
    gate: Mutex<()>,
}

impl LoadedModule {
    pub fn new(path: impl Into<PathBuf>, services: Box<dyn ModelServices>) -> Self {
        Self {
            path: path.into(),
            services,
            gate: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the module, one call at a time unless the module is
    /// reentrant
    pub fn call<R>(&self, f: impl FnOnce(&dyn ModelServices) -> R) -> R {
        if self.services.is_reentrant() {
            return f(self.services.as_ref());
        }
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        f(self.services.as_ref())
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule").field("path", &self.path).finish()
    }
}

/// Loaded modules keyed by identity; at most one handle per identity.
///
/// Native code is only unmapped once every `Arc` handed out is dropped.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, Arc<LoadedModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `identity` backed by `path`, loading it when absent or
    /// when the cached handle points at a different file
    pub fn get_or_load(
        &self,
        identity: &ModelIdentity,
        path: &Path,
        loader: &dyn ModuleLoader,
    ) -> Result<Arc<LoadedModule>, ModuleError> {
        let entry = self.modules.entry(identity.key());
        if let Entry::Occupied(occupied) = &entry {
            if occupied.get().path() == path {
                return Ok(Arc::clone(occupied.get()));
            }
            tracing::debug!(identity = %identity, "module path changed, reloading");
        }

        let module = Arc::new(LoadedModule::new(path, loader.load(path)?));
        tracing::debug!(identity = %identity, module = %path.display(), "loaded module");
        entry.insert(Arc::clone(&module));
        Ok(module)
    }

    pub fn get(&self, identity: &ModelIdentity) -> Option<Arc<LoadedModule>> {
        self.modules.get(&identity.key()).map(|m| Arc::clone(m.value()))
    }

    /// Drop the handle for `identity`; returns whether one was loaded
    pub fn invalidate(&self, identity: &ModelIdentity) -> bool {
        self.modules.remove(&identity.key()).is_some()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ModelData;
    use crate::module::ParamNames;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Constant(usize);

    impl ModelServices for Constant {
        fn n_pars(&self, _: &ModelData) -> Result<usize, ModuleError> {
            Ok(self.0)
        }
        fn param_names(&self, _: &ModelData, _: ParamNames) -> Result<Vec<String>, ModuleError> {
            Ok(Vec::new())
        }
        fn write_array(&self, _: &ModelData, upar: &[f64], _: bool, _: bool) -> Result<Vec<f64>, ModuleError> {
            Ok(upar.to_vec())
        }
        fn unconstrain_array(&self, _: &ModelData, cpar: &[f64]) -> Result<Vec<f64>, ModuleError> {
            Ok(cpar.to_vec())
        }
        fn log_prob(&self, _: &ModelData, _: &[f64], _: bool) -> Result<f64, ModuleError> {
            Ok(0.0)
        }
        fn log_prob_grad(&self, _: &ModelData, upar: &[f64], _: bool) -> Result<Vec<f64>, ModuleError> {
            Ok(vec![0.0; upar.len()])
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ModuleLoader for CountingLoader {
        fn load(&self, _path: &Path) -> Result<Box<dyn ModelServices>, ModuleError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Constant(n + 1)))
        }
    }

    struct FailingLoader;

    impl ModuleLoader for FailingLoader {
        fn load(&self, path: &Path) -> Result<Box<dyn ModelServices>, ModuleError> {
            Err(ModuleError::LibraryLoad(format!("{}: invalid ELF header", path.display())))
        }
    }

    fn id(name: &str) -> ModelIdentity {
        ModelIdentity::new(name).unwrap()
    }

    #[test]
    fn reuses_handle_for_same_path() {
        let registry = ModuleRegistry::new();
        let loader = CountingLoader::default();
        let m = id("m");

        let a = registry.get_or_load(&m, Path::new("/cache/a.so"), &loader).unwrap();
        let b = registry.get_or_load(&m, Path::new("/cache/a.so"), &loader).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reloads_when_path_changes() {
        let registry = ModuleRegistry::new();
        let loader = CountingLoader::default();
        let m = id("m");
        let data = ModelData::empty();

        let old = registry.get_or_load(&m, Path::new("/cache/a.so"), &loader).unwrap();
        let new = registry.get_or_load(&m, Path::new("/cache/b.so"), &loader).unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.call(|s| s.n_pars(&data)).unwrap(), 2);
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(&m).unwrap(), &new));
    }

    #[test]
    fn invalidate_forces_reload() {
        let registry = ModuleRegistry::new();
        let loader = CountingLoader::default();
        let m = id("m");

        registry.get_or_load(&m, Path::new("/cache/a.so"), &loader).unwrap();
        assert!(registry.invalidate(&m));
        assert!(!registry.invalidate(&m));
        assert!(registry.is_empty());

        registry.get_or_load(&m, Path::new("/cache/a.so"), &loader).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_load_leaves_no_handle() {
        let registry = ModuleRegistry::new();
        let err = registry
            .get_or_load(&id("m"), Path::new("/cache/a.so"), &FailingLoader)
            .unwrap_err();
        assert!(matches!(err, ModuleError::LibraryLoad(_)));
        assert!(registry.is_empty());
    }
}
