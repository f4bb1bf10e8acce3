//! Artifact cache - directory-per-model storage for built modules
//!
//! ```text
//! <root>/model/<name>/     published entries
//! <root>/.staging/          in-flight builds and stores
//! <root>/.locks/<name>.lock per-identity compile locks
//! ```

use crate::builder::{is_module_file, ArtifactBuilder};
use crate::error::{CacheError, Error, NotFoundError};
use crate::identity::{ModelIdentity, MODEL_NAMESPACE};
use crate::module::ABI_VERSION;
use crate::translator::Translator;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const BUILD_OUTPUT_FILE: &str = "build_output.txt";
pub const TRANSLATOR_WARNINGS_FILE: &str = "stanc_warnings.txt";
pub const MANIFEST_FILE: &str = "entry.json";

const STAGING_DIR: &str = ".staging";
const LOCKS_DIR: &str = ".locks";

/// Metadata stored next to every module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryManifest {
    /// Identity key, e.g. `model/m1`
    pub identity: String,
    /// Module file name inside the entry directory
    pub module_file: String,
    /// SHA-256 of the program source the entry was built from
    pub source_sha256: String,
    /// Compiler executable used for the build
    pub compiler: String,
    /// Creation time (unix seconds)
    pub created: u64,
    /// Module ABI version the glue was compiled against
    pub abi_version: u32,
}

impl EntryManifest {
    pub fn new(identity: &ModelIdentity, module_file: impl Into<String>, source: &str, compiler: impl Into<String>) -> Self {
        Self {
            identity: identity.key(),
            module_file: module_file.into(),
            source_sha256: source_digest(source),
            compiler: compiler.into(),
            created: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            abi_version: ABI_VERSION,
        }
    }
}

/// Hex SHA-256 of program source
pub fn source_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Result of a fresh compile-and-store
#[derive(Debug, Clone)]
pub struct CompiledEntry {
    pub module_path: PathBuf,
    pub build_output: String,
    pub translator_warnings: String,
    pub manifest: EntryManifest,
}

/// Exclusive per-identity lock; released when dropped
#[derive(Debug)]
pub struct EntryLock {
    file: File,
    identity: ModelIdentity,
}

impl EntryLock {
    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(identity = %self.identity, error = %e, "failed to release entry lock");
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the entry for `identity` (whether or not it exists)
    pub fn entry_dir(&self, identity: &ModelIdentity) -> PathBuf {
        self.root.join(MODEL_NAMESPACE).join(identity.name())
    }

    /// Path of the module file, if the entry has one
    pub fn module_path(&self, identity: &ModelIdentity) -> Option<PathBuf> {
        let dir = self.entry_dir(identity);
        let mut modules: Vec<PathBuf> = std::fs::read_dir(&dir)
            .ok()?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().map(is_module_file).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        modules.sort();
        modules.pop()
    }

    /// Cache-hit signal: a module file is present in the entry
    pub fn exists(&self, identity: &ModelIdentity) -> bool {
        self.module_path(identity).is_some()
    }

    /// Remove the entry. Deleting a missing entry is not an error.
    pub fn delete(&self, identity: &ModelIdentity) -> Result<(), CacheError> {
        let dir = self.entry_dir(identity);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(identity = %identity, "deleted cache entry");
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(dir, e)),
        }
    }

    /// Block until this process holds the compile lock for `identity`
    pub fn lock(&self, identity: &ModelIdentity) -> Result<EntryLock, CacheError> {
        let dir = self.root.join(LOCKS_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let path = dir.join(format!("{}.lock", identity.name()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CacheError::io(&path, e))?;

        file.lock_exclusive().map_err(|source| CacheError::Lock {
            identity: identity.key(),
            source,
        })?;

        Ok(EntryLock {
            file,
            identity: identity.clone(),
        })
    }

    /// Publish a complete entry, replacing any previous one.
    ///
    /// The entry is assembled in a staging directory and renamed into place,
    /// so readers see either the old entry, no entry, or the new one.
    /// `module_file` is moved into the entry.
    pub fn store(
        &self,
        identity: &ModelIdentity,
        module_file: &Path,
        build_output: &str,
        translator_warnings: &str,
        manifest: &EntryManifest,
    ) -> Result<PathBuf, CacheError> {
        let staging_root = self.staging_dir()?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("entry_{}_", identity.name()))
            .tempdir_in(&staging_root)
            .map_err(|e| CacheError::io(&staging_root, e))?;

        let file_name = module_file
            .file_name()
            .ok_or_else(|| {
                CacheError::io(
                    module_file,
                    io::Error::new(io::ErrorKind::InvalidInput, "module path has no file name"),
                )
            })?
            .to_owned();
        let staged_module = staging.path().join(&file_name);
        move_file(module_file, &staged_module)?;

        write(&staging.path().join(BUILD_OUTPUT_FILE), build_output)?;
        write(&staging.path().join(TRANSLATOR_WARNINGS_FILE), translator_warnings)?;
        let manifest_json = serde_json::to_string_pretty(manifest)?;
        write(&staging.path().join(MANIFEST_FILE), &manifest_json)?;

        let entry = self.entry_dir(identity);
        let parent = self.root.join(MODEL_NAMESPACE);
        std::fs::create_dir_all(&parent).map_err(|e| CacheError::io(&parent, e))?;

        // Move the old entry aside first; rename cannot replace a non-empty directory.
        if entry.exists() {
            let retired = staging_root.join(format!(
                "retired_{}_{}",
                identity.name(),
                staging
                    .path()
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("entry")
            ));
            std::fs::rename(&entry, &retired).map_err(|e| CacheError::io(&entry, e))?;
            if let Err(e) = std::fs::remove_dir_all(&retired) {
                tracing::warn!(path = %retired.display(), error = %e, "failed to remove retired entry");
            }
        }

        std::fs::rename(staging.path(), &entry).map_err(|e| CacheError::io(&entry, e))?;

        let module_path = entry.join(file_name);
        tracing::debug!(identity = %identity, module = %module_path.display(), "published cache entry");
        Ok(module_path)
    }

    pub fn load_build_output(&self, identity: &ModelIdentity) -> Result<String, NotFoundError> {
        self.read_artifact(identity, BUILD_OUTPUT_FILE, "build output")
    }

    pub fn load_translator_warnings(&self, identity: &ModelIdentity) -> Result<String, NotFoundError> {
        self.read_artifact(identity, TRANSLATOR_WARNINGS_FILE, "translator warnings")
    }

    pub fn load_manifest(&self, identity: &ModelIdentity) -> Result<EntryManifest, Error> {
        let text = self.read_artifact(identity, MANIFEST_FILE, "manifest")?;
        Ok(serde_json::from_str(&text).map_err(CacheError::from)?)
    }

    /// Identities with an entry directory, sorted by name
    pub fn identities(&self) -> Result<Vec<ModelIdentity>, CacheError> {
        let dir = self.root.join(MODEL_NAMESPACE);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(dir, e)),
        };

        let mut identities: Vec<ModelIdentity> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().and_then(|n| ModelIdentity::new(n).ok()))
            .collect();
        identities.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(identities)
    }

    /// Remove every entry and any leftover staging data. Lock files stay, as
    /// other processes may hold them.
    pub fn clear(&self) -> Result<(), CacheError> {
        for dir in [self.root.join(MODEL_NAMESPACE), self.root.join(STAGING_DIR)] {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {},
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => return Err(CacheError::io(dir, e)),
            }
        }
        Ok(())
    }

    /// Translate, build and store `source` under `identity`.
    ///
    /// This is the only path that creates entries. On any failure nothing is
    /// published and the work directory is removed.
    pub fn compile_model(
        &self,
        identity: &ModelIdentity,
        source: &str,
        translator: &Translator,
        builder: &ArtifactBuilder,
    ) -> Result<CompiledEntry, Error> {
        let started = Instant::now();
        let staging_root = self.staging_dir()?;
        let work = tempfile::Builder::new()
            .prefix(&format!("build_{}_", identity.name()))
            .tempdir_in(&staging_root)
            .map_err(|e| CacheError::io(&staging_root, e))?;

        let translation = translator.translate(source, identity)?;
        if !translation.warnings.is_empty() {
            tracing::debug!(identity = %identity, warnings = %translation.warnings, "translator warnings");
        }

        let output = builder.build(&translation.cpp, identity, work.path())?;

        let module_file = output
            .module_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let manifest = EntryManifest::new(
            identity,
            module_file,
            source,
            output.compiler.executable().display().to_string(),
        );

        let module_path = self.store(
            identity,
            &output.module_path,
            &output.diagnostics,
            &translation.warnings,
            &manifest,
        )?;

        tracing::info!(
            identity = %identity,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compiled model"
        );

        Ok(CompiledEntry {
            module_path,
            build_output: output.diagnostics,
            translator_warnings: translation.warnings,
            manifest,
        })
    }

    /// Directory for in-flight builds and stores
    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    fn staging_dir(&self) -> Result<PathBuf, CacheError> {
        let dir = self.staging_root();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        Ok(dir)
    }

    fn read_artifact(
        &self,
        identity: &ModelIdentity,
        file: &str,
        what: &'static str,
    ) -> Result<String, NotFoundError> {
        let dir = self.entry_dir(identity);
        if !dir.is_dir() {
            return Err(NotFoundError::Entry(identity.key()));
        }
        std::fs::read_to_string(dir.join(file)).map_err(|e| {
            tracing::debug!(identity = %identity, file, error = %e, "cache artifact unreadable");
            NotFoundError::Artifact {
                identity: identity.key(),
                what,
            }
        })
    }
}

fn write(path: &Path, text: &str) -> Result<(), CacheError> {
    std::fs::write(path, text).map_err(|e| CacheError::io(path, e))
}

fn move_file(from: &Path, to: &Path) -> Result<(), CacheError> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| CacheError::io(from, e))?;
    if let Err(e) = std::fs::remove_file(from) {
        tracing::debug!(path = %from.display(), error = %e, "failed to remove moved module");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::module_file_name;

    fn id(name: &str) -> ModelIdentity {
        ModelIdentity::new(name).unwrap()
    }

    fn fake_module(dir: &Path, identity: &ModelIdentity, build_id: &str, contents: &str) -> PathBuf {
        let path = dir.join(module_file_name(identity, build_id));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn store_publishes_a_complete_entry() {
        let root = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(root.path());
        let m = id("m1");
        assert!(!cache.exists(&m));

        let module = fake_module(root.path(), &m, "000000000001", "lib");
        let manifest = EntryManifest::new(&m, "ignored", "model { }", "g++");
        let stored = cache.store(&m, &module, "built ok", "Warning: pedantic", &manifest).unwrap();

        assert!(cache.exists(&m));
        assert!(!module.exists());
        assert_eq!(cache.module_path(&m), Some(stored.clone()));
        assert!(stored.starts_with(cache.entry_dir(&m)));
        assert_eq!(cache.load_build_output(&m).unwrap(), "built ok");
        assert_eq!(cache.load_translator_warnings(&m).unwrap(), "Warning: pedantic");
        assert_eq!(cache.load_manifest(&m).unwrap(), manifest);
        assert_eq!(cache.entry_dir(&m), root.path().join("model").join("m1"));
    }

    #[test]
    fn store_replaces_previous_contents() {
        let root = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(root.path());
        let m = id("m");
        let manifest = EntryManifest::new(&m, "x", "a", "g++");

        let first = fake_module(root.path(), &m, "aaaaaaaaaaaa", "one");
        cache.store(&m, &first, "first", "", &manifest).unwrap();
        let second = fake_module(root.path(), &m, "bbbbbbbbbbbb", "two");
        let stored = cache.store(&m, &second, "second", "", &manifest).unwrap();

        let modules: Vec<_> = std::fs::read_dir(cache.entry_dir(&m))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_module_file(e.file_name().to_str().unwrap()))
            .collect();
        assert_eq!(modules.len(), 1);
        assert_eq!(std::fs::read_to_string(stored).unwrap(), "two");
        assert_eq!(cache.load_build_output(&m).unwrap(), "second");
    }

    #[test]
    fn missing_entries_are_not_found() {
        let root = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(root.path());
        let m = id("ghost");

        assert_eq!(
            cache.load_build_output(&m).unwrap_err(),
            NotFoundError::Entry("model/ghost".to_string())
        );
        assert!(cache.load_translator_warnings(&m).is_err());
        assert!(matches!(cache.load_manifest(&m), Err(Error::NotFound(_))));
        assert_eq!(cache.module_path(&m), None);
    }

    #[test]
    fn entry_without_module_is_a_miss() {
        let root = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(root.path());
        let m = id("partial");
        std::fs::create_dir_all(cache.entry_dir(&m)).unwrap();
        std::fs::write(cache.entry_dir(&m).join(BUILD_OUTPUT_FILE), "stale").unwrap();

        assert!(!cache.exists(&m));
    }

    #[test]
    fn delete_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(root.path());
        let m = id("m");
        let module = fake_module(root.path(), &m, "cccccccccccc", "lib");
        cache
            .store(&m, &module, "", "", &EntryManifest::new(&m, "x", "", "g++"))
            .unwrap();

        cache.delete(&m).unwrap();
        assert!(!cache.exists(&m));
        cache.delete(&m).unwrap();
    }

    #[test]
    fn identities_and_clear() {
        let root = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(root.path());
        assert!(cache.identities().unwrap().is_empty());

        for name in ["beta", "alpha"] {
            let m = id(name);
            let module = fake_module(root.path(), &m, "dddddddddddd", "lib");
            cache
                .store(&m, &module, "", "", &EntryManifest::new(&m, "x", "", "g++"))
                .unwrap();
        }
        let names: Vec<String> = cache.identities().unwrap().iter().map(|i| i.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        cache.clear().unwrap();
        assert!(cache.identities().unwrap().is_empty());
        assert!(!root.path().join(STAGING_DIR).exists());
    }

    #[test]
    fn manifest_records_source_digest() {
        let m = id("m");
        let manifest = EntryManifest::new(&m, "f.so", "model { }", "clang++");
        assert_eq!(manifest.identity, "model/m");
        assert_eq!(manifest.abi_version, ABI_VERSION);
        assert_eq!(manifest.source_sha256, source_digest("model { }"));
        assert_eq!(manifest.source_sha256.len(), 64);
        assert_ne!(source_digest("a"), source_digest("b"));
    }

    #[test]
    fn source_digest_is_lowercase_hex() {
        assert_eq!(
            source_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn lock_is_exclusive_across_handles() {
        let root = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(root.path());
        let m = id("locked");

        let held = cache.lock(&m).unwrap();
        let path = root.path().join(LOCKS_DIR).join("locked.lock");
        let other = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(held);
        assert!(other.try_lock_exclusive().is_ok());
    }
}
