//! Change discovery from a directory of change sources.
//!
//! Every file with the recognised extension is mapped to a path
//! (`namespace::file_stem`) and resolved in a [`ChangeRegistry`], either as a
//! type named after the file or as the module holding the type. A file that
//! cannot be turned into a change is reported to the sink and skipped; it
//! never stops the rest of the scan.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::change::ChangeRecord;
use crate::error::{RegistrationError, Result, RunnerError};
use crate::registry::{ChangeRegistry, Lookup};

/// Default extension of change source files.
pub const DEFAULT_EXTENSION: &str = "rs";

/// Module files that never hold a change.
const MODULE_FILES: &[&str] = &["mod", "lib", "main"];

/// Scans a directory for change sources.
#[derive(Debug, Clone)]
pub struct ChangeDiscovery {
    dir: PathBuf,
    namespace: String,
    extension: String,
}

impl ChangeDiscovery {
    /// Creates a discovery over `dir`, resolving files under `namespace`.
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            namespace: namespace.into(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// Sets the recognised file extension (without the dot).
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Returns the scanned directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derives the type name for a file stem.
    #[must_use]
    pub fn type_name_for(&self, stem: &str) -> String {
        let namespace = self.namespace.trim_end_matches("::");
        if namespace.is_empty() {
            stem.to_string()
        } else {
            format!("{namespace}::{stem}")
        }
    }

    /// Lists candidate files, sorted by file name.
    fn candidate_files(&self, sink: &mut dyn FnMut(RegistrationError)) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| RunnerError::InvalidPath {
            path: self.dir.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    sink(RegistrationError::UnreadableEntry {
                        path: self.dir.clone(),
                        source,
                    });
                    continue;
                }
            };
            let path = entry.path();
            let is_file = match entry.file_type() {
                Ok(file_type) => file_type.is_file(),
                Err(source) => {
                    sink(RegistrationError::UnreadableEntry { path, source });
                    continue;
                }
            };
            let matches_extension = path
                .extension()
                .is_some_and(|ext| ext == self.extension.as_str());
            if is_file && matches_extension {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Discovers the changes in the directory.
    ///
    /// Fails only if the directory itself cannot be read. Per-file problems
    /// are delivered to `sink`.
    pub fn discover(
        &self,
        registry: &ChangeRegistry,
        sink: &mut dyn FnMut(RegistrationError),
    ) -> Result<Vec<ChangeRecord>> {
        let mut changes = Vec::new();

        for path in self.candidate_files(sink)? {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if MODULE_FILES.contains(&stem) {
                continue;
            }

            let type_name = self.type_name_for(stem);
            match registry.resolve(&type_name) {
                Lookup::Missing => {
                    warn!(file = %path.display(), type_name = %type_name, "No change registered for file");
                    sink(RegistrationError::Unregistered {
                        path: path.clone(),
                        type_name,
                    });
                }
                Lookup::Ignored => {
                    debug!(type_name = %type_name, "Skipping non-instantiable entry");
                }
                Lookup::Change(registered) => match registry.instantiate(registered) {
                    Ok(Some(change)) => {
                        debug!(change = %change.name(), file = %path.display(), "Discovered change");
                        changes.push(change);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(error = %err, "Failed to instantiate change");
                        sink(err);
                    }
                },
            }
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeResult, Migration, Seeder};
    use async_trait::async_trait;
    use sqlx::SqliteConnection;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Mig00;

    #[async_trait]
    impl Migration for Mig00 {
        async fn up(&self, _conn: &mut SqliteConnection) -> ChangeResult {
            Ok(())
        }

        async fn down(&self, _conn: &mut SqliteConnection) -> ChangeResult {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Seed01;

    #[async_trait]
    impl Seeder for Seed01 {
        async fn run(&self, _conn: &mut SqliteConnection) -> ChangeResult {
            Ok(())
        }
    }

    fn registry() -> ChangeRegistry {
        let mut registry = ChangeRegistry::new();
        registry
            .register_migration::<Mig00>()
            .register_seeder::<Seed01>()
            .ignore("tests::BaseChange")
            .register_factory("tests::NeedsConfig", || {
                Err("constructor requires arguments".to_string())
            });
        registry
    }

    fn touch(dir: &TempDir, name: &str) {
        std::fs::write(dir.path().join(name), "// change\n").unwrap();
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let discovery = ChangeDiscovery::new("/definitely/not/here", "tests");
        let err = discovery
            .discover(&registry(), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, RunnerError::InvalidPath { .. }));
    }

    #[test]
    fn test_discovers_registered_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "Seed01.rs");
        touch(&dir, "Mig00.rs");
        touch(&dir, "mod.rs");
        touch(&dir, "README.md");
        std::fs::create_dir(dir.path().join("nested.rs")).unwrap();

        let mut errors = Vec::new();
        let changes = ChangeDiscovery::new(dir.path(), "tests")
            .discover(&registry(), &mut |e| errors.push(e))
            .unwrap();

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(changes.len(), 2);
        assert!(changes[0].name().ends_with("::Mig00"));
        assert!(changes[1].name().ends_with("::Seed01"));
    }

    mod create_users {
        use super::*;

        #[derive(Default)]
        pub struct CreateUsers;

        #[async_trait]
        impl Migration for CreateUsers {
            async fn up(&self, _conn: &mut SqliteConnection) -> ChangeResult {
                Ok(())
            }

            async fn down(&self, _conn: &mut SqliteConnection) -> ChangeResult {
                Ok(())
            }
        }
    }

    #[test]
    fn test_discovers_change_in_module_file() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "create_users.rs");

        let mut registry = registry();
        registry.register_migration::<create_users::CreateUsers>();

        let mut errors = Vec::new();
        let changes = ChangeDiscovery::new(dir.path(), "discovery::tests")
            .discover(&registry, &mut |e| errors.push(e))
            .unwrap();

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(changes.len(), 1);
        assert!(changes[0].name().ends_with("::create_users::CreateUsers"));
    }

    #[test]
    fn test_bad_files_do_not_stop_the_scan() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "BaseChange.rs");
        touch(&dir, "Broken.rs");
        touch(&dir, "Mig00.rs");
        touch(&dir, "NeedsConfig.rs");

        let mut errors = Vec::new();
        let changes = ChangeDiscovery::new(dir.path(), "tests")
            .discover(&registry(), &mut |e| errors.push(e))
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            &errors[0],
            RegistrationError::Unregistered { type_name, .. } if type_name == "tests::Broken"
        ));
        assert!(matches!(&errors[1], RegistrationError::Instantiation { .. }));
    }

    #[test]
    fn test_custom_extension() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "Mig00.change");
        touch(&dir, "Seed01.rs");

        let changes = ChangeDiscovery::new(dir.path(), "tests")
            .with_extension("change")
            .discover(&registry(), &mut |_| {})
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].name().ends_with("::Mig00"));
    }

    #[test]
    fn test_discovery_is_repeatable() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "Mig00.rs");
        touch(&dir, "Seed01.rs");

        let discovery = ChangeDiscovery::new(dir.path(), "tests");
        let registry = registry();
        let first: Vec<_> = discovery
            .discover(&registry, &mut |_| {})
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let second: Vec<_> = discovery
            .discover(&registry, &mut |_| {})
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_type_name_for() {
        assert_eq!(
            ChangeDiscovery::new(".", "app::changes::").type_name_for("Mig00"),
            "app::changes::Mig00"
        );
        assert_eq!(ChangeDiscovery::new(".", "").type_name_for("Mig00"), "Mig00");
    }
}
