//! Explicit registry of change types.
//!
//! Changes are registered by type, the same way migrations are registered on
//! a runner elsewhere in this workspace. Discovery then maps files to entries
//! of this registry instead of loading code at runtime.

use std::fmt;
use std::sync::Arc;

use crate::change::{ChangeRecord, Migration, Seeder};
use crate::error::RegistrationError;
use crate::sorter::resolve_name;

type Factory = Arc<dyn Fn() -> std::result::Result<ChangeRecord, String> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    type_name: String,
    // `None` marks an entry that exists but is never instantiated.
    factory: Option<Factory>,
}

/// Outcome of looking up a type name in the registry.
pub enum Lookup<'a> {
    /// A registered, instantiable change.
    Change(&'a str),
    /// A registered entry that must be skipped.
    Ignored,
    /// Nothing is registered under that name.
    Missing,
}

/// Registry of change factories, in registration order.
#[derive(Clone, Default)]
pub struct ChangeRegistry {
    entries: Vec<Entry>,
}

impl ChangeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration that can be built with no arguments.
    pub fn register_migration<M: Migration + Default>(&mut self) -> &mut Self {
        self.register_factory(std::any::type_name::<M>(), || {
            Ok(ChangeRecord::migration(M::default()))
        })
    }

    /// Registers a seeder that can be built with no arguments.
    pub fn register_seeder<S: Seeder + Default>(&mut self) -> &mut Self {
        self.register_factory(std::any::type_name::<S>(), || {
            Ok(ChangeRecord::seeder(S::default()))
        })
    }

    /// Registers a custom factory under `type_name`.
    ///
    /// The factory returns `Err` with a reason when it cannot build the
    /// change, e.g. because required arguments are unavailable.
    pub fn register_factory<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> std::result::Result<ChangeRecord, String> + Send + Sync + 'static,
    {
        self.entries.push(Entry {
            type_name: type_name.into(),
            factory: Some(Arc::new(factory)),
        });
        self
    }

    /// Marks `type_name` as a non-instantiable helper (a shared base, for
    /// example). Files mapping to it are skipped without an error.
    pub fn ignore(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.entries.push(Entry {
            type_name: type_name.into(),
            factory: None,
        });
        self
    }

    /// Returns the number of entries, ignored ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves `type_name`: exact match first, then a `::`-qualified match.
    ///
    /// When no type matches, `type_name` is taken as a module path and the
    /// first type registered inside that module is used, so
    /// `app::changes::create_users` resolves to
    /// `app::changes::create_users::CreateUsers`.
    #[must_use]
    pub fn resolve(&self, type_name: &str) -> Lookup<'_> {
        let names = self.entries.iter().map(|e| e.type_name.as_str());
        let Some(found) = resolve_name(names.clone(), type_name)
            .or_else(|| names.into_iter().find(|name| is_in_module(name, type_name)))
        else {
            return Lookup::Missing;
        };
        match self.entry(found) {
            Some(Entry {
                factory: Some(_),
                type_name,
            }) => Lookup::Change(type_name.as_str()),
            _ => Lookup::Ignored,
        }
    }

    fn entry(&self, type_name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.type_name == type_name)
    }

    /// Builds the change registered under `type_name`.
    ///
    /// Returns `Ok(None)` for ignored entries.
    pub fn instantiate(
        &self,
        type_name: &str,
    ) -> std::result::Result<Option<ChangeRecord>, RegistrationError> {
        let Some(entry) = self.entry(type_name) else {
            return Ok(None);
        };
        let Some(factory) = &entry.factory else {
            return Ok(None);
        };
        factory()
            .map(Some)
            .map_err(|message| RegistrationError::Instantiation {
                type_name: entry.type_name.clone(),
                message,
            })
    }

    /// Builds every registered change in registration order.
    ///
    /// Failures go to `sink`; the remaining entries are still built.
    pub fn instantiate_all(
        &self,
        sink: &mut dyn FnMut(RegistrationError),
    ) -> Vec<ChangeRecord> {
        let mut changes = Vec::new();
        for entry in &self.entries {
            match self.instantiate(&entry.type_name) {
                Ok(Some(change)) => changes.push(change),
                Ok(None) => {}
                Err(err) => sink(err),
            }
        }
        changes
    }
}

fn is_in_module(type_name: &str, module: &str) -> bool {
    let prefix = format!("{module}::");
    type_name.starts_with(&prefix) || type_name.contains(&format!("::{prefix}"))
}

impl fmt::Debug for ChangeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.type_name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeResult;
    use async_trait::async_trait;
    use sqlx::SqliteConnection;

    #[derive(Default)]
    struct CreatePosts;

    #[async_trait]
    impl Migration for CreatePosts {
        async fn up(&self, _conn: &mut SqliteConnection) -> ChangeResult {
            Ok(())
        }

        async fn down(&self, _conn: &mut SqliteConnection) -> ChangeResult {
            Ok(())
        }
    }

    #[derive(Default)]
    struct SeedPosts;

    #[async_trait]
    impl Seeder for SeedPosts {
        async fn run(&self, _conn: &mut SqliteConnection) -> ChangeResult {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_instantiate_all() {
        let mut registry = ChangeRegistry::new();
        registry
            .register_seeder::<SeedPosts>()
            .register_migration::<CreatePosts>();
        assert_eq!(registry.len(), 2);

        let mut errors = Vec::new();
        let changes = registry.instantiate_all(&mut |e| errors.push(e));
        assert!(errors.is_empty());
        assert!(changes[0].name().ends_with("SeedPosts"));
        assert!(changes[1].name().ends_with("CreatePosts"));
    }

    #[test]
    fn test_resolve_by_short_name() {
        let mut registry = ChangeRegistry::new();
        registry.register_migration::<CreatePosts>().ignore("app::Base");

        assert!(matches!(registry.resolve("CreatePosts"), Lookup::Change(_)));
        assert!(matches!(registry.resolve("app::Base"), Lookup::Ignored));
        assert!(matches!(registry.resolve("Base"), Lookup::Ignored));
        assert!(matches!(registry.resolve("Unknown"), Lookup::Missing));
    }

    #[test]
    fn test_resolve_module_path() {
        let mut registry = ChangeRegistry::new();
        registry
            .register_factory("app::changes::create_users::CreateUsers", || {
                Ok(ChangeRecord::migration(CreatePosts))
            })
            .ignore("app::changes::base::BaseChange");

        assert!(matches!(
            registry.resolve("app::changes::create_users"),
            Lookup::Change("app::changes::create_users::CreateUsers")
        ));
        assert!(matches!(
            registry.resolve("changes::create_users"),
            Lookup::Change("app::changes::create_users::CreateUsers")
        ));
        assert!(matches!(registry.resolve("app::changes::base"), Lookup::Ignored));
        assert!(matches!(registry.resolve("app::changes::create"), Lookup::Missing));
        assert!(matches!(registry.resolve("users"), Lookup::Missing));
    }

    #[test]
    fn test_failing_factory_is_reported() {
        let mut registry = ChangeRegistry::new();
        registry
            .register_factory("app::NeedsArgs", || Err("requires a tenant id".to_string()))
            .register_migration::<CreatePosts>();

        let mut errors = Vec::new();
        let changes = registry.instantiate_all(&mut |e| errors.push(e));
        assert_eq!(changes.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            RegistrationError::Instantiation { type_name, .. } if type_name == "app::NeedsArgs"
        ));
    }
}
