//! Discover, apply and roll back changes from a change directory.

use std::sync::{Arc, Mutex};

use oxide_schema_runner::prelude::*;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tempfile::TempDir;

#[derive(Default)]
struct Mig00;

#[async_trait]
impl Migration for Mig00 {
    async fn up(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("DROP TABLE authors").execute(&mut *conn).await?;
        Ok(())
    }
}

#[derive(Default)]
struct Mig01;

#[async_trait]
impl Migration for Mig01 {
    async fn up(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("ALTER TABLE authors ADD COLUMN email TEXT")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("ALTER TABLE authors DROP COLUMN email")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["Mig00".into()]
    }
}

#[derive(Default)]
struct SeedAuthors;

#[async_trait]
impl Seeder for SeedAuthors {
    async fn run(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("INSERT INTO authors (name, email) VALUES ('ada', 'ada@example.com')")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn rollback(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("DELETE FROM authors WHERE name = 'ada'")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["Mig01".into()]
    }

    fn environments(&self) -> Vec<String> {
        vec!["test".into()]
    }
}

async fn create_test_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

fn change_dir(files: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for file in files {
        std::fs::write(dir.path().join(file), "// schema change\n").unwrap();
    }
    dir
}

fn registry() -> ChangeRegistry {
    let mut registry = ChangeRegistry::new();
    registry
        .register_migration::<Mig01>()
        .register_migration::<Mig00>()
        .register_seeder::<SeedAuthors>();
    registry
}

fn names(changes: &[ChangeRecord]) -> Vec<String> {
    changes
        .iter()
        .map(|c| c.name().rsplit("::").next().unwrap_or_default().to_string())
        .collect()
}

async fn ledger_rows(runner: &SchemaChangeRunner) -> i64 {
    let mut conn = runner.pool().unwrap().acquire().await.unwrap();
    runner.ledger().count(&mut conn).await.unwrap()
}

#[tokio::test]
async fn test_apply_and_roll_back_discovered_changes() {
    let dir = change_dir(&["Mig01.rs", "Mig00.rs"]);
    let config = RunnerConfig::new()
        .with_changes_dir(dir.path())
        .with_namespace("end_to_end");
    let mut runner = SchemaChangeRunner::new(config, registry()).with_pool(create_test_pool().await);

    let applied = runner.apply().await.unwrap();
    assert_eq!(names(&applied), ["Mig00", "Mig01"]);
    assert_eq!(ledger_rows(&runner).await, 2);

    let last = runner.rollback().await.unwrap().unwrap();
    assert_eq!(names(&[last]), ["Mig01"]);

    let rest = runner.rollback_up_to(Some("Mig00")).await.unwrap();
    assert_eq!(names(&rest), ["Mig00"]);
    assert_eq!(ledger_rows(&runner).await, 0);
}

#[tokio::test]
async fn test_second_apply_does_nothing() {
    let dir = change_dir(&["Mig00.rs", "Mig01.rs"]);
    let config = RunnerConfig::new()
        .with_changes_dir(dir.path())
        .with_namespace("end_to_end");
    let mut runner = SchemaChangeRunner::new(config, registry()).with_pool(create_test_pool().await);

    assert_eq!(runner.apply().await.unwrap().len(), 2);
    assert!(runner.apply().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_seeder_runs_only_in_its_environment() {
    let dir = change_dir(&["Mig00.rs", "Mig01.rs", "SeedAuthors.rs"]);

    let dev = RunnerConfig::new()
        .with_changes_dir(dir.path())
        .with_namespace("end_to_end");
    let pool = create_test_pool().await;
    let mut runner = SchemaChangeRunner::new(dev, registry()).with_pool(pool.clone());
    assert_eq!(names(&runner.apply().await.unwrap()), ["Mig00", "Mig01"]);

    let test = RunnerConfig::new()
        .with_changes_dir(dir.path())
        .with_namespace("end_to_end")
        .with_environment("test");
    let mut runner = SchemaChangeRunner::new(test, registry()).with_pool(pool.clone());
    assert_eq!(names(&runner.apply().await.unwrap()), ["SeedAuthors"]);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM authors")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let status = runner.status().await.unwrap();
    assert!(status.iter().all(|s| s.applied));

    let rolled_back = runner.rollback_up_to(None).await.unwrap();
    assert_eq!(names(&rolled_back), ["SeedAuthors", "Mig01", "Mig00"]);
}

#[tokio::test]
async fn test_registration_errors_reach_every_callback() {
    let dir = change_dir(&["Mig00.rs", "Unknown.rs", "mod.rs"]);
    let config = RunnerConfig::new()
        .with_changes_dir(dir.path())
        .with_namespace("end_to_end");
    let mut runner = SchemaChangeRunner::new(config, registry()).with_pool(create_test_pool().await);

    let seen = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second"] {
        let seen = Arc::clone(&seen);
        runner.on_registration_error(move |err| {
            seen.lock().unwrap().push(format!("{label}: {err}"));
        });
    }

    let applied = runner.apply().await.unwrap();
    assert_eq!(names(&applied), ["Mig00"]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].starts_with("first: No change registered for 'end_to_end::Unknown'"));
    assert!(seen[1].starts_with("second:"));
}

#[tokio::test]
async fn test_invalid_directory_is_fatal() {
    let config = RunnerConfig::new().with_changes_dir("/no/such/change/dir");
    let mut runner = SchemaChangeRunner::new(config, registry()).with_pool(create_test_pool().await);

    assert!(matches!(
        runner.apply().await,
        Err(RunnerError::InvalidPath { .. })
    ));
}

#[tokio::test]
async fn test_legacy_tracking_table() {
    let dir = change_dir(&["Mig00.rs"]);
    let config = RunnerConfig::new()
        .with_changes_dir(dir.path())
        .with_namespace("end_to_end")
        .with_tracking_table(TrackingTable::legacy());
    let pool = create_test_pool().await;
    let mut runner = SchemaChangeRunner::new(config, registry()).with_pool(pool.clone());

    runner.apply().await.unwrap();

    let (name,): (String,) = sqlx::query_as("SELECT name FROM migrations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(name.ends_with("::Mig00"));
    assert!(runner
        .tracking_table_sql(&MssqlDialect::new())
        .contains("[migrations]"));
}
