//! Example: Blog Application Schema Changes
//!
//! Registers the migrations and seeders of a small blog, applies them,
//! prints their status and rolls the newest one back.
//!
//! Run with: cargo run --example blog_changes -p oxide-schema-runner -- --env dev

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_schema_runner::prelude::*;

/// Applies the blog schema changes to a SQLite database.
#[derive(Parser)]
#[command(name = "blog_changes")]
#[command(about, long_about = None)]
struct Cli {
    /// Database URL.
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database: String,

    /// Environment tag used to gate changes.
    #[arg(short, long, env = "APP_ENV", default_value = "dev")]
    env: String,

    /// Roll back everything after applying.
    #[arg(long)]
    reset: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

// =============================================================================
// Change Definitions
// =============================================================================

#[derive(Default)]
struct CreateUsers;

#[async_trait]
impl Migration for CreateUsers {
    async fn up(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(100) NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("DROP TABLE users").execute(&mut *conn).await?;
        Ok(())
    }
}

#[derive(Default)]
struct CreatePosts;

#[async_trait]
impl Migration for CreatePosts {
    async fn up(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query(
            "CREATE TABLE posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id INTEGER NOT NULL REFERENCES users(id),
                title VARCHAR(200) NOT NULL,
                body TEXT NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("DROP TABLE posts").execute(&mut *conn).await?;
        Ok(())
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["CreateUsers".into()]
    }
}

#[derive(Default)]
struct SeedDemoContent;

#[async_trait]
impl Seeder for SeedDemoContent {
    async fn run(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("INSERT INTO users (username) VALUES ('demo')")
            .execute(&mut *conn)
            .await?;
        sqlx::query(
            "INSERT INTO posts (author_id, title, body)
             SELECT id, 'Hello', 'First post' FROM users WHERE username = 'demo'",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn rollback(&self, conn: &mut SqliteConnection) -> ChangeResult {
        sqlx::query("DELETE FROM posts").execute(&mut *conn).await?;
        sqlx::query("DELETE FROM users WHERE username = 'demo'")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["CreatePosts".into()]
    }

    fn environments(&self) -> Vec<String> {
        vec!["dev".into(), "test".into()]
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut registry = ChangeRegistry::new();
    registry
        .register_seeder::<SeedDemoContent>()
        .register_migration::<CreatePosts>()
        .register_migration::<CreateUsers>();

    let config = RunnerConfig::new()
        .with_environment(cli.env)
        .with_database_url(cli.database);

    let mut runner = SchemaChangeRunner::new(config, registry);
    runner.on_execution_error(|err, change, runner| {
        eprintln!("[{}] {} failed: {err}", runner.environment(), change.name());
    });
    runner.connect().await?;

    println!("[1] Tracking table DDL per dialect:\n");
    for dialect in [
        &SqliteDialect::new() as &dyn TrackingDialect,
        &MySqlDialect::new(),
        &MssqlDialect::new(),
    ] {
        println!("-- {}\n{};\n", dialect.name(), runner.tracking_table_sql(dialect));
    }

    println!("[2] Applying changes...\n");
    let applied = runner.apply().await?;
    for change in &applied {
        println!("    [{}] {}", change.kind(), change.name());
    }
    println!();

    println!("[3] Status:\n");
    for status in runner.status().await? {
        let mark = if status.applied { "X" } else { " " };
        let note = if status.allowed { "" } else { " (not in this environment)" };
        println!("    [{mark}] {}{note}", status.name);
    }
    println!();

    println!("[4] Rolling back the newest change...\n");
    if let Some(change) = runner.rollback().await? {
        println!("    Rolled back {}", change.name());
    }

    if cli.reset {
        let rolled_back = runner.rollback_up_to(None).await?;
        info!(count = rolled_back.len(), "Reset complete");
    }

    Ok(())
}
