//! # Database Migrations
//!
//! Embeds the SQL under `migrations/` for the PostgreSQL store and queue.
//!
//! ```rust,ignore
//! // apply at startup
//! stagehand::database::run_migrations(&pool).await?;
//!
//! // or per test, against a throwaway database
//! #[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
//! async fn test_feature(pool: PgPool) { /* ... */ }
//! ```
//!
//! `StagehandSystem::connect_postgres` runs them itself when `database.run_migrations`
//! is set.

use sqlx::PgPool;
use tracing::info;

/// Every migration for the `stagehand_jobs` and `stagehand_work_items` tables
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub type MigrationResult<T> = Result<T, sqlx::migrate::MigrateError>;

/// Apply pending migrations; already-applied ones are skipped
pub async fn run_migrations(pool: &PgPool) -> MigrationResult<()> {
    info!(
        migrations = MIGRATOR.iter().count(),
        "🗄️ DATABASE: Applying migrations"
    );
    MIGRATOR.run(pool).await?;
    info!("🗄️ DATABASE: Migrations complete");
    Ok(())
}
