//! Database migrations

use anyhow::Result;
use tracing::info;

use super::legacy;
use super::DbEngine;

/// Current migration version
const CURRENT_VERSION: i32 = 2;

/// Run database migrations
pub async fn run_migrations(engine: &DbEngine) -> Result<()> {
    let pool = engine.pool();

    // Get current version
    let row: (i32,) = sqlx::query_as("SELECT version FROM dbmigration WHERE id = 1")
        .fetch_one(pool)
        .await?;
    let current_version = row.0;

    if current_version >= CURRENT_VERSION {
        info!("Database is up to date (version {})", current_version);
        return Ok(());
    }

    info!(
        "Running migrations from version {} to {}",
        current_version, CURRENT_VERSION
    );

    // Run migrations in order
    for version in (current_version + 1)..=CURRENT_VERSION {
        run_migration(engine, version).await?;

        // Update version
        sqlx::query("UPDATE dbmigration SET version = ? WHERE id = 1")
            .bind(version)
            .execute(pool)
            .await?;

        info!("Applied migration {}", version);
    }

    Ok(())
}

async fn run_migration(engine: &DbEngine, version: i32) -> Result<()> {
    let pool = engine.pool();

    match version {
        1 => {
            // canonical tables are created when the engine opens
        }
        2 => {
            // databases created by the old scripts keep their single-table
            // history next to the new schema; copy it over once
            if legacy::has_legacy_table(pool).await? {
                let report = legacy::import_table(pool, pool).await?;
                info!(
                    imported = report.imported,
                    duplicates = report.duplicates,
                    skipped = report.skipped,
                    "Imported in-place {} rows",
                    legacy::LEGACY_TABLE
                );
            }
        }
        _ => {
            tracing::warn!("Unknown migration version: {}", version);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::engine::testing::temp_engine;
    use crate::db::legacy::fixtures::create_legacy_table;
    use crate::db::tables::PlayTable;

    #[tokio::test]
    async fn test_migrations_import_in_place_once() {
        let (engine, _settings, _dir) = temp_engine().await;
        create_legacy_table(engine.pool()).await;

        run_migrations(&engine).await.unwrap();
        assert_eq!(PlayTable::count(engine.pool()).await.unwrap(), 2);

        let version: i32 = sqlx::query_scalar("SELECT version FROM dbmigration WHERE id = 1")
            .fetch_one(engine.pool())
            .await
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);

        // already at the current version, nothing re-runs
        run_migrations(&engine).await.unwrap();
        assert_eq!(PlayTable::count(engine.pool()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_migrations_on_fresh_database() {
        let (engine, _settings, _dir) = temp_engine().await;
        run_migrations(&engine).await.unwrap();
        assert_eq!(PlayTable::count(engine.pool()).await.unwrap(), 0);
    }
}
