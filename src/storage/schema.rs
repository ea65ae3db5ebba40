//! Versioned schema migrations.
//!
//! All CREATE TABLE statements live here. Statements use the subset of SQL that
//! both MySQL and SQLite accept, and every statement is itself idempotent, so a
//! migration interrupted before it is recorded can safely run again.

use chrono::Utc;
use tracing::info;

use super::Storage;
use crate::Result;

pub(crate) struct Migration {
    pub version: &'static str,
    pub statements: &'static [&'static str],
}

const CREATE_MIGRATIONS_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS schema_migrations (
    version VARCHAR(64) PRIMARY KEY,
    applied_at VARCHAR(64) NOT NULL
)"#;

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_create_rules",
        statements: &[r#"CREATE TABLE IF NOT EXISTS rules (
                name VARCHAR(255) PRIMARY KEY,
                description VARCHAR(1024) NOT NULL,
                level VARCHAR(32) NOT NULL,
                category VARCHAR(255) NOT NULL,
                value VARCHAR(255) NOT NULL,
                created_at VARCHAR(64) NOT NULL
            )"#],
    },
    Migration {
        version: "0002_create_rule_templates",
        statements: &[
            r#"CREATE TABLE IF NOT EXISTS rule_templates (
                name VARCHAR(255) PRIMARY KEY,
                description VARCHAR(1024) NOT NULL,
                created_at VARCHAR(64) NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS rule_template_rules (
                template_name VARCHAR(255) NOT NULL,
                rule_name VARCHAR(255) NOT NULL,
                PRIMARY KEY (template_name, rule_name)
            )"#,
        ],
    },
];

impl Storage {
    /// Apply every migration not yet recorded. Returns how many were applied.
    ///
    /// Running against an up-to-date schema applies nothing and succeeds.
    pub async fn auto_migrate(&self) -> Result<usize> {
        sqlx::query(CREATE_MIGRATIONS_TABLE)
            .execute(self.pool())
            .await?;

        let mut applied = 0;
        for migration in MIGRATIONS {
            let recorded: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations WHERE version = ?")
                    .bind(migration.version)
                    .fetch_one(self.pool())
                    .await?;
            if recorded > 0 {
                continue;
            }

            for statement in migration.statements {
                sqlx::query(statement).execute(self.pool()).await?;
            }

            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(Utc::now().to_rfc3339())
                .execute(self.pool())
                .await?;

            info!(version = migration.version, "Applied schema migration");
            applied += 1;
        }

        Ok(applied)
    }

    /// Versions recorded in `schema_migrations`, in order.
    #[cfg(test)]
    pub(crate) async fn applied_migrations(&self) -> Result<Vec<String>> {
        let versions: Vec<String> =
            sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
                .fetch_all(self.pool())
                .await?;
        Ok(versions)
    }
}
