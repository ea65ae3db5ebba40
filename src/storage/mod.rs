//! Storage layer for the review service.
//!
//! The service talks to MySQL in production. Connections go through sqlx's
//! `Any` driver, so the same queries also run against SQLite for embedded
//! deployments and tests.
//!
//! Startup only does two things here: open the pool, and (when auto-migrate is
//! requested) migrate the schema and seed the default policy. Seeding checks for
//! existence first and never updates a row that is already there.

pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions, install_default_drivers};
use sqlx::{AnyPool, ConnectOptions, Row};
use tracing::info;

use crate::config::DbConfig;
use crate::policy::{DefaultPolicySet, Rule, RuleLevel, RuleTemplate};
use crate::{Error, Result};

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the service database.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: AnyPool,
}

/// What `migrate_if_requested` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Auto-migrate was off; nothing was touched.
    Skipped,
    Applied(MigrationReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrations_applied: usize,
    pub rules_created: usize,
    pub template_created: bool,
}

impl Storage {
    /// Open the MySQL database described by `db`.
    pub async fn open(db: &DbConfig, debug: bool) -> Result<Self> {
        let url = db.connection_url()?;
        Self::connect(&url, debug).await
    }

    /// Open a database by connection URL (`mysql://...` or `sqlite:...`).
    ///
    /// Statement logging is only enabled in debug mode.
    pub async fn connect(url: &str, debug: bool) -> Result<Self> {
        install_default_drivers();

        let mut options = AnyConnectOptions::from_str(url).map_err(Error::StorageUnavailable)?;
        let backend = options.database_url.scheme().to_string();
        if !debug {
            options = options.disable_statement_logging();
        }

        let pool = AnyPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(Error::StorageUnavailable)?;

        info!(backend = %backend, "Storage opened");

        Ok(Self { pool })
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Migrate the schema and seed the default policy when `auto_migrate` is set.
    ///
    /// Migration always completes before seeding starts. With `auto_migrate`
    /// off this returns [`MigrationOutcome::Skipped`] without touching the database.
    pub async fn migrate_if_requested(
        &self,
        auto_migrate: bool,
        policy: &DefaultPolicySet,
    ) -> Result<MigrationOutcome> {
        if !auto_migrate {
            return Ok(MigrationOutcome::Skipped);
        }

        let migrations_applied = self.auto_migrate().await?;
        let rules_created = self.create_rules_if_not_exist(&policy.rules).await?;
        let template_created = self.create_template_if_not_exist(&policy.template).await?;

        info!(
            migrations_applied,
            rules_created, template_created, "Storage migration finished"
        );

        Ok(MigrationOutcome::Applied(MigrationReport {
            migrations_applied,
            rules_created,
            template_created,
        }))
    }

    /// Insert each rule whose name is not present yet. Returns how many were inserted.
    pub async fn create_rules_if_not_exist(&self, rules: &[Rule]) -> Result<usize> {
        let mut created = 0;
        for rule in rules {
            if self.rule_exists(&rule.name).await? {
                continue;
            }
            sqlx::query(
                "INSERT INTO rules (name, description, level, category, value, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(rule.name.as_str())
            .bind(rule.description.as_str())
            .bind(rule.level.as_str())
            .bind(rule.category.as_str())
            .bind(rule.value.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
            created += 1;
        }
        Ok(created)
    }

    /// Create `template` with its rule list unless a template of that name exists.
    ///
    /// An existing template is left exactly as it is, rule list included.
    pub async fn create_template_if_not_exist(&self, template: &RuleTemplate) -> Result<bool> {
        if self.template_exists(&template.name).await? {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO rule_templates (name, description, created_at) VALUES (?, ?, ?)")
            .bind(template.name.as_str())
            .bind(template.description.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        for rule_name in &template.rule_names {
            sqlx::query("INSERT INTO rule_template_rules (template_name, rule_name) VALUES (?, ?)")
                .bind(template.name.as_str())
                .bind(rule_name.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(true)
    }

    pub async fn rule_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rules WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn template_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rule_templates WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// List all rules ordered by name.
    pub async fn list_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query(
            "SELECT name, description, level, category, value FROM rules ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Rule> {
                let level: String = row.try_get("level")?;
                Ok(Rule {
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    level: RuleLevel::parse(&level).ok_or_else(|| {
                        Error::InvalidInput(format!("unknown rule level '{}'", level))
                    })?,
                    category: row.try_get("category")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    /// List all templates with their rule names, ordered by name.
    pub async fn list_templates(&self) -> Result<Vec<RuleTemplate>> {
        let rows = sqlx::query("SELECT name, description FROM rule_templates ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut templates = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let rule_names: Vec<String> = sqlx::query_scalar(
                "SELECT rule_name FROM rule_template_rules WHERE template_name = ? ORDER BY rule_name",
            )
            .bind(name.as_str())
            .fetch_all(&self.pool)
            .await?;

            templates.push(RuleTemplate {
                name,
                description: row.try_get("description")?,
                rule_names,
            });
        }
        Ok(templates)
    }
}
