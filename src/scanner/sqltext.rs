//! Scanner for SQL given inline or as a directory of `.sql` files.
//!
//! Statements are grouped by fingerprint and uploaded to the audit plan in
//! chunks of at most `buffer_size` entries. The first chunk replaces the
//! plan's SQL list, later chunks append to it. Progress is kept across
//! attempts, so a retry resumes with the first chunk that was not accepted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlparser::tokenizer::TokenizerError;
use tracing::{info, warn};

use super::client::{AuditPlanSql, RemoteClient};
use super::sql::{fingerprint, split_statements};
use super::{ScanContext, ScanError, ScanReport, Scanner};

const SQL_FILE_EXTENSION: &str = "sql";

/// Where the SQL text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlSource {
    Inline(String),
    /// Every `*.sql` file directly inside the directory, in name order.
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTextParams {
    pub source: SqlSource,
    pub audit_plan: String,
    /// Trigger an audit after the upload.
    pub audit: bool,
}

impl SqlTextParams {
    /// Build parameters from the `sqltext` flags. Exactly one of `sql` and
    /// `dir` must be given.
    pub fn new(
        sql: Option<String>,
        dir: Option<PathBuf>,
        audit_plan: impl Into<String>,
        audit: bool,
    ) -> Result<Self, ScanError> {
        let audit_plan = audit_plan.into();
        if audit_plan.trim().is_empty() {
            return Err(ScanError::InvalidParams(
                "audit plan name is required (--name)".to_string(),
            ));
        }

        let sql = sql.filter(|s| !s.trim().is_empty());
        let dir = dir.filter(|d| !d.as_os_str().is_empty());
        let source = match (sql, dir) {
            (Some(sql), None) => SqlSource::Inline(sql),
            (None, Some(dir)) => SqlSource::Directory(dir),
            (Some(_), Some(_)) => {
                return Err(ScanError::InvalidParams(
                    "--sql and --dir cannot be used together".to_string(),
                ));
            }
            (None, None) => {
                return Err(ScanError::InvalidParams(
                    "one of --sql or --dir is required".to_string(),
                ));
            }
        };

        Ok(Self {
            source,
            audit_plan,
            audit,
        })
    }
}

#[derive(Debug, Default)]
struct Progress {
    /// Aggregated SQL, collected on the first attempt.
    collected: Option<Collected>,
    chunks_flushed: usize,
    triggered: bool,
}

#[derive(Debug)]
struct Collected {
    statements: usize,
    sqls: Vec<AuditPlanSql>,
}

#[derive(Debug)]
pub struct SqlTextScanner {
    params: SqlTextParams,
    client: RemoteClient,
    progress: Progress,
}

impl SqlTextScanner {
    pub fn new(params: SqlTextParams, client: RemoteClient) -> Result<Self, ScanError> {
        if let SqlSource::Directory(ref dir) = params.source {
            if !dir.is_dir() {
                return Err(ScanError::InvalidParams(format!(
                    "{} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(Self {
            params,
            client,
            progress: Progress::default(),
        })
    }

    pub fn params(&self) -> &SqlTextParams {
        &self.params
    }

    fn collect(&self) -> Result<Collected, ScanError> {
        let texts = match self.params.source {
            SqlSource::Inline(ref sql) => vec![sql.clone()],
            SqlSource::Directory(ref dir) => read_sql_dir(dir)?,
        };

        let timestamp = Utc::now().to_rfc3339();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut sqls: Vec<AuditPlanSql> = Vec::new();
        let mut counters: Vec<u64> = Vec::new();
        let mut statements = 0;

        let tokenize_error =
            |e: TokenizerError| ScanError::Permanent(format!("tokenize SQL: {}", e));

        let mut all = Vec::new();
        for text in &texts {
            all.extend(split_statements(text).map_err(tokenize_error)?);
        }
        for statement in all {
            let fp = fingerprint(&statement).map_err(tokenize_error)?;
            if fp.is_empty() {
                continue;
            }
            statements += 1;
            match index.get(&fp) {
                Some(&i) => {
                    counters[i] += 1;
                    sqls[i].last_receive_text = statement;
                }
                None => {
                    index.insert(fp.clone(), sqls.len());
                    counters.push(1);
                    sqls.push(AuditPlanSql {
                        fingerprint: fp,
                        counter: String::new(),
                        last_receive_text: statement,
                        last_receive_timestamp: timestamp.clone(),
                    });
                }
            }
        }
        for (sql, count) in sqls.iter_mut().zip(counters) {
            sql.counter = count.to_string();
        }

        Ok(Collected { statements, sqls })
    }
}

fn read_sql_dir(dir: &Path) -> Result<Vec<String>, ScanError> {
    let read_error =
        |e: std::io::Error| ScanError::Permanent(format!("read sql dir {}: {}", dir.display(), e));

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(read_error)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(SQL_FILE_EXTENSION))
        })
        .collect();
    files.sort();

    files
        .iter()
        .map(|path| {
            fs::read_to_string(path).map_err(|e| {
                ScanError::Permanent(format!("read sql file {}: {}", path.display(), e))
            })
        })
        .collect()
}

impl Scanner for SqlTextScanner {
    fn name(&self) -> &'static str {
        "sqltext"
    }

    async fn scan(&mut self, ctx: &ScanContext) -> Result<ScanReport, ScanError> {
        if ctx.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if ctx.buffer_size == 0 {
            return Err(ScanError::InvalidParams("buffer size must be positive".to_string()));
        }

        if self.progress.collected.is_none() {
            let collected = self.collect()?;
            info!(
                statements = collected.statements,
                fingerprints = collected.sqls.len(),
                "Collected SQL"
            );
            self.progress.collected = Some(collected);
        }
        let Some(ref collected) = self.progress.collected else {
            return Err(ScanError::Permanent("no collected SQL".to_string()));
        };

        if collected.sqls.is_empty() {
            warn!("No SQL statements found, nothing to upload");
            return Ok(ScanReport {
                statements: collected.statements,
                ..ScanReport::default()
            });
        }

        let audit_plan = self.params.audit_plan.as_str();
        let chunks: Vec<&[AuditPlanSql]> = collected.sqls.chunks(ctx.buffer_size).collect();
        for (i, chunk) in chunks.iter().enumerate().skip(self.progress.chunks_flushed) {
            if i == 0 {
                self.client.upload_full(audit_plan, chunk, &ctx.cancel).await?;
            } else {
                self.client.upload_partial(audit_plan, chunk, &ctx.cancel).await?;
            }
            self.progress.chunks_flushed = i + 1;
            info!(chunk = i + 1, of = chunks.len(), entries = chunk.len(), "Uploaded SQL");
        }

        if self.params.audit && !self.progress.triggered {
            self.client.trigger_audit(audit_plan, &ctx.cancel).await?;
            self.progress.triggered = true;
            info!(audit_plan, "Triggered audit");
        }

        Ok(ScanReport {
            statements: collected.statements,
            uploaded: collected.sqls.len(),
            chunks: chunks.len(),
            triggered: self.progress.triggered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn client() -> RemoteClient {
        RemoteClient::new(Duration::from_secs(1), "127.0.0.1", 1).unwrap()
    }

    fn scanner(source: SqlSource) -> SqlTextScanner {
        let params = SqlTextParams {
            source,
            audit_plan: "plan".to_string(),
            audit: true,
        };
        SqlTextScanner::new(params, client()).unwrap()
    }

    #[test]
    fn test_params_require_plan_name() {
        let err = SqlTextParams::new(Some("select 1".to_string()), None, " ", true).unwrap_err();
        assert!(matches!(err, ScanError::InvalidParams(_)));
    }

    #[test]
    fn test_params_require_exactly_one_source() {
        let none = SqlTextParams::new(None, Some(PathBuf::new()), "plan", true).unwrap_err();
        assert!(matches!(none, ScanError::InvalidParams(_)));

        let both = SqlTextParams::new(
            Some("select 1".to_string()),
            Some(PathBuf::from("/tmp")),
            "plan",
            true,
        )
        .unwrap_err();
        assert!(matches!(both, ScanError::InvalidParams(_)));

        let inline = SqlTextParams::new(Some("select 1".to_string()), None, "plan", false).unwrap();
        assert_eq!(inline.source, SqlSource::Inline("select 1".to_string()));
        assert!(!inline.audit);
    }

    #[test]
    fn test_missing_directory_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let params = SqlTextParams {
            source: SqlSource::Directory(temp_dir.path().join("absent")),
            audit_plan: "plan".to_string(),
            audit: true,
        };
        let err = SqlTextScanner::new(params, client()).unwrap_err();
        assert!(matches!(err, ScanError::InvalidParams(_)));
    }

    #[test]
    fn test_collect_groups_by_fingerprint() {
        let scanner = scanner(SqlSource::Inline(
            "select * from t where id = 1; select * from t where id = 2;\n\
             update t set a = 'x' where id = 3; -- done"
                .to_string(),
        ));

        let collected = scanner.collect().unwrap();

        assert_eq!(collected.statements, 3);
        assert_eq!(collected.sqls.len(), 2);
        assert_eq!(collected.sqls[0].fingerprint, "select * from t where id = ?");
        assert_eq!(collected.sqls[0].counter, "2");
        assert_eq!(collected.sqls[0].last_receive_text, "select * from t where id = 2");
        assert_eq!(collected.sqls[1].counter, "1");
    }

    #[test]
    fn test_collect_groups_signed_numbers_with_unsigned() {
        let scanner = scanner(SqlSource::Inline(
            "select * from t where id = -1; select * from t where id = 1;".to_string(),
        ));

        let collected = scanner.collect().unwrap();

        assert_eq!(collected.sqls.len(), 1);
        assert_eq!(collected.sqls[0].fingerprint, "select * from t where id = ?");
        assert_eq!(collected.sqls[0].counter, "2");
    }

    #[test]
    fn test_collect_rejects_unterminated_string() {
        let scanner = scanner(SqlSource::Inline("select 'abc from t".to_string()));
        let err = scanner.collect().unwrap_err();
        assert!(matches!(err, ScanError::Permanent(_)), "{:?}", err);
    }

    #[test]
    fn test_collect_reads_sql_files_in_name_order() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.sql"), "select 2 from b;").unwrap();
        fs::write(temp_dir.path().join("a.SQL"), "select 1 from a;").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "select 3 from c;").unwrap();
        fs::create_dir(temp_dir.path().join("nested.sql")).unwrap();

        let scanner = scanner(SqlSource::Directory(temp_dir.path().to_path_buf()));
        let collected = scanner.collect().unwrap();

        let fingerprints: Vec<&str> = collected.sqls.iter().map(|s| s.fingerprint.as_str()).collect();
        assert_eq!(fingerprints, vec!["select ? from a", "select ? from b"]);
    }

    #[tokio::test]
    async fn test_empty_input_uploads_nothing() {
        let mut scanner = scanner(SqlSource::Inline("-- only a comment".to_string()));
        let ctx = ScanContext {
            cancel: CancellationToken::new(),
            buffer_size: 10,
            attempt: 1,
        };

        // The client points at a closed port, so any request would fail
        let report = scanner.scan(&ctx).await.unwrap();
        assert_eq!(report, ScanReport::default());
    }

    #[tokio::test]
    async fn test_scan_checks_cancellation_first() {
        let mut scanner = scanner(SqlSource::Inline("select 1".to_string()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = ScanContext {
            cancel,
            buffer_size: 10,
            attempt: 1,
        };

        assert!(matches!(scanner.scan(&ctx).await, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let mut scanner = scanner(SqlSource::Inline("select 1".to_string()));
        let ctx = ScanContext {
            cancel: CancellationToken::new(),
            buffer_size: 10,
            attempt: 1,
        };

        let err = scanner.scan(&ctx).await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }
}
