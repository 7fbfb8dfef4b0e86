//! Resolution cache operations
//!
//! The cache is the single source of truth consulted before any network
//! probe. Every public operation is one statement or one transaction, so each
//! call is atomic on its own; callers compose multi-call sequences themselves.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::app::client::resolve_link;
use crate::app::topology::Mirror;
use crate::errors::{CacheError, CacheResult};

use super::config::CacheConfig;
use super::db::Database;
use super::models::{join_blocked, FileLink, MirrorRow, Outcome, RecordRow, FLAG_PASS, FLAG_SKIP};
use super::stats::CacheStats;

/// Persistent store of files, mirrors and probe outcomes
#[derive(Debug, Clone)]
pub struct ResolutionCache {
    db: Database,
}

impl From<Database> for ResolutionCache {
    fn from(db: Database) -> Self {
        Self { db }
    }
}

impl ResolutionCache {
    /// Open (and migrate) the cache database named by the configuration
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Database` or `CacheError::Migration` if the store
    /// is unusable; both are fatal to the process
    pub async fn open(config: &CacheConfig) -> CacheResult<Self> {
        Ok(Database::connect(config).await?.into())
    }

    /// Open a throwaway in-memory cache
    pub async fn in_memory() -> CacheResult<Self> {
        Ok(Database::connect_in_memory().await?.into())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Register a file; no-op if it is already known
    pub async fn add_file(&self, path: &str) -> CacheResult<()> {
        let result = sqlx::query("INSERT INTO files (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
            .bind(path)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() > 0 {
            debug!("Registered file {}", path);
        }
        Ok(())
    }

    /// Register a file first seen in repository index `version`
    ///
    /// No-op if the file is already known; see [`Self::raise_file_version`].
    pub async fn add_versioned_file(&self, path: &str, version: u64) -> CacheResult<()> {
        let result = sqlx::query(
            "INSERT INTO files (name, version) VALUES (?, ?) ON CONFLICT (name) DO NOTHING",
        )
        .bind(path)
        .bind(db_version(version)?)
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() > 0 {
            debug!("Registered file {} at version {}", path, version);
        }
        Ok(())
    }

    /// Require mirrors to publish at least `version` to serve `path`
    ///
    /// Versions only move forward. Returns whether the file was updated.
    pub async fn raise_file_version(&self, path: &str, version: u64) -> CacheResult<bool> {
        let version = db_version(version)?;
        let result = sqlx::query("UPDATE files SET version = ? WHERE name = ? AND version < ?")
            .bind(version)
            .bind(path)
            .bind(version)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Oldest repository index version a mirror must publish to serve `path`
    ///
    /// # Errors
    ///
    /// `FileNotFound` if the path is unknown
    pub async fn file_version(&self, path: &str) -> CacheResult<u64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM files WHERE name = ?")
            .bind(path)
            .fetch_optional(self.db.pool())
            .await?;
        version
            .map(|v| u64::try_from(v).unwrap_or(0))
            .ok_or_else(|| CacheError::FileNotFound {
                path: path.to_string(),
            })
    }

    /// Forget a file; no-op if it is unknown
    ///
    /// Records of the file are left behind until [`Self::prune_orphans`].
    pub async fn remove_file(&self, path: &str) -> CacheResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE name = ?")
            .bind(path)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() > 0 {
            debug!("Removed file {}", path);
        }
        Ok(())
    }

    pub async fn exists_file(&self, path: &str) -> CacheResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM files WHERE name = ?)")
            .bind(path)
            .fetch_one(self.db.pool())
            .await?;
        Ok(exists)
    }

    pub async fn get_all_files(&self) -> CacheResult<BTreeSet<String>> {
        let files: Vec<String> = sqlx::query_scalar("SELECT name FROM files")
            .fetch_all(self.db.pool())
            .await?;
        Ok(files.into_iter().collect())
    }

    // =========================================================================
    // Mirrors
    // =========================================================================

    /// Register a mirror; no-op if the name is already registered
    pub async fn add_mirror(&self, mirror: &Mirror) -> CacheResult<()> {
        let result = sqlx::query(
            r#"
                INSERT INTO mirrors (name, url, continent, country, blocked_countries)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&mirror.name)
        .bind(mirror.base_url.as_str())
        .bind(&mirror.continent)
        .bind(&mirror.country)
        .bind(join_blocked(&mirror.blocked_countries))
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() > 0 {
            debug!("Registered mirror {} ({})", mirror.name, mirror.base_url);
        }
        Ok(())
    }

    /// Bring a registered mirror's row in line with the topology
    ///
    /// The mirror keeps its id, and so its registration order. PASS records
    /// are dropped when the URL changes since they were probed elsewhere.
    /// Returns whether the row changed; unregistered names are ignored.
    pub async fn update_mirror(&self, mirror: &Mirror) -> CacheResult<bool> {
        let mut tx = self.db.pool().begin().await?;

        let row: Option<MirrorRow> = sqlx::query_as(
            "SELECT id, name, url, continent, country, blocked_countries FROM mirrors WHERE name = ?",
        )
        .bind(&mirror.name)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };

        let url = mirror.base_url.as_str();
        let blocked = join_blocked(&mirror.blocked_countries);
        if row.url == url
            && row.continent == mirror.continent
            && row.country == mirror.country
            && row.blocked_countries == blocked
        {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE mirrors SET url = ?, continent = ?, country = ?, blocked_countries = ? WHERE id = ?",
        )
        .bind(url)
        .bind(&mirror.continent)
        .bind(&mirror.country)
        .bind(&blocked)
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        if row.url != url {
            let dropped = sqlx::query("DELETE FROM records WHERE mirror_id = ? AND flag = ?")
                .bind(row.id)
                .bind(FLAG_PASS)
                .execute(&mut *tx)
                .await?;
            debug!(
                "Dropped {} records of {} after its URL moved",
                dropped.rows_affected(),
                mirror.name
            );
        }

        tx.commit().await?;
        info!("Updated mirror {} ({})", mirror.name, url);
        Ok(true)
    }

    /// Unregister a mirror; its records are left behind
    pub async fn delete_mirror(&self, name: &str) -> CacheResult<()> {
        let result = sqlx::query("DELETE FROM mirrors WHERE name = ?")
            .bind(name)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() > 0 {
            debug!("Deleted mirror {}", name);
        }
        Ok(())
    }

    /// Registered mirrors in registration order
    pub async fn list_mirrors(&self) -> CacheResult<Vec<MirrorRow>> {
        let mirrors = sqlx::query_as::<_, MirrorRow>(
            "SELECT id, name, url, continent, country, blocked_countries FROM mirrors ORDER BY id",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(mirrors)
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Look up a cached link to `path` for requesters from `country`
    ///
    /// Mirrors of the country are tried in registration order; the first one
    /// with a PASS record wins. Mirrors blocking the country are ignored.
    ///
    /// # Errors
    ///
    /// - `FileNotFound` if the path is unknown
    /// - `SkipFile` if an exhaustive search already failed for this country
    /// - `MirrorNotFound` if no mirror serves the country
    /// - `RecordNotFound` if mirrors exist but none has a PASS record
    pub async fn get_file_link(&self, path: &str, country: &str) -> CacheResult<FileLink> {
        let mut tx = self.db.pool().begin().await?;

        let file_id = file_id(&mut tx, path)
            .await?
            .ok_or_else(|| CacheError::FileNotFound {
                path: path.to_string(),
            })?;

        let skipped: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM records WHERE file_id = ? AND flag = ? AND country = ?)",
        )
        .bind(file_id)
        .bind(FLAG_SKIP)
        .bind(country)
        .fetch_one(&mut *tx)
        .await?;
        if skipped {
            return Err(CacheError::SkipFile {
                path: path.to_string(),
                country: country.to_string(),
            });
        }

        let mirrors: Vec<MirrorRow> = sqlx::query_as::<_, MirrorRow>(
            r#"
                SELECT id, name, url, continent, country, blocked_countries
                FROM mirrors WHERE country = ? ORDER BY id
            "#,
        )
        .bind(country)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .filter(|m| !m.blocks(country))
        .collect();

        if mirrors.is_empty() {
            return Err(CacheError::MirrorNotFound {
                what: format!("country {}", country),
            });
        }

        for mirror in mirrors {
            let passed: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM records WHERE file_id = ? AND mirror_id = ? AND flag = ?)",
            )
            .bind(file_id)
            .bind(mirror.id)
            .bind(FLAG_PASS)
            .fetch_one(&mut *tx)
            .await?;

            if passed {
                tx.commit().await?;
                let base = url::Url::parse(&mirror.url).map_err(|e| CacheError::InvalidData {
                    reason: format!("mirror {} has invalid url {}: {}", mirror.name, mirror.url, e),
                })?;
                let url = resolve_link(&base, path).map_err(|e| CacheError::InvalidData {
                    reason: e.to_string(),
                })?;
                return Ok(FileLink {
                    url,
                    mirror: mirror.name,
                });
            }
        }

        Err(CacheError::RecordNotFound {
            path: path.to_string(),
            country: country.to_string(),
        })
    }

    /// Upsert a probe outcome for `path`
    ///
    /// # Errors
    ///
    /// `FileNotFound` for an unknown path, `MirrorNotFound` for a PASS naming
    /// an unregistered mirror
    pub async fn add_record(&self, path: &str, outcome: &Outcome) -> CacheResult<()> {
        let mut tx = self.db.pool().begin().await?;

        let file_id = file_id(&mut tx, path)
            .await?
            .ok_or_else(|| CacheError::FileNotFound {
                path: path.to_string(),
            })?;

        match outcome {
            Outcome::Pass { mirror } => {
                let mirror_id = mirror_id(&mut tx, mirror)
                    .await?
                    .ok_or_else(|| CacheError::MirrorNotFound {
                        what: mirror.clone(),
                    })?;
                sqlx::query(
                    r#"
                        INSERT INTO records (file_id, mirror_id, country, flag)
                        VALUES (?, ?, NULL, ?)
                        ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(file_id)
                .bind(mirror_id)
                .bind(FLAG_PASS)
                .execute(&mut *tx)
                .await?;
            }
            Outcome::Skip { country } => {
                sqlx::query(
                    r#"
                        INSERT INTO records (file_id, mirror_id, country, flag)
                        VALUES (?, NULL, ?, ?)
                        ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(file_id)
                .bind(country)
                .bind(FLAG_SKIP)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!("Recorded {:?} for {}", outcome, path);
        Ok(())
    }

    /// Delete the PASS record of `mirror_name` for `path`
    ///
    /// Returns whether a record was deleted.
    pub async fn delete_record(&self, mirror_name: &str, path: &str) -> CacheResult<bool> {
        let mut tx = self.db.pool().begin().await?;

        let mirror_id = mirror_id(&mut tx, mirror_name)
            .await?
            .ok_or_else(|| CacheError::MirrorNotFound {
                what: mirror_name.to_string(),
            })?;
        let file_id = file_id(&mut tx, path)
            .await?
            .ok_or_else(|| CacheError::FileNotFound {
                path: path.to_string(),
            })?;

        let result = sqlx::query("DELETE FROM records WHERE mirror_id = ? AND file_id = ? AND flag = ?")
            .bind(mirror_id)
            .bind(file_id)
            .bind(FLAG_PASS)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            debug!("Deleted record of {} for {}", mirror_name, path);
        }
        Ok(deleted)
    }

    /// Names of the mirrors with a PASS record for `path`
    pub async fn passed_mirrors(&self, path: &str) -> CacheResult<BTreeSet<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
                SELECT m.name
                FROM records r
                JOIN files f ON f.id = r.file_id
                JOIN mirrors m ON m.id = r.mirror_id
                WHERE f.name = ? AND r.flag = ?
            "#,
        )
        .bind(path)
        .bind(FLAG_PASS)
        .fetch_all(self.db.pool())
        .await?;
        Ok(names.into_iter().collect())
    }

    /// All outcomes recorded for `path` (PASS in mirror registration order, then SKIP)
    pub async fn get_records(&self, path: &str) -> CacheResult<Vec<Outcome>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
                SELECT r.flag AS flag, m.name AS mirror, r.country AS country
                FROM records r
                JOIN files f ON f.id = r.file_id
                LEFT JOIN mirrors m ON m.id = r.mirror_id
                WHERE f.name = ?
                ORDER BY r.flag, m.id, r.country
            "#,
        )
        .bind(path)
        .fetch_all(self.db.pool())
        .await?;

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let outcome = match (row.flag.as_str(), row.mirror, row.country) {
                (FLAG_PASS, Some(mirror), _) => Outcome::Pass { mirror },
                // PASS of a deleted mirror
                (FLAG_PASS, None, _) => continue,
                (FLAG_SKIP, _, Some(country)) => Outcome::Skip { country },
                (flag, _, _) => {
                    return Err(CacheError::InvalidData {
                        reason: format!("unexpected record flag {} for {}", flag, path),
                    })
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Drop every SKIP outcome of `path`, returning how many were removed
    pub async fn clear_skips(&self, path: &str) -> CacheResult<u64> {
        let result = sqlx::query(
            "DELETE FROM records WHERE flag = ? AND file_id IN (SELECT id FROM files WHERE name = ?)",
        )
        .bind(FLAG_SKIP)
        .bind(path)
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() > 0 {
            debug!("Cleared {} skip records of {}", result.rows_affected(), path);
        }
        Ok(result.rows_affected())
    }

    /// Delete records whose file or mirror no longer exists
    pub async fn prune_orphans(&self) -> CacheResult<u64> {
        let result = sqlx::query(
            r#"
                DELETE FROM records
                WHERE file_id NOT IN (SELECT id FROM files)
                   OR (mirror_id IS NOT NULL AND mirror_id NOT IN (SELECT id FROM mirrors))
            "#,
        )
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() > 0 {
            info!("Pruned {} orphaned cache records", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    /// Row counts of the cache
    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let (files, mirrors, pass_records, skip_records, orphan_records): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                    SELECT
                        (SELECT COUNT(*) FROM files),
                        (SELECT COUNT(*) FROM mirrors),
                        (SELECT COUNT(*) FROM records WHERE flag = 'PASS'),
                        (SELECT COUNT(*) FROM records WHERE flag = 'SKIP'),
                        (SELECT COUNT(*) FROM records
                            WHERE file_id NOT IN (SELECT id FROM files)
                               OR (mirror_id IS NOT NULL AND mirror_id NOT IN (SELECT id FROM mirrors)))
                "#,
            )
            .fetch_one(self.db.pool())
            .await?;

        Ok(CacheStats {
            files: files as u64,
            mirrors: mirrors as u64,
            pass_records: pass_records as u64,
            skip_records: skip_records as u64,
            orphan_records: orphan_records as u64,
        })
    }
}

async fn file_id(conn: &mut SqliteConnection, path: &str) -> CacheResult<Option<i64>> {
    let id = sqlx::query_scalar("SELECT id FROM files WHERE name = ?")
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

fn db_version(version: u64) -> CacheResult<i64> {
    i64::try_from(version).map_err(|_| CacheError::InvalidData {
        reason: format!("file version {} does not fit the cache", version),
    })
}

async fn mirror_id(conn: &mut SqliteConnection, name: &str) -> CacheResult<Option<i64>> {
    let id = sqlx::query_scalar("SELECT id FROM mirrors WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}
