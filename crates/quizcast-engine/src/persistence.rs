//! SQLite-backed persistence for scheduled jobs and campaign outcomes.
//!
//! The durable store is the single source of truth for job state. Status
//! updates are check-and-set by id (`WHERE status = 'pending'`), which
//! makes them safe against a cancel racing a fire callback, and job rows
//! are never deleted — terminal rows stay as the audit trail.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::types::{JobStatus, OutcomeRecord, ScheduledJob};

/// Jobs + outcomes store.
pub struct CampaignDb {
    conn: Mutex<Connection>,
}

/// One row of a day-scoped outcome summary: a user and their point total.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SummaryRow {
    pub user_id: i64,
    pub name: Option<String>,
    pub points: i64,
}

impl CampaignDb {
    /// Open or create the campaign database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QuizcastError::Storage(format!("create db dir: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| QuizcastError::Storage(format!("db open: {e}")))?;
        // WAL keeps reads cheap while timer callbacks write.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Durable campaign jobs. Never deleted; status is the lifecycle.
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                id TEXT PRIMARY KEY,
                destination TEXT NOT NULL,
                question TEXT NOT NULL,
                options TEXT NOT NULL,              -- JSON array of option strings
                correct_option_index INTEGER,       -- NULL for plain polls
                fire_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON scheduled_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_destination ON scheduled_jobs(destination);

            -- One row per first scored answer / first vote per user per campaign.
            CREATE TABLE IF NOT EXISTS campaign_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                destination TEXT NOT NULL,
                campaign_id TEXT NOT NULL,
                option_index INTEGER NOT NULL,
                points INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outcomes_campaign ON campaign_outcomes(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_outcomes_destination ON campaign_outcomes(destination);
            ",
        )
        .map_err(|e| QuizcastError::Storage(format!("migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| QuizcastError::Storage(format!("db lock: {e}")))
    }

    // ─── Scheduled jobs ──────────────────────────────────────

    /// Insert a freshly scheduled job.
    pub fn insert_job(&self, job: &ScheduledJob) -> Result<()> {
        let options = serde_json::to_string(&job.options)
            .map_err(|e| QuizcastError::Storage(format!("serialize options: {e}")))?;
        self.lock()?
            .execute(
                "INSERT INTO scheduled_jobs
                 (id, destination, question, options, correct_option_index, fire_at, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    job.id,
                    job.destination,
                    job.question,
                    options,
                    job.correct_option_index,
                    job.fire_at.to_rfc3339(),
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| QuizcastError::Storage(format!("insert job: {e}")))?;
        Ok(())
    }

    /// Load one job by id.
    pub fn get_job(&self, id: &str) -> Result<Option<ScheduledJob>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, destination, question, options, correct_option_index, fire_at, status, created_at
                 FROM scheduled_jobs WHERE id = ?1",
            )
            .map_err(|e| QuizcastError::Storage(format!("prepare: {e}")))?;
        let mut rows = stmt
            .query_map([id], row_to_job)
            .map_err(|e| QuizcastError::Storage(format!("query job: {e}")))?;
        match rows.next() {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => Err(QuizcastError::Storage(format!("read job: {e}"))),
            None => Ok(None),
        }
    }

    /// All pending jobs, optionally for one destination, ordered by fire time.
    pub fn pending_jobs(&self, destination: Option<&str>) -> Result<Vec<ScheduledJob>> {
        let conn = self.lock()?;
        let jobs = match destination {
            Some(dest) => {
                let mut stmt = stmt_or_storage(
                    &conn,
                    "SELECT id, destination, question, options, correct_option_index, fire_at, status, created_at
                     FROM scheduled_jobs WHERE status = 'pending' AND destination = ?1
                     ORDER BY fire_at ASC",
                )?;
                let rows = stmt
                    .query_map([dest], row_to_job)
                    .map_err(|e| QuizcastError::Storage(format!("query pending: {e}")))?;
                rows.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = stmt_or_storage(
                    &conn,
                    "SELECT id, destination, question, options, correct_option_index, fire_at, status, created_at
                     FROM scheduled_jobs WHERE status = 'pending' ORDER BY fire_at ASC",
                )?;
                let rows = stmt
                    .query_map([], row_to_job)
                    .map_err(|e| QuizcastError::Storage(format!("query pending: {e}")))?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };
        Ok(jobs)
    }

    /// Ids of pending jobs belonging to any of the given destinations.
    pub fn pending_ids_for_destinations(&self, destinations: &[String]) -> Result<Vec<String>> {
        if destinations.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; destinations.len()].join(",");
        let sql = format!(
            "SELECT id FROM scheduled_jobs WHERE status = 'pending' AND destination IN ({placeholders})"
        );
        let mut stmt = stmt_or_storage(&conn, &sql)?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(destinations), |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| QuizcastError::Storage(format!("query ids: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Check-and-set status transition from `pending`. Returns whether the
    /// row actually changed — false means the job had already reached a
    /// terminal status (or doesn't exist), and the caller lost the race.
    pub fn transition(&self, id: &str, to: JobStatus) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE scheduled_jobs SET status = ?1 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![to.as_str(), id],
            )
            .map_err(|e| QuizcastError::Storage(format!("transition: {e}")))?;
        Ok(changed > 0)
    }

    /// Replace the fire time of a still-pending job (same CAS rule).
    pub fn update_fire_at(&self, id: &str, fire_at: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE scheduled_jobs SET fire_at = ?1 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![fire_at.to_rfc3339(), id],
            )
            .map_err(|e| QuizcastError::Storage(format!("update fire_at: {e}")))?;
        Ok(changed > 0)
    }

    /// Count jobs in one status.
    pub fn count_status(&self, status: JobStatus) -> Result<i64> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM scheduled_jobs WHERE status = ?1",
                [status.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| QuizcastError::Storage(format!("count: {e}")))
    }

    /// Pending jobs for a destination firing inside `[from, to)` — the
    /// "any more campaigns today?" check behind the day summary.
    pub fn pending_count_in_window(
        &self,
        destination: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM scheduled_jobs
                 WHERE destination = ?1 AND status = 'pending' AND fire_at >= ?2 AND fire_at < ?3",
                rusqlite::params![destination, from.to_rfc3339(), to.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| QuizcastError::Storage(format!("window count: {e}")))
    }

    // ─── Campaign outcomes ──────────────────────────────────────

    /// Record one scored answer or vote.
    pub fn insert_outcome(&self, record: &OutcomeRecord) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO campaign_outcomes
                 (user_id, username, first_name, last_name, destination, campaign_id,
                  option_index, points, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    record.user_id,
                    record.username,
                    record.first_name,
                    record.last_name,
                    record.destination,
                    record.campaign_id,
                    record.option_index,
                    record.points,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| QuizcastError::Storage(format!("insert outcome: {e}")))?;
        Ok(())
    }

    /// All outcomes recorded for one campaign.
    pub fn outcomes_for_campaign(&self, campaign_id: &str) -> Result<Vec<OutcomeRecord>> {
        let conn = self.lock()?;
        let mut stmt = stmt_or_storage(
            &conn,
            "SELECT user_id, username, first_name, last_name, destination, campaign_id,
                    option_index, points, created_at
             FROM campaign_outcomes WHERE campaign_id = ?1 ORDER BY id ASC",
        )?;
        let records = stmt
            .query_map([campaign_id], row_to_outcome)
            .map_err(|e| QuizcastError::Storage(format!("query outcomes: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Per-user point totals for one destination inside `[from, to)`,
    /// highest first — feeds the day-scoped summary message.
    pub fn day_summary(
        &self,
        destination: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SummaryRow>> {
        let conn = self.lock()?;
        let mut stmt = stmt_or_storage(
            &conn,
            "SELECT user_id, first_name, SUM(points)
             FROM campaign_outcomes
             WHERE destination = ?1 AND created_at >= ?2 AND created_at < ?3
             GROUP BY user_id ORDER BY SUM(points) DESC LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![destination, from.to_rfc3339(), to.to_rfc3339(), limit as i64],
                |row| {
                    Ok(SummaryRow {
                        user_id: row.get(0)?,
                        name: row.get(1)?,
                        points: row.get(2)?,
                    })
                },
            )
            .map_err(|e| QuizcastError::Storage(format!("query summary: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Distinct destinations that have any outcome activity — the fan-out
    /// list for periodic summary broadcasts.
    pub fn destinations_with_outcomes(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = stmt_or_storage(
            &conn,
            "SELECT DISTINCT destination FROM campaign_outcomes ORDER BY destination",
        )?;
        let destinations = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| QuizcastError::Storage(format!("query destinations: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(destinations)
    }
}

fn stmt_or_storage<'a>(
    conn: &'a Connection,
    sql: &str,
) -> Result<rusqlite::Statement<'a>> {
    conn.prepare(sql)
        .map_err(|e| QuizcastError::Storage(format!("prepare: {e}")))
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledJob> {
    let options_str: String = row.get(3)?;
    let fire_at_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_at_str: String = row.get(7)?;

    Ok(ScheduledJob {
        id: row.get(0)?,
        destination: row.get(1)?,
        question: row.get(2)?,
        options: serde_json::from_str(&options_str).unwrap_or_default(),
        correct_option_index: row.get(4)?,
        fire_at: parse_rfc3339(&fire_at_str),
        status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Pending),
        created_at: parse_rfc3339(&created_at_str),
    })
}

fn row_to_outcome(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutcomeRecord> {
    let created_at_str: String = row.get(8)?;
    Ok(OutcomeRecord {
        user_id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        destination: row.get(4)?,
        campaign_id: row.get(5)?,
        option_index: row.get(6)?,
        points: row.get(7)?,
        created_at: parse_rfc3339(&created_at_str),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scratch_db(name: &str) -> (CampaignDb, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("quizcast-db-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let db = CampaignDb::open(&dir.join("test.db")).unwrap();
        (db, dir)
    }

    fn job(id: &str, destination: &str, fire_at: DateTime<Utc>) -> ScheduledJob {
        ScheduledJob {
            id: id.into(),
            destination: destination.into(),
            question: "What is 2 + 2?".into(),
            options: vec!["3".into(), "4".into(), "5".into()],
            correct_option_index: Some(1),
            fire_at,
            status: JobStatus::Pending,
            created_at: Utc::now(),
        }
    }

    fn outcome(user_id: i64, destination: &str, campaign_id: &str, points: i64) -> OutcomeRecord {
        OutcomeRecord {
            user_id,
            username: Some(format!("user{user_id}")),
            first_name: Some(format!("User {user_id}")),
            last_name: None,
            destination: destination.into(),
            campaign_id: campaign_id.into(),
            option_index: 1,
            points,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_load_job() {
        let (db, dir) = scratch_db("roundtrip");
        let fire_at = Utc::now() + Duration::minutes(10);
        db.insert_job(&job("j1", "chat-1", fire_at)).unwrap();

        let loaded = db.get_job("j1").unwrap().unwrap();
        assert_eq!(loaded.destination, "chat-1");
        assert_eq!(loaded.options.len(), 3);
        assert_eq!(loaded.correct_option_index, Some(1));
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.fire_at.timestamp(), fire_at.timestamp());

        assert!(db.get_job("missing").unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_transition_is_check_and_set() {
        let (db, dir) = scratch_db("cas");
        db.insert_job(&job("j1", "chat-1", Utc::now())).unwrap();

        assert!(db.transition("j1", JobStatus::Sent).unwrap());
        // Terminal statuses are immutable: the second writer loses.
        assert!(!db.transition("j1", JobStatus::Cancelled).unwrap());
        assert_eq!(db.get_job("j1").unwrap().unwrap().status, JobStatus::Sent);

        assert!(!db.transition("missing", JobStatus::Failed).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_update_fire_at_only_pending() {
        let (db, dir) = scratch_db("fireat");
        db.insert_job(&job("j1", "chat-1", Utc::now())).unwrap();
        let later = Utc::now() + Duration::hours(2);

        assert!(db.update_fire_at("j1", later).unwrap());
        db.transition("j1", JobStatus::Cancelled).unwrap();
        assert!(!db.update_fire_at("j1", later + Duration::hours(1)).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_pending_queries() {
        let (db, dir) = scratch_db("pending");
        let now = Utc::now();
        db.insert_job(&job("j1", "chat-1", now + Duration::minutes(20)))
            .unwrap();
        db.insert_job(&job("j2", "chat-1", now + Duration::minutes(10)))
            .unwrap();
        db.insert_job(&job("j3", "chat-2", now + Duration::minutes(5)))
            .unwrap();
        db.transition("j3", JobStatus::Sent).unwrap();

        let all = db.pending_jobs(None).unwrap();
        assert_eq!(all.len(), 2);
        // Ordered by fire time.
        assert_eq!(all[0].id, "j2");

        let chat1 = db.pending_jobs(Some("chat-1")).unwrap();
        assert_eq!(chat1.len(), 2);
        assert!(db.pending_jobs(Some("chat-2")).unwrap().is_empty());

        let ids = db
            .pending_ids_for_destinations(&["chat-1".into(), "chat-2".into()])
            .unwrap();
        assert_eq!(ids.len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_pending_count_in_window() {
        let (db, dir) = scratch_db("window");
        let now = Utc::now();
        db.insert_job(&job("j1", "chat-1", now + Duration::minutes(30)))
            .unwrap();
        db.insert_job(&job("j2", "chat-1", now + Duration::days(2)))
            .unwrap();

        let count = db
            .pending_count_in_window("chat-1", now, now + Duration::days(1))
            .unwrap();
        assert_eq!(count, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_outcomes_and_summary() {
        let (db, dir) = scratch_db("outcomes");
        db.insert_outcome(&outcome(1, "chat-1", "p1", 20)).unwrap();
        db.insert_outcome(&outcome(1, "chat-1", "p2", 20)).unwrap();
        db.insert_outcome(&outcome(2, "chat-1", "p1", 20)).unwrap();
        db.insert_outcome(&outcome(3, "chat-2", "p3", 0)).unwrap();

        let for_campaign = db.outcomes_for_campaign("p1").unwrap();
        assert_eq!(for_campaign.len(), 2);

        let now = Utc::now();
        let summary = db
            .day_summary(
                "chat-1",
                now - Duration::hours(1),
                now + Duration::hours(1),
                10,
            )
            .unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].user_id, 1);
        assert_eq!(summary[0].points, 40);

        let destinations = db.destinations_with_outcomes().unwrap();
        assert_eq!(destinations, vec!["chat-1".to_string(), "chat-2".into()]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
