use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::memory::reconcile::{PendingStore, Reconciled};
use crate::memory::status::ActionStatus;
use crate::memory::{
    ActionEntry, ActionResult, InventoryState, NewAction, ReflectionEntry, PENDING_RESULT,
};

pub const SCHEMA_VERSION_STATE_KEY: &str = "schema_version";
pub const SCHEMA_VERSION: u32 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ACTION_COLUMNS: &str = "id, COALESCE(timestamp, ''), COALESCE(quest, ''), COALESCE(action, ''),
     direction, COALESCE(result, 'pending'), COALESCE(feedback, ''), COALESCE(reflection, ''),
     COALESCE(arguments_json, '{}')";

/// Filters for inspecting the action log. Unset fields match everything.
#[derive(Debug, Clone)]
pub struct HistoryFilter {
    pub quest: Option<String>,
    /// Substring of the stored result, e.g. `SUCCESS`, `pending`, `block`.
    pub result_contains: Option<String>,
    pub action: Option<String>,
    pub limit: usize,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            quest: None,
            result_contains: None,
            action: None,
            limit: 300,
        }
    }
}

/// Append-only store of actions, reflections and inventory observations.
///
/// Every mutating call runs in autocommit mode (or its own transaction) and is
/// durable when it returns.
pub struct EpisodeDatabase {
    conn: Mutex<Connection>,
    path: PathBuf,
    blocked_pattern: String,
}

impl EpisodeDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open episode database at {:?}", path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self {
            conn: Mutex::new(conn),
            path,
            blocked_pattern: "block".to_string(),
        };
        db.ensure_schema()?;
        tracing::info!("Episode database ready at {:?}", db.path);
        Ok(db)
    }

    /// Result substring that marks a move as blocked.
    pub fn with_blocked_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.blocked_pattern = pattern.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns.iter().any(|name| name == column))
    }

    /// Older logs predate some columns; add them with defaults so old rows
    /// stay readable.
    fn ensure_action_columns(&self, conn: &Connection) -> Result<()> {
        let columns = [
            ("quest", "TEXT NOT NULL DEFAULT ''"),
            ("direction", "TEXT"),
            ("result", "TEXT NOT NULL DEFAULT 'pending'"),
            ("feedback", "TEXT NOT NULL DEFAULT ''"),
            ("reflection", "TEXT NOT NULL DEFAULT ''"),
            ("arguments_json", "TEXT NOT NULL DEFAULT '{}'"),
        ];
        for (column, definition) in columns {
            if !Self::table_has_column(conn, "actions", column)? {
                conn.execute(
                    &format!("ALTER TABLE actions ADD COLUMN {} {}", column, definition),
                    [],
                )
                .with_context(|| format!("Failed to add actions.{} column", column))?;
                tracing::info!("Added missing column actions.{}", column);
            }
        }
        Ok(())
    }

    /// Create the database schema
    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                quest TEXT NOT NULL DEFAULT '',
                action TEXT NOT NULL,
                direction TEXT,
                result TEXT NOT NULL DEFAULT 'pending',
                feedback TEXT NOT NULL DEFAULT '',
                reflection TEXT NOT NULL DEFAULT '',
                arguments_json TEXT NOT NULL DEFAULT '{}'
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS reflections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS inventory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                item TEXT NOT NULL,
                status TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS memory_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"#,
            [],
        )?;

        self.ensure_action_columns(&conn)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_actions_quest_id ON actions(quest, id DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_actions_result ON actions(result)",
            [],
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO memory_state (key, value) VALUES (?1, ?2)",
            params![SCHEMA_VERSION_STATE_KEY, SCHEMA_VERSION.to_string()],
        )?;

        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM memory_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn schema_version(&self) -> Result<Option<u32>> {
        Ok(self
            .get_state(SCHEMA_VERSION_STATE_KEY)?
            .and_then(|raw| raw.trim().parse().ok()))
    }

    // ========================================================================
    // Actions
    // ========================================================================

    pub fn append_action(&self, action: &NewAction) -> Result<i64> {
        let arguments_json =
            serde_json::to_string(&action.arguments).context("Failed to serialize arguments")?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO actions
             (timestamp, quest, action, direction, result, feedback, reflection, arguments_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                action.timestamp.to_rfc3339(),
                action.quest,
                action.action,
                action.direction,
                action.result.as_db_str(),
                action.feedback,
                action.reflection,
                arguments_json,
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(
            "Logged action #{} '{}' for quest '{}'",
            id,
            action.action,
            action.quest
        );
        Ok(id)
    }

    /// Resolve the most recent pending row of `quest` (any quest when empty).
    pub fn update_pending_result(
        &self,
        quest: &str,
        result: &ActionResult,
        feedback: &str,
    ) -> Result<Reconciled> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let pending: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, COALESCE(action, '') FROM actions
                 WHERE (?1 = '' OR quest = ?1)
                   AND COALESCE(NULLIF(TRIM(result), ''), ?2) = ?2
                 ORDER BY id DESC
                 LIMIT 1",
                params![quest, PENDING_RESULT],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, action)) = pending else {
            return Ok(Reconciled::NothingPending);
        };

        tx.execute(
            "UPDATE actions SET result = ?1, feedback = ?2 WHERE id = ?3",
            params![result.as_db_str(), feedback, id],
        )?;
        tx.commit()?;

        Ok(Reconciled::Updated { id, action })
    }

    /// The `limit` most recent rows of `quest` (all quests when empty), newest first.
    pub fn recent_actions(&self, quest: &str, limit: usize) -> Result<Vec<ActionEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM actions
             WHERE (?1 = '' OR quest = ?1)
             ORDER BY id DESC
             LIMIT ?2",
            ACTION_COLUMNS
        ))?;

        let entries = stmt
            .query_map(params![quest, limit as i64], row_to_action)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// The newest `limit` rows across all quests, oldest first.
    pub fn recent_actions_chronological(&self, limit: usize) -> Result<Vec<ActionEntry>> {
        let mut entries = self.recent_actions("", limit)?;
        entries.reverse();
        Ok(entries)
    }

    pub fn latest_action(&self) -> Result<Option<ActionEntry>> {
        Ok(self.recent_actions("", 1)?.into_iter().next())
    }

    /// Directions of recently blocked moves, newest first, empty values dropped.
    pub fn blocked_directions(&self, quest: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT direction FROM actions
             WHERE (?1 = '' OR quest = ?1)
               AND result LIKE ?2 ESCAPE '\\'
               AND direction IS NOT NULL
               AND TRIM(direction) != ''
             ORDER BY id DESC
             LIMIT ?3",
        )?;

        let directions = stmt
            .query_map(
                params![quest, like_pattern(&self.blocked_pattern), limit as i64],
                |row| row.get::<_, String>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(directions)
    }

    pub fn query_actions(&self, filter: &HistoryFilter) -> Result<Vec<ActionEntry>> {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(quest) = filter.quest.as_deref().filter(|q| !q.is_empty()) {
            values.push(SqlValue::Text(quest.to_string()));
            conditions.push(format!("quest = ?{}", values.len()));
        }
        if let Some(result) = filter.result_contains.as_deref().filter(|r| !r.is_empty()) {
            values.push(SqlValue::Text(like_pattern(result)));
            conditions.push(format!("result LIKE ?{} ESCAPE '\\'", values.len()));
        }
        if let Some(action) = filter.action.as_deref().filter(|a| !a.is_empty()) {
            values.push(SqlValue::Text(action.to_string()));
            conditions.push(format!("action = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {} FROM actions", ACTION_COLUMNS);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        values.push(SqlValue::Integer(filter.limit as i64));
        sql.push_str(&format!(" ORDER BY id DESC LIMIT ?{}", values.len()));

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values.iter()), row_to_action)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Stored result values and how often each occurs, most frequent first.
    pub fn result_counts(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(result, 'pending') AS r, COUNT(*) FROM actions
             GROUP BY r
             ORDER BY COUNT(*) DESC, r ASC",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(counts)
    }

    /// Keyword-inferred status of every action's feedback.
    pub fn feedback_status_counts(&self) -> Result<BTreeMap<ActionStatus, usize>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT COALESCE(feedback, '') FROM actions")?;
        let mut counts = BTreeMap::new();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for feedback in rows {
            *counts.entry(ActionStatus::infer(&feedback?)).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn count_actions(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM actions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // Reflections
    // ========================================================================

    pub fn append_reflection(&self, content: &str, created_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO reflections (content, created_at) VALUES (?1, ?2)",
            params![content, created_at.to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The newest `limit` reflections, oldest first.
    pub fn recent_reflections_chronological(&self, limit: usize) -> Result<Vec<ReflectionEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, COALESCE(content, ''), COALESCE(created_at, '') FROM reflections
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let mut entries = stmt
            .query_map([limit as i64], |row| {
                Ok(ReflectionEntry {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    created_at: parse_timestamp(&row.get::<_, String>(2)?, row.get(0)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entries.reverse();

        Ok(entries)
    }

    pub fn count_reflections(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM reflections", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // Inventory
    // ========================================================================

    pub fn record_inventory(&self, item: &str, status: InventoryState) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO inventory (timestamp, item, status) VALUES (?1, ?2, ?3)",
            params![Utc::now().to_rfc3339(), item, status.as_db_str()],
        )?;
        Ok(())
    }

    /// Status from the last inventory observation.
    pub fn inventory_state(&self) -> Result<InventoryState> {
        let conn = self.lock_conn()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM inventory ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status
            .as_deref()
            .map(InventoryState::from_db)
            .unwrap_or(InventoryState::Unknown))
    }

    /// Close the connection, reporting any error sqlite raises on close.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))?;
        conn.close()
            .map_err(|(_, e)| e)
            .with_context(|| format!("Failed to close episode database at {:?}", self.path))?;
        tracing::info!("Episode database closed at {:?}", self.path);
        Ok(())
    }
}

impl PendingStore for EpisodeDatabase {
    fn update_pending_result(
        &self,
        quest: &str,
        result: &ActionResult,
        feedback: &str,
    ) -> Result<Reconciled> {
        EpisodeDatabase::update_pending_result(self, quest, result, feedback)
    }
}

fn row_to_action(row: &Row<'_>) -> std::result::Result<ActionEntry, rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let arguments_raw: String = row.get(8)?;
    let arguments = serde_json::from_str::<Map<String, Value>>(&arguments_raw)
        .unwrap_or_else(|e| {
            tracing::warn!("Action #{} has unreadable arguments, using none: {}", id, e);
            Map::new()
        });
    let direction: Option<String> = row.get(4)?;

    Ok(ActionEntry {
        id,
        timestamp: parse_timestamp(&row.get::<_, String>(1)?, id),
        quest: row.get(2)?,
        action: row.get(3)?,
        direction: direction.filter(|d| !d.trim().is_empty()),
        result: ActionResult::from_db(&row.get::<_, String>(5)?),
        feedback: row.get(6)?,
        reflection: row.get(7)?,
        arguments,
    })
}

/// RFC 3339, or the naive ISO form older logs were written with (read as UTC).
/// Missing or unparseable values read as the Unix epoch.
fn parse_timestamp(value: &str, row_id: i64) -> DateTime<Utc> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|e| {
            tracing::warn!("Row #{} has unreadable timestamp {:?}: {}", row_id, value, e);
            DateTime::<Utc>::default()
        })
}

fn like_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open(dir: &tempfile::TempDir) -> EpisodeDatabase {
        EpisodeDatabase::new(dir.path().join("episodes.db")).expect("db init")
    }

    fn action(quest: &str, name: &str, arguments: Value) -> NewAction {
        NewAction::pending(quest, name, arguments.as_object().unwrap())
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        let first = db.append_action(&action("q", "inspect", json!({}))).unwrap();
        let second = db.append_action(&action("q", "inspect", json!({}))).unwrap();
        assert!(second > first);
        assert_eq!(db.count_actions().unwrap(), 2);
        assert_eq!(db.schema_version().unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn update_resolves_most_recent_pending_row_for_quest() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        db.append_action(&action("cave", "move", json!({"direction": "south"})))
            .unwrap();
        let open_door = db.append_action(&action("escape", "open_door", json!({}))).unwrap();
        db.append_action(&action("cave", "dig", json!({}))).unwrap();

        let outcome = db
            .update_pending_result("escape", &ActionResult::Success, "[SUCCESS] door opened")
            .unwrap();
        assert_eq!(
            outcome,
            Reconciled::Updated {
                id: open_door,
                action: "open_door".to_string()
            }
        );

        let latest = db.recent_actions("escape", 1).unwrap();
        assert_eq!(latest[0].result, ActionResult::Success);
        assert_eq!(latest[0].feedback, "[SUCCESS] door opened");

        let cave = db.recent_actions("cave", 10).unwrap();
        assert!(cave.iter().all(|a| a.result.is_pending()));
    }

    #[test]
    fn update_without_pending_row_reports_nothing_pending() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        let outcome = db
            .update_pending_result("ghost", &ActionResult::Failure, "[FAILURE]")
            .unwrap();
        assert_eq!(outcome, Reconciled::NothingPending);

        db.append_action(&action("ghost", "wave", json!({}))).unwrap();
        db.update_pending_result("ghost", &ActionResult::Success, "[SUCCESS]")
            .unwrap();
        let again = db
            .update_pending_result("ghost", &ActionResult::Success, "[SUCCESS]")
            .unwrap();
        assert_eq!(again, Reconciled::NothingPending);
    }

    #[test]
    fn recent_is_newest_first_and_global_for_empty_quest() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        db.append_action(&action("a", "one", json!({}))).unwrap();
        db.append_action(&action("b", "two", json!({}))).unwrap();
        db.append_action(&action("a", "three", json!({}))).unwrap();

        let names = |entries: Vec<ActionEntry>| -> Vec<String> {
            entries.into_iter().map(|e| e.action).collect()
        };
        assert_eq!(names(db.recent_actions("a", 10).unwrap()), vec!["three", "one"]);
        assert_eq!(
            names(db.recent_actions("", 10).unwrap()),
            vec!["three", "two", "one"]
        );
        assert_eq!(names(db.recent_actions("", 2).unwrap()), vec!["three", "two"]);
        assert_eq!(
            names(db.recent_actions_chronological(2).unwrap()),
            vec!["two", "three"]
        );
    }

    #[test]
    fn blocked_directions_skip_empty_values() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        for (direction, feedback) in [
            (json!({"direction": "north"}), "Blocked by a wall"),
            (json!({}), "blocked"),
            (json!({"direction": "east"}), "You moved east"),
            (json!({"direction": "west"}), "path blocked"),
        ] {
            db.append_action(&action("maze", "move", direction)).unwrap();
            db.update_pending_result(
                "maze",
                &ActionResult::Text(feedback.to_string()),
                feedback,
            )
            .unwrap();
        }

        assert_eq!(
            db.blocked_directions("maze", 10).unwrap(),
            vec!["west".to_string(), "north".to_string()]
        );
        assert_eq!(db.blocked_directions("maze", 1).unwrap(), vec!["west".to_string()]);
        assert!(db.blocked_directions("elsewhere", 10).unwrap().is_empty());
    }

    #[test]
    fn reflections_come_back_in_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        for text in ["first", "second", "third"] {
            db.append_reflection(text, Utc::now()).unwrap();
        }
        let contents: Vec<_> = db
            .recent_reflections_chronological(2)
            .unwrap()
            .into_iter()
            .map(|r| r.content)
            .collect();
        assert_eq!(contents, vec!["second", "third"]);
        assert_eq!(db.count_reflections().unwrap(), 3);
    }

    #[test]
    fn inventory_state_tracks_last_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        assert_eq!(db.inventory_state().unwrap(), InventoryState::Unknown);
        db.record_inventory("Copper Ore", InventoryState::Full).unwrap();
        assert!(db.inventory_state().unwrap().is_full());
        db.record_inventory("Copper Ore", InventoryState::Available)
            .unwrap();
        assert_eq!(db.inventory_state().unwrap(), InventoryState::Available);
    }

    #[test]
    fn history_filter_and_result_counts() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        db.append_action(&action("q1", "inspect", json!({}))).unwrap();
        db.update_pending_result("q1", &ActionResult::Success, "[SUCCESS] saw it")
            .unwrap();
        db.append_action(&action("q1", "talk_to", json!({"target": "Agent 7"})))
            .unwrap();
        db.update_pending_result("q1", &ActionResult::Failure, "[FAILURE] no answer")
            .unwrap();
        db.append_action(&action("q2", "inspect", json!({}))).unwrap();

        let successes = db
            .query_actions(&HistoryFilter {
                result_contains: Some("SUCCESS".to_string()),
                ..HistoryFilter::default()
            })
            .unwrap();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].feedback, "[SUCCESS] saw it");

        let inspects = db
            .query_actions(&HistoryFilter {
                action: Some("inspect".to_string()),
                quest: Some("q2".to_string()),
                ..HistoryFilter::default()
            })
            .unwrap();
        assert_eq!(inspects.len(), 1);
        assert!(inspects[0].result.is_pending());

        let limited = db
            .query_actions(&HistoryFilter {
                limit: 2,
                ..HistoryFilter::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].quest, "q2");

        let counts = db.result_counts().unwrap();
        assert_eq!(counts.len(), 3);
        assert!(counts.contains(&("pending".to_string(), 1)));

        let statuses = db.feedback_status_counts().unwrap();
        assert_eq!(statuses.get(&ActionStatus::Success), Some(&1));
        assert_eq!(statuses.get(&ActionStatus::Failure), Some(&1));
        assert_eq!(statuses.get(&ActionStatus::Unknown), Some(&1));
    }

    #[test]
    fn arguments_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.append_action(&action(
                "q",
                "move_in_direction",
                json!({"direction": "north", "distance": 2}),
            ))
            .unwrap();
            db.close().unwrap();
        }
        let db = open(&dir);
        let entry = db.latest_action().unwrap().unwrap();
        assert_eq!(entry.direction.as_deref(), Some("north"));
        assert_eq!(
            entry.display_text(),
            "move_in_direction, direction: north, distance: 2"
        );
    }

    #[test]
    fn legacy_table_gains_columns_and_old_rows_stay_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                r#"CREATE TABLE actions (
                    id INTEGER PRIMARY KEY,
                    timestamp TEXT,
                    quest TEXT,
                    action TEXT,
                    direction TEXT,
                    result TEXT,
                    feedback TEXT
                )"#,
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO actions (timestamp, quest, action, direction, result, feedback)
                 VALUES ('2025-03-01T10:15:30.123456', 'mine', 'move', 'north', NULL, NULL)",
                [],
            )
            .unwrap();
        }

        let db = EpisodeDatabase::new(&path).expect("db init over legacy table");
        let rows = db.recent_actions("mine", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].result.is_pending());
        assert_eq!(rows[0].feedback, "");
        assert_eq!(rows[0].reflection, "");
        assert!(rows[0].arguments.is_empty());
        assert_eq!(rows[0].timestamp.to_rfc3339(), "2025-03-01T10:15:30.123456+00:00");

        let outcome = db
            .update_pending_result("mine", &ActionResult::Failure, "[FAILURE] blocked")
            .unwrap();
        assert!(matches!(outcome, Reconciled::Updated { .. }));
    }

    #[test]
    fn damaged_legacy_rows_do_not_hide_the_rest_of_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                r#"CREATE TABLE actions (
                    id INTEGER PRIMARY KEY,
                    timestamp TEXT,
                    quest TEXT,
                    action TEXT,
                    direction TEXT,
                    result TEXT,
                    feedback TEXT
                )"#,
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO actions (timestamp, quest, action, result, feedback)
                 VALUES (NULL, 'mine', 'look', 'SUCCESS', 'a cave')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO actions (timestamp, quest, action, result, feedback)
                 VALUES ('yesterday-ish', 'mine', 'dig', 'pending', '')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO actions (timestamp, quest, action, result, feedback)
                 VALUES ('2025-03-01 10:15:30', 'mine', 'move', 'pending', '')",
                [],
            )
            .unwrap();
        }

        let db = EpisodeDatabase::new(&path).expect("db init over legacy table");
        {
            let conn = db.lock_conn().unwrap();
            conn.execute(
                "UPDATE actions SET arguments_json = 'not json' WHERE action = 'dig'",
                [],
            )
            .unwrap();
        }

        let rows = db.recent_actions("mine", 10).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(names, vec!["move", "dig", "look"]);
        assert_eq!(rows[2].timestamp, DateTime::<Utc>::default());
        assert_eq!(rows[2].result, ActionResult::Success);
        assert_eq!(rows[1].timestamp, DateTime::<Utc>::default());
        assert!(rows[1].arguments.is_empty());
        assert_eq!(rows[0].timestamp.to_rfc3339(), "2025-03-01T10:15:30+00:00");
        assert_eq!(db.recent_actions_chronological(10).unwrap().len(), 3);
    }
}
