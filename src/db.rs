//! SQLite storage for the catalog, progress records, sessions and answer logs
//!
//! Timestamps are stored as Unix milliseconds so they compare numerically;
//! list-valued columns are JSON arrays.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::grader::GradeOutcome;
use crate::models::{
    LearningState, Media, MemoryState, QuizVariant, Session, SessionStatus, StudyPreferences,
    VocabularyItem, WrongAnswerRecord, DEFAULT_CATEGORY,
};
use crate::store::{
    Catalog, DistractorScope, PreferenceSource, ProgressStore, SessionStore, WrongAnswerLog,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vocabulary (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    word TEXT NOT NULL,
    meaning TEXT NOT NULL,
    part_of_speech TEXT,
    examples TEXT NOT NULL DEFAULT '[]',
    cloze_sentences TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    category TEXT NOT NULL DEFAULT 'Default',
    frequency_rank INTEGER,
    audio_ref TEXT,
    image_ref TEXT
);
CREATE INDEX IF NOT EXISTS idx_vocabulary_rank ON vocabulary(frequency_rank, id);

CREATE TABLE IF NOT EXISTS item_tags (
    item_id INTEGER NOT NULL REFERENCES vocabulary(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (item_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_item_tags_tag ON item_tags(tag);

CREATE TABLE IF NOT EXISTS memory_states (
    user_id TEXT NOT NULL,
    item_id INTEGER NOT NULL,
    state TEXT NOT NULL,
    stability REAL NOT NULL,
    difficulty REAL NOT NULL,
    due_at INTEGER NOT NULL,
    last_reviewed_at INTEGER,
    total_reviews INTEGER NOT NULL DEFAULT 0,
    correct_reviews INTEGER NOT NULL DEFAULT 0,
    lapses INTEGER NOT NULL DEFAULT 0,
    history TEXT NOT NULL DEFAULT '[]',
    version INTEGER NOT NULL,
    PRIMARY KEY (user_id, item_id)
);
CREATE INDEX IF NOT EXISTS idx_memory_states_due ON memory_states(user_id, due_at);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    queue TEXT NOT NULL,
    cursor INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    correct_count INTEGER NOT NULL DEFAULT 0,
    wrong_count INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    new_cards_limit INTEGER NOT NULL,
    review_cards_limit INTEGER NOT NULL
);

-- outcome is NULL while the answer is being graded
CREATE TABLE IF NOT EXISTS submissions (
    session_id TEXT NOT NULL REFERENCES sessions(id),
    item_id INTEGER NOT NULL,
    correct INTEGER,
    outcome TEXT,
    PRIMARY KEY (session_id, item_id)
);

CREATE TABLE IF NOT EXISTS wrong_answers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    item_id INTEGER NOT NULL,
    session_id TEXT NOT NULL,
    submitted TEXT NOT NULL,
    expected TEXT NOT NULL,
    variant TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    reviewed INTEGER NOT NULL DEFAULT 0,
    reviewed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_wrong_answers_user ON wrong_answers(user_id, reviewed);

CREATE TABLE IF NOT EXISTS preferences (
    user_id TEXT PRIMARY KEY,
    session_size INTEGER NOT NULL,
    review_ratio REAL NOT NULL
);
"#;

const ITEM_COLUMNS: &str = "v.id, v.word, v.meaning, v.part_of_speech, v.examples, v.cloze_sentences, \
     v.tags, v.category, v.frequency_rank, v.audio_ref, v.image_ref";

const MEMORY_COLUMNS: &str = "user_id, item_id, state, stability, difficulty, due_at, last_reviewed_at, \
     total_reviews, correct_reviews, lapses, history, version";

const SESSION_COLUMNS: &str = "id, user_id, queue, cursor, status, correct_count, wrong_count, \
     started_at, completed_at, new_cards_limit, review_cards_limit";

/// Create tables and indexes if they don't exist
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// All collaborator stores over a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ==================== Catalog maintenance ====================

    /// Add a single item, returning its id
    pub fn add_item(&self, item: &VocabularyItem) -> Result<i64> {
        self.with_transaction(|conn| insert_item(conn, item))
    }

    /// Load a batch of items in one transaction
    pub fn insert_items(&self, items: &[VocabularyItem]) -> Result<Vec<i64>> {
        self.with_transaction(|conn| items.iter().map(|item| insert_item(conn, item)).collect())
    }

    pub fn item_count(&self) -> Result<u32> {
        self.with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM vocabulary", [], |row| row.get(0))?)
        })
    }

    pub fn set_preferences(&self, user_id: &str, prefs: StudyPreferences) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO preferences (user_id, session_size, review_ratio) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET session_size = excluded.session_size,
                                                    review_ratio = excluded.review_ratio",
                params![user_id, prefs.session_size, prefs.review_ratio],
            )?;
            Ok(())
        })
    }
}

fn insert_item(conn: &Connection, item: &VocabularyItem) -> Result<i64> {
    let category = if item.category.trim().is_empty() {
        DEFAULT_CATEGORY
    } else {
        item.category.as_str()
    };
    conn.execute(
        "INSERT INTO vocabulary (word, meaning, part_of_speech, examples, cloze_sentences, tags,
                                 category, frequency_rank, audio_ref, image_ref)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            item.word,
            item.meaning,
            item.part_of_speech,
            serde_json::to_string(&item.examples)?,
            serde_json::to_string(&item.cloze_sentences)?,
            serde_json::to_string(&item.tags)?,
            category,
            item.frequency_rank,
            item.media.audio,
            item.media.image,
        ],
    )?;
    let id = conn.last_insert_rowid();
    for tag in &item.tags {
        conn.execute(
            "INSERT OR IGNORE INTO item_tags (item_id, tag) VALUES (?1, ?2)",
            params![id, tag.trim().to_lowercase()],
        )?;
    }
    Ok(id)
}

// ==================== Row mapping ====================

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<VocabularyItem> {
    Ok(VocabularyItem {
        id: row.get(0)?,
        word: row.get(1)?,
        meaning: row.get(2)?,
        part_of_speech: row.get(3)?,
        examples: json_col(row, 4)?,
        cloze_sentences: json_col(row, 5)?,
        tags: json_col(row, 6)?,
        category: row
            .get::<_, Option<String>>(7)?
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        frequency_rank: row.get(8)?,
        media: Media {
            audio: row.get(9)?,
            image: row.get(10)?,
        },
    })
}

fn row_to_memory_state(row: &Row<'_>) -> rusqlite::Result<MemoryState> {
    Ok(MemoryState {
        user_id: row.get(0)?,
        item_id: row.get(1)?,
        state: parsed_col::<LearningState>(row, 2)?,
        stability: row.get(3)?,
        difficulty: row.get(4)?,
        due_at: timestamp_col(row, 5)?,
        last_reviewed_at: opt_timestamp_col(row, 6)?,
        total_reviews: row.get(7)?,
        correct_reviews: row.get(8)?,
        lapses: row.get(9)?,
        history: json_col(row, 10)?,
        version: row.get(11)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        queue: json_col(row, 2)?,
        cursor: row.get::<_, i64>(3)? as usize,
        status: parsed_col::<SessionStatus>(row, 4)?,
        correct_count: row.get(5)?,
        wrong_count: row.get(6)?,
        started_at: timestamp_col(row, 7)?,
        completed_at: opt_timestamp_col(row, 8)?,
        new_cards_limit: row.get(9)?,
        review_cards_limit: row.get(10)?,
    })
}

fn row_to_wrong_answer(row: &Row<'_>) -> rusqlite::Result<WrongAnswerRecord> {
    Ok(WrongAnswerRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        item_id: row.get(2)?,
        session_id: row.get(3)?,
        submitted: row.get(4)?,
        expected: row.get(5)?,
        variant: parsed_col::<QuizVariant>(row, 6)?,
        created_at: timestamp_col(row, 7)?,
        reviewed: row.get::<_, i64>(8)? != 0,
        reviewed_at: opt_timestamp_col(row, 9)?,
    })
}

// ==================== Collaborator traits ====================

impl Catalog for SqliteStore {
    fn item(&self, item_id: i64) -> Result<Option<VocabularyItem>> {
        self.with_connection(|conn| {
            let item = conn
                .query_row(
                    &format!("SELECT {} FROM vocabulary v WHERE v.id = ?1", ITEM_COLUMNS),
                    params![item_id],
                    row_to_item,
                )
                .optional()?;
            Ok(item)
        })
    }

    fn count_unseen(&self, user_id: &str) -> Result<u32> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM vocabulary v
                 WHERE NOT EXISTS (SELECT 1 FROM memory_states m
                                   WHERE m.user_id = ?1 AND m.item_id = v.id)",
                params![user_id],
                |row| row.get(0),
            )?)
        })
    }

    fn unseen_items(&self, user_id: &str, limit: u32) -> Result<Vec<i64>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id FROM vocabulary v
                 WHERE NOT EXISTS (SELECT 1 FROM memory_states m
                                   WHERE m.user_id = ?1 AND m.item_id = v.id)
                 ORDER BY v.frequency_rank IS NULL, v.frequency_rank, v.id
                 LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(params![user_id, limit], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
    }

    fn distractor_candidates(
        &self,
        target: &VocabularyItem,
        scope: DistractorScope,
        exclude: &[i64],
        limit: usize,
    ) -> Result<Vec<VocabularyItem>> {
        let mut excluded: Vec<String> = exclude.iter().map(|id| id.to_string()).collect();
        excluded.push(target.id.to_string());
        let exclude_clause = format!("v.id NOT IN ({})", excluded.join(", "));

        let scope_clause = match scope {
            DistractorScope::Related => {
                " AND (v.category = ?2
                       OR (?3 IS NOT NULL AND v.part_of_speech = ?3)
                       OR EXISTS (SELECT 1 FROM item_tags t JOIN item_tags s ON s.tag = t.tag
                                  WHERE t.item_id = v.id AND s.item_id = ?1))"
            }
            DistractorScope::Any => "",
        };

        let query = format!(
            "SELECT {} FROM vocabulary v WHERE {}{} ORDER BY v.id LIMIT ?4",
            ITEM_COLUMNS, exclude_clause, scope_clause
        );

        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&query)?;
            let items = stmt
                .query_map(
                    params![target.id, target.category, target.part_of_speech, limit as i64],
                    row_to_item,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }
}

impl ProgressStore for SqliteStore {
    fn memory_state(&self, user_id: &str, item_id: i64) -> Result<Option<MemoryState>> {
        self.with_connection(|conn| {
            let state = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM memory_states WHERE user_id = ?1 AND item_id = ?2",
                        MEMORY_COLUMNS
                    ),
                    params![user_id, item_id],
                    row_to_memory_state,
                )
                .optional()?;
            Ok(state)
        })
    }

    fn save_memory_state(&self, state: &MemoryState) -> Result<bool> {
        let history = serde_json::to_string(&state.history)?;
        self.with_connection(|conn| {
            let changed = if state.version == 0 {
                conn.execute(
                    &format!(
                        "INSERT INTO memory_states ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1)
                         ON CONFLICT(user_id, item_id) DO NOTHING",
                        MEMORY_COLUMNS
                    ),
                    params![
                        state.user_id,
                        state.item_id,
                        state.state.as_str(),
                        state.stability,
                        state.difficulty,
                        millis(state.due_at),
                        state.last_reviewed_at.map(millis),
                        state.total_reviews,
                        state.correct_reviews,
                        state.lapses,
                        history,
                    ],
                )?
            } else {
                conn.execute(
                    "UPDATE memory_states
                     SET state = ?3, stability = ?4, difficulty = ?5, due_at = ?6,
                         last_reviewed_at = ?7, total_reviews = ?8, correct_reviews = ?9,
                         lapses = ?10, history = ?11, version = version + 1
                     WHERE user_id = ?1 AND item_id = ?2 AND version = ?12",
                    params![
                        state.user_id,
                        state.item_id,
                        state.state.as_str(),
                        state.stability,
                        state.difficulty,
                        millis(state.due_at),
                        state.last_reviewed_at.map(millis),
                        state.total_reviews,
                        state.correct_reviews,
                        state.lapses,
                        history,
                        state.version,
                    ],
                )?
            };
            Ok(changed == 1)
        })
    }

    fn count_due(&self, user_id: &str, now: DateTime<Utc>) -> Result<u32> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM memory_states WHERE user_id = ?1 AND due_at <= ?2",
                params![user_id, millis(now)],
                |row| row.get(0),
            )?)
        })
    }

    fn due_items(&self, user_id: &str, now: DateTime<Utc>, limit: u32) -> Result<Vec<i64>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT item_id FROM memory_states
                 WHERE user_id = ?1 AND due_at <= ?2
                 ORDER BY due_at, item_id
                 LIMIT ?3",
            )?;
            let ids = stmt
                .query_map(params![user_id, millis(now), limit], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
    }
}

impl SessionStore for SqliteStore {
    fn insert_session(&self, session: &Session) -> Result<()> {
        let queue = serde_json::to_string(&session.queue)?;
        self.with_connection(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO sessions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    SESSION_COLUMNS
                ),
                params![
                    session.id,
                    session.user_id,
                    queue,
                    session.cursor as i64,
                    session.status.as_str(),
                    session.correct_count,
                    session.wrong_count,
                    millis(session.started_at),
                    session.completed_at.map(millis),
                    session.new_cards_limit,
                    session.review_cards_limit,
                ],
            )?;
            Ok(())
        })
    }

    fn session(&self, session_id: &str) -> Result<Option<Session>> {
        self.with_connection(|conn| {
            let session = conn
                .query_row(
                    &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                    params![session_id],
                    row_to_session,
                )
                .optional()?;
            Ok(session)
        })
    }

    fn advance_cursor(&self, session_id: &str, expected: usize) -> Result<bool> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET cursor = cursor + 1
                 WHERE id = ?1 AND cursor = ?2 AND status = 'active'",
                params![session_id, expected as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn reserve_submission(&self, session_id: &str, item_id: i64) -> Result<bool> {
        self.with_connection(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO submissions (session_id, item_id) VALUES (?1, ?2)",
                params![session_id, item_id],
            )?;
            Ok(inserted == 1)
        })
    }

    fn release_submission(&self, session_id: &str, item_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM submissions
                 WHERE session_id = ?1 AND item_id = ?2 AND outcome IS NULL",
                params![session_id, item_id],
            )?;
            Ok(())
        })
    }

    fn record_submission(&self, session_id: &str, item_id: i64, outcome: &GradeOutcome) -> Result<bool> {
        let encoded = serde_json::to_string(outcome)?;
        self.with_transaction(|conn| {
            let filled = conn.execute(
                "UPDATE submissions SET correct = ?3, outcome = ?4
                 WHERE session_id = ?1 AND item_id = ?2 AND outcome IS NULL",
                params![session_id, item_id, outcome.correct, encoded],
            )?;
            if filled == 0 {
                return Err(CoreError::InvalidState(format!(
                    "no pending submission for item {} in session {}",
                    item_id, session_id
                )));
            }

            let (correct, wrong) = if outcome.correct { (1, 0) } else { (0, 1) };
            let counted = conn.execute(
                "UPDATE sessions SET correct_count = correct_count + ?2, wrong_count = wrong_count + ?3
                 WHERE id = ?1 AND status = 'active'",
                params![session_id, correct, wrong],
            )?;
            Ok(counted == 1)
        })
    }

    fn submission(&self, session_id: &str, item_id: i64) -> Result<Option<GradeOutcome>> {
        self.with_connection(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT outcome FROM submissions
                     WHERE session_id = ?1 AND item_id = ?2 AND outcome IS NOT NULL",
                    params![session_id, item_id],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
    }

    fn close_session(&self, session_id: &str, status: SessionStatus, at: DateTime<Utc>) -> Result<bool> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET status = ?2, completed_at = ?3
                 WHERE id = ?1 AND status = 'active'",
                params![session_id, status.as_str(), millis(at)],
            )?;
            Ok(changed == 1)
        })
    }
}

impl WrongAnswerLog for SqliteStore {
    fn append_wrong_answer(&self, record: &WrongAnswerRecord) -> Result<i64> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO wrong_answers (user_id, item_id, session_id, submitted, expected,
                                            variant, created_at, reviewed, reviewed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.user_id,
                    record.item_id,
                    record.session_id,
                    record.submitted,
                    record.expected,
                    record.variant.as_str(),
                    millis(record.created_at),
                    record.reviewed,
                    record.reviewed_at.map(millis),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn wrong_answers(&self, user_id: &str, unreviewed_only: bool) -> Result<Vec<WrongAnswerRecord>> {
        let filter = if unreviewed_only { " AND reviewed = 0" } else { "" };
        let query = format!(
            "SELECT id, user_id, item_id, session_id, submitted, expected, variant,
                    created_at, reviewed, reviewed_at
             FROM wrong_answers WHERE user_id = ?1{}
             ORDER BY created_at DESC, id DESC",
            filter
        );
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&query)?;
            let records = stmt
                .query_map(params![user_id], row_to_wrong_answer)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    fn mark_reviewed(&self, record_id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE wrong_answers SET reviewed = 1, reviewed_at = ?2
                 WHERE id = ?1 AND reviewed = 0",
                params![record_id, millis(at)],
            )?;
            Ok(changed == 1)
        })
    }
}

impl PreferenceSource for SqliteStore {
    fn preferences(&self, user_id: &str) -> Result<Option<StudyPreferences>> {
        self.with_connection(|conn| {
            let prefs = conn
                .query_row(
                    "SELECT session_size, review_ratio FROM preferences WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(StudyPreferences {
                            session_size: row.get(0)?,
                            review_ratio: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(prefs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Rating, ReviewLogEntry};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 18, 30, 0).unwrap()
    }

    fn item(word: &str, meaning: &str, category: &str, rank: Option<i64>) -> VocabularyItem {
        let mut item = VocabularyItem::new(word, meaning);
        item.category = category.to_string();
        item.frequency_rank = rank;
        item
    }

    fn outcome(item_id: i64, correct: bool) -> GradeOutcome {
        GradeOutcome {
            item_id,
            correct,
            revealed: false,
            score: if correct { 100 } else { 0 },
            rating: if correct { Rating::Good } else { Rating::Again },
            expected_answer: "x".to_string(),
            feedback: String::new(),
            similarity: 1.0,
            state_after: LearningState::Learning,
            due_at: now(),
        }
    }

    #[test]
    fn test_item_roundtrip_with_tags_and_media() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut word = item("ephemeral", "lasting a very short time", "GRE", Some(3));
        word.part_of_speech = Some("adjective".into());
        word.examples = vec!["Fame is ephemeral.".into()];
        word.tags = vec!["time".into(), "abstract".into()];
        word.media.image = Some("img/ephemeral.png".into());

        let id = store.add_item(&word).unwrap();
        let loaded = store.item(id).unwrap().unwrap();
        assert_eq!(loaded.word, "ephemeral");
        assert_eq!(loaded.examples, word.examples);
        assert_eq!(loaded.tags, word.tags);
        assert_eq!(loaded.media.image.as_deref(), Some("img/ephemeral.png"));
        assert!(store.item(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_unseen_items_ordered_by_rank() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = store
            .insert_items(&[
                item("c", "3", "A", None),
                item("a", "1", "A", Some(20)),
                item("b", "2", "A", Some(5)),
            ])
            .unwrap();
        assert_eq!(store.count_unseen("u1").unwrap(), 3);
        assert_eq!(store.unseen_items("u1", 10).unwrap(), vec![ids[2], ids[1], ids[0]]);
        assert_eq!(store.unseen_items("u1", 1).unwrap(), vec![ids[2]]);
    }

    #[test]
    fn test_memory_state_compare_and_swap() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut state = MemoryState::new("u1", 9, 5.0, now());
        state.history.push(ReviewLogEntry {
            at: now(),
            correct: true,
            state_after: LearningState::Learning,
        });

        assert!(store.save_memory_state(&state).unwrap());
        // second insert of a version-0 row loses
        assert!(!store.save_memory_state(&state).unwrap());

        let mut loaded = store.memory_state("u1", 9).unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.due_at, now());

        let stale = loaded.clone();
        loaded.total_reviews = 1;
        assert!(store.save_memory_state(&loaded).unwrap());
        assert!(!store.save_memory_state(&stale).unwrap());
        assert_eq!(store.memory_state("u1", 9).unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_due_items_soonest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (item_id, offset) in [(1, -1), (2, -5), (3, 2)] {
            let state = MemoryState::new("u1", item_id, 5.0, now() + Duration::hours(offset));
            store.save_memory_state(&state).unwrap();
        }
        assert_eq!(store.count_due("u1", now()).unwrap(), 2);
        assert_eq!(store.due_items("u1", now(), 10).unwrap(), vec![2, 1]);
        assert_eq!(store.count_due("u2", now()).unwrap(), 0);
    }

    #[test]
    fn test_cursor_and_submission_are_guarded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = Session::new("u1", vec![4, 5], 2, 0, now());
        store.insert_session(&session).unwrap();

        assert!(store.advance_cursor(&session.id, 0).unwrap());
        assert!(!store.advance_cursor(&session.id, 0).unwrap());

        assert!(store.reserve_submission(&session.id, 4).unwrap());
        assert!(!store.reserve_submission(&session.id, 4).unwrap());
        // pending reservations are invisible to replay
        assert!(store.submission(&session.id, 4).unwrap().is_none());
        assert!(store.record_submission(&session.id, 4, &outcome(4, true)).unwrap());
        assert!(store.record_submission(&session.id, 4, &outcome(4, false)).is_err());
        assert!(store.submission(&session.id, 4).unwrap().unwrap().correct);
        store.release_submission(&session.id, 4).unwrap();
        assert!(store.submission(&session.id, 4).unwrap().is_some());

        assert!(store.reserve_submission(&session.id, 5).unwrap());
        assert!(store.close_session(&session.id, SessionStatus::Abandoned, now()).unwrap());
        assert!(!store.close_session(&session.id, SessionStatus::Completed, now()).unwrap());
        assert!(!store.advance_cursor(&session.id, 1).unwrap());
        // graded after close: stored for replay but not counted
        assert!(!store.record_submission(&session.id, 5, &outcome(5, false)).unwrap());
        assert!(!store.submission(&session.id, 5).unwrap().unwrap().correct);

        let loaded = store.session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.cursor, 1);
        assert_eq!(loaded.correct_count, 1);
        assert_eq!(loaded.wrong_count, 0);
        assert_eq!(loaded.status, SessionStatus::Abandoned);
        assert_eq!(loaded.completed_at, Some(now()));
    }

    #[test]
    fn test_released_reservation_can_be_retaken() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = Session::new("u1", vec![7], 1, 0, now());
        store.insert_session(&session).unwrap();

        assert!(store.reserve_submission(&session.id, 7).unwrap());
        store.release_submission(&session.id, 7).unwrap();
        assert!(store.reserve_submission(&session.id, 7).unwrap());
        assert!(store.record_submission(&session.id, 7, &outcome(7, false)).unwrap());

        let loaded = store.session(&session.id).unwrap().unwrap();
        assert_eq!((loaded.correct_count, loaded.wrong_count), (0, 1));
    }

    #[test]
    fn test_wrong_answer_review_flag() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = WrongAnswerRecord {
            id: 0,
            user_id: "u1".into(),
            item_id: 3,
            session_id: "s1".into(),
            submitted: "teh".into(),
            expected: "the".into(),
            variant: QuizVariant::ReverseRecall,
            created_at: now(),
            reviewed: false,
            reviewed_at: None,
        };
        let id = store.append_wrong_answer(&record).unwrap();

        assert_eq!(store.wrong_answers("u1", true).unwrap().len(), 1);
        assert!(store.mark_reviewed(id, now()).unwrap());
        assert!(!store.mark_reviewed(id, now()).unwrap());
        assert!(store.wrong_answers("u1", true).unwrap().is_empty());

        let all = store.wrong_answers("u1", false).unwrap();
        assert_eq!(all[0].variant, QuizVariant::ReverseRecall);
        assert!(all[0].reviewed);
    }

    #[test]
    fn test_preferences_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.preferences("u1").unwrap().is_none());
        let prefs = StudyPreferences {
            session_size: 15,
            review_ratio: 0.4,
        };
        store.set_preferences("u1", prefs).unwrap();
        store
            .set_preferences("u1", StudyPreferences { session_size: 25, ..prefs })
            .unwrap();
        assert_eq!(store.preferences("u1").unwrap().unwrap().session_size, 25);
    }
}
