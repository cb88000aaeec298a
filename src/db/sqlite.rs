use super::{PollSnapshot, PollStore};
use crate::error::{EngineError, Result};
use crate::models::{
    ChangeLogEntry, Poll, PollOption, PollStatus, ResultDisclosure, Scope, ScopeKind, Survey,
    SurveyQuestion, SurveyResponse, VoteRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use sqlx::{
    Row, Sqlite, SqliteConnection,
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow},
};

/// SQLite-backed store. Vote uniqueness is enforced by the
/// `(poll_id, voter_id)` primary key, and each vote runs in one transaction.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                scope_kind TEXT NOT NULL,
                scope_value TEXT,
                category TEXT,
                allow_multiple BOOLEAN NOT NULL,
                max_selections INTEGER,
                is_anonymous BOOLEAN NOT NULL,
                status TEXT NOT NULL,
                disclosure TEXT NOT NULL,
                created_at TEXT NOT NULL,
                start_at TEXT,
                end_at TEXT,
                disclosed_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                poll_id TEXT NOT NULL,
                id TEXT NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                vote_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (poll_id, id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vote_records (
                poll_id TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                option_ids TEXT NOT NULL,
                cast_at TEXT NOT NULL,
                PRIMARY KEY (poll_id, voter_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id TEXT NOT NULL,
                field TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT,
                actor TEXT NOT NULL,
                at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS surveys (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                scope_kind TEXT NOT NULL,
                scope_value TEXT,
                category TEXT,
                is_anonymous BOOLEAN NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                start_at TEXT,
                end_at TEXT,
                response_count INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_questions (
                survey_id TEXT NOT NULL,
                id TEXT NOT NULL,
                prompt TEXT NOT NULL,
                position INTEGER NOT NULL,
                allow_multiple BOOLEAN NOT NULL,
                required BOOLEAN NOT NULL,
                answer_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (survey_id, id),
                FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_options (
                survey_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                id TEXT NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                vote_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (survey_id, question_id, id),
                FOREIGN KEY (survey_id, question_id)
                    REFERENCES survey_questions(survey_id, id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_responses (
                survey_id TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                answers TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                PRIMARY KEY (survey_id, voter_id),
                FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    // Fixed width so text ordering matches time ordering.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn poll_from_row(row: &SqliteRow, options: Vec<PollOption>) -> Result<Poll> {
    let scope_kind: ScopeKind = row.try_get::<String, _>("scope_kind")?.parse()?;
    let scope_value: Option<String> = row.try_get("scope_value")?;
    let scope = Scope::from_parts(scope_kind, scope_value.as_deref())
        .map_err(|e| EngineError::Storage(format!("corrupt scope on stored poll: {}", e)))?;
    let status: PollStatus = row.try_get::<String, _>("status")?.parse()?;
    let disclosure: ResultDisclosure =
        serde_json::from_str(&row.try_get::<String, _>("disclosure")?)?;

    Ok(Poll {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        scope,
        category: row.try_get("category")?,
        options,
        allow_multiple: row.try_get("allow_multiple")?,
        max_selections: row
            .try_get::<Option<i64>, _>("max_selections")?
            .map(|n| n as u32),
        is_anonymous: row.try_get("is_anonymous")?,
        status,
        disclosure,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        start_at: parse_opt_ts(row.try_get("start_at")?)?,
        end_at: parse_opt_ts(row.try_get("end_at")?)?,
        disclosed_at: parse_opt_ts(row.try_get("disclosed_at")?)?,
        version: row.try_get::<i64, _>("version")? as u64,
    })
}

async fn fetch_options(conn: &mut SqliteConnection, poll_id: &str) -> Result<Vec<PollOption>> {
    let rows = sqlx::query(
        r#"
        SELECT id, text, vote_count
        FROM poll_options
        WHERE poll_id = ?
        ORDER BY position
        "#,
    )
    .bind(poll_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<PollOption> {
            Ok(PollOption {
                id: row.try_get("id")?,
                text: row.try_get("text")?,
                vote_count: row.try_get::<i64, _>("vote_count")? as u64,
            })
        })
        .collect()
}

async fn fetch_poll(conn: &mut SqliteConnection, poll_id: &str) -> Result<Poll> {
    let row = sqlx::query("SELECT * FROM polls WHERE id = ?")
        .bind(poll_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| EngineError::poll_not_found(poll_id))?;
    let options = fetch_options(conn, poll_id).await?;
    poll_from_row(&row, options)
}

async fn insert_options(conn: &mut SqliteConnection, poll: &Poll) -> Result<()> {
    for (i, option) in poll.options.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO poll_options (poll_id, id, text, position, vote_count)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&option.id)
        .bind(&option.text)
        .bind(i as i64)
        .bind(option.vote_count as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Rewrites option text and order. Counters are left to `record_vote`: new
/// options start at zero and existing ones keep whatever they hold.
async fn upsert_options(conn: &mut SqliteConnection, poll: &Poll) -> Result<()> {
    let stored: Vec<String> = sqlx::query_scalar("SELECT id FROM poll_options WHERE poll_id = ?")
        .bind(&poll.id)
        .fetch_all(&mut *conn)
        .await?;

    for option_id in stored.iter().filter(|id| poll.option(id).is_none()) {
        let removed = sqlx::query(
            "DELETE FROM poll_options WHERE poll_id = ? AND id = ? AND vote_count = 0",
        )
        .bind(&poll.id)
        .bind(option_id)
        .execute(&mut *conn)
        .await?;
        if removed.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict(format!(
                "option {} received votes before it could be removed",
                option_id
            )));
        }
    }

    for (i, option) in poll.options.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO poll_options (poll_id, id, text, position, vote_count)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT (poll_id, id) DO UPDATE
            SET text = excluded.text, position = excluded.position
            "#,
        )
        .bind(&poll.id)
        .bind(&option.id)
        .bind(&option.text)
        .bind(i as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn record_from_row(row: &SqliteRow) -> Result<VoteRecord> {
    Ok(VoteRecord {
        poll_id: row.try_get("poll_id")?,
        voter_id: row.try_get("voter_id")?,
        option_ids: serde_json::from_str(&row.try_get::<String, _>("option_ids")?)?,
        cast_at: parse_ts(&row.try_get::<String, _>("cast_at")?)?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn closed_for(kind: &str, id: &str, status: &str) -> EngineError {
    if status == PollStatus::Active.as_str() {
        EngineError::InvalidState(format!("{} {} has passed its end time", kind, id))
    } else {
        EngineError::InvalidState(format!("{} {} is {}, not active", kind, id, status))
    }
}

async fn fetch_survey(conn: &mut SqliteConnection, survey_id: &str) -> Result<Survey> {
    let row = sqlx::query("SELECT * FROM surveys WHERE id = ?")
        .bind(survey_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| EngineError::survey_not_found(survey_id))?;

    let question_rows = sqlx::query(
        r#"
        SELECT id, prompt, allow_multiple, required, answer_count
        FROM survey_questions
        WHERE survey_id = ?
        ORDER BY position
        "#,
    )
    .bind(survey_id)
    .fetch_all(&mut *conn)
    .await?;

    let option_rows = sqlx::query(
        r#"
        SELECT question_id, id, text, vote_count
        FROM survey_options
        WHERE survey_id = ?
        ORDER BY position
        "#,
    )
    .bind(survey_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut questions = Vec::with_capacity(question_rows.len());
    for q in &question_rows {
        let question_id: String = q.try_get("id")?;
        let mut options = Vec::new();
        for o in &option_rows {
            if o.try_get::<String, _>("question_id")? != question_id {
                continue;
            }
            options.push(PollOption {
                id: o.try_get("id")?,
                text: o.try_get("text")?,
                vote_count: o.try_get::<i64, _>("vote_count")? as u64,
            });
        }
        questions.push(SurveyQuestion {
            id: question_id,
            prompt: q.try_get("prompt")?,
            options,
            allow_multiple: q.try_get("allow_multiple")?,
            required: q.try_get("required")?,
            answer_count: q.try_get::<i64, _>("answer_count")? as u64,
        });
    }

    let scope_kind: ScopeKind = row.try_get::<String, _>("scope_kind")?.parse()?;
    let scope_value: Option<String> = row.try_get("scope_value")?;
    let scope = Scope::from_parts(scope_kind, scope_value.as_deref())
        .map_err(|e| EngineError::Storage(format!("corrupt scope on stored survey: {}", e)))?;

    Ok(Survey {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        scope,
        category: row.try_get("category")?,
        questions,
        is_anonymous: row.try_get("is_anonymous")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        start_at: parse_opt_ts(row.try_get("start_at")?)?,
        end_at: parse_opt_ts(row.try_get("end_at")?)?,
        response_count: row.try_get::<i64, _>("response_count")? as u64,
        version: row.try_get::<i64, _>("version")? as u64,
    })
}

// Every write transaction below opens with a write statement. SQLite only
// waits on its busy handler when a transaction takes the write lock before
// reading; a read lock that later upgrades fails straight away.
#[async_trait]
impl PollStore for SqliteStore {
    async fn insert_poll(&self, poll: &Poll) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO polls (id, title, description, scope_kind, scope_value, category,
                               allow_multiple, max_selections, is_anonymous, status, disclosure,
                               created_at, start_at, end_at, disclosed_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.title)
        .bind(&poll.description)
        .bind(poll.scope.kind().as_str())
        .bind(poll.scope.value())
        .bind(&poll.category)
        .bind(poll.allow_multiple)
        .bind(poll.max_selections.map(i64::from))
        .bind(poll.is_anonymous)
        .bind(poll.status.as_str())
        .bind(serde_json::to_string(&poll.disclosure)?)
        .bind(fmt_ts(&poll.created_at))
        .bind(poll.start_at.as_ref().map(fmt_ts))
        .bind(poll.end_at.as_ref().map(fmt_ts))
        .bind(poll.disclosed_at.as_ref().map(fmt_ts))
        .bind(poll.version as i64)
        .execute(&mut *tx)
        .await?;

        insert_options(&mut tx, poll).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_poll(&self, poll_id: &str) -> Result<Poll> {
        let mut tx = self.pool.begin().await?;
        let poll = fetch_poll(&mut tx, poll_id).await?;
        tx.commit().await?;
        Ok(poll)
    }

    async fn list_polls(&self) -> Result<Vec<Poll>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT * FROM polls ORDER BY created_at, id")
            .fetch_all(&mut *tx)
            .await?;

        let mut polls = Vec::with_capacity(rows.len());
        for row in &rows {
            let poll_id: String = row.try_get("id")?;
            let options = fetch_options(&mut tx, &poll_id).await?;
            polls.push(poll_from_row(row, options)?);
        }
        tx.commit().await?;
        Ok(polls)
    }

    async fn update_poll(&self, poll: &Poll, expected_version: u64) -> Result<Poll> {
        let mut tx = self.pool.begin().await?;

        // Status, counters and the disclosure stamp have their own writers.
        let updated = sqlx::query(
            r#"
            UPDATE polls
            SET title = ?, description = ?, scope_kind = ?, scope_value = ?, category = ?,
                allow_multiple = ?, max_selections = ?, is_anonymous = ?,
                disclosure = ?, start_at = ?, end_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&poll.title)
        .bind(&poll.description)
        .bind(poll.scope.kind().as_str())
        .bind(poll.scope.value())
        .bind(&poll.category)
        .bind(poll.allow_multiple)
        .bind(poll.max_selections.map(i64::from))
        .bind(poll.is_anonymous)
        .bind(serde_json::to_string(&poll.disclosure)?)
        .bind(poll.start_at.as_ref().map(fmt_ts))
        .bind(poll.end_at.as_ref().map(fmt_ts))
        .bind(&poll.id)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current: Option<i64> = sqlx::query_scalar("SELECT version FROM polls WHERE id = ?")
                .bind(&poll.id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match current {
                None => EngineError::poll_not_found(&poll.id),
                Some(v) => EngineError::ConcurrencyConflict(format!(
                    "poll {} is at version {}, expected {}",
                    poll.id, v, expected_version
                )),
            });
        }

        upsert_options(&mut tx, poll).await?;
        let stored = fetch_poll(&mut tx, &poll.id).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn transition_status(
        &self,
        poll_id: &str,
        from: PollStatus,
        to: PollStatus,
    ) -> Result<Option<Poll>> {
        let mut tx = self.pool.begin().await?;
        let moved = sqlx::query(
            "UPDATE polls SET status = ?, version = version + 1 WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(poll_id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        // Also fails with NotFound for an unknown id.
        let poll = fetch_poll(&mut tx, poll_id).await?;
        tx.commit().await?;
        Ok((moved.rows_affected() == 1).then_some(poll))
    }

    async fn mark_disclosed(&self, poll_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let marked = sqlx::query(
            "UPDATE polls SET disclosed_at = ? WHERE id = ? AND disclosed_at IS NULL",
        )
        .bind(fmt_ts(&at))
        .bind(poll_id)
        .execute(&self.pool)
        .await?;
        if marked.rows_affected() == 1 {
            return Ok(true);
        }
        let exists = sqlx::query("SELECT 1 FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(EngineError::poll_not_found(poll_id))
        }
    }

    async fn record_vote(&self, record: &VoteRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let cast_at = fmt_ts(&record.cast_at);

        // The insert only produces a row while the poll is open, and the
        // primary key rejects a second ballot from the same voter.
        let inserted = sqlx::query(
            r#"
            INSERT INTO vote_records (poll_id, voter_id, option_ids, cast_at)
            SELECT ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM polls
                WHERE id = ? AND status = 'active' AND (end_at IS NULL OR end_at > ?)
            )
            "#,
        )
        .bind(&record.poll_id)
        .bind(&record.voter_id)
        .bind(serde_json::to_string(&record.option_ids)?)
        .bind(&cast_at)
        .bind(&record.poll_id)
        .bind(&cast_at)
        .execute(&mut *tx)
        .await;

        let inserted = match inserted {
            Ok(done) => done,
            Err(e) if is_unique_violation(&e) => {
                return Err(EngineError::AlreadyVoted {
                    poll_id: record.poll_id.clone(),
                    voter_id: record.voter_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if inserted.rows_affected() == 0 {
            let status: Option<String> = sqlx::query_scalar("SELECT status FROM polls WHERE id = ?")
                .bind(&record.poll_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match status {
                None => EngineError::poll_not_found(&record.poll_id),
                Some(status) => closed_for("poll", &record.poll_id, &status),
            });
        }

        for option_id in &record.option_ids {
            let bumped = sqlx::query(
                "UPDATE poll_options SET vote_count = vote_count + 1 WHERE poll_id = ? AND id = ?",
            )
            .bind(&record.poll_id)
            .bind(option_id)
            .execute(&mut *tx)
            .await?;
            if bumped.rows_affected() == 0 {
                return Err(EngineError::NotFound(format!(
                    "option {} in poll {}",
                    option_id, record.poll_id
                )));
            }
        }

        tx.commit().await?;
        debug!("Stored vote of {} on poll {}", record.voter_id, record.poll_id);
        Ok(())
    }

    async fn has_voted(&self, poll_id: &str, voter_id: &str) -> Result<bool> {
        let found = sqlx::query("SELECT 1 FROM vote_records WHERE poll_id = ? AND voter_id = ?")
            .bind(poll_id)
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn vote_records(&self, poll_id: &str) -> Result<Vec<VoteRecord>> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(EngineError::poll_not_found(poll_id));
        }

        let rows = sqlx::query(
            r#"
            SELECT poll_id, voter_id, option_ids, cast_at
            FROM vote_records
            WHERE poll_id = ?
            ORDER BY cast_at, voter_id
            "#,
        )
        .bind(poll_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn snapshot(&self, poll_id: &str) -> Result<PollSnapshot> {
        // One read transaction: the counters and the voter list come from
        // the same committed state.
        let mut tx = self.pool.begin().await?;
        let poll = fetch_poll(&mut tx, poll_id).await?;
        let voters: Vec<String> =
            sqlx::query_scalar("SELECT voter_id FROM vote_records WHERE poll_id = ?")
                .bind(poll_id)
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(PollSnapshot {
            poll,
            voters: voters.into_iter().collect(),
        })
    }

    async fn append_change(&self, entry: &ChangeLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO poll_changes (poll_id, field, old_value, new_value, actor, at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.poll_id)
        .bind(&entry.field)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(&entry.actor)
        .bind(fmt_ts(&entry.at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn changes(&self, poll_id: &str) -> Result<Vec<ChangeLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT poll_id, field, old_value, new_value, actor, at
            FROM poll_changes
            WHERE poll_id = ?
            ORDER BY seq
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ChangeLogEntry> {
                Ok(ChangeLogEntry {
                    poll_id: row.try_get("poll_id")?,
                    field: row.try_get("field")?,
                    old_value: row.try_get("old_value")?,
                    new_value: row.try_get("new_value")?,
                    actor: row.try_get("actor")?,
                    at: parse_ts(&row.try_get::<String, _>("at")?)?,
                })
            })
            .collect()
    }

    async fn insert_survey(&self, survey: &Survey) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO surveys (id, title, description, scope_kind, scope_value, category,
                                 is_anonymous, status, created_at, start_at, end_at,
                                 response_count, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&survey.id)
        .bind(&survey.title)
        .bind(&survey.description)
        .bind(survey.scope.kind().as_str())
        .bind(survey.scope.value())
        .bind(&survey.category)
        .bind(survey.is_anonymous)
        .bind(survey.status.as_str())
        .bind(fmt_ts(&survey.created_at))
        .bind(survey.start_at.as_ref().map(fmt_ts))
        .bind(survey.end_at.as_ref().map(fmt_ts))
        .bind(survey.response_count as i64)
        .bind(survey.version as i64)
        .execute(&mut *tx)
        .await?;

        for (i, question) in survey.questions.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO survey_questions (survey_id, id, prompt, position, allow_multiple,
                                              required, answer_count)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&survey.id)
            .bind(&question.id)
            .bind(&question.prompt)
            .bind(i as i64)
            .bind(question.allow_multiple)
            .bind(question.required)
            .bind(question.answer_count as i64)
            .execute(&mut *tx)
            .await?;

            for (j, option) in question.options.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO survey_options (survey_id, question_id, id, text, position,
                                                vote_count)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&survey.id)
                .bind(&question.id)
                .bind(&option.id)
                .bind(&option.text)
                .bind(j as i64)
                .bind(option.vote_count as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_survey(&self, survey_id: &str) -> Result<Survey> {
        let mut tx = self.pool.begin().await?;
        let survey = fetch_survey(&mut tx, survey_id).await?;
        tx.commit().await?;
        Ok(survey)
    }

    async fn list_surveys(&self) -> Result<Vec<Survey>> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM surveys ORDER BY created_at, id")
            .fetch_all(&mut *tx)
            .await?;

        let mut surveys = Vec::with_capacity(ids.len());
        for id in &ids {
            surveys.push(fetch_survey(&mut tx, id).await?);
        }
        tx.commit().await?;
        Ok(surveys)
    }

    async fn transition_survey(
        &self,
        survey_id: &str,
        from: PollStatus,
        to: PollStatus,
    ) -> Result<Option<Survey>> {
        let mut tx = self.pool.begin().await?;
        let moved = sqlx::query(
            "UPDATE surveys SET status = ?, version = version + 1 WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(survey_id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        let survey = fetch_survey(&mut tx, survey_id).await?;
        tx.commit().await?;
        Ok((moved.rows_affected() == 1).then_some(survey))
    }

    async fn record_response(&self, response: &SurveyResponse) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let submitted_at = fmt_ts(&response.submitted_at);

        let inserted = sqlx::query(
            r#"
            INSERT INTO survey_responses (survey_id, voter_id, answers, submitted_at)
            SELECT ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM surveys
                WHERE id = ? AND status = 'active' AND (end_at IS NULL OR end_at > ?)
            )
            "#,
        )
        .bind(&response.survey_id)
        .bind(&response.voter_id)
        .bind(serde_json::to_string(&response.answers)?)
        .bind(&submitted_at)
        .bind(&response.survey_id)
        .bind(&submitted_at)
        .execute(&mut *tx)
        .await;

        let inserted = match inserted {
            Ok(done) => done,
            Err(e) if is_unique_violation(&e) => {
                return Err(EngineError::AlreadyResponded {
                    survey_id: response.survey_id.clone(),
                    voter_id: response.voter_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if inserted.rows_affected() == 0 {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM surveys WHERE id = ?")
                    .bind(&response.survey_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match status {
                None => EngineError::survey_not_found(&response.survey_id),
                Some(status) => closed_for("survey", &response.survey_id, &status),
            });
        }

        for answer in &response.answers {
            let answered = sqlx::query(
                r#"
                UPDATE survey_questions SET answer_count = answer_count + 1
                WHERE survey_id = ? AND id = ?
                "#,
            )
            .bind(&response.survey_id)
            .bind(&answer.question_id)
            .execute(&mut *tx)
            .await?;
            if answered.rows_affected() == 0 {
                return Err(EngineError::NotFound(format!(
                    "question {} in survey {}",
                    answer.question_id, response.survey_id
                )));
            }

            for option_id in &answer.option_ids {
                let bumped = sqlx::query(
                    r#"
                    UPDATE survey_options SET vote_count = vote_count + 1
                    WHERE survey_id = ? AND question_id = ? AND id = ?
                    "#,
                )
                .bind(&response.survey_id)
                .bind(&answer.question_id)
                .bind(option_id)
                .execute(&mut *tx)
                .await?;
                if bumped.rows_affected() == 0 {
                    return Err(EngineError::NotFound(format!(
                        "option {} in question {}",
                        option_id, answer.question_id
                    )));
                }
            }
        }

        sqlx::query("UPDATE surveys SET response_count = response_count + 1 WHERE id = ?")
            .bind(&response.survey_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(
            "Stored response of {} to survey {}",
            response.voter_id, response.survey_id
        );
        Ok(())
    }

    async fn has_responded(&self, survey_id: &str, voter_id: &str) -> Result<bool> {
        let found =
            sqlx::query("SELECT 1 FROM survey_responses WHERE survey_id = ? AND voter_id = ?")
                .bind(survey_id)
                .bind(voter_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}
