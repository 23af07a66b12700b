use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use intake_core::dialogue::{DialogueState, Field, Intent, Session, SessionStore, StoreError};
use sqlx::{sqlite::SqliteRow, Row};

use super::RepositoryError;
use crate::DbPool;

const SELECT_SESSION: &str = "SELECT
        contact_id,
        display_name,
        state,
        intent,
        returning_contact,
        fields_json,
        submit_attempts,
        version,
        created_at,
        last_activity_at
     FROM dialogue_session
     WHERE contact_id = ?";

/// SQLite-backed session store. The `version` column carries the
/// compare-and-swap token.
#[derive(Clone)]
pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM dialogue_session")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn find(&self, contact_id: &str) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(SELECT_SESSION).bind(contact_id).fetch_optional(&self.pool).await?;
        row.map(session_from_row).transpose()
    }

    async fn upsert(&self, session: &Session) -> Result<(), RepositoryError> {
        let columns = SessionColumns::encode(session)?;
        sqlx::query(
            "INSERT INTO dialogue_session (
                contact_id,
                display_name,
                state,
                intent,
                returning_contact,
                fields_json,
                submit_attempts,
                version,
                created_at,
                last_activity_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(contact_id) DO UPDATE SET
                display_name = excluded.display_name,
                state = excluded.state,
                intent = excluded.intent,
                returning_contact = excluded.returning_contact,
                fields_json = excluded.fields_json,
                submit_attempts = excluded.submit_attempts,
                version = excluded.version,
                created_at = excluded.created_at,
                last_activity_at = excluded.last_activity_at",
        )
        .bind(&session.contact_id)
        .bind(&session.display_name)
        .bind(session.state.as_str())
        .bind(session.intent.map(|intent| intent.as_str()))
        .bind(session.returning)
        .bind(&columns.fields_json)
        .bind(i64::from(session.submit_attempts))
        .bind(columns.version)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_if_absent(&self, session: &Session) -> Result<bool, RepositoryError> {
        let columns = SessionColumns::encode(session)?;
        let result = sqlx::query(
            "INSERT INTO dialogue_session (
                contact_id,
                display_name,
                state,
                intent,
                returning_contact,
                fields_json,
                submit_attempts,
                version,
                created_at,
                last_activity_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(contact_id) DO NOTHING",
        )
        .bind(&session.contact_id)
        .bind(&session.display_name)
        .bind(session.state.as_str())
        .bind(session.intent.map(|intent| intent.as_str()))
        .bind(session.returning)
        .bind(&columns.fields_json)
        .bind(i64::from(session.submit_attempts))
        .bind(columns.version)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_if_version(
        &self,
        expected_version: u64,
        session: &Session,
    ) -> Result<bool, RepositoryError> {
        let columns = SessionColumns::encode(session)?;
        let expected = to_i64("version", expected_version)?;
        let result = sqlx::query(
            "UPDATE dialogue_session SET
                display_name = ?,
                state = ?,
                intent = ?,
                returning_contact = ?,
                fields_json = ?,
                submit_attempts = ?,
                version = ?,
                created_at = ?,
                last_activity_at = ?
             WHERE contact_id = ? AND version = ?",
        )
        .bind(&session.display_name)
        .bind(session.state.as_str())
        .bind(session.intent.map(|intent| intent.as_str()))
        .bind(session.returning)
        .bind(&columns.fields_json)
        .bind(i64::from(session.submit_attempts))
        .bind(columns.version)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity_at.to_rfc3339())
        .bind(&session.contact_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn get(&self, contact_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.find(contact_id).await?)
    }

    async fn put(&self, session: Session) -> Result<(), StoreError> {
        Ok(self.upsert(&session).await?)
    }

    async fn delete(&self, contact_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM dialogue_session WHERE contact_id = ?")
            .bind(contact_id)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        expected_version: Option<u64>,
        session: Session,
    ) -> Result<bool, StoreError> {
        let swapped = match expected_version {
            None => self.insert_if_absent(&session).await?,
            Some(version) => self.update_if_version(version, &session).await?,
        };
        if !swapped {
            tracing::debug!(
                event_name = "store.session.version_conflict",
                contact_id = %session.contact_id,
                expected_version = ?expected_version,
                "session compare-and-swap lost"
            );
        }
        Ok(swapped)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

struct SessionColumns {
    fields_json: String,
    version: i64,
}

impl SessionColumns {
    fn encode(session: &Session) -> Result<Self, RepositoryError> {
        let fields: BTreeMap<&str, &str> = session
            .fields
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_str()))
            .collect();
        let fields_json = serde_json::to_string(&fields)
            .map_err(|error| RepositoryError::Decode(format!("could not encode fields: {error}")))?;
        Ok(Self { fields_json, version: to_i64("version", session.version)? })
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = DialogueState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown dialogue state `{state_raw}`")))?;

    let intent = row
        .try_get::<Option<String>, _>("intent")?
        .map(|value| {
            Intent::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown intent `{value}`")))
        })
        .transpose()?;

    Ok(Session {
        contact_id: row.try_get("contact_id")?,
        display_name: row.try_get("display_name")?,
        state,
        intent,
        returning: row.try_get("returning_contact")?,
        fields: parse_fields(row.try_get("fields_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        last_activity_at: parse_timestamp("last_activity_at", row.try_get("last_activity_at")?)?,
        version: parse_u64("version", row.try_get("version")?)?,
        submit_attempts: parse_u32("submit_attempts", row.try_get("submit_attempts")?)?,
    })
}

fn parse_fields(raw: String) -> Result<BTreeMap<Field, String>, RepositoryError> {
    let decoded: BTreeMap<String, String> = serde_json::from_str(&raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid fields_json: {error}")))?;
    decoded
        .into_iter()
        .map(|(key, value)| {
            Field::parse(&key)
                .map(|field| (field, value))
                .ok_or_else(|| RepositoryError::Decode(format!("unknown field `{key}`")))
        })
        .collect()
}

fn to_i64(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("value for `{column}` does not fit in i64: {value}"))
    })
}

fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u64): {value}"
        ))
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
