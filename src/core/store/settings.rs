use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use tracing::warn;

use super::CronStore;

/// Setting written by the backup/restore subsystem while a full restore runs.
pub const RESTORE_PROGRESS_KEY: &str = "backup_restore_progress";

const TERMINAL_PHASES: [&str; 3] = ["completed", "failed", "cancelled"];

/// Whether a raw `backup_restore_progress` value should hold jobs back.
///
/// Only `phase` is read. An empty or `null` value means the flag was cleared.
/// Anything else without a readable string `phase` blocks, so a half-written
/// or unfamiliar value never lets jobs run during a restore.
pub(crate) fn restore_blocks_jobs(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() {
        return false;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => false,
        Ok(value) => match value.get("phase").and_then(Value::as_str) {
            Some(phase) => !TERMINAL_PHASES.contains(&phase.trim().to_ascii_lowercase().as_str()),
            None => {
                warn!("{} has no readable phase, treating restore as active", RESTORE_PROGRESS_KEY);
                true
            }
        },
        Err(e) => {
            warn!("Unreadable {} value ({}), treating restore as active", RESTORE_PROGRESS_KEY, e);
            true
        }
    }
}

impl CronStore {
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .query_row(
                "SELECT value FROM app_setting WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO app_setting (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub async fn restore_in_progress(&self) -> Result<bool> {
        Ok(self
            .get_setting(RESTORE_PROGRESS_KEY)
            .await?
            .is_some_and(|raw| restore_blocks_jobs(&raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_flag_means_no_restore() {
        let store = CronStore::open_in_memory().await.unwrap();
        assert!(!store.restore_in_progress().await.unwrap());
    }

    #[tokio::test]
    async fn non_terminal_phase_blocks() {
        let store = CronStore::open_in_memory().await.unwrap();
        store
            .set_setting(RESTORE_PROGRESS_KEY, r#"{"phase":"restoring","percent":40}"#)
            .await
            .unwrap();
        assert!(store.restore_in_progress().await.unwrap());

        for phase in ["completed", "failed", "cancelled", "Completed"] {
            store
                .set_setting(RESTORE_PROGRESS_KEY, &format!(r#"{{"phase":"{phase}"}}"#))
                .await
                .unwrap();
            assert!(!store.restore_in_progress().await.unwrap(), "{phase}");
        }
    }

    #[tokio::test]
    async fn odd_extra_fields_do_not_hide_an_active_restore() {
        let store = CronStore::open_in_memory().await.unwrap();
        for raw in [
            r#"{"phase":"restoring","percent":"40%"}"#,
            r#"{"phase":"restoring","message":{"step":"copy"}}"#,
            r#"{"phase":"restoring","percent":null,"message":42}"#,
        ] {
            store.set_setting(RESTORE_PROGRESS_KEY, raw).await.unwrap();
            assert!(store.restore_in_progress().await.unwrap(), "{raw}");
        }

        store
            .set_setting(RESTORE_PROGRESS_KEY, r#"{"phase":"completed","percent":"100%"}"#)
            .await
            .unwrap();
        assert!(!store.restore_in_progress().await.unwrap());
    }

    #[tokio::test]
    async fn unreadable_value_blocks_and_cleared_value_does_not() {
        let store = CronStore::open_in_memory().await.unwrap();
        for raw in ["{}", "not json", r#"{"phase":3}"#, r#""restoring""#] {
            store.set_setting(RESTORE_PROGRESS_KEY, raw).await.unwrap();
            assert!(store.restore_in_progress().await.unwrap(), "{raw}");
        }
        for raw in ["", "  ", "null"] {
            store.set_setting(RESTORE_PROGRESS_KEY, raw).await.unwrap();
            assert!(!store.restore_in_progress().await.unwrap(), "{raw:?}");
        }
    }
}
