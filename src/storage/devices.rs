//! Device, device-session and device-interaction queries. A device belongs to
//! one user; its session lifecycle is a two-state machine handled with the
//! same ownership scoping as everything else.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::types::{Device, DeviceInteraction, DeviceSession};
use crate::storage::Database;

#[derive(Debug, Clone, Deserialize)]
pub struct NewDevice {
    pub device_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

impl Database {
    pub async fn create_device(
        &self,
        user_id: &str,
        new: &NewDevice,
    ) -> Result<Device, StorageError> {
        let device = Device {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device_id: new.device_id.clone(),
            name: new.name.clone(),
            is_active: true,
            last_seen: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO devices (id, user_id, device_id, name, is_active, last_seen, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&device.id)
        .bind(&device.user_id)
        .bind(&device.device_id)
        .bind(&device.name)
        .bind(device.is_active)
        .bind(device.last_seen)
        .bind(device.created_at)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(device)
    }

    pub async fn list_devices(&self, user_id: &str) -> Result<Vec<Device>, StorageError> {
        sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE user_id = ?1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    pub async fn get_device(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<Device>, StorageError> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn update_device(
        &self,
        user_id: &str,
        id: &str,
        update: &DeviceUpdate,
    ) -> Result<Option<Device>, StorageError> {
        sqlx::query(
            "UPDATE devices SET
                name = COALESCE(?3, name),
                is_active = COALESCE(?4, is_active),
                last_seen = ?5,
                updated_at = ?5
             WHERE id = ?1 AND user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .bind(&update.name)
        .bind(update.is_active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        self.get_device(user_id, id).await
    }

    pub async fn delete_device(&self, user_id: &str, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)?;
        Ok(result.rows_affected() > 0)
    }

    /// Open a new session with a random session id. The device's previous
    /// sessions are left as they are; only `end_session` closes them.
    pub async fn start_device_session(
        &self,
        device_id: &str,
    ) -> Result<DeviceSession, StorageError> {
        let session = DeviceSession {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            session_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            is_active: true,
        };
        sqlx::query(
            "INSERT INTO device_sessions (id, device_id, session_id, started_at, ended_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&session.id)
        .bind(&session.device_id)
        .bind(&session.session_id)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.is_active)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        sqlx::query("UPDATE devices SET last_seen = ?2 WHERE id = ?1")
            .bind(device_id)
            .bind(session.started_at)
            .execute(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)?;
        Ok(session)
    }

    pub async fn active_device_session(
        &self,
        device_id: &str,
    ) -> Result<Option<DeviceSession>, StorageError> {
        sqlx::query_as::<_, DeviceSession>(
            "SELECT * FROM device_sessions
             WHERE device_id = ?1 AND is_active = 1
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    /// Close the device's active session, if any. Returns the closed row, or
    /// `None` when no session was active (second `end_session` in a row).
    pub async fn end_device_session(
        &self,
        device_id: &str,
    ) -> Result<Option<DeviceSession>, StorageError> {
        let session = match self.active_device_session(device_id).await? {
            Some(s) => s,
            None => return Ok(None),
        };
        let ended_at = Utc::now();
        sqlx::query(
            "UPDATE device_sessions SET is_active = 0, ended_at = ?2 WHERE id = ?1",
        )
        .bind(&session.id)
        .bind(ended_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(Some(DeviceSession {
            ended_at: Some(ended_at),
            is_active: false,
            ..session
        }))
    }

    pub async fn record_device_interaction(
        &self,
        device_id: &str,
        session_id: &str,
        interaction_type: &str,
        content: &str,
    ) -> Result<DeviceInteraction, StorageError> {
        let interaction = DeviceInteraction {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            session_id: session_id.to_string(),
            interaction_type: interaction_type.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO device_interactions (id, device_id, session_id, interaction_type, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&interaction.id)
        .bind(&interaction.device_id)
        .bind(&interaction.session_id)
        .bind(&interaction.interaction_type)
        .bind(&interaction.content)
        .bind(interaction.timestamp)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(interaction)
    }

    /// Interaction log for one device, newest first.
    pub async fn list_device_interactions(
        &self,
        device_id: &str,
    ) -> Result<Vec<DeviceInteraction>, StorageError> {
        sqlx::query_as::<_, DeviceInteraction>(
            "SELECT * FROM device_interactions WHERE device_id = ?1 ORDER BY timestamp DESC",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_db;

    async fn seed_device(db: &Database) -> (String, Device) {
        let user = db.create_user("p@x.org", None, "", "", "").await.unwrap();
        let device = db
            .create_device(
                &user.id,
                &NewDevice {
                    device_id: "SP-0001".to_string(),
                    name: "Bedroom pal".to_string(),
                },
            )
            .await
            .unwrap();
        (user.id, device)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (db, _dir) = temp_db().await;
        let (_, device) = seed_device(&db).await;

        assert!(db.active_device_session(&device.id).await.unwrap().is_none());
        let session = db.start_device_session(&device.id).await.unwrap();
        assert!(session.is_active);

        let ended = db.end_device_session(&device.id).await.unwrap().unwrap();
        assert!(!ended.is_active);
        assert!(ended.ended_at.is_some());
        assert_eq!(ended.session_id, session.session_id);

        // Ending again finds nothing active
        assert!(db.end_device_session(&device.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interactions_newest_first() {
        let (db, _dir) = temp_db().await;
        let (_, device) = seed_device(&db).await;
        let session = db.start_device_session(&device.id).await.unwrap();

        db.record_device_interaction(&device.id, &session.id, "AUDIO_IN", "hello")
            .await
            .unwrap();
        db.record_device_interaction(&device.id, &session.id, "AUDIO_OUT", "hi there")
            .await
            .unwrap();

        let log = db.list_device_interactions(&device.id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].interaction_type, "AUDIO_OUT");
    }

    #[tokio::test]
    async fn test_devices_scoped_to_owner() {
        let (db, _dir) = temp_db().await;
        let (_, device) = seed_device(&db).await;
        let other = db.create_user("o@x.org", None, "", "", "").await.unwrap();

        assert!(db.get_device(&other.id, &device.id).await.unwrap().is_none());
        assert!(db.list_devices(&other.id).await.unwrap().is_empty());
        assert!(!db.delete_device(&other.id, &device.id).await.unwrap());
    }
}
