//! Settings store
//!
//! Persisted appliance state in the `settings` key/value table. Each field
//! group is one row holding a JSON value:
//!
//! | key             | value                                   |
//! |-----------------|-----------------------------------------|
//! | `language`      | `"fr"`                                  |
//! | `volume_level`  | `80`                                    |
//! | `schedule`      | `{enabled, start, end, days}`           |
//! | `sync_schedule` | `{enabled, time, last_run_date}`        |
//! | `remote`        | `{token, remote_path, remote_name}`     |
//!
//! Every mutation is a single UPSERT taken under the store's write lock, so a
//! read-modify-write of one group is atomic and durable when it returns.

use crate::error::{Error, Result};
use avppi_common::time::normalize_time_string;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const KEY_LANGUAGE: &str = "language";
const KEY_VOLUME: &str = "volume_level";
const KEY_SCHEDULE: &str = "schedule";
const KEY_SYNC_SCHEDULE: &str = "sync_schedule";
const KEY_REMOTE: &str = "remote";

/// Default output volume (percent)
pub const DEFAULT_VOLUME: u8 = 80;

/// Playback window as stored
///
/// Times are kept as `HH:MM` strings; the window evaluator parses them on
/// every tick and treats anything malformed as outside the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub start: String,
    pub end: String,
    /// Weekday indices, 0 = Monday … 6 = Sunday, sorted and unique
    pub days: Vec<u8>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "08:00".to_string(),
            end: "20:00".to_string(),
            days: (0..7).collect(),
        }
    }
}

/// Daily remote sync schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScheduleSettings {
    pub enabled: bool,
    pub time: String,
    /// Local date of the last trigger
    #[serde(default)]
    pub last_run_date: Option<NaiveDate>,
}

impl Default for SyncScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            time: "06:00".to_string(),
            last_run_date: None,
        }
    }
}

/// Remote sync credentials and location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub token: String,
    pub remote_path: String,
    pub remote_name: String,
}

/// Full copy of the stored state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsSnapshot {
    pub language: String,
    pub volume_level: u8,
    pub schedule: ScheduleSettings,
    pub sync_schedule: SyncScheduleSettings,
    pub remote: RemoteSettings,
}

/// Values used to seed missing rows on first start
#[derive(Debug, Clone)]
pub struct SettingsDefaults {
    pub language: String,
    pub remote_path: String,
    pub remote_name: String,
}

impl SettingsDefaults {
    fn remote(&self) -> RemoteSettings {
        RemoteSettings {
            token: String::new(),
            remote_path: self.remote_path.clone(),
            remote_name: self.remote_name.clone(),
        }
    }
}

/// Partial playback window update; `None` keeps the stored value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleUpdate {
    pub enabled: Option<bool>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub days: Option<Vec<i64>>,
}

/// Partial sync schedule update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncScheduleUpdate {
    pub enabled: Option<bool>,
    pub time: Option<String>,
}

/// Partial remote settings update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteUpdate {
    pub token: Option<String>,
    pub remote_path: Option<String>,
}

/// Thread-safe handle to the persisted settings
#[derive(Clone)]
pub struct SettingsStore {
    db: Pool<Sqlite>,
    defaults: Arc<SettingsDefaults>,
    write_lock: Arc<Mutex<()>>,
}

impl SettingsStore {
    /// Open the store, seeding any missing group with its default
    pub async fn open(db: Pool<Sqlite>, defaults: SettingsDefaults) -> Result<Self> {
        let store = Self {
            db,
            defaults: Arc::new(defaults),
            write_lock: Arc::new(Mutex::new(())),
        };
        store.seed_defaults().await?;
        Ok(store)
    }

    async fn seed_defaults(&self) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        let mut seeded = Vec::new();

        if !has_setting(&self.db, KEY_LANGUAGE).await? {
            set_setting(&self.db, KEY_LANGUAGE, &self.defaults.language).await?;
            seeded.push(KEY_LANGUAGE);
        }
        if !has_setting(&self.db, KEY_VOLUME).await? {
            set_setting(&self.db, KEY_VOLUME, &DEFAULT_VOLUME).await?;
            seeded.push(KEY_VOLUME);
        }
        if !has_setting(&self.db, KEY_SCHEDULE).await? {
            set_setting(&self.db, KEY_SCHEDULE, &ScheduleSettings::default()).await?;
            seeded.push(KEY_SCHEDULE);
        }
        if !has_setting(&self.db, KEY_SYNC_SCHEDULE).await? {
            set_setting(&self.db, KEY_SYNC_SCHEDULE, &SyncScheduleSettings::default()).await?;
            seeded.push(KEY_SYNC_SCHEDULE);
        }
        if !has_setting(&self.db, KEY_REMOTE).await? {
            set_setting(&self.db, KEY_REMOTE, &self.defaults.remote()).await?;
            seeded.push(KEY_REMOTE);
        }

        if !seeded.is_empty() {
            info!(groups = ?seeded, "Seeded default settings");
        }
        Ok(())
    }

    /// Read a group, falling back to `fallback` when the row is missing or unreadable
    async fn load_or<T: DeserializeOwned>(&self, key: &str, fallback: T) -> Result<T> {
        match get_setting::<T>(&self.db, key).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Ok(fallback),
            Err(Error::Encoding(e)) => {
                warn!(key, error = %e, "Stored setting unreadable, using default");
                Ok(fallback)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn snapshot(&self) -> Result<SettingsSnapshot> {
        Ok(SettingsSnapshot {
            language: self.language().await?,
            volume_level: self.volume().await?,
            schedule: self.schedule().await?,
            sync_schedule: self.sync_schedule().await?,
            remote: self.remote().await?,
        })
    }

    pub async fn language(&self) -> Result<String> {
        self.load_or(KEY_LANGUAGE, self.defaults.language.clone()).await
    }

    pub async fn set_language(&self, language: &str) -> Result<()> {
        let language = language.trim();
        if language.is_empty() {
            return Err(Error::Validation("Language must not be empty.".to_string()));
        }
        let _lock = self.write_lock.lock().await;
        set_setting(&self.db, KEY_LANGUAGE, &language).await?;
        debug!(language, "Language updated");
        Ok(())
    }

    /// Stored volume, 0-100
    pub async fn volume(&self) -> Result<u8> {
        Ok(self.load_or(KEY_VOLUME, DEFAULT_VOLUME).await?.min(100))
    }

    pub async fn set_volume(&self, percent: u8) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        set_setting(&self.db, KEY_VOLUME, &percent.min(100)).await
    }

    pub async fn schedule(&self) -> Result<ScheduleSettings> {
        let mut schedule = self.load_or(KEY_SCHEDULE, ScheduleSettings::default()).await?;
        schedule.days = clean_days(schedule.days.iter().map(|d| i64::from(*d)));
        Ok(schedule)
    }

    /// Apply a validated partial update to the playback window
    pub async fn update_schedule(&self, update: ScheduleUpdate) -> Result<ScheduleSettings> {
        let _lock = self.write_lock.lock().await;
        let mut schedule = self.load_or(KEY_SCHEDULE, ScheduleSettings::default()).await?;

        if let Some(enabled) = update.enabled {
            schedule.enabled = enabled;
        }
        if let Some(start) = update.start.as_deref() {
            schedule.start = validate_time(start)?;
        }
        if let Some(end) = update.end.as_deref() {
            schedule.end = validate_time(end)?;
        }
        if let Some(days) = update.days {
            schedule.days = clean_days(days.into_iter());
        }
        if schedule.enabled && schedule.days.is_empty() {
            return Err(Error::Validation(
                "At least one day must be selected when the schedule is enabled.".to_string(),
            ));
        }

        set_setting(&self.db, KEY_SCHEDULE, &schedule).await?;
        info!(
            enabled = schedule.enabled,
            start = %schedule.start,
            end = %schedule.end,
            days = ?schedule.days,
            "Playback schedule updated"
        );
        Ok(schedule)
    }

    pub async fn sync_schedule(&self) -> Result<SyncScheduleSettings> {
        self.load_or(KEY_SYNC_SCHEDULE, SyncScheduleSettings::default()).await
    }

    /// Apply a validated partial update to the sync schedule
    ///
    /// The last-run marker is cleared when the schedule ends up enabled or
    /// its time changes, so the new setting can fire today.
    pub async fn update_sync_schedule(&self, update: SyncScheduleUpdate) -> Result<SyncScheduleSettings> {
        let _lock = self.write_lock.lock().await;
        let mut schedule = self.load_or(KEY_SYNC_SCHEDULE, SyncScheduleSettings::default()).await?;

        let new_time = update.time.as_deref().map(validate_time).transpose()?;
        let time_changed = new_time.as_ref().is_some_and(|t| *t != schedule.time);

        if let Some(enabled) = update.enabled {
            schedule.enabled = enabled;
        }
        if let Some(time) = new_time {
            schedule.time = time;
        }
        if schedule.enabled || time_changed {
            schedule.last_run_date = None;
        }

        set_setting(&self.db, KEY_SYNC_SCHEDULE, &schedule).await?;
        info!(enabled = schedule.enabled, time = %schedule.time, "Sync schedule updated");
        Ok(schedule)
    }

    /// Record the local date of a sync trigger
    pub async fn set_sync_last_run(&self, date: NaiveDate) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        let mut schedule = self.load_or(KEY_SYNC_SCHEDULE, SyncScheduleSettings::default()).await?;
        schedule.last_run_date = Some(date);
        set_setting(&self.db, KEY_SYNC_SCHEDULE, &schedule).await
    }

    pub async fn remote(&self) -> Result<RemoteSettings> {
        self.load_or(KEY_REMOTE, self.defaults.remote()).await
    }

    pub async fn update_remote(&self, update: RemoteUpdate) -> Result<RemoteSettings> {
        let _lock = self.write_lock.lock().await;
        let mut remote = self.load_or(KEY_REMOTE, self.defaults.remote()).await?;
        if let Some(token) = update.token {
            remote.token = token;
        }
        if let Some(path) = update.remote_path {
            remote.remote_path = path;
        }
        if remote.remote_name.is_empty() {
            remote.remote_name = self.defaults.remote_name.clone();
        }
        set_setting(&self.db, KEY_REMOTE, &remote).await?;
        Ok(remote)
    }
}

fn validate_time(value: &str) -> Result<String> {
    normalize_time_string(value).map_err(|_| Error::Validation("Time must be provided as HH:MM (24h).".to_string()))
}

/// Keep valid weekday indices, sorted and unique
fn clean_days(days: impl Iterator<Item = i64>) -> Vec<u8> {
    let mut cleaned: Vec<u8> = days
        .filter(|d| (0..=6).contains(d))
        .map(|d| d as u8)
        .collect();
    cleaned.sort_unstable();
    cleaned.dedup();
    cleaned
}

async fn has_setting(db: &Pool<Sqlite>, key: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;
    Ok(found.is_some())
}

/// Generic setting getter (JSON value)
pub async fn get_setting<T: DeserializeOwned>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates the row as JSON in a single statement.
pub async fn set_setting<T: Serialize + ?Sized>(db: &Pool<Sqlite>, key: &str, value: &T) -> Result<()> {
    let value_str = serde_json::to_string(value)?;

    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use avppi_common::db::init_memory_database;

    fn defaults() -> SettingsDefaults {
        SettingsDefaults {
            language: "fr".to_string(),
            remote_path: "AVPPi-medias".to_string(),
            remote_name: "drive".to_string(),
        }
    }

    async fn setup_store() -> SettingsStore {
        let db = init_memory_database().await.unwrap();
        SettingsStore::open(db, defaults()).await.unwrap()
    }

    #[tokio::test]
    async fn test_defaults_seeded() {
        let store = setup_store().await;
        let snap = store.snapshot().await.unwrap();
        assert_eq!(snap.language, "fr");
        assert_eq!(snap.volume_level, 80);
        assert_eq!(snap.schedule, ScheduleSettings::default());
        assert!(snap.sync_schedule.enabled);
        assert_eq!(snap.sync_schedule.time, "06:00");
        assert_eq!(snap.sync_schedule.last_run_date, None);
        assert_eq!(snap.remote.remote_name, "drive");
        assert!(snap.remote.token.is_empty());
    }

    #[tokio::test]
    async fn test_volume_clamped() {
        let store = setup_store().await;
        store.set_volume(150).await.unwrap();
        assert_eq!(store.volume().await.unwrap(), 100);
        store.set_volume(35).await.unwrap();
        assert_eq!(store.volume().await.unwrap(), 35);
    }

    #[tokio::test]
    async fn test_schedule_update_normalizes() {
        let store = setup_store().await;
        let updated = store
            .update_schedule(ScheduleUpdate {
                enabled: Some(true),
                start: Some(" 7:30".to_string()),
                end: Some("19:00".to_string()),
                days: Some(vec![4, 0, 4, 9, -1, 2]),
            })
            .await
            .unwrap();
        assert_eq!(updated.start, "07:30");
        assert_eq!(updated.days, vec![0, 2, 4]);
        assert_eq!(store.schedule().await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_schedule_rejects_empty_days_when_enabled() {
        let store = setup_store().await;
        let err = store
            .update_schedule(ScheduleUpdate {
                enabled: Some(true),
                days: Some(vec![]),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // Rejected update leaves the stored value untouched
        assert_eq!(store.schedule().await.unwrap(), ScheduleSettings::default());

        // Empty days are fine while disabled
        let updated = store
            .update_schedule(ScheduleUpdate {
                days: Some(vec![]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(updated.days.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_rejects_bad_time() {
        let store = setup_store().await;
        let err = store
            .update_schedule(ScheduleUpdate {
                start: Some("8h00".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_sync_update_clears_last_run() {
        let store = setup_store().await;
        let today = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();

        store.set_sync_last_run(today).await.unwrap();
        assert_eq!(store.sync_schedule().await.unwrap().last_run_date, Some(today));

        store
            .update_sync_schedule(SyncScheduleUpdate {
                time: Some("07:15".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let sync = store.sync_schedule().await.unwrap();
        assert_eq!(sync.time, "07:15");
        assert_eq!(sync.last_run_date, None);

        // Disabled with unchanged time keeps the marker
        store.set_sync_last_run(today).await.unwrap();
        store
            .update_sync_schedule(SyncScheduleUpdate {
                enabled: Some(false),
                time: None,
            })
            .await
            .unwrap();
        assert_eq!(store.sync_schedule().await.unwrap().last_run_date, Some(today));

        // Re-enabling clears it
        store
            .update_sync_schedule(SyncScheduleUpdate {
                enabled: Some(true),
                time: None,
            })
            .await
            .unwrap();
        assert_eq!(store.sync_schedule().await.unwrap().last_run_date, None);
    }

    #[tokio::test]
    async fn test_remote_update_keeps_name() {
        let store = setup_store().await;
        let remote = store
            .update_remote(RemoteUpdate {
                token: Some("{\"access_token\":\"x\"}".to_string()),
                remote_path: Some("Shows".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(remote.remote_name, "drive");
        assert_eq!(remote.remote_path, "Shows");
        assert_eq!(store.remote().await.unwrap(), remote);
    }

    #[tokio::test]
    async fn test_corrupt_row_falls_back_to_default() {
        let store = setup_store().await;
        sqlx::query("UPDATE settings SET value = 'not json' WHERE key = 'schedule'")
            .execute(&store.db)
            .await
            .unwrap();
        assert_eq!(store.schedule().await.unwrap(), ScheduleSettings::default());
    }

    #[tokio::test]
    async fn test_existing_rows_survive_reopen() {
        let db = init_memory_database().await.unwrap();
        let store = SettingsStore::open(db.clone(), defaults()).await.unwrap();
        store.set_language("en").await.unwrap();
        let reopened = SettingsStore::open(db, defaults()).await.unwrap();
        assert_eq!(reopened.language().await.unwrap(), "en");
    }
}
