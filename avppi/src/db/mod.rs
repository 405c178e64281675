//! Database access for the appliance

pub mod settings;

pub use settings::{
    RemoteSettings, RemoteUpdate, ScheduleSettings, ScheduleUpdate, SettingsDefaults, SettingsSnapshot,
    SettingsStore, SyncScheduleSettings, SyncScheduleUpdate,
};
