//! Database initialization shared by the appliance crates

pub mod init;

pub use init::{create_settings_table, init_database, init_memory_database};
