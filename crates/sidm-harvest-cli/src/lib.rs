//! sidm-harvest-cli: the Chromium driver, SQLite work queue and
//! configuration resolution behind the `sidm-harvest` binary.

pub mod chromium;
pub mod config;
pub mod store;

pub use chromium::{find_chromium, ChromiumDriver, ChromiumFactory};
pub use config::{load_config, resolve_cache_dir, resolve_config_path, resolve_db_path};
pub use store::SqliteStore;
