//! Local persistence for weighin records.
//!
//! SQLite-backed storage for three record families:
//!
//! - Weight samples, keyed by the provider log id so a re-delivered sample is
//!   an overwrite.
//! - Energy samples, appended and removed by identity as reconciliation
//!   dictates.
//! - Versioned secrets, where a destroyed version keeps its metadata but loses
//!   its payload for good.
//!
//! The store is synchronous. Async callers wrap it in a mutex the way the
//! service does.
//!
//! # Example
//!
//! ```no_run
//! use weighin_store::{Store, WeightQuery};
//!
//! let store = Store::open_default()?;
//! let recent = store.query_weights(&WeightQuery::new().limit(10))?;
//! # Ok::<(), weighin_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{SecretState, SecretVersionInfo, StoredEnergy, StoredSecret, StoredWeight};
pub use queries::{EnergyQuery, WeightQuery};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/weighin/data.db`
/// - macOS: `~/Library/Application Support/weighin/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\weighin\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("weighin")
        .join("data.db")
}
