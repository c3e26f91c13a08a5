//! Webhook receiver, backfill endpoint and REST API for weighin.
//!
//! This crate provides a service that:
//! - Re-syncs the days named by Fitbit subscriber notifications
//! - Backfills weight history for a date range, one month at a time
//! - Ingests energy deliveries from a health-metrics exporter
//! - Exposes the stored data as JSON for a dashboard
//!
//! # Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `POST /receive` - Fitbit notification list
//! - `GET /receive?verify=CODE` - Fitbit subscriber verification
//! - `GET /batch?start=YYYY-MM-DD&end=YYYY-MM-DD` - Range backfill
//! - `POST /health` - Health-metrics payload (`period: daily|intraday` header)
//! - `GET /api/weights` - Latest weight and a filtered series
//! - `GET /api/energy` - Energy records with filters
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/weighin/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/weighin/data.db"
//!
//! [fitbit]
//! client_id = "23ABCD"
//! client_secret = "..."
//! verification_code = "..."
//! utc_offset = "+10:00"
//!
//! [sync]
//! max_concurrent_ranges = 4
//! retries = 3
//! ```
//!
//! The OAuth token itself lives in the database as a versioned secret and
//! is provisioned once with `weighin-service token import <file>`.

pub mod api;
pub mod config;
pub mod state;

pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use state::AppState;
