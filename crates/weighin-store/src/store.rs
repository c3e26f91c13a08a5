//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{debug, info};

use weighin_types::{
    EnergyIdentity, EnergyKind, EnergySample, EnergySlot, Granularity, Record, WeightSample,
    format_date,
};

use crate::error::{Error, Result};
use crate::models::{
    SecretState, SecretVersionInfo, StoredEnergy, StoredSecret, StoredWeight, format_time,
};
use crate::queries::{EnergyQuery, WeightQuery};
use crate::schema;

const WEIGHT_COLUMNS: &str = "log_id, date, time, weight, measured_at, utc_offset, synced_at";
const ENERGY_COLUMNS: &str =
    "id, kind, granularity, day, kilojoules, measured_at, utc_offset, synced_at";

/// SQLite-based store for weight, energy and credential records.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Integer, Box::new(err))
}

/// Restore an instant stored as unix seconds plus its original offset.
fn instant_at(row: &Row<'_>, ts_col: usize, offset_col: usize) -> rusqlite::Result<OffsetDateTime> {
    let offset = UtcOffset::from_whole_seconds(row.get(offset_col)?)
        .map_err(|e| conversion_error(offset_col, e))?;
    let instant = OffsetDateTime::from_unix_timestamp(row.get(ts_col)?)
        .map_err(|e| conversion_error(ts_col, e))?;
    Ok(instant.to_offset(offset))
}

fn utc_instant(row: &Row<'_>, col: usize) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(row.get(col)?).map_err(|e| conversion_error(col, e))
}

fn weight_from_row(row: &Row<'_>) -> rusqlite::Result<StoredWeight> {
    Ok(StoredWeight {
        log_id: row.get(0)?,
        date: row.get(1)?,
        time: row.get(2)?,
        weight: row.get(3)?,
        measured_at: instant_at(row, 4, 5)?,
        synced_at: utc_instant(row, 6)?,
    })
}

fn energy_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEnergy> {
    let kind: String = row.get(1)?;
    let granularity: String = row.get(2)?;
    Ok(StoredEnergy {
        id: row.get(0)?,
        kind: EnergyKind::from_storage_name(&kind)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(1, kind.clone(), Type::Text))?,
        granularity: parse_granularity(&granularity)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(2, granularity.clone(), Type::Text))?,
        day: row.get(3)?,
        kilojoules: row.get(4)?,
        measured_at: instant_at(row, 5, 6)?,
        synced_at: utc_instant(row, 7)?,
    })
}

fn parse_granularity(s: &str) -> Option<Granularity> {
    match s {
        "daily" => Some(Granularity::Daily),
        "intraday" => Some(Granularity::Intraday),
        _ => None,
    }
}

// Weight operations
impl Store {
    fn upsert_weight_on(conn: &Connection, sample: &WeightSample, synced_at: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO weights (log_id, date, time, weight, measured_at, utc_offset, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(log_id) DO UPDATE SET
                date = excluded.date,
                time = excluded.time,
                weight = excluded.weight,
                measured_at = excluded.measured_at,
                utc_offset = excluded.utc_offset,
                synced_at = excluded.synced_at",
            rusqlite::params![
                sample.log_id,
                format_date(sample.date),
                format_time(sample.time),
                sample.weight,
                sample.measured_at.unix_timestamp(),
                sample.measured_at.offset().whole_seconds(),
                synced_at,
            ],
        )?;
        Ok(())
    }

    /// Insert a weight sample, overwriting any sample with the same log id.
    pub fn upsert_weight(&self, sample: &WeightSample) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self::upsert_weight_on(&self.conn, sample, now)
    }

    /// Upsert a batch of weight samples in one transaction.
    pub fn upsert_weights(&self, samples: &[WeightSample]) -> Result<usize> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let tx = self.conn.unchecked_transaction()?;
        for sample in samples {
            Self::upsert_weight_on(&tx, sample, now)?;
        }
        tx.commit()?;

        debug!("Upserted {} weight samples", samples.len());
        Ok(samples.len())
    }

    /// Get a weight sample by log id.
    pub fn get_weight(&self, log_id: i64) -> Result<Option<StoredWeight>> {
        let sql = format!("SELECT {} FROM weights WHERE log_id = ?", WEIGHT_COLUMNS);
        let weight = self
            .conn
            .query_row(&sql, [log_id], weight_from_row)
            .optional()?;
        Ok(weight)
    }

    /// Weight samples dated within `start..=end`, oldest first.
    pub fn weights_between(&self, start: Date, end: Date) -> Result<Vec<StoredWeight>> {
        self.query_weights(&WeightQuery::new().since(start).until(end).oldest_first())
    }

    /// Weight samples dated on `date`, oldest first.
    pub fn weights_on(&self, date: Date) -> Result<Vec<StoredWeight>> {
        self.weights_between(date, date)
    }

    /// Query weight samples with filters.
    pub fn query_weights(&self, query: &WeightQuery) -> Result<Vec<StoredWeight>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let weights = stmt
            .query_map(params_ref.as_slice(), weight_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(weights)
    }

    /// The most recently measured weight sample.
    pub fn latest_weight(&self) -> Result<Option<StoredWeight>> {
        let mut weights = self.query_weights(&WeightQuery::new().limit(1))?;
        Ok(weights.pop())
    }

    /// Delete a weight sample. Returns whether a row was removed.
    pub fn delete_weight(&self, log_id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM weights WHERE log_id = ?", [log_id])?;
        Ok(changed > 0)
    }

    /// Delete a batch of weight samples in one transaction.
    pub fn delete_weights(&self, log_ids: &[i64]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        for log_id in log_ids {
            deleted += tx.execute("DELETE FROM weights WHERE log_id = ?", [log_id])?;
        }
        tx.commit()?;

        debug!("Deleted {} weight samples", deleted);
        Ok(deleted)
    }

    /// Count stored weight samples.
    pub fn count_weights(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM weights", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// Energy operations
impl Store {
    fn insert_energy_on(conn: &Connection, sample: &EnergySample, synced_at: i64) -> Result<i64> {
        conn.execute(
            "INSERT INTO energy (kind, granularity, day, kilojoules, measured_at, utc_offset, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                sample.kind.as_str(),
                sample.granularity.as_str(),
                format_date(sample.day()),
                sample.kilojoules,
                sample.measured_at.unix_timestamp(),
                sample.measured_at.offset().whole_seconds(),
                synced_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append an energy sample. Returns the new row id.
    ///
    /// No identity check is made here; callers reconcile first.
    pub fn insert_energy(&self, sample: &EnergySample) -> Result<i64> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self::insert_energy_on(&self.conn, sample, now)
    }

    /// Append a batch of energy samples in one transaction.
    pub fn insert_energy_many(&self, samples: &[EnergySample]) -> Result<usize> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let tx = self.conn.unchecked_transaction()?;
        for sample in samples {
            Self::insert_energy_on(&tx, sample, now)?;
        }
        tx.commit()?;

        debug!("Inserted {} energy samples", samples.len());
        Ok(samples.len())
    }

    /// Replace every row carrying the sample's identity with the sample.
    pub fn upsert_energy(&self, sample: &EnergySample) -> Result<i64> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let tx = self.conn.unchecked_transaction()?;
        Self::delete_energy_identity_on(&tx, &sample.identity())?;
        let id = Self::insert_energy_on(&tx, sample, now)?;
        tx.commit()?;
        Ok(id)
    }

    /// Upsert a batch of energy samples in one transaction.
    pub fn upsert_energy_many(&self, samples: &[EnergySample]) -> Result<usize> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let tx = self.conn.unchecked_transaction()?;
        for sample in samples {
            Self::delete_energy_identity_on(&tx, &sample.identity())?;
            Self::insert_energy_on(&tx, sample, now)?;
        }
        tx.commit()?;

        debug!("Upserted {} energy samples", samples.len());
        Ok(samples.len())
    }

    /// Energy rows of one kind and granularity on a calendar day.
    pub fn energy_for_day(
        &self,
        kind: EnergyKind,
        granularity: Granularity,
        day: Date,
    ) -> Result<Vec<StoredEnergy>> {
        self.query_energy(
            &EnergyQuery::new()
                .kind(kind)
                .granularity(granularity)
                .since(day)
                .until(day)
                .oldest_first(),
        )
    }

    /// Energy rows of one kind and granularity measured within `start..=end`.
    pub fn energy_between(
        &self,
        kind: EnergyKind,
        granularity: Granularity,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<StoredEnergy>> {
        let sql = format!(
            "SELECT {} FROM energy
             WHERE kind = ?1 AND granularity = ?2 AND measured_at >= ?3 AND measured_at <= ?4
             ORDER BY measured_at ASC, id ASC",
            ENERGY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    kind.as_str(),
                    granularity.as_str(),
                    start.unix_timestamp(),
                    end.unix_timestamp()
                ],
                energy_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Query energy rows with filters.
    pub fn query_energy(&self, query: &EnergyQuery) -> Result<Vec<StoredEnergy>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), energy_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn delete_energy_identity_on(conn: &Connection, identity: &EnergyIdentity) -> Result<usize> {
        let deleted = match identity.slot {
            EnergySlot::Day(day) => conn.execute(
                "DELETE FROM energy WHERE kind = ?1 AND granularity = ?2 AND day = ?3",
                rusqlite::params![
                    identity.kind.as_str(),
                    Granularity::Daily.as_str(),
                    format_date(day)
                ],
            )?,
            EnergySlot::Instant(ts) => conn.execute(
                "DELETE FROM energy WHERE kind = ?1 AND granularity = ?2 AND measured_at = ?3",
                rusqlite::params![identity.kind.as_str(), Granularity::Intraday.as_str(), ts],
            )?,
        };
        Ok(deleted)
    }

    /// Delete every row carrying `identity`. Returns the number of rows removed.
    pub fn delete_energy_identity(&self, identity: &EnergyIdentity) -> Result<usize> {
        Self::delete_energy_identity_on(&self.conn, identity)
    }

    /// Delete every row carrying any of `identities`, in one transaction.
    pub fn delete_energy_identities(&self, identities: &[EnergyIdentity]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        for identity in identities {
            deleted += Self::delete_energy_identity_on(&tx, identity)?;
        }
        tx.commit()?;

        debug!("Deleted {} energy rows", deleted);
        Ok(deleted)
    }

    /// Delete one energy row by id.
    pub fn delete_energy(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute("DELETE FROM energy WHERE id = ?", [id])?;
        Ok(changed > 0)
    }

    /// Count energy rows, optionally for one kind.
    pub fn count_energy(&self, kind: Option<EnergyKind>) -> Result<u64> {
        let count: i64 = match kind {
            Some(kind) => self.conn.query_row(
                "SELECT COUNT(*) FROM energy WHERE kind = ?",
                [kind.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM energy", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

// Secret version operations
impl Store {
    /// Store a new version of a secret. Returns the assigned version number.
    pub fn add_secret_version(&self, name: &str, payload: &[u8]) -> Result<i64> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let tx = self.conn.unchecked_transaction()?;

        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM secret_versions WHERE name = ?",
            [name],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO secret_versions (name, version, payload, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![name, version, payload, SecretState::Enabled.as_str(), now],
        )?;
        tx.commit()?;

        info!("Added secret version {}/{}", name, version);
        Ok(version)
    }

    /// The highest enabled version of a secret.
    pub fn latest_secret_version(&self, name: &str) -> Result<Option<StoredSecret>> {
        let secret = self
            .conn
            .query_row(
                "SELECT name, version, payload FROM secret_versions
                 WHERE name = ?1 AND state = ?2
                 ORDER BY version DESC LIMIT 1",
                rusqlite::params![name, SecretState::Enabled.as_str()],
                |row| {
                    Ok(StoredSecret {
                        name: row.get(0)?,
                        version: row.get(1)?,
                        payload: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(secret)
    }

    /// List versions of a secret in ascending order.
    pub fn list_secret_versions(
        &self,
        name: &str,
        include_destroyed: bool,
    ) -> Result<Vec<SecretVersionInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, version, state, created_at, destroyed_at FROM secret_versions
             WHERE name = ?1 AND (?2 OR state <> 'destroyed')
             ORDER BY version ASC",
        )?;

        let versions = stmt
            .query_map(rusqlite::params![name, include_destroyed], |row| {
                let state: String = row.get(2)?;
                Ok(SecretVersionInfo {
                    name: row.get(0)?,
                    version: row.get(1)?,
                    state: SecretState::parse(&state)
                        .ok_or_else(|| rusqlite::Error::InvalidColumnType(2, state.clone(), Type::Text))?,
                    created_at: utc_instant(row, 3)?,
                    destroyed_at: row
                        .get::<_, Option<i64>>(4)?
                        .map(|ts| OffsetDateTime::from_unix_timestamp(ts).map_err(|e| conversion_error(4, e)))
                        .transpose()?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(versions)
    }

    /// Destroy a secret version: its payload is erased and it can never be read again.
    ///
    /// Destroying an already destroyed version succeeds.
    pub fn destroy_secret_version(&self, name: &str, version: i64) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let changed = self.conn.execute(
            "UPDATE secret_versions SET state = ?1, payload = NULL, destroyed_at = ?2
             WHERE name = ?3 AND version = ?4 AND state = ?5",
            rusqlite::params![
                SecretState::Destroyed.as_str(),
                now,
                name,
                version,
                SecretState::Enabled.as_str()
            ],
        )?;

        if changed == 0 {
            let exists: bool = self.conn.query_row(
                "SELECT COUNT(*) > 0 FROM secret_versions WHERE name = ?1 AND version = ?2",
                rusqlite::params![name, version],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(Error::SecretVersionNotFound {
                    name: name.to_string(),
                    version,
                });
            }
            debug!("Secret version {}/{} already destroyed", name, version);
        } else {
            info!("Destroyed secret version {}/{}", name, version);
        }

        Ok(())
    }
}
