//! SQLite record store for patients and their visits.
//!
//! The store owns an r2d2 pool of diesel connections. It is built once at
//! startup and handed to the handlers as application data; every method
//! checks a connection out for the duration of a single operation.

use std::collections::HashSet;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::BigInt;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use thiserror::Error;

use crate::models::{Patient, PatientChanges, Visit, VisitFields};
use crate::schema::{patients, visits};

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Record store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("VHID {0} already exists")]
    DuplicateKey(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Storage(#[from] DieselError),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::PoolError),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("database task was cancelled")]
    Blocking,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a bulk import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    /// VHIDs inserted, in document order.
    pub created: Vec<String>,
    /// VHIDs already stored, or repeated earlier in the same import.
    pub skipped_existing: Vec<String>,
    /// Blocks without a VHID or a name.
    pub skipped_incomplete: usize,
}

/// Per-connection SQLite settings applied whenever the pool hands out a connection.
#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

#[derive(QueryableByName)]
struct StorageSize {
    #[diesel(sql_type = BigInt)]
    bytes: i64,
}

#[derive(Clone)]
pub struct RecordStore {
    pool: DbPool,
}

impl RecordStore {
    /// Open (or create) the database file at `path` and apply pending migrations.
    pub fn open(path: &str, pool_size: u32) -> StoreResult<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(path);
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout_ms: BUSY_TIMEOUT_MS,
            }))
            .build(manager)?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database on a single long-lived connection (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout_ms: BUSY_TIMEOUT_MS,
            }))
            .build(manager)?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::debug!(count = applied.len(), "Applied pending migrations");
        Ok(())
    }

    fn conn(&self) -> StoreResult<DbConn> {
        Ok(self.pool.get()?)
    }

    // -- Patients -----------------------------------------------------------

    /// Insert a new patient. Fails with `DuplicateKey` when the VHID is taken.
    pub fn create_patient(&self, patient: &Patient) -> StoreResult<Patient> {
        let mut conn = self.conn()?;
        conn.immediate_transaction(|conn| {
            if patient_exists(conn, &patient.vhid)? {
                return Err(StoreError::DuplicateKey(patient.vhid.clone()));
            }
            insert_patient(conn, patient)?;
            Ok(patient.clone())
        })
    }

    pub fn get_patient(&self, vhid: &str) -> StoreResult<Option<Patient>> {
        let mut conn = self.conn()?;
        patients::table
            .find(vhid)
            .select(Patient::as_select())
            .first(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    pub fn update_patient(&self, vhid: &str, changes: &PatientChanges) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let rows = diesel::update(patients::table.find(vhid))
            .set(changes)
            .execute(&mut conn)?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Patient {vhid}")));
        }
        Ok(())
    }

    pub fn count_patients(&self) -> StoreResult<i64> {
        let mut conn = self.conn()?;
        Ok(patients::table.count().get_result(&mut conn)?)
    }

    /// Insert every importable patient in one transaction.
    ///
    /// Rows without a VHID or name are skipped, as are VHIDs that are already
    /// stored or appeared earlier in `batch`. Existing rows are never touched.
    pub fn import_patients(&self, batch: Vec<Patient>) -> StoreResult<ImportSummary> {
        let mut conn = self.conn()?;
        conn.immediate_transaction(|conn| {
            let mut summary = ImportSummary::default();
            let mut seen = HashSet::new();

            for patient in batch {
                if patient.vhid.is_empty() || patient.name.is_empty() {
                    summary.skipped_incomplete += 1;
                    continue;
                }
                if !seen.insert(patient.vhid.clone()) || patient_exists(conn, &patient.vhid)? {
                    summary.skipped_existing.push(patient.vhid);
                    continue;
                }
                insert_patient(conn, &patient)?;
                summary.created.push(patient.vhid);
            }

            Ok(summary)
        })
    }

    // -- Visits -------------------------------------------------------------

    /// Newest first: date descending, then id descending.
    pub fn list_visits_for_patient(&self, vhid: &str) -> StoreResult<Vec<Visit>> {
        let mut conn = self.conn()?;
        visits::table
            .filter(visits::vhid.eq(vhid))
            .order((visits::date.desc(), visits::id.desc()))
            .select(Visit::as_select())
            .load(&mut conn)
            .map_err(Into::into)
    }

    /// Record a visit. The patient must already exist.
    pub fn create_visit(&self, vhid: &str, fields: &VisitFields) -> StoreResult<Visit> {
        let mut conn = self.conn()?;
        conn.immediate_transaction(|conn| {
            if !patient_exists(conn, vhid)? {
                return Err(StoreError::NotFound(format!("Patient {vhid}")));
            }
            let visit = diesel::insert_into(visits::table)
                .values((visits::vhid.eq(vhid), fields))
                .returning(Visit::as_returning())
                .get_result(conn)?;
            Ok(visit)
        })
    }

    pub fn get_visit(&self, id: i32) -> StoreResult<Option<Visit>> {
        let mut conn = self.conn()?;
        visits::table
            .find(id)
            .select(Visit::as_select())
            .first(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    /// Overwrite the editable fields of a visit and return the stored row.
    pub fn update_visit(&self, id: i32, fields: &VisitFields) -> StoreResult<Visit> {
        let mut conn = self.conn()?;
        diesel::update(visits::table.find(id))
            .set(fields)
            .returning(Visit::as_returning())
            .get_result(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("Visit {id}")))
    }

    pub fn count_visits(&self) -> StoreResult<i64> {
        let mut conn = self.conn()?;
        Ok(visits::table.count().get_result(&mut conn)?)
    }

    /// Size of the database in bytes, from SQLite's page accounting.
    pub fn storage_size_bytes(&self) -> StoreResult<Option<u64>> {
        let mut conn = self.conn()?;
        let size = diesel::sql_query(
            "SELECT page_count * page_size AS bytes FROM pragma_page_count(), pragma_page_size()",
        )
        .get_result::<StorageSize>(&mut conn)?;
        Ok(u64::try_from(size.bytes).ok())
    }
}

fn patient_exists(conn: &mut SqliteConnection, vhid: &str) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(patients::table.find(vhid))).get_result(conn)
}

fn insert_patient(conn: &mut SqliteConnection, patient: &Patient) -> StoreResult<()> {
    diesel::insert_into(patients::table)
        .values(patient)
        .execute(conn)
        .map_err(|e| match e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                StoreError::DuplicateKey(patient.vhid.clone())
            }
            other => other.into(),
        })?;
    Ok(())
}
