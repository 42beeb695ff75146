//! QC file repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD primitives over the `qc_file` table.
//! - Provide an atomic scope in which several primitives commit together.
//! - Turn uniqueness violations raised by SQLite into slot/checksum
//!   conflicts naming the record that won.
//!
//! # Invariants
//! - Write paths validate drafts before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Declared constraints stay the final authority; pre-checks elsewhere
//!   only make the common case produce better errors.

use crate::db::migrations::{current_version, latest_version};
use crate::db::DbError;
use crate::model::qc_file::{
    CalcType, Checksum, EncodedPayloads, ModelError, OwnerRef, QcFile, QcFileDraft, QcFileId,
    QcFileStatus, QcOwner,
};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, Row, Transaction, TransactionBehavior,
};
use std::str::FromStr;
use thiserror::Error;

const QC_FILE_SELECT_SQL: &str = "SELECT
    id,
    species_id,
    transition_state_id,
    np_species_id,
    vdw_entry_id,
    calc_type,
    status,
    level_id,
    ess_id,
    input_name,
    output_name,
    input_file,
    output_file,
    compressed,
    checksum,
    created_at,
    updated_at
FROM qc_file";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for QC file persistence and query operations.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] ModelError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("qc file not found: {0}")]
    NotFound(QcFileId),
    #[error("{owner} already has a {calc_type} file (record {existing_id})")]
    DuplicateSlot {
        owner: QcOwner,
        calc_type: CalcType,
        existing_id: QcFileId,
    },
    #[error("checksum {checksum} is already stored by record {existing_id}")]
    ChecksumCollision {
        checksum: Checksum,
        existing_id: QcFileId,
    },
    #[error("invalid persisted qc file data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Query options for listing QC files.
#[derive(Debug, Clone, Default)]
pub struct QcFileListQuery {
    pub owner: Option<QcOwner>,
    pub calc_type: Option<CalcType>,
    pub status: Option<QcFileStatus>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for QC file storage.
pub trait QcFileRepository {
    /// Runs `work` so that every primitive it calls commits or rolls back
    /// together. Joins an enclosing scope when one is already open.
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>;

    fn insert_qc_file(&self, draft: &QcFileDraft) -> RepoResult<QcFile>;
    fn get_qc_file(&self, id: QcFileId) -> RepoResult<Option<QcFile>>;
    fn find_by_checksum(&self, checksum: &Checksum) -> RepoResult<Option<QcFile>>;
    fn find_by_slot(&self, owner: QcOwner, calc_type: CalcType) -> RepoResult<Option<QcFile>>;
    fn list_qc_files(&self, query: &QcFileListQuery) -> RepoResult<Vec<QcFile>>;
    fn update_status(&self, id: QcFileId, status: QcFileStatus) -> RepoResult<()>;
    fn update_names(
        &self,
        id: QcFileId,
        input_name: Option<&str>,
        output_name: Option<&str>,
    ) -> RepoResult<()>;
    fn replace_payloads(
        &self,
        id: QcFileId,
        payloads: &EncodedPayloads,
        checksum: &Checksum,
    ) -> RepoResult<()>;
    fn delete_qc_file(&self, id: QcFileId) -> RepoResult<()>;
}

/// SQLite-backed QC file repository.
pub struct SqliteQcFileRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteQcFileRepository<'conn> {
    /// Creates repository from a fully migrated connection.
    ///
    /// # Errors
    /// - `Db(SchemaNotReady)` when the connection is not at the latest version.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Re-reads storage after a uniqueness violation and names the winner.
    fn remap_conflict(
        &self,
        err: rusqlite::Error,
        owner: QcOwner,
        calc_type: CalcType,
        checksum: &Checksum,
    ) -> RepoError {
        if !is_unique_violation(&err) {
            return err.into();
        }

        match self.find_by_checksum(checksum) {
            Ok(Some(existing)) if !existing.occupies(owner, calc_type) => {
                return RepoError::ChecksumCollision {
                    checksum: checksum.clone(),
                    existing_id: existing.id,
                }
            }
            Ok(_) => {}
            Err(lookup_err) => return lookup_err,
        }

        match self.find_by_slot(owner, calc_type) {
            Ok(Some(existing)) => RepoError::DuplicateSlot {
                owner,
                calc_type,
                existing_id: existing.id,
            },
            Ok(None) => err.into(),
            Err(lookup_err) => lookup_err,
        }
    }
}

impl QcFileRepository for SqliteQcFileRepository<'_> {
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>,
    {
        if !self.conn.is_autocommit() {
            return work(self);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(RepoError::from)?;
        let value = work(self)?;
        tx.commit().map_err(RepoError::from)?;
        Ok(value)
    }

    fn insert_qc_file(&self, draft: &QcFileDraft) -> RepoResult<QcFile> {
        draft.validate()?;

        let owner = OwnerRef::from(draft.owner);
        let inserted = self.conn.execute(
            "INSERT INTO qc_file (
                species_id,
                transition_state_id,
                np_species_id,
                vdw_entry_id,
                calc_type,
                status,
                level_id,
                ess_id,
                input_name,
                output_name,
                input_file,
                output_file,
                compressed,
                checksum
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
            params![
                owner.species_id,
                owner.transition_state_id,
                owner.np_species_id,
                owner.vdw_entry_id,
                draft.calc_type.as_str(),
                draft.status.as_str(),
                draft.level_id,
                draft.ess_id,
                draft.input_name.as_deref(),
                draft.output_name.as_deref(),
                draft.payloads.input.as_deref(),
                draft.payloads.output.as_deref(),
                draft.payloads.compressed,
                draft.checksum.as_str(),
            ],
        );
        if let Err(err) = inserted {
            return Err(self.remap_conflict(err, draft.owner, draft.calc_type, &draft.checksum));
        }

        let id = self.conn.last_insert_rowid();
        self.get_qc_file(id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("inserted qc file {id} not found in read-back"))
        })
    }

    fn get_qc_file(&self, id: QcFileId) -> RepoResult<Option<QcFile>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{QC_FILE_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_qc_file_row(row)?));
        }
        Ok(None)
    }

    fn find_by_checksum(&self, checksum: &Checksum) -> RepoResult<Option<QcFile>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{QC_FILE_SELECT_SQL} WHERE checksum = ?1;"))?;
        let mut rows = stmt.query([checksum.as_str()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_qc_file_row(row)?));
        }
        Ok(None)
    }

    fn find_by_slot(&self, owner: QcOwner, calc_type: CalcType) -> RepoResult<Option<QcFile>> {
        let mut stmt = self.conn.prepare(&format!(
            "{QC_FILE_SELECT_SQL} WHERE {} = ?1 AND calc_type = ?2;",
            owner.kind().column()
        ))?;
        let mut rows = stmt.query(params![owner.id(), calc_type.as_str()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_qc_file_row(row)?));
        }
        Ok(None)
    }

    fn list_qc_files(&self, query: &QcFileListQuery) -> RepoResult<Vec<QcFile>> {
        let mut sql = format!("{QC_FILE_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(owner) = query.owner {
            sql.push_str(&format!(" AND {} = ?", owner.kind().column()));
            bind_values.push(Value::Integer(owner.id()));
        }
        if let Some(calc_type) = query.calc_type {
            sql.push_str(" AND calc_type = ?");
            bind_values.push(Value::Text(calc_type.as_str().to_string()));
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }

        sql.push_str(" ORDER BY id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_qc_file_row(row)?);
        }
        Ok(records)
    }

    fn update_status(&self, id: QcFileId, status: QcFileStatus) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE qc_file
             SET
                status = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn update_names(
        &self,
        id: QcFileId,
        input_name: Option<&str>,
        output_name: Option<&str>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE qc_file
             SET
                input_name = ?2,
                output_name = ?3,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id, input_name, output_name],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn replace_payloads(
        &self,
        id: QcFileId,
        payloads: &EncodedPayloads,
        checksum: &Checksum,
    ) -> RepoResult<()> {
        let updated = self.conn.execute(
            "UPDATE qc_file
             SET
                input_file = ?2,
                output_file = ?3,
                compressed = ?4,
                checksum = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                id,
                payloads.input.as_deref(),
                payloads.output.as_deref(),
                payloads.compressed,
                checksum.as_str(),
            ],
        );

        match updated {
            Ok(0) => Err(RepoError::NotFound(id)),
            Ok(_) => Ok(()),
            Err(err) => {
                let current = self.get_qc_file(id)?.ok_or(RepoError::NotFound(id))?;
                Err(self.remap_conflict(err, current.owner, current.calc_type, checksum))
            }
        }
    }

    fn delete_qc_file(&self, id: QcFileId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM qc_file WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::ConstraintViolation
                && inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn parse_qc_file_row(row: &Row<'_>) -> RepoResult<QcFile> {
    let id: QcFileId = row.get("id")?;

    let owner_ref = OwnerRef {
        species_id: row.get("species_id")?,
        transition_state_id: row.get("transition_state_id")?,
        np_species_id: row.get("np_species_id")?,
        vdw_entry_id: row.get("vdw_entry_id")?,
    };
    let owner = owner_ref.resolve().map_err(|err| {
        RepoError::InvalidData(format!("qc_file {id} has an invalid owner: {err}"))
    })?;

    let calc_type_text: String = row.get("calc_type")?;
    let calc_type = CalcType::from_str(&calc_type_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid calc type `{calc_type_text}` in qc_file.calc_type"
        ))
    })?;

    let status_text: String = row.get("status")?;
    let status = QcFileStatus::from_str(&status_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in qc_file.status"))
    })?;

    let checksum_text: String = row.get("checksum")?;
    let checksum = Checksum::parse(&checksum_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid checksum `{checksum_text}` in qc_file.checksum"
        ))
    })?;

    let compressed = match row.get::<_, i64>("compressed")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid compressed value `{other}` in qc_file.compressed"
            )));
        }
    };

    Ok(QcFile {
        id,
        owner,
        calc_type,
        status,
        level_id: row.get("level_id")?,
        ess_id: row.get("ess_id")?,
        input_name: row.get("input_name")?,
        output_name: row.get("output_name")?,
        payloads: EncodedPayloads {
            input: row.get("input_file")?,
            output: row.get("output_file")?,
            compressed,
        },
        checksum,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_version(conn)?;
    if actual_version != expected_version {
        return Err(DbError::SchemaNotReady {
            expected_version,
            actual_version,
        }
        .into());
    }
    Ok(())
}
