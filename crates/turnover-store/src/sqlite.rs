//! `rusqlite` backend.
//!
//! Writes go through one long-lived connection behind a mutex. Every session
//! opens its own read connection so a pass never blocks writers for longer
//! than a single statement (WAL mode).

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::rows::{
    ChangeLogRow, ModificationRow, MsDataFileRow, PeptideAnalysisRow, PeptideFileAnalysisRow,
    PeptideRow, SettingRow, TracerDefRow, WorkspaceRow,
};
use crate::session::{Store, StoreSession, StoreWriter};
use crate::snapshot::{load_snapshots, Snapshots};

/// Upper bound on bound parameters per `IN (...)` list.
const IN_CHUNK: usize = 500;

const PEPTIDE_COLUMNS: &str =
    "SELECT id, sequence, protein_name, protein_description, max_tracer_count FROM peptide";
const MS_DATA_FILE_COLUMNS: &str =
    "SELECT id, name, label, cohort, sample, time_point FROM ms_data_file";
const ANALYSIS_COLUMNS: &str = "SELECT id, peptide_id, note, min_charge, max_charge, \
     excluded_masses FROM peptide_analysis";
const FILE_ANALYSIS_COLUMNS: &str = "SELECT id, peptide_analysis_id, ms_data_file_id, \
     chromatogram_count, peak_count, note FROM peptide_file_analysis";
const CHANGE_LOG_COLUMNS: &str = "SELECT id, workspace_id, peptide_id, ms_data_file_id, \
     peptide_analysis_id FROM change_log";

pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    writer: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::open_path(&config.database_path, config.busy_timeout())
    }

    /// Opens (creating if needed) the database at `path` and ensures the
    /// schema exists.
    pub fn open_path(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = connect(path, busy_timeout)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !journal.eq_ignore_ascii_case("wal") {
            tracing::warn!(path = %path.display(), journal, "WAL mode unavailable");
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            path: path.to_path_buf(),
            busy_timeout,
            writer: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn connect(path: &Path, busy_timeout: Duration) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workspace (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          data_directory TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS setting (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE,
          value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS modification (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          symbol TEXT NOT NULL,
          delta_mass REAL NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tracer_def (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          tracer_symbol TEXT NOT NULL,
          delta_mass REAL NOT NULL,
          atom_count INTEGER NOT NULL,
          initial_enrichment REAL NOT NULL,
          final_enrichment REAL NOT NULL
        );
        CREATE TABLE IF NOT EXISTS peptide (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          sequence TEXT NOT NULL,
          protein_name TEXT NOT NULL DEFAULT '',
          protein_description TEXT NOT NULL DEFAULT '',
          max_tracer_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS ms_data_file (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          label TEXT NOT NULL DEFAULT '',
          cohort TEXT NOT NULL DEFAULT '',
          sample TEXT NOT NULL DEFAULT '',
          time_point REAL
        );
        CREATE TABLE IF NOT EXISTS peptide_analysis (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          peptide_id INTEGER NOT NULL,
          note TEXT NOT NULL DEFAULT '',
          min_charge INTEGER NOT NULL,
          max_charge INTEGER NOT NULL,
          excluded_masses TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS peptide_file_analysis (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          peptide_analysis_id INTEGER NOT NULL
            REFERENCES peptide_analysis(id) ON DELETE CASCADE,
          ms_data_file_id INTEGER NOT NULL,
          chromatogram_count INTEGER NOT NULL DEFAULT 0,
          peak_count INTEGER NOT NULL DEFAULT 0,
          note TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_file_analysis_analysis
          ON peptide_file_analysis(peptide_analysis_id);
        CREATE TABLE IF NOT EXISTS change_log (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          workspace_id INTEGER,
          peptide_id INTEGER,
          ms_data_file_id INTEGER,
          peptide_analysis_id INTEGER
        );
        "#,
    )?;
    Ok(())
}

fn peptide_row(row: &Row<'_>) -> rusqlite::Result<PeptideRow> {
    Ok(PeptideRow {
        id: row.get(0)?,
        sequence: row.get(1)?,
        protein_name: row.get(2)?,
        protein_description: row.get(3)?,
        max_tracer_count: row.get(4)?,
    })
}

fn ms_data_file_row(row: &Row<'_>) -> rusqlite::Result<MsDataFileRow> {
    Ok(MsDataFileRow {
        id: row.get(0)?,
        name: row.get(1)?,
        label: row.get(2)?,
        cohort: row.get(3)?,
        sample: row.get(4)?,
        time_point: row.get(5)?,
    })
}

fn analysis_row(row: &Row<'_>) -> rusqlite::Result<PeptideAnalysisRow> {
    Ok(PeptideAnalysisRow {
        id: row.get(0)?,
        peptide_id: row.get(1)?,
        note: row.get(2)?,
        min_charge: row.get(3)?,
        max_charge: row.get(4)?,
        excluded_masses: row.get(5)?,
    })
}

fn file_analysis_row(row: &Row<'_>) -> rusqlite::Result<PeptideFileAnalysisRow> {
    Ok(PeptideFileAnalysisRow {
        id: row.get(0)?,
        peptide_analysis_id: row.get(1)?,
        ms_data_file_id: row.get(2)?,
        chromatogram_count: row.get(3)?,
        peak_count: row.get(4)?,
        note: row.get(5)?,
    })
}

fn change_log_row(row: &Row<'_>) -> rusqlite::Result<ChangeLogRow> {
    Ok(ChangeLogRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        peptide_id: row.get(2)?,
        ms_data_file_id: row.get(3)?,
        peptide_analysis_id: row.get(4)?,
    })
}

/// `{select} WHERE id > ?1 ORDER BY id`
fn select_after<T>(
    conn: &Connection,
    select: &str,
    cursor: i64,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(&format!("{select} WHERE id > ?1 ORDER BY id"))?;
    let rows = stmt.query_map(params![cursor], map)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// `{select} WHERE {column} IN (...) ORDER BY id`, in chunks of
/// [`IN_CHUNK`] ids.
fn select_in<T>(
    conn: &Connection,
    select: &str,
    column: &str,
    ids: &BTreeSet<i64>,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let ids: Vec<i64> = ids.iter().copied().collect();
    let mut out = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(IN_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("{select} WHERE {column} IN ({placeholders}) ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), map)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

impl Store for SqliteStore {
    fn open_session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        let conn = connect(&self.path, self.busy_timeout)?;
        Ok(Box::new(SqliteSession { conn }))
    }
}

struct SqliteSession {
    conn: Connection,
}

impl StoreSession for SqliteSession {
    fn workspace_row(&self) -> Result<Option<WorkspaceRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, data_directory FROM workspace ORDER BY id LIMIT 1",
                [],
                |row| {
                    Ok(WorkspaceRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        data_directory: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn settings(&self) -> Result<Vec<SettingRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, value FROM setting ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(SettingRow {
                id: row.get(0)?,
                name: row.get(1)?,
                value: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn modifications(&self) -> Result<Vec<ModificationRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, symbol, delta_mass FROM modification ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ModificationRow {
                id: row.get(0)?,
                symbol: row.get(1)?,
                delta_mass: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn tracer_defs(&self) -> Result<Vec<TracerDefRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, tracer_symbol, delta_mass, atom_count, initial_enrichment, \
             final_enrichment FROM tracer_def ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TracerDefRow {
                id: row.get(0)?,
                name: row.get(1)?,
                tracer_symbol: row.get(2)?,
                delta_mass: row.get(3)?,
                atom_count: row.get(4)?,
                initial_enrichment: row.get(5)?,
                final_enrichment: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn peptides_after(&self, cursor: i64) -> Result<Vec<PeptideRow>, StoreError> {
        select_after(&self.conn, PEPTIDE_COLUMNS, cursor, peptide_row)
    }

    fn peptides_in(&self, ids: &BTreeSet<i64>) -> Result<Vec<PeptideRow>, StoreError> {
        select_in(&self.conn, PEPTIDE_COLUMNS, "id", ids, peptide_row)
    }

    fn ms_data_files_after(&self, cursor: i64) -> Result<Vec<MsDataFileRow>, StoreError> {
        select_after(&self.conn, MS_DATA_FILE_COLUMNS, cursor, ms_data_file_row)
    }

    fn ms_data_files_in(&self, ids: &BTreeSet<i64>) -> Result<Vec<MsDataFileRow>, StoreError> {
        select_in(&self.conn, MS_DATA_FILE_COLUMNS, "id", ids, ms_data_file_row)
    }

    fn peptide_analysis_ids_after(&self, cursor: i64) -> Result<Vec<i64>, StoreError> {
        select_after(&self.conn, "SELECT id FROM peptide_analysis", cursor, |row| {
            row.get(0)
        })
    }

    fn peptide_analyses_in(
        &self,
        ids: &BTreeSet<i64>,
    ) -> Result<Vec<PeptideAnalysisRow>, StoreError> {
        select_in(&self.conn, ANALYSIS_COLUMNS, "id", ids, analysis_row)
    }

    fn file_analyses_for(
        &self,
        analysis_ids: &BTreeSet<i64>,
    ) -> Result<Vec<PeptideFileAnalysisRow>, StoreError> {
        select_in(
            &self.conn,
            FILE_ANALYSIS_COLUMNS,
            "peptide_analysis_id",
            analysis_ids,
            file_analysis_row,
        )
    }

    fn change_log_after(&self, checkpoint: i64) -> Result<Vec<ChangeLogRow>, StoreError> {
        select_after(&self.conn, CHANGE_LOG_COLUMNS, checkpoint, change_log_row)
    }

    fn max_change_log_id(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM change_log", [], |row| {
                row.get(0)
            })?)
    }

    fn peptide_analysis_snapshots(&self, ids: &BTreeSet<i64>) -> Result<Snapshots, StoreError> {
        // Both queries read from the same database snapshot.
        let tx = self.conn.unchecked_transaction()?;
        let snapshots = load_snapshots(self, ids)?;
        tx.commit()?;
        Ok(snapshots)
    }
}

impl SqliteStore {
    fn with_writer<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut conn = self.writer.lock();
        f(&mut conn)
    }
}

fn expect_one(affected: usize, table: &'static str, id: i64) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(StoreError::MissingRow { table, id });
    }
    Ok(())
}

impl StoreWriter for SqliteStore {
    fn set_workspace(&self, name: &str, data_directory: &str) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let existing: Option<i64> = tx
                .query_row("SELECT id FROM workspace ORDER BY id LIMIT 1", [], |row| {
                    row.get(0)
                })
                .optional()?;
            let id = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE workspace SET name = ?1, data_directory = ?2 WHERE id = ?3",
                        params![name, data_directory, id],
                    )?;
                    id
                }
                None => {
                    tx.execute(
                        "INSERT INTO workspace (name, data_directory) VALUES (?1, ?2)",
                        params![name, data_directory],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            tx.commit()?;
            Ok(id)
        })
    }

    fn put_setting(&self, name: &str, value: &str) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO setting (name, value) VALUES (?1, ?2) \
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![name, value],
            )?;
            Ok(conn.query_row(
                "SELECT id FROM setting WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?)
        })
    }

    fn add_modification(&self, row: ModificationRow) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO modification (symbol, delta_mass) VALUES (?1, ?2)",
                params![row.symbol, row.delta_mass],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn add_tracer_def(&self, row: TracerDefRow) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO tracer_def (name, tracer_symbol, delta_mass, atom_count, \
                 initial_enrichment, final_enrichment) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.name,
                    row.tracer_symbol,
                    row.delta_mass,
                    row.atom_count,
                    row.initial_enrichment,
                    row.final_enrichment
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn insert_peptide(&self, row: PeptideRow) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO peptide (sequence, protein_name, protein_description, \
                 max_tracer_count) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.sequence,
                    row.protein_name,
                    row.protein_description,
                    row.max_tracer_count
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn update_peptide(&self, row: &PeptideRow) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let affected = conn.execute(
                "UPDATE peptide SET sequence = ?1, protein_name = ?2, protein_description = ?3, \
                 max_tracer_count = ?4 WHERE id = ?5",
                params![
                    row.sequence,
                    row.protein_name,
                    row.protein_description,
                    row.max_tracer_count,
                    row.id
                ],
            )?;
            expect_one(affected, "peptide", row.id)
        })
    }

    fn insert_ms_data_file(&self, row: MsDataFileRow) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO ms_data_file (name, label, cohort, sample, time_point) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.name, row.label, row.cohort, row.sample, row.time_point],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn update_ms_data_file(&self, row: &MsDataFileRow) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let affected = conn.execute(
                "UPDATE ms_data_file SET name = ?1, label = ?2, cohort = ?3, sample = ?4, \
                 time_point = ?5 WHERE id = ?6",
                params![
                    row.name,
                    row.label,
                    row.cohort,
                    row.sample,
                    row.time_point,
                    row.id
                ],
            )?;
            expect_one(affected, "ms_data_file", row.id)
        })
    }

    fn insert_peptide_analysis(&self, row: PeptideAnalysisRow) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO peptide_analysis (peptide_id, note, min_charge, max_charge, \
                 excluded_masses) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.peptide_id,
                    row.note,
                    row.min_charge,
                    row.max_charge,
                    row.excluded_masses
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn update_peptide_analysis(&self, row: &PeptideAnalysisRow) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let affected = conn.execute(
                "UPDATE peptide_analysis SET peptide_id = ?1, note = ?2, min_charge = ?3, \
                 max_charge = ?4, excluded_masses = ?5 WHERE id = ?6",
                params![
                    row.peptide_id,
                    row.note,
                    row.min_charge,
                    row.max_charge,
                    row.excluded_masses,
                    row.id
                ],
            )?;
            expect_one(affected, "peptide_analysis", row.id)
        })
    }

    fn delete_peptide_analysis(&self, id: i64) -> Result<bool, StoreError> {
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM peptide_file_analysis WHERE peptide_analysis_id = ?1",
                params![id],
            )?;
            let affected = tx.execute("DELETE FROM peptide_analysis WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(affected > 0)
        })
    }

    fn insert_file_analysis(&self, row: PeptideFileAnalysisRow) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO peptide_file_analysis (peptide_analysis_id, ms_data_file_id, \
                 chromatogram_count, peak_count, note) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.peptide_analysis_id,
                    row.ms_data_file_id,
                    row.chromatogram_count,
                    row.peak_count,
                    row.note
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn update_file_analysis(&self, row: &PeptideFileAnalysisRow) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let affected = conn.execute(
                "UPDATE peptide_file_analysis SET peptide_analysis_id = ?1, ms_data_file_id = ?2, \
                 chromatogram_count = ?3, peak_count = ?4, note = ?5 WHERE id = ?6",
                params![
                    row.peptide_analysis_id,
                    row.ms_data_file_id,
                    row.chromatogram_count,
                    row.peak_count,
                    row.note,
                    row.id
                ],
            )?;
            expect_one(affected, "peptide_file_analysis", row.id)
        })
    }

    fn record_change(&self, row: ChangeLogRow) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO change_log (workspace_id, peptide_id, ms_data_file_id, \
                 peptide_analysis_id) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.workspace_id,
                    row.peptide_id,
                    row.ms_data_file_id,
                    row.peptide_analysis_id
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }
}
