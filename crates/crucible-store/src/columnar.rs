//! Columnar persistence for notebooks, for larger typed data sets.
//!
//! The container is a single SQLite file mirroring the notebook structure:
//! a root key/value table carries the format version, description, current
//! tag, and notebook attributes; a catalog table holds one row per result set
//! (description, lock flag, section name lists, the inferred schema, user
//! attributes, and numeric width overrides); and each set owns a typed
//! `results_<n>` table with one row per record and one column per field,
//! the column type resolved from the inferred kind. A `pending_<n>` table
//! exists only while the set has pending records, keeping archived files
//! clean. `start_time`/`end_time` metadata are stored as native 64-bit
//! epoch-microsecond integers and restored to ISO-8601 text on load.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Transaction};

use crucible_core::{
    metadata_keys, CrucibleError, ErrorInfo, Kind, Params, PendingRecord, ResultRecord, Value,
};

use crate::notebook::{Notebook, Store, FORMAT_VERSION};
use crate::resultset::ResultSet;
use crate::COMMIT_LOCK;

fn sql_error(code: &str, err: impl ToString) -> CrucibleError {
    CrucibleError::Serde(ErrorInfo::new(code, "columnar notebook failure").caused_by(err))
}

fn open(path: &Path) -> Result<Connection, CrucibleError> {
    Connection::open(path).map_err(|err| {
        CrucibleError::Serde(
            ErrorInfo::new("columnar-open", "failed to open columnar notebook")
                .at_path(path.display().to_string())
                .caused_by(err),
        )
    })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Declared SQL type for a field, fitting numeric widths to the observed
/// values unless the set carries a per-field override.
fn column_decl(set: &ResultSet, name: &str, kind: Kind, records: &[ResultRecord]) -> String {
    if is_timestamp(name, kind) {
        return "INT8".to_string();
    }
    match kind {
        Kind::Int => {
            let width = set.width_overrides().get(name).copied().unwrap_or_else(|| {
                let extreme = records
                    .iter()
                    .filter_map(|r| field_of(r, name).and_then(|v| v.as_i64()))
                    .map(i64::unsigned_abs)
                    .max()
                    .unwrap_or(0);
                fit_int_width(extreme)
            });
            format!("INT{}", width.clamp(1, 8))
        }
        Kind::Float => match set.width_overrides().get(name) {
            Some(4) => "REAL4".to_string(),
            _ => "REAL".to_string(),
        },
        Kind::Bool => "BOOLEAN".to_string(),
        _ => "TEXT".to_string(),
    }
}

fn fit_int_width(extreme: u64) -> u8 {
    if extreme <= i8::MAX as u64 {
        1
    } else if extreme <= i16::MAX as u64 {
        2
    } else if extreme <= i32::MAX as u64 {
        4
    } else {
        8
    }
}

fn is_timestamp(name: &str, kind: Kind) -> bool {
    kind == Kind::Text
        && (name == metadata_keys::START_TIME || name == metadata_keys::END_TIME)
}

fn field_of<'a>(record: &'a ResultRecord, name: &str) -> Option<&'a Value> {
    record
        .metadata
        .get(name)
        .or_else(|| record.parameters.get(name))
        .or_else(|| record.results.get(name))
}

/// Canonical column order for a set: metadata, then parameters, then results,
/// names sorted within each section.
fn column_names(set: &ResultSet) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    names.extend(set.metadata_names().iter().cloned());
    names.extend(set.parameter_names().iter().cloned());
    names.extend(set.result_names().iter().cloned());
    names
}

// ---------- saving ----------

pub(crate) fn save(notebook: &Notebook, path: &Path) -> Result<(), CrucibleError> {
    let _guard = COMMIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut conn = open(path)?;
    let tx = conn.transaction().map_err(|err| sql_error("columnar-tx", err))?;

    drop_all_tables(&tx)?;
    tx.execute_batch(
        "CREATE TABLE notebook_meta(key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE notebook_attributes(key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE result_sets(
             set_id INTEGER PRIMARY KEY,
             tag TEXT NOT NULL UNIQUE,
             position INTEGER NOT NULL,
             description TEXT NOT NULL,
             locked INTEGER NOT NULL,
             attributes TEXT NOT NULL,
             parameter_names TEXT NOT NULL,
             result_names TEXT NOT NULL,
             metadata_names TEXT NOT NULL,
             schema TEXT NOT NULL,
             width_overrides TEXT NOT NULL
         );",
    )
    .map_err(|err| sql_error("columnar-schema", err))?;

    let meta: &[(&str, String)] = &[
        ("version", FORMAT_VERSION.to_string()),
        ("description", notebook.description().to_string()),
        ("current_tag", notebook.current_tag().to_string()),
        ("locked", i64::from(notebook.is_locked()).to_string()),
    ];
    for (key, value) in meta {
        tx.execute(
            "INSERT INTO notebook_meta(key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )
        .map_err(|err| sql_error("columnar-meta", err))?;
    }
    for (key, value) in notebook.attributes() {
        tx.execute(
            "INSERT INTO notebook_attributes(key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )
        .map_err(|err| sql_error("columnar-attrs", err))?;
    }

    for (position, (tag, set)) in notebook.result_sets().enumerate() {
        save_set(&tx, position as i64, tag, set)?;
    }

    tx.commit().map_err(|err| sql_error("columnar-commit", err))
}

fn drop_all_tables(tx: &Transaction<'_>) -> Result<(), CrucibleError> {
    let names: Vec<String> = {
        let mut stmt = tx
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .map_err(|err| sql_error("columnar-introspect", err))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|err| sql_error("columnar-introspect", err))?;
        rows.collect::<Result<_, _>>()
            .map_err(|err| sql_error("columnar-introspect", err))?
    };
    for name in names {
        if name.starts_with("sqlite_") {
            continue;
        }
        tx.execute_batch(&format!("DROP TABLE {}", quote_ident(&name)))
            .map_err(|err| sql_error("columnar-drop", err))?;
    }
    Ok(())
}

fn save_set(
    tx: &Transaction<'_>,
    position: i64,
    tag: &str,
    set: &ResultSet,
) -> Result<(), CrucibleError> {
    let records = set.records();
    let columns = column_names(set);

    let schema_json = serde_json::to_string(set.schema())
        .map_err(|err| sql_error("columnar-encode", err))?;
    let attrs_json = serde_json::to_string(set.attributes())
        .map_err(|err| sql_error("columnar-encode", err))?;
    let overrides_json = serde_json::to_string(set.width_overrides())
        .map_err(|err| sql_error("columnar-encode", err))?;
    let names_json = |names: &[String]| -> Result<String, CrucibleError> {
        serde_json::to_string(names).map_err(|err| sql_error("columnar-encode", err))
    };

    tx.execute(
        "INSERT INTO result_sets(set_id, tag, position, description, locked, attributes,
                                 parameter_names, result_names, metadata_names, schema, width_overrides)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            position,
            tag,
            position,
            set.description(),
            i64::from(set.is_locked()),
            attrs_json,
            names_json(set.parameter_names())?,
            names_json(set.result_names())?,
            names_json(set.metadata_names())?,
            schema_json,
            overrides_json,
        ],
    )
    .map_err(|err| sql_error("columnar-catalog", err))?;

    // results dataset; a set that has never seen a record has no columns yet
    // and therefore no table
    if columns.is_empty() {
        return Ok(());
    }
    check_array_shapes(set, &columns, &records)?;
    let decls: Vec<String> = columns
        .iter()
        .map(|name| {
            let kind = set.schema().kind_of(name).unwrap_or(Kind::Text);
            format!("{} {}", quote_ident(name), column_decl(set, name, kind, &records))
        })
        .collect();
    let table = format!("results_{position}");
    tx.execute_batch(&format!("CREATE TABLE {table} ({})", decls.join(", ")))
        .map_err(|err| sql_error("columnar-create", err))?;

    if !records.is_empty() {
        let placeholders: Vec<String> =
            (1..=columns.len()).map(|idx| format!("?{idx}")).collect();
        let quoted: Vec<String> = columns.iter().map(|name| quote_ident(name)).collect();
        let insert = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            quoted.join(", "),
            placeholders.join(", ")
        );
        let mut stmt = tx
            .prepare(&insert)
            .map_err(|err| sql_error("columnar-insert", err))?;
        for record in &records {
            let cells: Vec<SqlValue> = columns
                .iter()
                .map(|name| {
                    let kind = set.schema().kind_of(name).unwrap_or(Kind::Text);
                    let value = field_of(record, name).cloned().unwrap_or_else(|| kind.zero());
                    store_cell(&value, kind, name)
                })
                .collect::<Result<_, _>>()?;
            stmt.execute(params_from_iter(cells))
                .map_err(|err| sql_error("columnar-insert", err))?;
        }
    }

    // pending dataset, absent when there are no pending records
    if !set.pending_records().is_empty() {
        save_pending(tx, position, set)?;
    }
    Ok(())
}

fn save_pending(tx: &Transaction<'_>, position: i64, set: &ResultSet) -> Result<(), CrucibleError> {
    let names: Vec<String> = set.parameter_names().to_vec();
    let mut decls: Vec<String> = names
        .iter()
        .map(|name| {
            let kind = set.schema().kind_of(name).unwrap_or(Kind::Text);
            format!("{} {}", quote_ident(name), column_decl(set, name, kind, &[]))
        })
        .collect();
    decls.push("\"job_id\" TEXT NOT NULL".to_string());
    let table = format!("pending_{position}");
    tx.execute_batch(&format!("CREATE TABLE {table} ({})", decls.join(", ")))
        .map_err(|err| sql_error("columnar-create", err))?;

    let placeholders: Vec<String> = (1..=names.len() + 1).map(|idx| format!("?{idx}")).collect();
    let mut quoted: Vec<String> = names.iter().map(|name| quote_ident(name)).collect();
    quoted.push("\"job_id\"".to_string());
    let insert = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        quoted.join(", "),
        placeholders.join(", ")
    );
    let mut stmt = tx
        .prepare(&insert)
        .map_err(|err| sql_error("columnar-insert", err))?;
    for entry in set.pending_records() {
        let mut cells: Vec<SqlValue> = Vec::with_capacity(names.len() + 1);
        for name in &names {
            let kind = set.schema().kind_of(name).unwrap_or(Kind::Text);
            let value = entry
                .parameters
                .get(name)
                .map(|v| v.coerce(kind))
                .unwrap_or_else(|| kind.zero());
            cells.push(store_cell(&value, kind, name)?);
        }
        cells.push(SqlValue::Text(entry.job_id.clone()));
        stmt.execute(params_from_iter(cells))
            .map_err(|err| sql_error("columnar-insert", err))?;
    }
    Ok(())
}

/// Array columns must hold rank-1 arrays of a consistent length. Empty arrays
/// are allowed anywhere: they are how a record that never carried the field
/// reads back, and they must survive a round trip as empty rather than being
/// widened to the column length.
fn check_array_shapes(
    set: &ResultSet,
    columns: &[String],
    records: &[ResultRecord],
) -> Result<(), CrucibleError> {
    for name in columns {
        let kind = set.schema().kind_of(name).unwrap_or(Kind::Text);
        if !kind.is_array() {
            continue;
        }
        let mut column_len: Option<usize> = None;
        for record in records {
            let len = field_of(record, name).and_then(Value::array_len).unwrap_or(0);
            if len == 0 {
                continue;
            }
            match column_len {
                None => column_len = Some(len),
                Some(existing) if existing == len => {}
                Some(existing) => {
                    return Err(CrucibleError::ResultsStructure(
                        ErrorInfo::new(
                            "columnar-ragged-array",
                            format!("array column rows have differing shapes ({existing} vs {len})"),
                        )
                        .at_field(name.clone()),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn store_cell(value: &Value, kind: Kind, name: &str) -> Result<SqlValue, CrucibleError> {
    if is_timestamp(name, kind) {
        if let Value::Text(text) = value {
            if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
                return Ok(SqlValue::Integer(stamp.timestamp_micros()));
            }
            return Ok(SqlValue::Text(text.clone()));
        }
    }
    Ok(match value.coerce(kind) {
        Value::Int(v) => SqlValue::Integer(v),
        Value::Float(v) => SqlValue::Real(v),
        Value::Bool(v) => SqlValue::Integer(i64::from(v)),
        Value::Text(v) => SqlValue::Text(v),
        other => {
            let json = serde_json::to_string(&other)
                .map_err(|err| sql_error("columnar-encode", err))?;
            SqlValue::Text(json)
        }
    })
}

// ---------- loading ----------

pub(crate) fn load(path: &Path) -> Result<Notebook, CrucibleError> {
    let conn = open(path)?;

    let version: String = conn
        .query_row("SELECT value FROM notebook_meta WHERE key = 'version'", [], |row| row.get(0))
        .map_err(|err| {
            CrucibleError::NotebookVersion(
                ErrorInfo::new("columnar-version", "file is not a columnar notebook")
                    .at_path(path.display().to_string())
                    .caused_by(err),
            )
        })?;
    if version != FORMAT_VERSION.to_string() {
        return Err(CrucibleError::NotebookVersion(
            ErrorInfo::new(
                "columnar-version",
                format!("unsupported notebook format version {version}"),
            )
            .at_path(path.display().to_string()),
        ));
    }
    let meta_value = |key: &str| -> Result<String, CrucibleError> {
        conn.query_row(
            "SELECT value FROM notebook_meta WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .map_err(|err| sql_error("columnar-meta", err))
    };
    let description = meta_value("description")?;
    let current_tag = meta_value("current_tag")?;
    let locked = meta_value("locked")? == "1";

    let mut attributes = BTreeMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT key, value FROM notebook_attributes")
            .map_err(|err| sql_error("columnar-attrs", err))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|err| sql_error("columnar-attrs", err))?;
        for row in rows {
            let (key, value) = row.map_err(|err| sql_error("columnar-attrs", err))?;
            attributes.insert(key, value);
        }
    }

    let mut sets = IndexMap::new();
    let catalog = load_catalog(&conn)?;
    for entry in catalog {
        let set = load_set(&conn, &entry)?;
        sets.insert(entry.tag.clone(), set);
    }

    Ok(Notebook::from_loaded(
        Store::Columnar(path.to_path_buf()),
        path.display().to_string(),
        description,
        attributes,
        sets,
        current_tag,
        locked,
    ))
}

struct CatalogEntry {
    set_id: i64,
    tag: String,
    description: String,
    locked: bool,
    attributes: BTreeMap<String, String>,
    parameter_names: Vec<String>,
    result_names: Vec<String>,
    metadata_names: Vec<String>,
    kinds: BTreeMap<String, Kind>,
    width_overrides: BTreeMap<String, u8>,
}

fn load_catalog(conn: &Connection) -> Result<Vec<CatalogEntry>, CrucibleError> {
    let mut stmt = conn
        .prepare(
            "SELECT set_id, tag, description, locked, attributes, parameter_names,
                    result_names, metadata_names, schema, width_overrides
             FROM result_sets ORDER BY position",
        )
        .map_err(|err| sql_error("columnar-catalog", err))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })
        .map_err(|err| sql_error("columnar-catalog", err))?;

    let mut entries = Vec::new();
    for row in rows {
        let (set_id, tag, description, locked, attrs, pnames, rnames, mnames, schema, overrides) =
            row.map_err(|err| sql_error("columnar-catalog", err))?;
        let schema: crucible_core::Schema =
            serde_json::from_str(&schema).map_err(|err| sql_error("columnar-decode", err))?;
        let kinds = schema
            .fields()
            .map(|field| (field.name.clone(), field.kind))
            .collect();
        entries.push(CatalogEntry {
            set_id,
            tag,
            description,
            locked: locked != 0,
            attributes: serde_json::from_str(&attrs)
                .map_err(|err| sql_error("columnar-decode", err))?,
            parameter_names: serde_json::from_str(&pnames)
                .map_err(|err| sql_error("columnar-decode", err))?,
            result_names: serde_json::from_str(&rnames)
                .map_err(|err| sql_error("columnar-decode", err))?,
            metadata_names: serde_json::from_str(&mnames)
                .map_err(|err| sql_error("columnar-decode", err))?,
            kinds,
            width_overrides: serde_json::from_str(&overrides)
                .map_err(|err| sql_error("columnar-decode", err))?,
        });
    }
    Ok(entries)
}

fn load_set(conn: &Connection, entry: &CatalogEntry) -> Result<ResultSet, CrucibleError> {
    let mut columns: Vec<String> = Vec::new();
    columns.extend(entry.metadata_names.iter().cloned());
    columns.extend(entry.parameter_names.iter().cloned());
    columns.extend(entry.result_names.iter().cloned());

    let mut records = Vec::new();
    if !columns.is_empty() {
        let quoted: Vec<String> = columns.iter().map(|name| quote_ident(name)).collect();
        let select = format!(
            "SELECT {} FROM results_{} ORDER BY rowid",
            quoted.join(", "),
            entry.set_id
        );
        let mut stmt = conn
            .prepare(&select)
            .map_err(|err| sql_error("columnar-select", err))?;
        let mut rows = stmt.query([]).map_err(|err| sql_error("columnar-select", err))?;
        while let Some(row) = rows.next().map_err(|err| sql_error("columnar-select", err))? {
            let mut record = ResultRecord::default();
            for (idx, name) in columns.iter().enumerate() {
                let kind = entry.kinds.get(name).copied().unwrap_or(Kind::Text);
                let cell = row
                    .get_ref(idx)
                    .map_err(|err| sql_error("columnar-select", err))?;
                let value = read_cell(cell, kind, name)?;
                if entry.metadata_names.contains(name) {
                    record.metadata.insert(name.clone(), value);
                } else if entry.parameter_names.contains(name) {
                    record.parameters.insert(name.clone(), value);
                } else {
                    record.results.insert(name.clone(), value);
                }
            }
            records.push(record);
        }
    }

    let pending = load_pending(conn, entry)?;
    let mut set = ResultSet::from_parts(
        entry.description.clone(),
        entry.locked,
        entry.attributes.clone(),
        records,
        pending,
    );
    set.restore_width_overrides(entry.width_overrides.clone());
    Ok(set)
}

fn load_pending(
    conn: &Connection,
    entry: &CatalogEntry,
) -> Result<Vec<PendingRecord>, CrucibleError> {
    let table = format!("pending_{}", entry.set_id);
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&table],
            |row| row.get(0),
        )
        .map_err(|err| sql_error("columnar-introspect", err))?;
    if exists == 0 {
        return Ok(Vec::new());
    }

    let mut quoted: Vec<String> = entry
        .parameter_names
        .iter()
        .map(|name| quote_ident(name))
        .collect();
    quoted.push("\"job_id\"".to_string());
    let select = format!("SELECT {} FROM {table} ORDER BY rowid", quoted.join(", "));
    let mut stmt = conn
        .prepare(&select)
        .map_err(|err| sql_error("columnar-select", err))?;
    let mut rows = stmt.query([]).map_err(|err| sql_error("columnar-select", err))?;

    let mut pending = Vec::new();
    while let Some(row) = rows.next().map_err(|err| sql_error("columnar-select", err))? {
        let mut params = Params::new();
        for (idx, name) in entry.parameter_names.iter().enumerate() {
            let kind = entry.kinds.get(name).copied().unwrap_or(Kind::Text);
            let cell = row
                .get_ref(idx)
                .map_err(|err| sql_error("columnar-select", err))?;
            params.insert(name.clone(), read_cell(cell, kind, name)?);
        }
        let job_id: String = row
            .get(entry.parameter_names.len())
            .map_err(|err| sql_error("columnar-select", err))?;
        pending.push(PendingRecord::new(params, job_id));
    }
    Ok(pending)
}

fn read_cell(cell: ValueRef<'_>, kind: Kind, name: &str) -> Result<Value, CrucibleError> {
    if is_timestamp(name, kind) {
        if let ValueRef::Integer(micros) = cell {
            let stamp = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
                sql_error("columnar-timestamp", format!("timestamp {micros} out of range"))
            })?;
            return Ok(Value::Text(stamp.to_rfc3339()));
        }
    }
    let value = match (cell, kind) {
        (ValueRef::Integer(v), Kind::Bool) => Value::Bool(v != 0),
        (ValueRef::Integer(v), Kind::Float) => Value::Float(v as f64),
        (ValueRef::Integer(v), _) => Value::Int(v),
        (ValueRef::Real(v), _) => Value::Float(v),
        (ValueRef::Null, _) => kind.zero(),
        (ValueRef::Text(bytes), _) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|err| sql_error("columnar-decode", err))?;
            if kind.is_array() || kind == Kind::Complex {
                let json: serde_json::Value = serde_json::from_str(text)
                    .map_err(|err| sql_error("columnar-decode", err))?;
                Value::from_json(&json).map_err(|err| sql_error("columnar-decode", err))?
            } else {
                Value::Text(text.to_string())
            }
        }
        (ValueRef::Blob(_), _) => {
            return Err(CrucibleError::ResultsStructure(
                ErrorInfo::new("columnar-blob", "unexpected blob column in notebook")
                    .at_field(name),
            ))
        }
    };
    Ok(value.coerce(kind))
}
