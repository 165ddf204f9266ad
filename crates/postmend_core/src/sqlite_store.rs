use std::path::PathBuf;
use std::time::Duration;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, params};
use serde_json::{Map, Number, Value};

use crate::record::{BODY_FIELD, ContentRecord, ID_FIELD, RecordId};
use crate::store::{ContentStore, StoreError, normalize_path, records_from_values};

/// A table in the migrated database-backed setup (`blogs`, `news`). Every column is
/// surfaced as a record field; saves only ever rewrite the `body` column.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
    table: String,
}

impl SqliteStore {
    pub fn new(db_path: impl Into<PathBuf>, table: &str) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        if !is_plain_identifier(table) {
            return Err(StoreError::unavailable(
                normalize_path(&db_path),
                format!("invalid table name `{table}`"),
            ));
        }
        Ok(Self {
            db_path,
            table: table.to_string(),
        })
    }

    fn location(&self) -> String {
        format!("{}#{}", normalize_path(&self.db_path), self.table)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        let location = self.location();
        if !self.db_path.exists() {
            return Err(StoreError::unavailable(&location, "database file does not exist"));
        }
        let connection = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| StoreError::unavailable(&location, format!("failed to open: {err}")))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .map_err(|err| {
                StoreError::unavailable(&location, format!("failed to set busy timeout: {err}"))
            })?;
        Ok(connection)
    }
}

impl ContentStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<ContentRecord>, StoreError> {
        let location = self.location();
        let connection = self.open()?;
        let sql = format!("SELECT * FROM {} ORDER BY rowid", self.table);
        let mut statement = connection
            .prepare(&sql)
            .map_err(|err| StoreError::unavailable(&location, format!("failed to query: {err}")))?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let rows = statement
            .query_map([], |row| {
                let mut fields = Map::new();
                for (index, column) in columns.iter().enumerate() {
                    let value = match row.get_ref(index)? {
                        ValueRef::Null => Value::Null,
                        ValueRef::Integer(number) => Value::from(number),
                        ValueRef::Real(number) => {
                            Number::from_f64(number).map_or(Value::Null, Value::Number)
                        }
                        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                            Ok(text) => Value::String(text.to_string()),
                            Err(err) => {
                                return Err(rusqlite::Error::FromSqlConversionFailure(
                                    index,
                                    rusqlite::types::Type::Text,
                                    Box::new(err),
                                ));
                            }
                        },
                        ValueRef::Blob(_) => {
                            return Err(rusqlite::Error::InvalidColumnType(
                                index,
                                column.clone(),
                                rusqlite::types::Type::Blob,
                            ));
                        }
                    };
                    fields.insert(column.clone(), value);
                }
                Ok(Value::Object(fields))
            })
            .map_err(|err| StoreError::unavailable(&location, format!("failed to query: {err}")))?;

        let mut values = Vec::new();
        for row in rows {
            values.push(
                row.map_err(|err| {
                    StoreError::unavailable(&location, format!("failed to read row: {err}"))
                })?,
            );
        }
        records_from_values(&location, values)
    }

    fn save_all(&self, records: &[ContentRecord]) -> Result<(), StoreError> {
        let location = self.location();
        let mut connection = self.open()?;
        let transaction = connection.transaction().map_err(|err| {
            StoreError::unavailable(&location, format!("failed to begin transaction: {err}"))
        })?;
        {
            // Rows whose body is unchanged are not written at all.
            let sql = format!(
                "UPDATE {} SET {BODY_FIELD} = ?1 WHERE {ID_FIELD} = ?2 AND {BODY_FIELD} IS NOT ?1",
                self.table
            );
            let mut statement = transaction.prepare(&sql).map_err(|err| {
                StoreError::unavailable(&location, format!("failed to prepare update: {err}"))
            })?;
            for record in records {
                let body = record
                    .fields()
                    .get(BODY_FIELD)
                    .map_or(SqlValue::Null, json_to_sql);
                statement
                    .execute(params![body, id_to_sql(record.id())])
                    .map_err(|err| {
                        StoreError::unavailable(
                            &location,
                            format!("failed to update id {}: {err}", record.id()),
                        )
                    })?;
            }
        }
        // Dropping an uncommitted transaction rolls it back.
        transaction
            .commit()
            .map_err(|err| StoreError::unavailable(&location, format!("failed to commit: {err}")))
    }

    fn describe(&self) -> String {
        self.location()
    }
}

fn id_to_sql(id: &RecordId) -> SqlValue {
    match id {
        RecordId::Int(id) => SqlValue::Integer(*id),
        RecordId::Text(id) => SqlValue::Text(id.clone()),
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => number
                .as_f64()
                .map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
