//! SQLite record sink
//!
//! Scraped fields are written to a table described by the [`SinkBinding`]:
//! one row per URL, one column per bound extraction field.

use crate::config::SinkBinding;
use crate::storage::schema::quote_identifier;
use crate::storage::traits::{RecordSink, StorageError, StorageResult};
use crate::storage::{FieldMap, StoredRecord};
use rusqlite::{params_from_iter, Connection};
use std::collections::HashSet;
use std::path::Path;

/// SQLite has a bound-parameter limit, so URL lookups are chunked
const LOOKUP_CHUNK: usize = 500;

/// Record sink backed by a table in a SQLite database
pub struct SqliteSink {
    conn: Connection,
    binding: SinkBinding,
}

impl SqliteSink {
    /// Opens the sink table, creating it first when the binding allows
    pub fn open(path: &Path, binding: SinkBinding) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        Self::from_connection(conn, binding)
    }

    /// Wraps an existing connection
    pub fn from_connection(conn: Connection, binding: SinkBinding) -> StorageResult<Self> {
        let sink = Self { conn, binding };
        if sink.binding.create_if_missing {
            sink.ensure_table()?;
        }
        sink.verify_schema()?;
        Ok(sink)
    }

    pub fn binding(&self) -> &SinkBinding {
        &self.binding
    }

    fn ensure_table(&self) -> StorageResult<()> {
        let mut columns = vec![
            "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            format!("{} TEXT NOT NULL UNIQUE", quote_identifier(&self.binding.url_column)),
        ];
        columns.extend(
            self.bound_columns()
                .into_iter()
                .map(|c| format!("{} TEXT", quote_identifier(c))),
        );

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(&self.binding.table),
            columns.join(", ")
        );
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    /// Checks that the table exists and has every bound column
    fn verify_schema(&self) -> StorageResult<()> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(&self.binding.table));
        let mut stmt = self.conn.prepare(&sql)?;
        let existing = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;

        if existing.is_empty() {
            return Err(StorageError::SchemaMismatch(format!(
                "table '{}' does not exist",
                self.binding.table
            )));
        }

        let missing: Vec<&str> = std::iter::once(self.binding.url_column.as_str())
            .chain(self.bound_columns())
            .filter(|c| !existing.contains(*c))
            .collect();

        if !missing.is_empty() {
            return Err(StorageError::SchemaMismatch(format!(
                "table '{}' is missing columns: {}",
                self.binding.table,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    fn bound_columns(&self) -> Vec<&str> {
        self.binding.fields.values().map(String::as_str).collect()
    }

    fn column_for(&self, field: &str) -> StorageResult<&str> {
        self.binding
            .column_for(field)
            .ok_or_else(|| StorageError::UnboundField(field.to_string()))
    }
}

impl RecordSink for SqliteSink {
    fn field_names(&self) -> Vec<String> {
        self.binding.fields.keys().cloned().collect()
    }

    fn find_by_urls(&self, urls: &[&str]) -> StorageResult<Vec<StoredRecord>> {
        let fields: Vec<(&String, &String)> = self.binding.fields.iter().collect();
        let select = std::iter::once(quote_identifier(&self.binding.url_column))
            .chain(fields.iter().map(|(_, column)| quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut records = Vec::new();
        for chunk in urls.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                select,
                quote_identifier(&self.binding.table),
                quote_identifier(&self.binding.url_column),
                placeholders
            );

            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                let url: String = row.get(0)?;
                let mut values = FieldMap::new();
                for (i, (field, _)) in fields.iter().enumerate() {
                    if let Some(value) = row.get::<_, Option<String>>(i + 1)? {
                        values.insert((*field).clone(), value);
                    }
                }
                Ok(StoredRecord::new(url, values))
            })?;

            for record in rows {
                records.push(record?);
            }
        }

        Ok(records)
    }

    fn update_fields(&mut self, url: &str, fields: &FieldMap) -> StorageResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut assignments = Vec::with_capacity(fields.len());
        let mut values: Vec<&str> = Vec::with_capacity(fields.len() + 1);
        for (i, (field, value)) in fields.iter().enumerate() {
            let column = self.column_for(field)?;
            assignments.push(format!("{} = ?{}", quote_identifier(column), i + 1));
            values.push(value);
        }
        values.push(url);

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_identifier(&self.binding.table),
            assignments.join(", "),
            quote_identifier(&self.binding.url_column),
            values.len()
        );
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn bulk_insert(&mut self, records: &[StoredRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        // Resolve every column up front so an unbound field aborts before any write
        let mut statements = Vec::with_capacity(records.len());
        for record in records {
            let mut columns = vec![quote_identifier(&self.binding.url_column)];
            let mut values: Vec<&str> = vec![record.url.as_str()];
            for (field, value) in &record.fields {
                columns.push(quote_identifier(self.column_for(field)?));
                values.push(value);
            }

            let placeholders = (1..=columns.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_identifier(&self.binding.table),
                columns.join(", "),
                placeholders
            );
            statements.push((sql, values));
        }

        let tx = self.conn.transaction()?;
        for (sql, values) in &statements {
            let mut stmt = tx.prepare_cached(sql)?;
            stmt.execute(params_from_iter(values.iter()))?;
        }
        tx.commit()?;
        Ok(())
    }
}
