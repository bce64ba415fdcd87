//! SQLite-based list storage
//!
//! List metadata and continuation tokens live in the migrated `lists`
//! table. Items live in one table per tracked list, created at runtime from
//! the list's [`ResourceSchema`]: four metadata columns followed by the
//! mapped columns, declared without a type so any JSON scalar fits.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, anyhow};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use rusqlite_migration::{M, Migrations};
use serde_json::Value;

use super::ListStore;
use crate::error::{Result, SyncError};
use crate::models::{ITEM_METADATA_COLUMNS, ItemRecord, ListRecord, ResourceRef, ResourceSchema};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: list metadata and continuation tokens
        M::up(
            r#"
            CREATE TABLE lists (
                site_id TEXT NOT NULL,
                id TEXT NOT NULL,
                etag TEXT NOT NULL,
                name TEXT NOT NULL,
                display_name TEXT NOT NULL,
                delta_link TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (site_id, id)
            );
            "#,
        ),
    ])
}

/// SQLite-based list storage
pub struct SqliteListStore {
    conn: Mutex<Connection>,
}

impl SqliteListStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets webhook-triggered passes read while another list writes;
        // NORMAL sync is safe under WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))
    }

    /// Run `body` in a transaction: commit on success, roll back on error
    fn with_transaction<T>(
        &self,
        body: impl FnOnce(&Transaction<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // Dropping an uncommitted transaction rolls it back
        let value = body(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }

    fn existing_columns(conn: &Connection, table: &str) -> anyhow::Result<HashSet<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns.into_iter().map(|c| c.to_ascii_lowercase()).collect())
    }

    fn upsert_statement(schema: &ResourceSchema) -> String {
        let columns: Vec<String> = ITEM_METADATA_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(schema.columns.iter().map(|c| format!("\"{}\"", c.column)))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let assignments: Vec<String> = columns
            .iter()
            .skip(1)
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();

        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
            schema.table,
            columns.join(", "),
            placeholders.join(", "),
            assignments.join(", ")
        )
    }

    fn item_values(schema: &ResourceSchema, item: &ItemRecord) -> Vec<SqlValue> {
        let mut values = vec![
            SqlValue::Text(item.id.clone()),
            SqlValue::Text(item.list_id.clone()),
            SqlValue::Text(item.site_id.clone()),
            SqlValue::Text(item.revision.clone()),
        ];
        values.extend(
            schema
                .columns
                .iter()
                .map(|c| json_to_sql(item.fields.get(&c.field))),
        );
        values
    }

    fn write_items(tx: &Transaction<'_>, schema: &ResourceSchema, items: &[ItemRecord]) -> anyhow::Result<()> {
        let mut stmt = tx
            .prepare_cached(&Self::upsert_statement(schema))
            .with_context(|| format!("Failed to prepare upsert for table {}", schema.table))?;
        for item in items {
            stmt.execute(params_from_iter(Self::item_values(schema, item)))
                .with_context(|| format!("Failed to write item {} into {}", item.id, schema.table))?;
        }
        Ok(())
    }
}

fn json_to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        // Lookup and multi-choice fields are kept as their JSON text
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => Value::from(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::from(bytes),
    }
}

impl ListStore for SqliteListStore {
    fn get_list(&self, resource: &ResourceRef) -> Result<Option<ListRecord>> {
        let conn = self.lock()?;
        let list = conn
            .query_row(
                "SELECT id, site_id, etag, name, display_name, delta_link
                 FROM lists WHERE site_id = ?1 AND id = ?2",
                params![resource.site_id, resource.list_id],
                |row| {
                    Ok(ListRecord {
                        id: row.get(0)?,
                        site_id: row.get(1)?,
                        revision: row.get(2)?,
                        name: row.get(3)?,
                        display_name: row.get(4)?,
                        continuation_token: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(list)
    }

    fn upsert_lists(&self, lists: &[ListRecord]) -> Result<()> {
        self.with_transaction(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO lists (site_id, id, etag, name, display_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(site_id, id) DO UPDATE SET
                    etag = excluded.etag,
                    name = excluded.name,
                    display_name = excluded.display_name,
                    updated_at = datetime('now')",
            )?;
            for list in lists {
                stmt.execute(params![list.site_id, list.id, list.revision, list.name, list.display_name])
                    .with_context(|| format!("Failed to upsert list {}/{}", list.site_id, list.id))?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn delete_list(&self, resource: &ResourceRef) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM lists WHERE site_id = ?1 AND id = ?2",
            params![resource.site_id, resource.list_id],
        )?;
        Ok(())
    }

    fn get_continuation_token(&self, resource: &ResourceRef) -> Result<Option<String>> {
        let conn = self.lock()?;
        let token: Option<Option<String>> = conn
            .query_row(
                "SELECT delta_link FROM lists WHERE site_id = ?1 AND id = ?2",
                params![resource.site_id, resource.list_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token.flatten())
    }

    fn set_continuation_token(&self, resource: &ResourceRef, token: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE lists SET delta_link = ?3 WHERE site_id = ?1 AND id = ?2",
            params![resource.site_id, resource.list_id, token],
        )?;
        if changed == 0 {
            return Err(SyncError::store(format!(
                "cannot store continuation token: no list row for {}",
                resource
            )));
        }
        Ok(())
    }

    fn clear_continuation_token(&self, resource: &ResourceRef) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE lists SET delta_link = NULL WHERE site_id = ?1 AND id = ?2",
            params![resource.site_id, resource.list_id],
        )?;
        Ok(())
    }

    fn prepare_items(&self, schema: &ResourceSchema) -> Result<()> {
        schema.validate()?;
        self.with_transaction(|tx| {
            let mapped: Vec<String> = schema
                .columns
                .iter()
                .map(|c| format!(",\n    \"{}\"", c.column))
                .collect();
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
    id TEXT PRIMARY KEY,
    list_id TEXT NOT NULL,
    site_id TEXT NOT NULL,
    etag TEXT NOT NULL{}
);",
                schema.table,
                mapped.concat()
            ))
            .with_context(|| format!("Failed to create item table {}", schema.table))?;

            // Columns mapped after the table was first created
            let existing = Self::existing_columns(tx, &schema.table)?;
            for mapping in &schema.columns {
                if !existing.contains(&mapping.column.to_ascii_lowercase()) {
                    log::info!("Adding column {} to {}", mapping.column, schema.table);
                    tx.execute_batch(&format!(
                        "ALTER TABLE \"{}\" ADD COLUMN \"{}\";",
                        schema.table, mapping.column
                    ))?;
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    fn get_items(&self, schema: &ResourceSchema, resource: &ResourceRef) -> Result<Vec<ItemRecord>> {
        let conn = self.lock()?;
        let mapped: String = schema
            .columns
            .iter()
            .map(|c| format!(", \"{}\"", c.column))
            .collect();
        let sql = format!(
            "SELECT id, list_id, site_id, etag{} FROM \"{}\"
             WHERE site_id = ?1 AND list_id = ?2 ORDER BY id",
            mapped, schema.table
        );

        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("Failed to read items from {}", schema.table))?;
        let items = stmt
            .query_map(params![resource.site_id, resource.list_id], |row| {
                let mut item = ItemRecord {
                    id: row.get(0)?,
                    list_id: row.get(1)?,
                    site_id: row.get(2)?,
                    revision: row.get(3)?,
                    fields: Default::default(),
                };
                for (offset, mapping) in schema.columns.iter().enumerate() {
                    let value: SqlValue = row.get(ITEM_METADATA_COLUMNS.len() + offset)?;
                    item.fields.insert(mapping.field.clone(), sql_to_json(value));
                }
                Ok(item)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn upsert_items(&self, schema: &ResourceSchema, items: &[ItemRecord]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.with_transaction(|tx| Self::write_items(tx, schema, items))?;
        Ok(())
    }

    fn update_item(&self, schema: &ResourceSchema, item: &ItemRecord) -> Result<()> {
        self.with_transaction(|tx| Self::write_items(tx, schema, std::slice::from_ref(item)))?;
        Ok(())
    }

    fn delete_item(&self, schema: &ResourceSchema, id: &str) -> Result<()> {
        self.with_transaction(|tx| {
            tx.execute(&format!("DELETE FROM \"{}\" WHERE id = ?1", schema.table), params![id])
                .with_context(|| format!("Failed to delete item {} from {}", id, schema.table))?;
            Ok(())
        })?;
        Ok(())
    }
}
