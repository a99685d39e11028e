//! Database operations for the records table.

use sqlx::{types::Json, PgConnection, Row};
use std::collections::BTreeMap;
use tether_engine::{Accepted, Fields, Record, RecordId, TableName, Timestamp};

/// Stored records keyed by table and id.
pub type RecordMap = BTreeMap<TableName, BTreeMap<RecordId, Accepted>>;

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub table_name: String,
    pub record_id: RecordId,
    pub fields: Json<Fields>,
    pub deleted: bool,
    pub updated_at: i64,
    pub client_updated_at: i64,
    pub created_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            table_name: row.try_get("table_name")?,
            record_id: row.try_get("record_id")?,
            fields: row.try_get("fields")?,
            deleted: row.try_get("deleted")?,
            updated_at: row.try_get("updated_at")?,
            client_updated_at: row.try_get("client_updated_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl StoredRecord {
    /// Convert database row to the engine's stored record.
    pub fn into_accepted(self) -> Accepted {
        Accepted {
            record: Record {
                id: self.record_id,
                table: self.table_name,
                fields: self.fields.0,
                updated_at: self.updated_at as Timestamp,
                deleted: self.deleted,
            },
            client_updated_at: self.client_updated_at as Timestamp,
            created_at: self.created_at as Timestamp,
        }
    }
}

fn into_map(rows: Vec<StoredRecord>) -> RecordMap {
    let mut map = RecordMap::new();
    for row in rows {
        let accepted = row.into_accepted();
        map.entry(accepted.record.table.clone())
            .or_default()
            .insert(accepted.record.id, accepted);
    }
    map
}

/// Insert or replace a record.
pub async fn upsert_record(conn: &mut PgConnection, accepted: &Accepted) -> Result<(), sqlx::Error> {
    let record = &accepted.record;
    sqlx::query(
        r#"
        INSERT INTO records (
            table_name, record_id, fields, deleted,
            updated_at, client_updated_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (table_name, record_id) DO UPDATE SET
            fields = EXCLUDED.fields,
            deleted = EXCLUDED.deleted,
            updated_at = EXCLUDED.updated_at,
            client_updated_at = EXCLUDED.client_updated_at
        "#,
    )
    .bind(&record.table)
    .bind(record.id)
    .bind(Json(&record.fields))
    .bind(record.deleted)
    .bind(record.updated_at as i64)
    .bind(accepted.client_updated_at as i64)
    .bind(accepted.created_at as i64)
    .execute(conn)
    .await?;

    Ok(())
}

/// Lock and load the stored copies of the given records.
///
/// Rows are locked in key order so concurrent pushes cannot deadlock.
pub async fn lock_records(
    conn: &mut PgConnection,
    table: &str,
    ids: &[RecordId],
) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT table_name, record_id, fields, deleted,
               updated_at, client_updated_at, created_at
        FROM records
        WHERE table_name = $1 AND record_id = ANY($2)
        ORDER BY record_id
        FOR UPDATE
        "#,
    )
    .bind(table)
    .bind(ids)
    .fetch_all(conn)
    .await
}

/// Advisory lock names for the records a push touches, sorted and without
/// duplicates.
pub fn advisory_keys(keys: &BTreeMap<&TableName, Vec<RecordId>>) -> Vec<String> {
    let mut names: Vec<String> = keys
        .iter()
        .flat_map(|(table, ids)| ids.iter().map(move |id| format!("{table}/{id}")))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Take a transaction-scoped advisory lock per record key.
///
/// `FOR UPDATE` only locks rows that already exist, so two pushes creating
/// the same record would otherwise both see it as new.
async fn lock_keys(conn: &mut PgConnection, names: &[String]) -> Result<(), sqlx::Error> {
    for name in names {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(name)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Lock and load the stored copies of every record a push touches.
///
/// Holds until the transaction ends, for present and absent rows alike.
pub async fn lock_pushed(
    conn: &mut PgConnection,
    keys: BTreeMap<&TableName, Vec<RecordId>>,
) -> Result<RecordMap, sqlx::Error> {
    lock_keys(&mut *conn, &advisory_keys(&keys)).await?;

    let mut rows = Vec::new();
    for (table, ids) in keys {
        rows.extend(lock_records(&mut *conn, table, &ids).await?);
    }
    Ok(into_map(rows))
}

/// Records a pull may have to send.
///
/// Everything changed after `since`, plus every record of `full_tables`.
/// With no `since` that is every record.
pub async fn changed_since(
    conn: &mut PgConnection,
    since: Option<Timestamp>,
    full_tables: &[TableName],
) -> Result<RecordMap, sqlx::Error> {
    let rows = sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT table_name, record_id, fields, deleted,
               updated_at, client_updated_at, created_at
        FROM records
        WHERE $1::BIGINT IS NULL OR updated_at > $1 OR table_name = ANY($2)
        ORDER BY table_name, record_id
        "#,
    )
    .bind(since.map(|t| t as i64))
    .bind(full_tables)
    .fetch_all(conn)
    .await?;

    Ok(into_map(rows))
}
