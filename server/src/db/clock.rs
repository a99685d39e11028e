//! The server clock, kept in the single-row `sync_clock` table.

use sqlx::PgConnection;
use tether_engine::Timestamp;

/// Stamp the next server time: `max(now, last + 1)`.
///
/// The update holds the clock row until the surrounding transaction ends, so
/// stamps are issued in commit order.
pub async fn stamp(conn: &mut PgConnection, now: Timestamp) -> Result<Timestamp, sqlx::Error> {
    let result: (i64,) = sqlx::query_as(
        r#"
        UPDATE sync_clock
        SET last_timestamp = GREATEST($1, last_timestamp + 1)
        WHERE id = 1
        RETURNING last_timestamp
        "#,
    )
    .bind(now as i64)
    .fetch_one(conn)
    .await?;

    Ok(result.0 as Timestamp)
}

/// Latest issued stamp.
pub async fn last_stamp(conn: &mut PgConnection) -> Result<Timestamp, sqlx::Error> {
    let result: (i64,) = sqlx::query_as(r#"SELECT last_timestamp FROM sync_clock WHERE id = 1"#)
        .fetch_one(conn)
        .await?;

    Ok(result.0 as Timestamp)
}
