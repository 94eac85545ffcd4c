use tillsync_core::{LocalId, SyncMeta};

use crate::error::StoreError;

/// A row picked up by a selection query. Rows are decoded one at a time, so a
/// malformed row surfaces as its own `Err` next to its healthy neighbours.
#[derive(Debug)]
pub struct Selected<T> {
    pub id: LocalId,
    pub row: Result<T, StoreError>,
}

/// Run a selection whose first column is the integer primary key and decode
/// every row independently.
pub fn select_each<T, P: rusqlite::Params>(
    conn: &rusqlite::Connection,
    sql: &str,
    params: P,
    table: &'static str,
    decode: impl Fn(&rusqlite::Row<'_>) -> Result<T, StoreError>,
) -> Result<Vec<Selected<T>>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(Selected {
            id: get(row, 0, table, "id")?,
            row: decode(row),
        });
    }
    Ok(out)
}

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    get(row, idx, table, column)
}

/// Parse a string column into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    let raw: String = get(row, idx, table, column)?;
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Read the trailing `chain_id, is_synced, last_synced_at` triple that every
/// syncable local table selects last, starting at `idx`.
pub fn sync_meta(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
) -> Result<SyncMeta, StoreError> {
    Ok(SyncMeta {
        chain_id: get_opt(row, idx, table, "chain_id")?,
        is_synced: get::<i64>(row, idx + 1, table, "is_synced")? != 0,
        last_synced_at: get_opt(row, idx + 2, table, "last_synced_at")?,
    })
}
