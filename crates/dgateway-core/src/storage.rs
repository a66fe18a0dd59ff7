//! Exchange storage on SQLite
//!
//! One file holds every captured exchange. Each operation opens its own
//! connection inside `spawn_blocking`; the database runs in WAL mode so list
//! and detail reads are not serialized behind the pipeline's inserts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::exchange::{
    format_timestamp, parse_timestamp, BodyFacet, ExchangeMetadata, ExchangeRecord,
    ExchangeSummary, StoredBody, StoredExchange,
};
use crate::headers::HeaderMultimap;
use crate::migrations::{apply_migrations, MigrationReport};
use crate::pipeline::ExchangeWriter;
use crate::query::{total_pages, ExchangePage, ListQuery};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the exchange database
#[derive(Debug, Clone)]
pub struct ExchangeStore {
    db_path: PathBuf,
}

impl ExchangeStore {
    /// Open (creating if needed) the store at `db_path` and bring it to the
    /// current schema. A migration failure leaves the file untouched and is
    /// returned as [`AppError::MigrationError`].
    pub fn open(db_path: impl Into<PathBuf>) -> Result<(Self, MigrationReport)> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut conn = open_connection(&db_path)?;
        let report = apply_migrations(&mut conn)?;
        if report.is_noop() {
            info!("Opened exchange store at {}", db_path.display());
        } else {
            info!(
                "Opened exchange store at {} ({} column(s) added)",
                db_path.display(),
                report.added.len()
            );
        }

        Ok((Self { db_path }, report))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Persist one exchange; body sizes and text flags are derived here
    pub async fn insert(&self, record: ExchangeRecord) -> Result<i64> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || insert_blocking(&db_path, &record)).await?
    }

    /// One page of summaries plus the unpaginated match count
    pub async fn list(&self, query: ListQuery) -> Result<ExchangePage> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || list_blocking(&db_path, &query)).await?
    }

    /// Everything but the body blobs
    pub async fn get_metadata(&self, id: i64) -> Result<Option<ExchangeMetadata>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || get_metadata_blocking(&db_path, id)).await?
    }

    /// A single body blob with the `Content-Type` stored beside it
    pub async fn get_body(&self, id: i64, facet: BodyFacet) -> Result<Option<StoredBody>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || get_body_blocking(&db_path, id, facet)).await?
    }

    /// Every stored exchange, oldest first
    pub async fn export_all(&self) -> Result<Vec<StoredExchange>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || export_all_blocking(&db_path)).await?
    }
}

#[async_trait]
impl ExchangeWriter for ExchangeStore {
    async fn write(&self, record: ExchangeRecord) -> Result<i64> {
        self.insert(record).await
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags).map_err(|e| {
        AppError::StorageError(format!("Failed to open {}: {e}", path.display()))
    })?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    Ok(conn)
}

fn insert_blocking(path: &Path, record: &ExchangeRecord) -> Result<i64> {
    let conn = open_connection(path)?;
    conn.execute(
        r#"
        INSERT INTO requests (
            timestamp, method, url,
            request_headers, request_body, request_body_size, is_request_body_text,
            status_code,
            response_headers, response_body, response_body_size, is_response_body_text
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            format_timestamp(&record.timestamp),
            record.method,
            record.url,
            record.request_headers.to_json()?,
            record.request_body,
            record.request_body.len() as i64,
            record.request_kind().is_text(),
            i64::from(record.status_code),
            record.response_headers.to_json()?,
            record.response_body,
            record.response_body.len() as i64,
            record.response_kind().is_text(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn list_blocking(path: &Path, query: &ListQuery) -> Result<ExchangePage> {
    let conn = open_connection(path)?;

    let mut filter = String::from(" WHERE 1=1");
    let mut args: Vec<Value> = Vec::new();
    if let Some(pattern) = query.url_pattern() {
        filter.push_str(" AND url LIKE ? ESCAPE '\\'");
        args.push(Value::Text(pattern));
    }
    if let Some(start) = &query.start {
        filter.push_str(" AND timestamp >= ?");
        args.push(Value::Text(start.clone()));
    }
    if let Some(end) = &query.end {
        filter.push_str(" AND timestamp <= ?");
        args.push(Value::Text(end.clone()));
    }

    let total_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM requests{filter}"),
        params_from_iter(args.iter()),
        |row| row.get(0),
    )?;

    let mut page_args = args;
    page_args.push(Value::Integer(i64::from(query.page_size)));
    page_args.push(Value::Integer(query.offset() as i64));

    let mut stmt = conn.prepare(&format!(
        "SELECT id, timestamp, method, url, status_code FROM requests{filter} \
         ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
    ))?;
    let mut rows = stmt.query(params_from_iter(page_args.iter()))?;

    let mut requests = Vec::new();
    while let Some(row) = rows.next()? {
        requests.push(ExchangeSummary {
            id: row.get(0)?,
            timestamp: timestamp_at(row, 1)?,
            method: text_at(row, 2)?,
            url: text_at(row, 3)?,
            status_code: status_at(row, 4)?,
        });
    }

    let total_count = total_count.max(0) as u64;
    Ok(ExchangePage {
        requests,
        page: query.page,
        page_size: query.page_size,
        total_count,
        total_pages: total_pages(total_count, query.page_size),
    })
}

fn get_metadata_blocking(path: &Path, id: i64) -> Result<Option<ExchangeMetadata>> {
    let conn = open_connection(path)?;
    let mut stmt = conn.prepare(
        r#"
        SELECT id, timestamp, method, url,
               request_headers, request_body_size, is_request_body_text,
               status_code,
               response_headers, response_body_size, is_response_body_text
        FROM requests WHERE id = ?1
        "#,
    )?;
    let mut rows = stmt.query(params![id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    Ok(Some(ExchangeMetadata {
        id: row.get(0)?,
        timestamp: timestamp_at(row, 1)?,
        method: text_at(row, 2)?,
        url: text_at(row, 3)?,
        request_headers: headers_json_at(row, 4)?,
        request_body_size: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        is_request_body_text: row.get::<_, Option<bool>>(6)?.unwrap_or(false),
        status_code: status_at(row, 7)?,
        response_headers: headers_json_at(row, 8)?,
        response_body_size: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
        is_response_body_text: row.get::<_, Option<bool>>(10)?.unwrap_or(false),
    }))
}

fn get_body_blocking(path: &Path, id: i64, facet: BodyFacet) -> Result<Option<StoredBody>> {
    let conn = open_connection(path)?;
    let sql = format!(
        "SELECT {}, {} FROM requests WHERE id = ?1",
        facet.body_column(),
        facet.headers_column()
    );
    let found = conn
        .query_row(&sql, params![id], |row| {
            Ok((
                row.get::<_, Option<Vec<u8>>>(0)?,
                row.get::<_, Option<String>>(1)?,
            ))
        })
        .optional()?;

    Ok(found.map(|(body, headers)| StoredBody {
        body: body.unwrap_or_default(),
        content_type: headers
            .as_deref()
            .map(|json| parse_headers(json, id))
            .and_then(|h| h.get("content-type").map(str::to_string)),
    }))
}

fn export_all_blocking(path: &Path) -> Result<Vec<StoredExchange>> {
    let conn = open_connection(path)?;
    let mut stmt = conn.prepare(
        r#"
        SELECT id, timestamp, method, url, request_headers, request_body,
               status_code, response_headers, response_body
        FROM requests ORDER BY timestamp ASC, id ASC
        "#,
    )?;
    let mut rows = stmt.query([])?;

    let mut exchanges = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        exchanges.push(StoredExchange {
            id,
            timestamp: timestamp_at(row, 1)?,
            method: text_at(row, 2)?,
            url: text_at(row, 3)?,
            request_headers: parse_headers(&headers_json_at(row, 4)?, id),
            request_body: row.get::<_, Option<Vec<u8>>>(5)?.unwrap_or_default(),
            status_code: status_at(row, 6)?,
            response_headers: parse_headers(&headers_json_at(row, 7)?, id),
            response_body: row.get::<_, Option<Vec<u8>>>(8)?.unwrap_or_default(),
        });
    }
    Ok(exchanges)
}

fn text_at(row: &Row<'_>, idx: usize) -> Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> Result<chrono::DateTime<chrono::Utc>> {
    parse_timestamp(&text_at(row, idx)?)
}

fn status_at(row: &Row<'_>, idx: usize) -> Result<u16> {
    let raw = row.get::<_, Option<i64>>(idx)?.unwrap_or(0);
    u16::try_from(raw).map_err(|_| AppError::StorageError(format!("Invalid status code: {raw}")))
}

fn headers_json_at(row: &Row<'_>, idx: usize) -> Result<String> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .unwrap_or_else(|| "{}".to_string()))
}

fn parse_headers(json: &str, id: i64) -> HeaderMultimap {
    HeaderMultimap::from_json(json).unwrap_or_else(|e| {
        warn!("Unreadable headers on exchange {}: {}", id, e);
        HeaderMultimap::new()
    })
}
