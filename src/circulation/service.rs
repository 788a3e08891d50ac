use chrono::{DateTime, NaiveDate, Utc};
use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::api::Page;
use crate::catalog::Catalog;
use crate::db::{Database, row_exists};
use crate::error::{AppError, AppResult};
use crate::model::{CheckoutStatus, CopyStatus, format_date, format_timestamp, parse_date, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRecord {
    pub id: i32,
    pub book_copy_id: i32,
    pub student_id: i32,
    pub checkout_date: DateTime<Utc>,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub status: CheckoutStatus,
}

/// A ledger entry joined with the student and book it refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutDetail {
    #[serde(flatten)]
    pub record: CheckoutRecord,
    pub student_name: String,
    pub book_id: i32,
    pub book_title: String,
    pub book_author: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCheckout {
    pub book_copy_id: i32,
    pub student_id: i32,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReturnCheckout {
    pub returned_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutFilter {
    pub status: Option<CheckoutStatus>,
    pub student_id: Option<i32>,
}

const RECORD_COLUMNS: &str = "id, book_copy_id, student_id, checkout_date, due_date, return_date, status";

pub struct Circulation<'a> {
    db: &'a Database,
}

impl<'a> Circulation<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Lends an available copy to a student.
    pub async fn checkout(&self, input: CreateCheckout, now: DateTime<Utc>) -> AppResult<CheckoutRecord> {
        if input.due_date < now.date_naive() {
            return Err(AppError::validation("due_date must not be in the past"));
        }

        let tx = self.db.begin().await?;
        let result = Self::lend(&tx, &input, now).await;
        let record = self.db.finish(tx, result).await?;

        tracing::info!(
            checkout_id = record.id,
            book_copy_id = record.book_copy_id,
            student_id = record.student_id,
            due_date = %record.due_date,
            "copy checked out"
        );
        Ok(record)
    }

    async fn lend(conn: &Connection, input: &CreateCheckout, now: DateTime<Utc>) -> AppResult<CheckoutRecord> {
        let copy = Catalog::copy_in(conn, input.book_copy_id)
            .await?
            .ok_or_else(|| AppError::not_found("book copy not found"))?;
        if !row_exists(conn, "students", input.student_id).await? {
            return Err(AppError::not_found("student not found"));
        }
        if copy.status != CopyStatus::Available {
            return Err(AppError::conflict(format!(
                "book copy {} is not available ({})",
                copy.id,
                copy.status.as_str()
            )));
        }

        let query = format!(
            r#"INSERT INTO checkouts (book_copy_id, student_id, checkout_date, due_date, status)
VALUES (?, ?, ?, ?, 'checked_out')
RETURNING {RECORD_COLUMNS}"#
        );
        let mut rows = conn
            .query(
                &query,
                libsql::params![
                    input.book_copy_id,
                    input.student_id,
                    format_timestamp(now),
                    format_date(input.due_date)
                ],
            )
            .await?;
        let record = match rows.next().await? {
            Some(row) => Self::row_to_record(&row)?,
            None => return Err(AppError::Internal(anyhow::anyhow!("failed to create checkout"))),
        };

        let flipped = conn
            .execute(
                "UPDATE book_copies SET status = 'checked_out', updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ? AND status = 'available'",
                libsql::params![input.book_copy_id],
            )
            .await?;
        if flipped != 1 {
            return Err(AppError::conflict(format!("book copy {} is not available", copy.id)));
        }

        Ok(record)
    }

    /// Closes a ledger entry and puts the copy back on the shelf. Returning a
    /// record that is already closed is a no-op.
    pub async fn return_checkout(&self, id: i32, returned_on: NaiveDate) -> AppResult<CheckoutRecord> {
        let tx = self.db.begin().await?;
        let result = Self::close(&tx, id, returned_on).await;
        let (record, changed) = self.db.finish(tx, result).await?;

        if changed {
            tracing::info!(
                checkout_id = record.id,
                book_copy_id = record.book_copy_id,
                returned_on = %returned_on,
                "copy returned"
            );
        } else {
            tracing::debug!(checkout_id = record.id, "record already returned");
        }
        Ok(record)
    }

    async fn close(conn: &Connection, id: i32, returned_on: NaiveDate) -> AppResult<(CheckoutRecord, bool)> {
        let record = Self::record_in(conn, id)
            .await?
            .ok_or_else(|| AppError::not_found("checkout record not found"))?;
        if !record.status.is_open() {
            return Ok((record, false));
        }
        if returned_on < record.checkout_date.date_naive() {
            return Err(AppError::validation("returned_on must not be before the checkout date"));
        }

        conn.execute(
            "UPDATE checkouts SET return_date = ?, status = 'returned' WHERE id = ?",
            libsql::params![format_date(returned_on), id],
        )
        .await?;
        let restored = conn
            .execute(
                "UPDATE book_copies SET status = 'available', updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
                libsql::params![record.book_copy_id],
            )
            .await?;
        if restored != 1 {
            return Err(AppError::Internal(anyhow::anyhow!(
                "copy {} of checkout {} is missing",
                record.book_copy_id,
                id
            )));
        }

        let record = Self::record_in(conn, id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("checkout {id} vanished")))?;
        Ok((record, true))
    }

    /// Flags open entries whose due date has passed. Returns how many changed.
    pub async fn mark_overdue(&self, today: NaiveDate) -> AppResult<u64> {
        let tx = self.db.begin().await?;
        let result: AppResult<u64> = async {
            Ok(tx
                .execute(
                    "UPDATE checkouts SET status = 'overdue' WHERE status = 'checked_out' AND due_date < ?",
                    libsql::params![format_date(today)],
                )
                .await?)
        }
        .await;
        let changed = self.db.finish(tx, result).await?;

        if changed > 0 {
            tracing::info!(count = changed, "checkouts marked overdue");
        }
        Ok(changed)
    }

    pub async fn get_checkout(&self, id: i32) -> AppResult<Option<CheckoutRecord>> {
        let conn = self.db.read().await?;
        Self::record_in(&conn, id).await
    }

    async fn record_in(conn: &Connection, id: i32) -> AppResult<Option<CheckoutRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM checkouts WHERE id = ?");
        let mut rows = conn.query(&query, libsql::params![id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_checkouts(&self, filter: CheckoutFilter, page: Page) -> AppResult<Vec<CheckoutDetail>> {
        let query = r#"
SELECT
    ch.id,
    ch.book_copy_id,
    ch.student_id,
    ch.checkout_date,
    ch.due_date,
    ch.return_date,
    ch.status,
    s.name,
    b.id,
    b.title,
    b.author
FROM checkouts ch
JOIN students s ON s.id = ch.student_id
JOIN book_copies c ON c.id = ch.book_copy_id
JOIN books b ON b.id = c.book_id
WHERE (?1 IS NULL OR ch.status = ?1)
  AND (?2 IS NULL OR ch.student_id = ?2)
ORDER BY ch.checkout_date DESC, ch.id DESC
LIMIT ?3 OFFSET ?4
"#;
        let status = filter.status.map(|s| s.as_str());

        let conn = self.db.read().await?;
        let mut rows = conn
            .query(
                query,
                libsql::params![status, filter.student_id, page.limit, page.offset],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(CheckoutDetail {
                record: Self::row_to_record(&row)?,
                student_name: row.get(7)?,
                book_id: row.get(8)?,
                book_title: row.get(9)?,
                book_author: row.get(10)?,
            });
        }
        Ok(entries)
    }

    fn row_to_record(row: &libsql::Row) -> AppResult<CheckoutRecord> {
        let checkout_date: String = row.get(3)?;
        let due_date: String = row.get(4)?;
        let return_date: Option<String> = row.get(5)?;
        let status_str: String = row.get(6)?;
        let status: CheckoutStatus = status_str.parse()?;

        Ok(CheckoutRecord {
            id: row.get(0)?,
            book_copy_id: row.get(1)?,
            student_id: row.get(2)?,
            checkout_date: parse_timestamp(&checkout_date)?,
            due_date: parse_date(&due_date)?,
            return_date: return_date.as_deref().map(parse_date).transpose()?,
            status,
        })
    }
}
