use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::api::Page;
use crate::db::{Database, row_exists};
use crate::error::{AppError, AppResult};
use crate::model::{CopyStatus, optional, required};

pub const MAX_COPIES_PER_REQUEST: i32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub genre: Option<String>,
    pub subject: Option<String>,
    pub isbn: Option<String>,
    pub copy_count: i32,
    pub available_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookCopy {
    pub id: i32,
    pub book_id: i32,
    pub status: CopyStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateBook {
    pub title: String,
    pub author: String,
    pub genre: Option<String>,
    pub subject: Option<String>,
    pub isbn: Option<String>,
    pub copy_count: Option<i32>,
}

/// Fields a book update may touch. An empty string clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateBook {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub subject: Option<String>,
    pub isbn: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddCopies {
    pub count: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCopyStatus {
    pub status: CopyStatus,
}

fn validate_copy_count(count: i32) -> AppResult<()> {
    if !(1..=MAX_COPIES_PER_REQUEST).contains(&count) {
        return Err(AppError::validation(format!(
            "copy_count must be between 1 and {MAX_COPIES_PER_REQUEST}"
        )));
    }
    Ok(())
}

const BOOK_SELECT: &str = r#"
SELECT
    b.id,
    b.title,
    b.author,
    b.genre,
    b.subject,
    b.isbn,
    COUNT(c.id) AS copy_count,
    COALESCE(SUM(CASE WHEN c.status = 'available' THEN 1 ELSE 0 END), 0) AS available_count,
    b.created_at,
    b.updated_at
FROM books b
LEFT JOIN book_copies c ON c.book_id = b.id
"#;

pub struct Catalog<'a> {
    db: &'a Database,
}

impl<'a> Catalog<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn create_book(&self, input: CreateBook) -> AppResult<Book> {
        let title = required("title", &input.title)?;
        let author = required("author", &input.author)?;
        let copy_count = input.copy_count.unwrap_or(1);
        validate_copy_count(copy_count)?;

        let tx = self.db.begin().await?;
        let result: AppResult<Book> = async {
            let query = r#"
                INSERT INTO books (title, author, genre, subject, isbn)
                VALUES (?, ?, ?, ?, ?)
                RETURNING id
            "#;
            let mut rows = tx
                .query(
                    query,
                    libsql::params![
                        title,
                        author,
                        optional(input.genre.as_deref()),
                        optional(input.subject.as_deref()),
                        optional(input.isbn.as_deref())
                    ],
                )
                .await?;
            let book_id: i32 = match rows.next().await? {
                Some(row) => row.get(0)?,
                None => return Err(AppError::Internal(anyhow::anyhow!("failed to create book"))),
            };

            Self::insert_copies(&tx, book_id, copy_count).await?;
            Self::book_in(&tx, book_id)
                .await?
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("created book {book_id} vanished")))
        }
        .await;
        let book = self.db.finish(tx, result).await?;

        tracing::info!(book_id = book.id, copies = book.copy_count, "book created");
        Ok(book)
    }

    async fn insert_copies(conn: &Connection, book_id: i32, count: i32) -> AppResult<Vec<BookCopy>> {
        let query = r#"
            INSERT INTO book_copies (book_id, status)
            VALUES (?, 'available')
            RETURNING id, book_id, status, created_at, updated_at
        "#;

        let mut copies = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut rows = conn.query(query, libsql::params![book_id]).await?;
            match rows.next().await? {
                Some(row) => copies.push(Self::row_to_copy(&row)?),
                None => return Err(AppError::Internal(anyhow::anyhow!("failed to create copy"))),
            }
        }
        Ok(copies)
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Option<Book>> {
        let conn = self.db.read().await?;
        Self::book_in(&conn, id).await
    }

    async fn book_in(conn: &Connection, id: i32) -> AppResult<Option<Book>> {
        let query = format!("{BOOK_SELECT} WHERE b.id = ? GROUP BY b.id");
        let mut rows = conn.query(&query, libsql::params![id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_book(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_books(&self, search: Option<&str>, page: Page) -> AppResult<Vec<Book>> {
        let query = format!(
            r#"{BOOK_SELECT}
WHERE (?1 IS NULL
    OR b.title LIKE ?1
    OR b.author LIKE ?1
    OR b.isbn LIKE ?1
    OR b.genre LIKE ?1
    OR b.subject LIKE ?1)
GROUP BY b.id
ORDER BY b.title, b.id
LIMIT ?2 OFFSET ?3"#
        );
        let pattern = optional(search).map(|s| format!("%{}%", s));

        let conn = self.db.read().await?;
        let mut rows = conn
            .query(&query, libsql::params![pattern, page.limit, page.offset])
            .await?;

        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(Self::row_to_book(&row)?);
        }
        Ok(books)
    }

    pub async fn update_book(&self, id: i32, input: UpdateBook) -> AppResult<Option<Book>> {
        let mut updates = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(title) = &input.title {
            updates.push("title = ?");
            params.push(required("title", title)?.into());
        }
        if let Some(author) = &input.author {
            updates.push("author = ?");
            params.push(required("author", author)?.into());
        }
        for (column, value) in [
            ("genre = ?", &input.genre),
            ("subject = ?", &input.subject),
            ("isbn = ?", &input.isbn),
        ] {
            if let Some(value) = value {
                updates.push(column);
                params.push(match optional(Some(value.as_str())) {
                    Some(v) => v.into(),
                    None => libsql::Value::Null,
                });
            }
        }

        let tx = self.db.begin().await?;
        let result: AppResult<Option<Book>> = async {
            if !row_exists(&tx, "books", id).await? {
                return Ok(None);
            }
            if !updates.is_empty() {
                updates.push("updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')");
                params.push(id.into());
                let query = format!("UPDATE books SET {} WHERE id = ?", updates.join(", "));
                tx.execute(&query, params).await?;
            }
            Self::book_in(&tx, id).await
        }
        .await;
        self.db.finish(tx, result).await
    }

    /// Deletes a book and its copies. Books whose copies appear in the ledger are kept.
    pub async fn delete_book(&self, id: i32) -> AppResult<bool> {
        let tx = self.db.begin().await?;
        let result: AppResult<bool> = async {
            if !row_exists(&tx, "books", id).await? {
                return Ok(false);
            }

            let query = r#"
                SELECT COUNT(*) FROM checkouts ch
                JOIN book_copies c ON c.id = ch.book_copy_id
                WHERE c.book_id = ?
            "#;
            let mut rows = tx.query(query, libsql::params![id]).await?;
            let history: i64 = match rows.next().await? {
                Some(row) => row.get(0)?,
                None => 0,
            };
            if history > 0 {
                return Err(AppError::conflict("book has circulation history and cannot be deleted"));
            }

            tx.execute("DELETE FROM book_copies WHERE book_id = ?", libsql::params![id])
                .await?;
            tx.execute("DELETE FROM books WHERE id = ?", libsql::params![id])
                .await?;
            Ok(true)
        }
        .await;
        self.db.finish(tx, result).await
    }

    pub async fn list_copies(&self, book_id: i32) -> AppResult<Option<Vec<BookCopy>>> {
        let conn = self.db.read().await?;
        if !row_exists(&conn, "books", book_id).await? {
            return Ok(None);
        }

        let query = r#"
            SELECT id, book_id, status, created_at, updated_at
            FROM book_copies
            WHERE book_id = ?
            ORDER BY id
        "#;
        let mut rows = conn.query(query, libsql::params![book_id]).await?;

        let mut copies = Vec::new();
        while let Some(row) = rows.next().await? {
            copies.push(Self::row_to_copy(&row)?);
        }
        Ok(Some(copies))
    }

    pub async fn add_copies(&self, book_id: i32, input: AddCopies) -> AppResult<Option<Vec<BookCopy>>> {
        validate_copy_count(input.count)?;

        let tx = self.db.begin().await?;
        let result: AppResult<Option<Vec<BookCopy>>> = async {
            if !row_exists(&tx, "books", book_id).await? {
                return Ok(None);
            }
            Ok(Some(Self::insert_copies(&tx, book_id, input.count).await?))
        }
        .await;
        self.db.finish(tx, result).await
    }

    pub async fn get_copy(&self, id: i32) -> AppResult<Option<BookCopy>> {
        let conn = self.db.read().await?;
        Self::copy_in(&conn, id).await
    }

    /// Looks a copy up on a connection the caller already holds.
    pub(crate) async fn copy_in(conn: &Connection, id: i32) -> AppResult<Option<BookCopy>> {
        let query = r#"
            SELECT id, book_id, status, created_at, updated_at
            FROM book_copies WHERE id = ?
        "#;
        let mut rows = conn.query(query, libsql::params![id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_copy(&row)?)),
            None => Ok(None),
        }
    }

    /// Sets a manual status. `checked_out` belongs to circulation and a
    /// checked-out copy must be returned before it can change.
    pub async fn set_copy_status(&self, id: i32, input: UpdateCopyStatus) -> AppResult<Option<BookCopy>> {
        if input.status == CopyStatus::CheckedOut {
            return Err(AppError::validation("checked_out is set by checking a copy out"));
        }

        let tx = self.db.begin().await?;
        let result: AppResult<Option<BookCopy>> = async {
            let copy = match Self::copy_in(&tx, id).await? {
                Some(copy) => copy,
                None => return Ok(None),
            };
            if copy.status == CopyStatus::CheckedOut {
                return Err(AppError::conflict("book copy is checked out; return it first"));
            }

            tx.execute(
                "UPDATE book_copies SET status = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
                libsql::params![input.status.as_str(), id],
            )
            .await?;
            Self::copy_in(&tx, id).await
        }
        .await;
        let copy = self.db.finish(tx, result).await?;

        if let Some(copy) = &copy {
            tracing::info!(copy_id = copy.id, status = copy.status.as_str(), "copy status set");
        }
        Ok(copy)
    }

    fn row_to_book(row: &libsql::Row) -> AppResult<Book> {
        Ok(Book {
            id: row.get(0)?,
            title: row.get(1)?,
            author: row.get(2)?,
            genre: row.get(3)?,
            subject: row.get(4)?,
            isbn: row.get(5)?,
            copy_count: row.get(6)?,
            available_count: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    pub(crate) fn row_to_copy(row: &libsql::Row) -> AppResult<BookCopy> {
        let status_str: String = row.get(2)?;
        let status: CopyStatus = status_str.parse()?;

        Ok(BookCopy {
            id: row.get(0)?,
            book_id: row.get(1)?,
            status,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}
