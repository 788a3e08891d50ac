use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::api::Page;
use crate::db::{Database, count_rows, row_exists};
use crate::error::{AppError, AppResult};
use crate::model::{is_valid_pin, optional, required};

/// The PIN is a login credential and is left out of every listing.
#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: i32,
    pub name: String,
    pub grade: Option<String>,
    pub class_id: Option<i32>,
    #[serde(skip_serializing)]
    pub pin: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Response for the calls that set a PIN, so staff can hand it out.
#[derive(Debug, Clone, Serialize)]
pub struct StudentWithPin {
    #[serde(flatten)]
    pub student: Student,
    pub pin: String,
}

impl From<Student> for StudentWithPin {
    fn from(student: Student) -> Self {
        let pin = student.pin.clone();
        StudentWithPin { student, pin }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub id: i32,
    pub name: String,
    pub teacher_id: Option<i32>,
    pub school_year: String,
    pub student_ids: Vec<i32>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateStudent {
    pub name: String,
    pub grade: Option<String>,
    pub class_id: Option<i32>,
    pub pin: String,
}

/// Class membership changes through enrolment, not here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStudent {
    pub name: Option<String>,
    pub grade: Option<String>,
    pub pin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateClass {
    pub name: String,
    pub teacher_id: Option<i32>,
    pub school_year: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateClass {
    pub name: Option<String>,
    pub teacher_id: Option<i32>,
    pub school_year: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Enrolment {
    pub student_id: i32,
}

#[derive(Debug, Default)]
pub struct StudentFilter {
    pub class_id: Option<i32>,
    pub search: Option<String>,
}

fn validate_pin(pin: &str) -> AppResult<String> {
    let pin = pin.trim();
    if !is_valid_pin(pin) {
        return Err(AppError::validation("pin must be exactly 4 digits"));
    }
    Ok(pin.to_string())
}

const STUDENT_COLUMNS: &str = "id, name, grade, class_id, pin, created_at, updated_at";

const CLASS_SELECT: &str = r#"
SELECT
    c.id,
    c.name,
    c.teacher_id,
    c.school_year,
    GROUP_CONCAT(CAST(s.id AS TEXT)) AS student_ids,
    c.created_at,
    c.updated_at
FROM classes c
LEFT JOIN students s ON s.class_id = c.id
"#;

pub struct Roster<'a> {
    db: &'a Database,
}

impl<'a> Roster<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    async fn ensure_pin_free(conn: &Connection, pin: &str, except: Option<i32>) -> AppResult<()> {
        if let Some(existing) = Self::student_by_pin_in(conn, pin).await? {
            if Some(existing.id) != except {
                return Err(AppError::conflict("pin already in use"));
            }
        }
        Ok(())
    }

    async fn ensure_class(conn: &Connection, class_id: i32) -> AppResult<()> {
        if !row_exists(conn, "classes", class_id).await? {
            return Err(AppError::not_found("class not found"));
        }
        Ok(())
    }

    async fn ensure_teacher(conn: &Connection, teacher_id: i32) -> AppResult<()> {
        if !row_exists(conn, "users", teacher_id).await? {
            return Err(AppError::not_found("teacher not found"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Students
    // ------------------------------------------------------------------

    pub async fn create_student(&self, input: CreateStudent) -> AppResult<Student> {
        let name = required("name", &input.name)?;
        let pin = validate_pin(&input.pin)?;

        let tx = self.db.begin().await?;
        let result: AppResult<Student> = async {
            Self::ensure_pin_free(&tx, &pin, None).await?;
            if let Some(class_id) = input.class_id {
                Self::ensure_class(&tx, class_id).await?;
            }

            let query = format!(
                "INSERT INTO students (name, grade, class_id, pin) VALUES (?, ?, ?, ?) RETURNING {STUDENT_COLUMNS}"
            );
            let mut rows = tx
                .query(
                    &query,
                    libsql::params![name, optional(input.grade.as_deref()), input.class_id, pin],
                )
                .await?;
            match rows.next().await? {
                Some(row) => Self::row_to_student(&row),
                None => Err(AppError::Internal(anyhow::anyhow!("failed to create student"))),
            }
        }
        .await;
        let student = self.db.finish(tx, result).await?;

        tracing::info!(student_id = student.id, "student created");
        Ok(student)
    }

    pub async fn get_student(&self, id: i32) -> AppResult<Option<Student>> {
        let conn = self.db.read().await?;
        Self::student_in(&conn, id).await
    }

    async fn student_in(conn: &Connection, id: i32) -> AppResult<Option<Student>> {
        let query = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?");
        let mut rows = conn.query(&query, libsql::params![id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_student(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn find_student_by_pin(&self, pin: &str) -> AppResult<Option<Student>> {
        let conn = self.db.read().await?;
        Self::student_by_pin_in(&conn, pin).await
    }

    async fn student_by_pin_in(conn: &Connection, pin: &str) -> AppResult<Option<Student>> {
        let query = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE pin = ?");
        let mut rows = conn.query(&query, libsql::params![pin]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_student(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_students(&self, filter: StudentFilter, page: Page) -> AppResult<Vec<Student>> {
        let query = format!(
            r#"SELECT {STUDENT_COLUMNS} FROM students
WHERE (?1 IS NULL OR class_id = ?1)
  AND (?2 IS NULL OR name LIKE ?2)
ORDER BY name, id
LIMIT ?3 OFFSET ?4"#
        );
        let pattern = optional(filter.search.as_deref()).map(|s| format!("%{}%", s));

        let conn = self.db.read().await?;
        let mut rows = conn
            .query(
                &query,
                libsql::params![filter.class_id, pattern, page.limit, page.offset],
            )
            .await?;

        let mut students = Vec::new();
        while let Some(row) = rows.next().await? {
            students.push(Self::row_to_student(&row)?);
        }
        Ok(students)
    }

    pub async fn update_student(&self, id: i32, input: UpdateStudent) -> AppResult<Option<Student>> {
        let mut updates = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(name) = &input.name {
            updates.push("name = ?");
            params.push(required("name", name)?.into());
        }
        if let Some(grade) = &input.grade {
            updates.push("grade = ?");
            params.push(match optional(Some(grade.as_str())) {
                Some(g) => g.into(),
                None => libsql::Value::Null,
            });
        }
        let pin = input.pin.as_deref().map(validate_pin).transpose()?;
        if let Some(pin) = &pin {
            updates.push("pin = ?");
            params.push(pin.clone().into());
        }

        let tx = self.db.begin().await?;
        let result: AppResult<Option<Student>> = async {
            if !row_exists(&tx, "students", id).await? {
                return Ok(None);
            }
            if let Some(pin) = &pin {
                Self::ensure_pin_free(&tx, pin, Some(id)).await?;
            }
            if !updates.is_empty() {
                updates.push("updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')");
                params.push(id.into());
                let query = format!("UPDATE students SET {} WHERE id = ?", updates.join(", "));
                tx.execute(&query, params).await?;
            }
            Self::student_in(&tx, id).await
        }
        .await;
        self.db.finish(tx, result).await
    }

    /// Students with ledger history are kept so the ledger stays whole.
    pub async fn delete_student(&self, id: i32) -> AppResult<bool> {
        let tx = self.db.begin().await?;
        let result: AppResult<bool> = async {
            if !row_exists(&tx, "students", id).await? {
                return Ok(false);
            }
            if count_rows(&tx, "checkouts", "student_id", id).await? > 0 {
                return Err(AppError::conflict("student has circulation history and cannot be deleted"));
            }
            tx.execute("DELETE FROM students WHERE id = ?", libsql::params![id])
                .await?;
            Ok(true)
        }
        .await;
        self.db.finish(tx, result).await
    }

    // ------------------------------------------------------------------
    // Classes
    // ------------------------------------------------------------------

    pub async fn create_class(&self, input: CreateClass) -> AppResult<Class> {
        let name = required("name", &input.name)?;
        let school_year = required("school_year", &input.school_year)?;

        let tx = self.db.begin().await?;
        let result: AppResult<Class> = async {
            if let Some(teacher_id) = input.teacher_id {
                Self::ensure_teacher(&tx, teacher_id).await?;
            }

            let query = "INSERT INTO classes (name, teacher_id, school_year) VALUES (?, ?, ?) RETURNING id";
            let mut rows = tx
                .query(query, libsql::params![name, input.teacher_id, school_year])
                .await?;
            let class_id: i32 = match rows.next().await? {
                Some(row) => row.get(0)?,
                None => return Err(AppError::Internal(anyhow::anyhow!("failed to create class"))),
            };
            Self::class_in(&tx, class_id)
                .await?
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("created class {class_id} vanished")))
        }
        .await;
        self.db.finish(tx, result).await
    }

    pub async fn get_class(&self, id: i32) -> AppResult<Option<Class>> {
        let conn = self.db.read().await?;
        Self::class_in(&conn, id).await
    }

    async fn class_in(conn: &Connection, id: i32) -> AppResult<Option<Class>> {
        let query = format!("{CLASS_SELECT} WHERE c.id = ? GROUP BY c.id");
        let mut rows = conn.query(&query, libsql::params![id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_class(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_classes(&self, page: Page) -> AppResult<Vec<Class>> {
        let query = format!("{CLASS_SELECT} GROUP BY c.id ORDER BY c.school_year DESC, c.name LIMIT ? OFFSET ?");
        let conn = self.db.read().await?;
        let mut rows = conn
            .query(&query, libsql::params![page.limit, page.offset])
            .await?;

        let mut classes = Vec::new();
        while let Some(row) = rows.next().await? {
            classes.push(Self::row_to_class(&row)?);
        }
        Ok(classes)
    }

    pub async fn update_class(&self, id: i32, input: UpdateClass) -> AppResult<Option<Class>> {
        let mut updates = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(name) = &input.name {
            updates.push("name = ?");
            params.push(required("name", name)?.into());
        }
        if let Some(school_year) = &input.school_year {
            updates.push("school_year = ?");
            params.push(required("school_year", school_year)?.into());
        }
        if let Some(teacher_id) = input.teacher_id {
            updates.push("teacher_id = ?");
            params.push(teacher_id.into());
        }

        let tx = self.db.begin().await?;
        let result: AppResult<Option<Class>> = async {
            if !row_exists(&tx, "classes", id).await? {
                return Ok(None);
            }
            if let Some(teacher_id) = input.teacher_id {
                Self::ensure_teacher(&tx, teacher_id).await?;
            }
            if !updates.is_empty() {
                updates.push("updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')");
                params.push(id.into());
                let query = format!("UPDATE classes SET {} WHERE id = ?", updates.join(", "));
                tx.execute(&query, params).await?;
            }
            Self::class_in(&tx, id).await
        }
        .await;
        self.db.finish(tx, result).await
    }

    /// Deletes the class; its students stay on the roster unassigned.
    pub async fn delete_class(&self, id: i32) -> AppResult<bool> {
        let tx = self.db.begin().await?;
        let result: AppResult<bool> = async {
            tx.execute(
                "UPDATE students SET class_id = NULL WHERE class_id = ?",
                libsql::params![id],
            )
            .await?;
            let deleted = tx
                .execute("DELETE FROM classes WHERE id = ?", libsql::params![id])
                .await?;
            Ok(deleted > 0)
        }
        .await;
        self.db.finish(tx, result).await
    }

    pub async fn enrol_student(&self, class_id: i32, student_id: i32) -> AppResult<Class> {
        self.set_membership(class_id, student_id, Some(class_id)).await
    }

    pub async fn unenrol_student(&self, class_id: i32, student_id: i32) -> AppResult<Class> {
        self.set_membership(class_id, student_id, None).await
    }

    async fn set_membership(&self, class_id: i32, student_id: i32, target: Option<i32>) -> AppResult<Class> {
        let tx = self.db.begin().await?;
        let result: AppResult<Class> = async {
            Self::ensure_class(&tx, class_id).await?;
            let student = Self::student_in(&tx, student_id)
                .await?
                .ok_or_else(|| AppError::not_found("student not found"))?;
            if target.is_none() && student.class_id != Some(class_id) {
                return Err(AppError::not_found("student is not in this class"));
            }

            tx.execute(
                "UPDATE students SET class_id = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
                libsql::params![target, student_id],
            )
            .await?;
            Self::class_in(&tx, class_id)
                .await?
                .ok_or_else(|| AppError::not_found("class not found"))
        }
        .await;
        self.db.finish(tx, result).await
    }

    fn row_to_student(row: &libsql::Row) -> AppResult<Student> {
        Ok(Student {
            id: row.get(0)?,
            name: row.get(1)?,
            grade: row.get(2)?,
            class_id: row.get(3)?,
            pin: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn split_ids(s: Option<String>) -> AppResult<Vec<i32>> {
        let mut ids = s
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i32>()
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid student id {s}: {e}")))
            })
            .collect::<AppResult<Vec<_>>>()?;
        ids.sort_unstable();
        Ok(ids)
    }

    fn row_to_class(row: &libsql::Row) -> AppResult<Class> {
        Ok(Class {
            id: row.get(0)?,
            name: row.get(1)?,
            teacher_id: row.get(2)?,
            school_year: row.get(3)?,
            student_ids: Self::split_ids(row.get(4)?)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}
