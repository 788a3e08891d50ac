use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::api::Page;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::model::{Role, required};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl CreateUser {
    /// Normalises name and email; the password is checked but left as given.
    pub fn validate(self) -> AppResult<CreateUser> {
        let name = required("name", &self.name)?;
        let email = required("email", &self.email)?.to_lowercase();
        if !email.contains('@') {
            return Err(AppError::validation("email is invalid"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if !self.role.is_staff() {
            return Err(AppError::validation("staff accounts must be admin or teacher"));
        }
        Ok(CreateUser {
            name,
            email,
            password: self.password,
            role: self.role,
        })
    }
}

pub struct Accounts<'a> {
    db: &'a Database,
}

impl<'a> Accounts<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// `input` must already be validated; `password_hash` is stored verbatim.
    pub async fn create_user(&self, input: &CreateUser, password_hash: &str) -> AppResult<User> {
        let tx = self.db.begin().await?;
        let result = Self::insert_user(&tx, input, password_hash).await;
        self.db.finish(tx, result).await
    }

    async fn insert_user(conn: &Connection, input: &CreateUser, password_hash: &str) -> AppResult<User> {
        if Self::credentials_in(conn, &input.email).await?.is_some() {
            return Err(AppError::conflict("email already registered"));
        }

        let query = r#"
            INSERT INTO users (name, email, password_hash, role)
            VALUES (?, ?, ?, ?)
            RETURNING id, name, email, role, created_at, updated_at
        "#;
        let mut rows = conn
            .query(
                query,
                libsql::params![
                    input.name.as_str(),
                    input.email.as_str(),
                    password_hash,
                    input.role.as_str()
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Self::row_to_user(&row),
            None => Err(AppError::Internal(anyhow::anyhow!("failed to create user"))),
        }
    }

    pub async fn get_user(&self, id: i32) -> AppResult<Option<User>> {
        let query = r#"
            SELECT id, name, email, role, created_at, updated_at
            FROM users WHERE id = ?
        "#;
        let conn = self.db.read().await?;
        let mut rows = conn.query(query, libsql::params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    /// Returns the account and its password hash.
    pub async fn find_credentials(&self, email: &str) -> AppResult<Option<(User, String)>> {
        let conn = self.db.read().await?;
        Self::credentials_in(&conn, email).await
    }

    async fn credentials_in(conn: &Connection, email: &str) -> AppResult<Option<(User, String)>> {
        let query = r#"
            SELECT id, name, email, role, created_at, updated_at, password_hash
            FROM users WHERE email = ?
        "#;
        let mut rows = conn
            .query(query, libsql::params![email.trim().to_lowercase()])
            .await?;
        match rows.next().await? {
            Some(row) => {
                let user = Self::row_to_user(&row)?;
                let hash: String = row.get(6)?;
                Ok(Some((user, hash)))
            }
            None => Ok(None),
        }
    }

    pub async fn list_users(&self, page: Page) -> AppResult<Vec<User>> {
        let query = r#"
            SELECT id, name, email, role, created_at, updated_at
            FROM users
            ORDER BY id
            LIMIT ? OFFSET ?
        "#;
        let conn = self.db.read().await?;
        let mut rows = conn
            .query(query, libsql::params![page.limit, page.offset])
            .await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(Self::row_to_user(&row)?);
        }
        Ok(users)
    }

    pub async fn count_users(&self) -> AppResult<i64> {
        let conn = self.db.read().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM users", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    fn row_to_user(row: &libsql::Row) -> AppResult<User> {
        let role_str: String = row.get(3)?;
        let role: Role = role_str.parse()?;

        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher() -> CreateUser {
        CreateUser {
            name: " Ms. Frizzle ".into(),
            email: "Frizzle@School.test".into(),
            password: "magic-school-bus".into(),
            role: Role::Teacher,
        }
    }

    #[test]
    fn test_validate_normalises() {
        let input = teacher().validate().unwrap();
        assert_eq!(input.name, "Ms. Frizzle");
        assert_eq!(input.email, "frizzle@school.test");
    }

    #[test]
    fn test_validate_rejects() {
        let mut short = teacher();
        short.password = "short".into();
        assert!(matches!(short.validate(), Err(AppError::Validation(_))));

        let mut student = teacher();
        student.role = Role::Student;
        assert!(matches!(student.validate(), Err(AppError::Validation(_))));

        let mut bad_email = teacher();
        bad_email.email = "nobody".into();
        assert!(matches!(bad_email.validate(), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let db = Database::open_local(":memory:").await.unwrap();
        let accounts = Accounts::new(&db);
        let input = teacher().validate().unwrap();

        let user = accounts.create_user(&input, "hash").await.unwrap();
        assert_eq!(user.role, Role::Teacher);
        assert!(matches!(
            accounts.create_user(&input, "hash").await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(accounts.count_users().await.unwrap(), 1);

        let (found, hash) = accounts
            .find_credentials("FRIZZLE@school.test")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(hash, "hash");
    }
}
