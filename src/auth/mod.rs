//! Access control.
//!
//! Staff accounts log in with email and password and receive a signed token
//! (`Authorization: Bearer <token>`). Students present their 4-digit PIN
//! (`Authorization: Pin <pin>`), which is looked up in the roster. Handlers take
//! an [`AuthorizedCaller`] and gate themselves with [`AuthorizedCaller::require`].

mod credential;
mod handler;
mod routes;
mod store;
mod token;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;

pub use credential::Credential;
pub use routes::routes;
pub use store::{Accounts, CreateUser, User};
pub use token::{Claims, TokenSigner};

use crate::config::{self, BootstrapAdmin};
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::handler::AppState;
use crate::model::Role;
use crate::roster::Roster;

/// The authenticated identity behind a request. For staff `id` is a user id,
/// for students it is a student id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizedCaller {
    pub id: i32,
    pub name: String,
    pub role: Role,
}

impl AuthorizedCaller {
    pub fn require(&self, allowed: &[Role]) -> AppResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role {} may not perform this operation",
                self.role.as_str()
            )))
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// Staff act on anyone's behalf; a student only on their own.
    pub fn require_self_or_staff(&self, student_id: i32) -> AppResult<()> {
        if self.is_staff() || self.id == student_id {
            Ok(())
        } else {
            Err(AppError::Forbidden("students may only act on their own records".to_string()))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthorizedCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credential = Credential::from_headers(&parts.headers)?;
        state.auth.authenticate(&state.db, credential).await
    }
}

pub struct Authenticator {
    signer: TokenSigner,
    bcrypt_cost: u32,
    // verified against when the email is unknown, so both paths cost one bcrypt run
    dummy_hash: OnceCell<String>,
}

#[derive(Debug, Serialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

impl Authenticator {
    pub fn new(cfg: &config::Auth) -> Self {
        Authenticator {
            signer: TokenSigner::new(&cfg.token_secret, Duration::hours(cfg.token_ttl_hours)),
            bcrypt_cost: cfg.bcrypt_cost,
            dummy_hash: OnceCell::new(),
        }
    }

    pub async fn hash_password(&self, password: &str) -> AppResult<String> {
        let password = password.to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
            .map_err(AppError::from)
    }

    async fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
            .map_err(AppError::from)
    }

    pub fn issue_token(&self, user: &User) -> AppResult<String> {
        self.signer.issue(user.id, &user.name, user.role, Utc::now())
    }

    pub async fn login(&self, db: &Database, email: &str, password: &str) -> AppResult<Session> {
        let rejected = || AppError::Unauthorized("invalid email or password".to_string());

        let (user, hash) = match Accounts::new(db).find_credentials(email).await? {
            Some(found) => found,
            None => {
                let dummy = self
                    .dummy_hash
                    .get_or_try_init(|| self.hash_password("shelfmark-unknown-account"))
                    .await?;
                Self::verify_password(password, dummy).await?;
                tracing::info!("login rejected for unknown email");
                return Err(rejected());
            }
        };
        if !Self::verify_password(password, &hash).await? {
            tracing::info!(user_id = user.id, "login rejected");
            return Err(rejected());
        }

        tracing::info!(user_id = user.id, role = user.role.as_str(), "staff logged in");
        let token = self.issue_token(&user)?;
        Ok(Session { token, user })
    }

    pub async fn register(&self, db: &Database, input: CreateUser) -> AppResult<User> {
        let input = input.validate()?;
        let hash = self.hash_password(&input.password).await?;
        Accounts::new(db).create_user(&input, &hash).await
    }

    pub async fn authenticate(&self, db: &Database, credential: Credential) -> AppResult<AuthorizedCaller> {
        match credential {
            Credential::Staff(token) => {
                let claims = self.signer.verify(&token, Utc::now())?;
                Ok(AuthorizedCaller {
                    id: claims.sub,
                    name: claims.name,
                    role: claims.role,
                })
            }
            Credential::StudentPin(pin) => {
                let student = Roster::new(db)
                    .find_student_by_pin(&pin)
                    .await?
                    .ok_or_else(|| AppError::Unauthorized("unknown student pin".to_string()))?;
                Ok(AuthorizedCaller {
                    id: student.id,
                    name: student.name,
                    role: Role::Student,
                })
            }
        }
    }

    /// Creates the configured admin when no staff account exists yet.
    pub async fn bootstrap_admin(&self, db: &Database, admin: &BootstrapAdmin) -> AppResult<Option<User>> {
        if Accounts::new(db).count_users().await? > 0 {
            return Ok(None);
        }

        let user = self
            .register(
                db,
                CreateUser {
                    name: admin.name.clone(),
                    email: admin.email.clone(),
                    password: admin.password.clone(),
                    role: Role::Admin,
                },
            )
            .await?;
        tracing::info!(user_id = user.id, email = %user.email, "bootstrap admin created");
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::CreateStudent;

    fn auth_config() -> config::Auth {
        config::Auth {
            token_secret: "auth-test-secret".into(),
            token_ttl_hours: 1,
            bcrypt_cost: 4,
            bootstrap_admin: None,
        }
    }

    fn admin() -> BootstrapAdmin {
        BootstrapAdmin {
            name: "Librarian".into(),
            email: "librarian@school.test".into(),
            password: "correct horse".into(),
        }
    }

    #[test]
    fn test_role_gate() {
        let student = AuthorizedCaller {
            id: 3,
            name: "Arnold".into(),
            role: Role::Student,
        };
        assert!(student.require(crate::model::ANY_ROLE).is_ok());
        assert!(matches!(
            student.require(crate::model::STAFF),
            Err(AppError::Forbidden(_))
        ));
        assert!(student.require_self_or_staff(3).is_ok());
        assert!(matches!(student.require_self_or_staff(4), Err(AppError::Forbidden(_))));

        let teacher = AuthorizedCaller {
            id: 1,
            name: "Ms. Frizzle".into(),
            role: Role::Teacher,
        };
        assert!(teacher.require(crate::model::STAFF).is_ok());
        assert!(matches!(
            teacher.require(crate::model::ADMIN_ONLY),
            Err(AppError::Forbidden(_))
        ));
        assert!(teacher.require_self_or_staff(99).is_ok());
    }

    #[tokio::test]
    async fn test_login_and_token_round_trip() {
        let db = Database::open_local(":memory:").await.unwrap();
        let auth = Authenticator::new(&auth_config());

        let created = auth.bootstrap_admin(&db, &admin()).await.unwrap().unwrap();
        assert_eq!(created.role, Role::Admin);
        // second bootstrap is skipped
        assert!(auth.bootstrap_admin(&db, &admin()).await.unwrap().is_none());

        let session = auth
            .login(&db, "librarian@school.test", "correct horse")
            .await
            .unwrap();
        let caller = auth
            .authenticate(&db, Credential::Staff(session.token))
            .await
            .unwrap();
        assert_eq!(caller.id, created.id);
        assert_eq!(caller.role, Role::Admin);

        assert!(matches!(
            auth.login(&db, "librarian@school.test", "wrong").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_email_still_runs_bcrypt() {
        let db = Database::open_local(":memory:").await.unwrap();
        let auth = Authenticator::new(&auth_config());
        auth.bootstrap_admin(&db, &admin()).await.unwrap();

        auth.login(&db, "librarian@school.test", "correct horse").await.unwrap();
        assert!(auth.dummy_hash.get().is_none());

        assert!(matches!(
            auth.login(&db, "nobody@school.test", "correct horse").await,
            Err(AppError::Unauthorized(_))
        ));
        let dummy = auth.dummy_hash.get().unwrap();
        assert!(dummy.starts_with("$2"));
        assert!(!bcrypt::verify("correct horse", dummy).unwrap());
    }

    #[tokio::test]
    async fn test_student_pin_authentication() {
        let db = Database::open_local(":memory:").await.unwrap();
        let auth = Authenticator::new(&auth_config());
        let student = Roster::new(&db)
            .create_student(CreateStudent {
                name: "Arnold".into(),
                grade: Some("3".into()),
                class_id: None,
                pin: "0420".into(),
            })
            .await
            .unwrap();

        let caller = auth
            .authenticate(&db, Credential::StudentPin("0420".into()))
            .await
            .unwrap();
        assert_eq!(caller.id, student.id);
        assert_eq!(caller.role, Role::Student);

        assert!(matches!(
            auth.authenticate(&db, Credential::StudentPin("9999".into())).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            auth.authenticate(&db, Credential::Staff("not-a-token".into())).await,
            Err(AppError::Unauthorized(_))
        ));
    }
}
