//! services/user_service.rs
//! User Store: colección de usuarios con email único (sin distinguir mayúsculas).

use anyhow::{anyhow, Context, Result};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite};
use thiserror::Error;
use uuid::Uuid;

use crate::models::user_model::{NewUser, Role, UserFilter, UserRecord};

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("User already exists")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Operaciones que el motor de trabajos necesita del almacén de usuarios.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Falla con `DuplicateEmail` si el email ya existe.
    async fn create(&self, user: NewUser) -> Result<UserRecord, UserStoreError>;

    /// Persiste los campos mutables y devuelve el documento actualizado.
    async fn update(&self, user: &UserRecord) -> Result<UserRecord>;

    /// `false` si el usuario no existía.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Usuarios que cumplen el filtro, en orden de creación.
    async fn query(&self, filter: &UserFilter) -> Result<Vec<UserRecord>>;
}

#[derive(Clone, Debug)]
pub struct SqliteUserStore {
    db_pool: Pool<Sqlite>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    password_hash: String,
    roles: String,
    current_role: String,
    account_status: String,
    suspension_reason: Option<String>,
    email_verified: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let roles: Vec<Role> = serde_json::from_str(&row.roles)
            .with_context(|| format!("Invalid roles column for user {}", row.id))?;
        Ok(UserRecord {
            current_role: row.current_role.parse().map_err(|e: String| anyhow!(e))?,
            account_status: row.account_status.parse().map_err(|e: String| anyhow!(e))?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            password_hash: row.password_hash,
            roles,
            suspension_reason: row.suspension_reason,
            email_verified: row.email_verified,
        })
    }
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, phone, password_hash, roles, \
     current_role, account_status, suspension_reason, email_verified, created_at, updated_at";

impl SqliteUserStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SqliteUserStore { db_pool }
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(normalize_id(id))
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load user by id")?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email.trim())
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load user by email")?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, UserStoreError> {
        let now = Utc::now();
        let roles = if user.roles.is_empty() {
            vec![Role::Mentee]
        } else {
            user.roles
        };
        let record = UserRecord {
            id: generate_object_id(),
            first_name: user.first_name.trim().to_string(),
            last_name: user.last_name.trim().to_string(),
            email: user.email.trim().to_lowercase(),
            phone: user.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            password_hash: user.password_hash,
            current_role: roles[0],
            roles,
            account_status: user.account_status,
            suspension_reason: None,
            email_verified: user.email_verified,
            created_at: now,
            updated_at: now,
        };

        let roles_json = serde_json::to_string(&record.roles).context("Failed to encode roles")?;
        let result = sqlx::query(
            r#"
            INSERT INTO users (
                id, first_name, last_name, email, phone, password_hash, roles,
                current_role, account_status, suspension_reason, email_verified,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            "#,
        )
        .bind(&record.id)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.password_hash)
        .bind(roles_json)
        .bind(record.current_role.as_str())
        .bind(record.account_status.as_str())
        .bind(&record.suspension_reason)
        .bind(record.email_verified)
        .bind(format_timestamp(&now))
        .execute(&self.db_pool)
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(UserStoreError::DuplicateEmail)
            }
            Err(e) => Err(UserStoreError::Other(
                anyhow::Error::new(e).context("Failed to insert user"),
            )),
        }
    }

    async fn update(&self, user: &UserRecord) -> Result<UserRecord> {
        let now = Utc::now();
        let roles_json = serde_json::to_string(&user.roles).context("Failed to encode roles")?;
        let result = sqlx::query(
            r#"
            UPDATE users
            SET first_name = ?2,
                last_name = ?3,
                phone = ?4,
                roles = ?5,
                current_role = ?6,
                account_status = ?7,
                suspension_reason = ?8,
                email_verified = ?9,
                updated_at = ?10
            WHERE id = ?1
            "#,
        )
        .bind(&user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(roles_json)
        .bind(user.current_role.as_str())
        .bind(user.account_status.as_str())
        .bind(&user.suspension_reason)
        .bind(user.email_verified)
        .bind(format_timestamp(&now))
        .execute(&self.db_pool)
        .await
        .context("Failed to update user")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("User not found"));
        }

        let mut updated = user.clone();
        updated.updated_at = now;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(normalize_id(id))
            .execute(&self.db_pool)
            .await
            .context("Failed to delete user")?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, filter: &UserFilter) -> Result<Vec<UserRecord>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users WHERE 1 = 1"));

        if let Some(roles) = filter.roles.as_ref().filter(|r| !r.is_empty()) {
            builder.push(" AND EXISTS (SELECT 1 FROM json_each(users.roles) WHERE json_each.value IN (");
            let mut separated = builder.separated(", ");
            for role in roles {
                separated.push_bind(role.as_str());
            }
            separated.push_unseparated("))");
        }
        if let Some(status) = filter.status {
            builder.push(" AND account_status = ").push_bind(status.as_str());
        }
        if let Some(verified) = filter.is_verified {
            builder.push(" AND email_verified = ").push_bind(verified);
        }
        if let Some(after) = filter.created_after {
            builder
                .push(" AND created_at >= ")
                .push_bind(format_timestamp(&after));
        }
        if let Some(before) = filter.created_before {
            builder
                .push(" AND created_at <= ")
                .push_bind(format_timestamp(&before));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            builder
                .push(" AND (lower(first_name) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR lower(last_name) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR lower(email) LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        builder.push(" ORDER BY created_at ASC, rowid ASC");

        let rows = builder
            .build_query_as::<UserRow>()
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to query users")?;

        rows.into_iter().map(UserRecord::try_from).collect()
    }
}

/// Identificador estilo ObjectId: 4 bytes de timestamp + 8 bytes aleatorios, en hex.
pub fn generate_object_id() -> String {
    let seconds = Utc::now().timestamp() as u32;
    let random = Uuid::new_v4().simple().to_string();
    format!("{:08x}{}", seconds, &random[..16])
}

/// Los ids se guardan en hex minúscula; se aceptan en cualquier caja.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp: {raw}"))?
        .with_timezone(&Utc))
}

