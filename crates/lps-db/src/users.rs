//! Operator accounts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use lps_schemas::UserRole;

const USER_COLUMNS: &str = "id, email, hashed_password, full_name, role, is_active, \
     is_verified, created_at, updated_at, last_login";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub full_name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

fn user_from_row(row: &PgRow) -> Result<UserRow> {
    Ok(UserRow {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        hashed_password: row.try_get("hashed_password")?,
        full_name: row.try_get("full_name")?,
        role: UserRole::parse(&row.try_get::<String, _>("role")?)?,
        is_active: row.try_get("is_active")?,
        is_verified: row.try_get("is_verified")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_login: row.try_get("last_login")?,
    })
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    /// Argon2 hash, never a plain password.
    pub hashed_password: String,
    pub full_name: String,
    pub role: UserRole,
}

pub async fn insert_user(pool: &PgPool, user: &NewUser) -> Result<UserRow> {
    let row = sqlx::query(&format!(
        r#"
        insert into users (email, hashed_password, full_name, role)
        values ($1, $2, $3, $4)
        returning {USER_COLUMNS}
        "#
    ))
    .bind(&user.email)
    .bind(&user.hashed_password)
    .bind(&user.full_name)
    .bind(user.role.as_str())
    .fetch_one(pool)
    .await
    .context("insert_user failed")?;

    user_from_row(&row)
}

pub async fn fetch_user(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRow>> {
    let row = sqlx::query(&format!("select {USER_COLUMNS} from users where id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("fetch_user failed")?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRow>> {
    let row = sqlx::query(&format!("select {USER_COLUMNS} from users where email = $1"))
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("find_user_by_email failed")?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn touch_last_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    sqlx::query("update users set last_login = now() where id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .context("touch_last_login failed")?;
    Ok(())
}
