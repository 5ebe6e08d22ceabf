use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{MessageLogEntry, NewUser, Role, User};

use super::{Store, StoreError};

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let _: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, phone, role, whatsapp_name, created_at
             FROM users
             WHERE phone = $1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| user_from_row(&row)).transpose()
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, phone, role, whatsapp_name, created_at
             FROM users
             WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| user_from_row(&row)).transpose()
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let row = sqlx::query(
            "INSERT INTO users (name, phone, role, whatsapp_name)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, phone, role, whatsapp_name, created_at",
        )
        .bind(&user.name)
        .bind(&user.phone)
        .bind(user.role.as_str())
        .bind(user.whatsapp_name.as_deref())
        .fetch_one(&self.pool)
        .await?;

        user_from_row(&row)
    }

    pub async fn log_message(&self, entry: &MessageLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO whatsapp_messages_log (
                wamid,
                phone_number,
                direction,
                message_type,
                content,
                status
             ) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.wamid.as_deref())
        .bind(&entry.phone_number)
        .bind(entry.direction.as_str())
        .bind(&entry.message_type)
        .bind(&entry.content)
        .bind(&entry.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(super) fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        role: Role::from_db(&role)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown user role persisted: {role}")))?,
        whatsapp_name: row.try_get("whatsapp_name")?,
        created_at: row.try_get("created_at")?,
    })
}
