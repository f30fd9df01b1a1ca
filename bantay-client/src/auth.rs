//! Sign-in and registration against the `users` table.
//!
//! Passwords are compared as stored. There is no hashing and no Supabase Auth here.

use mirror::{Filter, FetchError, MutationBackend, QueryBackend, Select};

use crate::AppError;
use crate::context::Session;
use crate::models::{Role, User, UserCounts};

pub const USERS_TABLE: &str = "users";

#[derive(serde::Deserialize)]
struct LoginRow {
    #[serde(flatten)]
    user: User,
    password: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), AppError> {
        let fields = [
            &self.username,
            &self.first_name,
            &self.last_name,
            &self.email,
            &self.password,
        ];
        if fields.iter().any(|field| field.trim().is_empty()) {
            return Err(AppError::validation("All fields are required!"));
        }
        Ok(())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "username": self.username,
            "firstname": self.first_name,
            "lastname": self.last_name,
            "email": self.email.trim(),
            "password": self.password,
            "role": Role::User,
        })
    }
}

pub async fn login<B: QueryBackend>(
    backend: &B,
    email: &str,
    password: &str,
) -> Result<Session, AppError> {
    let select = Select::from(USERS_TABLE)
        .filter(Filter::eq("email", email.trim()))
        .limit(1);
    let rows = backend.select(&select).await?;
    let Some(row) = rows.into_iter().next() else {
        return Err(AppError::NotFound("No account uses that email.".to_string()));
    };
    let row: LoginRow = serde_json::from_value(row).map_err(|source| FetchError::Decode {
        table: USERS_TABLE.to_string(),
        source,
    })?;
    if row.password != password {
        log::info!("Rejected sign-in for {}", row.user.email);
        return Err(AppError::Auth("Incorrect password.".to_string()));
    }
    Ok(Session { user: row.user })
}

pub async fn register<B: QueryBackend + MutationBackend>(
    backend: &B,
    registration: &Registration,
) -> Result<(), AppError> {
    registration.validate()?;

    let existing = Select::from(USERS_TABLE)
        .columns("id")
        .filter(Filter::eq("email", registration.email.trim()))
        .limit(1);
    if !backend.select(&existing).await?.is_empty() {
        return Err(AppError::validation("Email is already registered!"));
    }

    backend
        .insert(USERS_TABLE, vec![registration.to_json()])
        .await?;
    log::info!("Registered {}", registration.email.trim());
    Ok(())
}

pub async fn user_counts<B: QueryBackend>(backend: &B) -> Result<UserCounts, FetchError> {
    let rows = backend
        .select(&Select::from(USERS_TABLE).columns("role"))
        .await?;
    let roles = rows
        .into_iter()
        .map(|row| {
            serde_json::from_value::<Role>(row.get("role").cloned().unwrap_or_default())
                .unwrap_or_default()
        });
    Ok(UserCounts::from_roles(roles))
}
