use actix_web::{HttpResponse, post, web};
use chrono::{DateTime, Utc};
use pulse::UserId;
use serde::{Deserialize, Serialize};
use storage::User;

use crate::auth::{hash_password, verify_password};
use crate::error::AppError;
use crate::state::AppState;

macros_utils::routes! {
    scope "/auth",
    route signup,
    route login,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

/// Form fields of the OAuth2 password flow; `username` holds the email
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self { id: user.id, email: user.email, created_at: user.created_at }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if valid && !email.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(AppError::BadRequest("value is not a valid email address".to_string()))
    }
}

#[post("/signup")]
pub async fn signup(
    state: web::Data<AppState>,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, AppError> {
    let SignupRequest { email, password } = payload.into_inner();
    validate_email(&email)?;

    let users = state.storage.users();
    if users.find_by_email(&email).await?.is_some() {
        return Err(AppError::BadRequest("Email already registered".to_string()));
    }

    let hashed = hash_password(password, state.bcrypt_cost).await?;
    let user = users.create(&email, &hashed).await?;
    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    form: web::Form<LoginForm>,
) -> Result<HttpResponse, AppError> {
    let LoginForm { username, password } = form.into_inner();

    let Some(user) = state.storage.users().find_by_email(&username).await? else {
        return Err(AppError::Unauthorized("Invalid credentials"));
    };
    if !verify_password(password, user.hashed_password).await? {
        return Err(AppError::Unauthorized("Invalid credentials"));
    }

    let access_token = state.keys.issue(user.id)?;
    Ok(HttpResponse::Ok().json(TokenResponse { access_token, token_type: "bearer".to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@example.com").is_ok());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a b@example.com").is_err());
        assert!(validate_email("example.com").is_err());
    }
}
