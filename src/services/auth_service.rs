use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::OsRng;
use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::{
    dto::auth::{Claims, LoginRequest, LoginResponse, RegisterRequest},
    entity::users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    error::{AppError, AppResult},
    models::User,
};

const TOKEN_TTL_HOURS: i64 = 24;

pub async fn register_user(conn: &DatabaseConnection, payload: RegisterRequest) -> AppResult<User> {
    let RegisterRequest { email, password } = payload;
    let email = email.trim().to_ascii_lowercase();
    if !email.contains('@') {
        return Err(AppError::validation("email is invalid"));
    }
    if password.len() < 8 {
        return Err(AppError::validation("password must be at least 8 characters"));
    }

    let taken = Users::find()
        .filter(UserCol::Email.eq(email.as_str()))
        .one(conn)
        .await?;
    if taken.is_some() {
        return Err(AppError::validation("email is already taken"));
    }

    let created = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email),
        password_hash: Set(hash_password(&password)?),
        role: Set("user".into()),
        created_at: NotSet,
    }
    .insert(conn)
    .await?;

    tracing::info!(user_id = %created.id, "user registered");
    Ok(user_from_entity(created))
}

pub async fn login_user(
    conn: &DatabaseConnection,
    jwt_secret: &str,
    payload: LoginRequest,
) -> AppResult<(User, LoginResponse)> {
    let LoginRequest { email, password } = payload;
    let invalid = || AppError::Authentication("invalid email or password".into());

    let user = Users::find()
        .filter(UserCol::Email.eq(email.trim().to_ascii_lowercase()))
        .one(conn)
        .await?
        .map(user_from_entity)
        .ok_or_else(invalid)?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid password hash")))?;
    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(invalid());
    }

    let (token, expires_at) = issue_token(user.id, &user.role, jwt_secret)?;
    tracing::debug!(user_id = %user.id, "token issued");
    let response = LoginResponse {
        token: format!("Bearer {token}"),
        user_id: user.id,
        role: user.role.clone(),
        expires_at,
    };
    Ok((user, response))
}

pub async fn get_user(conn: &DatabaseConnection, user_id: Uuid) -> AppResult<User> {
    Users::find_by_id(user_id)
        .one(conn)
        .await?
        .map(user_from_entity)
        .ok_or(AppError::NotFound)
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

/// Signs a token for `user_id` and returns it with its expiry.
pub fn issue_token(user_id: Uuid, role: &str, secret: &str) -> AppResult<(String, DateTime<Utc>)> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(TOKEN_TTL_HOURS))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("failed to set expiration")))?;
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: expiration.timestamp() as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;
    Ok((token, expiration))
}

pub fn decode_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Authentication("invalid or expired token".into()))
}

fn user_from_entity(model: UserModel) -> User {
    User {
        id: model.id,
        email: model.email,
        password_hash: model.password_hash,
        created_at: model.created_at.with_timezone(&Utc),
        role: model.role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_with_the_same_secret() {
        let user_id = Uuid::new_v4();
        let (token, expires_at) = issue_token(user_id, "admin", "secret").unwrap();
        assert!(expires_at > Utc::now());

        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, "admin");

        assert!(matches!(
            decode_token(&token, "other"),
            Err(AppError::Authentication(_))
        ));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default().verify_password(b"correct horse", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }
}
