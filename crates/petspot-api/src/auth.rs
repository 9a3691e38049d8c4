use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use petspot_crypto::{DUMMY_PASSWORD_HASH, PasswordHasher};
use petspot_db::{Database, is_unique_violation};
use petspot_types::api::{AuthResponse, Claims, Credentials, ErrorCode};

use crate::blocking;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;
use crate::validation::{Validator, required};

/// Access tokens expire one hour after issue.
pub const TOKEN_TTL_SECS: i64 = 3600;

pub struct UserService {
    db: Arc<Database>,
    hasher: Arc<PasswordHasher>,
    jwt_secret: String,
    registration: Arc<dyn Validator<Credentials>>,
    login: Arc<dyn Validator<Credentials>>,
}

impl UserService {
    pub fn new(
        db: Arc<Database>,
        hasher: Arc<PasswordHasher>,
        jwt_secret: String,
        registration: Arc<dyn Validator<Credentials>>,
        login: Arc<dyn Validator<Credentials>>,
    ) -> Self {
        Self {
            db,
            hasher,
            jwt_secret,
            registration,
            login,
        }
    }

    /// Create an account and log straight into it.
    pub async fn register_user(&self, creds: Credentials) -> Result<AuthResponse, ApiError> {
        self.registration.validate(&creds)?;
        let (email, password) = normalize(&creds)?;

        let db = self.db.clone();
        let hasher = self.hasher.clone();
        let (lookup_email, secret) = (email.clone(), password.clone());
        let user_id = blocking(move || {
            if db.email_exists(&lookup_email)? {
                return Err(ApiError::Conflict("Email already registered".into()));
            }

            let password_hash = hasher.hash(&secret)?;
            let user_id = Uuid::new_v4().to_string();
            db.create_user(&user_id, &lookup_email, &password_hash)
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::Conflict("Email already registered".into())
                    } else {
                        ApiError::Internal(e)
                    }
                })?;
            Ok(user_id)
        })
        .await?;

        info!("User {} registered", user_id);

        self.login_user(Credentials {
            email: Some(email),
            password: Some(password),
        })
        .await
    }

    /// Exchange credentials for an access token.
    ///
    /// The password check runs whether or not the account exists, so an
    /// unknown email costs the same as a wrong password and both fail with
    /// the same error.
    pub async fn login_user(&self, creds: Credentials) -> Result<AuthResponse, ApiError> {
        self.login.validate(&creds)?;
        let (email, password) = normalize(&creds)?;

        let db = self.db.clone();
        let hasher = self.hasher.clone();
        let user_id = blocking(move || {
            let user = db.find_user_by_email(&email)?;
            let stored = user
                .as_ref()
                .map(|u| u.password_hash.as_str())
                .unwrap_or(DUMMY_PASSWORD_HASH);
            let verified = hasher.verify(&password, stored);

            match user {
                Some(user) if verified => Ok(user.id),
                _ => Err(ApiError::InvalidCredentials),
            }
        })
        .await
        .inspect_err(|e| {
            if matches!(e, ApiError::InvalidCredentials) {
                warn!("Failed login attempt");
            }
        })?;

        let access_token = self.issue_token(&user_id)?;
        Ok(AuthResponse {
            user_id,
            access_token,
        })
    }

    pub fn issue_token(&self, user_id: &str) -> Result<String, ApiError> {
        let iat = chrono::Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.to_string(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(anyhow::Error::from)?;

        Ok(token)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::Unauthenticated)?;

        Ok(token_data.claims)
    }
}

/// Trimmed, lowercased email and the password as given.
fn normalize(creds: &Credentials) -> Result<(String, String), ApiError> {
    let email = required("email", creds.email.as_deref())?.to_lowercase();
    let password = creds
        .password
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::validation("password", ErrorCode::MissingValue))?;
    Ok((email, password))
}

// -- Handlers --

/// POST /api/v1/users
pub async fn register(
    State(state): State<AppState>,
    ApiJson(creds): ApiJson<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.users.register_user(creds).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/users/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(creds): ApiJson<Credentials>,
) -> Result<Json<AuthResponse>, ApiError> {
    let response = state.users.login_user(creds).await?;
    Ok(Json(response))
}
