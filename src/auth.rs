use actix_web::{
    cookie::{time::Duration as CookieDuration, Cookie, SameSite},
    dev::Payload,
    web, FromRequest, HttpRequest,
};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::warn;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::entity::user;
use crate::error::AppError;

pub const STUDENT_LOGIN_URL: &str = "/accounts/login/";
pub const ADMIN_LOGIN_URL: &str = "/admin-login/";

const PASSWORD_COST: u32 = 10;

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i32,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
}

/// Session if one is present; never rejects the request.
#[derive(Clone, Debug)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

/// Staff or superuser, for JSON routes.
#[derive(Clone, Debug)]
pub struct AdminUser(pub AuthUser);

/// Logged-in user for page routes; anonymous visitors go to the student login.
#[derive(Clone, Debug)]
pub struct StudentSession(pub AuthUser);

/// Admin for page routes; everyone else goes to the admin login.
#[derive(Clone, Debug)]
pub struct AdminSession(pub AuthUser);

#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "loginId")]
    login_id: i32,
    exp: usize,
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        extract_with(req, |auth| auth.ok_or(AppError::NeedLogin))
    }
}

impl FromRequest for OptionalAuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        extract_with(req, |auth| Ok(OptionalAuthUser(auth)))
    }
}

impl FromRequest for AdminUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        extract_with(req, |auth| match auth {
            Some(auth) if auth.is_admin => Ok(AdminUser(auth)),
            Some(_) => Err(AppError::admin_required()),
            None => Err(AppError::NeedLogin),
        })
    }
}

impl FromRequest for StudentSession {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let next = req.path().to_string();
        extract_with(req, move |auth| {
            auth.map(StudentSession)
                .ok_or_else(|| AppError::login_required(STUDENT_LOGIN_URL, next))
        })
    }
}

impl FromRequest for AdminSession {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let next = req.path().to_string();
        extract_with(req, move |auth| match auth {
            Some(auth) if auth.is_admin => Ok(AdminSession(auth)),
            Some(auth) => {
                warn!("user {} denied admin page {}", auth.username, next);
                Err(AppError::login_required(ADMIN_LOGIN_URL, next))
            }
            None => Err(AppError::login_required(ADMIN_LOGIN_URL, next)),
        })
    }
}

fn extract_with<T, F>(req: &HttpRequest, finish: F) -> LocalBoxFuture<'static, Result<T, actix_web::Error>>
where
    T: 'static,
    F: FnOnce(Option<AuthUser>) -> Result<T, AppError> + 'static,
{
    let db = match req.app_data::<web::Data<DatabaseConnection>>() {
        Some(db) => db.clone(),
        None => {
            return Box::pin(async { Err(AppError::system_exception().into()) });
        }
    };
    let config = match req.app_data::<web::Data<AppConfig>>() {
        Some(cfg) => cfg.clone(),
        None => {
            return Box::pin(async { Err(AppError::system_exception().into()) });
        }
    };
    let token = extract_token(req, &config);

    Box::pin(async move {
        let auth = match token {
            Some(token) => authenticate_token(&db, &config, &token).await?,
            None => None,
        };
        finish(auth).map_err(Into::into)
    })
}

fn extract_token(req: &HttpRequest, config: &AppConfig) -> Option<String> {
    let name = config.token_header.as_str();
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .or_else(|| req.cookie(name).map(|c| c.value().trim().to_string()))
        .filter(|v| !v.is_empty())
}

/// Resolves a token to its account. Bad or stale tokens count as anonymous.
async fn authenticate_token(
    db: &DatabaseConnection,
    config: &AppConfig,
    token: &str,
) -> Result<Option<AuthUser>, AppError> {
    let user_id = match decode_jwt(config, token) {
        Some(id) => id,
        None => return Ok(None),
    };
    let user = user::Entity::find_by_id(user_id)
        .one(db)
        .await
        .map_err(|e| AppError::db("load session user", e))?;

    Ok(user.map(|u| AuthUser {
        user_id: u.id,
        is_admin: u.is_admin(),
        username: u.username,
        email: u.email,
    }))
}

fn decode_jwt(config: &AppConfig, token: &str) -> Option<i32> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims.login_id)
        .ok()
}

pub fn issue_token(config: &AppConfig, user_id: i32) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::days(config.session_days)).timestamp() as usize;
    let claims = Claims {
        login_id: user_id,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| AppError::system_exception())
}

pub fn session_cookie(config: &AppConfig, token: String) -> Cookie<'static> {
    Cookie::build(config.token_header.clone(), token)
        .path("/")
        .http_only(true)
        .secure(config.secure_cookie)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::days(config.session_days))
        .finish()
}

pub fn expired_cookie(config: &AppConfig) -> Cookie<'static> {
    let mut cookie = Cookie::build(config.token_header.clone(), "")
        .path("/")
        .http_only(true)
        .finish();
    cookie.make_removal();
    cookie
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    hash(password, PASSWORD_COST).map_err(|_| AppError::system_exception())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    verify(password, password_hash).unwrap_or(false)
}
