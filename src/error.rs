use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use sea_orm::DbErr;
use thiserror::Error;

use crate::response::{encode_query_value, redirect, response_from_error};

#[derive(Debug, Error)]
pub enum AppError {
    /// A user-facing validation failure.
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    /// JSON routes: no valid session.
    #[error("please login first")]
    NeedLogin,
    /// JSON routes: logged in but not allowed.
    #[error("{0}")]
    Forbidden(String),
    /// Page routes: bounce to a login page, remembering where we came from.
    #[error("login required")]
    LoginRequired { login_url: &'static str, next: String },
    #[error("system_exception")]
    System,
}

impl AppError {
    pub fn param_error(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }

    pub fn admin_required() -> Self {
        Self::Forbidden("Admin access required.".to_string())
    }

    pub fn login_required(login_url: &'static str, next: impl Into<String>) -> Self {
        Self::LoginRequired {
            login_url,
            next: next.into(),
        }
    }

    pub fn system_exception() -> Self {
        Self::System
    }

    /// Logs the store failure and hides its text from the client.
    pub fn db(context: &str, err: DbErr) -> Self {
        error!("{} failed: {}", context, err);
        Self::System
    }

    pub fn msg(&self) -> String {
        self.to_string()
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NeedLogin => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::LoginRequired { .. } => StatusCode::SEE_OTHER,
            Self::System => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            Self::LoginRequired { login_url, next } => {
                redirect(&format!("{}?next={}", login_url, encode_query_value(next)))
            }
            _ => response_from_error(self),
        }
    }
}
