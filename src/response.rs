use actix_web::{error::JsonPayloadError, http::header, HttpRequest, HttpResponse};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::error::AppError;

/// JSON envelope: `{"success": true, ...data}` or `{"success": false, "error": "..."}`.
#[derive(Serialize)]
pub struct ResponseDto<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> ResponseDto<T> {
    pub fn success(data: Option<T>) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
            data: None,
        }
    }
}

/// Everything a template needs to draw one page.
#[derive(Serialize)]
pub struct PageDto<T: Serialize> {
    pub page: &'static str,
    pub notice: Option<String>,
    pub error: Option<String>,
    pub data: T,
}

impl<T: Serialize> PageDto<T> {
    pub fn new(page: &'static str, data: T) -> Self {
        Self {
            page,
            notice: None,
            error: None,
            data,
        }
    }

    pub fn notice(mut self, notice: Option<Notice>) -> Self {
        self.notice = notice.map(|n| n.message().to_string());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn render(self) -> HttpResponse {
        HttpResponse::Ok().json(self)
    }
}

/// One-shot messages carried across a redirect as `?notice=<key>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    Registered,
    Welcome,
    LoggedIn,
    LoggedOut,
    ProfileUpdated,
    RegistrationUpdated,
    RegistrationCancelled,
    EventCreated,
    EventUpdated,
    EventDeleted,
}

impl Notice {
    const ALL: [Notice; 10] = [
        Notice::Registered,
        Notice::Welcome,
        Notice::LoggedIn,
        Notice::LoggedOut,
        Notice::ProfileUpdated,
        Notice::RegistrationUpdated,
        Notice::RegistrationCancelled,
        Notice::EventCreated,
        Notice::EventUpdated,
        Notice::EventDeleted,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Notice::Registered => "registered",
            Notice::Welcome => "welcome",
            Notice::LoggedIn => "logged_in",
            Notice::LoggedOut => "logged_out",
            Notice::ProfileUpdated => "profile_updated",
            Notice::RegistrationUpdated => "registration_updated",
            Notice::RegistrationCancelled => "registration_cancelled",
            Notice::EventCreated => "event_created",
            Notice::EventUpdated => "event_updated",
            Notice::EventDeleted => "event_deleted",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Notice::Registered => "Registration successful!",
            Notice::Welcome => "Welcome! Your account has been created.",
            Notice::LoggedIn => "You are now logged in.",
            Notice::LoggedOut => "You have been logged out successfully.",
            Notice::ProfileUpdated => "Profile updated.",
            Notice::RegistrationUpdated => "Registration updated.",
            Notice::RegistrationCancelled => "Registration cancelled.",
            Notice::EventCreated => "Event created.",
            Notice::EventUpdated => "Event updated.",
            Notice::EventDeleted => "Event deleted.",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.key() == key)
    }
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location))
        .finish()
}

pub fn redirect_with(path: &str, notice: Notice) -> HttpResponse {
    redirect(&format!("{}?notice={}", path, notice.key()))
}

/// Escapes a path for use as a query value; `/` and unreserved characters pass through.
pub fn encode_query_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let app_err = match err {
        JsonPayloadError::ContentType => AppError::param_error("Expected a JSON request body."),
        _ => AppError::param_error("Invalid request body."),
    };
    app_err.into()
}

pub fn response_from_error(err: &AppError) -> HttpResponse {
    HttpResponse::build(actix_web::ResponseError::status_code(err))
        .json(ResponseDto::<()>::fail(err.msg()))
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn fmt_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn fmt_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
