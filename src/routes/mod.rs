pub mod accounts;
pub mod admin;
pub mod api;
pub mod cache;
pub mod public;

use actix_web::{middleware::from_fn, web};
use serde::Deserialize;

use crate::response::Notice;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .wrap(from_fn(cache::no_cache_handler))
            .configure(api::config),
    )
    .service(web::scope("/accounts").configure(accounts::config))
    .configure(admin::config)
    .configure(public::config);
}

/// `?notice=` left behind by a redirect.
#[derive(Deserialize, Default)]
pub struct NoticeQuery {
    notice: Option<String>,
}

impl NoticeQuery {
    pub fn notice(&self) -> Option<Notice> {
        self.notice.as_deref().and_then(Notice::from_key)
    }
}

/// Only same-site absolute paths are followed after login.
pub fn safe_next(next: Option<&str>, fallback: &str) -> String {
    match next.map(str::trim) {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path.to_string(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use actix_web::{
        body::MessageBody,
        dev::{ServiceFactory, ServiceRequest, ServiceResponse},
        http::header,
        web, App, Error,
    };
    use sea_orm::DatabaseConnection;

    use crate::auth::issue_token;
    use crate::config::AppConfig;
    use crate::response::json_error_handler;

    pub fn app(
        db: DatabaseConnection,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody>,
            Error = Error,
            InitError = (),
        >,
    > {
        App::new()
            .app_data(web::Data::new(AppConfig::for_tests()))
            .app_data(web::Data::new(db))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .configure(super::config)
    }

    pub fn token_for(user_id: i32) -> (&'static str, String) {
        ("token", issue_token(&AppConfig::for_tests(), user_id).unwrap())
    }

    pub fn location<B>(resp: &ServiceResponse<B>) -> String {
        resp.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }
}
