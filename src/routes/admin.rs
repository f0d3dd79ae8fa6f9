use actix_web::{web, HttpResponse};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::auth::{self, AdminSession, OptionalAuthUser};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::events::{self, EventDto, EventFilter, EventPatch, NewEvent};
use crate::registration::{self, AdminRegistrationDto};
use crate::response::{redirect, redirect_with, Notice, PageDto};
use crate::routes::accounts::{LoginForm, LoginPageData, NextQuery};
use crate::routes::{safe_next, NoticeQuery};
use crate::student;

const PANEL_URL: &str = "/admin-panel/";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/admin-login/")
            .route(web::get().to(login_page))
            .route(web::post().to(login)),
    )
    .service(web::resource("/admin-logout/").route(web::post().to(logout)))
    .service(web::resource("/admin-panel/").route(web::get().to(panel)))
    .service(web::resource("/admin-panel/events/create/").route(web::post().to(create_event)))
    .service(
        web::resource("/admin-panel/events/{id:\\d+}/update/").route(web::post().to(update_event)),
    )
    .service(
        web::resource("/admin-panel/events/{id:\\d+}/delete/").route(web::post().to(delete_event)),
    );
}

#[derive(Serialize)]
struct PanelData {
    registrations: Vec<AdminRegistrationDto>,
    events: Vec<EventDto>,
    total_registrations: usize,
    total_events: usize,
}

/// HTML form fields arrive as strings; blank means "leave as is", except time where blank clears it.
#[derive(Deserialize)]
struct EventForm {
    name: Option<String>,
    description: Option<String>,
    date: Option<String>,
    time: Option<String>,
    venue: Option<String>,
    image: Option<String>,
}

impl From<EventForm> for EventPatch {
    fn from(form: EventForm) -> Self {
        let keep_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        EventPatch {
            name: keep_blank(form.name),
            description: keep_blank(form.description),
            date: keep_blank(form.date),
            time: form.time.map(|t| Some(t).filter(|s| !s.trim().is_empty())),
            venue: keep_blank(form.venue),
            image: keep_blank(form.image),
        }
    }
}

async fn login_page(
    auth: OptionalAuthUser,
    query: web::Query<NextQuery>,
) -> Result<HttpResponse, AppError> {
    if auth.0.map(|a| a.is_admin).unwrap_or(false) {
        return Ok(redirect(&safe_next(query.next.as_deref(), PANEL_URL)));
    }
    let data = LoginPageData {
        username: String::new(),
        next: query.next.clone(),
    };
    Ok(PageDto::new("admin_login", data).render())
}

async fn login(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    form: web::Form<LoginForm>,
) -> Result<HttpResponse, AppError> {
    let user = student::authenticate(db.get_ref(), &form.username, &form.password).await?;
    let error = match user {
        Some(user) if user.is_admin() => {
            let token = auth::issue_token(&config, user.id)?;
            let mut resp = redirect(&safe_next(form.next.as_deref(), PANEL_URL));
            resp.add_cookie(&auth::session_cookie(&config, token))
                .map_err(|_| AppError::system_exception())?;
            info!("admin '{}' logged in", user.username);
            return Ok(resp);
        }
        Some(user) => {
            warn!("non-admin '{}' tried the admin login", user.username);
            "This account does not have admin access."
        }
        None => {
            warn!("failed admin login for '{}'", form.username.trim());
            "Invalid username or password."
        }
    };
    let data = LoginPageData {
        username: form.username.clone(),
        next: form.next.clone(),
    };
    Ok(PageDto::new("admin_login", data).error(error).render())
}

async fn logout(config: web::Data<AppConfig>) -> Result<HttpResponse, AppError> {
    let mut resp = redirect_with("/events/", Notice::LoggedOut);
    resp.add_removal_cookie(&auth::expired_cookie(&config))
        .map_err(|_| AppError::system_exception())?;
    Ok(resp)
}

async fn render_panel(
    db: &DatabaseConnection,
    notice: Option<Notice>,
    error: Option<String>,
) -> Result<HttpResponse, AppError> {
    let registrations: Vec<AdminRegistrationDto> = registration::list_all(db)
        .await?
        .into_iter()
        .map(|(reg, event)| AdminRegistrationDto::new(reg, &event))
        .collect();
    let events: Vec<EventDto> = events::list_events(db, EventFilter::All, events::today())
        .await?
        .into_iter()
        .map(EventDto::from)
        .collect();
    let data = PanelData {
        total_registrations: registrations.len(),
        total_events: events.len(),
        registrations,
        events,
    };
    let page = PageDto::new("admin_panel", data).notice(notice);
    let page = match error {
        Some(error) => page.error(error),
        None => page,
    };
    Ok(page.render())
}

async fn panel(
    db: web::Data<DatabaseConnection>,
    _session: AdminSession,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    render_panel(db.get_ref(), query.notice(), None).await
}

async fn create_event(
    db: web::Data<DatabaseConnection>,
    _session: AdminSession,
    form: web::Form<NewEvent>,
) -> Result<HttpResponse, AppError> {
    match events::create_event(db.get_ref(), form.into_inner()).await {
        Ok(_) => Ok(redirect_with(PANEL_URL, Notice::EventCreated)),
        Err(AppError::Invalid(msg)) => render_panel(db.get_ref(), None, Some(msg)).await,
        Err(err) => Err(err),
    }
}

async fn update_event(
    db: web::Data<DatabaseConnection>,
    _session: AdminSession,
    path: web::Path<i32>,
    form: web::Form<EventForm>,
) -> Result<HttpResponse, AppError> {
    match events::update_event(db.get_ref(), *path, form.into_inner().into()).await {
        Ok(_) => Ok(redirect_with(PANEL_URL, Notice::EventUpdated)),
        Err(AppError::Invalid(msg)) => render_panel(db.get_ref(), None, Some(msg)).await,
        Err(err) => Err(err),
    }
}

async fn delete_event(
    db: web::Data<DatabaseConnection>,
    _session: AdminSession,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    events::delete_event(db.get_ref(), *path).await?;
    Ok(redirect_with(PANEL_URL, Notice::EventDeleted))
}
