use actix_web::{web, HttpResponse};
use log::info;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::auth::{AdminUser, AuthUser, OptionalAuthUser};
use crate::error::AppError;
use crate::events::{self, EventDto, EventFilter, EventPatch, NewEvent};
use crate::registration::{self, AdminRegistrationDto};
use crate::response::ResponseDto;
use crate::routes::accounts::{split_by_date, DashboardEntry};
use crate::student::{self, ProfileDto};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/events/").route(web::get().to(list_events)))
        .service(web::resource("/registrations/").route(web::get().to(list_registrations)))
        .service(web::resource("/events/create/").route(web::post().to(create_event)))
        .service(
            web::resource("/events/{id}/update/")
                .route(web::post().to(update_event))
                .route(web::put().to(update_event)),
        )
        .service(
            web::resource("/events/{id}/delete/")
                .route(web::post().to(delete_event))
                .route(web::delete().to(delete_event)),
        )
        .service(web::resource("/user/profile/").route(web::get().to(user_profile)))
        .service(web::resource("/user/registrations/").route(web::get().to(user_registrations)))
        .service(web::resource("/check-registration/").route(web::get().to(check_registration)));
}

#[derive(Deserialize)]
struct FilterQuery {
    filter: Option<String>,
}

impl FilterQuery {
    /// Unknown values fall back to every event.
    fn filter(&self) -> EventFilter {
        match self.filter.as_deref().map(str::trim) {
            Some("upcoming") => EventFilter::Upcoming,
            Some("completed") => EventFilter::Completed,
            _ => EventFilter::All,
        }
    }
}

#[derive(Deserialize)]
struct CheckQuery {
    event_id: Option<i32>,
}

#[derive(Serialize)]
struct EventEnvelope {
    event: EventDto,
}

#[derive(Serialize)]
struct DeletedEnvelope {
    deleted_registrations: u64,
}

#[derive(Serialize)]
struct ProfileEnvelope {
    profile: ProfileDto,
}

#[derive(Serialize)]
struct UserRegistration {
    #[serde(flatten)]
    entry: DashboardEntry,
    status: &'static str,
}

#[derive(Serialize)]
struct RegistrationCheck {
    registered: bool,
    registration_id: Option<i32>,
    is_open: bool,
}

async fn list_events(
    db: web::Data<DatabaseConnection>,
    query: web::Query<FilterQuery>,
) -> Result<HttpResponse, AppError> {
    let events: Vec<EventDto> = events::list_events(db.get_ref(), query.filter(), events::today())
        .await?
        .into_iter()
        .map(EventDto::from)
        .collect();
    Ok(HttpResponse::Ok().json(events))
}

async fn list_registrations(
    db: web::Data<DatabaseConnection>,
    _admin: AdminUser,
) -> Result<HttpResponse, AppError> {
    let rows: Vec<AdminRegistrationDto> = registration::list_all(db.get_ref())
        .await?
        .into_iter()
        .map(|(reg, event)| AdminRegistrationDto::new(reg, &event))
        .collect();
    Ok(HttpResponse::Ok().json(rows))
}

async fn create_event(
    db: web::Data<DatabaseConnection>,
    admin: AdminUser,
    body: web::Json<NewEvent>,
) -> Result<HttpResponse, AppError> {
    let created = events::create_event(db.get_ref(), body.into_inner()).await?;
    info!("api: event {} created by {}", created.id, admin.0.username);
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(EventEnvelope {
        event: created.into(),
    }))))
}

async fn update_event(
    db: web::Data<DatabaseConnection>,
    _admin: AdminUser,
    path: web::Path<i32>,
    body: web::Json<EventPatch>,
) -> Result<HttpResponse, AppError> {
    let updated = events::update_event(db.get_ref(), path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(EventEnvelope {
        event: updated.into(),
    }))))
}

async fn delete_event(
    db: web::Data<DatabaseConnection>,
    admin: AdminUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let deleted_registrations = events::delete_event(db.get_ref(), id).await?;
    info!("api: event {} deleted by {}", id, admin.0.username);
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(DeletedEnvelope {
        deleted_registrations,
    }))))
}

async fn user_profile(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let (user, profile) = student::load_profile(db.get_ref(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(ProfileEnvelope {
        profile: ProfileDto::new(&user, &profile),
    }))))
}

async fn user_registrations(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let rows = registration::list_for_user(db.get_ref(), auth.user_id).await?;
    let (upcoming, completed) = split_by_date(rows, events::today());
    let entries: Vec<UserRegistration> = upcoming
        .into_iter()
        .map(|entry| UserRegistration {
            entry,
            status: "upcoming",
        })
        .chain(completed.into_iter().map(|entry| UserRegistration {
            entry,
            status: "completed",
        }))
        .collect();
    Ok(HttpResponse::Ok().json(entries))
}

async fn check_registration(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    query: web::Query<CheckQuery>,
) -> Result<HttpResponse, AppError> {
    let event_id = query
        .event_id
        .ok_or_else(|| AppError::param_error("event_id is required."))?;
    let event = events::find_event(db.get_ref(), event_id).await?;
    let found = match auth.0 {
        Some(auth) => {
            registration::find_for_account(db.get_ref(), event.id, auth.user_id, &auth.email)
                .await?
        }
        None => None,
    };
    Ok(HttpResponse::Ok().json(RegistrationCheck {
        registered: found.is_some(),
        registration_id: found.map(|r| r.id),
        is_open: !event.is_past(events::today()),
    }))
}
