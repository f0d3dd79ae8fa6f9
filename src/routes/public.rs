use actix_web::{web, HttpResponse};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::auth::OptionalAuthUser;
use crate::entity::registration::Owner;
use crate::error::AppError;
use crate::events::{self, EventDto, EventFilter, EventStats};
use crate::registration::{self, RegistrationInput};
use crate::response::{redirect_with, Notice, PageDto};
use crate::routes::NoticeQuery;
use crate::student;

const HOMEPAGE_PREVIEW: u64 = 3;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(homepage)))
        .service(web::resource("/events/").route(web::get().to(upcoming_events)))
        .service(web::resource("/events/completed/").route(web::get().to(completed_events)))
        .service(web::resource("/events/{id:\\d+}/").route(web::get().to(event_detail)))
        .service(
            web::resource("/register/{id:\\d+}/")
                .route(web::get().to(register_form))
                .route(web::post().to(register_submit)),
        );
}

#[derive(Serialize)]
struct HomepageData {
    #[serde(flatten)]
    stats: EventStats,
    upcoming: Vec<EventDto>,
}

#[derive(Serialize)]
struct EventListData {
    events: Vec<EventDto>,
}

#[derive(Serialize)]
struct EventDetailData {
    event: EventDto,
    registration_count: u64,
    is_open: bool,
    already_registered: bool,
}

#[derive(Serialize)]
struct RegisterData {
    event: EventDto,
    is_open: bool,
    form: RegisterFormValues,
}

#[derive(Serialize, Default)]
struct RegisterFormValues {
    name: String,
    email: String,
    mobile: String,
    course: String,
    branch: String,
}

impl From<RegistrationInput> for RegisterFormValues {
    fn from(input: RegistrationInput) -> Self {
        Self {
            name: input.name,
            email: input.email,
            mobile: input.mobile,
            course: input.course,
            branch: input.branch,
        }
    }
}

async fn homepage(
    db: web::Data<DatabaseConnection>,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    let today = events::today();
    let stats = events::stats(db.get_ref(), today).await?;
    let upcoming = events::soonest_upcoming(db.get_ref(), today, HOMEPAGE_PREVIEW).await?;
    let data = HomepageData {
        stats,
        upcoming: upcoming.into_iter().map(EventDto::from).collect(),
    };
    Ok(PageDto::new("homepage", data).notice(query.notice()).render())
}

async fn upcoming_events(
    db: web::Data<DatabaseConnection>,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    render_list(db.get_ref(), "event_list", EventFilter::Upcoming, query.notice()).await
}

async fn completed_events(
    db: web::Data<DatabaseConnection>,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    render_list(db.get_ref(), "completed_events", EventFilter::Completed, query.notice()).await
}

async fn render_list(
    db: &DatabaseConnection,
    page: &'static str,
    filter: EventFilter,
    notice: Option<Notice>,
) -> Result<HttpResponse, AppError> {
    let rows = events::list_events(db, filter, events::today()).await?;
    let data = EventListData {
        events: rows.into_iter().map(EventDto::from).collect(),
    };
    Ok(PageDto::new(page, data).notice(notice).render())
}

async fn event_detail(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let event = events::find_event(db.get_ref(), *path).await?;
    let registration_count = events::registration_count(db.get_ref(), event.id).await?;
    let already_registered = match &auth.0 {
        Some(auth) => {
            registration::find_for_account(db.get_ref(), event.id, auth.user_id, &auth.email)
                .await?
                .is_some()
        }
        None => false,
    };
    let data = EventDetailData {
        is_open: !event.is_past(events::today()),
        event: event.into(),
        registration_count,
        already_registered,
    };
    Ok(PageDto::new("event_detail", data).render())
}

async fn register_form(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let event = events::find_event(db.get_ref(), *path).await?;
    let form = match &auth.0 {
        Some(auth) => {
            let (user, profile) = student::load_profile(db.get_ref(), auth.user_id).await?;
            RegisterFormValues {
                name: user.full_name(),
                email: user.email,
                mobile: profile.mobile,
                course: profile.course,
                branch: profile.branch,
            }
        }
        None => RegisterFormValues::default(),
    };
    let is_open = !event.is_past(events::today());
    let page = PageDto::new(
        "register",
        RegisterData {
            event: event.into(),
            is_open,
            form,
        },
    );
    let page = if is_open {
        page
    } else {
        page.error(registration::MSG_CLOSED)
    };
    Ok(page.render())
}

async fn register_submit(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
    form: web::Form<RegistrationInput>,
) -> Result<HttpResponse, AppError> {
    let event_id = path.into_inner();
    let owner = Owner::from(auth.0.as_ref().map(|a| a.user_id));
    let input = form.into_inner();

    match registration::register(db.get_ref(), event_id, &input, owner, events::today()).await {
        Ok(_) => Ok(redirect_with("/events/", Notice::Registered)),
        Err(AppError::Invalid(msg)) => {
            let event = events::find_event(db.get_ref(), event_id).await?;
            let data = RegisterData {
                is_open: !event.is_past(events::today()),
                event: event.into(),
                form: input.into(),
            };
            Ok(PageDto::new("register", data).error(msg).render())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_db;
    use crate::entity::registration as registration_entity;
    use crate::events::fixtures::event_in_days;
    use crate::routes::testing::{app, location, token_for};
    use crate::student::fixtures::student;
    use actix_web::{http::StatusCode, test};
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
    use serde_json::Value;

    fn form(email: &str, mobile: &str) -> [(&'static str, String); 5] {
        [
            ("name", "Asha Rao".to_string()),
            ("email", email.to_string()),
            ("mobile", mobile.to_string()),
            ("course", "BTech".to_string()),
            ("branch", "CSE".to_string()),
        ]
    }

    #[actix_web::test]
    async fn duplicate_submission_stays_on_form() {
        let db = memory_db().await;
        let ev = event_in_days(&db, "Tech Fest", 1).await;
        let app = test::init_service(app(db.clone())).await;
        let uri = format!("/register/{}/", ev.id);

        let req = test::TestRequest::post()
            .uri(&uri)
            .set_form(form("asha@college.edu", "1234567890"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/events/?notice=registered");

        let req = test::TestRequest::post()
            .uri(&uri)
            .set_form(form("asha@college.edu", "1234567890"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["page"], "register");
        assert_eq!(body["error"], registration::MSG_DUPLICATE);
        assert_eq!(body["data"]["form"]["email"], "asha@college.edu");

        let stored = registration_entity::Entity::find()
            .filter(registration_entity::Column::EventId.eq(ev.id))
            .all(&db)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_id, None);
    }

    #[actix_web::test]
    async fn short_mobile_is_rejected_then_ten_digits_accepted() {
        let db = memory_db().await;
        let ev = event_in_days(&db, "Workshop", 2).await;
        let app = test::init_service(app(db.clone())).await;
        let uri = format!("/register/{}/", ev.id);

        let req = test::TestRequest::post()
            .uri(&uri)
            .set_form(form("k@college.edu", "12345"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"], registration::MSG_BAD_MOBILE);

        let req = test::TestRequest::post()
            .uri(&uri)
            .set_form(form("k@college.edu", "1234567890"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    }

    #[actix_web::test]
    async fn logged_in_registration_is_linked_to_the_account() {
        let db = memory_db().await;
        let user = student(&db, "nila").await;
        let ev = event_in_days(&db, "Debate", 3).await;
        let app = test::init_service(app(db.clone())).await;

        let req = test::TestRequest::get()
            .uri(&format!("/register/{}/", ev.id))
            .insert_header(token_for(user.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["form"]["email"], "nila@college.edu");
        assert_eq!(body["data"]["is_open"], true);

        let req = test::TestRequest::post()
            .uri(&format!("/register/{}/", ev.id))
            .insert_header(token_for(user.id))
            .set_form(form("nila@college.edu", "1234567890"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let stored = registration_entity::Entity::find().one(&db).await.unwrap().unwrap();
        assert_eq!(stored.owner(), Owner::Owned(user.id));

        let req = test::TestRequest::get()
            .uri(&format!("/events/{}/", ev.id))
            .insert_header(token_for(user.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["already_registered"], true);
        assert_eq!(body["data"]["registration_count"], 1);
    }

    #[actix_web::test]
    async fn past_event_is_closed() {
        let db = memory_db().await;
        let ev = event_in_days(&db, "Old Fest", -2).await;
        let app = test::init_service(app(db.clone())).await;

        let req = test::TestRequest::post()
            .uri(&format!("/register/{}/", ev.id))
            .set_form(form("late@college.edu", "1234567890"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"], registration::MSG_CLOSED);
        assert_eq!(body["data"]["is_open"], false);
    }

    #[actix_web::test]
    async fn unknown_event_is_404() {
        let db = memory_db().await;
        let app = test::init_service(app(db)).await;
        let req = test::TestRequest::post()
            .uri("/register/77/")
            .set_form(form("a@college.edu", "1234567890"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/events/77/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn homepage_and_lists() {
        let db = memory_db().await;
        for (name, days) in [("a", 1), ("b", 5), ("c", 3), ("d", 9), ("old", -3)] {
            event_in_days(&db, name, days).await;
        }
        let app = test::init_service(app(db)).await;

        let req = test::TestRequest::get().uri("/?notice=registered").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["page"], "homepage");
        assert_eq!(body["notice"], "Registration successful!");
        assert_eq!(body["data"]["total_events"], 5);
        assert_eq!(body["data"]["upcoming_count"], 4);
        assert_eq!(body["data"]["completed_count"], 1);
        let preview: Vec<_> = body["data"]["upcoming"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(preview, ["a", "c", "b"]);

        let req = test::TestRequest::get().uri("/events/completed/").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["events"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["events"][0]["name"], "old");
    }
}
