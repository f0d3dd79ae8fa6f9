use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use log::warn;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::auth::{self, OptionalAuthUser, StudentSession};
use crate::config::AppConfig;
use crate::entity::{event, registration as registration_entity};
use crate::error::AppError;
use crate::events::{self, EventDto};
use crate::registration::{self, RegistrationDto, RegistrationInput};
use crate::response::{redirect, redirect_with, Notice, PageDto};
use crate::routes::{safe_next, NoticeQuery};
use crate::student::{self, ProfileDto, ProfileForm, SignupForm};

const DASHBOARD_URL: &str = "/accounts/dashboard/";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/signup/")
            .route(web::get().to(signup_page))
            .route(web::post().to(signup)),
    )
    .service(
        web::resource("/login/")
            .route(web::get().to(login_page))
            .route(web::post().to(login)),
    )
    .service(web::resource("/logout/").route(web::post().to(logout)))
    .service(web::resource("/dashboard/").route(web::get().to(dashboard)))
    .service(web::resource("/profile/update/").route(web::post().to(update_profile)))
    .service(
        web::resource("/registration/{id:\\d+}/update/").route(web::post().to(update_registration)),
    )
    .service(
        web::resource("/registration/{id:\\d+}/cancel/").route(web::post().to(cancel_registration)),
    );
}

#[derive(Deserialize, Default)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

#[derive(Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Serialize)]
pub struct LoginPageData {
    pub username: String,
    pub next: Option<String>,
}

#[derive(Serialize, Default)]
struct SignupPageData {
    first_name: String,
    last_name: String,
    username: String,
    email: String,
    mobile: String,
    course: String,
    branch: String,
    year: String,
}

impl From<&SignupForm> for SignupPageData {
    fn from(form: &SignupForm) -> Self {
        Self {
            first_name: form.first_name.clone(),
            last_name: form.last_name.clone(),
            username: form.username.clone(),
            email: form.email.clone(),
            mobile: form.mobile.clone(),
            course: form.course.clone(),
            branch: form.branch.clone(),
            year: form.year.clone(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct DashboardEntry {
    pub registration: RegistrationDto,
    pub event: EventDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
}

#[derive(Serialize)]
struct DashboardData {
    profile: ProfileDto,
    upcoming: Vec<DashboardEntry>,
    completed: Vec<DashboardEntry>,
    total_registrations: usize,
}

/// Upcoming (soonest first, with days left) and completed (latest first).
pub fn split_by_date(
    rows: Vec<(registration_entity::Model, event::Model)>,
    today: NaiveDate,
) -> (Vec<DashboardEntry>, Vec<DashboardEntry>) {
    let (mut upcoming, mut completed): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|(_, event)| !event.is_past(today));
    upcoming.sort_by_key(|(_, e)| (e.date, e.time));
    completed.sort_by_key(|(_, e)| std::cmp::Reverse((e.date, e.time)));

    let upcoming = upcoming
        .into_iter()
        .map(|(reg, event)| DashboardEntry {
            days_remaining: Some((event.date - today).num_days()),
            registration: reg.into(),
            event: event.into(),
        })
        .collect();
    let completed = completed
        .into_iter()
        .map(|(reg, event)| DashboardEntry {
            days_remaining: None,
            registration: reg.into(),
            event: event.into(),
        })
        .collect();
    (upcoming, completed)
}

async fn signup_page(auth: OptionalAuthUser) -> Result<HttpResponse, AppError> {
    if auth.0.is_some() {
        return Ok(redirect(DASHBOARD_URL));
    }
    Ok(PageDto::new("signup", SignupPageData::default()).render())
}

async fn signup(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    form: web::Form<SignupForm>,
) -> Result<HttpResponse, AppError> {
    match student::signup(db.get_ref(), &form).await {
        Ok(user) => {
            let token = auth::issue_token(&config, user.id)?;
            let mut resp = redirect_with(DASHBOARD_URL, Notice::Welcome);
            resp.add_cookie(&auth::session_cookie(&config, token))
                .map_err(|_| AppError::system_exception())?;
            Ok(resp)
        }
        Err(AppError::Invalid(msg)) => {
            Ok(PageDto::new("signup", SignupPageData::from(&*form)).error(msg).render())
        }
        Err(err) => Err(err),
    }
}

async fn login_page(
    auth: OptionalAuthUser,
    query: web::Query<NextQuery>,
) -> Result<HttpResponse, AppError> {
    if auth.0.is_some() {
        return Ok(redirect(&safe_next(query.next.as_deref(), DASHBOARD_URL)));
    }
    let data = LoginPageData {
        username: String::new(),
        next: query.next.clone(),
    };
    Ok(PageDto::new("student_login", data).render())
}

async fn login(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    form: web::Form<LoginForm>,
) -> Result<HttpResponse, AppError> {
    match student::authenticate(db.get_ref(), &form.username, &form.password).await? {
        Some(user) => {
            let token = auth::issue_token(&config, user.id)?;
            let target = safe_next(form.next.as_deref(), DASHBOARD_URL);
            let mut resp = redirect(&target);
            resp.add_cookie(&auth::session_cookie(&config, token))
                .map_err(|_| AppError::system_exception())?;
            Ok(resp)
        }
        None => {
            warn!("failed student login for '{}'", form.username.trim());
            let data = LoginPageData {
                username: form.username.clone(),
                next: form.next.clone(),
            };
            Ok(PageDto::new("student_login", data)
                .error("Invalid username or password.")
                .render())
        }
    }
}

async fn logout(config: web::Data<AppConfig>) -> Result<HttpResponse, AppError> {
    let mut resp = redirect_with("/events/", Notice::LoggedOut);
    resp.add_removal_cookie(&auth::expired_cookie(&config))
        .map_err(|_| AppError::system_exception())?;
    Ok(resp)
}

async fn render_dashboard(
    db: &DatabaseConnection,
    user_id: i32,
    notice: Option<Notice>,
    error: Option<String>,
) -> Result<HttpResponse, AppError> {
    let (user, profile) = student::load_profile(db, user_id).await?;
    let rows = registration::list_for_user(db, user_id).await?;
    let total_registrations = rows.len();
    let (upcoming, completed) = split_by_date(rows, events::today());
    let data = DashboardData {
        profile: ProfileDto::new(&user, &profile),
        upcoming,
        completed,
        total_registrations,
    };
    let page = PageDto::new("student_dashboard", data).notice(notice);
    let page = match error {
        Some(error) => page.error(error),
        None => page,
    };
    Ok(page.render())
}

async fn dashboard(
    db: web::Data<DatabaseConnection>,
    session: StudentSession,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    render_dashboard(db.get_ref(), session.0.user_id, query.notice(), None).await
}

async fn update_profile(
    db: web::Data<DatabaseConnection>,
    session: StudentSession,
    form: web::Form<ProfileForm>,
) -> Result<HttpResponse, AppError> {
    match student::update_profile(db.get_ref(), session.0.user_id, &form).await {
        Ok(_) => Ok(redirect_with(DASHBOARD_URL, Notice::ProfileUpdated)),
        Err(AppError::Invalid(msg)) => {
            render_dashboard(db.get_ref(), session.0.user_id, None, Some(msg)).await
        }
        Err(err) => Err(err),
    }
}

async fn update_registration(
    db: web::Data<DatabaseConnection>,
    session: StudentSession,
    path: web::Path<i32>,
    form: web::Form<RegistrationInput>,
) -> Result<HttpResponse, AppError> {
    let user_id = session.0.user_id;
    match registration::update_own(db.get_ref(), *path, user_id, &form, events::today()).await {
        Ok(_) => Ok(redirect_with(DASHBOARD_URL, Notice::RegistrationUpdated)),
        Err(AppError::Invalid(msg)) => render_dashboard(db.get_ref(), user_id, None, Some(msg)).await,
        Err(err) => Err(err),
    }
}

async fn cancel_registration(
    db: web::Data<DatabaseConnection>,
    session: StudentSession,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let user_id = session.0.user_id;
    match registration::cancel_own(db.get_ref(), *path, user_id, events::today()).await {
        Ok(()) => Ok(redirect_with(DASHBOARD_URL, Notice::RegistrationCancelled)),
        Err(AppError::Invalid(msg)) => render_dashboard(db.get_ref(), user_id, None, Some(msg)).await,
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_db;
    use crate::entity::registration::Owner;
    use crate::events::fixtures::{event_in_days, event_on};
    use crate::routes::testing::{app, location, token_for};
    use crate::student::fixtures::{student, PASSWORD};
    use actix_web::{http::StatusCode, test};
    use chrono::{Duration, Utc};
    use sea_orm::{ActiveModelTrait, EntityTrait, Set};
    use serde_json::Value;

    async fn owned_registration(
        db: &DatabaseConnection,
        event_id: i32,
        user_id: i32,
        email: &str,
    ) -> registration_entity::Model {
        registration_entity::ActiveModel {
            event_id: Set(event_id),
            user_id: Set(Owner::Owned(user_id).user_id()),
            name: Set("Student".to_string()),
            email: Set(email.to_string()),
            mobile: Set("1234567890".to_string()),
            course: Set("BCom".to_string()),
            branch: Set("Finance".to_string()),
            timestamp: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[actix_web::test]
    async fn signup_logs_in_and_lands_on_dashboard() {
        let db = memory_db().await;
        let app = test::init_service(app(db.clone())).await;

        let req = test::TestRequest::post()
            .uri("/accounts/signup/")
            .set_form([
                ("first_name", "Devi"),
                ("username", "devi"),
                ("email", "devi@college.edu"),
                ("password", "password123"),
                ("password_confirm", "password123"),
                ("mobile", "9000000001"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/accounts/dashboard/?notice=welcome");
        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == "token")
            .expect("session cookie")
            .into_owned();

        let req = test::TestRequest::get()
            .uri("/accounts/dashboard/?notice=welcome")
            .cookie(cookie)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["page"], "student_dashboard");
        assert_eq!(body["data"]["profile"]["username"], "devi");
        assert_eq!(body["data"]["profile"]["mobile"], "9000000001");
    }

    #[actix_web::test]
    async fn signup_with_mismatched_passwords_stays_on_form() {
        let db = memory_db().await;
        let app = test::init_service(app(db)).await;
        let req = test::TestRequest::post()
            .uri("/accounts/signup/")
            .set_form([
                ("first_name", "Devi"),
                ("username", "devi"),
                ("email", "devi@college.edu"),
                ("password", "password123"),
                ("password_confirm", "password124"),
            ])
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["page"], "signup");
        assert_eq!(body["error"], "Passwords do not match.");
        assert_eq!(body["data"]["username"], "devi");
        assert!(body["data"].get("password").is_none());
    }

    #[actix_web::test]
    async fn login_follows_next_and_logout_clears_cookie() {
        let db = memory_db().await;
        student(&db, "hari").await;
        let app = test::init_service(app(db)).await;

        let req = test::TestRequest::post()
            .uri("/accounts/login/")
            .set_form([("username", "hari"), ("password", "nope-nope"), ("next", "/")])
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"], "Invalid username or password.");

        let req = test::TestRequest::post()
            .uri("/accounts/login/")
            .set_form([("username", "hari"), ("password", PASSWORD), ("next", "/events/")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/events/");

        let req = test::TestRequest::post().uri("/accounts/logout/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/events/?notice=logged_out");
        let removal = resp.response().cookies().find(|c| c.name() == "token").unwrap();
        assert_eq!(removal.value(), "");
    }

    #[actix_web::test]
    async fn dashboard_requires_login() {
        let db = memory_db().await;
        let app = test::init_service(app(db)).await;
        let req = test::TestRequest::get().uri("/accounts/dashboard/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/accounts/login/?next=/accounts/dashboard/");
    }

    #[actix_web::test]
    async fn cancel_future_registration_removes_it() {
        let db = memory_db().await;
        let user = student(&db, "gita").await;
        let ev = event_in_days(&db, "Future", 4).await;
        let reg = owned_registration(&db, ev.id, user.id, "gita@college.edu").await;
        let app = test::init_service(app(db.clone())).await;

        let req = test::TestRequest::post()
            .uri(&format!("/accounts/registration/{}/cancel/", reg.id))
            .insert_header(token_for(user.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/accounts/dashboard/?notice=registration_cancelled");
        assert!(registration_entity::Entity::find_by_id(reg.id).one(&db).await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn cancel_past_registration_is_refused() {
        let db = memory_db().await;
        let user = student(&db, "gita").await;
        let past = event_on(&db, "Past", events::today() - Duration::days(2)).await;
        let reg = owned_registration(&db, past.id, user.id, "gita@college.edu").await;
        let app = test::init_service(app(db.clone())).await;

        let req = test::TestRequest::post()
            .uri(&format!("/accounts/registration/{}/cancel/", reg.id))
            .insert_header(token_for(user.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["page"], "student_dashboard");
        assert_eq!(body["error"], registration::MSG_EVENT_PAST);
        assert_eq!(body["data"]["completed"][0]["registration"]["id"], reg.id);
        assert!(registration_entity::Entity::find_by_id(reg.id).one(&db).await.unwrap().is_some());
    }

    #[actix_web::test]
    async fn cannot_touch_someone_elses_registration() {
        let db = memory_db().await;
        let owner = student(&db, "owner").await;
        let other = student(&db, "other").await;
        let ev = event_in_days(&db, "Future", 4).await;
        let reg = owned_registration(&db, ev.id, owner.id, "owner@college.edu").await;
        let app = test::init_service(app(db.clone())).await;

        let req = test::TestRequest::post()
            .uri(&format!("/accounts/registration/{}/update/", reg.id))
            .insert_header(token_for(other.id))
            .set_form([("name", "Hijacked")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let stored = registration_entity::Entity::find_by_id(reg.id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.name, "Student");
    }

    #[actix_web::test]
    async fn profile_update_rejects_bad_mobile() {
        let db = memory_db().await;
        let user = student(&db, "uma").await;
        let app = test::init_service(app(db)).await;

        let req = test::TestRequest::post()
            .uri("/accounts/profile/update/")
            .insert_header(token_for(user.id))
            .set_form([("mobile", "123")])
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"], registration::MSG_BAD_MOBILE);

        let req = test::TestRequest::post()
            .uri("/accounts/profile/update/")
            .insert_header(token_for(user.id))
            .set_form([("mobile", "1231231234"), ("year", "3")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/accounts/dashboard/?notice=profile_updated");
    }
}

#[cfg(test)]
mod split_tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn dashboard_split_orders_and_counts_days() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let ev = |id: i32, date: NaiveDate| event::Model {
            id,
            name: format!("e{}", id),
            description: String::new(),
            date,
            time: None,
            venue: String::new(),
            image: String::new(),
        };
        let reg = |id: i32, event_id: i32| registration_entity::Model {
            id,
            event_id,
            user_id: Some(1),
            name: String::new(),
            email: format!("{}@x", id),
            mobile: "1234567890".to_string(),
            course: String::new(),
            branch: String::new(),
            timestamp: Utc::now(),
        };
        let rows = vec![
            (reg(1, 1), ev(1, today + Duration::days(10))),
            (reg(2, 2), ev(2, today - Duration::days(3))),
            (reg(3, 3), ev(3, today)),
            (reg(4, 4), ev(4, today - Duration::days(1))),
        ];
        let (upcoming, completed) = split_by_date(rows, today);
        let up: Vec<_> = upcoming.iter().map(|e| (e.event.id, e.days_remaining)).collect();
        assert_eq!(up, [(3, Some(0)), (1, Some(10))]);
        let done: Vec<_> = completed.iter().map(|e| e.event.id).collect();
        assert_eq!(done, [4, 2]);
    }
}
