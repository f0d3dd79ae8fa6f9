use chrono::Utc;
use log::info;
use rand::seq::SliceRandom;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, verify_password};
use crate::entity::{student_profile, user};
use crate::error::AppError;
use crate::events::map_tx_error;
use crate::registration::{is_unique_violation, is_valid_mobile};
use crate::response::fmt_timestamp;

pub const MIN_PASSWORD_LEN: usize = 8;

const ACCENT_COLORS: [&str; 8] = [
    "#4f46e5", "#0ea5e9", "#10b981", "#f59e0b", "#ef4444", "#8b5cf6", "#ec4899", "#14b8a6",
];

fn pick_accent_color() -> String {
    ACCENT_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(ACCENT_COLORS[0])
        .to_string()
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct SignupForm {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub year: String,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ProfileForm {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub course: Option<String>,
    pub branch: Option<String>,
    pub year: Option<String>,
    pub bio: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct ProfileDto {
    pub user_id: i32,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub mobile: String,
    pub course: String,
    pub branch: String,
    pub year: String,
    pub bio: String,
    pub accent_color: String,
    pub is_admin: bool,
    pub date_joined: String,
}

impl ProfileDto {
    pub fn new(user: &user::Model, profile: &student_profile::Model) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
            email: user.email.clone(),
            mobile: profile.mobile.clone(),
            course: profile.course.clone(),
            branch: profile.branch.clone(),
            year: profile.year.clone(),
            bio: profile.bio.clone(),
            accent_color: profile.accent_color.clone(),
            is_admin: user.is_admin(),
            date_joined: fmt_timestamp(user.date_joined),
        }
    }
}

pub async fn get_or_create_profile<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<student_profile::Model, DbErr> {
    let existing = student_profile::Entity::find()
        .filter(student_profile::Column::UserId.eq(user_id))
        .one(db)
        .await?;
    if let Some(profile) = existing {
        return Ok(profile);
    }
    student_profile::ActiveModel {
        user_id: Set(user_id),
        mobile: Set(String::new()),
        course: Set(String::new()),
        branch: Set(String::new()),
        year: Set(String::new()),
        bio: Set(String::new()),
        accent_color: Set(pick_accent_color()),
        created: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn load_user(db: &DatabaseConnection, user_id: i32) -> Result<user::Model, AppError> {
    user::Entity::find_by_id(user_id)
        .one(db)
        .await
        .map_err(|e| AppError::db("load user", e))?
        .ok_or_else(|| AppError::not_found("User"))
}

pub async fn load_profile(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<(user::Model, student_profile::Model), AppError> {
    let user = load_user(db, user_id).await?;
    let profile = get_or_create_profile(db, user_id)
        .await
        .map_err(|e| AppError::db("load profile", e))?;
    Ok((user, profile))
}

async fn username_taken(db: &DatabaseConnection, username: &str) -> Result<bool, AppError> {
    let found = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await
        .map_err(|e| AppError::db("check username", e))?;
    Ok(found.is_some())
}

async fn email_owner(db: &DatabaseConnection, email: &str) -> Result<Option<i32>, AppError> {
    let found = user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await
        .map_err(|e| AppError::db("check email", e))?;
    Ok(found.map(|u| u.id))
}

/// Creates the account and its profile together.
pub async fn signup(db: &DatabaseConnection, form: &SignupForm) -> Result<user::Model, AppError> {
    let first_name = form.first_name.trim().to_string();
    let username = form.username.trim().to_string();
    let email = form.email.trim().to_string();
    let mobile = form.mobile.trim().to_string();

    if first_name.is_empty() || username.is_empty() || email.is_empty() || form.password.is_empty() {
        return Err(AppError::param_error("Please fill in all required fields."));
    }
    if form.password != form.password_confirm {
        return Err(AppError::param_error("Passwords do not match."));
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::param_error(format!(
            "Password must be at least {} characters long.",
            MIN_PASSWORD_LEN
        )));
    }
    if username_taken(db, &username).await? {
        return Err(AppError::param_error("Username is already taken."));
    }
    if email_owner(db, &email).await?.is_some() {
        return Err(AppError::param_error("An account with this email already exists."));
    }
    if !mobile.is_empty() && !is_valid_mobile(&mobile) {
        return Err(AppError::param_error("Please enter a valid 10-digit mobile number."));
    }

    let password_hash = hash_password(&form.password)?;
    let new_user = user::ActiveModel {
        username: Set(username),
        first_name: Set(first_name),
        last_name: Set(form.last_name.trim().to_string()),
        email: Set(email),
        password_hash: Set(password_hash),
        is_staff: Set(false),
        is_superuser: Set(false),
        date_joined: Set(Utc::now()),
        ..Default::default()
    };
    let profile_fields = (
        mobile,
        form.course.trim().to_string(),
        form.branch.trim().to_string(),
        form.year.trim().to_string(),
    );

    let created = db
        .transaction::<_, user::Model, AppError>(|txn| {
            Box::pin(async move {
                let created = new_user.insert(txn).await.map_err(|e| {
                    if is_unique_violation(&e) {
                        AppError::param_error("Username is already taken.")
                    } else {
                        AppError::db("insert user", e)
                    }
                })?;
                let (mobile, course, branch, year) = profile_fields;
                student_profile::ActiveModel {
                    user_id: Set(created.id),
                    mobile: Set(mobile),
                    course: Set(course),
                    branch: Set(branch),
                    year: Set(year),
                    bio: Set(String::new()),
                    accent_color: Set(pick_accent_color()),
                    created: Set(Utc::now()),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(|e| AppError::db("insert profile", e))?;
                Ok(created)
            })
        })
        .await
        .map_err(map_tx_error)?;

    info!("student account '{}' created", created.username);
    Ok(created)
}

/// `None` for an unknown username or a wrong password.
pub async fn authenticate(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<Option<user::Model>, AppError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Ok(None);
    }
    let user = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await
        .map_err(|e| AppError::db("find user", e))?;
    Ok(user.filter(|u| verify_password(password, &u.password_hash)))
}

/// Absent fields keep their value.
pub async fn update_profile(
    db: &DatabaseConnection,
    user_id: i32,
    form: &ProfileForm,
) -> Result<(user::Model, student_profile::Model), AppError> {
    let (user, profile) = load_profile(db, user_id).await?;
    let trim = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string());

    let mobile = trim(&form.mobile);
    if let Some(mobile) = mobile.as_deref() {
        if !mobile.is_empty() && !is_valid_mobile(mobile) {
            return Err(AppError::param_error("Please enter a valid 10-digit mobile number."));
        }
    }
    let email = trim(&form.email).filter(|e| !e.is_empty());
    if let Some(email) = email.as_deref() {
        if email != user.email {
            if let Some(owner) = email_owner(db, email).await? {
                if owner != user_id {
                    return Err(AppError::param_error("An account with this email already exists."));
                }
            }
        }
    }

    let unchanged_user = user.clone();
    let unchanged_profile = profile.clone();
    let mut user_active: user::ActiveModel = user.into();
    if let Some(v) = trim(&form.first_name).filter(|v| !v.is_empty()) {
        user_active.first_name = Set(v);
    }
    if let Some(v) = trim(&form.last_name) {
        user_active.last_name = Set(v);
    }
    if let Some(v) = email {
        user_active.email = Set(v);
    }

    let mut profile_active: student_profile::ActiveModel = profile.into();
    if let Some(v) = mobile {
        profile_active.mobile = Set(v);
    }
    if let Some(v) = trim(&form.course) {
        profile_active.course = Set(v);
    }
    if let Some(v) = trim(&form.branch) {
        profile_active.branch = Set(v);
    }
    if let Some(v) = trim(&form.year) {
        profile_active.year = Set(v);
    }
    if let Some(v) = trim(&form.bio) {
        profile_active.bio = Set(v);
    }

    let user = if user_active.is_changed() {
        user_active
            .update(db)
            .await
            .map_err(|e| AppError::db("update user", e))?
    } else {
        unchanged_user
    };
    let profile = if profile_active.is_changed() {
        profile_active
            .update(db)
            .await
            .map_err(|e| AppError::db("update profile", e))?
    } else {
        unchanged_profile
    };
    info!("profile of user {} updated", user_id);
    Ok((user, profile))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::db::memory_db;

    fn form() -> SignupForm {
        SignupForm {
            first_name: "Kiran".to_string(),
            username: "kiran".to_string(),
            email: "kiran@college.edu".to_string(),
            password: "longenough".to_string(),
            password_confirm: "longenough".to_string(),
            mobile: "9876543210".to_string(),
            course: "BTech".to_string(),
            branch: "ECE".to_string(),
            year: "2".to_string(),
            ..Default::default()
        }
    }

    async fn expect_rejected(db: &DatabaseConnection, form: SignupForm, needle: &str) {
        match signup(db, &form).await {
            Err(AppError::Invalid(msg)) => assert!(msg.contains(needle), "{} !~ {}", msg, needle),
            other => panic!("expected rejection containing {:?}, got {:?}", needle, other.map(|u| u.id)),
        }
    }

    #[actix_web::test]
    async fn signup_creates_user_and_profile() {
        let db = memory_db().await;
        let created = signup(&db, &form()).await.unwrap();
        assert!(!created.is_admin());
        let (_, profile) = load_profile(&db, created.id).await.unwrap();
        assert_eq!(profile.mobile, "9876543210");
        assert_eq!(profile.branch, "ECE");
        assert!(ACCENT_COLORS.contains(&profile.accent_color.as_str()));
    }

    #[actix_web::test]
    async fn signup_rejections() {
        let db = memory_db().await;
        signup(&db, &form()).await.unwrap();

        let mut f = form();
        f.email = "other@college.edu".to_string();
        expect_rejected(&db, f, "Username").await;

        let mut f = form();
        f.username = "other".to_string();
        expect_rejected(&db, f, "email").await;

        let mut f = form();
        f.username = "new".to_string();
        f.email = "new@college.edu".to_string();
        f.password_confirm = "different1".to_string();
        expect_rejected(&db, f, "do not match").await;

        let mut f = form();
        f.username = "new".to_string();
        f.email = "new@college.edu".to_string();
        f.password = "short".to_string();
        f.password_confirm = "short".to_string();
        expect_rejected(&db, f, "at least 8").await;

        let mut f = form();
        f.username = "new".to_string();
        f.email = "new@college.edu".to_string();
        f.mobile = "12345".to_string();
        expect_rejected(&db, f, "10-digit").await;

        let mut f = form();
        f.first_name = " ".to_string();
        expect_rejected(&db, f, "required").await;
    }

    #[actix_web::test]
    async fn mobile_is_optional_at_signup() {
        let db = memory_db().await;
        let mut f = form();
        f.mobile = String::new();
        signup(&db, &f).await.unwrap();
    }

    #[actix_web::test]
    async fn authenticate_checks_password() {
        let db = memory_db().await;
        let user = student(&db, "leela").await;
        let ok = authenticate(&db, "leela", PASSWORD).await.unwrap();
        assert_eq!(ok.map(|u| u.id), Some(user.id));
        assert!(authenticate(&db, "leela", "wrong-pass").await.unwrap().is_none());
        assert!(authenticate(&db, "nobody", PASSWORD).await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn profile_is_created_lazily_once() {
        let db = memory_db().await;
        let now = Utc::now();
        let bare = user::ActiveModel {
            username: Set("legacy".to_string()),
            first_name: Set("Legacy".to_string()),
            last_name: Set(String::new()),
            email: Set("legacy@college.edu".to_string()),
            password_hash: Set(hash_password(PASSWORD).unwrap()),
            is_staff: Set(false),
            is_superuser: Set(false),
            date_joined: Set(now),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let first = get_or_create_profile(&db, bare.id).await.unwrap();
        let again = get_or_create_profile(&db, bare.id).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.accent_color, again.accent_color);
    }

    #[actix_web::test]
    async fn profile_update_validates_mobile_and_email() {
        let db = memory_db().await;
        let me = student(&db, "arun").await;
        student(&db, "bala").await;

        let bad = ProfileForm {
            mobile: Some("98765".to_string()),
            ..Default::default()
        };
        assert!(matches!(update_profile(&db, me.id, &bad).await, Err(AppError::Invalid(_))));

        let taken = ProfileForm {
            email: Some("bala@college.edu".to_string()),
            ..Default::default()
        };
        assert!(matches!(update_profile(&db, me.id, &taken).await, Err(AppError::Invalid(_))));

        let good = ProfileForm {
            last_name: Some("Kumar".to_string()),
            mobile: Some("9876543210".to_string()),
            bio: Some("Robotics club".to_string()),
            ..Default::default()
        };
        let (user, profile) = update_profile(&db, me.id, &good).await.unwrap();
        assert_eq!(user.full_name(), "arun Kumar");
        assert_eq!(user.email, "arun@college.edu");
        assert_eq!(profile.mobile, "9876543210");
        assert_eq!(profile.bio, "Robotics club");
    }
}
