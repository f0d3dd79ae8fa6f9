//! Registration rules: one registration per (event, email), date-gated windows,
//! and owner-only changes.

use chrono::{NaiveDate, Utc};
use log::info;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};

use crate::entity::registration::Owner;
use crate::entity::{event, registration};
use crate::error::AppError;
use crate::events::find_event;
use crate::response::{fmt_date, fmt_timestamp};

pub const MSG_CLOSED: &str = "Registration is closed for this event.";
pub const MSG_MISSING_FIELDS: &str = "Please fill in all required fields.";
pub const MSG_DUPLICATE: &str = "You have already registered for this event.";
pub const MSG_BAD_MOBILE: &str = "Please enter a valid 10-digit mobile number.";
pub const MSG_EVENT_PAST: &str = "This event has already taken place.";
pub const MSG_EMAIL_TAKEN: &str = "Another registration for this event already uses that email.";

#[derive(Deserialize, Clone, Debug, Default)]
pub struct RegistrationInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub branch: String,
}

impl RegistrationInput {
    fn trimmed(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            mobile: self.mobile.trim().to_string(),
            course: self.course.trim().to_string(),
            branch: self.branch.trim().to_string(),
        }
    }

    fn all_present(&self) -> bool {
        [&self.name, &self.email, &self.mobile, &self.course, &self.branch]
            .iter()
            .all(|v| !v.is_empty())
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct RegistrationDto {
    pub id: i32,
    pub event_id: i32,
    pub user_id: Option<i32>,
    pub guest: bool,
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub course: String,
    pub branch: String,
    pub timestamp: String,
}

impl From<registration::Model> for RegistrationDto {
    fn from(model: registration::Model) -> Self {
        Self {
            id: model.id,
            event_id: model.event_id,
            user_id: model.user_id,
            guest: model.owner() == Owner::Guest,
            name: model.name,
            email: model.email,
            mobile: model.mobile,
            course: model.course,
            branch: model.branch,
            timestamp: fmt_timestamp(model.timestamp),
        }
    }
}

/// Flat row for the admin table; the `event__*` keys are what the admin UI reads.
#[derive(Serialize, Clone, Debug)]
pub struct AdminRegistrationDto {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub course: String,
    pub branch: String,
    pub timestamp: String,
    pub user_id: Option<i32>,
    #[serde(rename = "event__id")]
    pub event_id: i32,
    #[serde(rename = "event__name")]
    pub event_name: String,
    #[serde(rename = "event__date")]
    pub event_date: String,
    #[serde(rename = "event__venue")]
    pub event_venue: String,
}

impl AdminRegistrationDto {
    pub fn new(reg: registration::Model, event: &event::Model) -> Self {
        Self {
            id: reg.id,
            name: reg.name,
            email: reg.email,
            mobile: reg.mobile,
            course: reg.course,
            branch: reg.branch,
            timestamp: fmt_timestamp(reg.timestamp),
            user_id: reg.user_id,
            event_id: event.id,
            event_name: event.name.clone(),
            event_date: fmt_date(event.date),
            event_venue: event.venue.clone(),
        }
    }
}

/// Exactly ten ASCII digits.
pub fn is_valid_mobile(mobile: &str) -> bool {
    mobile.len() == 10 && mobile.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

async fn email_taken(
    db: &DatabaseConnection,
    event_id: i32,
    email: &str,
    except_id: Option<i32>,
) -> Result<bool, AppError> {
    let mut query = registration::Entity::find()
        .filter(registration::Column::EventId.eq(event_id))
        .filter(registration::Column::Email.eq(email));
    if let Some(id) = except_id {
        query = query.filter(registration::Column::Id.ne(id));
    }
    let found = query
        .one(db)
        .await
        .map_err(|e| AppError::db("check duplicate registration", e))?;
    Ok(found.is_some())
}

pub async fn register(
    db: &DatabaseConnection,
    event_id: i32,
    input: &RegistrationInput,
    owner: Owner,
    today: NaiveDate,
) -> Result<registration::Model, AppError> {
    let event = find_event(db, event_id).await?;
    if event.is_past(today) {
        return Err(AppError::param_error(MSG_CLOSED));
    }

    let input = input.trimmed();
    if !input.all_present() {
        return Err(AppError::param_error(MSG_MISSING_FIELDS));
    }
    if email_taken(db, event.id, &input.email, None).await? {
        return Err(AppError::param_error(MSG_DUPLICATE));
    }
    if !is_valid_mobile(&input.mobile) {
        return Err(AppError::param_error(MSG_BAD_MOBILE));
    }

    let created = registration::ActiveModel {
        event_id: Set(event.id),
        user_id: Set(owner.user_id()),
        name: Set(input.name),
        email: Set(input.email),
        mobile: Set(input.mobile),
        course: Set(input.course),
        branch: Set(input.branch),
        timestamp: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::param_error(MSG_DUPLICATE)
        } else {
            AppError::db("insert registration", e)
        }
    })?;

    info!(
        "registration {} for event {} ({:?})",
        created.id, created.event_id, owner
    );
    Ok(created)
}

/// A registration belonging to `user_id`, with its event.
pub async fn find_owned(
    db: &DatabaseConnection,
    registration_id: i32,
    user_id: i32,
) -> Result<(registration::Model, event::Model), AppError> {
    let (reg, event) = registration::Entity::find_by_id(registration_id)
        .filter(registration::Column::UserId.eq(user_id))
        .find_also_related(event::Entity)
        .one(db)
        .await
        .map_err(|e| AppError::db("find registration", e))?
        .ok_or_else(|| AppError::not_found("Registration"))?;
    let event = event.ok_or_else(|| AppError::not_found("Event"))?;
    Ok((reg, event))
}

/// Blank fields keep their stored value.
pub async fn update_own(
    db: &DatabaseConnection,
    registration_id: i32,
    user_id: i32,
    input: &RegistrationInput,
    today: NaiveDate,
) -> Result<registration::Model, AppError> {
    let (reg, event) = find_owned(db, registration_id, user_id).await?;
    if event.is_past(today) {
        return Err(AppError::param_error(MSG_EVENT_PAST));
    }

    let input = input.trimmed();
    let pick = |new: String, old: &str| if new.is_empty() { old.to_string() } else { new };
    let name = pick(input.name, &reg.name);
    let email = pick(input.email, &reg.email);
    let mobile = pick(input.mobile, &reg.mobile);
    let course = pick(input.course, &reg.course);
    let branch = pick(input.branch, &reg.branch);

    if email != reg.email && email_taken(db, reg.event_id, &email, Some(reg.id)).await? {
        return Err(AppError::param_error(MSG_EMAIL_TAKEN));
    }
    if !is_valid_mobile(&mobile) {
        return Err(AppError::param_error(MSG_BAD_MOBILE));
    }

    let mut active: registration::ActiveModel = reg.into();
    active.name = Set(name);
    active.email = Set(email);
    active.mobile = Set(mobile);
    active.course = Set(course);
    active.branch = Set(branch);
    let updated = active.update(db).await.map_err(|e| {
        if is_unique_violation(&e) {
            AppError::param_error(MSG_EMAIL_TAKEN)
        } else {
            AppError::db("update registration", e)
        }
    })?;

    info!("registration {} updated by user {}", updated.id, user_id);
    Ok(updated)
}

pub async fn cancel_own(
    db: &DatabaseConnection,
    registration_id: i32,
    user_id: i32,
    today: NaiveDate,
) -> Result<(), AppError> {
    let (reg, event) = find_owned(db, registration_id, user_id).await?;
    if event.is_past(today) {
        return Err(AppError::param_error(MSG_EVENT_PAST));
    }
    registration::Entity::delete_by_id(reg.id)
        .exec(db)
        .await
        .map_err(|e| AppError::db("delete registration", e))?;
    info!("registration {} cancelled by user {}", reg.id, user_id);
    Ok(())
}

/// Registrations linked to the account, with their events, soonest first.
pub async fn list_for_user(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Vec<(registration::Model, event::Model)>, AppError> {
    let rows = registration::Entity::find()
        .filter(registration::Column::UserId.eq(user_id))
        .find_also_related(event::Entity)
        .order_by_asc(event::Column::Date)
        .all(db)
        .await
        .map_err(|e| AppError::db("list user registrations", e))?;
    Ok(rows
        .into_iter()
        .filter_map(|(reg, event)| event.map(|e| (reg, e)))
        .collect())
}

/// Every registration with its event, newest first.
pub async fn list_all(
    db: &DatabaseConnection,
) -> Result<Vec<(registration::Model, event::Model)>, AppError> {
    let rows = registration::Entity::find()
        .find_also_related(event::Entity)
        .order_by_desc(registration::Column::Timestamp)
        .order_by_desc(registration::Column::Id)
        .all(db)
        .await
        .map_err(|e| AppError::db("list registrations", e))?;
    Ok(rows
        .into_iter()
        .filter_map(|(reg, event)| event.map(|e| (reg, e)))
        .collect())
}

/// The caller's registration for an event, matched by account link or account email.
pub async fn find_for_account(
    db: &DatabaseConnection,
    event_id: i32,
    user_id: i32,
    email: &str,
) -> Result<Option<registration::Model>, AppError> {
    let mut owner_match = sea_orm::Condition::any().add(registration::Column::UserId.eq(user_id));
    if !email.trim().is_empty() {
        owner_match = owner_match.add(registration::Column::Email.eq(email.trim()));
    }
    registration::Entity::find()
        .filter(registration::Column::EventId.eq(event_id))
        .filter(owner_match)
        .one(db)
        .await
        .map_err(|e| AppError::db("check registration", e))
}
