use chrono::{Local, NaiveDate, NaiveTime};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::entity::{event, registration};
use crate::error::AppError;
use crate::response::{fmt_date, fmt_time};

pub const DEFAULT_IMAGE: &str =
    "https://images.unsplash.com/photo-1540575467063-178a50c2df87?auto=format&fit=crop&w=800";

static DRIVE_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://drive\.google\.com/file/d/([A-Za-z0-9_-]+)").unwrap()
});
static DRIVE_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://drive\.google\.com/(?:open|uc)\?(?:.*&)?id=([A-Za-z0-9_-]+)").unwrap()
});
static DROPBOX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(?:www\.)?dropbox\.com/.*[?&]dl=0").unwrap());
static IMGUR_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(?:www\.)?imgur\.com/([A-Za-z0-9]+)/?$").unwrap());

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Blank means the stock photo; share-page links become direct image links.
pub fn normalize_image_url(raw: &str) -> String {
    let url = raw.trim();
    if url.is_empty() {
        return DEFAULT_IMAGE.to_string();
    }
    if let Some(caps) = DRIVE_FILE.captures(url).or_else(|| DRIVE_OPEN.captures(url)) {
        return format!("https://drive.google.com/uc?export=view&id={}", &caps[1]);
    }
    if DROPBOX.is_match(url) {
        return url.replacen("dl=0", "raw=1", 1);
    }
    if let Some(caps) = IMGUR_PAGE.captures(url) {
        return format!("https://i.imgur.com/{}.jpg", &caps[1]);
    }
    url.to_string()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::param_error("Invalid date, expected YYYY-MM-DD."))
}

/// Accepts `HH:MM` or `HH:MM:SS`; blank means no time.
pub fn parse_time(raw: &str) -> Result<Option<NaiveTime>, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map(Some)
        .map_err(|_| AppError::param_error("Invalid time, expected HH:MM."))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventFilter {
    Upcoming,
    Completed,
    #[default]
    All,
}

#[derive(Serialize, Clone, Debug)]
pub struct EventDto {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub date: String,
    pub time: Option<String>,
    pub venue: String,
    pub image: String,
}

impl From<event::Model> for EventDto {
    fn from(model: event::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            date: fmt_date(model.date),
            time: model.time.map(fmt_time),
            venue: model.venue,
            image: model.image,
        }
    }
}

/// Full set of fields for a new event.
#[derive(Deserialize, Clone, Debug)]
pub struct NewEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Partial update; an absent field keeps the stored value, `"time": null` clears the time.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EventPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub time: Option<Option<String>>,
    pub venue: Option<String>,
    pub image: Option<String>,
}

fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn required(value: &str, field: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::param_error(format!("Event {} is required.", field)));
    }
    Ok(value.to_string())
}

pub async fn find_event<C: ConnectionTrait>(db: &C, id: i32) -> Result<event::Model, AppError> {
    event::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(|e| AppError::db("find event", e))?
        .ok_or_else(|| AppError::not_found("Event"))
}

pub async fn list_events(
    db: &DatabaseConnection,
    filter: EventFilter,
    today: NaiveDate,
) -> Result<Vec<event::Model>, AppError> {
    let query = event::Entity::find();
    let query = match filter {
        EventFilter::Upcoming => query
            .filter(event::Column::Date.gte(today))
            .order_by_asc(event::Column::Date)
            .order_by_asc(event::Column::Time),
        EventFilter::Completed => query
            .filter(event::Column::Date.lt(today))
            .order_by_desc(event::Column::Date)
            .order_by_desc(event::Column::Time),
        EventFilter::All => query.order_by_desc(event::Column::Date),
    };
    query
        .order_by_asc(event::Column::Id)
        .all(db)
        .await
        .map_err(|e| AppError::db("list events", e))
}

#[derive(Serialize, Debug)]
pub struct EventStats {
    pub total_events: u64,
    pub total_registrations: u64,
    pub upcoming_count: u64,
    pub completed_count: u64,
}

pub async fn stats(db: &DatabaseConnection, today: NaiveDate) -> Result<EventStats, AppError> {
    let total_events = event::Entity::find()
        .count(db)
        .await
        .map_err(|e| AppError::db("count events", e))?;
    let upcoming_count = event::Entity::find()
        .filter(event::Column::Date.gte(today))
        .count(db)
        .await
        .map_err(|e| AppError::db("count upcoming events", e))?;
    let completed_count = event::Entity::find()
        .filter(event::Column::Date.lt(today))
        .count(db)
        .await
        .map_err(|e| AppError::db("count completed events", e))?;
    let total_registrations = registration::Entity::find()
        .count(db)
        .await
        .map_err(|e| AppError::db("count registrations", e))?;

    Ok(EventStats {
        total_events,
        total_registrations,
        upcoming_count,
        completed_count,
    })
}

pub async fn soonest_upcoming(
    db: &DatabaseConnection,
    today: NaiveDate,
    limit: u64,
) -> Result<Vec<event::Model>, AppError> {
    event::Entity::find()
        .filter(event::Column::Date.gte(today))
        .order_by_asc(event::Column::Date)
        .order_by_asc(event::Column::Time)
        .limit(limit)
        .all(db)
        .await
        .map_err(|e| AppError::db("list soonest events", e))
}

pub async fn registration_count(db: &DatabaseConnection, event_id: i32) -> Result<u64, AppError> {
    registration::Entity::find()
        .filter(registration::Column::EventId.eq(event_id))
        .count(db)
        .await
        .map_err(|e| AppError::db("count event registrations", e))
}

pub async fn create_event(db: &DatabaseConnection, input: NewEvent) -> Result<event::Model, AppError> {
    let name = required(&input.name, "name")?;
    let description = required(&input.description, "description")?;
    let date = parse_date(&input.date)?;
    let time = parse_time(input.time.as_deref().unwrap_or(""))?;
    let venue = required(&input.venue, "venue")?;
    let image = normalize_image_url(input.image.as_deref().unwrap_or(""));

    let created = event::ActiveModel {
        name: Set(name),
        description: Set(description),
        date: Set(date),
        time: Set(time),
        venue: Set(venue),
        image: Set(image),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| AppError::db("insert event", e))?;

    info!("event {} '{}' created", created.id, created.name);
    Ok(created)
}

pub async fn update_event(
    db: &DatabaseConnection,
    id: i32,
    patch: EventPatch,
) -> Result<event::Model, AppError> {
    let existing = find_event(db, id).await?;
    let mut active: event::ActiveModel = existing.into();

    if let Some(name) = patch.name {
        active.name = Set(required(&name, "name")?);
    }
    if let Some(description) = patch.description {
        active.description = Set(required(&description, "description")?);
    }
    if let Some(date) = patch.date {
        active.date = Set(parse_date(&date)?);
    }
    if let Some(time) = patch.time {
        active.time = Set(parse_time(time.as_deref().unwrap_or(""))?);
    }
    if let Some(venue) = patch.venue {
        active.venue = Set(required(&venue, "venue")?);
    }
    if let Some(image) = patch.image {
        active.image = Set(normalize_image_url(&image));
    }

    let updated = active
        .update(db)
        .await
        .map_err(|e| AppError::db("update event", e))?;
    info!("event {} updated", updated.id);
    Ok(updated)
}

/// Removes the event and every registration for it in one transaction.
pub async fn delete_event(db: &DatabaseConnection, id: i32) -> Result<u64, AppError> {
    let removed = db
        .transaction::<_, u64, AppError>(|txn| {
            Box::pin(async move {
                find_event(txn, id).await?;
                let regs = registration::Entity::delete_many()
                    .filter(registration::Column::EventId.eq(id))
                    .exec(txn)
                    .await
                    .map_err(|e| AppError::db("delete event registrations", e))?;
                event::Entity::delete_by_id(id)
                    .exec(txn)
                    .await
                    .map_err(|e| AppError::db("delete event", e))?;
                Ok(regs.rows_affected)
            })
        })
        .await
        .map_err(map_tx_error)?;

    info!("event {} deleted with {} registrations", id, removed);
    Ok(removed)
}

pub fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(e) => AppError::db("transaction", e),
        TransactionError::Transaction(app) => app,
    }
}
