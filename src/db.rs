use bcrypt::hash;
use chrono::Utc;
use log::{info, warn};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, Set, Statement,
};
use std::fs;
use std::path::Path;

use crate::config::{AdminBootstrap, AppConfig};
use crate::entity::user;
use crate::student;

const SCHEMA_SQL: &str = include_str!("../schema-sqlite.sql");

pub async fn connect_db(config: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    if config.is_sqlite() {
        ensure_sqlite_dir(config);
    }
    let db = Database::connect(config.database_url()).await?;
    if config.is_sqlite() {
        init_sqlite_schema(&db).await?;
    } else {
        warn!(
            "DATABASE_URL is not SQLite; the bundled schema is SQLite-only, \
             so t_user, t_event, t_registration and t_student_profile must already exist"
        );
    }
    Ok(db)
}

fn ensure_sqlite_dir(config: &AppConfig) {
    let raw = config.database_url();
    let path = raw
        .strip_prefix("sqlite://")
        .or_else(|| raw.strip_prefix("sqlite:"))
        .unwrap_or(raw.as_str());
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return;
    }
    if let Some(parent) = Path::new(path).parent() {
        let _ = fs::create_dir_all(parent);
    }
}

pub async fn init_sqlite_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    db.execute(Statement::from_string(backend, "PRAGMA foreign_keys = ON"))
        .await?;
    for stmt in split_sql(SCHEMA_SQL) {
        db.execute(Statement::from_string(backend, stmt)).await?;
    }
    Ok(())
}

fn split_sql(input: &str) -> Vec<String> {
    let mut buf = String::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }
        buf.push_str(line);
        buf.push('\n');
    }
    buf.split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Creates the configured superuser if the username is not taken yet.
pub async fn bootstrap_admin(db: &DatabaseConnection, admin: &AdminBootstrap) -> Result<(), DbErr> {
    let existing = user::Entity::find()
        .filter(user::Column::Username.eq(admin.username.as_str()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let password_hash = hash(&admin.password, bcrypt::DEFAULT_COST)
        .map_err(|e| DbErr::Custom(format!("hash admin password: {}", e)))?;
    let created = user::ActiveModel {
        username: Set(admin.username.clone()),
        first_name: Set(String::new()),
        last_name: Set(String::new()),
        email: Set(admin.email.clone()),
        password_hash: Set(password_hash),
        is_staff: Set(true),
        is_superuser: Set(true),
        date_joined: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    student::get_or_create_profile(db, created.id).await?;
    info!("created admin account '{}'", created.username);
    Ok(())
}

#[cfg(test)]
pub async fn memory_db() -> DatabaseConnection {
    use sea_orm::ConnectOptions;

    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.expect("connect in-memory sqlite");
    init_sqlite_schema(&db).await.expect("init schema");
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sql_skips_comments_and_blank_statements() {
        let sql = "-- header\nCREATE TABLE a (id INTEGER);\n\n-- two\nCREATE INDEX i ON a (id);\n";
        let stmts = split_sql(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE a"));
        assert!(stmts[1].starts_with("CREATE INDEX i"));
    }

    #[actix_web::test]
    async fn schema_init_is_idempotent() {
        let db = memory_db().await;
        init_sqlite_schema(&db).await.unwrap();
    }

    #[actix_web::test]
    async fn bootstrap_admin_creates_superuser_once() {
        let db = memory_db().await;
        let admin = AdminBootstrap {
            username: "root".to_string(),
            password: "rootpass1".to_string(),
            email: "root@college.edu".to_string(),
        };
        bootstrap_admin(&db, &admin).await.unwrap();
        bootstrap_admin(&db, &admin).await.unwrap();

        let users = user::Entity::find().all(&db).await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].is_superuser);
        assert!(users[0].is_admin());
    }
}
