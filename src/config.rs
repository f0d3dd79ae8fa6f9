use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_header: String,
    pub session_days: i64,
    pub secure_cookie: bool,
    pub admin_bootstrap: Option<AdminBootstrap>,
}

/// Superuser created at startup when no account with that username exists.
#[derive(Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8000);

        let sqlite_path = env::var("SQLITE_PATH")
            .unwrap_or_else(|_| "./data/college_events.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "college-events-dev-secret".to_string());

        let token_header = env::var("TOKEN_HEADER").unwrap_or_else(|_| "token".to_string());

        let session_days = env::var("SESSION_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(14);

        let secure_cookie = env::var("SECURE_COOKIE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let admin_bootstrap = match (env::var("ADMIN_USERNAME"), env::var("ADMIN_PASSWORD")) {
            (Ok(username), Ok(password)) if !username.trim().is_empty() && !password.is_empty() => {
                Some(AdminBootstrap {
                    username: username.trim().to_string(),
                    password,
                    email: env::var("ADMIN_EMAIL").unwrap_or_default(),
                })
            }
            _ => None,
        };

        Self {
            server_port,
            sqlite_path,
            database_url,
            jwt_secret,
            token_header,
            session_days,
            secure_cookie,
            admin_bootstrap,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}?mode=rwc", path)
    }

    pub fn is_sqlite(&self) -> bool {
        self.database_url().starts_with("sqlite:")
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            server_port: 0,
            sqlite_path: ":memory:".to_string(),
            database_url: Some("sqlite::memory:".to_string()),
            jwt_secret: "test-secret".to_string(),
            token_header: "token".to_string(),
            session_days: 1,
            secure_cookie: false,
            admin_bootstrap: None,
        }
    }
}
