use serde::Deserialize;
use std::env;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingConfig,
    pub notifier: NotifierConfig,
    pub features: FeatureFlags,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Параметры резервирования и фоновых задач
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    /// How long a reservation holds its seat before the sweeper may reclaim it.
    pub reservation_ttl_minutes: i64,
    /// Pause between background sweep/promotion passes.
    pub job_interval_seconds: u64,
}

// Настройки вебхука уведомлений
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: String,
    pub signing_secret: String,
    pub failure_threshold: u32,
    pub open_timeout_seconds: u64,
}

// Feature flags для включения/выключения функциональности
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    /// Let a grant for one discipline pay for a sibling discipline bundled
    /// into the same package product.
    pub enable_group_eligibility: bool,
    pub enable_notifications: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "studio_booking=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            booking: BookingConfig {
                reservation_ttl_minutes: env::var("RESERVATION_TTL_MINUTES")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .expect("RESERVATION_TTL_MINUTES must be a valid number"),
                job_interval_seconds: env::var("JOB_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("JOB_INTERVAL_SECONDS must be a valid number"),
            },
            notifier: NotifierConfig {
                webhook_url: env::var("NOTIFIER_WEBHOOK_URL")
                    .unwrap_or_else(|_| "http://localhost:9090/hooks/booking".to_string()),
                signing_secret: env::var("NOTIFIER_SIGNING_SECRET")
                    .unwrap_or_else(|_| "dev-secret".to_string()),
                failure_threshold: env::var("NOTIFIER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("NOTIFIER_FAILURE_THRESHOLD must be a valid number"),
                open_timeout_seconds: env::var("NOTIFIER_OPEN_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("NOTIFIER_OPEN_TIMEOUT_SECONDS must be a valid number"),
            },
            features: FeatureFlags {
                enable_group_eligibility: env::var("ENABLE_GROUP_ELIGIBILITY")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("ENABLE_GROUP_ELIGIBILITY must be true or false"),
                enable_notifications: env::var("ENABLE_NOTIFICATIONS")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("ENABLE_NOTIFICATIONS must be true or false"),
            },
        }
    }
}
