pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;
use tokio::task;

use crate::catalog::{DisciplineCatalog, PgCatalog};
use crate::clock::{Clock, SystemClock};
use crate::services::{
    CreditLedger, ExpirationSweeper, NoopNotifier, NotificationSender, PgSeatLayout,
    ReservationEngine, SeatLayoutProvider, WaitingListPromoter, WebhookNotifier,
};
use crate::store::{BookingStore, PgStore};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub store: Arc<dyn BookingStore>,
    pub layout: Arc<dyn SeatLayoutProvider>,
    pub clock: Arc<dyn Clock>,
    pub engine: ReservationEngine,
    pub sweeper: ExpirationSweeper,
    pub promoter: WaitingListPromoter,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;

        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        let cache = cache::CacheService::new(redis.clone(), db.clone());

        let store: Arc<dyn BookingStore> = Arc::new(PgStore::new(db.clone()));
        let catalog: Arc<dyn DisciplineCatalog> = Arc::new(PgCatalog::new(db.clone()));
        let layout: Arc<dyn SeatLayoutProvider> = Arc::new(PgSeatLayout::new(db.clone()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier: Arc<dyn NotificationSender> = if config.features.enable_notifications {
            Arc::new(WebhookNotifier::from_config(&config.notifier))
        } else {
            Arc::new(NoopNotifier)
        };

        let ledger = CreditLedger::new(
            Arc::clone(&store),
            catalog,
            config.features.enable_group_eligibility,
        );
        let engine = ReservationEngine::new(
            Arc::clone(&store),
            ledger.clone(),
            Arc::clone(&clock),
            Arc::clone(&notifier),
        );
        let sweeper = ExpirationSweeper::new(
            Arc::clone(&store),
            ledger.clone(),
            Arc::clone(&clock),
        );
        let promoter = WaitingListPromoter::new(
            Arc::clone(&store),
            engine.clone(),
            Arc::clone(&clock),
            Arc::clone(&notifier),
            config.booking.reservation_ttl_minutes,
        );

        let state = Arc::new(Self {
            db,
            redis,
            cache,
            config,
            store,
            layout,
            clock,
            engine,
            sweeper,
            promoter,
        });

        // Warmup cache в фоне
        let state_for_bg = state.clone();
        task::spawn(async move {
            state_for_bg.cache.warmup_cache().await;
        });

        Ok(state)
    }
}
