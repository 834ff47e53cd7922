use crate::models::{ClassOccurrence, SeatAssignment};
use crate::{database::Database, redis_client::RedisClient};
use redis::AsyncCommands;
use tracing::info;

/// Read-path cache for occurrence and seat listings. Arbitration never
/// happens here: reserving a seat is decided by the assignment row alone,
/// the cache only spares the database the hot listing queries and is
/// invalidated after every transition.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database) -> Self {
        Self { redis, db }
    }

    // Прогрев кеша при старте
    pub async fn warmup_cache(&self) {
        info!("Starting cache warmup...");

        if let Ok(occurrences) = self.load_occurrences_from_db().await {
            info!("Loaded {} upcoming occurrences", occurrences.len());
            let _ = self.save_occurrences_to_cache(&occurrences).await;
        }

        info!("Cache warmup done");
    }

    // Предстоящие занятия
    pub async fn get_occurrences(&self) -> Vec<ClassOccurrence> {
        if let Ok(occurrences) = self.get_occurrences_from_cache().await {
            return occurrences;
        }

        // Если кеш не работает - идем в БД
        if let Ok(occurrences) = self.load_occurrences_from_db().await {
            let _ = self.save_occurrences_to_cache(&occurrences).await;
            return occurrences;
        }

        vec![]
    }

    // Карта мест одного занятия
    pub async fn get_seat_map(&self, occurrence_id: i64) -> Vec<SeatAssignment> {
        if let Ok(assignments) = self.get_seat_map_from_cache(occurrence_id).await {
            return assignments;
        }

        if let Ok(assignments) = self.load_seat_map_from_db(occurrence_id).await {
            let _ = self.save_seat_map_to_cache(occurrence_id, &assignments).await;
            return assignments;
        }

        vec![]
    }

    // Инвалидировать кеш мест после любого перехода
    pub async fn invalidate_seat_map(&self, occurrence_id: i64) {
        let key = format!("assignments:{}", occurrence_id);
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(&key).await;
    }

    pub async fn invalidate_occurrences(&self) {
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del("occurrences").await;
    }

    // === Работа с БД ===

    async fn load_occurrences_from_db(&self) -> Result<Vec<ClassOccurrence>, sqlx::Error> {
        sqlx::query_as::<_, ClassOccurrence>(
            "SELECT id, discipline_id, studio_id, capacity, status, starts_at, ends_at, created_at \
             FROM class_occurrences \
             WHERE starts_at > NOW() AND status = 'scheduled' \
             ORDER BY starts_at",
        )
        .fetch_all(&self.db.pool)
        .await
    }

    async fn load_seat_map_from_db(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<SeatAssignment>, sqlx::Error> {
        sqlx::query_as::<_, SeatAssignment>(
            "SELECT id, occurrence_id, seat_id, status, holder_user_id, waiting_user_id, \
                    consumed_credit_kind, consumed_credit_id, reserved_at, expires_at \
             FROM seat_assignments \
             WHERE occurrence_id = $1 \
             ORDER BY seat_id",
        )
        .bind(occurrence_id)
        .fetch_all(&self.db.pool)
        .await
    }

    // === Работа с кешем ===

    async fn get_occurrences_from_cache(&self) -> Result<Vec<ClassOccurrence>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get("occurrences").await?;
        serde_json::from_str(&data)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error")))
    }

    async fn save_occurrences_to_cache(
        &self,
        occurrences: &[ClassOccurrence],
    ) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(occurrences)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error")))?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex("occurrences", data, 300).await // 5 минут
    }

    async fn get_seat_map_from_cache(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<SeatAssignment>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let key = format!("assignments:{}", occurrence_id);
        let data: String = conn.get(key).await?;
        serde_json::from_str(&data)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error")))
    }

    async fn save_seat_map_to_cache(
        &self,
        occurrence_id: i64,
        assignments: &[SeatAssignment],
    ) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(assignments)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error")))?;
        let key = format!("assignments:{}", occurrence_id);
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, data, 60).await // 1 минута, карта мест меняется часто
    }
}
