use async_trait::async_trait;
use sqlx::Row;
use std::collections::{HashMap, HashSet};

use crate::database::Database;
use crate::errors::BookingError;

/// External discipline catalog: which disciplines a package product spans,
/// and which product groupings a discipline appears in. The ledger computes
/// sibling-group eligibility from this at call time instead of hard-coding
/// any pairing.
#[async_trait]
pub trait DisciplineCatalog: Send + Sync {
    async fn disciplines_of(&self, product_id: i64) -> Result<HashSet<i64>, BookingError>;

    async fn groups_containing(
        &self,
        discipline_id: i64,
    ) -> Result<Vec<HashSet<i64>>, BookingError>;
}

/// Catalog backed by the package product link table.
#[derive(Clone)]
pub struct PgCatalog {
    db: Database,
}

impl PgCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DisciplineCatalog for PgCatalog {
    async fn disciplines_of(&self, product_id: i64) -> Result<HashSet<i64>, BookingError> {
        let rows = sqlx::query(
            "SELECT discipline_id FROM package_product_disciplines WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("discipline_id")).collect())
    }

    async fn groups_containing(
        &self,
        discipline_id: i64,
    ) -> Result<Vec<HashSet<i64>>, BookingError> {
        let rows = sqlx::query(
            "SELECT ppd.product_id, ppd.discipline_id \
             FROM package_product_disciplines ppd \
             WHERE ppd.product_id IN ( \
                 SELECT product_id FROM package_product_disciplines \
                 WHERE discipline_id = $1 \
             )",
        )
        .bind(discipline_id)
        .fetch_all(&self.db.pool)
        .await?;

        let mut groups: HashMap<i64, HashSet<i64>> = HashMap::new();
        for row in rows {
            groups
                .entry(row.get::<i64, _>("product_id"))
                .or_default()
                .insert(row.get::<i64, _>("discipline_id"));
        }
        Ok(groups.into_values().collect())
    }
}

/// Fixed catalog for tests and single-studio deployments without a product
/// database.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    products: HashMap<i64, HashSet<i64>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product_id: i64, disciplines: &[i64]) -> Self {
        self.products
            .insert(product_id, disciplines.iter().copied().collect());
        self
    }
}

#[async_trait]
impl DisciplineCatalog for StaticCatalog {
    async fn disciplines_of(&self, product_id: i64) -> Result<HashSet<i64>, BookingError> {
        Ok(self.products.get(&product_id).cloned().unwrap_or_default())
    }

    async fn groups_containing(
        &self,
        discipline_id: i64,
    ) -> Result<Vec<HashSet<i64>>, BookingError> {
        Ok(self
            .products
            .values()
            .filter(|set| set.contains(&discipline_id))
            .cloned()
            .collect())
    }
}
