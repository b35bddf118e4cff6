//! Read-only catalog access: point lookups and the filtered, uniformly
//! sampled candidate pool for the recommendation path.

use rand::Rng;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::error::AppResult;
use crate::models::Product;

/// Upper bound on the uniformly sampled candidate pool.
pub const CANDIDATE_SAMPLE_LIMIT: i64 = 200;

const PRODUCT_COLUMNS: &str = "product_id, name, brand, category_main, primary_color, price, occasion, season, style, image_url, description, feature_vector";

/// Combined candidate predicate: caller filters, exclusion window, and the
/// diversity controller's avoidance rules.
#[derive(Debug, Clone, Default)]
pub struct CandidateQuery {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub category: Option<String>,
    pub exclude_ids: Vec<String>,
    pub avoid_categories: Vec<String>,
    pub avoid_colors: Vec<String>,
    pub avoid_brands: Vec<String>,
}

pub struct CatalogService {
    pool: PgPool,
}

impl CatalogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_product(&self, product_id: &str) -> AppResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE product_id = $1"
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    /// Fetch many products keyed by id; used to resolve facets for history
    /// entries in one round trip.
    pub async fn get_products_by_ids(
        &self,
        product_ids: &[String],
    ) -> AppResult<HashMap<String, Product>> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE product_id = ANY($1)"
        ))
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(products
            .into_iter()
            .map(|p| (p.product_id.clone(), p))
            .collect())
    }

    /// Uniform random sample of catalog rows matching the combined predicate.
    /// Sampling in the store keeps variety across runs even when the matching
    /// set is large. A transient failure is retried once with jittered
    /// backoff.
    pub async fn sample_candidates(&self, query: &CandidateQuery) -> AppResult<Vec<Product>> {
        match self.run_candidate_query(query).await {
            Ok(products) => Ok(products),
            Err(first_err) => {
                let backoff = Duration::from_millis(25 + rand::thread_rng().gen_range(0..50));
                warn!(error = %first_err, backoff_ms = backoff.as_millis() as u64, "catalog read failed, retrying once");
                tokio::time::sleep(backoff).await;
                Ok(self.run_candidate_query(query).await?)
            }
        }
    }

    async fn run_candidate_query(&self, query: &CandidateQuery) -> Result<Vec<Product>, sqlx::Error> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE 1=1"));

        if let Some(min_price) = query.min_price {
            builder.push(" AND price >= ").push_bind(min_price);
        }
        if let Some(max_price) = query.max_price {
            builder.push(" AND price <= ").push_bind(max_price);
        }
        if let Some(category) = &query.category {
            builder
                .push(" AND lower(category_main) = lower(")
                .push_bind(category.clone())
                .push(")");
        }
        if !query.exclude_ids.is_empty() {
            builder
                .push(" AND product_id != ALL(")
                .push_bind(query.exclude_ids.clone())
                .push(")");
        }
        if !query.avoid_categories.is_empty() {
            builder
                .push(" AND category_main != ALL(")
                .push_bind(query.avoid_categories.clone())
                .push(")");
        }
        if !query.avoid_colors.is_empty() {
            builder
                .push(" AND primary_color != ALL(")
                .push_bind(query.avoid_colors.clone())
                .push(")");
        }
        if !query.avoid_brands.is_empty() {
            builder
                .push(" AND brand != ALL(")
                .push_bind(query.avoid_brands.clone())
                .push(")");
        }

        builder
            .push(" ORDER BY random() LIMIT ")
            .push_bind(CANDIDATE_SAMPLE_LIMIT);

        builder
            .build_query_as::<Product>()
            .fetch_all(&self.pool)
            .await
    }

    pub async fn count(&self) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
