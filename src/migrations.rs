use sqlx::{Pool, Postgres};

// Embed SQL migrations at compile time for deterministic startup
const MIG_0001: &str = include_str!("../migrations/0001_create_products.sql");
const MIG_0002: &str = include_str!("../migrations/0002_create_user_sessions.sql");
const MIG_0003: &str = include_str!("../migrations/0003_create_session_history.sql");
const MIG_0004: &str = include_str!("../migrations/0004_create_interactions.sql");

pub async fn run_all(db: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    // Advisory lock so concurrent replicas do not race the schema
    let _ = sqlx::query("SELECT pg_advisory_lock(910273)").execute(db).await;

    let migrations = [MIG_0001, MIG_0002, MIG_0003, MIG_0004];
    for (i, sql) in migrations.into_iter().enumerate() {
        let label = i + 1;
        match sqlx::raw_sql(sql).execute(db).await {
            Ok(_) => tracing::info!(migration = %label, "migration applied"),
            Err(e) => {
                tracing::warn!(migration = %label, error = %e, "migration may have been applied already");
            }
        }
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(910273)").execute(db).await;
    Ok(())
}
