use sqlx::SqlitePool;

use super::NewProcedure;

/// Catalog seeded on the first migration and restorable from the admin API:
/// (name, description, price in cents, duration in minutes).
const DEFAULT_CATALOG: &[(&str, &str, i64, u32)] = &[
    ("Volume Brasileiro", "Técnica que mescla fios finos para um volume natural e marcante.", 10_000, 120),
    ("Volume Express", "Volume rápido para um look mais cheio em menos tempo.", 8_000, 90),
    ("Volume Glamour", "Cílios densos e definidos para um olhar glamouroso.", 12_000, 150),
    ("Volume Luxo", "Máximo de volume e definição para um efeito de luxo.", 15_000, 180),
    ("Manutenção Volume Brasileiro", "Manutenção da extensão de volume brasileiro.", 7_000, 90),
    ("Manutenção Volume Glamour", "Manutenção da extensão de volume glamour.", 8_000, 100),
    ("Manutenção Volume Luxo", "Manutenção da extensão de volume de luxo.", 10_000, 120),
    ("Remoção", "Remoção segura das extensões de cílios.", 3_000, 30),
    ("Design de Sobrancelha Simples", "Modelagem e alinhamento das sobrancelhas.", 2_500, 30),
    ("Design de Sobrancelha com Henna", "Design com aplicação de henna para preenchimento e cor.", 3_500, 45),
];

pub fn default_catalog() -> Vec<NewProcedure> {
    DEFAULT_CATALOG
        .iter()
        .map(|(name, description, price_cents, duration_minutes)| NewProcedure {
            name: (*name).to_string(),
            description: (*description).to_string(),
            price_cents: *price_cents,
            duration_minutes: *duration_minutes,
            image_url: None,
        })
        .collect()
}

async fn is_applied(pool: &SqlitePool, name: &str) -> anyhow::Result<bool> {
    let applied: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(applied)
}

async fn mark_applied(pool: &SqlitePool, name: &str) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    tracing::info!("Applied migration: {}", name);
    Ok(())
}

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    // 001: base schema
    if !is_applied(pool, "001_init").await? {
        let migration_sql = include_str!("../../migrations/001_init.sql");
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(pool).await?;
            }
        }
        mark_applied(pool, "001_init").await?;
    }

    // 002: default catalog, only into an empty table
    if !is_applied(pool, "002_default_procedures").await? {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM procedures")
            .fetch_one(pool)
            .await?;
        if existing == 0 {
            for procedure in default_catalog() {
                sqlx::query(
                    "INSERT INTO procedures (name, description, price_cents, duration_minutes, image_url)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&procedure.name)
                .bind(&procedure.description)
                .bind(procedure.price_cents)
                .bind(i64::from(procedure.duration_minutes))
                .bind(&procedure.image_url)
                .execute(pool)
                .await?;
            }
        }
        mark_applied(pool, "002_default_procedures").await?;
    }

    // 003: indexes for the per-date occupancy scan and reminder queries
    if !is_applied(pool, "003_indexes").await? {
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_bookings_date_status ON bookings(date, status)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings(status)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_client_contact ON bookings(client_contact)",
            "CREATE INDEX IF NOT EXISTS idx_revenue_date ON revenue_entries(date)",
        ] {
            sqlx::query(statement).execute(pool).await?;
        }
        mark_applied(pool, "003_indexes").await?;
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}
