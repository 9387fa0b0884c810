//! Utility to check that the CRM tables exist and print their columns.

use dotenvy::dotenv;
use sqlx::{Connection, PgConnection};
use std::env;

const CRM_TABLES: [&str; 3] = ["leads", "broadcasts", "broadcast_recipients"];

/// Main entry point for the schema inspection utility.
///
/// Connects with `DATABASE_URL` and lists the columns of each CRM table,
/// exiting non-zero when one of them is missing.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let mut conn = PgConnection::connect(&database_url).await?;

    let mut missing = Vec::new();
    for table in CRM_TABLES {
        let columns: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&mut conn)
        .await?;

        if columns.is_empty() {
            println!("- {} (missing)", table);
            missing.push(table);
            continue;
        }

        println!("- {}", table);
        for (col, type_) in columns {
            println!("  - {}: {}", col, type_);
        }
        println!();
    }

    conn.close().await?;

    if !missing.is_empty() {
        anyhow::bail!("Missing tables: {}", missing.join(", "));
    }
    Ok(())
}
