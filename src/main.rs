use chrono::{Datelike, NaiveDate, Utc};
use club_ledger::{
    config::{club, database},
    core::{cashbox, dues, members},
    errors::{Error, Result},
};
use dotenvy::dotenv;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; variables may also come from the environment
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load the club catalog configuration
    let config = club::load_default_config()
        .inspect_err(|e| error!("Failed to load club configuration: {}", e))?;

    // 4. Connect and make sure the schema exists
    let db = database::create_connection()
        .await
        .inspect(|_| info!("Database connection established."))
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db).await?;

    // 5. Seed the catalog
    cashbox::seed_categories(&db, &config.cashbox.categories).await?;
    dues::seed_concepts(&db, &config.concepts).await?;
    for year in &config.dues.generate_years {
        dues::generate_dues_for_year(&db, *year, None).await?;
    }

    // 6. Mirror payments recorded before the cashbox existed
    let mirror = cashbox::CashboxMirror::from_config(&config.cashbox);
    let backfill = mirror.backfill_payment_movements(&db, false).await?;
    if backfill.created > 0 {
        info!("Backfilled {} payment movements.", backfill.created);
    }

    // 7. Status report
    let member_count = members::list_members(&db).await?.len();
    let stale = dues::stale_dues(&db).await?;
    for item in &stale {
        warn!(
            "Due {} ({}) is {} but its concept now suggests {}",
            item.due.id, item.due.code, item.due.amount, item.concept_amount
        );
    }

    let today = Utc::now().date_naive();
    let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).ok_or_else(|| {
        Error::Validation {
            message: format!("Cannot compute the first day of {today}"),
        }
    })?;
    let summary = cashbox::period_summary(&db, month_start, today, Decimal::ZERO).await?;
    info!(
        "{} members, {} stale dues. Cashbox {}..{}: income {}, expense {}, net {} over {} movements.",
        member_count,
        stale.len(),
        summary.start,
        summary.end,
        summary.income,
        summary.expense,
        summary.net(),
        summary.movement_count
    );
    for category in &summary.by_category {
        info!(
            "  {} ({}): {} in {} movements",
            category.name, category.kind, category.total, category.count
        );
    }

    Ok(())
}
