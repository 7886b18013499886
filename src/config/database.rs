//! Database configuration module for the club ledger.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the database schema always matches the Rust structs. Composite uniqueness rules that
//! the entity attributes cannot express are added as explicit unique indexes.

use crate::entities::{
    Balance, BalanceMovement, CashboxCategory, CashboxMovement, Concept, Due, DueColumn, Member,
    MemberCategory, Payment, Settlement, SettlementColumn,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/club_ledger.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a default local `SQLite` file if not found.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a default local `SQLite` file if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all tables and unique indexes if they do not exist yet.
///
/// Parents are created before children so foreign keys resolve.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table(db, &schema, MemberCategory).await?;
    create_table(db, &schema, Member).await?;
    create_table(db, &schema, Concept).await?;
    create_table(db, &schema, Due).await?;
    create_table(db, &schema, Payment).await?;
    create_table(db, &schema, Settlement).await?;
    create_table(db, &schema, Balance).await?;
    create_table(db, &schema, BalanceMovement).await?;
    create_table(db, &schema, CashboxCategory).await?;
    create_table(db, &schema, CashboxMovement).await?;

    let due_period_index = Index::create()
        .name("idx_dues_period_concept")
        .table(Due)
        .col(DueColumn::Month)
        .col(DueColumn::Year)
        .col(DueColumn::ConceptId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&due_period_index)).await?;

    let settlement_index = Index::create()
        .name("idx_settlements_payment_due")
        .table(Settlement)
        .col(SettlementColumn::PaymentId)
        .col(SettlementColumn::DueId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&settlement_index)).await?;

    info!("Database tables ensured.");
    Ok(())
}
