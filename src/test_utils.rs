//! Shared test utilities for the club ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    config::club::CashboxConfig,
    core::{
        dues,
        members::{self, NewMember},
        settlement::{PaymentIntent, SettlementEngine},
    },
    entities::{self, PaymentMethod},
    errors::Result,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Routes `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("club_ledger=debug")
        .with_test_writer()
        .try_init();
}

/// Member registration arguments with sensible defaults.
///
/// # Defaults
/// * `national_id`: derived from the names, so equal names collide
/// * `birth_date`: 1990-01-01
/// * `is_admin`: false
pub fn new_member_args(first_name: &str, last_name: &str) -> NewMember {
    NewMember {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        address: "1 Club Street".to_string(),
        national_id: format!("ID-{first_name}-{last_name}"),
        category_id: None,
        email: format!(
            "{}.{}@example.com",
            first_name.to_lowercase(),
            last_name.to_lowercase()
        ),
        phone: "555-0100".to_string(),
        birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default(),
        is_admin: false,
    }
}

/// Registers a test member with default contact data.
pub async fn create_test_member(
    db: &DatabaseConnection,
    first_name: &str,
    last_name: &str,
) -> Result<entities::member::Model> {
    members::create_member(db, new_member_args(first_name, last_name)).await
}

/// Sets up a complete test environment with one member.
/// Returns (db, member) for balance scenarios.
pub async fn setup_with_member() -> Result<(DatabaseConnection, entities::member::Model)> {
    let db = setup_test_db().await?;
    let member = create_test_member(&db, "Test", "Member").await?;
    Ok((db, member))
}

/// Creates a concept with an integer suggested amount.
pub async fn create_test_concept(
    db: &DatabaseConnection,
    name: &str,
    amount: i64,
) -> Result<entities::concept::Model> {
    dues::create_concept(db, name, Decimal::from(amount), None).await
}

/// Sets up a member and one March 2026 "Monthly Dues" due of `amount`.
/// Returns (db, member, due) for settlement scenarios.
pub async fn setup_with_member_and_due(
    amount: i64,
) -> Result<(
    DatabaseConnection,
    entities::member::Model,
    entities::due::Model,
)> {
    let (db, member) = setup_with_member().await?;
    let concept = create_test_concept(&db, "Monthly Dues", amount).await?;
    let due = dues::create_due(&db, concept.id, 3, 2026).await?;
    Ok((db, member, due))
}

/// Engine mirroring into the default dues category.
pub fn test_engine(db: &DatabaseConnection) -> SettlementEngine {
    SettlementEngine::with_cashbox(clone_db(db), &CashboxConfig::default())
}

/// Variant-wise clone of a connection; sea-orm drops `Clone` on
/// `DatabaseConnection` when the `mock` feature is enabled for tests.
pub fn clone_db(db: &DatabaseConnection) -> DatabaseConnection {
    match db {
        DatabaseConnection::SqlxSqlitePoolConnection(conn) => {
            DatabaseConnection::SqlxSqlitePoolConnection(conn.clone())
        }
        DatabaseConnection::MockDatabaseConnection(conn) => {
            DatabaseConnection::MockDatabaseConnection(conn.clone())
        }
        DatabaseConnection::Disconnected => DatabaseConnection::Disconnected,
    }
}

/// Cash payment intent dated 2026-03-10, without balance use.
pub fn payment_intent(member_id: i64, due_ids: Vec<i64>, tendered: i64) -> PaymentIntent {
    PaymentIntent {
        member_id,
        due_ids,
        tendered: Decimal::from(tendered),
        use_balance: false,
        method: PaymentMethod::Cash,
        paid_on: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap_or_default(),
        reference: None,
        comments: None,
    }
}
