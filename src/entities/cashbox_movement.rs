//! Cashbox movement entity - One income or expense entry in the cashbox ledger.
//!
//! Movements created by the payment mirror carry `payment_id` (unique) and are
//! removed together with their payment.

use super::cashbox_category::MovementKind;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Cashbox movement database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cashbox_movements")]
pub struct Model {
    /// Unique identifier for the movement
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Accounting date
    pub date: NaiveDate,
    /// Income or expense, must match the category's kind
    pub kind: MovementKind,
    /// Category of the movement
    pub category_id: i64,
    /// Positive amount, at least 0.01
    pub amount: Decimal,
    /// Human-readable description
    pub description: String,
    /// Originating payment for mirrored dues income
    #[sea_orm(unique)]
    pub payment_id: Option<i64>,
    /// When the movement was created
    pub created_at: DateTimeUtc,
    /// When the movement was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `CashboxMovement` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each movement belongs to one category
    #[sea_orm(
        belongs_to = "super::cashbox_category::Entity",
        from = "Column::CategoryId",
        to = "super::cashbox_category::Column::Id"
    )]
    Category,
    /// Mirrored movements belong to one payment
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id",
        on_delete = "Cascade"
    )]
    Payment,
}

impl Related<super::cashbox_category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
