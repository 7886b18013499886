//! Balance movement entity - Append-only audit row for one balance change.
//!
//! `payment_id` is a plain reference without a foreign key so the history
//! survives the deletion of the payment that caused it.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Balance movement database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "balance_movements")]
pub struct Model {
    /// Unique identifier, also the chain order for a member
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Member whose balance changed
    pub member_id: i64,
    /// Signed change applied
    pub delta: Decimal,
    /// Balance immediately before the change
    pub balance_before: Decimal,
    /// Balance immediately after the change
    pub balance_after: Decimal,
    /// Human-readable reason
    pub description: String,
    /// Payment that triggered the change, if any
    pub payment_id: Option<i64>,
    /// When the movement was recorded
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `BalanceMovement` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each movement belongs to one member
    #[sea_orm(
        belongs_to = "super::member::Entity",
        from = "Column::MemberId",
        to = "super::member::Column::Id"
    )]
    Member,
}

impl Related<super::member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Member.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
