//! Settlement entity - How much of a multi-due payment went to one due.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Settlement database model, unique per `(payment_id, due_id)`
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "settlements")]
pub struct Model {
    /// Unique identifier for the settlement
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Payment this allocation belongs to
    pub payment_id: i64,
    /// Due receiving the allocation
    pub due_id: i64,
    /// Cash applied to the due by this payment
    pub amount_applied: Decimal,
    /// Credit balance applied to the due by this payment
    pub balance_applied: Decimal,
    /// What is still owed on the due after this application
    pub amount_remaining: Decimal,
    /// `amount_remaining <= 0`
    pub fully_paid: bool,
}

/// Defines relationships between Settlement and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each settlement belongs to one payment
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id",
        on_delete = "Cascade"
    )]
    Payment,
    /// Each settlement applies to one due
    #[sea_orm(
        belongs_to = "super::due::Entity",
        from = "Column::DueId",
        to = "super::due::Column::Id"
    )]
    Due,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl Related<super::due::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Due.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
