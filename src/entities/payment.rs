//! Payment entity - One settlement event for one member.
//!
//! A single-due payment points at its due through `due_id`; a multi-due
//! payment (`is_multi`) reaches its dues through settlement rows.
//! `amount` is the gross value applied to dues: cash tendered plus balance
//! drawn, minus any surplus credited back to the member.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How the member paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentMethod {
    /// Cash at the club
    #[sea_orm(string_value = "cash")]
    Cash,
    /// Bank transfer
    #[sea_orm(string_value = "transfer")]
    Transfer,
    /// Debit or credit card
    #[sea_orm(string_value = "card")]
    Card,
    /// Anything else
    #[sea_orm(string_value = "other")]
    Other,
}

/// Payment database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    /// Unique identifier for the payment
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Member who paid
    pub member_id: i64,
    /// Due paid directly, set only for single-due payments
    pub due_id: Option<i64>,
    /// Whether the dues are reached through settlement rows
    pub is_multi: bool,
    /// Gross value applied to dues (cash + balance used - surplus)
    pub amount: Decimal,
    /// Cash tendered by the member
    pub cash_amount: Decimal,
    /// Portion of the member's credit balance drawn down
    pub balance_used: Decimal,
    /// Amount left over and credited back to the member's balance
    pub surplus_credited: Decimal,
    /// Payment method
    pub method: PaymentMethod,
    /// Date the payment was received
    pub paid_on: NaiveDate,
    /// Optional external reference (receipt or transfer number)
    pub reference: Option<String>,
    /// Optional free-text comments
    pub comments: Option<String>,
    /// When the payment row was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Payment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each payment belongs to one member
    #[sea_orm(
        belongs_to = "super::member::Entity",
        from = "Column::MemberId",
        to = "super::member::Column::Id"
    )]
    Member,
    /// Single-due payments reference their due directly
    #[sea_orm(
        belongs_to = "super::due::Entity",
        from = "Column::DueId",
        to = "super::due::Column::Id"
    )]
    Due,
    /// Multi-due payments have many settlements
    #[sea_orm(has_many = "super::settlement::Entity")]
    Settlements,
    /// At most one mirrored cashbox movement
    #[sea_orm(has_one = "super::cashbox_movement::Entity")]
    CashboxMovement,
}

impl Related<super::member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Member.def()
    }
}

impl Related<super::due::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Due.def()
    }
}

impl Related<super::settlement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Settlements.def()
    }
}

impl Related<super::cashbox_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CashboxMovement.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
