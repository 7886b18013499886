//! Member entity - A person registered with the club.
//!
//! Each member owns exactly one balance row and any number of payments.

use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Member database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "members")]
pub struct Model {
    /// Unique identifier for the member
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Postal address
    pub address: String,
    /// National identity document number, unique per member
    #[sea_orm(unique)]
    pub national_id: String,
    /// Optional member category
    pub category_id: Option<i64>,
    /// Contact email
    pub email: String,
    /// Contact phone number
    pub phone: String,
    /// Date of birth
    pub birth_date: NaiveDate,
    /// Date the member joined the club
    pub joined_on: NaiveDate,
    /// Whether the member administers the club ledger
    pub is_admin: bool,
}

impl Model {
    /// Returns "First Last", the form used in ledger descriptions.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Defines relationships between Member and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each member may belong to one category
    #[sea_orm(
        belongs_to = "super::member_category::Entity",
        from = "Column::CategoryId",
        to = "super::member_category::Column::Id"
    )]
    Category,
    /// One member has one balance row
    #[sea_orm(has_one = "super::balance::Entity")]
    Balance,
    /// One member has many payments
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::member_category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::balance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Balance.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
