//! Due entity - One billing period (month/year) of a concept.
//!
//! `(month, year, concept_id)` is unique. The `code` column is the derived
//! `MMYY` period code and `amount` mirrors the concept's suggested amount
//! at the time the due was last saved.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Due database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dues")]
pub struct Model {
    /// Unique identifier for the due
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Month of the period, 1-12
    pub month: i32,
    /// Four-digit year of the period
    pub year: i32,
    /// Derived `MMYY` period code
    pub code: String,
    /// Concept this due charges for
    pub concept_id: i64,
    /// Amount owed for this period
    pub amount: Decimal,
    /// Inactive dues are hidden from the available-dues listing
    pub active: bool,
}

impl Model {
    /// `MM/YYYY` label used in descriptions.
    #[must_use]
    pub fn period_label(&self) -> String {
        format!("{:02}/{}", self.month, self.year)
    }
}

/// Defines relationships between Due and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each due belongs to one concept
    #[sea_orm(
        belongs_to = "super::concept::Entity",
        from = "Column::ConceptId",
        to = "super::concept::Column::Id"
    )]
    Concept,
    /// One due has many settlements
    #[sea_orm(has_many = "super::settlement::Entity")]
    Settlements,
}

impl Related<super::concept::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Concept.def()
    }
}

impl Related<super::settlement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Settlements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
