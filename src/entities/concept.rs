//! Concept entity - A named type of charge (e.g. "Monthly Dues") with a suggested amount.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Concept database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "concepts")]
pub struct Model {
    /// Unique identifier for the concept
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Concept name, unique across the catalog
    #[sea_orm(unique)]
    pub name: String,
    /// Optional free-text description
    pub description: Option<String>,
    /// Amount copied into every due of this concept when the due is saved
    pub suggested_amount: Decimal,
    /// Inactive concepts are skipped by yearly dues generation
    pub active: bool,
}

/// Defines relationships between Concept and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One concept has many dues
    #[sea_orm(has_many = "super::due::Entity")]
    Dues,
}

impl Related<super::due::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Dues.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
