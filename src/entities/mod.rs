//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod balance;
pub mod balance_movement;
pub mod cashbox_category;
pub mod cashbox_movement;
pub mod concept;
pub mod due;
pub mod member;
pub mod member_category;
pub mod payment;
pub mod settlement;

// Re-export specific types to avoid conflicts
pub use balance::{Column as BalanceColumn, Entity as Balance, Model as BalanceModel};
pub use balance_movement::{
    Column as BalanceMovementColumn, Entity as BalanceMovement, Model as BalanceMovementModel,
};
pub use cashbox_category::{
    Column as CashboxCategoryColumn, Entity as CashboxCategory, Model as CashboxCategoryModel,
    MovementKind,
};
pub use cashbox_movement::{
    Column as CashboxMovementColumn, Entity as CashboxMovement, Model as CashboxMovementModel,
};
pub use concept::{Column as ConceptColumn, Entity as Concept, Model as ConceptModel};
pub use due::{Column as DueColumn, Entity as Due, Model as DueModel};
pub use member::{Column as MemberColumn, Entity as Member, Model as MemberModel};
pub use member_category::{
    Column as MemberCategoryColumn, Entity as MemberCategory, Model as MemberCategoryModel,
};
pub use payment::{
    Column as PaymentColumn, Entity as Payment, Model as PaymentModel, PaymentMethod,
};
pub use settlement::{Column as SettlementColumn, Entity as Settlement, Model as SettlementModel};
