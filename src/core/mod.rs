//! Core business logic - framework-agnostic dues, balance, settlement and cashbox operations.

/// Administrator-or-self authorization predicate
pub mod access;
/// Member ledger: balances and their append-only movement history
pub mod balance;
/// Cashbox categories, movements, payment mirroring and period summaries
pub mod cashbox;
/// Dues catalog: concepts, dues and outstanding amounts
pub mod dues;
/// Member and member category registry
pub mod members;
/// Payment settlement engine
pub mod settlement;
