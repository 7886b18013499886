//! Member business logic - registering members and member categories.
//!
//! Every member gets its balance row in the same transaction that inserts the
//! member, so the balance ledger never has to guess whether a member exists.

use crate::{
    entities::{Member, MemberCategory, balance, member, member_category},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::info;

/// Arguments for registering a new member.
#[derive(Debug, Clone)]
pub struct NewMember {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Postal address
    pub address: String,
    /// National identity document number
    pub national_id: String,
    /// Optional member category
    pub category_id: Option<i64>,
    /// Contact email
    pub email: String,
    /// Contact phone
    pub phone: String,
    /// Date of birth
    pub birth_date: NaiveDate,
    /// Whether the member administers the ledger
    pub is_admin: bool,
}

/// Registers a member and creates its zero balance atomically.
///
/// # Errors
/// - `Error::Validation` if a name or the national id is blank
/// - `Error::DuplicateName` if the national id is already registered
/// - `Error::Database` if the insert fails
pub async fn create_member(db: &DatabaseConnection, args: NewMember) -> Result<member::Model> {
    for (field, value) in [
        ("first name", &args.first_name),
        ("last name", &args.last_name),
        ("national id", &args.national_id),
    ] {
        if value.trim().is_empty() {
            return Err(Error::Validation {
                message: format!("Member {field} cannot be empty"),
            });
        }
    }

    let national_id = args.national_id.trim().to_string();
    let txn = db.begin().await?;

    let existing = Member::find()
        .filter(member::Column::NationalId.eq(national_id.as_str()))
        .one(&txn)
        .await?;
    if existing.is_some() {
        return Err(Error::DuplicateName {
            entity: "Member",
            name: national_id,
        });
    }

    let now = Utc::now();
    let member = member::ActiveModel {
        first_name: Set(args.first_name.trim().to_string()),
        last_name: Set(args.last_name.trim().to_string()),
        address: Set(args.address),
        national_id: Set(national_id),
        category_id: Set(args.category_id),
        email: Set(args.email),
        phone: Set(args.phone),
        birth_date: Set(args.birth_date),
        joined_on: Set(now.date_naive()),
        is_admin: Set(args.is_admin),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    balance::ActiveModel {
        member_id: Set(member.id),
        current: Set(Decimal::ZERO),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!("Registered member {} ({})", member.full_name(), member.id);
    Ok(member)
}

/// Finds a member by id.
pub async fn get_member_by_id<C>(db: &C, member_id: i64) -> Result<Option<member::Model>>
where
    C: ConnectionTrait,
{
    Member::find_by_id(member_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists all members ordered by last name, then first name.
pub async fn list_members(db: &DatabaseConnection) -> Result<Vec<member::Model>> {
    Member::find()
        .order_by_asc(member::Column::LastName)
        .order_by_asc(member::Column::FirstName)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Creates a member category with a unique name.
pub async fn create_member_category(
    db: &DatabaseConnection,
    name: &str,
    description: Option<String>,
) -> Result<member_category::Model> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation {
            message: "Member category name cannot be empty".to_string(),
        });
    }

    let existing = MemberCategory::find()
        .filter(member_category::Column::Name.eq(name))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(Error::DuplicateName {
            entity: "Member category",
            name: name.to_string(),
        });
    }

    member_category::ActiveModel {
        name: Set(name.to_string()),
        description: Set(description),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}
