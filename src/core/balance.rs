//! Member balance ledger.
//!
//! A member's balance is only ever changed through [`adjust_balance`], which
//! writes the new value and appends a [`balance_movement`] row in one
//! transaction. Consecutive movements chain: each `balance_before` equals the
//! previous `balance_after`.

use crate::{
    entities::{Balance, BalanceMovement, Member, balance, balance_movement},
    errors::{Error, Result},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{debug, warn};

/// Returns the member's balance row, creating a zero balance on first access.
///
/// # Errors
/// Returns `Error::MemberNotFound` if the member does not exist.
pub async fn get_or_create_balance<C>(db: &C, member_id: i64) -> Result<balance::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = Balance::find()
        .filter(balance::Column::MemberId.eq(member_id))
        .one(db)
        .await?
    {
        return Ok(existing);
    }

    Member::find_by_id(member_id)
        .one(db)
        .await?
        .ok_or(Error::MemberNotFound { id: member_id })?;

    debug!("Creating zero balance for member {}", member_id);
    balance::ActiveModel {
        member_id: Set(member_id),
        current: Set(Decimal::ZERO),
        updated_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Current balance of a member, zero if the member has never been adjusted.
pub async fn current_balance<C>(db: &C, member_id: i64) -> Result<Decimal>
where
    C: ConnectionTrait,
{
    Ok(get_or_create_balance(db, member_id).await?.current)
}

/// Applies `delta` to the member's balance and records the movement.
///
/// Works on a plain connection or inside an open transaction; in the latter
/// case the two writes run in a savepoint of the caller's transaction.
///
/// # Arguments
/// * `member_id` - Member whose balance changes
/// * `delta` - Signed change (positive credits the member)
/// * `description` - Reason shown in the movement history
/// * `payment_id` - Payment that caused the change, if any
///
/// # Errors
/// - `Error::InvalidAmount` for a zero delta
/// - `Error::MemberNotFound` if the member does not exist
pub async fn adjust_balance<C>(
    db: &C,
    member_id: i64,
    delta: Decimal,
    description: &str,
    payment_id: Option<i64>,
) -> Result<balance_movement::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    if delta.is_zero() {
        return Err(Error::InvalidAmount { amount: delta });
    }

    let txn = db.begin().await?;

    let balance = get_or_create_balance(&txn, member_id).await?;
    let balance_before = balance.current;
    let balance_after = balance_before + delta;
    let now = Utc::now();

    let mut active_balance: balance::ActiveModel = balance.into();
    active_balance.current = Set(balance_after);
    active_balance.updated_at = Set(now);
    active_balance.update(&txn).await?;

    let movement = balance_movement::ActiveModel {
        member_id: Set(member_id),
        delta: Set(delta),
        balance_before: Set(balance_before),
        balance_after: Set(balance_after),
        description: Set(description.to_string()),
        payment_id: Set(payment_id),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    debug!(
        "Member {} balance {} -> {} ({})",
        member_id, balance_before, balance_after, description
    );
    Ok(movement)
}

/// Lists a member's balance movements in the order they were applied.
pub async fn list_movements<C>(db: &C, member_id: i64) -> Result<Vec<balance_movement::Model>>
where
    C: ConnectionTrait,
{
    BalanceMovement::find()
        .filter(balance_movement::Column::MemberId.eq(member_id))
        .order_by_asc(balance_movement::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists the movements caused by one payment.
pub async fn movements_for_payment<C>(
    db: &C,
    payment_id: i64,
) -> Result<Vec<balance_movement::Model>>
where
    C: ConnectionTrait,
{
    BalanceMovement::find()
        .filter(balance_movement::Column::PaymentId.eq(payment_id))
        .order_by_asc(balance_movement::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Verifies the member's movement history against the stored balance.
///
/// Returns `false` when a movement's arithmetic is wrong, when a movement does
/// not start where the previous one ended, or when the last movement does not
/// match the current balance.
pub async fn check_movement_chain<C>(db: &C, member_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    let movements = list_movements(db, member_id).await?;
    let current = current_balance(db, member_id).await?;

    let mut expected_before = Decimal::ZERO;
    for movement in &movements {
        if movement.balance_before != expected_before
            || movement.balance_before + movement.delta != movement.balance_after
        {
            warn!(
                "Balance chain broken for member {} at movement {}",
                member_id, movement.id
            );
            return Ok(false);
        }
        expected_before = movement.balance_after;
    }

    Ok(expected_before == current)
}
