//! Payment settlement engine.
//!
//! [`SettlementEngine::settle`] turns a [`PaymentIntent`] into a persisted
//! payment: it allocates the tendered cash across the selected dues (oldest
//! period first), draws on the member's credit balance when asked, credits any
//! overpayment back to the balance, and notifies the [`PaymentObserver`]
//! before committing. Every write of one settlement happens in a single
//! database transaction, and every write for a member is serialized through
//! that member's lock so balance movements chain correctly.

use crate::{
    config::club::CashboxConfig,
    core::{
        balance,
        cashbox::{CashboxMirror, PaymentContext, PaymentObserver},
        dues,
    },
    entities::{
        Concept, Due, Member, Payment, PaymentMethod, Settlement, balance_movement, due, payment,
        settlement,
    },
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, SqlErr, TransactionTrait, prelude::*};
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

/// What the caller wants to pay.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    /// Paying member
    pub member_id: i64,
    /// Dues to settle; duplicates are ignored
    pub due_ids: Vec<i64>,
    /// Cash tendered, never negative
    pub tendered: Decimal,
    /// Whether the member's credit balance may cover what cash does not
    pub use_balance: bool,
    /// Payment method
    pub method: PaymentMethod,
    /// Date the payment was received
    pub paid_on: NaiveDate,
    /// Optional external reference
    pub reference: Option<String>,
    /// Optional comments
    pub comments: Option<String>,
}

/// Editable payment metadata. Amounts cannot change; delete and settle again instead.
#[derive(Debug, Clone, Default)]
pub struct PaymentUpdate {
    /// New method
    pub method: Option<PaymentMethod>,
    /// New payment date
    pub paid_on: Option<NaiveDate>,
    /// New reference (`Some(None)` clears it)
    pub reference: Option<Option<String>>,
    /// New comments (`Some(None)` clears them)
    pub comments: Option<Option<String>>,
}

/// Non-blocking observations made while settling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementWarning {
    /// More funds than owed; the excess was credited to the member
    Surplus {
        /// Amount credited back
        amount: Decimal,
    },
    /// Fewer funds than owed; the dues stay partially open
    Shortfall {
        /// Amount still owed
        amount: Decimal,
    },
    /// The due's amount no longer matches its concept
    StaleDueAmount {
        /// Affected due
        due_id: i64,
        /// Amount stored on the due
        due_amount: Decimal,
        /// Concept's current suggested amount
        concept_amount: Decimal,
    },
}

/// Outstanding amount of one selected due, input to [`plan_settlement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueCharge {
    /// Due identifier
    pub due_id: i64,
    /// Full amount of the due
    pub due_amount: Decimal,
    /// What the member already paid toward it
    pub already_paid: Decimal,
}

impl DueCharge {
    /// What is still owed.
    #[must_use]
    pub fn outstanding(&self) -> Decimal {
        (self.due_amount - self.already_paid).max(Decimal::ZERO)
    }
}

/// Cash and balance applied to one due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Due identifier
    pub due_id: i64,
    /// Cash applied
    pub applied: Decimal,
    /// Credit balance applied after cash
    pub balance_applied: Decimal,
    /// Still owed after this application
    pub remaining: Decimal,
    /// `remaining <= 0`
    pub fully_paid: bool,
}

/// The arithmetic of one settlement, computed before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    /// Sum of the outstanding amounts of the selected dues
    pub total_due: Decimal,
    /// Credit balance drawn down
    pub balance_used: Decimal,
    /// Funds beyond what was owed, credited to the member
    pub surplus: Decimal,
    /// Amount still owed after this payment
    pub shortfall: Decimal,
    /// Gross value recorded on the payment
    pub gross_amount: Decimal,
    /// Per-due allocation, in charge order
    pub allocations: Vec<Allocation>,
}

/// Computes how a payment settles the given charges.
///
/// `charges` must already be in allocation order. Cash is spread first, then
/// the drawn balance, both oldest due first and capped at what each due still
/// owes. Balance is drawn only for the part of the dues that cash does not
/// cover, and only when `use_balance` is set and the balance is a credit.
///
/// # Errors
/// - `Error::InvalidAmount` for a negative tendered amount
/// - `Error::InvalidPayment` when no funds are available
pub fn plan_settlement(
    tendered: Decimal,
    use_balance: bool,
    current_balance: Decimal,
    charges: &[DueCharge],
) -> Result<SettlementPlan> {
    if tendered < Decimal::ZERO {
        return Err(Error::InvalidAmount { amount: tendered });
    }

    let available_balance = if use_balance {
        current_balance.max(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };
    let total_available = tendered + available_balance;

    if total_available < Decimal::ZERO {
        return Err(Error::InvalidPayment {
            reason: "total available funds are negative".to_string(),
        });
    }
    if tendered <= Decimal::ZERO && !use_balance {
        return Err(Error::InvalidPayment {
            reason: "amount must be positive when the balance is not used".to_string(),
        });
    }
    if total_available <= Decimal::ZERO {
        return Err(Error::InvalidPayment {
            reason: "no funds available: nothing tendered and no credit balance".to_string(),
        });
    }

    let total_due: Decimal = charges.iter().map(DueCharge::outstanding).sum();
    let balance_used = available_balance.min((total_due - tendered).max(Decimal::ZERO));
    let applied_total = tendered + balance_used;
    let surplus = (applied_total - total_due).max(Decimal::ZERO);
    let shortfall = (total_due - applied_total).max(Decimal::ZERO);

    let mut cash_left = tendered;
    let mut balance_left = balance_used;
    let allocations = charges
        .iter()
        .map(|charge| {
            let outstanding = charge.outstanding();
            let applied = cash_left.min(outstanding);
            cash_left -= applied;
            let balance_applied = balance_left.min(outstanding - applied);
            balance_left -= balance_applied;
            let remaining =
                charge.due_amount - (charge.already_paid + applied + balance_applied);
            Allocation {
                due_id: charge.due_id,
                applied,
                balance_applied,
                remaining,
                fully_paid: remaining <= Decimal::ZERO,
            }
        })
        .collect();

    Ok(SettlementPlan {
        total_due,
        balance_used,
        surplus,
        shortfall,
        gross_amount: applied_total - surplus,
        allocations,
    })
}

/// Result of [`SettlementEngine::settle`].
#[derive(Debug, Clone)]
pub struct SettledPayment {
    /// The persisted payment
    pub payment: payment::Model,
    /// Settlement rows (empty for single-due payments)
    pub settlements: Vec<settlement::Model>,
    /// Allocation per due, for both payment shapes
    pub allocations: Vec<Allocation>,
    /// Credit balance drawn down
    pub balance_used: Decimal,
    /// Excess credited to the member
    pub surplus: Decimal,
    /// Amount still owed
    pub shortfall: Decimal,
    /// Non-blocking observations
    pub warnings: Vec<SettlementWarning>,
}

/// One async mutex per member id.
#[derive(Debug, Default)]
pub struct MemberLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl MemberLocks {
    /// Returns the lock guarding `member_id`'s ledger writes.
    ///
    /// # Errors
    /// Returns `Error::LockPoisoned` if the lock table is poisoned.
    pub fn handle(&self, member_id: i64) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(member_id).or_default()))
    }
}

/// Settles payments against dues and keeps the balance and cashbox ledgers in step.
#[derive(Debug)]
pub struct SettlementEngine<O = CashboxMirror> {
    db: DatabaseConnection,
    observer: O,
    locks: MemberLocks,
}

impl SettlementEngine<CashboxMirror> {
    /// Engine mirroring payments into the cashbox category named in `config`.
    #[must_use]
    pub fn with_cashbox(db: DatabaseConnection, config: &CashboxConfig) -> Self {
        Self::new(db, CashboxMirror::from_config(config))
    }
}

impl<O: PaymentObserver> SettlementEngine<O> {
    /// Creates an engine notifying `observer` of payment lifecycle events.
    #[must_use]
    pub fn new(db: DatabaseConnection, observer: O) -> Self {
        Self {
            db,
            observer,
            locks: MemberLocks::default(),
        }
    }

    /// Underlying database connection.
    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Dues the member has not fully paid, oldest period first.
    pub async fn get_available_dues(&self, member_id: i64) -> Result<Vec<due::Model>> {
        dues::get_available_dues(&self.db, member_id).await
    }

    /// Adjusts a member's balance outside of any payment.
    #[instrument(skip(self))]
    pub async fn adjust_balance(
        &self,
        member_id: i64,
        delta: Decimal,
        description: &str,
    ) -> Result<balance_movement::Model> {
        let lock = self.locks.handle(member_id)?;
        let _guard = lock.lock().await;
        balance::adjust_balance(&self.db, member_id, delta, description, None).await
    }

    /// Settles a payment intent.
    ///
    /// Validation errors are returned before anything is written. Once writes
    /// start, the payment, its settlements, the balance adjustments and the
    /// observer's writes commit together or not at all.
    ///
    /// # Errors
    /// - `Error::InvalidAmount` / `Error::InvalidPayment` for unusable amounts
    /// - `Error::MemberNotFound` / `Error::DueNotFound` for unknown references
    /// - `Error::DueAlreadySettled` if a selected due has nothing outstanding
    /// - any error raised by the observer
    #[instrument(skip(self))]
    pub async fn settle(&self, intent: PaymentIntent) -> Result<SettledPayment> {
        if intent.tendered < Decimal::ZERO {
            return Err(Error::InvalidAmount {
                amount: intent.tendered,
            });
        }
        let due_ids: BTreeSet<i64> = intent.due_ids.iter().copied().collect();
        if due_ids.is_empty() {
            return Err(Error::InvalidPayment {
                reason: "no dues selected".to_string(),
            });
        }

        let lock = self.locks.handle(intent.member_id)?;
        let _guard = lock.lock().await;
        let txn = self.db.begin().await?;

        let member = Member::find_by_id(intent.member_id)
            .one(&txn)
            .await?
            .ok_or(Error::MemberNotFound {
                id: intent.member_id,
            })?;

        let mut selected = Vec::with_capacity(due_ids.len());
        for due_id in &due_ids {
            let due = Due::find_by_id(*due_id)
                .one(&txn)
                .await?
                .ok_or(Error::DueNotFound { id: *due_id })?;
            if !due.active {
                return Err(Error::InvalidPayment {
                    reason: format!("due {} ({}) is inactive", due.id, due.code),
                });
            }
            selected.push(due);
        }
        selected.sort_by_key(|d| (d.year, d.month, d.concept_id, d.id));

        let paid = dues::paid_amounts(&txn, member.id).await?;
        let mut charges = Vec::with_capacity(selected.len());
        for due in &selected {
            let charge = DueCharge {
                due_id: due.id,
                due_amount: due.amount,
                already_paid: paid.get(&due.id).copied().unwrap_or(Decimal::ZERO),
            };
            if charge.outstanding() <= Decimal::ZERO {
                return Err(Error::DueAlreadySettled { due_id: due.id });
            }
            charges.push(charge);
        }

        let current = balance::current_balance(&txn, member.id).await?;
        let plan = plan_settlement(intent.tendered, intent.use_balance, current, &charges)?;
        let mut warnings = stale_due_warnings(&txn, &selected).await?;

        let is_multi = selected.len() > 1;
        let payment = payment::ActiveModel {
            member_id: Set(member.id),
            due_id: Set(if is_multi {
                None
            } else {
                selected.first().map(|d| d.id)
            }),
            is_multi: Set(is_multi),
            amount: Set(plan.gross_amount),
            cash_amount: Set(intent.tendered),
            balance_used: Set(plan.balance_used),
            surplus_credited: Set(plan.surplus),
            method: Set(intent.method),
            paid_on: Set(intent.paid_on),
            reference: Set(intent.reference),
            comments: Set(intent.comments),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut settlements = Vec::new();
        if is_multi {
            for allocation in &plan.allocations {
                settlements.push(insert_settlement(&txn, payment.id, allocation).await?);
            }
        }

        if plan.surplus > Decimal::ZERO {
            balance::adjust_balance(
                &txn,
                member.id,
                plan.surplus,
                &format!("Overpayment on payment #{}", payment.id),
                Some(payment.id),
            )
            .await?;
            warnings.push(SettlementWarning::Surplus {
                amount: plan.surplus,
            });
        }
        if plan.balance_used > Decimal::ZERO {
            balance::adjust_balance(
                &txn,
                member.id,
                -plan.balance_used,
                &format!("Balance applied to payment #{}", payment.id),
                Some(payment.id),
            )
            .await?;
        }
        if plan.shortfall > Decimal::ZERO {
            warnings.push(SettlementWarning::Shortfall {
                amount: plan.shortfall,
            });
        }

        let context = PaymentContext {
            payment,
            member,
            dues: selected,
        };
        self.observer.on_payment_created(&txn, &context).await?;
        txn.commit().await?;

        info!(
            "Settled payment #{} for member {}: amount {}, cash {}, balance used {}, surplus {}, shortfall {}",
            context.payment.id,
            context.member.id,
            plan.gross_amount,
            intent.tendered,
            plan.balance_used,
            plan.surplus,
            plan.shortfall
        );

        Ok(SettledPayment {
            payment: context.payment,
            settlements,
            allocations: plan.allocations,
            balance_used: plan.balance_used,
            surplus: plan.surplus,
            shortfall: plan.shortfall,
            warnings,
        })
    }

    /// Deletes a payment and reverses everything it caused.
    ///
    /// The observer removes its mirrored entry, settlement rows are deleted,
    /// and one compensating balance movement undoes the payment's net effect on
    /// the member balance. Earlier movements are kept as history.
    #[instrument(skip(self))]
    pub async fn delete_payment(&self, payment_id: i64) -> Result<()> {
        let member_id = Payment::find_by_id(payment_id)
            .one(&self.db)
            .await?
            .ok_or(Error::PaymentNotFound { id: payment_id })?
            .member_id;

        let lock = self.locks.handle(member_id)?;
        let _guard = lock.lock().await;
        let txn = self.db.begin().await?;

        let payment = Payment::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or(Error::PaymentNotFound { id: payment_id })?;

        self.observer.on_payment_deleted(&txn, &payment).await?;

        Settlement::delete_many()
            .filter(settlement::Column::PaymentId.eq(payment.id))
            .exec(&txn)
            .await?;

        let net: Decimal = balance::movements_for_payment(&txn, payment.id)
            .await?
            .iter()
            .map(|m| m.delta)
            .sum();
        if !net.is_zero() {
            balance::adjust_balance(
                &txn,
                payment.member_id,
                -net,
                &format!("Reversal of payment #{}", payment.id),
                Some(payment.id),
            )
            .await?;
        }

        payment.delete(&txn).await?;
        txn.commit().await?;

        info!("Deleted payment #{} of member {}", payment_id, member_id);
        Ok(())
    }

    /// Changes a payment's method, date, reference or comments.
    #[instrument(skip(self))]
    pub async fn update_payment(
        &self,
        payment_id: i64,
        changes: PaymentUpdate,
    ) -> Result<payment::Model> {
        let member_id = Payment::find_by_id(payment_id)
            .one(&self.db)
            .await?
            .ok_or(Error::PaymentNotFound { id: payment_id })?
            .member_id;

        let lock = self.locks.handle(member_id)?;
        let _guard = lock.lock().await;
        let txn = self.db.begin().await?;

        let payment = Payment::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or(Error::PaymentNotFound { id: payment_id })?;

        let mut active: payment::ActiveModel = payment.into();
        if let Some(method) = changes.method {
            active.method = Set(method);
        }
        if let Some(paid_on) = changes.paid_on {
            active.paid_on = Set(paid_on);
        }
        if let Some(reference) = changes.reference {
            active.reference = Set(reference);
        }
        if let Some(comments) = changes.comments {
            active.comments = Set(comments);
        }
        let updated = active.update(&txn).await?;

        self.observer.on_payment_updated(&txn, &updated).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Settlement rows of a payment.
    pub async fn settlements_for_payment(
        &self,
        payment_id: i64,
    ) -> Result<Vec<settlement::Model>> {
        Settlement::find()
            .filter(settlement::Column::PaymentId.eq(payment_id))
            .order_by_asc(settlement::Column::Id)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Payments of a member, newest first.
    pub async fn payments_for_member(&self, member_id: i64) -> Result<Vec<payment::Model>> {
        Payment::find()
            .filter(payment::Column::MemberId.eq(member_id))
            .order_by_desc(payment::Column::PaidOn)
            .order_by_desc(payment::Column::Id)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }
}

async fn insert_settlement<C>(
    db: &C,
    payment_id: i64,
    allocation: &Allocation,
) -> Result<settlement::Model>
where
    C: ConnectionTrait,
{
    settlement::ActiveModel {
        payment_id: Set(payment_id),
        due_id: Set(allocation.due_id),
        amount_applied: Set(allocation.applied),
        balance_applied: Set(allocation.balance_applied),
        amount_remaining: Set(allocation.remaining),
        fully_paid: Set(allocation.fully_paid),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => Error::DuplicateSettlement {
            payment_id,
            due_id: allocation.due_id,
        },
        _ => e.into(),
    })
}

async fn stale_due_warnings<C>(db: &C, selected: &[due::Model]) -> Result<Vec<SettlementWarning>>
where
    C: ConnectionTrait,
{
    let mut warnings = Vec::new();
    for due in selected {
        let Some(concept) = Concept::find_by_id(due.concept_id).one(db).await? else {
            continue;
        };
        if concept.suggested_amount != due.amount {
            warn!(
                "Due {} amount {} differs from concept '{}' amount {}",
                due.id, due.amount, concept.name, concept.suggested_amount
            );
            warnings.push(SettlementWarning::StaleDueAmount {
                due_id: due.id,
                due_amount: due.amount,
                concept_amount: concept.suggested_amount,
            });
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::{
        cashbox::{self, MovementFilter},
        dues::{ConceptUpdate, create_due, get_available_dues, paid_amount, update_concept},
    };
    use crate::entities::{BalanceMovement, MovementKind};
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase, PaginatorTrait};

    fn charge(due_id: i64, due_amount: i64, already_paid: i64) -> DueCharge {
        DueCharge {
            due_id,
            due_amount: Decimal::from(due_amount),
            already_paid: Decimal::from(already_paid),
        }
    }

    struct FailingObserver;

    impl PaymentObserver for FailingObserver {
        async fn on_payment_created<C>(&self, _db: &C, _context: &PaymentContext) -> Result<()>
        where
            C: ConnectionTrait,
        {
            Err(Error::Validation {
                message: "observer refused".to_string(),
            })
        }

        async fn on_payment_deleted<C>(&self, _db: &C, _payment: &payment::Model) -> Result<()>
        where
            C: ConnectionTrait,
        {
            Ok(())
        }
    }

    #[test]
    fn test_plan_draws_balance_only_for_uncovered_part() {
        let plan = plan_settlement(
            Decimal::from(3000),
            true,
            Decimal::from(8000),
            &[charge(1, 5000, 0)],
        )
        .unwrap();
        assert_eq!(plan.total_due, Decimal::from(5000));
        assert_eq!(plan.balance_used, Decimal::from(2000));
        assert_eq!(plan.surplus, Decimal::ZERO);
        assert_eq!(plan.shortfall, Decimal::ZERO);
        assert_eq!(plan.gross_amount, Decimal::from(5000));
    }

    #[test]
    fn test_plan_ignores_debit_balance() {
        let plan = plan_settlement(
            Decimal::from(1000),
            true,
            Decimal::from(-4000),
            &[charge(1, 5000, 0)],
        )
        .unwrap();
        assert_eq!(plan.balance_used, Decimal::ZERO);
        assert_eq!(plan.shortfall, Decimal::from(4000));
        assert_eq!(plan.gross_amount, Decimal::from(1000));
    }

    #[test]
    fn test_plan_allocates_cash_oldest_first() {
        let charges = [charge(1, 3000, 0), charge(2, 3000, 1000), charge(3, 3000, 0)];
        let plan = plan_settlement(Decimal::from(4500), false, Decimal::ZERO, &charges).unwrap();

        let applied: Vec<Decimal> = plan.allocations.iter().map(|a| a.applied).collect();
        assert_eq!(
            applied,
            vec![Decimal::from(3000), Decimal::from(1500), Decimal::ZERO]
        );
        let remaining: Vec<Decimal> = plan.allocations.iter().map(|a| a.remaining).collect();
        assert_eq!(
            remaining,
            vec![Decimal::ZERO, Decimal::from(500), Decimal::from(3000)]
        );
        assert!(plan.allocations[0].fully_paid);
        assert!(!plan.allocations[1].fully_paid);
        assert_eq!(plan.total_due, Decimal::from(8000));
        assert_eq!(plan.shortfall, Decimal::from(3500));

        let total_applied: Decimal = applied.iter().copied().sum();
        assert!(total_applied <= Decimal::from(4500));
    }

    #[test]
    fn test_plan_rejects_missing_funds() {
        let charges = [charge(1, 5000, 0)];

        let negative = plan_settlement(Decimal::from(-1), false, Decimal::ZERO, &charges);
        assert!(matches!(negative, Err(Error::InvalidAmount { .. })));

        let nothing = plan_settlement(Decimal::ZERO, false, Decimal::from(9000), &charges);
        assert!(matches!(nothing, Err(Error::InvalidPayment { .. })));

        let empty_balance = plan_settlement(Decimal::ZERO, true, Decimal::ZERO, &charges);
        assert!(matches!(empty_balance, Err(Error::InvalidPayment { .. })));

        let balance_only =
            plan_settlement(Decimal::ZERO, true, Decimal::from(9000), &charges).unwrap();
        assert_eq!(balance_only.balance_used, Decimal::from(5000));
        assert_eq!(balance_only.gross_amount, Decimal::from(5000));
    }

    #[tokio::test]
    async fn test_settle_validates_before_touching_the_database() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let engine = test_engine(&db);

        let negative = engine.settle(payment_intent(1, vec![1], -100)).await;
        assert!(matches!(negative, Err(Error::InvalidAmount { .. })));

        let no_dues = engine.settle(payment_intent(1, vec![], 100)).await;
        assert!(matches!(no_dues, Err(Error::InvalidPayment { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_exact_payment_of_single_due() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);

        let settled = engine
            .settle(payment_intent(member.id, vec![due.id], 5000))
            .await?;

        assert_eq!(settled.payment.amount, Decimal::from(5000));
        assert_eq!(settled.payment.due_id, Some(due.id));
        assert!(!settled.payment.is_multi);
        assert!(settled.settlements.is_empty());
        assert!(settled.warnings.is_empty());
        assert_eq!(balance::current_balance(&db, member.id).await?, Decimal::ZERO);
        assert!(balance::list_movements(&db, member.id).await?.is_empty());

        let movement = cashbox::get_movement_for_payment(&db, settled.payment.id)
            .await?
            .unwrap();
        assert_eq!(movement.kind, MovementKind::Income);
        assert_eq!(movement.amount, Decimal::from(5000));
        assert!(get_available_dues(&db, member.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_balance_covers_what_cash_does_not() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);
        engine
            .adjust_balance(member.id, Decimal::from(2000), "Opening credit")
            .await?;

        let mut intent = payment_intent(member.id, vec![due.id], 3000);
        intent.use_balance = true;
        let settled = engine.settle(intent).await?;

        assert_eq!(settled.balance_used, Decimal::from(2000));
        assert_eq!(settled.payment.amount, Decimal::from(5000));
        assert_eq!(settled.payment.cash_amount, Decimal::from(3000));
        assert_eq!(balance::current_balance(&db, member.id).await?, Decimal::ZERO);

        let movements = balance::movements_for_payment(&db, settled.payment.id).await?;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].delta, Decimal::from(-2000));
        assert_eq!(
            movements[0].description,
            format!("Balance applied to payment #{}", settled.payment.id)
        );

        let mirrored = cashbox::get_movement_for_payment(&db, settled.payment.id)
            .await?
            .unwrap();
        assert_eq!(mirrored.amount, Decimal::from(5000));
        assert!(balance::check_movement_chain(&db, member.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_overpayment_is_credited_once() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);

        let settled = engine
            .settle(payment_intent(member.id, vec![due.id], 6000))
            .await?;

        assert_eq!(settled.surplus, Decimal::from(1000));
        assert_eq!(settled.payment.amount, Decimal::from(5000));
        assert_eq!(settled.payment.surplus_credited, Decimal::from(1000));
        assert!(settled.warnings.contains(&SettlementWarning::Surplus {
            amount: Decimal::from(1000)
        }));

        let movements = balance::movements_for_payment(&db, settled.payment.id).await?;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].delta, Decimal::from(1000));
        assert_eq!(
            balance::current_balance(&db, member.id).await?,
            Decimal::from(1000)
        );

        let mirrored = cashbox::get_movement_for_payment(&db, settled.payment.id)
            .await?
            .unwrap();
        assert_eq!(mirrored.amount, Decimal::from(5000));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_payment_removes_cashbox_income() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);
        let settled = engine
            .settle(payment_intent(member.id, vec![due.id], 5000))
            .await?;
        let paid_on = settled.payment.paid_on;

        engine.delete_payment(settled.payment.id).await?;

        assert!(
            cashbox::get_movement_for_payment(&db, settled.payment.id)
                .await?
                .is_none()
        );
        let summary = cashbox::period_summary(&db, paid_on, paid_on, Decimal::ZERO).await?;
        assert_eq!(summary.income, Decimal::ZERO);
        assert_eq!(get_available_dues(&db, member.id).await?, vec![due]);

        let missing = engine.delete_payment(settled.payment.id).await;
        assert!(matches!(missing, Err(Error::PaymentNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_tender_boundary() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);

        let cash_only = engine
            .settle(payment_intent(member.id, vec![due.id], 0))
            .await;
        assert!(matches!(cash_only, Err(Error::InvalidPayment { .. })));

        let mut intent = payment_intent(member.id, vec![due.id], 0);
        intent.use_balance = true;
        let empty_balance = engine.settle(intent.clone()).await;
        assert!(matches!(empty_balance, Err(Error::InvalidPayment { .. })));

        engine
            .adjust_balance(member.id, Decimal::from(7000), "Prepaid")
            .await?;
        let settled = engine.settle(intent).await?;
        assert_eq!(settled.balance_used, Decimal::from(5000));
        assert_eq!(settled.payment.amount, Decimal::from(5000));
        assert_eq!(
            balance::current_balance(&db, member.id).await?,
            Decimal::from(2000)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_multi_due_payment_allocates_oldest_first() -> Result<()> {
        let db = setup_test_db().await?;
        let member = create_test_member(&db, "Test", "Member").await?;
        let concept = create_test_concept(&db, "Monthly Dues", 3000).await?;
        let march = create_due(&db, concept.id, 3, 2026).await?;
        let january = create_due(&db, concept.id, 1, 2026).await?;
        let february = create_due(&db, concept.id, 2, 2026).await?;
        let engine = test_engine(&db);

        let settled = engine
            .settle(payment_intent(
                member.id,
                vec![march.id, january.id, february.id, january.id],
                7000,
            ))
            .await?;

        assert!(settled.payment.is_multi);
        assert_eq!(settled.payment.due_id, None);
        assert_eq!(settled.shortfall, Decimal::from(2000));
        assert!(settled.warnings.contains(&SettlementWarning::Shortfall {
            amount: Decimal::from(2000)
        }));

        let order: Vec<i64> = settled.settlements.iter().map(|s| s.due_id).collect();
        assert_eq!(order, vec![january.id, february.id, march.id]);
        let applied: Decimal = settled.settlements.iter().map(|s| s.amount_applied).sum();
        assert!(applied <= settled.payment.cash_amount);
        assert!(settled.settlements[0].fully_paid);
        assert!(settled.settlements[1].fully_paid);
        assert!(!settled.settlements[2].fully_paid);
        assert_eq!(settled.settlements[2].amount_remaining, Decimal::from(2000));

        assert_eq!(
            get_available_dues(&db, member.id).await?,
            vec![march.clone()]
        );
        assert_eq!(
            paid_amount(&db, member.id, march.id).await?,
            Decimal::from(1000)
        );

        let again = engine
            .settle(payment_intent(member.id, vec![january.id], 100))
            .await;
        assert!(matches!(again, Err(Error::DueAlreadySettled { .. })));

        let rest = engine
            .settle(payment_intent(member.id, vec![march.id], 2000))
            .await?;
        assert_eq!(rest.payment.amount, Decimal::from(2000));
        assert!(engine.get_available_dues(member.id).await?.is_empty());
        assert_eq!(engine.payments_for_member(member.id).await?.len(), 2);
        assert_eq!(
            engine
                .settlements_for_payment(settled.payment.id)
                .await?
                .len(),
            3
        );
        assert!(engine.settlements_for_payment(rest.payment.id).await?.is_empty());

        let mirrored = cashbox::get_movement_for_payment(&db, settled.payment.id)
            .await?
            .unwrap();
        assert_eq!(
            mirrored.description,
            "Dues payment Monthly Dues 01/2026, Monthly Dues 02/2026, Monthly Dues 03/2026 - Test Member"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_restores_balance() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);
        engine
            .adjust_balance(member.id, Decimal::from(2000), "Opening credit")
            .await?;

        let mut intent = payment_intent(member.id, vec![due.id], 3000);
        intent.use_balance = true;
        let settled = engine.settle(intent).await?;
        assert_eq!(balance::current_balance(&db, member.id).await?, Decimal::ZERO);

        engine.delete_payment(settled.payment.id).await?;

        assert_eq!(
            balance::current_balance(&db, member.id).await?,
            Decimal::from(2000)
        );
        let history = balance::list_movements(&db, member.id).await?;
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].delta, Decimal::from(2000));
        assert_eq!(
            history[2].description,
            format!("Reversal of payment #{}", settled.payment.id)
        );
        assert!(balance::check_movement_chain(&db, member.id).await?);
        assert_eq!(Settlement::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_multi_payment_removes_settlements() -> Result<()> {
        let db = setup_test_db().await?;
        let member = create_test_member(&db, "Test", "Member").await?;
        let concept = create_test_concept(&db, "Monthly Dues", 3000).await?;
        let first = create_due(&db, concept.id, 1, 2026).await?;
        let second = create_due(&db, concept.id, 2, 2026).await?;
        let engine = test_engine(&db);

        let settled = engine
            .settle(payment_intent(member.id, vec![first.id, second.id], 7000))
            .await?;
        assert_eq!(settled.surplus, Decimal::from(1000));
        assert_eq!(settled.settlements.len(), 2);

        engine.delete_payment(settled.payment.id).await?;

        assert_eq!(Settlement::find().count(&db).await?, 0);
        assert_eq!(balance::current_balance(&db, member.id).await?, Decimal::ZERO);
        assert_eq!(get_available_dues(&db, member.id).await?.len(), 2);
        assert!(balance::check_movement_chain(&db, member.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_observer_failure_rolls_back() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = SettlementEngine::new(clone_db(&db), FailingObserver);
        engine
            .adjust_balance(member.id, Decimal::from(1000), "Opening credit")
            .await?;

        let mut intent = payment_intent(member.id, vec![due.id], 6000);
        intent.use_balance = true;
        let result = engine.settle(intent).await;

        assert!(matches!(result, Err(Error::Validation { .. })));
        assert_eq!(Payment::find().count(&db).await?, 0);
        assert_eq!(BalanceMovement::find().count(&db).await?, 1);
        assert_eq!(
            balance::current_balance(&db, member.id).await?,
            Decimal::from(1000)
        );
        assert!(
            cashbox::list_movements(&db, &MovementFilter::default())
                .await?
                .is_empty()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_settlements_keep_chain() -> Result<()> {
        let db = setup_test_db().await?;
        let member = create_test_member(&db, "Test", "Member").await?;
        let concept = create_test_concept(&db, "Monthly Dues", 3000).await?;
        let first = create_due(&db, concept.id, 1, 2026).await?;
        let second = create_due(&db, concept.id, 2, 2026).await?;
        let engine = test_engine(&db);
        engine
            .adjust_balance(member.id, Decimal::from(10000), "Prepaid")
            .await?;

        let mut a = payment_intent(member.id, vec![first.id], 0);
        a.use_balance = true;
        let mut b = payment_intent(member.id, vec![second.id], 0);
        b.use_balance = true;

        let (left, right) = tokio::join!(engine.settle(a), engine.settle(b));
        left?;
        right?;

        assert_eq!(
            balance::current_balance(&db, member.id).await?,
            Decimal::from(4000)
        );
        assert_eq!(balance::list_movements(&db, member.id).await?.len(), 3);
        assert!(balance::check_movement_chain(&db, member.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_payment_moves_mirrored_date() -> Result<()> {
        init_test_tracing();
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);
        let settled = engine
            .settle(payment_intent(member.id, vec![due.id], 5000))
            .await?;

        let new_date = NaiveDate::from_ymd_opt(2026, 4, 2).unwrap();
        let updated = engine
            .update_payment(
                settled.payment.id,
                PaymentUpdate {
                    method: Some(PaymentMethod::Transfer),
                    paid_on: Some(new_date),
                    reference: Some(Some("TRX-881".to_string())),
                    ..Default::default()
                },
            )
            .await?;

        assert_eq!(updated.method, PaymentMethod::Transfer);
        assert_eq!(updated.reference.as_deref(), Some("TRX-881"));
        assert_eq!(updated.amount, settled.payment.amount);
        let mirrored = cashbox::get_movement_for_payment(&db, updated.id)
            .await?
            .unwrap();
        assert_eq!(mirrored.date, new_date);

        let missing = engine.update_payment(9999, PaymentUpdate::default()).await;
        assert!(matches!(missing, Err(Error::PaymentNotFound { id: 9999 })));
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_due_amount_is_reported() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        update_concept(
            &db,
            due.concept_id,
            ConceptUpdate {
                suggested_amount: Some(Decimal::from(5500)),
                ..Default::default()
            },
        )
        .await?;
        let engine = test_engine(&db);

        let settled = engine
            .settle(payment_intent(member.id, vec![due.id], 5000))
            .await?;
        assert!(settled.warnings.contains(&SettlementWarning::StaleDueAmount {
            due_id: due.id,
            due_amount: Decimal::from(5000),
            concept_amount: Decimal::from(5500),
        }));
        assert_eq!(settled.shortfall, Decimal::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_member_and_due() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);

        let ghost = engine.settle(payment_intent(999, vec![due.id], 5000)).await;
        assert!(matches!(ghost, Err(Error::MemberNotFound { id: 999 })));

        let no_due = engine
            .settle(payment_intent(member.id, vec![999], 5000))
            .await;
        assert!(matches!(no_due, Err(Error::DueNotFound { id: 999 })));
        Ok(())
    }

    #[test]
    fn test_plan_spreads_balance_after_cash() {
        let charges = [charge(1, 3000, 0), charge(2, 3000, 0), charge(3, 3000, 0)];
        let plan =
            plan_settlement(Decimal::from(4000), true, Decimal::from(3500), &charges).unwrap();

        assert_eq!(plan.balance_used, Decimal::from(3500));
        let cash: Vec<Decimal> = plan.allocations.iter().map(|a| a.applied).collect();
        let from_balance: Vec<Decimal> =
            plan.allocations.iter().map(|a| a.balance_applied).collect();
        assert_eq!(
            cash,
            vec![Decimal::from(3000), Decimal::from(1000), Decimal::ZERO]
        );
        assert_eq!(
            from_balance,
            vec![Decimal::ZERO, Decimal::from(2000), Decimal::from(1500)]
        );
        assert!(plan.allocations[1].fully_paid);
        assert_eq!(plan.allocations[2].remaining, Decimal::from(1500));

        let drawn: Decimal = from_balance.iter().copied().sum();
        assert_eq!(drawn, plan.balance_used);
        let cash_total: Decimal = cash.iter().copied().sum();
        assert!(cash_total <= Decimal::from(4000));
    }

    #[tokio::test]
    async fn test_multi_due_payment_with_balance_settles_every_due() -> Result<()> {
        let db = setup_test_db().await?;
        let member = create_test_member(&db, "Test", "Member").await?;
        let concept = create_test_concept(&db, "Monthly Dues", 3000).await?;
        let january = create_due(&db, concept.id, 1, 2026).await?;
        let february = create_due(&db, concept.id, 2, 2026).await?;
        let engine = test_engine(&db);
        engine
            .adjust_balance(member.id, Decimal::from(3000), "Opening credit")
            .await?;

        let mut intent = payment_intent(member.id, vec![january.id, february.id], 3000);
        intent.use_balance = true;
        let settled = engine.settle(intent).await?;

        assert_eq!(settled.payment.amount, Decimal::from(6000));
        assert_eq!(settled.balance_used, Decimal::from(3000));
        assert_eq!(settled.shortfall, Decimal::ZERO);
        assert_eq!(balance::current_balance(&db, member.id).await?, Decimal::ZERO);

        let rows = &settled.settlements;
        assert_eq!(rows[0].amount_applied, Decimal::from(3000));
        assert_eq!(rows[0].balance_applied, Decimal::ZERO);
        assert_eq!(rows[1].amount_applied, Decimal::ZERO);
        assert_eq!(rows[1].balance_applied, Decimal::from(3000));
        assert!(rows.iter().all(|r| r.fully_paid));
        assert!(rows.iter().all(|r| r.amount_remaining == Decimal::ZERO));

        assert_eq!(
            paid_amount(&db, member.id, february.id).await?,
            Decimal::from(3000)
        );
        assert!(get_available_dues(&db, member.id).await?.is_empty());

        let again = engine
            .settle(payment_intent(member.id, vec![february.id], 3000))
            .await;
        assert!(matches!(again, Err(Error::DueAlreadySettled { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_one_payment_leaves_others_untouched() -> Result<()> {
        let db = setup_test_db().await?;
        let member = create_test_member(&db, "Test", "Member").await?;
        let concept = create_test_concept(&db, "Monthly Dues", 3000).await?;
        let january = create_due(&db, concept.id, 1, 2026).await?;
        let february = create_due(&db, concept.id, 2, 2026).await?;
        let engine = test_engine(&db);

        let kept = engine
            .settle(payment_intent(member.id, vec![january.id], 3500))
            .await?;
        let dropped = engine
            .settle(payment_intent(member.id, vec![february.id], 4000))
            .await?;

        let kept_movement = cashbox::get_movement_for_payment(&db, kept.payment.id)
            .await?
            .unwrap();
        let kept_balance_moves = balance::movements_for_payment(&db, kept.payment.id).await?;
        assert_eq!(kept_balance_moves.len(), 1);

        engine.delete_payment(dropped.payment.id).await?;

        assert_eq!(
            cashbox::get_movement_for_payment(&db, kept.payment.id).await?,
            Some(kept_movement)
        );
        assert_eq!(
            balance::movements_for_payment(&db, kept.payment.id).await?,
            kept_balance_moves
        );
        assert_eq!(
            balance::current_balance(&db, member.id).await?,
            Decimal::from(500)
        );
        assert_eq!(
            get_available_dues(&db, member.id).await?,
            vec![february.clone()]
        );
        assert!(balance::check_movement_chain(&db, member.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_payment_without_mirrored_movement() -> Result<()> {
        let (db, member, due) = setup_with_member_and_due(5000).await?;
        let engine = test_engine(&db);
        let settled = engine
            .settle(payment_intent(member.id, vec![due.id], 5000))
            .await?;

        crate::entities::CashboxMovement::delete_many()
            .filter(crate::entities::cashbox_movement::Column::PaymentId.eq(settled.payment.id))
            .exec(&db)
            .await?;

        engine.delete_payment(settled.payment.id).await?;
        assert_eq!(Payment::find().count(&db).await?, 0);
        assert_eq!(get_available_dues(&db, member.id).await?, vec![due]);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_settlement_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let member = create_test_member(&db, "Test", "Member").await?;
        let concept = create_test_concept(&db, "Monthly Dues", 3000).await?;
        let january = create_due(&db, concept.id, 1, 2026).await?;
        let february = create_due(&db, concept.id, 2, 2026).await?;
        let engine = test_engine(&db);
        let settled = engine
            .settle(payment_intent(member.id, vec![january.id, february.id], 6000))
            .await?;

        let repeat = Allocation {
            due_id: january.id,
            applied: Decimal::from(100),
            balance_applied: Decimal::ZERO,
            remaining: Decimal::ZERO,
            fully_paid: true,
        };
        let result = insert_settlement(&db, settled.payment.id, &repeat).await;
        assert!(matches!(
            result,
            Err(Error::DuplicateSettlement { payment_id, due_id })
                if payment_id == settled.payment.id && due_id == january.id
        ));
        assert_eq!(Settlement::find().count(&db).await?, 2);
        Ok(())
    }
}
