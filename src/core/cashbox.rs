//! Cashbox ledger - income and expense movements, categories and period summaries.
//!
//! Payments reach the cashbox through [`CashboxMirror`], the [`PaymentObserver`]
//! the settlement engine notifies inside its transaction. Mirrored movements are
//! linked to their payment and can only change through the payment.

use crate::{
    config::club::{CashboxConfig, CategoryConfig, DEFAULT_DUES_CATEGORY},
    entities::{
        CashboxCategory, CashboxMovement, Concept, Due, Member, MovementKind, Payment, Settlement,
        cashbox_category, cashbox_movement, concept, due, member, payment, settlement,
    },
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    future::Future,
};
use tracing::{debug, info, warn};

/// Smallest amount a cashbox movement may carry.
pub const MINIMUM_AMOUNT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// A payment together with the member and dues it settles.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    /// The persisted payment
    pub payment: payment::Model,
    /// Member who paid
    pub member: member::Model,
    /// Dues covered, oldest period first
    pub dues: Vec<due::Model>,
}

/// Receives payment lifecycle notifications inside the triggering transaction.
///
/// An error returned by any hook rolls back the whole operation.
pub trait PaymentObserver {
    /// Called after the payment, its settlements and balance adjustments are written.
    fn on_payment_created<C>(
        &self,
        db: &C,
        context: &PaymentContext,
    ) -> impl Future<Output = Result<()>>
    where
        C: ConnectionTrait;

    /// Called before the payment row is deleted.
    fn on_payment_deleted<C>(
        &self,
        db: &C,
        payment: &payment::Model,
    ) -> impl Future<Output = Result<()>>
    where
        C: ConnectionTrait;

    /// Called after the payment's metadata changed.
    fn on_payment_updated<C>(
        &self,
        _db: &C,
        _payment: &payment::Model,
    ) -> impl Future<Output = Result<()>>
    where
        C: ConnectionTrait,
    {
        async { Ok(()) }
    }
}

/// Picks the cashbox category that receives mirrored dues income.
pub trait CategoryResolver {
    /// Returns the category, creating it if needed.
    fn resolve<C>(&self, db: &C) -> impl Future<Output = Result<cashbox_category::Model>>
    where
        C: ConnectionTrait;
}

/// Resolves an income category by name, creating it on first use.
#[derive(Debug, Clone)]
pub struct DuesCategory {
    name: String,
    description: Option<String>,
}

impl DuesCategory {
    /// Category with the given name and creation description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description,
        }
    }

    /// Name of the resolved category.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for DuesCategory {
    fn default() -> Self {
        Self::new(DEFAULT_DUES_CATEGORY, None)
    }
}

impl CategoryResolver for DuesCategory {
    async fn resolve<C>(&self, db: &C) -> Result<cashbox_category::Model>
    where
        C: ConnectionTrait,
    {
        get_or_create_category(db, &self.name, MovementKind::Income, self.description.clone())
            .await
    }
}

/// Mirrors every payment as one income movement in the cashbox.
#[derive(Debug, Clone, Default)]
pub struct CashboxMirror<R = DuesCategory> {
    resolver: R,
}

impl CashboxMirror {
    /// Mirror posting into the dues category named in `config`.
    #[must_use]
    pub fn from_config(config: &CashboxConfig) -> Self {
        Self::new(DuesCategory::new(
            config.dues_category.clone(),
            config.dues_category_description.clone(),
        ))
    }
}

impl<R: CategoryResolver> CashboxMirror<R> {
    /// Mirror using `resolver` to pick the income category.
    #[must_use]
    pub const fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Creates movements for payments that have none.
    ///
    /// With `dry_run` nothing is written; the report lists what would be created.
    pub async fn backfill_payment_movements(
        &self,
        db: &DatabaseConnection,
        dry_run: bool,
    ) -> Result<BackfillReport> {
        let linked: HashSet<i64> = CashboxMovement::find()
            .filter(cashbox_movement::Column::PaymentId.is_not_null())
            .all(db)
            .await?
            .into_iter()
            .filter_map(|m| m.payment_id)
            .collect();

        let missing: Vec<payment::Model> = Payment::find()
            .order_by_asc(payment::Column::Id)
            .all(db)
            .await?
            .into_iter()
            .filter(|p| !linked.contains(&p.id))
            .collect();

        let mut report = BackfillReport {
            payment_ids: missing.iter().map(|p| p.id).collect(),
            created: 0,
        };
        if dry_run || missing.is_empty() {
            return Ok(report);
        }

        let txn = db.begin().await?;
        for payment in missing {
            let context = load_payment_context(&txn, payment).await?;
            self.on_payment_created(&txn, &context).await?;
            report.created += 1;
        }
        txn.commit().await?;

        info!("Backfilled {} cashbox movements", report.created);
        Ok(report)
    }
}

impl<R: CategoryResolver> PaymentObserver for CashboxMirror<R> {
    async fn on_payment_created<C>(&self, db: &C, context: &PaymentContext) -> Result<()>
    where
        C: ConnectionTrait,
    {
        let category = self.resolver.resolve(db).await?;
        let description = describe_payment(db, context).await?;
        let movement = insert_movement(
            db,
            NewMovement {
                date: context.payment.paid_on,
                kind: MovementKind::Income,
                category_id: category.id,
                amount: context.payment.amount,
                description,
            },
            Some(context.payment.id),
        )
        .await?;

        debug!(
            "Mirrored payment #{} as cashbox movement {}",
            context.payment.id, movement.id
        );
        Ok(())
    }

    async fn on_payment_deleted<C>(&self, db: &C, payment: &payment::Model) -> Result<()>
    where
        C: ConnectionTrait,
    {
        let deleted = CashboxMovement::delete_many()
            .filter(cashbox_movement::Column::PaymentId.eq(payment.id))
            .exec(db)
            .await?;
        debug!(
            "Removed {} cashbox movements of payment #{}",
            deleted.rows_affected, payment.id
        );
        Ok(())
    }

    async fn on_payment_updated<C>(&self, db: &C, payment: &payment::Model) -> Result<()>
    where
        C: ConnectionTrait,
    {
        let Some(movement) = get_movement_for_payment(db, payment.id).await? else {
            return Ok(());
        };
        if movement.date == payment.paid_on {
            return Ok(());
        }

        let mut active: cashbox_movement::ActiveModel = movement.into();
        active.date = Set(payment.paid_on);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }
}

/// Loads the member and dues of a persisted payment.
pub async fn load_payment_context<C>(db: &C, payment: payment::Model) -> Result<PaymentContext>
where
    C: ConnectionTrait,
{
    let member = Member::find_by_id(payment.member_id)
        .one(db)
        .await?
        .ok_or(Error::MemberNotFound {
            id: payment.member_id,
        })?;

    let due_ids: Vec<i64> = if let Some(due_id) = payment.due_id {
        vec![due_id]
    } else {
        Settlement::find()
            .filter(settlement::Column::PaymentId.eq(payment.id))
            .all(db)
            .await?
            .into_iter()
            .map(|s| s.due_id)
            .collect()
    };

    let dues = Due::find()
        .filter(due::Column::Id.is_in(due_ids))
        .order_by_asc(due::Column::Year)
        .order_by_asc(due::Column::Month)
        .order_by_asc(due::Column::ConceptId)
        .order_by_asc(due::Column::Id)
        .all(db)
        .await?;

    Ok(PaymentContext {
        payment,
        member,
        dues,
    })
}

/// Human-readable description of a mirrored payment.
///
/// `"Dues payment Monthly Dues 03/2026, Monthly Dues 04/2026 - Ada Lovelace"`,
/// followed by the cash/balance split when the member's balance was used.
pub async fn describe_payment<C>(db: &C, context: &PaymentContext) -> Result<String>
where
    C: ConnectionTrait,
{
    let concept_ids: Vec<i64> = context.dues.iter().map(|d| d.concept_id).collect();
    let concepts: HashMap<i64, String> = Concept::find()
        .filter(concept::Column::Id.is_in(concept_ids))
        .all(db)
        .await?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    let periods: Vec<String> = context
        .dues
        .iter()
        .map(|due| {
            let concept = concepts.get(&due.concept_id).map_or("Dues", String::as_str);
            format!("{concept} {}", due.period_label())
        })
        .collect();

    let mut description = format!(
        "Dues payment {} - {}",
        periods.join(", "),
        context.member.full_name()
    );
    if context.payment.balance_used > Decimal::ZERO {
        description.push_str(&balance_breakdown(&context.payment));
    }
    Ok(description)
}

fn balance_breakdown(payment: &payment::Model) -> String {
    format!(
        " (Cash: ${:.2}, Balance used: ${:.2})",
        payment.cash_amount, payment.balance_used
    )
}

/// A manual cashbox entry.
#[derive(Debug, Clone)]
pub struct NewMovement {
    /// Accounting date
    pub date: NaiveDate,
    /// Income or expense
    pub kind: MovementKind,
    /// Category, whose kind must match
    pub category_id: i64,
    /// Amount, at least [`MINIMUM_AMOUNT`]
    pub amount: Decimal,
    /// Description
    pub description: String,
}

/// Fields that may change on a manual movement.
#[derive(Debug, Clone, Default)]
pub struct MovementUpdate {
    /// New date
    pub date: Option<NaiveDate>,
    /// New kind
    pub kind: Option<MovementKind>,
    /// New category
    pub category_id: Option<i64>,
    /// New amount
    pub amount: Option<Decimal>,
    /// New description
    pub description: Option<String>,
}

/// Criteria for [`list_movements`]; empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    /// Only this kind
    pub kind: Option<MovementKind>,
    /// Only this category
    pub category_id: Option<i64>,
    /// On or after this date
    pub from: Option<NaiveDate>,
    /// On or before this date
    pub to: Option<NaiveDate>,
}

async fn validate_movement<C>(
    db: &C,
    kind: MovementKind,
    category_id: i64,
    amount: Decimal,
) -> Result<cashbox_category::Model>
where
    C: ConnectionTrait,
{
    if amount < MINIMUM_AMOUNT {
        return Err(Error::InvalidAmount { amount });
    }

    let category = CashboxCategory::find_by_id(category_id)
        .one(db)
        .await?
        .ok_or(Error::CategoryNotFound { id: category_id })?;

    if category.kind != kind {
        return Err(Error::CategoryKindMismatch {
            category: category.name,
            category_kind: category.kind,
            movement_kind: kind,
        });
    }
    Ok(category)
}

async fn insert_movement<C>(
    db: &C,
    movement: NewMovement,
    payment_id: Option<i64>,
) -> Result<cashbox_movement::Model>
where
    C: ConnectionTrait,
{
    validate_movement(db, movement.kind, movement.category_id, movement.amount).await?;

    let now = Utc::now();
    cashbox_movement::ActiveModel {
        date: Set(movement.date),
        kind: Set(movement.kind),
        category_id: Set(movement.category_id),
        amount: Set(movement.amount),
        description: Set(movement.description),
        payment_id: Set(payment_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Records a manual income or expense.
///
/// # Errors
/// - `Error::InvalidAmount` below [`MINIMUM_AMOUNT`]
/// - `Error::CategoryNotFound` for an unknown category
/// - `Error::CategoryKindMismatch` when the kind differs from the category's
pub async fn record_movement(
    db: &DatabaseConnection,
    movement: NewMovement,
) -> Result<cashbox_movement::Model> {
    insert_movement(db, movement, None).await
}

/// Updates a manual movement. Mirrored movements are rejected.
pub async fn update_movement(
    db: &DatabaseConnection,
    movement_id: i64,
    changes: MovementUpdate,
) -> Result<cashbox_movement::Model> {
    let movement = get_unlinked_movement(db, movement_id).await?;

    let kind = changes.kind.unwrap_or(movement.kind);
    let category_id = changes.category_id.unwrap_or(movement.category_id);
    let amount = changes.amount.unwrap_or(movement.amount);
    validate_movement(db, kind, category_id, amount).await?;

    let mut active: cashbox_movement::ActiveModel = movement.into();
    if let Some(date) = changes.date {
        active.date = Set(date);
    }
    if let Some(description) = changes.description {
        active.description = Set(description);
    }
    active.kind = Set(kind);
    active.category_id = Set(category_id);
    active.amount = Set(amount);
    active.updated_at = Set(Utc::now());
    active.update(db).await.map_err(Into::into)
}

/// Deletes a manual movement. Mirrored movements are rejected.
pub async fn delete_movement(db: &DatabaseConnection, movement_id: i64) -> Result<()> {
    let movement = get_unlinked_movement(db, movement_id).await?;
    movement.delete(db).await?;
    Ok(())
}

async fn get_unlinked_movement(
    db: &DatabaseConnection,
    movement_id: i64,
) -> Result<cashbox_movement::Model> {
    let movement = CashboxMovement::find_by_id(movement_id)
        .one(db)
        .await?
        .ok_or(Error::MovementNotFound { id: movement_id })?;

    match movement.payment_id {
        Some(payment_id) => Err(Error::LinkedMovement {
            movement_id,
            payment_id,
        }),
        None => Ok(movement),
    }
}

/// The movement mirroring a payment, if any.
pub async fn get_movement_for_payment<C>(
    db: &C,
    payment_id: i64,
) -> Result<Option<cashbox_movement::Model>>
where
    C: ConnectionTrait,
{
    CashboxMovement::find()
        .filter(cashbox_movement::Column::PaymentId.eq(payment_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Movements matching `filter`, newest first.
pub async fn list_movements(
    db: &DatabaseConnection,
    filter: &MovementFilter,
) -> Result<Vec<cashbox_movement::Model>> {
    let mut query = CashboxMovement::find();
    if let Some(kind) = filter.kind {
        query = query.filter(cashbox_movement::Column::Kind.eq(kind));
    }
    if let Some(category_id) = filter.category_id {
        query = query.filter(cashbox_movement::Column::CategoryId.eq(category_id));
    }
    if let Some(from) = filter.from {
        query = query.filter(cashbox_movement::Column::Date.gte(from));
    }
    if let Some(to) = filter.to {
        query = query.filter(cashbox_movement::Column::Date.lte(to));
    }

    query
        .order_by_desc(cashbox_movement::Column::Date)
        .order_by_desc(cashbox_movement::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Creates a category with a unique name.
pub async fn create_category(
    db: &DatabaseConnection,
    name: &str,
    kind: MovementKind,
    description: Option<String>,
) -> Result<cashbox_category::Model> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation {
            message: "Cashbox category name cannot be empty".to_string(),
        });
    }
    if find_category_by_name(db, name).await?.is_some() {
        return Err(Error::DuplicateName {
            entity: "Cashbox category",
            name: name.to_string(),
        });
    }
    insert_category(db, name, kind, description).await
}

async fn find_category_by_name<C>(db: &C, name: &str) -> Result<Option<cashbox_category::Model>>
where
    C: ConnectionTrait,
{
    CashboxCategory::find()
        .filter(cashbox_category::Column::Name.eq(name))
        .one(db)
        .await
        .map_err(Into::into)
}

async fn insert_category<C>(
    db: &C,
    name: &str,
    kind: MovementKind,
    description: Option<String>,
) -> Result<cashbox_category::Model>
where
    C: ConnectionTrait,
{
    cashbox_category::ActiveModel {
        name: Set(name.to_string()),
        description: Set(description),
        kind: Set(kind),
        active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Returns the named category, creating it with `kind` if missing.
///
/// # Errors
/// Returns `Error::CategoryKindMismatch` if the category exists with the other kind.
pub async fn get_or_create_category<C>(
    db: &C,
    name: &str,
    kind: MovementKind,
    description: Option<String>,
) -> Result<cashbox_category::Model>
where
    C: ConnectionTrait,
{
    match find_category_by_name(db, name).await? {
        Some(category) if category.kind != kind => Err(Error::CategoryKindMismatch {
            category: category.name,
            category_kind: category.kind,
            movement_kind: kind,
        }),
        Some(category) => Ok(category),
        None => {
            info!("Creating {} cashbox category '{}'", kind, name);
            insert_category(db, name, kind, description).await
        }
    }
}

/// Active categories ordered by kind, then name.
pub async fn list_active_categories(
    db: &DatabaseConnection,
) -> Result<Vec<cashbox_category::Model>> {
    CashboxCategory::find()
        .filter(cashbox_category::Column::Active.eq(true))
        .order_by_asc(cashbox_category::Column::Kind)
        .order_by_asc(cashbox_category::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Creates the configured categories that do not exist yet.
///
/// Returns how many were created.
pub async fn seed_categories(db: &DatabaseConnection, categories: &[CategoryConfig]) -> Result<usize> {
    let mut created = 0;
    for category in categories {
        if find_category_by_name(db, &category.name).await?.is_none() {
            insert_category(db, &category.name, category.kind, category.description.clone())
                .await?;
            created += 1;
        }
    }
    info!("Seeded {} cashbox categories", created);
    Ok(created)
}

/// Totals of one category within a summary period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTotal {
    /// Category identifier
    pub category_id: i64,
    /// Category name
    pub name: String,
    /// Category kind
    pub kind: MovementKind,
    /// Sum of the movements
    pub total: Decimal,
    /// Number of movements
    pub count: usize,
}

/// Cashbox position over an inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSummary {
    /// First day
    pub start: NaiveDate,
    /// Last day
    pub end: NaiveDate,
    /// Balance before the first day
    pub opening: Decimal,
    /// Income in the range
    pub income: Decimal,
    /// Expense in the range
    pub expense: Decimal,
    /// `opening + income - expense`
    pub closing: Decimal,
    /// Movements in the range
    pub movement_count: usize,
    /// Every category with movements in the range, active or not, by kind then name
    pub by_category: Vec<CategoryTotal>,
}

impl PeriodSummary {
    /// Income minus expense.
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.income - self.expense
    }
}

/// Summarizes the cashbox between `start` and `end`, both inclusive.
///
/// Recomputed from the movements on every call.
pub async fn period_summary(
    db: &DatabaseConnection,
    start: NaiveDate,
    end: NaiveDate,
    opening: Decimal,
) -> Result<PeriodSummary> {
    if start > end {
        return Err(Error::Validation {
            message: format!("Summary start {start} is after end {end}"),
        });
    }

    let movements = list_movements(
        db,
        &MovementFilter {
            from: Some(start),
            to: Some(end),
            ..Default::default()
        },
    )
    .await?;

    let mut income = Decimal::ZERO;
    let mut expense = Decimal::ZERO;
    let mut per_category: BTreeMap<i64, (Decimal, usize)> = BTreeMap::new();
    for movement in &movements {
        match movement.kind {
            MovementKind::Income => income += movement.amount,
            MovementKind::Expense => expense += movement.amount,
        }
        let entry = per_category.entry(movement.category_id).or_default();
        entry.0 += movement.amount;
        entry.1 += 1;
    }

    let by_category = CashboxCategory::find()
        .filter(cashbox_category::Column::Id.is_in(per_category.keys().copied()))
        .order_by_asc(cashbox_category::Column::Kind)
        .order_by_asc(cashbox_category::Column::Name)
        .all(db)
        .await?
        .into_iter()
        .filter_map(|category| {
            let (total, count) = per_category.get(&category.id).copied()?;
            Some(CategoryTotal {
                category_id: category.id,
                name: category.name,
                kind: category.kind,
                total,
                count,
            })
        })
        .collect();

    Ok(PeriodSummary {
        start,
        end,
        opening,
        income,
        expense,
        closing: opening + income - expense,
        movement_count: movements.len(),
        by_category,
    })
}

/// Outcome of [`CashboxMirror::backfill_payment_movements`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Payments that had no movement
    pub payment_ids: Vec<i64>,
    /// Movements created (zero on a dry run)
    pub created: usize,
}

/// A mirrored movement whose amount is below its payment's gross amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountCorrection {
    /// Movement to fix
    pub movement_id: i64,
    /// Linked payment
    pub payment_id: i64,
    /// Amount currently recorded
    pub recorded: Decimal,
    /// Payment's gross amount
    pub expected: Decimal,
}

/// Finds mirrored movements recorded with only the cash part of a payment
/// that also used balance, and, unless `dry_run`, raises them to the gross
/// amount and appends the cash/balance split to their description.
pub async fn repair_movement_amounts(
    db: &DatabaseConnection,
    dry_run: bool,
) -> Result<Vec<AmountCorrection>> {
    let rows = CashboxMovement::find()
        .filter(cashbox_movement::Column::PaymentId.is_not_null())
        .find_also_related(Payment)
        .all(db)
        .await?;

    let pending: Vec<(cashbox_movement::Model, payment::Model)> = rows
        .into_iter()
        .filter_map(|(movement, payment)| {
            let payment = payment?;
            (payment.balance_used > Decimal::ZERO && movement.amount < payment.amount)
                .then_some((movement, payment))
        })
        .collect();

    let corrections: Vec<AmountCorrection> = pending
        .iter()
        .map(|(movement, payment)| AmountCorrection {
            movement_id: movement.id,
            payment_id: payment.id,
            recorded: movement.amount,
            expected: payment.amount,
        })
        .collect();

    if corrections.is_empty() || dry_run {
        return Ok(corrections);
    }

    let txn = db.begin().await?;
    for (movement, payment) in pending {
        let mut description = movement.description.clone();
        if !description.contains("Balance used:") {
            description.push_str(&balance_breakdown(&payment));
        }
        let mut active: cashbox_movement::ActiveModel = movement.into();
        active.amount = Set(payment.amount);
        active.description = Set(description);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
    }
    txn.commit().await?;

    warn!("Corrected {} mirrored cashbox amounts", corrections.len());
    Ok(corrections)
}
