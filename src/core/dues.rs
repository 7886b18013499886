//! Dues catalog business logic - concepts, dues and what a member still owes.
//!
//! A due's amount mirrors its concept's suggested amount every time the due is
//! saved ([`sync_amount`]). Changing a concept does not rewrite existing dues;
//! [`stale_dues`] reports the ones that drifted so an administrator can decide.

use crate::{
    config::club::ConceptConfig,
    entities::{Concept, Due, Payment, Settlement, concept, due, payment, settlement},
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use sea_orm::{
    JoinType, PaginatorTrait, QueryOrder, QuerySelect, RelationTrait, Set, prelude::*,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Fields that may change on an existing concept.
#[derive(Debug, Clone, Default)]
pub struct ConceptUpdate {
    /// New name; rejected once the concept is referenced by dues
    pub name: Option<String>,
    /// New suggested amount
    pub suggested_amount: Option<Decimal>,
    /// New active flag
    pub active: Option<bool>,
}

/// Fields that may change on an existing due.
#[derive(Debug, Clone, Default)]
pub struct DueUpdate {
    /// New month
    pub month: Option<i32>,
    /// New year
    pub year: Option<i32>,
    /// New concept
    pub concept_id: Option<i64>,
    /// New active flag
    pub active: Option<bool>,
}

/// Outcome of generating the dues of a year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Dues inserted
    pub created: usize,
    /// Dues that already existed
    pub existing: usize,
    /// Concepts processed
    pub concepts: usize,
}

/// A due whose amount no longer matches its concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleDue {
    /// The drifted due
    pub due: due::Model,
    /// The concept's current suggested amount
    pub concept_amount: Decimal,
}

/// Derives the `MMYY` period code.
#[must_use]
pub fn period_code(month: i32, year: i32) -> String {
    format!("{:02}{:02}", month, year.rem_euclid(100))
}

fn validate_period(month: i32, year: i32) -> Result<()> {
    if !(1..=12).contains(&month) || !(1900..=9999).contains(&year) {
        return Err(Error::InvalidPeriod { month, year });
    }
    Ok(())
}

fn validate_suggested_amount(amount: Decimal) -> Result<()> {
    if amount.is_sign_negative() {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(())
}

/// Creates a charge concept with a unique name.
pub async fn create_concept(
    db: &DatabaseConnection,
    name: &str,
    suggested_amount: Decimal,
    description: Option<String>,
) -> Result<concept::Model> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation {
            message: "Concept name cannot be empty".to_string(),
        });
    }
    validate_suggested_amount(suggested_amount)?;

    if get_concept_by_name(db, name).await?.is_some() {
        return Err(Error::DuplicateName {
            entity: "Concept",
            name: name.to_string(),
        });
    }

    concept::ActiveModel {
        name: Set(name.to_string()),
        description: Set(description),
        suggested_amount: Set(suggested_amount),
        active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Finds a concept by id.
pub async fn get_concept_by_id<C>(db: &C, concept_id: i64) -> Result<Option<concept::Model>>
where
    C: ConnectionTrait,
{
    Concept::find_by_id(concept_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a concept by exact name.
pub async fn get_concept_by_name<C>(db: &C, name: &str) -> Result<Option<concept::Model>>
where
    C: ConnectionTrait,
{
    Concept::find()
        .filter(concept::Column::Name.eq(name))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists active concepts alphabetically.
pub async fn list_active_concepts(db: &DatabaseConnection) -> Result<Vec<concept::Model>> {
    Concept::find()
        .filter(concept::Column::Active.eq(true))
        .order_by_asc(concept::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Updates a concept.
///
/// Once any due references the concept only the suggested amount and the
/// active flag may change. Existing dues keep their amount until they are
/// saved again.
///
/// # Errors
/// - `Error::ConceptNotFound` if the concept does not exist
/// - `Error::Validation` when renaming a concept that dues already reference
/// - `Error::DuplicateName` when the new name is taken
pub async fn update_concept(
    db: &DatabaseConnection,
    concept_id: i64,
    changes: ConceptUpdate,
) -> Result<concept::Model> {
    let concept = get_concept_by_id(db, concept_id)
        .await?
        .ok_or(Error::ConceptNotFound { id: concept_id })?;
    let mut active: concept::ActiveModel = concept.clone().into();

    if let Some(name) = changes.name {
        let name = name.trim().to_string();
        if name != concept.name {
            if name.is_empty() {
                return Err(Error::Validation {
                    message: "Concept name cannot be empty".to_string(),
                });
            }
            let referenced = Due::find()
                .filter(due::Column::ConceptId.eq(concept_id))
                .count(db)
                .await?;
            if referenced > 0 {
                return Err(Error::Validation {
                    message: format!(
                        "Concept '{}' is referenced by {referenced} dues and cannot be renamed",
                        concept.name
                    ),
                });
            }
            if get_concept_by_name(db, &name).await?.is_some() {
                return Err(Error::DuplicateName {
                    entity: "Concept",
                    name,
                });
            }
            active.name = Set(name);
        }
    }

    if let Some(amount) = changes.suggested_amount {
        validate_suggested_amount(amount)?;
        active.suggested_amount = Set(amount);
    }
    if let Some(flag) = changes.active {
        active.active = Set(flag);
    }

    active.update(db).await.map_err(Into::into)
}

/// Creates any configured concept that does not exist yet.
///
/// Returns the number of concepts created. Existing concepts are left alone.
pub async fn seed_concepts(db: &DatabaseConnection, concepts: &[ConceptConfig]) -> Result<usize> {
    let mut created = 0;
    for cfg in concepts {
        if get_concept_by_name(db, cfg.name.trim()).await?.is_some() {
            debug!("Concept '{}' already exists. Skipping.", cfg.name);
            continue;
        }
        let concept =
            create_concept(db, &cfg.name, cfg.suggested_amount, cfg.description.clone()).await?;
        if !cfg.active {
            update_concept(
                db,
                concept.id,
                ConceptUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        }
        info!("Seeded concept '{}'", cfg.name);
        created += 1;
    }
    Ok(created)
}

/// Sets the due's amount to its concept's current suggested amount.
///
/// Called on every due save; historical amounts are therefore not frozen.
pub async fn sync_amount<C>(db: &C, due: &mut due::ActiveModel) -> Result<()>
where
    C: ConnectionTrait,
{
    let concept_id = match &due.concept_id {
        sea_orm::ActiveValue::Set(id) | sea_orm::ActiveValue::Unchanged(id) => *id,
        sea_orm::ActiveValue::NotSet => {
            return Err(Error::Validation {
                message: "Due has no concept".to_string(),
            });
        }
    };
    let concept = get_concept_by_id(db, concept_id)
        .await?
        .ok_or(Error::ConceptNotFound { id: concept_id })?;
    due.amount = Set(concept.suggested_amount);
    Ok(())
}

async fn find_due_for_period<C>(
    db: &C,
    month: i32,
    year: i32,
    concept_id: i64,
) -> Result<Option<due::Model>>
where
    C: ConnectionTrait,
{
    Due::find()
        .filter(due::Column::Month.eq(month))
        .filter(due::Column::Year.eq(year))
        .filter(due::Column::ConceptId.eq(concept_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Creates the due of `concept_id` for one period.
///
/// # Errors
/// - `Error::InvalidPeriod` for a month outside 1-12
/// - `Error::ConceptNotFound` if the concept does not exist
/// - `Error::DuplicateDue` if the period already has a due for this concept
pub async fn create_due<C>(db: &C, concept_id: i64, month: i32, year: i32) -> Result<due::Model>
where
    C: ConnectionTrait,
{
    validate_period(month, year)?;
    let code = period_code(month, year);

    if find_due_for_period(db, month, year, concept_id)
        .await?
        .is_some()
    {
        return Err(Error::DuplicateDue { code, concept_id });
    }

    let mut active = due::ActiveModel {
        month: Set(month),
        year: Set(year),
        code: Set(code),
        concept_id: Set(concept_id),
        active: Set(true),
        ..Default::default()
    };
    sync_amount(db, &mut active).await?;
    active.insert(db).await.map_err(Into::into)
}

/// Finds a due by id.
pub async fn get_due_by_id<C>(db: &C, due_id: i64) -> Result<Option<due::Model>>
where
    C: ConnectionTrait,
{
    Due::find_by_id(due_id).one(db).await.map_err(Into::into)
}

/// Updates a due, re-deriving its code and re-syncing its amount.
pub async fn update_due(
    db: &DatabaseConnection,
    due_id: i64,
    changes: DueUpdate,
) -> Result<due::Model> {
    let due = get_due_by_id(db, due_id)
        .await?
        .ok_or(Error::DueNotFound { id: due_id })?;

    let month = changes.month.unwrap_or(due.month);
    let year = changes.year.unwrap_or(due.year);
    let concept_id = changes.concept_id.unwrap_or(due.concept_id);
    validate_period(month, year)?;

    let collision = find_due_for_period(db, month, year, concept_id).await?;
    if collision.is_some_and(|other| other.id != due_id) {
        return Err(Error::DuplicateDue {
            code: period_code(month, year),
            concept_id,
        });
    }

    let mut active: due::ActiveModel = due.into();
    active.month = Set(month);
    active.year = Set(year);
    active.code = Set(period_code(month, year));
    active.concept_id = Set(concept_id);
    if let Some(flag) = changes.active {
        active.active = Set(flag);
    }
    sync_amount(db, &mut active).await?;
    active.update(db).await.map_err(Into::into)
}

/// Creates the twelve monthly dues of `year` for one concept or for every
/// active concept. Periods that already have a due are counted and skipped.
pub async fn generate_dues_for_year(
    db: &DatabaseConnection,
    year: i32,
    concept_id: Option<i64>,
) -> Result<GenerationReport> {
    validate_period(1, year)?;
    let concepts = match concept_id {
        Some(id) => vec![
            get_concept_by_id(db, id)
                .await?
                .ok_or(Error::ConceptNotFound { id })?,
        ],
        None => list_active_concepts(db).await?,
    };

    let mut report = GenerationReport {
        concepts: concepts.len(),
        ..Default::default()
    };
    for concept in &concepts {
        for month in 1..=12 {
            if find_due_for_period(db, month, year, concept.id)
                .await?
                .is_some()
            {
                report.existing += 1;
            } else {
                create_due(db, concept.id, month, year).await?;
                report.created += 1;
            }
        }
    }

    info!(
        "Generated dues for {}: {} created, {} existing, {} concepts",
        year, report.created, report.existing, report.concepts
    );
    Ok(report)
}

/// Amount a member has paid toward a due so far.
///
/// Sums the cash and balance of the member's settlements on the due
/// (multi-due payments) and the gross amounts of the member's single-due
/// payments that reference it directly.
pub async fn paid_amount<C>(db: &C, member_id: i64, due_id: i64) -> Result<Decimal>
where
    C: ConnectionTrait,
{
    let paid = paid_amounts(db, member_id).await?;
    Ok(paid.get(&due_id).copied().unwrap_or(Decimal::ZERO))
}

/// Paid amount per due for one member.
pub async fn paid_amounts<C>(db: &C, member_id: i64) -> Result<HashMap<i64, Decimal>>
where
    C: ConnectionTrait,
{
    let mut paid: HashMap<i64, Decimal> = HashMap::new();

    let direct = Payment::find()
        .filter(payment::Column::MemberId.eq(member_id))
        .filter(payment::Column::DueId.is_not_null())
        .all(db)
        .await?;
    for payment in direct {
        if let Some(due_id) = payment.due_id {
            *paid.entry(due_id).or_default() += payment.amount;
        }
    }

    let settled = Settlement::find()
        .join(JoinType::InnerJoin, settlement::Relation::Payment.def())
        .filter(payment::Column::MemberId.eq(member_id))
        .all(db)
        .await?;
    for settlement in settled {
        *paid.entry(settlement.due_id).or_default() +=
            settlement.amount_applied + settlement.balance_applied;
    }

    Ok(paid)
}

/// Active dues the member has not fully paid, oldest period first.
pub async fn get_available_dues<C>(db: &C, member_id: i64) -> Result<Vec<due::Model>>
where
    C: ConnectionTrait,
{
    let paid = paid_amounts(db, member_id).await?;
    let dues = Due::find()
        .filter(due::Column::Active.eq(true))
        .order_by_asc(due::Column::Year)
        .order_by_asc(due::Column::Month)
        .order_by_asc(due::Column::ConceptId)
        .order_by_asc(due::Column::Id)
        .all(db)
        .await?;

    Ok(dues
        .into_iter()
        .filter(|due| paid.get(&due.id).copied().unwrap_or(Decimal::ZERO) < due.amount)
        .collect())
}

/// Dues whose stored amount differs from their concept's suggested amount.
pub async fn stale_dues<C>(db: &C) -> Result<Vec<StaleDue>>
where
    C: ConnectionTrait,
{
    let rows = Due::find().find_also_related(Concept).all(db).await?;
    let stale: Vec<StaleDue> = rows
        .into_iter()
        .filter_map(|(due, concept)| {
            let concept = concept?;
            (due.amount != concept.suggested_amount).then_some(StaleDue {
                due,
                concept_amount: concept.suggested_amount,
            })
        })
        .collect();

    if !stale.is_empty() {
        warn!("{} dues differ from their concept amount", stale.len());
    }
    Ok(stale)
}
