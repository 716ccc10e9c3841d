//! Transfer approval rules.
//!
//! A rule matches a transfer when all of its conditions hold. On submit the
//! first active rule by ascending priority wins and one PENDING record per
//! level is opened; the rule's mode decides in which order levels may be
//! approved.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::stock_transfer::{self, TransferStatus};
use crate::entities::transfer_approval_condition::{self as condition, ConditionType};
use crate::entities::transfer_approval_level as level;
use crate::entities::transfer_approval_record::{self as record, ApprovalRecordStatus};
use crate::entities::transfer_approval_rule::{self as rule, ApprovalMode};
use crate::entities::{branch, product, role, stock_transfer_item, tenant_membership};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{self, AuditEntry};
use crate::services::transfers::{self, TransferDetail};

fn default_priority() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConditionInput {
    pub condition_type: ConditionType,
    pub threshold: Option<i64>,
    pub branch_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LevelInput {
    pub level: i32,
    pub name: Option<String>,
    pub required_role_id: Option<Uuid>,
    pub required_user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RuleInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub approval_mode: ApprovalMode,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub conditions: Vec<ConditionInput>,
    pub levels: Vec<LevelInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LevelDecision {
    pub notes: Option<String>,
}

/// A rule with its conditions and levels.
#[derive(Debug, Clone, Serialize)]
pub struct RuleDetail {
    #[serde(flatten)]
    pub rule: rule::Model,
    pub conditions: Vec<condition::Model>,
    pub levels: Vec<level::Model>,
}

/// The transfer attributes conditions are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFacts {
    pub source_branch_id: Uuid,
    pub destination_branch_id: Uuid,
    pub total_qty: i64,
    pub total_value_cents: i64,
}

pub fn condition_holds(cond: &condition::Model, facts: &TransferFacts) -> bool {
    match cond.condition_type {
        ConditionType::TotalQtyThreshold => cond.threshold.is_some_and(|t| facts.total_qty >= t),
        ConditionType::TotalValueThreshold => {
            cond.threshold.is_some_and(|t| facts.total_value_cents >= t)
        }
        ConditionType::SourceBranch => cond.branch_id == Some(facts.source_branch_id),
        ConditionType::DestinationBranch => cond.branch_id == Some(facts.destination_branch_id),
    }
}

/// First active rule, by ascending priority, whose conditions all hold.
/// Ties on priority go to the older rule.
pub fn select_rule<'a>(rules: &'a [RuleDetail], facts: &TransferFacts) -> Option<&'a RuleDetail> {
    let mut candidates: Vec<&RuleDetail> = rules.iter().filter(|r| r.rule.is_active).collect();
    candidates.sort_by(|a, b| {
        a.rule
            .priority
            .cmp(&b.rule.priority)
            .then(a.rule.created_at.cmp(&b.rule.created_at))
            .then(a.rule.id.cmp(&b.rule.id))
    });
    candidates.into_iter().find(|r| {
        !r.conditions.is_empty() && r.conditions.iter().all(|c| condition_holds(c, facts))
    })
}

/// Checks whether `level` may be approved now given the other levels'
/// statuses.
pub fn level_gate(
    mode: ApprovalMode,
    statuses: &[(i32, ApprovalRecordStatus)],
    level: i32,
) -> Result<(), String> {
    let blocking = |lower: &(i32, ApprovalRecordStatus)| lower.1 != ApprovalRecordStatus::Approved;
    match mode {
        ApprovalMode::Parallel => Ok(()),
        ApprovalMode::Sequential => match statuses
            .iter()
            .filter(|(l, _)| *l < level)
            .find(|s| blocking(s))
        {
            Some((l, _)) => Err(format!("level {} must be approved before level {}", l, level)),
            None => Ok(()),
        },
        ApprovalMode::Hybrid => {
            if level == 1 {
                return Ok(());
            }
            match statuses.iter().find(|(l, _)| *l == 1) {
                Some(first) if blocking(first) => {
                    Err(format!("level 1 must be approved before level {}", level))
                }
                _ => Ok(()),
            }
        }
    }
}

/// The actor is the level's named user or holds its role.
pub fn can_decide(rec: &record::Model, user_id: Uuid, role_id: Uuid) -> bool {
    rec.required_user_id == Some(user_id) || rec.required_role_id == Some(role_id)
}

/// Shape checks that need no database.
fn check_rule_shape(input: &RuleInput) -> Result<(), ServiceError> {
    if input.conditions.is_empty() {
        return Err(ServiceError::ValidationError(
            "a rule needs at least one condition".into(),
        ));
    }
    for cond in &input.conditions {
        match cond.condition_type {
            ConditionType::TotalQtyThreshold | ConditionType::TotalValueThreshold => {
                if !cond.threshold.is_some_and(|t| t >= 0) || cond.branch_id.is_some() {
                    return Err(ServiceError::ValidationError(format!(
                        "{:?} needs a non-negative threshold and no branch",
                        cond.condition_type
                    )));
                }
            }
            ConditionType::SourceBranch | ConditionType::DestinationBranch => {
                if cond.branch_id.is_none() || cond.threshold.is_some() {
                    return Err(ServiceError::ValidationError(format!(
                        "{:?} needs a branch_id and no threshold",
                        cond.condition_type
                    )));
                }
            }
        }
    }

    if input.levels.is_empty() {
        return Err(ServiceError::ValidationError(
            "a rule needs at least one level".into(),
        ));
    }
    let mut numbers: Vec<i32> = input.levels.iter().map(|l| l.level).collect();
    numbers.sort_unstable();
    if numbers.iter().enumerate().any(|(idx, n)| *n != idx as i32 + 1) {
        return Err(ServiceError::ValidationError(
            "levels must be numbered 1..n without gaps".into(),
        ));
    }
    for lvl in &input.levels {
        if lvl.required_role_id.is_some() == lvl.required_user_id.is_some() {
            return Err(ServiceError::ValidationError(format!(
                "level {} must name exactly one of required_role_id or required_user_id",
                lvl.level
            )));
        }
    }
    Ok(())
}

/// Sums requested quantities and their value at current prices.
pub(crate) async fn transfer_facts<C: ConnectionTrait>(
    conn: &C,
    transfer: &stock_transfer::Model,
    items: &[stock_transfer_item::Model],
) -> Result<TransferFacts, ServiceError> {
    let prices: HashMap<Uuid, i64> = product::Entity::find()
        .filter(product::Column::TenantId.eq(transfer.tenant_id))
        .filter(product::Column::Id.is_in(items.iter().map(|i| i.product_id)))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p.price_cents))
        .collect();

    let too_large = || ServiceError::ValidationError("transfer total is too large".into());
    let mut total_qty = 0i64;
    let mut total_value_cents = 0i64;
    for item in items {
        let price = prices.get(&item.product_id).copied().unwrap_or(0);
        let value = item.qty_requested.checked_mul(price).ok_or_else(too_large)?;
        total_qty = total_qty.checked_add(item.qty_requested).ok_or_else(too_large)?;
        total_value_cents = total_value_cents.checked_add(value).ok_or_else(too_large)?;
    }

    Ok(TransferFacts {
        source_branch_id: transfer.source_branch_id,
        destination_branch_id: transfer.destination_branch_id,
        total_qty,
        total_value_cents,
    })
}

async fn load_rules<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    rule_id: Option<Uuid>,
) -> Result<Vec<RuleDetail>, ServiceError> {
    let mut query = rule::Entity::find()
        .filter(rule::Column::TenantId.eq(tenant_id))
        .order_by_asc(rule::Column::Priority)
        .order_by_asc(rule::Column::CreatedAt);
    if let Some(id) = rule_id {
        query = query.filter(rule::Column::Id.eq(id));
    }
    let rules = query.all(conn).await?;
    let ids: Vec<Uuid> = rules.iter().map(|r| r.id).collect();

    let mut conditions: HashMap<Uuid, Vec<condition::Model>> = HashMap::new();
    for cond in condition::Entity::find()
        .filter(condition::Column::RuleId.is_in(ids.clone()))
        .all(conn)
        .await?
    {
        conditions.entry(cond.rule_id).or_default().push(cond);
    }
    let mut levels: HashMap<Uuid, Vec<level::Model>> = HashMap::new();
    for lvl in level::Entity::find()
        .filter(level::Column::RuleId.is_in(ids))
        .order_by_asc(level::Column::Level)
        .all(conn)
        .await?
    {
        levels.entry(lvl.rule_id).or_default().push(lvl);
    }

    Ok(rules
        .into_iter()
        .map(|r| RuleDetail {
            conditions: conditions.remove(&r.id).unwrap_or_default(),
            levels: levels.remove(&r.id).unwrap_or_default(),
            rule: r,
        })
        .collect())
}

/// Evaluates the tenant's rules against a transfer.
pub(crate) async fn match_rule<C: ConnectionTrait>(
    conn: &C,
    transfer: &stock_transfer::Model,
    items: &[stock_transfer_item::Model],
) -> Result<Option<RuleDetail>, ServiceError> {
    let facts = transfer_facts(conn, transfer, items).await?;
    let rules = load_rules(conn, transfer.tenant_id, None).await?;
    Ok(select_rule(&rules, &facts).cloned())
}

/// Opens one PENDING record per level of `rule`.
pub(crate) async fn open_records<C: ConnectionTrait>(
    conn: &C,
    transfer_id: Uuid,
    rule: &RuleDetail,
) -> Result<Vec<record::Model>, ServiceError> {
    let now = Utc::now();
    let mut records = Vec::with_capacity(rule.levels.len());
    for lvl in &rule.levels {
        records.push(
            record::ActiveModel {
                id: Set(Uuid::new_v4()),
                transfer_id: Set(transfer_id),
                rule_id: Set(rule.rule.id),
                level: Set(lvl.level),
                approval_mode: Set(rule.rule.approval_mode),
                required_role_id: Set(lvl.required_role_id),
                required_user_id: Set(lvl.required_user_id),
                status: Set(ApprovalRecordStatus::Pending),
                acted_by: Set(None),
                acted_at: Set(None),
                notes: Set(None),
                created_at: Set(now),
            }
            .insert(conn)
            .await?,
        );
    }
    Ok(records)
}

/// Marks every still-PENDING record of a transfer SKIPPED.
pub(crate) async fn skip_pending<C: ConnectionTrait>(conn: &C, transfer_id: Uuid) -> Result<u64, ServiceError> {
    let result = record::Entity::update_many()
        .col_expr(
            record::Column::Status,
            sea_orm::sea_query::Expr::value(ApprovalRecordStatus::Skipped),
        )
        .filter(record::Column::TransferId.eq(transfer_id))
        .filter(record::Column::Status.eq(ApprovalRecordStatus::Pending))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Approval rule management and level decisions.
#[derive(Clone)]
pub struct ApprovalService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ApprovalService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list_rules(&self, tenant_id: Uuid) -> Result<Vec<RuleDetail>, ServiceError> {
        load_rules(self.db.as_ref(), tenant_id, None).await
    }

    #[instrument(skip(self))]
    pub async fn get_rule(&self, tenant_id: Uuid, rule_id: Uuid) -> Result<RuleDetail, ServiceError> {
        load_rules(self.db.as_ref(), tenant_id, Some(rule_id))
            .await?
            .pop()
            .ok_or_else(|| ServiceError::not_found("Approval rule", rule_id))
    }

    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn create_rule(&self, actor: &AuthUser, input: RuleInput) -> Result<RuleDetail, ServiceError> {
        input.validate()?;
        check_rule_shape(&input)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin create-rule transaction");
            ServiceError::DatabaseError(e)
        })?;

        check_references(&txn, actor.tenant_id, &input).await?;

        let now = Utc::now();
        let created = rule::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description.clone()),
            approval_mode: Set(input.approval_mode),
            priority: Set(input.priority),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let detail = write_parts(&txn, created, &input).await?;
        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "approval_rule", detail.rule.id, "approval_rule.create")
                .after(&detail),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit create-rule");
            ServiceError::DatabaseError(e)
        })?;

        info!(rule_id = %detail.rule.id, priority = detail.rule.priority, "approval rule created");
        Ok(detail)
    }

    /// Replaces a rule's fields, conditions and levels.
    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn update_rule(
        &self,
        actor: &AuthUser,
        rule_id: Uuid,
        input: RuleInput,
    ) -> Result<RuleDetail, ServiceError> {
        input.validate()?;
        check_rule_shape(&input)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin update-rule transaction");
            ServiceError::DatabaseError(e)
        })?;

        let before = load_rules(&txn, actor.tenant_id, Some(rule_id))
            .await?
            .pop()
            .ok_or_else(|| ServiceError::not_found("Approval rule", rule_id))?;
        check_references(&txn, actor.tenant_id, &input).await?;

        let mut active: rule::ActiveModel = before.rule.clone().into();
        active.name = Set(input.name.trim().to_string());
        active.description = Set(input.description.clone());
        active.approval_mode = Set(input.approval_mode);
        active.priority = Set(input.priority);
        active.is_active = Set(input.is_active);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        condition::Entity::delete_many()
            .filter(condition::Column::RuleId.eq(rule_id))
            .exec(&txn)
            .await?;
        level::Entity::delete_many()
            .filter(level::Column::RuleId.eq(rule_id))
            .exec(&txn)
            .await?;
        let detail = write_parts(&txn, updated, &input).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "approval_rule", rule_id, "approval_rule.update")
                .before(&before)
                .after(&detail),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit update-rule");
            ServiceError::DatabaseError(e)
        })?;

        info!(rule_id = %rule_id, "approval rule updated");
        Ok(detail)
    }

    /// Deletes a rule no transfer has used; used rules can only be
    /// deactivated.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn delete_rule(&self, actor: &AuthUser, rule_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin delete-rule transaction");
            ServiceError::DatabaseError(e)
        })?;

        let before = load_rules(&txn, actor.tenant_id, Some(rule_id))
            .await?
            .pop()
            .ok_or_else(|| ServiceError::not_found("Approval rule", rule_id))?;

        let used = stock_transfer::Entity::find()
            .filter(stock_transfer::Column::TenantId.eq(actor.tenant_id))
            .filter(stock_transfer::Column::ApprovalRuleId.eq(rule_id))
            .count(&txn)
            .await?;
        if used > 0 {
            return Err(ServiceError::Conflict(format!(
                "Approval rule is referenced by {} transfer(s); deactivate it instead",
                used
            )));
        }

        condition::Entity::delete_many()
            .filter(condition::Column::RuleId.eq(rule_id))
            .exec(&txn)
            .await?;
        level::Entity::delete_many()
            .filter(level::Column::RuleId.eq(rule_id))
            .exec(&txn)
            .await?;
        rule::Entity::delete_by_id(rule_id).exec(&txn).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "approval_rule", rule_id, "approval_rule.delete")
                .before(&before),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit delete-rule");
            ServiceError::DatabaseError(e)
        })?;

        info!(rule_id = %rule_id, "approval rule deleted");
        Ok(())
    }

    /// Preview: which rule would govern this transfer if it were submitted
    /// now.
    #[instrument(skip(self))]
    pub async fn evaluate(&self, tenant_id: Uuid, transfer_id: Uuid) -> Result<Option<RuleDetail>, ServiceError> {
        let db = self.db.as_ref();
        let transfer = transfers::find_transfer(db, tenant_id, transfer_id).await?;
        let items = transfers::load_items(db, transfer.id).await?;
        match_rule(db, &transfer, &items).await
    }

    /// Approves one level. Once every level is approved the transfer moves
    /// to APPROVED for the full requested quantities.
    #[instrument(skip(self, actor, decision), fields(actor_id = %actor.user_id))]
    pub async fn approve_level(
        &self,
        actor: &AuthUser,
        transfer_id: Uuid,
        level_no: i32,
        decision: LevelDecision,
    ) -> Result<TransferDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin approve-level transaction");
            ServiceError::DatabaseError(e)
        })?;

        let transfer = transfers::locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        let (records, current) = decidable_record(&txn, actor, &transfer, level_no).await?;

        let statuses: Vec<(i32, ApprovalRecordStatus)> = records.iter().map(|r| (r.level, r.status)).collect();
        level_gate(current.approval_mode, &statuses, level_no).map_err(ServiceError::Conflict)?;

        let now = Utc::now();
        let mut active: record::ActiveModel = current.into();
        active.status = Set(ApprovalRecordStatus::Approved);
        active.acted_by = Set(Some(actor.user_id));
        active.acted_at = Set(Some(now));
        active.notes = Set(decision.notes.clone());
        active.update(&txn).await?;

        let all_approved = records
            .iter()
            .all(|r| r.level == level_no || r.status == ApprovalRecordStatus::Approved);

        let mut status_change = None;
        if all_approved {
            let from = transfer.status;
            let approved = transfers::transition(&txn, transfer, TransferStatus::Approved, |am| {
                am.reviewed_by = Set(Some(actor.user_id));
                am.reviewed_at = Set(Some(now));
            })
            .await?;
            transfers::approve_requested_quantities(&txn, approved.id).await?;
            status_change = Some((from, approved.status));
        }

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "stock_transfer", transfer_id, "transfer.approve_level")
                .after(&json!({
                    "level": level_no,
                    "notes": decision.notes,
                    "transfer_approved": all_approved,
                })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit approve-level");
            ServiceError::DatabaseError(e)
        })?;

        info!(transfer_id = %transfer_id, level = level_no, all_approved, "approval level approved");
        self.event_sender
            .publish(Event::ApprovalLevelDecided {
                tenant_id: actor.tenant_id,
                transfer_id,
                level: level_no,
                status: "APPROVED".into(),
            });
        if let Some((from, to)) = status_change {
            transfers::publish_status(&self.event_sender, actor.tenant_id, transfer_id, Some(from), to);
        }

        transfers::load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }

    /// Rejects one level, which rejects the transfer and skips the
    /// remaining pending levels.
    #[instrument(skip(self, actor, decision), fields(actor_id = %actor.user_id))]
    pub async fn reject_level(
        &self,
        actor: &AuthUser,
        transfer_id: Uuid,
        level_no: i32,
        decision: LevelDecision,
    ) -> Result<TransferDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin reject-level transaction");
            ServiceError::DatabaseError(e)
        })?;

        let transfer = transfers::locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        let (_, current) = decidable_record(&txn, actor, &transfer, level_no).await?;

        let now = Utc::now();
        let mut active: record::ActiveModel = current.into();
        active.status = Set(ApprovalRecordStatus::Rejected);
        active.acted_by = Set(Some(actor.user_id));
        active.acted_at = Set(Some(now));
        active.notes = Set(decision.notes.clone());
        active.update(&txn).await?;

        let skipped = skip_pending(&txn, transfer_id).await?;

        let from = transfer.status;
        let notes = decision.notes.clone();
        transfers::transition(&txn, transfer, TransferStatus::Rejected, |am| {
            am.reviewed_by = Set(Some(actor.user_id));
            am.reviewed_at = Set(Some(now));
            am.review_notes = Set(notes);
        })
        .await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "stock_transfer", transfer_id, "transfer.reject_level")
                .after(&json!({
                    "level": level_no,
                    "notes": decision.notes,
                    "skipped_levels": skipped,
                })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit reject-level");
            ServiceError::DatabaseError(e)
        })?;

        warn!(transfer_id = %transfer_id, level = level_no, "transfer rejected at approval level");
        self.event_sender
            .publish(Event::ApprovalLevelDecided {
                tenant_id: actor.tenant_id,
                transfer_id,
                level: level_no,
                status: "REJECTED".into(),
            });
        transfers::publish_status(
            &self.event_sender,
            actor.tenant_id,
            transfer_id,
            Some(from),
            TransferStatus::Rejected,
        );

        transfers::load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }
}

/// Loads the transfer's records and the PENDING record for `level_no` the
/// actor may decide.
async fn decidable_record<C: ConnectionTrait>(
    conn: &C,
    actor: &AuthUser,
    transfer: &stock_transfer::Model,
    level_no: i32,
) -> Result<(Vec<record::Model>, record::Model), ServiceError> {
    if transfer.status != TransferStatus::Requested {
        return Err(ServiceError::InvalidStatus(format!(
            "Transfer {} is {}, not REQUESTED",
            transfer.transfer_number, transfer.status
        )));
    }

    let records = record::Entity::find()
        .filter(record::Column::TransferId.eq(transfer.id))
        .order_by_asc(record::Column::Level)
        .all(conn)
        .await?;
    if records.is_empty() {
        return Err(ServiceError::Conflict(format!(
            "Transfer {} has no approval levels; review it directly",
            transfer.transfer_number
        )));
    }

    let current = records
        .iter()
        .find(|r| r.level == level_no)
        .cloned()
        .ok_or_else(|| ServiceError::NotFound(format!("Approval level {} not found", level_no)))?;
    if current.status != ApprovalRecordStatus::Pending {
        return Err(ServiceError::Conflict(format!(
            "Approval level {} is already decided",
            level_no
        )));
    }
    if !can_decide(&current, actor.user_id, actor.role_id) {
        return Err(ServiceError::Forbidden(format!(
            "Not an approver for level {}",
            level_no
        )));
    }

    Ok((records, current))
}

/// Branches, roles and users named by a rule must belong to the tenant.
async fn check_references<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    input: &RuleInput,
) -> Result<(), ServiceError> {
    for branch_id in input.conditions.iter().filter_map(|c| c.branch_id) {
        let found = branch::Entity::find_by_id(branch_id)
            .filter(branch::Column::TenantId.eq(tenant_id))
            .count(conn)
            .await?;
        if found == 0 {
            return Err(ServiceError::ValidationError(format!(
                "Unknown branch {}",
                branch_id
            )));
        }
    }
    for lvl in &input.levels {
        if let Some(role_id) = lvl.required_role_id {
            let found = role::Entity::find_by_id(role_id)
                .filter(role::Column::TenantId.eq(tenant_id))
                .count(conn)
                .await?;
            if found == 0 {
                return Err(ServiceError::ValidationError(format!("Unknown role {}", role_id)));
            }
        }
        if let Some(user_id) = lvl.required_user_id {
            let found = tenant_membership::Entity::find()
                .filter(tenant_membership::Column::TenantId.eq(tenant_id))
                .filter(tenant_membership::Column::UserId.eq(user_id))
                .count(conn)
                .await?;
            if found == 0 {
                return Err(ServiceError::ValidationError(format!(
                    "User {} is not a member of this tenant",
                    user_id
                )));
            }
        }
    }
    Ok(())
}

async fn write_parts<C: ConnectionTrait>(
    conn: &C,
    rule: rule::Model,
    input: &RuleInput,
) -> Result<RuleDetail, ServiceError> {
    let mut conditions = Vec::with_capacity(input.conditions.len());
    for cond in &input.conditions {
        conditions.push(
            condition::ActiveModel {
                id: Set(Uuid::new_v4()),
                rule_id: Set(rule.id),
                condition_type: Set(cond.condition_type),
                threshold: Set(cond.threshold),
                branch_id: Set(cond.branch_id),
            }
            .insert(conn)
            .await?,
        );
    }

    let mut ordered: Vec<&LevelInput> = input.levels.iter().collect();
    ordered.sort_by_key(|l| l.level);
    let mut levels = Vec::with_capacity(ordered.len());
    for lvl in ordered {
        levels.push(
            level::ActiveModel {
                id: Set(Uuid::new_v4()),
                rule_id: Set(rule.id),
                level: Set(lvl.level),
                name: Set(lvl.name.clone()),
                required_role_id: Set(lvl.required_role_id),
                required_user_id: Set(lvl.required_user_id),
            }
            .insert(conn)
            .await?,
        );
    }

    Ok(RuleDetail {
        rule,
        conditions,
        levels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;
    use crate::entities::transfer_approval_record::ApprovalRecordStatus::*;

    fn facts(total_qty: i64, total_value_cents: i64) -> TransferFacts {
        TransferFacts {
            source_branch_id: Uuid::from_u128(1),
            destination_branch_id: Uuid::from_u128(2),
            total_qty,
            total_value_cents,
        }
    }

    fn cond(condition_type: ConditionType, threshold: Option<i64>, branch: Option<u128>) -> condition::Model {
        condition::Model {
            id: Uuid::new_v4(),
            rule_id: Uuid::nil(),
            condition_type,
            threshold,
            branch_id: branch.map(Uuid::from_u128),
        }
    }

    fn detail(priority: i32, age_minutes: i64, active: bool, conditions: Vec<condition::Model>) -> RuleDetail {
        let now = Utc::now();
        RuleDetail {
            rule: rule::Model {
                id: Uuid::new_v4(),
                tenant_id: Uuid::nil(),
                name: format!("p{}", priority),
                description: None,
                approval_mode: ApprovalMode::Sequential,
                priority,
                is_active: active,
                created_at: now - Duration::minutes(age_minutes),
                updated_at: now,
            },
            conditions,
            levels: vec![],
        }
    }

    #[rstest]
    #[case(ConditionType::TotalQtyThreshold, Some(10), None, 10, 0, true)]
    #[case(ConditionType::TotalQtyThreshold, Some(10), None, 9, 0, false)]
    #[case(ConditionType::TotalValueThreshold, Some(5_000), None, 1, 5_000, true)]
    #[case(ConditionType::TotalValueThreshold, Some(5_000), None, 1, 4_999, false)]
    #[case(ConditionType::SourceBranch, None, Some(1), 1, 0, true)]
    #[case(ConditionType::SourceBranch, None, Some(2), 1, 0, false)]
    #[case(ConditionType::DestinationBranch, None, Some(2), 1, 0, true)]
    fn conditions_evaluate(
        #[case] kind: ConditionType,
        #[case] threshold: Option<i64>,
        #[case] branch: Option<u128>,
        #[case] qty: i64,
        #[case] value: i64,
        #[case] expected: bool,
    ) {
        assert_eq!(condition_holds(&cond(kind, threshold, branch), &facts(qty, value)), expected);
    }

    #[test]
    fn lowest_priority_matching_active_rule_wins() {
        let rules = vec![
            detail(50, 0, true, vec![cond(ConditionType::TotalQtyThreshold, Some(1_000), None)]),
            detail(10, 0, false, vec![cond(ConditionType::TotalQtyThreshold, Some(1), None)]),
            detail(20, 0, true, vec![cond(ConditionType::TotalQtyThreshold, Some(5), None)]),
            detail(30, 0, true, vec![cond(ConditionType::TotalQtyThreshold, Some(1), None)]),
        ];
        let chosen = select_rule(&rules, &facts(10, 0)).unwrap();
        assert_eq!(chosen.rule.priority, 20);
    }

    #[test]
    fn all_conditions_must_hold() {
        let rules = vec![detail(
            1,
            0,
            true,
            vec![
                cond(ConditionType::TotalQtyThreshold, Some(1), None),
                cond(ConditionType::SourceBranch, None, Some(99)),
            ],
        )];
        assert!(select_rule(&rules, &facts(10, 0)).is_none());
    }

    #[test]
    fn equal_priority_goes_to_older_rule() {
        let rules = vec![
            detail(5, 1, true, vec![cond(ConditionType::TotalQtyThreshold, Some(1), None)]),
            detail(5, 60, true, vec![cond(ConditionType::TotalQtyThreshold, Some(1), None)]),
        ];
        let chosen = select_rule(&rules, &facts(3, 0)).unwrap();
        assert_eq!(chosen.rule.id, rules[1].rule.id);
    }

    #[rstest]
    #[case(ApprovalMode::Sequential, &[(1, Pending), (2, Pending)], 2, false)]
    #[case(ApprovalMode::Sequential, &[(1, Approved), (2, Pending), (3, Pending)], 2, true)]
    #[case(ApprovalMode::Sequential, &[(1, Approved), (2, Pending), (3, Pending)], 3, false)]
    #[case(ApprovalMode::Parallel, &[(1, Pending), (2, Pending), (3, Pending)], 3, true)]
    #[case(ApprovalMode::Hybrid, &[(1, Pending), (2, Pending), (3, Pending)], 1, true)]
    #[case(ApprovalMode::Hybrid, &[(1, Pending), (2, Pending), (3, Pending)], 3, false)]
    #[case(ApprovalMode::Hybrid, &[(1, Approved), (2, Pending), (3, Pending)], 3, true)]
    fn mode_gating(
        #[case] mode: ApprovalMode,
        #[case] statuses: &[(i32, ApprovalRecordStatus)],
        #[case] level: i32,
        #[case] allowed: bool,
    ) {
        assert_eq!(level_gate(mode, statuses, level).is_ok(), allowed);
    }

    #[test]
    fn rule_shape_is_checked() {
        let base = RuleInput {
            name: "big moves".into(),
            description: None,
            approval_mode: ApprovalMode::Sequential,
            priority: 1,
            is_active: true,
            conditions: vec![ConditionInput {
                condition_type: ConditionType::TotalQtyThreshold,
                threshold: Some(10),
                branch_id: None,
            }],
            levels: vec![LevelInput {
                level: 1,
                name: None,
                required_role_id: Some(Uuid::new_v4()),
                required_user_id: None,
            }],
        };
        assert!(check_rule_shape(&base).is_ok());

        let mut no_conditions = base.clone();
        no_conditions.conditions.clear();
        assert!(check_rule_shape(&no_conditions).is_err());

        let mut gap = base.clone();
        gap.levels[0].level = 2;
        assert!(check_rule_shape(&gap).is_err());

        let mut both = base.clone();
        both.levels[0].required_user_id = Some(Uuid::new_v4());
        assert!(check_rule_shape(&both).is_err());

        let mut branchless = base;
        branchless.conditions[0].condition_type = ConditionType::SourceBranch;
        assert!(check_rule_shape(&branchless).is_err());
    }
}
