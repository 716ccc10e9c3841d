use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{consts as perm, AuthUser};
use crate::entities::stock_ledger::LedgerKind;
use crate::entities::stock_transfer::{self, TransferStatus};
use crate::entities::stock_transfer_item;
use crate::entities::transfer_approval_record as record;
use crate::entities::tenant;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::approvals;
use crate::services::audit::{self, AuditEntry};
use crate::services::branches::find_branch;
use crate::services::fifo::weighted_unit_cost;
use crate::services::stock::{self, Movement, REFERENCE_TRANSFER};
use crate::services::{for_update, Page, PageRequest};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ItemInput {
    pub product_id: Uuid,
    pub qty: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTransfer {
    pub source_branch_id: Uuid,
    pub destination_branch_id: Uuid,
    pub items: Vec<ItemInput>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    /// Submit straight away instead of leaving a draft.
    #[serde(default)]
    pub submit: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateItems {
    pub items: Vec<ItemInput>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApprovedQty {
    pub product_id: Uuid,
    pub qty_approved: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    pub decision: ReviewDecision,
    pub notes: Option<String>,
    /// Per-product approved quantities; unlisted items are approved in full.
    #[serde(default)]
    pub items: Vec<ApprovedQty>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cancel {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiveLine {
    pub product_id: Uuid,
    pub qty: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Receive {
    pub items: Vec<ReceiveLine>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Reverse {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferFilter {
    pub status: Option<TransferStatus>,
    pub branch_id: Option<Uuid>,
    pub direction: Option<Direction>,
}

/// A transfer with its items and approval records.
#[derive(Debug, Clone, Serialize)]
pub struct TransferDetail {
    #[serde(flatten)]
    pub transfer: stock_transfer::Model,
    pub items: Vec<stock_transfer_item::Model>,
    pub approvals: Vec<record::Model>,
}

/// `TRF-{year}-{seq:05}`.
pub fn format_transfer_number(year: i32, seq: i64) -> String {
    format!("TRF-{}-{:05}", year, seq)
}

/// Item lists must be non-empty, positive and free of duplicate products.
pub fn check_items(items: &[ItemInput]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "a transfer needs at least one item".into(),
        ));
    }
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if item.qty <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be positive",
                item.product_id
            )));
        }
        if !seen.insert(item.product_id) {
            return Err(ServiceError::ValidationError(format!(
                "product {} appears more than once",
                item.product_id
            )));
        }
    }
    Ok(())
}

pub(crate) async fn find_transfer<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    transfer_id: Uuid,
) -> Result<stock_transfer::Model, ServiceError> {
    stock_transfer::Entity::find_by_id(transfer_id)
        .filter(stock_transfer::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Transfer", transfer_id))
}

/// Loads a transfer with a row lock on Postgres.
pub(crate) async fn locked_transfer<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    transfer_id: Uuid,
) -> Result<stock_transfer::Model, ServiceError> {
    let select = stock_transfer::Entity::find_by_id(transfer_id)
        .filter(stock_transfer::Column::TenantId.eq(tenant_id));
    for_update(conn, select)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Transfer", transfer_id))
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    transfer_id: Uuid,
) -> Result<Vec<stock_transfer_item::Model>, ServiceError> {
    Ok(stock_transfer_item::Entity::find()
        .filter(stock_transfer_item::Column::TransferId.eq(transfer_id))
        .order_by_asc(stock_transfer_item::Column::CreatedAt)
        .order_by_asc(stock_transfer_item::Column::Id)
        .all(conn)
        .await?)
}

pub(crate) async fn load_detail<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    transfer_id: Uuid,
) -> Result<TransferDetail, ServiceError> {
    let transfer = find_transfer(conn, tenant_id, transfer_id).await?;
    let items = load_items(conn, transfer.id).await?;
    let approvals = record::Entity::find()
        .filter(record::Column::TransferId.eq(transfer.id))
        .order_by_asc(record::Column::Level)
        .all(conn)
        .await?;
    Ok(TransferDetail {
        transfer,
        items,
        approvals,
    })
}

/// Moves a transfer along one edge of the lifecycle. Illegal edges are
/// `InvalidStatus`.
pub(crate) async fn transition<C, F>(
    conn: &C,
    transfer: stock_transfer::Model,
    next: TransferStatus,
    mutate: F,
) -> Result<stock_transfer::Model, ServiceError>
where
    C: ConnectionTrait,
    F: FnOnce(&mut stock_transfer::ActiveModel),
{
    if !transfer.status.can_transition_to(next) {
        return Err(ServiceError::InvalidStatus(format!(
            "Transfer {} cannot move from {} to {}",
            transfer.transfer_number, transfer.status, next
        )));
    }

    let mut active: stock_transfer::ActiveModel = transfer.into();
    active.status = Set(next);
    active.updated_at = Set(Utc::now());
    mutate(&mut active);
    Ok(active.update(conn).await?)
}

/// Sets `qty_approved = qty_requested` on every item.
pub(crate) async fn approve_requested_quantities<C: ConnectionTrait>(
    conn: &C,
    transfer_id: Uuid,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    for item in load_items(conn, transfer_id).await? {
        let qty = item.qty_requested;
        let mut active: stock_transfer_item::ActiveModel = item.into();
        active.qty_approved = Set(Some(qty));
        active.updated_at = Set(now);
        active.update(conn).await?;
    }
    Ok(())
}

pub(crate) fn publish_status(
    sender: &EventSender,
    tenant_id: Uuid,
    transfer_id: Uuid,
    from: Option<TransferStatus>,
    to: TransferStatus,
) {
    counter!("stockroom_transfers.transitions", 1, "to" => to.as_str());
    sender
        .publish(Event::TransferStatusChanged {
            tenant_id,
            transfer_id,
            from: from.map(|s| s.as_str().to_string()),
            to: to.as_str().to_string(),
        });
}

/// Claims the tenant's next transfer sequence number.
async fn next_transfer_number<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    now: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let select = tenant::Entity::find_by_id(tenant_id);
    let tenant = for_update(conn, select)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Tenant", tenant_id))?;

    let seq = tenant.next_transfer_seq;
    let mut active: tenant::ActiveModel = tenant.into();
    active.next_transfer_seq = Set(seq + 1);
    active.update(conn).await?;

    Ok(format_transfer_number(now.year(), seq))
}

async fn insert_items<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    transfer_id: Uuid,
    items: &[ItemInput],
) -> Result<Vec<stock_transfer_item::Model>, ServiceError> {
    let now = Utc::now();
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        stock::tenant_product(conn, tenant_id, item.product_id).await?;
        rows.push(
            stock_transfer_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                transfer_id: Set(transfer_id),
                product_id: Set(item.product_id),
                qty_requested: Set(item.qty),
                qty_approved: Set(None),
                qty_shipped: Set(0),
                qty_received: Set(0),
                unit_cost_cents: Set(None),
                lot_draws: Set(json!([])),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await?,
        );
    }
    Ok(rows)
}

fn audit_step(
    actor: &AuthUser,
    transfer_id: Uuid,
    action: &'static str,
    from: Option<TransferStatus>,
    to: TransferStatus,
    extra: Value,
) -> AuditEntry {
    AuditEntry::new(actor.tenant_id, actor.user_id, "stock_transfer", transfer_id, action)
        .before(&json!({ "status": from.map(|s| s.as_str()) }))
        .after(&json!({ "status": to.as_str(), "details": extra }))
}

fn forbid(message: impl Into<String>) -> ServiceError {
    ServiceError::Forbidden(message.into())
}

/// Transfer lifecycle: drafting, review, shipping, receiving and reversal.
#[derive(Clone)]
pub struct TransferService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl TransferService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn get(&self, actor: &AuthUser, transfer_id: Uuid) -> Result<TransferDetail, ServiceError> {
        load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }

    /// Lists transfers newest first. `direction` is relative to `branch_id`,
    /// or to the caller's branches when no branch is given.
    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn list(
        &self,
        actor: &AuthUser,
        filter: TransferFilter,
        page: PageRequest,
    ) -> Result<Page<stock_transfer::Model>, ServiceError> {
        let mut query = stock_transfer::Entity::find()
            .filter(stock_transfer::Column::TenantId.eq(actor.tenant_id))
            .order_by_desc(stock_transfer::Column::CreatedAt)
            .order_by_desc(stock_transfer::Column::Id);

        if let Some(status) = filter.status {
            query = query.filter(stock_transfer::Column::Status.eq(status));
        }

        let branches: Option<Vec<Uuid>> = match (filter.branch_id, filter.direction) {
            (Some(branch_id), _) => Some(vec![branch_id]),
            (None, Some(_)) => Some(actor.branch_ids.clone()),
            (None, None) => None,
        };
        if let Some(branches) = branches {
            let inbound = stock_transfer::Column::DestinationBranchId.is_in(branches.clone());
            let outbound = stock_transfer::Column::SourceBranchId.is_in(branches);
            query = query.filter(match filter.direction {
                Some(Direction::Inbound) => Condition::all().add(inbound),
                Some(Direction::Outbound) => Condition::all().add(outbound),
                None => Condition::any().add(inbound).add(outbound),
            });
        }

        let paginator = query.paginate(self.db.as_ref(), page.limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.index()).await?;
        Ok(Page::new(items, total, page))
    }

    /// Creates a DRAFT transfer, or a REQUESTED one when `submit` is set.
    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn create(&self, actor: &AuthUser, input: CreateTransfer) -> Result<TransferDetail, ServiceError> {
        input.validate()?;
        check_items(&input.items)?;
        if input.source_branch_id == input.destination_branch_id {
            return Err(ServiceError::ValidationError(
                "source and destination branches must differ".into(),
            ));
        }
        if !actor.can_act_on_branch(input.destination_branch_id) {
            return Err(forbid("Only members of the destination branch can request stock"));
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin create-transfer transaction");
            ServiceError::DatabaseError(e)
        })?;

        stock::writable_branch(&txn, actor.tenant_id, input.source_branch_id).await?;
        stock::writable_branch(&txn, actor.tenant_id, input.destination_branch_id).await?;

        let now = Utc::now();
        let transfer_number = next_transfer_number(&txn, actor.tenant_id, now).await?;
        let transfer = stock_transfer::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            transfer_number: Set(transfer_number),
            source_branch_id: Set(input.source_branch_id),
            destination_branch_id: Set(input.destination_branch_id),
            status: Set(TransferStatus::Draft),
            requested_by: Set(actor.user_id),
            reviewed_by: Set(None),
            reviewed_at: Set(None),
            review_notes: Set(None),
            shipped_by: Set(None),
            shipped_at: Set(None),
            completed_at: Set(None),
            cancelled_at: Set(None),
            notes: Set(input.notes.clone()),
            approval_rule_id: Set(None),
            reversal_of_transfer_id: Set(None),
            reversed_by_transfer_id: Set(None),
            reversal_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_unique_violation(e, "Transfer number collision"))?;

        let items = insert_items(&txn, actor.tenant_id, transfer.id, &input.items).await?;
        audit::record(
            &txn,
            audit_step(actor, transfer.id, "transfer.create", None, TransferStatus::Draft, json!({
                "transfer_number": transfer.transfer_number,
                "items": input.items,
            })),
        )
        .await?;

        let mut final_status = TransferStatus::Draft;
        if input.submit {
            let submitted = self.submit_in_txn(&txn, actor, transfer.clone(), &items).await?;
            final_status = submitted.status;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit create-transfer");
            ServiceError::DatabaseError(e)
        })?;

        counter!("stockroom_transfers.created", 1);
        info!(transfer_id = %transfer.id, number = %transfer.transfer_number, status = %final_status, "transfer created");
        publish_status(&self.event_sender, actor.tenant_id, transfer.id, None, TransferStatus::Draft);
        if final_status != TransferStatus::Draft {
            publish_status(
                &self.event_sender,
                actor.tenant_id,
                transfer.id,
                Some(TransferStatus::Draft),
                final_status,
            );
        }

        load_detail(self.db.as_ref(), actor.tenant_id, transfer.id).await
    }

    /// Replaces the items of a DRAFT transfer.
    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn update_items(
        &self,
        actor: &AuthUser,
        transfer_id: Uuid,
        input: UpdateItems,
    ) -> Result<TransferDetail, ServiceError> {
        input.validate()?;
        check_items(&input.items)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin update-items transaction");
            ServiceError::DatabaseError(e)
        })?;

        let transfer = locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        Self::ensure_can_edit(actor, &transfer)?;
        if transfer.status != TransferStatus::Draft {
            return Err(ServiceError::InvalidStatus(format!(
                "Only DRAFT transfers can be edited; {} is {}",
                transfer.transfer_number, transfer.status
            )));
        }

        let before = load_items(&txn, transfer.id).await?;
        stock_transfer_item::Entity::delete_many()
            .filter(stock_transfer_item::Column::TransferId.eq(transfer.id))
            .exec(&txn)
            .await?;
        insert_items(&txn, actor.tenant_id, transfer.id, &input.items).await?;

        if input.notes.is_some() {
            let mut active: stock_transfer::ActiveModel = transfer.clone().into();
            active.notes = Set(input.notes.clone());
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "stock_transfer", transfer.id, "transfer.update_items")
                .before(&before)
                .after(&input.items),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit update-items");
            ServiceError::DatabaseError(e)
        })?;

        info!(transfer_id = %transfer_id, items = input.items.len(), "transfer items replaced");
        load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }

    /// DRAFT -> REQUESTED, opening approval levels when a rule matches.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn submit(&self, actor: &AuthUser, transfer_id: Uuid) -> Result<TransferDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin submit transaction");
            ServiceError::DatabaseError(e)
        })?;

        let transfer = locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        Self::ensure_can_edit(actor, &transfer)?;
        let items = load_items(&txn, transfer.id).await?;
        let from = transfer.status;
        let submitted = self.submit_in_txn(&txn, actor, transfer, &items).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit submit");
            ServiceError::DatabaseError(e)
        })?;

        publish_status(&self.event_sender, actor.tenant_id, transfer_id, Some(from), submitted.status);
        load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }

    async fn submit_in_txn<C: ConnectionTrait>(
        &self,
        conn: &C,
        actor: &AuthUser,
        transfer: stock_transfer::Model,
        items: &[stock_transfer_item::Model],
    ) -> Result<stock_transfer::Model, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "a transfer needs at least one item".into(),
            ));
        }

        let matched = approvals::match_rule(conn, &transfer, items).await?;
        let rule_id = matched.as_ref().map(|r| r.rule.id);
        let from = transfer.status;
        let submitted = transition(conn, transfer, TransferStatus::Requested, |am| {
            am.approval_rule_id = Set(rule_id);
        })
        .await?;

        let mut levels = 0;
        if let Some(rule) = &matched {
            levels = approvals::open_records(conn, submitted.id, rule).await?.len();
        }

        audit::record(
            conn,
            audit_step(actor, submitted.id, "transfer.submit", Some(from), submitted.status, json!({
                "approval_rule_id": rule_id,
                "levels": levels,
            })),
        )
        .await?;

        info!(
            transfer_id = %submitted.id,
            rule_id = ?rule_id,
            levels,
            "transfer submitted"
        );
        Ok(submitted)
    }

    /// Direct approval or rejection of a REQUESTED transfer that no rule
    /// governs.
    #[instrument(skip(self, actor, review), fields(actor_id = %actor.user_id))]
    pub async fn review(
        &self,
        actor: &AuthUser,
        transfer_id: Uuid,
        review: Review,
    ) -> Result<TransferDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin review transaction");
            ServiceError::DatabaseError(e)
        })?;

        let transfer = locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        if transfer.status != TransferStatus::Requested {
            return Err(ServiceError::InvalidStatus(format!(
                "Transfer {} is {}, not REQUESTED",
                transfer.transfer_number, transfer.status
            )));
        }
        let open_levels = record::Entity::find()
            .filter(record::Column::TransferId.eq(transfer.id))
            .count(&txn)
            .await?;
        if open_levels > 0 {
            return Err(ServiceError::Conflict(format!(
                "Transfer {} is governed by an approval rule; decide its levels instead",
                transfer.transfer_number
            )));
        }
        if !actor.can_act_on_branch(transfer.source_branch_id) {
            return Err(forbid("Only members of the source branch can review this transfer"));
        }

        let now = Utc::now();
        let from = transfer.status;
        let notes = review.notes.clone();
        let updated = match review.decision {
            ReviewDecision::Approve => {
                let items = load_items(&txn, transfer.id).await?;
                let overrides: HashMap<Uuid, i64> = review
                    .items
                    .iter()
                    .map(|a| (a.product_id, a.qty_approved))
                    .collect();
                if let Some(unknown) = overrides.keys().find(|p| !items.iter().any(|i| i.product_id == **p)) {
                    return Err(ServiceError::ValidationError(format!(
                        "product {} is not on this transfer",
                        unknown
                    )));
                }

                let mut total_approved = 0;
                for item in items {
                    let qty = overrides.get(&item.product_id).copied().unwrap_or(item.qty_requested);
                    if qty < 0 || qty > item.qty_requested {
                        return Err(ServiceError::ValidationError(format!(
                            "approved quantity for product {} must be between 0 and {}",
                            item.product_id, item.qty_requested
                        )));
                    }
                    total_approved += qty;
                    let mut active: stock_transfer_item::ActiveModel = item.into();
                    active.qty_approved = Set(Some(qty));
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }
                if total_approved == 0 {
                    return Err(ServiceError::ValidationError(
                        "nothing approved; reject the transfer instead".into(),
                    ));
                }

                transition(&txn, transfer, TransferStatus::Approved, |am| {
                    am.reviewed_by = Set(Some(actor.user_id));
                    am.reviewed_at = Set(Some(now));
                    am.review_notes = Set(notes);
                })
                .await?
            }
            ReviewDecision::Reject => {
                transition(&txn, transfer, TransferStatus::Rejected, |am| {
                    am.reviewed_by = Set(Some(actor.user_id));
                    am.reviewed_at = Set(Some(now));
                    am.review_notes = Set(notes);
                })
                .await?
            }
        };

        audit::record(
            &txn,
            audit_step(actor, transfer_id, "transfer.review", Some(from), updated.status, json!({
                "decision": review.decision,
                "notes": review.notes,
                "items": review.items,
            })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit review");
            ServiceError::DatabaseError(e)
        })?;

        info!(transfer_id = %transfer_id, status = %updated.status, "transfer reviewed");
        publish_status(&self.event_sender, actor.tenant_id, transfer_id, Some(from), updated.status);
        load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }

    /// Cancels a transfer before it ships.
    #[instrument(skip(self, actor, cancel), fields(actor_id = %actor.user_id))]
    pub async fn cancel(
        &self,
        actor: &AuthUser,
        transfer_id: Uuid,
        cancel: Cancel,
    ) -> Result<TransferDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin cancel transaction");
            ServiceError::DatabaseError(e)
        })?;

        let transfer = locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        if transfer.requested_by != actor.user_id && !actor.has_permission(perm::TRANSFERS_APPROVE) {
            return Err(forbid("Only the requester or an approver can cancel"));
        }

        let from = transfer.status;
        let now = Utc::now();
        let reason = cancel.reason.clone();
        let cancelled = transition(&txn, transfer, TransferStatus::Cancelled, |am| {
            am.cancelled_at = Set(Some(now));
            if reason.is_some() {
                am.review_notes = Set(reason);
            }
        })
        .await?;
        let skipped = approvals::skip_pending(&txn, transfer_id).await?;

        audit::record(
            &txn,
            audit_step(actor, transfer_id, "transfer.cancel", Some(from), cancelled.status, json!({
                "reason": cancel.reason,
                "skipped_levels": skipped,
            })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit cancel");
            ServiceError::DatabaseError(e)
        })?;

        info!(transfer_id = %transfer_id, "transfer cancelled");
        publish_status(&self.event_sender, actor.tenant_id, transfer_id, Some(from), cancelled.status);
        load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }

    /// Consumes the approved quantities FIFO from the source branch.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn ship(&self, actor: &AuthUser, transfer_id: Uuid) -> Result<TransferDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin ship transaction");
            ServiceError::DatabaseError(e)
        })?;

        let transfer = locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        if !transfer.status.can_transition_to(TransferStatus::Shipped) {
            return Err(ServiceError::InvalidStatus(format!(
                "Transfer {} is {} and cannot ship",
                transfer.transfer_number, transfer.status
            )));
        }
        if !actor.can_act_on_branch(transfer.source_branch_id) {
            return Err(forbid("Only members of the source branch can ship"));
        }
        stock::writable_branch(&txn, actor.tenant_id, transfer.source_branch_id).await?;

        let items = load_items(&txn, transfer.id).await?;
        if items.iter().all(|i| i.qty_to_ship() <= 0) {
            return Err(ServiceError::ValidationError(
                "nothing approved to ship; cancel the transfer instead".into(),
            ));
        }

        let now = Utc::now();
        let mut shipped_lines = Vec::with_capacity(items.len());
        for item in items {
            let qty = item.qty_to_ship();
            if qty <= 0 {
                continue;
            }
            let movement = Movement {
                tenant_id: actor.tenant_id,
                branch_id: transfer.source_branch_id,
                product_id: item.product_id,
                actor_user_id: actor.user_id,
                kind: LedgerKind::Consumption,
                reason: Some(format!("Shipped on {}", transfer.transfer_number)),
                reference_type: Some(REFERENCE_TRANSFER),
                reference_id: Some(transfer.id),
            };
            let (draws, _, on_hand) = stock::draw_fifo(&txn, &movement, qty).await?;
            let unit_cost = weighted_unit_cost(&draws);
            shipped_lines.push((movement, qty, on_hand));

            let mut active: stock_transfer_item::ActiveModel = item.into();
            active.qty_shipped = Set(qty);
            active.unit_cost_cents = Set(unit_cost);
            active.lot_draws = Set(serde_json::to_value(&draws)?);
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }

        let from = transfer.status;
        let shipped = transition(&txn, transfer, TransferStatus::Shipped, |am| {
            am.shipped_by = Set(Some(actor.user_id));
            am.shipped_at = Set(Some(now));
        })
        .await?;

        audit::record(
            &txn,
            audit_step(actor, transfer_id, "transfer.ship", Some(from), shipped.status, json!({
                "lines": shipped_lines.iter().map(|(m, q, _)| json!({"product_id": m.product_id, "qty": q})).collect::<Vec<_>>(),
            })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit ship");
            ServiceError::DatabaseError(e)
        })?;

        info!(transfer_id = %transfer_id, lines = shipped_lines.len(), "transfer shipped");
        for (movement, qty, on_hand) in &shipped_lines {
            self.publish_moved(movement, -qty, *on_hand);
        }
        publish_status(&self.event_sender, actor.tenant_id, transfer_id, Some(from), shipped.status);
        load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }

    /// Books received quantities into destination lots at the shipped unit
    /// cost.
    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn receive(
        &self,
        actor: &AuthUser,
        transfer_id: Uuid,
        input: Receive,
    ) -> Result<TransferDetail, ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::ValidationError("nothing to receive".into()));
        }
        let mut seen = HashSet::new();
        for line in &input.items {
            if line.qty <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "received quantity for product {} must be positive",
                    line.product_id
                )));
            }
            if !seen.insert(line.product_id) {
                return Err(ServiceError::ValidationError(format!(
                    "product {} appears more than once",
                    line.product_id
                )));
            }
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin receive transaction");
            ServiceError::DatabaseError(e)
        })?;

        let transfer = locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        if !matches!(
            transfer.status,
            TransferStatus::Shipped | TransferStatus::PartiallyReceived
        ) {
            return Err(ServiceError::InvalidStatus(format!(
                "Transfer {} is {} and cannot be received",
                transfer.transfer_number, transfer.status
            )));
        }
        if !actor.can_act_on_branch(transfer.destination_branch_id) {
            return Err(forbid("Only members of the destination branch can receive"));
        }
        stock::writable_branch(&txn, actor.tenant_id, transfer.destination_branch_id).await?;

        let mut items: HashMap<Uuid, stock_transfer_item::Model> = load_items(&txn, transfer.id)
            .await?
            .into_iter()
            .map(|i| (i.product_id, i))
            .collect();

        let now = Utc::now();
        let mut received_lines = Vec::with_capacity(input.items.len());
        for line in &input.items {
            let item = items.get(&line.product_id).cloned().ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "product {} is not on this transfer",
                    line.product_id
                ))
            })?;
            let outstanding = item.qty_shipped - item.qty_received;
            if line.qty > outstanding {
                return Err(ServiceError::ValidationError(format!(
                    "cannot receive {} of product {}; {} outstanding",
                    line.qty, line.product_id, outstanding
                )));
            }

            let movement = Movement {
                tenant_id: actor.tenant_id,
                branch_id: transfer.destination_branch_id,
                product_id: line.product_id,
                actor_user_id: actor.user_id,
                kind: LedgerKind::Receipt,
                reason: Some(format!("Received on {}", transfer.transfer_number)),
                reference_type: Some(REFERENCE_TRANSFER),
                reference_id: Some(transfer.id),
            };
            let (_, _, on_hand) = stock::add_lot(
                &txn,
                &movement,
                line.qty,
                item.unit_cost_cents,
                Some(transfer.transfer_number.clone()),
                None,
            )
            .await?;
            received_lines.push((movement, line.qty, on_hand));

            let mut active: stock_transfer_item::ActiveModel = item.clone().into();
            active.qty_received = Set(item.qty_received + line.qty);
            active.updated_at = Set(now);
            let updated = active.update(&txn).await?;
            items.insert(updated.product_id, updated);
        }

        let complete = items.values().all(|i| i.qty_received == i.qty_shipped);
        let next = if complete {
            TransferStatus::Completed
        } else {
            TransferStatus::PartiallyReceived
        };
        let from = transfer.status;
        let updated = transition(&txn, transfer, next, |am| {
            if complete {
                am.completed_at = Set(Some(now));
            }
        })
        .await?;

        audit::record(
            &txn,
            audit_step(actor, transfer_id, "transfer.receive", Some(from), updated.status, json!({
                "lines": input.items,
            })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit receive");
            ServiceError::DatabaseError(e)
        })?;

        info!(transfer_id = %transfer_id, status = %updated.status, "transfer received");
        for (movement, qty, on_hand) in &received_lines {
            self.publish_moved(movement, *qty, *on_hand);
        }
        if from != updated.status {
            publish_status(&self.event_sender, actor.tenant_id, transfer_id, Some(from), updated.status);
        }
        load_detail(self.db.as_ref(), actor.tenant_id, transfer_id).await
    }

    /// Undoes a COMPLETED transfer with a new COMPLETED transfer in the
    /// opposite direction. Repeating the call returns the same reversal.
    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn reverse(
        &self,
        actor: &AuthUser,
        transfer_id: Uuid,
        input: Reverse,
    ) -> Result<TransferDetail, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin reverse transaction");
            ServiceError::DatabaseError(e)
        })?;

        let original = locked_transfer(&txn, actor.tenant_id, transfer_id).await?;
        if let (TransferStatus::Reversed, Some(existing)) = (original.status, original.reversed_by_transfer_id) {
            txn.rollback().await?;
            info!(transfer_id = %transfer_id, reversal_id = %existing, "transfer already reversed");
            return load_detail(self.db.as_ref(), actor.tenant_id, existing).await;
        }
        if original.reversal_of_transfer_id.is_some() {
            return Err(ServiceError::InvalidOperation(
                "A reversal transfer cannot itself be reversed".into(),
            ));
        }
        if !original.status.can_transition_to(TransferStatus::Reversed) {
            return Err(ServiceError::InvalidStatus(format!(
                "Transfer {} is {}; only COMPLETED transfers can be reversed",
                original.transfer_number, original.status
            )));
        }
        // Stock moves back from the original destination to the original source.
        let from_branch = find_branch(&txn, actor.tenant_id, original.destination_branch_id).await?;
        let to_branch = find_branch(&txn, actor.tenant_id, original.source_branch_id).await?;

        let now = Utc::now();
        let reversal_id = Uuid::new_v4();
        let reversal_number = next_transfer_number(&txn, actor.tenant_id, now).await?;
        let reversal = stock_transfer::ActiveModel {
            id: Set(reversal_id),
            tenant_id: Set(actor.tenant_id),
            transfer_number: Set(reversal_number.clone()),
            source_branch_id: Set(from_branch.id),
            destination_branch_id: Set(to_branch.id),
            status: Set(TransferStatus::Completed),
            requested_by: Set(actor.user_id),
            reviewed_by: Set(Some(actor.user_id)),
            reviewed_at: Set(Some(now)),
            review_notes: Set(None),
            shipped_by: Set(Some(actor.user_id)),
            shipped_at: Set(Some(now)),
            completed_at: Set(Some(now)),
            cancelled_at: Set(None),
            notes: Set(Some(input.reason.clone())),
            approval_rule_id: Set(None),
            reversal_of_transfer_id: Set(Some(original.id)),
            reversed_by_transfer_id: Set(None),
            reversal_reason: Set(Some(input.reason.clone())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut moved = Vec::new();
        for item in load_items(&txn, original.id).await? {
            let qty = item.qty_received;
            if qty <= 0 {
                continue;
            }

            let out = Movement {
                tenant_id: actor.tenant_id,
                branch_id: from_branch.id,
                product_id: item.product_id,
                actor_user_id: actor.user_id,
                kind: LedgerKind::Reversal,
                reason: Some(input.reason.clone()),
                reference_type: Some(REFERENCE_TRANSFER),
                reference_id: Some(reversal.id),
            };
            let (draws, _, out_on_hand) = stock::draw_fifo(&txn, &out, qty).await?;
            let unit_cost = weighted_unit_cost(&draws).or(item.unit_cost_cents);

            let back = Movement {
                branch_id: to_branch.id,
                ..out.clone()
            };
            let (_, _, back_on_hand) =
                stock::add_lot(&txn, &back, qty, unit_cost, Some(reversal_number.clone()), None).await?;

            stock_transfer_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                transfer_id: Set(reversal.id),
                product_id: Set(item.product_id),
                qty_requested: Set(qty),
                qty_approved: Set(Some(qty)),
                qty_shipped: Set(qty),
                qty_received: Set(qty),
                unit_cost_cents: Set(unit_cost),
                lot_draws: Set(serde_json::to_value(&draws)?),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;

            moved.push((out, -qty, out_on_hand));
            moved.push((back, qty, back_on_hand));
        }

        let reason = input.reason.clone();
        let reversed = transition(&txn, original, TransferStatus::Reversed, |am| {
            am.reversed_by_transfer_id = Set(Some(reversal.id));
            am.reversal_reason = Set(Some(reason));
        })
        .await?;

        audit::record(
            &txn,
            audit_step(actor, transfer_id, "transfer.reverse", Some(TransferStatus::Completed), reversed.status, json!({
                "reason": input.reason,
                "reversal_transfer_id": reversal.id,
            })),
        )
        .await?;
        audit::record(
            &txn,
            audit_step(actor, reversal.id, "transfer.create_reversal", None, TransferStatus::Completed, json!({
                "transfer_number": reversal_number,
                "reversal_of_transfer_id": transfer_id,
            })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit reverse");
            ServiceError::DatabaseError(e)
        })?;

        warn!(transfer_id = %transfer_id, reversal_id = %reversal.id, "transfer reversed");
        for (movement, qty, on_hand) in &moved {
            self.publish_moved(movement, *qty, *on_hand);
        }
        publish_status(
            &self.event_sender,
            actor.tenant_id,
            transfer_id,
            Some(TransferStatus::Completed),
            TransferStatus::Reversed,
        );
        publish_status(&self.event_sender, actor.tenant_id, reversal.id, None, TransferStatus::Completed);

        load_detail(self.db.as_ref(), actor.tenant_id, reversal.id).await
    }

    /// Requester, destination member, or `branches:manage`.
    fn ensure_can_edit(actor: &AuthUser, transfer: &stock_transfer::Model) -> Result<(), ServiceError> {
        if transfer.requested_by == actor.user_id || actor.can_act_on_branch(transfer.destination_branch_id) {
            Ok(())
        } else {
            Err(forbid("Only the requester or destination members can change this transfer"))
        }
    }

    fn publish_moved(&self, movement: &Movement, qty_delta: i64, qty_on_hand: i64) {
        self.event_sender
            .publish(Event::StockMoved {
                tenant_id: movement.tenant_id,
                branch_id: movement.branch_id,
                product_id: movement.product_id,
                kind: movement.kind.as_str().to_string(),
                qty_delta,
                qty_on_hand,
            });
    }
}
