use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::AuthUser;
use crate::entities::stock_ledger::{self, LedgerKind};
use crate::entities::stock_transfer_item::LotDraw;
use crate::entities::{branch, product, product_stock, stock_lot};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{self, AuditEntry};
use crate::services::fifo::{self, LotBalance};
use crate::services::{for_update, Page, PageRequest};

pub const REFERENCE_TRANSFER: &str = "TRANSFER";

fn non_zero(value: i64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::new("qty_delta must not be zero"));
    }
    if value == i64::MIN {
        return Err(ValidationError::new("qty_delta is out of range"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReceiveStock {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i64,
    #[validate(range(min = 0))]
    pub unit_cost_cents: Option<i64>,
    #[validate(length(max = 255))]
    pub source_ref: Option<String>,
    pub reason: Option<String>,
    /// Backdates the lot; defaults to now.
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AdjustStock {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    #[validate(custom = "non_zero")]
    pub qty_delta: i64,
    #[validate(length(min = 1, message = "reason is required"))]
    pub reason: String,
    #[validate(range(min = 0))]
    pub unit_cost_cents: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConsumeStock {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerFilter {
    pub branch_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub kind: Option<LedgerKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Outcome of one stock write.
#[derive(Debug, Clone, Serialize)]
pub struct StockMovement {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub qty_on_hand: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot: Option<stock_lot::Model>,
    pub entries: Vec<stock_ledger::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockLevel {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub qty_on_hand: i64,
    pub lots: Vec<stock_lot::Model>,
}

/// Who moved stock, where, and why. Shared by direct stock writes and
/// transfer shipping/receiving.
#[derive(Debug, Clone)]
pub(crate) struct Movement {
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub actor_user_id: Uuid,
    pub kind: LedgerKind,
    pub reason: Option<String>,
    pub reference_type: Option<&'static str>,
    pub reference_id: Option<Uuid>,
}

/// Loads a branch for a stock write: it must exist in the tenant and be
/// active.
pub(crate) async fn writable_branch<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    branch_id: Uuid,
) -> Result<branch::Model, ServiceError> {
    let branch = branch::Entity::find_by_id(branch_id)
        .filter(branch::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Branch", branch_id))?;

    if !branch.is_active {
        return Err(ServiceError::ValidationError(format!(
            "Branch {} is inactive",
            branch.slug
        )));
    }
    Ok(branch)
}

pub(crate) async fn tenant_product<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    product::Entity::find_by_id(product_id)
        .filter(product::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))
}

/// Returns the stock aggregate row, creating it at zero if needed, locked
/// for the rest of the transaction on Postgres.
async fn locked_stock_row<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    branch_id: Uuid,
    product_id: Uuid,
) -> Result<product_stock::Model, ServiceError> {
    product_stock::Entity::insert(product_stock::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        branch_id: Set(branch_id),
        product_id: Set(product_id),
        qty_on_hand: Set(0),
        updated_at: Set(Utc::now()),
    })
    .on_conflict(
        OnConflict::columns([
            product_stock::Column::TenantId,
            product_stock::Column::BranchId,
            product_stock::Column::ProductId,
        ])
        .do_nothing()
        .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    let select = product_stock::Entity::find()
        .filter(product_stock::Column::TenantId.eq(tenant_id))
        .filter(product_stock::Column::BranchId.eq(branch_id))
        .filter(product_stock::Column::ProductId.eq(product_id));

    for_update(conn, select)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError("stock row vanished after upsert".into()))
}

async fn set_on_hand<C: ConnectionTrait>(
    conn: &C,
    row: product_stock::Model,
    qty_on_hand: i64,
) -> Result<i64, ServiceError> {
    if qty_on_hand < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "on-hand for product {} would drop below zero",
            row.product_id
        )));
    }
    let mut active: product_stock::ActiveModel = row.into();
    active.qty_on_hand = Set(qty_on_hand);
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    Ok(qty_on_hand)
}

async fn write_ledger<C: ConnectionTrait>(
    conn: &C,
    movement: &Movement,
    lot_id: Option<Uuid>,
    qty_delta: i64,
    unit_cost_cents: Option<i64>,
) -> Result<stock_ledger::Model, ServiceError> {
    let entry = stock_ledger::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(movement.tenant_id),
        branch_id: Set(movement.branch_id),
        product_id: Set(movement.product_id),
        lot_id: Set(lot_id),
        kind: Set(movement.kind),
        qty_delta: Set(qty_delta),
        unit_cost_cents: Set(unit_cost_cents),
        reason: Set(movement.reason.clone()),
        reference_type: Set(movement.reference_type.map(str::to_string)),
        reference_id: Set(movement.reference_id),
        actor_user_id: Set(movement.actor_user_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    counter!("stockroom_stock.ledger_entries", 1, "kind" => movement.kind.as_str());
    Ok(entry)
}

/// Creates a lot and its ledger entry, and raises on-hand.
pub(crate) async fn add_lot<C: ConnectionTrait>(
    conn: &C,
    movement: &Movement,
    qty: i64,
    unit_cost_cents: Option<i64>,
    source_ref: Option<String>,
    received_at: Option<DateTime<Utc>>,
) -> Result<(stock_lot::Model, stock_ledger::Model, i64), ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::ValidationError(
            "lot quantity must be positive".into(),
        ));
    }

    let row = locked_stock_row(conn, movement.tenant_id, movement.branch_id, movement.product_id)
        .await?;
    let on_hand = row.qty_on_hand.checked_add(qty).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "on-hand for product {} would exceed the supported range",
            row.product_id
        ))
    })?;

    let now = Utc::now();
    let lot = stock_lot::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(movement.tenant_id),
        branch_id: Set(movement.branch_id),
        product_id: Set(movement.product_id),
        qty_received: Set(qty),
        qty_remaining: Set(qty),
        unit_cost_cents: Set(unit_cost_cents),
        source_ref: Set(source_ref),
        received_at: Set(received_at.unwrap_or(now)),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    let entry = write_ledger(conn, movement, Some(lot.id), qty, unit_cost_cents).await?;
    let on_hand = set_on_hand(conn, row, on_hand).await?;
    Ok((lot, entry, on_hand))
}

/// Consumes `qty` FIFO across the branch's lots, one ledger entry per lot
/// drawn. A shortfall fails before anything is written.
pub(crate) async fn draw_fifo<C: ConnectionTrait>(
    conn: &C,
    movement: &Movement,
    qty: i64,
) -> Result<(Vec<LotDraw>, Vec<stock_ledger::Model>, i64), ServiceError> {
    let row = locked_stock_row(conn, movement.tenant_id, movement.branch_id, movement.product_id)
        .await?;

    let select = stock_lot::Entity::find()
        .filter(stock_lot::Column::TenantId.eq(movement.tenant_id))
        .filter(stock_lot::Column::BranchId.eq(movement.branch_id))
        .filter(stock_lot::Column::ProductId.eq(movement.product_id))
        .filter(stock_lot::Column::QtyRemaining.gt(0))
        .order_by_asc(stock_lot::Column::ReceivedAt)
        .order_by_asc(stock_lot::Column::CreatedAt)
        .order_by_asc(stock_lot::Column::Id);
    let mut lots = for_update(conn, select).all(conn).await?;
    lots.sort_by(fifo::fifo_order);

    let balances: Vec<LotBalance> = lots.iter().map(LotBalance::from).collect();
    let draws = fifo::plan_consumption(&balances, qty).map_err(|shortfall| {
        warn!(
            product_id = %movement.product_id,
            branch_id = %movement.branch_id,
            requested = shortfall.requested,
            available = shortfall.available,
            "insufficient stock"
        );
        ServiceError::InsufficientStock(format!(
            "product {} at branch {}: {}",
            movement.product_id, movement.branch_id, shortfall
        ))
    })?;

    let mut entries = Vec::with_capacity(draws.len());
    for draw in &draws {
        let Some(lot) = lots.iter().find(|l| l.id == draw.lot_id) else {
            continue;
        };
        let remaining = lot.qty_remaining - draw.qty;
        let mut active: stock_lot::ActiveModel = lot.clone().into();
        active.qty_remaining = Set(remaining);
        active.update(conn).await?;

        entries.push(write_ledger(conn, movement, Some(draw.lot_id), -draw.qty, draw.unit_cost_cents).await?);
    }

    let on_hand = set_on_hand(conn, row.clone(), row.qty_on_hand - qty).await?;
    Ok((draws, entries, on_hand))
}

/// FIFO stock ledger: receipts, adjustments, consumption and reads.
#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    fn authorize_branch(user: &AuthUser, branch_id: Uuid) -> Result<(), ServiceError> {
        if user.can_act_on_branch(branch_id) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "Not a member of branch {}",
                branch_id
            )))
        }
    }

    /// Receives a new lot into a branch.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn receive(
        &self,
        user: &AuthUser,
        input: ReceiveStock,
    ) -> Result<StockMovement, ServiceError> {
        input.validate()?;
        Self::authorize_branch(user, input.branch_id)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin stock receipt transaction");
            ServiceError::DatabaseError(e)
        })?;

        writable_branch(&txn, user.tenant_id, input.branch_id).await?;
        tenant_product(&txn, user.tenant_id, input.product_id).await?;

        let movement = Movement {
            tenant_id: user.tenant_id,
            branch_id: input.branch_id,
            product_id: input.product_id,
            actor_user_id: user.user_id,
            kind: LedgerKind::Receipt,
            reason: input.reason.clone(),
            reference_type: None,
            reference_id: None,
        };
        let (lot, entry, on_hand) = add_lot(
            &txn,
            &movement,
            input.qty,
            input.unit_cost_cents,
            input.source_ref.clone(),
            input.received_at,
        )
        .await?;

        self.audit_movement(&txn, &movement, "stock.receive", on_hand - input.qty, on_hand, &[entry.id])
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit stock receipt");
            ServiceError::DatabaseError(e)
        })?;

        info!(lot_id = %lot.id, qty = input.qty, qty_on_hand = on_hand, "stock received");
        self.publish_moved(&movement, input.qty, on_hand);

        Ok(StockMovement {
            branch_id: movement.branch_id,
            product_id: movement.product_id,
            qty_on_hand: on_hand,
            lot: Some(lot),
            entries: vec![entry],
        })
    }

    /// Signed correction. Positive deltas create a lot, negative deltas
    /// consume FIFO.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn adjust(
        &self,
        user: &AuthUser,
        input: AdjustStock,
    ) -> Result<StockMovement, ServiceError> {
        input.validate()?;
        if input.reason.trim().is_empty() {
            return Err(ServiceError::ValidationError("reason is required".into()));
        }
        Self::authorize_branch(user, input.branch_id)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin stock adjustment transaction");
            ServiceError::DatabaseError(e)
        })?;

        writable_branch(&txn, user.tenant_id, input.branch_id).await?;
        tenant_product(&txn, user.tenant_id, input.product_id).await?;

        let movement = Movement {
            tenant_id: user.tenant_id,
            branch_id: input.branch_id,
            product_id: input.product_id,
            actor_user_id: user.user_id,
            kind: LedgerKind::Adjustment,
            reason: Some(input.reason.clone()),
            reference_type: None,
            reference_id: None,
        };

        let (lot, entries, on_hand) = if input.qty_delta > 0 {
            let (lot, entry, on_hand) = add_lot(
                &txn,
                &movement,
                input.qty_delta,
                input.unit_cost_cents,
                None,
                None,
            )
            .await?;
            (Some(lot), vec![entry], on_hand)
        } else {
            let (_, entries, on_hand) = draw_fifo(&txn, &movement, -input.qty_delta).await?;
            (None, entries, on_hand)
        };

        let ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
        self.audit_movement(&txn, &movement, "stock.adjust", on_hand - input.qty_delta, on_hand, &ids)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit stock adjustment");
            ServiceError::DatabaseError(e)
        })?;

        info!(qty_delta = input.qty_delta, qty_on_hand = on_hand, "stock adjusted");
        self.publish_moved(&movement, input.qty_delta, on_hand);

        Ok(StockMovement {
            branch_id: movement.branch_id,
            product_id: movement.product_id,
            qty_on_hand: on_hand,
            lot,
            entries,
        })
    }

    /// FIFO consumption.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn consume(
        &self,
        user: &AuthUser,
        input: ConsumeStock,
    ) -> Result<StockMovement, ServiceError> {
        input.validate()?;
        Self::authorize_branch(user, input.branch_id)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin stock consumption transaction");
            ServiceError::DatabaseError(e)
        })?;

        writable_branch(&txn, user.tenant_id, input.branch_id).await?;
        tenant_product(&txn, user.tenant_id, input.product_id).await?;

        let movement = Movement {
            tenant_id: user.tenant_id,
            branch_id: input.branch_id,
            product_id: input.product_id,
            actor_user_id: user.user_id,
            kind: LedgerKind::Consumption,
            reason: input.reason.clone(),
            reference_type: None,
            reference_id: None,
        };
        let (_, entries, on_hand) = draw_fifo(&txn, &movement, input.qty).await?;

        let ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
        self.audit_movement(&txn, &movement, "stock.consume", on_hand + input.qty, on_hand, &ids)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit stock consumption");
            ServiceError::DatabaseError(e)
        })?;

        info!(qty = input.qty, qty_on_hand = on_hand, lots = entries.len(), "stock consumed");
        self.publish_moved(&movement, -input.qty, on_hand);

        Ok(StockMovement {
            branch_id: movement.branch_id,
            product_id: movement.product_id,
            qty_on_hand: on_hand,
            lot: None,
            entries,
        })
    }

    /// On-hand per branch/product with the lots that still hold stock.
    #[instrument(skip(self))]
    pub async fn levels(
        &self,
        tenant_id: Uuid,
        branch_id: Option<Uuid>,
        product_id: Option<Uuid>,
    ) -> Result<Vec<StockLevel>, ServiceError> {
        let db = self.db.as_ref();

        let mut rows = product_stock::Entity::find()
            .filter(product_stock::Column::TenantId.eq(tenant_id))
            .order_by_asc(product_stock::Column::BranchId)
            .order_by_asc(product_stock::Column::ProductId);
        let mut lots = stock_lot::Entity::find()
            .filter(stock_lot::Column::TenantId.eq(tenant_id))
            .filter(stock_lot::Column::QtyRemaining.gt(0))
            .order_by_asc(stock_lot::Column::ReceivedAt)
            .order_by_asc(stock_lot::Column::CreatedAt)
            .order_by_asc(stock_lot::Column::Id);
        if let Some(branch_id) = branch_id {
            rows = rows.filter(product_stock::Column::BranchId.eq(branch_id));
            lots = lots.filter(stock_lot::Column::BranchId.eq(branch_id));
        }
        if let Some(product_id) = product_id {
            rows = rows.filter(product_stock::Column::ProductId.eq(product_id));
            lots = lots.filter(stock_lot::Column::ProductId.eq(product_id));
        }

        let mut by_key: BTreeMap<(Uuid, Uuid), Vec<stock_lot::Model>> = BTreeMap::new();
        for lot in lots.all(db).await? {
            by_key.entry((lot.branch_id, lot.product_id)).or_default().push(lot);
        }

        Ok(rows
            .all(db)
            .await?
            .into_iter()
            .map(|row| StockLevel {
                lots: by_key
                    .remove(&(row.branch_id, row.product_id))
                    .unwrap_or_default(),
                branch_id: row.branch_id,
                product_id: row.product_id,
                qty_on_hand: row.qty_on_hand,
            })
            .collect())
    }

    /// Ledger entries, newest first.
    #[instrument(skip(self))]
    pub async fn ledger(
        &self,
        tenant_id: Uuid,
        filter: LedgerFilter,
        page: PageRequest,
    ) -> Result<Page<stock_ledger::Model>, ServiceError> {
        let mut query = stock_ledger::Entity::find()
            .filter(stock_ledger::Column::TenantId.eq(tenant_id))
            .order_by_desc(stock_ledger::Column::CreatedAt)
            .order_by_desc(stock_ledger::Column::Id);

        if let Some(branch_id) = filter.branch_id {
            query = query.filter(stock_ledger::Column::BranchId.eq(branch_id));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(stock_ledger::Column::ProductId.eq(product_id));
        }
        if let Some(kind) = filter.kind {
            query = query.filter(stock_ledger::Column::Kind.eq(kind));
        }
        if let Some(from) = filter.from {
            query = query.filter(stock_ledger::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(stock_ledger::Column::CreatedAt.lte(to));
        }

        let paginator = query.paginate(self.db.as_ref(), page.limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.index()).await?;
        Ok(Page::new(items, total, page))
    }

    /// Lots of one branch/product in FIFO order, exhausted ones included.
    #[instrument(skip(self))]
    pub async fn lots(
        &self,
        tenant_id: Uuid,
        branch_id: Uuid,
        product_id: Uuid,
    ) -> Result<Vec<stock_lot::Model>, ServiceError> {
        let mut lots = stock_lot::Entity::find()
            .filter(stock_lot::Column::TenantId.eq(tenant_id))
            .filter(stock_lot::Column::BranchId.eq(branch_id))
            .filter(stock_lot::Column::ProductId.eq(product_id))
            .all(self.db.as_ref())
            .await?;
        lots.sort_by(fifo::fifo_order);
        Ok(lots)
    }

    async fn audit_movement<C: ConnectionTrait>(
        &self,
        conn: &C,
        movement: &Movement,
        action: &'static str,
        before_qty: i64,
        after_qty: i64,
        entry_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        let entry = AuditEntry::new(
            movement.tenant_id,
            movement.actor_user_id,
            "product_stock",
            movement.product_id,
            action,
        )
        .before(&json!({ "branch_id": movement.branch_id, "qty_on_hand": before_qty }))
        .after(&json!({
            "branch_id": movement.branch_id,
            "qty_on_hand": after_qty,
            "ledger_entry_ids": entry_ids,
        }));
        audit::record(conn, entry).await
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
