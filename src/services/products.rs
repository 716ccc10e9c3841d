use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    Iterable, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::{product, product_stock, stock_transfer, stock_transfer_item};
use crate::entities::stock_transfer::TransferStatus;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{self, AuditEntry};
use crate::services::stock::tenant_product;
use crate::services::{Page, PageRequest};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProduct {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 0))]
    pub price_cents: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateProduct {
    /// Must equal the stored `entity_version`.
    pub expected_version: i32,
    #[validate(length(min = 1, max = 64))]
    pub sku: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 0))]
    pub price_cents: Option<i64>,
    pub is_active: Option<bool>,
}

/// Product catalogue with optimistic concurrency.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Lists products, optionally matching `search` against SKU or name
    /// case-insensitively.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        tenant_id: Uuid,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<product::Model>, ServiceError> {
        let mut query = product::Entity::find()
            .filter(product::Column::TenantId.eq(tenant_id))
            .order_by_asc(product::Column::Sku);

        if let Some(term) = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", term);
            query = query.filter(
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(product::Column::Sku))).like(pattern.clone()))
                    .add(Expr::expr(Func::lower(Expr::col(product::Column::Name))).like(pattern)),
            );
        }

        let paginator = query.paginate(self.db.as_ref(), page.limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.index()).await?;
        Ok(Page::new(items, total, page))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, tenant_id: Uuid, product_id: Uuid) -> Result<product::Model, ServiceError> {
        tenant_product(self.db.as_ref(), tenant_id, product_id).await
    }

    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id, sku = %input.sku))]
    pub async fn create(&self, actor: &AuthUser, input: CreateProduct) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let sku = input.sku.trim().to_string();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin create-product transaction");
            ServiceError::DatabaseError(e)
        })?;

        ensure_sku_free(&txn, actor.tenant_id, &sku, None).await?;

        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            sku: Set(sku.clone()),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description.clone()),
            price_cents: Set(input.price_cents),
            is_active: Set(true),
            entity_version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_unique_violation(e, format!("SKU {} already exists", sku)))?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "product", product.id, "product.create").after(&product),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit create-product");
            ServiceError::DatabaseError(e)
        })?;

        info!(product_id = %product.id, "product created");
        self.event_sender
            .publish(Event::ProductCreated {
                tenant_id: actor.tenant_id,
                product_id: product.id,
            });
        Ok(product)
    }

    /// Applies an update if `expected_version` still matches, bumping the
    /// version.
    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn update(
        &self,
        actor: &AuthUser,
        product_id: Uuid,
        input: UpdateProduct,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin update-product transaction");
            ServiceError::DatabaseError(e)
        })?;

        let existing = tenant_product(&txn, actor.tenant_id, product_id).await?;
        if existing.entity_version != input.expected_version {
            warn!(
                product_id = %product_id,
                expected = input.expected_version,
                actual = existing.entity_version,
                "stale product update"
            );
            return Err(version_conflict(input.expected_version, existing.entity_version));
        }

        let sku = input.sku.as_deref().map(str::trim);
        if let Some(sku) = sku.filter(|s| *s != existing.sku) {
            ensure_sku_free(&txn, actor.tenant_id, sku, Some(product_id)).await?;
        }

        let mut changes = product::ActiveModel {
            entity_version: Set(existing.entity_version + 1),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(sku) = sku {
            changes.sku = Set(sku.to_string());
        }
        if let Some(name) = &input.name {
            changes.name = Set(name.trim().to_string());
        }
        if let Some(description) = &input.description {
            changes.description = Set(Some(description.clone()));
        }
        if let Some(price) = input.price_cents {
            changes.price_cents = Set(price);
        }
        if let Some(is_active) = input.is_active {
            changes.is_active = Set(is_active);
        }

        // The version predicate makes a concurrent writer lose cleanly.
        let result = product::Entity::update_many()
            .set(changes)
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::TenantId.eq(actor.tenant_id))
            .filter(product::Column::EntityVersion.eq(input.expected_version))
            .exec(&txn)
            .await
            .map_err(|e| ServiceError::from_unique_violation(e, "SKU already exists"))?;
        if result.rows_affected == 0 {
            return Err(version_conflict(input.expected_version, existing.entity_version + 1));
        }

        let updated = tenant_product(&txn, actor.tenant_id, product_id).await?;
        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "product", product_id, "product.update")
                .before(&existing)
                .after(&updated),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit update-product");
            ServiceError::DatabaseError(e)
        })?;

        info!(product_id = %product_id, version = updated.entity_version, "product updated");
        self.event_sender
            .publish(Event::ProductUpdated {
                tenant_id: actor.tenant_id,
                product_id,
                version: updated.entity_version,
            });
        Ok(updated)
    }

    /// Deletes a product with no stock on hand and no open transfers. Ledger
    /// and lot history stay behind.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn delete(&self, actor: &AuthUser, product_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin delete-product transaction");
            ServiceError::DatabaseError(e)
        })?;

        let existing = tenant_product(&txn, actor.tenant_id, product_id).await?;

        let on_hand: i64 = product_stock::Entity::find()
            .filter(product_stock::Column::TenantId.eq(actor.tenant_id))
            .filter(product_stock::Column::ProductId.eq(product_id))
            .all(&txn)
            .await?
            .iter()
            .map(|row| row.qty_on_hand)
            .sum();
        if on_hand > 0 {
            return Err(ServiceError::Conflict(format!(
                "Product {} has {} unit(s) on hand",
                existing.sku, on_hand
            )));
        }

        let open_statuses: Vec<TransferStatus> =
            TransferStatus::iter().filter(TransferStatus::is_open).collect();
        let open_transfers = stock_transfer_item::Entity::find()
            .inner_join(stock_transfer::Entity)
            .filter(stock_transfer_item::Column::ProductId.eq(product_id))
            .filter(stock_transfer::Column::TenantId.eq(actor.tenant_id))
            .filter(stock_transfer::Column::Status.is_in(open_statuses))
            .count(&txn)
            .await?;
        if open_transfers > 0 {
            return Err(ServiceError::Conflict(format!(
                "Product {} is on {} open transfer(s)",
                existing.sku, open_transfers
            )));
        }

        product_stock::Entity::delete_many()
            .filter(product_stock::Column::TenantId.eq(actor.tenant_id))
            .filter(product_stock::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;
        product::Entity::delete_by_id(product_id).exec(&txn).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "product", product_id, "product.delete")
                .before(&existing),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit delete-product");
            ServiceError::DatabaseError(e)
        })?;

        info!(product_id = %product_id, "product deleted");
        self.event_sender
            .publish(Event::ProductDeleted {
                tenant_id: actor.tenant_id,
                product_id,
            });
        Ok(())
    }
}

fn version_conflict(expected: i32, actual: i32) -> ServiceError {
    ServiceError::Conflict(format!(
        "Product was modified concurrently (expected version {}, current {})",
        expected, actual
    ))
}

async fn ensure_sku_free<C: sea_orm::ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    sku: &str,
    except: Option<Uuid>,
) -> Result<(), ServiceError> {
    let mut query = product::Entity::find()
        .filter(product::Column::TenantId.eq(tenant_id))
        .filter(product::Column::Sku.eq(sku));
    if let Some(id) = except {
        query = query.filter(product::Column::Id.ne(id));
    }
    if query.count(conn).await? > 0 {
        return Err(ServiceError::Conflict(format!("SKU {} already exists", sku)));
    }
    Ok(())
}
