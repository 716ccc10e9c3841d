pub mod approval_rules;
pub mod audit;
pub mod auth;
pub mod branches;
pub mod common;
pub mod health;
pub mod members;
pub mod products;
pub mod roles;
pub mod stock;
pub mod transfers;

use crate::auth::AuthService;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    approvals::ApprovalService, audit::AuditService, branches::BranchService,
    products::ProductService, stock::StockService, tenancy::TenancyService,
    transfers::TransferService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub tenancy: Arc<TenancyService>,
    pub branches: Arc<BranchService>,
    pub products: Arc<ProductService>,
    pub stock: Arc<StockService>,
    pub transfers: Arc<TransferService>,
    pub approvals: Arc<ApprovalService>,
    pub audit: Arc<AuditService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        auth_service: Arc<AuthService>,
    ) -> Self {
        Self {
            tenancy: Arc::new(TenancyService::new(
                db_pool.clone(),
                event_sender.clone(),
                auth_service,
            )),
            branches: Arc::new(BranchService::new(db_pool.clone())),
            products: Arc::new(ProductService::new(db_pool.clone(), event_sender.clone())),
            stock: Arc::new(StockService::new(db_pool.clone(), event_sender.clone())),
            transfers: Arc::new(TransferService::new(db_pool.clone(), event_sender.clone())),
            approvals: Arc::new(ApprovalService::new(db_pool.clone(), event_sender)),
            audit: Arc::new(AuditService::new(db_pool)),
        }
    }
}
