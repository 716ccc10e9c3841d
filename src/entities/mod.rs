pub mod audit_event;
pub mod branch;
pub mod branch_membership;
pub mod product;
pub mod product_stock;
pub mod role;
pub mod role_permission;
pub mod stock_ledger;
pub mod stock_lot;
pub mod stock_transfer;
pub mod stock_transfer_item;
pub mod tenant;
pub mod tenant_membership;
pub mod transfer_approval_condition;
pub mod transfer_approval_level;
pub mod transfer_approval_record;
pub mod transfer_approval_rule;
pub mod user;
