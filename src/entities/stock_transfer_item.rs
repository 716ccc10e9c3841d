use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_transfer_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub product_id: Uuid,
    pub qty_requested: i64,
    pub qty_approved: Option<i64>,
    pub qty_shipped: i64,
    pub qty_received: i64,
    /// Weighted average cost of the lots drawn at ship time.
    pub unit_cost_cents: Option<i64>,
    /// Source lots consumed at ship time, as a list of [`LotDraw`].
    #[sea_orm(column_type = "Json")]
    pub lot_draws: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_transfer::Entity",
        from = "Column::TransferId",
        to = "super::stock_transfer::Column::Id",
        on_delete = "Cascade"
    )]
    Transfer,
}

impl Related<super::stock_transfer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transfer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// One lot drawn from the source branch when a transfer ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_id: Uuid,
    pub qty: i64,
    pub unit_cost_cents: Option<i64>,
}

impl Model {
    pub fn lot_draws(&self) -> Vec<LotDraw> {
        serde_json::from_value(self.lot_draws.clone()).unwrap_or_default()
    }

    /// Quantity the transfer is cleared to move.
    pub fn qty_to_ship(&self) -> i64 {
        self.qty_approved.unwrap_or(self.qty_requested)
    }
}
