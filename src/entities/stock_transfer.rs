use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_transfers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub transfer_number: String,
    pub source_branch_id: Uuid,
    pub destination_branch_id: Uuid,
    pub status: TransferStatus,
    pub requested_by: Uuid,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Text", nullable)]
    pub review_notes: Option<String>,
    pub shipped_by: Option<Uuid>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    /// Rule matched at submit time, if any.
    pub approval_rule_id: Option<Uuid>,
    /// Set on a reversal transfer: the transfer it undoes.
    pub reversal_of_transfer_id: Option<Uuid>,
    /// Set on a reversed transfer: the reversal that undid it.
    pub reversed_by_transfer_id: Option<Uuid>,
    #[sea_orm(column_type = "Text", nullable)]
    pub reversal_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_transfer_item::Entity")]
    Items,
    #[sea_orm(has_many = "super::transfer_approval_record::Entity")]
    ApprovalRecords,
}

impl Related<super::stock_transfer_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::transfer_approval_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApprovalRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "REQUESTED")]
    Requested,
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "PARTIALLY_RECEIVED")]
    PartiallyReceived,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "REVERSED")]
    Reversed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Draft => "DRAFT",
            TransferStatus::Requested => "REQUESTED",
            TransferStatus::Approved => "APPROVED",
            TransferStatus::Rejected => "REJECTED",
            TransferStatus::Shipped => "SHIPPED",
            TransferStatus::PartiallyReceived => "PARTIALLY_RECEIVED",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::Reversed => "REVERSED",
        }
    }

    /// Edges of the transfer lifecycle.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Draft, Requested)
                | (Draft, Cancelled)
                | (Requested, Approved)
                | (Requested, Rejected)
                | (Requested, Cancelled)
                | (Approved, Shipped)
                | (Approved, Cancelled)
                | (Shipped, PartiallyReceived)
                | (Shipped, Completed)
                | (PartiallyReceived, PartiallyReceived)
                | (PartiallyReceived, Completed)
                | (Completed, Reversed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Rejected | TransferStatus::Cancelled | TransferStatus::Reversed
        )
    }

    /// Transfers that still hold a claim on their products.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            TransferStatus::Draft
                | TransferStatus::Requested
                | TransferStatus::Approved
                | TransferStatus::Shipped
                | TransferStatus::PartiallyReceived
        )
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::TransferStatus::{self, *};
    use sea_orm::Iterable;

    #[test]
    fn happy_path_is_allowed() {
        let path = [Draft, Requested, Approved, Shipped, PartiallyReceived, Completed, Reversed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in TransferStatus::iter().filter(TransferStatus::is_terminal) {
            for to in TransferStatus::iter() {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn shipped_transfers_cannot_be_cancelled_or_reversed() {
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Shipped.can_transition_to(Reversed));
        assert!(!PartiallyReceived.can_transition_to(Reversed));
        assert!(!Approved.can_transition_to(Completed));
        assert!(!Draft.can_transition_to(Approved));
    }

    #[test]
    fn completed_is_closed_but_not_terminal() {
        assert!(!Completed.is_open());
        assert!(!Completed.is_terminal());
        assert!(Shipped.is_open());
    }
}
