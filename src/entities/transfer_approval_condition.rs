use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transfer_approval_conditions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub rule_id: Uuid,
    pub condition_type: ConditionType,
    /// Used by the threshold conditions.
    pub threshold: Option<i64>,
    /// Used by the branch conditions.
    pub branch_id: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::transfer_approval_rule::Entity",
        from = "Column::RuleId",
        to = "super::transfer_approval_rule::Column::Id",
        on_delete = "Cascade"
    )]
    Rule,
}

impl Related<super::transfer_approval_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(30))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    #[sea_orm(string_value = "TOTAL_QTY_THRESHOLD")]
    TotalQtyThreshold,
    #[sea_orm(string_value = "TOTAL_VALUE_THRESHOLD")]
    TotalValueThreshold,
    #[sea_orm(string_value = "SOURCE_BRANCH")]
    SourceBranch,
    #[sea_orm(string_value = "DESTINATION_BRANCH")]
    DestinationBranch,
}
