use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One approval step of a rule. Exactly one of `required_role_id` and
/// `required_user_id` is set.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transfer_approval_levels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub rule_id: Uuid,
    pub level: i32,
    pub name: Option<String>,
    pub required_role_id: Option<Uuid>,
    pub required_user_id: Option<Uuid>,
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
