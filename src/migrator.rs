use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_identity_tables::Migration),
            Box::new(m20260101_000002_create_branch_tables::Migration),
            Box::new(m20260101_000003_create_stock_tables::Migration),
            Box::new(m20260101_000004_create_transfer_tables::Migration),
            Box::new(m20260101_000005_create_approval_tables::Migration),
            Box::new(m20260101_000006_create_audit_events_table::Migration),
        ]
    }
}

async fn unique_index(
    manager: &SchemaManager<'_>,
    name: &str,
    table: impl IntoIden + 'static,
    cols: Vec<DynIden>,
) -> Result<(), DbErr> {
    let mut index = Index::create();
    index.if_not_exists().name(name).table(table).unique();
    for col in cols {
        index.col(col);
    }
    manager.create_index(index.to_owned()).await
}

async fn plain_index(
    manager: &SchemaManager<'_>,
    name: &str,
    table: impl IntoIden + 'static,
    cols: Vec<DynIden>,
) -> Result<(), DbErr> {
    let mut index = Index::create();
    index.if_not_exists().name(name).table(table);
    for col in cols {
        index.col(col);
    }
    manager.create_index(index.to_owned()).await
}

mod m20260101_000001_create_identity_tables {
    use super::{plain_index, unique_index};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000001_create_identity_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Tenants::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Tenants::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Tenants::Name).string().not_null())
                        .col(ColumnDef::new(Tenants::Slug).string().not_null())
                        .col(
                            ColumnDef::new(Tenants::NextTransferSeq)
                                .big_integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Tenants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Tenants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_tenants_slug",
                Tenants::Table,
                vec![Tenants::Slug.into_iden()],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null())
                        .col(ColumnDef::new(Users::Name).string().not_null())
                        .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                        .col(
                            ColumnDef::new(Users::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_users_email",
                Users::Table,
                vec![Users::Email.into_iden()],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Roles::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Roles::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Roles::TenantId).uuid().not_null())
                        .col(ColumnDef::new(Roles::Key).string().not_null())
                        .col(ColumnDef::new(Roles::Name).string().not_null())
                        .col(ColumnDef::new(Roles::Description).text().null())
                        .col(
                            ColumnDef::new(Roles::IsSystem)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Roles::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Roles::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_roles_tenant_id")
                                .from(Roles::Table, Roles::TenantId)
                                .to(Tenants::Table, Tenants::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_roles_tenant_key",
                Roles::Table,
                vec![Roles::TenantId.into_iden(), Roles::Key.into_iden()],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RolePermissions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RolePermissions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RolePermissions::RoleId).uuid().not_null())
                        .col(
                            ColumnDef::new(RolePermissions::PermissionKey)
                                .string()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_role_permissions_role_id")
                                .from(RolePermissions::Table, RolePermissions::RoleId)
                                .to(Roles::Table, Roles::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_role_permissions_role_key",
                RolePermissions::Table,
                vec![
                    RolePermissions::RoleId.into_iden(),
                    RolePermissions::PermissionKey.into_iden(),
                ],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TenantMemberships::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TenantMemberships::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TenantMemberships::TenantId).uuid().not_null())
                        .col(ColumnDef::new(TenantMemberships::UserId).uuid().not_null())
                        .col(ColumnDef::new(TenantMemberships::RoleId).uuid().not_null())
                        .col(
                            ColumnDef::new(TenantMemberships::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TenantMemberships::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tenant_memberships_tenant_id")
                                .from(TenantMemberships::Table, TenantMemberships::TenantId)
                                .to(Tenants::Table, Tenants::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tenant_memberships_user_id")
                                .from(TenantMemberships::Table, TenantMemberships::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tenant_memberships_role_id")
                                .from(TenantMemberships::Table, TenantMemberships::RoleId)
                                .to(Roles::Table, Roles::Id),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_tenant_memberships_tenant_user",
                TenantMemberships::Table,
                vec![
                    TenantMemberships::TenantId.into_iden(),
                    TenantMemberships::UserId.into_iden(),
                ],
            )
            .await?;
            plain_index(
                manager,
                "idx_tenant_memberships_role_id",
                TenantMemberships::Table,
                vec![TenantMemberships::RoleId.into_iden()],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TenantMemberships::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RolePermissions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Roles::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Tenants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Tenants {
        Table,
        Id,
        Name,
        Slug,
        NextTransferSeq,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(crate) enum Users {
        Table,
        Id,
        Email,
        Name,
        PasswordHash,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(crate) enum Roles {
        Table,
        Id,
        TenantId,
        Key,
        Name,
        Description,
        IsSystem,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RolePermissions {
        Table,
        Id,
        RoleId,
        PermissionKey,
    }

    #[derive(DeriveIden)]
    enum TenantMemberships {
        Table,
        Id,
        TenantId,
        UserId,
        RoleId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260101_000002_create_branch_tables {
    use super::m20260101_000001_create_identity_tables::{Tenants, Users};
    use super::{plain_index, unique_index};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000002_create_branch_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Branches::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Branches::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Branches::TenantId).uuid().not_null())
                        .col(ColumnDef::new(Branches::Name).string().not_null())
                        .col(ColumnDef::new(Branches::Slug).string().not_null())
                        .col(ColumnDef::new(Branches::Address).text().null())
                        .col(
                            ColumnDef::new(Branches::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Branches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Branches::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_branches_tenant_id")
                                .from(Branches::Table, Branches::TenantId)
                                .to(Tenants::Table, Tenants::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_branches_tenant_slug",
                Branches::Table,
                vec![Branches::TenantId.into_iden(), Branches::Slug.into_iden()],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BranchMemberships::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BranchMemberships::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BranchMemberships::TenantId).uuid().not_null())
                        .col(ColumnDef::new(BranchMemberships::BranchId).uuid().not_null())
                        .col(ColumnDef::new(BranchMemberships::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(BranchMemberships::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_branch_memberships_branch_id")
                                .from(BranchMemberships::Table, BranchMemberships::BranchId)
                                .to(Branches::Table, Branches::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_branch_memberships_user_id")
                                .from(BranchMemberships::Table, BranchMemberships::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_branch_memberships_branch_user",
                BranchMemberships::Table,
                vec![
                    BranchMemberships::BranchId.into_iden(),
                    BranchMemberships::UserId.into_iden(),
                ],
            )
            .await?;
            plain_index(
                manager,
                "idx_branch_memberships_tenant_user",
                BranchMemberships::Table,
                vec![
                    BranchMemberships::TenantId.into_iden(),
                    BranchMemberships::UserId.into_iden(),
                ],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BranchMemberships::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Branches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Branches {
        Table,
        Id,
        TenantId,
        Name,
        Slug,
        Address,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum BranchMemberships {
        Table,
        Id,
        TenantId,
        BranchId,
        UserId,
        CreatedAt,
    }
}

mod m20260101_000003_create_stock_tables {
    use super::m20260101_000001_create_identity_tables::Tenants;
    use super::{plain_index, unique_index};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000003_create_stock_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::TenantId).uuid().not_null())
                        .col(ColumnDef::new(Products::Sku).string().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Description).text().null())
                        .col(
                            ColumnDef::new(Products::PriceCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::EntityVersion)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_products_tenant_id")
                                .from(Products::Table, Products::TenantId)
                                .to(Tenants::Table, Tenants::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_products_tenant_sku",
                Products::Table,
                vec![Products::TenantId.into_iden(), Products::Sku.into_iden()],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProductStock::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductStock::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductStock::TenantId).uuid().not_null())
                        .col(ColumnDef::new(ProductStock::BranchId).uuid().not_null())
                        .col(ColumnDef::new(ProductStock::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(ProductStock::QtyOnHand)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductStock::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_product_stock_tenant_branch_product",
                ProductStock::Table,
                vec![
                    ProductStock::TenantId.into_iden(),
                    ProductStock::BranchId.into_iden(),
                    ProductStock::ProductId.into_iden(),
                ],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockLots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(StockLots::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(StockLots::TenantId).uuid().not_null())
                        .col(ColumnDef::new(StockLots::BranchId).uuid().not_null())
                        .col(ColumnDef::new(StockLots::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockLots::QtyReceived).big_integer().not_null())
                        .col(
                            ColumnDef::new(StockLots::QtyRemaining)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLots::UnitCostCents).big_integer().null())
                        .col(ColumnDef::new(StockLots::SourceRef).string().null())
                        .col(
                            ColumnDef::new(StockLots::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLots::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;
            plain_index(
                manager,
                "idx_stock_lots_fifo",
                StockLots::Table,
                vec![
                    StockLots::TenantId.into_iden(),
                    StockLots::BranchId.into_iden(),
                    StockLots::ProductId.into_iden(),
                    StockLots::ReceivedAt.into_iden(),
                ],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockLedger::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLedger::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLedger::TenantId).uuid().not_null())
                        .col(ColumnDef::new(StockLedger::BranchId).uuid().not_null())
                        .col(ColumnDef::new(StockLedger::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockLedger::LotId).uuid().null())
                        .col(ColumnDef::new(StockLedger::Kind).string_len(20).not_null())
                        .col(ColumnDef::new(StockLedger::QtyDelta).big_integer().not_null())
                        .col(
                            ColumnDef::new(StockLedger::UnitCostCents)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(StockLedger::Reason).text().null())
                        .col(ColumnDef::new(StockLedger::ReferenceType).string().null())
                        .col(ColumnDef::new(StockLedger::ReferenceId).uuid().null())
                        .col(ColumnDef::new(StockLedger::ActorUserId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockLedger::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;
            plain_index(
                manager,
                "idx_stock_ledger_tenant_created",
                StockLedger::Table,
                vec![
                    StockLedger::TenantId.into_iden(),
                    StockLedger::CreatedAt.into_iden(),
                ],
            )
            .await?;
            plain_index(
                manager,
                "idx_stock_ledger_branch_product",
                StockLedger::Table,
                vec![
                    StockLedger::BranchId.into_iden(),
                    StockLedger::ProductId.into_iden(),
                ],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockLedger::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockLots::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ProductStock::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        TenantId,
        Sku,
        Name,
        Description,
        PriceCents,
        IsActive,
        EntityVersion,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ProductStock {
        Table,
        Id,
        TenantId,
        BranchId,
        ProductId,
        QtyOnHand,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum StockLots {
        Table,
        Id,
        TenantId,
        BranchId,
        ProductId,
        QtyReceived,
        QtyRemaining,
        UnitCostCents,
        SourceRef,
        ReceivedAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum StockLedger {
        Table,
        Id,
        TenantId,
        BranchId,
        ProductId,
        LotId,
        Kind,
        QtyDelta,
        UnitCostCents,
        Reason,
        ReferenceType,
        ReferenceId,
        ActorUserId,
        CreatedAt,
    }
}

mod m20260101_000004_create_transfer_tables {
    use super::m20260101_000001_create_identity_tables::Tenants;
    use super::m20260101_000002_create_branch_tables::Branches;
    use super::{plain_index, unique_index};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000004_create_transfer_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockTransfers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockTransfers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransfers::TenantId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockTransfers::TransferNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::SourceBranchId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::DestinationBranchId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransfers::RequestedBy).uuid().not_null())
                        .col(ColumnDef::new(StockTransfers::ReviewedBy).uuid().null())
                        .col(
                            ColumnDef::new(StockTransfers::ReviewedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransfers::ReviewNotes).text().null())
                        .col(ColumnDef::new(StockTransfers::ShippedBy).uuid().null())
                        .col(
                            ColumnDef::new(StockTransfers::ShippedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransfers::Notes).text().null())
                        .col(ColumnDef::new(StockTransfers::ApprovalRuleId).uuid().null())
                        .col(
                            ColumnDef::new(StockTransfers::ReversalOfTransferId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::ReversedByTransferId)
                                .uuid()
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransfers::ReversalReason).text().null())
                        .col(
                            ColumnDef::new(StockTransfers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_transfers_tenant_id")
                                .from(StockTransfers::Table, StockTransfers::TenantId)
                                .to(Tenants::Table, Tenants::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_transfers_source_branch_id")
                                .from(StockTransfers::Table, StockTransfers::SourceBranchId)
                                .to(Branches::Table, Branches::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_transfers_destination_branch_id")
                                .from(StockTransfers::Table, StockTransfers::DestinationBranchId)
                                .to(Branches::Table, Branches::Id),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_stock_transfers_tenant_number",
                StockTransfers::Table,
                vec![
                    StockTransfers::TenantId.into_iden(),
                    StockTransfers::TransferNumber.into_iden(),
                ],
            )
            .await?;
            plain_index(
                manager,
                "idx_stock_transfers_tenant_status",
                StockTransfers::Table,
                vec![
                    StockTransfers::TenantId.into_iden(),
                    StockTransfers::Status.into_iden(),
                ],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockTransferItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockTransferItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransferItems::TransferId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransferItems::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransferItems::QtyRequested)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransferItems::QtyApproved)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransferItems::QtyShipped)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockTransferItems::QtyReceived)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockTransferItems::UnitCostCents)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransferItems::LotDraws).json().not_null())
                        .col(
                            ColumnDef::new(StockTransferItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransferItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_transfer_items_transfer_id")
                                .from(StockTransferItems::Table, StockTransferItems::TransferId)
                                .to(StockTransfers::Table, StockTransfers::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_stock_transfer_items_transfer_product",
                StockTransferItems::Table,
                vec![
                    StockTransferItems::TransferId.into_iden(),
                    StockTransferItems::ProductId.into_iden(),
                ],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockTransferItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockTransfers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum StockTransfers {
        Table,
        Id,
        TenantId,
        TransferNumber,
        SourceBranchId,
        DestinationBranchId,
        Status,
        RequestedBy,
        ReviewedBy,
        ReviewedAt,
        ReviewNotes,
        ShippedBy,
        ShippedAt,
        CompletedAt,
        CancelledAt,
        Notes,
        ApprovalRuleId,
        ReversalOfTransferId,
        ReversedByTransferId,
        ReversalReason,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum StockTransferItems {
        Table,
        Id,
        TransferId,
        ProductId,
        QtyRequested,
        QtyApproved,
        QtyShipped,
        QtyReceived,
        UnitCostCents,
        LotDraws,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260101_000005_create_approval_tables {
    use super::m20260101_000001_create_identity_tables::Tenants;
    use super::m20260101_000004_create_transfer_tables::StockTransfers;
    use super::{plain_index, unique_index};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000005_create_approval_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TransferApprovalRules::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TransferApprovalRules::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRules::TenantId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransferApprovalRules::Name).string().not_null())
                        .col(
                            ColumnDef::new(TransferApprovalRules::Description)
                                .text()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRules::ApprovalMode)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRules::Priority)
                                .integer()
                                .not_null()
                                .default(100),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRules::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRules::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRules::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfer_approval_rules_tenant_id")
                                .from(TransferApprovalRules::Table, TransferApprovalRules::TenantId)
                                .to(Tenants::Table, Tenants::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            plain_index(
                manager,
                "idx_transfer_approval_rules_tenant_priority",
                TransferApprovalRules::Table,
                vec![
                    TransferApprovalRules::TenantId.into_iden(),
                    TransferApprovalRules::Priority.into_iden(),
                ],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TransferApprovalConditions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TransferApprovalConditions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalConditions::RuleId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalConditions::ConditionType)
                                .string_len(30)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalConditions::Threshold)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalConditions::BranchId)
                                .uuid()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfer_approval_conditions_rule_id")
                                .from(
                                    TransferApprovalConditions::Table,
                                    TransferApprovalConditions::RuleId,
                                )
                                .to(TransferApprovalRules::Table, TransferApprovalRules::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TransferApprovalLevels::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TransferApprovalLevels::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalLevels::RuleId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalLevels::Level)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransferApprovalLevels::Name).string().null())
                        .col(
                            ColumnDef::new(TransferApprovalLevels::RequiredRoleId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalLevels::RequiredUserId)
                                .uuid()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfer_approval_levels_rule_id")
                                .from(
                                    TransferApprovalLevels::Table,
                                    TransferApprovalLevels::RuleId,
                                )
                                .to(TransferApprovalRules::Table, TransferApprovalRules::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_transfer_approval_levels_rule_level",
                TransferApprovalLevels::Table,
                vec![
                    TransferApprovalLevels::RuleId.into_iden(),
                    TransferApprovalLevels::Level.into_iden(),
                ],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TransferApprovalRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TransferApprovalRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::TransferId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::RuleId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::Level)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::ApprovalMode)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::RequiredRoleId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::RequiredUserId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::ActedBy)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferApprovalRecords::ActedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(TransferApprovalRecords::Notes).text().null())
                        .col(
                            ColumnDef::new(TransferApprovalRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfer_approval_records_transfer_id")
                                .from(
                                    TransferApprovalRecords::Table,
                                    TransferApprovalRecords::TransferId,
                                )
                                .to(StockTransfers::Table, StockTransfers::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;
            unique_index(
                manager,
                "ux_transfer_approval_records_transfer_level",
                TransferApprovalRecords::Table,
                vec![
                    TransferApprovalRecords::TransferId.into_iden(),
                    TransferApprovalRecords::Level.into_iden(),
                ],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TransferApprovalRecords::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(TransferApprovalLevels::Table).to_owned())
                .await?;
            manager
                .drop_table(
                    Table::drop()
                        .table(TransferApprovalConditions::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_table(Table::drop().table(TransferApprovalRules::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum TransferApprovalRules {
        Table,
        Id,
        TenantId,
        Name,
        Description,
        ApprovalMode,
        Priority,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum TransferApprovalConditions {
        Table,
        Id,
        RuleId,
        ConditionType,
        Threshold,
        BranchId,
    }

    #[derive(DeriveIden)]
    enum TransferApprovalLevels {
        Table,
        Id,
        RuleId,
        Level,
        Name,
        RequiredRoleId,
        RequiredUserId,
    }

    #[derive(DeriveIden)]
    enum TransferApprovalRecords {
        Table,
        Id,
        TransferId,
        RuleId,
        Level,
        ApprovalMode,
        RequiredRoleId,
        RequiredUserId,
        Status,
        ActedBy,
        ActedAt,
        Notes,
        CreatedAt,
    }
}

mod m20260101_000006_create_audit_events_table {
    use super::plain_index;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000006_create_audit_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AuditEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AuditEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AuditEvents::TenantId).uuid().not_null())
                        .col(ColumnDef::new(AuditEvents::ActorUserId).uuid().null())
                        .col(ColumnDef::new(AuditEvents::EntityType).string().not_null())
                        .col(ColumnDef::new(AuditEvents::EntityId).uuid().not_null())
                        .col(ColumnDef::new(AuditEvents::Action).string().not_null())
                        .col(ColumnDef::new(AuditEvents::Before).json().null())
                        .col(ColumnDef::new(AuditEvents::After).json().null())
                        .col(ColumnDef::new(AuditEvents::CorrelationId).string().null())
                        .col(
                            ColumnDef::new(AuditEvents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;
            plain_index(
                manager,
                "idx_audit_events_tenant_created",
                AuditEvents::Table,
                vec![
                    AuditEvents::TenantId.into_iden(),
                    AuditEvents::CreatedAt.into_iden(),
                ],
            )
            .await?;
            plain_index(
                manager,
                "idx_audit_events_entity",
                AuditEvents::Table,
                vec![
                    AuditEvents::EntityType.into_iden(),
                    AuditEvents::EntityId.into_iden(),
                ],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AuditEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AuditEvents {
        Table,
        Id,
        TenantId,
        ActorUserId,
        EntityType,
        EntityId,
        Action,
        Before,
        After,
        CorrelationId,
        CreatedAt,
    }
}
