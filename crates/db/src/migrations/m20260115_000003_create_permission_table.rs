//! Create `permission` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Permission::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Permission::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Permission::GroupId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Permission::ResourceKind)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Permission::ResourceId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Permission::AccessLevel)
                            .string_len(20)
                            .not_null()
                            .default("view"),
                    )
                    .col(
                        ColumnDef::new(Permission::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Permission::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_permission_group")
                            .from(Permission::Table, Permission::GroupId)
                            .to(Group::Table, Group::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_permission_group_id")
                    .table(Permission::Table)
                    .col(Permission::GroupId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_permission_resource")
                    .table(Permission::Table)
                    .col(Permission::ResourceKind)
                    .col(Permission::ResourceId)
                    .to_owned(),
            )
            .await?;

        // One permission row per (group, resource)
        manager
            .create_index(
                Index::create()
                    .name("idx_permission_unique")
                    .table(Permission::Table)
                    .col(Permission::GroupId)
                    .col(Permission::ResourceKind)
                    .col(Permission::ResourceId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Permission::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Permission {
    Table,
    Id,
    GroupId,
    ResourceKind,
    ResourceId,
    AccessLevel,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Group {
    Table,
    Id,
}
