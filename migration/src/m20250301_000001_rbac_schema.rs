use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Permission catalog
        manager
            .create_table(
                Table::create()
                    .table(Permissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Permissions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Permissions::Name))
                    .col(string_null(Permissions::Description))
                    .col(string(Permissions::Resource))
                    .col(string(Permissions::Action))
                    .col(big_integer(Permissions::CreatedAt))
                    .col(big_integer(Permissions::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // A (resource, action) pair names exactly one permission
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_permissions_resource_action")
                    .table(Permissions::Table)
                    .col(Permissions::Resource)
                    .col(Permissions::Action)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Role -> permission grants
        manager
            .create_table(
                Table::create()
                    .table(RoleGrants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RoleGrants::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(RoleGrants::Role))
                    .col(string(RoleGrants::PermissionId))
                    .col(string_null(RoleGrants::CreatedBy))
                    .col(big_integer(RoleGrants::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_role_grants_permission")
                            .from(RoleGrants::Table, RoleGrants::PermissionId)
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_role_grants_role_permission")
                    .table(RoleGrants::Table)
                    .col(RoleGrants::Role)
                    .col(RoleGrants::PermissionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // User -> role assignments
        manager
            .create_table(
                Table::create()
                    .table(UserRoles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserRoles::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(UserRoles::UserId))
                    .col(string(UserRoles::Role))
                    .col(string_null(UserRoles::CreatedBy))
                    .col(big_integer(UserRoles::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_user_roles_user_role")
                    .table(UserRoles::Table)
                    .col(UserRoles::UserId)
                    .col(UserRoles::Role)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Role counts and grant fan-out scan by role
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_user_roles_role")
                    .table(UserRoles::Table)
                    .col(UserRoles::Role)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserRoles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RoleGrants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Permissions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Permissions {
    Table,
    Id,
    Name,
    Description,
    Resource,
    Action,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RoleGrants {
    Table,
    Id,
    Role,
    PermissionId,
    CreatedBy,
    CreatedAt,
}

#[derive(DeriveIden)]
enum UserRoles {
    Table,
    Id,
    UserId,
    Role,
    CreatedBy,
    CreatedAt,
}
