use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Audit rows outlive the roles and users they describe, so resource_id
        // carries no foreign key.
        manager
            .create_table(
                Table::create()
                    .table(AuditEvents::Table)
                    .if_not_exists()
                    .col(pk_auto(AuditEvents::Id))
                    .col(string_len(AuditEvents::Action, 50))
                    .col(string_len(AuditEvents::Resource, 20))
                    .col(integer(AuditEvents::ResourceId))
                    .col(text_null(AuditEvents::Details))
                    .col(big_integer(AuditEvents::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_events_resource")
                    .table(AuditEvents::Table)
                    .col(AuditEvents::Resource)
                    .col(AuditEvents::ResourceId)
                    .to_owned(),
            )
            .await?;

        Ok(())
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
    Action,
    Resource,
    ResourceId,
    Details,
    CreatedAt,
}
