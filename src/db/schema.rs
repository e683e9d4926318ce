//! Schema bootstrap: create, drop, reset, and inspect the four tables.
//!
//! DDL is derived from the entity definitions, applied in dependency order
//! (projects first), followed by the composite unique indexes the upserts
//! target and the secondary indexes the candidate selector queries rely on.

use sea_orm::sea_query::{Index, IndexCreateStatement, Table};
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, Schema};

use super::entity::{commit_link, conversation_content, project, trace};

/// Table names in creation order.
pub const TABLES: [&str; 4] = ["projects", "traces", "conversation_contents", "commit_links"];

fn indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("ux_traces_project_trace")
            .table(trace::Entity)
            .col(trace::Column::ProjectId)
            .col(trace::Column::TraceId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ix_traces_project_revision")
            .table(trace::Entity)
            .col(trace::Column::ProjectId)
            .col(trace::Column::VcsRevision)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ix_traces_project_timestamp")
            .table(trace::Entity)
            .col(trace::Column::ProjectId)
            .col(trace::Column::TraceTimestamp)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ux_conversation_contents_project_url")
            .table(conversation_content::Entity)
            .col(conversation_content::Column::ProjectId)
            .col(conversation_content::Column::Url)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ux_commit_links_project_sha")
            .table(commit_link::Entity)
            .col(commit_link::Column::ProjectId)
            .col(commit_link::Column::CommitSha)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

/// Create all tables and indexes. Safe to call on an initialized database.
pub async fn create_tables<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(project::Entity),
        schema.create_table_from_entity(trace::Entity),
        schema.create_table_from_entity(conversation_content::Entity),
        schema.create_table_from_entity(commit_link::Entity),
    ];
    for stmt in &mut statements {
        stmt.if_not_exists();
        db.execute(backend.build(stmt)).await?;
    }

    for idx in indexes() {
        db.execute(backend.build(&idx)).await?;
    }

    tracing::info!("schema created ({} tables)", TABLES.len());
    Ok(())
}

/// Drop all application tables.
pub async fn drop_tables<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let statements = [
        Table::drop().table(commit_link::Entity).if_exists().to_owned(),
        Table::drop()
            .table(conversation_content::Entity)
            .if_exists()
            .to_owned(),
        Table::drop().table(trace::Entity).if_exists().to_owned(),
        Table::drop().table(project::Entity).if_exists().to_owned(),
    ];
    for stmt in &statements {
        db.execute(backend.build(stmt)).await?;
    }
    tracing::info!("schema dropped");
    Ok(())
}

/// Drop and recreate all tables.
pub async fn reset_tables<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    drop_tables(db).await?;
    create_tables(db).await
}

/// Row counts per table; `None` when the table does not exist.
pub async fn table_status<C: ConnectionTrait>(
    db: &C,
) -> Result<Vec<(&'static str, Option<u64>)>, DbErr> {
    let mut status = Vec::with_capacity(TABLES.len());
    status.push(("projects", project::Entity::find().count(db).await.ok()));
    status.push(("traces", trace::Entity::find().count(db).await.ok()));
    status.push((
        "conversation_contents",
        conversation_content::Entity::find().count(db).await.ok(),
    ));
    status.push((
        "commit_links",
        commit_link::Entity::find().count(db).await.ok(),
    ));
    Ok(status)
}
