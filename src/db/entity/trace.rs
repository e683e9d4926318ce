use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A stored trace: indexed projections of the document plus the full record
/// preserved verbatim in `trace_record`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "traces")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub trace_id: String,
    pub version: String,
    /// Immutable once set.
    pub trace_timestamp: DateTimeUtc,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub vcs: Option<Json>,
    /// `vcs.revision` extracted at ingest; drives the parent-revision lookup.
    pub vcs_revision: Option<String>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub tool: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub files: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<Json>,
    #[sea_orm(column_type = "JsonBinary")]
    pub trace_record: Json,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
