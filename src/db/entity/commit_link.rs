use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Association between a version-control commit and the traces that
/// contributed to it, written by a client-side post-commit hook. The optional
/// `ledger` is an authoritative per-line attribution map that short-circuits
/// scoring when present.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commit_links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub commit_sha: String,
    pub parent_sha: Option<String>,
    /// Non-empty JSON array of trace identifiers.
    #[sea_orm(column_type = "JsonBinary")]
    pub trace_ids: Json,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub files_changed: Option<Json>,
    pub committed_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub ledger: Option<Json>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// The linked trace identifiers as strings, tolerating malformed entries.
    pub fn trace_id_list(&self) -> Vec<String> {
        match &self.trace_ids {
            Json::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
