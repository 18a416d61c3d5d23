//! Entities resolved through the lookup service. This crate reads them, it
//! never writes them.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Student {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i64,
    pub student_id: i64,
    pub title: String,
}
