use rusqlite::Connection;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Outstanding acquisition ticket per account. The design allows at most
    /// one acquisition in flight per account; late results with a superseded
    /// ticket are discarded.
    pub pending_ingests: HashMap<String, String>,
}
