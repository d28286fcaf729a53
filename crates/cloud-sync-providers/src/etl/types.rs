//! Wire types of the ETL backend's public REST API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub source_id: String,
    pub name: String,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationResponse {
    pub destination_id: String,
    pub name: String,
    #[serde(default)]
    pub destination_type: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfiguration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamConfigurations {
    #[serde(default)]
    pub streams: Vec<StreamConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    pub connection_id: String,
    pub name: String,
    pub source_id: String,
    pub destination_id: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub configurations: StreamConfigurations,
    #[serde(default)]
    pub status: Option<String>,
}

/// A stream the source offers, as reported by schema discovery.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProperties {
    pub stream_name: String,
    #[serde(default)]
    pub sync_modes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtlJobStatus {
    Pending,
    Running,
    Incomplete,
    Failed,
    Succeeded,
    Cancelled,
}

impl EtlJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Succeeded | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: i64,
    pub status: EtlJobStatus,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub rows_synced: u64,
    #[serde(default)]
    pub bytes_synced: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResourceCreate<'a> {
    pub name: &'a str,
    pub workspace_id: &'a str,
    pub configuration: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCreate {
    pub name: String,
    pub source_id: String,
    pub destination_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub configurations: StreamConfigurations,
}
