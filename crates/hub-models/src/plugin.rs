//! Plugin registry records.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Github,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub active: bool,
    pub data_folder: Option<String>,
    pub display_name: Option<String>,
    pub biothing_type: Option<String>,
}

impl PluginRecord {
    pub fn local(id: impl Into<String>, data_folder: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            url: format!("local://{id}"),
            id,
            plugin_type: PluginType::Local,
            active: true,
            data_folder: Some(data_folder.into()),
            display_name: None,
            biothing_type: None,
        }
    }
}
