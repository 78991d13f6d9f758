//! The `setup.json` manifest a package carries alongside its payload,
//! telling the driver what to launch once the package has been extracted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use wansetup_core::error::Result;

pub const DESCRIPTOR_FILE_NAME: &str = "setup.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupDescriptor {
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "Arguments")]
    pub arguments: Option<String>,
    #[serde(rename = "ExitRequired")]
    pub exit_required: bool,
    #[serde(rename = "RequireAdministratorPrivileges")]
    pub require_admin: bool,
    #[serde(rename = "HideWindow")]
    pub hide_window: bool,
}

impl SetupDescriptor {
    pub fn load(extracted_dir: &Path) -> Result<Self> {
        let path = extracted_dir.join(DESCRIPTOR_FILE_NAME);
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, extracted_dir: &Path) -> Result<()> {
        let path = extracted_dir.join(DESCRIPTOR_FILE_NAME);
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
