use crate::model::App;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// The state needed to undo the securing of an [`App`].
///
/// At most one backup exists per app: it is written the first time the app is secured and
/// deleted once a rollback completes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackupData {
    #[serde(rename = "authBackendID")]
    pub auth_backend_id: String,
    #[serde(rename = "serviceName")]
    pub service_name: String,
    #[serde(rename = "servicePortOrNamePort")]
    pub service_port_or_name_port: String,
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Backupper: Send + Sync {
    /// Stores `data` unless a backup already exists.
    ///
    /// Returns the stored backup, which is the previously stored one when present, so securing
    /// an already secured app never replaces the original upstream with the proxy.
    async fn backup_or_get(&self, app: &App, data: BackupData) -> Result<BackupData>;

    async fn get_backup(&self, app: &App) -> Result<Option<BackupData>>;

    /// Deletes the app's backup, if any.
    async fn delete_backup(&self, app: &App) -> Result<()>;
}
