//! Path resolution for the persisted state layout (spec §6).
//!
//! All file/avatar/temp/database paths are derived from a single app data
//! root, resolved here so that the rest of the engine never builds a path
//! by hand.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Resolves the four-tier persisted-state layout rooted at one app data directory.
///
/// ```text
/// {app}/app.db
/// {app}/accounts/{accountId}/account.db
/// {app}/accounts/{accountId}/workspaces/{workspaceId}/workspace.db
/// {app}/accounts/{accountId}/workspaces/{workspaceId}/files/{fileId}.{ext}
/// {app}/accounts/{accountId}/avatars/{avatarId}
/// {app}/temp/...
/// ```
#[derive(Debug, Clone)]
pub struct PathService {
    app_dir: PathBuf,
}

impl PathService {
    /// Build a path service rooted at an explicit directory (used in tests and embeddings
    /// that don't want to touch the real platform config directory).
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
        }
    }

    /// Build a path service rooted at the platform-default config directory
    /// (`$XDG_CONFIG_HOME` / `~/Library/Application Support` / `%APPDATA%`), under an
    /// app-specific subdirectory.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_platform_default(app_name: &str) -> Result<Self> {
        let base = dirs::config_dir().ok_or(EngineError::NoConfigDir)?;
        Ok(Self::new(base.join(app_name)))
    }

    /// Root app data directory.
    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// App DB path (one per client install).
    pub fn app_db(&self) -> PathBuf {
        self.app_dir.join("app.db")
    }

    /// Directory for one account's state.
    pub fn account_dir(&self, account_id: &str) -> PathBuf {
        self.app_dir.join("accounts").join(account_id)
    }

    /// Account DB path (one per logged-in account).
    pub fn account_db(&self, account_id: &str) -> PathBuf {
        self.account_dir(account_id).join("account.db")
    }

    /// Directory for one workspace the account belongs to.
    pub fn workspace_dir(&self, account_id: &str, workspace_id: &str) -> PathBuf {
        self.account_dir(account_id)
            .join("workspaces")
            .join(workspace_id)
    }

    /// Workspace DB path (one per workspace the account belongs to).
    pub fn workspace_db(&self, account_id: &str, workspace_id: &str) -> PathBuf {
        self.workspace_dir(account_id, workspace_id)
            .join("workspace.db")
    }

    /// Path to a file blob belonging to a workspace.
    pub fn file_blob(
        &self,
        account_id: &str,
        workspace_id: &str,
        file_id: &str,
        extension: &str,
    ) -> PathBuf {
        self.workspace_dir(account_id, workspace_id)
            .join("files")
            .join(format!("{file_id}.{extension}"))
    }

    /// Path to an avatar blob belonging to an account.
    pub fn avatar_blob(&self, account_id: &str, avatar_id: &str) -> PathBuf {
        self.account_dir(account_id).join("avatars").join(avatar_id)
    }

    /// Scratch space shared by the whole app install.
    pub fn temp_dir(&self) -> PathBuf {
        self.app_dir.join("temp")
    }

    /// Directory that must be deleted to cascade-destroy an account (§3 lifecycle ownership).
    pub fn account_root_for_deletion(&self, account_id: &str) -> PathBuf {
        self.account_dir(account_id)
    }

    /// Directory that must be deleted to cascade-destroy a workspace (§3 lifecycle ownership).
    pub fn workspace_root_for_deletion(&self, account_id: &str, workspace_id: &str) -> PathBuf {
        self.workspace_dir(account_id, workspace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc() -> PathService {
        PathService::new("/data/app")
    }

    #[test]
    fn app_db_is_rooted_directly_under_app_dir() {
        assert_eq!(svc().app_db(), PathBuf::from("/data/app/app.db"));
    }

    #[test]
    fn workspace_db_nests_under_account_and_workspace() {
        assert_eq!(
            svc().workspace_db("acc1", "ws1"),
            PathBuf::from("/data/app/accounts/acc1/workspaces/ws1/workspace.db")
        );
    }

    #[test]
    fn file_blob_uses_file_id_and_extension() {
        assert_eq!(
            svc().file_blob("acc1", "ws1", "file1", "png"),
            PathBuf::from("/data/app/accounts/acc1/workspaces/ws1/files/file1.png")
        );
    }

    #[test]
    fn avatar_blob_is_scoped_to_account_not_workspace() {
        assert_eq!(
            svc().avatar_blob("acc1", "avatar1"),
            PathBuf::from("/data/app/accounts/acc1/avatars/avatar1")
        );
    }

    #[test]
    fn workspace_root_for_deletion_matches_workspace_dir() {
        let s = svc();
        assert_eq!(
            s.workspace_root_for_deletion("acc1", "ws1"),
            s.workspace_dir("acc1", "ws1")
        );
    }
}
