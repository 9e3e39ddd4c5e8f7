//! Account/Workspace services (SPEC_FULL §5.F): the lifecycle layer the
//! component table names at L3 but that `spec.md` never gives its own
//! `§4.x` section.
//!
//! Three nested owners, each holding a non-owning reference to its parent
//! (an `Arc` it never mutates through) plus its own
//! `tokio_util::sync::CancellationToken` derived from the parent's — the
//! "single owner + non-owning handle" pattern the teacher uses for its
//! Tauri app-state tree:
//!
//! - [`AppService`] owns the App DB path, the registry of [`AccountService`]s,
//!   and the periodic cleanup task (§5).
//! - [`AccountService`] owns the Account DB, its [`WorkspaceService`]s, and
//!   the account's [`SocketSession`].
//! - [`WorkspaceService`] owns one [`WorkspaceStore`] and drains it via a
//!   [`Synchronizer`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::events::EventBus;
use crate::paths::PathService;
use crate::socket::SocketSession;
use crate::store::WorkspaceStore;

/// Owns one workspace's durable store and its independent sync lifecycle.
pub struct WorkspaceService {
    pub workspace_id: String,
    pub store: Arc<WorkspaceStore>,
    cancellation: CancellationToken,
}

impl WorkspaceService {
    fn new(workspace_id: impl Into<String>, store: Arc<WorkspaceStore>, parent: &CancellationToken) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            store,
            cancellation: parent.child_token(),
        }
    }

    /// Token to pass to this workspace's background sync task; cancelled
    /// when the workspace is removed or an ancestor shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Tear down this workspace's background work. Idempotent.
    pub fn shut_down(&self) {
        self.cancellation.cancel();
    }
}

/// Owns one logged-in account's workspaces and socket session.
pub struct AccountService {
    pub account_id: String,
    pub socket: Arc<Mutex<SocketSession>>,
    workspaces: RwLock<HashMap<String, Arc<WorkspaceService>>>,
    cancellation: CancellationToken,
}

impl AccountService {
    fn new(account_id: impl Into<String>, socket: SocketSession, parent: &CancellationToken) -> Self {
        Self {
            account_id: account_id.into(),
            socket: Arc::new(Mutex::new(socket)),
            workspaces: RwLock::new(HashMap::new()),
            cancellation: parent.child_token(),
        }
    }

    /// Register a workspace this account belongs to, returning its service handle.
    pub fn add_workspace(&self, workspace_id: impl Into<String>, store: WorkspaceStore) -> Arc<WorkspaceService> {
        let workspace_id = workspace_id.into();
        let service = Arc::new(WorkspaceService::new(
            workspace_id.clone(),
            Arc::new(store),
            &self.cancellation,
        ));
        self.workspaces
            .write()
            .unwrap()
            .insert(workspace_id, service.clone());
        service
    }

    /// Look up a registered workspace by id.
    pub fn workspace(&self, workspace_id: &str) -> Option<Arc<WorkspaceService>> {
        self.workspaces.read().unwrap().get(workspace_id).cloned()
    }

    /// Tear down and forget a workspace (e.g. the account left it).
    pub fn remove_workspace(&self, workspace_id: &str) -> bool {
        if let Some(service) = self.workspaces.write().unwrap().remove(workspace_id) {
            service.shut_down();
            true
        } else {
            false
        }
    }

    /// Number of workspaces currently registered for this account.
    pub fn workspace_count(&self) -> usize {
        self.workspaces.read().unwrap().len()
    }

    /// Tear down every workspace and this account's own background work. Idempotent.
    pub fn shut_down(&self) {
        for service in self.workspaces.read().unwrap().values() {
            service.shut_down();
        }
        self.cancellation.cancel();
    }
}

/// Root of the service tree: one per running engine instance.
pub struct AppService {
    pub paths: PathService,
    pub config: EngineConfig,
    pub events: Arc<EventBus>,
    accounts: RwLock<HashMap<String, Arc<AccountService>>>,
    cancellation: CancellationToken,
}

impl AppService {
    /// Create the root service. Does not touch disk or start any background task.
    pub fn new(paths: PathService, config: EngineConfig) -> Self {
        Self {
            paths,
            config,
            events: Arc::new(EventBus::new()),
            accounts: RwLock::new(HashMap::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Register a newly logged-in account, returning its service handle.
    pub fn add_account(&self, account_id: impl Into<String>) -> Arc<AccountService> {
        let account_id = account_id.into();
        let socket = SocketSession::new(self.config.socket_backoff);
        let service = Arc::new(AccountService::new(
            account_id.clone(),
            socket,
            &self.cancellation,
        ));
        self.accounts
            .write()
            .unwrap()
            .insert(account_id, service.clone());
        service
    }

    /// Look up a registered account by id.
    pub fn account(&self, account_id: &str) -> Option<Arc<AccountService>> {
        self.accounts.read().unwrap().get(account_id).cloned()
    }

    /// Log an account out: tear down its workspaces and socket, then forget it.
    pub fn remove_account(&self, account_id: &str) -> bool {
        if let Some(service) = self.accounts.write().unwrap().remove(account_id) {
            service.shut_down();
            true
        } else {
            false
        }
    }

    /// Number of accounts currently logged in.
    pub fn account_count(&self) -> usize {
        self.accounts.read().unwrap().len()
    }

    /// Cancellation token for the whole service tree; cancelling it tears
    /// down every account and workspace along with the cleanup task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Tear down the entire service tree. Idempotent.
    pub fn shut_down(&self) {
        for account in self.accounts.read().unwrap().values() {
            account.shut_down();
        }
        self.cancellation.cancel();
    }

    /// Run `cleanup` on every tick of `config.cleanup_interval`, debounced so
    /// a tick is skipped if the previous run is still within
    /// `config.cleanup_debounce` (§5). Returns once the service's
    /// cancellation token fires.
    pub async fn run_cleanup_loop<F>(&self, mut cleanup: F)
    where
        F: FnMut(),
    {
        let mut ticker = interval(self.config.cleanup_interval);
        let debounce = self.config.cleanup_debounce;
        let mut last_run: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    let now = tokio::time::Instant::now();
                    let due = match last_run {
                        Some(last) => now.duration_since(last) >= debounce,
                        None => true,
                    };
                    if due {
                        cleanup();
                        last_run = Some(now);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_service() -> AppService {
        AppService::new(PathService::new("/tmp/app"), EngineConfig::with_app_dir("/tmp/app"))
    }

    #[test]
    fn accounts_and_workspaces_nest_under_the_app_service() {
        let app = app_service();
        let account = app.add_account("acc1");
        let workspace = account.add_workspace("ws1", WorkspaceStore::in_memory("ws1", app.events.clone()).unwrap());

        assert_eq!(app.account_count(), 1);
        assert_eq!(account.workspace_count(), 1);
        assert_eq!(workspace.workspace_id, "ws1");
        assert!(account.workspace("ws1").is_some());
    }

    #[test]
    fn removing_an_account_cancels_its_workspace_tokens() {
        let app = app_service();
        let account = app.add_account("acc1");
        let workspace = account.add_workspace("ws1", WorkspaceStore::in_memory("ws1", app.events.clone()).unwrap());
        let token = workspace.cancellation_token();

        assert!(app.remove_account("acc1"));
        assert!(token.is_cancelled());
        assert!(app.account("acc1").is_none());
    }

    #[test]
    fn app_shutdown_cascades_to_every_descendant() {
        let app = app_service();
        let account = app.add_account("acc1");
        let workspace = account.add_workspace("ws1", WorkspaceStore::in_memory("ws1", app.events.clone()).unwrap());
        let token = workspace.cancellation_token();

        app.shut_down();
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_loop_runs_on_each_tick_until_cancelled() {
        let mut config = EngineConfig::with_app_dir("/tmp/app");
        config.cleanup_interval = Duration::from_millis(10);
        config.cleanup_debounce = Duration::from_millis(0);
        let app = Arc::new(AppService::new(PathService::new("/tmp/app"), config));

        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runs2 = runs.clone();
        let app2 = app.clone();

        let handle = tokio::spawn(async move {
            app2.run_cleanup_loop(|| {
                runs2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .await;
        });

        tokio::time::advance(Duration::from_millis(35)).await;
        app.shut_down();
        handle.await.unwrap();

        assert!(runs.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }
}
