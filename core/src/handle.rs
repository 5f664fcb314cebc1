//! Cloneable handle shared by plugins and the client

use crate::config::SERVER_SECTION;
use crate::message::sanitize_line;
use crate::plugin::{HandlerInfo, Plugin, Registry};
use crate::{AccessList, Command, ConfigStore, ConnectionState, Error, Event, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub(crate) struct Shared {
    pub(crate) config: ConfigStore,
    pub(crate) access: AccessList,
    pub(crate) outbound: mpsc::Sender<String>,
    pub(crate) state: RwLock<ConnectionState>,
    pub(crate) registry: RwLock<Option<Arc<Registry>>>,
    pub(crate) shutdown: CancellationToken,
    disconnecting: AtomicBool,
    teardown_done: AtomicBool,
}

impl Shared {
    pub(crate) fn new(config: ConfigStore, access: AccessList, outbound: mpsc::Sender<String>) -> Self {
        Self {
            config,
            access,
            outbound,
            state: RwLock::new(ConnectionState::Disconnected),
            registry: RwLock::new(None),
            shutdown: CancellationToken::new(),
            disconnecting: AtomicBool::new(false),
            teardown_done: AtomicBool::new(false),
        }
    }
}

/// Handle to a client, cheap to clone and safe to use from any task
#[derive(Clone)]
pub struct ClientHandle {
    pub(crate) shared: Arc<Shared>,
}

impl ClientHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Configuration store
    pub fn config(&self) -> &ConfigStore {
        &self.shared.config
    }

    /// Access list
    pub fn access(&self) -> &AccessList {
        &self.shared.access
    }

    /// Access level of `hostmask`
    pub fn access_level(&self, hostmask: &str) -> u32 {
        self.shared.access.level_for(hostmask)
    }

    /// Grant `level` to hostmasks matching `pattern`
    pub fn set_access_level(&self, pattern: &str, level: u32) -> Result<()> {
        self.shared.access.grant(pattern, level)
    }

    /// Revoke the entry for exactly `pattern`
    pub fn remove_access_level(&self, pattern: &str) -> bool {
        self.shared.access.revoke(pattern)
    }

    /// Our current nickname
    pub fn nick(&self) -> String {
        self.shared.config.get_string(SERVER_SECTION, "nick").unwrap_or_default()
    }

    /// Command trigger prefix
    pub fn trigger(&self) -> String {
        self.shared
            .config
            .get_string(SERVER_SECTION, "trigger")
            .unwrap_or_else(|| "!".to_string())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut current = self.shared.state.write();
        if *current != state {
            debug!("Connection state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.disconnecting.load(Ordering::SeqCst) || self.shared.shutdown.is_cancelled()
    }

    /// Queue a line for the server.
    ///
    /// CR and LF are replaced and the line is cut to the protocol limit, so
    /// one call always produces exactly one protocol line.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        self.shared
            .outbound
            .send(sanitize_line(line))
            .await
            .map_err(|_| Error::Transport("Connection closed".to_string()))
    }

    /// Answer a command with a NOTICE.
    ///
    /// Commands sent to a channel are answered in the channel; commands sent
    /// to us privately are answered to the sender.
    pub async fn reply(&self, command: &Command, text: &str) -> Result<()> {
        let target = self.reply_target(&command.target, command.nick());
        self.send_line(&format!("NOTICE {} :{}", target, text)).await
    }

    /// Answer an arbitrary message event with a NOTICE
    pub async fn reply_to_event(&self, event: &Event, text: &str) -> Result<()> {
        let target = self.reply_target(&event.target, event.nick());
        self.send_line(&format!("NOTICE {} :{}", target, text)).await
    }

    fn reply_target(&self, target: &str, sender: &str) -> String {
        if target.eq_ignore_ascii_case(&self.nick()) {
            sender.to_string()
        } else {
            target.to_string()
        }
    }

    pub(crate) fn registry(&self) -> Option<Arc<Registry>> {
        self.shared.registry.read().clone()
    }

    /// Usage string for `command`
    pub fn usage(&self, command: &str) -> String {
        match self.registry() {
            Some(registry) => registry.usage(command),
            None => "no such command".to_string(),
        }
    }

    /// Registered command handlers, sorted by command name
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        self.registry().map(|r| r.handlers()).unwrap_or_default()
    }

    /// Look up a plugin by name
    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.registry().and_then(|r| r.plugin(name).cloned())
    }

    /// Names of all plugins in registration order
    pub fn plugin_names(&self) -> Vec<String> {
        self.registry().map(|r| r.plugin_names()).unwrap_or_default()
    }

    /// Shut the client down: run every teardown hook, send QUIT and close
    /// the connection once the queue is flushed. Later calls do nothing.
    pub async fn disconnect(&self, reason: &str) -> Result<()> {
        if self.shared.disconnecting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Disconnecting: {}", reason);
        self.set_state(ConnectionState::ShuttingDown);

        self.shutdown_plugins().await;
        let result = self.send_line(&format!("QUIT :{}", reason)).await;
        self.shared.shutdown.cancel();
        result
    }

    /// Run each plugin's teardown hook once, in registration order
    pub(crate) async fn shutdown_plugins(&self) {
        if self.shared.teardown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(registry) = self.registry() else {
            return;
        };
        for plugin in registry.plugins() {
            debug!("Unregistering plugin: {}", plugin.name());
            if let Err(e) = plugin.unregister().await {
                error!("Plugin {} failed to unregister: {}", plugin.name(), e);
            }
        }
    }
}
