//! Plugin system for the extensible IRC client
//!
//! Plugins are registered on a [`ClientBuilder`](crate::ClientBuilder) before
//! the connection is opened. During [`Plugin::register`] a plugin may bind
//! command handlers through the [`Registrar`]; once the client is built the
//! registry is frozen and shared read-only with the dispatcher.

use crate::{ClientHandle, Command, Error, Event, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Trait implemented by every plugin
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name
    fn name(&self) -> &str;

    /// Human readable description
    fn description(&self) -> &str;

    /// Usage string for one of the commands this plugin handles
    fn usage(&self, _command: &str) -> String {
        String::new()
    }

    /// Setup hook. Store the client handle and bind command handlers here.
    fn register(&mut self, registrar: &mut Registrar<'_>) -> Result<()>;

    /// Called with every parsed inbound line
    async fn process_line(&self, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Called for commands routed to this plugin by the dispatcher
    async fn process_command(&self, _command: &Command) -> Result<()> {
        Ok(())
    }

    /// Teardown hook, called once when the client shuts down
    async fn unregister(&self) -> Result<()> {
        Ok(())
    }
}

/// A command bound to the plugin that answers it
#[derive(Clone)]
pub struct HandlerEntry {
    /// Command name without trigger
    pub command: String,
    /// Minimum number of arguments
    pub min_params: usize,
    /// Minimum access level, 0 for everybody
    pub min_access: u32,
    /// Plugin that processes the command
    pub owner: Arc<dyn Plugin>,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("command", &self.command)
            .field("min_params", &self.min_params)
            .field("min_access", &self.min_access)
            .field("owner", &self.owner.name())
            .finish()
    }
}

/// Owner-free snapshot of a handler entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub command: String,
    pub min_params: usize,
    pub min_access: u32,
    pub owner: String,
}

impl From<&HandlerEntry> for HandlerInfo {
    fn from(entry: &HandlerEntry) -> Self {
        Self {
            command: entry.command.clone(),
            min_params: entry.min_params,
            min_access: entry.min_access,
            owner: entry.owner.name().to_string(),
        }
    }
}

#[derive(Debug)]
struct PendingHandler {
    command: String,
    min_params: usize,
    min_access: u32,
}

/// Registration context handed to [`Plugin::register`]
///
/// Handlers bound here only become active if the setup hook succeeds.
pub struct Registrar<'a> {
    plugin: &'a str,
    handle: &'a ClientHandle,
    registry: &'a Registry,
    pending: Vec<PendingHandler>,
}

impl<'a> Registrar<'a> {
    fn new(plugin: &'a str, handle: &'a ClientHandle, registry: &'a Registry) -> Self {
        Self {
            plugin,
            handle,
            registry,
            pending: Vec::new(),
        }
    }

    /// Handle for talking to the client once connected
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Bind `command` to the plugin being registered
    pub fn register_command_handler(&mut self, command: &str, min_params: usize, min_access: u32) -> Result<()> {
        if let Some(existing) = self.registry.handlers.get(command) {
            return Err(Error::DuplicateHandler {
                command: command.to_string(),
                owner: existing.owner.name().to_string(),
            });
        }
        if self.pending.iter().any(|p| p.command == command) {
            return Err(Error::DuplicateHandler {
                command: command.to_string(),
                owner: self.plugin.to_string(),
            });
        }

        self.pending.push(PendingHandler {
            command: command.to_string(),
            min_params,
            min_access,
        });
        Ok(())
    }
}

/// Registered plugins and the command table
#[derive(Default)]
pub struct Registry {
    plugins: Vec<Arc<dyn Plugin>>,
    index: HashMap<String, usize>,
    handlers: HashMap<String, HandlerEntry>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the plugin's setup hook and record it with its handlers.
    ///
    /// Fails if a plugin with the same name exists, if the setup hook fails,
    /// or if the hook bound a command that is already taken. Nothing is
    /// recorded on failure.
    pub fn register(&mut self, mut plugin: Box<dyn Plugin>, handle: &ClientHandle) -> Result<()> {
        let name = plugin.name().to_string();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicatePlugin(name));
        }

        let pending = {
            let mut registrar = Registrar::new(&name, handle, self);
            plugin.register(&mut registrar)?;
            registrar.pending
        };

        let plugin: Arc<dyn Plugin> = Arc::from(plugin);
        for p in pending {
            tracing::debug!(plugin = %name, command = %p.command, "Registered command handler");
            self.handlers.insert(
                p.command.clone(),
                HandlerEntry {
                    command: p.command,
                    min_params: p.min_params,
                    min_access: p.min_access,
                    owner: Arc::clone(&plugin),
                },
            );
        }

        self.index.insert(name.clone(), self.plugins.len());
        self.plugins.push(plugin);
        tracing::info!("Registered plugin: {}", name);
        Ok(())
    }

    /// Get a plugin by name
    pub fn plugin(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.index.get(name).map(|&i| &self.plugins[i])
    }

    /// Plugins in registration order
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.iter()
    }

    /// Plugin names in registration order
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Handler bound to `command`
    pub fn handler(&self, command: &str) -> Option<&HandlerEntry> {
        self.handlers.get(command)
    }

    /// All handler entries, sorted by command name
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        let mut handlers: Vec<HandlerInfo> = self.handlers.values().map(HandlerInfo::from).collect();
        handlers.sort_by(|a, b| a.command.cmp(&b.command));
        handlers
    }

    /// Usage string of the plugin handling `command`
    pub fn usage(&self, command: &str) -> String {
        match self.handlers.get(command) {
            Some(entry) => entry.owner.usage(command),
            None => "no such command".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
