//! Routing of inbound lines to plugins
//!
//! Every plugin owns an observer queue drained by one worker task, so a
//! plugin sees lines in the order they were read while a slow plugin never
//! holds up the reader or the other plugins. Chat messages that start with
//! the trigger are additionally routed to the plugin owning the command,
//! after the access and parameter checks passed. Handler failures are
//! logged and never reach the caller.

use crate::plugin::{Plugin, Registry};
use crate::{ClientHandle, Command, Event};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, Instrument};

/// What happened to a dispatched line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Line could not be parsed
    Dropped,
    /// Line was handed to observers only
    Observed,
    /// Trigger command nobody handles
    UnknownCommand,
    /// Sender lacks the required access level
    Denied,
    /// Too few arguments, usage was sent
    MissingParams,
    /// Command handler was started
    Invoked,
}

/// Fans inbound lines out to the registered plugins
pub struct Dispatcher {
    registry: Arc<Registry>,
    handle: ClientHandle,
    observers: Vec<mpsc::UnboundedSender<Arc<Event>>>,
}

impl Dispatcher {
    /// Create a dispatcher and start one observer worker per plugin.
    ///
    /// Must be called from within a tokio runtime. Workers stop once the
    /// dispatcher is dropped and their queue is drained.
    pub fn new(registry: Arc<Registry>, handle: ClientHandle) -> Self {
        let observers = registry.plugins().map(|p| spawn_observer(Arc::clone(p))).collect();
        Self {
            registry,
            handle,
            observers,
        }
    }

    /// Dispatch one raw line
    pub fn dispatch_line(&self, line: &str) -> DispatchOutcome {
        let Some(event) = Event::parse(line) else {
            trace!("Dropping unparseable line: {:?}", line);
            return DispatchOutcome::Dropped;
        };
        let event = Arc::new(event);
        self.notify_observers(&event);

        match Command::parse(&event, &self.handle.trigger()) {
            Some(command) => self.dispatch_command(command),
            None => DispatchOutcome::Observed,
        }
    }

    /// Queue `event` for every plugin's `process_line`
    pub fn notify_observers(&self, event: &Arc<Event>) {
        for observer in &self.observers {
            // A closed queue means its worker is gone; nothing left to notify
            let _ = observer.send(Arc::clone(event));
        }
    }

    /// Check and route a trigger command to its handler
    pub fn dispatch_command(&self, command: Command) -> DispatchOutcome {
        let Some(entry) = self.registry.handler(&command.command) else {
            debug!("No handler for command {}", command.command);
            return DispatchOutcome::UnknownCommand;
        };

        if entry.min_access > 0 {
            let level = self.handle.access_level(&command.source);
            if level < entry.min_access {
                debug!(
                    "Denied {} to {} (level {} < {})",
                    command.command, command.source, level, entry.min_access
                );
                self.spawn_reply(command, "You are not authorized to do that.".to_string());
                return DispatchOutcome::Denied;
            }
        }

        if command.args.len() < entry.min_params {
            let usage = self.registry.usage(&command.command);
            self.spawn_reply(command, usage);
            return DispatchOutcome::MissingParams;
        }

        let owner = Arc::clone(&entry.owner);
        let span = tracing::debug_span!("command", name = %command.command, plugin = %owner.name());
        tokio::spawn(
            async move {
                if let Err(e) = owner.process_command(&command).await {
                    error!("Command {} failed: {}", command.command, e);
                }
            }
            .instrument(span),
        );
        DispatchOutcome::Invoked
    }

    fn spawn_reply(&self, command: Command, text: String) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.reply(&command, &text).await {
                error!("Failed to reply to {}: {}", command.nick(), e);
            }
        });
    }
}

/// Worker feeding one plugin its events in arrival order. Each call runs in
/// its own task so that a panicking plugin only loses that one event.
fn spawn_observer(plugin: Arc<dyn Plugin>) -> mpsc::UnboundedSender<Arc<Event>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Event>>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let observer = Arc::clone(&plugin);
            let command = event.command.clone();
            match tokio::spawn(async move { observer.process_line(&event).await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Plugin {} failed to process {}: {}", plugin.name(), command, e),
                Err(e) => error!("Plugin {} panicked processing {}: {}", plugin.name(), command, e),
            }
        }
        trace!("Observer for {} stopped", plugin.name());
    });
    tx
}
