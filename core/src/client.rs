//! Client lifecycle: plugin registration, connection and the input loop

use crate::basic::BasicProtocol;
use crate::config::SERVER_SECTION;
use crate::connection::{nick_line, user_line, Connection, ConnectionStream, Registration, RegistrationStep};
use crate::dispatch::Dispatcher;
use crate::handle::Shared;
use crate::plugin::{Plugin, Registry};
use crate::{
    AccessList, ClientHandle, ConfigStore, ConnectionSettings, ConnectionState, Error, Event, FloodControl, Result,
    ServerSettings,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Collects plugins before the client is built
pub struct ClientBuilder {
    handle: ClientHandle,
    registry: Registry,
    outbound: mpsc::Receiver<String>,
}

impl ClientBuilder {
    /// Create a builder around a configuration and an access list.
    ///
    /// The basic protocol plugin (PING replies, nick tracking) is always
    /// registered first.
    pub fn new(config: ConfigStore, access: AccessList) -> Result<Self> {
        let settings = ConnectionSettings::from_store(&config)?;
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let handle = ClientHandle::new(Arc::new(Shared::new(config, access, tx)));

        let mut builder = Self {
            handle,
            registry: Registry::new(),
            outbound: rx,
        };
        builder.register(BasicProtocol::new())?;
        Ok(builder)
    }

    /// Register a plugin, running its setup hook
    pub fn register<P: Plugin + 'static>(&mut self, plugin: P) -> Result<()> {
        self.register_boxed(Box::new(plugin))
    }

    pub fn register_boxed(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        self.registry.register(plugin, &self.handle)
    }

    /// Handle of the client being built
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Names of the plugins registered so far
    pub fn plugin_names(&self) -> Vec<String> {
        self.registry.plugin_names()
    }

    /// Freeze the registry and produce the client
    pub fn build(self) -> Client {
        let (handle, registry, outbound) = self.into_parts();
        Client {
            handle,
            registry,
            dispatcher: None,
            outbound: Some(outbound),
            connection: None,
        }
    }

    pub(crate) fn into_parts(self) -> (ClientHandle, Arc<Registry>, mpsc::Receiver<String>) {
        let registry = Arc::new(self.registry);
        *self.handle.shared.registry.write() = Some(Arc::clone(&registry));
        (self.handle, registry, self.outbound)
    }
}

/// A client with a frozen set of plugins
pub struct Client {
    handle: ClientHandle,
    registry: Arc<Registry>,
    dispatcher: Option<Dispatcher>,
    outbound: Option<mpsc::Receiver<String>>,
    connection: Option<Connection>,
}

impl Client {
    /// Handle for use from other tasks
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Connect to the configured server and complete registration
    pub async fn connect(&mut self) -> Result<()> {
        let server = ServerSettings::from_store(self.handle.config())?;
        let settings = ConnectionSettings::from_store(self.handle.config())?;

        self.handle.set_state(ConnectionState::Connecting);
        let stream = match Connection::open(&server.host, settings.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                self.handle.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        info!("Connected to {}", server.host);
        self.connect_with_stream(stream).await
    }

    /// Complete registration over an already established stream.
    ///
    /// Sends NICK and USER, then reads until the server welcomes us. Taken
    /// nicknames are retried with a trailing underscore and the accepted
    /// nickname is written back to `server.nick`. Every line read meanwhile
    /// is also handed to the plugins' observers.
    pub async fn connect_with_stream<S: ConnectionStream>(&mut self, stream: S) -> Result<()> {
        if self.handle.is_shutting_down() {
            return Err(Error::Registration("Client is shut down".to_string()));
        }
        let outbound = self
            .outbound
            .take()
            .ok_or_else(|| Error::Registration("Client was already connected".to_string()))?;

        let server = ServerSettings::from_store(self.handle.config())?;
        let settings = ConnectionSettings::from_store(self.handle.config())?;
        let mut connection = Connection::start(
            Box::new(stream),
            outbound,
            FloodControl::from_settings(&settings),
            self.handle.shared.shutdown.clone(),
        );

        self.handle.set_state(ConnectionState::Registering);
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry), self.handle.clone());
        match self.register(&mut connection, &dispatcher, &server).await {
            Ok(nick) => {
                info!("Registered as {}", nick);
                self.handle.set_state(ConnectionState::Registered);
                self.connection = Some(connection);
                self.dispatcher = Some(dispatcher);
                Ok(())
            }
            Err(e) => {
                self.abort_registration(connection).await;
                Err(e)
            }
        }
    }

    /// Run the handshake until the server welcomes us; returns the accepted nick
    async fn register(
        &self,
        connection: &mut Connection,
        dispatcher: &Dispatcher,
        server: &ServerSettings,
    ) -> Result<String> {
        let mut registration = Registration::new(&server.nick);
        self.send_handshake_line(&nick_line(registration.nick())).await?;
        self.send_handshake_line(&user_line(&server.ident, &server.realname)).await?;

        loop {
            let line = match connection.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(Error::Registration("Connection closed during registration".to_string())),
                Err(e) => return Err(Error::Registration(format!("Read failed during registration: {}", e))),
            };

            let Some(event) = Event::parse(&line) else {
                continue;
            };
            let event = Arc::new(event);
            dispatcher.notify_observers(&event);

            match registration.handle(&event) {
                RegistrationStep::Pending => {}
                RegistrationStep::RetryNick(nick) => {
                    warn!("Nickname in use, trying {}", nick);
                    self.handle.config().set_string(SERVER_SECTION, "nick", &nick);
                    self.send_handshake_line(&nick_line(&nick)).await?;
                }
                RegistrationStep::Complete => return Ok(registration.nick().to_string()),
            }
        }
    }

    async fn send_handshake_line(&self, line: &str) -> Result<()> {
        self.handle
            .send_line(line)
            .await
            .map_err(|e| Error::Registration(format!("Failed to send handshake: {}", e)))
    }

    async fn abort_registration(&self, connection: Connection) {
        connection.close().await;
        self.handle.set_state(ConnectionState::Disconnected);
    }

    /// Read and dispatch lines until disconnect or transport loss.
    ///
    /// Returns `Ok` after [`ClientHandle::disconnect`]; losing the transport
    /// runs the teardown hooks and returns [`Error::Transport`].
    pub async fn input_loop(&mut self) -> Result<()> {
        let (mut connection, dispatcher) = match (self.connection.take(), self.dispatcher.take()) {
            (Some(connection), Some(dispatcher)) => (connection, dispatcher),
            _ => return Err(Error::Transport("Not connected".to_string())),
        };

        let result = loop {
            match connection.next_line().await {
                Ok(Some(line)) => {
                    dispatcher.dispatch_line(&line);
                }
                Ok(None) if self.handle.shared.shutdown.is_cancelled() => break Ok(()),
                Ok(None) => break Err(Error::Transport("Connection closed by server".to_string())),
                Err(e) => break Err(Error::Transport(format!("Read failed: {}", e))),
            }
        };

        if let Err(e) = &result {
            error!("{}", e);
            self.handle.set_state(ConnectionState::ShuttingDown);
            self.handle.shutdown_plugins().await;
        }

        connection.close().await;
        self.handle.set_state(ConnectionState::Disconnected);
        // Plugins hold handles; drop the registry so the cycle is broken
        self.handle.shared.registry.write().take();
        debug!("Input loop finished");
        result
    }

    /// See [`ClientHandle::disconnect`]
    pub async fn disconnect(&self, reason: &str) -> Result<()> {
        self.handle.disconnect(reason).await
    }
}
