//! Integration tests for the client against a scripted in-memory server

use rustircbot_core::*;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadBuf, ReadHalf,
    WriteHalf,
};
use tokio::sync::mpsc;

/// Server end of an in-memory connection
struct Server {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Server {
    async fn expect(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("client closed the connection")
    }

    async fn expect_closed(&mut self) {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert_eq!(line, None);
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
    }

    /// Accept NICK/USER and welcome the client
    async fn welcome(&mut self, nick: &str) {
        assert_eq!(self.expect().await, format!("NICK {}", nick));
        assert!(self.expect().await.starts_with("USER "));
        self.send(&format!(":irc.example.net 001 {} :Welcome to the network", nick)).await;
    }
}

fn pipe() -> (DuplexStream, Server) {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let (read, writer) = tokio::io::split(server);
    (
        client,
        Server {
            lines: BufReader::new(read).lines(),
            writer,
        },
    )
}

fn config(nick: &str) -> ConfigStore {
    let config = ConfigStore::new();
    config.set_string("server", "host", "irc.example.net:6667");
    config.set_string("server", "nick", nick);
    config.set_string("connection", "flood_enabled", "false");
    config
}

#[derive(Default)]
struct Calls {
    say: AtomicUsize,
    op: AtomicUsize,
    unregister: AtomicUsize,
    /// Client state seen by the teardown hook
    teardown_state: Mutex<Option<ConnectionState>>,
}

/// Plugin with a public `say` command and an operator-only `op` command
struct Chatter {
    calls: Arc<Calls>,
    handle: Option<ClientHandle>,
}

impl Chatter {
    fn new(calls: Arc<Calls>) -> Self {
        Self { calls, handle: None }
    }
}

#[async_trait]
impl Plugin for Chatter {
    fn name(&self) -> &str {
        "chatter"
    }

    fn description(&self) -> &str {
        "Says things"
    }

    fn usage(&self, command: &str) -> String {
        match command {
            "say" => "say <target> <text>".to_string(),
            _ => String::new(),
        }
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) -> Result<()> {
        self.handle = Some(registrar.handle());
        registrar.register_command_handler("say", 2, 0)?;
        registrar.register_command_handler("op", 0, 500)?;
        Ok(())
    }

    async fn process_command(&self, command: &Command) -> Result<()> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        match command.command.as_str() {
            "say" => {
                self.calls.say.fetch_add(1, Ordering::SeqCst);
                let text = command.args[1..].join(" ");
                handle.send_line(&format!("PRIVMSG {} :{}", command.args[0], text)).await
            }
            "op" => {
                self.calls.op.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn unregister(&self) -> Result<()> {
        self.calls.unregister.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = &self.handle {
            *self.calls.teardown_state.lock().unwrap() = Some(handle.state());
            handle.send_line("PRIVMSG #log :chatter unloading").await?;
        }
        Ok(())
    }
}

/// Plugin forwarding the verb of every line it observes
struct Watcher {
    seen: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Plugin for Watcher {
    fn name(&self) -> &str {
        "watcher"
    }

    fn description(&self) -> &str {
        "Watches the wire"
    }

    fn register(&mut self, _registrar: &mut Registrar<'_>) -> Result<()> {
        Ok(())
    }

    async fn process_line(&self, event: &Event) -> Result<()> {
        let _ = self.seen.send(event.command.clone());
        Ok(())
    }
}

/// Stream whose writes start failing after a fixed number of them
struct FailingWrites {
    inner: DuplexStream,
    writes_left: usize,
}

impl AsyncRead for FailingWrites {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FailingWrites {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.writes_left == 0 {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "write refused")));
        }
        self.writes_left -= 1;
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

async fn registered_client(nick: &str, access: AccessList) -> (Client, Server, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let mut builder = ClientBuilder::new(config(nick), access).unwrap();
    builder.register(Chatter::new(Arc::clone(&calls))).unwrap();
    let mut client = builder.build();

    let (stream, mut server) = pipe();
    let nick_owned = nick.to_string();
    let script = tokio::spawn(async move {
        server.welcome(&nick_owned).await;
        server
    });

    client.connect_with_stream(stream).await.unwrap();
    let server = script.await.unwrap();
    (client, server, calls)
}

#[tokio::test]
async fn test_registration_retries_taken_nick() {
    let client_config = config("bot");
    let mut client = ClientBuilder::new(client_config, AccessList::new()).unwrap().build();
    let handle = client.handle();
    let (stream, mut server) = pipe();

    let script = tokio::spawn(async move {
        assert_eq!(server.expect().await, "NICK bot");
        assert_eq!(server.expect().await, "USER bot * Q :bot");

        server.send(":irc.example.net NOTICE * :*** Looking up your hostname").await;
        server.send(":irc.example.net 433 * bot :Nickname is already in use").await;
        assert_eq!(server.expect().await, "NICK bot_");
        server.send(":irc.example.net 433 * bot_ :Nickname is already in use").await;
        assert_eq!(server.expect().await, "NICK bot__");
        server.send(":irc.example.net 001 bot__ :Welcome").await;
        server
    });

    client.connect_with_stream(stream).await.unwrap();
    let _server = script.await.unwrap();

    assert_eq!(client.state(), ConnectionState::Registered);
    assert_eq!(handle.nick(), "bot__");
    assert_eq!(handle.config().get_string("server", "nick").as_deref(), Some("bot__"));
}

#[tokio::test]
async fn test_lines_after_welcome_do_not_restart_registration() {
    let (mut client, mut server, _calls) = registered_client("bot", AccessList::new()).await;
    let handle = client.handle();
    let input = tokio::spawn(async move { client.input_loop().await });

    server.send(":irc.example.net 001 bot :Welcome again").await;
    server.send(":irc.example.net 433 * bot :Nickname is already in use").await;
    server.send("PING :sync").await;
    assert_eq!(server.expect().await, "PONG :sync");

    assert_eq!(handle.nick(), "bot");
    assert_eq!(handle.state(), ConnectionState::Registered);

    handle.disconnect("done").await.unwrap();
    input.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_trigger_command_invokes_handler() {
    let (mut client, mut server, calls) = registered_client("bot", AccessList::new()).await;
    let handle = client.handle();
    let input = tokio::spawn(async move { client.input_loop().await });

    server.send(":alice!a@host PRIVMSG #chan :!say #chan hello world").await;
    assert_eq!(server.expect().await, "PRIVMSG #chan :hello world");
    assert_eq!(calls.say.load(Ordering::SeqCst), 1);

    handle.disconnect("done").await.unwrap();
    input.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_insufficient_access_is_refused_once() {
    let access = AccessList::new();
    access.grant(r"boss!.*@.*", 500).unwrap();
    let (mut client, mut server, calls) = registered_client("bot", access).await;
    let handle = client.handle();
    let input = tokio::spawn(async move { client.input_loop().await });

    server.send(":alice!a@host PRIVMSG #chan :!op").await;
    assert_eq!(server.expect().await, "NOTICE #chan :You are not authorized to do that.");

    // The operator gets through; the next line proves nothing else was sent
    server.send(":boss!b@host PRIVMSG #chan :!op").await;
    server.send("PING :sync").await;
    assert_eq!(server.expect().await, "PONG :sync");

    assert_eq!(calls.op.load(Ordering::SeqCst), 1);

    handle.disconnect("done").await.unwrap();
    input.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_missing_params_sends_usage() {
    let (mut client, mut server, calls) = registered_client("bot", AccessList::new()).await;
    let handle = client.handle();
    let input = tokio::spawn(async move { client.input_loop().await });

    server.send(":alice!a@host PRIVMSG bot :!say #chan").await;
    assert_eq!(server.expect().await, "NOTICE alice :say <target> <text>");
    assert_eq!(calls.say.load(Ordering::SeqCst), 0);

    handle.disconnect("done").await.unwrap();
    input.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_runs_teardown_before_quit() {
    let (mut client, mut server, calls) = registered_client("bot", AccessList::new()).await;
    let handle = client.handle();
    let input = tokio::spawn(async move { client.input_loop().await });

    handle.disconnect("Shutting down").await.unwrap();
    handle.disconnect("twice").await.unwrap();

    assert_eq!(server.expect().await, "PRIVMSG #log :chatter unloading");
    assert_eq!(server.expect().await, "QUIT :Shutting down");
    server.expect_closed().await;

    input.await.unwrap().unwrap();
    assert_eq!(calls.unregister.load(Ordering::SeqCst), 1);
    assert_eq!(*calls.teardown_state.lock().unwrap(), Some(ConnectionState::ShuttingDown));
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(handle.plugin_names().is_empty());
}

#[tokio::test]
async fn test_server_closing_runs_teardown() {
    let (mut client, server, calls) = registered_client("bot", AccessList::new()).await;
    drop(server);

    let err = client.input_loop().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(calls.unregister.load(Ordering::SeqCst), 1);
    assert_eq!(*calls.teardown_state.lock().unwrap(), Some(ConnectionState::ShuttingDown));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_lines_before_welcome_are_observed_not_dispatched() {
    let calls = Arc::new(Calls::default());
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    let mut builder = ClientBuilder::new(config("bot"), AccessList::new()).unwrap();
    builder.register(Chatter::new(Arc::clone(&calls))).unwrap();
    builder.register(Watcher { seen: seen_tx }).unwrap();
    let mut client = builder.build();
    let handle = client.handle();

    let (stream, mut server) = pipe();
    let script = tokio::spawn(async move {
        assert_eq!(server.expect().await, "NICK bot");
        assert!(server.expect().await.starts_with("USER "));
        server.send(":a!b@c PRIVMSG bot :!say #c hi").await;
        server.send(":irc.example.net NOTICE * :*** Checking ident").await;
        server.send(":irc.example.net 001 bot :Welcome").await;
        server
    });

    client.connect_with_stream(stream).await.unwrap();
    let mut server = script.await.unwrap();

    for expected in ["PRIVMSG", "NOTICE", "001"] {
        let verb = tokio::time::timeout(Duration::from_secs(5), seen.recv()).await.unwrap();
        assert_eq!(verb.as_deref(), Some(expected));
    }
    assert_eq!(calls.say.load(Ordering::SeqCst), 0);

    let input = tokio::spawn(async move { client.input_loop().await });
    server.send("PING :sync").await;
    assert_eq!(server.expect().await, "PONG :sync");
    assert_eq!(calls.say.load(Ordering::SeqCst), 0);

    handle.disconnect("done").await.unwrap();
    input.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handshake_write_failure_disconnects() {
    let mut client = ClientBuilder::new(config("bot"), AccessList::new()).unwrap().build();
    let (stream, mut server) = pipe();
    let stream = FailingWrites {
        inner: stream,
        writes_left: 2,
    };

    let script = tokio::spawn(async move {
        assert_eq!(server.expect().await, "NICK bot");
        assert!(server.expect().await.starts_with("USER "));
        server.send(":irc.example.net 433 * bot :Nickname is already in use").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.send(":irc.example.net 433 * bot_ :Nickname is already in use").await;
        server
    });

    let err = client.connect_with_stream(stream).await.unwrap_err();
    let _server = script.await.unwrap();
    assert!(matches!(err, Error::Registration(_)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_during_registration() {
    let mut client = ClientBuilder::new(config("bot"), AccessList::new()).unwrap().build();
    let (stream, mut server) = pipe();

    let script = tokio::spawn(async move {
        assert_eq!(server.expect().await, "NICK bot");
        assert!(server.expect().await.starts_with("USER "));
        drop(server);
    });

    let err = client.connect_with_stream(stream).await.unwrap_err();
    script.await.unwrap();
    assert!(matches!(err, Error::Registration(_)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = config("bot");
    config.set_string("server", "host", &addr.to_string());
    let mut client = ClientBuilder::new(config, AccessList::new()).unwrap().build();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_outbound_lines_are_sanitized() {
    let (mut client, mut server, _calls) = registered_client("bot", AccessList::new()).await;
    let handle = client.handle();
    let input = tokio::spawn(async move { client.input_loop().await });

    handle.send_line("PRIVMSG #chan :one\nQUIT :injected").await.unwrap();
    assert_eq!(server.expect().await, "PRIVMSG #chan :one QUIT :injected");

    handle.send_line(&format!("PRIVMSG #chan :{}", "x".repeat(1000))).await.unwrap();
    assert_eq!(server.expect().await.len(), 510);

    handle.disconnect("done").await.unwrap();
    input.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_flood_control_paces_writes() {
    let config = config("bot");
    config.set_string("connection", "flood_enabled", "true");
    config.set_int("connection", "flood_burst", 1);
    config.set_int("connection", "flood_interval_ms", 100);
    let mut client = ClientBuilder::new(config, AccessList::new()).unwrap().build();
    let handle = client.handle();

    let (stream, mut server) = pipe();
    let script = tokio::spawn(async move {
        server.welcome("bot").await;
        server
    });
    client.connect_with_stream(stream).await.unwrap();
    let mut server = script.await.unwrap();

    for i in 0..3 {
        handle.send_line(&format!("PRIVMSG #chan :{}", i)).await.unwrap();
    }

    assert_eq!(server.expect().await, "PRIVMSG #chan :0");
    let first = Instant::now();
    assert_eq!(server.expect().await, "PRIVMSG #chan :1");
    assert_eq!(server.expect().await, "PRIVMSG #chan :2");
    assert!(first.elapsed() >= Duration::from_millis(150));
}
