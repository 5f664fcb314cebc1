//! Connection handling and registration
//!
//! A [`Connection`] owns the transport once it is established. Reading
//! happens on the caller's task through [`Connection::next_line`]; writing
//! happens on a dedicated task that drains the outbound queue through
//! [`FloodControl`]. Cancelling the shutdown token makes the reader report
//! end of input and makes the writer flush the remaining queue, without
//! pacing, before closing the transport.

use crate::{Error, Event, FloodControl, Result};
use crate::message::{ERR_NICKNAMEINUSE, RPL_WELCOME};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Longest inbound line accepted, terminator included
pub const MAX_INBOUND_LINE: usize = 512;

/// Connection state as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport
    Disconnected,
    /// Transport is being established
    Connecting,
    /// NICK/USER sent, waiting for the welcome numeric
    Registering,
    /// Welcome received, commands are dispatched
    Registered,
    /// Disconnect in progress
    ShuttingDown,
}

/// Trait for connection streams (TCP, TLS or in-memory)
pub trait ConnectionStream: Send + 'static {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>);
}

/// Trait for connection read half
pub trait ConnectionReadHalf: AsyncRead + Send + Unpin {}

/// Trait for connection write half
pub trait ConnectionWriteHalf: AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + Send + Unpin> ConnectionReadHalf for T {}
impl<T: AsyncWrite + Send + Unpin> ConnectionWriteHalf for T {}

impl<T> ConnectionStream for T
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>) {
        let (read, write) = tokio::io::split(*self);
        (Box::new(read), Box::new(write))
    }
}

/// An established server connection
pub struct Connection {
    reader: BufReader<Box<dyn ConnectionReadHalf>>,
    buffer: Vec<u8>,
    writer: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Open a TCP connection to `host` (`host:port`)
    pub async fn open(host: &str, timeout: Duration) -> Result<TcpStream> {
        debug!("Connecting to {}", host);
        match tokio::time::timeout(timeout, TcpStream::connect(host)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Error::Transport(format!("Failed to connect to {}: {}", host, e))),
            Err(_) => Err(Error::Transport(format!("Connection to {} timed out after {:?}", host, timeout))),
        }
    }

    /// Take ownership of `stream` and start the writer task
    pub fn start(
        stream: Box<dyn ConnectionStream>,
        outbound: mpsc::Receiver<String>,
        flood: FloodControl,
        shutdown: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = stream.split();

        let writer_shutdown = shutdown.clone();
        let writer = tokio::spawn(async move {
            if let Err(e) = write_loop(write_half, outbound, flood, writer_shutdown).await {
                error!("Error writing to server: {}", e);
            }
        });

        Self {
            reader: BufReader::new(read_half),
            buffer: Vec::with_capacity(512),
            writer,
            shutdown,
        }
    }

    /// Next inbound line without its terminator.
    ///
    /// Returns `Ok(None)` at end of input or once shutdown was requested.
    /// Invalid UTF-8 is replaced rather than treated as an error. Lines
    /// longer than [`MAX_INBOUND_LINE`] are skipped.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let read = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(None),
            read = read_bounded_line(&mut self.reader, &mut self.buffer) => read?,
        };
        if read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buffer);
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        trace!("<< {}", line);
        Ok(Some(line))
    }

    /// Stop reading and wait for the writer to flush and close the transport
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(e) = self.writer.await {
            error!("Writer task failed: {}", e);
        }
    }
}

/// Read one line of at most [`MAX_INBOUND_LINE`] bytes into `buffer`.
///
/// The remainder of an overlong line is discarded and the following line is
/// read instead. Returns 0 at end of input.
async fn read_bounded_line(
    reader: &mut BufReader<Box<dyn ConnectionReadHalf>>,
    buffer: &mut Vec<u8>,
) -> std::io::Result<usize> {
    loop {
        buffer.clear();
        let read = (&mut *reader).take(MAX_INBOUND_LINE as u64).read_until(b'\n', buffer).await?;
        if read < MAX_INBOUND_LINE || buffer.ends_with(b"\n") {
            return Ok(read);
        }

        let mut skipped = read;
        loop {
            buffer.clear();
            let read = (&mut *reader).take(MAX_INBOUND_LINE as u64).read_until(b'\n', buffer).await?;
            skipped += read;
            if read == 0 {
                return Ok(0);
            }
            if buffer.ends_with(b"\n") {
                break;
            }
        }
        warn!("Dropped inbound line of {} bytes", skipped);
    }
}

async fn write_loop(
    mut writer: Box<dyn ConnectionWriteHalf>,
    mut outbound: mpsc::Receiver<String>,
    mut flood: FloodControl,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = outbound.recv() => match line {
                Some(line) => {
                    tokio::select! {
                        _ = flood.pace() => {}
                        _ = shutdown.cancelled() => {}
                    }
                    write_line(&mut writer, &line).await?;
                }
                None => break,
            },
        }
    }

    let mut flushed = 0;
    while let Ok(line) = outbound.try_recv() {
        write_line(&mut writer, &line).await?;
        flushed += 1;
    }
    if flushed > 0 {
        debug!("Flushed {} queued lines on shutdown", flushed);
    }

    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

async fn write_line(writer: &mut Box<dyn ConnectionWriteHalf>, line: &str) -> Result<()> {
    trace!(">> {}", line);
    writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
    Ok(())
}

/// Line announcing the nickname
pub fn nick_line(nick: &str) -> String {
    format!("NICK {}", nick)
}

/// Line announcing ident and real name
pub fn user_line(ident: &str, realname: &str) -> String {
    format!("USER {} * Q :{}", ident, realname)
}

/// What the client has to do after a line received during registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStep {
    /// Keep waiting
    Pending,
    /// Nickname was taken; announce this one instead
    RetryNick(String),
    /// Server welcomed us
    Complete,
}

/// Registration handshake state
#[derive(Debug, Clone)]
pub struct Registration {
    nick: String,
    complete: bool,
}

impl Registration {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            complete: false,
        }
    }

    /// Current candidate nickname
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Advance the handshake with an inbound event. Completion is reported
    /// once; every later event is [`RegistrationStep::Pending`].
    pub fn handle(&mut self, event: &Event) -> RegistrationStep {
        if self.complete {
            return RegistrationStep::Pending;
        }
        match event.command.as_str() {
            ERR_NICKNAMEINUSE => {
                self.nick.push('_');
                RegistrationStep::RetryNick(self.nick.clone())
            }
            RPL_WELCOME => {
                self.complete = true;
                RegistrationStep::Complete
            }
            _ => RegistrationStep::Pending,
        }
    }
}
