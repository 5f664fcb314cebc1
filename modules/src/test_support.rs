//! In-memory server for plugin tests

use rustircbot_core::{AccessList, ClientBuilder, ClientHandle, ConfigStore, Plugin, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

pub(crate) struct Harness {
    pub handle: ClientHandle,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    input: JoinHandle<Result<()>>,
}

impl Harness {
    /// Register `plugins`, connect as `bot` and start the input loop
    pub async fn start(access: AccessList, plugins: Vec<Box<dyn Plugin>>) -> Self {
        let config = ConfigStore::new();
        config.set_string("server", "host", "irc.example.net:6667");
        config.set_string("server", "nick", "bot");
        config.set_string("connection", "flood_enabled", "false");

        let mut builder = ClientBuilder::new(config, access).unwrap();
        for plugin in plugins {
            builder.register_boxed(plugin).unwrap();
        }
        let mut client = builder.build();
        let handle = client.handle();

        let (stream, server) = tokio::io::duplex(16 * 1024);
        let (read, writer) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();
        let mut writer = writer;

        let script = tokio::spawn(async move {
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("NICK bot"));
            assert!(lines.next_line().await.unwrap().unwrap().starts_with("USER "));
            writer.write_all(b":irc.example.net 001 bot :Welcome\r\n").await.unwrap();
            (lines, writer)
        });
        client.connect_with_stream(stream).await.unwrap();
        let (lines, writer) = script.await.unwrap();

        let input = tokio::spawn(async move { client.input_loop().await });
        Self {
            handle,
            lines,
            writer,
            input,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
    }

    pub async fn expect(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("client closed the connection")
    }

    /// Round trip a PING so that everything sent before it has been handled
    pub async fn sync(&mut self) {
        self.send("PING :sync").await;
        assert_eq!(self.expect().await, "PONG :sync");
    }

    pub async fn finish(self) {
        self.handle.disconnect("done").await.unwrap();
        self.input.await.unwrap().unwrap();
    }
}
