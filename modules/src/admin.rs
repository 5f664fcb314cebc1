//! Administrative Plugin
//!
//! Commands for bot administrators: inviting themselves into channels and
//! speaking through the bot. Users with a sufficient access level are also
//! given channel operator status when they join a channel the bot is in.

use rustircbot_core::{async_trait, ClientHandle, Command, Error, Event, Plugin, Registrar, Result};
use tracing::{debug, info};

/// Level needed for `inviteme`
pub const INVITE_LEVEL: u32 = 400;
/// Level needed for `say`, `notice` and `action`
pub const SPEAK_LEVEL: u32 = 500;
/// Level at which joining users are opped
pub const AUTO_OP_LEVEL: u32 = 200;

/// Administrative plugin
#[derive(Default)]
pub struct AdminPlugin {
    handle: Option<ClientHandle>,
}

impl AdminPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self) -> Result<&ClientHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Plugin("admin plugin is not registered".to_string()))
    }
}

#[async_trait]
impl Plugin for AdminPlugin {
    fn name(&self) -> &str {
        "admin"
    }

    fn description(&self) -> &str {
        "provides commands for bot-admins"
    }

    fn usage(&self, command: &str) -> String {
        match command {
            "inviteme" => "inviteme <channelname>",
            "say" => "say <channelname> <message>",
            "notice" => "notice <channelname> <message>",
            "action" => "action <channelname> <message>",
            _ => "",
        }
        .to_string()
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) -> Result<()> {
        self.handle = Some(registrar.handle());

        registrar.register_command_handler("inviteme", 1, INVITE_LEVEL)?;
        registrar.register_command_handler("say", 2, SPEAK_LEVEL)?;
        registrar.register_command_handler("notice", 2, SPEAK_LEVEL)?;
        registrar.register_command_handler("action", 2, SPEAK_LEVEL)?;
        Ok(())
    }

    async fn process_line(&self, event: &Event) -> Result<()> {
        if event.command != "JOIN" {
            return Ok(());
        }
        let handle = self.handle()?;
        if event.nick().eq_ignore_ascii_case(&handle.nick()) {
            return Ok(());
        }

        if handle.access_level(&event.source) >= AUTO_OP_LEVEL {
            info!("Opping {} in {}", event.nick(), event.target);
            handle.send_line(&format!("MODE {} +o {}", event.target, event.nick())).await?;
        }
        Ok(())
    }

    async fn process_command(&self, command: &Command) -> Result<()> {
        let handle = self.handle()?;
        debug!("{} used {}", command.source, command.command);

        let text = command.args[1..].join(" ");
        let line = match command.command.as_str() {
            "inviteme" => format!("INVITE {} {}", command.nick(), command.args[0]),
            "say" => format!("PRIVMSG {} :{}", command.args[0], text),
            "notice" => format!("NOTICE {} :{}", command.args[0], text),
            "action" => format!("PRIVMSG {} :\u{1}ACTION {}\u{1}", command.args[0], text),
            other => return Err(Error::Plugin(format!("admin plugin cannot handle {}", other))),
        };
        handle.send_line(&line).await
    }
}
