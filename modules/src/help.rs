//! Help Plugin
//!
//! Lists the commands a user may run and shows the usage of a single
//! command.

use rustircbot_core::{async_trait, ClientHandle, Command, Error, Plugin, Registrar, Result};

/// Help plugin
#[derive(Default)]
pub struct HelpPlugin {
    handle: Option<ClientHandle>,
}

impl HelpPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands available to `hostmask`, sorted by name
    fn available_commands(handle: &ClientHandle, hostmask: &str) -> Vec<String> {
        let level = handle.access_level(hostmask);
        handle
            .handlers()
            .into_iter()
            .filter(|h| h.min_access <= level)
            .map(|h| h.command)
            .collect()
    }
}

#[async_trait]
impl Plugin for HelpPlugin {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "lists commands and shows their usage"
    }

    fn usage(&self, command: &str) -> String {
        match command {
            "help" => "help [command]".to_string(),
            _ => String::new(),
        }
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) -> Result<()> {
        self.handle = Some(registrar.handle());
        registrar.register_command_handler("help", 0, 0)
    }

    async fn process_command(&self, command: &Command) -> Result<()> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| Error::Plugin("help plugin is not registered".to_string()))?;
        let trigger = handle.trigger();

        let text = match command.args.first() {
            None => {
                let commands: Vec<String> = Self::available_commands(handle, &command.source)
                    .into_iter()
                    .map(|c| format!("{}{}", trigger, c))
                    .collect();
                format!("Available commands: {}", commands.join(" "))
            }
            Some(name) => {
                let name = name.strip_prefix(trigger.as_str()).unwrap_or(name);
                let usage = handle.usage(name);
                if usage.is_empty() {
                    format!("{}: no usage available", name)
                } else {
                    usage
                }
            }
        };
        handle.reply(command, &text).await
    }
}
