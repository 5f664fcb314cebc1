//! Built-in protocol upkeep

use crate::config::SERVER_SECTION;
use crate::plugin::{Plugin, Registrar};
use crate::{async_trait, ClientHandle, Event, Result};
use tracing::info;

/// Answers server PINGs and follows our own nickname changes
#[derive(Default)]
pub struct BasicProtocol {
    handle: Option<ClientHandle>,
}

impl BasicProtocol {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Plugin for BasicProtocol {
    fn name(&self) -> &str {
        "basic"
    }

    fn description(&self) -> &str {
        "Keeps the connection alive and tracks nickname changes"
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) -> Result<()> {
        self.handle = Some(registrar.handle());
        Ok(())
    }

    async fn process_line(&self, event: &Event) -> Result<()> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };

        match event.command.as_str() {
            "PING" => handle.send_line(&format!("PONG :{}", event.target)).await,
            "NICK" if !event.source.is_empty() && event.nick().eq_ignore_ascii_case(&handle.nick()) => {
                info!("Nickname changed to {}", event.target);
                handle.config().set_string(SERVER_SECTION, "nick", &event.target);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
