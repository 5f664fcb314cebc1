//! Line codec: raw protocol lines to events and trigger commands
//!
//! Inbound lines follow the RFC 1459 layout
//! `[:source] command [target] [arg ...] [:trailing arg]`. Parsing never
//! fails loudly: a line without a command token simply yields `None`.

use std::fmt;

/// Maximum payload of an outbound line; the transport appends `\r\n`.
pub const MAX_LINE_LENGTH: usize = 510;

/// Numeric sent by the server once registration completed.
pub const RPL_WELCOME: &str = "001";

/// Numeric sent by the server when the requested nickname is taken.
pub const ERR_NICKNAMEINUSE: &str = "433";

/// Verbs that deliver chat text and may therefore carry trigger commands.
pub const MESSAGE_VERBS: [&str; 2] = ["PRIVMSG", "NOTICE"];

/// A parsed protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Originating hostmask or server name, empty if the line had no prefix
    pub source: String,
    /// Protocol verb or three digit numeric, upper-cased
    pub command: String,
    /// First parameter (channel or nickname), empty if absent
    pub target: String,
    /// Remaining parameters, trailing parameter last
    pub args: Vec<String>,
}

impl Event {
    /// Parse a raw line, with or without its line terminator.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);

        let (source, rest) = match line.strip_prefix(':') {
            Some(prefixed) => {
                let (source, rest) = prefixed.split_once(' ')?;
                (source, rest)
            }
            None => ("", line),
        };

        let rest = rest.trim_start_matches(' ');
        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, rest)) => (command, rest),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_string());
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        let mut params = params.into_iter();
        let target = params.next().unwrap_or_default();

        Some(Self {
            source: source.to_string(),
            command: command.to_ascii_uppercase(),
            target,
            args: params.collect(),
        })
    }

    /// Whether this event carries chat text (PRIVMSG or NOTICE)
    pub fn is_message(&self) -> bool {
        MESSAGE_VERBS.contains(&self.command.as_str())
    }

    /// Nickname part of the source hostmask
    pub fn nick(&self) -> &str {
        nick_of(&self.source)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.source.is_empty() {
            write!(f, ":{} ", self.source)?;
        }
        f.write_str(&self.command)?;

        let params = std::iter::once(&self.target)
            .filter(|t| !t.is_empty())
            .chain(self.args.iter());
        let count = usize::from(!self.target.is_empty()) + self.args.len();
        for (i, param) in params.enumerate() {
            let last = i + 1 == count;
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// A trigger command extracted from a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Hostmask of the sender
    pub source: String,
    /// Channel or nickname the message was addressed to
    pub target: String,
    /// Command name without the trigger
    pub command: String,
    /// Remaining words of the message
    pub args: Vec<String>,
}

impl Command {
    /// Extract a command from `event` if its text starts with `trigger`.
    ///
    /// The text is split on single spaces; empty words produced by
    /// repeated spaces are dropped.
    pub fn parse(event: &Event, trigger: &str) -> Option<Self> {
        if !event.is_message() {
            return None;
        }
        let text = event.args.first()?;
        if !text.starts_with(trigger) {
            return None;
        }

        let mut words = text.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.strip_prefix(trigger)?;
        if command.is_empty() {
            return None;
        }

        Some(Self {
            source: event.source.clone(),
            target: event.target.clone(),
            command: command.to_string(),
            args: words.map(str::to_string).collect(),
        })
    }

    /// Nickname part of the source hostmask
    pub fn nick(&self) -> &str {
        nick_of(&self.source)
    }
}

/// Nickname part of a `nick!user@host` hostmask
pub fn nick_of(hostmask: &str) -> &str {
    hostmask.split('!').next().unwrap_or(hostmask)
}

/// Prepare a line for transmission.
///
/// Embedded CR and LF are replaced with spaces so a single call can never
/// emit more than one protocol line, and the result is cut to
/// [`MAX_LINE_LENGTH`] bytes on a character boundary.
pub fn sanitize_line(line: &str) -> String {
    let mut line = line.replace(['\r', '\n'], " ");
    if line.len() > MAX_LINE_LENGTH {
        let mut end = MAX_LINE_LENGTH;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line.truncate(end);
    }
    line
}
