//! Rust IRC Bot Plugins
//!
//! Ready-made plugins for the IRC bot.

pub mod admin;
pub mod help;

#[cfg(test)]
mod test_support;

pub use admin::AdminPlugin;
pub use help::HelpPlugin;
