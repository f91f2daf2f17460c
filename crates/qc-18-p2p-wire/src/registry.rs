//! Command → payload parser table.
//!
//! A registry is assembled once, then shared read-only (usually behind an
//! `Arc`) by every codec that needs it. There is no global table to mutate.

use std::collections::BTreeMap;

use shared_types::EncodingError;

use crate::messages::{Message, STANDARD_COMMANDS};

/// Parses the payload of one command into a [`Message`].
pub type PayloadParser = fn(&str, &[u8]) -> Result<Message, EncodingError>;

#[derive(Debug, Clone)]
pub struct MessageRegistry {
    parsers: BTreeMap<String, PayloadParser>,
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl MessageRegistry {
    /// Registry with every command in [`STANDARD_COMMANDS`].
    pub fn standard() -> Self {
        STANDARD_COMMANDS
            .iter()
            .fold(Self::empty(), |registry, command| {
                registry.with_parser(command, Message::decode_payload)
            })
    }

    pub fn empty() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// Register (or replace) the parser for `command`.
    #[must_use]
    pub fn with_parser(mut self, command: &str, parser: PayloadParser) -> Self {
        self.parsers.insert(command.to_string(), parser);
        self
    }

    /// Accept `command` and hand its payload through as [`Message::Raw`].
    #[must_use]
    pub fn with_opaque(self, command: &str) -> Self {
        self.with_parser(command, parse_opaque)
    }

    #[must_use]
    pub fn without(mut self, command: &str) -> Self {
        self.parsers.remove(command);
        self
    }

    pub fn contains(&self, command: &str) -> bool {
        self.parsers.contains_key(command)
    }

    /// Registered commands in lexical order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }

    /// `None` when the command is not registered.
    pub fn parse(&self, command: &str, payload: &[u8]) -> Option<Result<Message, EncodingError>> {
        self.parsers
            .get(command)
            .map(|parser| parser(command, payload))
    }
}

fn parse_opaque(command: &str, payload: &[u8]) -> Result<Message, EncodingError> {
    Ok(Message::Raw {
        command: command.to_string(),
        payload: payload.to_vec(),
    })
}
