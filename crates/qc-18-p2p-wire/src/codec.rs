//! Frame codec.
//!
//! The codec is stateless: the caller owns the receive buffer, calls
//! [`WireCodec::try_parse`] until it reports [`ParseOutcome::NeedMoreData`],
//! and drains `consumed` bytes after each frame.

use std::sync::Arc;

use shared_types::{sha256d, Reader};
use tracing::debug;

use crate::constants::DEFAULT_MAX_MESSAGE_SIZE;
use crate::errors::FrameError;
use crate::messages::Message;
use crate::network::NetworkMagic;
use crate::registry::MessageRegistry;

/// magic(4) + command(12) + length(4) + checksum(4)
pub const MESSAGE_HEADER_SIZE: usize = 24;

const COMMAND_SIZE: usize = 12;

/// Decoded fixed-size frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: [u8; 4],
    pub command: String,
    pub length: u32,
    pub checksum: [u8; 4],
}

impl MessageHeader {
    /// Parse the first [`MESSAGE_HEADER_SIZE`] bytes of `bytes`.
    ///
    /// The command is everything before the first NUL of the 12-byte field.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let mut reader = Reader::new(bytes.get(..MESSAGE_HEADER_SIZE)?);
        let magic = reader.read_array::<4>().ok()?;
        let raw_command = reader.read_array::<COMMAND_SIZE>().ok()?;
        let length = reader.read_u32_le().ok()?;
        let checksum = reader.read_array::<4>().ok()?;
        let end = raw_command
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(COMMAND_SIZE);
        Some(Self {
            magic,
            command: String::from_utf8_lossy(&raw_command[..end]).into_owned(),
            length,
            checksum,
        })
    }
}

/// Result of one [`WireCodec::try_parse`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The buffer does not hold a complete frame yet. Nothing was consumed.
    NeedMoreData,
    /// One complete frame; drop `consumed` bytes from the front of the buffer.
    Message { message: Message, consumed: usize },
    /// An unregistered command in permissive mode; drop `consumed` bytes.
    Skipped { command: String, consumed: usize },
}

#[derive(Debug, Clone)]
pub struct WireCodec {
    magic: NetworkMagic,
    registry: Arc<MessageRegistry>,
    max_message_size: usize,
    strict: bool,
}

impl WireCodec {
    /// Strict codec with the default size limit.
    pub fn new(magic: NetworkMagic, registry: Arc<MessageRegistry>) -> Self {
        Self {
            magic,
            registry,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            strict: true,
        }
    }

    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// In strict mode an unregistered command is a [`FrameError`]; otherwise
    /// it is skipped.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn magic(&self) -> NetworkMagic {
        self.magic
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Serialize `message` into a complete frame.
    pub fn frame(&self, message: &Message) -> Result<Vec<u8>, FrameError> {
        self.frame_raw(message.command(), &message.encode_payload())
    }

    /// Frame arbitrary payload bytes under `command`. Nothing checks that the
    /// payload matches the command, which makes this the tool for crafting
    /// malformed traffic.
    pub fn frame_raw(&self, command: &str, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let command_bytes = command.as_bytes();
        if command_bytes.len() > COMMAND_SIZE {
            return Err(FrameError::CommandTooLong(command.to_string()));
        }
        let length = u32::try_from(payload.len()).map_err(|_| FrameError::Oversized {
            command: command.to_string(),
            length: payload.len(),
            max: u32::MAX as usize,
        })?;

        let mut frame = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&self.magic.bytes());
        frame.extend_from_slice(command_bytes);
        frame.resize(4 + COMMAND_SIZE, 0);
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&checksum(payload));
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Try to take one frame off the front of `buffer`.
    ///
    /// Checks run in wire order: magic as soon as 4 bytes are present, then
    /// the declared length against the size limit, then the checksum once
    /// the payload is complete, then the command and payload.
    pub fn try_parse(&self, buffer: &[u8]) -> Result<ParseOutcome, FrameError> {
        if buffer.len() < 4 {
            return Ok(ParseOutcome::NeedMoreData);
        }
        let expected_magic = self.magic.bytes();
        if buffer[..4] != expected_magic {
            let mut got = [0u8; 4];
            got.copy_from_slice(&buffer[..4]);
            return Err(FrameError::BadMagic {
                expected: expected_magic,
                got,
            });
        }

        let Some(header) = MessageHeader::parse(buffer) else {
            return Ok(ParseOutcome::NeedMoreData);
        };
        let length = header.length as usize;
        if length > self.max_message_size {
            return Err(FrameError::Oversized {
                command: header.command,
                length,
                max: self.max_message_size,
            });
        }

        let consumed = MESSAGE_HEADER_SIZE + length;
        if buffer.len() < consumed {
            return Ok(ParseOutcome::NeedMoreData);
        }
        let payload = &buffer[MESSAGE_HEADER_SIZE..consumed];
        let actual = checksum(payload);
        if actual != header.checksum {
            return Err(FrameError::BadChecksum {
                command: header.command,
                expected: header.checksum,
                got: actual,
            });
        }

        match self.registry.parse(&header.command, payload) {
            Some(Ok(message)) => Ok(ParseOutcome::Message { message, consumed }),
            Some(Err(source)) => Err(FrameError::Payload {
                command: header.command,
                source,
            }),
            None if self.strict => Err(FrameError::UnknownCommand {
                command: header.command,
                consumed,
            }),
            None => {
                debug!(command = %header.command, length, "skipping unknown message type");
                Ok(ParseOutcome::Skipped {
                    command: header.command,
                    consumed,
                })
            }
        }
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = sha256d(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}
