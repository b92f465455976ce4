//! Client error types.

use std::io;

use thiserror::Error;
use tickmqtt_core::{EncodeError, ProtocolError};

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connection already in progress")]
    AlreadyConnecting,

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not connected")]
    NotConnected,

    #[error("All packet identifiers are in use")]
    PacketIdsExhausted,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Flat error classification carried by [`crate::Event::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AlreadyConnected,
    AlreadyConnecting,
    MissingArgument,
    InvalidArgument,
    NotConnected,
    PacketIdsExhausted,
    Transport,
    Io,
    Protocol,
    Encode,
    Config,
    InvalidState,
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::AlreadyConnected => ErrorCode::AlreadyConnected,
            ClientError::AlreadyConnecting => ErrorCode::AlreadyConnecting,
            ClientError::MissingArgument(_) => ErrorCode::MissingArgument,
            ClientError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            ClientError::NotConnected => ErrorCode::NotConnected,
            ClientError::PacketIdsExhausted => ErrorCode::PacketIdsExhausted,
            ClientError::Transport(_) => ErrorCode::Transport,
            ClientError::Io(_) => ErrorCode::Io,
            ClientError::Protocol(_) => ErrorCode::Protocol,
            ClientError::Encode(_) => ErrorCode::Encode,
            ClientError::Config(_) => ErrorCode::Config,
            ClientError::InvalidState(_) => ErrorCode::InvalidState,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ClientError::InvalidArgument(msg.into())
    }

    pub(crate) fn missing(what: impl Into<String>) -> Self {
        ClientError::MissingArgument(what.into())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
