//! Talkback: a headless voice and text chat client
//!
//! Records speech or takes typed text, submits each turn to a conversation
//! backend, and keeps a local copy of the conversation log in sync with it.
//! A front-end drives everything through [`controller::ClientHandle`].

pub mod api;
pub mod audio;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod settings;
pub mod testing;
pub mod turn;

pub use api::{Backend, HttpBackend};
pub use config::ClientConfig;
pub use controller::{
    ClientEvent, ClientHandle, ClientState, Command, InteractionController, Phase, SharedState,
    View,
};
pub use conversation::{ConversationLog, ConversationTurn};
pub use error::{ClientError, ErrorKind, Result};
pub use settings::{Config, ConfigPatch, ModelDescriptor};
