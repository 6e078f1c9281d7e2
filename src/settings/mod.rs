pub mod editor;
pub mod types;

pub use editor::{SettingsEditor, SettingsSlots};
pub use types::{Config, ConfigPatch, ModelDescriptor, OptionRange, SamplingOptions};
