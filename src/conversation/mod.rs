pub mod log;
pub mod sync;
pub mod types;

pub use log::{ConversationLog, LogChange};
pub use sync::ConversationSync;
pub use types::ConversationTurn;
