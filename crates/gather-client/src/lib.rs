//! Client-side state for the Gather API: an HTTP client plus the view state
//! the UI binds to (conversation lists, the shared messenger, suggestion
//! debouncing).

pub mod client;
pub mod conversation_view;
pub mod debounce;
pub mod error;
pub mod messenger;

pub use client::GatherClient;
pub use conversation_view::{ConversationView, Liveness};
pub use debounce::Debouncer;
pub use error::ClientError;
pub use messenger::{ConversationTarget, Messenger};
