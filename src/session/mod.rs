//! Conversation state.
//!
//! A host process serves exactly one conversation. Its history is held in
//! memory and grows for the lifetime of the process.
//!
//! # Example
//!
//! ```rust
//! use mcp_host::session::{Conversation, Message};
//!
//! let mut conversation = Conversation::new();
//! conversation.add_user_text("Hello!");
//!
//! assert_eq!(conversation.len(), 1);
//! assert!(matches!(conversation.last(), Some(Message::UserText { .. })));
//! ```

mod conversation;

pub use conversation::{Conversation, Message};
