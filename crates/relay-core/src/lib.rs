pub mod address;
pub mod conversation;
pub mod envelope;
pub mod errors;
pub mod ids;

pub use address::Address;
pub use conversation::{Conversation, ConversationRetention, ConversationTable};
pub use envelope::{Command, ConversationEntry, Envelope, ListBody, Request, SendBody};
pub use errors::{AddressError, DecodeError};
pub use ids::{ConnectionId, ConversationId};
