//! Shared types for the parley relay: wire events, connection ids, the
//! suggestion generator seam, the suggestion parser and identity assignment.

pub mod errors;
pub mod events;
pub mod generator;
pub mod identity;
pub mod ids;
pub mod suggestions;

pub use errors::GenerationError;
pub use events::{InboundMessage, OutboundEvent};
pub use generator::{suggestion_prompt, SuggestionGenerator};
pub use ids::{ConnectionId, MessageId};
pub use suggestions::{SuggestionBatch, SUGGESTION_COUNT};
