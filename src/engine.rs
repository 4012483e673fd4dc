use crate::error::AppError;
use crate::types::{CloseReason, TranscriptTurn};

use async_trait::async_trait;

/// The conversational engine a call talks through: speech recognition, reasoning, tool calls
/// and speech synthesis all live on the other side of this trait.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Produce the assistant's reply to `user_input`, running any tool calls the model makes on
    /// the way.  Returns the reply text; nothing is spoken yet.
    async fn generate_reply(&self, user_input: &str) -> Result<String, AppError>;

    /// Speak `text` to the caller, returning once the engine has produced all of the audio.
    async fn say(&self, text: &str) -> Result<(), AppError>;

    /// End the engine session.
    async fn close(&self) -> Result<(), AppError>;
}

/// What the engine side drives on a call.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Runs once, before the first turn is delivered.
    async fn session_started(&self);

    /// One call per conversational item, in arrival order.
    async fn turn_received(&self, turn: TranscriptTurn);

    /// A turn that arrived before the close but was never handled.  It belongs in the record and
    /// gets no reply.
    async fn turn_unhandled(&self, turn: TranscriptTurn);

    async fn session_closed(&self, reason: CloseReason);
}
