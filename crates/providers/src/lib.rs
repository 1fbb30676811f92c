pub mod client;
pub mod factory;
pub mod openai;

use async_trait::async_trait;
use surfpilot_core::types::{ToolCatalog, TranscriptItem};
use surfpilot_core::Result;

/// Decides the next items of a conversation given its history.
///
/// An empty response means the oracle has nothing more to do this turn.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn query(&self, history: &[TranscriptItem], catalog: &ToolCatalog) -> Result<Vec<TranscriptItem>>;
}

pub use factory::create_oracle;
pub use openai::ResponsesOracle;
