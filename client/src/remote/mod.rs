//! Remote chat service transport and side channels.

pub mod client;
pub mod error;
pub mod feedback;

pub use client::{ChatServiceClient, PatchStream, TurnRequest, TurnTransport};
pub use error::{FeedbackError, TraceError, TransportError};
pub use feedback::{FeedbackRequest, FeedbackResponse, spawn_feedback};
