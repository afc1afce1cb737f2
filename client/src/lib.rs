//! # docpilot
//!
//! Terminal chat client for a remote documentation question-answering
//! service. Answers stream in as partial-update operations against a run
//! document; the client reassembles them incrementally, deduplicates the
//! retrieved sources, and resolves inline citation markers against the
//! collapsed source list while the answer is still arriving.
//!
//! The interesting parts live in [`chat`]: the patch assembler, the source
//! deduplicator, the citation resolver, and the session state machine.
//! [`remote`] carries the wire protocol and the fire-and-forget feedback
//! and trace side channels; [`render`] flattens resolved tokens for the
//! terminal.

pub mod app;
pub mod chat;
pub mod core;
pub mod remote;
pub mod render;
