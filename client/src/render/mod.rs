//! Presentation plumbing.

pub mod terminal;
