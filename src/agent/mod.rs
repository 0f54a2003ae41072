//! The piloting loop: session state, the conversation transcript,
//! command extraction, screen description and the turn driver.

pub mod commands;
pub mod engine;
pub mod observer;
pub mod state;
pub mod transcript;
