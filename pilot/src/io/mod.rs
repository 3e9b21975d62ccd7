//! Side-effecting adapters: configuration, prompts, the chat-model client and
//! the desktop collaborators behind the perception, actuation and planning
//! traits.

pub mod actuation;
pub mod config;
pub mod desktop;
pub mod llm;
pub mod perception;
pub mod planning;
pub mod process;
pub mod prompt;
pub mod report;
