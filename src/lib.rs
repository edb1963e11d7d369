//! Mail Triage — polls a shared inbox, classifies each message with an LLM,
//! geocodes the reported address and forwards it to the regional team.

pub mod channels;
pub mod config;
pub mod departments;
pub mod error;
pub mod extract;
pub mod llm;
pub mod pipeline;
