//! These models represent the objects passed around by the assistant
//!
//! There are several different related formats we need to interact with:
//! - chat widget messages, sent from the web client to the server
//! - gemini contents/function declarations, sent from the agent to the LLM
//! - openai messages/tools, sent from the agent to the LLM
//! - tool calls and results, exchanged between the agent and the systems providing tools
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using to/from helpers. Because of the need for compatibility,
//! the internal models are not an exact match to any of these formats.
pub mod caller;
pub mod content;
pub mod message;
pub mod navigation;
pub mod role;
pub mod tool;
