//! Parley core library: Discord gateway session, message relay to a chat-completion
//! service, and the HTTP/timer host that keeps the session alive.

pub mod channels;
pub mod config;
pub mod host;
pub mod init;
pub mod llm;
pub mod relay;
pub mod session;
