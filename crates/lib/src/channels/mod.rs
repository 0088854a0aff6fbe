//! Gateway transport (Discord).
//!
//! The session manager talks to the transport through [`GatewayConnector`] and replies
//! through [`ChannelHandle`], so tests can swap in fakes.

mod discord;
mod inbound;
mod transport;

pub use discord::DiscordChannel;
pub use inbound::MessageEvent;
pub use transport::{BotIdentity, ChannelHandle, GatewayConnection, GatewayConnector, GatewayError};
