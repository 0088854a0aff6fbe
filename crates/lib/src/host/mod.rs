//! Host: the two triggers that keep the gateway session alive.
//!
//! An HTTP endpoint (`GET|POST /api/relay`) and a periodic timer both call
//! [`SessionManager::ensure_started`](crate::session::SessionManager::ensure_started).
//! `GET /` reports health.

mod protocol;
mod server;
mod timer;

pub use protocol::{trigger_message, TriggerRequest};
pub use server::{build_router, run_host, HostState};
pub use timer::{spawn_keepalive, timer_tick};
