//! Viewer stream: the daemon-side server and the viewer-side receiver.

mod receiver;
mod server;

pub use receiver::{CommandSender, StreamReceiver};
pub use server::{ServerState, ServerStats, StreamConfig, StreamHandle, StreamServer};
