//! Stream server.
//!
//! One viewer at a time. The server thread accepts, then streams the newest
//! packet snapshot from its `FrameSlot` while a second thread reads control
//! commands off the same socket. Any receive/send failure or protocol
//! violation drops the client and returns to accept (`Reconnecting`). Only
//! `StreamHandle::stop` ends in `Closed`.

use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::StreamSettings;
use crate::control::SaveFlag;
use crate::frame::FrameSlot;
use crate::protocol::{self, Packet, PayloadEncoding, DEFAULT_MAX_PACKET_BYTES};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const SNAPSHOT_WAIT: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub addr: String,
    pub max_packet_bytes: usize,
    pub encoding: PayloadEncoding,
    pub compress: bool,
    /// Minimum spacing between packets to one viewer.
    pub send_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:9999".to_string(),
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
            encoding: PayloadEncoding::default(),
            compress: true,
            send_interval: Duration::from_millis(33),
        }
    }
}

impl From<&StreamSettings> for StreamConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            addr: settings.bind_addr(),
            max_packet_bytes: settings.max_packet_bytes(),
            encoding: settings.encoding,
            compress: settings.compress,
            send_interval: settings.send_interval,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Listening,
    Connected,
    Streaming,
    Reconnecting,
    Closed,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Listening => "listening",
            ServerState::Connected => "connected",
            ServerState::Streaming => "streaming",
            ServerState::Reconnecting => "reconnecting",
            ServerState::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Listening,
            1 => ServerState::Connected,
            2 => ServerState::Streaming,
            3 => ServerState::Reconnecting,
            _ => ServerState::Closed,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: u64,
    pub packets_sent: u64,
    /// Packets whose encoded size fell outside `(0, max_packet_bytes]`.
    pub packets_dropped: u64,
    pub commands_received: u64,
}

#[derive(Default)]
struct Shared {
    state: AtomicU8,
    connections: AtomicU64,
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
    commands_received: AtomicU64,
}

impl Shared {
    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, next: ServerState) {
        let previous = ServerState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if previous != next {
            log::info!(
                "stream server: {} -> {}",
                previous.as_str(),
                next.as_str()
            );
        }
    }
}

#[derive(Debug)]
pub struct StreamHandle {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.shared.connections.load(Ordering::Relaxed),
            packets_sent: self.shared.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.shared.packets_dropped.load(Ordering::Relaxed),
            commands_received: self.shared.commands_received.load(Ordering::Relaxed),
        }
    }

    /// Close the listener and any client, then wait for the server thread.
    pub fn stop(mut self) -> Result<()> {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop_inner() {
            log::error!("{}", err);
        }
    }
}

pub struct StreamServer {
    cfg: StreamConfig,
    snapshots: Arc<FrameSlot<Packet>>,
    save: SaveFlag,
}

impl StreamServer {
    /// `snapshots` is the latest-value slot the fusion stage publishes into;
    /// `save` is switched by viewer control commands.
    pub fn new(cfg: StreamConfig, snapshots: Arc<FrameSlot<Packet>>, save: SaveFlag) -> Self {
        Self {
            cfg,
            snapshots,
            save,
        }
    }

    /// Bind and start serving. Bind failures are returned here, not logged later.
    pub fn spawn(self) -> Result<StreamHandle> {
        if self.cfg.max_packet_bytes == 0 {
            return Err(anyhow!("max_packet_bytes must be greater than zero"));
        }
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("bind stream server on {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shared = Arc::new(Shared::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let shared_thread = shared.clone();
        let shutdown_thread = shutdown.clone();
        let join = thread::Builder::new()
            .name("stream-server".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, self, &shared_thread, &shutdown_thread) {
                    log::error!("stream server stopped: {:#}", err);
                }
                shared_thread.transition(ServerState::Closed);
            })
            .context("spawn stream server thread")?;

        log::info!("stream server listening on {}", addr);
        Ok(StreamHandle {
            addr,
            shared,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    server: StreamServer,
    shared: &Arc<Shared>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                shared.connections.fetch_add(1, Ordering::Relaxed);
                log::info!("stream server: viewer connected from {}", peer);
                shared.transition(ServerState::Connected);
                match serve_client(stream, &server, shared, shutdown) {
                    Ok(()) => break,
                    Err(err) => {
                        log::warn!("stream server: connection to {} lost: {:#}", peer, err);
                        shared.transition(ServerState::Reconnecting);
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Serve one viewer. `Ok` means shutdown was requested; `Err` means the
/// connection was lost and the caller should accept again.
fn serve_client(
    stream: TcpStream,
    server: &StreamServer,
    shared: &Arc<Shared>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    // Some platforms hand out accepted sockets in the listener's mode.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let lost = Arc::new(AtomicBool::new(false));
    let control = spawn_control_reader(
        stream.try_clone().context("clone viewer socket")?,
        server.cfg.max_packet_bytes,
        server.save.clone(),
        shared.clone(),
        lost.clone(),
    )?;

    let result = stream_packets(&stream, server, shared, shutdown, &lost);

    let _ = stream.shutdown(Shutdown::Both);
    if control.join().is_err() {
        log::error!("stream server: control reader panicked");
    }
    // Saving belongs to the viewer that asked for it.
    if server.save.is_saving() {
        log::info!("stream server: viewer gone, saving stopped");
        server.save.set(false);
    }
    result
}

fn stream_packets(
    stream: &TcpStream,
    server: &StreamServer,
    shared: &Shared,
    shutdown: &AtomicBool,
    lost: &AtomicBool,
) -> Result<()> {
    let cfg = &server.cfg;
    let mut writer = stream;
    let mut last_sent: Option<u64> = None;
    let mut next_send = Instant::now();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        if lost.load(Ordering::SeqCst) {
            return Err(anyhow!("control channel closed"));
        }

        let Some((generation, packet)) = server.snapshots.read_versioned(Some(SNAPSHOT_WAIT))
        else {
            continue;
        };
        if last_sent == Some(generation) {
            continue;
        }

        let now = Instant::now();
        if now < next_send {
            thread::sleep(next_send - now);
        }
        next_send = Instant::now() + cfg.send_interval;
        last_sent = Some(generation);

        let payload = match packet.encode(cfg.encoding, cfg.compress) {
            Ok(payload) => payload,
            Err(err) => {
                shared.packets_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("stream server: cannot encode packet: {}", err);
                continue;
            }
        };
        if payload.is_empty() || payload.len() > cfg.max_packet_bytes {
            shared.packets_dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "stream server: dropping packet of {} bytes (limit {})",
                payload.len(),
                cfg.max_packet_bytes
            );
            continue;
        }
        protocol::write_frame(&mut writer, &payload, cfg.max_packet_bytes)?;
        shared.packets_sent.fetch_add(1, Ordering::Relaxed);
        if shared.state() == ServerState::Connected {
            shared.transition(ServerState::Streaming);
        }
    }
}

fn spawn_control_reader(
    mut reader: TcpStream,
    max_packet_bytes: usize,
    save: SaveFlag,
    shared: Arc<Shared>,
    lost: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stream-control".to_string())
        .spawn(move || {
            loop {
                match protocol::recv_control(&mut reader, max_packet_bytes) {
                    Ok(command) => {
                        shared.commands_received.fetch_add(1, Ordering::Relaxed);
                        if save.apply(&command) {
                            log::info!("stream server: control command '{}'", command.as_str());
                        } else {
                            log::warn!(
                                "stream server: ignoring unknown control command '{}'",
                                command.as_str()
                            );
                        }
                    }
                    Err(err) => {
                        if err.is_transient() {
                            log::debug!("stream server: control channel closed: {}", err);
                        } else {
                            log::warn!("stream server: control protocol violation: {}", err);
                        }
                        break;
                    }
                }
            }
            lost.store(true, Ordering::SeqCst);
            let _ = reader.shutdown(Shutdown::Both);
        })
        .context("spawn control reader thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ServerState::Listening,
            ServerState::Connected,
            ServerState::Streaming,
            ServerState::Reconnecting,
            ServerState::Closed,
        ] {
            assert_eq!(ServerState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn bind_failure_is_reported_by_spawn() {
        let server = StreamServer::new(
            StreamConfig {
                addr: "not-an-address".to_string(),
                ..StreamConfig::default()
            },
            Arc::new(FrameSlot::new()),
            SaveFlag::new(),
        );
        assert!(server.spawn().is_err());
    }

    #[test]
    fn stop_closes_idle_server() -> Result<()> {
        let server = StreamServer::new(
            StreamConfig {
                addr: "127.0.0.1:0".to_string(),
                ..StreamConfig::default()
            },
            Arc::new(FrameSlot::new()),
            SaveFlag::new(),
        );
        let handle = server.spawn()?;
        assert_eq!(handle.state(), ServerState::Listening);
        let shared = handle.shared.clone();
        handle.stop()?;
        assert_eq!(shared.state(), ServerState::Closed);
        Ok(())
    }
}
