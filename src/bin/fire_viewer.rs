//! fire_viewer - headless viewer for a firewatchd stream
//!
//! Connects (and reconnects with backoff) to the stream server, decodes the
//! preview images, logs FPS and latency once per second, and relays operator
//! commands typed on stdin:
//!
//! - `s`: start saving (server attaches full-resolution images)
//! - `e`: stop saving
//! - `q`: quit
//!
//! While saving, `rgb` is written as JPEG under `<save_dir>/visible` and `ir16`
//! as 16-bit TIFF under `<save_dir>/lwir`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::ImageFormat;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use firewatch::control::{ControlCommand, SaveFlag};
use firewatch::fusion::FireStatus;
use firewatch::protocol::{
    DecodedImage, Packet, PayloadEncoding, ProtocolError, IMAGE_IR, IMAGE_IR16, IMAGE_RGB,
    IMAGE_RGB_DET,
};
use firewatch::stream::{CommandSender, StreamReceiver};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, env = "FIREWATCH_VIEWER_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "FIREWATCH_STREAM_PORT", default_value_t = 9999)]
    port: u16,

    /// Payload encoding; must match the server (legacy | flagged).
    #[arg(long, default_value = "legacy")]
    encoding: PayloadEncoding,

    #[arg(long, env = "FIREWATCH_MAX_PACKET_MB", default_value_t = 4.0)]
    max_packet_mb: f64,

    #[arg(long, default_value = "save")]
    save_dir: PathBuf,

    /// First reconnect delay; doubles up to `retry_max_ms`.
    #[arg(long, default_value_t = 500)]
    retry_min_ms: u64,

    #[arg(long, default_value_t = 5000)]
    retry_max_ms: u64,
}

/// Connection the stdin thread sends commands over, when one is up.
type SharedSender = Arc<Mutex<Option<CommandSender>>>;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if !args.max_packet_mb.is_finite() || args.max_packet_mb <= 0.0 {
        return Err(anyhow!("--max-packet-mb must be greater than zero"));
    }
    let max_packet_bytes = (args.max_packet_mb * 1024.0 * 1024.0) as usize;

    let quit = Arc::new(AtomicBool::new(false));
    let saving = SaveFlag::new();
    let sender: SharedSender = Arc::new(Mutex::new(None));
    spawn_stdin_reader(quit.clone(), saving.clone(), sender.clone())?;

    let saver = FrameSaver::new(&args.save_dir)?;
    let retry_min = Duration::from_millis(args.retry_min_ms.max(1));
    let retry_max = Duration::from_millis(args.retry_max_ms).max(retry_min);
    let mut backoff = retry_min;

    log::info!(
        "fire_viewer connecting to {}:{} ({} payloads); type s/e/q + Enter",
        args.host,
        args.port,
        args.encoding.as_str()
    );
    while !quit.load(Ordering::SeqCst) {
        let mut receiver = match StreamReceiver::connect(
            (args.host.as_str(), args.port),
            args.encoding,
            max_packet_bytes,
        ) {
            Ok(receiver) => receiver,
            Err(err) => {
                log::warn!(
                    "connect failed: {}; retrying in {} ms",
                    err,
                    backoff.as_millis()
                );
                sleep_unless_quit(backoff, &quit);
                backoff = (backoff * 2).min(retry_max);
                continue;
            }
        };
        backoff = retry_min;
        log::info!("connected to {}", receiver.peer());
        *lock(&sender) = receiver.command_sender().ok();

        let err = receive_loop(&mut receiver, &saving, &saver);
        *lock(&sender) = None;
        receiver.close();
        if quit.load(Ordering::SeqCst) {
            break;
        }
        if err.is_desync() || err.is_violation() {
            log::warn!("protocol violation: {}; reconnecting", err);
        } else {
            log::warn!("connection lost: {}; reconnecting", err);
        }
        sleep_unless_quit(retry_min, &quit);
    }
    log::info!("fire_viewer stopped");
    Ok(())
}

/// Receive until the connection fails; returns the failure.
fn receive_loop(receiver: &mut StreamReceiver, saving: &SaveFlag, saver: &FrameSaver) -> ProtocolError {
    let mut stats = ViewerStats::new();
    loop {
        let packet = match receiver.recv_packet() {
            Ok(packet) => packet,
            Err(err) => return err,
        };
        stats.record(&packet);

        for key in [IMAGE_IR, IMAGE_RGB_DET] {
            if let Some(dims) = packet.decode_image(key).and_then(|image| image.dimensions()) {
                log::debug!("{} {}x{}", key, dims.0, dims.1);
            }
        }
        if saving.is_saving() {
            if let Err(err) = saver.save(&packet) {
                log::warn!("saving frames failed: {:#}", err);
            }
        }
        if let Some(line) = stats.tick() {
            log::info!("{}", line);
        }
    }
}

fn spawn_stdin_reader(quit: Arc<AtomicBool>, saving: SaveFlag, sender: SharedSender) -> Result<()> {
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "s" => ControlCommand::StartSaving,
                    "e" => ControlCommand::StopSaving,
                    "q" => break,
                    "" => continue,
                    other => {
                        log::warn!("unknown input '{}' (expected s, e or q)", other);
                        continue;
                    }
                };
                saving.apply(&command);
                match lock(&sender).as_mut() {
                    Some(sender) => match sender.send(&command) {
                        Ok(()) => log::info!("sent {}", command.as_str()),
                        Err(err) => log::warn!("sending {} failed: {}", command.as_str(), err),
                    },
                    None => log::warn!("not connected; {} applies locally only", command.as_str()),
                }
            }
            quit.store(true, Ordering::SeqCst);
            if let Some(sender) = lock(&sender).as_ref() {
                sender.close();
            }
        })
        .context("spawn stdin thread")?;
    Ok(())
}

fn lock(sender: &SharedSender) -> std::sync::MutexGuard<'_, Option<CommandSender>> {
    sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sleep_unless_quit(duration: Duration, quit: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !quit.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

// ----------------------------------------------------------------------------
// Stats
// ----------------------------------------------------------------------------

struct ViewerStats {
    window_start: Instant,
    frames: u32,
    latency_sum: f64,
    last_status: FireStatus,
}

impl ViewerStats {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            latency_sum: 0.0,
            last_status: FireStatus::NoFire,
        }
    }

    fn record(&mut self, packet: &Packet) {
        self.frames += 1;
        self.latency_sum += (firewatch::frame::unix_now() - packet.timestamp).max(0.0);
        if let Some(fusion) = &packet.fusion {
            self.last_status = fusion.status;
        }
    }

    /// Summary line once per second.
    fn tick(&mut self) -> Option<String> {
        let elapsed = self.window_start.elapsed();
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        let latency_ms = if self.frames == 0 {
            0.0
        } else {
            self.latency_sum / self.frames as f64 * 1000.0
        };
        let line = format!(
            "fps {:.1} | latency {:.1} ms | {}",
            fps,
            latency_ms,
            self.last_status.as_str()
        );
        self.window_start = Instant::now();
        self.frames = 0;
        self.latency_sum = 0.0;
        Some(line)
    }
}

// ----------------------------------------------------------------------------
// Saving
// ----------------------------------------------------------------------------

struct FrameSaver {
    visible_dir: PathBuf,
    lwir_dir: PathBuf,
}

impl FrameSaver {
    fn new(save_dir: &Path) -> Result<Self> {
        Ok(Self {
            visible_dir: save_dir.join("visible"),
            lwir_dir: save_dir.join("lwir"),
        })
    }

    fn save(&self, packet: &Packet) -> Result<()> {
        let tag = timestamp_tag(packet.timestamp);
        if let Some(image) = packet.decode_image(IMAGE_RGB).and_then(|i| i.to_dynamic()) {
            std::fs::create_dir_all(&self.visible_dir)
                .with_context(|| format!("create {}", self.visible_dir.display()))?;
            let path = self.visible_dir.join(format!("rgb_frame_{}.jpg", tag));
            image
                .to_rgb8()
                .save_with_format(&path, ImageFormat::Jpeg)
                .with_context(|| format!("write {}", path.display()))?;
        }
        if let Some(DecodedImage::Raw(raw)) = packet.decode_image(IMAGE_IR16) {
            let image = raw
                .to_dynamic()
                .ok_or_else(|| anyhow!("ir16 entry is not a single-channel image"))?;
            std::fs::create_dir_all(&self.lwir_dir)
                .with_context(|| format!("create {}", self.lwir_dir.display()))?;
            let path = self.lwir_dir.join(format!("ir16_frame_{}.tiff", tag));
            image
                .save_with_format(&path, ImageFormat::Tiff)
                .with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }
}

/// Packet timestamp as a file-name fragment: `1700000000.25` -> `1700000000_25`.
fn timestamp_tag(timestamp: f64) -> String {
    format!("{}", timestamp).replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use firewatch::frame::{Frame, Modality, PixelData};
    use firewatch::protocol::{ContainerFormat, ImageEntry};

    #[test]
    fn timestamp_tag_replaces_dot() {
        assert_eq!(timestamp_tag(1700000000.25), "1700000000_25");
    }

    #[test]
    fn saver_writes_visible_and_lwir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let rgb = Frame::new(Modality::Rgb, 4, 2, 0.0, PixelData::Rgb8(vec![200; 24]))?;
        let ir = Frame::new(Modality::IrRaw16, 4, 2, 0.0, PixelData::Gray16(vec![30000; 8]))?;
        let packet = Packet::new(12.5)
            .with_image(IMAGE_RGB, ImageEntry::encode(&rgb, ContainerFormat::Jpeg { quality: 90 })?)
            .with_image(IMAGE_IR16, ImageEntry::raw(&ir));

        FrameSaver::new(dir.path())?.save(&packet)?;

        assert!(dir.path().join("visible/rgb_frame_12_5.jpg").is_file());
        let tiff = image::open(dir.path().join("lwir/ir16_frame_12_5.tiff"))?;
        assert_eq!(tiff.to_luma16().into_raw(), vec![30000; 8]);
        Ok(())
    }

    #[test]
    fn stats_report_after_one_second() {
        let mut stats = ViewerStats::new();
        assert!(stats.tick().is_none());
        stats.window_start -= Duration::from_secs(2);
        stats.record(&Packet::new(firewatch::frame::unix_now()));
        let line = stats.tick().expect("summary");
        assert!(line.starts_with("fps 0.5"));
    }
}
