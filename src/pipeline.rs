//! Pipeline wiring.
//!
//! ```text
//! CaptureWorker(ir)  -> FrameSlot<Frame> --\
//!                                           FusionStage -> FrameSlot<Packet> -> StreamServer -> viewer
//! CaptureWorker(rgb) -> FrameSlot<Frame> --/       ^                                |
//!                                                  +---------- SaveFlag <-----------+
//! ```
//!
//! Every arrow is a latest-value slot, so no stage can apply backpressure to
//! the one before it.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{AppConfig, EoDetectorKind, FusionSettings};
use crate::control::SaveFlag;
use crate::detect::{
    EoDetector, FlameColorDetector, HotspotDetector, NullEoDetector, ThresholdHotspotDetector,
};
use crate::frame::{Frame, FrameSlot, Modality, PixelData, SlotStats};
use crate::fusion::{EoDetection, FireStatus, FusionEngine, FusionResult, IrHotspot};
use crate::ingest::{create_source, CaptureStats, CaptureWorker, SourceRole};
use crate::protocol::{
    ContainerFormat, ImageEntry, Packet, IMAGE_IR, IMAGE_IR16, IMAGE_RGB, IMAGE_RGB_DET,
};
use crate::stream::{ServerState, ServerStats, StreamConfig, StreamHandle, StreamServer};

const FULL_QUALITY: u8 = 100;
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const HOTSPOT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const STOP_POLL: Duration = Duration::from_millis(20);

// ----------------------------------------------------------------------------
// FusionStage: one cycle
// ----------------------------------------------------------------------------

/// Reads both frame slots, detects, fuses, and publishes a packet snapshot.
pub struct FusionStage {
    ir_slot: Arc<FrameSlot<Frame>>,
    rgb_slot: Arc<FrameSlot<Frame>>,
    outbound: Arc<FrameSlot<Packet>>,
    engine: FusionEngine,
    hotspots: Box<dyn HotspotDetector>,
    eo: Box<dyn EoDetector>,
    save: SaveFlag,
    read_timeout: Duration,
    jpeg_quality: u8,
    last_inputs: Option<(Option<u64>, Option<u64>, bool)>,
    last_result: FusionResult,
}

impl FusionStage {
    pub fn new(
        ir_slot: Arc<FrameSlot<Frame>>,
        rgb_slot: Arc<FrameSlot<Frame>>,
        outbound: Arc<FrameSlot<Packet>>,
        engine: FusionEngine,
        hotspots: Box<dyn HotspotDetector>,
        eo: Box<dyn EoDetector>,
        save: SaveFlag,
    ) -> Self {
        Self {
            ir_slot,
            rgb_slot,
            outbound,
            engine,
            hotspots,
            eo,
            save,
            read_timeout: Duration::from_millis(100),
            jpeg_quality: 80,
            last_inputs: None,
            last_result: FusionResult::no_fire(),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    /// Run one fusion cycle.
    ///
    /// A modality with no frame yet contributes an empty detection list. When
    /// neither slot has ever produced a frame nothing is published. When both
    /// inputs are the same frames as last cycle (and the save flag is
    /// unchanged) the previous result is returned without re-publishing.
    pub fn run_cycle(&mut self) -> Result<FusionResult> {
        let ir = self.ir_slot.read(Some(self.read_timeout));
        let rgb = self.rgb_slot.read(Some(self.read_timeout));
        if ir.is_none() && rgb.is_none() {
            return Ok(FusionResult::no_fire());
        }

        let saving = self.save.is_saving();
        let inputs = (
            ir.as_ref().map(|f| f.timestamp.to_bits()),
            rgb.as_ref().map(|f| f.timestamp.to_bits()),
            saving,
        );
        if self.last_inputs == Some(inputs) {
            return Ok(self.last_result.clone());
        }

        let hotspots = match &ir {
            Some(frame) => self.hotspots.detect(frame).unwrap_or_else(|err| {
                log::warn!("{} detector failed: {:#}", self.hotspots.name(), err);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let detections = match &rgb {
            Some(frame) => self.eo.detect(frame).unwrap_or_else(|err| {
                log::warn!("{} detector failed: {:#}", self.eo.name(), err);
                Vec::new()
            }),
            None => Vec::new(),
        };

        let result = self.engine.fuse(&hotspots, &detections);
        if result.status != self.last_result.status {
            log::info!(
                "fusion status {} -> {} (confirmed {}, ir-only {}, eo-only {})",
                self.last_result.status.as_str(),
                result.status.as_str(),
                result.confirmed_count,
                result.ir_only_count,
                result.eo_only_count
            );
        }

        let packet = self.build_packet(ir.as_ref(), rgb.as_ref(), &hotspots, &detections, &result, saving)?;
        self.outbound.write(packet);
        self.last_inputs = Some(inputs);
        self.last_result = result.clone();
        Ok(result)
    }

    fn build_packet(
        &self,
        ir: Option<&Frame>,
        rgb: Option<&Frame>,
        hotspots: &[IrHotspot],
        detections: &[EoDetection],
        result: &FusionResult,
        saving: bool,
    ) -> Result<Packet> {
        let timestamp = ir
            .iter()
            .chain(rgb.iter())
            .map(|frame| frame.timestamp)
            .fold(f64::MIN, f64::max);
        let mut packet = Packet::new(timestamp);
        packet.fusion = Some(result.clone());
        let preview = ContainerFormat::Jpeg {
            quality: self.jpeg_quality,
        };

        if let Some(ir) = ir {
            packet = packet.with_image(IMAGE_IR, ImageEntry::encode(&ir.visualize()?, preview)?);
            if saving {
                packet = packet.with_image(IMAGE_IR16, ImageEntry::raw(ir));
            }
        }
        if let Some(rgb) = rgb {
            let annotated = self.annotate(rgb, hotspots, detections)?;
            packet = packet.with_image(IMAGE_RGB_DET, ImageEntry::encode(&annotated, preview)?);
            if saving {
                packet = packet.with_image(
                    IMAGE_RGB,
                    ImageEntry::encode(
                        rgb,
                        ContainerFormat::Jpeg {
                            quality: FULL_QUALITY,
                        },
                    )?,
                );
            }
        }
        Ok(packet)
    }

    /// Draw EO boxes and mapped hotspots onto a copy of the RGB frame.
    fn annotate(
        &self,
        rgb: &Frame,
        hotspots: &[IrHotspot],
        detections: &[EoDetection],
    ) -> Result<Frame> {
        let PixelData::Rgb8(pixels) = rgb.pixels() else {
            return Err(anyhow!(
                "cannot annotate {} frame",
                rgb.modality.as_str()
            ));
        };
        let mut canvas = RgbImage::from_raw(rgb.width, rgb.height, pixels.clone())
            .ok_or_else(|| anyhow!("rgb buffer does not match {}x{}", rgb.width, rgb.height))?;

        for detection in detections {
            let width = detection.width.round().max(1.0) as u32;
            let height = detection.height.round().max(1.0) as u32;
            let rect = Rect::at(detection.x.round() as i32, detection.y.round() as i32)
                .of_size(width, height);
            draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        }
        for hotspot in hotspots {
            let (x, y) = self.engine.mapper().ir_to_rgb(hotspot.x, hotspot.y);
            draw_cross_mut(&mut canvas, HOTSPOT_COLOR, x.round() as i32, y.round() as i32);
        }

        Frame::new(
            Modality::Rgb,
            rgb.width,
            rgb.height,
            rgb.timestamp,
            PixelData::Rgb8(canvas.into_raw()),
        )
    }
}

/// Detectors selected by the fusion settings.
pub fn build_detectors(
    settings: &FusionSettings,
) -> Result<(Box<dyn HotspotDetector>, Box<dyn EoDetector>)> {
    let hotspots = ThresholdHotspotDetector::new(settings.hotspot_threshold_c)
        .with_limits(settings.max_hotspots, settings.min_separation_px);
    let mut eo: Box<dyn EoDetector> = match settings.eo_detector {
        EoDetectorKind::FlameColor => Box::new(FlameColorDetector::new()),
        EoDetectorKind::None => Box::new(NullEoDetector),
    };
    eo.warm_up()
        .with_context(|| format!("warm up {} detector", eo.name()))?;
    Ok((Box::new(hotspots), eo))
}

// ----------------------------------------------------------------------------
// Pipeline: threads and shutdown
// ----------------------------------------------------------------------------

/// Point-in-time view of the running pipeline, logged periodically by the daemon.
#[derive(Clone, Debug)]
pub struct HealthReport {
    pub ir_capture: CaptureStats,
    pub rgb_capture: CaptureStats,
    pub ir_slot: SlotStats,
    pub rgb_slot: SlotStats,
    pub fusion_cycles: u64,
    pub last_status: FireStatus,
    pub saving: bool,
    pub server_state: ServerState,
    pub server: ServerStats,
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ir frames={} errors={} overwritten={} | rgb frames={} errors={} overwritten={} | \
             fusion cycles={} status={} saving={} | server {} sent={} dropped={} connections={}",
            self.ir_capture.frames,
            self.ir_capture.errors,
            self.ir_slot.overwritten,
            self.rgb_capture.frames,
            self.rgb_capture.errors,
            self.rgb_slot.overwritten,
            self.fusion_cycles,
            self.last_status.as_str(),
            self.saving,
            self.server_state.as_str(),
            self.server.packets_sent,
            self.server.packets_dropped,
            self.server.connections
        )
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Start capture workers, the fusion thread and the stream server.
    ///
    /// Geometry is validated before any thread starts.
    pub fn start(cfg: &AppConfig) -> Result<PipelineHandle> {
        let engine = FusionEngine::with_fov(cfg.ir.size, cfg.rgb.size, cfg.coord)
            .context("fusion geometry")?;
        let (hotspots, eo) = build_detectors(&cfg.fusion)?;

        let ir_slot = Arc::new(FrameSlot::with_capacity(cfg.buffer_slots));
        let rgb_slot = Arc::new(FrameSlot::with_capacity(cfg.buffer_slots));
        let outbound = Arc::new(FrameSlot::new());
        let save = SaveFlag::new();

        let mut workers = Vec::with_capacity(2);
        for (role, camera, slot) in [
            (SourceRole::Ir, &cfg.ir, &ir_slot),
            (SourceRole::Rgb, &cfg.rgb, &rgb_slot),
        ] {
            let source = create_source(role, camera)
                .with_context(|| format!("create {} source", role.as_str()))?;
            let worker = CaptureWorker::spawn(source, slot.clone(), camera.input.frame_interval)?;
            workers.push((role, worker));
        }

        let server = StreamServer::new(
            StreamConfig::from(&cfg.stream),
            outbound.clone(),
            save.clone(),
        )
        .spawn()?;

        let stage = FusionStage::new(
            ir_slot.clone(),
            rgb_slot.clone(),
            outbound,
            engine,
            hotspots,
            eo,
            save.clone(),
        )
        .with_read_timeout(cfg.fusion.read_timeout)
        .with_jpeg_quality(cfg.fusion.jpeg_quality);

        let fusion_stop = Arc::new(AtomicBool::new(false));
        let cycles = Arc::new(AtomicU64::new(0));
        let last_status = Arc::new(Mutex::new(FireStatus::NoFire));
        let fusion_join = spawn_fusion_loop(
            stage,
            cfg.fusion.interval,
            fusion_stop.clone(),
            cycles.clone(),
            last_status.clone(),
        )?;

        log::info!(
            "pipeline started: ir {}x{} ({}), rgb {}x{} ({}), stream on {}",
            cfg.ir.size.width,
            cfg.ir.size.height,
            cfg.ir.input.mode.as_str(),
            cfg.rgb.size.width,
            cfg.rgb.size.height,
            cfg.rgb.input.mode.as_str(),
            server.addr
        );

        Ok(PipelineHandle {
            server: Some(server),
            fusion_stop,
            fusion_join: Some(fusion_join),
            workers,
            ir_slot,
            rgb_slot,
            cycles,
            last_status,
            save,
        })
    }
}

fn spawn_fusion_loop(
    mut stage: FusionStage,
    interval: Duration,
    stop: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    last_status: Arc<Mutex<FireStatus>>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("fusion".to_string())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let started = Instant::now();
                match stage.run_cycle() {
                    Ok(result) => {
                        cycles.fetch_add(1, Ordering::Relaxed);
                        *last_status
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner()) = result.status;
                    }
                    Err(err) => log::warn!("fusion cycle failed: {:#}", err),
                }
                let deadline = started + interval;
                while !stop.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::sleep((deadline - now).min(STOP_POLL));
                }
            }
        })
        .context("spawn fusion thread")
}

pub struct PipelineHandle {
    server: Option<StreamHandle>,
    fusion_stop: Arc<AtomicBool>,
    fusion_join: Option<JoinHandle<()>>,
    workers: Vec<(SourceRole, CaptureWorker)>,
    ir_slot: Arc<FrameSlot<Frame>>,
    rgb_slot: Arc<FrameSlot<Frame>>,
    cycles: Arc<AtomicU64>,
    last_status: Arc<Mutex<FireStatus>>,
    save: SaveFlag,
}

impl PipelineHandle {
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|server| server.addr)
    }

    /// The flag viewer commands switch.
    pub fn save_flag(&self) -> SaveFlag {
        self.save.clone()
    }

    pub fn health(&self) -> HealthReport {
        let capture = |wanted: SourceRole| {
            self.workers
                .iter()
                .find(|(role, _)| *role == wanted)
                .map(|(_, worker)| worker.stats())
                .unwrap_or_default()
        };
        HealthReport {
            ir_capture: capture(SourceRole::Ir),
            rgb_capture: capture(SourceRole::Rgb),
            ir_slot: self.ir_slot.stats(),
            rgb_slot: self.rgb_slot.stats(),
            fusion_cycles: self.cycles.load(Ordering::Relaxed),
            last_status: *self
                .last_status
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            saving: self.save.is_saving(),
            server_state: self
                .server
                .as_ref()
                .map(|server| server.state())
                .unwrap_or(ServerState::Closed),
            server: self
                .server
                .as_ref()
                .map(|server| server.stats())
                .unwrap_or_default(),
        }
    }

    /// Stop in order: stream server, fusion thread, capture workers.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        let mut result = Ok(());
        if let Some(server) = self.server.take() {
            result = server.stop();
        }
        self.fusion_stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.fusion_join.take() {
            if join.join().is_err() && result.is_ok() {
                result = Err(anyhow!("fusion thread panicked"));
            }
        }
        for (_, worker) in self.workers.iter_mut() {
            worker.stop();
        }
        self.workers.clear();
        result
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_inner() {
            log::error!("pipeline shutdown: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::FrameSize;
    use crate::ingest::{CaptureSource, MockRgbSource, MockThermalSource};
    use crate::protocol::DecodedImage;

    struct Harness {
        ir: Arc<FrameSlot<Frame>>,
        rgb: Arc<FrameSlot<Frame>>,
        out: Arc<FrameSlot<Packet>>,
        save: SaveFlag,
        stage: FusionStage,
    }

    fn harness() -> Harness {
        let ir = Arc::new(FrameSlot::new());
        let rgb = Arc::new(FrameSlot::new());
        let out = Arc::new(FrameSlot::new());
        let save = SaveFlag::new();
        let engine =
            FusionEngine::new(FrameSize::new(160, 120), FrameSize::new(960, 540)).unwrap();
        let stage = FusionStage::new(
            ir.clone(),
            rgb.clone(),
            out.clone(),
            engine,
            Box::new(ThresholdHotspotDetector::new(80.0)),
            Box::new(FlameColorDetector::new()),
            save.clone(),
        )
        .with_read_timeout(Duration::from_millis(5));
        Harness {
            ir,
            rgb,
            out,
            save,
            stage,
        }
    }

    fn capture(source: &mut dyn CaptureSource) -> Frame {
        source.capture().unwrap().unwrap()
    }

    #[test]
    fn aligned_mock_scenes_confirm_fire() -> Result<()> {
        let mut h = harness();
        h.ir.write(capture(&mut MockThermalSource::new(160, 120)));
        h.rgb.write(capture(&mut MockRgbSource::new(960, 540)));

        let result = h.stage.run_cycle()?;
        assert_eq!(result.status, FireStatus::FireConfirmed);
        assert_eq!(result.ir_only_count, 0);

        let packet = h.out.read(None).expect("packet published");
        assert_eq!(packet.fusion.as_ref(), Some(&result));
        assert!(packet.images.contains_key(IMAGE_IR));
        assert!(packet.images.contains_key(IMAGE_RGB_DET));
        assert!(!packet.images.contains_key(IMAGE_IR16));
        Ok(())
    }

    #[test]
    fn missing_rgb_degrades_to_ir_only() -> Result<()> {
        let mut h = harness();
        h.ir.write(capture(&mut MockThermalSource::new(160, 120)));

        let result = h.stage.run_cycle()?;
        assert_eq!(result.status, FireStatus::FireIrOnly);
        assert!(result.fire_detected);
        Ok(())
    }

    #[test]
    fn nothing_captured_publishes_nothing() -> Result<()> {
        let mut h = harness();
        assert_eq!(h.stage.run_cycle()?.status, FireStatus::NoFire);
        assert!(h.out.read(None).is_none());
        Ok(())
    }

    #[test]
    fn saving_attaches_full_resolution_images() -> Result<()> {
        let mut h = harness();
        h.ir.write(capture(&mut MockThermalSource::new(160, 120)));
        h.rgb.write(capture(&mut MockRgbSource::new(960, 540)));
        h.stage.run_cycle()?;
        h.out.read(None);

        h.save.set(true);
        h.stage.run_cycle()?;
        let packet = h.out.read(None).expect("republished after save toggle");

        let entry = &packet.images[IMAGE_IR16];
        assert!(!entry.compressed);
        assert_eq!(entry.dtype.as_deref(), Some("uint16"));
        assert_eq!(entry.shape, Some(vec![120, 160]));
        match packet.decode_image(IMAGE_RGB) {
            Some(DecodedImage::Container(image)) => {
                assert_eq!((image.width(), image.height()), (960, 540))
            }
            other => panic!("unexpected rgb entry: {:?}", other.is_some()),
        }
        Ok(())
    }

    #[test]
    fn stale_inputs_are_not_republished() -> Result<()> {
        let mut h = harness();
        h.ir.write(capture(&mut MockThermalSource::new(160, 120)));
        h.stage.run_cycle()?;
        assert_eq!(h.out.stats().written, 1);

        h.stage.run_cycle()?;
        assert_eq!(h.out.stats().written, 1);
        Ok(())
    }
}
