use anyhow::Result;
use std::time::{Duration, Instant};

use firewatch::config::AppConfig;
use firewatch::control::ControlCommand;
use firewatch::fusion::{FireStatus, FrameSize};
use firewatch::protocol::{Packet, IMAGE_IR, IMAGE_IR16, IMAGE_RGB, IMAGE_RGB_DET};
use firewatch::stream::{ServerState, StreamReceiver};
use firewatch::Pipeline;

fn mock_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.rgb.size = FrameSize::new(320, 180);
    cfg.ir.input.frame_interval = Duration::from_millis(10);
    cfg.rgb.input.frame_interval = Duration::from_millis(10);
    cfg.stream.host = "127.0.0.1".to_string();
    cfg.stream.port = 0;
    cfg.stream.send_interval = Duration::ZERO;
    cfg.fusion.interval = Duration::from_millis(10);
    cfg.fusion.read_timeout = Duration::from_millis(20);
    cfg
}

fn recv_until(
    receiver: &mut StreamReceiver,
    what: &str,
    accept: impl Fn(&Packet) -> bool,
) -> Result<Packet> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let packet = receiver.recv_packet()?;
        if accept(&packet) {
            return Ok(packet);
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
    }
}

#[test]
fn mock_pipeline_confirms_fire_and_honours_save_commands() -> Result<()> {
    let cfg = mock_config();
    let pipeline = Pipeline::start(&cfg)?;
    let addr = pipeline.stream_addr().expect("stream address");

    let mut receiver = StreamReceiver::connect(
        addr,
        cfg.stream.encoding,
        cfg.stream.max_packet_bytes(),
    )?;
    receiver.set_read_timeout(Some(Duration::from_secs(5)))?;

    let packet = recv_until(&mut receiver, "confirmed fire", |p| {
        p.fusion.as_ref().map(|f| f.status) == Some(FireStatus::FireConfirmed)
    })?;
    assert!(packet.images.contains_key(IMAGE_IR));
    assert!(packet.images.contains_key(IMAGE_RGB_DET));
    let preview = packet.decode_image(IMAGE_RGB_DET).expect("rgb_det decodes");
    assert_eq!(preview.dimensions(), Some((320, 180)));

    receiver.send_command(&ControlCommand::StartSaving)?;
    let saved = recv_until(&mut receiver, "full-resolution images", |p| {
        p.images.contains_key(IMAGE_IR16) && p.images.contains_key(IMAGE_RGB)
    })?;
    assert_eq!(saved.images[IMAGE_IR16].shape, Some(vec![120, 160]));
    assert!(pipeline.save_flag().is_saving());

    let health = pipeline.health();
    assert!(health.fusion_cycles > 0);
    assert!(health.ir_capture.frames > 0);
    assert_eq!(health.server_state, ServerState::Streaming);

    pipeline.shutdown()?;
    Ok(())
}

#[test]
fn invalid_geometry_refuses_to_start() {
    let mut cfg = mock_config();
    cfg.coord.scale_x = 0.0;
    assert!(Pipeline::start(&cfg).is_err());
}
