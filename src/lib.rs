//! Firewatch: IR/RGB fire detection pipeline.
//!
//! Two cameras (long-wave IR and visible RGB) are captured independently,
//! fused into a per-cycle fire verdict, and streamed to a remote viewer over a
//! length-prefixed socket protocol.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the `FrameSlot` latest-value buffer
//! - `ingest`: capture sources (mock, image sequences, V4L2) and capture workers
//! - `detect`: hotspot / EO detector seam with default heuristics
//! - `fusion`: coordinate mapping and the fusion engine
//! - `control`: viewer control commands and the shared save flag
//! - `protocol`: framing, payload encodings, packets and image entries
//! - `stream`: stream server and viewer-side receiver
//! - `pipeline`: wiring and ordered shutdown
//! - `config`: file + environment configuration

pub mod config;
pub mod control;
pub mod detect;
pub mod frame;
pub mod fusion;
pub mod ingest;
pub mod pipeline;
pub mod protocol;
pub mod stream;

pub use config::AppConfig;
pub use control::{ControlCommand, SaveFlag};
pub use frame::{Frame, FrameSlot, Modality, PixelData};
pub use fusion::{
    CoordinateMapper, EoDetection, FireStatus, FusionEngine, FusionError, FusionResult, IrHotspot,
};
pub use ingest::{create_source, CaptureSource, CaptureWorker, SourceRole};
pub use pipeline::{FusionStage, Pipeline, PipelineHandle};
pub use protocol::{Packet, PayloadEncoding, ProtocolError};
pub use stream::{ServerState, StreamHandle, StreamReceiver, StreamServer};
