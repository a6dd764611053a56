//! Capture device management
//!
//! This module acquires microphone and camera streams, tracks the hardware
//! they hold and guarantees every stream is released exactly once.

pub mod controller;
pub mod devices;
pub mod registry;
pub mod stream;
pub mod synthetic;
pub mod traits;

pub use controller::MediaCaptureController;
pub use devices::{DeviceList, DevicePreferences};
pub use registry::HardwareRegistry;
pub use stream::CaptureStream;
pub use traits::{
    AudioConstraints, CaptureBackend, CaptureConstraints, CaptureMode, DeviceInfo, DeviceKind, MediaTrack,
    TrackKind, VideoConstraints,
};
