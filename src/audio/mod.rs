//! Audio capture: device resolution and the CPAL callback bridge.

pub mod capture;

pub use capture::{AudioCapture, list_input_devices};
