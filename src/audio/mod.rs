//! Audio capture
//!
//! [`AudioCapture`] turns a platform [`Microphone`] into start/stop
//! recording sessions producing one WAV payload each.

pub mod capture;
#[cfg(feature = "audio-io")]
pub mod input;
pub mod wav;

pub use capture::{AudioCapture, AudioPayload, CaptureStream, Microphone};
#[cfg(feature = "audio-io")]
pub use input::{list_input_devices, AudioDeviceInfo, CpalMicrophone};
pub use wav::encode_wav;

use crate::error::{ClientError, Result};
use crossbeam_channel::Sender;

/// Stand-in used when the crate is built without audio input
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMicrophone;

/// Never constructed; [`NoMicrophone`] cannot open a stream
pub enum NoStream {}

impl CaptureStream for NoStream {
    fn sample_rate(&self) -> u32 {
        match *self {}
    }
}

impl Microphone for NoMicrophone {
    type Stream = NoStream;

    fn open(&mut self, _fragments: Sender<Vec<f32>>) -> Result<NoStream> {
        Err(ClientError::DeviceError(
            "Audio input is not available in this build".to_string(),
        ))
    }
}
