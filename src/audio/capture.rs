//! Recording sessions on top of a platform microphone
//!
//! A session owns the live device stream and the fragments it delivers.
//! Dropping the stream is what releases the device, so every path out of a
//! session (stop, cancel, teardown, error) goes through a drop.

use super::wav::encode_wav;
use crate::error::{ClientError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Encoded recording ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
    pub duration: Duration,
}

impl AudioPayload {
    /// Wrap WAV bytes the way the backend expects them
    pub fn wav(bytes: Vec<u8>, duration: Duration) -> Self {
        Self {
            bytes,
            mime_type: "audio/wav".to_string(),
            file_name: "recording.wav".to_string(),
            duration,
        }
    }
}

/// A live device stream
///
/// The device stays acquired for as long as the value is alive.
pub trait CaptureStream {
    /// Sample rate of the fragments delivered by this stream
    fn sample_rate(&self) -> u32;
}

/// Platform microphone access
pub trait Microphone {
    type Stream: CaptureStream;

    /// Acquire the device and start delivering mono `f32` fragments
    ///
    /// # Errors
    /// `PermissionDenied` when access is refused, `DeviceError` otherwise
    fn open(&mut self, fragments: Sender<Vec<f32>>) -> Result<Self::Stream>;
}

/// Whether a platform error message describes refused access
#[cfg(any(feature = "audio-io", test))]
pub(crate) fn is_permission_error(message: &str) -> bool {
    let message = message.to_lowercase();
    ["permission", "denied", "not authorized", "not permitted"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// Map a platform error text onto the capture error taxonomy
#[cfg(any(feature = "audio-io", test))]
pub(crate) fn device_failure(context: &str, message: impl std::fmt::Display) -> ClientError {
    let text = format!("{}: {}", context, message);
    if is_permission_error(&text) {
        ClientError::PermissionDenied(text)
    } else {
        ClientError::DeviceError(text)
    }
}

struct RecordingSession<S> {
    stream: S,
    fragments: Receiver<Vec<f32>>,
    samples: Vec<f32>,
    started_at: Instant,
}

impl<S: CaptureStream> RecordingSession<S> {
    /// Move whatever the device delivered so far into the buffer
    fn drain(&mut self) {
        while let Ok(fragment) = self.fragments.try_recv() {
            self.samples.extend_from_slice(&fragment);
        }
    }
}

/// Start/stop recording with at most one live session
pub struct AudioCapture<M: Microphone> {
    microphone: M,
    session: Option<RecordingSession<M::Stream>>,
}

impl<M: Microphone> AudioCapture<M> {
    pub fn new(microphone: M) -> Self {
        Self {
            microphone,
            session: None,
        }
    }

    /// Open a new recording session
    ///
    /// # Errors
    /// `InvalidState` if a session is already active; the microphone's
    /// error if the device cannot be acquired. State is unchanged on error.
    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            warn!("Already recording, rejecting start request");
            return Err(ClientError::InvalidState("Already recording".to_string()));
        }

        let (tx, rx) = unbounded();
        let stream = self.microphone.open(tx)?;

        info!("Recording started at {}Hz", stream.sample_rate());
        self.session = Some(RecordingSession {
            stream,
            fragments: rx,
            samples: Vec::new(),
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Finish the session and encode everything it captured
    ///
    /// Returns `None` when no session is active. The device is released
    /// before encoding, so an encoding failure cannot leak it.
    pub fn stop(&mut self) -> Result<Option<AudioPayload>> {
        let Some(mut session) = self.session.take() else {
            debug!("Stop requested with no active session");
            return Ok(None);
        };

        let sample_rate = session.stream.sample_rate();
        session.drain();
        let RecordingSession {
            stream,
            fragments,
            mut samples,
            started_at,
        } = session;
        drop(stream);

        // Fragments that raced the release
        while let Ok(fragment) = fragments.try_recv() {
            samples.extend_from_slice(&fragment);
        }

        info!(
            "Recording stopped after {:.1}s, {} samples",
            started_at.elapsed().as_secs_f32(),
            samples.len()
        );

        let duration = if sample_rate > 0 {
            Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64)
        } else {
            Duration::ZERO
        };
        let bytes = encode_wav(&samples, sample_rate, 1)?;
        Ok(Some(AudioPayload::wav(bytes, duration)))
    }

    /// Drop the session without producing a payload
    pub fn cancel(&mut self) {
        if self.session.take().is_some() {
            info!("Recording cancelled, device released");
        }
    }

    /// Pull pending fragments into the session and report the buffered size
    pub fn buffered_samples(&mut self) -> usize {
        match self.session.as_mut() {
            Some(session) => {
                session.drain();
                session.samples.len()
            }
            None => 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn microphone(&self) -> &M {
        &self.microphone
    }
}

impl<M: Microphone> Drop for AudioCapture<M> {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            info!("Recording session released on teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMicrophone;

    #[test]
    fn test_start_stop_produces_payload() {
        let mic = FakeMicrophone::new(16000);
        let mut capture = AudioCapture::new(mic.clone());

        capture.start().unwrap();
        assert!(capture.is_recording());
        mic.deliver(&[0.1; 800]);
        mic.deliver(&[0.2; 800]);

        let payload = capture.stop().unwrap().expect("payload");
        assert_eq!(payload.mime_type, "audio/wav");
        assert_eq!(payload.file_name, "recording.wav");
        assert_eq!(payload.duration, Duration::from_millis(100));
        assert_eq!(&payload.bytes[0..4], b"RIFF");
        assert!(!capture.is_recording());
        assert_eq!(mic.live_streams(), 0);
    }

    #[test]
    fn test_stop_without_session_is_noop() {
        let mut capture = AudioCapture::new(FakeMicrophone::new(16000));
        assert_eq!(capture.stop().unwrap(), None);
    }

    #[test]
    fn test_double_start_rejected() {
        let mic = FakeMicrophone::new(16000);
        let mut capture = AudioCapture::new(mic.clone());

        capture.start().unwrap();
        let err = capture.start().unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
        assert_eq!(mic.live_streams(), 1);
        assert_eq!(mic.opened(), 1);
    }

    #[test]
    fn test_denied_start_leaves_idle() {
        let mic = FakeMicrophone::new(16000);
        mic.deny_access();
        let mut capture = AudioCapture::new(mic.clone());

        let err = capture.start().unwrap_err();
        assert!(matches!(err, ClientError::PermissionDenied(_)));
        assert!(!capture.is_recording());
        assert_eq!(mic.live_streams(), 0);
    }

    #[test]
    fn test_sessions_do_not_share_buffers() {
        let mic = FakeMicrophone::new(1000);
        let mut capture = AudioCapture::new(mic.clone());

        capture.start().unwrap();
        mic.deliver(&[0.5; 1000]);
        let first = capture.stop().unwrap().unwrap();

        capture.start().unwrap();
        mic.deliver(&[0.5; 500]);
        let second = capture.stop().unwrap().unwrap();

        assert_eq!(first.duration, Duration::from_secs(1));
        assert_eq!(second.duration, Duration::from_millis(500));
    }

    #[test]
    fn test_buffered_samples_tracks_delivery() {
        let mic = FakeMicrophone::new(16000);
        let mut capture = AudioCapture::new(mic.clone());
        assert_eq!(capture.buffered_samples(), 0);

        capture.start().unwrap();
        mic.deliver(&[0.0; 256]);
        assert_eq!(capture.buffered_samples(), 256);
        mic.deliver(&[0.0; 256]);
        assert_eq!(capture.buffered_samples(), 512);
    }

    #[test]
    fn test_teardown_releases_device() {
        let mic = FakeMicrophone::new(16000);
        {
            let mut capture = AudioCapture::new(mic.clone());
            capture.start().unwrap();
            assert_eq!(mic.live_streams(), 1);
        }
        assert_eq!(mic.live_streams(), 0);
    }

    #[test]
    fn test_cancel_releases_device() {
        let mic = FakeMicrophone::new(16000);
        let mut capture = AudioCapture::new(mic.clone());
        capture.start().unwrap();
        capture.cancel();
        assert_eq!(mic.live_streams(), 0);
        assert_eq!(capture.stop().unwrap(), None);
    }

    #[test]
    fn test_any_start_stop_sequence_holds_one_session() {
        let mic = FakeMicrophone::new(16000);
        let mut capture = AudioCapture::new(mic.clone());
        let script = [true, true, false, false, true, false, true, true, true, false];

        for start in script {
            if start {
                let _ = capture.start();
            } else {
                let _ = capture.stop();
            }
            assert!(mic.live_streams() <= 1);
            assert_eq!(mic.live_streams(), usize::from(capture.is_recording()));
        }
        drop(capture);
        assert_eq!(mic.live_streams(), 0);
        assert_eq!(mic.opened(), mic.released());
    }

    #[test]
    fn test_permission_text_detection() {
        assert!(is_permission_error("Permission denied by user"));
        assert!(is_permission_error("The app is NOT AUTHORIZED to record"));
        assert!(!is_permission_error("device unplugged"));

        assert!(matches!(
            device_failure("build stream", "access denied"),
            ClientError::PermissionDenied(_)
        ));
        assert!(matches!(
            device_failure("build stream", "no such device"),
            ClientError::DeviceError(_)
        ));
    }
}
