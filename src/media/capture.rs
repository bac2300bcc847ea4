use std::sync::Arc;

use super::{LocalStream, LocalTrack, MediaDeviceList, MediaDevices, MediaError, TrackKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub audio_device_id: Option<String>,
    pub video_device_id: Option<String>,
}

impl MediaConstraints {
    pub fn new(audio: bool, video: bool) -> Self {
        Self {
            audio,
            video,
            ..Default::default()
        }
    }

    pub fn only(kind: TrackKind, device_id: Option<String>) -> Self {
        match kind {
            TrackKind::Audio => Self {
                audio: true,
                audio_device_id: device_id,
                ..Default::default()
            },
            TrackKind::Video => Self {
                video: true,
                video_device_id: device_id,
                ..Default::default()
            },
        }
    }
}

/// Acquires and releases local capture tracks.
#[derive(Clone)]
pub struct MediaCapture {
    devices: Arc<dyn MediaDevices>,
}

impl MediaCapture {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    /// All-or-nothing: a failure releases whatever was opened for this call.
    pub async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream, MediaError> {
        let mut stream = LocalStream::empty();

        if constraints.audio {
            let track = self
                .devices
                .open_track(TrackKind::Audio, constraints.audio_device_id.as_deref())
                .await?;
            stream.push(track);
        }

        if constraints.video {
            match self
                .devices
                .open_track(TrackKind::Video, constraints.video_device_id.as_deref())
                .await
            {
                Ok(track) => stream.push(track),
                Err(e) => {
                    self.release(&stream);
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            stream_id = %stream.id,
            tracks = stream.tracks().len(),
            "Local media acquired"
        );
        Ok(stream)
    }

    pub async fn acquire_display(&self) -> Result<LocalTrack, MediaError> {
        self.devices.open_display().await
    }

    /// Idempotent; already-stopped tracks are skipped.
    pub fn release(&self, stream: &LocalStream) {
        for track in stream.tracks() {
            self.release_track(track);
        }
    }

    pub fn release_track(&self, track: &LocalTrack) {
        if track.stop() {
            self.devices.stop_track(track);
        }
    }

    pub async fn list_devices(&self) -> Result<MediaDeviceList, MediaError> {
        self.devices.enumerate().await
    }

    /// Swaps the `kind` track of `stream` for one captured from `device_id`.
    /// The old track is stopped only once the new one is open.
    pub async fn replace_track(
        &self,
        stream: &mut LocalStream,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<LocalTrack, MediaError> {
        let replacement = self.devices.open_track(kind, Some(device_id)).await?;

        if let Some(old) = stream.take(kind) {
            replacement.set_enabled(old.is_enabled());
            self.release_track(&old);
        }
        stream.push(replacement.clone());

        tracing::info!(kind = %kind, device_id = %device_id, "Local track replaced");
        Ok(replacement)
    }

    pub fn audio_spectrum(&self, track: &LocalTrack) -> Option<Vec<u8>> {
        self.devices.audio_spectrum(track)
    }
}
