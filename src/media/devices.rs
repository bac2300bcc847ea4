use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{LocalTrack, MediaError, TrackKind, TrackSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDevice {
    pub device_id: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDeviceList {
    pub audio_inputs: Vec<MediaDevice>,
    pub video_inputs: Vec<MediaDevice>,
}

/// Platform capture backend (`getUserMedia` / `getDisplayMedia` equivalents).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate(&self) -> Result<MediaDeviceList, MediaError>;

    /// Opens one capture track. `device_id == None` picks the default device.
    async fn open_track(&self, kind: TrackKind, device_id: Option<&str>) -> Result<LocalTrack, MediaError>;

    async fn open_display(&self) -> Result<LocalTrack, MediaError>;

    /// Hardware release hook; called once per track.
    fn stop_track(&self, track: &LocalTrack);

    /// Byte frequency bins of an audio track, if the platform can sample it.
    fn audio_spectrum(&self, track: &LocalTrack) -> Option<Vec<u8>>;
}

/// Synthetic capture devices for headless participants.
pub struct VirtualDevices {
    devices: MediaDeviceList,
    denied: Mutex<HashSet<TrackSource>>,
    spectrum: Mutex<Vec<u8>>,
    opened: AtomicUsize,
    stopped: AtomicUsize,
}

impl VirtualDevices {
    /// One virtual microphone and one virtual camera
    pub fn new() -> Self {
        Self::with_devices(MediaDeviceList {
            audio_inputs: vec![MediaDevice {
                device_id: "virtual-mic-0".to_string(),
                label: "Virtual Microphone".to_string(),
            }],
            video_inputs: vec![MediaDevice {
                device_id: "virtual-cam-0".to_string(),
                label: "Virtual Camera".to_string(),
            }],
        })
    }

    pub fn with_devices(devices: MediaDeviceList) -> Self {
        Self {
            devices,
            denied: Mutex::new(HashSet::new()),
            spectrum: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        }
    }

    /// Simulates the user refusing permission for a capture source
    pub fn deny(&self, source: TrackSource) {
        if let Ok(mut denied) = self.denied.lock() {
            denied.insert(source);
        }
    }

    pub fn allow(&self, source: TrackSource) {
        if let Ok(mut denied) = self.denied.lock() {
            denied.remove(&source);
        }
    }

    pub fn set_spectrum(&self, bins: Vec<u8>) {
        if let Ok(mut spectrum) = self.spectrum.lock() {
            *spectrum = bins;
        }
    }

    pub fn opened_tracks(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn stopped_tracks(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn live_tracks(&self) -> usize {
        self.opened_tracks().saturating_sub(self.stopped_tracks())
    }

    fn is_denied(&self, source: TrackSource) -> bool {
        self.denied
            .lock()
            .map(|denied| denied.contains(&source))
            .unwrap_or(false)
    }

    fn open(&self, kind: TrackKind, source: TrackSource, device_id: &str) -> LocalTrack {
        self.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(kind = %kind, device_id = %device_id, "Virtual track opened");
        LocalTrack::new(kind, source, device_id)
    }
}

impl Default for VirtualDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for VirtualDevices {
    async fn enumerate(&self) -> Result<MediaDeviceList, MediaError> {
        Ok(self.devices.clone())
    }

    async fn open_track(&self, kind: TrackKind, device_id: Option<&str>) -> Result<LocalTrack, MediaError> {
        let (source, inputs) = match kind {
            TrackKind::Audio => (TrackSource::Microphone, &self.devices.audio_inputs),
            TrackKind::Video => (TrackSource::Camera, &self.devices.video_inputs),
        };

        if self.is_denied(source) {
            return Err(MediaError::PermissionDenied(kind.to_string()));
        }

        let device = match device_id {
            Some(id) => inputs.iter().find(|d| d.device_id == id),
            None => inputs.first(),
        }
        .ok_or_else(|| {
            MediaError::DeviceUnavailable(device_id.map(str::to_string).unwrap_or_else(|| kind.to_string()))
        })?;

        Ok(self.open(kind, source, &device.device_id))
    }

    async fn open_display(&self) -> Result<LocalTrack, MediaError> {
        if self.is_denied(TrackSource::Screen) {
            return Err(MediaError::PermissionDenied("screen".to_string()));
        }
        Ok(self.open(TrackKind::Video, TrackSource::Screen, "virtual-screen-0"))
    }

    fn stop_track(&self, track: &LocalTrack) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(track_id = %track.id(), "Virtual track stopped");
    }

    fn audio_spectrum(&self, track: &LocalTrack) -> Option<Vec<u8>> {
        if track.kind() != TrackKind::Audio || !track.is_live() {
            return None;
        }
        self.spectrum.lock().ok().map(|s| s.clone()).filter(|s| !s.is_empty())
    }
}
