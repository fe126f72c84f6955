//! Image capture adapters.
//!
//! A camera is opened while the session is in `capturing` mode and released
//! as soon as it leaves it. [`CameraLease`] owns the adapter and guarantees
//! the release also happens when the orchestrator is dropped.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CameraConfig, FacingMode};
use crate::error::{LumiereError, Result};
use crate::websocket::{EventBroadcaster, SessionEvent};

/// MIME type of every captured still.
pub const JPEG_MIME: &str = "image/jpeg";

// ============================================================================
// Constraints and frames
// ============================================================================

/// Stream constraints requested from the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConstraints {
    /// Preferred camera.
    pub facing: FacingMode,
    /// Ideal width in pixels.
    pub ideal_width: u32,
    /// Ideal height in pixels.
    pub ideal_height: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self::from(&CameraConfig::default())
    }
}

impl From<&CameraConfig> for CameraConstraints {
    fn from(config: &CameraConfig) -> Self {
        Self {
            facing: config.facing,
            ideal_width: config.ideal_width,
            ideal_height: config.ideal_height,
        }
    }
}

/// Raw encoded bytes of one camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub mime_type: String,
}

impl Frame {
    /// Creates a JPEG frame.
    #[must_use]
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: JPEG_MIME.to_string(),
        }
    }
}

/// A still image held for the duration of one tutoring session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    /// Base64 payload sent to the AI provider.
    pub base64: String,
    /// `data:` URL used for display.
    pub data_url: String,
    /// MIME type of the encoded image.
    pub mime_type: String,
}

impl CapturedImage {
    /// Encodes a frame for upload and display.
    ///
    /// # Errors
    ///
    /// Returns `LumiereError::CameraUnavailable` if the frame is empty.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.bytes.is_empty() {
            return Err(LumiereError::camera_unavailable("captured frame is empty"));
        }
        let base64 = STANDARD.encode(&frame.bytes);
        Ok(Self {
            data_url: format!("data:{};base64,{base64}", frame.mime_type),
            base64,
            mime_type: frame.mime_type.clone(),
        })
    }

    /// Decodes an uploaded frame, given either as bare base64 or as a
    /// `data:image/...;base64,...` URL.
    ///
    /// The format is read from the bytes, not the declared type; anything
    /// other than JPEG is re-encoded at `quality`.
    ///
    /// # Errors
    ///
    /// Returns `LumiereError::ImageDecode` if the payload is not valid base64,
    /// declares a non-image type, or is not a recognisable image.
    pub fn decode_upload(payload: &str, quality: u8) -> Result<Frame> {
        let payload = payload.trim();
        let data = match payload.split_once(',') {
            Some((header, data)) if header.starts_with("data:") => {
                if !header.starts_with("data:image/") {
                    return Err(LumiereError::image_decode(format!(
                        "expected an image frame, got '{header}'"
                    )));
                }
                data
            }
            _ => payload,
        };
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| LumiereError::image_decode(format!("invalid base64 frame: {e}")))?;
        encode_jpeg(&bytes, quality)
    }
}

// ============================================================================
// ImageCapture trait
// ============================================================================

/// Acquires and releases a camera stream and grabs still frames from it.
#[async_trait]
pub trait ImageCapture: Send {
    /// Opens the stream.
    async fn open(&mut self, constraints: &CameraConstraints) -> Result<()>;

    /// Grabs a single still frame, encoded as JPEG.
    async fn grab_frame(&mut self) -> Result<Frame>;

    /// Releases the stream. Idempotent.
    fn release(&mut self);

    /// Returns `true` while the stream is held.
    fn is_open(&self) -> bool;
}

// ============================================================================
// CameraLease
// ============================================================================

/// Owns a camera adapter and releases it on drop.
#[derive(Debug)]
pub struct CameraLease<C: ImageCapture> {
    camera: C,
    constraints: CameraConstraints,
}

impl<C: ImageCapture> CameraLease<C> {
    /// Wraps `camera` without opening it.
    pub const fn new(camera: C, constraints: CameraConstraints) -> Self {
        Self {
            camera,
            constraints,
        }
    }

    /// Opens the camera unless it is already held.
    ///
    /// # Errors
    ///
    /// Propagates the adapter's `CameraUnavailable` error.
    pub async fn acquire(&mut self) -> Result<()> {
        if self.camera.is_open() {
            return Ok(());
        }
        self.camera.open(&self.constraints).await?;
        debug!(facing = self.constraints.facing.as_str(), "Camera acquired");
        Ok(())
    }

    /// Releases the camera if held.
    pub fn release(&mut self) {
        if self.camera.is_open() {
            self.camera.release();
            debug!("Camera released");
        }
    }

    /// Grabs a frame from the held camera.
    ///
    /// # Errors
    ///
    /// Returns `CameraUnavailable` if the camera is not held or the adapter fails.
    pub async fn grab_frame(&mut self) -> Result<Frame> {
        if !self.camera.is_open() {
            return Err(LumiereError::camera_unavailable("camera is not open"));
        }
        self.camera.grab_frame().await
    }

    /// Returns `true` while the camera is held.
    pub fn is_held(&self) -> bool {
        self.camera.is_open()
    }

    /// Returns the wrapped adapter.
    pub const fn camera(&self) -> &C {
        &self.camera
    }

    /// Returns the wrapped adapter mutably.
    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }
}

impl<C: ImageCapture> Drop for CameraLease<C> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// StillImageCamera
// ============================================================================

/// A camera backed by an image file on disk.
///
/// JPEG files pass through unchanged; other formats are decoded and
/// re-encoded as JPEG at the configured quality.
#[derive(Debug, Clone)]
pub struct StillImageCamera {
    path: PathBuf,
    jpeg_quality: u8,
    open: bool,
}

impl StillImageCamera {
    /// Creates a camera that serves frames from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            path: path.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
            open: false,
        }
    }

    /// Returns the image path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ImageCapture for StillImageCamera {
    async fn open(&mut self, _constraints: &CameraConstraints) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            LumiereError::camera_unavailable(format!("{}: {e}", self.path.display()))
        })?;
        if !metadata.is_file() {
            return Err(LumiereError::camera_unavailable(format!(
                "{} is not a file",
                self.path.display()
            )));
        }
        self.open = true;
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<Frame> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            LumiereError::camera_unavailable(format!("{}: {e}", self.path.display()))
        })?;
        let frame = encode_jpeg(&bytes, self.jpeg_quality)?;
        debug!(
            path = %self.path.display(),
            bytes = frame.bytes.len(),
            "Grabbed still frame"
        );
        Ok(frame)
    }

    fn release(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Passes JPEG bytes through and re-encodes anything else as JPEG.
///
/// # Errors
///
/// Returns `LumiereError::ImageDecode` if the bytes are not a decodable image.
pub fn encode_jpeg(bytes: &[u8], quality: u8) -> Result<Frame> {
    let format =
        image::guess_format(bytes).map_err(|e| LumiereError::image_decode(e.to_string()))?;
    if format == ImageFormat::Jpeg {
        return Ok(Frame::jpeg(bytes.to_vec()));
    }

    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| LumiereError::image_decode(e.to_string()))?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .map_err(|e| LumiereError::image_decode(e.to_string()))?;
    Ok(Frame::jpeg(out))
}

// ============================================================================
// RemoteCamera
// ============================================================================

/// A camera owned by a remote client.
///
/// Opening and releasing broadcast `camera_requested` / `camera_released`
/// events; the client uploads frames which are queued for [`grab_frame`].
///
/// [`grab_frame`]: ImageCapture::grab_frame
#[derive(Debug)]
pub struct RemoteCamera {
    broadcaster: EventBroadcaster,
    frames: VecDeque<Frame>,
    open: bool,
}

impl RemoteCamera {
    /// Creates a remote camera that announces itself on `broadcaster`.
    #[must_use]
    pub const fn new(broadcaster: EventBroadcaster) -> Self {
        Self {
            broadcaster,
            frames: VecDeque::new(),
            open: false,
        }
    }

    /// Queues an uploaded frame.
    pub fn deliver(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }
}

#[async_trait]
impl ImageCapture for RemoteCamera {
    async fn open(&mut self, constraints: &CameraConstraints) -> Result<()> {
        self.open = true;
        self.broadcaster.send(SessionEvent::CameraRequested {
            constraints: *constraints,
        });
        info!("Requested remote camera stream");
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<Frame> {
        self.frames
            .pop_front()
            .ok_or_else(|| LumiereError::camera_unavailable("no frame has been uploaded"))
    }

    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if !self.frames.is_empty() {
            warn!(dropped = self.frames.len(), "Discarding unconsumed frames");
            self.frames.clear();
        }
        self.broadcaster.send(SessionEvent::CameraReleased);
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
