//! Error types for display bring-up and presentation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type DisplayResult<T> = Result<T, DisplayError>;

/// Errors raised while bringing up or driving the display output.
///
/// Everything produced during [`crate::DrmDisplay::open`] is unrecoverable
/// for that instance; the remaining variants are per-frame conditions the
/// caller may retry or skip.
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("failed to open DRM device {path}: {source}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to enumerate DRM resources: {0}")]
    ResourceEnumeration(#[source] io::Error),

    #[error("no connected connector found")]
    NoConnector,

    #[error("no mode found on the selected connector")]
    NoMode,

    #[error("no CRTC found for the selected connector")]
    NoCrtc,

    #[error("failed to create GBM allocator device: {0}")]
    AllocatorDevice(#[source] io::Error),

    #[error("failed to create scan-out surface: {0}")]
    SurfaceCreate(String),

    #[error("failed to lock front buffer: {0}")]
    FrontBufferLock(String),

    #[error("failed to register framebuffer: {0}")]
    FramebufferRegister(#[source] io::Error),

    #[error("CRTC commit failed: {0}")]
    CrtcCommit(#[source] io::Error),

    #[error("page flip submission failed: {0}")]
    PageFlipSubmit(#[source] io::Error),

    /// The vsync wait aborted before a completion event was observed; the
    /// flip may still be pending at the hardware level.
    #[error("vsync wait aborted with flip completion unconfirmed: {0}")]
    FlipStatusUnknown(#[source] io::Error),
}
