//! KMS/DRM display output lifecycle.
//!
//! This crate discovers an attached display through the kernel mode-setting
//! subsystem, negotiates its resolution, allocates a chain of scan-out
//! buffers through GBM, and presents rendered frames with optional
//! vertical-sync pacing.
//!
//! Rendering itself is out of scope: [`DrmDisplay::create_scanout_surface`]
//! hands back a GBM surface for EGL wiring, and completed frames re-enter
//! through [`DrmDisplay::lock_front_buffer`] for presentation.
//!
//! One physical card and one active connector are assumed for the display's
//! lifetime; hot-plug and multi-display composition are not handled.

pub mod buffers;
pub mod card;
pub mod display;
pub mod error;
pub mod topology;

pub use buffers::{BufferKey, BufferTable, TrackedBuffer, MAX_TRACKED_BUFFERS};
pub use card::Card;
pub use display::{DrmDisplay, ScanoutFrame};
pub use error::{DisplayError, DisplayResult};

// Buffer formats and usage flags are the allocator's own types.
pub use gbm::{BufferObjectFlags, Format};
