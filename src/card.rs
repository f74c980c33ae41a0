//! Ownership of the DRM card device node.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;
use std::sync::Arc;

use tracing::error;

use crate::error::{DisplayError, DisplayResult};

/// Shared handle to an open `/dev/dri/card<N>` node.
///
/// The descriptor is reference-counted so the mode-setting side and the GBM
/// allocator can both hold it; it closes exactly once, when the last clone
/// drops.
#[derive(Debug, Clone)]
pub struct Card(Arc<File>);

impl Card {
    /// Opens the card node read/write.
    pub fn open(path: &Path) -> DisplayResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| {
                error!("failed to open {}: {}", path.display(), source);
                DisplayError::DeviceOpen {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        Ok(Self(Arc::new(file)))
    }
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl drm::control::Device for Card {}
