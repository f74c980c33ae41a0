//! Display output lifecycle: initialization, scan-out surface management,
//! buffer tracking, and frame presentation.

use std::io;
use std::path::PathBuf;

use drm::control::{
    connector, crtc, encoder, framebuffer, Device as ControlDevice, Event, FbCmd2Flags, Mode,
    PageFlipFlags,
};
use gbm::{
    AsRaw, BufferObject, BufferObjectFlags, Device as GbmDevice, Format, Surface,
};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, error, info, warn};

use crate::buffers::{BufferKey, BufferTable, TrackedBuffer};
use crate::card::Card;
use crate::error::{DisplayError, DisplayResult};
use crate::topology::CardTopology;

/// A locked front buffer, tracked and ready for presentation.
///
/// Dropping the frame releases the underlying allocation back to the
/// surface's rotation. Callers must drop it once the frame is on screen (or
/// abandoned), or the allocator runs out of free buffers.
pub struct ScanoutFrame {
    bo: BufferObject<()>,
    info: TrackedBuffer,
}

impl ScanoutFrame {
    /// Kernel framebuffer id registered for this buffer.
    pub fn framebuffer(&self) -> framebuffer::Handle {
        self.info.framebuffer
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> u32 {
        self.info.stride
    }

    pub fn format(&self) -> Format {
        self.info.format
    }
}

/// One display output on one card: the resolved connector/mode/CRTC path,
/// the GBM allocator bound to the card, and the scan-out buffer table.
///
/// Single-threaded by design: the caller's thread performs all mode-setting,
/// buffer tracking, and presentation. The only blocking points are the
/// allocator's own front-buffer rotation and the vsync wait in
/// [`DrmDisplay::present`].
pub struct DrmDisplay {
    buffers: BufferTable,
    // Field order is teardown order: surface before allocator device, card
    // descriptor last (the GBM device holds its own clone of it).
    surface: Option<Surface<()>>,
    gbm: GbmDevice<Card>,
    connector: connector::Info,
    mode: Mode,
    crtc: crtc::Handle,
    card: Card,
}

impl DrmDisplay {
    /// Opens `/dev/dri/card<N>`, resolves the output topology, and stands up
    /// the buffer allocator.
    ///
    /// Any failure here is unrecoverable for this instance; everything
    /// acquired so far is released on the way out.
    pub fn open(card_index: u32) -> DisplayResult<Self> {
        let path = PathBuf::from(format!("/dev/dri/card{card_index}"));
        let card = Card::open(&path)?;

        let resources = card.resource_handles().map_err(|source| {
            error!(
                "failed to enumerate DRM resources on {}: {}",
                path.display(),
                source
            );
            DisplayError::ResourceEnumeration(source)
        })?;

        let mut connector_infos: Vec<connector::Info> = resources
            .connectors()
            .iter()
            .filter_map(|&handle| match card.get_connector(handle, false) {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!("skipping unreadable connector {:?}: {}", handle, err);
                    None
                }
            })
            .collect();
        let encoder_infos: Vec<encoder::Info> = resources
            .encoders()
            .iter()
            .filter_map(|&handle| match card.get_encoder(handle) {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!("skipping unreadable encoder {:?}: {}", handle, err);
                    None
                }
            })
            .collect();

        let topology = CardTopology::capture(&resources, &connector_infos, &encoder_infos);
        let selected = topology.select_output().map_err(|err| {
            error!("{} on {}", err, path.display());
            err
        })?;

        let connector = connector_infos.swap_remove(selected.connector_index);
        let mode = connector.modes()[selected.mode_index];
        let crtc = resources
            .crtcs()
            .iter()
            .copied()
            .find(|&handle| u32::from(handle) == selected.crtc)
            .ok_or_else(|| {
                error!(
                    "resolved CRTC {} is missing from the resource list",
                    selected.crtc
                );
                DisplayError::NoCrtc
            })?;

        let gbm = GbmDevice::new(card.clone()).map_err(|source| {
            error!(
                "failed to create GBM device on {}: {}",
                path.display(),
                source
            );
            DisplayError::AllocatorDevice(source)
        })?;

        info!(
            "{}: connector {:?}-{}, mode {}x{}@{}Hz, CRTC {:?}",
            path.display(),
            connector.interface(),
            connector.interface_id(),
            mode.size().0,
            mode.size().1,
            mode.vrefresh(),
            crtc
        );

        Ok(Self {
            buffers: BufferTable::new(),
            surface: None,
            gbm,
            connector,
            mode,
            crtc,
            card,
        })
    }

    /// Horizontal resolution of the resolved mode.
    pub fn width(&self) -> u32 {
        u32::from(self.mode.size().0)
    }

    /// Vertical resolution of the resolved mode.
    pub fn height(&self) -> u32 {
        u32::from(self.mode.size().1)
    }

    /// Vertical refresh rate of the resolved mode, in Hz.
    pub fn refresh_rate(&self) -> u32 {
        self.mode.vrefresh()
    }

    /// Creates the scan-out surface at the resolved resolution.
    ///
    /// The surface is created once for the display's lifetime; the returned
    /// borrow is what EGL gets wired to. The SCANOUT usage flag is always
    /// added to the caller's flags.
    ///
    /// # Panics
    ///
    /// If a surface has already been created.
    pub fn create_scanout_surface(
        &mut self,
        format: Format,
        usage: BufferObjectFlags,
    ) -> DisplayResult<&Surface<()>> {
        assert!(self.surface.is_none(), "scan-out surface created twice");

        let (width, height) = self.mode.size();
        let surface = self
            .gbm
            .create_surface::<()>(
                width.into(),
                height.into(),
                format,
                usage | BufferObjectFlags::SCANOUT,
            )
            .map_err(|err| {
                error!("failed to create scan-out surface: {}", err);
                DisplayError::SurfaceCreate(err.to_string())
            })?;

        Ok(self.surface.insert(surface))
    }

    /// Locks the surface's next completed front buffer and resolves its
    /// kernel framebuffer, registering it on first encounter.
    ///
    /// A buffer whose registration fails is not tabled, so the next lock of
    /// the same allocation retries the registration.
    ///
    /// # Panics
    ///
    /// If called before [`DrmDisplay::create_scanout_surface`], or if the
    /// surface rotates more distinct buffers than the chain depth allows.
    pub fn lock_front_buffer(&mut self) -> DisplayResult<ScanoutFrame> {
        let surface = self
            .surface
            .as_ref()
            .expect("front buffer locked before scan-out surface creation");

        // Only meaningful once rendering has completed a swap on the
        // surface; without one there is no front buffer to lock.
        let bo = unsafe { surface.lock_front_buffer() }.map_err(|err| {
            error!("failed to lock front buffer: {}", err);
            DisplayError::FrontBufferLock(err.to_string())
        })?;

        let key = BufferKey::new(bo.as_raw() as usize);
        let info = match self.buffers.find(key) {
            Some(existing) => *existing,
            None => {
                let tracked = self.register_buffer(key, &bo)?;
                self.buffers.insert(tracked);
                tracked
            }
        };

        Ok(ScanoutFrame { bo, info })
    }

    /// Registers a buffer object as a kernel framebuffer object.
    ///
    /// Single memory plane only; multi-planar formats are not supported.
    fn register_buffer(
        &self,
        key: BufferKey,
        bo: &BufferObject<()>,
    ) -> DisplayResult<TrackedBuffer> {
        let framebuffer = self
            .card
            .add_planar_framebuffer(bo, FbCmd2Flags::empty())
            .map_err(|source| {
                error!(
                    "failed to register framebuffer for buffer {:#x}: {}",
                    key.raw(),
                    source
                );
                DisplayError::FramebufferRegister(source)
            })?;

        debug!(
            "tracked scan-out buffer {:#x} as framebuffer {:?}",
            key.raw(),
            framebuffer
        );

        Ok(TrackedBuffer {
            key,
            width: bo.width().unwrap(),
            height: bo.height().unwrap(),
            stride: bo.stride().unwrap(),
            format: bo.format().unwrap(),
            framebuffer,
        })
    }

    /// Commits a frame to the scan-out engine.
    ///
    /// Without vsync this is one immediate CRTC commit; the frame shows as
    /// soon as the hardware latches it, possibly tearing. With vsync a page
    /// flip is queued for the next vertical blank and the calling thread
    /// blocks until the flip-completion event arrives.
    ///
    /// Failures are per-frame conditions: the frame is not shown and the
    /// caller decides whether to retry or skip.
    pub fn present(&self, frame: &ScanoutFrame, wait_for_vsync: bool) -> DisplayResult<()> {
        if !wait_for_vsync {
            return self
                .card
                .set_crtc(
                    self.crtc,
                    Some(frame.framebuffer()),
                    (0, 0),
                    &[self.connector.handle()],
                    Some(self.mode),
                )
                .map_err(|source| {
                    error!("CRTC commit failed: {}", source);
                    DisplayError::CrtcCommit(source)
                });
        }

        self.card
            .page_flip(self.crtc, frame.framebuffer(), PageFlipFlags::EVENT, None)
            .map_err(|source| {
                error!("page flip submission failed: {}", source);
                DisplayError::PageFlipSubmit(source)
            })?;

        self.wait_for_page_flip()
    }

    /// Blocks until the pending page flip on our CRTC completes.
    ///
    /// One event batch is dispatched per descriptor wake-up. An interrupted
    /// poll retries; any other wait failure aborts with the flip outcome
    /// unconfirmed.
    fn wait_for_page_flip(&self) -> DisplayResult<()> {
        loop {
            let mut fds = [PollFd::new(&self.card, PollFlags::POLLIN)];
            match poll(&mut fds, -1) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    error!("poll on DRM descriptor failed during vsync wait: {}", errno);
                    return Err(DisplayError::FlipStatusUnknown(io::Error::from(errno)));
                }
            }

            let events = self.card.receive_events().map_err(|source| {
                error!("failed to dispatch DRM events during vsync wait: {}", source);
                DisplayError::FlipStatusUnknown(source)
            })?;
            for event in events {
                if let Event::PageFlip(flip) = event {
                    if flip.crtc == self.crtc {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Drop for DrmDisplay {
    fn drop(&mut self) {
        // Framebuffer registrations are torn down first, newest to oldest;
        // the surface, allocator device, and card descriptor then follow by
        // field order.
        for buffer in self.buffers.unwind() {
            if let Err(err) = self.card.destroy_framebuffer(buffer.framebuffer) {
                warn!(
                    "failed to remove framebuffer {:?}: {}",
                    buffer.framebuffer, err
                );
            }
        }
    }
}
