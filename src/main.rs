//! Display bring-up probe.
//!
//! Opens a DRM card, resolves its output topology, and creates a scan-out
//! surface, reporting what it found. Useful for checking a board's display
//! path without starting a renderer.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drm_display::{BufferObjectFlags, DrmDisplay, Format};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // On boards where card0 is a render-only node the scan-out node is
    // card1, so that is the default.
    let card_index = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .context("card index must be an unsigned integer")?,
        None => 1,
    };

    let mut disp = DrmDisplay::open(card_index)
        .with_context(|| format!("failed to bring up /dev/dri/card{card_index}"))?;
    info!(
        "display up: {}x{}@{}Hz",
        disp.width(),
        disp.height(),
        disp.refresh_rate()
    );

    disp
        .create_scanout_surface(Format::Xrgb8888, BufferObjectFlags::RENDERING)
        .context("scan-out surface probe failed")?;
    info!("scan-out surface created; ready for EGL wiring");

    Ok(())
}
