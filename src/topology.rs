//! Card topology snapshot and output selection.
//!
//! The kernel's connector/encoder/CRTC graph is captured once at
//! initialization as plain data, and the selection of an output path is a
//! pure function over that snapshot, so it stays deterministic and testable
//! against synthetic topologies.

use drm::control::{connector, encoder, ModeTypeFlags, ResourceHandles};

use crate::error::{DisplayError, DisplayResult};

/// Timing summary for one display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSummary {
    pub width: u16,
    pub height: u16,
    /// Vertical refresh rate in Hz.
    pub refresh: u32,
    /// Set when the hardware flags this mode as preferred.
    pub preferred: bool,
}

impl ModeSummary {
    fn pixel_area(&self) -> u32 {
        u32::from(self.width) * u32::from(self.height)
    }
}

/// One physical output path and the modes it advertises.
#[derive(Debug, Clone)]
pub struct ConnectorTopology {
    pub id: u32,
    pub connected: bool,
    /// Encoder currently driving this connector, if any.
    pub current_encoder: Option<u32>,
    /// Encoders this connector could be routed through.
    pub candidate_encoders: Vec<u32>,
    pub modes: Vec<ModeSummary>,
}

/// One encoder and the scan-out engines its capability mask admits.
#[derive(Debug, Clone)]
pub struct EncoderTopology {
    pub id: u32,
    /// CRTC currently bound to this encoder, if any.
    pub current_crtc: Option<u32>,
    /// CRTCs admitted by the encoder's capability mask, in resource order.
    pub compatible_crtcs: Vec<u32>,
}

/// Plain-data snapshot of a card's mode-setting topology.
#[derive(Debug, Clone, Default)]
pub struct CardTopology {
    pub connectors: Vec<ConnectorTopology>,
    pub encoders: Vec<EncoderTopology>,
}

/// Output path picked from a [`CardTopology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedOutput {
    /// Index of the chosen connector in the snapshot.
    pub connector_index: usize,
    /// Index of the chosen mode on that connector.
    pub mode_index: usize,
    /// Raw id of the resolved scan-out engine.
    pub crtc: u32,
}

impl CardTopology {
    /// Captures a snapshot from fetched resource info blocks.
    pub(crate) fn capture(
        resources: &ResourceHandles,
        connectors: &[connector::Info],
        encoders: &[encoder::Info],
    ) -> Self {
        let connectors = connectors
            .iter()
            .map(|info| ConnectorTopology {
                id: u32::from(info.handle()),
                connected: info.state() == connector::State::Connected,
                current_encoder: info.current_encoder().map(u32::from),
                candidate_encoders: info.encoders().iter().copied().map(u32::from).collect(),
                modes: info
                    .modes()
                    .iter()
                    .map(|mode| ModeSummary {
                        width: mode.size().0,
                        height: mode.size().1,
                        refresh: mode.vrefresh(),
                        preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
                    })
                    .collect(),
            })
            .collect();

        let encoders = encoders
            .iter()
            .map(|info| EncoderTopology {
                id: u32::from(info.handle()),
                current_crtc: info.crtc().map(u32::from),
                compatible_crtcs: resources
                    .filter_crtcs(info.possible_crtcs())
                    .into_iter()
                    .map(u32::from)
                    .collect(),
            })
            .collect();

        Self {
            connectors,
            encoders,
        }
    }

    /// Resolves the output path: the first connected connector, its best
    /// mode, and a working CRTC.
    pub fn select_output(&self) -> DisplayResult<SelectedOutput> {
        let connector_index = self
            .connectors
            .iter()
            .position(|connector| connector.connected)
            .ok_or(DisplayError::NoConnector)?;
        let connector = &self.connectors[connector_index];

        let mode_index = best_mode(&connector.modes).ok_or(DisplayError::NoMode)?;
        let crtc = self.crtc_for(connector).ok_or(DisplayError::NoCrtc)?;

        Ok(SelectedOutput {
            connector_index,
            mode_index,
            crtc,
        })
    }

    /// Two-pass CRTC resolution: the encoder already driving the connector
    /// wins if it reports a live CRTC; otherwise every candidate encoder's
    /// capability mask is searched in resource order.
    fn crtc_for(&self, connector: &ConnectorTopology) -> Option<u32> {
        if let Some(bound) = connector.current_encoder.and_then(|id| self.encoder(id)) {
            if let Some(crtc) = bound.current_crtc {
                return Some(crtc);
            }
            // Bound encoder with no live CRTC: fall through to the search.
        }

        connector
            .candidate_encoders
            .iter()
            .filter_map(|&id| self.encoder(id))
            .find_map(|encoder| encoder.compatible_crtcs.first().copied())
    }

    fn encoder(&self, id: u32) -> Option<&EncoderTopology> {
        self.encoders.iter().find(|encoder| encoder.id == id)
    }
}

/// Picks the hardware-preferred mode, short-circuiting the scan; absent one,
/// the largest mode by pixel area, with the first mode winning ties.
fn best_mode(modes: &[ModeSummary]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, mode) in modes.iter().enumerate() {
        if mode.preferred {
            return Some(index);
        }
        match best {
            Some(current) if modes[current].pixel_area() >= mode.pixel_area() => {}
            _ => best = Some(index),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(width: u16, height: u16, preferred: bool) -> ModeSummary {
        ModeSummary {
            width,
            height,
            refresh: 60,
            preferred,
        }
    }

    fn connector(id: u32, connected: bool, modes: Vec<ModeSummary>) -> ConnectorTopology {
        ConnectorTopology {
            id,
            connected,
            current_encoder: None,
            candidate_encoders: Vec::new(),
            modes,
        }
    }

    fn encoder(id: u32, current_crtc: Option<u32>, compatible_crtcs: Vec<u32>) -> EncoderTopology {
        EncoderTopology {
            id,
            current_crtc,
            compatible_crtcs,
        }
    }

    /// Minimal topology with one routable connected connector.
    fn routable(mut connector: ConnectorTopology) -> CardTopology {
        connector.current_encoder = Some(10);
        CardTopology {
            connectors: vec![connector],
            encoders: vec![encoder(10, Some(100), vec![100])],
        }
    }

    #[test]
    fn first_connected_connector_wins() {
        let mut topology = routable(connector(2, true, vec![mode(640, 480, false)]));
        topology
            .connectors
            .insert(0, connector(1, false, vec![mode(800, 600, false)]));
        topology
            .connectors
            .push(connector(3, true, vec![mode(1920, 1080, false)]));

        let selected = topology.select_output().expect("selection should succeed");
        assert_eq!(
            topology.connectors[selected.connector_index].id, 2,
            "scan must stop at the first connected connector"
        );
    }

    #[test]
    fn no_connector_without_a_connected_entry() {
        let disconnected = CardTopology {
            connectors: vec![
                connector(1, false, vec![mode(800, 600, false)]),
                connector(2, false, vec![mode(800, 600, false)]),
            ],
            encoders: Vec::new(),
        };
        assert!(matches!(
            disconnected.select_output(),
            Err(DisplayError::NoConnector)
        ));

        let empty = CardTopology::default();
        assert!(matches!(
            empty.select_output(),
            Err(DisplayError::NoConnector)
        ));
    }

    #[test]
    fn preferred_mode_short_circuits() {
        let topology = routable(connector(
            1,
            true,
            vec![
                mode(800, 600, false),
                mode(1920, 1080, true),
                mode(640, 480, false),
            ],
        ));
        let selected = topology.select_output().expect("selection should succeed");
        let chosen = topology.connectors[0].modes[selected.mode_index];
        assert_eq!((chosen.width, chosen.height), (1920, 1080));
    }

    #[test]
    fn largest_area_wins_without_preferred() {
        let topology = routable(connector(
            1,
            true,
            vec![
                mode(1024, 768, false),
                mode(1920, 1080, false),
                mode(800, 600, false),
            ],
        ));
        let selected = topology.select_output().expect("selection should succeed");
        assert_eq!(selected.mode_index, 1);
    }

    #[test]
    fn area_ties_resolve_to_the_earliest_mode() {
        let topology = routable(connector(
            1,
            true,
            vec![mode(1024, 768, false), mode(768, 1024, false)],
        ));
        let selected = topology.select_output().expect("selection should succeed");
        assert_eq!(selected.mode_index, 0, "equal areas must keep the first mode");
    }

    #[test]
    fn empty_mode_list_is_no_mode() {
        let topology = routable(connector(1, true, Vec::new()));
        assert!(matches!(
            topology.select_output(),
            Err(DisplayError::NoMode)
        ));
    }

    #[test]
    fn bound_encoder_crtc_is_used_directly() {
        let mut connector = connector(1, true, vec![mode(800, 600, false)]);
        connector.current_encoder = Some(10);
        connector.candidate_encoders = vec![11];
        let topology = CardTopology {
            connectors: vec![connector],
            encoders: vec![
                encoder(10, Some(100), vec![200]),
                encoder(11, None, vec![201]),
            ],
        };
        let selected = topology.select_output().expect("selection should succeed");
        assert_eq!(selected.crtc, 100, "direct binding must win over the search");
    }

    #[test]
    fn bound_encoder_without_crtc_falls_back_to_search() {
        let mut connector = connector(1, true, vec![mode(800, 600, false)]);
        connector.current_encoder = Some(10);
        connector.candidate_encoders = vec![10, 11];
        let topology = CardTopology {
            connectors: vec![connector],
            encoders: vec![
                encoder(10, None, Vec::new()),
                encoder(11, None, vec![201, 202]),
            ],
        };
        let selected = topology.select_output().expect("selection should succeed");
        assert_eq!(selected.crtc, 201);
    }

    #[test]
    fn search_takes_first_compatible_crtc_across_candidates() {
        let mut connector = connector(1, true, vec![mode(800, 600, false)]);
        connector.candidate_encoders = vec![10, 11];
        let topology = CardTopology {
            connectors: vec![connector],
            encoders: vec![
                encoder(10, None, Vec::new()),
                encoder(11, None, vec![202, 201]),
            ],
        };
        let selected = topology.select_output().expect("selection should succeed");
        assert_eq!(
            selected.crtc, 202,
            "first admitted CRTC in resource order must win"
        );
    }

    #[test]
    fn unroutable_connector_is_no_crtc() {
        let mut connector = connector(1, true, vec![mode(800, 600, false)]);
        connector.candidate_encoders = vec![10];
        let topology = CardTopology {
            connectors: vec![connector],
            encoders: vec![encoder(10, None, Vec::new())],
        };
        assert!(matches!(
            topology.select_output(),
            Err(DisplayError::NoCrtc)
        ));
    }

    #[test]
    fn selection_is_deterministic() {
        let topology = routable(connector(
            7,
            true,
            vec![mode(1280, 720, false), mode(1920, 1080, true)],
        ));
        let first = topology.select_output().expect("selection should succeed");
        let second = topology.select_output().expect("selection should succeed");
        assert_eq!(first, second);
    }
}
