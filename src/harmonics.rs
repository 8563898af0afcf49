//! Beam-harmonic selections and their expansion into controller descriptors.
//!
//! A notch on harmonic `h` needs a resonator on both sides of the carrier,
//! so it expands to a `±h·fb` pair. A feedforward channel only acts on the
//! upper sideband.

use serde::{Deserialize, Serialize};

use crate::controller::{
    FeedforwardDescriptor, NotchDescriptor, NotchDiscretization, MAX_BEAM_HARMONICS,
};
use crate::error::{require_positive, BlcError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotchHarmonic {
    pub harmonic: usize,
    pub gain: f64,
    /// Half bandwidth (Hz)
    pub half_bandwidth: f64,
    #[serde(default)]
    pub discretization: NotchDiscretization,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedforwardHarmonic {
    pub harmonic: usize,
    pub amplitude: f64,
    #[serde(default)]
    pub phase_deg: f64,
}

fn check_harmonics(list: &'static str, harmonics: impl Iterator<Item = usize>) -> Result<()> {
    let mut seen = [false; MAX_BEAM_HARMONICS + 1];
    for h in harmonics {
        if h == 0 || h > MAX_BEAM_HARMONICS {
            return Err(BlcError::invalid(
                list,
                format!("harmonic {h} outside 1..={MAX_BEAM_HARMONICS}"),
            ));
        }
        if seen[h] {
            return Err(BlcError::invalid(list, format!("harmonic {h} selected twice")));
        }
        seen[h] = true;
    }
    Ok(())
}

/// Notch descriptors for every selection: all `+h·fb` offsets in selection
/// order, followed by the matching `-h·fb` offsets.
pub fn notch_descriptors(
    bunch_rate: f64,
    selection: &[NotchHarmonic],
) -> Result<Vec<NotchDescriptor>> {
    require_positive("bunch_rate", bunch_rate)?;
    check_harmonics("notch", selection.iter().map(|n| n.harmonic))?;
    let sideband = |sign: f64| {
        selection.iter().map(move |n| NotchDescriptor {
            freq_offset: sign * n.harmonic as f64 * bunch_rate,
            half_bandwidth: n.half_bandwidth,
            gain: n.gain,
            discretization: n.discretization,
        })
    };
    Ok(sideband(1.0).chain(sideband(-1.0)).collect())
}

pub fn feedforward_descriptors(
    bunch_rate: f64,
    selection: &[FeedforwardHarmonic],
) -> Result<Vec<FeedforwardDescriptor>> {
    require_positive("bunch_rate", bunch_rate)?;
    check_harmonics("feedforward", selection.iter().map(|f| f.harmonic))?;
    Ok(selection
        .iter()
        .map(|f| FeedforwardDescriptor {
            freq_offset: f.harmonic as f64 * bunch_rate,
            amplitude_cal: f.amplitude,
            phase_cal_deg: f.phase_deg,
        })
        .collect())
}
