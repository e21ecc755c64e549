//! Mute / solo derivation
//!
//! Audibility is derived state: it is recomputed for every track whenever
//! any track's mute or solo flag changes. A soloed track is heard even if
//! it is also muted.

use serde::{Deserialize, Serialize};

/// Primary mute and solo flags of one track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteSolo {
    pub muted: bool,
    pub soloed: bool,
}

impl MuteSolo {
    pub fn new(muted: bool, soloed: bool) -> Self {
        Self { muted, soloed }
    }
}

/// Effective audibility of one track given whether any track is soloed
pub fn is_audible(state: MuteSolo, any_soloed: bool) -> bool {
    if any_soloed {
        state.soloed
    } else {
        !state.muted
    }
}

/// Effective audibility for a set of tracks, in input order
pub fn derive_audibility(states: &[MuteSolo]) -> Vec<bool> {
    let any_soloed = states.iter().any(|s| s.soloed);
    states.iter().map(|&s| is_audible(s, any_soloed)).collect()
}
