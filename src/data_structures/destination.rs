use serde::{Deserialize, Serialize};

/// Where an output pays to
///
/// The wallet understands a closed set of destination kinds. Selection and
/// build logic pattern-matches on these exhaustively so that adding a kind
/// forces every classification site to be revisited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Pay-to-public-key-hash
    Legacy([u8; 20]),
    /// Pay-to-script-hash
    ScriptHash([u8; 20]),
    /// Native witness program
    Segwit { version: u8, program: Vec<u8> },
    /// Stealth address; the chain-visible output pays to a derived one-time key
    Stealth {
        scan_pubkey: Vec<u8>,
        spend_pubkey: Vec<u8>,
    },
    /// Extended-key destination, resolved to a child key at send time
    ExtendedKey(Vec<u8>),
    /// 256-bit script-hash destination
    Hash256([u8; 32]),
}

impl Destination {
    /// Length of the locking script this destination produces
    pub fn script_len(&self) -> usize {
        match self {
            Destination::Legacy(_) => 25,
            Destination::ScriptHash(_) => 23,
            Destination::Segwit { program, .. } => 2 + program.len(),
            Destination::Stealth { .. } => 25,
            Destination::ExtendedKey(_) => 25,
            Destination::Hash256(_) => 35,
        }
    }

    /// Serialized size of an output paying this destination, in vbytes
    pub fn output_vsize(&self) -> usize {
        // 8-byte value + compact-size script length + script
        8 + 1 + self.script_len()
    }

    /// Estimated size contribution of spending an output at this
    /// destination, in vbytes
    pub fn input_vsize(&self) -> usize {
        match self {
            Destination::Legacy(_) => 148,
            Destination::ScriptHash(_) => 91,
            Destination::Segwit { .. } => 68,
            Destination::Stealth { .. } => 148,
            Destination::ExtendedKey(_) => 148,
            Destination::Hash256(_) => 107,
        }
    }

    pub fn is_watch_capable_only(&self) -> bool {
        matches!(self, Destination::ExtendedKey(_))
    }
}
