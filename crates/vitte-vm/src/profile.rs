//! Compteurs de profilage (§4.8).
//!
//! Purement informatif : les seuils définis ici peuvent être consultés par
//! l'hôte entre deux instructions pour décider d'une recompilation, mais
//! aucun palier n'a le moindre effet sur la sémantique observable d'une
//! exécution — il n'existe pas de JIT dans ce crate.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Nombre d'appels à partir duquel une fonction franchit le palier "tier 0".
pub const KJIT_TIER0_THRESHOLD: u64 = 3;
/// Nombre d'appels à partir duquel une fonction franchit le palier "tier 1".
pub const KJIT_TIER1_THRESHOLD: u64 = 6;
/// Nombre d'exécutions d'un même opcode à partir duquel il est considéré
/// "chaud".
pub const KJIT_OPCODE_THRESHOLD: u64 = 10;

/// Palier de compilation franchi par une fonction, d'après son nombre
/// d'invocations. Ne déclenche aucune recompilation dans ce crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TierMark {
    /// Moins de [`KJIT_TIER0_THRESHOLD`] appels.
    Cold,
    /// Au moins [`KJIT_TIER0_THRESHOLD`] appels.
    Tier0,
    /// Au moins [`KJIT_TIER1_THRESHOLD`] appels.
    Tier1,
}

impl TierMark {
    fn from_call_count(calls: u64) -> Self {
        if calls >= KJIT_TIER1_THRESHOLD {
            TierMark::Tier1
        } else if calls >= KJIT_TIER0_THRESHOLD {
            TierMark::Tier0
        } else {
            TierMark::Cold
        }
    }
}

/// Compteurs par fonction : nombre d'appels et palier courant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FunctionCounters {
    /// Identifiant de fonction (espace unifié fonctions/imports).
    pub func_id: u32,
    /// Nombre de fois où la fonction a été appelée (`call`/`tailcall`/`call.indirect`).
    pub call_count: u64,
    /// Palier atteint d'après `call_count`.
    pub tier: TierMark,
}

/// Rapport de profilage accumulé au long d'une exécution, renvoyé dans
/// [`crate::interp::ExecResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProfileReport {
    /// Compteurs par fonction, une entrée par fonction effectivement appelée.
    pub functions: Vec<FunctionCounters>,
    /// Compteurs d'exécution par octet d'opcode, indexés par la valeur
    /// numérique de l'opcode.
    pub opcode_counts: Vec<u64>,
}

impl ProfileReport {
    /// Un rapport vide.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un appel vers `func_id`, créant son entrée si absente, et
    /// renvoie son nouveau palier.
    pub fn record_call(&mut self, func_id: u32) -> TierMark {
        if let Some(entry) = self.functions.iter_mut().find(|f| f.func_id == func_id) {
            entry.call_count += 1;
            entry.tier = TierMark::from_call_count(entry.call_count);
            entry.tier
        } else {
            let tier = TierMark::from_call_count(1);
            self.functions.push(FunctionCounters { func_id, call_count: 1, tier });
            tier
        }
    }

    /// Enregistre une exécution de l'opcode numéroté `opcode_byte`.
    pub fn record_opcode(&mut self, opcode_byte: u8) {
        let idx = opcode_byte as usize;
        if self.opcode_counts.len() <= idx {
            self.opcode_counts.resize(idx + 1, 0);
        }
        self.opcode_counts[idx] += 1;
    }

    /// Vrai si l'opcode `opcode_byte` a dépassé [`KJIT_OPCODE_THRESHOLD`].
    #[must_use]
    pub fn opcode_is_hot(&self, opcode_byte: u8) -> bool {
        self.opcode_counts.get(opcode_byte as usize).is_some_and(|&c| c >= KJIT_OPCODE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_counter_crosses_tiers() {
        let mut report = ProfileReport::new();
        let mut tier = TierMark::Cold;
        for _ in 0..6 {
            tier = report.record_call(7);
        }
        assert_eq!(tier, TierMark::Tier1);
        assert_eq!(report.functions[0].call_count, 6);
    }

    #[test]
    fn opcode_hotness_threshold() {
        let mut report = ProfileReport::new();
        for _ in 0..10 {
            report.record_opcode(0x20);
        }
        assert!(report.opcode_is_hot(0x20));
        assert!(!report.opcode_is_hot(0x21));
    }
}
