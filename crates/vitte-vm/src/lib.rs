//! vitte-vm — vérificateur et interpréteur SBC.
//!
//! Ce crate ferme le pipeline ouvert par `vitte-ir` (texte → `SbcModule`) et
//! `vitte-vitbc` (forme binaire) : il prend un `SbcModule` déjà chargé,
//! vérifie statiquement chaque fonction par interprétation abstraite de la
//! pile ([`verify`]), puis exécute le bytecode vérifié sur une pile typée
//! avec frames d'appel et tas ([`interp`]).
//!
//! ```text
//! SbcModule ──► verify::verify_module ──► interp::Interpreter::run
//! ```
//!
//! Le décodage d'instruction ([`decode`]) est partagé entre les deux phases :
//! un seul point de vérité, pour que le vérificateur et l'interpréteur ne
//! puissent jamais diverger sur la forme d'une instruction.
//!
//! Features :
//! - `std` (par défaut) : implémentations `std::error::Error`
//! - `bytecode` (par défaut) : tables SBC (`vitte-vitbc`) — requis en
//!   pratique, conservé comme feature nommée pour les builds `alloc-only`
//!   qui voudraient s'en passer
//! - `errors` (par défaut) : dérive les messages `thiserror` sur les erreurs
//! - `tracing` (par défaut) : spans/events de chargement, vérification et
//!   exécution
//! - `serde` : (dé)sérialisation des rapports de profilage
//! - `small` / `arena` / `sync` / `parallel` / `jit` : réservés, voir
//!   `Cargo.toml` — la pile d'opérandes et les locaux de frame sont des
//!   `Vec<Value>` ordinaires, `small` ne change pas encore leur implémentation

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

/// Décodeur d'instructions partagé par le vérificateur et l'interpréteur.
pub mod decode;

/// Valeurs runtime (`Value`) et conversions entre familles de types.
pub mod value;

/// Tas à base de slab (objets, tableaux, listes, fermetures, chaînes) et
/// collecteur mark-and-sweep.
pub mod heap;

/// Vérificateur : interprétation abstraite de la pile par fonction.
pub mod verify;

/// Résolveur hôte pour les imports nommés et les intrinsèques/syscalls.
pub mod host;

/// Interpréteur : exécution du bytecode vérifié.
pub mod interp;

/// Compteurs et seuils de palier JIT, sans effet sur la sémantique.
pub mod profile;

pub use decode::{DecodeError, Instr};
pub use heap::{Heap, HeapObj, HeapRef};
pub use host::{HostError, ImportResolver};
pub use interp::{ExecOptions, ExecResult, ExecStatus, Frame, Interpreter, Trap};
pub use profile::{ProfileReport, TierMark, KJIT_OPCODE_THRESHOLD, KJIT_TIER0_THRESHOLD, KJIT_TIER1_THRESHOLD};
pub use value::Value;
pub use verify::{verify_module, AbstractType, VerifyError};

/// Prélude pratique : réexporte les types les plus couramment utilisés.
pub mod prelude {
    pub use crate::{
        decode::{DecodeError, Instr},
        heap::{Heap, HeapObj, HeapRef},
        host::{HostError, ImportResolver},
        interp::{ExecOptions, ExecResult, ExecStatus, Frame, Interpreter, Trap},
        profile::ProfileReport,
        value::Value,
        verify::{verify_module, VerifyError},
    };
}
