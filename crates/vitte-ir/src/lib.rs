//! vitte-ir — IR Vitte : parseur textuel, constructeur de bytecode
//! (`IrBuilder`) et abaisseur vers le module SBC.
//!
//! Le pipeline de ce crate couvre les deux phases de compilation du format
//! SBC :
//!
//! ```text
//! texte IR ──► text::parse ──► SymbolicModule ──► lower::lower ──► SbcModule
//! ```
//!
//! `SymbolicModule` (module [`text`]) ne connaît que des noms : aucune
//! résolution n'a encore eu lieu. `lower::lower` (module [`lower`]) résout
//! chaque référence en identifiant numérique et assemble le corps de chaque
//! fonction via [`builder::IrBuilder`], pour produire directement un
//! `vitte_vitbc::SbcModule` prêt à être encodé par `SbcModule::to_bytes`.
//!
//! Features :
//! - `std` (par défaut) : implémentations `std::error::Error`
//! - `errors` (par défaut) : dérive les messages `thiserror` sur les erreurs
//! - `serde` : (dé)sérialisation des structures symboliques
//! - `graph` / `dot` : réservés à une future visualisation du flux de
//!   contrôle, non utilisés par le pipeline texte → SBC lui-même.

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

/// Analyseur syntaxique de l'IR textuel : produit un [`text::SymbolicModule`]
/// où toutes les références sont encore des noms.
pub mod text;

/// Constructeur de bytecode par fonction : labels, fixups de branchement,
/// une méthode d'émission par opcode.
pub mod builder;

/// Résolveur de symboles : abaisse un [`text::SymbolicModule`] vers un
/// `vitte_vitbc::SbcModule` entièrement résolu.
pub mod lower;

pub use builder::{IrBuilder, IrLabel, LabelError};
pub use lower::{lower, LowerError, LowerOptions};
pub use text::{parse, ParseError, SymbolicModule};

/// Prélude pratique : réexporte les types les plus couramment utilisés.
pub mod prelude {
    pub use crate::{
        builder::{IrBuilder, IrLabel, LabelError},
        lower::{lower, LowerError, LowerOptions},
        text::{parse, ParseError, SymbolicModule},
    };
}
