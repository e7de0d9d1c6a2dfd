//! vitte-vitbc — format binaire SBC (Simple ByteCode)
//!
//! Ce crate porte le modèle de données et le format de sérialisation du
//! bytecode Vitte : tables typées (`types`), table d'opcodes et disposition
//! de leurs opérandes (`opcode`), et le conteneur binaire lui-même avec son
//! encodeur/chargeur (`module`).
//!
//! Il ne contient ni analyseur textuel ni assembleur (`vitte-ir`), ni
//! vérificateur ou interpréteur (`vitte-vm`) : uniquement la forme des
//! données que ces deux crates produisent et consomment.
//!
//! Features :
//! - `std` (par défaut) : implémente `std::error::Error` sur `LoadError`
//! - `serde` : dérive (dé)sérialisation sur les types de tables
//! - `tracing` : réservé à une instrumentation future du chargeur

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(not(feature = "std"))]
use alloc::string::String;

/// Tables typées, `TypeKind`, lignes de table.
pub mod types;

/// Table des opcodes et disposition de leurs opérandes.
pub mod opcode;

/// Conteneur binaire SBC : en-tête, répertoire de sections, pool de
/// constantes, encodeur et chargeur.
pub mod module;

pub use module::{
    ConstKind, ConstPool, ConstRecord, DebugInfo, DebugLineRow, DebugSymRow, SbcModule, SectionId,
    HEADER_LEN, NO_ENTRY, SBC_MAGIC, SBC_VERSION, SECTION_ENTRY_LEN,
};
pub use opcode::{Opcode, OperandLayout};
pub use types::{
    ExportRow, FieldRow, FunctionRow, GlobalRow, ImportKind, ImportRow, MethodRow, SigRow, TypeKind,
    TypeRow, AMBIGUOUS_FIELD,
};

/// Erreurs de chargement d'un module SBC (catégorie `LoadError` de la
/// taxonomie d'erreurs par phase).
///
/// Couvre uniquement la validation structurelle (magic, version, bornes de
/// lecture, tags inconnus) ; la validité sémantique du bytecode (types de
/// pile, cibles de branchement…) est du ressort du vérificateur de
/// `vitte-vm`, qui produit ses propres `VerifyError`.
#[derive(Debug)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum LoadError {
    /// Magic invalide : le fichier ne commence pas par `"SBC0"`.
    #[cfg_attr(feature = "errors", error("bad magic: 0x{0:08X}"))]
    BadMagic(u32),
    /// Version binaire non prise en charge par ce chargeur.
    #[cfg_attr(feature = "errors", error("unsupported SBC version: 0x{0:04X}"))]
    UnsupportedVersion(u16),
    /// Identifiant de section inconnu dans le répertoire.
    #[cfg_attr(feature = "errors", error("unknown section id: {0}"))]
    UnknownSection(u32),
    /// Le flux est structurellement incohérent (longueur, alignement,
    /// enchaînement de sections) sans correspondre à une des catégories
    /// ci-dessus.
    #[cfg_attr(feature = "errors", error("malformed module: {0}"))]
    Malformed(String),
    /// Erreur de bas niveau remontée depuis `vitte-core` (EOF, UTF-8…).
    #[cfg_attr(feature = "errors", error(transparent))]
    Core(#[cfg_attr(feature = "errors", from)] vitte_core::CoreError),
}

#[cfg(not(feature = "errors"))]
impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LoadError::BadMagic(m) => write!(f, "bad magic: 0x{m:08X}"),
            LoadError::UnsupportedVersion(v) => write!(f, "unsupported SBC version: 0x{v:04X}"),
            LoadError::UnknownSection(id) => write!(f, "unknown section id: {id}"),
            LoadError::Malformed(msg) => write!(f, "malformed module: {msg}"),
            LoadError::Core(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(all(feature = "std", not(feature = "errors")))]
impl std::error::Error for LoadError {}

/// Prélude pratique : réexporte les types les plus couramment utilisés par
/// `vitte-ir` et `vitte-vm`.
pub mod prelude {
    pub use crate::{
        module::{ConstKind, ConstPool, ConstRecord, SbcModule, SectionId},
        opcode::{Opcode, OperandLayout},
        types::{
            ExportRow, FieldRow, FunctionRow, GlobalRow, ImportKind, ImportRow, MethodRow, SigRow,
            TypeKind, TypeRow, AMBIGUOUS_FIELD,
        },
        LoadError,
    };
}
