//! Tables typées du format SBC : `TypeKind`, lignes de table (`*Row`) et
//! enregistrements du pool de constantes.
//!
//! Les layouts d'octets sont ceux du format binaire SBC : chaque `Row` a une
//! taille fixe et se lit/écrit sans rembourrage implicite (tous les champs
//! sont naturellement alignés sur 4 octets à l'intérieur de la ligne).

use vitte_core::{ByteReader, ByteWriter, CoreResult};

#[cfg(not(feature = "std"))]
use alloc::format;

/// Famille de types portée par une ligne `TypeRow` ou une signature.
///
/// Un seul jeu de types existe dans ce crate (pas de distinction entre un
/// jeu "complet" et un jeu "restreint") : toutes les largeurs entières,
/// `bool`, `char`, `string` et `ref` sont des citoyens de première classe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TypeKind {
    /// Type non spécifié / absent.
    Unspecified = 0,
    /// `i32`.
    I32 = 1,
    /// `i64`.
    I64 = 2,
    /// `f32`.
    F32 = 3,
    /// `f64`.
    F64 = 4,
    /// Référence opaque vers un objet du tas.
    Ref = 5,
    /// `i8`.
    I8 = 6,
    /// `i16`.
    I16 = 7,
    /// `u8`.
    U8 = 8,
    /// `u16`.
    U16 = 9,
    /// `u32`.
    U32 = 10,
    /// `u64`.
    U64 = 11,
    /// `i128`.
    I128 = 12,
    /// `u128`.
    U128 = 13,
    /// `bool`.
    Bool = 14,
    /// `char` (scalaire Unicode 32 bits).
    Char = 15,
    /// Chaîne immuable interne au tas.
    String = 16,
}

impl TypeKind {
    /// Décode depuis l'octet brut d'une ligne `TypeRow`.
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Unspecified,
            1 => Self::I32,
            2 => Self::I64,
            3 => Self::F32,
            4 => Self::F64,
            5 => Self::Ref,
            6 => Self::I8,
            7 => Self::I16,
            8 => Self::U8,
            9 => Self::U16,
            10 => Self::U32,
            11 => Self::U64,
            12 => Self::I128,
            13 => Self::U128,
            14 => Self::Bool,
            15 => Self::Char,
            16 => Self::String,
            _ => return None,
        })
    }

    /// Encode en octet brut pour une ligne `TypeRow`.
    pub const fn to_u8(self) -> u8 { self as u8 }

    /// Vrai pour les types entiers "étroits" qui se comportent comme un
    /// `i32`/`u32` sur la pile abstraite du vérificateur et dans
    /// l'interpréteur (promotion petite-entier → 32 bits).
    pub const fn is_small_int(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::U8 | Self::U16 | Self::Char | Self::Bool)
    }

    /// Vrai pour un type scalaire flottant.
    pub const fn is_float(self) -> bool { matches!(self, Self::F32 | Self::F64) }

    /// Vrai pour un type entier signé (hors petits entiers).
    pub const fn is_signed_int(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::I128)
    }

    /// Vrai pour un type entier non signé (hors petits entiers).
    pub const fn is_unsigned_int(self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64 | Self::U128)
    }
}

/// Ligne de la table `Types` (section id 1) — 20 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRow {
    /// Offset du nom dans le pool de constantes (chaîne terminée par NUL).
    pub name_str: u32,
    /// Catégorie scalaire/porteuse de la ligne.
    pub kind: TypeKind,
    /// Fanions réservés pour un usage futur (toujours 0 actuellement).
    pub flags: u8,
    /// Rembourrage explicite pour garder la ligne alignée sur 4 octets.
    pub reserved: u16,
    /// Taille en octets d'une instance de ce type (0 si non applicable).
    pub size: u32,
    /// Index du premier champ dans la table `Fields`.
    pub field_start: u32,
    /// Nombre de champs contigus appartenant à ce type.
    pub field_count: u32,
}

impl TypeRow {
    /// Taille fixe d'une ligne encodée, en octets.
    pub const ENCODED_LEN: usize = 20;

    /// La ligne par défaut insérée quand la table `Types` serait vide :
    /// un `i32` anonyme de taille 4, sans champs.
    pub fn default_i32() -> Self {
        Self { name_str: 0, kind: TypeKind::I32, flags: 0, reserved: 0, size: 4, field_start: 0, field_count: 0 }
    }

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.name_str);
        w.write_u8(self.kind.to_u8());
        w.write_u8(self.flags);
        w.write_u16_le(self.reserved);
        w.write_u32_le(self.size);
        w.write_u32_le(self.field_start);
        w.write_u32_le(self.field_count);
    }

    pub(crate) fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let name_str = r.read_u32_le()?;
        let kind_raw = r.read_u8()?;
        let flags = r.read_u8()?;
        let reserved = r.read_u16_le()?;
        let size = r.read_u32_le()?;
        let field_start = r.read_u32_le()?;
        let field_count = r.read_u32_le()?;
        let kind = TypeKind::from_u8(kind_raw)
            .ok_or_else(|| vitte_core::CoreError::corrupted(format!("unknown type kind byte {kind_raw}")))?;
        Ok(Self { name_str, kind, flags, reserved, size, field_start, field_count })
    }
}

/// Ligne de la table `Fields` (section id 2) — 16 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRow {
    /// Offset du nom dans le pool de constantes.
    pub name_str: u32,
    /// Identifiant du type du champ (index dans `Types`).
    pub type_id: u32,
    /// Offset du champ à l'intérieur de l'objet.
    pub offset: u32,
    /// Fanions (réservé).
    pub flags: u32,
}

impl FieldRow {
    /// Taille fixe d'une ligne encodée, en octets.
    pub const ENCODED_LEN: usize = 16;

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.name_str);
        w.write_u32_le(self.type_id);
        w.write_u32_le(self.offset);
        w.write_u32_le(self.flags);
    }

    pub(crate) fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            name_str: r.read_u32_le()?,
            type_id: r.read_u32_le()?,
            offset: r.read_u32_le()?,
            flags: r.read_u32_le()?,
        })
    }
}

/// Sentinelle utilisée par le résolveur de champs pendant l'abaissement :
/// un nom de champ non qualifié qui existe dans plusieurs types est marqué
/// ambigu plutôt que résolu arbitrairement vers le premier trouvé.
pub const AMBIGUOUS_FIELD: u32 = 0xFFFF_FFFF;

/// Ligne de la table `Sigs` (section id 4) — 16 octets.
///
/// `param_type_start` pointe vers une plage contiguë d'identifiants de
/// types (u32 LE) stockée dans le pool de constantes, de longueur
/// `param_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigRow {
    /// Identifiant du type de retour, ou [`AMBIGUOUS_FIELD`] (`0xFFFFFFFF`)
    /// réutilisé comme sentinelle "void" (pas de valeur de retour).
    pub ret_type_id: u32,
    /// Nombre de paramètres.
    pub param_count: u16,
    /// Convention d'appel (réservé, toujours 0 actuellement).
    pub call_conv: u16,
    /// Offset (dans le pool de constantes) du premier identifiant de type
    /// de paramètre.
    pub param_type_start: u32,
}

impl SigRow {
    /// Taille fixe d'une ligne encodée, en octets.
    pub const ENCODED_LEN: usize = 16;

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.ret_type_id);
        w.write_u16_le(self.param_count);
        w.write_u16_le(self.call_conv);
        w.write_u32_le(self.param_type_start);
        w.write_u32_le(0); // rembourrage explicite à 16 octets
    }

    pub(crate) fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let ret_type_id = r.read_u32_le()?;
        let param_count = r.read_u16_le()?;
        let call_conv = r.read_u16_le()?;
        let param_type_start = r.read_u32_le()?;
        let _reserved = r.read_u32_le()?;
        Ok(Self { ret_type_id, param_count, call_conv, param_type_start })
    }
}

/// Ligne de la table `Methods` (section id 3) — 16 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRow {
    /// Offset du nom dans le pool de constantes.
    pub name_str: u32,
    /// Identifiant de signature (index dans `Sigs`).
    pub sig_id: u32,
    /// Offset du code de la méthode dans la section `Code`.
    pub code_offset: u32,
    /// Nombre de slots locaux.
    pub local_count: u16,
    /// Fanions (réservé).
    pub flags: u16,
}

impl MethodRow {
    /// Taille fixe d'une ligne encodée, en octets.
    pub const ENCODED_LEN: usize = 16;

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.name_str);
        w.write_u32_le(self.sig_id);
        w.write_u32_le(self.code_offset);
        w.write_u16_le(self.local_count);
        w.write_u16_le(self.flags);
    }

    pub(crate) fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            name_str: r.read_u32_le()?,
            sig_id: r.read_u32_le()?,
            code_offset: r.read_u32_le()?,
            local_count: r.read_u16_le()?,
            flags: r.read_u16_le()?,
        })
    }
}

/// Ligne de la table `Functions` (section id 7) — 16 octets.
///
/// Distincte de `MethodRow` : une fonction porte l'information dont
/// l'interpréteur a besoin à l'exécution (taille de la pile), une méthode
/// porte l'information de présentation/signature partagée avec la
/// réflexion de plus haut niveau.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRow {
    /// Identifiant de la ligne `Methods` décrivant cette fonction.
    pub method_id: u32,
    /// Offset du code dans la section `Code`.
    pub code_offset: u32,
    /// Taille du code en octets.
    pub code_size: u32,
    /// Profondeur de pile maximale requise par le vérificateur.
    pub stack_max: u32,
}

impl FunctionRow {
    /// Taille fixe d'une ligne encodée, en octets.
    pub const ENCODED_LEN: usize = 16;

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.method_id);
        w.write_u32_le(self.code_offset);
        w.write_u32_le(self.code_size);
        w.write_u32_le(self.stack_max);
    }

    pub(crate) fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            method_id: r.read_u32_le()?,
            code_offset: r.read_u32_le()?,
            code_size: r.read_u32_le()?,
            stack_max: r.read_u32_le()?,
        })
    }
}

/// Ligne de la table `Globals` (section id 6) — 16 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRow {
    /// Offset du nom dans le pool de constantes.
    pub name_str: u32,
    /// Identifiant du type du global.
    pub type_id: u32,
    /// Fanions (bit 0 = mutable).
    pub flags: u32,
    /// Identifiant d'enregistrement du pool de constantes utilisé comme
    /// valeur initiale, ou `u32::MAX` si le global démarre à zéro/null.
    pub init_const_id: u32,
}

impl GlobalRow {
    /// Taille fixe d'une ligne encodée, en octets.
    pub const ENCODED_LEN: usize = 16;
    /// Valeur de `init_const_id` signifiant "pas de valeur initiale explicite".
    pub const NO_INIT: u32 = u32::MAX;

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.name_str);
        w.write_u32_le(self.type_id);
        w.write_u32_le(self.flags);
        w.write_u32_le(self.init_const_id);
    }

    pub(crate) fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            name_str: r.read_u32_le()?,
            type_id: r.read_u32_le()?,
            flags: r.read_u32_le()?,
            init_const_id: r.read_u32_le()?,
        })
    }
}

/// Catégorie d'une ligne de la table `Imports`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImportKind {
    /// Appel système numéroté, résolu par l'hôte via son identifiant.
    Syscall = 0,
    /// Intrinsèque fourni par l'interpréteur lui-même.
    Intrinsic = 1,
    /// Import nommé (module, symbole) résolu par le résolveur hôte.
    Import = 2,
}

impl ImportKind {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Syscall,
            1 => Self::Intrinsic,
            2 => Self::Import,
            _ => return None,
        })
    }
}

/// Ligne de la table `Imports` (section id 10) — 16 octets.
///
/// Les fonctions importées partagent le même espace d'identifiants que les
/// fonctions utilisateur : `func_id = user_functions.len() + import_index`,
/// `import_index` comptant *toutes* les déclarations de la section
/// `imports:` (syscalls et intrinsèques compris), pas seulement les lignes
/// `Import` — `reserved` porte donc cet index pour une ligne `Import`
/// puisqu'il peut y avoir des trous. Les syscalls n'ont pas de ligne ici
/// du tout (§4.2 point 6) ; voir `SbcModule::syscalls`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportRow {
    /// Offset du nom du module hôte dans le pool de constantes (chaîne
    /// vide permise pour les intrinsèques).
    pub module_str: u32,
    /// Offset du nom du symbole dans le pool de constantes.
    pub symbol_str: u32,
    /// Catégorie d'import.
    pub kind: ImportKind,
    /// Fanions (réservé).
    pub flags: u8,
    /// Pour une ligne `Import` : index relatif (`func_id -
    /// user_functions.len()`) parmi toutes les déclarations de la section
    /// `imports:`, trous compris. Inutilisé (toujours 0) pour une ligne
    /// `Intrinsic`.
    pub reserved: u16,
    /// Index dans `Sigs` pour une ligne `Import`. Pour une ligne
    /// `Intrinsic`, réutilisé pour porter l'identifiant numérique brut
    /// déclaré par `intrinsic NAME ID` (aucune signature ne lui correspond).
    pub sig_id: u32,
}

impl ImportRow {
    /// Taille fixe d'une ligne encodée, en octets.
    pub const ENCODED_LEN: usize = 16;

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.module_str);
        w.write_u32_le(self.symbol_str);
        w.write_u8(self.kind as u8);
        w.write_u8(self.flags);
        w.write_u16_le(self.reserved);
        w.write_u32_le(self.sig_id);
    }

    pub(crate) fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let module_str = r.read_u32_le()?;
        let symbol_str = r.read_u32_le()?;
        let kind_raw = r.read_u8()?;
        let flags = r.read_u8()?;
        let reserved = r.read_u16_le()?;
        let sig_id = r.read_u32_le()?;
        let kind = ImportKind::from_u8(kind_raw)
            .ok_or_else(|| vitte_core::CoreError::corrupted(format!("unknown import kind byte {kind_raw}")))?;
        Ok(Self { module_str, symbol_str, kind, flags, reserved, sig_id })
    }
}

/// Ligne de la table `Exports` (section id 11) — 16 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRow {
    /// Offset du nom public dans le pool de constantes.
    pub name_str: u32,
    /// Identifiant de fonction exportée.
    pub func_id: u32,
    /// Fanions (réservé).
    pub flags: u32,
    /// Rembourrage explicite.
    pub reserved: u32,
}

impl ExportRow {
    /// Taille fixe d'une ligne encodée, en octets.
    pub const ENCODED_LEN: usize = 16;

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.name_str);
        w.write_u32_le(self.func_id);
        w.write_u32_le(self.flags);
        w.write_u32_le(self.reserved);
    }

    pub(crate) fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            name_str: r.read_u32_le()?,
            func_id: r.read_u32_le()?,
            flags: r.read_u32_le()?,
            reserved: r.read_u32_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_row_roundtrip() {
        let row = TypeRow { name_str: 7, kind: TypeKind::F64, flags: 0, reserved: 0, size: 8, field_start: 2, field_count: 3 };
        let mut w = ByteWriter::new();
        row.write(&mut w);
        assert_eq!(w.len(), TypeRow::ENCODED_LEN);
        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(TypeRow::read(&mut r).unwrap(), row);
    }

    #[test]
    fn default_i32_matches_spec_fallback() {
        let row = TypeRow::default_i32();
        assert_eq!(row.kind, TypeKind::I32);
        assert_eq!(row.size, 4);
        assert_eq!(row.name_str, 0);
    }

    #[test]
    fn small_int_classification() {
        assert!(TypeKind::I8.is_small_int());
        assert!(TypeKind::Bool.is_small_int());
        assert!(!TypeKind::I32.is_small_int());
        assert!(!TypeKind::I64.is_small_int());
    }

    #[test]
    fn import_row_roundtrip() {
        let row = ImportRow { module_str: 1, symbol_str: 2, kind: ImportKind::Syscall, flags: 0, reserved: 0, sig_id: 9 };
        let mut w = ByteWriter::new();
        row.write(&mut w);
        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(ImportRow::read(&mut r).unwrap(), row);
    }
}
