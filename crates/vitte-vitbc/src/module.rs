//! Conteneur binaire SBC : en-tête, répertoire de sections, pool de
//! constantes, encodeur (`SbcModule::to_bytes`) et chargeur
//! (`SbcModule::from_bytes`).
//!
//! Disposition bit-exacte : magic `0x30434253` ("SBC0" en little-endian),
//! version `0x0001`, en-tête de 32 octets, répertoire de sections (entrées
//! de 16 octets), sections alignées sur 4 octets.

use crate::types::{ExportRow, FieldRow, FunctionRow, GlobalRow, ImportKind, ImportRow, MethodRow, SigRow, TypeRow};
use vitte_core::{align4, ByteReader, ByteWriter, CoreError};

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

/// Magic SBC : les quatre octets ASCII `"SBC0"` lus comme un `u32` LE.
pub const SBC_MAGIC: u32 = 0x3043_4253;

/// Version binaire actuellement émise et acceptée par ce crate.
pub const SBC_VERSION: u16 = 0x0001;

/// Taille fixe de l'en-tête, en octets.
pub const HEADER_LEN: usize = 32;

/// Taille fixe d'une entrée du répertoire de sections, en octets.
pub const SECTION_ENTRY_LEN: usize = 16;

/// Identifiant de section dans le répertoire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionId {
    /// Table des types.
    Types = 1,
    /// Table des champs.
    Fields = 2,
    /// Table des méthodes.
    Methods = 3,
    /// Table des signatures.
    Sigs = 4,
    /// Pool de constantes (chaînes + enregistrements typés).
    ConstPool = 5,
    /// Table des globales.
    Globals = 6,
    /// Table des fonctions.
    Functions = 7,
    /// Octets de code concaténés.
    Code = 8,
    /// Informations de débogage, purement informatives.
    Debug = 9,
    /// Table des imports.
    Imports = 10,
    /// Table des exports.
    Exports = 11,
    /// Identifiants de `syscall` déclarés (§4.2 point 6 : les syscalls ne
    /// produisent pas de ligne `Imports`, mais le vérificateur doit quand
    /// même pouvoir retrouver leur déclaration après un aller-retour
    /// binaire). Un id non reconnu est conservé brut et ignoré (§4.5) ; ce
    /// découpage supplémentaire respecte cette règle.
    SyscallIds = 12,
}

impl SectionId {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::Types,
            2 => Self::Fields,
            3 => Self::Methods,
            4 => Self::Sigs,
            5 => Self::ConstPool,
            6 => Self::Globals,
            7 => Self::Functions,
            8 => Self::Code,
            9 => Self::Debug,
            10 => Self::Imports,
            11 => Self::Exports,
            12 => Self::SyscallIds,
            _ => return None,
        })
    }
}

/// Catégorie d'un enregistrement du pool de constantes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConstKind {
    /// Référence vers une chaîne stockée ailleurs dans le pool (offset u32
    /// dans `payload`, reste à zéro).
    StringRef = 0,
    /// Constante `i32` (dans les 4 octets bas de `payload`).
    I32 = 1,
    /// Constante `i64` (`payload` pleine largeur).
    I64 = 2,
    /// Constante `f32` (bits IEEE-754 dans les 4 octets bas de `payload`).
    F32 = 3,
    /// Constante `f64` (bits IEEE-754, `payload` pleine largeur).
    F64 = 4,
    /// Constante booléenne (0/1 dans le premier octet de `payload`).
    Bool = 5,
    /// Constante `char` (scalaire Unicode dans les 4 octets bas de `payload`).
    Char = 6,
    /// Constante nulle (une référence vide) ; `payload` ignoré.
    Null = 7,
}

impl ConstKind {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::StringRef,
            1 => Self::I32,
            2 => Self::I64,
            3 => Self::F32,
            4 => Self::F64,
            5 => Self::Bool,
            6 => Self::Char,
            7 => Self::Null,
            _ => return None,
        })
    }
}

/// Un enregistrement typé du pool de constantes — 12 octets (`kind` +
/// rembourrage de 3 octets + `payload` u64).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstRecord {
    /// Catégorie de la valeur.
    pub kind: ConstKind,
    /// Charge utile brute ; son interprétation dépend de `kind`.
    pub payload: u64,
}

impl ConstRecord {
    /// Taille fixe d'un enregistrement encodé, en octets.
    pub const ENCODED_LEN: usize = 12;
}

/// Pool de constantes : une arène d'octets mêlant chaînes terminées par NUL
/// et enregistrements `ConstRecord` à taille fixe, tous deux adressés par
/// leur offset de départ dans l'arène.
#[derive(Debug, Clone, Default)]
pub struct ConstPool {
    bytes: Vec<u8>,
}

impl ConstPool {
    /// Pool vide.
    pub fn new() -> Self { Self { bytes: Vec::new() } }

    /// Interne une chaîne (NUL-terminée) et renvoie son offset de départ.
    /// Les appels répétés avec la même chaîne produisent des offsets
    /// distincts : la déduplication est la responsabilité de l'appelant
    /// (le constructeur symbolique pendant l'abaissement).
    pub fn intern_string(&mut self, s: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        offset
    }

    /// Ajoute un enregistrement typé et renvoie son offset de départ.
    pub fn push_record(&mut self, rec: ConstRecord) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.push(rec.kind as u8);
        self.bytes.extend_from_slice(&[0u8; 3]);
        self.bytes.extend_from_slice(&rec.payload.to_le_bytes());
        offset
    }

    /// Ajoute une référence de chaîne comme enregistrement (utilisé par les
    /// constantes nommées de type `string`), renvoie l'offset du record.
    pub fn push_string_const(&mut self, s: &str) -> u32 {
        let str_offset = self.intern_string(s);
        self.push_record(ConstRecord { kind: ConstKind::StringRef, payload: u64::from(str_offset) })
    }

    /// Écrit une séquence d'identifiants `u32` (LE) contigus et renvoie
    /// l'offset de son premier élément — utilisé par `SigRow::param_type_start`
    /// pour stocker le tableau aplati des types de paramètres.
    pub fn push_u32_array(&mut self, items: &[u32]) -> u32 {
        let offset = self.bytes.len() as u32;
        for v in items {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
        offset
    }

    /// Relit `count` identifiants `u32` (LE) écrits par [`Self::push_u32_array`].
    pub fn read_u32_array_at(&self, offset: u32, count: u16) -> Result<Vec<u32>, crate::LoadError> {
        let mut r = ByteReader::new(&self.bytes);
        r.seek(offset as usize).map_err(crate::LoadError::Core)?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(r.read_u32_le().map_err(crate::LoadError::Core)?);
        }
        Ok(out)
    }

    /// Lit la chaîne NUL-terminée commençant à `offset`.
    pub fn read_cstr_at(&self, offset: u32) -> Result<&str, crate::LoadError> {
        let mut r = ByteReader::new(&self.bytes);
        r.seek(offset as usize).map_err(crate::LoadError::Core)?;
        r.read_cstr().map_err(crate::LoadError::Core)
    }

    /// Lit l'enregistrement typé commençant à `offset`.
    pub fn read_record_at(&self, offset: u32) -> Result<ConstRecord, crate::LoadError> {
        let mut r = ByteReader::new(&self.bytes);
        r.seek(offset as usize).map_err(crate::LoadError::Core)?;
        let kind_raw = r.read_u8().map_err(crate::LoadError::Core)?;
        let _pad = r.read_bytes(3).map_err(crate::LoadError::Core)?;
        let payload = r.read_u64_le().map_err(crate::LoadError::Core)?;
        let kind = ConstKind::from_u8(kind_raw)
            .ok_or_else(|| crate::LoadError::Core(CoreError::corrupted(format!("unknown const kind byte {kind_raw}"))))?;
        Ok(ConstRecord { kind, payload })
    }

    /// Si `rec` est une `StringRef`, résout et renvoie la chaîne qu'elle
    /// désigne.
    pub fn resolve_string(&self, rec: ConstRecord) -> Result<&str, crate::LoadError> {
        match rec.kind {
            ConstKind::StringRef => self.read_cstr_at(rec.payload as u32),
            other => Err(crate::LoadError::Malformed(format!("expected StringRef const, found {other:?}"))),
        }
    }

    /// Longueur actuelle de l'arène, en octets.
    pub fn len(&self) -> usize { self.bytes.len() }
    /// Vrai si rien n'a encore été interné.
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }
    /// Vue en lecture directe sur les octets bruts (utilisé par l'encodeur).
    pub fn as_bytes(&self) -> &[u8] { &self.bytes }
    /// Construit un pool à partir d'octets déjà encodés (le chargeur ne
    /// valide le contenu qu'à l'usage, paresseusement, comme le reste du
    /// format SBC).
    pub fn from_bytes(bytes: Vec<u8>) -> Self { Self { bytes } }
}

#[cfg(not(feature = "std"))]
use alloc::format;

/// Une ligne de la table des lignes de débogage : associe un offset de code
/// à un fichier et un numéro de ligne source. Purement informatif.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugLineRow {
    /// Offset dans la section `Code`.
    pub code_offset: u32,
    /// Index dans la table des fichiers de `DebugInfo::files`.
    pub file_id: u32,
    /// Numéro de ligne (1-based) dans le fichier source.
    pub line: u32,
}

/// Une ligne de la table des symboles de débogage : nom source d'une
/// fonction à un offset de code donné.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSymRow {
    /// Offset dans la section `Code`.
    pub code_offset: u32,
    /// Nom symbolique (tel qu'écrit dans l'IR textuel).
    pub name: String,
}

/// Informations de débogage optionnelles (section `Debug`, id 9).
///
/// Absentes du chargement/vérification/exécution : un module sans cette
/// section se comporte exactement comme un module qui en a une.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    /// Table des chemins de fichiers source référencés par `lines`.
    pub files: Vec<String>,
    /// Association offset de code → (fichier, ligne).
    pub lines: Vec<DebugLineRow>,
    /// Association offset de code → nom symbolique.
    pub symbols: Vec<DebugSymRow>,
}

impl DebugInfo {
    fn write(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.files.len() as u32);
        for f in &self.files {
            w.write_u32_le(f.len() as u32);
            w.write_bytes(f.as_bytes());
        }
        w.write_u32_le(self.lines.len() as u32);
        for l in &self.lines {
            w.write_u32_le(l.code_offset);
            w.write_u32_le(l.file_id);
            w.write_u32_le(l.line);
        }
        w.write_u32_le(self.symbols.len() as u32);
        for s in &self.symbols {
            w.write_u32_le(s.code_offset);
            w.write_u32_le(s.name.len() as u32);
            w.write_bytes(s.name.as_bytes());
        }
    }

    fn read(data: &[u8]) -> Result<Self, crate::LoadError> {
        let mut r = ByteReader::new(data);
        let file_count = r.read_u32_le().map_err(crate::LoadError::Core)?;
        let mut files = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            let len = r.read_u32_le().map_err(crate::LoadError::Core)? as usize;
            let bytes = r.read_bytes(len).map_err(crate::LoadError::Core)?;
            files.push(String::from_utf8(bytes.to_vec()).map_err(|_| crate::LoadError::Core(CoreError::InvalidUtf8))?);
        }
        let line_count = r.read_u32_le().map_err(crate::LoadError::Core)?;
        let mut lines = Vec::with_capacity(line_count as usize);
        for _ in 0..line_count {
            lines.push(DebugLineRow {
                code_offset: r.read_u32_le().map_err(crate::LoadError::Core)?,
                file_id: r.read_u32_le().map_err(crate::LoadError::Core)?,
                line: r.read_u32_le().map_err(crate::LoadError::Core)?,
            });
        }
        let sym_count = r.read_u32_le().map_err(crate::LoadError::Core)?;
        let mut symbols = Vec::with_capacity(sym_count as usize);
        for _ in 0..sym_count {
            let code_offset = r.read_u32_le().map_err(crate::LoadError::Core)?;
            let len = r.read_u32_le().map_err(crate::LoadError::Core)? as usize;
            let bytes = r.read_bytes(len).map_err(crate::LoadError::Core)?;
            let name = String::from_utf8(bytes.to_vec()).map_err(|_| crate::LoadError::Core(CoreError::InvalidUtf8))?;
            symbols.push(DebugSymRow { code_offset, name });
        }
        Ok(Self { files, lines, symbols })
    }
}

/// Un module SBC chargé ou prêt à être encodé : l'union de toutes les
/// tables, du pool de constantes, du code et d'une section de débogage
/// optionnelle.
#[derive(Debug, Clone, Default)]
pub struct SbcModule {
    /// Table des types (jamais vide une fois encodée : §6.1 impose une
    /// ligne `i32` par défaut si elle est vide en mémoire).
    pub types: Vec<TypeRow>,
    /// Table des champs.
    pub fields: Vec<FieldRow>,
    /// Table des méthodes.
    pub methods: Vec<MethodRow>,
    /// Table des signatures.
    pub sigs: Vec<SigRow>,
    /// Pool de constantes.
    pub const_pool: ConstPool,
    /// Table des globales.
    pub globals: Vec<GlobalRow>,
    /// Table des fonctions.
    pub functions: Vec<FunctionRow>,
    /// Table des imports (syscalls/intrinsèques/imports nommés).
    pub imports: Vec<ImportRow>,
    /// Table des exports.
    pub exports: Vec<ExportRow>,
    /// Identifiants de `syscall` déclarés (§4.2 point 6) : aucune ligne
    /// `Imports` ne leur correspond, donc ils voyagent dans leur propre
    /// section pour rester visibles au vérificateur après un aller-retour
    /// binaire.
    pub syscalls: Vec<u32>,
    /// Octets de code, concaténation des corps de toutes les fonctions.
    pub code: Vec<u8>,
    /// Informations de débogage optionnelles.
    pub debug: Option<DebugInfo>,
    /// Identifiant de la fonction d'entrée (méthode `Methods`), ou
    /// `u32::MAX` si aucune n'est déclarée.
    pub entry_method_id: u32,
}

/// Aucune fonction d'entrée déclarée.
pub const NO_ENTRY: u32 = u32::MAX;

fn write_rows<T>(w: &mut ByteWriter, rows: &[T], write_one: impl Fn(&T, &mut ByteWriter)) {
    for row in rows { write_one(row, w); }
}

impl SbcModule {
    /// Encode ce module selon le format binaire SBC (§6.1).
    ///
    /// Ordre des sections : Types, Fields, Methods, Sigs, ConstPool,
    /// Globals, Functions, [Imports, Exports si non vides], Code, [Debug si
    /// présente]. Chaque section est alignée sur 4 octets après son corps.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sections: Vec<(SectionId, Vec<u8>, u32)> = Vec::new();

        // Types : jamais vide dans le flux encodé.
        let mut types_bytes = ByteWriter::new();
        if self.types.is_empty() {
            TypeRow::default_i32_row_for_encode().write(&mut types_bytes);
            sections.push((SectionId::Types, types_bytes.into_vec(), 1));
        } else {
            write_rows(&mut types_bytes, &self.types, TypeRow::write);
            sections.push((SectionId::Types, types_bytes.into_vec(), self.types.len() as u32));
        }

        let mut fields_bytes = ByteWriter::new();
        write_rows(&mut fields_bytes, &self.fields, FieldRow::write);
        sections.push((SectionId::Fields, fields_bytes.into_vec(), self.fields.len() as u32));

        let mut methods_bytes = ByteWriter::new();
        write_rows(&mut methods_bytes, &self.methods, MethodRow::write);
        sections.push((SectionId::Methods, methods_bytes.into_vec(), self.methods.len() as u32));

        let mut sigs_bytes = ByteWriter::new();
        write_rows(&mut sigs_bytes, &self.sigs, SigRow::write);
        sections.push((SectionId::Sigs, sigs_bytes.into_vec(), self.sigs.len() as u32));

        sections.push((SectionId::ConstPool, self.const_pool.as_bytes().to_vec(), 1));

        let mut globals_bytes = ByteWriter::new();
        write_rows(&mut globals_bytes, &self.globals, GlobalRow::write);
        sections.push((SectionId::Globals, globals_bytes.into_vec(), self.globals.len() as u32));

        let mut functions_bytes = ByteWriter::new();
        write_rows(&mut functions_bytes, &self.functions, FunctionRow::write);
        sections.push((SectionId::Functions, functions_bytes.into_vec(), self.functions.len() as u32));

        if !self.imports.is_empty() {
            let mut b = ByteWriter::new();
            write_rows(&mut b, &self.imports, ImportRow::write);
            sections.push((SectionId::Imports, b.into_vec(), self.imports.len() as u32));
        }
        if !self.exports.is_empty() {
            let mut b = ByteWriter::new();
            write_rows(&mut b, &self.exports, ExportRow::write);
            sections.push((SectionId::Exports, b.into_vec(), self.exports.len() as u32));
        }
        if !self.syscalls.is_empty() {
            let mut b = ByteWriter::new();
            for id in &self.syscalls { b.write_u32_le(*id); }
            sections.push((SectionId::SyscallIds, b.into_vec(), self.syscalls.len() as u32));
        }

        sections.push((SectionId::Code, self.code.clone(), self.code.len() as u32));

        if let Some(debug) = &self.debug {
            let mut b = ByteWriter::new();
            debug.write(&mut b);
            sections.push((SectionId::Debug, b.into_vec(), 1));
        }

        let section_count = sections.len() as u32;
        let dir_offset = HEADER_LEN as u32;
        let mut cursor = dir_offset + section_count * SECTION_ENTRY_LEN as u32;

        let mut entries = Vec::with_capacity(sections.len());
        let mut bodies = Vec::with_capacity(sections.len());
        for (id, bytes, count) in &sections {
            let offset = cursor;
            let size = bytes.len() as u32;
            entries.push((*id, offset, size, *count));
            let padded = align4(size);
            cursor += padded;
            bodies.push((bytes.clone(), (padded - size) as usize));
        }

        let mut out = ByteWriter::new();
        out.write_u32_le(SBC_MAGIC);
        out.write_u16_le(SBC_VERSION);
        out.write_u8(1); // endian: 1 = little-endian
        out.write_u8(0); // flags
        out.write_u32_le(section_count);
        out.write_u32_le(dir_offset);
        out.write_u32_le(self.entry_method_id);
        out.write_u32_le(0);
        out.write_u32_le(0);
        out.write_u32_le(0);
        debug_assert_eq!(out.len(), HEADER_LEN);

        for (id, offset, size, count) in &entries {
            out.write_u32_le(*id as u32);
            out.write_u32_le(*offset);
            out.write_u32_le(*size);
            out.write_u32_le(*count);
        }
        debug_assert_eq!(out.len(), dir_offset as usize + entries.len() * SECTION_ENTRY_LEN);

        for (bytes, pad) in bodies {
            out.write_bytes(&bytes);
            for _ in 0..pad { out.write_u8(0); }
        }

        out.into_vec()
    }

    /// Décode un module à partir d'octets SBC bruts (§4.5/§6.1).
    ///
    /// Validation structurelle minimale (magic, version, bornes de
    /// sections) ; la vérification sémantique complète (types de pile,
    /// bornes de branchement…) est la responsabilité du vérificateur de
    /// `vitte-vm`, pas du chargeur.
    pub fn from_bytes(data: &[u8]) -> Result<Self, crate::LoadError> {
        let mut r = ByteReader::new(data);
        let magic = r.read_u32_le().map_err(crate::LoadError::Core)?;
        if magic != SBC_MAGIC {
            return Err(crate::LoadError::BadMagic(magic));
        }
        let version = r.read_u16_le().map_err(crate::LoadError::Core)?;
        if version != SBC_VERSION {
            return Err(crate::LoadError::UnsupportedVersion(version));
        }
        let endian = r.read_u8().map_err(crate::LoadError::Core)?;
        if endian != 1 {
            return Err(crate::LoadError::Malformed(format!("unsupported endianness byte {endian}")));
        }
        let _flags = r.read_u8().map_err(crate::LoadError::Core)?;
        let section_count = r.read_u32_le().map_err(crate::LoadError::Core)?;
        let section_table_offset = r.read_u32_le().map_err(crate::LoadError::Core)?;
        let entry_method_id = r.read_u32_le().map_err(crate::LoadError::Core)?;
        let _reserved0 = r.read_u32_le().map_err(crate::LoadError::Core)?;
        let _reserved1 = r.read_u32_le().map_err(crate::LoadError::Core)?;
        let _reserved2 = r.read_u32_le().map_err(crate::LoadError::Core)?;

        r.seek(section_table_offset as usize).map_err(crate::LoadError::Core)?;

        struct Dir { id: SectionId, offset: u32, size: u32, count: u32 }
        let mut dirs = Vec::with_capacity(section_count as usize);
        for _ in 0..section_count {
            let raw_id = r.read_u32_le().map_err(crate::LoadError::Core)?;
            let offset = r.read_u32_le().map_err(crate::LoadError::Core)?;
            let size = r.read_u32_le().map_err(crate::LoadError::Core)?;
            let count = r.read_u32_le().map_err(crate::LoadError::Core)?;
            // Une section dont l'id n'est pas reconnu est conservée dans le
            // répertoire mais son contenu est ignoré (§4.5) : elle n'est pas
            // une erreur de chargement.
            let Some(id) = SectionId::from_u32(raw_id) else { continue };
            dirs.push(Dir { id, offset, size, count });
        }

        let section_bytes = |offset: u32, size: u32| -> Result<&[u8], crate::LoadError> {
            let start = offset as usize;
            let end = start.checked_add(size as usize).ok_or_else(|| crate::LoadError::Malformed("section size overflow".into()))?;
            data.get(start..end).ok_or(crate::LoadError::Core(CoreError::UnexpectedEof { needed: size as u64, at: offset as u64 }))
        };

        let mut module = SbcModule { entry_method_id, ..Default::default() };

        for d in &dirs {
            let bytes = section_bytes(d.offset, d.size)?;
            match d.id {
                SectionId::Types => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.types.push(TypeRow::read(&mut rr).map_err(crate::LoadError::Core)?); }
                }
                SectionId::Fields => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.fields.push(FieldRow::read(&mut rr).map_err(crate::LoadError::Core)?); }
                }
                SectionId::Methods => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.methods.push(MethodRow::read(&mut rr).map_err(crate::LoadError::Core)?); }
                }
                SectionId::Sigs => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.sigs.push(SigRow::read(&mut rr).map_err(crate::LoadError::Core)?); }
                }
                SectionId::ConstPool => {
                    module.const_pool = ConstPool::from_bytes(bytes.to_vec());
                }
                SectionId::Globals => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.globals.push(GlobalRow::read(&mut rr).map_err(crate::LoadError::Core)?); }
                }
                SectionId::Functions => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.functions.push(FunctionRow::read(&mut rr).map_err(crate::LoadError::Core)?); }
                }
                SectionId::Imports => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.imports.push(ImportRow::read(&mut rr).map_err(crate::LoadError::Core)?); }
                }
                SectionId::Exports => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.exports.push(ExportRow::read(&mut rr).map_err(crate::LoadError::Core)?); }
                }
                SectionId::SyscallIds => {
                    let mut rr = ByteReader::new(bytes);
                    for _ in 0..d.count { module.syscalls.push(rr.read_u32_le().map_err(crate::LoadError::Core)?); }
                }
                SectionId::Code => {
                    module.code = bytes.to_vec();
                }
                SectionId::Debug => {
                    module.debug = Some(DebugInfo::read(bytes)?);
                }
            }
        }

        module.validate()?;
        Ok(module)
    }

    /// Vérifie que chaque identifiant de chaque table reste dans les bornes
    /// de la table qu'il référence (§4.5). Purement structurel : ne sait
    /// rien des types de pile ni des cibles de branchement, c'est le rôle
    /// du vérificateur de `vitte-vm`.
    pub fn validate(&self) -> Result<(), crate::LoadError> {
        let types_len = self.types.len() as u32;
        let sigs_len = self.sigs.len() as u32;
        // §4.2 point 6: le `func_id` d'un `import` court sur l'index de sa
        // déclaration parmi *toutes* les déclarations de la section
        // `imports:` (syscalls et intrinsèques compris), pas sur sa position
        // dans cette table — donc des trous sont possibles. `reserved` porte
        // cet index relatif pour les lignes `Import` (voir `ImportRow`), et
        // la borne haute se déduit du plus grand de ces index plutôt que
        // d'un simple décompte de lignes.
        let import_max_rel = self
            .imports
            .iter()
            .filter(|i| i.kind == ImportKind::Import)
            .map(|i| i.reserved as u32)
            .max();
        let funcs_len = self.functions.len() as u32 + import_max_rel.map_or(0, |m| m + 1);

        for f in &self.fields {
            if f.type_id >= types_len {
                return Err(crate::LoadError::Malformed(format!(
                    "field type_id {} out of range (types.len = {types_len})",
                    f.type_id
                )));
            }
        }
        for t in &self.types {
            let end = t.field_start as u64 + t.field_count as u64;
            if end > self.fields.len() as u64 {
                return Err(crate::LoadError::Malformed(format!(
                    "type field range [{}, {}) exceeds fields.len = {}",
                    t.field_start,
                    end,
                    self.fields.len()
                )));
            }
        }
        for s in &self.sigs {
            if s.ret_type_id != crate::types::AMBIGUOUS_FIELD && s.ret_type_id >= types_len {
                return Err(crate::LoadError::Malformed(format!(
                    "sig ret_type_id {} out of range (types.len = {types_len})",
                    s.ret_type_id
                )));
            }
            let params_end = s.param_type_start as u64 + u64::from(s.param_count) * 4;
            if s.param_count > 0 && params_end > self.const_pool.len() as u64 {
                return Err(crate::LoadError::Malformed(format!(
                    "sig param_type array [{}, {params_end}) exceeds const pool ({} bytes)",
                    s.param_type_start,
                    self.const_pool.len()
                )));
            }
        }
        for m in &self.methods {
            if m.sig_id >= sigs_len {
                return Err(crate::LoadError::Malformed(format!(
                    "method sig_id {} out of range (sigs.len = {sigs_len})",
                    m.sig_id
                )));
            }
            if (m.code_offset as usize) > self.code.len() {
                return Err(crate::LoadError::Malformed(format!(
                    "method code_offset {} outside Code section ({} bytes)",
                    m.code_offset,
                    self.code.len()
                )));
            }
        }
        for fr in &self.functions {
            if fr.method_id as usize >= self.methods.len() {
                return Err(crate::LoadError::Malformed(format!(
                    "function method_id {} out of range (methods.len = {})",
                    fr.method_id,
                    self.methods.len()
                )));
            }
            let end = fr.code_offset as u64 + fr.code_size as u64;
            if end > self.code.len() as u64 {
                return Err(crate::LoadError::Malformed(format!(
                    "function code range [{}, {}) exceeds Code section ({} bytes)",
                    fr.code_offset,
                    end,
                    self.code.len()
                )));
            }
        }
        for g in &self.globals {
            if g.type_id >= types_len {
                return Err(crate::LoadError::Malformed(format!(
                    "global type_id {} out of range (types.len = {types_len})",
                    g.type_id
                )));
            }
        }
        for i in &self.imports {
            // Seules les lignes `Import` pointent vraiment dans `Sigs` :
            // une ligne `Intrinsic` réutilise `sig_id` pour porter
            // l'identifiant numérique brut déclaré par `intrinsic NAME ID`,
            // qui n'a aucun rapport avec la table des signatures.
            if i.kind == ImportKind::Import && i.sig_id >= sigs_len {
                return Err(crate::LoadError::Malformed(format!(
                    "import sig_id {} out of range (sigs.len = {sigs_len})",
                    i.sig_id
                )));
            }
        }
        for e in &self.exports {
            if e.func_id >= funcs_len {
                return Err(crate::LoadError::Malformed(format!(
                    "export func_id {} out of range (functions + imports = {funcs_len})",
                    e.func_id
                )));
            }
        }
        if self.entry_method_id != NO_ENTRY && self.entry_method_id as usize >= self.methods.len() {
            return Err(crate::LoadError::Malformed(format!(
                "entry_method_id {} out of range (methods.len = {})",
                self.entry_method_id,
                self.methods.len()
            )));
        }
        Ok(())
    }
}

impl TypeRow {
    /// Ligne insérée à l'encodage quand `SbcModule::types` est vide.
    pub(crate) fn default_i32_row_for_encode() -> Self { Self::default_i32() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;

    fn sample_module() -> SbcModule {
        let mut m = SbcModule::default();
        m.types.push(TypeRow { name_str: 0, kind: TypeKind::I32, flags: 0, reserved: 0, size: 4, field_start: 0, field_count: 0 });
        m.sigs.push(SigRow { ret_type_id: 0, param_count: 0, call_conv: 0, param_type_start: 0 });
        let name_off = m.const_pool.intern_string("main");
        m.methods.push(MethodRow { name_str: name_off, sig_id: 0, code_offset: 0, local_count: 1, flags: 0 });
        m.functions.push(FunctionRow { method_id: 0, code_offset: 0, code_size: 2, stack_max: 4 });
        m.code = vec![0x06, 0x00, 0x00, 0xA3]; // enter 0 ; ret (illustratif)
        m.entry_method_id = 0;
        m
    }

    #[test]
    fn roundtrip_encode_decode_is_identity_on_tables() {
        let m = sample_module();
        let bytes = m.to_bytes();
        assert_eq!(bytes.len() % 4, 0);
        let back = SbcModule::from_bytes(&bytes).expect("decode");
        assert_eq!(back.types, m.types);
        assert_eq!(back.sigs, m.sigs);
        assert_eq!(back.methods, m.methods);
        assert_eq!(back.functions, m.functions);
        assert_eq!(back.code, m.code);
        assert_eq!(back.entry_method_id, m.entry_method_id);
    }

    #[test]
    fn empty_types_defaults_to_single_i32_row_on_the_wire() {
        let m = SbcModule::default();
        let bytes = m.to_bytes();
        let back = SbcModule::from_bytes(&bytes).expect("decode");
        assert_eq!(back.types.len(), 1);
        assert_eq!(back.types[0].kind, TypeKind::I32);
    }

    #[test]
    fn header_fields_land_at_documented_offsets() {
        let m = sample_module();
        let bytes = m.to_bytes();
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), SBC_MAGIC);
        assert_eq!(u16::from_le_bytes(bytes[4..6].try_into().unwrap()), SBC_VERSION);
        assert_eq!(bytes[6], 1); // endian
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), HEADER_LEN as u32);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 32];
        assert!(matches!(SbcModule::from_bytes(&bytes), Err(crate::LoadError::BadMagic(0))));
    }

    #[test]
    fn const_pool_string_and_record_roundtrip() {
        let mut pool = ConstPool::new();
        let off = pool.push_string_const("hello");
        let rec = pool.read_record_at(off).unwrap();
        assert_eq!(pool.resolve_string(rec).unwrap(), "hello");
    }

    #[test]
    fn const_pool_u32_array_roundtrip() {
        let mut pool = ConstPool::new();
        let off = pool.push_u32_array(&[1, 2, 3]);
        assert_eq!(pool.read_u32_array_at(off, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn unknown_section_id_is_tolerated_not_rejected() {
        let m = sample_module();
        let mut bytes = m.to_bytes();
        // Réécrit le premier id de section du répertoire avec une valeur inconnue.
        let dir_offset = HEADER_LEN;
        bytes[dir_offset..dir_offset + 4].copy_from_slice(&999u32.to_le_bytes());
        assert!(SbcModule::from_bytes(&bytes).is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_field_type_id() {
        let mut m = sample_module();
        m.fields.push(FieldRow { name_str: 0, type_id: 77, offset: 0, flags: 0 });
        assert!(m.validate().is_err());
    }

    #[test]
    fn validate_accepts_sample_module() {
        assert!(sample_module().validate().is_ok());
    }
}
