//! Abaisseur : résout un [`crate::text::SymbolicModule`] (noms seulement) en
//! un `vitte_vitbc::SbcModule` entièrement numérique, prêt à être encodé.
//!
//! Ordre de résolution, fixe et documenté car plusieurs étapes dépendent des
//! précédentes :
//!
//! 1. types primitifs enregistrés dans l'ordre de [`vitte_vitbc::TypeKind`]
//! 2. types utilisateur (alias primitif ou `artifact` porteur de champs)
//! 3. identifiants de champs, avec marquage `AMBIGUOUS_FIELD` en cas de
//!    collision de nom entre deux types
//! 4. signatures (`void` → [`vitte_vitbc::types::AMBIGUOUS_FIELD`] comme
//!    sentinelle "pas de valeur de retour", tableau de paramètres aplati
//!    dans le pool de constantes)
//! 5. constantes nommées
//! 6. imports : `syscall`/`intrinsic` n'enregistrent qu'une correspondance
//!    nom → identifiant numérique consommée par les mnémoniques `syscall`/
//!    `intrinsic` des corps de fonction ; seul `import` (module, symbole,
//!    signature) peuple la table `Imports` et partage l'espace des
//!    identifiants de fonction avec les fonctions utilisateur
//! 7. globales (init zéro, constante nommée ou littéral inline)
//! 8. corps de fonction, un [`crate::builder::IrBuilder`] par fonction, avec
//!    pré-passage de création des labels avant l'émission des instructions

#[cfg(not(feature = "std"))]
use alloc::{
    collections::BTreeMap, format, string::String, string::ToString, vec, vec::Vec,
};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use vitte_vitbc::types::{
    ExportRow, FieldRow, FunctionRow, GlobalRow, ImportKind, ImportRow, MethodRow, SigRow,
    TypeKind, TypeRow, AMBIGUOUS_FIELD,
};
use vitte_vitbc::{ConstKind, ConstRecord, SbcModule, NO_ENTRY};

use crate::builder::{IrBuilder, IrLabel, LabelError};
use crate::text::{FieldDecl, FuncItem, FunctionDecl, GlobalDecl, ImportDecl, SymbolicModule, TypeDecl};

/// Réglages du passage d'abaissement.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowerOptions {
    /// Si vrai, le premier avertissement rencontré (par exemple des
    /// opérandes surnuméraires ignorés sur une instruction sans opérande)
    /// est promu en erreur plutôt que simplement collecté.
    pub deny_warnings: bool,
}

/// Échec de résolution d'un module symbolique.
#[derive(Debug)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum LowerError {
    /// Un nom référencé (type, signature, champ, fonction, label, const,
    /// local, global, upvalue, import) n'a pas été déclaré.
    #[cfg_attr(feature = "errors", error("undefined {kind} '{name}' at line {line}"))]
    UndefinedName {
        /// Catégorie du nom (`"type"`, `"sig"`, `"field"`, …).
        kind: &'static str,
        /// Le nom recherché.
        name: String,
        /// Ligne source de la référence.
        line: u32,
    },
    /// Un nom a été déclaré deux fois là où l'unicité est requise.
    #[cfg_attr(feature = "errors", error("duplicate {kind} '{name}' at line {line}"))]
    DuplicateName {
        /// Catégorie du nom.
        kind: &'static str,
        /// Le nom en double.
        name: String,
        /// Ligne source de la seconde déclaration.
        line: u32,
    },
    /// Un nom de champ non qualifié désigne des champs distincts dans au
    /// moins deux types : la référence est rejetée plutôt que résolue au
    /// hasard vers le premier trouvé.
    #[cfg_attr(feature = "errors", error("ambiguous field '{name}' at line {line}"))]
    AmbiguousField {
        /// Le nom de champ ambigu.
        name: String,
        /// Ligne source de la référence.
        line: u32,
    },
    /// Une instruction porte un nombre d'opérandes incompatible avec son
    /// mnémonique.
    #[cfg_attr(feature = "errors", error("bad operand(s) for '{mnemonic}' at line {line}: {message}"))]
    BadOperand {
        /// Mnémonique fautif.
        mnemonic: String,
        /// Description de l'échec.
        message: String,
        /// Ligne source.
        line: u32,
    },
    /// Une déclaration de champ viole l'alignement ou le confinement exigés
    /// par spec.md §4.2 étape 3 (`offset % 4 == 0`,
    /// `offset + sizeof(field) <= owner.size`).
    #[cfg_attr(feature = "errors", error("field '{owner}.{field}' at line {line}: {message}"))]
    BadField {
        /// Type possédant le champ.
        owner: String,
        /// Nom du champ fautif.
        field: String,
        /// Description de l'échec.
        message: String,
        /// Ligne source.
        line: u32,
    },
    /// Mnémonique non reconnu.
    #[cfg_attr(feature = "errors", error("unknown instruction '{mnemonic}' at line {line}"))]
    UnknownInstruction {
        /// Texte du mnémonique.
        mnemonic: String,
        /// Ligne source.
        line: u32,
    },
    /// `entry <name>` désigne une fonction qui n'existe pas.
    #[cfg_attr(feature = "errors", error("entry function '{0}' is not defined"))]
    UndefinedEntry(String),
    /// Un avertissement a été promu en erreur par [`LowerOptions::deny_warnings`].
    #[cfg_attr(feature = "errors", error("{0}"))]
    DeniedWarning(String),
    /// Échec d'assemblage de labels remonté par [`IrBuilder::finish`].
    #[cfg_attr(feature = "errors", error("{function}: {source}"))]
    Label {
        /// Fonction dans laquelle l'échec a eu lieu.
        function: String,
        /// Erreur d'origine.
        #[cfg_attr(feature = "errors", source)]
        source: LabelError,
    },
}

#[cfg(not(feature = "errors"))]
impl core::fmt::Display for LowerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LowerError::UndefinedName { kind, name, line } => write!(f, "undefined {kind} '{name}' at line {line}"),
            LowerError::DuplicateName { kind, name, line } => write!(f, "duplicate {kind} '{name}' at line {line}"),
            LowerError::AmbiguousField { name, line } => write!(f, "ambiguous field '{name}' at line {line}"),
            LowerError::BadOperand { mnemonic, message, line } => {
                write!(f, "bad operand(s) for '{mnemonic}' at line {line}: {message}")
            }
            LowerError::BadField { owner, field, message, line } => {
                write!(f, "field '{owner}.{field}' at line {line}: {message}")
            }
            LowerError::UnknownInstruction { mnemonic, line } => write!(f, "unknown instruction '{mnemonic}' at line {line}"),
            LowerError::UndefinedEntry(name) => write!(f, "entry function '{name}' is not defined"),
            LowerError::DeniedWarning(msg) => write!(f, "{msg}"),
            LowerError::Label { function, source } => write!(f, "{function}: {source}"),
        }
    }
}

#[cfg(all(feature = "std", not(feature = "errors")))]
impl std::error::Error for LowerError {}

// Order fixed by spec.md §4.2 step 1: `i32` anchors id 0 (the default type
// when tables are otherwise empty), and the rest follows the documented
// list verbatim rather than grouping by kind.
const BUILTIN_TYPES: &[(&str, TypeKind, u32)] = &[
    ("i32", TypeKind::I32, 4),
    ("i8", TypeKind::I8, 1),
    ("i16", TypeKind::I16, 2),
    ("i64", TypeKind::I64, 8),
    ("i128", TypeKind::I128, 16),
    ("u8", TypeKind::U8, 1),
    ("u16", TypeKind::U16, 2),
    ("u32", TypeKind::U32, 4),
    ("u64", TypeKind::U64, 8),
    ("u128", TypeKind::U128, 16),
    ("f32", TypeKind::F32, 4),
    ("f64", TypeKind::F64, 8),
    ("bool", TypeKind::Bool, 1),
    ("char", TypeKind::Char, 4),
    ("ref", TypeKind::Ref, 4),
    ("string", TypeKind::String, 4),
];

/// Bit de `TypeRow::flags` marquant un type composite déclaré par
/// l'utilisateur (`kind=artifact`), par opposition à une simple référence
/// opaque (`TypeKind::Ref` nu, type `ref` prédéfini).
const ARTIFACT_FLAG: u8 = 1;

struct TypeTable {
    rows: Vec<TypeRow>,
    name_to_id: BTreeMap<String, u32>,
}

fn register_builtin_types(pool: &mut vitte_vitbc::ConstPool) -> TypeTable {
    let mut rows = Vec::with_capacity(BUILTIN_TYPES.len());
    let mut name_to_id = BTreeMap::new();
    for (i, (name, kind, size)) in BUILTIN_TYPES.iter().enumerate() {
        let name_str = pool.intern_string(name);
        rows.push(TypeRow { name_str, kind: *kind, flags: 0, reserved: 0, size: *size, field_start: 0, field_count: 0 });
        name_to_id.insert((*name).to_string(), i as u32);
    }
    TypeTable { rows, name_to_id }
}

fn kind_name_to_type_kind(name: &str) -> Option<TypeKind> {
    BUILTIN_TYPES.iter().find(|(n, _, _)| *n == name).map(|(_, k, _)| *k)
}

fn register_user_types(
    table: &mut TypeTable,
    fields: &mut Vec<FieldRow>,
    field_name_to_id: &mut BTreeMap<String, u32>,
    decls: &[TypeDecl],
    pool: &mut vitte_vitbc::ConstPool,
) -> Result<(), LowerError> {
    for decl in decls {
        if table.name_to_id.contains_key(&decl.name) {
            return Err(LowerError::DuplicateName { kind: "type", name: decl.name.clone(), line: decl.line });
        }
        let id = table.rows.len() as u32;
        let name_str = pool.intern_string(&decl.name);

        if decl.kind == "artifact" {
            let field_start = fields.len() as u32;
            for f in &decl.fields {
                register_field(fields, field_name_to_id, table, &decl.name, decl.size, f, pool)?;
            }
            table.rows.push(TypeRow {
                name_str,
                kind: TypeKind::Ref,
                flags: ARTIFACT_FLAG,
                reserved: 0,
                size: decl.size,
                field_start,
                field_count: decl.fields.len() as u32,
            });
        } else {
            let kind = kind_name_to_type_kind(&decl.kind)
                .ok_or_else(|| LowerError::UndefinedName { kind: "type kind", name: decl.kind.clone(), line: decl.line })?;
            table.rows.push(TypeRow { name_str, kind, flags: 0, reserved: 0, size: decl.size, field_start: 0, field_count: 0 });
        }
        table.name_to_id.insert(decl.name.clone(), id);
    }
    Ok(())
}

fn register_field(
    fields: &mut Vec<FieldRow>,
    field_name_to_id: &mut BTreeMap<String, u32>,
    table: &TypeTable,
    owner_type_name: &str,
    owner_size: u32,
    decl: &FieldDecl,
    pool: &mut vitte_vitbc::ConstPool,
) -> Result<(), LowerError> {
    let type_id = table
        .name_to_id
        .get(&decl.type_name)
        .copied()
        .ok_or_else(|| LowerError::UndefinedName { kind: "type", name: decl.type_name.clone(), line: decl.line })?;
    // spec.md §4.2 step 3 / §8 property 5: alignment and containment are
    // validated once here, at lower time, so a misaligned or overflowing
    // field can never reach `ldfld`/`stfld` resolution, let alone the
    // interpreter's field read/write.
    if decl.offset % 4 != 0 {
        return Err(LowerError::BadField {
            owner: owner_type_name.to_string(),
            field: decl.name.clone(),
            message: format!("offset {} is not 4-byte aligned", decl.offset),
            line: decl.line,
        });
    }
    let field_size = table.rows[type_id as usize].size;
    let end = decl.offset.checked_add(field_size).filter(|&end| end <= owner_size);
    if end.is_none() {
        return Err(LowerError::BadField {
            owner: owner_type_name.to_string(),
            field: decl.name.clone(),
            message: format!("offset {} (size {field_size}) exceeds owning type size {owner_size}", decl.offset),
            line: decl.line,
        });
    }
    let field_id = fields.len() as u32;
    let name_str = pool.intern_string(&decl.name);
    fields.push(FieldRow { name_str, type_id, offset: decl.offset, flags: 0 });
    field_name_to_id
        .entry(decl.name.clone())
        .and_modify(|slot| *slot = AMBIGUOUS_FIELD)
        .or_insert(field_id);
    // Qualified `Type.field` form is always unambiguous: it names one type's
    // own field table directly, bypassing the cross-type collision tracked
    // under the bare name above (spec.md §4.2 step 3).
    field_name_to_id.insert(format!("{owner_type_name}.{}", decl.name), field_id);
    Ok(())
}

fn resolve_sig_list(
    sigs: &[crate::text::SigDecl],
    type_table: &TypeTable,
    pool: &mut vitte_vitbc::ConstPool,
) -> Result<(Vec<SigRow>, BTreeMap<String, u32>), LowerError> {
    let mut rows = Vec::with_capacity(sigs.len());
    let mut name_to_id = BTreeMap::new();
    for decl in sigs {
        if name_to_id.contains_key(&decl.name) {
            return Err(LowerError::DuplicateName { kind: "sig", name: decl.name.clone(), line: decl.line });
        }
        let ret_type_id = if decl.ret == "void" {
            AMBIGUOUS_FIELD
        } else {
            *type_table
                .name_to_id
                .get(&decl.ret)
                .ok_or_else(|| LowerError::UndefinedName { kind: "type", name: decl.ret.clone(), line: decl.line })?
        };
        let mut param_ids = Vec::with_capacity(decl.params.len());
        for p in &decl.params {
            let id = *type_table
                .name_to_id
                .get(p)
                .ok_or_else(|| LowerError::UndefinedName { kind: "type", name: p.clone(), line: decl.line })?;
            param_ids.push(id);
        }
        let param_type_start = if param_ids.is_empty() { 0 } else { pool.push_u32_array(&param_ids) };
        name_to_id.insert(decl.name.clone(), rows.len() as u32);
        rows.push(SigRow { ret_type_id, param_count: decl.params.len() as u16, call_conv: 0, param_type_start });
    }
    Ok((rows, name_to_id))
}

fn parse_literal<T: core::str::FromStr>(text: &str, line: u32, what: &'static str) -> Result<T, LowerError> {
    text.parse::<T>()
        .map_err(|_| LowerError::BadOperand { mnemonic: what.to_string(), message: format!("invalid {what} literal: {text}"), line })
}

/// Parses the magnitude of an integer literal: decimal, `0x`/`0X` hex, or
/// `0b`/`0B` binary digits, with an optional leading sign (spec.md §4.1),
/// mirroring `original_source/IR/src/ir_lang.cpp`'s `ParseInt`/`ParseUint`
/// (which hand both forms to `strtoll`/`strtoull` with base 0, i.e.
/// prefix-directed radix detection).
fn parse_int_magnitude(text: &str, line: u32, what: &'static str) -> Result<(bool, u128), LowerError> {
    let bad = || LowerError::BadOperand { mnemonic: what.to_string(), message: format!("invalid {what} literal: {text}"), line };
    let (negative, rest) = match text.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = if let Some(d) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, d)
    } else if let Some(d) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        (2, d)
    } else {
        (10, rest)
    };
    if digits.is_empty() {
        return Err(bad());
    }
    let magnitude = u128::from_str_radix(digits, radix).map_err(|_| bad())?;
    Ok((negative, magnitude))
}

/// Parses a signed integer literal (`-`/`+` optional, `0x`/`0b` accepted)
/// and range-checks it against `T`. Unsigned ops must reject negatives, so
/// they go through [`parse_unsigned_literal`] instead, never through here.
fn parse_signed_literal<T: TryFrom<i128>>(text: &str, line: u32, what: &'static str) -> Result<T, LowerError> {
    let bad = || LowerError::BadOperand { mnemonic: what.to_string(), message: format!("{what} literal out of range: {text}"), line };
    let (negative, magnitude) = parse_int_magnitude(text, line, what)?;
    let signed = if negative {
        i128::try_from(magnitude).ok().and_then(i128::checked_neg).ok_or_else(bad)?
    } else {
        i128::try_from(magnitude).map_err(|_| bad())?
    };
    T::try_from(signed).map_err(|_| bad())
}

/// Parses an unsigned integer literal (no leading `-`, `0x`/`0b` accepted)
/// and range-checks it against `T`.
fn parse_unsigned_literal<T: TryFrom<u128>>(text: &str, line: u32, what: &'static str) -> Result<T, LowerError> {
    let bad = || LowerError::BadOperand { mnemonic: what.to_string(), message: format!("invalid {what} literal: {text}"), line };
    let (negative, magnitude) = parse_int_magnitude(text, line, what)?;
    if negative {
        return Err(bad());
    }
    T::try_from(magnitude).map_err(|_| LowerError::BadOperand {
        mnemonic: what.to_string(),
        message: format!("{what} literal out of range: {text}"),
        line,
    })
}

fn const_kind_and_payload(kind: &str, literal: &str, line: u32) -> Result<(ConstKind, u64), LowerError> {
    Ok(match kind {
        "i32" => (ConstKind::I32, parse_signed_literal::<i32>(literal, line, "i32")? as u32 as u64),
        "i64" => (ConstKind::I64, parse_signed_literal::<i64>(literal, line, "i64")? as u64),
        "f32" => (ConstKind::F32, parse_literal::<f32>(literal, line, "f32")?.to_bits() as u64),
        "f64" => (ConstKind::F64, parse_literal::<f64>(literal, line, "f64")?.to_bits()),
        "bool" => (ConstKind::Bool, u64::from(literal == "true" || literal == "1")),
        "char" => {
            let c = parse_char_literal(literal, line)?;
            (ConstKind::Char, u64::from(c as u32))
        }
        other => {
            return Err(LowerError::BadOperand {
                mnemonic: "const".to_string(),
                message: format!("unsupported const kind: {other}"),
                line,
            })
        }
    })
}

fn register_consts(
    decls: &[crate::text::ConstDecl],
    pool: &mut vitte_vitbc::ConstPool,
) -> Result<BTreeMap<String, (u32, String)>, LowerError> {
    let mut map = BTreeMap::new();
    for decl in decls {
        if map.contains_key(&decl.name) {
            return Err(LowerError::DuplicateName { kind: "const", name: decl.name.clone(), line: decl.line });
        }
        let offset = if decl.kind == "string" {
            pool.push_string_const(&decl.literal)
        } else {
            let (kind, payload) = const_kind_and_payload(&decl.kind, &decl.literal, decl.line)?;
            pool.push_record(ConstRecord { kind, payload })
        };
        map.insert(decl.name.clone(), (offset, decl.kind.clone()));
    }
    Ok(map)
}

struct Imports {
    rows: Vec<ImportRow>,
    func_ids: BTreeMap<String, u32>,
    syscall_ids: BTreeMap<String, u32>,
    intrinsic_ids: BTreeMap<String, u32>,
}

fn register_imports(
    decls: &[ImportDecl],
    sig_name_to_id: &BTreeMap<String, u32>,
    pool: &mut vitte_vitbc::ConstPool,
    user_func_count: u32,
) -> Result<Imports, LowerError> {
    let mut rows = Vec::new();
    let mut func_ids = BTreeMap::new();
    let mut syscall_ids = BTreeMap::new();
    let mut intrinsic_ids = BTreeMap::new();

    // §4.2 point 6: `func_id = user_functions.len + import_index`, où
    // `import_index` compte *toutes* les déclarations de la section
    // `imports:` dans leur ordre textuel — syscalls et intrinsèques
    // compris, même si eux-mêmes ne consomment pas de `func_id`. D'où
    // l'index de boucle plutôt que `rows.len()`, qui ne compterait que les
    // lignes déjà poussées.
    for (idx, decl) in decls.iter().enumerate() {
        match decl {
            ImportDecl::Syscall { name, id, line } => {
                if syscall_ids.insert(name.clone(), *id).is_some() {
                    return Err(LowerError::DuplicateName { kind: "syscall", name: name.clone(), line: *line });
                }
            }
            ImportDecl::Intrinsic { name, id, line } => {
                if intrinsic_ids.insert(name.clone(), *id).is_some() {
                    return Err(LowerError::DuplicateName { kind: "intrinsic", name: name.clone(), line: *line });
                }
                // Seuls les intrinsèques deviennent des lignes `Imports`
                // (§4.2 point 6) ; `sig_id` est réutilisé pour porter `id`
                // directement puisqu'un intrinsèque n'a pas de signature.
                let symbol_str = pool.intern_string(name);
                let module_str = pool.intern_string("");
                rows.push(ImportRow { module_str, symbol_str, kind: ImportKind::Intrinsic, flags: 0, reserved: 0, sig_id: *id });
            }
            ImportDecl::Import { name, module, symbol, sig, line } => {
                let sig_id = *sig_name_to_id
                    .get(sig)
                    .ok_or_else(|| LowerError::UndefinedName { kind: "sig", name: sig.clone(), line: *line })?;
                let module_str = pool.intern_string(module);
                let symbol_str = pool.intern_string(symbol);
                let func_id = user_func_count + idx as u32;
                if func_ids.insert(name.clone(), func_id).is_some() {
                    return Err(LowerError::DuplicateName { kind: "import", name: name.clone(), line: *line });
                }
                rows.push(ImportRow { module_str, symbol_str, kind: ImportKind::Import, flags: 0, reserved: idx as u16, sig_id });
            }
        }
    }
    Ok(Imports { rows, func_ids, syscall_ids, intrinsic_ids })
}

fn parse_char_literal(text: &str, line: u32) -> Result<char, LowerError> {
    let c = if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        let inner = &text[1..text.len() - 1];
        inner
            .chars()
            .next()
            .filter(|_| inner.chars().count() == 1)
            .ok_or_else(|| LowerError::BadOperand { mnemonic: "const.char".to_string(), message: format!("invalid char literal: {text}"), line })?
    } else {
        let code: u32 = parse_unsigned_literal(text, line, "char")?;
        char::from_u32(code).ok_or_else(|| LowerError::BadOperand { mnemonic: "const.char".to_string(), message: format!("invalid codepoint: {code}"), line })?
    };
    // const.char's wire width is u16 (spec.md §6.3): range-check once here,
    // at lower time, rather than truncating silently when the builder emits it.
    if c as u32 > 0xFFFF {
        return Err(LowerError::BadOperand {
            mnemonic: "const.char".to_string(),
            message: format!("char literal '{c}' (U+{:X}) exceeds the BMP", c as u32),
            line,
        });
    }
    Ok(c)
}

fn register_globals(
    decls: &[GlobalDecl],
    type_table: &TypeTable,
    consts: &BTreeMap<String, (u32, String)>,
    pool: &mut vitte_vitbc::ConstPool,
) -> Result<(Vec<GlobalRow>, BTreeMap<String, u32>), LowerError> {
    let mut rows = Vec::with_capacity(decls.len());
    let mut name_to_id = BTreeMap::new();
    for decl in decls {
        if name_to_id.contains_key(&decl.name) {
            return Err(LowerError::DuplicateName { kind: "global", name: decl.name.clone(), line: decl.line });
        }
        let type_id = *type_table
            .name_to_id
            .get(&decl.type_name)
            .ok_or_else(|| LowerError::UndefinedName { kind: "type", name: decl.type_name.clone(), line: decl.line })?;
        let init_const_id = match &decl.init {
            None => GlobalRow::NO_INIT,
            Some(lit) => {
                if let Some((offset, _)) = consts.get(lit) {
                    *offset
                } else if decl.type_name == "string" {
                    pool.push_string_const(lit)
                } else {
                    let (kind, payload) = const_kind_and_payload(&decl.type_name, lit, decl.line)?;
                    pool.push_record(ConstRecord { kind, payload })
                }
            }
        };
        name_to_id.insert(decl.name.clone(), rows.len() as u32);
        let name_str = pool.intern_string(&decl.name);
        rows.push(GlobalRow { name_str, type_id, flags: 1, init_const_id });
    }
    Ok((rows, name_to_id))
}

/// Contexte partagé, immuable pendant l'assemblage des corps de fonction.
struct LoweringContext<'a> {
    types: &'a TypeTable,
    sigs: &'a BTreeMap<String, u32>,
    consts: &'a BTreeMap<String, (u32, String)>,
    fields: &'a BTreeMap<String, u32>,
    globals: &'a BTreeMap<String, u32>,
    funcs: &'a BTreeMap<String, u32>,
    syscalls: &'a BTreeMap<String, u32>,
    intrinsics: &'a BTreeMap<String, u32>,
    options: &'a LowerOptions,
}

fn resolve_index(
    names: &BTreeMap<String, u32>,
    arg: &str,
    line: u32,
    what: &'static str,
) -> Result<u32, LowerError> {
    if let Some(&id) = names.get(arg) {
        return Ok(id);
    }
    arg.parse::<u32>().map_err(|_| LowerError::UndefinedName { kind: what, name: arg.to_string(), line })
}

fn require_args<'a>(args: &'a [String], n: usize, mnemonic: &str, line: u32) -> Result<&'a [String], LowerError> {
    if args.len() < n {
        return Err(LowerError::BadOperand { mnemonic: mnemonic.to_string(), message: format!("expected {n} operand(s), found {}", args.len()), line });
    }
    Ok(args)
}

fn normalize_mnemonic(m: &str) -> String {
    if m.starts_with("array.") || m.starts_with("list.") {
        let parts: Vec<&str> = m.splitn(3, '.').collect();
        if parts.len() >= 2 {
            return format!("{}.{}", parts[0], parts[1]);
        }
    }
    m.to_string()
}

fn simple_op(mnemonic: &str) -> Option<fn(&mut IrBuilder)> {
    Some(match mnemonic {
        "add.i32" => IrBuilder::emit_add_i32,
        "sub.i32" => IrBuilder::emit_sub_i32,
        "mul.i32" => IrBuilder::emit_mul_i32,
        "div.i32" => IrBuilder::emit_div_i32,
        "rem.i32" => IrBuilder::emit_rem_i32,
        "neg.i32" => IrBuilder::emit_neg_i32,
        "add.i64" => IrBuilder::emit_add_i64,
        "sub.i64" => IrBuilder::emit_sub_i64,
        "mul.i64" => IrBuilder::emit_mul_i64,
        "div.i64" => IrBuilder::emit_div_i64,
        "rem.i64" => IrBuilder::emit_rem_i64,
        "neg.i64" => IrBuilder::emit_neg_i64,
        "add.f32" => IrBuilder::emit_add_f32,
        "sub.f32" => IrBuilder::emit_sub_f32,
        "mul.f32" => IrBuilder::emit_mul_f32,
        "div.f32" => IrBuilder::emit_div_f32,
        "neg.f32" => IrBuilder::emit_neg_f32,
        "add.f64" => IrBuilder::emit_add_f64,
        "sub.f64" => IrBuilder::emit_sub_f64,
        "mul.f64" => IrBuilder::emit_mul_f64,
        "div.f64" => IrBuilder::emit_div_f64,
        "neg.f64" => IrBuilder::emit_neg_f64,
        "cmp.eq.i32" => IrBuilder::emit_cmp_eq_i32,
        "cmp.ne.i32" => IrBuilder::emit_cmp_ne_i32,
        "cmp.lt.i32" => IrBuilder::emit_cmp_lt_i32,
        "cmp.le.i32" => IrBuilder::emit_cmp_le_i32,
        "cmp.gt.i32" => IrBuilder::emit_cmp_gt_i32,
        "cmp.ge.i32" => IrBuilder::emit_cmp_ge_i32,
        "cmp.lt.u32" => IrBuilder::emit_cmp_lt_u32,
        "cmp.le.u32" => IrBuilder::emit_cmp_le_u32,
        "cmp.gt.u32" => IrBuilder::emit_cmp_gt_u32,
        "cmp.ge.u32" => IrBuilder::emit_cmp_ge_u32,
        "cmp.eq.i64" => IrBuilder::emit_cmp_eq_i64,
        "cmp.ne.i64" => IrBuilder::emit_cmp_ne_i64,
        "cmp.lt.i64" => IrBuilder::emit_cmp_lt_i64,
        "cmp.le.i64" => IrBuilder::emit_cmp_le_i64,
        "cmp.gt.i64" => IrBuilder::emit_cmp_gt_i64,
        "cmp.ge.i64" => IrBuilder::emit_cmp_ge_i64,
        "cmp.lt.u64" => IrBuilder::emit_cmp_lt_u64,
        "cmp.le.u64" => IrBuilder::emit_cmp_le_u64,
        "cmp.gt.u64" => IrBuilder::emit_cmp_gt_u64,
        "cmp.ge.u64" => IrBuilder::emit_cmp_ge_u64,
        "cmp.eq.f32" => IrBuilder::emit_cmp_eq_f32,
        "cmp.lt.f32" => IrBuilder::emit_cmp_lt_f32,
        "cmp.le.f32" => IrBuilder::emit_cmp_le_f32,
        "cmp.eq.f64" => IrBuilder::emit_cmp_eq_f64,
        "cmp.lt.f64" => IrBuilder::emit_cmp_lt_f64,
        "cmp.le.f64" => IrBuilder::emit_cmp_le_f64,
        "bool.not" => IrBuilder::emit_bool_not,
        "bool.and" => IrBuilder::emit_bool_and,
        "bool.or" => IrBuilder::emit_bool_or,
        "and.i32" => IrBuilder::emit_and_i32,
        "or.i32" => IrBuilder::emit_or_i32,
        "xor.i32" => IrBuilder::emit_xor_i32,
        "shl.i32" => IrBuilder::emit_shl_i32,
        "shr.i32" => IrBuilder::emit_shr_i32,
        "shr.u32" => IrBuilder::emit_shr_u32,
        "and.i64" => IrBuilder::emit_and_i64,
        "or.i64" => IrBuilder::emit_or_i64,
        "xor.i64" => IrBuilder::emit_xor_i64,
        "shl.i64" => IrBuilder::emit_shl_i64,
        "shr.i64" => IrBuilder::emit_shr_i64,
        "shr.u64" => IrBuilder::emit_shr_u64,
        "conv.i32.i64" => IrBuilder::emit_conv_i32_i64,
        "conv.i64.i32" => IrBuilder::emit_conv_i64_i32,
        "conv.i32.f32" => IrBuilder::emit_conv_i32_f32,
        "conv.i32.f64" => IrBuilder::emit_conv_i32_f64,
        "conv.f32.i32" => IrBuilder::emit_conv_f32_i32,
        "conv.f64.i32" => IrBuilder::emit_conv_f64_i32,
        "conv.f32.f64" => IrBuilder::emit_conv_f32_f64,
        "conv.f64.f32" => IrBuilder::emit_conv_f64_f32,
        "array.len" => IrBuilder::emit_array_len,
        "array.get" => IrBuilder::emit_array_get,
        "array.set" => IrBuilder::emit_array_set,
        "list.len" => IrBuilder::emit_list_len,
        "list.get" => IrBuilder::emit_list_get,
        "list.set" => IrBuilder::emit_list_set,
        "list.push" => IrBuilder::emit_list_push,
        "list.pop" => IrBuilder::emit_list_pop,
        "list.insert" => IrBuilder::emit_list_insert,
        "list.remove" => IrBuilder::emit_list_remove,
        "list.clear" => IrBuilder::emit_list_clear,
        "string.len" => IrBuilder::emit_string_len,
        "string.concat" => IrBuilder::emit_string_concat,
        "string.get.char" => IrBuilder::emit_string_get_char,
        "string.slice" => IrBuilder::emit_string_slice,
        "nop" => IrBuilder::emit_nop,
        "pop" => IrBuilder::emit_pop,
        "dup" => IrBuilder::emit_dup,
        "dup2" => IrBuilder::emit_dup2,
        "swap" => IrBuilder::emit_swap,
        "rot" => IrBuilder::emit_rot,
        "ret" => IrBuilder::emit_ret,
        "callcheck" => IrBuilder::emit_callcheck,
        "typeof" => IrBuilder::emit_typeof,
        "isnull" => IrBuilder::emit_isnull,
        "ref.eq" => IrBuilder::emit_ref_eq,
        "ref.ne" => IrBuilder::emit_ref_ne,
        "const.null" => IrBuilder::emit_const_null,
        _ => return None,
    })
}

#[allow(clippy::too_many_lines)]
fn lower_function(decl: &FunctionDecl, ctx: &LoweringContext<'_>, warnings: &mut Vec<String>) -> Result<Vec<u8>, LowerError> {
    let mut b = IrBuilder::new();
    let mut locals = BTreeMap::new();
    for (i, slot) in decl.local_names.iter().enumerate() {
        locals.insert(slot.name.clone(), i as u32);
    }
    let mut upvalues = BTreeMap::new();
    for (i, slot) in decl.upvalue_names.iter().enumerate() {
        upvalues.insert(slot.name.clone(), i as u32);
    }

    let mut labels: BTreeMap<String, IrLabel> = BTreeMap::new();
    for item in &decl.items {
        if let FuncItem::Label { name, line } = item {
            if labels.contains_key(name) {
                return Err(LowerError::DuplicateName { kind: "label", name: name.clone(), line: *line });
            }
            labels.insert(name.clone(), b.create_label());
        }
    }

    let resolve_label = |name: &str, line: u32| -> Result<IrLabel, LowerError> {
        labels.get(name).copied().ok_or_else(|| LowerError::UndefinedName { kind: "label", name: name.to_string(), line })
    };

    for item in &decl.items {
        match item {
            FuncItem::Label { name, .. } => {
                b.bind_label(*labels.get(name).expect("label registered in pre-walk")).map_err(|e| LowerError::Label { function: decl.name.clone(), source: e })?;
            }
            FuncItem::Instr { mnemonic, args, line } => {
                let line = *line;
                let normalized = normalize_mnemonic(mnemonic);
                if let Some(f) = simple_op(&normalized) {
                    if !args.is_empty() {
                        let msg = format!("ignoring {} extra operand(s) for '{mnemonic}' at line {line}", args.len());
                        if ctx.options.deny_warnings {
                            return Err(LowerError::DeniedWarning(msg));
                        }
                        warnings.push(msg);
                    }
                    f(&mut b);
                    continue;
                }

                match mnemonic.as_str() {
                    "enter" => {
                        let a = require_args(args, 1, mnemonic, line)?;
                        b.emit_enter(parse_unsigned_literal(&a[0], line, "u16")?);
                    }
                    "const.i8" => b.emit_const_i8(parse_signed_literal(&require_args(args, 1, mnemonic, line)?[0], line, "i8")?),
                    "const.i16" => b.emit_const_i16(parse_signed_literal(&require_args(args, 1, mnemonic, line)?[0], line, "i16")?),
                    "const.i32" => b.emit_const_i32(parse_signed_literal(&require_args(args, 1, mnemonic, line)?[0], line, "i32")?),
                    "const.i64" => b.emit_const_i64(parse_signed_literal(&require_args(args, 1, mnemonic, line)?[0], line, "i64")?),
                    "const.u8" => b.emit_const_u8(parse_unsigned_literal(&require_args(args, 1, mnemonic, line)?[0], line, "u8")?),
                    "const.u16" => b.emit_const_u16(parse_unsigned_literal(&require_args(args, 1, mnemonic, line)?[0], line, "u16")?),
                    "const.u32" => b.emit_const_u32(parse_unsigned_literal(&require_args(args, 1, mnemonic, line)?[0], line, "u32")?),
                    "const.u64" => b.emit_const_u64(parse_unsigned_literal(&require_args(args, 1, mnemonic, line)?[0], line, "u64")?),
                    "const.f32" => b.emit_const_f32(parse_literal(&require_args(args, 1, mnemonic, line)?[0], line, "f32")?),
                    "const.f64" => b.emit_const_f64(parse_literal(&require_args(args, 1, mnemonic, line)?[0], line, "f64")?),
                    "const.bool" => {
                        let a = &require_args(args, 1, mnemonic, line)?[0];
                        b.emit_const_bool(a == "true" || a == "1");
                    }
                    "const.char" => b.emit_const_char(parse_char_literal(&require_args(args, 1, mnemonic, line)?[0], line)?),
                    "const.string" => {
                        let a = &require_args(args, 1, mnemonic, line)?[0];
                        let (offset, kind) = ctx
                            .consts
                            .get(a)
                            .ok_or_else(|| LowerError::UndefinedName { kind: "const", name: a.clone(), line })?;
                        if kind != "string" {
                            return Err(LowerError::BadOperand { mnemonic: mnemonic.clone(), message: format!("'{a}' is not a string constant"), line });
                        }
                        b.emit_const_string(*offset);
                    }
                    "jmp" => b.emit_jmp(resolve_label(&require_args(args, 1, mnemonic, line)?[0], line)?),
                    "jmp.true" => b.emit_jmp_true(resolve_label(&require_args(args, 1, mnemonic, line)?[0], line)?),
                    "jmp.false" => b.emit_jmp_false(resolve_label(&require_args(args, 1, mnemonic, line)?[0], line)?),
                    "jmptable" => {
                        let default_idx = args
                            .iter()
                            .position(|a| a.starts_with("default="))
                            .ok_or_else(|| LowerError::BadOperand { mnemonic: mnemonic.clone(), message: "missing default=<label>".to_string(), line })?;
                        let default_name = args[default_idx].trim_start_matches("default=");
                        let mut cases = Vec::with_capacity(default_idx);
                        for a in &args[..default_idx] {
                            cases.push(resolve_label(a, line)?);
                        }
                        let default = resolve_label(default_name, line)?;
                        b.emit_jmp_table(&cases, default);
                    }
                    "call" => {
                        let a = require_args(args, 2, mnemonic, line)?;
                        let func_id = resolve_index(ctx.funcs, &a[0], line, "function")?;
                        b.emit_call(func_id, parse_unsigned_literal(&a[1], line, "u8")?);
                    }
                    "call.indirect" => {
                        let a = require_args(args, 2, mnemonic, line)?;
                        let sig_id = *ctx.sigs.get(&a[0]).ok_or_else(|| LowerError::UndefinedName { kind: "sig", name: a[0].clone(), line })?;
                        b.emit_call_indirect(sig_id, parse_unsigned_literal(&a[1], line, "u8")?);
                    }
                    "tailcall" => {
                        let a = require_args(args, 2, mnemonic, line)?;
                        let func_id = resolve_index(ctx.funcs, &a[0], line, "function")?;
                        b.emit_tailcall(func_id, parse_unsigned_literal(&a[1], line, "u8")?);
                    }
                    "intrinsic" => {
                        let a = &require_args(args, 1, mnemonic, line)?[0];
                        let id = *ctx.intrinsics.get(a).ok_or_else(|| LowerError::UndefinedName { kind: "intrinsic", name: a.clone(), line })?;
                        b.emit_intrinsic(id);
                    }
                    "syscall" => {
                        let a = &require_args(args, 1, mnemonic, line)?[0];
                        let id = *ctx.syscalls.get(a).ok_or_else(|| LowerError::UndefinedName { kind: "syscall", name: a.clone(), line })?;
                        b.emit_syscall(id);
                    }
                    "ldloc" => b.emit_ldloc(resolve_index(&locals, &require_args(args, 1, mnemonic, line)?[0], line, "local")?),
                    "stloc" => b.emit_stloc(resolve_index(&locals, &require_args(args, 1, mnemonic, line)?[0], line, "local")?),
                    "ldglob" => b.emit_ldglob(resolve_index(ctx.globals, &require_args(args, 1, mnemonic, line)?[0], line, "global")?),
                    "stglob" => b.emit_stglob(resolve_index(ctx.globals, &require_args(args, 1, mnemonic, line)?[0], line, "global")?),
                    "ldupv" => b.emit_ldupv(resolve_index(&upvalues, &require_args(args, 1, mnemonic, line)?[0], line, "upvalue")?),
                    "stupv" => b.emit_stupv(resolve_index(&upvalues, &require_args(args, 1, mnemonic, line)?[0], line, "upvalue")?),
                    "newobj" => {
                        let a = &require_args(args, 1, mnemonic, line)?[0];
                        let type_id = *ctx.types.name_to_id.get(a).ok_or_else(|| LowerError::UndefinedName { kind: "type", name: a.clone(), line })?;
                        b.emit_newobj(type_id);
                    }
                    "ldfld" | "stfld" => {
                        let a = &require_args(args, 1, mnemonic, line)?[0];
                        let field_id = *ctx.fields.get(a).ok_or_else(|| LowerError::UndefinedName { kind: "field", name: a.clone(), line })?;
                        if field_id == AMBIGUOUS_FIELD {
                            return Err(LowerError::AmbiguousField { name: a.clone(), line });
                        }
                        if mnemonic == "ldfld" { b.emit_ldfld(field_id); } else { b.emit_stfld(field_id); }
                    }
                    "newclosure" => {
                        let a = require_args(args, 2, mnemonic, line)?;
                        let func_id = resolve_index(ctx.funcs, &a[0], line, "function")?;
                        b.emit_newclosure(func_id, parse_unsigned_literal(&a[1], line, "u8")?);
                    }
                    "newarray" => {
                        let a = require_args(args, 2, mnemonic, line)?;
                        let type_id = *ctx.types.name_to_id.get(&a[0]).ok_or_else(|| LowerError::UndefinedName { kind: "type", name: a[0].clone(), line })?;
                        b.emit_newarray(type_id, parse_unsigned_literal(&a[1], line, "u32")?);
                    }
                    "newlist" => {
                        let a = require_args(args, 2, mnemonic, line)?;
                        let type_id = *ctx.types.name_to_id.get(&a[0]).ok_or_else(|| LowerError::UndefinedName { kind: "type", name: a[0].clone(), line })?;
                        b.emit_newlist(type_id, parse_unsigned_literal(&a[1], line, "u32")?);
                    }
                    _ => return Err(LowerError::UnknownInstruction { mnemonic: mnemonic.clone(), line }),
                }
            }
        }
    }

    b.finish().map_err(|e| LowerError::Label { function: decl.name.clone(), source: e })
}

/// Abaisse un module symbolique entièrement en `SbcModule` résolu.
pub fn lower(module: &SymbolicModule, options: &LowerOptions) -> Result<SbcModule, LowerError> {
    let mut out = SbcModule::default();
    let mut warnings: Vec<String> = Vec::new();

    let mut type_table = register_builtin_types(&mut out.const_pool);
    let mut fields: Vec<FieldRow> = Vec::new();
    let mut field_name_to_id: BTreeMap<String, u32> = BTreeMap::new();
    register_user_types(&mut type_table, &mut fields, &mut field_name_to_id, &module.types, &mut out.const_pool)?;

    let (sig_rows, sig_name_to_id) = resolve_sig_list(&module.sigs, &type_table, &mut out.const_pool)?;

    let const_map = register_consts(&module.consts, &mut out.const_pool)?;

    let mut func_name_to_id: BTreeMap<String, u32> = BTreeMap::new();
    for (i, f) in module.functions.iter().enumerate() {
        if func_name_to_id.insert(f.name.clone(), i as u32).is_some() {
            return Err(LowerError::DuplicateName { kind: "function", name: f.name.clone(), line: f.line });
        }
    }

    let imports = register_imports(&module.imports, &sig_name_to_id, &mut out.const_pool, module.functions.len() as u32)?;
    for (name, id) in &imports.func_ids {
        func_name_to_id.insert(name.clone(), *id);
    }

    let (global_rows, global_name_to_id) = register_globals(&module.globals, &type_table, &const_map, &mut out.const_pool)?;

    let ctx = LoweringContext {
        types: &type_table,
        sigs: &sig_name_to_id,
        consts: &const_map,
        fields: &field_name_to_id,
        globals: &global_name_to_id,
        funcs: &func_name_to_id,
        syscalls: &imports.syscall_ids,
        intrinsics: &imports.intrinsic_ids,
        options,
    };

    let mut methods = Vec::with_capacity(module.functions.len());
    let mut functions = Vec::with_capacity(module.functions.len());
    let mut code: Vec<u8> = Vec::new();

    for decl in &module.functions {
        let sig_id = *sig_name_to_id
            .get(&decl.sig)
            .ok_or_else(|| LowerError::UndefinedName { kind: "sig", name: decl.sig.clone(), line: decl.line })?;
        let body = lower_function(decl, &ctx, &mut warnings)?;
        let name_str = out.const_pool.intern_string(&decl.name);
        let code_offset = code.len() as u32;
        let code_size = body.len() as u32;
        code.extend_from_slice(&body);

        methods.push(MethodRow { name_str, sig_id, code_offset, local_count: decl.locals_count, flags: 0 });
        functions.push(FunctionRow { method_id: methods.len() as u32 - 1, code_offset, code_size, stack_max: decl.stack });
    }

    let entry_method_id = match &module.entry_name {
        None => NO_ENTRY,
        Some(name) => {
            let idx = module
                .functions
                .iter()
                .position(|f| &f.name == name)
                .ok_or_else(|| LowerError::UndefinedEntry(name.clone()))?;
            idx as u32
        }
    };

    let exports: Vec<ExportRow> = module
        .functions
        .iter()
        .enumerate()
        .filter(|(_, f)| f.name == "main" || Some(&f.name) == module.entry_name.as_ref())
        .map(|(i, f)| ExportRow { name_str: out.const_pool.intern_string(&f.name), func_id: i as u32, flags: 0, reserved: 0 })
        .collect();

    out.types = type_table.rows;
    out.fields = fields;
    out.sigs = sig_rows;
    out.globals = global_rows;
    out.functions = functions;
    out.imports = imports.rows;
    out.exports = exports;
    out.syscalls = imports.syscall_ids.values().copied().collect();
    out.code = code;
    out.entry_method_id = entry_method_id;
    out.methods = methods;
    out.debug = None;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::parse;

    fn lower_src(src: &str) -> SbcModule {
        let module = parse(src).unwrap();
        lower(&module, &LowerOptions::default()).unwrap()
    }

    #[test]
    fn lowers_arithmetic_scenario() {
        let src = "sigs:\nmainSig ret=i32 params=\n\nfunc main locals=0 stack=8 sig=mainSig\nenter 0\nconst.i32 7\nconst.i32 5\nadd.i32\nret\nend\n\nentry main\n";
        let m = lower_src(src);
        assert_eq!(m.functions.len(), 1);
        assert_eq!(m.entry_method_id, 0);
        assert!(m.code.len() > 0);
    }

    #[test]
    fn lowers_loop_with_forward_and_backward_jumps() {
        let src = "sigs:\nmainSig ret=i32 params=\n\nfunc main locals=1 stack=8 sig=mainSig\nlocals: i:i32\nenter 1\nconst.i32 0\nstloc i\ntop:\nldloc i\nconst.i32 3\ncmp.lt.i32\njmp.false done\nldloc i\nconst.i32 1\nadd.i32\nstloc i\njmp top\ndone:\nldloc i\nret\nend\nentry main\n";
        let m = lower_src(src);
        assert_eq!(m.functions.len(), 1);
    }

    #[test]
    fn resolves_artifact_field_access() {
        let src = "types:\nPoint kind=artifact size=8\nfield x type=i32 offset=0\nfield y type=i32 offset=4\n\nsigs:\nmainSig ret=i32 params=\n\nfunc main locals=1 stack=8 sig=mainSig\nlocals: p:ref\nenter 1\nnewobj Point\nstloc p\nldloc p\nldfld x\nret\nend\nentry main\n";
        let m = lower_src(src);
        assert_eq!(m.types.iter().filter(|t| t.kind == TypeKind::Ref && t.flags == ARTIFACT_FLAG).count(), 1);
        assert_eq!(m.fields.len(), 2);
    }

    #[test]
    fn rejects_ambiguous_field_reference() {
        let src = "types:\nA kind=artifact size=4\nfield v type=i32 offset=0\nB kind=artifact size=4\nfield v type=i32 offset=0\n\nsigs:\nmainSig ret=void params=\n\nfunc main locals=0 stack=4 sig=mainSig\nenter 0\nnewobj A\nldfld v\nret\nend\n";
        let module = parse(src).unwrap();
        let err = lower(&module, &LowerOptions::default()).unwrap_err();
        assert!(matches!(err, LowerError::AmbiguousField { .. }));
    }

    #[test]
    fn qualified_type_dot_field_resolves_an_ambiguous_name() {
        let src = "types:\nA kind=artifact size=4\nfield v type=i32 offset=0\nB kind=artifact size=4\nfield v type=i32 offset=0\n\nsigs:\nmainSig ret=i32 params=\n\nfunc main locals=0 stack=4 sig=mainSig\nenter 0\nnewobj B\nconst.i32 9\nstfld B.v\nnewobj B\nldfld B.v\nret\nend\nentry main\n";
        let module = parse(src).unwrap();
        let m = lower(&module, &LowerOptions::default()).expect("qualified field name should resolve");
        assert_eq!(m.fields.len(), 2);
    }

    #[test]
    fn void_return_uses_sentinel_ret_type() {
        let src = "sigs:\nvoidSig ret=void params=\n";
        let module = parse(src).unwrap();
        let m = lower(&module, &LowerOptions::default()).unwrap();
        assert_eq!(m.sigs[0].ret_type_id, AMBIGUOUS_FIELD);
    }

    #[test]
    fn rejects_undefined_entry() {
        let src = "entry nope\n";
        let module = parse(src).unwrap();
        assert!(matches!(lower(&module, &LowerOptions::default()), Err(LowerError::UndefinedEntry(_))));
    }

    #[test]
    fn zero_init_global_uses_no_init_sentinel() {
        let src = "globals:\ncounter type=i32\n";
        let module = parse(src).unwrap();
        let m = lower(&module, &LowerOptions::default()).unwrap();
        assert_eq!(m.globals[0].init_const_id, GlobalRow::NO_INIT);
    }

    #[test]
    fn string_global_init_resolves_named_const() {
        let src = "consts:\ngreeting string \"hi\"\n\nglobals:\nmsg type=string init=greeting\n";
        let module = parse(src).unwrap();
        let m = lower(&module, &LowerOptions::default()).unwrap();
        let rec = m.const_pool.read_record_at(m.globals[0].init_const_id).unwrap();
        assert_eq!(m.const_pool.resolve_string(rec).unwrap(), "hi");
    }

    #[test]
    fn deny_warnings_promotes_extra_operand_warning_to_error() {
        let src = "sigs:\nmainSig ret=void params=\n\nfunc main locals=0 stack=4 sig=mainSig\nenter 0\nret extra\nend\n";
        let module = parse(src).unwrap();
        let opts = LowerOptions { deny_warnings: true };
        assert!(matches!(lower(&module, &opts), Err(LowerError::DeniedWarning(_))));
    }

    #[test]
    fn hex_integer_literal_operand_yields_correct_value() {
        let src = "sigs:\nmainSig ret=i32 params=\n\nfunc main locals=0 stack=8 sig=mainSig\nenter 0\nconst.i32 0x7F\nret\nend\nentry main\n";
        let m = lower_src(src);
        // `enter 0` is opcode(1) + u16(2) = 3 bytes; const.i32 is opcode(1) + i32(4).
        let value = i32::from_le_bytes(m.code[4..8].try_into().unwrap());
        assert_eq!(value, 127);
    }

    #[test]
    fn binary_integer_literal_operand_yields_correct_value() {
        let src = "sigs:\nmainSig ret=i32 params=\n\nfunc main locals=0 stack=8 sig=mainSig\nenter 0\nconst.i32 0b1010\nret\nend\nentry main\n";
        let m = lower_src(src);
        let value = i32::from_le_bytes(m.code[4..8].try_into().unwrap());
        assert_eq!(value, 10);
    }

    #[test]
    fn hex_and_binary_literals_are_accepted_in_consts_section() {
        let src = "consts:\nflagHex i32 0x7F\nflagBin i32 0b1010\n";
        let module = parse(src).unwrap();
        let m = lower(&module, &LowerOptions::default()).unwrap();
        let hex_rec = m.const_pool.read_record_at(0).unwrap();
        assert_eq!(hex_rec.payload as u32 as i32, 127);
    }

    #[test]
    fn unsigned_operand_rejects_negative_literal() {
        let src = "sigs:\nmainSig ret=void params=\n\nfunc main locals=0 stack=4 sig=mainSig\nenter 0\nconst.u32 -1\nret\nend\n";
        let module = parse(src).unwrap();
        let err = lower(&module, &LowerOptions::default()).unwrap_err();
        assert!(matches!(err, LowerError::BadOperand { .. }));
    }

    #[test]
    fn out_of_range_hex_literal_is_rejected() {
        let src = "sigs:\nmainSig ret=void params=\n\nfunc main locals=0 stack=4 sig=mainSig\nenter 0\nconst.i8 0xFFF\nret\nend\n";
        let module = parse(src).unwrap();
        let err = lower(&module, &LowerOptions::default()).unwrap_err();
        assert!(matches!(err, LowerError::BadOperand { .. }));
    }

    #[test]
    fn misaligned_field_offset_is_rejected_at_lower_time() {
        let src = "types:\nA kind=artifact size=8\nfield v type=i32 offset=2\n";
        let module = parse(src).unwrap();
        let err = lower(&module, &LowerOptions::default()).unwrap_err();
        assert!(matches!(err, LowerError::BadField { .. }));
    }

    #[test]
    fn field_offset_overflowing_owner_size_is_rejected_at_lower_time() {
        let src = "types:\nA kind=artifact size=4\nfield v type=i64 offset=0\n";
        let module = parse(src).unwrap();
        let err = lower(&module, &LowerOptions::default()).unwrap_err();
        assert!(matches!(err, LowerError::BadField { .. }));
    }

    #[test]
    fn char_literal_beyond_the_bmp_is_rejected() {
        let src = "sigs:\nmainSig ret=void params=\n\nfunc main locals=0 stack=4 sig=mainSig\nenter 0\nconst.char 0x1F600\nret\nend\n";
        let module = parse(src).unwrap();
        let err = lower(&module, &LowerOptions::default()).unwrap_err();
        assert!(matches!(err, LowerError::BadOperand { .. }));
    }
}
