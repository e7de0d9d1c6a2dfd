//! Analyseur syntaxique de l'IR textuel (§4.1/§6.2).
//!
//! Ligne par ligne ; `;` et `#` introduisent un commentaire jusqu'à la fin
//! de la ligne. Les sections `types:`, `sigs:`, `consts:`, `imports:`,
//! `globals:` précèdent une suite de lignes jusqu'à la prochaine section,
//! déclaration de fonction (`func …`) ou ligne `entry …`. Un bloc fonction
//! s'ouvre avec `func <name> [locals=N] [stack=N] [sig=<name>]` et se ferme
//! sur une ligne ne contenant que `end`.
//!
//! Ce module ne résout aucun nom : il se contente de produire un
//! [`SymbolicModule`] où toute référence croisée est encore une chaîne.
//! La résolution est la responsabilité de [`crate::lower`].

#[cfg(not(feature = "std"))]
use alloc::{format, string::String, string::ToString, vec::Vec};

/// Erreur de syntaxe de l'IR textuel. Porte toujours le numéro de ligne
/// (1-based) où l'échec a été détecté.
#[derive(Debug)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum ParseError {
    /// `"<message> at line <N>"` — catégorie unique `TextualParseError`.
    #[cfg_attr(feature = "errors", error("{message} at line {line}"))]
    Textual {
        /// Numéro de ligne 1-based.
        line: u32,
        /// Description de l'échec.
        message: String,
    },
}

impl ParseError {
    fn at(line: u32, message: impl Into<String>) -> Self {
        ParseError::Textual { line, message: message.into() }
    }
}

#[cfg(not(feature = "errors"))]
impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseError::Textual { line, message } => write!(f, "{message} at line {line}"),
        }
    }
}

#[cfg(all(feature = "std", not(feature = "errors")))]
impl std::error::Error for ParseError {}

/// Déclaration symbolique d'un champ à l'intérieur d'un type composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    /// Nom du champ.
    pub name: String,
    /// Nom du type du champ (résolu par le lowerer).
    pub type_name: String,
    /// Offset déclaré, en octets.
    pub offset: u32,
    /// Ligne source, pour les diagnostics du lowerer.
    pub line: u32,
}

/// Déclaration symbolique d'un type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    /// Nom du type.
    pub name: String,
    /// `kind=` : soit un nom de type primitif existant, soit `artifact`
    /// pour un type composite porteur de champs.
    pub kind: String,
    /// Taille déclarée, en octets.
    pub size: u32,
    /// Champs déclarés pour un type composite (vide sinon).
    pub fields: Vec<FieldDecl>,
    /// Ligne source.
    pub line: u32,
}

/// Déclaration symbolique d'une signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigDecl {
    /// Nom de la signature.
    pub name: String,
    /// Nom du type de retour, ou `"void"`.
    pub ret: String,
    /// Noms des types de paramètres, dans l'ordre.
    pub params: Vec<String>,
    /// Ligne source.
    pub line: u32,
}

/// Déclaration symbolique d'une constante nommée.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstDecl {
    /// Nom de la constante.
    pub name: String,
    /// Catégorie littérale (`i32`, `i64`, `f32`, `f64`, `bool`, `char`,
    /// `string`).
    pub kind: String,
    /// Texte littéral non encore interprété.
    pub literal: String,
    /// Ligne source.
    pub line: u32,
}

/// Déclaration symbolique d'un import (§4.2 étape 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDecl {
    /// `syscall NAME ID`.
    Syscall {
        /// Nom symbolique.
        name: String,
        /// Identifiant numéroté par l'hôte.
        id: u32,
        /// Ligne source.
        line: u32,
    },
    /// `intrinsic NAME ID`.
    Intrinsic {
        /// Nom symbolique.
        name: String,
        /// Identifiant de l'intrinsèque.
        id: u32,
        /// Ligne source.
        line: u32,
    },
    /// `import NAME MODULE SYMBOL sig=<sig>`.
    Import {
        /// Nom local utilisé pour référencer cet import.
        name: String,
        /// Nom du module hôte.
        module: String,
        /// Nom du symbole dans ce module.
        symbol: String,
        /// Nom de la signature attendue.
        sig: String,
        /// Ligne source.
        line: u32,
    },
}

/// Déclaration symbolique d'une globale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDecl {
    /// Nom de la globale.
    pub name: String,
    /// Nom de son type.
    pub type_name: String,
    /// Initialiseur optionnel : littéral numérique ou nom d'une constante
    /// déclarée. Absent : zéro-init.
    pub init: Option<String>,
    /// Ligne source.
    pub line: u32,
}

/// Déclaration symbolique d'un local ou d'un upvalue (`locals:`/`upvalues:`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDecl {
    /// Nom du slot.
    pub name: String,
    /// Type annoté, s'il est présent.
    pub type_name: Option<String>,
}

/// Un élément du corps d'une fonction : soit une définition de label, soit
/// une instruction avec ses opérandes textuels encore non résolus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuncItem {
    /// `<name>:` — définit un label à cette position du flux d'instructions.
    Label {
        /// Nom du label.
        name: String,
        /// Ligne source.
        line: u32,
    },
    /// Une instruction : mnémonique en minuscules et ses opérandes bruts.
    Instr {
        /// Mnémonique (déjà mis en minuscules).
        mnemonic: String,
        /// Opérandes, dans l'ordre d'apparition.
        args: Vec<String>,
        /// Ligne source.
        line: u32,
    },
}

/// Déclaration symbolique d'une fonction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    /// Nom de la fonction.
    pub name: String,
    /// Attribut `locals=N` (nombre de slots locaux réservés par `enter`).
    pub locals_count: u16,
    /// Attribut `stack=N` (profondeur de pile maximale annoncée).
    pub stack: u32,
    /// Nom de la signature associée.
    pub sig: String,
    /// Noms des slots locaux déclarés par `locals:` (peut être plus court
    /// que `locals_count` — les slots restants sont anonymes).
    pub local_names: Vec<SlotDecl>,
    /// Noms des upvalues déclarés par `upvalues:`.
    pub upvalue_names: Vec<SlotDecl>,
    /// Labels et instructions, dans l'ordre textuel.
    pub items: Vec<FuncItem>,
    /// Ligne source (celle du `func`).
    pub line: u32,
}

/// Module symbolique : sortie du parseur, entrée du lowerer. Toute
/// référence croisée (type, sig, const, local, label…) est encore un nom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolicModule {
    /// Types déclarés, dans l'ordre textuel.
    pub types: Vec<TypeDecl>,
    /// Signatures déclarées.
    pub sigs: Vec<SigDecl>,
    /// Constantes nommées déclarées.
    pub consts: Vec<ConstDecl>,
    /// Imports déclarés.
    pub imports: Vec<ImportDecl>,
    /// Globales déclarées.
    pub globals: Vec<GlobalDecl>,
    /// Fonctions déclarées.
    pub functions: Vec<FunctionDecl>,
    /// Nom de la fonction d'entrée (ligne `entry <name>`).
    pub entry_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Types,
    Sigs,
    Consts,
    Imports,
    Globals,
}

fn strip_comment(line: &str) -> &str {
    let mut end = line.len();
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' | '#' if !in_quotes => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    &line[..end]
}

fn split_kv(tok: &str) -> Option<(&str, &str)> { tok.split_once('=') }

/// Analyse un programme IR textuel complet en [`SymbolicModule`].
///
/// N'émet jamais de module partiel : la première erreur rencontrée arrête
/// l'analyse et est retournée telle quelle.
pub fn parse(source: &str) -> Result<SymbolicModule, ParseError> {
    let mut module = SymbolicModule::default();
    let mut section = Section::None;
    let mut current_type: Option<usize> = None;

    let mut lines = source.lines().enumerate().peekable();
    while let Some((idx, raw_line)) = lines.next() {
        let line_no = idx as u32 + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if line == "types:" {
            section = Section::Types;
            current_type = None;
            continue;
        }
        if line == "sigs:" {
            section = Section::Sigs;
            continue;
        }
        if line == "consts:" {
            section = Section::Consts;
            continue;
        }
        if line == "imports:" {
            section = Section::Imports;
            continue;
        }
        if line == "globals:" {
            section = Section::Globals;
            continue;
        }

        if let Some(rest) = line.strip_prefix("entry ") {
            if module.entry_name.is_some() {
                return Err(ParseError::at(line_no, "duplicate entry directive"));
            }
            module.entry_name = Some(rest.trim().to_string());
            section = Section::None;
            continue;
        }

        if let Some(rest) = line.strip_prefix("func ") {
            section = Section::None;
            let func = parse_function(rest, line_no, &mut lines)?;
            module.functions.push(func);
            continue;
        }

        match section {
            Section::Types => {
                if let Some(field_line) = line.strip_prefix("field ") {
                    let ty_idx = current_type.ok_or_else(|| {
                        ParseError::at(line_no, "field declaration outside of a type")
                    })?;
                    let field = parse_field_line(field_line, line_no)?;
                    module.types[ty_idx].fields.push(field);
                } else {
                    let decl = parse_type_line(line, line_no)?;
                    current_type = Some(module.types.len());
                    module.types.push(decl);
                }
            }
            Section::Sigs => module.sigs.push(parse_sig_line(line, line_no)?),
            Section::Consts => module.consts.push(parse_const_line(line, line_no)?),
            Section::Imports => module.imports.push(parse_import_line(line, line_no)?),
            Section::Globals => module.globals.push(parse_global_line(line, line_no)?),
            Section::None => {
                return Err(ParseError::at(line_no, format!("unexpected line outside any section: {line}")));
            }
        }
    }

    Ok(module)
}

fn tokens(line: &str) -> Vec<&str> { line.split_whitespace().collect() }

fn parse_type_line(line: &str, line_no: u32) -> Result<TypeDecl, ParseError> {
    let toks = tokens(line);
    let Some((&name, attrs)) = toks.split_first() else {
        return Err(ParseError::at(line_no, "empty type declaration"));
    };
    let mut kind = None;
    let mut size = None;
    for tok in attrs {
        match split_kv(tok) {
            Some(("kind", v)) => kind = Some(v.to_string()),
            Some(("size", v)) => {
                size = Some(v.parse::<u32>().map_err(|_| {
                    ParseError::at(line_no, format!("invalid type size: {v}"))
                })?);
            }
            _ => return Err(ParseError::at(line_no, format!("unknown type attribute: {tok}"))),
        }
    }
    let kind = kind.ok_or_else(|| ParseError::at(line_no, "type declaration missing kind="))?;
    let size = size.ok_or_else(|| ParseError::at(line_no, "type declaration missing size="))?;
    Ok(TypeDecl { name: name.to_string(), kind, size, fields: Vec::new(), line: line_no })
}

fn parse_field_line(line: &str, line_no: u32) -> Result<FieldDecl, ParseError> {
    let toks = tokens(line);
    let Some((&name, attrs)) = toks.split_first() else {
        return Err(ParseError::at(line_no, "empty field declaration"));
    };
    let mut type_name = None;
    let mut offset = None;
    for tok in attrs {
        match split_kv(tok) {
            Some(("type", v)) => type_name = Some(v.to_string()),
            Some(("offset", v)) => {
                offset = Some(v.parse::<u32>().map_err(|_| {
                    ParseError::at(line_no, format!("invalid field offset: {v}"))
                })?);
            }
            _ => return Err(ParseError::at(line_no, format!("unknown field attribute: {tok}"))),
        }
    }
    let type_name = type_name.ok_or_else(|| ParseError::at(line_no, "field declaration missing type="))?;
    let offset = offset.ok_or_else(|| ParseError::at(line_no, "field declaration missing offset="))?;
    Ok(FieldDecl { name: name.to_string(), type_name, offset, line: line_no })
}

fn parse_sig_line(line: &str, line_no: u32) -> Result<SigDecl, ParseError> {
    let toks = tokens(line);
    let Some((&name, attrs)) = toks.split_first() else {
        return Err(ParseError::at(line_no, "empty signature declaration"));
    };
    let mut ret = None;
    let mut params = Vec::new();
    for tok in attrs {
        match split_kv(tok) {
            Some(("ret", v)) => ret = Some(v.to_string()),
            Some(("params", v)) => {
                if !v.is_empty() {
                    params = v.split(',').map(str::to_string).collect();
                }
            }
            _ => return Err(ParseError::at(line_no, format!("unknown sig attribute: {tok}"))),
        }
    }
    let ret = ret.unwrap_or_else(|| "void".to_string());
    Ok(SigDecl { name: name.to_string(), ret, params, line: line_no })
}

fn parse_const_line(line: &str, line_no: u32) -> Result<ConstDecl, ParseError> {
    let toks = tokens(line);
    if toks.len() < 3 {
        return Err(ParseError::at(line_no, "const declaration requires NAME KIND VALUE"));
    }
    let name = toks[0].to_string();
    let kind = toks[1].to_lowercase();
    let literal = if kind == "string" {
        let start = line.find('"').ok_or_else(|| ParseError::at(line_no, "string constant missing opening quote"))?;
        let end = line.rfind('"').filter(|&e| e > start).ok_or_else(|| {
            ParseError::at(line_no, "string constant missing closing quote")
        })?;
        line[start + 1..end].to_string()
    } else {
        toks[2].to_string()
    };
    Ok(ConstDecl { name, kind, literal, line: line_no })
}

fn parse_import_line(line: &str, line_no: u32) -> Result<ImportDecl, ParseError> {
    let toks = tokens(line);
    match toks.as_slice() {
        ["syscall", name, id] => {
            let id = id.parse::<u32>().map_err(|_| ParseError::at(line_no, format!("invalid syscall id: {id}")))?;
            Ok(ImportDecl::Syscall { name: (*name).to_string(), id, line: line_no })
        }
        ["intrinsic", name, id] => {
            let id = id.parse::<u32>().map_err(|_| ParseError::at(line_no, format!("invalid intrinsic id: {id}")))?;
            Ok(ImportDecl::Intrinsic { name: (*name).to_string(), id, line: line_no })
        }
        ["import", name, module_name, symbol, sig_attr] => {
            let (_, sig) = split_kv(sig_attr)
                .filter(|(k, _)| *k == "sig")
                .ok_or_else(|| ParseError::at(line_no, "import missing sig="))?;
            Ok(ImportDecl::Import {
                name: (*name).to_string(),
                module: (*module_name).to_string(),
                symbol: (*symbol).to_string(),
                sig: sig.to_string(),
                line: line_no,
            })
        }
        _ => Err(ParseError::at(line_no, format!("unsupported import kind: {line}"))),
    }
}

fn parse_global_line(line: &str, line_no: u32) -> Result<GlobalDecl, ParseError> {
    let toks = tokens(line);
    let Some((&name, attrs)) = toks.split_first() else {
        return Err(ParseError::at(line_no, "empty global declaration"));
    };
    let mut type_name = None;
    let mut init = None;
    for tok in attrs {
        match split_kv(tok) {
            Some(("type", v)) => type_name = Some(v.to_string()),
            Some(("init", v)) => init = Some(v.to_string()),
            _ => return Err(ParseError::at(line_no, format!("unknown global attribute: {tok}"))),
        }
    }
    let type_name = type_name.ok_or_else(|| ParseError::at(line_no, "global declaration missing type="))?;
    Ok(GlobalDecl { name: name.to_string(), type_name, init, line: line_no })
}

fn parse_slot_list(line: &str) -> Vec<SlotDecl> {
    line.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.split_once(':') {
            Some((n, t)) => SlotDecl { name: n.trim().to_string(), type_name: Some(t.trim().to_string()) },
            None => SlotDecl { name: s.to_string(), type_name: None },
        })
        .collect()
}

fn parse_function<'a>(
    header_rest: &str,
    func_line: u32,
    lines: &mut core::iter::Peekable<impl Iterator<Item = (usize, &'a str)>>,
) -> Result<FunctionDecl, ParseError> {
    let toks = tokens(header_rest);
    let Some((&name, attrs)) = toks.split_first() else {
        return Err(ParseError::at(func_line, "func declaration missing a name"));
    };
    let mut locals_count = 0u16;
    let mut stack = 8u32;
    let mut sig = String::new();
    for tok in attrs {
        match split_kv(tok) {
            Some(("locals", v)) => {
                locals_count = v.parse::<u16>().map_err(|_| {
                    ParseError::at(func_line, format!("invalid locals attribute: {v}"))
                })?;
            }
            Some(("stack", v)) => {
                stack = v.parse::<u32>().map_err(|_| {
                    ParseError::at(func_line, format!("invalid stack attribute: {v}"))
                })?;
            }
            Some(("sig", v)) => sig = v.to_string(),
            _ => return Err(ParseError::at(func_line, format!("unknown func attribute: {tok}"))),
        }
    }

    let mut local_names = Vec::new();
    let mut upvalue_names = Vec::new();
    let mut items = Vec::new();

    loop {
        let Some((idx, raw_line)) = lines.next() else {
            return Err(ParseError::at(func_line, format!("func {name} missing a closing end")));
        };
        let line_no = idx as u32 + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if line == "end" {
            break;
        }
        if let Some(rest) = line.strip_prefix("locals:") {
            local_names = parse_slot_list(rest);
            continue;
        }
        if let Some(rest) = line.strip_prefix("upvalues:") {
            upvalue_names = parse_slot_list(rest);
            continue;
        }
        if let Some(label) = line.strip_suffix(':') {
            if label.is_empty() || label.contains(char::is_whitespace) {
                return Err(ParseError::at(line_no, format!("invalid label: {line}")));
            }
            items.push(FuncItem::Label { name: label.to_string(), line: line_no });
            continue;
        }
        let toks = tokens(line);
        let Some((mnemonic, args)) = toks.split_first() else {
            continue;
        };
        items.push(FuncItem::Instr {
            mnemonic: mnemonic.to_lowercase(),
            args: args.iter().map(|s| (*s).to_string()).collect(),
            line: line_no,
        });
    }

    Ok(FunctionDecl { name: name.to_string(), locals_count, stack, sig, local_names, upvalue_names, items, line: func_line })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_s1_arithmetic() {
        let src = "sigs:\nmainSig ret=i32 params=\n\nfunc main locals=0 stack=8 sig=mainSig\nenter 0\nconst.i32 7\nconst.i32 5\nadd.i32\nret\nend\n\nentry main\n";
        let m = parse(src).unwrap();
        assert_eq!(m.sigs.len(), 1);
        assert_eq!(m.functions.len(), 1);
        assert_eq!(m.entry_name.as_deref(), Some("main"));
        assert_eq!(m.functions[0].items.len(), 5);
    }

    #[test]
    fn parses_labels_and_locals() {
        let src = "func loop locals=1 stack=4 sig=mainSig\nlocals: i:i32\nconst.i32 0\nstloc i\ntop:\nldloc i\nconst.i32 3\ncmp.lt.i32\njmp.false done\nldloc i\nconst.i32 1\nadd.i32\nstloc i\njmp top\ndone:\nldloc i\nret\nend\n";
        let m = parse(src).unwrap();
        let f = &m.functions[0];
        assert_eq!(f.local_names, vec![SlotDecl { name: "i".into(), type_name: Some("i32".into()) }]);
        let labels: Vec<_> = f.items.iter().filter_map(|it| match it {
            FuncItem::Label { name, .. } => Some(name.as_str()),
            _ => None,
        }).collect();
        assert_eq!(labels, vec!["top", "done"]);
    }

    #[test]
    fn reports_line_number_on_error() {
        let src = "globals:\nbad_line_without_attrs\n";
        let err = parse(src).unwrap_err();
        match err {
            ParseError::Textual { line, .. } => assert_eq!(line, 2),
        }
    }

    #[test]
    fn parses_type_with_fields() {
        let src = "types:\nColor kind=artifact size=16\nfield r type=i32 offset=0\nfield g type=i32 offset=4\nfield b type=i32 offset=8\nfield a type=i32 offset=12\n";
        let m = parse(src).unwrap();
        assert_eq!(m.types.len(), 1);
        assert_eq!(m.types[0].fields.len(), 4);
        assert_eq!(m.types[0].fields[0].name, "r");
    }

    #[test]
    fn parses_string_const_with_embedded_spaces() {
        let src = "consts:\nuuid string \"123e4567-e89b-12d3-a456-426614174000\"\n";
        let m = parse(src).unwrap();
        assert_eq!(m.consts[0].literal, "123e4567-e89b-12d3-a456-426614174000");
    }

    #[test]
    fn rejects_unsupported_import_kind() {
        let src = "imports:\nfoo bar baz\n";
        assert!(parse(src).is_err());
    }
}
