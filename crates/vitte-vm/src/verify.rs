//! Vérificateur : interprétation abstraite de la pile, par fonction (§4.6).
//!
//! Chaque fonction est parcourue une seule fois par un parcours en largeur
//! sur son graphe de flot de contrôle : la pile est modélisée comme un
//! vecteur de [`AbstractType`], les locaux comme un environnement partagé
//! pour toute la fonction (un local ne change jamais de famille de type une
//! fois écrit, §9), et chaque cible de branchement est revérifiée
//! uniquement si l'état observé diffère de celui déjà enregistré à cet
//! offset (point fixe monotone, §4.6).
//!
//! Les catégories d'erreur (`VerifyError`) correspondent à la taxonomie du
//! §7 : opcode inconnu, sous-dépassement de pile, incompatibilité de type,
//! cible de branchement invalide, arité incorrecte, intrinsèque/syscall non
//! déclaré.

#[cfg(not(feature = "std"))]
use alloc::{collections::VecDeque, format, string::String, vec, vec::Vec};
#[cfg(feature = "std")]
use std::collections::VecDeque;

use vitte_vitbc::{ImportKind, SbcModule, SigRow, TypeKind, AMBIGUOUS_FIELD};

use crate::decode::{
    decode_at, instruction_boundaries, jmptable_case_target, jmptable_default_target, single_branch_target,
    DecodeError, Instr,
};

/// Type abstrait porté par un emplacement de la pile d'opérandes, d'un local
/// ou d'un global pendant la vérification.
///
/// Les petits entiers (`I8 I16 U8 U16 Char Bool`) sont promus à `I32` dès
/// qu'ils sont poussés (§9) : ce jeu n'a donc pas de variantes séparées pour
/// eux. `Array`/`List`/`Object`/`Closure` sont des catégories non
/// paramétrées par le type d'élément — une opération dont le résultat ne
/// peut pas être raffiné statiquement (p. ex. `ldfld` d'un champ `ref`,
/// `array.get`, `list.pop`) pousse [`AbstractType::Any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractType {
    /// `i32`, et toute la famille des petits entiers promus.
    I32,
    /// `i64` (et `i128`, faute de distinction dans ce jeu abstrait).
    I64,
    /// `u32`.
    U32,
    /// `u64` (et `u128`).
    U64,
    /// `f32`.
    F32,
    /// `f64`.
    F64,
    /// `bool`, non promu (distinct de `I32` pour les opérations booléennes).
    Bool,
    /// Chaîne (`const.string`, `string.concat`, `string.slice`).
    String,
    /// Référence opaque générique (type déclaré `ref`, ou paramètre/local/
    /// global/champ dont le type porté n'est pas davantage raffinable).
    Ref,
    /// Tableau de taille fixe (`newarray`).
    Array,
    /// Liste redimensionnable (`newlist`).
    List,
    /// Instance d'un type utilisateur (`newobj`).
    Object,
    /// Fermeture (`newclosure`).
    Closure,
    /// Référence nulle (`const.null`).
    Null,
    /// Valeur dont la catégorie précise ne peut pas être raffinée
    /// statiquement (résultat de `ldfld` sur un champ `ref`, `array.get`,
    /// `list.get`/`pop`, `ldupv`…).
    Any,
}

impl AbstractType {
    /// Convertit un [`TypeKind`] déclaré (type de paramètre, de local, de
    /// champ, de global…) en catégorie abstraite, en appliquant la
    /// promotion petit-entier → `I32` (§9) et en traitant `Ref`/`String`
    /// comme une référence générique (aucune valeur `Value` concrète ne
    /// distingue les deux au-delà du tas, voir `crate::value::Value::type_kind`).
    #[must_use]
    pub fn from_declared(kind: TypeKind) -> Self {
        match kind {
            TypeKind::Unspecified
            | TypeKind::I32
            | TypeKind::I8
            | TypeKind::I16
            | TypeKind::U8
            | TypeKind::U16
            | TypeKind::Char => AbstractType::I32,
            TypeKind::Bool => AbstractType::Bool,
            TypeKind::I64 | TypeKind::I128 => AbstractType::I64,
            TypeKind::U32 => AbstractType::U32,
            TypeKind::U64 | TypeKind::U128 => AbstractType::U64,
            TypeKind::F32 => AbstractType::F32,
            TypeKind::F64 => AbstractType::F64,
            TypeKind::Ref | TypeKind::String => AbstractType::Ref,
        }
    }

    /// Vrai pour toute catégorie satisfaisant une entrée "référence"
    /// générique (`isnull`, `ref.eq`, `ref.ne`, `typeof`).
    const fn is_reference_family(self) -> bool {
        matches!(
            self,
            AbstractType::Ref
                | AbstractType::String
                | AbstractType::Array
                | AbstractType::List
                | AbstractType::Object
                | AbstractType::Closure
                | AbstractType::Null
                | AbstractType::Any
        )
    }

    /// Vrai si cette catégorie satisfait une entrée attendant spécifiquement
    /// `want` (p. ex. `Array` pour `array.get`) : un match exact, ou une
    /// catégorie trop peu raffinée pour être rejetée sans risque
    /// (`Any`/`Ref`/`Null` — le contrôle précis reste au tas à l'exécution).
    const fn satisfies_specific(self, want: AbstractType) -> bool {
        matches!(self, AbstractType::Any | AbstractType::Ref | AbstractType::Null) || self as u8 == want as u8
    }
}

/// Erreur de vérification (§4.6/§7) : porte toujours l'index de fonction et
/// l'offset d'instruction fautifs pour le diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum VerifyError {
    /// Décodage de l'instruction impossible (octet d'opcode inconnu ou
    /// corps tronqué) — catégorie "unknown op" du §7.
    #[cfg_attr(feature = "errors", error("function {function_index}: decode error at offset {offset}: {source}"))]
    Decode {
        /// Index de la fonction (dans `SbcModule::functions`).
        function_index: u32,
        /// Offset fautif dans le corps de la fonction.
        offset: u32,
        /// Erreur de décodage sous-jacente.
        source: DecodeError,
    },
    /// La pile ne contient pas assez d'éléments pour l'instruction.
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: stack underflow"))]
    StackUnderflow {
        /// Index de la fonction.
        function_index: u32,
        /// Offset de l'instruction fautive.
        offset: u32,
    },
    /// Un opérande poppé n'est pas compatible avec le type attendu.
    #[cfg_attr(
        feature = "errors",
        error("function {function_index} at {offset}: type mismatch: {message}")
    )]
    TypeMismatch {
        /// Index de la fonction.
        function_index: u32,
        /// Offset de l'instruction fautive.
        offset: u32,
        /// Message descriptif (catégorie stable, contenu non contractuel, §4.6).
        message: String,
    },
    /// Une cible de branchement sort du corps de fonction ou ne tombe pas
    /// sur un début d'instruction.
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: bad jump target {target}"))]
    BadJumpTarget {
        /// Index de la fonction.
        function_index: u32,
        /// Offset de l'instruction de branchement.
        offset: u32,
        /// Cible calculée, invalide.
        target: u32,
    },
    /// `call`/`call.indirect`/`tailcall` avec un nombre d'arguments qui ne
    /// correspond pas à la signature résolue.
    #[cfg_attr(
        feature = "errors",
        error("function {function_index} at {offset}: arity mismatch: expected {expected}, got {got}")
    )]
    ArityMismatch {
        /// Index de la fonction.
        function_index: u32,
        /// Offset de l'instruction fautive.
        offset: u32,
        /// Arité attendue (d'après la signature).
        expected: u16,
        /// Arité fournie par l'opérande `argc`.
        got: u8,
    },
    /// `intrinsic`/`syscall` ciblant un identifiant non déclaré dans la
    /// table `Imports` du module.
    #[cfg_attr(
        feature = "errors",
        error("function {function_index} at {offset}: undeclared intrinsic/syscall id {id}")
    )]
    UndeclaredHostCall {
        /// Index de la fonction.
        function_index: u32,
        /// Offset de l'instruction fautive.
        offset: u32,
        /// Identifiant numérique non déclaré.
        id: u32,
    },
    /// Un identifiant (fonction, signature, type, champ, global…) référencé
    /// par une instruction sort des bornes de la table correspondante.
    #[cfg_attr(
        feature = "errors",
        error("function {function_index} at {offset}: id out of range: {message}")
    )]
    IdOutOfRange {
        /// Index de la fonction.
        function_index: u32,
        /// Offset de l'instruction fautive.
        offset: u32,
        /// Message descriptif.
        message: String,
    },
    /// La profondeur de pile observée dépasse `FunctionRow::stack_max`.
    #[cfg_attr(
        feature = "errors",
        error("function {function_index} at {offset}: stack depth {needed} exceeds declared stack_max {declared}")
    )]
    StackOverflow {
        /// Index de la fonction.
        function_index: u32,
        /// Offset de l'instruction fautive.
        offset: u32,
        /// Profondeur de pile déclarée (`FunctionRow::stack_max`).
        declared: u32,
        /// Profondeur de pile effectivement requise à ce point.
        needed: usize,
    },
    /// Deux chemins atteignent le même offset avec des états de pile (ou de
    /// locaux) incompatibles — le point fixe ne converge pas vers un état
    /// unique.
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: incompatible merge state"))]
    IncompatibleMerge {
        /// Index de la fonction.
        function_index: u32,
        /// Offset où la fusion échoue.
        offset: u32,
    },
    /// `ret` avec une pile qui ne correspond pas exactement au contrat de
    /// retour de la signature (0 ou 1 valeur du type déclaré).
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: bad return: {message}"))]
    BadReturn {
        /// Index de la fonction.
        function_index: u32,
        /// Offset de l'instruction `ret`.
        offset: u32,
        /// Message descriptif.
        message: String,
    },
}

#[cfg(not(feature = "errors"))]
impl core::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VerifyError::Decode { function_index, offset, source } => {
                write!(f, "function {function_index}: decode error at offset {offset}: {source}")
            }
            VerifyError::StackUnderflow { function_index, offset } => {
                write!(f, "function {function_index} at {offset}: stack underflow")
            }
            VerifyError::TypeMismatch { function_index, offset, message } => {
                write!(f, "function {function_index} at {offset}: type mismatch: {message}")
            }
            VerifyError::BadJumpTarget { function_index, offset, target } => {
                write!(f, "function {function_index} at {offset}: bad jump target {target}")
            }
            VerifyError::ArityMismatch { function_index, offset, expected, got } => {
                write!(f, "function {function_index} at {offset}: arity mismatch: expected {expected}, got {got}")
            }
            VerifyError::UndeclaredHostCall { function_index, offset, id } => {
                write!(f, "function {function_index} at {offset}: undeclared intrinsic/syscall id {id}")
            }
            VerifyError::IdOutOfRange { function_index, offset, message } => {
                write!(f, "function {function_index} at {offset}: id out of range: {message}")
            }
            VerifyError::StackOverflow { function_index, offset, declared, needed } => {
                write!(f, "function {function_index} at {offset}: stack depth {needed} exceeds declared stack_max {declared}")
            }
            VerifyError::IncompatibleMerge { function_index, offset } => {
                write!(f, "function {function_index} at {offset}: incompatible merge state")
            }
            VerifyError::BadReturn { function_index, offset, message } => {
                write!(f, "function {function_index} at {offset}: bad return: {message}")
            }
        }
    }
}

#[cfg(all(feature = "std", not(feature = "errors")))]
impl std::error::Error for VerifyError {}

/// Résout la signature attendue par un `func_id` de `call`/`tailcall`
/// (espace unifié fonctions utilisateur puis imports, §4.2 point 6).
pub(crate) fn sig_for_func_id(module: &SbcModule, func_id: u32) -> Option<&SigRow> {
    let funcs_len = module.functions.len() as u32;
    if func_id < funcs_len {
        let fr = &module.functions[func_id as usize];
        let method = module.methods.get(fr.method_id as usize)?;
        module.sigs.get(method.sig_id as usize)
    } else {
        // `func_id` court sur l'index de déclaration parmi *toutes* les
        // lignes de `imports:` (syscalls et intrinsèques compris, §4.2
        // point 6) : des trous sont possibles, donc on recherche la ligne
        // `Import` dont l'index relatif (porté par `reserved`) correspond,
        // plutôt que d'indexer `module.imports` directement par position.
        let rel = func_id - funcs_len;
        let import = module.imports.iter().find(|i| i.kind == ImportKind::Import && i.reserved as u32 == rel)?;
        module.sigs.get(import.sig_id as usize)
    }
}

/// Lit les types de paramètres aplatis d'une signature depuis le pool de
/// constantes.
pub(crate) fn param_types(module: &SbcModule, sig: &SigRow) -> Result<Vec<TypeKind>, String> {
    if sig.param_count == 0 {
        return Ok(Vec::new());
    }
    let ids = module
        .const_pool
        .read_u32_array_at(sig.param_type_start, sig.param_count)
        .map_err(|e| format!("{e}"))?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let row = module.types.get(id as usize).ok_or_else(|| format!("param type_id {id} out of range"))?;
        out.push(row.kind);
    }
    Ok(out)
}

/// Vrai si le `id` précis porté par une instruction `intrinsic`/`syscall`
/// a été déclaré — condition requise avant de l'exécuter (§4.6: "Every
/// intrinsic/syscall id must be declared in the module's imports").
///
/// Un intrinsèque devient une ligne `Imports` de catégorie `Intrinsic`
/// dont `sig_id` porte directement cet identifiant brut (§4.2 point 6) ;
/// un syscall, lui, ne produit jamais de ligne `Imports` et ne voyage que
/// dans `SbcModule::syscalls`. Les deux catégories doivent donc être
/// cherchées par valeur d'identifiant, pas simplement par présence d'une
/// ligne de la bonne catégorie quelque part dans la table.
pub(crate) fn host_call_is_declared(module: &SbcModule, kind: ImportKind, id: u32) -> bool {
    match kind {
        ImportKind::Intrinsic => module.imports.iter().any(|i| i.kind == ImportKind::Intrinsic && i.sig_id == id),
        ImportKind::Syscall => module.syscalls.contains(&id),
        ImportKind::Import => false,
    }
}

struct FunctionCtx<'m> {
    function_index: u32,
    code: &'m [u8],
    stack_max: u32,
    boundaries: Vec<bool>,
    ret_type: Option<AbstractType>,
}

type Stack = Vec<AbstractType>;

impl<'m> FunctionCtx<'m> {
    fn err_underflow(&self, offset: u32) -> VerifyError {
        VerifyError::StackUnderflow { function_index: self.function_index, offset }
    }

    fn pop(&self, stack: &mut Stack, offset: u32) -> Result<AbstractType, VerifyError> {
        stack.pop().ok_or_else(|| self.err_underflow(offset))
    }

    fn expect_exact(&self, stack: &mut Stack, offset: u32, want: AbstractType, what: &str) -> Result<(), VerifyError> {
        let got = self.pop(stack, offset)?;
        if got as u8 == want as u8 {
            Ok(())
        } else {
            Err(VerifyError::TypeMismatch {
                function_index: self.function_index,
                offset,
                message: format!("{what}: expected {want:?}, found {got:?}"),
            })
        }
    }

    fn expect_reference(&self, stack: &mut Stack, offset: u32, what: &str) -> Result<(), VerifyError> {
        let got = self.pop(stack, offset)?;
        if got.is_reference_family() {
            Ok(())
        } else {
            Err(VerifyError::TypeMismatch {
                function_index: self.function_index,
                offset,
                message: format!("{what}: expected a reference, found {got:?}"),
            })
        }
    }

    fn expect_specific(&self, stack: &mut Stack, offset: u32, want: AbstractType, what: &str) -> Result<(), VerifyError> {
        let got = self.pop(stack, offset)?;
        if got.satisfies_specific(want) {
            Ok(())
        } else {
            Err(VerifyError::TypeMismatch {
                function_index: self.function_index,
                offset,
                message: format!("{what}: expected {want:?}, found {got:?}"),
            })
        }
    }

    fn check_depth(&self, stack: &Stack, offset: u32) -> Result<(), VerifyError> {
        if stack.len() as u32 > self.stack_max {
            return Err(VerifyError::StackOverflow {
                function_index: self.function_index,
                offset,
                declared: self.stack_max,
                needed: stack.len(),
            });
        }
        Ok(())
    }

    fn resolve_target(&self, offset: u32, target: u32) -> Result<u32, VerifyError> {
        let bad = || VerifyError::BadJumpTarget { function_index: self.function_index, offset, target };
        if (target as usize) >= self.boundaries.len() || !self.boundaries[target as usize] {
            return Err(bad());
        }
        Ok(target)
    }
}

/// Vérifie tout le module : chaque fonction utilisateur est parcourue
/// indépendamment (§5 : "an implementation may parallelise verification
/// across functions because functions are independent" — ce crate le fait
/// séquentiellement, la parallélisation restant une option d'implémentation
/// non contractuelle).
pub fn verify_module(module: &SbcModule) -> Result<(), VerifyError> {
    for (idx, fr) in module.functions.iter().enumerate() {
        verify_function(module, idx as u32, fr)?;
    }
    Ok(())
}

fn verify_function(module: &SbcModule, function_index: u32, fr: &vitte_vitbc::FunctionRow) -> Result<(), VerifyError> {
    let start = fr.code_offset as usize;
    let end = start
        .checked_add(fr.code_size as usize)
        .filter(|&e| e <= module.code.len())
        .ok_or_else(|| VerifyError::IdOutOfRange {
            function_index,
            offset: fr.code_offset,
            message: "function code range exceeds Code section".into(),
        })?;
    let code = &module.code[start..end];

    let method = module.methods.get(fr.method_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
        function_index,
        offset: 0,
        message: format!("method_id {} out of range", fr.method_id),
    })?;
    let sig = module.sigs.get(method.sig_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
        function_index,
        offset: 0,
        message: format!("sig_id {} out of range", method.sig_id),
    })?;

    let boundaries = instruction_boundaries(code).map_err(|source| VerifyError::Decode { function_index, offset: 0, source })?;

    let params = param_types(module, sig).map_err(|message| VerifyError::IdOutOfRange { function_index, offset: 0, message })?;
    let ret_type = if sig.ret_type_id == AMBIGUOUS_FIELD {
        None
    } else {
        let row = module.types.get(sig.ret_type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
            function_index,
            offset: 0,
            message: format!("ret_type_id {} out of range", sig.ret_type_id),
        })?;
        Some(AbstractType::from_declared(row.kind))
    };

    let ctx = FunctionCtx { function_index, code, stack_max: fr.stack_max, boundaries, ret_type };

    // Environnement des locaux, partagé pour toute la fonction (§9 : un
    // local ne change jamais de famille une fois écrit). Seedé avec les
    // types de paramètres sur les premiers `param_count` slots ; `Enter`
    // étend ensuite ce vecteur de `locals` entrées `None` ("Uninit").
    let mut local_types: Vec<Option<AbstractType>> = params.iter().map(|k| Some(AbstractType::from_declared(*k))).collect();

    let mut entry_states: alloc_compat::Map<u32, Stack> = alloc_compat::Map::new();
    let mut queue: VecDeque<(u32, Stack)> = VecDeque::new();
    queue.push_back((0, Vec::new()));

    while let Some((offset, mut stack)) = queue.pop_front() {
        if let Some(existing) = entry_states.get(&offset) {
            if existing == &stack {
                continue;
            }
            return Err(VerifyError::IncompatibleMerge { function_index, offset });
        }
        entry_states.insert(offset, stack.clone());

        let mut ip = offset;
        loop {
            ctx.check_depth(&stack, ip)?;
            let (instr, next) = decode_at(ctx.code, ip).map_err(|source| VerifyError::Decode { function_index, offset: ip, source })?;
            let mut fallthrough = true;

            match instr {
                Instr::Nop => {}
                Instr::Pop => {
                    ctx.pop(&mut stack, ip)?;
                }
                Instr::Dup => {
                    let a = ctx.pop(&mut stack, ip)?;
                    stack.push(a);
                    stack.push(a);
                }
                Instr::Dup2 => {
                    let b = ctx.pop(&mut stack, ip)?;
                    let a = ctx.pop(&mut stack, ip)?;
                    stack.push(a);
                    stack.push(b);
                    stack.push(a);
                    stack.push(b);
                }
                Instr::Swap => {
                    let b = ctx.pop(&mut stack, ip)?;
                    let a = ctx.pop(&mut stack, ip)?;
                    stack.push(b);
                    stack.push(a);
                }
                Instr::Rot => {
                    let c = ctx.pop(&mut stack, ip)?;
                    let b = ctx.pop(&mut stack, ip)?;
                    let a = ctx.pop(&mut stack, ip)?;
                    stack.push(b);
                    stack.push(c);
                    stack.push(a);
                }
                Instr::Enter { locals } => {
                    local_types.extend(core::iter::repeat(None).take(locals as usize));
                }

                Instr::ConstI8(_)
                | Instr::ConstI16(_)
                | Instr::ConstU8(_)
                | Instr::ConstU16(_)
                | Instr::ConstI32(_)
                | Instr::ConstU32(_)
                | Instr::ConstChar(_) => stack.push(AbstractType::I32),
                Instr::ConstI64(_) | Instr::ConstU64(_) => stack.push(AbstractType::I64),
                Instr::ConstF32(_) => stack.push(AbstractType::F32),
                Instr::ConstF64(_) => stack.push(AbstractType::F64),
                Instr::ConstBool(_) => stack.push(AbstractType::Bool),
                Instr::ConstString(const_id) => {
                    let rec = module.const_pool.read_record_at(const_id).map_err(|e| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("const.string id {const_id}: {e}"),
                    })?;
                    module.const_pool.resolve_string(rec).map_err(|e| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("const.string id {const_id}: {e}"),
                    })?;
                    stack.push(AbstractType::String);
                }
                Instr::ConstNull => stack.push(AbstractType::Null),

                Instr::AddI32 | Instr::SubI32 | Instr::MulI32 | Instr::DivI32 | Instr::RemI32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "arith.i32 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "arith.i32 lhs")?;
                    stack.push(AbstractType::I32);
                }
                Instr::NegI32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "neg.i32")?;
                    stack.push(AbstractType::I32);
                }
                Instr::AddI64 | Instr::SubI64 | Instr::MulI64 | Instr::DivI64 | Instr::RemI64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "arith.i64 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "arith.i64 lhs")?;
                    stack.push(AbstractType::I64);
                }
                Instr::NegI64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "neg.i64")?;
                    stack.push(AbstractType::I64);
                }
                Instr::AddF32 | Instr::SubF32 | Instr::MulF32 | Instr::DivF32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F32, "arith.f32 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::F32, "arith.f32 lhs")?;
                    stack.push(AbstractType::F32);
                }
                Instr::NegF32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F32, "neg.f32")?;
                    stack.push(AbstractType::F32);
                }
                Instr::AddF64 | Instr::SubF64 | Instr::MulF64 | Instr::DivF64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F64, "arith.f64 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::F64, "arith.f64 lhs")?;
                    stack.push(AbstractType::F64);
                }
                Instr::NegF64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F64, "neg.f64")?;
                    stack.push(AbstractType::F64);
                }

                Instr::CmpEqI32 | Instr::CmpNeI32 | Instr::CmpLtI32 | Instr::CmpLeI32 | Instr::CmpGtI32 | Instr::CmpGeI32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "cmp.i32 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "cmp.i32 lhs")?;
                    stack.push(AbstractType::Bool);
                }
                Instr::CmpLtU32 | Instr::CmpLeU32 | Instr::CmpGtU32 | Instr::CmpGeU32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::U32, "cmp.u32 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::U32, "cmp.u32 lhs")?;
                    stack.push(AbstractType::Bool);
                }
                Instr::CmpEqI64 | Instr::CmpNeI64 | Instr::CmpLtI64 | Instr::CmpLeI64 | Instr::CmpGtI64 | Instr::CmpGeI64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "cmp.i64 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "cmp.i64 lhs")?;
                    stack.push(AbstractType::Bool);
                }
                Instr::CmpLtU64 | Instr::CmpLeU64 | Instr::CmpGtU64 | Instr::CmpGeU64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::U64, "cmp.u64 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::U64, "cmp.u64 lhs")?;
                    stack.push(AbstractType::Bool);
                }
                Instr::CmpEqF32 | Instr::CmpLtF32 | Instr::CmpLeF32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F32, "cmp.f32 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::F32, "cmp.f32 lhs")?;
                    stack.push(AbstractType::Bool);
                }
                Instr::CmpEqF64 | Instr::CmpLtF64 | Instr::CmpLeF64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F64, "cmp.f64 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::F64, "cmp.f64 lhs")?;
                    stack.push(AbstractType::Bool);
                }

                Instr::BoolNot => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::Bool, "bool.not")?;
                    stack.push(AbstractType::Bool);
                }
                Instr::BoolAnd | Instr::BoolOr => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::Bool, "bool rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::Bool, "bool lhs")?;
                    stack.push(AbstractType::Bool);
                }

                Instr::AndI32 | Instr::OrI32 | Instr::XorI32 | Instr::ShlI32 | Instr::ShrI32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "bitwise.i32 shift/rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "bitwise.i32 lhs")?;
                    stack.push(AbstractType::I32);
                }
                Instr::ShrU32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "shr.u32 shift")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::U32, "shr.u32 value")?;
                    stack.push(AbstractType::U32);
                }
                Instr::AndI64 | Instr::OrI64 | Instr::XorI64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "bitwise.i64 rhs")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "bitwise.i64 lhs")?;
                    stack.push(AbstractType::I64);
                }
                Instr::ShlI64 | Instr::ShrI64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "bitwise.i64 shift")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "bitwise.i64 lhs")?;
                    stack.push(AbstractType::I64);
                }
                Instr::ShrU64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "shr.u64 shift")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::U64, "shr.u64 value")?;
                    stack.push(AbstractType::U64);
                }

                Instr::ConvI32ToI64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "conv.i32.i64")?;
                    stack.push(AbstractType::I64);
                }
                Instr::ConvI64ToI32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I64, "conv.i64.i32")?;
                    stack.push(AbstractType::I32);
                }
                Instr::ConvI32ToF32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "conv.i32.f32")?;
                    stack.push(AbstractType::F32);
                }
                Instr::ConvI32ToF64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "conv.i32.f64")?;
                    stack.push(AbstractType::F64);
                }
                Instr::ConvF32ToI32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F32, "conv.f32.i32")?;
                    stack.push(AbstractType::I32);
                }
                Instr::ConvF64ToI32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F64, "conv.f64.i32")?;
                    stack.push(AbstractType::I32);
                }
                Instr::ConvF32ToF64 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F32, "conv.f32.f64")?;
                    stack.push(AbstractType::F64);
                }
                Instr::ConvF64ToF32 => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::F64, "conv.f64.f32")?;
                    stack.push(AbstractType::F32);
                }

                Instr::Jmp(rel) => {
                    let target = ctx.resolve_target(ip, single_branch_target(ip, rel))?;
                    queue.push_back((target, stack.clone()));
                    fallthrough = false;
                }
                Instr::JmpTrue(rel) | Instr::JmpFalse(rel) => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::Bool, "jmp.true/false condition")?;
                    let target = ctx.resolve_target(ip, single_branch_target(ip, rel))?;
                    queue.push_back((target, stack.clone()));
                }
                Instr::JmpTable { ref cases, default } => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "jmptable selector")?;
                    for (i, rel) in cases.iter().enumerate() {
                        let target = ctx.resolve_target(ip, jmptable_case_target(ip, i as u32, *rel))?;
                        queue.push_back((target, stack.clone()));
                    }
                    let target = ctx.resolve_target(ip, jmptable_default_target(ip, cases.len() as u32, default))?;
                    queue.push_back((target, stack.clone()));
                    fallthrough = false;
                }

                Instr::Call { func_id, argc } => {
                    let sig = sig_for_func_id(module, func_id).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("call target func_id {func_id} out of range"),
                    })?;
                    if sig.param_count != u16::from(argc) {
                        return Err(VerifyError::ArityMismatch { function_index, offset: ip, expected: sig.param_count, got: argc });
                    }
                    let params = param_types(module, sig).map_err(|message| VerifyError::IdOutOfRange { function_index, offset: ip, message })?;
                    for p in params.iter().rev() {
                        let want = AbstractType::from_declared(*p);
                        if want.is_reference_family() {
                            ctx.expect_reference(&mut stack, ip, "call argument")?;
                        } else {
                            ctx.expect_exact(&mut stack, ip, want, "call argument")?;
                        }
                    }
                    if sig.ret_type_id != AMBIGUOUS_FIELD {
                        let row = module.types.get(sig.ret_type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                            function_index,
                            offset: ip,
                            message: format!("call return type_id {} out of range", sig.ret_type_id),
                        })?;
                        stack.push(AbstractType::from_declared(row.kind));
                    }
                }
                Instr::CallIndirect { sig_id, argc } => {
                    let sig = module.sigs.get(sig_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("call.indirect sig_id {sig_id} out of range"),
                    })?;
                    if sig.param_count != u16::from(argc) {
                        return Err(VerifyError::ArityMismatch { function_index, offset: ip, expected: sig.param_count, got: argc });
                    }
                    ctx.expect_specific(&mut stack, ip, AbstractType::Closure, "call.indirect callee")?;
                    let params = param_types(module, sig).map_err(|message| VerifyError::IdOutOfRange { function_index, offset: ip, message })?;
                    for p in params.iter().rev() {
                        let want = AbstractType::from_declared(*p);
                        if want.is_reference_family() {
                            ctx.expect_reference(&mut stack, ip, "call.indirect argument")?;
                        } else {
                            ctx.expect_exact(&mut stack, ip, want, "call.indirect argument")?;
                        }
                    }
                    if sig.ret_type_id != AMBIGUOUS_FIELD {
                        let row = module.types.get(sig.ret_type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                            function_index,
                            offset: ip,
                            message: format!("call.indirect return type_id {} out of range", sig.ret_type_id),
                        })?;
                        stack.push(AbstractType::from_declared(row.kind));
                    }
                }
                Instr::TailCall { func_id, argc } => {
                    // §9 : tailcall ne vise qu'un func_id statique ; les
                    // fermetures passent exclusivement par call.indirect.
                    let target_sig = sig_for_func_id(module, func_id).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("tailcall target func_id {func_id} out of range"),
                    })?;
                    if target_sig.param_count != u16::from(argc) {
                        return Err(VerifyError::ArityMismatch {
                            function_index,
                            offset: ip,
                            expected: target_sig.param_count,
                            got: argc,
                        });
                    }
                    if target_sig.ret_type_id != sig.ret_type_id {
                        return Err(VerifyError::TypeMismatch {
                            function_index,
                            offset: ip,
                            message: "tailcall target return type differs from caller's".into(),
                        });
                    }
                    let params = param_types(module, target_sig).map_err(|message| VerifyError::IdOutOfRange { function_index, offset: ip, message })?;
                    for p in params.iter().rev() {
                        let want = AbstractType::from_declared(*p);
                        if want.is_reference_family() {
                            ctx.expect_reference(&mut stack, ip, "tailcall argument")?;
                        } else {
                            ctx.expect_exact(&mut stack, ip, want, "tailcall argument")?;
                        }
                    }
                    fallthrough = false;
                }
                Instr::Ret => {
                    match ctx.ret_type {
                        None => {
                            if !stack.is_empty() {
                                return Err(VerifyError::BadReturn {
                                    function_index,
                                    offset: ip,
                                    message: format!("void function returns with {} value(s) on stack", stack.len()),
                                });
                            }
                        }
                        Some(want) => {
                            if stack.len() != 1 {
                                return Err(VerifyError::BadReturn {
                                    function_index,
                                    offset: ip,
                                    message: format!("expected exactly 1 return value, found {}", stack.len()),
                                });
                            }
                            let got = stack[0];
                            let ok = if want.is_reference_family() { got.is_reference_family() } else { got as u8 == want as u8 };
                            if !ok {
                                return Err(VerifyError::BadReturn {
                                    function_index,
                                    offset: ip,
                                    message: format!("expected return type {want:?}, found {got:?}"),
                                });
                            }
                        }
                    }
                    fallthrough = false;
                }
                Instr::CallCheck => {}
                Instr::Intrinsic { id } => {
                    if !host_call_is_declared(module, ImportKind::Intrinsic, id) {
                        return Err(VerifyError::UndeclaredHostCall { function_index, offset: ip, id });
                    }
                    stack.push(AbstractType::Any);
                    ctx.check_depth(&stack, ip)?;
                }
                Instr::Syscall { id } => {
                    if !host_call_is_declared(module, ImportKind::Syscall, id) {
                        return Err(VerifyError::UndeclaredHostCall { function_index, offset: ip, id });
                    }
                    stack.push(AbstractType::Any);
                    ctx.check_depth(&stack, ip)?;
                }

                Instr::LdLoc(index) => {
                    let slot = local_types.get(index as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("local index {index} out of range"),
                    })?;
                    stack.push(slot.unwrap_or(AbstractType::Any));
                }
                Instr::StLoc(index) => {
                    let value = ctx.pop(&mut stack, ip)?;
                    let slot = local_types.get_mut(index as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("local index {index} out of range"),
                    })?;
                    match slot {
                        None => *slot = Some(value),
                        Some(declared) => {
                            let ok = if declared.is_reference_family() { value.is_reference_family() } else { *declared as u8 == value as u8 };
                            if !ok {
                                return Err(VerifyError::TypeMismatch {
                                    function_index,
                                    offset: ip,
                                    message: format!("stloc {index}: expected {declared:?}, found {value:?}"),
                                });
                            }
                        }
                    }
                }
                Instr::LdGlob(index) => {
                    let g = module.globals.get(index as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("global index {index} out of range"),
                    })?;
                    let row = module.types.get(g.type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("global type_id {} out of range", g.type_id),
                    })?;
                    stack.push(AbstractType::from_declared(row.kind));
                }
                Instr::StGlob(index) => {
                    let g = module.globals.get(index as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("global index {index} out of range"),
                    })?;
                    let row = module.types.get(g.type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("global type_id {} out of range", g.type_id),
                    })?;
                    let want = AbstractType::from_declared(row.kind);
                    if want.is_reference_family() {
                        ctx.expect_reference(&mut stack, ip, "stglob")?;
                    } else {
                        ctx.expect_exact(&mut stack, ip, want, "stglob")?;
                    }
                }
                // Aucune table SBC ne décrit la forme des upvalues (§3 : pas
                // de ligne "Upvalues" persistée) ; elles restent donc
                // intrinsèquement dynamiques, comme `Any`.
                Instr::LdUpv(_) => stack.push(AbstractType::Any),
                Instr::StUpv(_) => {
                    ctx.pop(&mut stack, ip)?;
                }

                Instr::NewObj(type_id) => {
                    module.types.get(type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("newobj type_id {type_id} out of range"),
                    })?;
                    stack.push(AbstractType::Object);
                }
                Instr::LdFld(field_id) => {
                    let field = module.fields.get(field_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("field_id {field_id} out of range"),
                    })?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::Object, "ldfld receiver")?;
                    let row = module.types.get(field.type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("field type_id {} out of range", field.type_id),
                    })?;
                    // Un champ de type référence ne peut pas être raffiné
                    // statiquement (§4.6 : exemple canonique d'`Any`).
                    let pushed = if matches!(row.kind, TypeKind::Ref | TypeKind::String) {
                        AbstractType::Any
                    } else {
                        AbstractType::from_declared(row.kind)
                    };
                    stack.push(pushed);
                }
                Instr::StFld(field_id) => {
                    let field = module.fields.get(field_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("field_id {field_id} out of range"),
                    })?;
                    let row = module.types.get(field.type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("field type_id {} out of range", field.type_id),
                    })?;
                    let want = AbstractType::from_declared(row.kind);
                    if want.is_reference_family() {
                        ctx.expect_reference(&mut stack, ip, "stfld value")?;
                    } else {
                        ctx.expect_exact(&mut stack, ip, want, "stfld value")?;
                    }
                    ctx.expect_specific(&mut stack, ip, AbstractType::Object, "stfld receiver")?;
                }

                Instr::TypeOf => {
                    ctx.expect_reference(&mut stack, ip, "typeof")?;
                    stack.push(AbstractType::I32);
                }
                Instr::IsNull => {
                    ctx.expect_reference(&mut stack, ip, "isnull")?;
                    stack.push(AbstractType::Bool);
                }
                Instr::RefEq | Instr::RefNe => {
                    ctx.expect_reference(&mut stack, ip, "ref.eq/ne rhs")?;
                    ctx.expect_reference(&mut stack, ip, "ref.eq/ne lhs")?;
                    stack.push(AbstractType::Bool);
                }

                Instr::NewClosure { method_id, upvalue_count } => {
                    module.methods.get(method_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("newclosure method_id {method_id} out of range"),
                    })?;
                    for _ in 0..upvalue_count {
                        ctx.pop(&mut stack, ip)?;
                    }
                    stack.push(AbstractType::Closure);
                }

                Instr::NewArray { type_id, .. } => {
                    module.types.get(type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("newarray type_id {type_id} out of range"),
                    })?;
                    stack.push(AbstractType::Array);
                }
                Instr::ArrayLen => {
                    ctx.expect_specific(&mut stack, ip, AbstractType::Array, "array.len")?;
                    stack.push(AbstractType::I32);
                }
                Instr::ArrayGet => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "array.get index")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::Array, "array.get receiver")?;
                    stack.push(AbstractType::Any);
                }
                Instr::ArraySet => {
                    ctx.pop(&mut stack, ip)?; // valeur : tout type accepté (pas de suivi par élément, §4.6)
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "array.set index")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::Array, "array.set receiver")?;
                }

                Instr::NewList { type_id, .. } => {
                    module.types.get(type_id as usize).ok_or_else(|| VerifyError::IdOutOfRange {
                        function_index,
                        offset: ip,
                        message: format!("newlist type_id {type_id} out of range"),
                    })?;
                    stack.push(AbstractType::List);
                }
                Instr::ListLen => {
                    ctx.expect_specific(&mut stack, ip, AbstractType::List, "list.len")?;
                    stack.push(AbstractType::I32);
                }
                Instr::ListGet => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "list.get index")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::List, "list.get receiver")?;
                    stack.push(AbstractType::Any);
                }
                Instr::ListSet => {
                    ctx.pop(&mut stack, ip)?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "list.set index")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::List, "list.set receiver")?;
                }
                Instr::ListPush => {
                    ctx.pop(&mut stack, ip)?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::List, "list.push receiver")?;
                }
                Instr::ListPop => {
                    ctx.expect_specific(&mut stack, ip, AbstractType::List, "list.pop receiver")?;
                    stack.push(AbstractType::Any);
                }
                Instr::ListInsert => {
                    ctx.pop(&mut stack, ip)?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "list.insert index")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::List, "list.insert receiver")?;
                }
                Instr::ListRemove => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "list.remove index")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::List, "list.remove receiver")?;
                    stack.push(AbstractType::Any);
                }
                Instr::ListClear => {
                    ctx.expect_specific(&mut stack, ip, AbstractType::List, "list.clear receiver")?;
                }

                Instr::StringLen => {
                    ctx.expect_specific(&mut stack, ip, AbstractType::String, "string.len")?;
                    stack.push(AbstractType::I32);
                }
                Instr::StringConcat => {
                    ctx.expect_specific(&mut stack, ip, AbstractType::String, "string.concat rhs")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::String, "string.concat lhs")?;
                    stack.push(AbstractType::String);
                }
                Instr::StringGetChar => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "string.get.char index")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::String, "string.get.char receiver")?;
                    stack.push(AbstractType::I32);
                }
                Instr::StringSlice => {
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "string.slice hi")?;
                    ctx.expect_exact(&mut stack, ip, AbstractType::I32, "string.slice lo")?;
                    ctx.expect_specific(&mut stack, ip, AbstractType::String, "string.slice receiver")?;
                    stack.push(AbstractType::String);
                }
            }

            ctx.check_depth(&stack, ip)?;

            if !fallthrough {
                break;
            }
            if next >= code.len() as u32 {
                // Tombée en fin de corps sans `ret`/branchement final : un
                // programme bien formé ne devrait pas y arriver, mais ce
                // n'est observable qu'à l'exécution (pas de trap ici, juste
                // fin de parcours de ce chemin).
                break;
            }
            ip = next;
        }
    }

    Ok(())
}

/// Petite table associative non ordonnée, suffisante pour les états de
/// branchement d'une fonction (quelques dizaines d'entrées typiquement) —
/// évite une dépendance `std::collections::HashMap` pour rester utilisable
/// en `no_std`+`alloc`.
mod alloc_compat {
    #[cfg(not(feature = "std"))]
    use alloc::vec::Vec;

    pub struct Map<K, V> {
        entries: Vec<(K, V)>,
    }

    impl<K: PartialEq, V> Map<K, V> {
        pub fn new() -> Self {
            Self { entries: Vec::new() }
        }

        pub fn get(&self, key: &K) -> Option<&V> {
            self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
        }

        pub fn insert(&mut self, key: K, value: V) {
            if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k == &key) {
                slot.1 = value;
            } else {
                self.entries.push((key, value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_vitbc::{FieldRow, FunctionRow, GlobalRow, ImportRow, MethodRow, SbcModule, SigRow, TypeRow};

    fn push_u8(code: &mut Vec<u8>, op: u8) {
        code.push(op);
    }
    fn push_i32(code: &mut Vec<u8>, op: u8, v: i32) {
        code.push(op);
        code.extend_from_slice(&v.to_le_bytes());
    }
    fn push_u16(code: &mut Vec<u8>, op: u8, v: u16) {
        code.push(op);
        code.extend_from_slice(&v.to_le_bytes());
    }

    fn base_module() -> SbcModule {
        let mut m = SbcModule::default();
        m.types.push(TypeRow { name_str: 0, kind: TypeKind::I32, flags: 0, reserved: 0, size: 4, field_start: 0, field_count: 0 });
        m
    }

    fn void_sig(m: &mut SbcModule) -> u32 {
        m.sigs.push(SigRow { ret_type_id: AMBIGUOUS_FIELD, param_count: 0, call_conv: 0, param_type_start: 0 });
        (m.sigs.len() - 1) as u32
    }

    fn i32_ret_sig(m: &mut SbcModule) -> u32 {
        m.sigs.push(SigRow { ret_type_id: 0, param_count: 0, call_conv: 0, param_type_start: 0 });
        (m.sigs.len() - 1) as u32
    }

    fn install_function(m: &mut SbcModule, sig_id: u32, local_count: u16, stack_max: u32, code: Vec<u8>) {
        let name = m.const_pool.intern_string("f");
        let code_offset = m.code.len() as u32;
        m.code.extend_from_slice(&code);
        m.methods.push(MethodRow { name_str: name, sig_id, code_offset, local_count, flags: 0 });
        let method_id = (m.methods.len() - 1) as u32;
        m.functions.push(FunctionRow { method_id, code_offset, code_size: code.len() as u32, stack_max });
    }

    #[test]
    fn s1_arithmetic_verifies() {
        let mut m = base_module();
        let sig = i32_ret_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, 0x06, 0); // enter 0
        push_i32(&mut code, 0x12, 7); // const.i32 7
        push_i32(&mut code, 0x12, 5); // const.i32 5
        push_u8(&mut code, 0x20); // add.i32
        push_u8(&mut code, 0xA3); // ret
        install_function(&mut m, sig, 0, 4, code);
        verify_module(&m).expect("S1 should verify");
    }

    #[test]
    fn s6_bad_branch_target_is_rejected() {
        let mut m = base_module();
        let sig = void_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, 0x06, 0); // enter 0
        push_i32(&mut code, 0x90, 1000); // jmp way past the end
        push_u8(&mut code, 0xA3); // ret (unreachable via the bad jump, but here for completeness)
        install_function(&mut m, sig, 0, 4, code);
        let err = verify_module(&m).unwrap_err();
        assert!(matches!(err, VerifyError::BadJumpTarget { .. }));
    }

    #[test]
    fn stack_underflow_is_rejected() {
        let mut m = base_module();
        let sig = void_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, 0x06, 0); // enter 0
        push_u8(&mut code, 0x20); // add.i32 with nothing on the stack
        push_u8(&mut code, 0xA3);
        install_function(&mut m, sig, 0, 4, code);
        let err = verify_module(&m).unwrap_err();
        assert!(matches!(err, VerifyError::StackUnderflow { .. }));
    }

    #[test]
    fn type_mismatch_between_int_and_float_is_rejected() {
        let mut m = base_module();
        let sig = void_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, 0x06, 0); // enter 0
        push_i32(&mut code, 0x12, 1); // const.i32
        code.push(0x18); // const.f32
        code.extend_from_slice(&1.0f32.to_bits().to_le_bytes());
        push_u8(&mut code, 0x20); // add.i32 expects two i32, finds f32 on top
        push_u8(&mut code, 0xA3);
        install_function(&mut m, sig, 0, 8, code);
        let err = verify_module(&m).unwrap_err();
        assert!(matches!(err, VerifyError::TypeMismatch { .. }));
    }

    #[test]
    fn bool_param_consumed_by_bool_not_verifies() {
        use vitte_vitbc::Opcode;
        let mut m = base_module();
        m.types.push(TypeRow { name_str: 0, kind: TypeKind::Bool, flags: 0, reserved: 0, size: 4, field_start: 0, field_count: 0 });
        let bool_type_id = (m.types.len() - 1) as u32;
        let param_type_start = m.const_pool.push_u32_array(&[bool_type_id]);
        m.sigs.push(SigRow { ret_type_id: bool_type_id, param_count: 1, call_conv: 0, param_type_start });
        let sig = (m.sigs.len() - 1) as u32;
        let mut code = Vec::new();
        push_u16(&mut code, 0x06, 0); // enter 0
        push_i32(&mut code, Opcode::LdLoc as u8, 0); // ldloc 0 (the bool param)
        push_u8(&mut code, Opcode::BoolNot as u8); // bool.not
        push_u8(&mut code, 0xA3); // ret
        install_function(&mut m, sig, 1, 4, code);
        verify_module(&m).expect("a bool param consumed by bool.not should verify");
    }

    #[test]
    fn s2_loop_with_back_edge_verifies() {
        use vitte_vitbc::Opcode;
        let mut m = base_module();
        let sig = i32_ret_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 1); // enter 1
        push_i32(&mut code, Opcode::ConstI32 as u8, 0);
        push_i32(&mut code, Opcode::StLoc as u8, 0); // locals[0] = 0
        let top = code.len() as u32;
        push_i32(&mut code, Opcode::LdLoc as u8, 0);
        push_i32(&mut code, Opcode::ConstI32 as u8, 3);
        code.push(Opcode::CmpLtI32 as u8);
        let jmp_false_at = code.len() as u32;
        push_i32(&mut code, Opcode::JmpFalse as u8, 0); // patched below
        push_i32(&mut code, Opcode::LdLoc as u8, 0);
        push_i32(&mut code, Opcode::ConstI32 as u8, 1);
        code.push(Opcode::AddI32 as u8);
        push_i32(&mut code, Opcode::StLoc as u8, 0);
        let jmp_top_at = code.len() as u32;
        push_i32(&mut code, Opcode::Jmp as u8, 0); // patched below
        let done = code.len() as u32;
        push_i32(&mut code, Opcode::LdLoc as u8, 0);
        code.push(Opcode::Ret as u8);

        let jmp_false_rel = done as i64 - (jmp_false_at as i64 + 1 + 4);
        code[(jmp_false_at + 1) as usize..(jmp_false_at + 5) as usize]
            .copy_from_slice(&(jmp_false_rel as i32).to_le_bytes());
        let jmp_top_rel = top as i64 - (jmp_top_at as i64 + 1 + 4);
        code[(jmp_top_at + 1) as usize..(jmp_top_at + 5) as usize].copy_from_slice(&(jmp_top_rel as i32).to_le_bytes());

        install_function(&mut m, sig, 1, 4, code);
        verify_module(&m).expect("S2 loop should verify");
    }

    #[test]
    fn s5_object_field_roundtrip_verifies() {
        use vitte_vitbc::Opcode;
        let mut m = base_module();
        // type Color { r,g,b,a : i32 }
        m.fields.push(FieldRow { name_str: 0, type_id: 0, offset: 0, flags: 0 });
        m.fields.push(FieldRow { name_str: 0, type_id: 0, offset: 4, flags: 0 });
        m.fields.push(FieldRow { name_str: 0, type_id: 0, offset: 8, flags: 0 });
        m.fields.push(FieldRow { name_str: 0, type_id: 0, offset: 12, flags: 0 });
        m.types.push(TypeRow { name_str: 0, kind: TypeKind::Ref, flags: 1, reserved: 0, size: 16, field_start: 0, field_count: 4 });
        let color_type = (m.types.len() - 1) as u32;
        let sig = i32_ret_sig(&mut m);

        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 0);
        push_i32(&mut code, Opcode::NewObj as u8, color_type as i32);
        code.push(Opcode::Dup as u8);
        push_i32(&mut code, Opcode::ConstI32 as u8, 255);
        push_i32(&mut code, Opcode::StFld as u8, 0);
        push_i32(&mut code, Opcode::LdFld as u8, 0);
        code.push(Opcode::Ret as u8);

        install_function(&mut m, sig, 0, 8, code);
        verify_module(&m).expect("S5 object field roundtrip should verify");
    }

    #[test]
    fn undeclared_intrinsic_is_rejected() {
        use vitte_vitbc::Opcode;
        let mut m = base_module();
        let sig = void_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 0);
        code.push(Opcode::Intrinsic as u8);
        code.extend_from_slice(&7u32.to_le_bytes());
        code.push(Opcode::Ret as u8);
        install_function(&mut m, sig, 0, 4, code);
        let err = verify_module(&m).unwrap_err();
        assert!(matches!(err, VerifyError::UndeclaredHostCall { .. }));
    }

    /// Un id déclaré, lui, doit laisser passer le vérificateur (§4.6) — la
    /// valeur poussée par `intrinsic`/`syscall` (`AbstractType::Any`) est
    /// compatible avec un type de retour référence, ce que `ref_ret_sig`
    /// déclare.
    fn ref_ret_sig(m: &mut SbcModule) -> u32 {
        m.types.push(TypeRow { name_str: 0, kind: TypeKind::Ref, flags: 0, reserved: 0, size: 8, field_start: 0, field_count: 0 });
        let ref_type = (m.types.len() - 1) as u32;
        m.sigs.push(SigRow { ret_type_id: ref_type, param_count: 0, call_conv: 0, param_type_start: 0 });
        (m.sigs.len() - 1) as u32
    }

    #[test]
    fn declared_intrinsic_verifies() {
        use vitte_vitbc::{ImportKind, Opcode};
        let mut m = base_module();
        let sig = ref_ret_sig(&mut m);
        m.imports.push(ImportRow { module_str: 0, symbol_str: 0, kind: ImportKind::Intrinsic, flags: 0, reserved: 0, sig_id: 7 });

        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 0);
        code.push(Opcode::Intrinsic as u8);
        code.extend_from_slice(&7u32.to_le_bytes());
        code.push(Opcode::Ret as u8);
        install_function(&mut m, sig, 0, 4, code);
        verify_module(&m).expect("declared intrinsic should verify");
    }

    #[test]
    fn declared_syscall_verifies() {
        use vitte_vitbc::Opcode;
        let mut m = base_module();
        let sig = ref_ret_sig(&mut m);
        m.syscalls.push(7);

        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 0);
        code.push(Opcode::Syscall as u8);
        code.extend_from_slice(&7u32.to_le_bytes());
        code.push(Opcode::Ret as u8);
        install_function(&mut m, sig, 0, 4, code);
        verify_module(&m).expect("declared syscall should verify");
    }

    #[test]
    fn global_load_and_store_type_checked() {
        use vitte_vitbc::Opcode;
        let mut m = base_module();
        m.globals.push(GlobalRow { name_str: 0, type_id: 0, flags: 1, init_const_id: GlobalRow::NO_INIT });
        let sig = void_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 0);
        push_i32(&mut code, Opcode::ConstI32 as u8, 9);
        push_i32(&mut code, Opcode::StGlob as u8, 0);
        push_i32(&mut code, Opcode::LdGlob as u8, 0);
        code.push(Opcode::Pop as u8);
        code.push(Opcode::Ret as u8);
        install_function(&mut m, sig, 0, 4, code);
        verify_module(&m).expect("global store/load should verify");
    }
}
