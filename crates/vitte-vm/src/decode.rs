//! Décodeur d'instructions SBC : un seul point de vérité pour la forme de
//! chaque opcode, utilisé à l'identique par [`crate::verify`] et
//! [`crate::interp`] (voir le commentaire de tête de
//! `vitte_vitbc::opcode` : l'émetteur et le vérificateur/exécuteur ne
//! doivent jamais diverger sur l'encodage).

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use vitte_vitbc::Opcode;

/// Une instruction décodée, avec ses opérandes déjà résolus en valeurs
/// natives (aucune lecture d'octet supplémentaire n'est nécessaire pour la
/// consommer).
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `nop`.
    Nop,
    /// `pop`.
    Pop,
    /// `dup`.
    Dup,
    /// `dup2`.
    Dup2,
    /// `swap`.
    Swap,
    /// `rot`.
    Rot,
    /// `enter <locals>`.
    Enter {
        /// Nombre de slots locaux déclarés.
        locals: u16,
    },
    /// `const.i8`.
    ConstI8(i8),
    /// `const.i16`.
    ConstI16(i16),
    /// `const.i32`.
    ConstI32(i32),
    /// `const.i64`.
    ConstI64(i64),
    /// `const.u8`.
    ConstU8(u8),
    /// `const.u16`.
    ConstU16(u16),
    /// `const.u32`.
    ConstU32(u32),
    /// `const.u64`.
    ConstU64(u64),
    /// `const.f32`.
    ConstF32(f32),
    /// `const.f64`.
    ConstF64(f64),
    /// `const.bool`.
    ConstBool(bool),
    /// `const.char`.
    ConstChar(char),
    /// `const.string <const_id>`.
    ConstString(u32),
    /// `const.null`.
    ConstNull,
    /// `add.i32`.
    AddI32,
    /// `sub.i32`.
    SubI32,
    /// `mul.i32`.
    MulI32,
    /// `div.i32`.
    DivI32,
    /// `rem.i32`.
    RemI32,
    /// `neg.i32`.
    NegI32,
    /// `add.i64`.
    AddI64,
    /// `sub.i64`.
    SubI64,
    /// `mul.i64`.
    MulI64,
    /// `div.i64`.
    DivI64,
    /// `rem.i64`.
    RemI64,
    /// `neg.i64`.
    NegI64,
    /// `add.f32`.
    AddF32,
    /// `sub.f32`.
    SubF32,
    /// `mul.f32`.
    MulF32,
    /// `div.f32`.
    DivF32,
    /// `neg.f32`.
    NegF32,
    /// `add.f64`.
    AddF64,
    /// `sub.f64`.
    SubF64,
    /// `mul.f64`.
    MulF64,
    /// `div.f64`.
    DivF64,
    /// `neg.f64`.
    NegF64,
    /// `cmp.eq.i32`.
    CmpEqI32,
    /// `cmp.ne.i32`.
    CmpNeI32,
    /// `cmp.lt.i32`.
    CmpLtI32,
    /// `cmp.le.i32`.
    CmpLeI32,
    /// `cmp.gt.i32`.
    CmpGtI32,
    /// `cmp.ge.i32`.
    CmpGeI32,
    /// `cmp.lt.u32`.
    CmpLtU32,
    /// `cmp.le.u32`.
    CmpLeU32,
    /// `cmp.gt.u32`.
    CmpGtU32,
    /// `cmp.ge.u32`.
    CmpGeU32,
    /// `cmp.eq.i64`.
    CmpEqI64,
    /// `cmp.ne.i64`.
    CmpNeI64,
    /// `cmp.lt.i64`.
    CmpLtI64,
    /// `cmp.le.i64`.
    CmpLeI64,
    /// `cmp.gt.i64`.
    CmpGtI64,
    /// `cmp.ge.i64`.
    CmpGeI64,
    /// `cmp.lt.u64`.
    CmpLtU64,
    /// `cmp.le.u64`.
    CmpLeU64,
    /// `cmp.gt.u64`.
    CmpGtU64,
    /// `cmp.ge.u64`.
    CmpGeU64,
    /// `cmp.eq.f32`.
    CmpEqF32,
    /// `cmp.lt.f32`.
    CmpLtF32,
    /// `cmp.le.f32`.
    CmpLeF32,
    /// `cmp.eq.f64`.
    CmpEqF64,
    /// `cmp.lt.f64`.
    CmpLtF64,
    /// `cmp.le.f64`.
    CmpLeF64,
    /// `bool.not`.
    BoolNot,
    /// `bool.and`.
    BoolAnd,
    /// `bool.or`.
    BoolOr,
    /// `and.i32`.
    AndI32,
    /// `or.i32`.
    OrI32,
    /// `xor.i32`.
    XorI32,
    /// `shl.i32`.
    ShlI32,
    /// `shr.i32`.
    ShrI32,
    /// `shr.u32`.
    ShrU32,
    /// `and.i64`.
    AndI64,
    /// `or.i64`.
    OrI64,
    /// `xor.i64`.
    XorI64,
    /// `shl.i64`.
    ShlI64,
    /// `shr.i64`.
    ShrI64,
    /// `shr.u64`.
    ShrU64,
    /// `conv.i32.i64`.
    ConvI32ToI64,
    /// `conv.i64.i32`.
    ConvI64ToI32,
    /// `conv.i32.f32`.
    ConvI32ToF32,
    /// `conv.i32.f64`.
    ConvI32ToF64,
    /// `conv.f32.i32`.
    ConvF32ToI32,
    /// `conv.f64.i32`.
    ConvF64ToI32,
    /// `conv.f32.f64`.
    ConvF32ToF64,
    /// `conv.f64.f32`.
    ConvF64ToF32,
    /// `jmp <rel>`.
    Jmp(i32),
    /// `jmp.true <rel>`.
    JmpTrue(i32),
    /// `jmp.false <rel>`.
    JmpFalse(i32),
    /// `jmptable <cases...> default=<rel>`.
    JmpTable {
        /// Décalages relatifs, dans l'ordre de déclaration.
        cases: Vec<i32>,
        /// Décalage relatif de repli.
        default: i32,
    },
    /// `call <func_id> <argc>`.
    Call {
        /// Identifiant de fonction (espace unifié fonctions/imports).
        func_id: u32,
        /// Nombre d'arguments poppés de la pile appelante.
        argc: u8,
    },
    /// `call.indirect <sig_id> <argc>`.
    CallIndirect {
        /// Signature attendue de la fermeture appelée.
        sig_id: u32,
        /// Nombre d'arguments (hors la fermeture elle-même).
        argc: u8,
    },
    /// `tailcall <func_id> <argc>`.
    TailCall {
        /// Identifiant de fonction statique (jamais une fermeture, §9).
        func_id: u32,
        /// Nombre d'arguments.
        argc: u8,
    },
    /// `ret`.
    Ret,
    /// `callcheck`.
    CallCheck,
    /// `intrinsic <id>`. `id` est un identifiant numérique brut attribué
    /// par l'hôte, pas un index dans une table du module (voir
    /// [`crate::host`]). L'opérande ne porte aucune arité (§6.3) : aucune
    /// signature déclarée ne borne ce contrat pour un intrinsèque, l'hôte
    /// reçoit donc zéro argument poppé par le cœur et renvoie toujours une
    /// unique valeur de retour poussée par l'interpréteur (convention
    /// d'effet de pile fixe).
    Intrinsic {
        /// Identifiant numérique brut.
        id: u32,
    },
    /// `syscall <id>`. Voir [`Instr::Intrinsic`].
    Syscall {
        /// Identifiant numérique brut.
        id: u32,
    },
    /// `ldloc <index>`.
    LdLoc(u32),
    /// `stloc <index>`.
    StLoc(u32),
    /// `ldglob <index>`.
    LdGlob(u32),
    /// `stglob <index>`.
    StGlob(u32),
    /// `ldupv <index>`.
    LdUpv(u32),
    /// `stupv <index>`.
    StUpv(u32),
    /// `newobj <type_id>`.
    NewObj(u32),
    /// `ldfld <field_id>`.
    LdFld(u32),
    /// `stfld <field_id>`.
    StFld(u32),
    /// `typeof`.
    TypeOf,
    /// `isnull`.
    IsNull,
    /// `ref.eq`.
    RefEq,
    /// `ref.ne`.
    RefNe,
    /// `newclosure <method_id> <upvalue_count>`.
    NewClosure {
        /// Méthode fermée.
        method_id: u32,
        /// Nombre d'upvalues poppées de la pile, dans l'ordre source.
        upvalue_count: u8,
    },
    /// `newarray <type_id> <length>`.
    NewArray {
        /// Type d'élément.
        type_id: u32,
        /// Longueur fixe.
        length: u32,
    },
    /// `array.len`.
    ArrayLen,
    /// `array.get`.
    ArrayGet,
    /// `array.set`.
    ArraySet,
    /// `newlist <type_id> <capacity>`.
    NewList {
        /// Type d'élément.
        type_id: u32,
        /// Capacité initiale (purement indicative).
        capacity: u32,
    },
    /// `list.len`.
    ListLen,
    /// `list.get`.
    ListGet,
    /// `list.set`.
    ListSet,
    /// `list.push`.
    ListPush,
    /// `list.pop`.
    ListPop,
    /// `list.insert`.
    ListInsert,
    /// `list.remove`.
    ListRemove,
    /// `list.clear`.
    ListClear,
    /// `string.len`.
    StringLen,
    /// `string.concat`.
    StringConcat,
    /// `string.get.char`.
    StringGetChar,
    /// `string.slice`.
    StringSlice,
}

/// Erreur de décodage : octet d'opcode inconnu ou corps de fonction tronqué.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum DecodeError {
    /// L'octet à `offset` ne correspond à aucun [`Opcode`] connu.
    #[cfg_attr(feature = "errors", error("unknown opcode byte 0x{byte:02X} at offset {offset}"))]
    UnknownOpcode {
        /// Offset fautif dans le corps de la fonction.
        offset: u32,
        /// Octet lu.
        byte: u8,
    },
    /// Le corps de fonction se termine avant la fin des opérandes attendus.
    #[cfg_attr(feature = "errors", error("truncated instruction at offset {offset}"))]
    Truncated {
        /// Offset de l'opcode dont les opérandes manquent.
        offset: u32,
    },
}

#[cfg(not(feature = "errors"))]
impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode byte 0x{byte:02X} at offset {offset}")
            }
            DecodeError::Truncated { offset } => write!(f, "truncated instruction at offset {offset}"),
        }
    }
}

#[cfg(all(feature = "std", not(feature = "errors")))]
impl std::error::Error for DecodeError {}

struct Cursor<'a> {
    code: &'a [u8],
    off: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self, start: u32) -> Result<u8, DecodeError> {
        let b = *self.code.get(self.off).ok_or(DecodeError::Truncated { offset: start })?;
        self.off += 1;
        Ok(b)
    }
    fn u16(&mut self, start: u32) -> Result<u16, DecodeError> {
        let lo = self.u8(start)?;
        let hi = self.u8(start)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }
    fn u32(&mut self, start: u32) -> Result<u32, DecodeError> {
        let mut b = [0u8; 4];
        for slot in &mut b {
            *slot = self.u8(start)?;
        }
        Ok(u32::from_le_bytes(b))
    }
    fn i32(&mut self, start: u32) -> Result<i32, DecodeError> { Ok(self.u32(start)? as i32) }
    fn u64(&mut self, start: u32) -> Result<u64, DecodeError> {
        let mut b = [0u8; 8];
        for slot in &mut b {
            *slot = self.u8(start)?;
        }
        Ok(u64::from_le_bytes(b))
    }
    fn i64(&mut self, start: u32) -> Result<i64, DecodeError> { Ok(self.u64(start)? as i64) }
}

/// Décode une instruction à `offset` dans `code` et renvoie l'instruction
/// ainsi que l'offset de la suivante.
pub fn decode_at(code: &[u8], offset: u32) -> Result<(Instr, u32), DecodeError> {
    let start = offset;
    let mut c = Cursor { code, off: offset as usize };
    let opcode_byte = c.u8(start)?;
    let opcode = Opcode::from_u8(opcode_byte).ok_or(DecodeError::UnknownOpcode { offset, byte: opcode_byte })?;

    let instr = match opcode {
        Opcode::Nop => Instr::Nop,
        Opcode::Pop => Instr::Pop,
        Opcode::Dup => Instr::Dup,
        Opcode::Dup2 => Instr::Dup2,
        Opcode::Swap => Instr::Swap,
        Opcode::Rot => Instr::Rot,
        Opcode::Enter => Instr::Enter { locals: c.u16(start)? },
        Opcode::ConstI8 => Instr::ConstI8(c.u8(start)? as i8),
        Opcode::ConstI16 => Instr::ConstI16(c.u16(start)? as i16),
        Opcode::ConstI32 => Instr::ConstI32(c.i32(start)?),
        Opcode::ConstI64 => Instr::ConstI64(c.i64(start)?),
        Opcode::ConstU8 => Instr::ConstU8(c.u8(start)?),
        Opcode::ConstU16 => Instr::ConstU16(c.u16(start)?),
        Opcode::ConstU32 => Instr::ConstU32(c.u32(start)?),
        Opcode::ConstU64 => Instr::ConstU64(c.i64(start)? as u64),
        Opcode::ConstF32 => Instr::ConstF32(f32::from_bits(c.u32(start)?)),
        Opcode::ConstF64 => Instr::ConstF64(f64::from_bits(c.u64(start)?)),
        Opcode::ConstBool => Instr::ConstBool(c.u8(start)? != 0),
        Opcode::ConstChar => {
            let raw = c.u16(start)?;
            Instr::ConstChar(char::from_u32(u32::from(raw)).unwrap_or('\u{FFFD}'))
        }
        Opcode::ConstString => Instr::ConstString(c.u32(start)?),
        Opcode::ConstNull => Instr::ConstNull,

        Opcode::AddI32 => Instr::AddI32,
        Opcode::SubI32 => Instr::SubI32,
        Opcode::MulI32 => Instr::MulI32,
        Opcode::DivI32 => Instr::DivI32,
        Opcode::RemI32 => Instr::RemI32,
        Opcode::NegI32 => Instr::NegI32,
        Opcode::AddI64 => Instr::AddI64,
        Opcode::SubI64 => Instr::SubI64,
        Opcode::MulI64 => Instr::MulI64,
        Opcode::DivI64 => Instr::DivI64,
        Opcode::RemI64 => Instr::RemI64,
        Opcode::NegI64 => Instr::NegI64,
        Opcode::AddF32 => Instr::AddF32,
        Opcode::SubF32 => Instr::SubF32,
        Opcode::MulF32 => Instr::MulF32,
        Opcode::DivF32 => Instr::DivF32,
        Opcode::NegF32 => Instr::NegF32,
        Opcode::AddF64 => Instr::AddF64,
        Opcode::SubF64 => Instr::SubF64,
        Opcode::MulF64 => Instr::MulF64,
        Opcode::DivF64 => Instr::DivF64,
        Opcode::NegF64 => Instr::NegF64,

        Opcode::CmpEqI32 => Instr::CmpEqI32,
        Opcode::CmpNeI32 => Instr::CmpNeI32,
        Opcode::CmpLtI32 => Instr::CmpLtI32,
        Opcode::CmpLeI32 => Instr::CmpLeI32,
        Opcode::CmpGtI32 => Instr::CmpGtI32,
        Opcode::CmpGeI32 => Instr::CmpGeI32,
        Opcode::CmpLtU32 => Instr::CmpLtU32,
        Opcode::CmpLeU32 => Instr::CmpLeU32,
        Opcode::CmpGtU32 => Instr::CmpGtU32,
        Opcode::CmpGeU32 => Instr::CmpGeU32,
        Opcode::CmpEqI64 => Instr::CmpEqI64,
        Opcode::CmpNeI64 => Instr::CmpNeI64,
        Opcode::CmpLtI64 => Instr::CmpLtI64,
        Opcode::CmpLeI64 => Instr::CmpLeI64,
        Opcode::CmpGtI64 => Instr::CmpGtI64,
        Opcode::CmpGeI64 => Instr::CmpGeI64,
        Opcode::CmpLtU64 => Instr::CmpLtU64,
        Opcode::CmpLeU64 => Instr::CmpLeU64,
        Opcode::CmpGtU64 => Instr::CmpGtU64,
        Opcode::CmpGeU64 => Instr::CmpGeU64,
        Opcode::CmpEqF32 => Instr::CmpEqF32,
        Opcode::CmpLtF32 => Instr::CmpLtF32,
        Opcode::CmpLeF32 => Instr::CmpLeF32,
        Opcode::CmpEqF64 => Instr::CmpEqF64,
        Opcode::CmpLtF64 => Instr::CmpLtF64,
        Opcode::CmpLeF64 => Instr::CmpLeF64,

        Opcode::BoolNot => Instr::BoolNot,
        Opcode::BoolAnd => Instr::BoolAnd,
        Opcode::BoolOr => Instr::BoolOr,

        Opcode::AndI32 => Instr::AndI32,
        Opcode::OrI32 => Instr::OrI32,
        Opcode::XorI32 => Instr::XorI32,
        Opcode::ShlI32 => Instr::ShlI32,
        Opcode::ShrI32 => Instr::ShrI32,
        Opcode::ShrU32 => Instr::ShrU32,
        Opcode::AndI64 => Instr::AndI64,
        Opcode::OrI64 => Instr::OrI64,
        Opcode::XorI64 => Instr::XorI64,
        Opcode::ShlI64 => Instr::ShlI64,
        Opcode::ShrI64 => Instr::ShrI64,
        Opcode::ShrU64 => Instr::ShrU64,

        Opcode::ConvI32ToI64 => Instr::ConvI32ToI64,
        Opcode::ConvI64ToI32 => Instr::ConvI64ToI32,
        Opcode::ConvI32ToF32 => Instr::ConvI32ToF32,
        Opcode::ConvI32ToF64 => Instr::ConvI32ToF64,
        Opcode::ConvF32ToI32 => Instr::ConvF32ToI32,
        Opcode::ConvF64ToI32 => Instr::ConvF64ToI32,
        Opcode::ConvF32ToF64 => Instr::ConvF32ToF64,
        Opcode::ConvF64ToF32 => Instr::ConvF64ToF32,

        Opcode::Jmp => Instr::Jmp(c.i32(start)?),
        Opcode::JmpTrue => Instr::JmpTrue(c.i32(start)?),
        Opcode::JmpFalse => Instr::JmpFalse(c.i32(start)?),
        Opcode::JmpTable => {
            let count = c.u32(start)?;
            let mut cases = Vec::with_capacity(count as usize);
            for _ in 0..count {
                cases.push(c.i32(start)?);
            }
            let default = c.i32(start)?;
            Instr::JmpTable { cases, default }
        }

        Opcode::Call => Instr::Call { func_id: c.u32(start)?, argc: c.u8(start)? },
        Opcode::CallIndirect => Instr::CallIndirect { sig_id: c.u32(start)?, argc: c.u8(start)? },
        Opcode::TailCall => Instr::TailCall { func_id: c.u32(start)?, argc: c.u8(start)? },
        Opcode::Ret => Instr::Ret,
        Opcode::CallCheck => Instr::CallCheck,

        Opcode::Intrinsic => Instr::Intrinsic { id: c.u32(start)? },
        Opcode::Syscall => Instr::Syscall { id: c.u32(start)? },

        Opcode::LdLoc => Instr::LdLoc(c.u32(start)?),
        Opcode::StLoc => Instr::StLoc(c.u32(start)?),
        Opcode::LdGlob => Instr::LdGlob(c.u32(start)?),
        Opcode::StGlob => Instr::StGlob(c.u32(start)?),
        Opcode::LdUpv => Instr::LdUpv(c.u32(start)?),
        Opcode::StUpv => Instr::StUpv(c.u32(start)?),

        Opcode::NewObj => Instr::NewObj(c.u32(start)?),
        Opcode::LdFld => Instr::LdFld(c.u32(start)?),
        Opcode::StFld => Instr::StFld(c.u32(start)?),

        Opcode::TypeOf => Instr::TypeOf,
        Opcode::IsNull => Instr::IsNull,
        Opcode::RefEq => Instr::RefEq,
        Opcode::RefNe => Instr::RefNe,

        Opcode::NewClosure => Instr::NewClosure { method_id: c.u32(start)?, upvalue_count: c.u8(start)? },

        Opcode::NewArray => Instr::NewArray { type_id: c.u32(start)?, length: c.u32(start)? },
        Opcode::ArrayLen => Instr::ArrayLen,
        Opcode::ArrayGet => Instr::ArrayGet,
        Opcode::ArraySet => Instr::ArraySet,

        Opcode::NewList => Instr::NewList { type_id: c.u32(start)?, capacity: c.u32(start)? },
        Opcode::ListLen => Instr::ListLen,
        Opcode::ListGet => Instr::ListGet,
        Opcode::ListSet => Instr::ListSet,
        Opcode::ListPush => Instr::ListPush,
        Opcode::ListPop => Instr::ListPop,
        Opcode::ListInsert => Instr::ListInsert,
        Opcode::ListRemove => Instr::ListRemove,
        Opcode::ListClear => Instr::ListClear,

        Opcode::StringLen => Instr::StringLen,
        Opcode::StringConcat => Instr::StringConcat,
        Opcode::StringGetChar => Instr::StringGetChar,
        Opcode::StringSlice => Instr::StringSlice,
    };

    Ok((instr, c.off as u32))
}

/// Cible absolue d'un branchement simple (`jmp`/`jmp.true`/`jmp.false`),
/// dont l'opcode démarre à `start` et dont l'opérande relatif est `rel`.
///
/// Le décalage encodé est relatif à l'octet immédiatement après
/// l'emplacement réservé de 4 octets (§6.1), c'est-à-dire `start + 1 + 4`
/// (1 octet d'opcode puis le champ `i32`) — la même formule que
/// `IrBuilder::finish` utilise pour écrire ce décalage
/// (`target - (patch_offset + 4)`).
#[must_use]
pub fn single_branch_target(start: u32, rel: i32) -> u32 {
    ((i64::from(start) + 1 + 4) + i64::from(rel)) as u32
}

/// Cible absolue du cas `case_index` (0-based) d'un `jmptable` dont
/// l'opcode démarre à `start` et qui déclare `case_count` cas.
///
/// Disposition : 1 octet d'opcode, 4 octets de compte, puis `case_count`
/// champs `i32` de 4 octets chacun. Le champ du cas `i` réserve ses propres
/// 4 octets à `start + 5 + 4*i`, donc sa cible est relative à
/// `start + 9 + 4*i` — chaque cas a son propre fixup indépendant
/// ([`crate`] module doc / `vitte_ir::builder`), pas relatif à la fin de
/// l'instruction entière.
#[must_use]
pub fn jmptable_case_target(start: u32, case_index: u32, rel: i32) -> u32 {
    let slot_start = i64::from(start) + 1 + 4 + 4 * i64::from(case_index);
    ((slot_start + 4) + i64::from(rel)) as u32
}

/// Cible absolue du cas `default` d'un `jmptable` déclarant `case_count`
/// cas, suivant la même convention que [`jmptable_case_target`] (le champ
/// `default` vient juste après le dernier cas).
#[must_use]
pub fn jmptable_default_target(start: u32, case_count: u32, rel: i32) -> u32 {
    jmptable_case_target(start, case_count, rel)
}

/// Construit la carte des offsets qui sont effectivement des débuts
/// d'instruction dans `code`, en décodant le corps de fonction en une seule
/// passe linéaire (§4.6 : "tracked via a bitmap built during decode").
///
/// `boundaries[i]` est vrai si et seulement si `i` est le premier octet
/// d'une instruction.
pub fn instruction_boundaries(code: &[u8]) -> Result<Vec<bool>, DecodeError> {
    let mut boundaries = vec![false; code.len() + 1];
    let mut offset = 0u32;
    while (offset as usize) < code.len() {
        boundaries[offset as usize] = true;
        let (_, next) = decode_at(code, offset)?;
        offset = next;
    }
    boundaries[code.len()] = true;
    Ok(boundaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_enter_and_ret() {
        let code = [0x06, 0x00, 0x00, 0xA3];
        let (i0, n0) = decode_at(&code, 0).unwrap();
        assert_eq!(i0, Instr::Enter { locals: 0 });
        assert_eq!(n0, 3);
        let (i1, n1) = decode_at(&code, 3).unwrap();
        assert_eq!(i1, Instr::Ret);
        assert_eq!(n1, 4);
    }

    #[test]
    fn decodes_call_with_arity_byte() {
        let code = [0xA0, 0x07, 0x00, 0x00, 0x00, 0x02];
        let (i, n) = decode_at(&code, 0).unwrap();
        assert_eq!(i, Instr::Call { func_id: 7, argc: 2 });
        assert_eq!(n, 6);
    }

    #[test]
    fn decodes_jmp_table() {
        // jmptable: 2 cases + default
        let mut code = vec![0x93];
        code.extend_from_slice(&2u32.to_le_bytes());
        code.extend_from_slice(&10i32.to_le_bytes());
        code.extend_from_slice(&20i32.to_le_bytes());
        code.extend_from_slice(&(-5i32).to_le_bytes());
        let (i, n) = decode_at(&code, 0).unwrap();
        assert_eq!(i, Instr::JmpTable { cases: vec![10, 20], default: -5 });
        assert_eq!(n, code.len() as u32);
    }

    #[test]
    fn single_branch_target_zero_delta_is_next_instruction() {
        // jmp at offset 0 (opcode + 4-byte operand) with delta 0 lands
        // right after its own operand field, i.e. offset 5 (§8 property 2).
        assert_eq!(single_branch_target(0, 0), 5);
    }

    #[test]
    fn jmptable_targets_use_their_own_slot_not_the_instruction_end() {
        // jmptable at offset 10, 2 cases: case 0's slot is [10+5, 10+9),
        // case 1's slot is [10+9, 10+13), default's slot is [10+13, 10+17).
        assert_eq!(jmptable_case_target(10, 0, 0), 19);
        assert_eq!(jmptable_case_target(10, 1, 0), 23);
        assert_eq!(jmptable_default_target(10, 2, 0), 27);
    }

    #[test]
    fn unknown_opcode_byte_is_rejected() {
        let code = [0xFF];
        assert!(matches!(decode_at(&code, 0), Err(DecodeError::UnknownOpcode { byte: 0xFF, .. })));
    }

    #[test]
    fn truncated_operand_is_rejected() {
        let code = [0x12, 0x01]; // const.i32 needs 4 bytes, only 1 given
        assert!(matches!(decode_at(&code, 0), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn instruction_boundaries_mark_only_opcode_starts() {
        let code = [0x06, 0x00, 0x00, 0xA3]; // enter 0 ; ret
        let b = instruction_boundaries(&code).unwrap();
        assert!(b[0]);
        assert!(!b[1]);
        assert!(!b[2]);
        assert!(b[3]);
        assert!(b[4]);
    }
}
