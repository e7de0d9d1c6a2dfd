//! `IrBuilder` : assemble le bytecode d'une fonction, octet par octet, et
//! résout les branchements avant/arrière via une liste de fixups.
//!
//! Chaque branchement (`jmp`, `jmp.true`, `jmp.false`, une entrée de
//! `jmptable`) réserve 4 octets à zéro au moment de l'émission et enregistre
//! un [`Fixup`] ; [`IrBuilder::finish`] patche chacun de ces emplacements une
//! fois toutes les cibles connues, avec `target - (patch_offset + 4)` encodé
//! en `i32` little-endian. Les labels forment une table indexée par id :
//! `-1` signifie non lié.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use vitte_core::ByteWriter;
use vitte_vitbc::Opcode;

/// Identifiant opaque d'un label dans le contexte d'une fonction en cours
/// d'assemblage. N'a de sens que pour l'[`IrBuilder`] qui l'a créé.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrLabel(u32);

/// Erreurs de résolution de labels, produites par [`IrBuilder::bind_label`]
/// et [`IrBuilder::finish`].
#[derive(Debug)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum LabelError {
    /// `finish` a rencontré un fixup dont le label n'a jamais été lié.
    #[cfg_attr(feature = "errors", error("label {0} is not bound"))]
    Unbound(u32),
    /// `bind_label` a été appelé deux fois sur le même label.
    #[cfg_attr(feature = "errors", error("label {0} is already bound"))]
    AlreadyBound(u32),
    /// Le label référencé n'a pas été créé par ce builder.
    #[cfg_attr(feature = "errors", error("label id {0} out of range"))]
    OutOfRange(u32),
}

#[cfg(not(feature = "errors"))]
impl core::fmt::Display for LabelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LabelError::Unbound(id) => write!(f, "label {id} is not bound"),
            LabelError::AlreadyBound(id) => write!(f, "label {id} is already bound"),
            LabelError::OutOfRange(id) => write!(f, "label id {id} out of range"),
        }
    }
}

#[cfg(all(feature = "std", not(feature = "errors")))]
impl std::error::Error for LabelError {}

struct Fixup {
    label: IrLabel,
    patch_offset: u32,
}

/// Assembleur de bytecode pour une seule fonction.
///
/// Une instance par fonction : elle ne connaît ni la table de méthodes ni
/// celle des signatures, seulement les octets qu'on lui dicte d'émettre et
/// les labels internes à cette fonction.
pub struct IrBuilder {
    code: ByteWriter,
    labels: Vec<i64>,
    fixups: Vec<Fixup>,
}

impl Default for IrBuilder {
    fn default() -> Self { Self::new() }
}

impl IrBuilder {
    /// Builder vide, prêt à émettre le préambule (`enter`) d'une fonction.
    pub fn new() -> Self { Self { code: ByteWriter::new(), labels: Vec::new(), fixups: Vec::new() } }

    /// Crée un label non lié et renvoie son identifiant.
    pub fn create_label(&mut self) -> IrLabel {
        let id = self.labels.len() as u32;
        self.labels.push(-1);
        IrLabel(id)
    }

    /// Lie `label` à la position d'écriture courante. Échoue si le label
    /// était déjà lié ou n'appartient pas à ce builder.
    pub fn bind_label(&mut self, label: IrLabel) -> Result<(), LabelError> {
        let slot = self.labels.get_mut(label.0 as usize).ok_or(LabelError::OutOfRange(label.0))?;
        if *slot != -1 {
            return Err(LabelError::AlreadyBound(label.0));
        }
        *slot = self.code.len() as i64;
        Ok(())
    }

    /// Offset d'écriture courant dans le tampon de code de cette fonction.
    pub fn offset(&self) -> u32 { self.code.len() as u32 }

    fn emit_op(&mut self, op: Opcode) { self.code.write_u8(op as u8); }

    fn reserve_fixup(&mut self, label: IrLabel) {
        let patch_offset = self.code.len() as u32;
        self.code.write_i32_le(0);
        self.fixups.push(Fixup { label, patch_offset });
    }

    /// Patche tous les fixups enregistrés et renvoie le code final.
    ///
    /// Échoue dès le premier label non lié ; aucune mutation n'a lieu en
    /// dehors de cette méthode une fois l'assemblage commencé.
    pub fn finish(mut self) -> Result<Vec<u8>, LabelError> {
        for fx in &self.fixups {
            let target = *self.labels.get(fx.label.0 as usize).ok_or(LabelError::OutOfRange(fx.label.0))?;
            if target < 0 {
                return Err(LabelError::Unbound(fx.label.0));
            }
            let delta = (target - (i64::from(fx.patch_offset) + 4)) as i32;
            self.code.patch_at(fx.patch_offset as usize, &delta.to_le_bytes());
        }
        Ok(self.code.into_vec())
    }

    // ───────────────────────── Pile ─────────────────────────

    /// `nop` : aucun effet.
    pub fn emit_nop(&mut self) { self.emit_op(Opcode::Nop); }
    /// `pop` : retire le sommet de pile.
    pub fn emit_pop(&mut self) { self.emit_op(Opcode::Pop); }
    /// `dup` : duplique le sommet de pile.
    pub fn emit_dup(&mut self) { self.emit_op(Opcode::Dup); }
    /// `dup2` : duplique les deux valeurs de sommet en conservant l'ordre.
    pub fn emit_dup2(&mut self) { self.emit_op(Opcode::Dup2); }
    /// `swap` : échange les deux valeurs de sommet.
    pub fn emit_swap(&mut self) { self.emit_op(Opcode::Swap); }
    /// `rot` : `c b a` (a au sommet) devient `b a c`.
    pub fn emit_rot(&mut self) { self.emit_op(Opcode::Rot); }

    /// `enter <locals>` : prologue de fonction, réserve `locals` emplacements.
    pub fn emit_enter(&mut self, locals: u16) {
        self.emit_op(Opcode::Enter);
        self.code.write_u16_le(locals);
    }

    // ───────────────────────── Constantes ─────────────────────────

    /// `const.i8`.
    pub fn emit_const_i8(&mut self, v: i8) {
        self.emit_op(Opcode::ConstI8);
        self.code.write_u8(v as u8);
    }
    /// `const.i16`.
    pub fn emit_const_i16(&mut self, v: i16) {
        self.emit_op(Opcode::ConstI16);
        self.code.write_u16_le(v as u16);
    }
    /// `const.i32`.
    pub fn emit_const_i32(&mut self, v: i32) {
        self.emit_op(Opcode::ConstI32);
        self.code.write_i32_le(v);
    }
    /// `const.i64`.
    pub fn emit_const_i64(&mut self, v: i64) {
        self.emit_op(Opcode::ConstI64);
        self.code.write_i64_le(v);
    }
    /// `const.u8`.
    pub fn emit_const_u8(&mut self, v: u8) {
        self.emit_op(Opcode::ConstU8);
        self.code.write_u8(v);
    }
    /// `const.u16`.
    pub fn emit_const_u16(&mut self, v: u16) {
        self.emit_op(Opcode::ConstU16);
        self.code.write_u16_le(v);
    }
    /// `const.u32`.
    pub fn emit_const_u32(&mut self, v: u32) {
        self.emit_op(Opcode::ConstU32);
        self.code.write_u32_le(v);
    }
    /// `const.u64`.
    pub fn emit_const_u64(&mut self, v: u64) {
        self.emit_op(Opcode::ConstU64);
        self.code.write_i64_le(v as i64);
    }
    /// `const.f32`.
    pub fn emit_const_f32(&mut self, v: f32) {
        self.emit_op(Opcode::ConstF32);
        self.code.write_u32_le(v.to_bits());
    }
    /// `const.f64`.
    pub fn emit_const_f64(&mut self, v: f64) {
        self.emit_op(Opcode::ConstF64);
        self.code.write_u64_le(v.to_bits());
    }
    /// `const.bool`.
    pub fn emit_const_bool(&mut self, v: bool) {
        self.emit_op(Opcode::ConstBool);
        self.code.write_u8(u8::from(v));
    }
    /// `const.char`. Wire width is `u16` (§6.3); the caller is responsible
    /// for range-checking `v` to the BMP (`<= 0xFFFF`) before calling this,
    /// same as every other numeric range check done once at lower time.
    pub fn emit_const_char(&mut self, v: char) {
        self.emit_op(Opcode::ConstChar);
        self.code.write_u16_le(v as u32 as u16);
    }
    /// `const.string <const_id>`.
    pub fn emit_const_string(&mut self, const_id: u32) {
        self.emit_op(Opcode::ConstString);
        self.code.write_u32_le(const_id);
    }
    /// `const.null` : pousse une référence nulle.
    pub fn emit_const_null(&mut self) { self.emit_op(Opcode::ConstNull); }

    // ───────────────────────── Branchements ─────────────────────────

    /// `jmp <label>` : branchement inconditionnel.
    pub fn emit_jmp(&mut self, label: IrLabel) {
        self.emit_op(Opcode::Jmp);
        self.reserve_fixup(label);
    }
    /// `jmp.true <label>` : branche si la valeur poppée est vraie.
    pub fn emit_jmp_true(&mut self, label: IrLabel) {
        self.emit_op(Opcode::JmpTrue);
        self.reserve_fixup(label);
    }
    /// `jmp.false <label>` : branche si la valeur poppée est fausse.
    pub fn emit_jmp_false(&mut self, label: IrLabel) {
        self.emit_op(Opcode::JmpFalse);
        self.reserve_fixup(label);
    }

    /// `jmptable <cases...> default=<label>` : pop un `i32`, branche vers
    /// `cases[i]` si `i` est dans les bornes, sinon vers `default`. Les cas
    /// sont résolus dans l'ordre de la liste, le repli en dernier.
    pub fn emit_jmp_table(&mut self, cases: &[IrLabel], default: IrLabel) {
        self.emit_op(Opcode::JmpTable);
        self.code.write_u32_le(cases.len() as u32);
        for &case in cases {
            self.reserve_fixup(case);
        }
        self.reserve_fixup(default);
    }

    // ───────────────────────── Appels ─────────────────────────

    /// `call <func_id> <argc>`.
    pub fn emit_call(&mut self, func_id: u32, argc: u8) {
        self.emit_op(Opcode::Call);
        self.code.write_u32_le(func_id);
        self.code.write_u8(argc);
    }
    /// `call.indirect <sig_id> <argc>` : pop une fermeture avant les arguments.
    pub fn emit_call_indirect(&mut self, sig_id: u32, argc: u8) {
        self.emit_op(Opcode::CallIndirect);
        self.code.write_u32_le(sig_id);
        self.code.write_u8(argc);
    }
    /// `tailcall <func_id> <argc>` : remplace la frame courante.
    pub fn emit_tailcall(&mut self, func_id: u32, argc: u8) {
        self.emit_op(Opcode::TailCall);
        self.code.write_u32_le(func_id);
        self.code.write_u8(argc);
    }
    /// `ret`.
    pub fn emit_ret(&mut self) { self.emit_op(Opcode::Ret); }
    /// `callcheck` : barrière de cohérence sans effet sur la pile.
    pub fn emit_callcheck(&mut self) { self.emit_op(Opcode::CallCheck); }

    /// `intrinsic <id>` : opérande `u32` seul (§6.3), arité laissée à l'hôte.
    pub fn emit_intrinsic(&mut self, id: u32) {
        self.emit_op(Opcode::Intrinsic);
        self.code.write_u32_le(id);
    }
    /// `syscall <id>`. Voir [`Self::emit_intrinsic`].
    pub fn emit_syscall(&mut self, id: u32) {
        self.emit_op(Opcode::Syscall);
        self.code.write_u32_le(id);
    }

    // ───────────────────────── Locaux / globaux / upvalues ─────────────────────────

    /// `ldloc <index>`.
    pub fn emit_ldloc(&mut self, index: u32) { self.emit_u32_op(Opcode::LdLoc, index); }
    /// `stloc <index>`.
    pub fn emit_stloc(&mut self, index: u32) { self.emit_u32_op(Opcode::StLoc, index); }
    /// `ldglob <index>`.
    pub fn emit_ldglob(&mut self, index: u32) { self.emit_u32_op(Opcode::LdGlob, index); }
    /// `stglob <index>`.
    pub fn emit_stglob(&mut self, index: u32) { self.emit_u32_op(Opcode::StGlob, index); }
    /// `ldupv <index>`.
    pub fn emit_ldupv(&mut self, index: u32) { self.emit_u32_op(Opcode::LdUpv, index); }
    /// `stupv <index>`.
    pub fn emit_stupv(&mut self, index: u32) { self.emit_u32_op(Opcode::StUpv, index); }

    fn emit_u32_op(&mut self, op: Opcode, v: u32) {
        self.emit_op(op);
        self.code.write_u32_le(v);
    }

    // ───────────────────────── Objets / champs / réflexion ─────────────────────────

    /// `newobj <type_id>`.
    pub fn emit_newobj(&mut self, type_id: u32) { self.emit_u32_op(Opcode::NewObj, type_id); }
    /// `ldfld <field_id>`.
    pub fn emit_ldfld(&mut self, field_id: u32) { self.emit_u32_op(Opcode::LdFld, field_id); }
    /// `stfld <field_id>`.
    pub fn emit_stfld(&mut self, field_id: u32) { self.emit_u32_op(Opcode::StFld, field_id); }

    /// `typeof`.
    pub fn emit_typeof(&mut self) { self.emit_op(Opcode::TypeOf); }
    /// `isnull`.
    pub fn emit_isnull(&mut self) { self.emit_op(Opcode::IsNull); }
    /// `ref.eq`.
    pub fn emit_ref_eq(&mut self) { self.emit_op(Opcode::RefEq); }
    /// `ref.ne`.
    pub fn emit_ref_ne(&mut self) { self.emit_op(Opcode::RefNe); }

    // ───────────────────────── Fermetures ─────────────────────────

    /// `newclosure <method_id> <upvalue_count>`.
    pub fn emit_newclosure(&mut self, method_id: u32, upvalue_count: u8) {
        self.emit_op(Opcode::NewClosure);
        self.code.write_u32_le(method_id);
        self.code.write_u8(upvalue_count);
    }

    // ───────────────────────── Tableaux / listes ─────────────────────────

    /// `newarray <type_id> <length>`.
    pub fn emit_newarray(&mut self, type_id: u32, length: u32) {
        self.emit_op(Opcode::NewArray);
        self.code.write_u32_le(type_id);
        self.code.write_u32_le(length);
    }
    /// `newlist <type_id> <capacity>`.
    pub fn emit_newlist(&mut self, type_id: u32, capacity: u32) {
        self.emit_op(Opcode::NewList);
        self.code.write_u32_le(type_id);
        self.code.write_u32_le(capacity);
    }
}

macro_rules! simple_ops {
    ($( $(#[$meta:meta])* $method:ident => $variant:ident ),+ $(,)?) => {
        impl IrBuilder {
            $(
                $(#[$meta])*
                #[allow(missing_docs)]
                pub fn $method(&mut self) { self.emit_op(Opcode::$variant); }
            )+
        }
    };
}

simple_ops! {
    /// `add.i32`.
    emit_add_i32 => AddI32,
    /// `sub.i32`.
    emit_sub_i32 => SubI32,
    /// `mul.i32`.
    emit_mul_i32 => MulI32,
    /// `div.i32`.
    emit_div_i32 => DivI32,
    /// `rem.i32`.
    emit_rem_i32 => RemI32,
    /// `neg.i32`.
    emit_neg_i32 => NegI32,
    /// `add.i64`.
    emit_add_i64 => AddI64,
    /// `sub.i64`.
    emit_sub_i64 => SubI64,
    /// `mul.i64`.
    emit_mul_i64 => MulI64,
    /// `div.i64`.
    emit_div_i64 => DivI64,
    /// `rem.i64`.
    emit_rem_i64 => RemI64,
    /// `neg.i64`.
    emit_neg_i64 => NegI64,
    /// `add.f32`.
    emit_add_f32 => AddF32,
    /// `sub.f32`.
    emit_sub_f32 => SubF32,
    /// `mul.f32`.
    emit_mul_f32 => MulF32,
    /// `div.f32`.
    emit_div_f32 => DivF32,
    /// `neg.f32`.
    emit_neg_f32 => NegF32,
    /// `add.f64`.
    emit_add_f64 => AddF64,
    /// `sub.f64`.
    emit_sub_f64 => SubF64,
    /// `mul.f64`.
    emit_mul_f64 => MulF64,
    /// `div.f64`.
    emit_div_f64 => DivF64,
    /// `neg.f64`.
    emit_neg_f64 => NegF64,
    /// `cmp.eq.i32`.
    emit_cmp_eq_i32 => CmpEqI32,
    /// `cmp.ne.i32`.
    emit_cmp_ne_i32 => CmpNeI32,
    /// `cmp.lt.i32`.
    emit_cmp_lt_i32 => CmpLtI32,
    /// `cmp.le.i32`.
    emit_cmp_le_i32 => CmpLeI32,
    /// `cmp.gt.i32`.
    emit_cmp_gt_i32 => CmpGtI32,
    /// `cmp.ge.i32`.
    emit_cmp_ge_i32 => CmpGeI32,
    /// `cmp.lt.u32`.
    emit_cmp_lt_u32 => CmpLtU32,
    /// `cmp.le.u32`.
    emit_cmp_le_u32 => CmpLeU32,
    /// `cmp.gt.u32`.
    emit_cmp_gt_u32 => CmpGtU32,
    /// `cmp.ge.u32`.
    emit_cmp_ge_u32 => CmpGeU32,
    /// `cmp.eq.i64`.
    emit_cmp_eq_i64 => CmpEqI64,
    /// `cmp.ne.i64`.
    emit_cmp_ne_i64 => CmpNeI64,
    /// `cmp.lt.i64`.
    emit_cmp_lt_i64 => CmpLtI64,
    /// `cmp.le.i64`.
    emit_cmp_le_i64 => CmpLeI64,
    /// `cmp.gt.i64`.
    emit_cmp_gt_i64 => CmpGtI64,
    /// `cmp.ge.i64`.
    emit_cmp_ge_i64 => CmpGeI64,
    /// `cmp.lt.u64`.
    emit_cmp_lt_u64 => CmpLtU64,
    /// `cmp.le.u64`.
    emit_cmp_le_u64 => CmpLeU64,
    /// `cmp.gt.u64`.
    emit_cmp_gt_u64 => CmpGtU64,
    /// `cmp.ge.u64`.
    emit_cmp_ge_u64 => CmpGeU64,
    /// `cmp.eq.f32`.
    emit_cmp_eq_f32 => CmpEqF32,
    /// `cmp.lt.f32`.
    emit_cmp_lt_f32 => CmpLtF32,
    /// `cmp.le.f32`.
    emit_cmp_le_f32 => CmpLeF32,
    /// `cmp.eq.f64`.
    emit_cmp_eq_f64 => CmpEqF64,
    /// `cmp.lt.f64`.
    emit_cmp_lt_f64 => CmpLtF64,
    /// `cmp.le.f64`.
    emit_cmp_le_f64 => CmpLeF64,
    /// `bool.not`.
    emit_bool_not => BoolNot,
    /// `bool.and`.
    emit_bool_and => BoolAnd,
    /// `bool.or`.
    emit_bool_or => BoolOr,
    /// `and.i32`.
    emit_and_i32 => AndI32,
    /// `or.i32`.
    emit_or_i32 => OrI32,
    /// `xor.i32`.
    emit_xor_i32 => XorI32,
    /// `shl.i32`.
    emit_shl_i32 => ShlI32,
    /// `shr.i32`.
    emit_shr_i32 => ShrI32,
    /// `shr.u32`.
    emit_shr_u32 => ShrU32,
    /// `and.i64`.
    emit_and_i64 => AndI64,
    /// `or.i64`.
    emit_or_i64 => OrI64,
    /// `xor.i64`.
    emit_xor_i64 => XorI64,
    /// `shl.i64`.
    emit_shl_i64 => ShlI64,
    /// `shr.i64`.
    emit_shr_i64 => ShrI64,
    /// `shr.u64`.
    emit_shr_u64 => ShrU64,
    /// `conv.i32.i64`.
    emit_conv_i32_i64 => ConvI32ToI64,
    /// `conv.i64.i32`.
    emit_conv_i64_i32 => ConvI64ToI32,
    /// `conv.i32.f32`.
    emit_conv_i32_f32 => ConvI32ToF32,
    /// `conv.i32.f64`.
    emit_conv_i32_f64 => ConvI32ToF64,
    /// `conv.f32.i32`.
    emit_conv_f32_i32 => ConvF32ToI32,
    /// `conv.f64.i32`.
    emit_conv_f64_i32 => ConvF64ToI32,
    /// `conv.f32.f64`.
    emit_conv_f32_f64 => ConvF32ToF64,
    /// `conv.f64.f32`.
    emit_conv_f64_f32 => ConvF64ToF32,
    /// `array.len`.
    emit_array_len => ArrayLen,
    /// `array.get`.
    emit_array_get => ArrayGet,
    /// `array.set`.
    emit_array_set => ArraySet,
    /// `list.len`.
    emit_list_len => ListLen,
    /// `list.get`.
    emit_list_get => ListGet,
    /// `list.set`.
    emit_list_set => ListSet,
    /// `list.push`.
    emit_list_push => ListPush,
    /// `list.pop`.
    emit_list_pop => ListPop,
    /// `list.insert`.
    emit_list_insert => ListInsert,
    /// `list.remove`.
    emit_list_remove => ListRemove,
    /// `list.clear`.
    emit_list_clear => ListClear,
    /// `string.len`.
    emit_string_len => StringLen,
    /// `string.concat`.
    emit_string_concat => StringConcat,
    /// `string.get.char`.
    emit_string_get_char => StringGetChar,
    /// `string.slice`.
    emit_string_slice => StringSlice,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_jump_fixup_matches_documented_formula() {
        let mut b = IrBuilder::new();
        let target = b.create_label();
        b.emit_jmp(target);
        b.emit_nop();
        b.bind_label(target).unwrap();
        b.emit_ret();
        let code = b.finish().unwrap();
        // jmp opcode (1) + i32 operand (4) = 5 bytes, then 1 nop, target at offset 6.
        let delta = i32::from_le_bytes(code[1..5].try_into().unwrap());
        assert_eq!(delta, 6 - (1 + 4));
    }

    #[test]
    fn jump_to_instruction_right_after_operand_has_zero_delta() {
        let mut b = IrBuilder::new();
        let target = b.create_label();
        b.emit_jmp(target);
        b.bind_label(target).unwrap();
        b.emit_ret();
        let code = b.finish().unwrap();
        let delta = i32::from_le_bytes(code[1..5].try_into().unwrap());
        assert_eq!(delta, 0);
    }

    #[test]
    fn unbound_label_fails_finish() {
        let mut b = IrBuilder::new();
        let target = b.create_label();
        b.emit_jmp(target);
        assert!(matches!(b.finish(), Err(LabelError::Unbound(_))));
    }

    #[test]
    fn double_bind_is_rejected() {
        let mut b = IrBuilder::new();
        let l = b.create_label();
        b.bind_label(l).unwrap();
        assert!(matches!(b.bind_label(l), Err(LabelError::AlreadyBound(_))));
    }

    #[test]
    fn backward_jump_has_negative_delta() {
        let mut b = IrBuilder::new();
        let top = b.create_label();
        b.bind_label(top).unwrap();
        b.emit_nop();
        b.emit_jmp(top);
        let code = b.finish().unwrap();
        // jmp operand starts right after `nop` (1) + opcode byte (1) = offset 2.
        let delta = i32::from_le_bytes(code[2..6].try_into().unwrap());
        assert_eq!(delta, 0 - (2 + 4));
    }

    #[test]
    fn jmp_table_reserves_one_fixup_per_case_plus_default() {
        let mut b = IrBuilder::new();
        let a = b.create_label();
        let c = b.create_label();
        b.emit_jmp_table(&[a, a], c);
        b.bind_label(a).unwrap();
        b.bind_label(c).unwrap();
        let code = b.finish().unwrap();
        // opcode(1) + case_count(4) + 2*i32 + default i32 = 1+4+8+4 = 17
        assert_eq!(code.len(), 17);
    }
}
