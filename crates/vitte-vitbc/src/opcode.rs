//! Table des opcodes SBC et disposition de leurs opérandes.
//!
//! Un seul point de vérité pour l'ensemble assembleur/vérificateur/
//! interpréteur : [`Opcode::operand_layout`] décrit combien d'octets suivent
//! l'octet d'opcode et comment les interpréter, afin que `vitte-ir` (qui
//! émet) et `vitte-vm` (qui vérifie et exécute) ne puissent pas diverger.

/// Disposition des opérandes immédiats qui suivent un octet d'opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandLayout {
    /// Aucun opérande immédiat.
    None,
    /// Un seul octet (ex. `const.bool`).
    U8,
    /// Un `u16` (ex. `enter <locals>`, `const.u16`, `const.char`).
    U16,
    /// Un `i16` little-endian signé (`const.i16`).
    I16,
    /// Un `i32` little-endian (ex. `const.i32`, décalage relatif de branche).
    I32,
    /// Un `u32` (index de table : fonction, champ, global, type…).
    U32,
    /// Un `i64` little-endian (`const.i64`).
    I64,
    /// Un `u32` représentant les bits IEEE-754 d'un `f32`.
    F32Bits,
    /// Un `u64` représentant les bits IEEE-754 d'un `f64`.
    F64Bits,
    /// `u32` (identifiant de fonction) + `u8` (arité).
    FuncIdU8,
    /// `u32` (identifiant de signature) + `u8` (arité) — `call.indirect`.
    SigIdU8,
    /// `u32` (identifiant de type) + `u32` (longueur) — `newarray`/`newlist`.
    TypeIdU32,
    /// Table de sauts : `u32` (nombre d'entrées) suivi d'autant d'`i32`
    /// relatifs, plus un `i32` relatif de repli (`default`).
    JumpTable,
}

macro_rules! opcodes {
    ($( $variant:ident = $value:expr => $layout:expr ),+ $(,)?) => {
        /// Un opcode SBC. La représentation numérique (`u8`) est stable et
        /// fait partie du format binaire : ne jamais réordonner les valeurs
        /// explicites ci-dessous.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                #[allow(missing_docs)]
                $variant = $value,
            )+
        }

        impl Opcode {
            /// Décode un octet brut en opcode connu.
            pub fn from_u8(b: u8) -> Option<Self> {
                match b {
                    $( $value => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Disposition des opérandes immédiats qui suivent cet opcode.
            pub const fn operand_layout(self) -> OperandLayout {
                match self {
                    $( Self::$variant => $layout, )+
                }
            }
        }
    };
}

opcodes! {
    // Pile
    Nop        = 0x00 => OperandLayout::None,
    Pop        = 0x01 => OperandLayout::None,
    Dup        = 0x02 => OperandLayout::None,
    Dup2       = 0x03 => OperandLayout::None,
    Swap       = 0x04 => OperandLayout::None,
    Rot        = 0x05 => OperandLayout::None,

    // Prologue de fonction
    Enter      = 0x06 => OperandLayout::U16,

    // Constantes
    ConstI8     = 0x10 => OperandLayout::U8,
    ConstI16    = 0x11 => OperandLayout::I16,
    ConstI32    = 0x12 => OperandLayout::I32,
    ConstI64    = 0x13 => OperandLayout::I64,
    ConstU8     = 0x14 => OperandLayout::U8,
    ConstU16    = 0x15 => OperandLayout::U16,
    ConstU32    = 0x16 => OperandLayout::U32,
    ConstU64    = 0x17 => OperandLayout::I64,
    ConstF32    = 0x18 => OperandLayout::F32Bits,
    ConstF64    = 0x19 => OperandLayout::F64Bits,
    ConstBool   = 0x1A => OperandLayout::U8,
    ConstChar   = 0x1B => OperandLayout::U16,
    ConstString = 0x1C => OperandLayout::U32,
    ConstNull   = 0x1D => OperandLayout::None,

    // Arithmétique entière/flottante (opère sur I32 sauf suffixe)
    AddI32 = 0x20 => OperandLayout::None,
    SubI32 = 0x21 => OperandLayout::None,
    MulI32 = 0x22 => OperandLayout::None,
    DivI32 = 0x23 => OperandLayout::None,
    RemI32 = 0x24 => OperandLayout::None,
    NegI32 = 0x25 => OperandLayout::None,

    AddI64 = 0x26 => OperandLayout::None,
    SubI64 = 0x27 => OperandLayout::None,
    MulI64 = 0x28 => OperandLayout::None,
    DivI64 = 0x29 => OperandLayout::None,
    RemI64 = 0x2A => OperandLayout::None,
    NegI64 = 0x2B => OperandLayout::None,

    AddF32 = 0x2C => OperandLayout::None,
    SubF32 = 0x2D => OperandLayout::None,
    MulF32 = 0x2E => OperandLayout::None,
    DivF32 = 0x2F => OperandLayout::None,
    NegF32 = 0x30 => OperandLayout::None,

    AddF64 = 0x31 => OperandLayout::None,
    SubF64 = 0x32 => OperandLayout::None,
    MulF64 = 0x33 => OperandLayout::None,
    DivF64 = 0x34 => OperandLayout::None,
    NegF64 = 0x35 => OperandLayout::None,

    // Comparaisons (poussent un Bool)
    CmpEqI32  = 0x40 => OperandLayout::None,
    CmpNeI32  = 0x41 => OperandLayout::None,
    CmpLtI32  = 0x42 => OperandLayout::None,
    CmpLeI32  = 0x43 => OperandLayout::None,
    CmpGtI32  = 0x44 => OperandLayout::None,
    CmpGeI32  = 0x45 => OperandLayout::None,
    CmpLtU32  = 0x46 => OperandLayout::None,
    CmpLeU32  = 0x47 => OperandLayout::None,
    CmpGtU32  = 0x48 => OperandLayout::None,
    CmpGeU32  = 0x49 => OperandLayout::None,

    CmpEqI64  = 0x4A => OperandLayout::None,
    CmpNeI64  = 0x4B => OperandLayout::None,
    CmpLtI64  = 0x4C => OperandLayout::None,
    CmpLeI64  = 0x4D => OperandLayout::None,
    CmpGtI64  = 0x4E => OperandLayout::None,
    CmpGeI64  = 0x4F => OperandLayout::None,
    CmpLtU64  = 0x50 => OperandLayout::None,
    CmpLeU64  = 0x51 => OperandLayout::None,
    CmpGtU64  = 0x52 => OperandLayout::None,
    CmpGeU64  = 0x53 => OperandLayout::None,

    CmpEqF32  = 0x54 => OperandLayout::None,
    CmpLtF32  = 0x55 => OperandLayout::None,
    CmpLeF32  = 0x56 => OperandLayout::None,
    CmpEqF64  = 0x57 => OperandLayout::None,
    CmpLtF64  = 0x58 => OperandLayout::None,
    CmpLeF64  = 0x59 => OperandLayout::None,

    // Bool
    BoolNot = 0x60 => OperandLayout::None,
    BoolAnd = 0x61 => OperandLayout::None,
    BoolOr  = 0x62 => OperandLayout::None,

    // Bit à bit (I32/I64)
    AndI32 = 0x68 => OperandLayout::None,
    OrI32  = 0x69 => OperandLayout::None,
    XorI32 = 0x6A => OperandLayout::None,
    ShlI32 = 0x6B => OperandLayout::None,
    ShrI32 = 0x6C => OperandLayout::None,
    ShrU32 = 0x6D => OperandLayout::None,
    AndI64 = 0x6E => OperandLayout::None,
    OrI64  = 0x6F => OperandLayout::None,
    XorI64 = 0x70 => OperandLayout::None,
    ShlI64 = 0x71 => OperandLayout::None,
    ShrI64 = 0x72 => OperandLayout::None,
    ShrU64 = 0x73 => OperandLayout::None,

    // Conversions
    ConvI32ToI64 = 0x80 => OperandLayout::None,
    ConvI64ToI32 = 0x81 => OperandLayout::None,
    ConvI32ToF32 = 0x82 => OperandLayout::None,
    ConvI32ToF64 = 0x83 => OperandLayout::None,
    ConvF32ToI32 = 0x84 => OperandLayout::None,
    ConvF64ToI32 = 0x85 => OperandLayout::None,
    ConvF32ToF64 = 0x86 => OperandLayout::None,
    ConvF64ToF32 = 0x87 => OperandLayout::None,

    // Branchements
    Jmp       = 0x90 => OperandLayout::I32,
    JmpTrue   = 0x91 => OperandLayout::I32,
    JmpFalse  = 0x92 => OperandLayout::I32,
    JmpTable  = 0x93 => OperandLayout::JumpTable,

    // Appels
    Call         = 0xA0 => OperandLayout::FuncIdU8,
    CallIndirect = 0xA1 => OperandLayout::SigIdU8,
    TailCall     = 0xA2 => OperandLayout::FuncIdU8,
    Ret          = 0xA3 => OperandLayout::None,
    CallCheck    = 0xA4 => OperandLayout::None,

    // Hôte
    Intrinsic = 0xA8 => OperandLayout::U32,
    Syscall   = 0xA9 => OperandLayout::U32,

    // Locaux / globaux / upvalues
    LdLoc = 0xB0 => OperandLayout::U32,
    StLoc = 0xB1 => OperandLayout::U32,
    LdGlob = 0xB2 => OperandLayout::U32,
    StGlob = 0xB3 => OperandLayout::U32,
    LdUpv = 0xB4 => OperandLayout::U32,
    StUpv = 0xB5 => OperandLayout::U32,

    // Objets
    NewObj  = 0xC0 => OperandLayout::U32,
    LdFld   = 0xC1 => OperandLayout::U32,
    StFld   = 0xC2 => OperandLayout::U32,

    // Réflexion / identité
    TypeOf  = 0xC8 => OperandLayout::None,
    IsNull  = 0xC9 => OperandLayout::None,
    RefEq   = 0xCA => OperandLayout::None,
    RefNe   = 0xCB => OperandLayout::None,

    // Fermetures
    NewClosure = 0xD0 => OperandLayout::FuncIdU8,

    // Tableaux (taille fixe, typés au moment de la création)
    NewArray  = 0xD8 => OperandLayout::TypeIdU32,
    ArrayLen  = 0xD9 => OperandLayout::None,
    ArrayGet  = 0xDA => OperandLayout::None,
    ArraySet  = 0xDB => OperandLayout::None,

    // Listes (croissance dynamique)
    NewList    = 0xE0 => OperandLayout::TypeIdU32,
    ListLen    = 0xE1 => OperandLayout::None,
    ListGet    = 0xE2 => OperandLayout::None,
    ListSet    = 0xE3 => OperandLayout::None,
    ListPush   = 0xE4 => OperandLayout::None,
    ListPop    = 0xE5 => OperandLayout::None,
    ListInsert = 0xE6 => OperandLayout::None,
    ListRemove = 0xE7 => OperandLayout::None,
    ListClear  = 0xE8 => OperandLayout::None,

    // Chaînes
    StringLen     = 0xF0 => OperandLayout::None,
    StringConcat  = 0xF1 => OperandLayout::None,
    StringGetChar = 0xF2 => OperandLayout::None,
    StringSlice   = 0xF3 => OperandLayout::None,
}

impl OperandLayout {
    /// Taille en octets des opérandes immédiats fixes (sans compter les
    /// entrées à longueur variable comme `JumpTable`, qui doivent être
    /// lues pas à pas par l'appelant).
    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            Self::None => Some(0),
            Self::U8 => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::I32 | Self::U32 | Self::F32Bits => Some(4),
            Self::I64 | Self::F64Bits => Some(8),
            Self::FuncIdU8 | Self::SigIdU8 => Some(5),
            Self::TypeIdU32 => Some(8),
            Self::JumpTable => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_opcodes() {
        for b in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(b) {
                assert_eq!(op as u8, b);
            }
        }
    }

    #[test]
    fn layout_matches_expected_widths() {
        assert_eq!(Opcode::Nop.operand_layout().fixed_len(), Some(0));
        assert_eq!(Opcode::Enter.operand_layout().fixed_len(), Some(2));
        assert_eq!(Opcode::ConstI32.operand_layout().fixed_len(), Some(4));
        assert_eq!(Opcode::ConstI64.operand_layout().fixed_len(), Some(8));
        assert_eq!(Opcode::Call.operand_layout().fixed_len(), Some(5));
        assert_eq!(Opcode::JmpTable.operand_layout().fixed_len(), None);
    }

    #[test]
    fn no_duplicate_values() {
        let mut seen = std::collections::HashSet::new();
        for b in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(b) {
                assert!(seen.insert(op as u8), "duplicate opcode byte {b}");
            }
        }
    }
}
