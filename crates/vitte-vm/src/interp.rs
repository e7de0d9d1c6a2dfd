//! Interpréteur : exécution du bytecode déjà vérifié (§4.7) sur une pile
//! d'opérandes typée, des frames d'appel et un tas mark-and-sweep.
//!
//! Ce module ne revalide rien : il suppose que [`crate::verify::verify_module`]
//! a accepté le module. Les quelques contrôles qui subsistent à l'exécution
//! (division par zéro, déréférencement de `null`, bornes de tableau/liste,
//! signature effective d'un `call.indirect`) sont ceux que le vérificateur ne
//! peut pas, par construction, établir statiquement — tout le reste devient
//! un trap défensif plutôt qu'une panique, au cas où l'appelant exécuterait
//! un module non vérifié.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, format, string::String, vec::Vec};

use vitte_vitbc::{GlobalRow, ImportKind, SbcModule, TypeKind, AMBIGUOUS_FIELD};

use crate::decode::{decode_at, jmptable_case_target, jmptable_default_target, single_branch_target, DecodeError, Instr};
use crate::heap::{Heap, HeapObj, HeapRef};
use crate::host::{BoxedImportResolver, HostError};
use crate::profile::ProfileReport;
use crate::value::Value;
use crate::verify::{host_call_is_declared, param_types, sig_for_func_id};

/// Échec d'exécution (§4.7/§7) : toujours rattaché à la fonction et à
/// l'offset fautifs, comme [`crate::verify::VerifyError`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum Trap {
    /// Décodage impossible à l'exécution (ne devrait jamais se produire pour
    /// un module vérifié, conservé par défense).
    #[cfg_attr(feature = "errors", error("function {function_index}: decode error at offset {offset}: {source}"))]
    Decode {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
        /// Erreur de décodage sous-jacente.
        source: DecodeError,
    },
    /// La pile d'opérandes est vide alors qu'une instruction en attend une
    /// valeur (ne devrait pas se produire pour un module vérifié).
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: operand stack underflow"))]
    StackUnderflow {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
    },
    /// Une valeur poppée ne porte pas la famille concrète attendue (ne
    /// devrait pas se produire pour un module vérifié — garde défensive).
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: unexpected runtime value shape: {message}"))]
    TypeConfusion {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
        /// Message descriptif.
        message: String,
    },
    /// `div.i32`/`div.i64`/`rem.i32`/`rem.i64` avec un diviseur nul.
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: division by zero"))]
    DivisionByZero {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
    },
    /// Déréférencement (`ldfld`/`stfld`/`array.*`/`list.*`/`ref.eq`/`ref.ne`/
    /// `typeof`/`isnull`/`call.indirect`) d'une référence `null`.
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: null reference dereferenced"))]
    NullReference {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
    },
    /// Index hors bornes pour `array.*`/`list.*`/`string.*`/`ldfld`/`stfld`.
    #[cfg_attr(
        feature = "errors",
        error("function {function_index} at {offset}: index {index} out of bounds (len {len})")
    )]
    IndexOutOfBounds {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
        /// Index demandé.
        index: i64,
        /// Longueur de la collection au moment de l'accès.
        len: usize,
    },
    /// Une référence vers le tas ne désigne plus d'objet vivant (ne devrait
    /// pas se produire : le collecteur ne balaie que ce qui est inatteignable
    /// depuis les racines actives — garde défensive).
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: dangling heap reference"))]
    DanglingRef {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
    },
    /// `call.indirect` dont la fermeture effective ne correspond pas à la
    /// signature attendue au site d'appel — le vérificateur ne peut établir
    /// cela que dynamiquement, une fermeture étant construite ailleurs que
    /// là où elle est invoquée (§4.7).
    #[cfg_attr(
        feature = "errors",
        error("function {function_index} at {offset}: call.indirect signature mismatch: expected sig {expected}, closure has sig {actual}")
    )]
    SignatureMismatch {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
        /// Signature attendue par le site d'appel.
        expected: u32,
        /// Signature réelle de la méthode fermée.
        actual: u32,
    },
    /// `intrinsic`/`syscall` ciblant un identifiant non déclaré dans la
    /// table `Imports` du module (ne devrait pas se produire pour un module
    /// vérifié).
    #[cfg_attr(
        feature = "errors",
        error("function {function_index} at {offset}: undeclared intrinsic/syscall id {id}")
    )]
    UndeclaredHostCall {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
        /// Identifiant non déclaré.
        id: u32,
    },
    /// Le résolveur hôte a rejeté l'appel, ou aucun résolveur n'a été fourni.
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: host call failed: {source}"))]
    Host {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
        /// Erreur hôte sous-jacente.
        source: HostError,
    },
    /// La pile d'appel a dépassé [`ExecOptions::max_call_depth`] — garde
    /// anti-débordement, absente du format binaire (aucune borne contractuelle
    /// n'existe sur la profondeur de récursion, §9).
    #[cfg_attr(feature = "errors", error("call stack depth exceeded {max_depth}"))]
    CallStackOverflow {
        /// Profondeur maximale configurée.
        max_depth: usize,
    },
    /// Un identifiant référencé par une instruction sort des bornes de la
    /// table correspondante (ne devrait pas se produire pour un module
    /// vérifié).
    #[cfg_attr(feature = "errors", error("function {function_index} at {offset}: id out of range: {message}"))]
    IdOutOfRange {
        /// Index de la fonction.
        function_index: u32,
        /// Offset fautif.
        offset: u32,
        /// Message descriptif.
        message: String,
    },
    /// Le budget [`ExecOptions::fuel`] a été épuisé avant que l'exécution ne
    /// se termine — garde hôte optionnelle, sans rapport avec le format
    /// binaire ni la sémantique du programme.
    #[cfg_attr(feature = "errors", error("fuel exhausted after {consumed} opcodes"))]
    FuelExhausted {
        /// Nombre d'opcodes exécutés avant l'épuisement.
        consumed: u64,
    },
}

#[cfg(not(feature = "errors"))]
impl core::fmt::Display for Trap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Trap::Decode { function_index, offset, source } => {
                write!(f, "function {function_index}: decode error at offset {offset}: {source}")
            }
            Trap::StackUnderflow { function_index, offset } => {
                write!(f, "function {function_index} at {offset}: operand stack underflow")
            }
            Trap::TypeConfusion { function_index, offset, message } => {
                write!(f, "function {function_index} at {offset}: unexpected runtime value shape: {message}")
            }
            Trap::DivisionByZero { function_index, offset } => {
                write!(f, "function {function_index} at {offset}: division by zero")
            }
            Trap::NullReference { function_index, offset } => {
                write!(f, "function {function_index} at {offset}: null reference dereferenced")
            }
            Trap::IndexOutOfBounds { function_index, offset, index, len } => {
                write!(f, "function {function_index} at {offset}: index {index} out of bounds (len {len})")
            }
            Trap::DanglingRef { function_index, offset } => {
                write!(f, "function {function_index} at {offset}: dangling heap reference")
            }
            Trap::SignatureMismatch { function_index, offset, expected, actual } => {
                write!(
                    f,
                    "function {function_index} at {offset}: call.indirect signature mismatch: expected sig {expected}, closure has sig {actual}"
                )
            }
            Trap::UndeclaredHostCall { function_index, offset, id } => {
                write!(f, "function {function_index} at {offset}: undeclared intrinsic/syscall id {id}")
            }
            Trap::Host { function_index, offset, source } => {
                write!(f, "function {function_index} at {offset}: host call failed: {source}")
            }
            Trap::CallStackOverflow { max_depth } => write!(f, "call stack depth exceeded {max_depth}"),
            Trap::IdOutOfRange { function_index, offset, message } => {
                write!(f, "function {function_index} at {offset}: id out of range: {message}")
            }
            Trap::FuelExhausted { consumed } => write!(f, "fuel exhausted after {consumed} opcodes"),
        }
    }
}

#[cfg(all(feature = "std", not(feature = "errors")))]
impl std::error::Error for Trap {}

/// Options de configuration d'une [`Interpreter`].
pub struct ExecOptions {
    /// Résolveur des imports nommés et des `intrinsic`/`syscall`. `None`
    /// signifie que tout appel hôte tombera en [`Trap::Host`].
    pub resolver: Option<BoxedImportResolver>,
    /// Profondeur maximale de la pile d'appels avant [`Trap::CallStackOverflow`].
    /// Purement une garde d'implémentation : le format binaire ne borne pas
    /// la récursion (§9).
    pub max_call_depth: usize,
    /// Budget optionnel d'opcodes exécutés avant [`Trap::FuelExhausted`].
    /// Consulté entre chaque instruction ; `None` désactive la garde. Un
    /// compteur côté hôte, sans rapport avec le format binaire.
    pub fuel: Option<u64>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self { resolver: None, max_call_depth: 4096, fuel: None }
    }
}

/// Issue d'une exécution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// La fonction appelée s'est terminée par un `ret` dans sa frame
    /// d'origine.
    Completed,
    /// L'exécution s'est arrêtée sur un [`Trap`].
    Trapped,
}

/// Résultat d'un appel [`Interpreter::call`].
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Issue globale.
    pub status: ExecStatus,
    /// Le trap rencontré, si `status` vaut [`ExecStatus::Trapped`].
    pub trap: Option<Trap>,
    /// La valeur renvoyée par la fonction, si elle a une signature non-void
    /// et que `status` vaut [`ExecStatus::Completed`].
    pub return_value: Option<Value>,
    /// Compteurs de profilage accumulés pendant l'exécution.
    pub profile: ProfileReport,
}

/// Une frame d'appel active : locaux, upvalues capturées (vides hors d'une
/// fermeture), et le point de reprise du code appelant.
#[derive(Debug, Clone)]
pub struct Frame {
    func_id: u32,
    ip: u32,
    locals: Vec<Value>,
    upvalues: Vec<Value>,
    /// Hauteur de la pile d'opérandes partagée au moment de l'entrée dans
    /// cette frame (après dépilement des arguments) — `ret` y retronque la
    /// pile avant d'y repousser l'éventuelle valeur de retour.
    stack_base: usize,
    /// `(func_id appelant, offset de reprise)`, ou `None` pour la frame la
    /// plus externe (celle ouverte par [`Interpreter::call`]).
    return_to: Option<(u32, u32)>,
}

impl Frame {
    /// Les valeurs locales de cette frame (paramètres puis locaux `enter`).
    #[must_use]
    pub fn locals(&self) -> &[Value] {
        &self.locals
    }

    /// Les upvalues capturées par la fermeture ayant ouvert cette frame, ou
    /// un slice vide pour un appel direct (`call`/`tailcall`).
    #[must_use]
    pub fn upvalues(&self) -> &[Value] {
        &self.upvalues
    }

    /// L'identifiant de fonction (espace unifié fonctions/imports, toujours
    /// un index de fonction utilisateur ici) dont le code s'exécute dans
    /// cette frame.
    #[must_use]
    pub const fn func_id(&self) -> u32 {
        self.func_id
    }
}

/// Interpréteur à pile : tas, globales, pile d'opérandes partagée et pile de
/// frames d'appel. Une même instance peut enchaîner plusieurs
/// [`Interpreter::call`] en conservant le tas et les globales (une session
/// longue vie, utile pour un hôte embarquant la VM).
pub struct Interpreter {
    heap: Heap,
    globals: Vec<Value>,
    globals_initialized: bool,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    resolver: Option<BoxedImportResolver>,
    profile: ProfileReport,
    max_call_depth: usize,
    fuel: Option<u64>,
}

/// Re-rétrécit une valeur poppée de la pile d'opérandes (large, promue à sa
/// famille, §9) vers la largeur concrète déclarée par un local, un champ, un
/// élément de collection ou un paramètre — l'exécution doit garder ces deux
/// vues synchronisées (`crate::value` module doc).
fn narrow_to(kind: TypeKind, value: Value) -> Value {
    match kind {
        TypeKind::I8 => Value::I8(value.as_i32_family().unwrap_or(0) as i8),
        TypeKind::I16 => Value::I16(value.as_i32_family().unwrap_or(0) as i16),
        TypeKind::U8 => Value::U8(value.as_i32_family().unwrap_or(0) as u8),
        TypeKind::U16 => Value::U16(value.as_i32_family().unwrap_or(0) as u16),
        TypeKind::Bool => Value::Bool(value.as_i32_family().unwrap_or(0) != 0),
        TypeKind::Char => Value::Char(char::from_u32(value.as_i32_family().unwrap_or(0) as u32).unwrap_or('\u{FFFD}')),
        TypeKind::I32 | TypeKind::Unspecified => Value::I32(value.as_i32_family().unwrap_or(0)),
        TypeKind::I64 | TypeKind::I128 | TypeKind::U32 | TypeKind::U64 | TypeKind::U128 | TypeKind::F32 | TypeKind::F64 | TypeKind::Ref | TypeKind::String => {
            value
        }
    }
}

/// Encode une valeur en motif brut 64 bits pour le canal hôte (§6.4) : zéro-
/// extension des largeurs étroites, bits IEEE-754 pour les flottants. Une
/// référence passée à un appel hôte est encodée comme `0` (aucune sémantique
/// de partage de tas n'est définie côté hôte, décision prise ici faute de
/// contrat plus précis — voir `DESIGN.md`).
fn value_to_raw(value: Value) -> u64 {
    match value {
        Value::I8(v) => v as u8 as u64,
        Value::I16(v) => v as u16 as u64,
        Value::I32(v) => v as u32 as u64,
        Value::I64(v) => v as u64,
        Value::U8(v) => u64::from(v),
        Value::U16(v) => u64::from(v),
        Value::U32(v) => u64::from(v),
        Value::U64(v) => v,
        Value::F32(v) => u64::from(v.to_bits()),
        Value::F64(v) => v.to_bits(),
        Value::Bool(v) => u64::from(v),
        Value::Char(v) => u64::from(v as u32),
        Value::Ref(_) | Value::Null => 0,
    }
}

/// Reconstruit une valeur depuis un motif brut 64 bits renvoyé par l'hôte,
/// selon le type de retour déclaré par la signature.
fn raw_to_value(kind: TypeKind, raw: u64) -> Value {
    match kind {
        TypeKind::I8 => Value::I8(raw as u8 as i8),
        TypeKind::I16 => Value::I16(raw as u16 as i16),
        TypeKind::I32 | TypeKind::Unspecified => Value::I32(raw as u32 as i32),
        TypeKind::I64 | TypeKind::I128 => Value::I64(raw as i64),
        TypeKind::U8 => Value::U8(raw as u8),
        TypeKind::U16 => Value::U16(raw as u16),
        TypeKind::U32 => Value::U32(raw as u32),
        TypeKind::U64 | TypeKind::U128 => Value::U64(raw),
        TypeKind::F32 => Value::F32(f32::from_bits(raw as u32)),
        TypeKind::F64 => Value::F64(f64::from_bits(raw)),
        TypeKind::Bool => Value::Bool(raw != 0),
        TypeKind::Char => Value::Char(char::from_u32(raw as u32).unwrap_or('\u{FFFD}')),
        TypeKind::Ref | TypeKind::String => Value::Null,
    }
}

impl Interpreter {
    /// Une nouvelle instance, tas et globales vides (les globales sont
    /// initialisées paresseusement au premier [`Interpreter::call`], une fois
    /// le module connu).
    #[must_use]
    pub fn new(options: ExecOptions) -> Self {
        Self {
            heap: Heap::new(),
            globals: Vec::new(),
            globals_initialized: false,
            stack: Vec::new(),
            frames: Vec::new(),
            resolver: options.resolver,
            profile: ProfileReport::new(),
            max_call_depth: options.max_call_depth,
            fuel: options.fuel,
        }
    }

    /// Accès en lecture au tas, utile à l'hôte pour inspecter une valeur de
    /// retour porteuse d'une référence (p. ex. lire le contenu d'une chaîne).
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Les frames actives au moment de l'appel (vide hors exécution) —
    /// utile à un hôte de débogage pour inspecter une pile d'appel après un
    /// trap, avant que l'instance ne soit réutilisée.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    fn ensure_globals(&mut self, module: &SbcModule) -> Result<(), Trap> {
        if self.globals_initialized {
            return Ok(());
        }
        let mut values = Vec::with_capacity(module.globals.len());
        for g in &module.globals {
            values.push(self.initial_global_value(module, g)?);
        }
        self.globals = values;
        self.globals_initialized = true;
        Ok(())
    }

    fn initial_global_value(&mut self, module: &SbcModule, g: &GlobalRow) -> Result<Value, Trap> {
        let row = module.types.get(g.type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
            function_index: u32::MAX,
            offset: 0,
            message: format!("global type_id {} out of range", g.type_id),
        })?;
        if g.init_const_id == GlobalRow::NO_INIT {
            return Ok(Value::zero_of(row.kind));
        }
        let rec = module.const_pool.read_record_at(g.init_const_id).map_err(|e| Trap::IdOutOfRange {
            function_index: u32::MAX,
            offset: 0,
            message: format!("global init const {}: {e}", g.init_const_id),
        })?;
        Ok(self.const_record_to_value(module, rec))
    }

    fn const_record_to_value(&mut self, module: &SbcModule, rec: vitte_vitbc::ConstRecord) -> Value {
        use vitte_vitbc::ConstKind;
        match rec.kind {
            ConstKind::I32 => Value::I32(rec.payload as u32 as i32),
            ConstKind::I64 => Value::I64(rec.payload as i64),
            ConstKind::F32 => Value::F32(f32::from_bits(rec.payload as u32)),
            ConstKind::F64 => Value::F64(f64::from_bits(rec.payload)),
            ConstKind::Bool => Value::Bool(rec.payload != 0),
            ConstKind::Char => Value::Char(char::from_u32(rec.payload as u32).unwrap_or('\u{FFFD}')),
            ConstKind::Null => Value::Null,
            ConstKind::StringRef => {
                let s = module.const_pool.resolve_string(rec).unwrap_or_default().to_owned_string();
                Value::Ref(self.heap.alloc(HeapObj::Str(s)))
            }
        }
    }

    /// Appelle la fonction utilisateur `func_id` (index de `SbcModule::functions`,
    /// jamais un import) avec `args` déjà dans l'ordre source, et exécute
    /// jusqu'au `ret` de sa frame d'origine ou jusqu'à un trap.
    pub fn call(&mut self, module: &SbcModule, func_id: u32, args: &[Value]) -> ExecResult {
        match self.ensure_globals(module).and_then(|()| self.call_inner(module, func_id, args)) {
            Ok(return_value) => ExecResult { status: ExecStatus::Completed, trap: None, return_value, profile: self.profile.clone() },
            Err(trap) => {
                self.frames.clear();
                ExecResult { status: ExecStatus::Trapped, trap: Some(trap), return_value: None, profile: self.profile.clone() }
            }
        }
    }

    fn call_inner(&mut self, module: &SbcModule, func_id: u32, args: &[Value]) -> Result<Option<Value>, Trap> {
        self.enter_function(module, func_id, args.to_vec(), Vec::new(), None)?;
        self.run_loop(module)
    }

    fn collect_roots(&self) -> Vec<HeapRef> {
        let mut roots = Vec::new();
        for v in &self.stack {
            if let Some(r) = v.as_heap_ref() {
                roots.push(r);
            }
        }
        for frame in &self.frames {
            for v in frame.locals.iter().chain(frame.upvalues.iter()) {
                if let Some(r) = v.as_heap_ref() {
                    roots.push(r);
                }
            }
        }
        for v in &self.globals {
            if let Some(r) = v.as_heap_ref() {
                roots.push(r);
            }
        }
        roots
    }

    fn enter_function(
        &mut self,
        module: &SbcModule,
        func_id: u32,
        args: Vec<Value>,
        upvalues: Vec<Value>,
        return_to: Option<(u32, u32)>,
    ) -> Result<(), Trap> {
        if self.frames.len() >= self.max_call_depth {
            return Err(Trap::CallStackOverflow { max_depth: self.max_call_depth });
        }
        let fr = module.functions.get(func_id as usize).ok_or_else(|| Trap::IdOutOfRange {
            function_index: func_id,
            offset: 0,
            message: format!("func_id {func_id} out of range"),
        })?;
        let method = module.methods.get(fr.method_id as usize).ok_or_else(|| Trap::IdOutOfRange {
            function_index: func_id,
            offset: 0,
            message: format!("method_id {} out of range", fr.method_id),
        })?;
        let locals_extra = (method.local_count as usize).saturating_sub(args.len());
        let mut locals = args;
        locals.reserve(locals_extra);
        for _ in 0..locals_extra {
            locals.push(Value::Null);
        }
        self.frames.push(Frame { func_id, ip: 0, locals, upvalues, stack_base: self.stack.len(), return_to });
        self.profile.record_call(func_id);
        let roots = self.collect_roots();
        self.heap.maybe_collect(&roots);
        Ok(())
    }

    fn pop(&mut self, function_index: u32, offset: u32) -> Result<Value, Trap> {
        self.stack.pop().ok_or(Trap::StackUnderflow { function_index, offset })
    }

    fn pop_i32(&mut self, function_index: u32, offset: u32) -> Result<i32, Trap> {
        let v = self.pop(function_index, offset)?;
        v.as_i32_family()
            .ok_or_else(|| Trap::TypeConfusion { function_index, offset, message: format!("expected i32-family, found {v:?}") })
    }

    fn pop_i64(&mut self, function_index: u32, offset: u32) -> Result<i64, Trap> {
        let v = self.pop(function_index, offset)?;
        v.as_i64().ok_or_else(|| Trap::TypeConfusion { function_index, offset, message: format!("expected i64, found {v:?}") })
    }

    fn pop_u32(&mut self, function_index: u32, offset: u32) -> Result<u32, Trap> {
        let v = self.pop(function_index, offset)?;
        v.as_u32().ok_or_else(|| Trap::TypeConfusion { function_index, offset, message: format!("expected u32, found {v:?}") })
    }

    fn pop_u64(&mut self, function_index: u32, offset: u32) -> Result<u64, Trap> {
        let v = self.pop(function_index, offset)?;
        v.as_u64().ok_or_else(|| Trap::TypeConfusion { function_index, offset, message: format!("expected u64, found {v:?}") })
    }

    fn pop_f32(&mut self, function_index: u32, offset: u32) -> Result<f32, Trap> {
        let v = self.pop(function_index, offset)?;
        v.as_f32().ok_or_else(|| Trap::TypeConfusion { function_index, offset, message: format!("expected f32, found {v:?}") })
    }

    fn pop_f64(&mut self, function_index: u32, offset: u32) -> Result<f64, Trap> {
        let v = self.pop(function_index, offset)?;
        v.as_f64().ok_or_else(|| Trap::TypeConfusion { function_index, offset, message: format!("expected f64, found {v:?}") })
    }

    fn pop_bool(&mut self, function_index: u32, offset: u32) -> Result<bool, Trap> {
        let v = self.pop(function_index, offset)?;
        v.as_bool().ok_or_else(|| Trap::TypeConfusion { function_index, offset, message: format!("expected bool, found {v:?}") })
    }

    /// Poppe une référence, traitant `Null` comme un trap plutôt que comme
    /// une référence vide (§8 : tout déréférencement de `null` est invalide).
    fn pop_nonnull_ref(&mut self, function_index: u32, offset: u32) -> Result<HeapRef, Trap> {
        let v = self.pop(function_index, offset)?;
        match v {
            Value::Ref(r) => Ok(r),
            Value::Null => Err(Trap::NullReference { function_index, offset }),
            other => Err(Trap::TypeConfusion { function_index, offset, message: format!("expected a reference, found {other:?}") }),
        }
    }

    fn heap_obj(&self, function_index: u32, offset: u32, r: HeapRef) -> Result<&HeapObj, Trap> {
        self.heap.get(r).ok_or(Trap::DanglingRef { function_index, offset })
    }

    fn do_import_call(&mut self, module: &SbcModule, func_id: u32, argc: u8, function_index: u32, offset: u32) -> Result<Option<Value>, Trap> {
        let sig = sig_for_func_id(module, func_id).ok_or_else(|| Trap::IdOutOfRange {
            function_index,
            offset,
            message: format!("call target func_id {func_id} out of range"),
        })?;
        // `func_id` peut comporter des trous relativement à la position
        // dans `module.imports` (§4.2 point 6, voir `sig_for_func_id`) : on
        // retrouve la ligne `Import` par son index relatif, pas par offset
        // direct dans la table.
        let rel = func_id - module.functions.len() as u32;
        let import = module
            .imports
            .iter()
            .find(|i| i.kind == ImportKind::Import && i.reserved as u32 == rel)
            .ok_or_else(|| Trap::IdOutOfRange { function_index, offset, message: format!("import index {rel} out of range") })?;
        let module_name = module
            .const_pool
            .read_cstr_at(import.module_str)
            .map_err(|e| Trap::IdOutOfRange { function_index, offset, message: format!("import module name: {e}") })?;
        let symbol = module
            .const_pool
            .read_cstr_at(import.symbol_str)
            .map_err(|e| Trap::IdOutOfRange { function_index, offset, message: format!("import symbol name: {e}") })?;
        self.invoke_host(module, sig.ret_type_id, module_name, symbol, argc, function_index, offset)
    }

    fn do_host_raw_call(
        &mut self,
        module: &SbcModule,
        kind: ImportKind,
        id: u32,
        function_index: u32,
        offset: u32,
    ) -> Result<Option<Value>, Trap> {
        if !host_call_is_declared(module, kind, id) {
            return Err(Trap::UndeclaredHostCall { function_index, offset, id });
        }
        let module_name = match kind {
            ImportKind::Intrinsic => "intrinsic",
            ImportKind::Syscall => "syscall",
            ImportKind::Import => "import",
        };
        let id_str = format!("{id}");
        // Pas d'arité dans l'opérande (§6.3) : le cœur ne poppe rien avant
        // l'appel hôte, qui reçoit une liste d'arguments vide.
        let resolver = self.resolver.as_mut().ok_or(Trap::Host { function_index, offset, source: HostError::NoResolver })?;
        let result = resolver
            .call(module_name, &id_str, &[])
            .map_err(|source| Trap::Host { function_index, offset, source })?;
        // Convention d'effet de pile fixe (§4.7/verify.rs) : un intrinsic/
        // syscall pousse toujours exactement une valeur de retour, `0` par
        // défaut si l'hôte n'en fournit aucune.
        let _ = &module;
        Ok(Some(Value::I64(result.unwrap_or(0) as i64)))
    }

    fn invoke_host(
        &mut self,
        module: &SbcModule,
        ret_type_id: u32,
        module_name: &str,
        symbol: &str,
        argc: u8,
        function_index: u32,
        offset: u32,
    ) -> Result<Option<Value>, Trap> {
        let mut raw_args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            raw_args.push(value_to_raw(self.pop(function_index, offset)?));
        }
        raw_args.reverse();
        let resolver = self.resolver.as_mut().ok_or(Trap::Host { function_index, offset, source: HostError::NoResolver })?;
        let result = resolver
            .call(module_name, symbol, &raw_args)
            .map_err(|source| Trap::Host { function_index, offset, source })?;
        if ret_type_id == AMBIGUOUS_FIELD {
            return Ok(None);
        }
        let row = module.types.get(ret_type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
            function_index,
            offset,
            message: format!("return type_id {ret_type_id} out of range"),
        })?;
        let raw = result.ok_or_else(|| Trap::Host {
            function_index,
            offset,
            source: HostError::Rejected("host call declared a return value but returned none".into()),
        })?;
        Ok(Some(raw_to_value(row.kind, raw)))
    }

    #[allow(clippy::too_many_lines)]
    fn run_loop(&mut self, module: &SbcModule) -> Result<Option<Value>, Trap> {
        let mut consumed: u64 = 0;
        loop {
            if let Some(fuel) = self.fuel {
                if consumed >= fuel {
                    return Err(Trap::FuelExhausted { consumed });
                }
            }
            consumed += 1;

            let func_id = match self.frames.last() {
                Some(f) => f.func_id,
                None => return Ok(None),
            };
            let fr = module.functions.get(func_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                function_index: func_id,
                offset: 0,
                message: format!("func_id {func_id} out of range"),
            })?;
            let start = fr.code_offset as usize;
            let end = start + fr.code_size as usize;
            let code = &module.code[start..end];
            let ip = self.frames.last().unwrap().ip;
            let (instr, next) = decode_at(code, ip).map_err(|source| Trap::Decode { function_index: func_id, offset: ip, source })?;
            self.profile.record_opcode(opcode_byte_of(code, ip));

            // `Some(offset)` quand l'instruction a explicitement positionné
            // l'IP de la frame courante (branchement, appel, retour) ;
            // `None` signifie "avancer la frame courante de `ip` à `next`".
            let mut jump_to: Option<u32> = None;
            let mut returned: Option<Option<Value>> = None;

            match instr {
                Instr::Nop => {}
                Instr::Pop => {
                    self.pop(func_id, ip)?;
                }
                Instr::Dup => {
                    let a = self.pop(func_id, ip)?;
                    self.stack.push(a);
                    self.stack.push(a);
                }
                Instr::Dup2 => {
                    let b = self.pop(func_id, ip)?;
                    let a = self.pop(func_id, ip)?;
                    self.stack.push(a);
                    self.stack.push(b);
                    self.stack.push(a);
                    self.stack.push(b);
                }
                Instr::Swap => {
                    let b = self.pop(func_id, ip)?;
                    let a = self.pop(func_id, ip)?;
                    self.stack.push(b);
                    self.stack.push(a);
                }
                Instr::Rot => {
                    let c = self.pop(func_id, ip)?;
                    let b = self.pop(func_id, ip)?;
                    let a = self.pop(func_id, ip)?;
                    self.stack.push(b);
                    self.stack.push(c);
                    self.stack.push(a);
                }
                Instr::Enter { locals } => {
                    let frame = self.frames.last_mut().unwrap();
                    frame.locals.extend(core::iter::repeat(Value::Null).take(locals as usize));
                }

                Instr::ConstI8(v) => self.stack.push(Value::I8(v)),
                Instr::ConstI16(v) => self.stack.push(Value::I16(v)),
                Instr::ConstI32(v) => self.stack.push(Value::I32(v)),
                Instr::ConstI64(v) => self.stack.push(Value::I64(v)),
                Instr::ConstU8(v) => self.stack.push(Value::U8(v)),
                Instr::ConstU16(v) => self.stack.push(Value::U16(v)),
                Instr::ConstU32(v) => self.stack.push(Value::U32(v)),
                Instr::ConstU64(v) => self.stack.push(Value::U64(v)),
                Instr::ConstF32(v) => self.stack.push(Value::F32(v)),
                Instr::ConstF64(v) => self.stack.push(Value::F64(v)),
                Instr::ConstBool(v) => self.stack.push(Value::Bool(v)),
                Instr::ConstChar(v) => self.stack.push(Value::Char(v)),
                Instr::ConstNull => self.stack.push(Value::Null),
                Instr::ConstString(const_id) => {
                    let rec = module.const_pool.read_record_at(const_id).map_err(|e| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("const.string id {const_id}: {e}"),
                    })?;
                    let s = module
                        .const_pool
                        .resolve_string(rec)
                        .map_err(|e| Trap::IdOutOfRange { function_index: func_id, offset: ip, message: format!("const.string id {const_id}: {e}") })?
                        .to_owned_string();
                    let r = self.heap.alloc(HeapObj::Str(s));
                    self.stack.push(Value::Ref(r));
                }

                Instr::AddI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(lhs.wrapping_add(rhs)));
                }
                Instr::SubI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(lhs.wrapping_sub(rhs)));
                }
                Instr::MulI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(lhs.wrapping_mul(rhs)));
                }
                Instr::DivI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    if rhs == 0 {
                        return Err(Trap::DivisionByZero { function_index: func_id, offset: ip });
                    }
                    self.stack.push(Value::I32(lhs.wrapping_div(rhs)));
                }
                Instr::RemI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    if rhs == 0 {
                        return Err(Trap::DivisionByZero { function_index: func_id, offset: ip });
                    }
                    self.stack.push(Value::I32(lhs.wrapping_rem(rhs)));
                }
                Instr::NegI32 => {
                    let v = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(v.wrapping_neg()));
                }

                Instr::AddI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(lhs.wrapping_add(rhs)));
                }
                Instr::SubI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(lhs.wrapping_sub(rhs)));
                }
                Instr::MulI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(lhs.wrapping_mul(rhs)));
                }
                Instr::DivI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    if rhs == 0 {
                        return Err(Trap::DivisionByZero { function_index: func_id, offset: ip });
                    }
                    self.stack.push(Value::I64(lhs.wrapping_div(rhs)));
                }
                Instr::RemI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    if rhs == 0 {
                        return Err(Trap::DivisionByZero { function_index: func_id, offset: ip });
                    }
                    self.stack.push(Value::I64(lhs.wrapping_rem(rhs)));
                }
                Instr::NegI64 => {
                    let v = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(v.wrapping_neg()));
                }

                Instr::AddF32 => {
                    let rhs = self.pop_f32(func_id, ip)?;
                    let lhs = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::F32(lhs + rhs));
                }
                Instr::SubF32 => {
                    let rhs = self.pop_f32(func_id, ip)?;
                    let lhs = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::F32(lhs - rhs));
                }
                Instr::MulF32 => {
                    let rhs = self.pop_f32(func_id, ip)?;
                    let lhs = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::F32(lhs * rhs));
                }
                Instr::DivF32 => {
                    let rhs = self.pop_f32(func_id, ip)?;
                    let lhs = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::F32(lhs / rhs));
                }
                Instr::NegF32 => {
                    let v = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::F32(-v));
                }
                Instr::AddF64 => {
                    let rhs = self.pop_f64(func_id, ip)?;
                    let lhs = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::F64(lhs + rhs));
                }
                Instr::SubF64 => {
                    let rhs = self.pop_f64(func_id, ip)?;
                    let lhs = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::F64(lhs - rhs));
                }
                Instr::MulF64 => {
                    let rhs = self.pop_f64(func_id, ip)?;
                    let lhs = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::F64(lhs * rhs));
                }
                Instr::DivF64 => {
                    let rhs = self.pop_f64(func_id, ip)?;
                    let lhs = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::F64(lhs / rhs));
                }
                Instr::NegF64 => {
                    let v = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::F64(-v));
                }

                Instr::CmpEqI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs == rhs));
                }
                Instr::CmpNeI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs != rhs));
                }
                Instr::CmpLtI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs < rhs));
                }
                Instr::CmpLeI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs <= rhs));
                }
                Instr::CmpGtI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs > rhs));
                }
                Instr::CmpGeI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs >= rhs));
                }
                Instr::CmpLtU32 => {
                    let rhs = self.pop_u32(func_id, ip)?;
                    let lhs = self.pop_u32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs < rhs));
                }
                Instr::CmpLeU32 => {
                    let rhs = self.pop_u32(func_id, ip)?;
                    let lhs = self.pop_u32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs <= rhs));
                }
                Instr::CmpGtU32 => {
                    let rhs = self.pop_u32(func_id, ip)?;
                    let lhs = self.pop_u32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs > rhs));
                }
                Instr::CmpGeU32 => {
                    let rhs = self.pop_u32(func_id, ip)?;
                    let lhs = self.pop_u32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs >= rhs));
                }
                Instr::CmpEqI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs == rhs));
                }
                Instr::CmpNeI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs != rhs));
                }
                Instr::CmpLtI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs < rhs));
                }
                Instr::CmpLeI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs <= rhs));
                }
                Instr::CmpGtI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs > rhs));
                }
                Instr::CmpGeI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs >= rhs));
                }
                Instr::CmpLtU64 => {
                    let rhs = self.pop_u64(func_id, ip)?;
                    let lhs = self.pop_u64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs < rhs));
                }
                Instr::CmpLeU64 => {
                    let rhs = self.pop_u64(func_id, ip)?;
                    let lhs = self.pop_u64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs <= rhs));
                }
                Instr::CmpGtU64 => {
                    let rhs = self.pop_u64(func_id, ip)?;
                    let lhs = self.pop_u64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs > rhs));
                }
                Instr::CmpGeU64 => {
                    let rhs = self.pop_u64(func_id, ip)?;
                    let lhs = self.pop_u64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs >= rhs));
                }
                Instr::CmpEqF32 => {
                    let rhs = self.pop_f32(func_id, ip)?;
                    let lhs = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs == rhs));
                }
                Instr::CmpLtF32 => {
                    let rhs = self.pop_f32(func_id, ip)?;
                    let lhs = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs < rhs));
                }
                Instr::CmpLeF32 => {
                    let rhs = self.pop_f32(func_id, ip)?;
                    let lhs = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs <= rhs));
                }
                Instr::CmpEqF64 => {
                    let rhs = self.pop_f64(func_id, ip)?;
                    let lhs = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs == rhs));
                }
                Instr::CmpLtF64 => {
                    let rhs = self.pop_f64(func_id, ip)?;
                    let lhs = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs < rhs));
                }
                Instr::CmpLeF64 => {
                    let rhs = self.pop_f64(func_id, ip)?;
                    let lhs = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs <= rhs));
                }

                Instr::BoolNot => {
                    let v = self.pop_bool(func_id, ip)?;
                    self.stack.push(Value::Bool(!v));
                }
                Instr::BoolAnd => {
                    let rhs = self.pop_bool(func_id, ip)?;
                    let lhs = self.pop_bool(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs && rhs));
                }
                Instr::BoolOr => {
                    let rhs = self.pop_bool(func_id, ip)?;
                    let lhs = self.pop_bool(func_id, ip)?;
                    self.stack.push(Value::Bool(lhs || rhs));
                }

                Instr::AndI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(lhs & rhs));
                }
                Instr::OrI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(lhs | rhs));
                }
                Instr::XorI32 => {
                    let rhs = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(lhs ^ rhs));
                }
                Instr::ShlI32 => {
                    let shift = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(lhs.wrapping_shl(shift as u32 & 31)));
                }
                Instr::ShrI32 => {
                    let shift = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I32(lhs.wrapping_shr(shift as u32 & 31)));
                }
                Instr::ShrU32 => {
                    let shift = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_u32(func_id, ip)?;
                    self.stack.push(Value::U32(lhs.wrapping_shr(shift as u32 & 31)));
                }
                Instr::AndI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(lhs & rhs));
                }
                Instr::OrI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(lhs | rhs));
                }
                Instr::XorI64 => {
                    let rhs = self.pop_i64(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(lhs ^ rhs));
                }
                Instr::ShlI64 => {
                    let shift = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(lhs.wrapping_shl(shift as u32 & 63)));
                }
                Instr::ShrI64 => {
                    let shift = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I64(lhs.wrapping_shr(shift as u32 & 63)));
                }
                Instr::ShrU64 => {
                    let shift = self.pop_i32(func_id, ip)?;
                    let lhs = self.pop_u64(func_id, ip)?;
                    self.stack.push(Value::U64(lhs.wrapping_shr(shift as u32 & 63)));
                }

                Instr::ConvI32ToI64 => {
                    let v = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::I64(i64::from(v)));
                }
                Instr::ConvI64ToI32 => {
                    let v = self.pop_i64(func_id, ip)?;
                    self.stack.push(Value::I32(v as i32));
                }
                Instr::ConvI32ToF32 => {
                    let v = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::F32(v as f32));
                }
                Instr::ConvI32ToF64 => {
                    let v = self.pop_i32(func_id, ip)?;
                    self.stack.push(Value::F64(f64::from(v)));
                }
                Instr::ConvF32ToI32 => {
                    let v = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::I32(v as i32));
                }
                Instr::ConvF64ToI32 => {
                    let v = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::I32(v as i32));
                }
                Instr::ConvF32ToF64 => {
                    let v = self.pop_f32(func_id, ip)?;
                    self.stack.push(Value::F64(f64::from(v)));
                }
                Instr::ConvF64ToF32 => {
                    let v = self.pop_f64(func_id, ip)?;
                    self.stack.push(Value::F32(v as f32));
                }

                Instr::Jmp(rel) => {
                    jump_to = Some(single_branch_target(ip, rel));
                }
                Instr::JmpTrue(rel) => {
                    let cond = self.pop_bool(func_id, ip)?;
                    jump_to = Some(if cond { single_branch_target(ip, rel) } else { next });
                }
                Instr::JmpFalse(rel) => {
                    let cond = self.pop_bool(func_id, ip)?;
                    jump_to = Some(if cond { next } else { single_branch_target(ip, rel) });
                }
                Instr::JmpTable { ref cases, default } => {
                    let selector = self.pop_i32(func_id, ip)?;
                    jump_to = Some(match usize::try_from(selector).ok().and_then(|i| cases.get(i)) {
                        Some(rel) => jmptable_case_target(ip, selector as u32, *rel),
                        None => jmptable_default_target(ip, cases.len() as u32, default),
                    });
                }

                Instr::Call { func_id: target, argc } => {
                    self.frames.last_mut().unwrap().ip = next;
                    if (target as usize) < module.functions.len() {
                        let sig = sig_for_func_id(module, target).ok_or_else(|| Trap::IdOutOfRange {
                            function_index: func_id,
                            offset: ip,
                            message: format!("call target func_id {target} out of range"),
                        })?;
                        let kinds = param_types(module, sig)
                            .map_err(|message| Trap::IdOutOfRange { function_index: func_id, offset: ip, message })?;
                        let args = self.pop_args(func_id, ip, argc, &kinds)?;
                        self.enter_function(module, target, args, Vec::new(), Some((func_id, next)))?;
                    } else {
                        let result = self.do_import_call(module, target, argc, func_id, ip)?;
                        if let Some(v) = result {
                            self.stack.push(v);
                        }
                    }
                    jump_to = None;
                }
                Instr::CallIndirect { sig_id, argc } => {
                    self.frames.last_mut().unwrap().ip = next;
                    let closure_ref = self.pop_nonnull_ref(func_id, ip)?;
                    let (method_id, upvalues) = match self.heap_obj(func_id, ip, closure_ref)? {
                        HeapObj::Closure { method_id, upvalues } => (*method_id, upvalues.clone()),
                        _ => {
                            return Err(Trap::TypeConfusion {
                                function_index: func_id,
                                offset: ip,
                                message: "call.indirect target is not a closure".into(),
                            })
                        }
                    };
                    let method = module.methods.get(method_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("closure method_id {method_id} out of range"),
                    })?;
                    if method.sig_id != sig_id {
                        return Err(Trap::SignatureMismatch { function_index: func_id, offset: ip, expected: sig_id, actual: method.sig_id });
                    }
                    let sig = module.sigs.get(sig_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("sig_id {sig_id} out of range"),
                    })?;
                    let kinds =
                        param_types(module, sig).map_err(|message| Trap::IdOutOfRange { function_index: func_id, offset: ip, message })?;
                    let args = self.pop_args(func_id, ip, argc, &kinds)?;
                    let target_func_id = module
                        .functions
                        .iter()
                        .position(|f| f.method_id == method_id)
                        .ok_or_else(|| Trap::IdOutOfRange { function_index: func_id, offset: ip, message: format!("no function for method_id {method_id}") })?
                        as u32;
                    self.enter_function(module, target_func_id, args, upvalues, Some((func_id, next)))?;
                    jump_to = None;
                }
                Instr::TailCall { func_id: target, argc } => {
                    let sig = sig_for_func_id(module, target).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("tailcall target func_id {target} out of range"),
                    })?;
                    let kinds =
                        param_types(module, sig).map_err(|message| Trap::IdOutOfRange { function_index: func_id, offset: ip, message })?;
                    let args = self.pop_args(func_id, ip, argc, &kinds)?;
                    let current = self.frames.last().unwrap();
                    let stack_base = current.stack_base;
                    let return_to = current.return_to;
                    self.stack.truncate(stack_base);
                    let method = module
                        .methods
                        .get(module.functions[target as usize].method_id as usize)
                        .ok_or_else(|| Trap::IdOutOfRange { function_index: func_id, offset: ip, message: "tailcall method lookup".into() })?;
                    let locals_extra = (method.local_count as usize).saturating_sub(args.len());
                    let mut locals = args;
                    locals.reserve(locals_extra);
                    for _ in 0..locals_extra {
                        locals.push(Value::Null);
                    }
                    *self.frames.last_mut().unwrap() = Frame { func_id: target, ip: 0, locals, upvalues: Vec::new(), stack_base, return_to };
                    self.profile.record_call(target);
                    let roots = self.collect_roots();
                    self.heap.maybe_collect(&roots);
                    jump_to = Some(0);
                }
                Instr::Ret => {
                    let frame = self.frames.pop().unwrap();
                    let sig = sig_for_func_id(module, func_id);
                    let has_ret = sig.map(|s| s.ret_type_id != AMBIGUOUS_FIELD).unwrap_or(false);
                    let ret_val = if has_ret { Some(self.pop(func_id, ip)?) } else { None };
                    self.stack.truncate(frame.stack_base);
                    match frame.return_to {
                        None => {
                            returned = Some(ret_val);
                        }
                        Some((_caller_func_id, resume_ip)) => {
                            if let Some(v) = ret_val {
                                self.stack.push(v);
                            }
                            self.frames.last_mut().unwrap().ip = resume_ip;
                        }
                    }
                    jump_to = None;
                }
                Instr::CallCheck => {
                    let top = self.stack.last().ok_or(Trap::StackUnderflow { function_index: func_id, offset: ip })?;
                    match top {
                        Value::Null => return Err(Trap::NullReference { function_index: func_id, offset: ip }),
                        Value::Ref(r) => {
                            if !matches!(self.heap_obj(func_id, ip, *r)?, HeapObj::Closure { .. }) {
                                return Err(Trap::TypeConfusion {
                                    function_index: func_id,
                                    offset: ip,
                                    message: "callcheck target is not a closure".into(),
                                });
                            }
                        }
                        other => {
                            return Err(Trap::TypeConfusion {
                                function_index: func_id,
                                offset: ip,
                                message: format!("callcheck expected a reference, found {other:?}"),
                            })
                        }
                    }
                }
                Instr::Intrinsic { id } => {
                    let result = self.do_host_raw_call(module, ImportKind::Intrinsic, id, func_id, ip)?;
                    self.stack.push(result.unwrap_or(Value::I64(0)));
                }
                Instr::Syscall { id } => {
                    let result = self.do_host_raw_call(module, ImportKind::Syscall, id, func_id, ip)?;
                    self.stack.push(result.unwrap_or(Value::I64(0)));
                }

                Instr::LdLoc(index) => {
                    let frame = self.frames.last().unwrap();
                    let v = *frame.locals.get(index as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("local index {index} out of range"),
                    })?;
                    self.stack.push(v);
                }
                Instr::StLoc(index) => {
                    let v = self.pop(func_id, ip)?;
                    let frame = self.frames.last_mut().unwrap();
                    let slot = frame.locals.get_mut(index as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("local index {index} out of range"),
                    })?;
                    *slot = v;
                }
                Instr::LdGlob(index) => {
                    let v = *self.globals.get(index as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("global index {index} out of range"),
                    })?;
                    self.stack.push(v);
                }
                Instr::StGlob(index) => {
                    let g = module.globals.get(index as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("global index {index} out of range"),
                    })?;
                    let row = module.types.get(g.type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("global type_id {} out of range", g.type_id),
                    })?;
                    let kind = row.kind;
                    let v = self.pop(func_id, ip)?;
                    let slot = self.globals.get_mut(index as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("global index {index} out of range"),
                    })?;
                    *slot = narrow_to(kind, v);
                }
                Instr::LdUpv(index) => {
                    let frame = self.frames.last().unwrap();
                    let v = *frame.upvalues.get(index as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("upvalue index {index} out of range"),
                    })?;
                    self.stack.push(v);
                }
                Instr::StUpv(index) => {
                    let v = self.pop(func_id, ip)?;
                    let frame = self.frames.last_mut().unwrap();
                    let slot = frame.upvalues.get_mut(index as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("upvalue index {index} out of range"),
                    })?;
                    *slot = v;
                }

                Instr::NewObj(type_id) => {
                    let row = module.types.get(type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("newobj type_id {type_id} out of range"),
                    })?;
                    let mut fields = Vec::with_capacity(row.field_count as usize);
                    for i in 0..row.field_count {
                        let field = module.fields.get((row.field_start + i) as usize).ok_or_else(|| Trap::IdOutOfRange {
                            function_index: func_id,
                            offset: ip,
                            message: "object field row out of range".into(),
                        })?;
                        let field_type = module.types.get(field.type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                            function_index: func_id,
                            offset: ip,
                            message: format!("field type_id {} out of range", field.type_id),
                        })?;
                        fields.push(Value::zero_of(field_type.kind));
                    }
                    let r = self.heap.alloc(HeapObj::Object { type_id, fields });
                    self.stack.push(Value::Ref(r));
                }
                Instr::LdFld(field_id) => {
                    let receiver = self.pop_nonnull_ref(func_id, ip)?;
                    let (type_id, fields_len, value) = match self.heap_obj(func_id, ip, receiver)? {
                        HeapObj::Object { type_id, fields } => (*type_id, fields.len(), None::<Value>),
                        _ => {
                            return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "ldfld receiver is not an object".into() })
                        }
                    };
                    let _ = value;
                    let owner = module.types.get(type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("object type_id {type_id} out of range"),
                    })?;
                    let position = field_slot_position(owner.field_start, field_id, fields_len, func_id, ip)?;
                    if let HeapObj::Object { fields, .. } = self.heap_obj(func_id, ip, receiver)? {
                        self.stack.push(fields[position]);
                    }
                }
                Instr::StFld(field_id) => {
                    let field = module.fields.get(field_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("field_id {field_id} out of range"),
                    })?;
                    let field_type = module.types.get(field.type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("field type_id {} out of range", field.type_id),
                    })?;
                    let kind = field_type.kind;
                    let raw = self.pop(func_id, ip)?;
                    let receiver = self.pop_nonnull_ref(func_id, ip)?;
                    let (type_id, fields_len) = match self.heap_obj(func_id, ip, receiver)? {
                        HeapObj::Object { type_id, fields } => (*type_id, fields.len()),
                        _ => {
                            return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "stfld receiver is not an object".into() })
                        }
                    };
                    let owner = module.types.get(type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("object type_id {type_id} out of range"),
                    })?;
                    let position = field_slot_position(owner.field_start, field_id, fields_len, func_id, ip)?;
                    if let Some(HeapObj::Object { fields, .. }) = self.heap.get_mut(receiver) {
                        fields[position] = narrow_to(kind, raw);
                    }
                }

                Instr::TypeOf => {
                    let v = self.pop(func_id, ip)?;
                    let tag = match v {
                        Value::Null => -1,
                        Value::Ref(r) => match self.heap_obj(func_id, ip, r)? {
                            HeapObj::Object { type_id, .. } => *type_id as i32,
                            HeapObj::Str(_) => i32::from(TypeKind::String.to_u8()),
                            HeapObj::Array { .. } => -2,
                            HeapObj::List { .. } => -3,
                            HeapObj::Closure { .. } => -4,
                        },
                        other => {
                            return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: format!("typeof expected a reference, found {other:?}") })
                        }
                    };
                    self.stack.push(Value::I32(tag));
                }
                Instr::IsNull => {
                    let v = self.pop(func_id, ip)?;
                    self.stack.push(Value::Bool(v.is_null()));
                }
                Instr::RefEq => {
                    let rhs = self.pop(func_id, ip)?;
                    let lhs = self.pop(func_id, ip)?;
                    self.stack.push(Value::Bool(refs_equal(lhs, rhs)));
                }
                Instr::RefNe => {
                    let rhs = self.pop(func_id, ip)?;
                    let lhs = self.pop(func_id, ip)?;
                    self.stack.push(Value::Bool(!refs_equal(lhs, rhs)));
                }

                Instr::NewClosure { method_id, upvalue_count } => {
                    module.methods.get(method_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("newclosure method_id {method_id} out of range"),
                    })?;
                    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                    for _ in 0..upvalue_count {
                        upvalues.push(self.pop(func_id, ip)?);
                    }
                    upvalues.reverse();
                    let r = self.heap.alloc(HeapObj::Closure { method_id, upvalues });
                    self.stack.push(Value::Ref(r));
                }

                Instr::NewArray { type_id, length } => {
                    let row = module.types.get(type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("newarray type_id {type_id} out of range"),
                    })?;
                    let items = core::iter::repeat(Value::zero_of(row.kind)).take(length as usize).collect();
                    let r = self.heap.alloc(HeapObj::Array { elem_type: type_id, items });
                    self.stack.push(Value::Ref(r));
                }
                Instr::ArrayLen => {
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    match self.heap_obj(func_id, ip, r)? {
                        HeapObj::Array { items, .. } => self.stack.push(Value::I32(items.len() as i32)),
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "array.len on a non-array".into() }),
                    }
                }
                Instr::ArrayGet => {
                    let index = self.pop_i32(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    match self.heap_obj(func_id, ip, r)? {
                        HeapObj::Array { items, .. } => {
                            let v = *index_get(items, index, func_id, ip)?;
                            self.stack.push(v);
                        }
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "array.get on a non-array".into() }),
                    }
                }
                Instr::ArraySet => {
                    let value = self.pop(func_id, ip)?;
                    let index = self.pop_i32(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    let elem_type = match self.heap_obj(func_id, ip, r)? {
                        HeapObj::Array { elem_type, .. } => *elem_type,
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "array.set on a non-array".into() }),
                    };
                    let kind = module
                        .types
                        .get(elem_type as usize)
                        .ok_or_else(|| Trap::IdOutOfRange { function_index: func_id, offset: ip, message: "array element type".into() })?
                        .kind;
                    let narrowed = narrow_to(kind, value);
                    if let Some(HeapObj::Array { items, .. }) = self.heap.get_mut(r) {
                        let slot = index_get_mut(items, index, func_id, ip)?;
                        *slot = narrowed;
                    }
                }

                Instr::NewList { type_id, capacity } => {
                    module.types.get(type_id as usize).ok_or_else(|| Trap::IdOutOfRange {
                        function_index: func_id,
                        offset: ip,
                        message: format!("newlist type_id {type_id} out of range"),
                    })?;
                    let r = self.heap.alloc(HeapObj::List { elem_type: type_id, items: Vec::with_capacity(capacity as usize) });
                    self.stack.push(Value::Ref(r));
                }
                Instr::ListLen => {
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    match self.heap_obj(func_id, ip, r)? {
                        HeapObj::List { items, .. } => self.stack.push(Value::I32(items.len() as i32)),
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "list.len on a non-list".into() }),
                    }
                }
                Instr::ListGet => {
                    let index = self.pop_i32(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    match self.heap_obj(func_id, ip, r)? {
                        HeapObj::List { items, .. } => {
                            let v = *index_get(items, index, func_id, ip)?;
                            self.stack.push(v);
                        }
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "list.get on a non-list".into() }),
                    }
                }
                Instr::ListSet => {
                    let value = self.pop(func_id, ip)?;
                    let index = self.pop_i32(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    let elem_type = list_elem_type(self.heap_obj(func_id, ip, r)?, func_id, ip, "list.set")?;
                    let kind = module
                        .types
                        .get(elem_type as usize)
                        .ok_or_else(|| Trap::IdOutOfRange { function_index: func_id, offset: ip, message: "list element type".into() })?
                        .kind;
                    let narrowed = narrow_to(kind, value);
                    if let Some(HeapObj::List { items, .. }) = self.heap.get_mut(r) {
                        let slot = index_get_mut(items, index, func_id, ip)?;
                        *slot = narrowed;
                    }
                }
                Instr::ListPush => {
                    let value = self.pop(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    let elem_type = list_elem_type(self.heap_obj(func_id, ip, r)?, func_id, ip, "list.push")?;
                    let kind = module
                        .types
                        .get(elem_type as usize)
                        .ok_or_else(|| Trap::IdOutOfRange { function_index: func_id, offset: ip, message: "list element type".into() })?
                        .kind;
                    if let Some(HeapObj::List { items, .. }) = self.heap.get_mut(r) {
                        items.push(narrow_to(kind, value));
                    }
                }
                Instr::ListPop => {
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    list_elem_type(self.heap_obj(func_id, ip, r)?, func_id, ip, "list.pop")?;
                    let popped = match self.heap.get_mut(r) {
                        Some(HeapObj::List { items, .. }) => {
                            items.pop().ok_or(Trap::IndexOutOfBounds { function_index: func_id, offset: ip, index: -1, len: 0 })?
                        }
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "list.pop on a non-list".into() }),
                    };
                    self.stack.push(popped);
                }
                Instr::ListInsert => {
                    let value = self.pop(func_id, ip)?;
                    let index = self.pop_i32(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    let elem_type = list_elem_type(self.heap_obj(func_id, ip, r)?, func_id, ip, "list.insert")?;
                    let kind = module
                        .types
                        .get(elem_type as usize)
                        .ok_or_else(|| Trap::IdOutOfRange { function_index: func_id, offset: ip, message: "list element type".into() })?
                        .kind;
                    let narrowed = narrow_to(kind, value);
                    match self.heap.get_mut(r) {
                        Some(HeapObj::List { items, .. }) => {
                            let pos = index as i64;
                            if pos < 0 || pos as usize > items.len() {
                                return Err(Trap::IndexOutOfBounds { function_index: func_id, offset: ip, index: pos, len: items.len() });
                            }
                            items.insert(pos as usize, narrowed);
                        }
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "list.insert on a non-list".into() }),
                    }
                }
                Instr::ListRemove => {
                    let index = self.pop_i32(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    list_elem_type(self.heap_obj(func_id, ip, r)?, func_id, ip, "list.remove")?;
                    let removed = match self.heap.get_mut(r) {
                        Some(HeapObj::List { items, .. }) => {
                            let pos = index as i64;
                            if pos < 0 || pos as usize >= items.len() {
                                return Err(Trap::IndexOutOfBounds { function_index: func_id, offset: ip, index: pos, len: items.len() });
                            }
                            items.remove(pos as usize)
                        }
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "list.remove on a non-list".into() }),
                    };
                    self.stack.push(removed);
                }
                Instr::ListClear => {
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    list_elem_type(self.heap_obj(func_id, ip, r)?, func_id, ip, "list.clear")?;
                    if let Some(HeapObj::List { items, .. }) = self.heap.get_mut(r) {
                        items.clear();
                    }
                }

                Instr::StringLen => {
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    match self.heap_obj(func_id, ip, r)? {
                        HeapObj::Str(s) => self.stack.push(Value::I32(s.chars().count() as i32)),
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "string.len on a non-string".into() }),
                    }
                }
                Instr::StringConcat => {
                    let rhs = self.pop_nonnull_ref(func_id, ip)?;
                    let lhs = self.pop_nonnull_ref(func_id, ip)?;
                    let lhs_s = match self.heap_obj(func_id, ip, lhs)? {
                        HeapObj::Str(s) => s.clone(),
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "string.concat lhs is not a string".into() }),
                    };
                    let rhs_s = match self.heap_obj(func_id, ip, rhs)? {
                        HeapObj::Str(s) => s.clone(),
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "string.concat rhs is not a string".into() }),
                    };
                    let r = self.heap.alloc(HeapObj::Str(format!("{lhs_s}{rhs_s}")));
                    self.stack.push(Value::Ref(r));
                }
                Instr::StringGetChar => {
                    let index = self.pop_i32(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    match self.heap_obj(func_id, ip, r)? {
                        HeapObj::Str(s) => {
                            let c = (index >= 0)
                                .then(|| s.chars().nth(index as usize))
                                .flatten()
                                .ok_or(Trap::IndexOutOfBounds { function_index: func_id, offset: ip, index: i64::from(index), len: s.chars().count() })?;
                            self.stack.push(Value::Char(c));
                        }
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "string.get.char on a non-string".into() }),
                    }
                }
                Instr::StringSlice => {
                    let hi = self.pop_i32(func_id, ip)?;
                    let lo = self.pop_i32(func_id, ip)?;
                    let r = self.pop_nonnull_ref(func_id, ip)?;
                    match self.heap_obj(func_id, ip, r)? {
                        HeapObj::Str(s) => {
                            let chars: Vec<char> = s.chars().collect();
                            let len = chars.len();
                            if lo < 0 || hi < lo || hi as usize > len {
                                return Err(Trap::IndexOutOfBounds { function_index: func_id, offset: ip, index: i64::from(hi), len });
                            }
                            let sliced: String = chars[lo as usize..hi as usize].iter().collect();
                            let new_r = self.heap.alloc(HeapObj::Str(sliced));
                            self.stack.push(Value::Ref(new_r));
                        }
                        _ => return Err(Trap::TypeConfusion { function_index: func_id, offset: ip, message: "string.slice on a non-string".into() }),
                    }
                }
            }

            if let Some(result) = returned {
                if self.frames.is_empty() {
                    return Ok(result);
                }
            } else if let Some(target) = jump_to {
                self.frames.last_mut().unwrap().ip = target;
            } else {
                self.frames.last_mut().unwrap().ip = next;
            }
        }
    }

    fn pop_args(&mut self, function_index: u32, offset: u32, argc: u8, kinds: &[TypeKind]) -> Result<Vec<Value>, Trap> {
        let mut raw = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            raw.push(self.pop(function_index, offset)?);
        }
        raw.reverse();
        let mut out = Vec::with_capacity(raw.len());
        for (i, v) in raw.into_iter().enumerate() {
            let kind = kinds.get(i).copied().unwrap_or(TypeKind::Unspecified);
            out.push(narrow_to(kind, v));
        }
        Ok(out)
    }
}

fn opcode_byte_of(code: &[u8], ip: u32) -> u8 {
    code.get(ip as usize).copied().unwrap_or(0)
}

fn refs_equal(lhs: Value, rhs: Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Ref(a), Value::Ref(b)) => a == b,
        _ => false,
    }
}

fn field_slot_position(owner_field_start: u32, field_id: u32, fields_len: usize, function_index: u32, offset: u32) -> Result<usize, Trap> {
    let position = i64::from(field_id) - i64::from(owner_field_start);
    if position < 0 || position as usize >= fields_len {
        return Err(Trap::IndexOutOfBounds { function_index, offset, index: position, len: fields_len });
    }
    Ok(position as usize)
}

fn index_get(items: &[Value], index: i32, function_index: u32, offset: u32) -> Result<&Value, Trap> {
    if index < 0 || index as usize >= items.len() {
        return Err(Trap::IndexOutOfBounds { function_index, offset, index: i64::from(index), len: items.len() });
    }
    Ok(&items[index as usize])
}

fn index_get_mut(items: &mut [Value], index: i32, function_index: u32, offset: u32) -> Result<&mut Value, Trap> {
    let len = items.len();
    if index < 0 || index as usize >= len {
        return Err(Trap::IndexOutOfBounds { function_index, offset, index: i64::from(index), len });
    }
    Ok(&mut items[index as usize])
}

fn list_elem_type(obj: &HeapObj, function_index: u32, offset: u32, what: &str) -> Result<u32, Trap> {
    match obj {
        HeapObj::List { elem_type, .. } => Ok(*elem_type),
        _ => Err(Trap::TypeConfusion { function_index, offset, message: format!("{what} on a non-list") }),
    }
}

/// Petite extension locale : `&str` emprunté du pool de constantes doit être
/// copié avant d'être déplacé dans un `HeapObj::Str` (le pool vit plus
/// longtemps que l'emprunt mais plus court que le tas n'a besoin).
trait ToOwnedString {
    fn to_owned_string(&self) -> String;
}

impl ToOwnedString for str {
    fn to_owned_string(&self) -> String {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_vitbc::{FieldRow, FunctionRow, MethodRow, Opcode, SbcModule, SigRow, TypeRow};

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

    fn i32_ret_sig(m: &mut SbcModule) -> u32 {
        m.sigs.push(SigRow { ret_type_id: 0, param_count: 0, call_conv: 0, param_type_start: 0 });
        (m.sigs.len() - 1) as u32
    }

    fn install_function(m: &mut SbcModule, sig_id: u32, local_count: u16, stack_max: u32, code: Vec<u8>) -> u32 {
        let name = m.const_pool.intern_string("f");
        let code_offset = m.code.len() as u32;
        m.code.extend_from_slice(&code);
        m.methods.push(MethodRow { name_str: name, sig_id, code_offset, local_count, flags: 0 });
        let method_id = (m.methods.len() - 1) as u32;
        m.functions.push(FunctionRow { method_id, code_offset, code_size: code.len() as u32, stack_max });
        (m.functions.len() - 1) as u32
    }

    #[test]
    fn s1_arithmetic_runs_to_twelve() {
        let mut m = base_module();
        let sig = i32_ret_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 0);
        push_i32(&mut code, Opcode::ConstI32 as u8, 7);
        push_i32(&mut code, Opcode::ConstI32 as u8, 5);
        push_u8(&mut code, Opcode::AddI32 as u8);
        push_u8(&mut code, Opcode::Ret as u8);
        let func_id = install_function(&mut m, sig, 0, 4, code);

        let mut vm = Interpreter::new(ExecOptions::default());
        let result = vm.call(&m, func_id, &[]);
        assert_eq!(result.status, ExecStatus::Completed);
        assert_eq!(result.return_value, Some(Value::I32(12)));
    }

    #[test]
    fn s2_loop_sums_to_three() {
        let mut m = base_module();
        let sig = i32_ret_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 1);
        push_i32(&mut code, Opcode::ConstI32 as u8, 0);
        push_i32(&mut code, Opcode::StLoc as u8, 0);
        let top = code.len() as u32;
        push_i32(&mut code, Opcode::LdLoc as u8, 0);
        push_i32(&mut code, Opcode::ConstI32 as u8, 3);
        code.push(Opcode::CmpLtI32 as u8);
        let jmp_false_at = code.len() as u32;
        push_i32(&mut code, Opcode::JmpFalse as u8, 0);
        push_i32(&mut code, Opcode::LdLoc as u8, 0);
        push_i32(&mut code, Opcode::ConstI32 as u8, 1);
        code.push(Opcode::AddI32 as u8);
        push_i32(&mut code, Opcode::StLoc as u8, 0);
        let jmp_top_at = code.len() as u32;
        push_i32(&mut code, Opcode::Jmp as u8, 0);
        let done = code.len() as u32;
        push_i32(&mut code, Opcode::LdLoc as u8, 0);
        code.push(Opcode::Ret as u8);

        let jmp_false_rel = done as i64 - (jmp_false_at as i64 + 1 + 4);
        code[(jmp_false_at + 1) as usize..(jmp_false_at + 5) as usize].copy_from_slice(&(jmp_false_rel as i32).to_le_bytes());
        let jmp_top_rel = top as i64 - (jmp_top_at as i64 + 1 + 4);
        code[(jmp_top_at + 1) as usize..(jmp_top_at + 5) as usize].copy_from_slice(&(jmp_top_rel as i32).to_le_bytes());

        let func_id = install_function(&mut m, sig, 1, 4, code);
        let mut vm = Interpreter::new(ExecOptions::default());
        let result = vm.call(&m, func_id, &[]);
        assert_eq!(result.status, ExecStatus::Completed);
        assert_eq!(result.return_value, Some(Value::I32(3)));
    }

    #[test]
    fn s5_object_field_roundtrip_reads_back_255() {
        let mut m = base_module();
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

        let func_id = install_function(&mut m, sig, 0, 8, code);
        let mut vm = Interpreter::new(ExecOptions::default());
        let result = vm.call(&m, func_id, &[]);
        assert_eq!(result.status, ExecStatus::Completed);
        assert_eq!(result.return_value, Some(Value::I32(255)));
    }

    #[test]
    fn division_by_zero_traps() {
        let mut m = base_module();
        let sig = i32_ret_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 0);
        push_i32(&mut code, Opcode::ConstI32 as u8, 1);
        push_i32(&mut code, Opcode::ConstI32 as u8, 0);
        code.push(Opcode::DivI32 as u8);
        code.push(Opcode::Ret as u8);
        let func_id = install_function(&mut m, sig, 0, 4, code);
        let mut vm = Interpreter::new(ExecOptions::default());
        let result = vm.call(&m, func_id, &[]);
        assert_eq!(result.status, ExecStatus::Trapped);
        assert!(matches!(result.trap, Some(Trap::DivisionByZero { .. })));
    }

    #[test]
    fn array_out_of_bounds_traps() {
        let mut m = base_module();
        let sig = i32_ret_sig(&mut m);
        let mut code = Vec::new();
        push_u16(&mut code, Opcode::Enter as u8, 0);
        push_i32(&mut code, Opcode::NewArray as u8, 0);
        code.extend_from_slice(&2u32.to_le_bytes()); // length 2
        push_i32(&mut code, Opcode::ConstI32 as u8, 5);
        code.push(Opcode::ArrayGet as u8);
        code.push(Opcode::Ret as u8);
        let func_id = install_function(&mut m, sig, 0, 4, code);
        let mut vm = Interpreter::new(ExecOptions::default());
        let result = vm.call(&m, func_id, &[]);
        assert_eq!(result.status, ExecStatus::Trapped);
        assert!(matches!(result.trap, Some(Trap::IndexOutOfBounds { .. })));
    }
}
