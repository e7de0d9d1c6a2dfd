//! Harnais partagé pour les tests d'intégration cross-crates du pipeline
//! SBC : texte IR -> [`vitte_ir::parse`] -> [`vitte_ir::lower`] ->
//! [`vitte_vitbc::SbcModule::to_bytes`] -> [`vitte_vitbc::SbcModule::from_bytes`]
//! -> [`vitte_vm::verify_module`] -> [`vitte_vm::Interpreter::call`].
//!
//! Ce crate ne vit que sous `tests/` : il n'est membre du workspace que pour
//! exercer les quatre crates du CORE ensemble, comme le ferait un
//! utilisateur final du toolchain plutôt qu'un des crates eux-mêmes.

use vitte_ir::lower::LowerOptions;
use vitte_vitbc::SbcModule;
use vitte_vm::{ExecOptions, ExecResult, Interpreter};

/// Erreur agrégée couvrant n'importe quelle phase du pipeline, pour que les
/// tests puissent `.expect()` un seul type au lieu de jongler avec quatre.
#[derive(Debug)]
pub enum PipelineError {
    /// Échec du parseur textuel.
    Parse(vitte_ir::ParseError),
    /// Échec de la résolution symbolique / assemblage.
    Lower(vitte_ir::LowerError),
    /// Échec du chargement binaire (round-trip encode/decode).
    Load(vitte_vitbc::LoadError),
    /// Échec de la vérification structurelle.
    Verify(vitte_vm::VerifyError),
}

impl core::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PipelineError::Parse(e) => write!(f, "parse error: {e}"),
            PipelineError::Lower(e) => write!(f, "lower error: {e}"),
            PipelineError::Load(e) => write!(f, "load error: {e}"),
            PipelineError::Verify(e) => write!(f, "verify error: {e}"),
        }
    }
}

/// Compile un programme IR textuel de bout en bout jusqu'à un `SbcModule`
/// rechargé depuis sa forme binaire encodée — exerçant ainsi tout le
/// pipeline de compilation, y compris le round-trip `to_bytes`/`from_bytes`
/// de §8 propriété 1, avant toute vérification ou exécution.
pub fn compile(source: &str) -> Result<SbcModule, PipelineError> {
    let symbolic = vitte_ir::parse(source).map_err(PipelineError::Parse)?;
    let module =
        vitte_ir::lower(&symbolic, &LowerOptions::default()).map_err(PipelineError::Lower)?;
    let bytes = module.to_bytes();
    assert_eq!(
        bytes.len() % 4,
        0,
        "SBC sections must stay 4-byte aligned end to end"
    );
    SbcModule::from_bytes(&bytes).map_err(PipelineError::Load)
}

/// [`compile`], puis vérifie la structure de chaque fonction du module.
pub fn compile_and_verify(source: &str) -> Result<SbcModule, PipelineError> {
    let module = compile(source)?;
    vitte_vm::verify_module(&module).map_err(PipelineError::Verify)?;
    Ok(module)
}

/// [`compile_and_verify`], puis exécute la fonction d'entrée désignée par
/// `entry <name>` jusqu'à son `ret` ou un trap.
///
/// # Panics
///
/// Si le module n'a pas de `entry_method_id` déclaré, ou si aucune fonction
/// de la table `functions` ne porte ce `method_id` (la table est vide ou
/// incohérente).
pub fn compile_and_run(source: &str) -> ExecResult {
    let module = compile_and_verify(source).unwrap_or_else(|e| panic!("pipeline failed: {e}"));
    run_entry(&module)
}

/// Exécute la fonction d'entrée d'un module déjà vérifié.
///
/// `SbcModule::entry_method_id` référence une ligne de `methods`, tandis que
/// [`Interpreter::call`] attend un index dans `functions` (§3: plusieurs
/// `FunctionRow` peuvent, en théorie, partager un même `method_id`) ; ce
/// helper fait la correspondance une fois pour tous les appelants.
pub fn run_entry(module: &SbcModule) -> ExecResult {
    assert_ne!(
        module.entry_method_id,
        vitte_vitbc::NO_ENTRY,
        "module declares no entry function"
    );
    let func_id = module
        .functions
        .iter()
        .position(|f| f.method_id == module.entry_method_id)
        .unwrap_or_else(|| {
            panic!(
                "no function row for entry method_id {}",
                module.entry_method_id
            )
        });
    let mut interp = Interpreter::new(ExecOptions::default());
    interp.call(module, func_id as u32, &[])
}
