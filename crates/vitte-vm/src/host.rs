//! Résolveur hôte (§6.4).
//!
//! Les imports nommés (`module`, `symbol`) et les identifiants bruts
//! `intrinsic`/`syscall` partagent le même canal de sortie vers l'hôte,
//! mais pas la même forme d'entrée : un import nommé est résolu une fois
//! vers la ligne `ImportRow` du module (donc vers son `sig_id`, qui fixe
//! l'arité), alors qu'un `intrinsic`/`syscall` n'a, par construction,
//! aucune ligne de table à consulter (voir la note d'architecture dans
//! [`crate::decode`] : la grammaire textuelle ne leur attribue pas
//! d'attribut `sig`). Les deux cas finissent donc par le même appel
//! [`ImportResolver::call`], l'appelant choisissant simplement quel
//! `(module, symbol)` lui fournir.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, string::String, vec::Vec};

/// Échec d'une invocation hôte.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum HostError {
    /// Aucun résolveur n'a été fourni dans [`crate::interp::ExecOptions`].
    #[cfg_attr(feature = "errors", error("no import resolver configured"))]
    NoResolver,
    /// Le résolveur a explicitement rejeté l'appel.
    #[cfg_attr(feature = "errors", error("host call failed: {0}"))]
    Rejected(String),
}

#[cfg(not(feature = "errors"))]
impl core::fmt::Display for HostError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HostError::NoResolver => write!(f, "no import resolver configured"),
            HostError::Rejected(msg) => write!(f, "host call failed: {msg}"),
        }
    }
}

#[cfg(all(feature = "std", not(feature = "errors")))]
impl std::error::Error for HostError {}

/// Callback synchrone invoqué par l'interpréteur pour un `call` ciblant une
/// ligne d'import, ou pour un `intrinsic`/`syscall`.
///
/// `module`/`symbol` identifient la cible : pour un import nommé, ce sont
/// les chaînes de la ligne `ImportRow` ; pour un `intrinsic`/`syscall`,
/// `module` vaut `"intrinsic"`/`"syscall"` et `symbol` est l'identifiant
/// numérique brut formaté en décimal (aucune table de noms n'existe pour
/// eux côté module, §6.4). `args` porte les opérandes sous forme de motifs
/// bruts 64 bits, dans l'ordre source. `Ok(None)` signifie "pas de valeur
/// de retour" ; `Err` fait tomber l'exécution en trap.
pub trait ImportResolver {
    /// Exécute l'appel hôte et renvoie sa valeur de retour le cas échéant.
    fn call(&mut self, module: &str, symbol: &str, args: &[u64]) -> Result<Option<u64>, HostError>;
}

impl<F> ImportResolver for F
where
    F: FnMut(&str, &str, &[u64]) -> Result<Option<u64>, HostError>,
{
    fn call(&mut self, module: &str, symbol: &str, args: &[u64]) -> Result<Option<u64>, HostError> {
        self(module, symbol, args)
    }
}

/// Un résolveur type-erased, stocké dans [`crate::interp::ExecOptions`].
pub type BoxedImportResolver = Box<dyn ImportResolver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_resolver_is_usable_directly() {
        let mut calls: Vec<(String, String)> = Vec::new();
        let mut resolver = |module: &str, symbol: &str, args: &[u64]| -> Result<Option<u64>, HostError> {
            calls.push((module.into(), symbol.into()));
            Ok(Some(args.iter().sum()))
        };
        let result = resolver.call("env", "add_one", &[41]).unwrap();
        assert_eq!(result, Some(41));
        assert_eq!(calls, vec![(String::from("env"), String::from("add_one"))]);
    }

    #[test]
    fn rejected_call_carries_message() {
        let mut resolver = |_: &str, _: &str, _: &[u64]| -> Result<Option<u64>, HostError> {
            Err(HostError::Rejected("unsupported".into()))
        };
        assert_eq!(resolver.call("m", "s", &[]), Err(HostError::Rejected("unsupported".into())));
    }
}
