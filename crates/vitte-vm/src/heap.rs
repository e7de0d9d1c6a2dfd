//! Tas à base de slab pour les objets gérés par la VM (chaînes, tableaux,
//! listes, objets, fermetures) et collecteur mark-and-sweep.
//!
//! §9 écarte le simple comptage de références : les graphes cycliques
//! (`newclosure` capturant une upvalue qui referme sur la même fermeture)
//! sont permis par la spécification et un compteur de références seul ne
//! les libérerait jamais. Ce module retient donc l'option "collecteur
//! traçant" : [`Heap::collect`] part des racines fournies par l'appelant
//! (pile d'opérandes, locaux de frame, globales, upvalues de fermeture) et
//! marque tout ce qui est atteignable avant de balayer le reste.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use crate::value::Value;

/// Référence opaque vers un emplacement du tas. Deux `HeapRef` sont égales
/// si et seulement si elles désignent le même objet (§8 propriété 7 :
/// `ref.eq`/`ref.ne`/`isnull` doivent s'accorder avec la notion d'identité
/// choisie ici).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapRef(u32);

impl HeapRef {
    pub(crate) const fn from_index(index: u32) -> Self {
        Self(index)
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Un objet vivant sur le tas.
#[derive(Debug, Clone)]
pub enum HeapObj {
    /// Chaîne de caractères (`const.string`, `string.concat`, `string.slice`).
    Str(String),
    /// Tableau de taille fixe (`newarray`).
    Array {
        /// Type des éléments.
        elem_type: u32,
        /// Éléments, taille fixée à la création.
        items: Vec<Value>,
    },
    /// Liste redimensionnable (`newlist`).
    List {
        /// Type des éléments.
        elem_type: u32,
        /// Éléments.
        items: Vec<Value>,
    },
    /// Instance d'un type utilisateur (`newobj`).
    Object {
        /// Type instancié.
        type_id: u32,
        /// Valeurs des champs, indexées par position de champ au sein du
        /// type (pas par `field_id` global).
        fields: Vec<Value>,
    },
    /// Fermeture liant une méthode à ses upvalues capturées (`newclosure`).
    Closure {
        /// Méthode fermée.
        method_id: u32,
        /// Upvalues capturées, dans l'ordre de capture.
        upvalues: Vec<Value>,
    },
}

impl HeapObj {
    fn trace(&self, out: &mut Vec<HeapRef>) {
        match self {
            HeapObj::Str(_) => {}
            HeapObj::Array { items, .. } | HeapObj::List { items, .. } | HeapObj::Object { fields: items, .. } => {
                for v in items {
                    if let Some(r) = v.as_heap_ref() {
                        out.push(r);
                    }
                }
            }
            HeapObj::Closure { upvalues, .. } => {
                for v in upvalues {
                    if let Some(r) = v.as_heap_ref() {
                        out.push(r);
                    }
                }
            }
        }
    }
}

/// Tas de la VM : slab d'objets avec liste libre, plus un collecteur
/// mark-and-sweep invoqué aux frontières d'appel.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<HeapObj>>,
    free: Vec<u32>,
    /// Nombre d'allocations depuis le dernier `collect`, pour décider quand
    /// déclencher un balayage (voir [`Heap::maybe_collect`]).
    allocs_since_collect: usize,
}

/// Seuil d'allocations au-delà duquel [`Heap::maybe_collect`] déclenche un
/// balayage. Purement un réglage de performance, sans effet sémantique.
pub const COLLECT_THRESHOLD: usize = 4096;

impl Heap {
    /// Un tas vide.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), allocs_since_collect: 0 }
    }

    /// Alloue `obj` et renvoie sa référence.
    pub fn alloc(&mut self, obj: HeapObj) -> HeapRef {
        self.allocs_since_collect += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(obj);
            HeapRef::from_index(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(obj));
            HeapRef::from_index(idx)
        }
    }

    /// Accès immutable à un objet. `None` si la référence est périmée
    /// (objet déjà balayé) — ne devrait jamais se produire pour un
    /// bytecode vérifié exécuté correctement, mais les appelants restent
    /// tenus de transformer ce cas en trap plutôt qu'en panique.
    #[must_use]
    pub fn get(&self, r: HeapRef) -> Option<&HeapObj> {
        self.slots.get(r.index())?.as_ref()
    }

    /// Accès mutable à un objet.
    pub fn get_mut(&mut self, r: HeapRef) -> Option<&mut HeapObj> {
        self.slots.get_mut(r.index())?.as_mut()
    }

    /// Nombre d'allocations vivantes (à titre diagnostique).
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Marque tout objet atteignable depuis `roots` puis libère le reste.
    /// Les racines attendues (§9) : pile d'opérandes, locaux de chaque
    /// frame active, tableau des globales, upvalues de chaque fermeture en
    /// cours d'exécution.
    pub fn collect(&mut self, roots: &[HeapRef]) {
        let mut marked = vec![false; self.slots.len()];
        let mut worklist: Vec<HeapRef> = roots.to_vec();
        while let Some(r) = worklist.pop() {
            let idx = r.index();
            if idx >= marked.len() || marked[idx] {
                continue;
            }
            marked[idx] = true;
            if let Some(obj) = self.slots[idx].as_ref() {
                obj.trace(&mut worklist);
            }
        }
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !marked[idx] {
                *slot = None;
                self.free.push(idx as u32);
            }
        }
        self.allocs_since_collect = 0;
    }

    /// Déclenche [`Heap::collect`] si le nombre d'allocations depuis le
    /// dernier balayage dépasse [`COLLECT_THRESHOLD`]. Appelé par
    /// l'interpréteur aux frontières d'appel (§5 : pas de point de
    /// suspension en cours d'exécution, donc aucun risque de collecter au
    /// milieu d'une instruction).
    pub fn maybe_collect(&mut self, roots: &[HeapRef]) {
        if self.allocs_since_collect > COLLECT_THRESHOLD {
            self.collect(roots);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_get_roundtrips() {
        let mut heap = Heap::new();
        let r = heap.alloc(HeapObj::Str("hello".into()));
        assert!(matches!(heap.get(r), Some(HeapObj::Str(s)) if s == "hello"));
    }

    #[test]
    fn collect_frees_unreachable_and_keeps_reachable() {
        let mut heap = Heap::new();
        let kept = heap.alloc(HeapObj::Str("kept".into()));
        let _dropped = heap.alloc(HeapObj::Str("dropped".into()));
        heap.collect(&[kept]);
        assert!(heap.get(kept).is_some());
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn collect_follows_cyclic_closure_graph() {
        let mut heap = Heap::new();
        let a = heap.alloc(HeapObj::Closure { method_id: 0, upvalues: vec![] });
        let b = heap.alloc(HeapObj::Closure { method_id: 1, upvalues: vec![Value::Ref(a)] });
        if let Some(HeapObj::Closure { upvalues, .. }) = heap.get_mut(a) {
            upvalues.push(Value::Ref(b));
        }
        heap.collect(&[a]);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn reused_slot_after_collect() {
        let mut heap = Heap::new();
        let a = heap.alloc(HeapObj::Str("a".into()));
        heap.collect(&[]);
        assert!(heap.get(a).is_none());
        let b = heap.alloc(HeapObj::Str("b".into()));
        assert!(heap.get(b).is_some());
    }
}
