//! Contexte partagé entre passes, trait `Pass`, table des symboles locaux.

use std::collections::BTreeMap;

use kiln_ast as ast;

use crate::{diagnostics::DiagnosticBag, source::SyntaxTree, CompilationOptions};

/// Contexte mut du compilateur partagé entre passes
pub(crate) struct Ctx<'a> {
    /// Options
    pub opts: &'a CompilationOptions,
    /// Diagnostics accumulés
    pub diags: &'a mut DiagnosticBag,
}

/// Trait générique d’une passe de compilation
pub(crate) trait Pass {
    /// Exécuter la passe sur tous les arbres
    fn run(&mut self, ctx: &mut Ctx<'_>, trees: &[SyntaxTree]);
}

/// Identité d’un local (= son slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LocalId(pub u16);

/// Informations sur un local
#[derive(Debug, Clone)]
pub(crate) struct Local {
    /// Nom
    pub name: String,
    /// Paramètre (jamais signalé comme inutilisé)
    pub is_param: bool,
    /// Lu au moins une fois
    pub read: bool,
    /// Localisation de la déclaration
    pub span: ast::Span,
}

/// Table des locaux d'une méthode avec pile de scopes
#[derive(Debug)]
pub(crate) struct SymTable {
    scopes: Vec<BTreeMap<String, LocalId>>,
    data: Vec<Local>,
}

impl SymTable {
    /// Nouvelle table (un scope racine pour les paramètres)
    pub fn new() -> Self { Self { scopes: vec![BTreeMap::new()], data: Vec::new() } }

    /// Entre dans un nouveau scope
    pub fn push_scope(&mut self) { self.scopes.push(BTreeMap::new()); }

    /// Quitte le scope courant
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Déclare un local dans le scope courant. `None` si le slot dépasse `u16`.
    pub fn declare(&mut self, name: &str, is_param: bool, span: ast::Span) -> Option<LocalId> {
        let id = LocalId(u16::try_from(self.data.len()).ok()?);
        self.data.push(Local { name: name.to_owned(), is_param, read: false, span });
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), id);
        }
        Some(id)
    }

    /// Recherche dans les scopes (de l’intérieur vers l’extérieur)
    pub fn resolve(&self, name: &str) -> Option<LocalId> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    /// Marque un local comme lu.
    pub fn mark_read(&mut self, id: LocalId) {
        if let Some(l) = self.data.get_mut(usize::from(id.0)) {
            l.read = true;
        }
    }

    /// Nombre de slots alloués
    pub fn slot_count(&self) -> u16 {
        // `declare` refuse tout slot au-delà de u16::MAX
        u16::try_from(self.data.len()).unwrap_or(u16::MAX)
    }

    /// Locaux déclarés par `let` et jamais lus
    pub fn unread(&self) -> impl Iterator<Item = &Local> {
        self.data.iter().filter(|l| !l.is_param && !l.read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_then_pops() {
        let mut t = SymTable::new();
        let a = t.declare("a", true, ast::Span::default()).unwrap();
        t.push_scope();
        let b = t.declare("b", false, ast::Span::default()).unwrap();
        assert_eq!(t.resolve("a"), Some(a));
        assert_eq!(t.resolve("b"), Some(b));
        t.pop_scope();
        assert_eq!(t.resolve("b"), None);
        // le slot reste alloué
        assert_eq!(t.slot_count(), 2);
    }

    #[test]
    fn unread_skips_params_and_read_locals() {
        let mut t = SymTable::new();
        t.declare("p", true, ast::Span::default());
        let x = t.declare("x", false, ast::Span::default()).unwrap();
        t.declare("y", false, ast::Span::new(2, 5, 10));
        t.mark_read(x);
        let names: Vec<_> = t.unread().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["y"]);
    }
}
