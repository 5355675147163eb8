//! Diagnostics : identifiant stable, gravité, message, localisation.

use core::fmt;

use kiln_ast as ast;

/// Identifiants stables des diagnostics.
pub mod ids {
    /// Erreur de syntaxe (lexer/parser).
    pub const SYNTAX: &str = "KL1000";
    /// Paramètre en double.
    pub const DUPLICATE_PARAMETER: &str = "KL0100";
    /// Type déclaré deux fois.
    pub const DUPLICATE_TYPE: &str = "KL0101";
    /// Nom inconnu.
    pub const UNKNOWN_NAME: &str = "KL0103";
    /// Méthode déclarée deux fois dans un type.
    pub const DUPLICATE_METHOD: &str = "KL0111";
    /// Méthode / fonction introuvable.
    pub const UNKNOWN_METHOD: &str = "KL0117";
    /// Local redéclaré dans la même portée.
    pub const DUPLICATE_LOCAL: &str = "KL0128";
    /// Local jamais lu (warning).
    pub const UNUSED_LOCAL: &str = "KL0219";
    /// Module externe absent des références.
    pub const MISSING_REFERENCE: &str = "KL0234";
    /// Mauvais nombre d'arguments.
    pub const ARITY_MISMATCH: &str = "KL1501";
    /// Pas de point d'entrée pour une application console.
    pub const NO_ENTRY_POINT: &str = "KL5001";
    /// Trop de locaux / constantes pour l'encodage.
    pub const LIMIT_EXCEEDED: &str = "KL8103";
}

/// Gravité d’un diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Info
    Info,
    /// Alerte
    Warning,
    /// Erreur bloquante
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Localisation d'un diagnostic : chemin logique + position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Chemin logique de l'arbre (ex: `generated.kl`).
    pub path: String,
    /// Position.
    pub span: ast::Span,
}

/// Un diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Identifiant (`KL0103`, …)
    pub id: &'static str,
    /// Gravité effective
    pub severity: Severity,
    /// Message humain
    pub message: String,
    /// Localisation (absente pour les diagnostics globaux)
    pub location: Option<Location>,
    /// Warning promu en erreur (`deny_warnings`)
    pub is_warning_as_error: bool,
}

impl Diagnostic {
    /// Construit une erreur
    pub fn error(id: &'static str, message: impl Into<String>, location: Option<Location>) -> Self {
        Self { id, severity: Severity::Error, message: message.into(), location, is_warning_as_error: false }
    }

    /// Construit un warning
    pub fn warning(id: &'static str, message: impl Into<String>, location: Option<Location>) -> Self {
        Self { id, severity: Severity::Warning, message: message.into(), location, is_warning_as_error: false }
    }

    /// Promeut un warning en erreur.
    #[must_use]
    pub fn promoted(mut self) -> Self {
        if self.severity == Severity::Warning {
            self.severity = Severity::Error;
            self.is_warning_as_error = true;
        }
        self
    }

    /// Vrai si ce diagnostic fait échouer l'émission.
    pub fn is_blocking(&self) -> bool { self.is_warning_as_error || self.severity == Severity::Error }

    /// Forme longue : `path(line,col): error KL0103: message`.
    pub fn render(&self) -> String {
        match &self.location {
            Some(loc) => format!("{}({},{}): {} {}", loc.path, loc.span.line, loc.span.column, self.severity, self),
            None => format!("{} {}", self.severity, self),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}: {}", self.id, self.message) }
}

/// Accumulateur partagé entre passes.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    items: Vec<Diagnostic>,
}

impl DiagnosticBag {
    /// Ajoute un diagnostic.
    pub fn push(&mut self, d: Diagnostic) { self.items.push(d); }

    /// Ajoute une erreur localisée.
    pub fn error(&mut self, id: &'static str, message: impl Into<String>, path: &str, span: ast::Span) {
        self.push(Diagnostic::error(id, message, Some(Location { path: path.to_owned(), span })));
    }

    /// Ajoute un warning localisé.
    pub fn warning(&mut self, id: &'static str, message: impl Into<String>, path: &str, span: ast::Span) {
        self.push(Diagnostic::warning(id, message, Some(Location { path: path.to_owned(), span })));
    }

    /// Vrai si au moins une erreur.
    pub fn has_errors(&self) -> bool { self.items.iter().any(Diagnostic::is_blocking) }

    /// Diagnostics accumulés.
    pub fn as_slice(&self) -> &[Diagnostic] { &self.items }

    /// Consomme l'accumulateur.
    pub fn into_vec(self) -> Vec<Diagnostic> { self.items }

    /// Promeut tous les warnings.
    pub fn promote_warnings(&mut self) {
        for d in &mut self.items {
            *d = d.clone().promoted();
        }
    }

    /// Ajoute le contenu d'un autre accumulateur.
    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) { self.items.extend(other); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_is_id_colon_message() {
        let d = Diagnostic::error(ids::UNKNOWN_NAME, "The name 'x' does not exist in the current context", None);
        assert_eq!(d.to_string(), "KL0103: The name 'x' does not exist in the current context");
        assert_eq!(d.render(), "error KL0103: The name 'x' does not exist in the current context");
    }

    #[test]
    fn promotion_marks_warning_as_error() {
        let w = Diagnostic::warning(ids::UNUSED_LOCAL, "unused", None);
        assert!(!w.is_blocking());
        let p = w.promoted();
        assert!(p.is_blocking());
        assert!(p.is_warning_as_error);
        assert_eq!(p.severity, Severity::Error);

        let e = Diagnostic::error(ids::SYNTAX, "bad", None).promoted();
        assert!(!e.is_warning_as_error);
    }

    #[test]
    fn render_with_location() {
        let mut bag = DiagnosticBag::default();
        bag.warning(ids::UNUSED_LOCAL, "The variable 'y' is assigned but its value is never used", "generated.kl", ast::Span::new(3, 9, 40));
        assert!(!bag.has_errors());
        assert_eq!(
            bag.as_slice()[0].render(),
            "generated.kl(3,9): warning KL0219: The variable 'y' is assigned but its value is never used"
        );
        bag.promote_warnings();
        assert!(bag.has_errors());
    }
}
