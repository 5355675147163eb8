//! Points d'extension entre l'interpréteur et un débogueur.
//!
//! `debugger.break()` (bibliothèque `Kiln.Core`) appelle le hook installé sur le
//! contexte de chargement avec la position courante. Quand les symboles de
//! l'assembly sont chargés, la position est remappée vers le document source
//! (chemin logique, ligne, texte de la ligne si le source est embarqué).

use core::fmt;

use kiln_core::AssemblyName;

/// Position source d'un arrêt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSite {
    /// Chemin logique du document (`generated.kl`, …).
    pub path: String,
    /// Ligne (1-based).
    pub line: u32,
    /// Colonne (1-based).
    pub column: u32,
    /// Texte de la ligne, si le source est embarqué dans les symboles.
    pub text: Option<String>,
}

/// Contexte d'un arrêt demandé par le code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakContext {
    /// Assembly en cours d'exécution.
    pub assembly: AssemblyName,
    /// Méthode (`Type.methode`).
    pub method: String,
    /// Indice d'instruction de l'appel.
    pub pc: u32,
    /// Position source (symboles chargés).
    pub source: Option<SourceSite>,
}

impl fmt::Display for BreakContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] pc={}", self.method, self.assembly.name, self.pc)?;
        if let Some(s) = &self.source {
            write!(f, " at {}({},{})", s.path, s.line, s.column)?;
            if let Some(text) = &s.text {
                write!(f, ": {}", text.trim())?;
            }
        }
        Ok(())
    }
}

/// Hook appelé par l'interpréteur.
pub trait DebugHook: Send + Sync {
    /// `debugger.break()` a été exécuté.
    fn on_break(&self, ctx: &BreakContext);

    /// Valeur de `debugger.attached()`.
    fn is_attached(&self) -> bool { false }
}

/// Hook par défaut : journalise la position et continue.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHook;

impl DebugHook for LogHook {
    fn on_break(&self, ctx: &BreakContext) {
        tracing::info!(assembly = %ctx.assembly.name, pc = ctx.pc, "break: {ctx}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_source() {
        let ctx = BreakContext {
            assembly: AssemblyName::new("Gen"),
            method: "Debuggable.HelloWorld.greet".into(),
            pc: 3,
            source: Some(SourceSite { path: "generated.kl".into(), line: 4, column: 13, text: Some("    debugger.break();".into()) }),
        };
        assert_eq!(ctx.to_string(), "Debuggable.HelloWorld.greet [Gen] pc=3 at generated.kl(4,13): debugger.break();");
    }

    #[test]
    fn display_without_symbols() {
        let ctx = BreakContext { assembly: AssemblyName::new("Gen"), method: "T.m".into(), pc: 0, source: None };
        assert_eq!(ctx.to_string(), "T.m [Gen] pc=0");
        assert!(!LogHook.is_attached());
    }
}
