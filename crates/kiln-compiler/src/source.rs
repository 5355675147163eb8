//! Textes source et arbres syntaxiques.

use std::sync::Arc;

use kiln_ast as ast;
use kiln_core::{crc32_ieee, SourceId};

use crate::diagnostics::{ids, Diagnostic, Location};

/// Encodage déclaré d'un texte source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-8 (BOM optionnel).
    #[default]
    Utf8,
}

/// Erreur de décodage d'un texte source.
#[derive(Debug, thiserror::Error)]
pub enum SourceTextError {
    /// Octets non UTF-8.
    #[error("source is not valid UTF-8 (byte {valid_up_to})")]
    InvalidUtf8 {
        /// Longueur du préfixe valide.
        valid_up_to: usize,
    },
}

/// Texte source immuable, partagé.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    text: Arc<str>,
    encoding: Encoding,
    can_be_embedded: bool,
}

impl SourceText {
    /// Depuis une chaîne ; `can_be_embedded` autorise l'embarquement dans les symboles.
    pub fn new(text: impl Into<Arc<str>>, can_be_embedded: bool) -> Self {
        Self { text: text.into(), encoding: Encoding::Utf8, can_be_embedded }
    }

    /// Depuis des octets encodés.
    pub fn from_bytes(bytes: &[u8], encoding: Encoding, can_be_embedded: bool) -> Result<Self, SourceTextError> {
        let Encoding::Utf8 = encoding;
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
        let s = core::str::from_utf8(bytes).map_err(|e| SourceTextError::InvalidUtf8 { valid_up_to: e.valid_up_to() })?;
        Ok(Self { text: Arc::from(s), encoding, can_be_embedded })
    }

    /// Contenu.
    pub fn as_str(&self) -> &str { &self.text }

    /// Encodage.
    pub const fn encoding(&self) -> Encoding { self.encoding }

    /// Embarquable dans les symboles.
    pub const fn can_be_embedded(&self) -> bool { self.can_be_embedded }

    /// CRC32 du texte (sert de checksum de document).
    pub fn checksum(&self) -> u32 { crc32_ieee(self.text.as_bytes()) }
}

/// Texte à embarquer dans les symboles d'une émission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedText {
    /// Chemin logique du document.
    pub path: String,
    /// Contenu.
    pub text: SourceText,
}

impl EmbeddedText {
    /// `None` si le texte n'a pas été marqué embarquable.
    pub fn from_source(path: impl Into<String>, text: &SourceText) -> Option<Self> {
        text.can_be_embedded().then(|| Self { path: path.into(), text: text.clone() })
    }
}

/// Arbre syntaxique d'un document ; garde le texte et les erreurs de syntaxe.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    path: String,
    text: SourceText,
    unit: ast::CompilationUnit,
    diagnostics: Vec<Diagnostic>,
}

impl SyntaxTree {
    /// Parse `text` ; une erreur de syntaxe devient un diagnostic `KL1000` et l'unité reste vide.
    pub fn parse(text: SourceText, path: impl Into<String>) -> Self {
        let path = path.into();
        let (unit, diagnostics) = match kiln_parser::parse_unit(text.as_str(), SourceId(0)) {
            Ok(unit) => (unit, Vec::new()),
            Err(e) => {
                let loc = Location { path: path.clone(), span: e.at };
                (ast::CompilationUnit::default(), vec![Diagnostic::error(ids::SYNTAX, e.message, Some(loc))])
            }
        };
        tracing::trace!(path = %path, classes = unit.classes.len(), "syntax tree parsed");
        Self { path, text, unit, diagnostics }
    }

    /// Chemin logique.
    pub fn path(&self) -> &str { &self.path }

    /// Texte source.
    pub const fn text(&self) -> &SourceText { &self.text }

    /// Racine.
    pub const fn root(&self) -> &ast::CompilationUnit { &self.unit }

    /// Erreurs de syntaxe.
    pub fn diagnostics(&self) -> &[Diagnostic] { &self.diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_is_stripped_and_utf8_checked() {
        let t = SourceText::from_bytes(b"\xEF\xBB\xBFclass A {}", Encoding::Utf8, true).unwrap();
        assert_eq!(t.as_str(), "class A {}");
        assert!(t.can_be_embedded());
        assert!(matches!(
            SourceText::from_bytes(b"ab\xFF", Encoding::Utf8, false),
            Err(SourceTextError::InvalidUtf8 { valid_up_to: 2 })
        ));
    }

    #[test]
    fn embedding_requires_permission() {
        let yes = SourceText::new("x", true);
        let no = SourceText::new("x", false);
        assert!(EmbeddedText::from_source("a.kl", &yes).is_some());
        assert!(EmbeddedText::from_source("a.kl", &no).is_none());
    }

    #[test]
    fn syntax_errors_become_kl1000() {
        let tree = SyntaxTree::parse(SourceText::new("class {", true), "generated.kl");
        assert!(tree.root().classes.is_empty());
        let d = &tree.diagnostics()[0];
        assert_eq!(d.id, "KL1000");
        assert_eq!(d.render(), "generated.kl(1,7): error KL1000: expected identifier, found `{`");
    }
}
