//! Symboles de debug portables (`.kpdb`) : documents source + points de séquence.
//!
//! Le même flux sert en side-band (fichier `<name>.kpdb`) ou embarqué dans la
//! section `DBUG` d'une image.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use kiln_core::{crc32_ieee, CoreError, CoreResult, SectionTag, MAGIC_SYMBOLS, SYMBOLS_VERSION};

use crate::container;

/// Document source connu des symboles.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Document {
    /// Chemin logique (ex: `generated.kl`).
    pub path: String,
    /// Texte embarqué (UTF-8), si la source a été marquée embarquable.
    pub text: Option<String>,
    /// CRC32 du texte source.
    pub checksum: u32,
}

impl Document {
    /// Document avec texte embarqué.
    pub fn embedded(path: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self { path: path.into(), checksum: crc32_ieee(text.as_bytes()), text: Some(text) }
    }

    /// Document référencé seulement par chemin + checksum.
    pub fn external(path: impl Into<String>, text: &str) -> Self {
        Self { path: path.into(), checksum: crc32_ieee(text.as_bytes()), text: None }
    }
}

/// Correspondance `pc → (ligne, colonne)` ; lignes et colonnes à partir de 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SequencePoint {
    /// Indice d'instruction.
    pub pc: u32,
    /// Ligne.
    pub line: u32,
    /// Colonne.
    pub column: u32,
}

/// Points de séquence d'une méthode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MethodSymbols {
    /// Indice global de méthode dans l'image.
    pub method: u32,
    /// Indice du document.
    pub document: u32,
    /// Points, triés par `pc` croissant.
    pub points: Vec<SequencePoint>,
}

/// Symboles complets d'une image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Symbols {
    /// Documents.
    pub documents: Vec<Document>,
    /// Méthodes.
    pub methods: Vec<MethodSymbols>,
}

/// Emplacement source résolu pour un `pc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation<'a> {
    /// Document concerné.
    pub document: &'a Document,
    /// Point de séquence couvrant le `pc`.
    pub point: SequencePoint,
}

impl Symbols {
    /// Dernier point de séquence `<= pc` pour la méthode.
    pub fn line_for(&self, method: u32, pc: u32) -> Option<SourceLocation<'_>> {
        let m = self.methods.iter().find(|m| m.method == method)?;
        let point = m.points.iter().take_while(|p| p.pc <= pc).last().copied()?;
        let document = self.documents.get(m.document as usize)?;
        Some(SourceLocation { document, point })
    }

    /// Texte d'une ligne (1-based) du document embarqué, sans fin de ligne.
    pub fn source_line(&self, document: u32, line: u32) -> Option<&str> {
        let text = self.documents.get(document as usize)?.text.as_deref()?;
        text.lines().nth(line.checked_sub(1)? as usize)
    }

    /// Sérialise en flux `KLNPDB`.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let docs = container::write_list(&self.documents, |w, d| {
            w.write_str(&d.path)?;
            match &d.text {
                Some(t) => {
                    w.write_u8(1);
                    w.write_str(t)?;
                }
                None => w.write_u8(0),
            }
            w.write_u32_le(d.checksum);
            Ok(())
        })?;
        let seqp = container::write_list(&self.methods, |w, m| {
            w.write_u32_le(m.method);
            w.write_u32_le(m.document);
            w.write_len(m.points.len())?;
            for p in &m.points {
                w.write_u32_le(p.pc);
                w.write_u32_le(p.line);
                w.write_u32_le(p.column);
            }
            Ok(())
        })?;
        container::write(MAGIC_SYMBOLS, SYMBOLS_VERSION, &[(SectionTag::DOCS, docs), (SectionTag::SEQP, seqp)])
    }

    /// Relit un flux `KLNPDB` ; vérifie le CRC des textes embarqués.
    pub fn from_bytes(data: &[u8]) -> CoreResult<Self> {
        let mut out = Symbols::default();
        for (tag, payload) in container::read(data, MAGIC_SYMBOLS, SYMBOLS_VERSION)? {
            match tag {
                SectionTag::DOCS => {
                    out.documents = container::read_list(payload, |r| {
                        let path = r.read_str()?;
                        let text = match r.read_u8()? {
                            0 => None,
                            _ => Some(r.read_str()?),
                        };
                        let checksum = r.read_u32_le()?;
                        if text.as_ref().is_some_and(|t| crc32_ieee(t.as_bytes()) != checksum) {
                            return Err(CoreError::corrupted("embedded source checksum mismatch"));
                        }
                        Ok(Document { path, text, checksum })
                    })?;
                }
                SectionTag::SEQP => {
                    out.methods = container::read_list(payload, |r| {
                        let method = r.read_u32_le()?;
                        let document = r.read_u32_le()?;
                        let n = r.read_u32_le()? as usize;
                        let mut points = Vec::with_capacity(n.min(r.remaining() / 12));
                        for _ in 0..n {
                            points.push(SequencePoint { pc: r.read_u32_le()?, line: r.read_u32_le()?, column: r.read_u32_le()? });
                        }
                        Ok(MethodSymbols { method, document, points })
                    })?;
                }
                other => return Err(CoreError::corrupted(format!("unexpected section {} in symbols", other.name()))),
            }
        }
        Ok(out)
    }
}
