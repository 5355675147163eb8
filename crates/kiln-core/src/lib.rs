//! kiln-core — primitives partagées
//!
//! Fournit :
//! - `SourceId`, `Pos`, `Span`, `Spanned<T>`
//! - `AssemblyName` / `Version` : identité logique d'un assembly (indépendante du chemin)
//! - Constantes d'images (`MAGIC_IMAGE`, `MAGIC_SYMBOLS`, extensions) + `SectionTag` (fourcc)
//! - IO mémoire (little-endian) : `ByteWriter`, `ByteReader`
//! - `crc32_ieee` (compact, sans table)
//! - Erreurs `CoreError` + alias `CoreResult<T>`
//!
//! Features :
//! - `serde` (par défaut) : derive (dé)sérialisation sur les identités

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use core::fmt;
use std::borrow::Cow;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Identités d'assembly (`AssemblyName`, `Version`).
pub mod identity;

pub use identity::{AssemblyName, Version};

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = core::result::Result<T, CoreError>;

/* ─────────────────────────── Spans / Positions ─────────────────────────── */

/// Identifiant de source (fichier, buffer, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceId(pub u32);

/// Position (offset byte) depuis le début de la source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pos(pub u32);

impl Pos {
    /// Position nulle.
    pub const ZERO: Self = Pos(0);
    /// Addition saturée.
    #[must_use]
    pub const fn saturating_add(self, v: u32) -> Self { Pos(self.0.saturating_add(v)) }
}

/// Plage (demi-ouverte) `[start, end)` dans une source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Source d’où provient l’item.
    pub source: SourceId,
    /// Début inclus.
    pub start: Pos,
    /// Fin exclue.
    pub end: Pos,
}

impl Span {
    /// Crée un span.
    pub const fn new(source: SourceId, start: Pos, end: Pos) -> Self { Self { source, start, end } }
    /// Longueur en bytes.
    pub const fn len(&self) -> u32 { self.end.0.saturating_sub(self.start.0) }
    /// Vrai si le span est vide.
    pub const fn is_empty(&self) -> bool { self.start.0 >= self.end.0 }
    /// Span couvrant `self` puis `other` (même source supposée).
    #[must_use]
    pub const fn to(self, other: Span) -> Span { Span { source: self.source, start: self.start, end: other.end } }
}

/// Wrapper utilitaire « valeur + span ».
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    /// La valeur.
    pub value: T,
    /// La localisation.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Construit un `Spanned<T>`.
    pub const fn new(value: T, span: Span) -> Self { Self { value, span } }
    /// Applique une fonction à la valeur et conserve le span.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> { Spanned { value: f(self.value), span: self.span } }
}

/* ─────────────────────────── Images — Constantes & Tags ─────────────────────────── */

/// Magic d’une image d'assembly : `b"KLNIMG"`.
pub const MAGIC_IMAGE: &[u8; 6] = b"KLNIMG";

/// Version actuelle du format d'image.
pub const IMAGE_VERSION: u16 = 1;

/// Magic d’un flux de symboles de debug portable : `b"KLNPDB"`.
pub const MAGIC_SYMBOLS: &[u8; 6] = b"KLNPDB";

/// Version actuelle du format de symboles.
pub const SYMBOLS_VERSION: u16 = 1;

/// Extension des binaires référençables (sans le point).
pub const BINARY_EXTENSION: &str = "klib";

/// Extension des symboles side-band (sans le point).
pub const SYMBOLS_EXTENSION: &str = "kpdb";

/// Extension des sources Kiln (sans le point).
pub const SOURCE_EXTENSION: &str = "kl";

/// Tags de section (fourcc) — exactement 4 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionTag {
    /// IDNT : identité de l'assembly
    IDNT = u32::from_be_bytes(*b"IDNT"),
    /// KIND : type de sortie + point d'entrée
    KIND = u32::from_be_bytes(*b"KIND"),
    /// REFS : identités référencées directement
    REFS = u32::from_be_bytes(*b"REFS"),
    /// EXPT : natives exportées (`module.fonction`, arité)
    EXPT = u32::from_be_bytes(*b"EXPT"),
    /// IMPT : imports utilisés par le code
    IMPT = u32::from_be_bytes(*b"IMPT"),
    /// CNST : pool de constantes
    CNST = u32::from_be_bytes(*b"CNST"),
    /// TYPE : types et méthodes
    TYPE = u32::from_be_bytes(*b"TYPE"),
    /// CODE : bytecode
    CODE = u32::from_be_bytes(*b"CODE"),
    /// DBUG : symboles de debug embarqués
    DBUG = u32::from_be_bytes(*b"DBUG"),
    /// DOCS : documents source (symboles)
    DOCS = u32::from_be_bytes(*b"DOCS"),
    /// SEQP : points de séquence pc → ligne (symboles)
    SEQP = u32::from_be_bytes(*b"SEQP"),
    /// CRCC : CRC32 trailer (u32 LE)
    CRCC = u32::from_be_bytes(*b"CRCC"),
}

impl SectionTag {
    const ALL: [SectionTag; 12] = [
        SectionTag::IDNT,
        SectionTag::KIND,
        SectionTag::REFS,
        SectionTag::EXPT,
        SectionTag::IMPT,
        SectionTag::CNST,
        SectionTag::TYPE,
        SectionTag::CODE,
        SectionTag::DBUG,
        SectionTag::DOCS,
        SectionTag::SEQP,
        SectionTag::CRCC,
    ];

    /// Renvoie le fourcc sous forme de 4 octets big-endian.
    pub const fn to_be_bytes(self) -> [u8; 4] { (self as u32).to_be_bytes() }

    /// Lit un tag depuis 4 octets big-endian.
    pub fn from_be_bytes(b: [u8; 4]) -> Option<Self> {
        let raw = u32::from_be_bytes(b);
        Self::ALL.iter().copied().find(|t| *t as u32 == raw)
    }

    /// Nom lisible (les 4 caractères ASCII).
    pub fn name(self) -> String { String::from_utf8_lossy(&self.to_be_bytes()).into_owned() }
}

/* ─────────────────────────── CRC32 IEEE ─────────────────────────── */

/// CRC32 (IEEE 802.3) — implémentation compacte sans table.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        let mut x = (crc ^ u32::from(b)) & 0xFF;
        // 8 itérations (bitwise) — polynôme 0xEDB88320
        for _ in 0..8 {
            let mask = (x & 1).wrapping_neg() & 0xEDB8_8320;
            x = (x >> 1) ^ mask;
        }
        crc = (crc >> 8) ^ x;
    }
    !crc
}

/* ─────────────────────────── Byte Writer (LE) ─────────────────────────── */

/// Buffer d’écriture (croît automatiquement).
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Crée un writer vide.
    pub const fn new() -> Self { Self { buf: Vec::new() } }
    /// Accès en lecture au contenu.
    pub fn as_slice(&self) -> &[u8] { &self.buf }
    /// Récupère le buffer (consomme).
    pub fn into_vec(self) -> Vec<u8> { self.buf }
    /// Taille courante.
    pub fn len(&self) -> usize { self.buf.len() }
    /// Vrai si rien n'a été écrit.
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }
    /// Ajoute des octets bruts.
    pub fn write_bytes(&mut self, bytes: &[u8]) { self.buf.extend_from_slice(bytes); }
    /// Écrit un tag (fourcc big-endian).
    pub fn write_tag(&mut self, tag: SectionTag) { self.write_bytes(&tag.to_be_bytes()); }
    /// Écrit un octet.
    pub fn write_u8(&mut self, v: u8) { self.buf.push(v); }
    /// Écrit un u16 little-endian.
    pub fn write_u16_le(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un u32 little-endian.
    pub fn write_u32_le(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un u64 little-endian.
    pub fn write_u64_le(&mut self, v: u64) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un i64 little-endian.
    pub fn write_i64_le(&mut self, v: i64) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un f64 little-endian.
    pub fn write_f64_le(&mut self, v: f64) { self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Écrit une longueur `u32` (erreur si > u32::MAX).
    pub fn write_len(&mut self, len: usize) -> CoreResult<()> {
        let n = u32::try_from(len).map_err(|_| CoreError::InvalidLength { section: None, len: len as u64 })?;
        self.write_u32_le(n);
        Ok(())
    }

    /// Écrit une chaîne préfixée par sa longueur (u32 LE).
    pub fn write_str(&mut self, s: &str) -> CoreResult<()> {
        self.write_len(s.len())?;
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    /// Écrit une section complète `TAG + len + payload`.
    pub fn write_section(&mut self, tag: SectionTag, payload: &[u8]) -> CoreResult<()> {
        self.write_tag(tag);
        self.write_len(payload.len()).map_err(|_| CoreError::InvalidLength {
            section: Some(Cow::Owned(tag.name())),
            len: payload.len() as u64,
        })?;
        self.write_bytes(payload);
        Ok(())
    }
}

/* ─────────────────────────── Byte Reader (LE) ─────────────────────────── */

/// Lecteur séquentiel sur un slice d’octets (helpers LE).
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> ByteReader<'a> {
    /// Construit un lecteur.
    pub const fn new(data: &'a [u8]) -> Self { Self { data, off: 0 } }
    /// Offset courant.
    pub const fn offset(&self) -> usize { self.off }
    /// Taille restante.
    pub const fn remaining(&self) -> usize { self.data.len().saturating_sub(self.off) }

    /// Lit `n` octets (ou erreur si EOF).
    pub fn read_bytes(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::UnexpectedEof { needed: n as u64, at: self.off as u64 });
        }
        let start = self.off;
        self.off += n;
        Ok(&self.data[start..self.off])
    }

    fn read_array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let b = self.read_bytes(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(b);
        Ok(arr)
    }

    /// Lit un tag (fourcc big-endian).
    pub fn read_tag(&mut self) -> CoreResult<SectionTag> {
        let arr = self.read_array::<4>()?;
        SectionTag::from_be_bytes(arr).ok_or(CoreError::InvalidSectionTag { raw: u32::from_be_bytes(arr) })
    }

    /// Lit un octet.
    pub fn read_u8(&mut self) -> CoreResult<u8> { Ok(self.read_array::<1>()?[0]) }

    /// Lit un u16 LE.
    pub fn read_u16_le(&mut self) -> CoreResult<u16> { Ok(u16::from_le_bytes(self.read_array()?)) }

    /// Lit un u32 LE.
    pub fn read_u32_le(&mut self) -> CoreResult<u32> { Ok(u32::from_le_bytes(self.read_array()?)) }

    /// Lit un u64 LE.
    pub fn read_u64_le(&mut self) -> CoreResult<u64> { Ok(u64::from_le_bytes(self.read_array()?)) }

    /// Lit un i64 LE.
    pub fn read_i64_le(&mut self) -> CoreResult<i64> { Ok(i64::from_le_bytes(self.read_array()?)) }

    /// Lit un f64 LE.
    pub fn read_f64_le(&mut self) -> CoreResult<f64> { Ok(f64::from_bits(self.read_u64_le()?)) }

    /// Lit une longueur u32 en `usize`.
    pub fn read_len(&mut self) -> CoreResult<usize> {
        let n = self.read_u32_le()? as usize;
        if n > self.remaining() {
            return Err(CoreError::InvalidLength { section: None, len: n as u64 });
        }
        Ok(n)
    }

    /// Lit une chaîne préfixée (u32 LE) en UTF-8.
    pub fn read_str(&mut self) -> CoreResult<String> {
        let n = self.read_len()?;
        let bytes = self.read_bytes(n)?;
        core::str::from_utf8(bytes).map(str::to_owned).map_err(|_| CoreError::InvalidUtf8)
    }
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs de bas niveau communes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CoreError {
    /// Magic invalide (attendu `b"KLNIMG"` ou `b"KLNPDB"`).
    InvalidMagic,
    /// Version de format non supportée.
    UnsupportedVersion { /// Version lue.
        found: u16
    },
    /// Tag de section inconnu.
    InvalidSectionTag { /// Valeur brute du tag.
        raw: u32
    },
    /// Fin de buffer inattendue.
    UnexpectedEof { /// Nombre d’octets manquants.
        needed: u64, /// Offset où l’erreur s’est produite.
        at: u64
    },
    /// Longueur de section invalide (ex: dépasse le buffer).
    InvalidLength { /// Nom de section (si connu).
        section: Option<Cow<'static, str>>, /// Longueur fautive.
        len: u64
    },
    /// UTF-8 invalide.
    InvalidUtf8,
    /// Identité d'assembly mal formée.
    InvalidIdentity(Cow<'static, str>),
    /// Données corrompues (CRC / format).
    Corrupted(Cow<'static, str>),
}

impl CoreError {
    /// Construit une erreur « corrompu ».
    pub fn corrupted(msg: impl Into<Cow<'static, str>>) -> Self { CoreError::Corrupted(msg.into()) }
    /// Construit une erreur « identité invalide ».
    pub fn identity(msg: impl Into<Cow<'static, str>>) -> Self { CoreError::InvalidIdentity(msg.into()) }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidMagic => write!(f, "invalid image magic"),
            CoreError::UnsupportedVersion { found } => write!(f, "unsupported format version: {found}"),
            CoreError::InvalidSectionTag { raw } => write!(f, "invalid section tag: 0x{raw:08X}"),
            CoreError::UnexpectedEof { needed, at } => write!(f, "unexpected EOF: need {needed} bytes at {at}"),
            CoreError::InvalidLength { section, len } => {
                if let Some(s) = section { write!(f, "invalid length for {s}: {len}") }
                else { write!(f, "invalid length: {len}") }
            }
            CoreError::InvalidUtf8 => write!(f, "invalid utf-8"),
            CoreError::InvalidIdentity(msg) => write!(f, "invalid assembly identity: {msg}"),
            CoreError::Corrupted(msg) => write!(f, "corrupted: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

/* ─────────────────────────── Prélude (reexports utiles) ─────────────────────────── */

/// Prélude pratique pour importer les types/funcs clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        crc32_ieee, AssemblyName, ByteReader, ByteWriter, CoreError, CoreResult, Pos, SectionTag, SourceId,
        Span, Spanned, Version, BINARY_EXTENSION, IMAGE_VERSION, MAGIC_IMAGE, MAGIC_SYMBOLS,
        SYMBOLS_EXTENSION, SYMBOLS_VERSION,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        // vecteur de référence IEEE
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn tags_roundtrip() {
        for t in SectionTag::ALL {
            assert_eq!(SectionTag::from_be_bytes(t.to_be_bytes()), Some(t));
        }
        assert_eq!(SectionTag::from_be_bytes(*b"NOPE"), None);
        assert_eq!(SectionTag::REFS.name(), "REFS");
    }

    #[test]
    fn writer_reader_le() -> CoreResult<()> {
        let mut w = ByteWriter::new();
        w.write_u16_le(0xBEEF);
        w.write_u32_le(0xDEAD_BEEF);
        w.write_i64_le(-42);
        w.write_f64_le(3.5);
        w.write_str("héllo")?;
        w.write_tag(SectionTag::CODE);

        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u16_le()?, 0xBEEF);
        assert_eq!(r.read_u32_le()?, 0xDEAD_BEEF);
        assert_eq!(r.read_i64_le()?, -42);
        assert_eq!(r.read_f64_le()?, 3.5);
        assert_eq!(r.read_str()?, "héllo");
        assert_eq!(r.read_tag()?, SectionTag::CODE);
        assert_eq!(r.remaining(), 0);
        Ok(())
    }

    #[test]
    fn reader_reports_eof() {
        let mut r = ByteReader::new(&[1, 2]);
        assert_eq!(r.read_u32_le(), Err(CoreError::UnexpectedEof { needed: 4, at: 0 }));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut w = ByteWriter::new();
        w.write_u32_le(1000);
        w.write_bytes(b"abc");
        let mut r = ByteReader::new(w.as_slice());
        assert!(matches!(r.read_str(), Err(CoreError::InvalidLength { len: 1000, .. })));
    }
}
