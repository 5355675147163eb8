//! kiln-image — format binaire des assemblies Kiln (`.klib`)
//!
//! Format :
//! ```text
//! Header: "KLNIMG" (6 bytes) + version u16 LE
//! [Section*]
//!   section = TAG[4] + len u32 LE + payload
//! Dernière section: "CRCC" + u32 (CRC32 sur tout après header)
//! ```
//!
//! Sections :
//! - "IDNT" : identité (`AssemblyName`)
//! - "KIND" : type de sortie + point d'entrée optionnel
//! - "REFS" : identités référencées directement
//! - "EXPT" : natives exportées (`module.fonction`, arité)
//! - "IMPT" : natives importées (indice dans REFS, nom qualifié, arité)
//! - "CNST" : pool de constantes
//! - "TYPE" : types et signatures de méthodes
//! - "CODE" : corps de méthodes (bytecode, dans l'ordre de TYPE)
//! - "DBUG" : symboles embarqués (flux `KLNPDB`, optionnel)
//!
//! API :
//! - `Image::to_bytes()` / `from_bytes()`, `write_file()` / `read_file()`
//! - `Image::read_metadata()` : identité/refs/exports sans décoder le code
//! - `Symbols` (side-band ou embarqués), `MetadataReference`, `Op`

#![deny(missing_docs)]

use std::{fs, io, path::Path, path::PathBuf};

use core::{fmt, hash::{Hash, Hasher}, mem};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use kiln_core::{AssemblyName, ByteReader, CoreError, CoreResult, SectionTag, IMAGE_VERSION, MAGIC_IMAGE};

mod container;
pub mod op;
pub mod reference;
pub mod symbols;

pub use op::Op;
pub use reference::MetadataReference;
pub use symbols::{Document, MethodSymbols, SequencePoint, SourceLocation, Symbols};

const CONST_TAG_NULL: u8 = 0x00;
const CONST_TAG_STR: u8 = 0x01;
const CONST_TAG_I64: u8 = 0x02;
const CONST_TAG_F64: u8 = 0x03;
const CONST_TAG_BOOL: u8 = 0x04;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs d'accès aux images (fichier + format).
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Lecture/écriture du fichier impossible.
    #[error("{}{source}", located(.path))]
    Io {
        /// Fichier concerné.
        path: PathBuf,
        /// Cause.
        #[source]
        source: io::Error,
    },

    /// Contenu invalide.
    #[error("{}{source}", located(.path))]
    Format {
        /// Fichier concerné (vide pour un flux mémoire).
        path: PathBuf,
        /// Cause.
        #[source]
        source: CoreError,
    },

    /// Section obligatoire absente.
    #[error("missing {0} section")]
    MissingSection(&'static str),
}

fn located(path: &Path) -> String {
    if path.as_os_str().is_empty() { String::new() } else { format!("{}: ", path.display()) }
}

impl From<CoreError> for ImageError {
    fn from(source: CoreError) -> Self { ImageError::Format { path: PathBuf::new(), source } }
}

impl ImageError {
    fn at(self, p: &Path) -> Self {
        match self {
            ImageError::Format { source, .. } => ImageError::Format { path: p.to_path_buf(), source },
            other => other,
        }
    }
}

/* ─────────────────────────── Modèle ─────────────────────────── */

/// Type de sortie demandé au compilateur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OutputKind {
    /// Bibliothèque chargeable (par défaut).
    #[default]
    DynamicallyLinkedLibrary,
    /// Application avec point d'entrée `main`.
    ConsoleApplication,
}

impl OutputKind {
    const fn code(self) -> u8 {
        match self {
            OutputKind::DynamicallyLinkedLibrary => 0,
            OutputKind::ConsoleApplication => 1,
        }
    }

    fn from_code(c: u8) -> CoreResult<Self> {
        match c {
            0 => Ok(OutputKind::DynamicallyLinkedLibrary),
            1 => Ok(OutputKind::ConsoleApplication),
            _ => Err(CoreError::corrupted("bad output kind")),
        }
    }
}

/// Valeurs du pool de constantes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstValue {
    /// Null literal.
    Null,
    /// Booléen.
    Bool(bool),
    /// Entier 64 bits signé.
    I64(i64),
    /// Flottant 64 bits.
    F64(f64),
    /// Chaîne UTF-8.
    Str(String),
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstValue::Null, ConstValue::Null) => true,
            (ConstValue::Bool(a), ConstValue::Bool(b)) => a == b,
            (ConstValue::I64(a), ConstValue::I64(b)) => a == b,
            (ConstValue::F64(a), ConstValue::F64(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::Str(a), ConstValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            ConstValue::Null => {}
            ConstValue::Bool(b) => b.hash(state),
            ConstValue::I64(v) => v.hash(state),
            ConstValue::F64(v) => v.to_bits().hash(state),
            ConstValue::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Null => f.write_str("null"),
            ConstValue::Bool(b) => write!(f, "{b}"),
            ConstValue::I64(v) => write!(f, "{v}"),
            ConstValue::F64(v) => write!(f, "{v}"),
            ConstValue::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Native exportée par un assembly (bibliothèque hôte).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Export {
    /// Module (ex: `io`).
    pub module: String,
    /// Fonction (ex: `println`).
    pub function: String,
    /// Arité.
    pub arity: u8,
}

impl Export {
    /// Nom qualifié `module.fonction`.
    pub fn qualified(&self) -> String { format!("{}.{}", self.module, self.function) }
}

/// Native importée par le code d'une image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Import {
    /// Indice de l'assembly dans `references`.
    pub assembly: u32,
    /// Nom qualifié `module.fonction`.
    pub name: String,
    /// Arité.
    pub arity: u8,
}

/// Type déclaré (`Namespace.Type`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TypeDef {
    /// Nom complet.
    pub full_name: String,
}

/// Méthode déclarée ; l'indice dans `Image::methods` est l'indice global.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MethodDef {
    /// Nom simple.
    pub name: String,
    /// Indice du type propriétaire.
    pub owner: u32,
    /// Nombre de paramètres.
    pub arity: u8,
    /// Nombre total de slots locaux (paramètres inclus).
    pub locals: u16,
    /// Bytecode encodé.
    pub code: Vec<u8>,
}

/// Vue « métadonnées seules » d'une image.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImageMetadata {
    /// Identité.
    pub identity: AssemblyName,
    /// Type de sortie.
    pub output_kind: OutputKind,
    /// Références directes.
    pub references: Vec<AssemblyName>,
    /// Natives exportées.
    pub exports: Vec<Export>,
}

impl ImageMetadata {
    /// Cherche une native exportée.
    pub fn export(&self, module: &str, function: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.module == module && e.function == function)
    }

    /// Vrai si au moins une native est exportée sous ce module.
    pub fn exports_module(&self, module: &str) -> bool { self.exports.iter().any(|e| e.module == module) }
}

/// Image d'assembly en mémoire.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Identité.
    pub identity: AssemblyName,
    /// Type de sortie.
    pub output_kind: OutputKind,
    /// Point d'entrée (indice global de méthode).
    pub entry_point: Option<u32>,
    /// Références directes.
    pub references: Vec<AssemblyName>,
    /// Natives exportées.
    pub exports: Vec<Export>,
    /// Natives importées.
    pub imports: Vec<Import>,
    /// Pool de constantes.
    pub constants: Vec<ConstValue>,
    /// Types.
    pub types: Vec<TypeDef>,
    /// Méthodes (ordre global).
    pub methods: Vec<MethodDef>,
    /// Symboles embarqués (section DBUG).
    pub embedded_symbols: Option<Symbols>,
}

impl Image {
    /// Image vide pour une identité.
    pub const fn new(identity: AssemblyName) -> Self {
        Self {
            identity,
            output_kind: OutputKind::DynamicallyLinkedLibrary,
            entry_point: None,
            references: Vec::new(),
            exports: Vec::new(),
            imports: Vec::new(),
            constants: Vec::new(),
            types: Vec::new(),
            methods: Vec::new(),
            embedded_symbols: None,
        }
    }

    /// Projection métadonnées.
    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            identity: self.identity.clone(),
            output_kind: self.output_kind,
            references: self.references.clone(),
            exports: self.exports.clone(),
        }
    }

    /// Indice d'un type par nom complet.
    pub fn find_type(&self, full_name: &str) -> Option<u32> {
        self.types.iter().position(|t| t.full_name == full_name).map(|i| i as u32)
    }

    /// Indice global d'une méthode d'un type.
    pub fn find_method(&self, owner: u32, name: &str) -> Option<u32> {
        self.methods.iter().position(|m| m.owner == owner && m.name == name).map(|i| i as u32)
    }

    /* ───────────── Sérialisation ───────────── */

    /// Sérialise en binaire `.klib` (avec CRC32).
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let mut sections = Vec::with_capacity(10);

        let mut idnt = kiln_core::ByteWriter::new();
        self.identity.write_to(&mut idnt)?;
        sections.push((SectionTag::IDNT, idnt.into_vec()));

        let mut kind = kiln_core::ByteWriter::new();
        kind.write_u8(self.output_kind.code());
        match self.entry_point {
            Some(m) => {
                kind.write_u8(1);
                kind.write_u32_le(m);
            }
            None => kind.write_u8(0),
        }
        sections.push((SectionTag::KIND, kind.into_vec()));

        sections.push((SectionTag::REFS, container::write_list(&self.references, |w, r| r.write_to(w))?));
        sections.push((
            SectionTag::EXPT,
            container::write_list(&self.exports, |w, e| {
                w.write_str(&e.module)?;
                w.write_str(&e.function)?;
                w.write_u8(e.arity);
                Ok(())
            })?,
        ));
        sections.push((
            SectionTag::IMPT,
            container::write_list(&self.imports, |w, i| {
                w.write_u32_le(i.assembly);
                w.write_str(&i.name)?;
                w.write_u8(i.arity);
                Ok(())
            })?,
        ));
        sections.push((
            SectionTag::CNST,
            container::write_list(&self.constants, |w, c| {
                match c {
                    ConstValue::Null => w.write_u8(CONST_TAG_NULL),
                    ConstValue::Bool(b) => {
                        w.write_u8(CONST_TAG_BOOL);
                        w.write_u8(u8::from(*b));
                    }
                    ConstValue::I64(v) => {
                        w.write_u8(CONST_TAG_I64);
                        w.write_i64_le(*v);
                    }
                    ConstValue::F64(v) => {
                        w.write_u8(CONST_TAG_F64);
                        w.write_f64_le(*v);
                    }
                    ConstValue::Str(s) => {
                        w.write_u8(CONST_TAG_STR);
                        w.write_str(s)?;
                    }
                }
                Ok(())
            })?,
        ));

        let mut ty = kiln_core::ByteWriter::new();
        ty.write_len(self.types.len())?;
        for t in &self.types {
            ty.write_str(&t.full_name)?;
        }
        ty.write_len(self.methods.len())?;
        for m in &self.methods {
            ty.write_str(&m.name)?;
            ty.write_u32_le(m.owner);
            ty.write_u8(m.arity);
            ty.write_u16_le(m.locals);
        }
        sections.push((SectionTag::TYPE, ty.into_vec()));

        sections.push((
            SectionTag::CODE,
            container::write_list(&self.methods, |w, m| {
                w.write_len(m.code.len())?;
                w.write_bytes(&m.code);
                Ok(())
            })?,
        ));

        if let Some(sym) = &self.embedded_symbols {
            sections.push((SectionTag::DBUG, sym.to_bytes()?));
        }

        container::write(MAGIC_IMAGE, IMAGE_VERSION, &sections)
    }

    /// Reconstruit une image à partir d'octets (CRC vérifié).
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        let sections = container::read(data, MAGIC_IMAGE, IMAGE_VERSION)?;
        let header = parse_header(&sections)?;

        let mut img = Image::new(header.identity);
        img.output_kind = header.output_kind;
        img.entry_point = header.entry_point;
        img.references = header.references;
        img.exports = header.exports;

        let mut codes: Option<Vec<Vec<u8>>> = None;
        for (tag, payload) in sections {
            match tag {
                SectionTag::IMPT => {
                    img.imports = container::read_list(payload, |r| {
                        Ok(Import { assembly: r.read_u32_le()?, name: r.read_str()?, arity: r.read_u8()? })
                    })?;
                }
                SectionTag::CNST => img.constants = container::read_list(payload, read_const)?,
                SectionTag::TYPE => {
                    let mut r = ByteReader::new(payload);
                    let nt = r.read_u32_le()?;
                    for _ in 0..nt {
                        img.types.push(TypeDef { full_name: r.read_str()? });
                    }
                    let nm = r.read_u32_le()?;
                    for _ in 0..nm {
                        img.methods.push(MethodDef {
                            name: r.read_str()?,
                            owner: r.read_u32_le()?,
                            arity: r.read_u8()?,
                            locals: r.read_u16_le()?,
                            code: Vec::new(),
                        });
                    }
                }
                SectionTag::CODE => {
                    codes = Some(container::read_list(payload, |r| {
                        let n = r.read_len()?;
                        Ok(r.read_bytes(n)?.to_vec())
                    })?);
                }
                SectionTag::DBUG => img.embedded_symbols = Some(Symbols::from_bytes(payload)?),
                _ => {}
            }
        }

        if let Some(codes) = codes {
            if codes.len() != img.methods.len() {
                return Err(CoreError::corrupted("CODE/TYPE method count mismatch").into());
            }
            for (m, code) in img.methods.iter_mut().zip(codes) {
                m.code = code;
            }
        }
        if img.methods.iter().any(|m| m.owner as usize >= img.types.len()) {
            return Err(CoreError::corrupted("method owner out of range").into());
        }
        Ok(img)
    }

    /// Écrit dans un fichier.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ImageError> {
        let path = path.as_ref();
        let bytes = self.to_bytes().map_err(|e| ImageError::from(e).at(path))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "writing image");
        fs::write(path, bytes).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })
    }

    /// Lit une image depuis un fichier.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let buf = fs::read(path).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })?;
        Self::from_bytes(&buf).map_err(|e| e.at(path))
    }

    /// Lit identité, type de sortie, références et exports sans décoder le code.
    pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<ImageMetadata, ImageError> {
        let path = path.as_ref();
        let buf = fs::read(path).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })?;
        Self::metadata_from_bytes(&buf).map_err(|e| e.at(path))
    }

    /// Variante mémoire de [`Image::read_metadata`].
    pub fn metadata_from_bytes(data: &[u8]) -> Result<ImageMetadata, ImageError> {
        let sections = container::read(data, MAGIC_IMAGE, IMAGE_VERSION)?;
        let h = parse_header(&sections)?;
        Ok(ImageMetadata { identity: h.identity, output_kind: h.output_kind, references: h.references, exports: h.exports })
    }
}

struct Header {
    identity: AssemblyName,
    output_kind: OutputKind,
    entry_point: Option<u32>,
    references: Vec<AssemblyName>,
    exports: Vec<Export>,
}

fn parse_header(sections: &[(SectionTag, &[u8])]) -> Result<Header, ImageError> {
    let find = |tag: SectionTag| sections.iter().find(|(t, _)| *t == tag).map(|(_, p)| *p);

    let idnt = find(SectionTag::IDNT).ok_or(ImageError::MissingSection("IDNT"))?;
    let identity = AssemblyName::read_from(&mut ByteReader::new(idnt))?;

    let (output_kind, entry_point) = match find(SectionTag::KIND) {
        Some(p) => {
            let mut r = ByteReader::new(p);
            let kind = OutputKind::from_code(r.read_u8()?)?;
            let entry = if r.read_u8()? == 1 { Some(r.read_u32_le()?) } else { None };
            (kind, entry)
        }
        None => (OutputKind::default(), None),
    };

    let references = match find(SectionTag::REFS) {
        Some(p) => container::read_list(p, AssemblyName::read_from)?,
        None => Vec::new(),
    };
    let exports = match find(SectionTag::EXPT) {
        Some(p) => container::read_list(p, |r| Ok(Export { module: r.read_str()?, function: r.read_str()?, arity: r.read_u8()? }))?,
        None => Vec::new(),
    };
    Ok(Header { identity, output_kind, entry_point, references, exports })
}

fn read_const(r: &mut ByteReader<'_>) -> CoreResult<ConstValue> {
    Ok(match r.read_u8()? {
        CONST_TAG_NULL => ConstValue::Null,
        CONST_TAG_BOOL => ConstValue::Bool(r.read_u8()? != 0),
        CONST_TAG_I64 => ConstValue::I64(r.read_i64_le()?),
        CONST_TAG_F64 => ConstValue::F64(r.read_f64_le()?),
        CONST_TAG_STR => ConstValue::Str(r.read_str()?),
        _ => return Err(CoreError::corrupted("bad constant tag")),
    })
}

/* ─────────────────────────── Tests ─────────────────────────── */
