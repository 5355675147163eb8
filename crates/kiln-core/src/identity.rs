//! Identité logique d'un assembly, indépendante de son chemin sur disque.
//!
//! Forme textuelle canonique :
//! `Name, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null`
//!
//! `FromStr` accepte cette forme complète ou un simple nom (version `0.0.0.0`).

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{ByteReader, ByteWriter, CoreError, CoreResult};

/* ─────────────────────────── Version ─────────────────────────── */

/// Version à quatre composantes `major.minor.build.revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Version {
    /// Majeure.
    pub major: u16,
    /// Mineure.
    pub minor: u16,
    /// Build.
    pub build: u16,
    /// Révision.
    pub revision: u16,
}

impl Version {
    /// Construit une version.
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self { major, minor, build, revision }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let mut parts = [0u16; 4];
        let mut n = 0;
        for piece in s.trim().split('.') {
            if n == 4 {
                return Err(CoreError::identity("too many version components"));
            }
            parts[n] = piece.parse().map_err(|_| CoreError::identity("bad version component"))?;
            n += 1;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/* ─────────────────────────── AssemblyName ─────────────────────────── */

/// Identité d'un assembly : nom + version + culture + jeton de clé publique.
///
/// Égalité et hachage portent sur tous les champs : deux builds du même nom
/// en versions différentes sont deux identités distinctes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AssemblyName {
    /// Nom simple (sert aussi de nom de fichier `<name>.klib`).
    pub name: String,
    /// Version.
    pub version: Version,
    /// Culture (`None` = neutral).
    pub culture: Option<String>,
    /// Jeton de clé publique (`None` = null).
    pub public_key_token: Option<[u8; 8]>,
}

impl AssemblyName {
    /// Identité neutre, version `0.0.0.0`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), version: Version::default(), culture: None, public_key_token: None }
    }

    /// Variante builder pour la version.
    #[must_use]
    pub const fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Variante builder pour le jeton.
    #[must_use]
    pub const fn with_token(mut self, token: [u8; 8]) -> Self {
        self.public_key_token = Some(token);
        self
    }

    /// Nom de fichier attendu dans un répertoire de recherche.
    pub fn file_name(&self, extension: &str) -> String { format!("{}.{extension}", self.name) }

    /// Sérialise l'identité (nom, version, culture, jeton).
    pub fn write_to(&self, w: &mut ByteWriter) -> CoreResult<()> {
        w.write_str(&self.name)?;
        for c in [self.version.major, self.version.minor, self.version.build, self.version.revision] {
            w.write_u16_le(c);
        }
        w.write_str(self.culture.as_deref().unwrap_or(""))?;
        match self.public_key_token {
            Some(t) => {
                w.write_u8(1);
                w.write_bytes(&t);
            }
            None => w.write_u8(0),
        }
        Ok(())
    }

    /// Relit une identité écrite par [`AssemblyName::write_to`].
    pub fn read_from(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let name = r.read_str()?;
        if name.is_empty() {
            return Err(CoreError::identity("empty name"));
        }
        let version = Version::new(r.read_u16_le()?, r.read_u16_le()?, r.read_u16_le()?, r.read_u16_le()?);
        let culture = Some(r.read_str()?).filter(|c| !c.is_empty());
        let public_key_token = match r.read_u8()? {
            0 => None,
            1 => {
                let mut t = [0u8; 8];
                t.copy_from_slice(r.read_bytes(8)?);
                Some(t)
            }
            _ => return Err(CoreError::corrupted("bad public key token flag")),
        };
        Ok(Self { name, version, culture, public_key_token })
    }
}

impl fmt::Display for AssemblyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Version={}, Culture={}, PublicKeyToken=", self.name, self.version, self.culture.as_deref().unwrap_or("neutral"))?;
        match self.public_key_token {
            Some(t) => t.iter().try_for_each(|b| write!(f, "{b:02x}")),
            None => f.write_str("null"),
        }
    }
}

fn parse_token(s: &str) -> CoreResult<Option<[u8; 8]>> {
    if s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    if s.len() != 16 || !s.is_ascii() {
        return Err(CoreError::identity("public key token must be 16 hex digits"));
    }
    let mut t = [0u8; 8];
    for (i, slot) in t.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| CoreError::identity("bad hex in public key token"))?;
    }
    Ok(Some(t))
}

impl FromStr for AssemblyName {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let mut parts = s.split(',').map(str::trim);
        let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(|| CoreError::identity("empty name"))?;
        let mut out = AssemblyName::new(name);
        for part in parts {
            let (key, value) = part.split_once('=').ok_or_else(|| CoreError::identity("expected Key=Value"))?;
            match key.trim() {
                "Version" => out.version = value.parse()?,
                "Culture" => {
                    let v = value.trim();
                    out.culture = (!v.eq_ignore_ascii_case("neutral") && !v.is_empty()).then(|| v.to_owned());
                }
                "PublicKeyToken" => out.public_key_token = parse_token(value.trim())?,
                _ => return Err(CoreError::identity("unknown identity attribute")),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_neutral_identity() {
        let n = AssemblyName::new("Kiln.Core").with_version(Version::new(1, 0, 0, 0));
        assert_eq!(n.to_string(), "Kiln.Core, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null");
    }

    #[test]
    fn parse_full_form_with_token() -> CoreResult<()> {
        let n: AssemblyName = "Lib, Version=2.1.0.7, Culture=fr-FR, PublicKeyToken=b77a5c561934e089".parse()?;
        assert_eq!(n.name, "Lib");
        assert_eq!(n.version, Version::new(2, 1, 0, 7));
        assert_eq!(n.culture.as_deref(), Some("fr-FR"));
        assert_eq!(n.public_key_token, Some([0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]));
        assert_eq!(n.to_string().parse::<AssemblyName>()?, n);
        Ok(())
    }

    #[test]
    fn bare_name_is_neutral() -> CoreResult<()> {
        let n: AssemblyName = "Solo".parse()?;
        assert_eq!(n, AssemblyName::new("Solo"));
        assert!("".parse::<AssemblyName>().is_err());
        assert!("X, Flavor=mint".parse::<AssemblyName>().is_err());
        Ok(())
    }

    #[test]
    fn versions_distinguish_identities() {
        let a = AssemblyName::new("Dup").with_version(Version::new(1, 0, 0, 0));
        let b = AssemblyName::new("Dup").with_version(Version::new(2, 0, 0, 0));
        assert_ne!(a, b);
        assert_eq!(a.file_name("klib"), "Dup.klib");
    }

    #[test]
    fn binary_identity() -> CoreResult<()> {
        let n = AssemblyName::new("Bin").with_token([1, 2, 3, 4, 5, 6, 7, 8]);
        let mut w = ByteWriter::new();
        n.write_to(&mut w)?;
        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(AssemblyName::read_from(&mut r)?, n);
        Ok(())
    }
}
