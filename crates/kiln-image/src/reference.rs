//! Référence de compilation créée depuis un fichier image.

use std::path::{Path, PathBuf};

use kiln_core::AssemblyName;

use crate::{Image, ImageError, ImageMetadata};

/// Poignée de référence : chemin + métadonnées lues à la création.
///
/// Le texte d'affichage est le chemin du fichier ; deux références au même
/// fichier ont donc le même `display()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataReference {
    path: PathBuf,
    metadata: ImageMetadata,
}

impl MetadataReference {
    /// Lit les métadonnées de `path` et construit la référence.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let metadata = Image::read_metadata(path)?;
        Ok(Self { path: path.to_path_buf(), metadata })
    }

    /// Référence à partir de métadonnées déjà lues.
    pub fn from_metadata(path: impl Into<PathBuf>, metadata: ImageMetadata) -> Self {
        Self { path: path.into(), metadata }
    }

    /// Chemin du fichier.
    pub fn path(&self) -> &Path { &self.path }

    /// Texte d'affichage (le chemin).
    pub fn display(&self) -> String { self.path.display().to_string() }

    /// Identité lue dans le fichier.
    pub fn identity(&self) -> &AssemblyName { &self.metadata.identity }

    /// Métadonnées complètes.
    pub fn metadata(&self) -> &ImageMetadata { &self.metadata }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_path() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Lib.klib");
        Image::new(AssemblyName::new("Lib")).write_file(&path)?;

        let r = MetadataReference::from_file(&path)?;
        assert_eq!(r.display(), path.display().to_string());
        assert_eq!(r.identity().name, "Lib");
        assert_eq!(r.path(), path.as_path());
        Ok(())
    }

    #[test]
    fn non_image_file_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Fake.klib");
        std::fs::write(&path, b"not an image")?;
        assert!(matches!(MetadataReference::from_file(&path), Err(ImageError::Format { .. })));
        Ok(())
    }
}
