//! Images de référence des bibliothèques hôtes, écrites sur disque.
//!
//! Les bibliothèques hôtes sont chargées sans emplacement : pour les référencer,
//! le compilateur lit `<dir>/Kiln.Core.klib` et `<dir>/Kiln.Text.klib`, trouvés
//! via les hint paths.

use std::{
    fs,
    path::{Path, PathBuf},
};

use kiln_core::BINARY_EXTENSION;
use kiln_image::ImageError;

use crate::host::HostLibrary;

/// Écrit l'image de référence de chaque bibliothèque par défaut dans `dir`.
///
/// Retourne les chemins écrits.
pub fn install(dir: &Path) -> Result<Vec<PathBuf>, ImageError> { install_libraries(dir, &HostLibrary::defaults()) }

/// Idem pour une liste arbitraire de bibliothèques.
pub fn install_libraries(dir: &Path, libraries: &[HostLibrary]) -> Result<Vec<PathBuf>, ImageError> {
    fs::create_dir_all(dir).map_err(|source| ImageError::Io { path: dir.to_path_buf(), source })?;
    let mut written = Vec::with_capacity(libraries.len());
    for lib in libraries {
        let path = dir.join(lib.identity().file_name(BINARY_EXTENSION));
        lib.image().write_file(&path)?;
        tracing::debug!(path = %path.display(), "reference image written");
        written.push(path);
    }
    Ok(written)
}

/// Vrai si `dir` contient déjà toutes les images par défaut.
pub fn is_installed(dir: &Path) -> bool {
    HostLibrary::defaults().iter().all(|lib| dir.join(lib.identity().file_name(BINARY_EXTENSION)).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_image::MetadataReference;

    #[test]
    fn installs_readable_reference_images() {
        let dir = tempfile::tempdir().unwrap();
        let sdk = dir.path().join("sdk");
        assert!(!is_installed(&sdk));

        let written = install(&sdk).unwrap();
        assert_eq!(written, vec![sdk.join("Kiln.Core.klib"), sdk.join("Kiln.Text.klib")]);
        assert!(is_installed(&sdk));

        let text = MetadataReference::from_file(&written[1]).unwrap();
        assert_eq!(text.identity().name, "Kiln.Text");
        assert!(text.metadata().export("text", "upper").is_some());
    }
}
