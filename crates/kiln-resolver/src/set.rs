//! Ensemble des références résolues et ensemble des identités visitées.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use kiln_core::AssemblyName;
use kiln_image::MetadataReference;

/// Références résolues, indexées par chemin ; jamais deux entrées au même `display()`.
///
/// L'itération suit l'ordre d'insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    entries: IndexMap<PathBuf, MetadataReference>,
}

impl ReferenceSet {
    /// Ensemble vide.
    pub fn new() -> Self { Self::default() }

    /// Ajoute `r` sauf si une entrée a déjà le même chemin ou le même `display()`.
    pub fn insert(&mut self, r: MetadataReference) -> bool {
        if self.contains_display(&r.display()) || self.entries.contains_key(r.path()) {
            return false;
        }
        self.entries.insert(r.path().to_path_buf(), r);
        true
    }

    /// Vrai si une entrée a ce texte d'affichage.
    pub fn contains_display(&self, display: &str) -> bool { self.entries.values().any(|r| r.display() == display) }

    /// Entrée pour un chemin.
    pub fn get(&self, path: &Path) -> Option<&MetadataReference> { self.entries.get(path) }

    /// Entrée pour une identité.
    pub fn find(&self, name: &AssemblyName) -> Option<&MetadataReference> {
        self.entries.values().find(|r| r.identity() == name)
    }

    /// Nombre d'entrées.
    pub fn len(&self) -> usize { self.entries.len() }

    /// Vrai si vide.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Chemins.
    pub fn paths(&self) -> impl Iterator<Item = &Path> { self.entries.keys().map(PathBuf::as_path) }

    /// Références.
    pub fn iter(&self) -> impl Iterator<Item = &MetadataReference> { self.entries.values() }

    /// Liste de références pour le compilateur.
    pub fn into_references(self) -> Vec<MetadataReference> { self.entries.into_values().collect() }
}

impl IntoIterator for ReferenceSet {
    type Item = MetadataReference;
    type IntoIter = indexmap::map::IntoValues<PathBuf, MetadataReference>;

    fn into_iter(self) -> Self::IntoIter { self.entries.into_values() }
}

/// Identités déjà traitées pendant un appel de résolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitedAssemblies {
    names: HashSet<AssemblyName>,
}

impl VisitedAssemblies {
    /// Marque `name` ; faux s'il l'était déjà.
    pub fn insert(&mut self, name: AssemblyName) -> bool { self.names.insert(name) }

    /// Vrai si déjà visité.
    pub fn contains(&self, name: &AssemblyName) -> bool { self.names.contains(name) }

    /// Nombre d'identités visitées.
    pub fn len(&self) -> usize { self.names.len() }

    /// Vrai si rien n'a été visité.
    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    /// Identités (ordre non spécifié).
    pub fn iter(&self) -> impl Iterator<Item = &AssemblyName> { self.names.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_image::{ImageMetadata, OutputKind};

    fn reference(path: &str, name: &str) -> MetadataReference {
        let metadata = ImageMetadata {
            identity: AssemblyName::new(name),
            output_kind: OutputKind::DynamicallyLinkedLibrary,
            references: vec![],
            exports: vec![],
        };
        MetadataReference::from_metadata(path, metadata)
    }

    #[test]
    fn same_display_is_rejected() {
        let mut set = ReferenceSet::new();
        assert!(set.insert(reference("/lib/A.klib", "A")));
        assert!(!set.insert(reference("/lib/A.klib", "A2")));
        assert!(set.insert(reference("/lib/B.klib", "B")));
        assert_eq!(set.len(), 2);
        assert_eq!(set.find(&AssemblyName::new("B")).map(MetadataReference::display).as_deref(), Some("/lib/B.klib"));
        let order: Vec<_> = set.into_iter().map(|r| r.identity().name.clone()).collect();
        assert_eq!(order, ["A", "B"]);
    }

    #[test]
    fn visited_is_by_full_identity() {
        let mut v = VisitedAssemblies::default();
        assert!(v.insert(AssemblyName::new("A")));
        assert!(!v.insert(AssemblyName::new("A")));
        assert!(v.insert(AssemblyName::new("A").with_token([1; 8])));
        assert_eq!(v.len(), 2);
    }
}
