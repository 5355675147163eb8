//! Hint paths : répertoires fouillés, dans l'ordre, pour trouver `<name>.klib`.

use std::{
    collections::HashMap,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use kiln_core::AssemblyName;
use walkdir::WalkDir;

/// Liste ordonnée de répertoires de recherche.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintPaths {
    dirs: Vec<PathBuf>,
}

impl HintPaths {
    /// Liste vide.
    pub const fn new() -> Self { Self { dirs: Vec::new() } }

    /// Ajoute un répertoire en fin de liste.
    pub fn push(&mut self, dir: impl Into<PathBuf>) { self.dirs.push(dir.into()); }

    /// Ajoute les répertoires d'une variable au format `PATH` (ex: `KILN_HINT_PATH`).
    pub fn extend_from_env(&mut self, var: &str) {
        if let Some(value) = std::env::var_os(var) {
            self.dirs.extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
        }
    }

    /// Répertoires, dans l'ordre de recherche.
    pub fn iter(&self) -> impl Iterator<Item = &Path> { self.dirs.iter().map(PathBuf::as_path) }

    /// Nombre de répertoires.
    pub fn len(&self) -> usize { self.dirs.len() }

    /// Vrai si aucun répertoire.
    pub fn is_empty(&self) -> bool { self.dirs.is_empty() }
}

impl<P: Into<PathBuf>> FromIterator<P> for HintPaths {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self { Self { dirs: iter.into_iter().map(Into::into).collect() } }
}

impl<P: Into<PathBuf>> Extend<P> for HintPaths {
    fn extend<I: IntoIterator<Item = P>>(&mut self, iter: I) { self.dirs.extend(iter.into_iter().map(Into::into)); }
}

/// Réglages du parcours des hint paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolverOptions {
    /// Descendre dans les répertoires atteints par lien symbolique. Les liens
    /// vers des fichiers sont toujours retenus.
    pub follow_links: bool,
    /// Profondeur maximale sous chaque racine (`None` = illimitée).
    pub max_depth: Option<usize>,
}

/// Index paresseux `nom de fichier → premier chemin`, une table par racine.
///
/// Chaque racine est parcourue au plus une fois par appel de résolution, en
/// profondeur, entrées triées par nom.
#[derive(Debug)]
pub(crate) struct HintPathIndex<'h> {
    roots: &'h HintPaths,
    options: ResolverOptions,
    extension: &'h str,
    tables: Vec<Option<HashMap<String, PathBuf>>>,
}

impl<'h> HintPathIndex<'h> {
    pub fn new(roots: &'h HintPaths, options: ResolverOptions, extension: &'h str) -> Self {
        Self { roots, options, extension, tables: vec![None; roots.len()] }
    }

    /// Premier `<name>.<ext>` trouvé, racines dans l'ordre.
    pub fn find(&mut self, name: &AssemblyName) -> Option<PathBuf> {
        let file_name = name.file_name(self.extension);
        for (i, root) in self.roots.dirs.iter().enumerate() {
            tracing::debug!(root = %root.display(), file = %file_name, "searching hint path");
            let table = self.tables[i].get_or_insert_with(|| index_root(root, self.options, self.extension));
            if let Some(found) = table.get(&file_name) {
                tracing::debug!(path = %found.display(), "found in hint path");
                return Some(found.clone());
            }
        }
        None
    }
}

fn index_root(root: &Path, options: ResolverOptions, extension: &str) -> HashMap<String, PathBuf> {
    let mut walk = WalkDir::new(root).follow_links(options.follow_links).sort_by_file_name();
    if let Some(depth) = options.max_depth {
        walk = walk.max_depth(depth);
    }

    let mut table = HashMap::new();
    for entry in walk {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        // un lien vers un fichier compte, même sans `follow_links`
        let is_file = entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file());
        if !is_file || entry.path().extension() != Some(OsStr::new(extension)) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            // premier dans l'ordre du parcours
            table.entry(name.to_owned()).or_insert_with(|| entry.into_path());
        }
    }
    tracing::trace!(root = %root.display(), files = table.len(), "hint path indexed");
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(p: &Path) {
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn first_root_wins_even_when_nested() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        touch(&a.path().join("deep/er/Lib.klib"));
        touch(&b.path().join("Lib.klib"));
        let hints: HintPaths = [a.path(), b.path()].into_iter().collect();
        let mut index = HintPathIndex::new(&hints, ResolverOptions::default(), "klib");
        assert_eq!(index.find(&AssemblyName::new("Lib")), Some(a.path().join("deep/er/Lib.klib")));
    }

    #[test]
    fn depth_first_sorted_within_a_root() {
        let a = tempfile::tempdir().unwrap();
        touch(&a.path().join("b/Lib.klib"));
        touch(&a.path().join("a/x/Lib.klib"));
        let hints: HintPaths = [a.path()].into_iter().collect();
        let mut index = HintPathIndex::new(&hints, ResolverOptions::default(), "klib");
        assert_eq!(index.find(&AssemblyName::new("Lib")), Some(a.path().join("a/x/Lib.klib")));
    }

    #[test]
    fn other_extensions_and_missing_roots_are_ignored() {
        let a = tempfile::tempdir().unwrap();
        touch(&a.path().join("Lib.kpdb"));
        let hints: HintPaths = [a.path().join("nope"), a.path().to_path_buf()].into_iter().collect();
        let mut index = HintPathIndex::new(&hints, ResolverOptions::default(), "klib");
        assert_eq!(index.find(&AssemblyName::new("Lib")), None);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_image_is_found() {
        let a = tempfile::tempdir().unwrap();
        touch(&a.path().join("real/Lib.klib"));
        fs::create_dir_all(a.path().join("hint")).unwrap();
        std::os::unix::fs::symlink(a.path().join("real/Lib.klib"), a.path().join("hint/Lib.klib")).unwrap();

        let hints: HintPaths = [a.path().join("hint")].into_iter().collect();
        let mut index = HintPathIndex::new(&hints, ResolverOptions::default(), "klib");
        assert_eq!(index.find(&AssemblyName::new("Lib")), Some(a.path().join("hint/Lib.klib")));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_ignored() {
        let a = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(a.path().join("gone.klib"), a.path().join("Lib.klib")).unwrap();
        let hints: HintPaths = [a.path()].into_iter().collect();
        assert_eq!(HintPathIndex::new(&hints, ResolverOptions::default(), "klib").find(&AssemblyName::new("Lib")), None);
    }

    #[test]
    fn max_depth_limits_the_walk() {
        let a = tempfile::tempdir().unwrap();
        touch(&a.path().join("x/y/Lib.klib"));
        let hints: HintPaths = [a.path()].into_iter().collect();
        let opts = ResolverOptions { max_depth: Some(1), ..ResolverOptions::default() };
        assert_eq!(HintPathIndex::new(&hints, opts, "klib").find(&AssemblyName::new("Lib")), None);
    }
}
