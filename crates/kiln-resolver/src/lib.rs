//! kiln-resolver — fermeture transitive des références d'assemblies
//!
//! À partir d'assemblies « graines », calcule l'ensemble des fichiers image
//! (`.klib`) à donner au compilateur :
//!
//! - chaque identité est traitée une seule fois (marquée *avant* la descente) ;
//! - un assembly dynamique (généré au runtime, sans chemin) est ignoré ;
//! - sans emplacement propre, on cherche `<name>.klib` dans les hint paths, le
//!   premier répertoire listé gagnant ;
//! - aucune erreur ne remonte : tout échec est journalisé et l'assembly omis.
//!
//! ```ignore
//! use kiln_resolver::{HintPaths, ReferenceResolver};
//!
//! let resolver = ReferenceResolver::new(&context, hint_paths);
//! let references = resolver.resolve(&[core, text]);
//! ```

#![deny(missing_docs)]

use std::{path::PathBuf, sync::Arc};

use kiln_core::{AssemblyName, BINARY_EXTENSION};
use kiln_image::{ImageError, MetadataReference};

mod hint;
mod set;

pub use hint::{HintPaths, ResolverOptions};
pub use set::{ReferenceSet, VisitedAssemblies};

use hint::HintPathIndex;

/* ─────────────────────────── Contrat ─────────────────────────── */

/// Un assembly chargé, tel que le résolveur le voit.
pub trait Assembly: Send + Sync {
    /// Identité.
    fn name(&self) -> &AssemblyName;

    /// Nom d'affichage (forme longue de l'identité).
    fn display_name(&self) -> String { self.name().to_string() }

    /// Fichier d'origine, `None` si chargé depuis la mémoire.
    fn location(&self) -> Option<&std::path::Path>;

    /// Généré au runtime : jamais référençable.
    fn is_dynamic(&self) -> bool;

    /// Identités référencées directement.
    fn referenced_assemblies(&self) -> Result<Vec<AssemblyName>, LoadError>;
}

/// Charge un assembly par identité (contexte de chargement du runtime).
pub trait AssemblyLoader {
    /// Retourne l'assembly déjà chargé ou le charge.
    fn load(&self, name: &AssemblyName) -> Result<Arc<dyn Assembly>, LoadError>;
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Échec de chargement ou d'inspection d'un assembly.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Aucun emplacement connu pour cette identité.
    #[error("could not load file or assembly '{0}'")]
    NotFound(AssemblyName),
    /// Image illisible.
    #[error("bad image for '{name}': {source}")]
    BadImage {
        /// Identité ou chemin concerné.
        name: String,
        /// Cause.
        #[source]
        source: ImageError,
    },
    /// Identité déjà chargée depuis un autre flux.
    #[error("assembly '{0}' is already loaded")]
    AlreadyLoaded(AssemblyName),
}

/// Cause d'un échec d'inspection.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    /// Lecture des métadonnées de l'image.
    #[error(transparent)]
    Image(#[from] ImageError),
    /// Chargement d'un assembly référencé.
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Raison pour laquelle un assembly n'a pas été référencé.
#[derive(Debug, thiserror::Error)]
pub enum ResolveFailure {
    /// Sans emplacement et introuvable dans les hint paths.
    #[error("Could not make an assembly reference to {0}")]
    Unresolvable(AssemblyName),
    /// Généré au runtime.
    #[error("{0} is a dynamic assembly and cannot be referenced")]
    Dynamic(AssemblyName),
    /// Métadonnées ou dépendance illisibles.
    #[error("Could not inspect {name}: {source}")]
    InspectionFailed {
        /// Identité (forme longue) concernée.
        name: String,
        /// Cause.
        #[source]
        source: InspectError,
    },
}

/* ─────────────────────────── Résultats ─────────────────────────── */

/// Issue du traitement d'un assembly.
#[derive(Debug)]
pub enum Resolution {
    /// Identité déjà traitée pendant cet appel.
    AlreadyVisited,
    /// Nouvelle référence ajoutée.
    Added(PathBuf),
    /// Une référence de même affichage existait déjà.
    AlreadyReferenced(PathBuf),
    /// Omis.
    Skipped(ResolveFailure),
}

/// Bilan complet d'un appel de résolution.
#[derive(Debug, Default)]
pub struct ResolutionReport {
    /// Références résolues.
    pub references: ReferenceSet,
    /// Identités visitées.
    pub visited: VisitedAssemblies,
    /// Issue de chaque tentative, dans l'ordre du parcours.
    pub outcomes: Vec<(AssemblyName, Resolution)>,
}

impl ResolutionReport {
    /// Échecs (journalisés pendant le parcours).
    pub fn failures(&self) -> impl Iterator<Item = &ResolveFailure> {
        self.outcomes.iter().filter_map(|(_, r)| match r {
            Resolution::Skipped(f) => Some(f),
            _ => None,
        })
    }
}

/* ─────────────────────────── Résolveur ─────────────────────────── */

/// Résolveur de références : un chargeur + une liste de hint paths.
pub struct ReferenceResolver<'l> {
    loader: &'l dyn AssemblyLoader,
    hint_paths: HintPaths,
    options: ResolverOptions,
}

impl<'l> ReferenceResolver<'l> {
    /// Nouveau résolveur.
    pub fn new(loader: &'l dyn AssemblyLoader, hint_paths: HintPaths) -> Self {
        Self { loader, hint_paths, options: ResolverOptions::default() }
    }

    /// Change les réglages du parcours des hint paths.
    #[must_use]
    pub const fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Hint paths.
    pub const fn hint_paths(&self) -> &HintPaths { &self.hint_paths }

    /// Ensemble des références atteignables depuis `seeds`.
    pub fn resolve(&self, seeds: &[Arc<dyn Assembly>]) -> ReferenceSet { self.resolve_with_report(seeds).references }

    /// Idem, avec le détail de chaque tentative.
    #[tracing::instrument(level = "debug", skip_all, fields(seeds = seeds.len(), hint_paths = self.hint_paths.len()))]
    pub fn resolve_with_report(&self, seeds: &[Arc<dyn Assembly>]) -> ResolutionReport {
        let mut walk = Traversal {
            loader: self.loader,
            index: HintPathIndex::new(&self.hint_paths, self.options, BINARY_EXTENSION),
            report: ResolutionReport::default(),
        };
        for seed in seeds {
            walk.reference(seed.as_ref());
        }
        tracing::debug!(
            references = walk.report.references.len(),
            visited = walk.report.visited.len(),
            "resolution finished"
        );
        walk.report
    }
}

/// État d'un appel : possédé par l'appel, passé par `&mut` à la récursion.
struct Traversal<'a> {
    loader: &'a dyn AssemblyLoader,
    index: HintPathIndex<'a>,
    report: ResolutionReport,
}

impl Traversal<'_> {
    fn reference(&mut self, assembly: &dyn Assembly) {
        let name = assembly.name().clone();
        let outcome = self.step(assembly);
        let descend = matches!(outcome, Resolution::Added(_));
        match &outcome {
            Resolution::Skipped(f @ ResolveFailure::Dynamic(_)) => tracing::trace!("{f}"),
            Resolution::Skipped(f) => tracing::warn!("{f}"),
            _ => {}
        }
        self.report.outcomes.push((name.clone(), outcome));

        if descend {
            self.descend(assembly, &name);
        }
    }

    fn step(&mut self, assembly: &dyn Assembly) -> Resolution {
        let name = assembly.name();
        if !self.report.visited.insert(name.clone()) {
            return Resolution::AlreadyVisited;
        }
        if assembly.is_dynamic() {
            return Resolution::Skipped(ResolveFailure::Dynamic(name.clone()));
        }

        let path = match assembly.location() {
            Some(p) => p.to_path_buf(),
            None => match self.index.find(name) {
                Some(p) => p,
                None => return Resolution::Skipped(ResolveFailure::Unresolvable(name.clone())),
            },
        };

        if self.report.references.contains_display(&path.display().to_string()) {
            return Resolution::AlreadyReferenced(path);
        }
        match MetadataReference::from_file(&path) {
            Ok(r) => {
                self.report.references.insert(r);
                Resolution::Added(path)
            }
            Err(e) => Resolution::Skipped(ResolveFailure::InspectionFailed {
                name: assembly.display_name(),
                source: e.into(),
            }),
        }
    }

    fn descend(&mut self, assembly: &dyn Assembly, name: &AssemblyName) {
        let children = match assembly.referenced_assemblies() {
            Ok(c) => c,
            Err(e) => {
                self.skip(name.clone(), ResolveFailure::InspectionFailed { name: assembly.display_name(), source: e.into() });
                return;
            }
        };
        for child in children {
            if self.report.visited.contains(&child) {
                continue;
            }
            match self.loader.load(&child) {
                Ok(loaded) => self.reference(loaded.as_ref()),
                Err(e) => {
                    // une identité introuvable n'est tentée qu'une fois
                    self.report.visited.insert(child.clone());
                    let failure = ResolveFailure::InspectionFailed { name: child.to_string(), source: e.into() };
                    self.skip(child, failure);
                }
            }
        }
    }

    fn skip(&mut self, name: AssemblyName, failure: ResolveFailure) {
        tracing::warn!("{failure}");
        self.report.outcomes.push((name, Resolution::Skipped(failure)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::{HashMap, HashSet, VecDeque},
        path::Path,
    };

    use kiln_image::Image;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    struct Fake {
        name: AssemblyName,
        location: Option<PathBuf>,
        dynamic: bool,
        refs: Vec<AssemblyName>,
    }

    impl Assembly for Fake {
        fn name(&self) -> &AssemblyName { &self.name }
        fn location(&self) -> Option<&Path> { self.location.as_deref() }
        fn is_dynamic(&self) -> bool { self.dynamic }
        fn referenced_assemblies(&self) -> Result<Vec<AssemblyName>, LoadError> { Ok(self.refs.clone()) }
    }

    #[derive(Default)]
    struct Graph {
        nodes: HashMap<AssemblyName, Arc<Fake>>,
        loads: Mutex<Vec<String>>,
    }

    impl Graph {
        fn node(mut self, name: &str, location: Option<PathBuf>, refs: &[&str]) -> Self {
            let fake = Fake {
                name: AssemblyName::new(name),
                location,
                dynamic: false,
                refs: refs.iter().map(|r| AssemblyName::new(*r)).collect(),
            };
            self.nodes.insert(fake.name.clone(), Arc::new(fake));
            self
        }

        fn dynamic(mut self, name: &str, refs: &[&str]) -> Self {
            let fake = Fake {
                name: AssemblyName::new(name),
                location: None,
                dynamic: true,
                refs: refs.iter().map(|r| AssemblyName::new(*r)).collect(),
            };
            self.nodes.insert(fake.name.clone(), Arc::new(fake));
            self
        }

        fn seed(&self, name: &str) -> Arc<dyn Assembly> { self.nodes[&AssemblyName::new(name)].clone() }
    }

    impl AssemblyLoader for Graph {
        fn load(&self, name: &AssemblyName) -> Result<Arc<dyn Assembly>, LoadError> {
            self.loads.lock().push(name.name.clone());
            match self.nodes.get(name) {
                Some(a) => Ok(a.clone() as Arc<dyn Assembly>),
                None => Err(LoadError::NotFound(name.clone())),
            }
        }
    }

    fn image(dir: &Path, rel: &str, name: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        Image::new(AssemblyName::new(name)).write_file(&path).unwrap();
        path
    }

    fn names(set: &ReferenceSet) -> Vec<String> { set.iter().map(|r| r.identity().name.clone()).collect() }

    #[test]
    fn diamond_yields_three_references() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let g = Graph::default()
            .node("A", Some(image(d, "A.klib", "A")), &["B", "C"])
            .node("B", Some(image(d, "B.klib", "B")), &["C"])
            .node("C", Some(image(d, "C.klib", "C")), &[]);
        let resolver = ReferenceResolver::new(&g, HintPaths::new());
        let report = resolver.resolve_with_report(&[g.seed("A")]);
        assert_eq!(names(&report.references), ["A", "B", "C"]);
        assert_eq!(report.visited.len(), 3);
        // C est déjà visité quand A y revient : pas de second chargement
        assert_eq!(*g.loads.lock(), ["B", "C"]);
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    fn cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let g = Graph::default()
            .node("A", Some(image(d, "A.klib", "A")), &["B"])
            .node("B", Some(image(d, "B.klib", "B")), &["A"]);
        let refs = ReferenceResolver::new(&g, HintPaths::new()).resolve(&[g.seed("A"), g.seed("B")]);
        assert_eq!(names(&refs), ["A", "B"]);
    }

    #[test]
    fn first_hint_path_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let expected = image(first.path(), "nested/X.klib", "X");
        image(second.path(), "X.klib", "X");
        let g = Graph::default().node("A", Some(image(dir.path(), "A.klib", "A")), &["X"]).node("X", None, &[]);

        let hints: HintPaths = [first.path(), second.path()].into_iter().collect();
        let refs = ReferenceResolver::new(&g, hints).resolve(&[g.seed("A")]);
        assert_eq!(refs.len(), 2);
        assert!(refs.get(&expected).is_some());
    }

    #[test]
    fn unresolvable_assembly_is_excluded_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let g = Graph::default().node("A", Some(image(dir.path(), "A.klib", "A")), &["M"]).node("M", None, &[]);
        let hints: HintPaths = [dir.path().join("empty")].into_iter().collect();
        let report = ReferenceResolver::new(&g, hints).resolve_with_report(&[g.seed("A")]);
        assert_eq!(names(&report.references), ["A"]);
        let failures: Vec<_> = report.failures().map(ToString::to_string).collect();
        assert_eq!(
            failures,
            ["Could not make an assembly reference to M, Version=0.0.0.0, Culture=neutral, PublicKeyToken=null"]
        );
    }

    #[test]
    fn shared_dependency_is_referenced_once() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let g = Graph::default()
            .node("A", Some(image(d, "A.klib", "A")), &["C"])
            .node("B", Some(image(d, "B.klib", "B")), &["C"])
            .node("C", Some(image(d, "C.klib", "C")), &[]);
        let refs = ReferenceResolver::new(&g, HintPaths::new()).resolve(&[g.seed("A"), g.seed("B")]);
        assert_eq!(names(&refs), ["A", "C", "B"]);
    }

    #[test]
    fn dynamic_seed_is_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let g = Graph::default().dynamic("Dyn", &["A"]).node("A", Some(image(dir.path(), "A.klib", "A")), &[]);
        let report = ReferenceResolver::new(&g, HintPaths::new()).resolve_with_report(&[g.seed("Dyn")]);
        assert!(report.references.is_empty());
        assert!(matches!(report.failures().next(), Some(ResolveFailure::Dynamic(_))));
        // sortie anticipée : ses références ne sont pas parcourues
        assert!(g.loads.lock().is_empty());
    }

    #[test]
    fn dynamic_seed_is_skipped_even_when_a_hint_path_has_its_image() {
        let hint = tempfile::tempdir().unwrap();
        image(hint.path(), "Dyn.klib", "Dyn");
        let g = Graph::default().dynamic("Dyn", &[]);
        let hints: HintPaths = [hint.path()].into_iter().collect();
        let report = ReferenceResolver::new(&g, hints).resolve_with_report(&[g.seed("Dyn")]);
        assert!(report.references.is_empty());
        assert_eq!(report.visited.len(), 1);
        assert!(matches!(report.failures().next(), Some(ResolveFailure::Dynamic(_))));
    }

    #[test]
    fn loader_failure_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let g = Graph::default()
            .node("A", Some(image(d, "A.klib", "A")), &["Z", "B"])
            .node("B", Some(image(d, "B.klib", "B")), &["Z"]);
        let report = ReferenceResolver::new(&g, HintPaths::new()).resolve_with_report(&[g.seed("A")]);
        assert_eq!(names(&report.references), ["A", "B"]);
        assert!(matches!(
            report.failures().next(),
            Some(ResolveFailure::InspectionFailed { source: InspectError::Load(LoadError::NotFound(_)), .. })
        ));
        // Z n'est tenté qu'une fois
        assert_eq!(*g.loads.lock(), ["Z", "B"]);
    }

    #[test]
    fn same_file_under_two_identities_is_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let shared = image(dir.path(), "Shared.klib", "Shared");
        let g = Graph::default().node("A", Some(shared.clone()), &[]).node("A2", Some(shared.clone()), &[]);
        let report = ReferenceResolver::new(&g, HintPaths::new()).resolve_with_report(&[g.seed("A"), g.seed("A2")]);
        assert_eq!(report.references.len(), 1);
        assert!(matches!(&report.outcomes[1].1, Resolution::AlreadyReferenced(p) if p == &shared));
    }

    #[test]
    fn unreadable_image_is_an_inspection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("A.klib");
        std::fs::write(&bad, b"not an image").unwrap();
        let g = Graph::default().node("A", Some(bad), &["B"]).node("B", None, &[]);
        let report = ReferenceResolver::new(&g, HintPaths::new()).resolve_with_report(&[g.seed("A")]);
        assert!(report.references.is_empty());
        assert!(matches!(report.failures().next(), Some(ResolveFailure::InspectionFailed { source: InspectError::Image(_), .. })));
        assert!(g.loads.lock().is_empty());
    }

    fn reachable(n: usize, edges: &[(usize, usize)]) -> HashSet<usize> {
        let mut seen = HashSet::from([0]);
        let mut queue = VecDeque::from([0]);
        while let Some(i) = queue.pop_front() {
            for &(_, to) in edges.iter().filter(|(from, _)| *from == i) {
                if to < n && seen.insert(to) {
                    queue.push_back(to);
                }
            }
        }
        seen
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn every_reachable_identity_is_processed_once(
            (n, edges) in (1usize..7).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..16)))
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut g = Graph::default();
            for i in 0..n {
                let name = format!("N{i}");
                let refs: Vec<String> = edges.iter().filter(|(f, _)| *f == i).map(|(_, t)| format!("N{t}")).collect();
                let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
                g = g.node(&name, Some(image(dir.path(), &format!("{name}.klib"), &name)), &refs);
            }

            let report = ReferenceResolver::new(&g, HintPaths::new()).resolve_with_report(&[g.seed("N0")]);
            let expected = reachable(n, &edges);
            prop_assert_eq!(report.visited.len(), expected.len());
            prop_assert_eq!(report.references.len(), expected.len());

            let loads = g.loads.lock();
            let unique: HashSet<_> = loads.iter().collect();
            prop_assert_eq!(unique.len(), loads.len());
        }
    }
}
