//! Contexte de chargement : registre des assemblies d'un processus.
//!
//! Un assembly est chargé une fois par identité. Ordre de recherche de
//! [`LoadContext::load`] : déjà chargé, puis répertoires de probing
//! (`<dir>/<name>.klib`). Les bibliothèques hôtes sont enregistrées à la
//! création du contexte et n'ont pas d'emplacement.

use std::{
    fmt,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use indexmap::IndexMap;
use kiln_core::{AssemblyName, BINARY_EXTENSION, SYMBOLS_EXTENSION};
use kiln_image::{Image, ImageError, Op, Symbols};
use kiln_resolver::{Assembly, AssemblyLoader, LoadError};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::{
    debug::{BreakContext, DebugHook, LogHook, SourceSite},
    host::HostLibrary,
    native::Natives,
    vm, RResult, RuntimeError, Value,
};

/* ─────────────────────────── État partagé ─────────────────────────── */

pub(crate) struct Shared {
    registry: RwLock<Registry>,
    stdout: Mutex<Box<dyn Write + Send>>,
    hook: RwLock<Arc<dyn DebugHook>>,
}

#[derive(Default)]
struct Registry {
    assemblies: IndexMap<AssemblyName, Arc<LoadedAssembly>>,
    probing: Vec<PathBuf>,
}

/// Contexte de chargement (poignée partagée, clonable).
#[derive(Clone)]
pub struct LoadContext {
    shared: Arc<Shared>,
}

impl Default for LoadContext {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.shared.registry.read().assemblies.keys().map(|n| n.name.clone()).collect();
        f.debug_struct("LoadContext").field("assemblies", &names).finish_non_exhaustive()
    }
}

impl LoadContext {
    /// Contexte vide, sortie sur `stdout`, hook [`LogHook`].
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                stdout: Mutex::new(Box::new(io::stdout())),
                hook: RwLock::new(Arc::new(LogHook)),
            }),
        }
    }

    /// Contexte avec `Kiln.Core` et `Kiln.Text` chargées.
    pub fn with_defaults() -> Self {
        let ctx = Self::new();
        for lib in HostLibrary::defaults() {
            if let Err(e) = ctx.register_host(lib) {
                tracing::warn!("{e}");
            }
        }
        ctx
    }

    pub(crate) const fn from_shared(shared: Arc<Shared>) -> Self { Self { shared } }

    /// Redirige la sortie des natives `io.*`.
    pub fn set_stdout<W: Write + Send + 'static>(&self, w: W) { *self.shared.stdout.lock() = Box::new(w); }

    /// Installe le hook appelé par `debugger.break()`.
    pub fn set_debug_hook(&self, hook: Arc<dyn DebugHook>) { *self.shared.hook.write() = hook; }

    /// Ajoute un répertoire de probing.
    pub fn add_probing_dir(&self, dir: impl Into<PathBuf>) { self.shared.registry.write().probing.push(dir.into()); }

    pub(crate) fn debug_hook(&self) -> Arc<dyn DebugHook> { self.shared.hook.read().clone() }

    pub(crate) fn stdout(&self) -> MutexGuard<'_, Box<dyn Write + Send>> { self.shared.stdout.lock() }

    /* ───────────── Chargement ───────────── */

    /// Enregistre une bibliothèque hôte (sans emplacement).
    pub fn register_host(&self, lib: HostLibrary) -> Result<Arc<LoadedAssembly>, LoadError> {
        let image = lib.image();
        let natives = lib.natives().clone();
        self.insert(LoadedAssembly {
            code: Vec::new(),
            image,
            symbols: None,
            location: None,
            dynamic: false,
            natives: Some(natives),
            context: Weak::new(),
        })
    }

    /// Charge une image (et ses symboles side-band) depuis la mémoire.
    ///
    /// Sans flux de symboles, les symboles embarqués de l'image sont utilisés.
    pub fn load_from_bytes(&self, image: &[u8], symbols: Option<&[u8]>) -> Result<Arc<LoadedAssembly>, LoadError> {
        let image = Image::from_bytes(image).map_err(|source| LoadError::BadImage { name: "<memory>".into(), source })?;
        let symbols = match symbols {
            Some(bytes) => Some(Symbols::from_bytes(bytes).map_err(|e| LoadError::BadImage {
                name: image.identity.to_string(),
                source: ImageError::from(e),
            })?),
            None => None,
        };
        self.insert(LoadedAssembly::from_image(image, symbols, None, false)?)
    }

    /// Charge un fichier `.klib` ; un `.kpdb` voisin est chargé s'il existe.
    pub fn load_from_path(&self, path: &Path) -> Result<Arc<LoadedAssembly>, LoadError> {
        let image = read_image(path)?;
        self.insert(assemble_file(path, image)?)
    }

    /// Enregistre un assembly généré au runtime (dynamique, jamais référençable).
    pub fn define_dynamic(&self, image: Image) -> Result<Arc<LoadedAssembly>, LoadError> {
        self.insert(LoadedAssembly::from_image(image, None, None, true)?)
    }

    /// Assembly par identité : déjà chargé, sinon probing.
    pub fn load(&self, name: &AssemblyName) -> Result<Arc<LoadedAssembly>, LoadError> {
        if let Some(loaded) = self.get(name) {
            return Ok(loaded);
        }
        let dirs = self.shared.registry.read().probing.clone();
        for dir in dirs {
            let path = dir.join(name.file_name(BINARY_EXTENSION));
            if !path.is_file() {
                continue;
            }
            let image = read_image(&path)?;
            if image.identity != *name {
                tracing::debug!(path = %path.display(), found = %image.identity, "identity mismatch, probing on");
                continue;
            }
            return match self.insert(assemble_file(&path, image)?) {
                // chargé entre-temps par un autre appelant
                Err(LoadError::AlreadyLoaded(_)) => self.get(name).ok_or_else(|| LoadError::NotFound(name.clone())),
                other => other,
            };
        }
        Err(LoadError::NotFound(name.clone()))
    }

    /// Assembly déjà chargé, par identité.
    pub fn get(&self, name: &AssemblyName) -> Option<Arc<LoadedAssembly>> { self.shared.registry.read().assemblies.get(name).cloned() }

    /// Premier assembly chargé portant ce nom simple.
    pub fn find(&self, simple_name: &str) -> Option<Arc<LoadedAssembly>> {
        self.shared.registry.read().assemblies.values().find(|a| a.name().name == simple_name).cloned()
    }

    /// Assemblies chargés, dans l'ordre de chargement.
    pub fn assemblies(&self) -> Vec<Arc<LoadedAssembly>> { self.shared.registry.read().assemblies.values().cloned().collect() }

    fn insert(&self, mut assembly: LoadedAssembly) -> Result<Arc<LoadedAssembly>, LoadError> {
        assembly.context = Arc::downgrade(&self.shared);
        let mut registry = self.shared.registry.write();
        if registry.assemblies.contains_key(assembly.name()) {
            return Err(LoadError::AlreadyLoaded(assembly.name().clone()));
        }
        let assembly = Arc::new(assembly);
        tracing::debug!(
            assembly = %assembly.name(),
            location = %assembly.location.as_deref().map_or_else(|| "<memory>".into(), |p| p.display().to_string()),
            dynamic = assembly.dynamic,
            "assembly loaded"
        );
        registry.assemblies.insert(assembly.name().clone(), assembly.clone());
        Ok(assembly)
    }
}

fn assemble_file(path: &Path, image: Image) -> Result<LoadedAssembly, LoadError> {
    let pdb = path.with_extension(SYMBOLS_EXTENSION);
    let symbols = if pdb.is_file() {
        let bad = |source: ImageError| LoadError::BadImage { name: pdb.display().to_string(), source };
        let bytes = std::fs::read(&pdb).map_err(|source| bad(ImageError::Io { path: pdb.clone(), source }))?;
        Some(Symbols::from_bytes(&bytes).map_err(|e| bad(ImageError::from(e)))?)
    } else {
        None
    };
    LoadedAssembly::from_image(image, symbols, Some(path.to_path_buf()), false)
}

fn read_image(path: &Path) -> Result<Image, LoadError> {
    Image::read_file(path).map_err(|source| LoadError::BadImage { name: path.display().to_string(), source })
}

impl AssemblyLoader for LoadContext {
    fn load(&self, name: &AssemblyName) -> Result<Arc<dyn Assembly>, LoadError> {
        Self::load(self, name).map(|a| a as Arc<dyn Assembly>)
    }
}

/* ─────────────────────────── Assembly chargé ─────────────────────────── */

/// Assembly présent dans un contexte de chargement.
pub struct LoadedAssembly {
    image: Image,
    code: Vec<Vec<Op>>,
    symbols: Option<Symbols>,
    location: Option<PathBuf>,
    dynamic: bool,
    natives: Option<Natives>,
    context: Weak<Shared>,
}

impl fmt::Debug for LoadedAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedAssembly")
            .field("name", &self.image.identity)
            .field("location", &self.location)
            .field("dynamic", &self.dynamic)
            .field("host", &self.natives.is_some())
            .finish_non_exhaustive()
    }
}

impl LoadedAssembly {
    fn from_image(
        mut image: Image,
        symbols: Option<Symbols>,
        location: Option<PathBuf>,
        dynamic: bool,
    ) -> Result<Self, LoadError> {
        let code = image
            .methods
            .iter()
            .map(|m| Op::decode_all(&m.code))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoadError::BadImage { name: image.identity.to_string(), source: e.into() })?;
        let symbols = symbols.or_else(|| image.embedded_symbols.take());
        Ok(Self { image, code, symbols, location, dynamic, natives: None, context: Weak::new() })
    }

    /// Identité.
    pub const fn name(&self) -> &AssemblyName { &self.image.identity }

    /// Image chargée.
    pub const fn image(&self) -> &Image { &self.image }

    /// Symboles de debug (side-band ou embarqués).
    pub const fn symbols(&self) -> Option<&Symbols> { self.symbols.as_ref() }

    /// Fichier d'origine.
    pub fn location(&self) -> Option<&Path> { self.location.as_deref() }

    /// Généré au runtime.
    pub const fn is_dynamic(&self) -> bool { self.dynamic }

    /// Natives, pour une bibliothèque hôte.
    pub const fn natives(&self) -> Option<&Natives> { self.natives.as_ref() }

    /// Noms complets des types.
    pub fn type_names(&self) -> impl Iterator<Item = &str> { self.image.types.iter().map(|t| t.full_name.as_str()) }

    /// Instance d'un type (par nom complet).
    pub fn create_instance(self: &Arc<Self>, type_name: &str) -> Option<Instance> {
        let type_index = self.image.find_type(type_name)?;
        Some(Instance { assembly: Arc::clone(self), type_index })
    }

    /// Exécute le point d'entrée `main`.
    pub fn run_main(self: &Arc<Self>) -> RResult<Value> {
        let entry = self.image.entry_point.ok_or_else(|| RuntimeError::NoEntryPoint(self.name().name.clone()))?;
        vm::invoke(self, entry, Vec::new())
    }

    pub(crate) fn context(&self) -> Option<LoadContext> { self.context.upgrade().map(LoadContext::from_shared) }

    pub(crate) fn code(&self, method: u32) -> Option<&[Op]> { self.code.get(method as usize).map(Vec::as_slice) }

    /// `Type.methode`
    pub(crate) fn method_name(&self, method: u32) -> String {
        let Some(m) = self.image.methods.get(method as usize) else {
            return format!("<method #{method}>");
        };
        match self.image.types.get(m.owner as usize) {
            Some(t) => format!("{}.{}", t.full_name, m.name),
            None => m.name.clone(),
        }
    }

    pub(crate) fn break_context(&self, method: u32, pc: u32) -> BreakContext {
        let source = self.symbols.as_ref().and_then(|s| {
            let at = s.line_for(method, pc)?;
            let text = at.document.text.as_deref().and_then(|t| t.lines().nth(at.point.line.checked_sub(1)? as usize));
            Some(SourceSite {
                path: at.document.path.clone(),
                line: at.point.line,
                column: at.point.column,
                text: text.map(str::to_owned),
            })
        });
        BreakContext { assembly: self.name().clone(), method: self.method_name(method), pc, source }
    }
}

impl Assembly for LoadedAssembly {
    fn name(&self) -> &AssemblyName { &self.image.identity }

    fn location(&self) -> Option<&Path> { self.location.as_deref() }

    fn is_dynamic(&self) -> bool { self.dynamic }

    fn referenced_assemblies(&self) -> Result<Vec<AssemblyName>, LoadError> { Ok(self.image.references.clone()) }
}

/* ─────────────────────────── Instance ─────────────────────────── */

/// Instance d'un type : point d'appel des méthodes.
#[derive(Debug, Clone)]
pub struct Instance {
    assembly: Arc<LoadedAssembly>,
    type_index: u32,
}

impl Instance {
    /// Nom complet du type.
    pub fn type_name(&self) -> &str {
        self.assembly.image.types.get(self.type_index as usize).map_or("", |t| t.full_name.as_str())
    }

    /// Assembly du type.
    pub const fn assembly(&self) -> &Arc<LoadedAssembly> { &self.assembly }

    /// Noms des méthodes du type.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.assembly.image.methods.iter().filter(|m| m.owner == self.type_index).map(|m| m.name.as_str())
    }

    /// Appelle `method` avec `args`.
    #[tracing::instrument(level = "debug", skip(self, args), fields(ty = %self.type_name(), argc = args.len()))]
    pub fn invoke(&self, method: &str, args: &[Value]) -> RResult<Value> {
        let image = &self.assembly.image;
        let index = image.find_method(self.type_index, method).ok_or_else(|| RuntimeError::MissingMethod {
            type_name: self.type_name().to_owned(),
            method: method.to_owned(),
        })?;
        let arity = image.methods.get(index as usize).map_or(0, |m| usize::from(m.arity));
        if args.len() != arity {
            return Err(RuntimeError::Arity { name: self.assembly.method_name(index), expected: arity, got: args.len() });
        }
        vm::invoke(&self.assembly, index, args.to_vec())
    }
}
