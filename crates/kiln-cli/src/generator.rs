//! Générateur de code : compile une source en mémoire et charge le résultat.
//!
//! Les références de la compilation sont recalculées à chaque appel par le
//! [`ReferenceResolver`], à partir des assemblies graines (par défaut
//! `Kiln.Core` et `Kiln.Text`, telles que chargées dans le contexte) et des
//! hint paths. Rien n'est mis en cache d'un appel à l'autre.

use std::{path::Path, sync::Arc};

use kiln_compiler::{
    Compilation, CompilationOptions, DebugInformationFormat, Diagnostic, EmbeddedText, EmitOptions, OutputKind,
    SourceText, SyntaxTree,
};
use kiln_core::{AssemblyName, SYMBOLS_EXTENSION};
use kiln_resolver::{Assembly, HintPaths, LoadError, ReferenceResolver, ResolutionReport, ResolverOptions};
use kiln_runtime::{host, LoadContext, LoadedAssembly};
use thiserror::Error;

use crate::config::KilnConfig;

/// Chemin logique de la source générée (diagnostics, symboles).
pub const GENERATED_SOURCE_PATH: &str = "generated.kl";

/// Échec de génération.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Diagnostics bloquants, une ligne `ID: message` chacun.
    #[error("{0}")]
    Compilation(String),
    /// L'image émise n'a pas pu être chargée.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Aucun assembly chargé ne définit ce type ni n'exporte ce module.
    #[error("aucun assembly chargé ne contient '{0}'")]
    NotFound(String),
    /// Source d'entropie du système indisponible.
    #[error("nom d'assembly aléatoire: {0}")]
    Entropy(getrandom::Error),
}

impl GenerateError {
    fn from_diagnostics<'a>(errors: impl IntoIterator<Item = &'a Diagnostic>) -> Self {
        Self::Compilation(errors.into_iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))
    }
}

/// Flux émis par une compilation réussie.
#[derive(Debug, Clone)]
pub struct Emitted {
    /// Identité de l'assembly.
    pub name: AssemblyName,
    /// Image `.klib`.
    pub image: Vec<u8>,
    /// Symboles `.kpdb` (format portable seulement).
    pub symbols: Option<Vec<u8>>,
    /// Diagnostics non bloquants.
    pub diagnostics: Vec<Diagnostic>,
}

/// Compile, résout, charge.
pub struct CodeGenerator {
    context: LoadContext,
    hint_paths: HintPaths,
    resolver_options: ResolverOptions,
    options: CompilationOptions,
    debug_format: DebugInformationFormat,
    seeds: Vec<Arc<LoadedAssembly>>,
}

impl std::fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGenerator")
            .field("hint_paths", &self.hint_paths)
            .field("options", &self.options)
            .field("debug_format", &self.debug_format)
            .field("seeds", &self.seeds.iter().map(|s| s.name().name.as_str()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CodeGenerator {
    /// Générateur sur `context` ; les bibliothèques par défaut du contexte servent de graines.
    pub fn new(context: LoadContext, hint_paths: HintPaths) -> Self {
        let mut generator = Self {
            context,
            hint_paths,
            resolver_options: ResolverOptions::default(),
            options: CompilationOptions::new(OutputKind::DynamicallyLinkedLibrary),
            debug_format: DebugInformationFormat::PortablePdb,
            seeds: Vec::new(),
        };
        for name in [host::CORE, host::TEXT] {
            if let Some(lib) = generator.context.find(name) {
                generator.reference_assembly(lib);
            }
        }
        generator
    }

    /// Hint paths, optimisation, warnings et format des symboles lus dans la configuration.
    pub fn from_config(context: LoadContext, config: &KilnConfig) -> Self {
        Self::new(context, config.hint_paths())
            .with_options(config.compilation_options(OutputKind::DynamicallyLinkedLibrary))
            .with_debug_format(config.debug_format)
    }

    /// Remplace les options de compilation.
    #[must_use]
    pub fn with_options(mut self, options: CompilationOptions) -> Self {
        self.options = options;
        self
    }

    /// Change le format des symboles.
    #[must_use]
    pub const fn with_debug_format(mut self, format: DebugInformationFormat) -> Self {
        self.debug_format = format;
        self
    }

    /// Change le parcours des hint paths.
    #[must_use]
    pub const fn with_resolver_options(mut self, options: ResolverOptions) -> Self {
        self.resolver_options = options;
        self
    }

    /// Contexte de chargement.
    pub const fn context(&self) -> &LoadContext { &self.context }

    /// Hint paths.
    pub const fn hint_paths(&self) -> &HintPaths { &self.hint_paths }

    /// Hint paths (modifiables).
    pub fn hint_paths_mut(&mut self) -> &mut HintPaths { &mut self.hint_paths }

    /// Options de compilation.
    pub const fn options(&self) -> &CompilationOptions { &self.options }

    /// Identités des graines, dans l'ordre d'ajout.
    pub fn seeds(&self) -> impl Iterator<Item = &AssemblyName> { self.seeds.iter().map(|s| s.name()) }

    /// Ajoute une graine. Faux si elle y était déjà.
    pub fn reference_assembly(&mut self, assembly: Arc<LoadedAssembly>) -> bool {
        if self.seeds.iter().any(|s| s.name() == assembly.name()) {
            return false;
        }
        tracing::debug!(assembly = %assembly.name(), "seed added");
        self.seeds.push(assembly);
        true
    }

    /// Ajoute comme graine l'assembly chargé qui définit le type `name`
    /// (nom complet) ou, pour une bibliothèque hôte, exporte le module `name`.
    pub fn reference_assembly_containing(&mut self, name: &str) -> Result<bool, GenerateError> {
        let found = self.context.assemblies().into_iter().find(|a| {
            a.type_names().any(|t| t == name) || a.image().exports.iter().any(|e| e.module == name)
        });
        let assembly = found.ok_or_else(|| GenerateError::NotFound(name.to_owned()))?;
        Ok(self.reference_assembly(assembly))
    }

    /// Résout les références des graines courantes.
    pub fn resolve(&self) -> ResolutionReport {
        let seeds: Vec<Arc<dyn Assembly>> = self.seeds.iter().map(|s| Arc::clone(s) as Arc<dyn Assembly>).collect();
        ReferenceResolver::new(&self.context, self.hint_paths.clone())
            .with_options(self.resolver_options)
            .resolve_with_report(&seeds)
    }

    /// Compile `code` sous l'identité `name`, source embarquée dans les symboles.
    pub fn emit(&self, name: AssemblyName, code: &str, source_path: &str) -> Result<Emitted, GenerateError> {
        let tree = SyntaxTree::parse(SourceText::new(code, true), source_path);
        let embedded_texts = EmbeddedText::from_source(source_path, tree.text()).into_iter().collect();
        let symbols_name = Path::new(&name.name).with_extension(SYMBOLS_EXTENSION);

        let references = self.resolve().references.into_references();
        tracing::debug!(assembly = %name.name, references = references.len(), "compiling");

        let compilation = Compilation::create(name.clone(), [tree], references, self.options.clone());
        let result = compilation.emit(&EmitOptions {
            debug_format: self.debug_format,
            pdb_path: Some(symbols_name.to_string_lossy().into_owned()),
            embedded_texts,
        });
        if !result.success {
            return Err(GenerateError::from_diagnostics(result.errors()));
        }
        let image = result.image.ok_or_else(|| GenerateError::Compilation(format!("{}: no image emitted", name.name)))?;
        Ok(Emitted { name, image, symbols: result.symbols, diagnostics: result.diagnostics })
    }

    /// Compile `code` sous un nom aléatoire et le charge dans le contexte.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn create_assembly(&self, code: &str) -> Result<Arc<LoadedAssembly>, GenerateError> {
        let emitted = self.emit(AssemblyName::new(random_assembly_name()?), code, GENERATED_SOURCE_PATH)?;
        for d in &emitted.diagnostics {
            tracing::warn!("{}", d.render());
        }
        let assembly = self.context.load_from_bytes(&emitted.image, emitted.symbols.as_deref())?;
        tracing::info!(assembly = %assembly.name(), "assembly created");
        Ok(assembly)
    }
}

/// Nom au format `xxxxxxxx.xxx` (minuscules et chiffres), tiré via `getrandom`.
pub fn random_assembly_name() -> Result<String, GenerateError> {
    const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz012345";

    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).map_err(GenerateError::Entropy)?;
    let mut bits = u64::from_le_bytes(buf);

    let mut name = String::with_capacity(12);
    for i in 0..11 {
        if i == 8 {
            name.push('.');
        }
        name.push(char::from(ALPHABET[(bits & 31) as usize]));
        bits >>= 5;
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_runtime::{sdk, Captured, Value};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn generator(dir: &Path) -> (CodeGenerator, Captured) {
        sdk::install(dir).unwrap();
        let ctx = LoadContext::with_defaults();
        let out = Captured::default();
        ctx.set_stdout(out.clone());
        (CodeGenerator::new(ctx, [dir].into_iter().collect()), out)
    }

    #[test]
    fn random_names_look_like_file_names() {
        let names: HashSet<_> = (0..64).map(|_| random_assembly_name().unwrap()).collect();
        assert_eq!(names.len(), 64);
        for n in &names {
            assert_eq!(n.len(), 12);
            assert_eq!(n.find('.'), Some(8));
            assert!(n.chars().all(|c| c == '.' || c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn default_seeds_resolve_to_the_sdk() {
        let dir = tempfile::tempdir().unwrap();
        let (g, _) = generator(dir.path());
        assert_eq!(g.seeds().map(|n| n.name.as_str()).collect::<Vec<_>>(), ["Kiln.Core", "Kiln.Text"]);

        let report = g.resolve();
        let paths: Vec<_> = report.references.paths().map(Path::to_path_buf).collect();
        assert_eq!(paths, vec![dir.path().join("Kiln.Core.klib"), dir.path().join("Kiln.Text.klib")]);
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    fn creates_and_invokes_hello_world() {
        let dir = tempfile::tempdir().unwrap();
        let (g, out) = generator(dir.path());

        let asm = g.create_assembly(crate::DEMO_SOURCE).unwrap();
        assert!(asm.location().is_none());
        assert!(asm.symbols().is_some());
        assert_eq!(asm.image().references.len(), 1);

        let hello = asm.create_instance("Debuggable.HelloWorld").unwrap();
        assert_eq!(hello.invoke("greet", &[Value::from("Kiln")]).unwrap(), Value::from("Hello, Kiln"));
        assert_eq!(out.get(), "");

        // symboles : source embarquée sous le chemin logique
        let doc = &asm.symbols().unwrap().documents[0];
        assert_eq!(doc.path, GENERATED_SOURCE_PATH);
        assert_eq!(doc.text.as_deref(), Some(crate::DEMO_SOURCE));
    }

    #[test]
    fn each_assembly_gets_a_fresh_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (g, _) = generator(dir.path());
        let a = g.create_assembly("class A { fn f() { return 1; } }").unwrap();
        let b = g.create_assembly("class A { fn f() { return 2; } }").unwrap();
        assert_ne!(a.name(), b.name());
        assert_eq!(g.context().assemblies().len(), 4);
    }

    #[test]
    fn compilation_errors_are_joined_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let (g, _) = generator(dir.path());
        let err = g.create_assembly("class A { fn f() { return missing.call(); } fn g() { return y; } }").unwrap_err();
        let GenerateError::Compilation(text) = err else { panic!("expected compilation error") };
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("KL")), "{text}");
    }

    #[test]
    fn without_hint_paths_host_calls_do_not_bind() {
        let ctx = LoadContext::with_defaults();
        let g = CodeGenerator::new(ctx, HintPaths::new());
        assert_eq!(g.resolve().failures().count(), 2);
        assert!(matches!(g.create_assembly(crate::DEMO_SOURCE), Err(GenerateError::Compilation(_))));
    }

    #[test]
    fn seeds_accumulate_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let (mut g, _) = generator(dir.path());
        let lib = g.create_assembly("namespace N { class Util { fn one() { return 1; } } }").unwrap();

        assert!(!g.reference_assembly_containing("text").unwrap());
        assert!(g.reference_assembly_containing("N.Util").unwrap());
        assert!(!g.reference_assembly(lib.clone()));
        assert!(matches!(g.reference_assembly_containing("Nope"), Err(GenerateError::NotFound(_))));

        // graine en mémoire, sans emplacement ni fichier : journalisée, omise
        let report = g.resolve();
        assert_eq!(report.references.len(), 2);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn embedded_format_carries_symbols_in_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let (g, _) = generator(dir.path());
        let g = g.with_debug_format(DebugInformationFormat::Embedded);
        let emitted = g.emit(AssemblyName::new("Embedded"), crate::DEMO_SOURCE, "demo.kl").unwrap();
        assert!(emitted.symbols.is_none());
        let asm = g.context().load_from_bytes(&emitted.image, None).unwrap();
        assert_eq!(asm.symbols().unwrap().documents[0].path, "demo.kl");
    }
}
