//! Kiln Compiler — compilation en mémoire d'arbres syntaxiques vers une image `.klib`
//!
//! - Entrée : `SyntaxTree` (texte source + chemin logique) + `MetadataReference`
//! - Sortie : octets d'image + symboles de debug (side-band ou embarqués)
//! - Diagnostics : identifiant stable (`KL0103`, …), gravité, message, localisation
//! - Passes (trait `Pass`) : déclarations, puis liaison + génération de code
//!
//! API principale :
//! ```ignore
//! use kiln_compiler::{Compilation, CompilationOptions, EmitOptions, SourceText, SyntaxTree};
//!
//! let tree = SyntaxTree::parse(SourceText::new(code, true), "generated.kl");
//! let compilation = Compilation::create(name, [tree], references, CompilationOptions::default());
//! let result = compilation.emit(&EmitOptions::default());
//! if !result.success { /* result.diagnostics */ }
//! ```

#![deny(missing_docs)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use kiln_core::AssemblyName;
use kiln_image::{Document, Image, MetadataReference, MethodDef, MethodSymbols, Op, Symbols, TypeDef};

mod declare;
pub mod diagnostics;
mod fold;
mod lower;
mod pass;
pub mod source;

pub use diagnostics::{Diagnostic, DiagnosticBag, Location, Severity};
pub use kiln_image::OutputKind;
pub use source::{EmbeddedText, Encoding, SourceText, SourceTextError, SyntaxTree};

use declare::{CollectDeclarations, Declarations};
use lower::{ImageTables, Lower, LoweredMethod};
use pass::{Ctx, Pass};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Niveau d'optimisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OptimizationLevel {
    /// Code tel quel, un point de séquence par instruction source.
    #[default]
    Debug,
    /// Pliage des constantes.
    Release,
}

/// Format des symboles de debug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DebugInformationFormat {
    /// Flux `.kpdb` séparé.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "portable"))]
    PortablePdb,
    /// Section `DBUG` dans l'image.
    #[cfg_attr(feature = "serde", serde(rename = "embedded"))]
    Embedded,
}

/// Options de compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompilationOptions {
    /// Type de sortie
    pub output_kind: OutputKind,
    /// Niveau d'optimisation
    pub optimization: OptimizationLevel,
    /// Warnings → erreurs
    pub deny_warnings: bool,
}

impl CompilationOptions {
    /// Options pour un type de sortie.
    #[must_use]
    pub fn new(output_kind: OutputKind) -> Self { Self { output_kind, ..Self::default() } }

    /// Change le niveau d'optimisation.
    #[must_use]
    pub const fn with_optimization(mut self, optimization: OptimizationLevel) -> Self {
        self.optimization = optimization;
        self
    }
}

/// Options d'émission
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Format des symboles
    pub debug_format: DebugInformationFormat,
    /// Chemin logique des symboles (informatif : l'appelant écrit le flux où il veut)
    pub pdb_path: Option<String>,
    /// Textes source à embarquer dans les symboles
    pub embedded_texts: Vec<EmbeddedText>,
}

/// Résultat d'une émission
#[derive(Debug, Clone)]
pub struct EmitResult {
    /// Vrai si aucun diagnostic bloquant
    pub success: bool,
    /// Tous les diagnostics (erreurs, warnings, infos)
    pub diagnostics: Vec<Diagnostic>,
    /// Image `.klib` (si succès)
    pub image: Option<Vec<u8>>,
    /// Symboles side-band `.kpdb` (si succès et format portable)
    pub symbols: Option<Vec<u8>>,
}

impl EmitResult {
    /// Diagnostics qui font échouer l'émission (erreurs + warnings promus).
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> { self.diagnostics.iter().filter(|d| d.is_blocking()) }

    fn failed(diagnostics: Vec<Diagnostic>) -> Self { Self { success: false, diagnostics, image: None, symbols: None } }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Compilation façade */
// ─────────────────────────────────────────────────────────────────────────────

/// Une compilation : identité de sortie, arbres, références, options
#[derive(Debug, Clone)]
pub struct Compilation {
    name: AssemblyName,
    trees: Vec<SyntaxTree>,
    references: Vec<MetadataReference>,
    options: CompilationOptions,
}

struct Analysis {
    diags: DiagnosticBag,
    decls: Declarations,
    tables: ImageTables,
    methods: Vec<LoweredMethod>,
}

impl Compilation {
    /// Crée une compilation
    pub fn create(
        name: AssemblyName,
        trees: impl IntoIterator<Item = SyntaxTree>,
        references: impl IntoIterator<Item = MetadataReference>,
        options: CompilationOptions,
    ) -> Self {
        Self { name, trees: trees.into_iter().collect(), references: references.into_iter().collect(), options }
    }

    /// Identité de l'assembly produit.
    pub const fn assembly_name(&self) -> &AssemblyName { &self.name }

    /// Arbres syntaxiques.
    pub fn syntax_trees(&self) -> &[SyntaxTree] { &self.trees }

    /// Références.
    pub fn references(&self) -> &[MetadataReference] { &self.references }

    /// Options.
    pub const fn options(&self) -> &CompilationOptions { &self.options }

    /// Diagnostics sans émettre.
    pub fn diagnostics(&self) -> Vec<Diagnostic> { self.analyze().diags.into_vec() }

    fn analyze(&self) -> Analysis {
        let mut diags = DiagnosticBag::default();
        for t in &self.trees {
            diags.extend(t.diagnostics().iter().cloned());
        }

        // 1) Déclarations
        let mut collect = CollectDeclarations::default();
        {
            let mut ctx = Ctx { opts: &self.options, diags: &mut diags };
            collect.run(&mut ctx, &self.trees);
        }
        let decls = collect.out;

        // 2) Liaison + code
        let (tables, methods) = {
            let mut lower = Lower::new(&decls, &self.references);
            let mut ctx = Ctx { opts: &self.options, diags: &mut diags };
            lower.run(&mut ctx, &self.trees);
            lower.finish()
        };

        if self.options.deny_warnings {
            diags.promote_warnings();
        }
        Analysis { diags, decls, tables, methods }
    }

    /// Compile et émet l'image (+ symboles)
    #[tracing::instrument(level = "debug", skip_all, fields(assembly = %self.name.name))]
    pub fn emit(&self, options: &EmitOptions) -> EmitResult {
        let Analysis { mut diags, decls, tables, methods } = self.analyze();
        if diags.has_errors() {
            tracing::debug!(errors = diags.as_slice().iter().filter(|d| d.is_blocking()).count(), "emit failed");
            return EmitResult::failed(diags.into_vec());
        }

        let symbols = self.symbols(&methods, options);
        let mut image = Image::new(self.name.clone());
        image.output_kind = self.options.output_kind;
        if self.options.output_kind == OutputKind::ConsoleApplication {
            image.entry_point = decls.entry_point;
        }
        image.references = tables.references.into_iter().collect();
        image.imports = tables.imports.into_iter().collect();
        image.constants = tables.constants;
        image.types = decls.types.iter().map(|t| TypeDef { full_name: t.full_name.clone() }).collect();
        image.methods = decls
            .methods
            .iter()
            .zip(&methods)
            .map(|(sig, m)| MethodDef {
                name: sig.name.clone(),
                owner: sig.owner,
                arity: sig.arity,
                locals: m.locals,
                code: Op::encode_all(&m.code),
            })
            .collect();

        let symbol_bytes = match options.debug_format {
            DebugInformationFormat::Embedded => {
                image.embedded_symbols = Some(symbols);
                Ok(None)
            }
            DebugInformationFormat::PortablePdb => symbols.to_bytes().map(Some),
        };
        let encoded = symbol_bytes.and_then(|s| Ok((image.to_bytes()?, s)));

        match encoded {
            Ok((bytes, symbols)) => {
                tracing::debug!(
                    image = bytes.len(),
                    symbols = symbols.as_ref().map_or(0, Vec::len),
                    pdb = options.pdb_path.as_deref().unwrap_or("-"),
                    "emitted"
                );
                EmitResult { success: true, diagnostics: diags.into_vec(), image: Some(bytes), symbols }
            }
            Err(e) => {
                diags.push(Diagnostic::error(diagnostics::ids::LIMIT_EXCEEDED, format!("Image cannot be encoded: {e}"), None));
                EmitResult::failed(diags.into_vec())
            }
        }
    }

    fn symbols(&self, methods: &[LoweredMethod], options: &EmitOptions) -> Symbols {
        let documents = self
            .trees
            .iter()
            .map(|t| match options.embedded_texts.iter().find(|e| e.path == t.path()) {
                Some(e) => Document::embedded(t.path(), e.text.as_str()),
                None => Document::external(t.path(), t.text().as_str()),
            })
            .collect();
        let methods = methods
            .iter()
            .enumerate()
            .filter_map(|(i, m)| {
                Some(MethodSymbols {
                    method: u32::try_from(i).ok()?,
                    document: u32::try_from(m.tree).ok()?,
                    points: m.points.clone(),
                })
            })
            .collect();
        Symbols { documents, methods }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use kiln_image::{ConstValue, Export, ImageMetadata};
    use pretty_assertions::assert_eq;

    const HELLO: &str = "namespace Debuggable {
    class HelloWorld {
        fn greet(message) {
            let upper = text.upper(message);
            io.println(\"Hello, \" + upper);
            return \"Greeted \" + message;
        }
    }
}";

    fn core_ref() -> MetadataReference {
        let metadata = ImageMetadata {
            identity: AssemblyName::new("Kiln.Core"),
            output_kind: OutputKind::DynamicallyLinkedLibrary,
            references: vec![],
            exports: vec![Export { module: "io".into(), function: "println".into(), arity: 1 }],
        };
        MetadataReference::from_metadata("/sdk/Kiln.Core.klib", metadata)
    }

    fn text_ref() -> MetadataReference {
        let metadata = ImageMetadata {
            identity: AssemblyName::new("Kiln.Text"),
            output_kind: OutputKind::DynamicallyLinkedLibrary,
            references: vec![AssemblyName::new("Kiln.Core")],
            exports: vec![
                Export { module: "text".into(), function: "upper".into(), arity: 1 },
                Export { module: "text".into(), function: "repeat".into(), arity: 2 },
            ],
        };
        MetadataReference::from_metadata("/sdk/Kiln.Text.klib", metadata)
    }

    fn compile(src: &str, refs: Vec<MetadataReference>, options: CompilationOptions) -> Compilation {
        let tree = SyntaxTree::parse(SourceText::new(src, true), "generated.kl");
        Compilation::create(AssemblyName::new("Gen"), [tree], refs, options)
    }

    fn ids(result: &EmitResult) -> Vec<&str> { result.diagnostics.iter().map(|d| d.id).collect() }

    #[test]
    fn hello_world_emits_image_and_portable_symbols() {
        let c = compile(HELLO, vec![core_ref(), text_ref()], CompilationOptions::default());
        let result = c.emit(&EmitOptions::default());
        assert!(result.success, "{:?}", result.diagnostics);

        let image = Image::from_bytes(result.image.as_deref().unwrap()).unwrap();
        assert_eq!(image.find_type("Debuggable.HelloWorld"), Some(0));
        // ordre du premier usage : text.upper avant io.println
        assert_eq!(image.references, vec![AssemblyName::new("Kiln.Text"), AssemblyName::new("Kiln.Core")]);
        let names: Vec<_> = image.imports.iter().map(|i| (i.assembly, i.name.as_str())).collect();
        assert_eq!(names, [(0, "text.upper"), (1, "io.println")]);
        assert!(image.embedded_symbols.is_none());

        let symbols = Symbols::from_bytes(result.symbols.as_deref().unwrap()).unwrap();
        assert_eq!(symbols.documents[0].text.as_deref(), Some(HELLO));
        let lines: Vec<_> = symbols.methods[0].points.iter().map(|p| p.line).collect();
        assert_eq!(lines, [4, 5, 6, 7]);
    }

    #[test]
    fn embedded_format_goes_into_the_image() {
        let tree = SyntaxTree::parse(SourceText::new(HELLO, true), "generated.kl");
        let embedded = EmbeddedText::from_source("generated.kl", tree.text()).into_iter().collect();
        let c = Compilation::create(AssemblyName::new("Gen"), [tree], [core_ref(), text_ref()], CompilationOptions::default());
        let options = EmitOptions { debug_format: DebugInformationFormat::Embedded, pdb_path: None, embedded_texts: embedded };
        let result = c.emit(&options);
        assert!(result.symbols.is_none());
        let image = Image::from_bytes(result.image.as_deref().unwrap()).unwrap();
        let symbols = image.embedded_symbols.unwrap();
        assert_eq!(symbols.source_line(0, 5).map(str::trim), Some("io.println(\"Hello, \" + upper);"));
    }

    #[test]
    fn non_embedded_document_keeps_only_checksum() {
        let c = compile(HELLO, vec![core_ref(), text_ref()], CompilationOptions::default());
        let result = c.emit(&EmitOptions::default());
        let symbols = Symbols::from_bytes(result.symbols.as_deref().unwrap()).unwrap();
        // Le texte n'est embarqué que s'il est listé dans `embedded_texts`
        assert_eq!(symbols.documents[0].text, None);
        assert_eq!(symbols.documents[0].checksum, SourceText::new(HELLO, true).checksum());
    }

    #[test]
    fn missing_reference_is_kl0234() {
        let c = compile(HELLO, vec![core_ref()], CompilationOptions::default());
        let result = c.emit(&EmitOptions::default());
        assert!(!result.success);
        assert!(result.image.is_none());
        let d = result.errors().next().unwrap();
        assert_eq!(
            d.to_string(),
            "KL0234: The type or namespace name 'text' could not be found (are you missing an assembly reference?)"
        );
        assert_eq!(d.location.as_ref().map(|l| (l.span.line, l.span.column)), Some((4, 25)));
    }

    #[test]
    fn binding_errors() {
        let src = "class A {
    fn f(x, x) {
        let y = z;
        y = text.nope(1);
        g();
        return f(1);
    }
}";
        let c = compile(src, vec![text_ref()], CompilationOptions::default());
        assert_eq!(
            c.diagnostics().iter().map(|d| d.id).collect::<Vec<_>>(),
            ["KL0100", "KL0103", "KL0117", "KL0117", "KL1501", "KL0219"]
        );
        let msgs: Vec<_> = c.diagnostics().iter().map(ToString::to_string).collect();
        assert_eq!(msgs[3], "KL0117: 'A' does not contain a definition for 'g'");
        assert_eq!(msgs[4], "KL1501: No overload for method 'f' takes 1 arguments");
    }

    #[test]
    fn extern_arity_is_checked() {
        let c = compile("class A { fn f() { return text.repeat(\"x\"); } }", vec![text_ref()], CompilationOptions::default());
        assert_eq!(ids(&c.emit(&EmitOptions::default())), ["KL1501"]);
    }

    #[test]
    fn duplicate_local_in_nested_scope() {
        let c = compile("class A { fn f(a) { let b = a; if b { let b = 2; return b; } return b; } }", vec![], CompilationOptions::default());
        assert_eq!(ids(&c.emit(&EmitOptions::default())), ["KL0128"]);
    }

    #[test]
    fn deny_warnings_turns_unused_local_into_error() {
        let src = "class A { fn f() { let unused = 1; } }";
        let lenient = compile(src, vec![], CompilationOptions::default()).emit(&EmitOptions::default());
        assert!(lenient.success);
        assert_eq!(ids(&lenient), ["KL0219"]);

        let options = CompilationOptions { deny_warnings: true, ..CompilationOptions::default() };
        let strict = compile(src, vec![], options).emit(&EmitOptions::default());
        assert!(!strict.success);
        assert!(strict.diagnostics[0].is_warning_as_error);
    }

    #[test]
    fn syntax_error_fails_emit() {
        let result = compile("class A { fn f( }", vec![], CompilationOptions::default()).emit(&EmitOptions::default());
        assert!(!result.success);
        assert_eq!(ids(&result), ["KL1000"]);
    }

    #[test]
    fn console_application_records_entry_point() {
        let src = "class P { fn helper() { return 1; } fn main() { helper(); } }";
        let lib = compile(src, vec![], CompilationOptions::default()).emit(&EmitOptions::default());
        assert_eq!(Image::from_bytes(lib.image.as_deref().unwrap()).unwrap().entry_point, None);

        let exe = compile(src, vec![], CompilationOptions::new(OutputKind::ConsoleApplication)).emit(&EmitOptions::default());
        let image = Image::from_bytes(exe.image.as_deref().unwrap()).unwrap();
        assert_eq!(image.entry_point, Some(1));
        assert_eq!(image.output_kind, OutputKind::ConsoleApplication);
    }

    #[test]
    fn release_folds_constants() {
        let src = "class A { fn f() { return 2 * (3 + 4); } }";
        let debug = compile(src, vec![], CompilationOptions::default()).emit(&EmitOptions::default());
        let release = compile(src, vec![], CompilationOptions::default().with_optimization(OptimizationLevel::Release))
            .emit(&EmitOptions::default());

        let code = |r: &EmitResult| {
            let image = Image::from_bytes(r.image.as_deref().unwrap()).unwrap();
            (Op::decode_all(&image.methods[0].code).unwrap(), image.constants)
        };
        let (ops, constants) = code(&release);
        assert_eq!(ops, [Op::LoadConst(0), Op::Return, Op::ReturnVoid]);
        assert_eq!(constants, [ConstValue::I64(14)]);
        assert_eq!(code(&debug).0.len(), 7);
    }

    #[test]
    fn control_flow_jumps_are_instruction_indices() {
        let src = "class A { fn f(n) { let i = 0; while i < n { i = i + 1; } return i; } }";
        let result = compile(src, vec![], CompilationOptions::default()).emit(&EmitOptions::default());
        let image = Image::from_bytes(result.image.as_deref().unwrap()).unwrap();
        let ops = Op::decode_all(&image.methods[0].code).unwrap();
        assert_eq!(
            ops,
            [
                Op::LoadConst(0),
                Op::StoreLocal(1),
                Op::LoadLocal(1),
                Op::LoadLocal(0),
                Op::Lt,
                Op::JumpIfFalse(11),
                Op::LoadLocal(1),
                Op::LoadConst(1),
                Op::Add,
                Op::StoreLocal(1),
                Op::Jump(2),
                Op::LoadLocal(1),
                Op::Return,
                Op::ReturnVoid,
            ]
        );
        assert_eq!(image.methods[0].locals, 2);
    }
}
