//! `kiln` — CLI principal de Kiln
//!
//! Ici : parsing d'arguments, initialisation (logger, couleur), puis
//! délégation à `kiln_cli` (lib) et aux crates du workspace.

#![forbid(unsafe_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kiln_compiler::{DebugInformationFormat, OptimizationLevel, OutputKind};
use kiln_core::{AssemblyName, BINARY_EXTENSION, SYMBOLS_EXTENSION};
use kiln_runtime::{sdk, LoadContext, Value};
use serde::Serialize;

use kiln_cli::{self as cli, CodeGenerator, KilnConfig};

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "kiln", version, about = "Kiln — compiler en mémoire, résoudre les références, charger, invoquer", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux (erreurs seules)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, global = true)]
    quiet: bool,

    /// Couleur des statuts
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto, global = true)]
    color: ColorChoice,

    /// Fichier de configuration (sinon Kiln.toml en remontant)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Hint path, prioritaire sur la configuration (répétable)
    #[arg(long = "hint-path", global = true)]
    hint_paths: Vec<PathBuf>,

    /// Sous-commandes
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile `Debuggable.HelloWorld` en mémoire et appelle `greet`
    Demo {
        /// Argument passé à `greet`
        #[arg(long, default_value = "Kiln")]
        name: String,
    },

    /// Compiler puis exécuter une source
    Run {
        /// Source (.kl)
        input: PathBuf,
        /// Type à instancier (sinon : point d'entrée `main`)
        #[arg(long = "type", requires = "method")]
        type_name: Option<String>,
        /// Méthode à appeler
        #[arg(long, requires = "type_name")]
        method: Option<String>,
        /// Assembly à référencer en plus (nom, ou chemin .klib)
        #[arg(long = "reference")]
        references: Vec<String>,
        /// Arguments de la méthode (après --)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Compiler une source vers une image .klib
    Compile {
        /// Source (.kl)
        input: PathBuf,
        /// Image de sortie (défaut : même nom + .klib)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Symboles de sortie (défaut : à côté de l'image)
        #[arg(long)]
        symbols: Option<PathBuf>,
        /// Symboles embarqués dans l'image
        #[arg(long)]
        embedded: bool,
        /// Optimisations
        #[arg(long)]
        release: bool,
        /// Application console (point d'entrée `main`)
        #[arg(long)]
        exe: bool,
        /// Assembly à référencer en plus (nom, ou chemin .klib)
        #[arg(long = "reference")]
        references: Vec<String>,
    },

    /// Afficher les références résolues depuis les graines
    Refs {
        /// Graine supplémentaire (nom, ou chemin .klib)
        #[arg(long = "seed")]
        seeds: Vec<String>,
        /// Sortie JSON
        #[arg(long)]
        json: bool,
    },

    /// Écrire les images de référence des bibliothèques hôtes
    Sdk {
        /// Dossier cible (défaut : sdk_dir de la configuration)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    if let Err(e) = real_main() {
        eprintln!("error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn real_main() -> Result<()> {
    let opt = Opt::parse();

    cli::init_color(match opt.color {
        ColorChoice::Auto => None,
        ColorChoice::Always => Some(true),
        ColorChoice::Never => Some(false),
    });
    cli::init_logger(opt.verbose, opt.quiet);

    let mut config = KilnConfig::load(opt.config.as_deref())?;
    if !opt.hint_paths.is_empty() {
        let mut paths = opt.hint_paths.clone();
        paths.append(&mut config.hint_paths);
        config.hint_paths = paths;
    }
    if let Some(src) = &config.source {
        tracing::info!(config = %src.display(), "configuration loaded");
    }

    match opt.cmd {
        Command::Demo { name } => demo(config, &name),
        Command::Run { input, type_name, method, references, args } => {
            run(config, &input, type_name.zip(method), &references, &args)
        }
        Command::Compile { input, output, symbols, embedded, release, exe, references } => {
            if embedded {
                config.debug_format = DebugInformationFormat::Embedded;
            }
            if release {
                config.optimization = OptimizationLevel::Release;
            }
            let kind = if exe { OutputKind::ConsoleApplication } else { OutputKind::DynamicallyLinkedLibrary };
            compile(config, &input, output, symbols, kind, &references)
        }
        Command::Refs { seeds, json } => refs(config, &seeds, json),
        Command::Sdk { dir } => {
            let dir = dir.unwrap_or_else(|| config.sdk_dir());
            for path in sdk::install(&dir).with_context(|| format!("installation du SDK dans {}", cli::display(&dir)))? {
                cli::status_ok("SDK", &cli::display(&path));
            }
            Ok(())
        }
    }
}

// ──────────────────────────── Commandes ────────────────────────────

/// Contexte par défaut + générateur ; les hint paths servent aussi au probing.
fn generator(mut config: KilnConfig, kind: OutputKind) -> Result<CodeGenerator> {
    cli::ensure_sdk(&mut config)?;
    let context = LoadContext::with_defaults();
    context.set_debug_hook(Arc::new(cli::ConsoleHook));
    for dir in &config.hint_paths {
        context.add_probing_dir(dir);
    }
    Ok(CodeGenerator::from_config(context, &config).with_options(config.compilation_options(kind)))
}

/// Graine : chemin d'image, sinon identité (déjà chargée ou trouvée par probing).
fn add_seed(generator: &mut CodeGenerator, seed: &str) -> Result<()> {
    let path = Path::new(seed);
    let assembly = if path.extension().is_some_and(|e| e == BINARY_EXTENSION) && path.is_file() {
        generator.context().load_from_path(path).with_context(|| format!("chargement de {seed}"))?
    } else {
        let name: AssemblyName = seed.parse().with_context(|| format!("identité invalide: {seed}"))?;
        match generator.context().find(&name.name) {
            Some(loaded) => loaded,
            None => generator.context().load(&name).with_context(|| format!("assembly introuvable: {seed}"))?,
        }
    };
    generator.reference_assembly(assembly);
    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("lecture de {}", cli::display(path)))
}

fn stem(path: &Path) -> Result<AssemblyName> {
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(s) if !s.is_empty() => Ok(AssemblyName::new(s)),
        _ => bail!("nom d'assembly impossible à déduire de {}", cli::display(path)),
    }
}

fn demo(config: KilnConfig, name: &str) -> Result<()> {
    let generator = generator(config, OutputKind::DynamicallyLinkedLibrary)?;
    let assembly = generator.create_assembly(cli::DEMO_SOURCE)?;
    println!("{}", cli::DEMO_SOURCE);

    let hello = assembly
        .create_instance("Debuggable.HelloWorld")
        .context("type Debuggable.HelloWorld absent de l'assembly généré")?;
    let result = hello.invoke("greet", &[Value::from(name)])?;
    println!("{result}");
    println!("Hello World!");
    Ok(())
}

fn run(
    config: KilnConfig,
    input: &Path,
    target: Option<(String, String)>,
    references: &[String],
    args: &[String],
) -> Result<()> {
    let kind = if target.is_some() { OutputKind::DynamicallyLinkedLibrary } else { OutputKind::ConsoleApplication };
    let mut generator = generator(config, kind)?;
    for r in references {
        add_seed(&mut generator, r)?;
    }

    let code = read_source(input)?;
    let emitted = generator.emit(stem(input)?, &code, &cli::display(input))?;
    for d in &emitted.diagnostics {
        cli::status_warn("WARN", &d.render());
    }
    let assembly = generator.context().load_from_bytes(&emitted.image, emitted.symbols.as_deref())?;

    let result = match target {
        Some((type_name, method)) => {
            let instance = assembly
                .create_instance(&type_name)
                .with_context(|| format!("type '{type_name}' absent de {}", assembly.name().name))?;
            let args: Vec<Value> = args.iter().map(|a| cli::parse_arg(a)).collect();
            instance.invoke(&method, &args)?
        }
        None => {
            if !args.is_empty() {
                bail!("arguments fournis sans --type/--method");
            }
            assembly.run_main()?
        }
    };
    if result != Value::Null {
        println!("{result}");
    }
    Ok(())
}

fn compile(
    config: KilnConfig,
    input: &Path,
    output: Option<PathBuf>,
    symbols: Option<PathBuf>,
    kind: OutputKind,
    references: &[String],
) -> Result<()> {
    let embedded = config.debug_format == DebugInformationFormat::Embedded;
    let mut generator = generator(config, kind)?;
    for r in references {
        add_seed(&mut generator, r)?;
    }

    let output = output.unwrap_or_else(|| input.with_extension(BINARY_EXTENSION));
    let code = read_source(input)?;
    let emitted = generator.emit(stem(&output)?, &code, &cli::display(input))?;
    for d in &emitted.diagnostics {
        cli::status_warn("WARN", &d.render());
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("création de {}", cli::display(parent)))?;
    }
    fs::write(&output, &emitted.image).with_context(|| format!("écriture de {}", cli::display(&output)))?;
    cli::status_ok("COMPILE", &cli::display(&output));

    match (emitted.symbols, embedded) {
        (Some(bytes), false) => {
            let path = symbols.unwrap_or_else(|| output.with_extension(SYMBOLS_EXTENSION));
            fs::write(&path, bytes).with_context(|| format!("écriture de {}", cli::display(&path)))?;
            cli::status_ok("SYMBOLS", &cli::display(&path));
        }
        _ if symbols.is_some() => cli::status_warn("SYMBOLS", "embarqués dans l'image, --symbols ignoré"),
        _ => {}
    }
    Ok(())
}

#[derive(Serialize)]
struct RefRow<'a> {
    path: String,
    identity: &'a AssemblyName,
}

fn refs(config: KilnConfig, seeds: &[String], json: bool) -> Result<()> {
    let mut generator = generator(config, OutputKind::DynamicallyLinkedLibrary)?;
    for s in seeds {
        add_seed(&mut generator, s)?;
    }
    let report = generator.resolve();

    if json {
        let rows: Vec<_> =
            report.references.iter().map(|r| RefRow { path: r.display(), identity: r.identity() }).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for r in report.references.iter() {
            println!("{}  {}", r.identity(), r.display());
        }
    }
    for f in report.failures() {
        cli::status_warn("SKIP", &f.to_string());
    }
    Ok(())
}
