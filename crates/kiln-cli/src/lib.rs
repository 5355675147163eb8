//! kiln-cli — bibliothèque interne du binaire `kiln`
//!
//! Le binaire ne fait que parser ses arguments ; tout le reste vit ici :
//!
//! - [`CodeGenerator`] : source → compilation en mémoire → résolution des
//!   références depuis les assemblies « graines » → chargement dans le
//!   [`LoadContext`] → assembly prêt à instancier
//! - [`KilnConfig`] : `Kiln.toml` (recherche ascendante) + `KILN_HINT_PATH`
//! - utilitaires de console : logger (`feature = "trace"`), statuts colorés
//!   (`feature = "color"`), hook de debug qui affiche les arrêts
//!
//! ```ignore
//! use kiln_cli::{CodeGenerator, KilnConfig};
//! use kiln_runtime::{LoadContext, Value};
//!
//! let config = KilnConfig::load(None)?;
//! let generator = CodeGenerator::from_config(LoadContext::with_defaults(), &config);
//! let assembly = generator.create_assembly(code)?;
//! let hello = assembly.create_instance("Debuggable.HelloWorld").unwrap();
//! hello.invoke("greet", &[Value::from("Kiln")])?;
//! ```

#![deny(missing_docs)]
#![deny(unused_must_use)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiln_runtime::{sdk, BreakContext, DebugHook, Value};

#[cfg(feature = "color")]
use owo_colors::{OwoColorize, Stream, Style};

pub mod config;
pub mod generator;

pub use config::{KilnConfig, CONFIG_FILE, HINT_PATH_VAR};
pub use generator::{random_assembly_name, CodeGenerator, Emitted, GenerateError, GENERATED_SOURCE_PATH};
pub use kiln_runtime::LoadContext;

/// Source compilée par `kiln demo`.
pub const DEMO_SOURCE: &str = r#"namespace Debuggable {
    class HelloWorld {
        fn greet(name) {
            debugger.break();
            let result = "Hello, " + name;
            return result;
        }
    }
}
"#;

// ───────────────────────────── Initialisation ─────────────────────────────

/// Initialise `env_logger` : `-q` → erreurs seules, sinon warn/info/debug/trace
/// selon `-v`. `RUST_LOG` garde la priorité.
pub fn init_logger(verbose: u8, quiet: bool) {
    #[cfg(feature = "trace")]
    {
        let level = if quiet {
            log::LevelFilter::Error
        } else {
            match verbose {
                0 => log::LevelFilter::Warn,
                1 => log::LevelFilter::Info,
                2 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace,
            }
        };
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
            .format_timestamp_secs()
            .try_init();
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = (verbose, quiet);
    }
}

/// Force (ou coupe) la couleur ; `None` = détection du terminal.
pub fn init_color(force: Option<bool>) {
    #[cfg(feature = "color")]
    {
        match force {
            Some(on) => owo_colors::set_override(on),
            None => owo_colors::unset_override(),
        }
    }
    #[cfg(not(feature = "color"))]
    {
        let _ = force;
    }
}

// ───────────────────────────── SDK ─────────────────────────────

/// Garantit que les images de référence des bibliothèques hôtes sont
/// atteignables : si aucun hint path ne les contient, elles sont écrites dans
/// `config.sdk_dir()` et ce répertoire est ajouté en fin de liste.
pub fn ensure_sdk(config: &mut KilnConfig) -> Result<PathBuf> {
    if let Some(dir) = config.hint_paths.iter().find(|d| sdk::is_installed(d)) {
        return Ok(dir.clone());
    }
    let dir = config.sdk_dir();
    if !sdk::is_installed(&dir) {
        sdk::install(&dir).with_context(|| format!("installation du SDK dans {}", display(&dir)))?;
        status_ok("SDK", &display(&dir));
    }
    tracing::debug!(dir = %dir.display(), "sdk appended to hint paths");
    config.hint_paths.push(dir.clone());
    Ok(dir)
}

// ───────────────────────────── Arguments ─────────────────────────────

/// Convertit un argument de ligne de commande en valeur Kiln :
/// `null`, `true`/`false`, entier, flottant, sinon chaîne.
pub fn parse_arg(raw: &str) -> Value {
    match raw {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(Value::I64)
            .or_else(|_| raw.parse::<f64>().map(Value::F64))
            .unwrap_or_else(|_| Value::from(raw)),
    }
}

// ───────────────────────────── Hook console ─────────────────────────────

/// Affiche chaque `debugger.break()` sur stderr. Jamais « attaché ».
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleHook;

impl DebugHook for ConsoleHook {
    fn on_break(&self, ctx: &BreakContext) { status_info("BREAK", &ctx.to_string()); }
}

// ───────────────────────────── Sorties jolies ─────────────────────────────

/// Chemin affichable.
pub fn display(p: &Path) -> String { p.to_string_lossy().to_string() }

/// `TAG message` en vert sur stderr.
pub fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {msg}", tag.if_supports_color(Stream::Stderr, |t| t.style(Style::new().green().bold())));
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

/// `TAG message` en bleu sur stderr.
pub fn status_info(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {msg}", tag.if_supports_color(Stream::Stderr, |t| t.style(Style::new().blue().bold())));
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

/// `TAG message` en jaune sur stderr.
pub fn status_warn(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {msg}", tag.if_supports_color(Stream::Stderr, |t| t.style(Style::new().yellow().bold())));
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn arguments_are_typed() {
        assert_eq!(parse_arg("42"), Value::I64(42));
        assert_eq!(parse_arg("-3"), Value::I64(-3));
        assert_eq!(parse_arg("1.5"), Value::F64(1.5));
        assert_eq!(parse_arg("true"), Value::Bool(true));
        assert_eq!(parse_arg("null"), Value::Null);
        assert_eq!(parse_arg("Kiln"), Value::from("Kiln"));
        assert_eq!(parse_arg(""), Value::from(""));
    }

    #[test]
    fn sdk_is_installed_once_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KilnConfig { sdk_dir: Some(dir.path().join("sdk")), ..KilnConfig::default() };

        let installed = ensure_sdk(&mut config).unwrap();
        assert_eq!(installed, dir.path().join("sdk"));
        assert_eq!(config.hint_paths, vec![installed.clone()]);

        // déjà atteignable : rien n'est ajouté
        assert_eq!(ensure_sdk(&mut config).unwrap(), installed);
        assert_eq!(config.hint_paths.len(), 1);
    }
}
