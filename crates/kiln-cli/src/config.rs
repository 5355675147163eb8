//! `Kiln.toml` : configuration de projet.
//!
//! ```toml
//! hint_paths    = ["lib", "/opt/kiln/sdk"]
//! optimization  = "release"    # debug | release
//! debug_format  = "embedded"   # portable | embedded
//! deny_warnings = true
//! sdk_dir       = ".kiln/sdk"
//! ```
//!
//! Les chemins relatifs sont relatifs au dossier du fichier. `KILN_HINT_PATH`
//! (format `PATH`) est ajouté après les hint paths du fichier.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use kiln_compiler::{CompilationOptions, DebugInformationFormat, OptimizationLevel, OutputKind};
use kiln_resolver::HintPaths;
use serde::{Deserialize, Serialize};

/// Nom du fichier cherché en remontant depuis le dossier courant.
pub const CONFIG_FILE: &str = "Kiln.toml";

/// Variable d'environnement des hint paths supplémentaires.
pub const HINT_PATH_VAR: &str = "KILN_HINT_PATH";

/// Configuration d'un projet Kiln.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KilnConfig {
    /// Répertoires fouillés (récursivement) pour `<name>.klib`.
    pub hint_paths: Vec<PathBuf>,
    /// Niveau d'optimisation.
    pub optimization: OptimizationLevel,
    /// Format des symboles.
    pub debug_format: DebugInformationFormat,
    /// Warnings → erreurs.
    pub deny_warnings: bool,
    /// Où écrire les images de référence des bibliothèques hôtes.
    pub sdk_dir: Option<PathBuf>,
    /// Fichier d'origine (absent si valeurs par défaut).
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl KilnConfig {
    /// Parse un document TOML (chemins laissés tels quels).
    pub fn from_toml(text: &str) -> Result<Self> { toml::from_str(text).context("TOML invalide") }

    /// Lit un fichier de configuration ; les chemins relatifs sont rebasés sur son dossier.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("lecture config {}", path.display()))?;
        let mut cfg = Self::from_toml(&text).with_context(|| format!("config {}", path.display()))?;
        if let Some(base) = path.parent() {
            cfg.rebase(base);
        }
        cfg.source = Some(path.to_path_buf());
        Ok(cfg)
    }

    /// `explicit`, sinon recherche ascendante depuis le dossier courant, sinon défauts.
    /// `KILN_HINT_PATH` est appliqué dans tous les cas.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("dossier courant")?;
        let mut cfg = Self::load_from(explicit, &cwd)?;
        cfg.hint_paths.extend(env_hint_paths().iter().map(Path::to_path_buf));
        Ok(cfg)
    }

    /// Idem [`KilnConfig::load`] depuis `start`, sans l'environnement.
    pub fn load_from(explicit: Option<&Path>, start: &Path) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::read(p);
        }
        let mut cur = start.to_path_buf();
        loop {
            let cand = cur.join(CONFIG_FILE);
            if cand.is_file() {
                tracing::debug!(path = %cand.display(), "config found");
                return Self::read(&cand);
            }
            if !cur.pop() {
                break;
            }
        }
        Ok(Self::default())
    }

    fn rebase(&mut self, base: &Path) {
        for p in &mut self.hint_paths {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
        if let Some(p) = self.sdk_dir.as_mut().filter(|p| p.is_relative()) {
            *p = base.join(&*p);
        }
    }

    /// Hint paths dans l'ordre de recherche.
    pub fn hint_paths(&self) -> HintPaths { self.hint_paths.iter().collect() }

    /// Options de compilation pour un type de sortie.
    pub fn compilation_options(&self, output_kind: OutputKind) -> CompilationOptions {
        CompilationOptions { output_kind, optimization: self.optimization, deny_warnings: self.deny_warnings }
    }

    /// Dossier du SDK : `sdk_dir`, sinon `<tmp>/kiln-sdk-<version>`.
    pub fn sdk_dir(&self) -> PathBuf {
        self.sdk_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(concat!("kiln-sdk-", env!("CARGO_PKG_VERSION"))))
    }
}

fn env_hint_paths() -> HintPaths {
    let mut paths = HintPaths::new();
    paths.extend_from_env(HINT_PATH_VAR);
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_every_key() {
        let cfg = KilnConfig::from_toml(
            r#"
            hint_paths = ["lib", "/opt/sdk"]
            optimization = "release"
            debug_format = "embedded"
            deny_warnings = true
            sdk_dir = "sdk"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.hint_paths, vec![PathBuf::from("lib"), PathBuf::from("/opt/sdk")]);
        assert_eq!(cfg.optimization, OptimizationLevel::Release);
        assert_eq!(cfg.debug_format, DebugInformationFormat::Embedded);
        assert!(cfg.deny_warnings);

        let opts = cfg.compilation_options(OutputKind::ConsoleApplication);
        assert_eq!(opts.output_kind, OutputKind::ConsoleApplication);
        assert_eq!(opts.optimization, OptimizationLevel::Release);
        assert!(opts.deny_warnings);
    }

    #[test]
    fn empty_document_means_defaults() {
        let cfg = KilnConfig::from_toml("").unwrap();
        assert_eq!(cfg, KilnConfig::default());
        assert_eq!(cfg.debug_format, DebugInformationFormat::PortablePdb);
        assert!(cfg.sdk_dir().ends_with(concat!("kiln-sdk-", env!("CARGO_PKG_VERSION"))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = KilnConfig::from_toml("hint_path = []").unwrap_err();
        assert!(err.to_string().contains("TOML invalide"));
        assert!(KilnConfig::from_toml("optimization = \"fast\"").is_err());
    }

    #[test]
    fn upward_search_rebases_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let nested = root.join("src/deep");
        fs::create_dir_all(&nested).unwrap();
        fs::write(root.join(CONFIG_FILE), "hint_paths = [\"lib\", \"/abs\"]\nsdk_dir = \".kiln\"\n").unwrap();

        let cfg = KilnConfig::load_from(None, &nested).unwrap();
        assert_eq!(cfg.source.as_deref(), Some(root.join(CONFIG_FILE).as_path()));
        assert_eq!(cfg.hint_paths, vec![root.join("lib"), PathBuf::from("/abs")]);
        assert_eq!(cfg.sdk_dir(), root.join(".kiln"));
        assert_eq!(cfg.hint_paths().iter().count(), 2);
    }

    #[test]
    fn explicit_path_wins_and_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("other.toml");
        fs::write(&other, "deny_warnings = true").unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "deny_warnings = false").unwrap();

        assert!(KilnConfig::load_from(Some(&other), dir.path()).unwrap().deny_warnings);
        assert!(KilnConfig::load_from(Some(&dir.path().join("absent.toml")), dir.path()).is_err());
    }
}
