//! kiln-runtime — chargement et exécution des assemblies Kiln
//!
//! - `LoadContext`    : registre des assemblies (par identité), probing, bibliothèques hôtes
//! - `LoadedAssembly` : image + code décodé + symboles ; `create_instance`, `run_main`
//! - `Instance`       : `invoke(méthode, args)` via l'interpréteur à pile
//! - `HostLibrary`    : assemblies natives (`Kiln.Core`, `Kiln.Text`), images de référence
//! - `DebugHook`      : appelé par `debugger.break()` avec la position source
//!
//! ```ignore
//! use kiln_runtime::{LoadContext, Value};
//!
//! let ctx = LoadContext::with_defaults();
//! let assembly = ctx.load_from_bytes(&image, Some(&symbols))?;
//! let hello = assembly.create_instance("Debuggable.HelloWorld").unwrap();
//! let out = hello.invoke("greet", &[Value::from("Kiln")])?;
//! ```
//!
//! Le contexte implémente `kiln_resolver::AssemblyLoader` : c'est lui qui
//! fournit les assemblies référencés pendant la résolution.

#![deny(missing_docs)]

use std::io;

use thiserror::Error;

mod context;
pub mod debug;
pub mod host;
mod native;
pub mod sdk;
mod value;
mod vm;

pub use context::{Instance, LoadContext, LoadedAssembly};
pub use debug::{BreakContext, DebugHook, LogHook, SourceSite};
pub use host::HostLibrary;
pub use kiln_resolver::LoadError;
pub use native::{Captured, NativeEntry, NativeFn, Natives, RuntimeCtx};
pub use value::Value;
pub use vm::MAX_CALL_DEPTH;

/* ------------------------------ Erreurs ------------------------------ */

/// Erreurs d'exécution.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Fonction native introuvable.
    #[error("fonction native introuvable: {0}")]
    NotFound(String),

    /// Nombre d'arguments invalide.
    #[error("mauvaise arité pour {name}: attendu {expected}, reçu {got}")]
    Arity {
        /// Fonction ou méthode appelée.
        name: String,
        /// Arguments attendus.
        expected: usize,
        /// Arguments fournis.
        got: usize,
    },

    /// Type inattendu.
    #[error("type invalide: attendu {expected}, reçu {found}")]
    Type {
        /// Type attendu.
        expected: &'static str,
        /// Type reçu.
        found: &'static str,
    },

    /// Opérateur appliqué à des types incompatibles.
    #[error("opérandes invalides pour `{op}`: {left} et {right}")]
    Operands {
        /// Opérateur.
        op: &'static str,
        /// Type de gauche.
        left: &'static str,
        /// Type de droite.
        right: &'static str,
    },

    /// Division entière par zéro.
    #[error("division par zéro")]
    DivideByZero,

    /// Débordement d'entier.
    #[error("dépassement de capacité sur `{0}`")]
    Overflow(&'static str),

    /// Méthode absente du type.
    #[error("'{type_name}' ne définit pas de méthode '{method}'")]
    MissingMethod {
        /// Type.
        type_name: String,
        /// Méthode demandée.
        method: String,
    },

    /// `run_main` sur une bibliothèque.
    #[error("aucun point d'entrée dans {0}")]
    NoEntryPoint(String),

    /// Import vers un assembly qui n'exporte pas de natives.
    #[error("import {name} non résolu dans {assembly}")]
    UnresolvedImport {
        /// Assembly visé.
        assembly: String,
        /// Nom qualifié importé.
        name: String,
    },

    /// Récursion trop profonde.
    #[error("profondeur d'appel maximale atteinte ({0})")]
    StackOverflow(usize),

    /// Bytecode incohérent (pile, indices).
    #[error("bytecode invalide dans {method}: {detail}")]
    BadCode {
        /// Méthode fautive.
        method: String,
        /// Détail.
        detail: &'static str,
    },

    /// Le contexte de chargement a été détruit.
    #[error("contexte de chargement détruit")]
    ContextDropped,

    /// Chargement d'un assembly référencé.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// I/O hôte.
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// Message libre (natives).
    #[error("{0}")]
    Msg(String),
}

/// Résultat du runtime.
pub type RResult<T> = Result<T, RuntimeError>;

/* ----------------------------- Macro sucrée ----------------------------- */

/// Déclare une native en deux lignes.
///
/// ```
/// use kiln_runtime::{kiln_native, HostLibrary, Value};
/// use kiln_core::AssemblyName;
///
/// kiln_native!(hello |args, _ctx| {
///     Ok(format!("Hello, {}!", args[0]).into())
/// });
///
/// let mut lib = HostLibrary::new(AssemblyName::new("Demo"));
/// lib.register_fn("demo", "hello", 1, hello);
/// assert_eq!(lib.natives().len(), 1);
/// ```
#[macro_export]
macro_rules! kiln_native {
    ($name:ident |$args:ident, $ctx:ident| $body:block) => {
        pub fn $name($args: &[$crate::Value], $ctx: &mut $crate::RuntimeCtx<'_>) -> $crate::RResult<$crate::Value> {
            $body
        }
    };
}

/// Prelude.
pub mod prelude {
    pub use crate::{
        kiln_native, Captured, DebugHook, HostLibrary, Instance, LoadContext, LoadedAssembly, RResult, RuntimeCtx,
        RuntimeError, Value,
    };
}

/* --------------------------------- Tests --------------------------------- */
