//! Fonctions natives (FFI hôte) appelables depuis le bytecode.
//!
//! - `Natives`    : registre `module.nom → NativeEntry`, ordre d'enregistrement conservé
//! - `RuntimeCtx` : contexte passé aux natives (stdout, hook de debug, site d'appel)
//! - `Captured`   : writer qui capture la sortie (tests, REPL)

use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

use indexmap::IndexMap;
use kiln_image::Export;
use parking_lot::Mutex;

use crate::{
    context::LoadedAssembly,
    debug::{BreakContext, DebugHook},
    RResult, RuntimeError, Value,
};

/* -------------------------- Signature des natives -------------------------- */

/// Fonction native : reçoit des `Value` et le contexte, retourne une `Value`.
pub type NativeFn = fn(&[Value], &mut RuntimeCtx<'_>) -> RResult<Value>;

/// Descripteur d'une native.
#[derive(Clone)]
pub struct NativeEntry {
    /// Module (`io`, `text`, …).
    pub module: String,
    /// Nom de la fonction.
    pub name: String,
    /// Nombre exact d'arguments.
    pub arity: u8,
    /// Pointeur de fonction.
    pub func: NativeFn,
}

impl NativeEntry {
    /// Nom complet `module.nom`.
    pub fn qualified(&self) -> String { format!("{}.{}", self.module, self.name) }
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEntry").field("module", &self.module).field("name", &self.name).field("arity", &self.arity).finish_non_exhaustive()
    }
}

/* ------------------------------ Registre ------------------------------ */

/// Registre de natives.
#[derive(Debug, Clone, Default)]
pub struct Natives {
    registry: IndexMap<String, NativeEntry>,
}

impl Natives {
    /// Registre vide.
    pub fn new() -> Self { Self::default() }

    /// Enregistre (ou remplace) `module.name`.
    pub fn register_fn(&mut self, module: &str, name: &str, arity: u8, func: NativeFn) {
        let entry = NativeEntry { module: module.to_owned(), name: name.to_owned(), arity, func };
        self.registry.insert(entry.qualified(), entry);
    }

    /// Enregistre un module complet.
    pub fn register_all(&mut self, module: &str, entries: &[(&str, u8, NativeFn)]) {
        for (name, arity, func) in entries {
            self.register_fn(module, name, *arity, *func);
        }
    }

    /// Native par nom complet.
    pub fn get(&self, qualified: &str) -> Option<&NativeEntry> { self.registry.get(qualified) }

    /// Appelle `module.name` après vérification de l'arité.
    pub fn call(&self, qualified: &str, args: &[Value], ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
        let entry = self.get(qualified).ok_or_else(|| RuntimeError::NotFound(qualified.to_owned()))?;
        if args.len() != usize::from(entry.arity) {
            return Err(RuntimeError::Arity { name: qualified.to_owned(), expected: usize::from(entry.arity), got: args.len() });
        }
        (entry.func)(args, ctx)
    }

    /// Natives, dans l'ordre d'enregistrement.
    pub fn iter(&self) -> impl Iterator<Item = &NativeEntry> { self.registry.values() }

    /// Nombre de natives.
    pub fn len(&self) -> usize { self.registry.len() }

    /// Vrai si vide.
    pub fn is_empty(&self) -> bool { self.registry.is_empty() }

    /// Table d'exports de l'image de référence.
    pub fn exports(&self) -> Vec<Export> {
        self.iter().map(|e| Export { module: e.module.clone(), function: e.name.clone(), arity: e.arity }).collect()
    }
}

/* ------------------------------ Contexte ------------------------------ */

/// Site d'un appel extern (pour `debugger.break`).
#[derive(Clone, Copy)]
pub(crate) struct CallSite<'a> {
    pub assembly: &'a LoadedAssembly,
    pub method: u32,
    pub pc: u32,
}

/// Contexte passé aux natives.
pub struct RuntimeCtx<'a> {
    stdout: &'a mut dyn Write,
    hook: &'a dyn DebugHook,
    site: Option<CallSite<'a>>,
}

impl<'a> RuntimeCtx<'a> {
    /// Contexte hors interpréteur (appel direct d'une native).
    pub fn new(stdout: &'a mut dyn Write, hook: &'a dyn DebugHook) -> Self { Self { stdout, hook, site: None } }

    pub(crate) fn at(stdout: &'a mut dyn Write, hook: &'a dyn DebugHook, site: CallSite<'a>) -> Self {
        Self { stdout, hook, site: Some(site) }
    }

    /// Écrit un texte brut.
    pub fn write_str(&mut self, s: &str) -> io::Result<()> { self.stdout.write_all(s.as_bytes()) }

    /// Écrit une ligne terminée par `\n`.
    pub fn writeln_str(&mut self, s: &str) -> io::Result<()> {
        self.stdout.write_all(s.as_bytes())?;
        self.stdout.write_all(b"\n")
    }

    /// Hook de debug du contexte de chargement.
    pub fn hook(&self) -> &dyn DebugHook { self.hook }

    /// Position de l'appel courant (`None` hors interpréteur).
    pub fn break_context(&self) -> Option<BreakContext> {
        self.site.map(|s| s.assembly.break_context(s.method, s.pc))
    }
}

/* ------------------------ Outil de capture stdout ------------------------ */

/// Writer qui capture la sortie dans une `String`.
#[derive(Debug, Default, Clone)]
pub struct Captured(Arc<Mutex<String>>);

impl Captured {
    /// Copie du buffer.
    pub fn get(&self) -> String { self.0.lock().clone() }
    /// Vide le buffer.
    pub fn clear(&self) { self.0.lock().clear(); }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::LogHook;

    fn twice(args: &[Value], _: &mut RuntimeCtx<'_>) -> RResult<Value> {
        let x: i64 = args[0].clone().try_into()?;
        Ok(Value::I64(x * 2))
    }

    fn shout(args: &[Value], ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
        ctx.writeln_str(&format!("{}!", args[0]))?;
        Ok(Value::Null)
    }

    #[test]
    fn register_and_call() {
        let mut natives = Natives::new();
        natives.register_all("demo", &[("twice", 1, twice as NativeFn), ("shout", 1, shout as NativeFn)]);
        let mut out = Captured::default();
        let mut ctx = RuntimeCtx::new(&mut out, &LogHook);

        assert_eq!(natives.call("demo.twice", &[Value::I64(21)], &mut ctx).unwrap(), Value::I64(42));
        natives.call("demo.shout", &[Value::from("hey")], &mut ctx).unwrap();
        assert!(ctx.break_context().is_none());
        assert_eq!(out.get(), "hey!\n");

        let exports: Vec<_> = natives.exports().iter().map(Export::qualified).collect();
        assert_eq!(exports, ["demo.twice", "demo.shout"]);
    }

    #[test]
    fn arity_and_lookup_errors() {
        let mut natives = Natives::new();
        natives.register_fn("demo", "twice", 1, twice);
        let mut sink = io::sink();
        let mut ctx = RuntimeCtx::new(&mut sink, &LogHook);
        assert!(matches!(natives.call("demo.twice", &[], &mut ctx), Err(RuntimeError::Arity { expected: 1, got: 0, .. })));
        assert!(matches!(natives.call("demo.nope", &[], &mut ctx), Err(RuntimeError::NotFound(_))));
        assert!(matches!(natives.call("demo.twice", &[Value::from("x")], &mut ctx), Err(RuntimeError::Type { .. })));
    }
}
