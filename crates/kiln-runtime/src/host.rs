//! Bibliothèques hôtes : assemblies dont le code est natif.
//!
//! `Kiln.Core` (`io`, `debugger`) et `Kiln.Text` (`text`, référence `Kiln.Core`)
//! sont chargées en mémoire, sans emplacement. Le compilateur a besoin de leur
//! image de référence sur disque : voir [`crate::sdk::install`].

use kiln_core::{AssemblyName, Version};
use kiln_image::Image;

use crate::{
    native::{NativeFn, Natives, RuntimeCtx},
    RResult, RuntimeError, Value,
};

/// Nom de la bibliothèque de base.
pub const CORE: &str = "Kiln.Core";
/// Nom de la bibliothèque texte.
pub const TEXT: &str = "Kiln.Text";

const HOST_VERSION: Version = Version::new(1, 0, 0, 0);

/// Une bibliothèque hôte : identité, références, natives.
#[derive(Debug, Clone)]
pub struct HostLibrary {
    identity: AssemblyName,
    references: Vec<AssemblyName>,
    natives: Natives,
}

impl HostLibrary {
    /// Bibliothèque vide.
    pub fn new(identity: AssemblyName) -> Self { Self { identity, references: Vec::new(), natives: Natives::new() } }

    /// Ajoute une référence (autre bibliothèque).
    #[must_use]
    pub fn with_reference(mut self, name: AssemblyName) -> Self {
        self.references.push(name);
        self
    }

    /// Enregistre une native.
    pub fn register_fn(&mut self, module: &str, name: &str, arity: u8, func: NativeFn) {
        self.natives.register_fn(module, name, arity, func);
    }

    /// Identité.
    pub const fn identity(&self) -> &AssemblyName { &self.identity }

    /// Références.
    pub fn references(&self) -> &[AssemblyName] { &self.references }

    /// Natives.
    pub const fn natives(&self) -> &Natives { &self.natives }

    /// Image de référence (métadonnées seules, aucun code).
    pub fn image(&self) -> Image {
        let mut image = Image::new(self.identity.clone());
        image.references.clone_from(&self.references);
        image.exports = self.natives.exports();
        image
    }

    /// `Kiln.Core` : `io.print`, `io.println`, `debugger.break`, `debugger.attached`.
    pub fn core() -> Self {
        let mut lib = Self::new(AssemblyName::new(CORE).with_version(HOST_VERSION));
        lib.natives.register_all("io", &[("print", 1, io_print as NativeFn), ("println", 1, io_println as NativeFn)]);
        lib.natives.register_all(
            "debugger",
            &[("break", 0, debugger_break as NativeFn), ("attached", 0, debugger_attached as NativeFn)],
        );
        lib
    }

    /// `Kiln.Text` : `upper`, `lower`, `len`, `concat`, `repeat`.
    pub fn text() -> Self {
        let mut lib = Self::new(AssemblyName::new(TEXT).with_version(HOST_VERSION))
            .with_reference(AssemblyName::new(CORE).with_version(HOST_VERSION));
        lib.natives.register_all("text", &[
            ("upper", 1, text_upper as NativeFn),
            ("lower", 1, text_lower as NativeFn),
            ("len", 1, text_len as NativeFn),
            ("concat", 2, text_concat as NativeFn),
            ("repeat", 2, text_repeat as NativeFn),
        ]);
        lib
    }

    /// Bibliothèques installées par `LoadContext::with_defaults`.
    pub fn defaults() -> Vec<Self> { vec![Self::core(), Self::text()] }
}

/* --------------------------- Impl natives par défaut --------------------------- */

fn io_print(args: &[Value], ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
    ctx.write_str(&args[0].to_string())?;
    Ok(Value::Null)
}

fn io_println(args: &[Value], ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
    ctx.writeln_str(&args[0].to_string())?;
    Ok(Value::Null)
}

fn debugger_break(_args: &[Value], ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
    if let Some(at) = ctx.break_context() {
        ctx.hook().on_break(&at);
    }
    Ok(Value::Null)
}

fn debugger_attached(_args: &[Value], ctx: &mut RuntimeCtx<'_>) -> RResult<Value> { Ok(Value::Bool(ctx.hook().is_attached())) }

fn text_upper(args: &[Value], _ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
    let s: String = args[0].clone().try_into()?;
    Ok(Value::Str(s.to_uppercase()))
}

fn text_lower(args: &[Value], _ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
    let s: String = args[0].clone().try_into()?;
    Ok(Value::Str(s.to_lowercase()))
}

fn text_len(args: &[Value], _ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
    let s: String = args[0].clone().try_into()?;
    Ok(Value::I64(i64::try_from(s.chars().count()).unwrap_or(i64::MAX)))
}

fn text_concat(args: &[Value], _ctx: &mut RuntimeCtx<'_>) -> RResult<Value> { Ok(Value::Str(format!("{}{}", args[0], args[1]))) }

/// Taille maximale (octets) d'une chaîne produite par `text.repeat`.
pub const MAX_STRING_LEN: usize = 1 << 24;

fn text_repeat(args: &[Value], _ctx: &mut RuntimeCtx<'_>) -> RResult<Value> {
    let s: String = args[0].clone().try_into()?;
    let n: i64 = args[1].clone().try_into()?;
    let n = usize::try_from(n).map_err(|_| RuntimeError::Msg(format!("text.repeat: compte négatif ({n})")))?;
    match s.len().checked_mul(n) {
        Some(len) if len <= MAX_STRING_LEN => Ok(Value::Str(s.repeat(n))),
        _ => Err(RuntimeError::Msg(format!("text.repeat: résultat trop long ({} × {n} octets)", s.len()))),
    }
}
