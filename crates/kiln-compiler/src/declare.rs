//! Passe de déclarations : types, méthodes (indices globaux), point d'entrée.

use std::collections::HashMap;

use kiln_image::OutputKind;

use crate::{
    diagnostics::{ids, Diagnostic},
    pass::{Ctx, Pass},
    source::SyntaxTree,
};

/// Méthode déclarée, avec son origine dans les arbres.
#[derive(Debug, Clone)]
pub(crate) struct MethodSig {
    pub name: String,
    pub owner: u32,
    pub arity: u8,
    pub tree: usize,
    pub class: usize,
    pub method: usize,
}

/// Type déclaré.
#[derive(Debug, Clone)]
pub(crate) struct TypeSig {
    pub full_name: String,
    pub simple_name: String,
    /// Nom simple de méthode → indice global
    pub methods: HashMap<String, u32>,
}

/// Résultat de la passe.
#[derive(Debug, Default)]
pub(crate) struct Declarations {
    pub types: Vec<TypeSig>,
    pub methods: Vec<MethodSig>,
    pub entry_point: Option<u32>,
}

impl Declarations {
    /// Type par nom complet ou simple.
    pub fn find_type(&self, name: &str) -> Option<u32> {
        self.types
            .iter()
            .position(|t| t.full_name == name)
            .or_else(|| self.types.iter().position(|t| t.simple_name == name))
            .and_then(|i| u32::try_from(i).ok())
    }

    /// Méthode `name` du type `owner`.
    pub fn method_of(&self, owner: u32, name: &str) -> Option<(u32, &MethodSig)> {
        let idx = *self.types.get(owner as usize)?.methods.get(name)?;
        Some((idx, self.methods.get(idx as usize)?))
    }
}

/// Collecte des déclarations
#[derive(Default)]
pub(crate) struct CollectDeclarations {
    pub out: Declarations,
}

impl Pass for CollectDeclarations {
    fn run(&mut self, ctx: &mut Ctx<'_>, trees: &[SyntaxTree]) {
        let out = &mut self.out;
        for (ti, tree) in trees.iter().enumerate() {
            for (ci, class) in tree.root().classes.iter().enumerate() {
                let full_name = class.full_name();
                if out.types.iter().any(|t| t.full_name == full_name) {
                    let ns = class.namespace.as_deref().unwrap_or("<global namespace>");
                    ctx.diags.error(
                        ids::DUPLICATE_TYPE,
                        format!("The namespace '{ns}' already contains a definition for '{}'", class.name),
                        tree.path(),
                        class.span,
                    );
                    continue;
                }
                let Ok(owner) = u32::try_from(out.types.len()) else { continue };
                let mut methods = HashMap::new();

                for (mi, m) in class.methods.iter().enumerate() {
                    if methods.contains_key(&m.name) {
                        ctx.diags.error(
                            ids::DUPLICATE_METHOD,
                            format!("Type '{full_name}' already defines a member called '{}'", m.name),
                            tree.path(),
                            m.span,
                        );
                        continue;
                    }
                    let Ok(arity) = u8::try_from(m.params.len()) else {
                        ctx.diags.error(
                            ids::LIMIT_EXCEEDED,
                            format!("Method '{}' declares more than {} parameters", m.name, u8::MAX),
                            tree.path(),
                            m.span,
                        );
                        continue;
                    };
                    let Ok(index) = u32::try_from(out.methods.len()) else { continue };
                    if out.entry_point.is_none() && m.name == "main" && arity == 0 {
                        out.entry_point = Some(index);
                    }
                    methods.insert(m.name.clone(), index);
                    out.methods.push(MethodSig { name: m.name.clone(), owner, arity, tree: ti, class: ci, method: mi });
                }

                out.types.push(TypeSig { full_name, simple_name: class.name.clone(), methods });
            }
        }

        if ctx.opts.output_kind == OutputKind::ConsoleApplication && out.entry_point.is_none() {
            ctx.diags.push(Diagnostic::error(
                ids::NO_ENTRY_POINT,
                "Program does not contain a 'main' method suitable for an entry point",
                None,
            ));
        }
        tracing::trace!(types = out.types.len(), methods = out.methods.len(), "declarations collected");
    }
}
