//! Passe de liaison + génération de code.
//!
//! Une seule descente par méthode : résolution des noms (locaux, méthodes du
//! type, natives des assemblies référencés), diagnostics, émission des `Op`
//! et des points de séquence.

use std::collections::HashMap;

use indexmap::IndexSet;
use kiln_ast as ast;
use kiln_core::AssemblyName;
use kiln_image::{ConstValue, Export, Import, MetadataReference, Op, SequencePoint};

use crate::{
    declare::Declarations,
    diagnostics::ids,
    fold,
    pass::{Ctx, Pass, SymTable},
    source::SyntaxTree,
    OptimizationLevel,
};

/* ─────────────────────────── Références externes ─────────────────────────── */

/// Résultat de la recherche d'une native qualifiée.
pub(crate) enum ExternLookup<'r> {
    /// Aucun assembly référencé n'exporte ce module.
    MissingModule,
    /// Le module existe mais pas la fonction.
    MissingFunction,
    /// Trouvée.
    Found {
        assembly: &'r AssemblyName,
        export: &'r Export,
    },
}

/// Vue des natives exportées par les références de la compilation.
pub(crate) struct ExternModules<'r> {
    refs: &'r [MetadataReference],
}

impl<'r> ExternModules<'r> {
    pub const fn new(refs: &'r [MetadataReference]) -> Self { Self { refs } }

    /// Première référence (dans l'ordre fourni) exportant `module.function`.
    pub fn lookup(&self, module: &str, function: &str) -> ExternLookup<'r> {
        let mut module_seen = false;
        for r in self.refs {
            let md = r.metadata();
            if let Some(export) = md.export(module, function) {
                return ExternLookup::Found { assembly: &md.identity, export };
            }
            module_seen |= md.exports_module(module);
        }
        if module_seen { ExternLookup::MissingFunction } else { ExternLookup::MissingModule }
    }
}

/* ─────────────────────────── Tables de l'image ─────────────────────────── */

/// Tables partagées par toutes les méthodes : constantes, références utilisées, imports.
#[derive(Debug, Default)]
pub(crate) struct ImageTables {
    pub constants: Vec<ConstValue>,
    const_index: HashMap<ConstValue, u32>,
    /// Seulement les assemblies réellement appelés, dans l'ordre du premier usage
    pub references: IndexSet<AssemblyName>,
    pub imports: IndexSet<Import>,
}

impl ImageTables {
    fn constant(&mut self, v: ConstValue) -> u32 {
        let constants = &mut self.constants;
        *self.const_index.entry(v).or_insert_with_key(|v| {
            constants.push(v.clone());
            u32::try_from(constants.len() - 1).unwrap_or(u32::MAX)
        })
    }

    fn import(&mut self, assembly: &AssemblyName, export: &Export) -> u32 {
        let (ai, _) = self.references.insert_full(assembly.clone());
        let import = Import { assembly: u32::try_from(ai).unwrap_or(u32::MAX), name: export.qualified(), arity: export.arity };
        let (ii, _) = self.imports.insert_full(import);
        u32::try_from(ii).unwrap_or(u32::MAX)
    }
}

/// Méthode abaissée.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoweredMethod {
    pub code: Vec<Op>,
    pub locals: u16,
    pub points: Vec<SequencePoint>,
    pub tree: usize,
}

/* ─────────────────────────── Passe ─────────────────────────── */

/// Liaison + émission, méthode par méthode dans l'ordre global
pub(crate) struct Lower<'r> {
    decls: &'r Declarations,
    externs: ExternModules<'r>,
    tables: ImageTables,
    methods: Vec<LoweredMethod>,
}

impl<'r> Lower<'r> {
    pub fn new(decls: &'r Declarations, refs: &'r [MetadataReference]) -> Self {
        Self { decls, externs: ExternModules::new(refs), tables: ImageTables::default(), methods: Vec::new() }
    }

    pub fn finish(self) -> (ImageTables, Vec<LoweredMethod>) { (self.tables, self.methods) }
}

impl Pass for Lower<'_> {
    fn run(&mut self, ctx: &mut Ctx<'_>, trees: &[SyntaxTree]) {
        let decls = self.decls;
        for sig in &decls.methods {
            let Some(tree) = trees.get(sig.tree) else { continue };
            let Some(decl) = tree.root().classes.get(sig.class).and_then(|c| c.methods.get(sig.method)) else { continue };
            let Some(owner) = decls.types.get(sig.owner as usize) else { continue };

            let mut f = FnBuilder {
                ctx: &mut *ctx,
                decls,
                externs: &self.externs,
                tables: &mut self.tables,
                path: tree.path(),
                owner: sig.owner,
                owner_name: &owner.full_name,
                syms: SymTable::new(),
                ops: Vec::new(),
                points: Vec::new(),
            };
            f.method(decl);
            self.methods.push(f.finish(sig.tree));
        }
    }
}

/* ─────────────────────────── Méthode ─────────────────────────── */

struct FnBuilder<'a, 'b> {
    ctx: &'a mut Ctx<'b>,
    decls: &'a Declarations,
    externs: &'a ExternModules<'a>,
    tables: &'a mut ImageTables,
    path: &'a str,
    owner: u32,
    owner_name: &'a str,
    syms: SymTable,
    ops: Vec<Op>,
    points: Vec<SequencePoint>,
}

impl FnBuilder<'_, '_> {
    fn method(&mut self, m: &ast::MethodDecl) {
        for p in &m.params {
            if self.syms.resolve(&p.name).is_some() {
                self.error(ids::DUPLICATE_PARAMETER, format!("The parameter name '{}' is a duplicate", p.name), p.span);
            }
            self.syms.declare(&p.name, true, p.span);
        }
        self.block(&m.body);
        self.mark(m.body.close);
        self.emit(Op::ReturnVoid);

        let unread: Vec<_> = self.syms.unread().map(|l| (l.name.clone(), l.span)).collect();
        for (name, span) in unread {
            self.ctx.diags.warning(
                ids::UNUSED_LOCAL,
                format!("The variable '{name}' is assigned but its value is never used"),
                self.path,
                span,
            );
        }
    }

    fn finish(self, tree: usize) -> LoweredMethod {
        LoweredMethod { code: self.ops, locals: self.syms.slot_count(), points: self.points, tree }
    }

    /* ───── émission ───── */

    fn pc(&self) -> u32 { u32::try_from(self.ops.len()).unwrap_or(u32::MAX) }

    fn emit(&mut self, op: Op) -> u32 {
        let pc = self.pc();
        self.ops.push(op);
        pc
    }

    fn patch(&mut self, at: u32, target: u32) {
        if let Some(Op::Jump(t) | Op::JumpIfFalse(t)) = self.ops.get_mut(at as usize) {
            *t = target;
        }
    }

    fn constant(&mut self, v: ConstValue) {
        let i = self.tables.constant(v);
        self.emit(Op::LoadConst(i));
    }

    /// Point de séquence au `pc` courant ; un point au même `pc` est remplacé.
    fn mark(&mut self, span: ast::Span) {
        let point = SequencePoint { pc: self.pc(), line: span.line, column: span.column };
        match self.points.last_mut() {
            Some(last) if last.pc == point.pc => *last = point,
            _ => self.points.push(point),
        }
    }

    fn error(&mut self, id: &'static str, message: String, span: ast::Span) {
        self.ctx.diags.error(id, message, self.path, span);
    }

    /* ───── instructions ───── */

    fn block(&mut self, b: &ast::Block) {
        self.syms.push_scope();
        for s in &b.stmts {
            self.stmt(s);
        }
        self.syms.pop_scope();
    }

    fn stmt(&mut self, s: &ast::Stmt) {
        self.mark(s.span());
        match s {
            ast::Stmt::Let { name, value, span, .. } => {
                match value {
                    Some(v) => self.expr(v),
                    None => self.constant(ConstValue::Null),
                }
                if self.syms.resolve(name).is_some() {
                    self.error(ids::DUPLICATE_LOCAL, format!("A local variable named '{name}' is already defined in this scope"), *span);
                    self.emit(Op::Pop);
                    return;
                }
                if let Some(id) = self.syms.declare(name, false, *span) {
                    self.emit(Op::StoreLocal(id.0));
                } else {
                    self.error(ids::LIMIT_EXCEEDED, format!("Too many locals in '{}'", self.owner_name), *span);
                    self.emit(Op::Pop);
                }
            }
            ast::Stmt::Assign { name, value, span } => {
                self.expr(value);
                if let Some(id) = self.syms.resolve(name) {
                    self.emit(Op::StoreLocal(id.0));
                } else {
                    self.error(ids::UNKNOWN_NAME, format!("The name '{name}' does not exist in the current context"), *span);
                    self.emit(Op::Pop);
                }
            }
            ast::Stmt::Expr(e) => {
                self.expr(e);
                self.emit(Op::Pop);
            }
            ast::Stmt::Return(value, _) => match value {
                Some(e) => {
                    self.expr(e);
                    self.emit(Op::Return);
                }
                None => {
                    self.emit(Op::ReturnVoid);
                }
            },
            ast::Stmt::While { condition, body, .. } => {
                let start = self.pc();
                self.expr(condition);
                let exit = self.emit(Op::JumpIfFalse(0));
                self.block(body);
                self.emit(Op::Jump(start));
                let end = self.pc();
                self.patch(exit, end);
            }
            ast::Stmt::If { condition, then_block, else_block, .. } => {
                self.expr(condition);
                let skip_then = self.emit(Op::JumpIfFalse(0));
                self.block(then_block);
                if let Some(eb) = else_block {
                    let skip_else = self.emit(Op::Jump(0));
                    let else_start = self.pc();
                    self.patch(skip_then, else_start);
                    self.block(eb);
                    let end = self.pc();
                    self.patch(skip_else, end);
                } else {
                    let end = self.pc();
                    self.patch(skip_then, end);
                }
            }
        }
    }

    /* ───── expressions ───── */

    fn expr(&mut self, e: &ast::Expr) {
        if self.ctx.opts.optimization == OptimizationLevel::Release && !e.is_literal() {
            if let Some(v) = fold::eval(e) {
                self.constant(v);
                return;
            }
        }

        match &e.kind {
            ast::ExprKind::Literal(l) => self.constant(fold::literal(l)),
            ast::ExprKind::Ident(name) => {
                if let Some(id) = self.syms.resolve(name) {
                    self.syms.mark_read(id);
                    self.emit(Op::LoadLocal(id.0));
                } else {
                    self.error(ids::UNKNOWN_NAME, format!("The name '{name}' does not exist in the current context"), e.span);
                    self.constant(ConstValue::Null);
                }
            }
            ast::ExprKind::Call { callee, args } => {
                self.args(args);
                self.call_method(self.owner, self.owner_name.to_owned(), callee, args.len(), e.span);
            }
            ast::ExprKind::QualifiedCall { module, function, args } => {
                self.args(args);
                if let Some(owner) = self.decls.find_type(module) {
                    self.call_method(owner, module.clone(), function, args.len(), e.span);
                } else {
                    self.call_extern(module, function, args.len(), e.span);
                }
            }
            ast::ExprKind::Binary { left, op: ast::BinaryOp::And, right } => {
                self.expr(left);
                let short = self.emit(Op::JumpIfFalse(0));
                self.expr(right);
                let done = self.emit(Op::Jump(0));
                let at = self.pc();
                self.patch(short, at);
                self.constant(ConstValue::Bool(false));
                let end = self.pc();
                self.patch(done, end);
            }
            ast::ExprKind::Binary { left, op: ast::BinaryOp::Or, right } => {
                self.expr(left);
                let rhs = self.emit(Op::JumpIfFalse(0));
                self.constant(ConstValue::Bool(true));
                let done = self.emit(Op::Jump(0));
                let at = self.pc();
                self.patch(rhs, at);
                self.expr(right);
                let end = self.pc();
                self.patch(done, end);
            }
            ast::ExprKind::Binary { left, op, right } => {
                self.expr(left);
                self.expr(right);
                self.emit(binary_op(*op));
            }
            ast::ExprKind::Unary { op, expr } => {
                self.expr(expr);
                self.emit(match op {
                    ast::UnaryOp::Neg => Op::Neg,
                    ast::UnaryOp::Not => Op::Not,
                });
            }
        }
    }

    fn args(&mut self, args: &[ast::Expr]) {
        for a in args {
            self.expr(a);
        }
    }

    fn call_method(&mut self, owner: u32, owner_name: String, name: &str, argc: usize, span: ast::Span) {
        let Some((method, sig)) = self.decls.method_of(owner, name) else {
            self.error(ids::UNKNOWN_METHOD, format!("'{owner_name}' does not contain a definition for '{name}'"), span);
            self.constant(ConstValue::Null);
            return;
        };
        match u8::try_from(argc) {
            Ok(argc) if argc == sig.arity => {
                self.emit(Op::Call { method, argc });
            }
            _ => {
                self.error(ids::ARITY_MISMATCH, format!("No overload for method '{name}' takes {argc} arguments"), span);
                self.constant(ConstValue::Null);
            }
        }
    }

    fn call_extern(&mut self, module: &str, function: &str, argc: usize, span: ast::Span) {
        match self.externs.lookup(module, function) {
            ExternLookup::MissingModule => {
                self.error(
                    ids::MISSING_REFERENCE,
                    format!("The type or namespace name '{module}' could not be found (are you missing an assembly reference?)"),
                    span,
                );
                self.constant(ConstValue::Null);
            }
            ExternLookup::MissingFunction => {
                self.error(ids::UNKNOWN_METHOD, format!("'{module}' does not contain a definition for '{function}'"), span);
                self.constant(ConstValue::Null);
            }
            ExternLookup::Found { assembly, export } => match u8::try_from(argc) {
                Ok(argc) if argc == export.arity => {
                    let import = self.tables.import(assembly, export);
                    self.emit(Op::CallExtern { import, argc });
                }
                _ => {
                    self.error(ids::ARITY_MISMATCH, format!("No overload for method '{function}' takes {argc} arguments"), span);
                    self.constant(ConstValue::Null);
                }
            },
        }
    }
}

const fn binary_op(op: ast::BinaryOp) -> Op {
    match op {
        ast::BinaryOp::Add => Op::Add,
        ast::BinaryOp::Sub => Op::Sub,
        ast::BinaryOp::Mul => Op::Mul,
        ast::BinaryOp::Div => Op::Div,
        ast::BinaryOp::Mod => Op::Rem,
        ast::BinaryOp::Eq => Op::Eq,
        ast::BinaryOp::Ne => Op::Ne,
        ast::BinaryOp::Lt => Op::Lt,
        ast::BinaryOp::Le => Op::Le,
        ast::BinaryOp::Gt => Op::Gt,
        ast::BinaryOp::Ge => Op::Ge,
        // court-circuit : traités par `expr`
        ast::BinaryOp::And | ast::BinaryOp::Or => Op::Eq,
    }
}
