//! Interpréteur à pile sur `kiln_image::Op`.
//!
//! Une frame par appel : slots locaux (paramètres en tête) + pile d'évaluation.
//! Les appels internes récursent en Rust, bornés par [`MAX_CALL_DEPTH`].

use kiln_image::Op;

use crate::{
    context::{LoadContext, LoadedAssembly},
    native::{CallSite, RuntimeCtx},
    value::{self, Arith, Compare},
    RResult, RuntimeError, Value,
};

/// Profondeur d'appel maximale.
pub const MAX_CALL_DEPTH: usize = 256;

/// Exécute la méthode d'indice `method` de `assembly`.
pub(crate) fn invoke(assembly: &LoadedAssembly, method: u32, args: Vec<Value>) -> RResult<Value> {
    let context = assembly.context().ok_or(RuntimeError::ContextDropped)?;
    Interpreter { context, depth: 0 }.call(assembly, method, args)
}

struct Interpreter {
    context: LoadContext,
    depth: usize,
}

struct Frame<'a> {
    assembly: &'a LoadedAssembly,
    method: u32,
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame<'_> {
    fn fault(&self, detail: &'static str) -> RuntimeError {
        RuntimeError::BadCode { method: self.assembly.method_name(self.method), detail }
    }

    fn pop(&mut self) -> RResult<Value> { self.stack.pop().ok_or_else(|| self.fault("stack underflow")) }

    fn pop_n(&mut self, n: u8) -> RResult<Vec<Value>> {
        let n = usize::from(n);
        if self.stack.len() < n {
            return Err(self.fault("stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn slot(&mut self, s: u16) -> RResult<&mut Value> {
        let method = self.method;
        let assembly = self.assembly;
        self.locals
            .get_mut(usize::from(s))
            .ok_or_else(|| RuntimeError::BadCode { method: assembly.method_name(method), detail: "local slot out of range" })
    }
}

impl Interpreter {
    fn call(&mut self, assembly: &LoadedAssembly, method: u32, args: Vec<Value>) -> RResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::StackOverflow(MAX_CALL_DEPTH));
        }
        let def = assembly.image().methods.get(method as usize);
        let (Some(def), Some(code)) = (def, assembly.code(method)) else {
            return Err(RuntimeError::BadCode { method: format!("<method #{method}>"), detail: "method index out of range" });
        };

        let mut locals = args;
        locals.resize(usize::from(def.locals).max(locals.len()), Value::Null);
        let frame = Frame { assembly, method, locals, stack: Vec::with_capacity(8) };

        self.depth += 1;
        let result = self.run(frame, code);
        self.depth -= 1;
        result
    }

    fn run(&mut self, mut f: Frame<'_>, code: &[Op]) -> RResult<Value> {
        let mut pc = 0usize;
        while let Some(&op) = code.get(pc) {
            let here = pc;
            pc += 1;
            match op {
                Op::LoadConst(i) => {
                    let c = f.assembly.image().constants.get(i as usize).ok_or_else(|| f.fault("constant out of range"))?;
                    f.stack.push(Value::from(c));
                }
                Op::LoadLocal(s) => {
                    let v = f.slot(s)?.clone();
                    f.stack.push(v);
                }
                Op::StoreLocal(s) => {
                    let v = f.pop()?;
                    *f.slot(s)? = v;
                }
                Op::Pop => {
                    f.pop()?;
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem => {
                    let kind = match op {
                        Op::Add => Arith::Add,
                        Op::Sub => Arith::Sub,
                        Op::Mul => Arith::Mul,
                        Op::Div => Arith::Div,
                        _ => Arith::Rem,
                    };
                    let b = f.pop()?;
                    let a = f.pop()?;
                    f.stack.push(value::arith(kind, a, b)?);
                }
                Op::Neg => {
                    let v = f.pop()?;
                    f.stack.push(value::negate(v)?);
                }
                Op::Not => {
                    let v = f.pop()?;
                    f.stack.push(value::not(v)?);
                }
                Op::Eq | Op::Ne => {
                    let b = f.pop()?;
                    let a = f.pop()?;
                    f.stack.push(Value::Bool(value::equals(&a, &b) == (op == Op::Eq)));
                }
                Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                    let kind = match op {
                        Op::Lt => Compare::Lt,
                        Op::Le => Compare::Le,
                        Op::Gt => Compare::Gt,
                        _ => Compare::Ge,
                    };
                    let b = f.pop()?;
                    let a = f.pop()?;
                    f.stack.push(value::compare(kind, &a, &b)?);
                }
                Op::Jump(t) => pc = t as usize,
                Op::JumpIfFalse(t) => {
                    if !f.pop()?.as_condition()? {
                        pc = t as usize;
                    }
                }
                Op::Call { method, argc } => {
                    let args = f.pop_n(argc)?;
                    let v = self.call(f.assembly, method, args)?;
                    f.stack.push(v);
                }
                Op::CallExtern { import, argc } => {
                    let args = f.pop_n(argc)?;
                    let pc = u32::try_from(here).unwrap_or(u32::MAX);
                    let v = self.call_extern(&f, import, pc, &args)?;
                    f.stack.push(v);
                }
                Op::Return => return f.pop(),
                Op::ReturnVoid => return Ok(Value::Null),
            }
        }
        Ok(Value::Null)
    }

    fn call_extern(&self, f: &Frame<'_>, import: u32, pc: u32, args: &[Value]) -> RResult<Value> {
        let image = f.assembly.image();
        let import = image.imports.get(import as usize).ok_or_else(|| f.fault("import out of range"))?;
        let target_name = image.references.get(import.assembly as usize).ok_or_else(|| f.fault("reference out of range"))?;

        let target = self.context.load(target_name)?;
        let natives = target.natives().ok_or_else(|| RuntimeError::UnresolvedImport {
            assembly: target_name.to_string(),
            name: import.name.clone(),
        })?;
        tracing::trace!(native = %import.name, argc = args.len(), "extern call");

        let hook = self.context.debug_hook();
        let mut out = self.context.stdout();
        let site = CallSite { assembly: f.assembly, method: f.method, pc };
        let mut ctx = RuntimeCtx::at(&mut **out, hook.as_ref(), site);
        natives.call(&import.name, args, &mut ctx)
    }
}
