//! kiln-parser — parseur du langage Kiln
//!
//! Branches :
//! - `kiln-lexer` pour la tokenisation
//! - `kiln-core` pour `Span` / `SourceId`
//! - `kiln-ast` pour l’AST cible
//!
//! Grammaire (essentiel):
//! ```text
//! unit           := (namespace | class)*
//! namespace      := "namespace" path "{" class* "}"
//! path           := ident ("." ident)*
//! class          := "class" ident "{" method* "}"
//! method         := "fn" ident "(" params? ")" ("->" type)? block
//! params         := param ("," param)*
//! param          := ident (":" type)?
//!
//! block          := "{" stmt* "}"
//! stmt           := "let" ident (":" type)? ("=" expr)? ";"
//!                 | "return" expr? ";"
//!                 | "while" expr block
//!                 | "if" expr block ("else" (if_stmt | block))?
//!                 | ident "=" expr ";"
//!                 | expr ";"
//!
//! expr           := pratt_expression
//! primary        := literal | ident | call | qualified_call | "(" expr ")"
//! call           := ident "(" args? ")"
//! qualified_call := ident "." ident "(" args? ")"
//! literal        := INT | FLOAT | STRING | "true" | "false" | "null"
//! type           := ident
//! ```

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use core::fmt;

use kiln_ast as ast;
use kiln_core::{SourceId, Span};
use kiln_lexer::{Keyword, LexError, Lexer, LineMap, Token, TokenKind};

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreur de parsing (ou lexicale) avec localisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Span brut (offsets).
    pub span: Span,
    /// Position ligne/colonne du début.
    pub at: ast::Span,
    /// Message humain.
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}): {}", self.at.line, self.at.column, self.message)
    }
}

impl std::error::Error for ParseError {}

type PResult<T> = core::result::Result<T, ParseError>;

/// Parse une source complète en unité de compilation.
pub fn parse_unit(src: &str, source: SourceId) -> PResult<ast::CompilationUnit> {
    Parser::new(src, source)?.parse_unit()
}

/* ─────────────────────────── Parser ─────────────────────────── */

/// Imbrication maximale (blocs, expressions) avant erreur.
pub const MAX_NESTING: usize = 256;

/// Parser Kiln (tokens pré-calculés, anticipation arbitraire).
pub struct Parser<'a> {
    toks: Vec<Token<'a>>,
    pos: usize,
    lines: LineMap,
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Tokenise `src` ; une erreur lexicale est rapportée comme `ParseError`.
    pub fn new(src: &'a str, source: SourceId) -> PResult<Self> {
        let lines = LineMap::new(src);
        let toks = Lexer::new(src, source).tokenize().map_err(|e: LexError| {
            let (line, column) = lines.line_col(e.span.start);
            ParseError { span: e.span, at: ast::Span::new(line, column, e.span.start.0), message: e.to_string() }
        })?;
        Ok(Self { toks, pos: 0, lines, depth: 0 })
    }

    /// Parse l'unité complète.
    pub fn parse_unit(&mut self) -> PResult<ast::CompilationUnit> {
        let mut classes = Vec::new();
        while !self.check(&TokenKind::Eof) {
            match self.peek().value {
                TokenKind::Kw(Keyword::Namespace) => self.parse_namespace(&mut classes)?,
                TokenKind::Kw(Keyword::Class) => classes.push(self.parse_class(None)?),
                _ => return Err(self.err_here("expected `namespace` or `class`")),
            }
        }
        Ok(ast::CompilationUnit { classes })
    }

    /* ─────────── Déclarations ─────────── */

    fn parse_namespace(&mut self, out: &mut Vec<ast::ClassDecl>) -> PResult<()> {
        self.expect_kw(Keyword::Namespace)?;
        let mut path = self.expect_ident()?.to_owned();
        while self.eat(&TokenKind::Dot) {
            path.push('.');
            path.push_str(self.expect_ident()?);
        }
        self.expect(&TokenKind::LBrace)?;
        while !self.check(&TokenKind::RBrace) {
            if !self.is_kw(Keyword::Class) {
                return Err(self.err_here("expected `class`"));
            }
            out.push(self.parse_class(Some(path.clone()))?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(())
    }

    fn parse_class(&mut self, namespace: Option<String>) -> PResult<ast::ClassDecl> {
        self.expect_kw(Keyword::Class)?;
        let span = self.here();
        let name = self.expect_ident()?.to_owned();
        self.expect(&TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            methods.push(self.parse_method()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(ast::ClassDecl { namespace, name, methods, span })
    }

    fn parse_method(&mut self) -> PResult<ast::MethodDecl> {
        self.expect_kw(Keyword::Fn)?;
        let span = self.here();
        let name = self.expect_ident()?.to_owned();
        self.expect(&TokenKind::LParen)?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let pspan = self.here();
                let pname = self.expect_ident()?.to_owned();
                let ty = if self.eat(&TokenKind::Colon) { Some(self.parse_type()?) } else { None };
                params.push(ast::Param { name: pname, ty, span: pspan });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        let return_type = if self.eat(&TokenKind::Arrow) { Some(self.parse_type()?) } else { None };
        let body = self.parse_block()?;
        Ok(ast::MethodDecl { name, params, return_type, body, span })
    }

    fn parse_type(&mut self) -> PResult<ast::Type> {
        match self.peek().value {
            TokenKind::Ident(s) => {
                self.bump();
                Ok(ast::Type::from_name(s))
            }
            _ => Err(self.err_here("expected a type name")),
        }
    }

    /* ─────────── Blocs & Stmts ─────────── */

    fn parse_block(&mut self) -> PResult<ast::Block> { self.nested(Self::parse_block_inner) }

    fn parse_block_inner(&mut self) -> PResult<ast::Block> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.err_here("expected `}`"));
            }
            stmts.push(self.parse_stmt()?);
        }
        let close = self.here();
        self.bump();
        Ok(ast::Block { stmts, close })
    }

    fn parse_stmt(&mut self) -> PResult<ast::Stmt> {
        let span = self.here();
        match self.peek().value {
            TokenKind::Kw(Keyword::Let) => {
                self.bump();
                let name = self.expect_ident()?.to_owned();
                let ty = if self.eat(&TokenKind::Colon) { Some(self.parse_type()?) } else { None };
                let value = if self.eat(&TokenKind::Eq) { Some(self.parse_expr()?) } else { None };
                self.expect(&TokenKind::Semi)?;
                Ok(ast::Stmt::Let { name, ty, value, span })
            }
            TokenKind::Kw(Keyword::Return) => {
                self.bump();
                let value = if self.check(&TokenKind::Semi) { None } else { Some(self.parse_expr()?) };
                self.expect(&TokenKind::Semi)?;
                Ok(ast::Stmt::Return(value, span))
            }
            TokenKind::Kw(Keyword::While) => {
                self.bump();
                let condition = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(ast::Stmt::While { condition, body, span })
            }
            TokenKind::Kw(Keyword::If) => self.parse_if(),
            TokenKind::Ident(name) if matches!(self.peek_at(1).value, TokenKind::Eq) => {
                self.pos += 2;
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Ok(ast::Stmt::Assign { name: name.to_owned(), value, span })
            }
            _ => {
                let e = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Ok(ast::Stmt::Expr(e))
            }
        }
    }

    fn parse_if(&mut self) -> PResult<ast::Stmt> {
        let span = self.here();
        self.expect_kw(Keyword::If)?;
        let condition = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_block = if self.is_kw(Keyword::Else) {
            self.bump();
            if self.is_kw(Keyword::If) {
                // `else if` : bloc synthétique contenant le `if` imbriqué
                let nested = self.parse_if()?;
                let close = self.prev_here();
                Some(ast::Block { stmts: vec![nested], close })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(ast::Stmt::If { condition, then_block, else_block, span })
    }

    /* ─────────── Expressions (Pratt) ─────────── */

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.err_here(format!("nesting deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let r = f(self);
        self.depth -= 1;
        r
    }

    fn parse_expr(&mut self) -> PResult<ast::Expr> { self.parse_prec(0) }

    fn parse_prec(&mut self, min_bp: u8) -> PResult<ast::Expr> { self.nested(|p| p.parse_prec_inner(min_bp)) }

    fn parse_prec_inner(&mut self, min_bp: u8) -> PResult<ast::Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = binary_op(&self.peek().value) {
            let (lbp, rbp) = precedence(op);
            if lbp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_prec(rbp)?;
            let span = lhs.span;
            lhs = ast::Expr::new(ast::ExprKind::Binary { left: Box::new(lhs), op, right: Box::new(rhs) }, span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<ast::Expr> {
        let span = self.here();
        let op = match self.peek().value {
            TokenKind::Minus => ast::UnaryOp::Neg,
            TokenKind::Bang => ast::UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.bump();
        let e = self.nested(Self::parse_unary)?;
        Ok(ast::Expr::new(ast::ExprKind::Unary { op, expr: Box::new(e) }, span))
    }

    fn parse_primary(&mut self) -> PResult<ast::Expr> {
        let span = self.here();
        let lit = |l| Ok(ast::Expr::new(ast::ExprKind::Literal(l), span));
        match self.peek().value.clone() {
            TokenKind::Int(i) => {
                self.bump();
                lit(ast::Literal::Int(i))
            }
            TokenKind::Float(f) => {
                self.bump();
                lit(ast::Literal::Float(f))
            }
            TokenKind::Str(s) => {
                self.bump();
                lit(ast::Literal::Str(s))
            }
            TokenKind::Kw(Keyword::True) => {
                self.bump();
                lit(ast::Literal::Bool(true))
            }
            TokenKind::Kw(Keyword::False) => {
                self.bump();
                lit(ast::Literal::Bool(false))
            }
            TokenKind::Kw(Keyword::Null) => {
                self.bump();
                lit(ast::Literal::Null)
            }
            TokenKind::LParen => {
                self.bump();
                let e = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(e)
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    return Ok(ast::Expr::new(ast::ExprKind::Call { callee: name.to_owned(), args }, span));
                }
                if self.eat(&TokenKind::Dot) {
                    let function = self.expect_ident()?.to_owned();
                    if !self.check(&TokenKind::LParen) {
                        return Err(self.err_here(format!("expected `(` after `{name}.{function}`")));
                    }
                    let args = self.parse_args()?;
                    return Ok(ast::Expr::new(
                        ast::ExprKind::QualifiedCall { module: name.to_owned(), function, args },
                        span,
                    ));
                }
                Ok(ast::Expr::new(ast::ExprKind::Ident(name.to_owned()), span))
            }
            _ => Err(self.err_here("expected an expression")),
        }
    }

    fn parse_args(&mut self) -> PResult<Vec<ast::Expr>> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    /* ─────────── Utilitaires ─────────── */

    fn peek(&self) -> &Token<'a> { self.peek_at(0) }

    fn peek_at(&self, n: usize) -> &Token<'a> {
        // le dernier jeton est toujours Eof
        let last = self.toks.len().saturating_sub(1);
        &self.toks[(self.pos + n).min(last)]
    }

    fn bump(&mut self) {
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind<'_>) -> bool { token_eq(&self.peek().value, kind) }

    fn eat(&mut self, kind: &TokenKind<'_>) -> bool {
        let hit = self.check(kind);
        if hit {
            self.bump();
        }
        hit
    }

    fn is_kw(&self, kw: Keyword) -> bool { matches!(self.peek().value, TokenKind::Kw(k) if k == kw) }

    fn expect(&mut self, kind: &TokenKind<'_>) -> PResult<()> {
        if self.eat(kind) {
            return Ok(());
        }
        Err(self.err_here(format!("expected {kind}, found {}", self.peek().value)))
    }

    fn expect_kw(&mut self, kw: Keyword) -> PResult<()> {
        if self.is_kw(kw) {
            self.bump();
            return Ok(());
        }
        Err(self.err_here(format!("expected `{}`, found {}", kw.as_str(), self.peek().value)))
    }

    fn expect_ident(&mut self) -> PResult<&'a str> {
        if let TokenKind::Ident(s) = self.peek().value {
            self.bump();
            return Ok(s);
        }
        Err(self.err_here(format!("expected identifier, found {}", self.peek().value)))
    }

    /// Position AST du jeton courant.
    fn here(&self) -> ast::Span { self.ast_span(self.peek().span) }

    /// Position AST du jeton précédent.
    fn prev_here(&self) -> ast::Span { self.ast_span(self.toks[self.pos.saturating_sub(1)].span) }

    fn ast_span(&self, span: Span) -> ast::Span {
        let (line, column) = self.lines.line_col(span.start);
        ast::Span::new(line, column, span.start.0)
    }

    fn err_here(&self, message: impl Into<String>) -> ParseError {
        let span = self.peek().span;
        ParseError { span, at: self.ast_span(span), message: message.into() }
    }
}

/* ─────────────────────────── Opérateurs & helpers ─────────────────────────── */

const fn binary_op(t: &TokenKind<'_>) -> Option<ast::BinaryOp> {
    use ast::BinaryOp::*;
    Some(match t {
        TokenKind::OrOr => Or,
        TokenKind::AndAnd => And,
        TokenKind::EqEq => Eq,
        TokenKind::Ne => Ne,
        TokenKind::Lt => Lt,
        TokenKind::Le => Le,
        TokenKind::Gt => Gt,
        TokenKind::Ge => Ge,
        TokenKind::Plus => Add,
        TokenKind::Minus => Sub,
        TokenKind::Star => Mul,
        TokenKind::Slash => Div,
        TokenKind::Percent => Mod,
        _ => return None,
    })
}

/// Pratt binding power (gauche-associatif).
const fn precedence(op: ast::BinaryOp) -> (u8, u8) {
    use ast::BinaryOp::*;
    match op {
        Or => (1, 2),
        And => (3, 4),
        Eq | Ne => (5, 6),
        Lt | Le | Gt | Ge => (7, 8),
        Add | Sub => (9, 10),
        Mul | Div | Mod => (11, 12),
    }
}

fn token_eq(a: &TokenKind<'_>, b: &TokenKind<'_>) -> bool {
    match (a, b) {
        (TokenKind::Kw(ka), TokenKind::Kw(kb)) => ka == kb,
        (TokenKind::Ident(_), TokenKind::Ident(_)) => true,
        _ => core::mem::discriminant(a) == core::mem::discriminant(b),
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use ast::{BinaryOp, ExprKind, Literal, Stmt};
    use pretty_assertions::assert_eq;

    fn parse_ok(src: &str) -> ast::CompilationUnit {
        parse_unit(src, SourceId(0)).expect("parse ok")
    }

    fn first_body(unit: &ast::CompilationUnit) -> &[Stmt] { &unit.classes[0].methods[0].body.stmts }

    #[test]
    fn namespace_class_method() {
        let unit = parse_ok(
            r#"
            namespace Debuggable {
                class HelloWorld {
                    fn greet(name: str) -> str {
                        return "Hello, " + name + "!";
                    }
                }
            }
            class Loose { fn f() {} }
        "#,
        );
        assert_eq!(unit.classes.len(), 2);
        assert_eq!(unit.classes[0].full_name(), "Debuggable.HelloWorld");
        assert_eq!(unit.classes[1].full_name(), "Loose");
        let m = &unit.classes[0].methods[0];
        assert_eq!(m.name, "greet");
        assert_eq!(m.params[0].ty, Some(ast::Type::Str));
        assert_eq!(m.return_type, Some(ast::Type::Str));
        assert_eq!(m.span.line, 4);
    }

    #[test]
    fn precedence_is_respected() {
        let unit = parse_ok("class A { fn f() { return 1 + 2 * 3 == 7 && true; } }");
        let Stmt::Return(Some(e), _) = &first_body(&unit)[0] else { panic!("return expected") };
        let ExprKind::Binary { op: BinaryOp::And, left, .. } = &e.kind else { panic!("&& at root") };
        let ExprKind::Binary { op: BinaryOp::Eq, left, .. } = &left.kind else { panic!("== under &&") };
        let ExprKind::Binary { op: BinaryOp::Add, right, .. } = &left.kind else { panic!("+ under ==") };
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn calls_qualified_calls_and_assignments() {
        let unit = parse_ok(
            r#"class A { fn f(x) {
                let i = 0;
                i = i + 1;
                io.println(text.upper("hi"));
                g(i, x);
            } }"#,
        );
        let body = first_body(&unit);
        assert!(matches!(&body[1], Stmt::Assign { name, .. } if name == "i"));
        let Stmt::Expr(call) = &body[2] else { panic!("expr stmt") };
        let ExprKind::QualifiedCall { module, function, args } = &call.kind else { panic!("qualified call") };
        assert_eq!((module.as_str(), function.as_str()), ("io", "println"));
        assert!(matches!(&args[0].kind, ExprKind::QualifiedCall { module, .. } if module == "text"));
        let Stmt::Expr(call) = &body[3] else { panic!("expr stmt") };
        assert!(matches!(&call.kind, ExprKind::Call { callee, args } if callee == "g" && args.len() == 2));
    }

    #[test]
    fn control_flow_with_else_if() {
        let unit = parse_ok(
            r#"class A { fn f(x) {
                while x > 0 { x = x - 1; }
                if x == 0 { return 1; } else if (x < 0) { return -1; } else { return 0; }
            } }"#,
        );
        let body = first_body(&unit);
        assert!(matches!(body[0], Stmt::While { .. }));
        let Stmt::If { else_block: Some(b), .. } = &body[1] else { panic!("if/else") };
        assert!(matches!(&b.stmts[0], Stmt::If { else_block: Some(_), .. }));
    }

    #[test]
    fn literals() {
        let unit = parse_ok(r#"class A { fn f() { let a = 1.5; let b = null; let c = !false; let d = -4; } }"#);
        let body = first_body(&unit);
        assert!(matches!(&body[0], Stmt::Let { value: Some(e), .. } if e.kind == ExprKind::Literal(Literal::Float(1.5))));
        assert!(matches!(&body[1], Stmt::Let { value: Some(e), .. } if e.kind == ExprKind::Literal(Literal::Null)));
        assert!(matches!(&body[2], Stmt::Let { value: Some(e), .. } if matches!(e.kind, ExprKind::Unary { op: ast::UnaryOp::Not, .. })));
    }

    #[test]
    fn errors_are_located() {
        let err = parse_unit("class A {\n  fn f() { let = 3; }\n}", SourceId(0)).unwrap_err();
        assert_eq!((err.at.line, err.at.column), (2, 16));
        assert_eq!(err.message, "expected identifier, found `=`");
        assert_eq!(err.to_string(), "(2,16): expected identifier, found `=`");

        let err = parse_unit("class A { fn f() { io.println; } }", SourceId(0)).unwrap_err();
        assert!(err.message.contains("io.println"), "{err}");

        let err = parse_unit("fn loose() {}", SourceId(0)).unwrap_err();
        assert_eq!(err.message, "expected `namespace` or `class`");

        let err = parse_unit("class A { fn f() { let s = \"x; } }", SourceId(0)).unwrap_err();
        assert_eq!(err.message, "unterminated string literal");
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let deep = format!("class A {{ fn f() {{ return {}1{}; }} }}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse_unit(&deep, SourceId(0)).unwrap_err();
        assert_eq!(err.message, format!("nesting deeper than {MAX_NESTING} levels"));

        let bangs = format!("class A {{ fn f() {{ return {}true; }} }}", "!".repeat(10_000));
        assert!(parse_unit(&bangs, SourceId(0)).is_err());

        let ok = format!("class A {{ fn f() {{ return {}1{}; }} }}", "(".repeat(100), ")".repeat(100));
        assert!(parse_unit(&ok, SourceId(0)).is_ok());
    }

    #[test]
    fn unterminated_block() {
        let err = parse_unit("class A { fn f() { return 1;", SourceId(0)).unwrap_err();
        assert_eq!(err.message, "expected `}`");
    }
}
