//! Kiln AST (Abstract Syntax Tree)
//!
//! Structures produites par `kiln-parser` et consommées par `kiln-compiler`.
//!
//! - Une unité de compilation = une liste de classes, chacune rattachée à son namespace
//! - Chaque instruction et chaque expression porte un `Span` (ligne, colonne, offset)
//!
//! # Exemple
//! ```rust
//! use kiln_ast::{Expr, ExprKind, Literal, Span};
//!
//! let lit = Expr::new(ExprKind::Literal(Literal::Int(42)), Span::new(1, 1, 0));
//! assert!(lit.is_literal());
//! ```

#![deny(missing_docs)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Localisation dans le code source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Ligne de début (1-based)
    pub line: u32,
    /// Colonne de début (1-based)
    pub column: u32,
    /// Offset en bytes depuis le début du fichier
    pub offset: u32,
}

impl Span {
    /// Construit un nouveau `Span` à partir d'une position (ligne, colonne, offset).
    pub const fn new(line: u32, column: u32, offset: u32) -> Self {
        Self { line, column, offset }
    }
}

/// Une unité de compilation (un fichier `.kl`)
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompilationUnit {
    /// Classes déclarées, dans l'ordre du source
    pub classes: Vec<ClassDecl>,
}

/// Déclaration de classe
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassDecl {
    /// Namespace englobant (`A.B`), `None` au niveau racine.
    pub namespace: Option<String>,
    /// Nom simple.
    pub name: String,
    /// Méthodes.
    pub methods: Vec<MethodDecl>,
    /// Localisation du nom.
    pub span: Span,
}

impl ClassDecl {
    /// Nom complet `Namespace.Classe`.
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Déclaration de méthode
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MethodDecl {
    /// Nom.
    pub name: String,
    /// Paramètres positionnels.
    pub params: Vec<Param>,
    /// Type de retour annoté (`None` → non précisé).
    pub return_type: Option<Type>,
    /// Corps.
    pub body: Block,
    /// Localisation du nom.
    pub span: Span,
}

/// Paramètre de méthode
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Param {
    /// Nom du paramètre.
    pub name: String,
    /// Type annoté (si fourni).
    pub ty: Option<Type>,
    /// Localisation du paramètre.
    pub span: Span,
}

/// Un bloc d’instructions
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    /// Instructions contenues dans le bloc.
    pub stmts: Vec<Stmt>,
    /// Localisation de l'accolade fermante.
    pub close: Span,
}

/// Une instruction
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Stmt {
    /// Déclaration de variable
    Let {
        /// Nom de la variable.
        name: String,
        /// Type annoté (si fourni).
        ty: Option<Type>,
        /// Valeur initiale.
        value: Option<Expr>,
        /// Localisation de la déclaration.
        span: Span,
    },
    /// Affectation `x = expr;`
    Assign {
        /// Variable cible.
        name: String,
        /// Nouvelle valeur.
        value: Expr,
        /// Localisation.
        span: Span,
    },
    /// Expression seule (souvent un appel)
    Expr(Expr),
    /// Retour d’une méthode
    Return(Option<Expr>, Span),
    /// Boucle `while`
    While {
        /// Condition évaluée à chaque itération.
        condition: Expr,
        /// Corps de la boucle.
        body: Block,
        /// Localisation de la boucle.
        span: Span,
    },
    /// Conditionnelle `if ... else`
    If {
        /// Expression conditionnelle.
        condition: Expr,
        /// Bloc exécuté si la condition est vraie.
        then_block: Block,
        /// Bloc optionnel exécuté sinon.
        else_block: Option<Block>,
        /// Localisation de l'instruction.
        span: Span,
    },
}

impl Stmt {
    /// Localisation de l'instruction.
    pub const fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Return(_, span)
            | Stmt::While { span, .. }
            | Stmt::If { span, .. } => *span,
            Stmt::Expr(e) => e.span,
        }
    }
}

/// Une expression localisée
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Expr {
    /// Nature de l'expression.
    pub kind: ExprKind,
    /// Début de l'expression.
    pub span: Span,
}

impl Expr {
    /// Construit une expression.
    pub const fn new(kind: ExprKind, span: Span) -> Self { Self { kind, span } }

    /// Vrai pour un littéral.
    pub const fn is_literal(&self) -> bool { matches!(self.kind, ExprKind::Literal(_)) }
}

/// Genres d'expression
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExprKind {
    /// Valeur littérale
    Literal(Literal),
    /// Référence à une variable
    Ident(String),
    /// Appel d'une méthode de la classe courante
    Call {
        /// Nom de la méthode.
        callee: String,
        /// Arguments passés à l'appel.
        args: Vec<Expr>,
    },
    /// Appel qualifié `module.fonction(args)` vers un assembly référencé
    QualifiedCall {
        /// Module (`io`, `text`, …).
        module: String,
        /// Fonction.
        function: String,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Opération binaire
    Binary {
        /// Opérande gauche.
        left: Box<Expr>,
        /// Opérateur appliqué.
        op: BinaryOp,
        /// Opérande droite.
        right: Box<Expr>,
    },
    /// Opération unaire
    Unary {
        /// Opérateur unaire appliqué.
        op: UnaryOp,
        /// Expression ciblée par l'opérateur.
        expr: Box<Expr>,
    },
}

/// Valeurs littérales
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Literal {
    /// Entier signé 64 bits.
    Int(i64),
    /// Nombre flottant 64 bits.
    Float(f64),
    /// Booléen.
    Bool(bool),
    /// Chaîne UTF-8.
    Str(String),
    /// Valeur nulle (`null`).
    Null,
}

/// Opérateurs binaires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Soustraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// Égalité.
    Eq,
    /// Différence.
    Ne,
    /// Inférieur strict.
    Lt,
    /// Inférieur ou égal.
    Le,
    /// Supérieur strict.
    Gt,
    /// Supérieur ou égal.
    Ge,
    /// Conjonction logique (court-circuit).
    And,
    /// Disjonction logique (court-circuit).
    Or,
}

/// Opérateurs unaires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    /// Négation arithmétique (`-x`).
    Neg,
    /// Négation logique (`!x`).
    Not,
}

/// Types annotables (documentaires : le runtime est dynamiquement typé)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// `int`
    Int,
    /// `float`
    Float,
    /// `bool`
    Bool,
    /// `str`
    Str,
    /// `void`
    Void,
    /// Type nommé.
    Custom(String),
}

impl Type {
    /// Type depuis son nom source.
    pub fn from_name(s: &str) -> Self {
        match s {
            "int" => Type::Int,
            "float" => Type::Float,
            "bool" => Type::Bool,
            "str" | "string" => Type::Str,
            "void" => Type::Void,
            other => Type::Custom(other.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn full_name_with_and_without_namespace() {
        let mut c = ClassDecl { namespace: Some("Debuggable".into()), name: "HelloWorld".into(), methods: vec![], span: Span::default() };
        assert_eq!(c.full_name(), "Debuggable.HelloWorld");
        c.namespace = None;
        assert_eq!(c.full_name(), "HelloWorld");
    }

    #[test]
    fn stmt_span_follows_expression() {
        let e = Expr::new(ExprKind::Ident("x".into()), Span::new(4, 9, 40));
        assert_eq!(Stmt::Expr(e).span(), Span::new(4, 9, 40));
        assert_eq!(Type::from_name("string"), Type::Str);
        assert_eq!(Type::from_name("Greeter"), Type::Custom("Greeter".into()));
    }
}
