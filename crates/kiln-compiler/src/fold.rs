//! Pliage des constantes (optimisation `Release`).
//!
//! Mêmes règles que l'interpréteur ; toute opération qui échouerait à
//! l'exécution (division par zéro, débordement, types incompatibles) n'est
//! pas pliée et reste au runtime.

use kiln_ast as ast;
use kiln_image::ConstValue;

/// Valeur d'un littéral.
pub(crate) fn literal(l: &ast::Literal) -> ConstValue {
    match l {
        ast::Literal::Int(v) => ConstValue::I64(*v),
        ast::Literal::Float(v) => ConstValue::F64(*v),
        ast::Literal::Bool(b) => ConstValue::Bool(*b),
        ast::Literal::Str(s) => ConstValue::Str(s.clone()),
        ast::Literal::Null => ConstValue::Null,
    }
}

/// Valeur constante d'une expression, si elle est entièrement pliable.
pub(crate) fn eval(e: &ast::Expr) -> Option<ConstValue> {
    match &e.kind {
        ast::ExprKind::Literal(l) => Some(literal(l)),
        ast::ExprKind::Unary { op, expr } => unary(*op, &eval(expr)?),
        ast::ExprKind::Binary { left, op, right } => binary(*op, &eval(left)?, &eval(right)?),
        _ => None,
    }
}

fn unary(op: ast::UnaryOp, v: &ConstValue) -> Option<ConstValue> {
    match (op, v) {
        (ast::UnaryOp::Neg, ConstValue::I64(a)) => a.checked_neg().map(ConstValue::I64),
        (ast::UnaryOp::Neg, ConstValue::F64(a)) => Some(ConstValue::F64(-a)),
        (ast::UnaryOp::Not, ConstValue::Bool(b)) => Some(ConstValue::Bool(!b)),
        _ => None,
    }
}

fn as_f64(v: &ConstValue) -> Option<f64> {
    match v {
        #[allow(clippy::cast_precision_loss)]
        ConstValue::I64(a) => Some(*a as f64),
        ConstValue::F64(a) => Some(*a),
        _ => None,
    }
}

fn text(v: &ConstValue) -> String {
    match v {
        ConstValue::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn binary(op: ast::BinaryOp, a: &ConstValue, b: &ConstValue) -> Option<ConstValue> {
    use ast::BinaryOp as B;
    use ConstValue as C;

    match op {
        B::Add if matches!(a, C::Str(_)) || matches!(b, C::Str(_)) => Some(C::Str(text(a) + &text(b))),
        B::Add | B::Sub | B::Mul | B::Div | B::Mod => match (a, b) {
            (C::I64(x), C::I64(y)) => {
                let r = match op {
                    B::Add => x.checked_add(*y),
                    B::Sub => x.checked_sub(*y),
                    B::Mul => x.checked_mul(*y),
                    B::Div => x.checked_div(*y),
                    _ => x.checked_rem(*y),
                };
                r.map(C::I64)
            }
            _ => {
                let (x, y) = (as_f64(a)?, as_f64(b)?);
                Some(C::F64(match op {
                    B::Add => x + y,
                    B::Sub => x - y,
                    B::Mul => x * y,
                    B::Div => x / y,
                    _ => x % y,
                }))
            }
        },
        B::Eq => Some(C::Bool(equals(a, b))),
        B::Ne => Some(C::Bool(!equals(a, b))),
        B::Lt | B::Le | B::Gt | B::Ge => {
            let ord = match (a, b) {
                (C::I64(x), C::I64(y)) => x.cmp(y),
                (C::Str(x), C::Str(y)) => x.cmp(y),
                _ => as_f64(a)?.partial_cmp(&as_f64(b)?)?,
            };
            Some(C::Bool(match op {
                B::Lt => ord.is_lt(),
                B::Le => ord.is_le(),
                B::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        B::And | B::Or => match (a, b) {
            (C::Bool(x), C::Bool(y)) => Some(C::Bool(if op == B::And { *x && *y } else { *x || *y })),
            _ => None,
        },
    }
}

#[allow(clippy::float_cmp)]
fn equals(a: &ConstValue, b: &ConstValue) -> bool {
    match (a, b) {
        (ConstValue::I64(_) | ConstValue::F64(_), ConstValue::I64(_) | ConstValue::F64(_)) if a != b => {
            as_f64(a) == as_f64(b)
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_ast::{BinaryOp, Expr, ExprKind, Literal, Span, UnaryOp};

    fn lit(l: Literal) -> Expr { Expr::new(ExprKind::Literal(l), Span::default()) }

    fn bin(l: Expr, op: BinaryOp, r: Expr) -> Expr {
        Expr::new(ExprKind::Binary { left: Box::new(l), op, right: Box::new(r) }, Span::default())
    }

    #[test]
    fn nested_arithmetic_folds() {
        let e = bin(lit(Literal::Int(2)), BinaryOp::Mul, bin(lit(Literal::Int(3)), BinaryOp::Add, lit(Literal::Int(4))));
        assert_eq!(eval(&e), Some(ConstValue::I64(14)));
        let neg = Expr::new(ExprKind::Unary { op: UnaryOp::Neg, expr: Box::new(lit(Literal::Float(1.5))) }, Span::default());
        assert_eq!(eval(&neg), Some(ConstValue::F64(-1.5)));
    }

    #[test]
    fn string_concatenation_uses_raw_text() {
        let e = bin(lit(Literal::Str("Hello, ".into())), BinaryOp::Add, lit(Literal::Int(7)));
        assert_eq!(eval(&e), Some(ConstValue::Str("Hello, 7".into())));
    }

    #[test]
    fn runtime_failures_are_not_folded() {
        assert_eq!(eval(&bin(lit(Literal::Int(1)), BinaryOp::Div, lit(Literal::Int(0)))), None);
        assert_eq!(eval(&bin(lit(Literal::Int(i64::MAX)), BinaryOp::Add, lit(Literal::Int(1)))), None);
        assert_eq!(eval(&bin(lit(Literal::Bool(true)), BinaryOp::Sub, lit(Literal::Int(1)))), None);
        let ident = Expr::new(ExprKind::Ident("x".into()), Span::default());
        assert_eq!(eval(&bin(ident, BinaryOp::Add, lit(Literal::Int(1)))), None);
    }

    #[test]
    fn mixed_numeric_comparison() {
        assert_eq!(eval(&bin(lit(Literal::Int(1)), BinaryOp::Eq, lit(Literal::Float(1.0)))), Some(ConstValue::Bool(true)));
        assert_eq!(eval(&bin(lit(Literal::Int(2)), BinaryOp::Lt, lit(Literal::Float(2.5)))), Some(ConstValue::Bool(true)));
        assert_eq!(eval(&bin(lit(Literal::Null), BinaryOp::Ne, lit(Literal::Int(0)))), Some(ConstValue::Bool(true)));
    }
}
