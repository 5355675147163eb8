//! Valeurs dynamiques échangées entre l'interpréteur et les natives.
//!
//! Les règles arithmétiques sont celles du pliage de constantes du compilateur :
//! `+` concatène dès qu'un côté est une chaîne, les entiers sont vérifiés
//! (débordement, division par zéro), un mélange entier/flottant passe en `f64`.

use core::{cmp::Ordering, fmt};

use kiln_image::ConstValue;

use crate::{RResult, RuntimeError};

/* --------------------------- Types de valeur --------------------------- */

/// Valeur dynamique.
#[derive(Clone, PartialEq, Default)]
pub enum Value {
    /// Null / absence de valeur.
    #[default]
    Null,
    /// Booléen.
    Bool(bool),
    /// Entier 64 bits signé.
    I64(i64),
    /// Flottant 64 bits.
    F64(f64),
    /// Chaîne UTF-8 possédée.
    Str(String),
}

impl Value {
    /// Nom court du type (messages d'erreur).
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "int",
            Value::F64(_) => "float",
            Value::Str(_) => "str",
        }
    }

    /// Condition d'un saut : seul un booléen est accepté.
    pub fn as_condition(&self) -> RResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(RuntimeError::Type { expected: "bool", found: other.type_name() }),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(x) => Some(*x),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::I64(i) => write!(f, "I64({i})"),
            Value::F64(x) => write!(f, "F64({x})"),
            Value::Str(s) => match s.char_indices().nth(64) {
                Some((cut, _)) => write!(f, "Str({}…)", &s[..cut]),
                None => write!(f, "Str({s})"),
            },
        }
    }
}

/// Texte brut (sans guillemets), tel qu'affiché par `io.println`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I64(i) => write!(f, "{i}"),
            Value::F64(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/* Conversions */
impl From<()> for Value { fn from((): ()) -> Self { Value::Null } }
impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::I64(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::I64(i64::from(v)) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::F64(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Str(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Str(v.to_owned()) } }

impl From<&ConstValue> for Value {
    fn from(c: &ConstValue) -> Self {
        match c {
            ConstValue::Null => Value::Null,
            ConstValue::Bool(b) => Value::Bool(*b),
            ConstValue::I64(i) => Value::I64(*i),
            ConstValue::F64(x) => Value::F64(*x),
            ConstValue::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = RuntimeError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Bool(b) => Ok(b),
            other => Err(RuntimeError::Type { expected: "bool", found: other.type_name() }),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = RuntimeError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::I64(i) => Ok(i),
            other => Err(RuntimeError::Type { expected: "int", found: other.type_name() }),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = RuntimeError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_f64().ok_or(RuntimeError::Type { expected: "float", found: v.type_name() })
    }
}

impl TryFrom<Value> for String {
    type Error = RuntimeError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::Type { expected: "str", found: other.type_name() }),
        }
    }
}

/* ------------------------------ Opérateurs ------------------------------ */

/// Opérateur arithmétique binaire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Arith {
    const fn symbol(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Sub => "-",
            Arith::Mul => "*",
            Arith::Div => "/",
            Arith::Rem => "%",
        }
    }
}

/// Comparaison d'ordre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compare {
    Lt,
    Le,
    Gt,
    Ge,
}

pub(crate) fn arith(op: Arith, a: Value, b: Value) -> RResult<Value> {
    if op == Arith::Add && (matches!(a, Value::Str(_)) || matches!(b, Value::Str(_))) {
        return Ok(Value::Str(format!("{a}{b}")));
    }
    match (&a, &b) {
        (Value::I64(x), Value::I64(y)) => {
            if matches!(op, Arith::Div | Arith::Rem) && *y == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            let r = match op {
                Arith::Add => x.checked_add(*y),
                Arith::Sub => x.checked_sub(*y),
                Arith::Mul => x.checked_mul(*y),
                Arith::Div => x.checked_div(*y),
                Arith::Rem => x.checked_rem(*y),
            };
            r.map(Value::I64).ok_or(RuntimeError::Overflow(op.symbol()))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::F64(match op {
                Arith::Add => x + y,
                Arith::Sub => x - y,
                Arith::Mul => x * y,
                Arith::Div => x / y,
                Arith::Rem => x % y,
            })),
            _ => Err(RuntimeError::Operands { op: op.symbol(), left: a.type_name(), right: b.type_name() }),
        },
    }
}

pub(crate) fn negate(v: Value) -> RResult<Value> {
    match v {
        Value::I64(i) => i.checked_neg().map(Value::I64).ok_or(RuntimeError::Overflow("-")),
        Value::F64(x) => Ok(Value::F64(-x)),
        other => Err(RuntimeError::Type { expected: "number", found: other.type_name() }),
    }
}

pub(crate) fn not(v: Value) -> RResult<Value> { Ok(Value::Bool(!v.as_condition()?)) }

/// Égalité : les nombres se comparent entre eux quel que soit leur type.
#[allow(clippy::float_cmp)]
pub(crate) fn equals(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if !matches!((a, b), (Value::I64(_), Value::I64(_))) => x == y,
        _ => a == b,
    }
}

pub(crate) fn compare(op: Compare, a: &Value, b: &Value) -> RResult<Value> {
    let ord = match (a, b) {
        (Value::I64(x), Value::I64(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => {
                let symbol = match op {
                    Compare::Lt => "<",
                    Compare::Le => "<=",
                    Compare::Gt => ">",
                    Compare::Ge => ">=",
                };
                return Err(RuntimeError::Operands { op: symbol, left: a.type_name(), right: b.type_name() });
            }
        },
    };
    // NaN : toute comparaison est fausse
    Ok(Value::Bool(ord.is_some_and(|o| match op {
        Compare::Lt => o == Ordering::Less,
        Compare::Le => o != Ordering::Greater,
        Compare::Gt => o == Ordering::Greater,
        Compare::Ge => o != Ordering::Less,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_concatenates_raw_text() {
        assert_eq!(arith(Arith::Add, "Hello, ".into(), Value::I64(7)).unwrap(), Value::from("Hello, 7"));
        assert_eq!(arith(Arith::Add, Value::Null, "!".into()).unwrap(), Value::from("null!"));
        assert_eq!(arith(Arith::Add, Value::I64(2), Value::F64(0.5)).unwrap(), Value::F64(2.5));
    }

    #[test]
    fn integer_faults_are_errors() {
        assert!(matches!(arith(Arith::Div, Value::I64(1), Value::I64(0)), Err(RuntimeError::DivideByZero)));
        assert!(matches!(arith(Arith::Mul, Value::I64(i64::MAX), Value::I64(2)), Err(RuntimeError::Overflow("*"))));
        assert!(matches!(negate(Value::I64(i64::MIN)), Err(RuntimeError::Overflow(_))));
        assert!(matches!(
            arith(Arith::Sub, Value::Bool(true), Value::I64(1)),
            Err(RuntimeError::Operands { op: "-", left: "bool", right: "int" })
        ));
    }

    #[test]
    fn comparisons() {
        assert!(equals(&Value::I64(1), &Value::F64(1.0)));
        assert!(!equals(&Value::I64(1), &Value::from("1")));
        assert_eq!(compare(Compare::Lt, &Value::from("a"), &Value::from("b")).unwrap(), Value::Bool(true));
        assert_eq!(compare(Compare::Ge, &Value::F64(f64::NAN), &Value::I64(0)).unwrap(), Value::Bool(false));
        assert!(compare(Compare::Gt, &Value::Null, &Value::I64(0)).is_err());
    }

    #[test]
    fn conversions() {
        assert_eq!(i64::try_from(Value::I64(4)).unwrap(), 4);
        assert!(String::try_from(Value::I64(4)).is_err());
        assert_eq!(Value::from(&ConstValue::Str("x".into())), Value::from("x"));
        assert_eq!(format!("{:?}", Value::from("é".repeat(70))).chars().count(), "Str()…".chars().count() + 64);
    }
}
