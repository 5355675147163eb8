//! kiln-lexer — analyse lexicale pour Kiln
//!
//! Faits saillants :
//! - `Lexer` + `LexerOptions` : commentaires `//`, `/* */` (imbriqués), ident/keywords, nombres
//!   (10/16/2, `_`, floats + exposant), chaînes avec échappements (`\n`, `\x41`, `\u{..}`)
//! - `Span`/`Spanned`/`SourceId` + `LineMap` pour `(ligne, colonne)`
//! - Erreurs avec `Display` propre + spans précis
//!
//! Exemple éclair :
//! ```
//! use kiln_core::SourceId;
//! use kiln_lexer::{Lexer, TokenKind};
//!
//! let toks = Lexer::new("class A { fn f() { return 1; } }", SourceId(0)).tokenize().unwrap();
//! assert!(matches!(toks.last().map(|t| &t.value), Some(TokenKind::Eof)));
//! ```

#![deny(missing_docs)]

use core::fmt;

use kiln_core::{Pos, SourceId, Span, Spanned};

/* ─────────────────────────── Options & LineMap ─────────────────────────── */

/// Options du lexer.
#[derive(Debug, Clone, Copy)]
pub struct LexerOptions {
    /// Autoriser commentaires blocs imbriqués `/* ... /* .. */ ... */`.
    pub nested_block_comments: bool,
}

impl Default for LexerOptions {
    fn default() -> Self { Self { nested_block_comments: true } }
}

/// Table des lignes pour (byte offset) → (ligne, colonne).
#[derive(Debug, Clone)]
pub struct LineMap {
    /// Offsets des débuts de lignes (toujours contient 0).
    pub line_starts: Vec<u32>,
}

impl LineMap {
    /// Construit la table à partir d’un `&str`.
    pub fn new(src: &str) -> Self {
        let mut ls = Vec::with_capacity(64);
        ls.push(0);
        ls.extend(src.bytes().enumerate().filter(|(_, b)| *b == b'\n').map(|(i, _)| i as u32 + 1));
        Self { line_starts: ls }
    }

    /// Convertit un `Pos` en (ligne, colonne), 1-based ; la colonne compte en bytes.
    pub fn line_col(&self, pos: Pos) -> (u32, u32) {
        let off = pos.0;
        let idx = match self.line_starts.binary_search(&off) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[idx];
        ((idx as u32) + 1, off.saturating_sub(line_start) + 1)
    }

    /// Nombre de lignes.
    pub fn line_count(&self) -> usize { self.line_starts.len() }
}

/* ─────────────────────────── Tokens ─────────────────────────── */

/// Mots-clés reconnus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `namespace`
    Namespace,
    /// `class`
    Class,
    /// `fn`
    Fn,
    /// `let`
    Let,
    /// `if`
    If,
    /// `else`
    Else,
    /// `while`
    While,
    /// `return`
    Return,
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
}

/// Genre de jeton lexical.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    /// Fin de fichier.
    Eof,
    /// Identifiant.
    Ident(&'a str),
    /// Mot-clé.
    Kw(Keyword),
    /// Littéral entier (i64).
    Int(i64),
    /// Littéral flottant (f64).
    Float(f64),
    /// Littéral chaîne (décodée).
    Str(String),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `;`
    Semi,
    /// `:`
    Colon,
    /// `->`
    Arrow,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `=`
    Eq,
    /// `==`
    EqEq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Bang,
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TokenKind::*;
        let s = match self {
            Eof => "end of file",
            Ident(name) => return write!(f, "identifier `{name}`"),
            Kw(k) => return write!(f, "keyword `{}`", k.as_str()),
            Int(v) => return write!(f, "integer `{v}`"),
            Float(v) => return write!(f, "float `{v}`"),
            Str(_) => "string literal",
            LParen => "`(`",
            RParen => "`)`",
            LBrace => "`{`",
            RBrace => "`}`",
            Comma => "`,`",
            Dot => "`.`",
            Semi => "`;`",
            Colon => "`:`",
            Arrow => "`->`",
            Plus => "`+`",
            Minus => "`-`",
            Star => "`*`",
            Slash => "`/`",
            Percent => "`%`",
            Eq => "`=`",
            EqEq => "`==`",
            Ne => "`!=`",
            Lt => "`<`",
            Le => "`<=`",
            Gt => "`>`",
            Ge => "`>=`",
            AndAnd => "`&&`",
            OrOr => "`||`",
            Bang => "`!`",
        };
        f.write_str(s)
    }
}

impl Keyword {
    /// Forme source.
    pub const fn as_str(self) -> &'static str {
        match self {
            Keyword::Namespace => "namespace",
            Keyword::Class => "class",
            Keyword::Fn => "fn",
            Keyword::Let => "let",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::Return => "return",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Null => "null",
        }
    }
}

/// Jeton avec span.
pub type Token<'a> = Spanned<TokenKind<'a>>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Genre d’erreur lexicale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexErrorKind {
    /// Caractère inattendu.
    UnexpectedChar(char),
    /// Commentaire bloc non terminé.
    UnterminatedBlockComment,
    /// Chaîne non terminée.
    UnterminatedString,
    /// Séquence d’échappement invalide.
    InvalidEscape,
    /// Littéral numérique invalide.
    InvalidNumber,
    /// Dépassement entier i64.
    IntOverflow,
}

/// Erreur lexicale avec localisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// Localisation.
    pub span: Span,
    /// Genre d’erreur.
    pub kind: LexErrorKind,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use LexErrorKind::*;
        match &self.kind {
            UnexpectedChar(c) => write!(f, "unexpected character: {c:?}"),
            UnterminatedBlockComment => write!(f, "unterminated block comment"),
            UnterminatedString => write!(f, "unterminated string literal"),
            InvalidEscape => write!(f, "invalid escape sequence"),
            InvalidNumber => write!(f, "invalid number literal"),
            IntOverflow => write!(f, "integer literal overflows i64"),
        }
    }
}

impl std::error::Error for LexError {}

/* ─────────────────────────── Lexer ─────────────────────────── */

/// Analyseur lexical (itératif).
pub struct Lexer<'a> {
    src: &'a str,
    /// Position courante en bytes (toujours sur une frontière de char).
    off: usize,
    source: SourceId,
    opts: LexerOptions,
}

impl<'a> Lexer<'a> {
    /// Crée un lexer avec options par défaut.
    pub fn new(src: &'a str, source: SourceId) -> Self { Self::with_options(src, source, LexerOptions::default()) }

    /// Crée un lexer avec `LexerOptions`.
    pub const fn with_options(src: &'a str, source: SourceId, opts: LexerOptions) -> Self {
        Self { src, off: 0, source, opts }
    }

    /// Prochain jeton ; émet `Eof` indéfiniment en fin de source.
    pub fn next_token(&mut self) -> Result<Token<'a>, LexError> {
        self.skip_ws_and_comments()?;
        let start = self.off;
        let Some(c) = self.bump() else {
            return Ok(Spanned::new(TokenKind::Eof, self.span_from(start)));
        };

        let kind = match c {
            ch if is_ident_start(ch) => {
                self.consume_while(is_ident_continue);
                let s = &self.src[start..self.off];
                keyword_of(s).map_or(TokenKind::Ident(s), TokenKind::Kw)
            }
            ch if ch.is_ascii_digit() => self.lex_number(start, ch)?,
            '"' => TokenKind::Str(self.lex_string(start)?),

            '-' => if self.eat('>') { TokenKind::Arrow } else { TokenKind::Minus },
            '=' => if self.eat('=') { TokenKind::EqEq } else { TokenKind::Eq },
            '!' => if self.eat('=') { TokenKind::Ne } else { TokenKind::Bang },
            '<' => if self.eat('=') { TokenKind::Le } else { TokenKind::Lt },
            '>' => if self.eat('=') { TokenKind::Ge } else { TokenKind::Gt },
            '&' if self.eat('&') => TokenKind::AndAnd,
            '|' if self.eat('|') => TokenKind::OrOr,

            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,

            other => return Err(self.err_from(start, LexErrorKind::UnexpectedChar(other))),
        };

        Ok(Spanned::new(kind, self.span_from(start)))
    }

    /// Tokenise toute la source (ajoute `Eof` final).
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut out = Vec::new();
        loop {
            let t = self.next_token()?;
            let is_eof = matches!(t.value, TokenKind::Eof);
            out.push(t);
            if is_eof {
                return Ok(out);
            }
        }
    }

    /* ────────── Primitives internes ────────── */

    #[inline] fn peek(&self) -> Option<char> { self.src[self.off..].chars().next() }
    #[inline] fn peek2(&self) -> Option<char> { self.src[self.off..].chars().nth(1) }
    #[inline] fn bump(&mut self) -> Option<char> { let c = self.peek()?; self.off += c.len_utf8(); Some(c) }
    #[inline] fn eat(&mut self, ch: char) -> bool { if self.peek() == Some(ch) { self.off += ch.len_utf8(); true } else { false } }

    fn consume_while(&mut self, mut p: impl FnMut(char) -> bool) {
        while let Some(c) = self.peek() {
            if !p(c) {
                break;
            }
            self.off += c.len_utf8();
        }
    }

    fn skip_ws_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            self.consume_while(char::is_whitespace);
            match (self.peek(), self.peek2()) {
                (Some('/'), Some('/')) => self.consume_while(|c| c != '\n'),
                (Some('/'), Some('*')) => {
                    let start = self.off;
                    self.off += 2;
                    let mut depth = 1u32;
                    while depth > 0 {
                        match (self.peek(), self.peek2()) {
                            (None, _) => return Err(self.err_from(start, LexErrorKind::UnterminatedBlockComment)),
                            (Some('/'), Some('*')) if self.opts.nested_block_comments => {
                                self.off += 2;
                                depth += 1;
                            }
                            (Some('*'), Some('/')) => {
                                self.off += 2;
                                depth -= 1;
                            }
                            (Some(c), _) => self.off += c.len_utf8(),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_string(&mut self, start_quote: usize) -> Result<String, LexError> {
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.err_from(start_quote, LexErrorKind::UnterminatedString))?;
            match c {
                '"' => return Ok(out),
                '\n' => return Err(self.err_from(start_quote, LexErrorKind::UnterminatedString)),
                '\\' => {
                    let esc_start = self.off - 1;
                    let esc = self.bump().ok_or_else(|| self.err_from(start_quote, LexErrorKind::UnterminatedString))?;
                    let decoded = match esc {
                        '"' => '"',
                        '\\' => '\\',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        'x' => {
                            let hi = self.bump().and_then(|c| c.to_digit(16));
                            let lo = self.bump().and_then(|c| c.to_digit(16));
                            match (hi, lo) {
                                (Some(h), Some(l)) if h < 8 => char::from((h * 16 + l) as u8),
                                _ => return Err(self.err_from(esc_start, LexErrorKind::InvalidEscape)),
                            }
                        }
                        'u' => self.read_unicode_escape(esc_start)?,
                        _ => return Err(self.err_from(esc_start, LexErrorKind::InvalidEscape)),
                    };
                    out.push(decoded);
                }
                other => out.push(other),
            }
        }
    }

    fn read_unicode_escape(&mut self, esc_start: usize) -> Result<char, LexError> {
        if !self.eat('{') {
            return Err(self.err_from(esc_start, LexErrorKind::InvalidEscape));
        }
        let start = self.off;
        self.consume_while(|c| c.is_ascii_hexdigit() || c == '_');
        let raw = self.src[start..self.off].replace('_', "");
        if !self.eat('}') || raw.is_empty() || raw.len() > 6 {
            return Err(self.err_from(esc_start, LexErrorKind::InvalidEscape));
        }
        u32::from_str_radix(&raw, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.err_from(esc_start, LexErrorKind::InvalidEscape))
    }

    fn lex_number(&mut self, start: usize, first: char) -> Result<TokenKind<'a>, LexError> {
        if first == '0' {
            let radix = match self.peek() {
                Some('x' | 'X') => Some(16),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.off += 1;
                self.consume_while(|c| c.is_digit(radix) || c == '_');
                let raw = self.src[start + 2..self.off].replace('_', "");
                if raw.is_empty() {
                    return Err(self.err_from(start, LexErrorKind::InvalidNumber));
                }
                return i64::from_str_radix(&raw, radix)
                    .map(TokenKind::Int)
                    .map_err(|_| self.err_from(start, LexErrorKind::IntOverflow));
            }
        }

        // Décimal / flottant
        self.consume_while(|c| c.is_ascii_digit() || c == '_');
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek2().is_some_and(|d| d.is_ascii_digit()) {
            is_float = true;
            self.off += 1;
            self.consume_while(|c| c.is_ascii_digit() || c == '_');
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            self.off += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.off += 1;
            }
            self.consume_while(|c| c.is_ascii_digit() || c == '_');
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(self.err_from(start, LexErrorKind::InvalidNumber));
        }

        let raw = self.src[start..self.off].replace('_', "");
        if is_float {
            raw.parse::<f64>().map(TokenKind::Float).map_err(|_| self.err_from(start, LexErrorKind::InvalidNumber))
        } else {
            raw.parse::<i64>().map(TokenKind::Int).map_err(|_| self.err_from(start, LexErrorKind::IntOverflow))
        }
    }

    /* ────────── Spans / erreurs ────────── */

    #[inline]
    fn span_from(&self, start: usize) -> Span { Span::new(self.source, Pos(start as u32), Pos(self.off as u32)) }

    #[inline]
    fn err_from(&self, start: usize, kind: LexErrorKind) -> LexError { LexError { span: self.span_from(start), kind } }
}

/* ─────────────────────────── Helpers ─────────────────────────── */

#[inline]
const fn is_ident_start(c: char) -> bool { c == '_' || c.is_ascii_alphabetic() }

#[inline]
const fn is_ident_continue(c: char) -> bool { c == '_' || c.is_ascii_alphanumeric() }

fn keyword_of(s: &str) -> Option<Keyword> {
    use Keyword::*;
    Some(match s {
        "namespace" => Namespace,
        "class" => Class,
        "fn" => Fn,
        "let" => Let,
        "if" => If,
        "else" => Else,
        "while" => While,
        "return" => Return,
        "true" => True,
        "false" => False,
        "null" => Null,
        _ => return None,
    })
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn toks(src: &str) -> Vec<TokenKind<'_>> {
        Lexer::new(src, SourceId(0)).tokenize().unwrap().into_iter().map(|t| t.value).collect()
    }

    #[test]
    fn idents_keywords() {
        use Keyword::*;
        use TokenKind::*;
        let v = toks("namespace class fn let if else while return true false null greet _x x1");
        assert_eq!(
            v,
            vec![
                Kw(Namespace), Kw(Class), Kw(Fn), Kw(Let), Kw(If), Kw(Else), Kw(While), Kw(Return),
                Kw(True), Kw(False), Kw(Null), Ident("greet"), Ident("_x"), Ident("x1"), Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_floats() {
        use TokenKind::*;
        let v = toks("0xFF 0b1010 123 1_234 12.5 1e3 2.5e-2");
        assert_eq!(v[..5], [Int(255), Int(10), Int(123), Int(1234), Float(12.5)]);
        assert_eq!(v[5], Float(1000.0));
        assert_eq!(v[6], Float(0.025));
    }

    #[test]
    fn strings_escapes_and_utf8() {
        use TokenKind::*;
        let v = toks(r#""hi" "\n" "\x41" "\u{1F600}" "café""#);
        assert_eq!(v[..5], [Str("hi".into()), Str("\n".into()), Str("A".into()), Str("😀".into()), Str("café".into())]);
    }

    #[test]
    fn comments_ws() {
        use TokenKind::*;
        let v = toks("/* a /* nested */ still */ + // line\n 1");
        assert_eq!(v, vec![Plus, Int(1), Eof]);
    }

    #[test]
    fn qualified_call_tokens() {
        use TokenKind::*;
        let v = toks("io.println(\"x\");");
        assert_eq!(v, vec![Ident("io"), Dot, Ident("println"), LParen, Str("x".into()), RParen, Semi, Eof]);
    }

    #[test]
    fn ops_punct() {
        use TokenKind::*;
        let v = toks("-> == != <= >= && || ! + - * / % ( ) { } , . ; : < > =");
        assert_eq!(
            v,
            vec![
                Arrow, EqEq, Ne, Le, Ge, AndAnd, OrOr, Bang, Plus, Minus, Star, Slash, Percent, LParen, RParen,
                LBrace, RBrace, Comma, Dot, Semi, Colon, Lt, Gt, Eq, Eof,
            ]
        );
    }

    #[test]
    fn errors_carry_spans() {
        let err = Lexer::new("let s = \"open", SourceId(3)).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.span.start, Pos(8));
        assert_eq!(err.span.source, SourceId(3));

        let err = Lexer::new("a # b", SourceId(0)).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('#'));
        assert_eq!(err.to_string(), "unexpected character: '#'");

        let err = Lexer::new("/* never closed", SourceId(0)).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedBlockComment);

        let err = Lexer::new("99999999999999999999", SourceId(0)).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::IntOverflow);
    }

    #[test]
    fn linemap_basic() {
        let lm = LineMap::new("a\nbb\nccc");
        assert_eq!(lm.line_col(Pos(0)), (1, 1));
        assert_eq!(lm.line_col(Pos(2)), (2, 1));
        assert_eq!(lm.line_col(Pos(6)), (3, 2));
        assert_eq!(lm.line_count(), 3);
    }

    proptest! {
        #[test]
        fn lexer_never_panics(src in "\\PC{0,64}") {
            let _ = Lexer::new(&src, SourceId(0)).tokenize();
        }
    }
}
