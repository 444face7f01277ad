//! Restricted arithmetic expressions for formula curves.
//!
//! Formulas are parsed once into an [`Expr`] tree and then evaluated by a
//! small interpreter. The grammar has no loops, assignments, or I/O, so
//! evaluation always terminates and depends only on the supplied variables.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | power
//! power   := atom ('^' unary)?
//! atom    := number | ident | ident '(' args ')' | '(' expr ')'
//! ```

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while parsing or evaluating a formula.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{found}' at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

/// Built-in functions. The set is closed; unknown names fail at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    Min,
    Max,
    Abs,
    Floor,
    Ceil,
    Round,
    Sqrt,
    Ln,
    Log10,
    Exp,
    Pow,
    Clamp,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Function::Min,
            "max" => Function::Max,
            "abs" => Function::Abs,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "round" => Function::Round,
            "sqrt" => Function::Sqrt,
            "ln" => Function::Ln,
            "log10" => Function::Log10,
            "exp" => Function::Exp,
            "pow" => Function::Pow,
            "clamp" => Function::Clamp,
            _ => return None,
        })
    }

    /// Accepted argument counts as `(min, max)`.
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Min | Function::Max => (1, usize::MAX),
            Function::Pow => (2, 2),
            Function::Clamp => (3, 3),
            _ => (1, 1),
        }
    }
}

/// A parsed formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Parse a formula string.
    pub fn parse(source: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some((tok, offset)) => Err(ExprError::UnexpectedToken {
                found: tok.to_string(),
                offset: *offset,
            }),
        }
    }

    /// Evaluate against a variable lookup. Unknown variables are errors.
    pub fn eval<F>(&self, lookup: &F) -> Result<f64, ExprError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = match self {
            Expr::Number(v) => *v,
            Expr::Variable(name) => {
                lookup(name).ok_or_else(|| ExprError::UnknownVariable(name.clone()))?
            }
            Expr::Negate(inner) => -inner.eval(lookup)?,
            Expr::Binary { op, left, right } => {
                let l = left.eval(lookup)?;
                let r = right.eval(lookup)?;
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Subtract => l - r,
                    BinaryOp::Multiply => l * r,
                    BinaryOp::Divide => {
                        if r == 0.0 {
                            return Err(ExprError::DivisionByZero);
                        }
                        l / r
                    }
                    BinaryOp::Modulo => {
                        if r == 0.0 {
                            return Err(ExprError::DivisionByZero);
                        }
                        l % r
                    }
                    BinaryOp::Power => l.powf(r),
                }
            }
            Expr::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(lookup))
                    .collect::<Result<Vec<f64>, ExprError>>()?;
                apply_function(*function, &values)
            }
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExprError::NonFinite)
        }
    }

    /// Names of all variables referenced by the expression.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => out.push(name),
            Expr::Negate(inner) => inner.collect_variables(out),
            Expr::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_variables(out);
                }
            }
        }
    }
}

fn apply_function(function: Function, v: &[f64]) -> f64 {
    match function {
        Function::Min => v.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Max => v.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Function::Abs => v[0].abs(),
        Function::Floor => v[0].floor(),
        Function::Ceil => v[0].ceil(),
        Function::Round => v[0].round(),
        Function::Sqrt => v[0].sqrt(),
        Function::Ln => v[0].ln(),
        Function::Log10 => v[0].log10(),
        Function::Exp => v[0].exp(),
        Function::Pow => v[0].powf(v[1]),
        Function::Clamp => v[0].max(v[1]).min(v[2]),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(s) => f.write_str(s),
            Token::Op(c) => write!(f, "{c}"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, ch) = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                // Scientific notation: 1e3, 2.5E-4.
                if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].1.is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].1.is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::InvalidNumber(text.clone()))?;
                tokens.push((Token::Number(value), offset));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
                tokens.push((Token::Ident(text), offset));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push((Token::Op(ch), offset));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, offset));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, offset));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, offset));
                i += 1;
            }
            other => return Err(ExprError::UnexpectedChar { ch: other, offset }),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<(Token, usize), ExprError> {
        let tok = self.tokens.get(self.pos).cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, want: Token) -> Result<(), ExprError> {
        let (tok, offset) = self.next()?;
        if tok == want {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken {
                found: tok.to_string(),
                offset,
            })
        }
    }

    fn peek_op(&self) -> Option<char> {
        match self.peek() {
            Some((Token::Op(c), _)) => Some(*c),
            _ => None,
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        while let Some(c @ ('+' | '-')) = self.peek_op() {
            self.pos += 1;
            let right = self.term()?;
            let op = if c == '+' {
                BinaryOp::Add
            } else {
                BinaryOp::Subtract
            };
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        while let Some(c @ ('*' | '/' | '%')) = self.peek_op() {
            self.pos += 1;
            let right = self.unary()?;
            let op = match c {
                '*' => BinaryOp::Multiply,
                '/' => BinaryOp::Divide,
                _ => BinaryOp::Modulo,
            };
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek_op() == Some('-') {
            self.pos += 1;
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.atom()?;
        if self.peek_op() == Some('^') {
            self.pos += 1;
            // Right-associative: 2^3^2 == 2^(3^2).
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Power,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        let (tok, offset) = self.next()?;
        match tok {
            Token::Number(v) => Ok(Expr::Number(v)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if matches!(self.peek(), Some((Token::LParen, _))) {
                    self.pos += 1;
                    let function = Function::from_name(&name)
                        .ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
                    let args = self.args()?;
                    let (min, max) = function.arity();
                    if args.len() < min || args.len() > max {
                        return Err(ExprError::Arity {
                            name,
                            expected: min,
                            got: args.len(),
                        });
                    }
                    Ok(Expr::Call { function, args })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.to_string(),
                offset,
            }),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some((Token::RParen, _))) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            let (tok, offset) = self.next()?;
            match tok {
                Token::Comma => continue,
                Token::RParen => break,
                other => {
                    return Err(ExprError::UnexpectedToken {
                        found: other.to_string(),
                        offset,
                    });
                }
            }
        }
        Ok(args)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
