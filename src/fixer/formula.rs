//! Arithmetic formulas for derived variables
//!
//! Grammar: `+ - * /`, unary minus, parentheses, numeric literals and
//! variable names. Names may start with a digit (`2t`, `10u`) as long as
//! they are not valid numbers.

use crate::dataset::{Dataset, Field};
use crate::errors::{ClimNormError, Result};
use ndarray::ArrayD;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Name(String),
    Op(char),
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Bin(char, Box<Expr>, Box<Expr>),
}

/// A parsed derived-variable formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    text: String,
    expr: Expr,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let err = |message: String| ClimNormError::Formula {
        formula: text.to_string(),
        message,
    };
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    // exponent sign of a numeric literal such as 1e-3
                    i += 1;
                    if i < chars.len()
                        && (chars[i] == '-' || chars[i] == '+')
                        && matches!(chars[i - 1], 'e' | 'E')
                        && chars[start..i - 1].iter().all(|c| c.is_ascii_digit() || *c == '.')
                        && i > start + 1
                    {
                        i += 1;
                    }
                }
                let word: String = chars[start..i].iter().collect();
                match word.parse::<f64>() {
                    Ok(v) => tokens.push(Token::Num(v)),
                    Err(_) => tokens.push(Token::Name(word)),
                }
            }
            other => return Err(err(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    text: &'a str,
}

impl<'a> Parser<'a> {
    fn err(&self, message: &str) -> ClimNormError {
        ClimNormError::Formula {
            formula: self.text.to_string(),
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Num(v)) => Ok(Expr::Num(v)),
            Some(Token::Name(n)) => Ok(Expr::Var(n)),
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(self.err("missing closing parenthesis")),
                }
            }
            Some(tok) => Err(self.err(&format!("unexpected token {tok:?}"))),
            None => Err(self.err("unexpected end of formula")),
        }
    }
}

/// Intermediate evaluation value
enum Value {
    Scalar(f64),
    Array(Field),
}

impl Formula {
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            text,
        };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(parser.err("trailing input"));
        }
        Ok(Self {
            text: text.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Variable names referenced by the formula, in order of first appearance
    pub fn operands(&self) -> Vec<&str> {
        fn walk<'e>(e: &'e Expr, out: &mut Vec<&'e str>) {
            match e {
                Expr::Num(_) => {}
                Expr::Var(v) => {
                    if !out.contains(&v.as_str()) {
                        out.push(v);
                    }
                }
                Expr::Neg(inner) => walk(inner, out),
                Expr::Bin(_, l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.expr, &mut out);
        out
    }

    /// Evaluate against the fields of `ds`.
    ///
    /// The result takes its dimensions and attributes from the first operand.
    pub fn evaluate(&self, ds: &Dataset) -> Result<Field> {
        match self.eval(&self.expr, ds)? {
            Value::Array(f) => {
                let mut f = f;
                f.attrs.remove("units");
                f.unit_fix = None;
                Ok(f)
            }
            Value::Scalar(_) => Err(ClimNormError::Formula {
                formula: self.text.clone(),
                message: "formula does not reference any variable".to_string(),
            }),
        }
    }

    fn eval(&self, e: &Expr, ds: &Dataset) -> Result<Value> {
        Ok(match e {
            Expr::Num(v) => Value::Scalar(*v),
            Expr::Var(name) => Value::Array(
                ds.field(name)
                    .cloned()
                    .ok_or_else(|| ClimNormError::VariableNotFound { var: name.clone() })?,
            ),
            Expr::Neg(inner) => match self.eval(inner, ds)? {
                Value::Scalar(v) => Value::Scalar(-v),
                Value::Array(f) => {
                    let data = f.data.mapv(|v| -v);
                    Value::Array(f.with_data(data))
                }
            },
            Expr::Bin(op, l, r) => {
                let l = self.eval(l, ds)?;
                let r = self.eval(r, ds)?;
                let apply = |a: f64, b: f64| match *op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    _ => a / b,
                };
                match (l, r) {
                    (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(apply(a, b)),
                    (Value::Array(f), Value::Scalar(b)) => {
                        let data = f.data.mapv(|a| apply(a, b));
                        Value::Array(f.with_data(data))
                    }
                    (Value::Scalar(a), Value::Array(f)) => {
                        let data = f.data.mapv(|b| apply(a, b));
                        Value::Array(f.with_data(data))
                    }
                    (Value::Array(f), Value::Array(g)) => {
                        if f.dims != g.dims || f.data.shape() != g.data.shape() {
                            return Err(ClimNormError::Formula {
                                formula: self.text.clone(),
                                message: format!(
                                    "operands have different shapes {:?} and {:?}",
                                    f.data.shape(),
                                    g.data.shape()
                                ),
                            });
                        }
                        let mut data: ArrayD<f64> = f.data.clone();
                        data.zip_mut_with(&g.data, |a, &b| *a = apply(*a, b));
                        Value::Array(f.with_data(data))
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn ds() -> Dataset {
        let mut ds = Dataset::new();
        let a = ArrayD::from_shape_vec(vec![3], vec![1.0, 2.0, 3.0]).unwrap();
        let b = ArrayD::from_shape_vec(vec![3], vec![10.0, 20.0, 30.0]).unwrap();
        ds.insert_field("2t", Field::new(&["time"], a).unwrap().with_units("K"));
        ds.insert_field("lsp", Field::new(&["time"], b).unwrap());
        ds
    }

    #[test]
    fn operands_allow_leading_digits() {
        let f = Formula::parse("(2t + lsp) * 2t").unwrap();
        assert_eq!(f.operands(), vec!["2t", "lsp"]);
    }

    #[test]
    fn precedence_and_literals() {
        let f = Formula::parse("-2t + lsp / 1e1").unwrap();
        let out = f.evaluate(&ds()).unwrap();
        assert_eq!(out.data.as_slice().unwrap(), &[0.0, 0.0, 0.0]);
        assert!(out.units().is_none());
    }

    #[test]
    fn missing_operand() {
        let f = Formula::parse("2t + cp").unwrap();
        assert!(matches!(
            f.evaluate(&ds()),
            Err(ClimNormError::VariableNotFound { var }) if var == "cp"
        ));
    }

    #[test]
    fn malformed() {
        assert!(Formula::parse("2t +").is_err());
        assert!(Formula::parse("(2t").is_err());
        assert!(Formula::parse("2t $ 3").is_err());
        assert!(Formula::parse("3 * 4").unwrap().evaluate(&ds()).is_err());
    }
}
