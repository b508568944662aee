//! Pratt parser producing the mapping-expression AST.

use super::lexer::{tokenize, Token};
use super::JsonataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    /// Field access relative to the evaluation context.
    Name(String),
    /// `$` — the current context value.
    ContextRef,
    /// `$$` — the root input document.
    RootRef,
    /// `$name` used as a value (lambda parameter reference).
    VarRef(String),
    /// `lhs.rhs` — map rhs over the lhs sequence.
    Path(Box<Expr>, Box<Expr>),
    /// `lhs[pred]` — index or filter the lhs sequence.
    Filter(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Conditional {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    ObjectCtor(Vec<(Expr, Expr)>),
    ArrayCtor(Vec<Expr>),
    /// `$name(args...)` — function invocation.
    Call(String, Vec<Expr>),
    /// `function($a, $b) { body }`
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Left binding power of an infix/postfix token; 0 means "not an operator".
fn lbp(token: &Token) -> u8 {
    match token {
        Token::Question => 10,
        Token::Or => 20,
        Token::And => 25,
        Token::In
        | Token::Eq
        | Token::Ne
        | Token::Lt
        | Token::Le
        | Token::Gt
        | Token::Ge => 30,
        Token::Amp => 40,
        Token::Plus | Token::Minus => 50,
        Token::Star | Token::Slash | Token::Percent => 60,
        Token::Dot => 75,
        Token::LBracket => 80,
        _ => 0,
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), JsonataError> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(JsonataError::Parse(format!(
                "expected {:?}, found {:?}",
                expected, t
            ))),
            None => Err(JsonataError::Parse(format!(
                "expected {:?}, found end of expression",
                expected
            ))),
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, JsonataError> {
        let mut lhs = self.parse_primary()?;

        while let Some(token) = self.peek() {
            let bp = lbp(token);
            if bp == 0 || bp <= min_bp {
                break;
            }
            let token = self.next().unwrap();
            lhs = match token {
                Token::Dot => {
                    let rhs = self.parse_expr(bp)?;
                    Expr::Path(Box::new(lhs), Box::new(rhs))
                }
                Token::LBracket => {
                    let pred = self.parse_expr(0)?;
                    self.expect(&Token::RBracket)?;
                    Expr::Filter(Box::new(lhs), Box::new(pred))
                }
                Token::Question => {
                    // Right-associative; the branches restart at the lowest
                    // binding power so nested conditionals parse naturally.
                    let then_branch = self.parse_expr(0)?;
                    let else_branch = if self.peek() == Some(&Token::Colon) {
                        self.next();
                        Some(Box::new(self.parse_expr(0)?))
                    } else {
                        None
                    };
                    Expr::Conditional {
                        cond: Box::new(lhs),
                        then_branch: Box::new(then_branch),
                        else_branch,
                    }
                }
                op => {
                    let bin = match op {
                        Token::Or => BinOp::Or,
                        Token::And => BinOp::And,
                        Token::In => BinOp::In,
                        Token::Eq => BinOp::Eq,
                        Token::Ne => BinOp::Ne,
                        Token::Lt => BinOp::Lt,
                        Token::Le => BinOp::Le,
                        Token::Gt => BinOp::Gt,
                        Token::Ge => BinOp::Ge,
                        Token::Amp => BinOp::Concat,
                        Token::Plus => BinOp::Add,
                        Token::Minus => BinOp::Sub,
                        Token::Star => BinOp::Mul,
                        Token::Slash => BinOp::Div,
                        Token::Percent => BinOp::Mod,
                        other => {
                            return Err(JsonataError::Parse(format!(
                                "unexpected operator {:?}",
                                other
                            )))
                        }
                    };
                    let rhs = self.parse_expr(bp)?;
                    Expr::Binary(bin, Box::new(lhs), Box::new(rhs))
                }
            };
        }

        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, JsonataError> {
        match self.next() {
            None => Err(JsonataError::Parse("unexpected end of expression".into())),
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Null) => Ok(Expr::Null),
            Some(Token::Ident(name)) => Ok(Expr::Name(name)),
            Some(Token::Minus) => {
                let operand = self.parse_expr(65)?;
                Ok(Expr::Neg(Box::new(operand)))
            }
            Some(Token::Var(name)) => {
                if name == "$" {
                    return Ok(Expr::RootRef);
                }
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr(0)?);
                            if self.peek() == Some(&Token::Comma) {
                                self.next();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    if name.is_empty() {
                        return Err(JsonataError::Parse(
                            "'$' cannot be called as a function".into(),
                        ));
                    }
                    return Ok(Expr::Call(name, args));
                }
                if name.is_empty() {
                    Ok(Expr::ContextRef)
                } else {
                    Ok(Expr::VarRef(name))
                }
            }
            Some(Token::Function) => {
                self.expect(&Token::LParen)?;
                let mut params = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        match self.next() {
                            Some(Token::Var(p)) if !p.is_empty() && p != "$" => params.push(p),
                            other => {
                                return Err(JsonataError::Parse(format!(
                                    "expected lambda parameter, found {:?}",
                                    other
                                )))
                            }
                        }
                        if self.peek() == Some(&Token::Comma) {
                            self.next();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen)?;
                self.expect(&Token::LBrace)?;
                let body = self.parse_expr(0)?;
                self.expect(&Token::RBrace)?;
                Ok(Expr::Lambda {
                    params,
                    body: Box::new(body),
                })
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr(0)?);
                        if self.peek() == Some(&Token::Comma) {
                            self.next();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::ArrayCtor(items))
            }
            Some(Token::LBrace) => {
                let mut pairs = Vec::new();
                if self.peek() != Some(&Token::RBrace) {
                    loop {
                        let key = self.parse_expr(0)?;
                        self.expect(&Token::Colon)?;
                        let value = self.parse_expr(0)?;
                        pairs.push((key, value));
                        if self.peek() == Some(&Token::Comma) {
                            self.next();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::ObjectCtor(pairs))
            }
            Some(other) => Err(JsonataError::Parse(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}

pub fn parse(input: &str) -> Result<Expr, JsonataError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(JsonataError::Parse("empty expression".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(JsonataError::Parse(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(expr)
}
