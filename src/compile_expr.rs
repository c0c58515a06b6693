use crate::error::CompileError;
use serde::Serialize;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprAst {
    Integer(i64),
    Number(f64),
    Str(String),
    Bool(bool),
    Missing,
    Identifier(String),
    /// Qualified access to an external namespace member, e.g. `Consts.pi`.
    Path(Vec<String>),
    /// `:name`
    Symbol(String),
    /// `$x`, `$"x"`, `$1`, `$(expr)`
    Dollar(Box<ExprAst>),
    /// `{sel}` / `{{sel}}`; `{}` has no selector and is only valid inside sink targets.
    Braced {
        kind: BraceKind,
        inner: Option<Box<ExprAst>>,
    },
    /// `^(expr)`
    Escape(Box<ExprAst>),
    Call {
        name: String,
        args: Vec<ExprAst>,
        broadcast: bool,
    },
    Unary {
        op: UnaryOp,
        expr: Box<ExprAst>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ExprAst>,
        rhs: Box<ExprAst>,
    },
    Assign {
        target: Box<ExprAst>,
        value: Box<ExprAst>,
    },
    Block(Vec<ExprAst>),
    Tuple(Vec<ExprAst>),
    List(Vec<ExprAst>),
    Annotated {
        name: String,
        args: Vec<ExprAst>,
    },
    /// Positional parameter of a synthesized closure. Never produced by the parser.
    Param(usize),
    /// Internal variable introduced by the astable rewrite. Never produced by the parser.
    Local(u32),
    /// Named record literal closing an astable block. Never produced by the parser.
    Record(Vec<(String, ExprAst)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BraceKind {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

impl UnaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Not => "~",
        }
    }

    /// Builtin the operator lowers to; `-x` and `+x` do not share the binary names.
    pub const fn callee(self) -> &'static str {
        match self {
            Self::Plus => "pos",
            Self::Minus => "neg",
            Self::Not => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "&",
            Self::Or => "|",
        }
    }
}

impl ExprAst {
    pub fn call(name: impl Into<String>, args: Vec<ExprAst>) -> Self {
        Self::Call {
            name: name.into(),
            args,
            broadcast: false,
        }
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    /// Rebuilds the node with every direct child replaced by `f(child)`.
    pub fn try_map_children<E>(
        &self,
        mut f: impl FnMut(&ExprAst) -> Result<ExprAst, E>,
    ) -> Result<ExprAst, E> {
        Ok(match self {
            Self::Integer(_)
            | Self::Number(_)
            | Self::Str(_)
            | Self::Bool(_)
            | Self::Missing
            | Self::Identifier(_)
            | Self::Path(_)
            | Self::Symbol(_)
            | Self::Param(_)
            | Self::Local(_) => self.clone(),
            Self::Call {
                name,
                args,
                broadcast,
            } => Self::Call {
                name: name.clone(),
                args: map_all(args, &mut f)?,
                broadcast: *broadcast,
            },
            Self::Block(list) => Self::Block(map_all(list, &mut f)?),
            Self::Tuple(list) => Self::Tuple(map_all(list, &mut f)?),
            Self::List(list) => Self::List(map_all(list, &mut f)?),
            Self::Annotated { name, args } => Self::Annotated {
                name: name.clone(),
                args: map_all(args, &mut f)?,
            },
            Self::Dollar(inner) => Self::Dollar(Box::new(f(inner)?)),
            Self::Escape(inner) => Self::Escape(Box::new(f(inner)?)),
            Self::Braced { kind, inner } => Self::Braced {
                kind: *kind,
                inner: match inner {
                    Some(inner) => Some(Box::new(f(inner)?)),
                    None => None,
                },
            },
            Self::Unary { op, expr } => Self::Unary {
                op: *op,
                expr: Box::new(f(expr)?),
            },
            Self::Binary { op, lhs, rhs } => Self::Binary {
                op: *op,
                lhs: Box::new(f(lhs)?),
                rhs: Box::new(f(rhs)?),
            },
            Self::Assign { target, value } => Self::Assign {
                target: Box::new(f(target)?),
                value: Box::new(f(value)?),
            },
            Self::Record(fields) => {
                let mut out = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    out.push((name.clone(), f(value)?));
                }
                Self::Record(out)
            }
        })
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<&ExprAst> {
        match self {
            Self::Integer(_)
            | Self::Number(_)
            | Self::Str(_)
            | Self::Bool(_)
            | Self::Missing
            | Self::Identifier(_)
            | Self::Path(_)
            | Self::Symbol(_)
            | Self::Param(_)
            | Self::Local(_) => Vec::new(),
            Self::Dollar(inner) | Self::Escape(inner) => vec![inner.as_ref()],
            Self::Braced { inner, .. } => inner.iter().map(|e| e.as_ref()).collect(),
            Self::Call { args, .. } => args.iter().collect(),
            Self::Unary { expr, .. } => vec![expr.as_ref()],
            Self::Binary { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            Self::Assign { target, value } => vec![target.as_ref(), value.as_ref()],
            Self::Block(items) | Self::Tuple(items) | Self::List(items) => items.iter().collect(),
            Self::Annotated { args, .. } => args.iter().collect(),
            Self::Record(fields) => fields.iter().map(|(_, e)| e).collect(),
        }
    }
}

impl fmt::Display for ExprAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Missing => f.write_str("missing"),
            Self::Identifier(name) => f.write_str(name),
            Self::Path(parts) => f.write_str(&parts.join(".")),
            Self::Symbol(name) => write!(f, ":{name}"),
            Self::Dollar(inner) => match inner.as_ref() {
                ExprAst::Identifier(_)
                | ExprAst::Str(_)
                | ExprAst::Integer(_)
                | ExprAst::Symbol(_) => write!(f, "${inner}"),
                _ => write!(f, "$({inner})"),
            },
            Self::Braced { kind, inner } => {
                let (open, close) = match kind {
                    BraceKind::Single => ("{", "}"),
                    BraceKind::Double => ("{{", "}}"),
                };
                match inner {
                    Some(inner) => write!(f, "{open}{inner}{close}"),
                    None => write!(f, "{open}{close}"),
                }
            }
            Self::Escape(inner) => write!(f, "^({inner})"),
            Self::Call {
                name,
                args,
                broadcast,
            } => {
                f.write_str(name)?;
                if *broadcast {
                    f.write_str(".")?;
                }
                write!(f, "(")?;
                write_joined(f, args)?;
                write!(f, ")")
            }
            Self::Unary { op, expr } => write!(f, "{}{}", op.symbol(), expr),
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::Assign { target, value } => write!(f, "{target} = {value}"),
            Self::Block(items) => {
                f.write_str("begin ")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(" end")
            }
            Self::Tuple(items) => {
                write!(f, "(")?;
                write_joined(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                write!(f, ")")
            }
            Self::List(items) => {
                write!(f, "[")?;
                write_joined(f, items)?;
                write!(f, "]")
            }
            Self::Annotated { name, args } => {
                write!(f, "@{name}(")?;
                write_joined(f, args)?;
                write!(f, ")")
            }
            Self::Param(idx) => write!(f, "#arg{idx}"),
            Self::Local(id) => write!(f, "#tmp{id}"),
            Self::Record(fields) => {
                write!(f, "(")?;
                for (idx, (name, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn map_all<E>(
    items: &[ExprAst],
    f: &mut impl FnMut(&ExprAst) -> Result<ExprAst, E>,
) -> Result<Vec<ExprAst>, E> {
    items.iter().map(|item| f(item)).collect()
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[ExprAst]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    /// Identifier directly followed by `.(`, e.g. `f.(x)`.
    DotCall(String),
    Symbol(String),
    /// `@name` followed by whitespace or an expression.
    At(String),
    /// `@name(` with the parenthesis attached.
    AtCall(String),
    Integer(i64),
    Number(f64),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    Amp,
    Pipe,
    Tilde,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    Comma,
    Equal,
    Dollar,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Semi,
    Eof,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    depth: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            depth: 0,
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        if self.skip_ws() {
            return Ok(Token::Semi);
        }
        let Some(&ch) = self.chars.peek() else {
            return Ok(Token::Eof);
        };
        let single = match ch {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '&' => Some(Token::Amp),
            '|' => Some(Token::Pipe),
            '~' => Some(Token::Tilde),
            ',' => Some(Token::Comma),
            '$' => Some(Token::Dollar),
            '^' => Some(Token::Caret),
            ';' => Some(Token::Semi),
            '(' => Some(Token::LParen),
            '[' => Some(Token::LBracket),
            '{' => Some(Token::LBrace),
            ')' => Some(Token::RParen),
            ']' => Some(Token::RBracket),
            '}' => Some(Token::RBrace),
            _ => None,
        };
        if let Some(tok) = single {
            self.chars.next();
            match tok {
                Token::LParen | Token::LBracket | Token::LBrace => self.depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    self.depth = self.depth.saturating_sub(1)
                }
                _ => {}
            }
            return Ok(tok);
        }
        match ch {
            '<' => {
                self.chars.next();
                Ok(self.with_eq(Token::Le, Token::Lt))
            }
            '>' => {
                self.chars.next();
                Ok(self.with_eq(Token::Ge, Token::Gt))
            }
            '=' => {
                self.chars.next();
                Ok(self.with_eq(Token::EqEq, Token::Equal))
            }
            '!' => {
                self.chars.next();
                if matches!(self.chars.peek(), Some('=')) {
                    self.chars.next();
                    Ok(Token::NotEq)
                } else {
                    Err(CompileError::InvalidExpression {
                        expr: "!".to_string(),
                        reason: "unexpected character `!` (did you mean `!=` or `~`?)".to_string(),
                    })
                }
            }
            ':' => {
                self.chars.next();
                match self.chars.peek() {
                    Some(&c) if is_ident_start(c) => Ok(Token::Symbol(self.read_ident(false))),
                    _ => Err(CompileError::InvalidExpression {
                        expr: ":".to_string(),
                        reason: "`:` must be followed by a column name".to_string(),
                    }),
                }
            }
            '@' => {
                self.chars.next();
                match self.chars.peek() {
                    Some(&c) if is_ident_start(c) => {
                        let name = self.read_ident(false);
                        if matches!(self.chars.peek(), Some('(')) {
                            self.chars.next();
                            self.depth += 1;
                            Ok(Token::AtCall(name))
                        } else {
                            Ok(Token::At(name))
                        }
                    }
                    _ => Err(CompileError::InvalidExpression {
                        expr: "@".to_string(),
                        reason: "`@` must be followed by an annotation name".to_string(),
                    }),
                }
            }
            '"' => {
                self.chars.next();
                self.read_string().map(Token::Str)
            }
            c if is_ident_start(c) => {
                let name = self.read_ident(true);
                if let Some(stripped) = name.strip_suffix('.') {
                    if matches!(self.chars.peek(), Some('(')) {
                        return Ok(Token::DotCall(stripped.to_string()));
                    }
                    return Err(CompileError::InvalidExpression {
                        expr: name.clone(),
                        reason: format!("dangling `.` after `{stripped}`"),
                    });
                }
                Ok(Token::Ident(name))
            }
            c if c.is_ascii_digit() || c == '.' => {
                let raw = self.read_number();
                if raw.bytes().all(|b| b.is_ascii_digit()) {
                    return raw
                        .parse::<i64>()
                        .map(Token::Integer)
                        .map_err(|_| CompileError::InvalidExpression {
                            expr: raw.clone(),
                            reason: format!("integer `{raw}` out of range"),
                        });
                }
                let num = raw
                    .parse::<f64>()
                    .map_err(|_| CompileError::InvalidExpression {
                        expr: raw.clone(),
                        reason: format!("invalid number `{raw}`"),
                    })?;
                Ok(Token::Number(num))
            }
            other => Err(CompileError::InvalidExpression {
                expr: other.to_string(),
                reason: format!("unexpected character `{other}`"),
            }),
        }
    }

    fn with_eq(&mut self, with: Token, without: Token) -> Token {
        if matches!(self.chars.peek(), Some('=')) {
            self.chars.next();
            with
        } else {
            without
        }
    }

    /// Skips whitespace and comments. Returns true when a statement-separating
    /// newline (outside any bracket) was consumed.
    fn skip_ws(&mut self) -> bool {
        let mut separated = false;
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                if self.depth == 0 {
                    separated = true;
                }
                self.chars.next();
            } else if c.is_whitespace() {
                self.chars.next();
            } else if c == '#' {
                while matches!(self.chars.peek(), Some(c) if *c != '\n') {
                    self.chars.next();
                }
            } else {
                break;
            }
        }
        separated
    }

    fn read_ident(&mut self, allow_dots: bool) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if is_ident_continue(c) || (allow_dots && c == '.') {
                out.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        out
    }

    fn read_string(&mut self) -> Result<String, CompileError> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(CompileError::InvalidExpression {
            expr: format!("\"{out}"),
            reason: "unterminated string literal".to_string(),
        })
    }

    fn read_number(&mut self) -> String {
        let mut out = String::new();
        let mut seen_dot = false;
        let mut seen_exp = false;

        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.chars.next();
                continue;
            }
            if c == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                out.push(c);
                self.chars.next();
                continue;
            }
            if (c == 'e' || c == 'E') && !seen_exp {
                seen_exp = true;
                out.push(c);
                self.chars.next();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        out.push(sign);
                        self.chars.next();
                    }
                }
                continue;
            }
            break;
        }
        out
    }
}

#[inline]
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parses one formula argument. Leading and trailing separators are ignored.
pub fn parse_expression(source: &str) -> Result<ExprAst, CompileError> {
    let mut parser = Parser::new(source);
    parser.skip_separators()?;
    let expr = parser.parse_statement()?;
    parser.skip_separators()?;
    match parser.next_token()? {
        Token::Eof => Ok(expr),
        other => Err(CompileError::InvalidExpression {
            expr: source.to_string(),
            reason: format!("unexpected trailing token: {other:?}"),
        }),
    }
}

struct Parser<'a> {
    source: &'a str,
    lexer: Lexer<'a>,
    lookahead: Option<Token>,
    last_items_had_trailing_comma: bool,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            lexer: Lexer::new(source),
            lookahead: None,
            last_items_had_trailing_comma: false,
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        if let Some(tok) = self.lookahead.take() {
            return Ok(tok);
        }
        self.lexer.next_token()
    }

    fn peek_token(&mut self) -> Result<Token, CompileError> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        Ok(self.lookahead.clone().expect("lookahead just initialized"))
    }

    fn skip_separators(&mut self) -> Result<(), CompileError> {
        while matches!(self.peek_token()?, Token::Semi) {
            self.next_token()?;
        }
        Ok(())
    }

    fn error(&self, reason: impl Into<String>) -> CompileError {
        CompileError::InvalidExpression {
            expr: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn parse_statement(&mut self) -> Result<ExprAst, CompileError> {
        if let Token::At(_) = self.peek_token()? {
            let Token::At(name) = self.next_token()? else {
                unreachable!("peeked annotation token");
            };
            let body = self.parse_statement()?;
            return Ok(ExprAst::Annotated {
                name,
                args: vec![body],
            });
        }
        let lhs = self.parse_expr()?;
        if matches!(self.peek_token()?, Token::Equal) {
            self.next_token()?;
            let value = self.parse_statement()?;
            return Ok(ExprAst::Assign {
                target: Box::new(lhs),
                value: Box::new(value),
            });
        }
        Ok(lhs)
    }

    fn parse_expr(&mut self) -> Result<ExprAst, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ExprAst, CompileError> {
        let mut lhs = self.parse_and()?;
        while let Token::Pipe = self.peek_token()? {
            self.next_token()?;
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<ExprAst, CompileError> {
        let mut lhs = self.parse_compare()?;
        while let Token::Amp = self.peek_token()? {
            self.next_token()?;
            let rhs = self.parse_compare()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<ExprAst, CompileError> {
        let mut lhs = self.parse_add_sub()?;
        loop {
            let op = match self.peek_token()? {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_add_sub()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_add_sub(&mut self) -> Result<ExprAst, CompileError> {
        let mut lhs = self.parse_mul_div()?;
        loop {
            let op = match self.peek_token()? {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_mul_div()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_mul_div(&mut self) -> Result<ExprAst, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_token()? {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<ExprAst, CompileError> {
        let op = match self.peek_token()? {
            Token::Plus => UnaryOp::Plus,
            Token::Minus => UnaryOp::Minus,
            Token::Tilde => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.next_token()?;
        let expr = self.parse_unary()?;
        Ok(ExprAst::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_primary(&mut self) -> Result<ExprAst, CompileError> {
        match self.next_token()? {
            Token::Ident(name) => self.parse_identifier(name),
            Token::DotCall(name) => {
                self.expect_token(Token::LParen)?;
                let args = self.parse_items(Token::RParen)?;
                Ok(ExprAst::Call {
                    name,
                    args,
                    broadcast: true,
                })
            }
            Token::Symbol(name) => Ok(ExprAst::Symbol(name)),
            Token::Integer(value) => Ok(ExprAst::Integer(value)),
            Token::Number(value) => Ok(ExprAst::Number(value)),
            Token::Str(value) => Ok(ExprAst::Str(value)),
            Token::Dollar => self.parse_dollar(),
            Token::Caret => {
                self.expect_token(Token::LParen)?;
                let inner = self.parse_expr()?;
                self.expect_token(Token::RParen)?;
                Ok(ExprAst::Escape(Box::new(inner)))
            }
            Token::LBrace => self.parse_braced(),
            Token::LParen => {
                let mut items = self.parse_items(Token::RParen)?;
                if items.len() == 1 && !self.last_items_had_trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(ExprAst::Tuple(items))
                }
            }
            Token::LBracket => Ok(ExprAst::List(self.parse_items(Token::RBracket)?)),
            Token::At(name) => {
                let body = self.parse_expr()?;
                Ok(ExprAst::Annotated {
                    name,
                    args: vec![body],
                })
            }
            Token::AtCall(name) => {
                let args = self.parse_statement_items()?;
                Ok(ExprAst::Annotated { name, args })
            }
            other => Err(self.error(format!("unexpected token: {other:?}"))),
        }
    }

    fn parse_identifier(&mut self, name: String) -> Result<ExprAst, CompileError> {
        match name.as_str() {
            "true" => return Ok(ExprAst::Bool(true)),
            "false" => return Ok(ExprAst::Bool(false)),
            "missing" => return Ok(ExprAst::Missing),
            "begin" => return self.parse_block(),
            "end" => return Err(self.error("unexpected `end`")),
            _ => {}
        }
        if matches!(self.peek_token()?, Token::LParen) {
            self.next_token()?;
            let args = self.parse_items(Token::RParen)?;
            return Ok(ExprAst::Call {
                name,
                args,
                broadcast: false,
            });
        }
        if name.contains('.') {
            let parts: Vec<String> = name.split('.').map(str::to_string).collect();
            if parts.iter().any(|p| p.is_empty()) {
                return Err(self.error(format!("malformed qualified name `{name}`")));
            }
            return Ok(ExprAst::Path(parts));
        }
        Ok(ExprAst::Identifier(name))
    }

    fn parse_dollar(&mut self) -> Result<ExprAst, CompileError> {
        let inner = match self.next_token()? {
            Token::Str(value) => ExprAst::Str(value),
            Token::Integer(value) => ExprAst::Integer(value),
            Token::Symbol(name) => ExprAst::Symbol(name),
            Token::Ident(name) if !name.contains('.') => ExprAst::Identifier(name),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect_token(Token::RParen)?;
                inner
            }
            Token::LBracket => ExprAst::List(self.parse_items(Token::RBracket)?),
            other => return Err(self.error(format!("invalid token after `$`: {other:?}"))),
        };
        Ok(ExprAst::Dollar(Box::new(inner)))
    }

    fn parse_braced(&mut self) -> Result<ExprAst, CompileError> {
        if matches!(self.peek_token()?, Token::RBrace) {
            self.next_token()?;
            return Ok(ExprAst::Braced {
                kind: BraceKind::Single,
                inner: None,
            });
        }
        if matches!(self.peek_token()?, Token::LBrace) {
            self.next_token()?;
            let inner = self.parse_expr()?;
            self.expect_token(Token::RBrace)?;
            self.expect_token(Token::RBrace)?;
            return Ok(ExprAst::Braced {
                kind: BraceKind::Double,
                inner: Some(Box::new(inner)),
            });
        }
        let inner = self.parse_expr()?;
        self.expect_token(Token::RBrace)?;
        Ok(ExprAst::Braced {
            kind: BraceKind::Single,
            inner: Some(Box::new(inner)),
        })
    }

    fn parse_block(&mut self) -> Result<ExprAst, CompileError> {
        let mut items = Vec::new();
        loop {
            self.skip_separators()?;
            match self.peek_token()? {
                Token::Ident(name) if name == "end" => {
                    self.next_token()?;
                    return Ok(ExprAst::Block(items));
                }
                Token::Eof => return Err(self.error("unexpected EOF in `begin` block")),
                _ => {}
            }
            items.push(self.parse_statement()?);
            match self.peek_token()? {
                Token::Semi => {}
                Token::Ident(name) if name == "end" => {}
                other => {
                    return Err(self.error(format!("expected `;` or `end`, got {other:?}")));
                }
            }
        }
    }

    fn parse_items(&mut self, close: Token) -> Result<Vec<ExprAst>, CompileError> {
        self.parse_delimited(close, Self::parse_expr)
    }

    fn parse_statement_items(&mut self) -> Result<Vec<ExprAst>, CompileError> {
        self.parse_delimited(Token::RParen, Self::parse_statement)
    }

    fn parse_delimited(
        &mut self,
        close: Token,
        mut item: impl FnMut(&mut Self) -> Result<ExprAst, CompileError>,
    ) -> Result<Vec<ExprAst>, CompileError> {
        let mut items = Vec::new();
        self.last_items_had_trailing_comma = false;
        loop {
            let next = self.peek_token()?;
            if next == close {
                self.next_token()?;
                break;
            }
            if next == Token::Eof {
                return Err(self.error("unexpected EOF in argument list"));
            }
            items.push(item(self)?);
            self.last_items_had_trailing_comma = false;
            match self.next_token()? {
                Token::Comma => {
                    self.last_items_had_trailing_comma = true;
                }
                tok if tok == close => break,
                other => {
                    return Err(self.error(format!("invalid token in argument list: {other:?}")));
                }
            }
        }
        Ok(items)
    }

    fn expect_token(&mut self, expected: Token) -> Result<(), CompileError> {
        let got = self.next_token()?;
        if got == expected {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, got {got:?}")))
        }
    }
}

fn binary(op: BinaryOp, lhs: ExprAst, rhs: ExprAst) -> ExprAst {
    ExprAst::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
