//! Token stream → AST recursive-descent parser (§4.1).
//!
//! The parser is total: it never panics or aborts the process. Every
//! failure path returns `EngineError::Parse { offset, expected }`.

use crate::cel::ast::{ComparisonOp, LogicalOp, MethodName, Node, PropertyPath, UnaryOp, Value};
use crate::cel::lexer::{Lexer, Spanned, Token};
use crate::error::{EngineError, Result};

pub fn parse(src: &str) -> Result<Node> {
    let tokens = Lexer::new(src)
        .tokenize()
        .map_err(|(offset, msg)| EngineError::parse(offset, [msg]))?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(node)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn error(&self, expected: impl IntoIterator<Item = impl Into<String>>) -> EngineError {
        EngineError::parse(self.offset(), expected)
    }

    fn expect_eof(&self) -> Result<()> {
        if *self.peek() == Token::Eof {
            Ok(())
        } else {
            Err(self.error(["<eof>"]))
        }
    }

    // expr := orExpr
    fn parse_expr(&mut self) -> Result<Node> {
        self.parse_or()
    }

    // orExpr := andExpr ('||' andExpr)*
    fn parse_or(&mut self) -> Result<Node> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Token::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Node::Logical { lhs: Box::new(lhs), op: LogicalOp::Or, rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    // andExpr := notExpr ('&&' notExpr)*
    fn parse_and(&mut self) -> Result<Node> {
        let mut lhs = self.parse_not()?;
        while *self.peek() == Token::And {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Node::Logical { lhs: Box::new(lhs), op: LogicalOp::And, rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    // notExpr := '!'? cmpExpr
    fn parse_not(&mut self) -> Result<Node> {
        if *self.peek() == Token::Not {
            self.advance();
            let operand = self.parse_cmp()?;
            Ok(Node::Unary { op: UnaryOp::Not, operand: Box::new(operand) })
        } else {
            self.parse_cmp()
        }
    }

    // cmpExpr := unary (('=='|'!='|'<'|'<='|'>'|'>='|'in') unary)?
    fn parse_cmp(&mut self) -> Result<Node> {
        let lhs = self.parse_unary()?;
        let op = match self.peek() {
            Token::Eq => ComparisonOp::Eq,
            Token::Ne => ComparisonOp::Ne,
            Token::Lt => ComparisonOp::Lt,
            Token::Le => ComparisonOp::Le,
            Token::Gt => ComparisonOp::Gt,
            Token::Ge => ComparisonOp::Ge,
            Token::In => ComparisonOp::In,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_unary()?;
        Ok(Node::Comparison { lhs: Box::new(lhs), op, rhs: Box::new(rhs) })
    }

    // unary := '-'? primary
    fn parse_unary(&mut self) -> Result<Node> {
        if *self.peek() == Token::Minus {
            self.advance();
            let operand = self.parse_primary()?;
            Ok(Node::Unary { op: UnaryOp::Neg, operand: Box::new(operand) })
        } else {
            self.parse_primary()
        }
    }

    // primary := literal | path ('(' args? ')')? | '(' expr ')' | list
    fn parse_primary(&mut self) -> Result<Node> {
        match self.peek().clone() {
            Token::String(s) => {
                self.advance();
                Ok(Node::Constant(Value::String(s)))
            }
            Token::Integer(i) => {
                self.advance();
                Ok(Node::Constant(Value::Integer(i)))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Node::Constant(Value::Float(f)))
            }
            Token::DateTime(dt) => {
                self.advance();
                Ok(Node::Constant(Value::DateTime(dt)))
            }
            Token::True => {
                self.advance();
                Ok(Node::Constant(Value::Boolean(true)))
            }
            Token::False => {
                self.advance();
                Ok(Node::Constant(Value::Boolean(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Node::Constant(Value::Null))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, ")")?;
                Ok(Node::ParenGroup(Box::new(inner)))
            }
            Token::LBracket => self.parse_list(),
            Token::Ident(_) => self.parse_path_or_call(),
            _ => Err(self.error(["literal", "identifier", "(", "["])),
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<()> {
        if *self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(self.error([expected]))
        }
    }

    fn parse_list(&mut self) -> Result<Node> {
        self.expect(Token::LBracket, "[")?;
        let mut items = Vec::new();
        if *self.peek() != Token::RBracket {
            loop {
                let item = self.parse_expr()?;
                items.push(node_to_constant(&item).ok_or_else(|| {
                    self.error(["constant list element"])
                })?);
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RBracket, "]")?;
        Ok(Node::Constant(Value::Array(items)))
    }

    // path := ident ('.' ident | '[' STRING ']')*
    fn parse_path_or_call(&mut self) -> Result<Node> {
        let mut segments = vec![self.parse_ident()?];
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    segments.push(self.parse_ident()?);
                }
                Token::LBracket => {
                    self.advance();
                    let key = match self.advance() {
                        Token::String(s) => s,
                        _ => return Err(self.error(["string literal"])),
                    };
                    self.expect(Token::RBracket, "]")?;
                    segments.push(key);
                }
                _ => break,
            }
        }

        if *self.peek() == Token::LParen {
            self.advance();
            let mut args = Vec::new();
            if *self.peek() != Token::RParen {
                loop {
                    let arg = self.parse_expr()?;
                    args.push(node_to_constant(&arg).ok_or_else(|| {
                        self.error(["constant method argument"])
                    })?);
                    if *self.peek() == Token::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.expect(Token::RParen, ")")?;

            if segments.len() < 2 {
                return Err(self.error(["method call on a property receiver"]));
            }
            let method_str = segments.pop().unwrap();
            let name = MethodName::from_str(&method_str)
                .ok_or_else(|| EngineError::unsupported(method_str.clone()))?;
            validate_arity(name, &args)?;
            let receiver = Node::PropertyAccess(PropertyPath::new(segments));
            Ok(Node::MethodCall { receiver: Box::new(receiver), name, args })
        } else {
            Ok(Node::PropertyAccess(PropertyPath::new(segments)))
        }
    }

    fn parse_ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            Token::In => Ok("in".to_string()),
            _ => Err(self.error(["identifier"])),
        }
    }
}

fn validate_arity(name: MethodName, args: &[Value]) -> Result<()> {
    if args.len() != 1 {
        return Err(EngineError::unsupported(format!(
            "{}: expected exactly 1 argument, got {}",
            name.as_str(),
            args.len()
        )));
    }
    if name == MethodName::Matches && !matches!(args[0], Value::String(_)) {
        return Err(EngineError::unsupported("matches: argument must be a regex string literal"));
    }
    Ok(())
}

fn node_to_constant(node: &Node) -> Option<Value> {
    match node {
        Node::Constant(v) => Some(v.clone()),
        Node::ParenGroup(inner) => node_to_constant(inner),
        Node::Unary { op: UnaryOp::Neg, operand } => match node_to_constant(operand)? {
            Value::Integer(i) => Some(Value::Integer(-i)),
            Value::Float(f) => Some(Value::Float(-f)),
            _ => None,
        },
        _ => None,
    }
}
