//! Recursive-descent parser for variable rule expressions.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparisons, `+ -`,
//! `* /`, unary `-`, attribute access. Constructs outside the whitelist are
//! recognised only so they can be rejected by name.

use super::expr::{BinOp, BoolOp, CompareOp, Expr, Namespace, UnaryOp};
use super::lexer::{Token, tokenize};
use crate::error::ResolverError;
use crate::types::Value;

/// Sugar marking an expression that reads other resolved variables.
const DERIVED: &str = "derived";

pub(crate) fn parse(expr: &str) -> Result<Expr, ResolverError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { expr, tokens, pos: 0 };
    if parser.tokens.is_empty() {
        return Err(parser.syntax("empty expression"));
    }
    let tree = parser.or_expr()?;
    match parser.peek() {
        None => Ok(tree),
        Some(Token::Name(name)) if name == "if" => Err(parser.unsupported("IfExp")),
        Some(Token::Comma) => Err(parser.unsupported("Tuple")),
        Some(token) => Err(parser.syntax(format!("unexpected token {:?}", token))),
    }
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword)
    }

    fn at_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn syntax(&self, details: impl Into<String>) -> ResolverError {
        ResolverError::Syntax { expr: self.expr.to_string(), details: details.into() }
    }

    fn unsupported(&self, operator: &'static str) -> ResolverError {
        ResolverError::UnsupportedOperator { expr: self.expr.to_string(), operator }
    }

    fn unsupported_comparison(&self, operator: &'static str) -> ResolverError {
        ResolverError::UnsupportedComparison { expr: self.expr.to_string(), operator }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ResolverError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(self.syntax(format!("expected {:?}, found {:?}", expected, token))),
            None => Err(self.syntax(format!("expected {:?}, found end of input", expected))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ResolverError> {
        self.bool_chain(BoolOp::Or, "or", Self::and_expr)
    }

    fn and_expr(&mut self) -> Result<Expr, ResolverError> {
        self.bool_chain(BoolOp::And, "and", Self::not_expr)
    }

    fn bool_chain(
        &mut self,
        op: BoolOp,
        keyword: &str,
        operand: fn(&mut Self) -> Result<Expr, ResolverError>,
    ) -> Result<Expr, ResolverError> {
        let first = operand(self)?;
        if !self.at_keyword(keyword) {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.at_keyword(keyword) {
            self.pos += 1;
            operands.push(operand(self)?);
        }
        Ok(Expr::Bool { op, operands })
    }

    fn not_expr(&mut self) -> Result<Expr, ResolverError> {
        if self.at_keyword("not") {
            self.pos += 1;
            let operand = self.not_expr()?;
            return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ResolverError> {
        let left = self.sum()?;
        let mut comparisons = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Op("==")) => CompareOp::Eq,
                Some(Token::Op("!=")) => CompareOp::NotEq,
                Some(Token::Op(">")) => CompareOp::Gt,
                Some(Token::Op(">=")) => CompareOp::GtE,
                Some(Token::Op("<")) => CompareOp::Lt,
                Some(Token::Op("<=")) => CompareOp::LtE,
                Some(Token::Name(name)) if name == "in" => {
                    return Err(self.unsupported_comparison("In"));
                }
                Some(Token::Name(name)) if name == "is" => {
                    let negated = matches!(self.peek_at(1), Some(Token::Name(next)) if next == "not");
                    return Err(self.unsupported_comparison(if negated { "IsNot" } else { "Is" }));
                }
                Some(Token::Name(name))
                    if name == "not"
                        && matches!(self.peek_at(1), Some(Token::Name(next)) if next == "in") =>
                {
                    return Err(self.unsupported_comparison("NotIn"));
                }
                _ => break,
            };
            self.pos += 1;
            comparisons.push((op, self.sum()?));
        }
        if comparisons.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare { left: Box::new(left), comparisons })
        }
    }

    fn sum(&mut self) -> Result<Expr, ResolverError> {
        let mut left = self.term()?;
        loop {
            let op = match self.at_op() {
                Some("+") => BinOp::Add,
                Some("-") => BinOp::Sub,
                Some("|") => return Err(self.unsupported("BitOr")),
                Some("^") => return Err(self.unsupported("BitXor")),
                Some("&") => return Err(self.unsupported("BitAnd")),
                Some("<<") => return Err(self.unsupported("LShift")),
                Some(">>") => return Err(self.unsupported("RShift")),
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ResolverError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.at_op() {
                Some("*") => BinOp::Mul,
                Some("/") => BinOp::Div,
                Some("//") => return Err(self.unsupported("FloorDiv")),
                Some("%") => return Err(self.unsupported("Mod")),
                Some("@") => return Err(self.unsupported("MatMult")),
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ResolverError> {
        match self.at_op() {
            Some("-") => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) })
            }
            Some("+") => Err(self.unsupported("UAdd")),
            Some("~") => Err(self.unsupported("Invert")),
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ResolverError> {
        let base = self.postfix()?;
        if self.at_op() == Some("**") {
            return Err(self.unsupported("Pow"));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ResolverError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let attr = match self.next() {
                        Some(Token::Name(name)) => name,
                        _ => return Err(self.syntax("expected attribute name after '.'")),
                    };
                    match &mut expr {
                        Expr::Attribute { path, .. } => path.push(attr),
                        _ => return Err(self.syntax("attribute access is only allowed on a namespace")),
                    }
                }
                Some(Token::LParen) => return Err(self.unsupported("Call")),
                Some(Token::LBracket) => return Err(self.unsupported("Subscript")),
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ResolverError> {
        let token = self.next().ok_or_else(|| self.syntax("unexpected end of input"))?;
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::LParen => {
                let inner = self.or_expr()?;
                if matches!(self.peek(), Some(Token::Comma)) {
                    return Err(self.unsupported("Tuple"));
                }
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Err(self.unsupported("List")),
            Token::LBrace => Err(self.unsupported("Dict")),
            Token::Name(name) => self.name(name),
            other => Err(self.syntax(format!("unexpected token {:?}", other))),
        }
    }

    fn name(&mut self, name: String) -> Result<Expr, ResolverError> {
        match name.as_str() {
            "True" => return Ok(Expr::Literal(Value::Bool(true))),
            "False" => return Ok(Expr::Literal(Value::Bool(false))),
            "None" => return Ok(Expr::Literal(Value::Null)),
            "lambda" => return Err(self.unsupported("Lambda")),
            "and" | "or" | "not" | "in" | "is" | "if" | "else" => {
                return Err(self.syntax(format!("unexpected keyword '{}'", name)));
            }
            DERIVED if matches!(self.peek(), Some(Token::LParen)) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            _ => {}
        }

        let namespace = Namespace::from_name(&name).ok_or_else(|| ResolverError::UnknownNamespace {
            expr: self.expr.to_string(),
            name: name.clone(),
        })?;
        if !matches!(self.peek(), Some(Token::Dot)) {
            return Err(self.syntax(format!("namespace '{}' needs an attribute", name)));
        }
        Ok(Expr::Attribute { namespace, path: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(namespace: Namespace, key: &str) -> Expr {
        Expr::Attribute { namespace, path: vec![key.to_string()] }
    }

    fn rejected_operator(expr: &str) -> &'static str {
        match parse(expr) {
            Err(ResolverError::UnsupportedOperator { operator, .. })
            | Err(ResolverError::UnsupportedComparison { operator, .. }) => operator,
            other => panic!("expected rejection for `{}`, got {:?}", expr, other),
        }
    }

    #[test]
    fn parses_precedence() {
        let tree = parse("bios.A == 1 or not lo.B and vars.c").unwrap();
        let Expr::Bool { op: BoolOp::Or, operands } = tree else {
            panic!("expected or at the root");
        };
        assert_eq!(operands.len(), 2);
        assert!(matches!(operands[1], Expr::Bool { op: BoolOp::And, .. }));
    }

    #[test]
    fn arithmetic_binds_tighter_than_comparison() {
        let tree = parse("bios.RPM / 100 >= 0.2").unwrap();
        assert_eq!(
            tree,
            Expr::Compare {
                left: Box::new(Expr::Binary {
                    op: BinOp::Div,
                    left: Box::new(attr(Namespace::Bios, "RPM")),
                    right: Box::new(Expr::Literal(Value::Int(100))),
                }),
                comparisons: vec![(CompareOp::GtE, Expr::Literal(Value::Float(0.2)))],
            }
        );
    }

    #[test]
    fn derived_wrapper_is_transparent() {
        assert_eq!(parse("derived(vars.a and vars.b)"), parse("vars.a and vars.b"));
        assert_eq!(parse("  derived( vars.a )  "), parse("vars.a"));
    }

    #[test]
    fn rejects_membership_and_identity() {
        assert_eq!(rejected_operator("bios.X in [1, 2]"), "In");
        assert_eq!(rejected_operator("bios.X not in [1, 2]"), "NotIn");
        assert_eq!(rejected_operator("bios.X is None"), "Is");
        assert_eq!(rejected_operator("bios.X is not None"), "IsNot");
    }

    #[test]
    fn rejects_operators_outside_whitelist() {
        assert_eq!(rejected_operator("bios.X ** 2"), "Pow");
        assert_eq!(rejected_operator("bios.X // 2"), "FloorDiv");
        assert_eq!(rejected_operator("bios.X % 2"), "Mod");
        assert_eq!(rejected_operator("bios.X & 1"), "BitAnd");
        assert_eq!(rejected_operator("bios.X << 1"), "LShift");
        assert_eq!(rejected_operator("+bios.X"), "UAdd");
        assert_eq!(rejected_operator("~bios.X"), "Invert");
        assert_eq!(rejected_operator("vars.f(1)"), "Call");
        assert_eq!(rejected_operator("bios.X[0]"), "Subscript");
        assert_eq!(rejected_operator("1 if bios.X else 0"), "IfExp");
    }

    #[test]
    fn unknown_namespace_fails_at_parse() {
        assert_eq!(
            parse("os.system"),
            Err(ResolverError::UnknownNamespace { expr: "os.system".into(), name: "os".into() })
        );
    }

    #[test]
    fn malformed_input_is_a_syntax_error() {
        for expr in ["", "bios", "bios.", "(bios.X", "bios.X ==", "1 2"] {
            assert!(matches!(parse(expr), Err(ResolverError::Syntax { .. })), "{}", expr);
        }
    }
}
