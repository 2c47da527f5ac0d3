//! Parser for the expression language
//!
//! Precedence-climbing parser over the tag-body token stream. Produces a
//! spanned AST; every syntax problem is a [`SyntaxError`] pointing into the
//! template source.

use miette::{Result, SourceSpan};
use std::mem;

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{SyntaxError, TemplateSource};

/// Parsed call arguments: (positional args, keyword args)
type CallArgs = (Vec<Expr>, Vec<(Ident, Expr)>);

/// Parse the expression in `source`'s byte range `start..end`.
///
/// The whole range must be one expression; trailing tokens are an error.
pub fn parse_expression(source: &TemplateSource, start: usize, end: usize) -> Result<Expr> {
    let mut parser = Parser::new(source.clone(), start, end);
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Join two spans into one covering both
fn join(a: SourceSpan, b: SourceSpan) -> SourceSpan {
    span(a.offset(), b.offset() + b.len() - a.offset())
}

struct Parser {
    lexer: Lexer,
    source: TemplateSource,
    current: Token,
    previous: Token,
}

impl Parser {
    fn new(source: TemplateSource, start: usize, end: usize) -> Self {
        let mut lexer = Lexer::new(source.source.clone(), start, end);
        let current = lexer.next_token();
        Self {
            lexer,
            source,
            current: current.clone(),
            previous: current,
        }
    }

    fn advance(&mut self) {
        self.previous = mem::replace(&mut self.current, self.lexer.next_token());
    }

    /// Check the current token's kind, ignoring payloads
    fn check(&self, kind: &TokenKind) -> bool {
        mem::discriminant(&self.current.kind) == mem::discriminant(kind)
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("{kind:?}")))?
        }
    }

    fn expect_ident(&mut self) -> Result<Ident> {
        if let TokenKind::Ident(name) = &self.current.kind {
            let ident = Ident {
                name: name.clone(),
                span: self.current.span,
            };
            self.advance();
            Ok(ident)
        } else {
            Err(self.unexpected("an identifier"))?
        }
    }

    fn expect_eof(&mut self) -> Result<()> {
        if matches!(self.current.kind, TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("end of expression"))?
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let found = match &self.current.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Error(msg) => msg.clone(),
            other => format!("{other:?}"),
        };
        SyntaxError {
            found,
            expected: expected.to_string(),
            span: self.current.span,
            src: self.source.named_source(),
        }
    }

    // ========================================================================
    // Precedence climbing
    // ========================================================================

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let value = self.parse_or()?;

        if self.check(&TokenKind::If) {
            self.advance();
            let condition = self.parse_or()?;
            self.expect(&TokenKind::Else)?;
            let otherwise = self.parse_ternary()?;
            let span = join(value.span(), otherwise.span());
            Ok(Expr::Ternary(TernaryExpr {
                value: Box::new(value),
                condition: Box::new(condition),
                otherwise: Box::new(otherwise),
                span,
            }))
        } else {
            Ok(value)
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            let span = join(left.span(), right.span());
            left = Expr::Binary(BinaryExpr {
                left: Box::new(left),
                op: BinaryOp::Or,
                right: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_not()?;
            let span = join(left.span(), right.span());
            left = Expr::Binary(BinaryExpr {
                left: Box::new(left),
                op: BinaryOp::And,
                right: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Not) {
            let start = self.current.span;
            self.advance();
            let expr = self.parse_not()?;
            let span = join(start, expr.span());
            Ok(Expr::Unary(UnaryExpr {
                op: UnaryOp::Not,
                expr: Box::new(expr),
                span,
            }))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_add()?;

        loop {
            let op = match &self.current.kind {
                TokenKind::Eq => Some(BinaryOp::Eq),
                TokenKind::Ne => Some(BinaryOp::Ne),
                TokenKind::Lt => Some(BinaryOp::Lt),
                TokenKind::Le => Some(BinaryOp::Le),
                TokenKind::Gt => Some(BinaryOp::Gt),
                TokenKind::Ge => Some(BinaryOp::Ge),
                TokenKind::In => Some(BinaryOp::In),
                TokenKind::Not => {
                    // "not in"
                    let saved = self.current.clone();
                    self.advance();
                    if self.check(&TokenKind::In) {
                        self.advance();
                        let right = self.parse_add()?;
                        let span = join(left.span(), right.span());
                        left = Expr::Binary(BinaryExpr {
                            left: Box::new(left),
                            op: BinaryOp::NotIn,
                            right: Box::new(right),
                            span,
                        });
                        continue;
                    } else {
                        self.current = saved;
                        break;
                    }
                }
                _ => None,
            };

            if let Some(op) = op {
                self.advance();
                let right = self.parse_add()?;
                let span = join(left.span(), right.span());
                left = Expr::Binary(BinaryExpr {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                    span,
                });
            } else {
                break;
            }
        }

        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul()?;

        loop {
            let op = match &self.current.kind {
                TokenKind::Plus => Some(BinaryOp::Add),
                TokenKind::Minus => Some(BinaryOp::Sub),
                TokenKind::Tilde => Some(BinaryOp::Concat),
                _ => None,
            };

            if let Some(op) = op {
                self.advance();
                let right = self.parse_mul()?;
                let span = join(left.span(), right.span());
                left = Expr::Binary(BinaryExpr {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                    span,
                });
            } else {
                break;
            }
        }

        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match &self.current.kind {
                TokenKind::Star => Some(BinaryOp::Mul),
                TokenKind::Slash => Some(BinaryOp::Div),
                TokenKind::DoubleSlash => Some(BinaryOp::FloorDiv),
                TokenKind::Percent => Some(BinaryOp::Mod),
                _ => None,
            };

            if let Some(op) = op {
                self.advance();
                let right = self.parse_unary()?;
                let span = join(left.span(), right.span());
                left = Expr::Binary(BinaryExpr {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                    span,
                });
            } else {
                break;
            }
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.current.span;

        if self.check(&TokenKind::Minus) {
            self.advance();
            let expr = self.parse_unary()?;
            let span = join(start, expr.span());
            Ok(Expr::Unary(UnaryExpr {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
                span,
            }))
        } else if self.check(&TokenKind::Plus) {
            self.advance();
            let expr = self.parse_unary()?;
            let span = join(start, expr.span());
            Ok(Expr::Unary(UnaryExpr {
                op: UnaryOp::Pos,
                expr: Box::new(expr),
                span,
            }))
        } else {
            self.parse_power()
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_filter()?;

        if self.check(&TokenKind::DoubleStar) {
            self.advance();
            let exp = self.parse_unary()?;
            let span = join(base.span(), exp.span());
            Ok(Expr::Binary(BinaryExpr {
                left: Box::new(base),
                op: BinaryOp::Pow,
                right: Box::new(exp),
                span,
            }))
        } else {
            Ok(base)
        }
    }

    fn parse_filter(&mut self) -> Result<Expr> {
        let mut expr = self.parse_postfix()?;

        while self.check(&TokenKind::Pipe) {
            self.advance();
            let filter = self.expect_ident()?;

            let (args, kwargs) = if self.check(&TokenKind::LParen) {
                self.advance();
                let result = self.parse_call_args()?;
                self.expect(&TokenKind::RParen)?;
                result
            } else {
                (Vec::new(), Vec::new())
            };

            let span = join(expr.span(), self.previous.span);
            expr = Expr::Filter(FilterExpr {
                expr: Box::new(expr),
                filter,
                args,
                kwargs,
                span,
            });
        }

        Ok(expr)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&TokenKind::Dot) {
                self.advance();
                let field = self.expect_ident()?;
                let span = join(expr.span(), field.span);
                expr = Expr::Field(FieldExpr {
                    base: Box::new(expr),
                    field,
                    span,
                });
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket)?;
                let span = join(expr.span(), self.previous.span);
                expr = Expr::Index(IndexExpr {
                    base: Box::new(expr),
                    index: Box::new(index),
                    span,
                });
            } else if self.check(&TokenKind::LParen) {
                self.advance();
                let (args, kwargs) = self.parse_call_args()?;
                self.expect(&TokenKind::RParen)?;
                let span = join(expr.span(), self.previous.span);
                expr = Expr::Call(CallExpr {
                    func: Box::new(expr),
                    args,
                    kwargs,
                    span,
                });
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.current.clone();

        match &token.kind {
            TokenKind::Int(v) => {
                let v = *v;
                self.advance();
                Ok(Expr::Literal(Literal::Int(IntLit {
                    value: v,
                    span: token.span,
                })))
            }
            TokenKind::Float(v) => {
                let v = *v;
                self.advance();
                Ok(Expr::Literal(Literal::Float(FloatLit {
                    value: v,
                    span: token.span,
                })))
            }
            TokenKind::String(v) => {
                let v = v.clone();
                self.advance();
                Ok(Expr::Literal(Literal::String(StringLit {
                    value: v,
                    span: token.span,
                })))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(BoolLit {
                    value: true,
                    span: token.span,
                })))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(BoolLit {
                    value: false,
                    span: token.span,
                })))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::Literal(Literal::None(NoneLit { span: token.span })))
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(Expr::Var(Ident {
                    name,
                    span: token.span,
                }))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let elements = self.parse_list_elements()?;
                self.expect(&TokenKind::RBracket)?;
                let span = join(token.span, self.previous.span);
                Ok(Expr::Literal(Literal::List(ListLit { elements, span })))
            }
            TokenKind::LBrace => {
                self.advance();
                let entries = self.parse_dict_entries()?;
                self.expect(&TokenKind::RBrace)?;
                let span = join(token.span, self.previous.span);
                Ok(Expr::Literal(Literal::Dict(DictLit { entries, span })))
            }
            _ => Err(self.unexpected("an expression"))?,
        }
    }

    fn parse_call_args(&mut self) -> Result<CallArgs> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        if !self.check(&TokenKind::RParen) {
            loop {
                // Check for kwarg: name=value
                if let TokenKind::Ident(name) = &self.current.kind {
                    let name = name.clone();
                    let name_span = self.current.span;

                    self.advance();
                    if self.check(&TokenKind::Assign) {
                        self.advance();
                        let value = self.parse_expr()?;
                        kwargs.push((
                            Ident {
                                name,
                                span: name_span,
                            },
                            value,
                        ));
                    } else {
                        // A positional arg starting with a variable; resume
                        // postfix/operator parsing from the consumed ident
                        let base = Expr::Var(Ident {
                            name,
                            span: name_span,
                        });
                        let expr = self.continue_from(base)?;
                        args.push(expr);
                    }
                } else {
                    args.push(self.parse_expr()?);
                }

                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
                if self.check(&TokenKind::RParen) {
                    break;
                }
            }
        }

        Ok((args, kwargs))
    }

    /// Continue parsing an expression whose leading primary is already known
    fn continue_from(&mut self, mut expr: Expr) -> Result<Expr> {
        // Postfix chains bind tightest after a primary
        loop {
            if self.check(&TokenKind::Dot) {
                self.advance();
                let field = self.expect_ident()?;
                let span = join(expr.span(), field.span);
                expr = Expr::Field(FieldExpr {
                    base: Box::new(expr),
                    field,
                    span,
                });
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket)?;
                let span = join(expr.span(), self.previous.span);
                expr = Expr::Index(IndexExpr {
                    base: Box::new(expr),
                    index: Box::new(index),
                    span,
                });
            } else if self.check(&TokenKind::LParen) {
                self.advance();
                let (args, kwargs) = self.parse_call_args()?;
                self.expect(&TokenKind::RParen)?;
                let span = join(expr.span(), self.previous.span);
                expr = Expr::Call(CallExpr {
                    func: Box::new(expr),
                    args,
                    kwargs,
                    span,
                });
            } else {
                break;
            }
        }

        // Filters
        while self.check(&TokenKind::Pipe) {
            self.advance();
            let filter = self.expect_ident()?;
            let (args, kwargs) = if self.check(&TokenKind::LParen) {
                self.advance();
                let result = self.parse_call_args()?;
                self.expect(&TokenKind::RParen)?;
                result
            } else {
                (Vec::new(), Vec::new())
            };
            let span = join(expr.span(), self.previous.span);
            expr = Expr::Filter(FilterExpr {
                expr: Box::new(expr),
                filter,
                args,
                kwargs,
                span,
            });
        }

        Ok(expr)
    }

    fn parse_list_elements(&mut self) -> Result<Vec<Expr>> {
        let mut elements = Vec::new();

        if !self.check(&TokenKind::RBracket) {
            elements.push(self.parse_expr()?);
            while self.check(&TokenKind::Comma) {
                self.advance();
                if self.check(&TokenKind::RBracket) {
                    break;
                }
                elements.push(self.parse_expr()?);
            }
        }

        Ok(elements)
    }

    fn parse_dict_entries(&mut self) -> Result<Vec<(Expr, Expr)>> {
        let mut entries = Vec::new();

        if !self.check(&TokenKind::RBrace) {
            loop {
                let key = self.parse_expr()?;
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expr()?;
                entries.push((key, value));

                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
                if self.check(&TokenKind::RBrace) {
                    break;
                }
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Expr> {
        let source = TemplateSource::new("test", s);
        let end = source.source.len();
        parse_expression(&source, 0, end)
    }

    #[test]
    fn test_var() {
        assert!(matches!(parse("name").unwrap(), Expr::Var(_)));
    }

    #[test]
    fn test_field_chain() {
        let expr = parse("ctx.user.name").unwrap();
        let Expr::Field(outer) = expr else {
            panic!("expected field access");
        };
        assert_eq!(outer.field.name, "name");
    }

    #[test]
    fn test_binary_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let Expr::Binary(add) = parse("1 + 2 * 3").unwrap() else {
            panic!("expected binary");
        };
        assert_eq!(add.op, BinaryOp::Add);
        let Expr::Binary(mul) = *add.right else {
            panic!("expected binary rhs");
        };
        assert_eq!(mul.op, BinaryOp::Mul);
    }

    #[test]
    fn test_call_with_kwargs() {
        let Expr::Call(call) = parse("f(1, active=true)").unwrap() else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 1);
        assert_eq!(call.kwargs.len(), 1);
        assert_eq!(call.kwargs[0].0.name, "active");
    }

    #[test]
    fn test_call_with_var_arg() {
        let Expr::Call(call) = parse("f(x.y, 2)").unwrap() else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 2);
        assert!(matches!(call.args[0], Expr::Field(_)));
    }

    #[test]
    fn test_filter_chain() {
        let Expr::Filter(f) = parse("name | trim | upper").unwrap() else {
            panic!("expected filter");
        };
        assert_eq!(f.filter.name, "upper");
    }

    #[test]
    fn test_ternary() {
        assert!(matches!(
            parse("\"a\" if flag else \"b\"").unwrap(),
            Expr::Ternary(_)
        ));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(parse("a b").is_err());
    }

    #[test]
    fn test_unclosed_paren() {
        assert!(parse("f(1").is_err());
    }
}
