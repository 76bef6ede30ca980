//! Recursive descent parser for kernel sources
//!
//! See [`super::ast`] for the grammar. The parser only checks syntax and the
//! shape of declarations; name resolution and typing happen in code
//! generation.
//!
//! ```
//! use ndrange_runtime::compiler::parser::parse;
//!
//! let kernels = parse("__kernel void k(__global int *out) { out[get_global_id(0)] = 1; }").unwrap();
//! assert_eq!(kernels.len(), 1);
//! assert_eq!(kernels[0].name, "k");
//! ```

use super::ast::{AssignOp, BinOp, Expr, ExprKind, KernelDef, ParamDecl, Stmt, StmtKind};
use super::lexer::{tokenize, IntSuffix, Span, Spanned, Token};
use super::CompileError;
use crate::isa::{AddressSpace, MemoryFence, ParamKind, Type};

const TYPE_KEYWORDS: &[&str] = &["int", "signed", "unsigned", "uint", "long", "ulong", "size_t"];

/// Parser state
pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl Parser {
    /// `tokens` must end with [`Token::Eof`], as produced by [`tokenize`]
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, position: 0 }
    }

    // ============================================================================================
    // Token Helpers
    // ============================================================================================

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.position + offset).min(self.tokens.len().saturating_sub(1));
        self.tokens.get(idx).map_or(&Token::Eof, |t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.position).map(|t| t.span).unwrap_or_default()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        CompileError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.peek().to_string(),
            span: self.span(),
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<Span, CompileError> {
        if *self.peek() == token {
            let span = self.span();
            self.advance();
            Ok(span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(String, Span), CompileError> {
        let span = self.span();
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok((name, span))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn is_ident(&self, offset: usize, names: &[&str]) -> bool {
        matches!(self.peek_at(offset), Token::Ident(name) if names.contains(&name.as_str()))
    }

    fn eat_ident(&mut self, names: &[&str]) -> bool {
        if self.is_ident(0, names) {
            self.advance();
            true
        } else {
            false
        }
    }

    // ============================================================================================
    // Declarations
    // ============================================================================================

    /// Parse every kernel in the source
    pub fn parse_program(&mut self) -> Result<Vec<KernelDef>, CompileError> {
        let mut kernels = Vec::new();
        while *self.peek() != Token::Eof {
            kernels.push(self.parse_kernel()?);
        }
        Ok(kernels)
    }

    fn parse_kernel(&mut self) -> Result<KernelDef, CompileError> {
        if !self.eat_ident(&["__kernel", "kernel"]) {
            return Err(self.unexpected("'__kernel'"));
        }
        if !self.eat_ident(&["void"]) {
            return Err(self.unexpected("'void'"));
        }
        let (name, span) = self.expect_ident("kernel name")?;

        self.expect(Token::LParen, "'('")?;
        let params = self.parse_params()?;
        self.expect(Token::RParen, "')'")?;

        self.expect(Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while *self.peek() != Token::RBrace {
            if *self.peek() == Token::Eof {
                return Err(self.unexpected("'}'"));
            }
            self.parse_statement(&mut body)?;
        }
        self.advance();

        Ok(KernelDef {
            name,
            span,
            params,
            body,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<ParamDecl>, CompileError> {
        if *self.peek() == Token::RParen {
            return Ok(Vec::new());
        }
        if self.is_ident(0, &["void"]) && *self.peek_at(1) == Token::RParen {
            self.advance();
            return Ok(Vec::new());
        }

        let mut params = vec![self.parse_param()?];
        while *self.peek() == Token::Comma {
            self.advance();
            params.push(self.parse_param()?);
        }
        Ok(params)
    }

    fn parse_param(&mut self) -> Result<ParamDecl, CompileError> {
        let start = self.span();
        let mut space = None;
        let mut is_const = false;
        loop {
            if self.eat_ident(&["__global", "global"]) {
                space = Some(AddressSpace::Global);
            } else if self.eat_ident(&["__constant", "constant"]) {
                space = Some(AddressSpace::Constant);
            } else if self.eat_ident(&["const"]) {
                is_const = true;
            } else if !self.eat_ident(&["__private", "private"]) {
                break;
            }
        }

        let ty = self.parse_type()?;
        let is_pointer = *self.peek() == Token::Star;
        if is_pointer {
            self.advance();
            while self.eat_ident(&["const", "restrict", "__restrict"]) {}
        }
        let (name, span) = self.expect_ident("parameter name")?;

        let kind = match (is_pointer, space) {
            (true, Some(space)) => ParamKind::Buffer {
                space,
                elem: ty,
                read_only: is_const || space == AddressSpace::Constant,
            },
            (true, None) => return Err(CompileError::MissingAddressSpace { name, span }),
            (false, None) => ParamKind::Scalar { ty },
            (false, Some(_)) => return Err(CompileError::InvalidQualifier { name, span: start }),
        };

        Ok(ParamDecl { name, span, kind })
    }

    fn is_type_start(&self, offset: usize) -> bool {
        self.is_ident(offset, TYPE_KEYWORDS)
    }

    fn parse_type(&mut self) -> Result<Type, CompileError> {
        let span = self.span();
        let (name, _) = self.expect_ident("type name")?;
        let ty = match name.as_str() {
            "int" => Type::I32,
            "signed" => {
                self.eat_ident(&["int"]);
                Type::I32
            }
            "unsigned" => {
                if self.eat_ident(&["long"]) {
                    Type::U64
                } else {
                    self.eat_ident(&["int"]);
                    Type::U32
                }
            }
            "uint" => Type::U32,
            "long" => Type::I64,
            "ulong" | "size_t" => Type::U64,
            _ => return Err(CompileError::UnknownType { name, span }),
        };
        Ok(ty)
    }

    // ============================================================================================
    // Statements
    // ============================================================================================

    fn parse_statement(&mut self, out: &mut Vec<Stmt>) -> Result<(), CompileError> {
        let span = self.span();

        if *self.peek() == Token::Semi {
            self.advance();
            return Ok(());
        }

        if self.is_ident(0, &["private", "__private", "const"]) || self.is_type_start(0) {
            return self.parse_declaration(out);
        }

        if self.eat_ident(&["barrier"]) {
            let fence = self.parse_barrier_flags()?;
            self.expect(Token::Semi, "';'")?;
            out.push(Stmt {
                kind: StmtKind::Barrier { fence },
                span,
            });
            return Ok(());
        }

        if self.eat_ident(&["return"]) {
            self.expect(Token::Semi, "';'")?;
            out.push(Stmt {
                kind: StmtKind::Return,
                span,
            });
            return Ok(());
        }

        let (name, _) = self.expect_ident("statement")?;
        let kind = if *self.peek() == Token::LBracket {
            self.advance();
            let index = self.parse_expr()?;
            self.expect(Token::RBracket, "']'")?;
            let op = self.parse_assign_op()?;
            let value = self.parse_expr()?;
            StmtKind::Store {
                target: name,
                index,
                op,
                value,
            }
        } else {
            let op = self.parse_assign_op()?;
            let value = self.parse_expr()?;
            StmtKind::Assign { name, op, value }
        };
        self.expect(Token::Semi, "';'")?;
        out.push(Stmt { kind, span });
        Ok(())
    }

    fn parse_declaration(&mut self, out: &mut Vec<Stmt>) -> Result<(), CompileError> {
        let mut is_const = false;
        loop {
            if self.eat_ident(&["const"]) {
                is_const = true;
            } else if !self.eat_ident(&["private", "__private"]) {
                break;
            }
        }
        let ty = self.parse_type()?;

        loop {
            let (name, span) = self.expect_ident("variable name")?;
            let init = if *self.peek() == Token::Assign {
                self.advance();
                Some(self.parse_expr()?)
            } else {
                None
            };
            out.push(Stmt {
                kind: StmtKind::Decl {
                    ty,
                    is_const,
                    name,
                    init,
                },
                span,
            });

            if *self.peek() != Token::Comma {
                break;
            }
            self.advance();
        }

        self.expect(Token::Semi, "';'")?;
        Ok(())
    }

    fn parse_barrier_flags(&mut self) -> Result<MemoryFence, CompileError> {
        self.expect(Token::LParen, "'('")?;
        let mut fence = self.parse_fence_flag()?;
        while *self.peek() == Token::Pipe {
            self.advance();
            fence = fence.union(self.parse_fence_flag()?);
        }
        self.expect(Token::RParen, "')'")?;
        Ok(fence)
    }

    fn parse_fence_flag(&mut self) -> Result<MemoryFence, CompileError> {
        let (name, span) = self.expect_ident("fence flag")?;
        match name.as_str() {
            "CLK_LOCAL_MEM_FENCE" => Ok(MemoryFence::Local),
            "CLK_GLOBAL_MEM_FENCE" => Ok(MemoryFence::Global),
            _ => Err(CompileError::UnknownIdentifier { name, span }),
        }
    }

    fn parse_assign_op(&mut self) -> Result<AssignOp, CompileError> {
        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            _ => return Err(self.unexpected("assignment operator")),
        };
        self.advance();
        Ok(op)
    }

    // ============================================================================================
    // Expressions
    // ============================================================================================

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            let span = self.span();
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn parse_term(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => return Ok(lhs),
            };
            let span = self.span();
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let span = self.span();
        match self.peek() {
            Token::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Neg(Box::new(operand)), span))
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            Token::LParen if self.is_type_start(1) => {
                self.advance();
                let ty = self.parse_type()?;
                self.expect(Token::RParen, "')'")?;
                let operand = self.parse_unary()?;
                Ok(Expr::new(
                    ExprKind::Cast {
                        ty,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let span = self.span();
        match self.peek().clone() {
            Token::Int { value, suffix } => {
                self.advance();
                let (value, ty) = literal_type(value, suffix);
                Ok(Expr::new(ExprKind::Int { value, ty }, span))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                self.advance();
                match self.peek() {
                    Token::LBracket => {
                        self.advance();
                        let index = self.parse_expr()?;
                        self.expect(Token::RBracket, "']'")?;
                        Ok(Expr::new(
                            ExprKind::Index {
                                base: name,
                                index: Box::new(index),
                            },
                            span,
                        ))
                    }
                    Token::LParen => {
                        self.advance();
                        let args = self.parse_call_args()?;
                        Ok(Expr::new(ExprKind::Call { name, args }, span))
                    }
                    _ => Ok(Expr::new(ExprKind::Var(name), span)),
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        if *self.peek() != Token::RParen {
            args.push(self.parse_expr()?);
            while *self.peek() == Token::Comma {
                self.advance();
                args.push(self.parse_expr()?);
            }
        }
        self.expect(Token::RParen, "')'")?;
        Ok(args)
    }
}

/// Type an integer literal the way C does for its value and suffix
fn literal_type(value: u64, suffix: IntSuffix) -> (i64, Type) {
    let ty = match suffix {
        IntSuffix::None if value <= i32::MAX as u64 => Type::I32,
        IntSuffix::None | IntSuffix::Long if value <= i64::MAX as u64 => Type::I64,
        IntSuffix::Unsigned if value <= u32::MAX as u64 => Type::U32,
        _ => Type::U64,
    };
    (ty.normalize(value as i64), ty)
}

/// Parse a kernel source into kernel definitions
pub fn parse(source: &str) -> Result<Vec<KernelDef>, CompileError> {
    Parser::new(tokenize(source)?).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let kernels =
            parse("__kernel void k(__constant int *a, global const uint *b, __global int *c, ulong n) {}").unwrap();
        let params = &kernels[0].params;
        assert_eq!(params.len(), 4);
        assert_eq!(
            params[0].kind,
            ParamKind::Buffer {
                space: AddressSpace::Constant,
                elem: Type::I32,
                read_only: true
            }
        );
        assert_eq!(
            params[1].kind,
            ParamKind::Buffer {
                space: AddressSpace::Global,
                elem: Type::U32,
                read_only: true
            }
        );
        assert_eq!(
            params[2].kind,
            ParamKind::Buffer {
                space: AddressSpace::Global,
                elem: Type::I32,
                read_only: false
            }
        );
        assert_eq!(params[3].kind, ParamKind::Scalar { ty: Type::U64 });
    }

    #[test]
    fn test_precedence() {
        let kernels = parse("kernel void k(global int *c) { int x = 1 + 2 * 3; }").unwrap();
        let StmtKind::Decl { init: Some(init), .. } = &kernels[0].body[0].kind else {
            panic!("expected declaration");
        };
        let ExprKind::Binary { op, rhs, .. } = &init.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_statements() {
        let source = "__kernel void k(global int *buf) {
            private int a = buf[get_global_id(0) - 1], b;
            barrier(CLK_LOCAL_MEM_FENCE | CLK_GLOBAL_MEM_FENCE);
            b = a / 3;
            buf[get_global_id(0)] += (int)b;
            return;
        }";
        let kernels = parse(source).unwrap();
        let kinds: Vec<_> = kernels[0].body.iter().map(|s| &s.kind).collect();
        assert_eq!(kinds.len(), 6);
        assert!(matches!(kinds[0], StmtKind::Decl { name, init: Some(_), .. } if name == "a"));
        assert!(matches!(kinds[1], StmtKind::Decl { name, init: None, .. } if name == "b"));
        assert_eq!(
            *kinds[2],
            StmtKind::Barrier {
                fence: MemoryFence::LocalAndGlobal
            }
        );
        assert!(matches!(kinds[3], StmtKind::Assign { op: AssignOp::Set, .. }));
        assert!(matches!(kinds[4], StmtKind::Store { op: AssignOp::Add, .. }));
        assert_eq!(*kinds[5], StmtKind::Return);
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(literal_type(5, IntSuffix::None), (5, Type::I32));
        assert_eq!(literal_type(1 << 40, IntSuffix::None), (1 << 40, Type::I64));
        assert_eq!(literal_type(5, IntSuffix::Unsigned), (5, Type::U32));
        assert_eq!(literal_type(5, IntSuffix::UnsignedLong), (5, Type::U64));
    }

    #[test]
    fn test_multiple_kernels() {
        let kernels = parse("kernel void a(void) {} kernel void b() { ; }").unwrap();
        let names: Vec<_> = kernels.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_syntax_errors_carry_position() {
        let err = parse("__kernel void k(global int *c)\n{\n  c[0] = ;\n}").unwrap_err();
        assert_eq!(
            err,
            CompileError::UnexpectedToken {
                expected: "expression".to_string(),
                found: "';'".to_string(),
                span: Span::new(3, 10),
            }
        );

        assert!(matches!(
            parse("__kernel void k(int *c) {}"),
            Err(CompileError::MissingAddressSpace { .. })
        ));
        assert!(matches!(
            parse("__kernel void k(global float *c) {}"),
            Err(CompileError::UnknownType { .. })
        ));
        assert!(matches!(
            parse("__kernel void k(global int *c) { barrier(CLK_FOO); }"),
            Err(CompileError::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            parse("__kernel void k(global int *c) { c[0] = 1; "),
            Err(CompileError::UnexpectedToken { .. })
        ));
    }
}
