//! Lowering from the kernel AST to the ISA
//!
//! Every expression evaluates into a fresh register. Named locals own one
//! register each, and scalar parameters are copied into locals at kernel
//! entry with `LDARG`. Operands of a binary operation are converted to their
//! common type with `CVT` before the operation is emitted.

use super::ast::{AssignOp, BinOp, Expr, ExprKind, KernelDef, Stmt, StmtKind};
use super::lexer::Span;
use super::CompileError;
use crate::isa::{Instruction, KernelParam, KernelProgram, ParamKind, Register, Type, WorkItemQuery};
use std::collections::HashMap;

/// Registers available to one work-item
const MAX_REGISTERS: u16 = 256;

/// What a name refers to inside a kernel body
#[derive(Debug, Clone, Copy)]
enum Symbol {
    Buffer { slot: u8, elem: Type, read_only: bool },
    Local { reg: Register, ty: Type, is_const: bool },
}

/// Per-kernel code generation state
pub struct KernelCodegen<'a> {
    kernel: &'a KernelDef,
    symbols: HashMap<String, Symbol>,
    instructions: Vec<Instruction>,
    next_register: u16,
}

impl<'a> KernelCodegen<'a> {
    pub fn new(kernel: &'a KernelDef) -> Self {
        Self {
            kernel,
            symbols: HashMap::new(),
            instructions: Vec::new(),
            next_register: 0,
        }
    }

    /// Lower the kernel to a [`KernelProgram`]
    pub fn lower(mut self) -> Result<KernelProgram, CompileError> {
        let mut params = Vec::with_capacity(self.kernel.params.len());

        for (slot, param) in self.kernel.params.iter().enumerate() {
            let slot = u8::try_from(slot).map_err(|_| CompileError::TooManyParameters {
                kernel: self.kernel.name.clone(),
                span: param.span,
            })?;

            let symbol = match param.kind {
                ParamKind::Buffer { elem, read_only, .. } => Symbol::Buffer { slot, elem, read_only },
                ParamKind::Scalar { ty } => {
                    let reg = self.alloc(param.span)?;
                    self.instructions.push(Instruction::LDARG { ty, dst: reg, arg: slot });
                    Symbol::Local {
                        reg,
                        ty,
                        is_const: false,
                    }
                }
            };
            self.declare(&param.name, param.span, symbol)?;

            params.push(KernelParam {
                name: param.name.clone(),
                kind: param.kind,
            });
        }

        for stmt in &self.kernel.body {
            self.lower_stmt(stmt)?;
        }

        if !matches!(self.instructions.last(), Some(Instruction::EXIT)) {
            self.instructions.push(Instruction::EXIT);
        }

        Ok(KernelProgram {
            name: self.kernel.name.clone(),
            params,
            register_count: self.next_register,
            instructions: self.instructions,
        })
    }

    fn alloc(&mut self, span: Span) -> Result<Register, CompileError> {
        if self.next_register >= MAX_REGISTERS {
            return Err(CompileError::TooManyRegisters {
                kernel: self.kernel.name.clone(),
                span,
            });
        }
        let reg = Register(self.next_register as u8);
        self.next_register += 1;
        Ok(reg)
    }

    fn declare(&mut self, name: &str, span: Span, symbol: Symbol) -> Result<(), CompileError> {
        if self.symbols.contains_key(name) {
            return Err(CompileError::Redeclared {
                name: name.to_string(),
                span,
            });
        }
        self.symbols.insert(name.to_string(), symbol);
        Ok(())
    }

    fn lookup(&self, name: &str, span: Span) -> Result<Symbol, CompileError> {
        self.symbols.get(name).copied().ok_or_else(|| CompileError::UnknownIdentifier {
            name: name.to_string(),
            span,
        })
    }

    // ============================================================================================
    // Statements
    // ============================================================================================

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Decl {
                ty,
                is_const,
                name,
                init,
            } => {
                let value = match init {
                    Some(init) => {
                        let (src, src_ty) = self.lower_expr(init)?;
                        Some(self.convert(src, src_ty, *ty, init.span)?)
                    }
                    None => None,
                };

                let reg = self.alloc(stmt.span)?;
                match value {
                    Some(src) => self.instructions.push(Instruction::MOV { dst: reg, src }),
                    None => self.instructions.push(Instruction::MOV_IMM {
                        ty: *ty,
                        dst: reg,
                        value: 0,
                    }),
                }

                self.declare(
                    name,
                    stmt.span,
                    Symbol::Local {
                        reg,
                        ty: *ty,
                        is_const: *is_const,
                    },
                )
            }

            StmtKind::Assign { name, op, value } => {
                let (reg, ty) = match self.lookup(name, stmt.span)? {
                    Symbol::Local {
                        reg, ty, is_const: false, ..
                    } => (reg, ty),
                    Symbol::Local { is_const: true, .. } | Symbol::Buffer { .. } => {
                        return Err(CompileError::NotAssignable {
                            name: name.clone(),
                            span: stmt.span,
                        });
                    }
                };
                let result = self.lower_update(reg, ty, *op, value)?;
                self.instructions.push(Instruction::MOV { dst: reg, src: result });
                Ok(())
            }

            StmtKind::Store {
                target,
                index,
                op,
                value,
            } => {
                let (slot, elem) = match self.lookup(target, stmt.span)? {
                    Symbol::Buffer {
                        read_only: false,
                        slot,
                        elem,
                    } => (slot, elem),
                    Symbol::Buffer { read_only: true, .. } => {
                        return Err(CompileError::StoreToReadOnly {
                            name: target.clone(),
                            span: stmt.span,
                        });
                    }
                    Symbol::Local { .. } => {
                        return Err(CompileError::NotAPointer {
                            name: target.clone(),
                            span: stmt.span,
                        });
                    }
                };

                let (index_reg, _) = self.lower_expr(index)?;
                let current = if *op == AssignOp::Set {
                    None
                } else {
                    let dst = self.alloc(stmt.span)?;
                    self.instructions.push(Instruction::LDG {
                        ty: elem,
                        dst,
                        arg: slot,
                        index: index_reg,
                    });
                    Some(dst)
                };

                let src = match current {
                    Some(current) => self.lower_update(current, elem, *op, value)?,
                    None => {
                        let (src, src_ty) = self.lower_expr(value)?;
                        self.convert(src, src_ty, elem, value.span)?
                    }
                };

                self.instructions.push(Instruction::STG {
                    ty: elem,
                    src,
                    arg: slot,
                    index: index_reg,
                });
                Ok(())
            }

            StmtKind::Barrier { fence } => {
                self.instructions.push(Instruction::BarSync { fence: *fence });
                Ok(())
            }

            StmtKind::Return => {
                self.instructions.push(Instruction::EXIT);
                Ok(())
            }
        }
    }

    /// Compute `current op value`, converted back to `ty`
    fn lower_update(&mut self, current: Register, ty: Type, op: AssignOp, value: &Expr) -> Result<Register, CompileError> {
        let (src, src_ty) = self.lower_expr(value)?;
        let bin_op = match op {
            AssignOp::Set => return self.convert(src, src_ty, ty, value.span),
            AssignOp::Add => BinOp::Add,
            AssignOp::Sub => BinOp::Sub,
        };
        let (result, result_ty) = self.emit_binary(bin_op, (current, ty), (src, src_ty), value.span)?;
        self.convert(result, result_ty, ty, value.span)
    }

    // ============================================================================================
    // Expressions
    // ============================================================================================

    fn lower_expr(&mut self, expr: &Expr) -> Result<(Register, Type), CompileError> {
        match &expr.kind {
            ExprKind::Int { value, ty } => {
                let dst = self.alloc(expr.span)?;
                self.instructions.push(Instruction::MOV_IMM {
                    ty: *ty,
                    dst,
                    value: *value,
                });
                Ok((dst, *ty))
            }

            ExprKind::Var(name) => match self.lookup(name, expr.span)? {
                Symbol::Local { reg, ty, .. } => Ok((reg, ty)),
                Symbol::Buffer { .. } => Err(CompileError::PointerAsValue {
                    name: name.clone(),
                    span: expr.span,
                }),
            },

            ExprKind::Index { base, index } => {
                let Symbol::Buffer { slot, elem, .. } = self.lookup(base, expr.span)? else {
                    return Err(CompileError::NotAPointer {
                        name: base.clone(),
                        span: expr.span,
                    });
                };
                let (index, _) = self.lower_expr(index)?;
                let dst = self.alloc(expr.span)?;
                self.instructions.push(Instruction::LDG {
                    ty: elem,
                    dst,
                    arg: slot,
                    index,
                });
                Ok((dst, elem))
            }

            ExprKind::Call { name, args } => self.lower_builtin(name, args, expr.span),

            ExprKind::Neg(operand) => {
                let (src, ty) = self.lower_expr(operand)?;
                let dst = self.alloc(expr.span)?;
                self.instructions.push(Instruction::NEG { ty, dst, src });
                Ok((dst, ty))
            }

            ExprKind::Cast { ty, operand } => {
                let (src, src_ty) = self.lower_expr(operand)?;
                let dst = self.convert(src, src_ty, *ty, expr.span)?;
                Ok((dst, *ty))
            }

            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                self.emit_binary(*op, lhs, rhs, expr.span)
            }
        }
    }

    fn lower_builtin(&mut self, name: &str, args: &[Expr], span: Span) -> Result<(Register, Type), CompileError> {
        let query = WorkItemQuery::from_builtin(name).ok_or_else(|| CompileError::UnknownFunction {
            name: name.to_string(),
            span,
        })?;

        let expected = usize::from(query.takes_dimension());
        if args.len() != expected {
            return Err(CompileError::BuiltinArity {
                name: name.to_string(),
                expected,
                found: args.len(),
                span,
            });
        }

        let dim = match args.first() {
            Some(arg) => match arg.as_constant() {
                Some(dim @ 0..=2) => dim as u8,
                _ => {
                    return Err(CompileError::InvalidDimension {
                        name: name.to_string(),
                        span: arg.span,
                    })
                }
            },
            None => 0,
        };

        let dst = self.alloc(span)?;
        self.instructions.push(Instruction::SREG { dst, query, dim });
        Ok((dst, query.result_type()))
    }

    fn emit_binary(
        &mut self,
        op: BinOp,
        (lhs, lhs_ty): (Register, Type),
        (rhs, rhs_ty): (Register, Type),
        span: Span,
    ) -> Result<(Register, Type), CompileError> {
        let ty = Type::promote(lhs_ty, rhs_ty);
        let src1 = self.convert(lhs, lhs_ty, ty, span)?;
        let src2 = self.convert(rhs, rhs_ty, ty, span)?;
        let dst = self.alloc(span)?;

        let instruction = match op {
            BinOp::Add => Instruction::ADD { ty, dst, src1, src2 },
            BinOp::Sub => Instruction::SUB { ty, dst, src1, src2 },
            BinOp::Mul => Instruction::MUL { ty, dst, src1, src2 },
            BinOp::Div => Instruction::DIV { ty, dst, src1, src2 },
            BinOp::Rem => Instruction::REM { ty, dst, src1, src2 },
        };
        self.instructions.push(instruction);
        Ok((dst, ty))
    }

    fn convert(&mut self, src: Register, from: Type, to: Type, span: Span) -> Result<Register, CompileError> {
        if from == to {
            return Ok(src);
        }
        let dst = self.alloc(span)?;
        self.instructions.push(Instruction::CVT { dst_ty: to, dst, src });
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;
    use crate::isa::MemoryFence;

    fn lower(source: &str) -> Result<KernelProgram, CompileError> {
        let kernels = parse(source)?;
        KernelCodegen::new(&kernels[0]).lower()
    }

    #[test]
    fn test_simple_store() {
        let program = lower("__kernel void k(__global int *out) { out[get_global_id(0)] = 7; }").unwrap();
        assert!(program.validate().is_ok());
        assert_eq!(
            program.instructions,
            vec![
                Instruction::SREG {
                    dst: Register(0),
                    query: WorkItemQuery::GlobalId,
                    dim: 0,
                },
                Instruction::MOV_IMM {
                    ty: Type::I32,
                    dst: Register(1),
                    value: 7,
                },
                Instruction::STG {
                    ty: Type::I32,
                    src: Register(1),
                    arg: 0,
                    index: Register(0),
                },
                Instruction::EXIT,
            ]
        );
        assert_eq!(program.register_count, 2);
    }

    #[test]
    fn test_promotion_inserts_conversions() {
        let program = lower("__kernel void k(__global int *out) { int a = 1; out[0] = a + get_local_id(0); }").unwrap();
        assert!(program.validate().is_ok());
        assert!(program
            .instructions
            .iter()
            .any(|inst| matches!(inst, Instruction::CVT { dst_ty: Type::U64, .. })));
        assert!(program
            .instructions
            .iter()
            .any(|inst| matches!(inst, Instruction::ADD { ty: Type::U64, .. })));
        assert!(program
            .instructions
            .iter()
            .any(|inst| matches!(inst, Instruction::CVT { dst_ty: Type::I32, .. })));
    }

    #[test]
    fn test_scalar_params_loaded_at_entry() {
        let program = lower("__kernel void k(__global int *out, int bias) { out[0] = bias; }").unwrap();
        assert_eq!(
            program.instructions[0],
            Instruction::LDARG {
                ty: Type::I32,
                dst: Register(0),
                arg: 1,
            }
        );
    }

    #[test]
    fn test_barrier_and_return() {
        let program =
            lower("__kernel void k(__global int *b) { int a = b[1]; barrier(CLK_LOCAL_MEM_FENCE); b[1] = a; return; }")
                .unwrap();
        assert_eq!(program.barrier_count(), 1);
        assert_eq!(
            program
                .instructions
                .iter()
                .filter(|inst| matches!(inst, Instruction::EXIT))
                .count(),
            1
        );
        assert!(program.instructions.contains(&Instruction::BarSync {
            fence: MemoryFence::Local
        }));
    }

    #[test]
    fn test_semantic_errors() {
        assert!(matches!(
            lower("__kernel void k(__global int *out) { out[0] = missing; }"),
            Err(CompileError::UnknownIdentifier { ref name, .. }) if name == "missing"
        ));
        assert!(matches!(
            lower("__kernel void k(__constant int *in) { in[0] = 1; }"),
            Err(CompileError::StoreToReadOnly { .. })
        ));
        assert!(matches!(
            lower("__kernel void k(__global int *out) { out[0] = get_global_id(); }"),
            Err(CompileError::BuiltinArity {
                expected: 1,
                found: 0,
                ..
            })
        ));
        assert!(matches!(
            lower("__kernel void k(__global int *out) { out[0] = get_global_id(3); }"),
            Err(CompileError::InvalidDimension { .. })
        ));
        assert!(matches!(
            lower("__kernel void k(__global int *out) { const int a = 1; a = 2; }"),
            Err(CompileError::NotAssignable { .. })
        ));
        assert!(matches!(
            lower("__kernel void k(__global int *out) { int a = 1; int a = 2; }"),
            Err(CompileError::Redeclared { .. })
        ));
        assert!(matches!(
            lower("__kernel void k(__global int *out) { out[0] = out; }"),
            Err(CompileError::PointerAsValue { .. })
        ));
        assert!(matches!(
            lower("__kernel void k(__global int *out) { out[0] = sqrt(2); }"),
            Err(CompileError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_register_limit() {
        let mut body = String::new();
        for i in 0..300 {
            body.push_str(&format!("int v{i} = {i};\n"));
        }
        let source = format!("__kernel void k(__global int *out) {{ {body} }}");
        assert!(matches!(lower(&source), Err(CompileError::TooManyRegisters { .. })));
    }
}
