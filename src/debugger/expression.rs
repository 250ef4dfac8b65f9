/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Evaluated breakpoint condition expressions.
//!
//! The grammar and parser live with the user interface; the core receives
//! finished trees and evaluates them against the machine. All arithmetic
//! is 32-bit unsigned, C-style: comparison and logical operators yield
//! 0 or 1.

/// What an expression can ask of the machine.
pub trait EvalContext {
    /// A `type:detail` system variable such as `z80:pc` or `time:tstates`.
    fn system_variable(&self, kind: &str, detail: &str) -> u32;
    /// A user-defined debugger variable; undefined names read as 0.
    fn user_variable(&self, name: &str) -> u32;
    fn read_memory(&self, address: u16) -> u8;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Negate,
    /// Bitwise complement.
    Complement,
    /// Logical not.
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    LogicalOr,
    LogicalAnd,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    BitOr,
    BitXor,
    BitAnd,
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Integer(u32),
    /// A user variable by name.
    Variable(String),
    /// A `type:detail` accessor.
    SystemVariable(String, String),
    Unary(UnaryOp, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    /// `*expr` / `expr[index]`: a byte read from emulated memory.
    MemoryRead(Box<Expression>),
}

impl Expression {
    pub fn eval(&self, ctx: &dyn EvalContext) -> u32 {
        match self {
            Expression::Integer(value) => *value,
            Expression::Variable(name) => ctx.user_variable(name),
            Expression::SystemVariable(kind, detail) => ctx.system_variable(kind, detail),
            Expression::Unary(op, operand) => {
                let value = operand.eval(ctx);
                match op {
                    UnaryOp::Negate => value.wrapping_neg(),
                    UnaryOp::Complement => !value,
                    UnaryOp::Not => (value == 0) as u32,
                }
            }
            Expression::Binary(op, lhs, rhs) => {
                let left = lhs.eval(ctx);
                // logical operators short-circuit
                match op {
                    BinaryOp::LogicalOr => {
                        return (left != 0 || rhs.eval(ctx) != 0) as u32;
                    }
                    BinaryOp::LogicalAnd => {
                        return (left != 0 && rhs.eval(ctx) != 0) as u32;
                    }
                    _ => {}
                }
                let right = rhs.eval(ctx);
                match op {
                    BinaryOp::Equal => (left == right) as u32,
                    BinaryOp::NotEqual => (left != right) as u32,
                    BinaryOp::Less => (left < right) as u32,
                    BinaryOp::LessOrEqual => (left <= right) as u32,
                    BinaryOp::Greater => (left > right) as u32,
                    BinaryOp::GreaterOrEqual => (left >= right) as u32,
                    BinaryOp::BitOr => left | right,
                    BinaryOp::BitXor => left ^ right,
                    BinaryOp::BitAnd => left & right,
                    BinaryOp::Add => left.wrapping_add(right),
                    BinaryOp::Subtract => left.wrapping_sub(right),
                    BinaryOp::Multiply => left.wrapping_mul(right),
                    BinaryOp::Divide => {
                        if right == 0 { 0 } else { left / right }
                    }
                    BinaryOp::LogicalOr | BinaryOp::LogicalAnd => unreachable!(),
                }
            }
            Expression::MemoryRead(address) => {
                ctx.read_memory(address.eval(ctx) as u16) as u32
            }
        }
    }

    // convenience constructors for programmatic condition building

    pub fn system(kind: &str, detail: &str) -> Expression {
        Expression::SystemVariable(kind.to_string(), detail.to_string())
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
        Expression::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn deref(address: Expression) -> Expression {
        Expression::MemoryRead(Box::new(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestCtx {
        vars: HashMap<String, u32>,
        memory: Vec<u8>,
    }

    impl EvalContext for TestCtx {
        fn system_variable(&self, kind: &str, detail: &str) -> u32 {
            match (kind, detail) {
                ("z80", "pc") => 0x8000,
                ("z80", "a") => 0x42,
                _ => 0,
            }
        }
        fn user_variable(&self, name: &str) -> u32 {
            self.vars.get(name).copied().unwrap_or(0)
        }
        fn read_memory(&self, address: u16) -> u8 {
            self.memory[address as usize]
        }
    }

    fn ctx() -> TestCtx {
        let mut memory = vec![0u8; 0x10000];
        memory[0x8000] = 0x3e;
        TestCtx { vars: [("count".to_string(), 7)].iter().cloned().collect(), memory }
    }

    #[test]
    fn arithmetic_and_comparison() {
        let ctx = ctx();
        let expr = Expression::binary(
            BinaryOp::Equal,
            Expression::system("z80", "a"),
            Expression::Integer(0x42),
        );
        assert_eq!(expr.eval(&ctx), 1);

        let expr = Expression::binary(
            BinaryOp::Add,
            Expression::Variable("count".to_string()),
            Expression::Integer(3),
        );
        assert_eq!(expr.eval(&ctx), 10);
    }

    #[test]
    fn deref_reads_emulated_memory() {
        let ctx = ctx();
        let expr = Expression::deref(Expression::system("z80", "pc"));
        assert_eq!(expr.eval(&ctx), 0x3e);
    }

    #[test]
    fn logical_operators_short_circuit_and_booleanise() {
        let ctx = ctx();
        let expr = Expression::binary(
            BinaryOp::LogicalOr,
            Expression::Integer(0),
            Expression::Integer(25),
        );
        assert_eq!(expr.eval(&ctx), 1);
        let expr = Expression::Unary(UnaryOp::Not, Box::new(Expression::Integer(0)));
        assert_eq!(expr.eval(&ctx), 1);
    }

    #[test]
    fn division_by_zero_is_zero_not_a_panic() {
        let ctx = ctx();
        let expr = Expression::binary(
            BinaryOp::Divide,
            Expression::Integer(10),
            Expression::Integer(0),
        );
        assert_eq!(expr.eval(&ctx), 0);
    }
}
