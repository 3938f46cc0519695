//! Constant-expression evaluation.
//!
//! The input vocabulary is closed: integer literals, constant names, parentheses, `+ - * /`,
//! `<<` and `sizeof(Type)`. Evaluation uses the classic operator/operand two-stack method.
//! Anything that cannot be resolved is a hard error: a wrong constant here would end up in
//! generated marshaling code.

use crate::error::{GenError, Result};
use crate::parser::{tokenize_expr, BinOp, Token};

/// What an expression may refer to.
pub trait EvalContext {
    /// Value of a named constant (recursively evaluated by the implementor).
    fn constant_value(&self, name: &str, depth: usize) -> Result<i64>;
    /// Wire size in bytes of a type.
    fn size_of(&self, type_name: &str) -> Result<i64>;
}

/// Nesting limit for constant references; exceeding it means a reference cycle.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackOp {
    Bin(BinOp),
    Open,
}

/// Evaluate `expr` against `ctx`.
pub fn evaluate(expr: &str, ctx: &impl EvalContext) -> Result<i64> {
    evaluate_at(expr, ctx, 0)
}

/// Evaluate `expr` as part of resolving another constant `depth` levels up.
pub fn evaluate_at(expr: &str, ctx: &impl EvalContext, depth: usize) -> Result<i64> {
    if depth > MAX_DEPTH {
        return Err(GenError::expression(expr, "constant reference cycle"));
    }
    let tokens = tokenize_expr(expr)?;
    if tokens.is_empty() {
        return Err(GenError::expression(expr, "empty expression"));
    }

    let mut operands: Vec<i64> = Vec::new();
    let mut operators: Vec<StackOp> = Vec::new();

    for token in tokens {
        match token {
            Token::Number { value, .. } => operands.push(value),
            Token::Ident(name) => operands.push(ctx.constant_value(&name, depth + 1)?),
            Token::SizeOf(ty) => operands.push(ctx.size_of(&ty)?),
            Token::Open => operators.push(StackOp::Open),
            Token::Close => loop {
                match operators.pop() {
                    Some(StackOp::Open) => break,
                    Some(StackOp::Bin(op)) => apply(expr, op, &mut operands)?,
                    None => return Err(GenError::expression(expr, "unbalanced ')'")),
                }
            },
            Token::Op(op) => {
                loop {
                    match operators.last() {
                        None | Some(StackOp::Open) => break,
                        Some(StackOp::Bin(top)) if op.precedence() > top.precedence() => break,
                        Some(StackOp::Bin(top)) => {
                            let top = *top;
                            operators.pop();
                            apply(expr, top, &mut operands)?;
                        }
                    }
                }
                operators.push(StackOp::Bin(op));
            }
        }
    }

    while let Some(op) = operators.pop() {
        match op {
            StackOp::Bin(op) => apply(expr, op, &mut operands)?,
            StackOp::Open => return Err(GenError::expression(expr, "unbalanced '('")),
        }
    }

    match operands.as_slice() {
        [value] => Ok(*value),
        _ => Err(GenError::expression(expr, "dangling operand")),
    }
}

fn apply(expr: &str, op: BinOp, operands: &mut Vec<i64>) -> Result<()> {
    let rhs = operands
        .pop()
        .ok_or_else(|| GenError::expression(expr, format!("missing operand for '{}'", op.symbol())))?;
    let lhs = operands
        .pop()
        .ok_or_else(|| GenError::expression(expr, format!("missing operand for '{}'", op.symbol())))?;
    let value = match op {
        BinOp::Add => lhs.checked_add(rhs),
        BinOp::Sub => lhs.checked_sub(rhs),
        BinOp::Mul => lhs.checked_mul(rhs),
        BinOp::Div => lhs.checked_div(rhs),
        BinOp::Shl => u32::try_from(rhs)
            .ok()
            .filter(|s| *s < 63)
            .and_then(|s| lhs.checked_mul(1i64 << s)),
    };
    let value = value.ok_or_else(|| {
        GenError::expression(expr, format!("{} {} {} overflows or divides by zero", lhs, op.symbol(), rhs))
    })?;
    operands.push(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Consts(HashMap<&'static str, &'static str>);

    impl EvalContext for Consts {
        fn constant_value(&self, name: &str, depth: usize) -> Result<i64> {
            let expr = self
                .0
                .get(name)
                .ok_or_else(|| GenError::UnresolvedConstant(name.to_string()))?;
            evaluate_at(expr, self, depth)
        }

        fn size_of(&self, type_name: &str) -> Result<i64> {
            match type_name {
                "UINT16" => Ok(2),
                "UINT32" => Ok(4),
                other => Err(GenError::UnknownType {
                    name: other.to_string(),
                    referrer: "sizeof".to_string(),
                }),
            }
        }
    }

    fn ctx() -> Consts {
        Consts(HashMap::from([("FOO", "7"), ("LOOP", "LOOP + 1"), ("BAR", "FOO * 2")]))
    }

    #[test]
    fn precedence_and_parentheses() {
        let c = ctx();
        assert_eq!(evaluate("2 + 3 * 4", &c).unwrap(), 14);
        assert_eq!(evaluate("(2 + 3) * 4", &c).unwrap(), 20);
        assert_eq!(evaluate("1 << 4", &c).unwrap(), 16);
        assert_eq!(evaluate("1 << 2 + 1", &c).unwrap(), 8);
        assert_eq!(evaluate("10 - 4 - 3", &c).unwrap(), 3);
        assert_eq!(evaluate("0x100 / 4 / 2", &c).unwrap(), 32);
    }

    #[test]
    fn sizeof_and_constants() {
        let c = ctx();
        assert_eq!(evaluate("sizeof(UINT32)", &c).unwrap(), 4);
        assert_eq!(evaluate("FOO + 1", &c).unwrap(), 8);
        assert_eq!(evaluate("BAR + sizeof(UINT16) * 2", &c).unwrap(), 18);
    }

    #[test]
    fn failures_are_errors() {
        let c = ctx();
        assert!(evaluate("MISSING + 1", &c).is_err());
        assert!(evaluate("(1 + 2", &c).is_err());
        assert!(evaluate("1 + 2)", &c).is_err());
        assert!(evaluate("1 +", &c).is_err());
        assert!(evaluate("4 / 0", &c).is_err());
        assert!(evaluate("LOOP", &c).is_err());
        assert!(evaluate("", &c).is_err());
    }
}
