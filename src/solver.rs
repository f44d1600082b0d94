//! Constraint solving (C8). Grounded on the teacher's
//! `evm/concolic/concolic_host.rs` z3 bridging (the `bv_from_u256!`
//! pattern translating 256-bit words into bitvectors). Per the Design
//! Notes redesign flag ("construct a fresh context and solver per call
//! instead of a shared global instance"), every `negate` call owns its
//! `z3::Context` end to end.
use crate::symbolic::{BinOp, Expr, UnOp, Var};
use crate::types::Word;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use z3::ast::{Ast, BV};
use z3::{Config, Context, SatResult, Solver as Z3Solver};

fn const_bv<'ctx>(ctx: &'ctx Context, value: Word) -> BV<'ctx> {
    let int = z3::ast::Int::from_str(ctx, &value.to_string()).expect("decimal literal");
    int.int2bv(256)
}

fn to_bv<'ctx>(
    ctx: &'ctx Context,
    expr: &Expr,
    vars: &mut HashMap<Var, BV<'ctx>>,
) -> BV<'ctx> {
    match expr {
        Expr::Const(w) => const_bv(ctx, *w),
        Expr::Var(v) => vars
            .entry(*v)
            .or_insert_with(|| BV::new_const(ctx, v.name(), 256))
            .clone(),
        Expr::Bin(op, lhs, rhs) => {
            let l = to_bv(ctx, lhs, vars);
            let r = to_bv(ctx, rhs, vars);
            match op {
                BinOp::Add => l.bvadd(&r),
                BinOp::Sub => l.bvsub(&r),
                BinOp::Mul => l.bvmul(&r),
                BinOp::Div => l.bvudiv(&r),
                BinOp::SDiv => l.bvsdiv(&r),
                BinOp::Mod => l.bvurem(&r),
                BinOp::SMod => l.bvsrem(&r),
                BinOp::And => l.bvand(&r),
                BinOp::Or => l.bvor(&r),
                BinOp::Xor => l.bvxor(&r),
                BinOp::Shl => l.bvshl(&r),
                BinOp::Shr => l.bvlshr(&r),
                BinOp::Sar => l.bvashr(&r),
                BinOp::Lt => bool_to_word(ctx, l.bvult(&r)),
                BinOp::Gt => bool_to_word(ctx, l.bvugt(&r)),
                BinOp::Slt => bool_to_word(ctx, l.bvslt(&r)),
                BinOp::Sgt => bool_to_word(ctx, l.bvsgt(&r)),
                BinOp::Eq => bool_to_word(ctx, l._eq(&r)),
            }
        }
        Expr::Un(op, inner) => {
            let v = to_bv(ctx, inner, vars);
            match op {
                UnOp::Not => v.bvnot(),
                UnOp::IsZero | UnOp::LNot => {
                    let zero = BV::from_u64(ctx, 0, 256);
                    bool_to_word(ctx, v._eq(&zero))
                }
            }
        }
    }
}

fn bool_to_word<'ctx>(ctx: &'ctx Context, b: z3::ast::Bool<'ctx>) -> BV<'ctx> {
    b.ite(&BV::from_u64(ctx, 1, 256), &BV::from_u64(ctx, 0, 256))
}

/// A satisfying assignment: free variable -> concrete word, ready to feed
/// back into the chromosome's next generation as seed arguments.
pub type Model = HashMap<Var, Word>;

/// Try to find an assignment satisfying every predicate in `path` except
/// that `path[negate_at]` is required to evaluate to the *opposite*
/// truthiness it took at runtime — i.e. find inputs that flip that one
/// branch while keeping every earlier branch decision unchanged.
pub fn negate_branch(path: &[(Rc<Expr>, bool)], negate_at: usize, timeout: Duration) -> Option<Model> {
    if negate_at >= path.len() {
        return None;
    }
    let mut cfg = Config::new();
    cfg.set_timeout_msec(timeout.as_millis() as u32);
    let ctx = Context::new(&cfg);
    let solver = Z3Solver::new(&ctx);
    let mut vars = HashMap::new();
    let zero = BV::from_u64(&ctx, 0, 256);

    for (i, (expr, taken)) in path.iter().enumerate() {
        let bv = to_bv(&ctx, expr, &mut vars);
        let truthy = bv._eq(&zero).not();
        let want = if i == negate_at { !taken } else { *taken };
        if want {
            solver.assert(&truthy);
        } else {
            solver.assert(&truthy.not());
        }
    }

    if solver.check() != SatResult::Sat {
        return None;
    }
    let model = solver.get_model()?;
    let mut out = HashMap::new();
    for (var, bv) in vars {
        if let Some(value) = model.eval(&bv, true) {
            if let Some(s) = value.as_u64() {
                out.insert(var, Word::from(s));
            } else if let Some(big) = bv_as_word(&ctx, &model, &bv) {
                out.insert(var, big);
            }
        }
    }
    Some(out)
}

fn bv_as_word<'ctx>(_ctx: &'ctx Context, model: &z3::Model<'ctx>, bv: &BV<'ctx>) -> Option<Word> {
    let evaluated = model.eval(bv, true)?;
    let s = evaluated.to_string();
    // z3 prints large bitvectors as `#x...` hex literals.
    if let Some(hex) = s.strip_prefix("#x") {
        return Word::from_str_radix(hex, 16).ok();
    }
    s.parse::<u128>().ok().map(Word::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::{expr, TaintKind};

    #[test]
    fn negates_simple_equality_branch() {
        let v = Var::new(TaintKind::CallValue, 0);
        let cond = expr::eq(Expr::var(v), Expr::constant(Word::from(42u64)));
        // Observed: branch NOT taken (callvalue != 42). Ask to flip it.
        let path = vec![(cond, false)];
        let model = negate_branch(&path, 0, Duration::from_millis(500)).expect("sat");
        assert_eq!(model.get(&v), Some(&Word::from(42u64)));
    }

    #[test]
    fn out_of_range_index_returns_none() {
        assert!(negate_branch(&[], 0, Duration::from_millis(50)).is_none());
    }
}
