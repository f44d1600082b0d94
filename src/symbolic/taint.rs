//! Taint + symbolic engine (C4). Grounded on spec.md 4.4 and on the
//! source's `fuzzer/engine/analysis/symbolic_taint_analysis.py`: a
//! callstack of per-depth record lists, one record cloned and mutated per
//! executed instruction.
use crate::symbolic::expr::{self, Expr, TaintKind, Var};
use crate::types::{Address, Word};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// A "taint list": deduplicated symbolic expressions flowing into a slot.
pub type TaintList = Vec<Rc<Expr>>;

fn union(a: &TaintList, b: &TaintList) -> TaintList {
    let mut out = a.clone();
    for e in b {
        if !out.contains(e) {
            out.push(e.clone());
        }
    }
    out
}

fn single(e: Rc<Expr>) -> TaintList {
    vec![e]
}

/// One shadow frame, cloned on every executed instruction (spec.md 3:
/// "Taint record... One record per depth per step, cloned on every step").
#[derive(Debug, Clone, Default)]
pub struct TaintRecord {
    pub input: Option<TaintList>,
    pub value: Option<TaintList>,
    pub output: Option<TaintList>,
    pub address: Option<Address>,
    pub stack: Vec<Option<TaintList>>,
    pub memory: HashMap<usize, TaintList>,
}

impl TaintRecord {
    fn pop_n(&mut self, n: usize) -> Vec<Option<TaintList>> {
        let len = self.stack.len();
        let start = len.saturating_sub(n);
        self.stack.split_off(start)
    }

    fn push(&mut self, v: Option<TaintList>) {
        self.stack.push(v);
    }

    /// `check_taint`: returns true if `idx`-from-top carries taint,
    /// optionally filtered to a single `TaintKind`.
    pub fn slot_tainted(&self, idx_from_top: usize, source: Option<TaintKind>) -> bool {
        let len = self.stack.len();
        if idx_from_top >= len {
            return false;
        }
        match &self.stack[len - 1 - idx_from_top] {
            None => false,
            Some(list) => match source {
                None => !list.is_empty(),
                Some(k) => list.iter().any(|e| e.free_vars().iter().any(|v| v.kind == k)),
            },
        }
    }

    pub fn slot(&self, idx_from_top: usize) -> Option<&TaintList> {
        let len = self.stack.len();
        if idx_from_top >= len {
            return None;
        }
        self.stack[len - 1 - idx_from_top].as_ref()
    }
}

/// Per-transaction taint engine: a callstack of per-depth record lists.
pub struct TaintEngine {
    /// `frames[depth - 1]` is the ordered history of records observed at
    /// that call depth.
    frames: Vec<Vec<TaintRecord>>,
    storage: HashMap<Word, TaintList>,
    /// Loop guard (spec.md 4.4): opcodes at a pc already processed this
    /// transaction degrade to plain taint union to bound expression size.
    processed_pcs: HashSet<usize>,
    tx_index: u32,
}

impl TaintEngine {
    pub fn new(tx_index: u32) -> Self {
        Self {
            frames: vec![vec![TaintRecord::default()]],
            storage: HashMap::new(),
            processed_pcs: HashSet::new(),
            tx_index,
        }
    }

    pub fn current(&self) -> &TaintRecord {
        self.frames.last().unwrap().last().unwrap()
    }

    fn current_mut_clone(&self) -> TaintRecord {
        self.current().clone()
    }

    fn commit(&mut self, rec: TaintRecord) {
        self.frames.last_mut().unwrap().push(rec);
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Depth grew (CALL/DELEGATECALL/etc entered a new frame): push a new
    /// list seeded from the outer frame's latest record, with `input`,
    /// `value`, `output` cleared (spec.md 4.4: "Calls ... clear
    /// input/value/output in the active record").
    pub fn enter_call(&mut self) {
        let mut seed = self.current_mut_clone();
        seed.input = None;
        seed.value = None;
        seed.output = None;
        self.frames.push(vec![seed]);
    }

    pub fn exit_call(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn loop_guarded(&mut self, pc: usize) -> bool {
        !self.processed_pcs.insert(pc)
    }

    /// Introduce a fresh free variable onto the top of the shadow stack,
    /// per the instruction's output count (spec.md 4.4 `introduce_taint`).
    pub fn introduce_taint(&mut self, kind: TaintKind, extra: Option<u64>) {
        let mut rec = self.current_mut_clone();
        let var = match extra {
            Some(e) => Var::with_extra(kind, self.tx_index, e),
            None => Var::new(kind, self.tx_index),
        };
        rec.push(Some(single(Expr::var(var))));
        self.commit(rec);
    }

    pub fn seed_calldatacopy(&mut self, dest_offset: usize, arg_count: u32) {
        let mut rec = self.current_mut_clone();
        let vals = rec.pop_n(3);
        let _ = vals;
        let var = Var::new(TaintKind::CallDataCopy, arg_count);
        rec.memory.insert(dest_offset, single(Expr::var(var)));
        self.commit(rec);
    }

    // --- stack manipulation -------------------------------------------------

    pub fn push_concrete(&mut self) {
        let mut rec = self.current_mut_clone();
        rec.push(None);
        self.commit(rec);
    }

    pub fn pop(&mut self) {
        let mut rec = self.current_mut_clone();
        rec.pop_n(1);
        self.commit(rec);
    }

    pub fn dup(&mut self, n: usize) {
        let mut rec = self.current_mut_clone();
        let v = rec.slot(n - 1).cloned();
        rec.push(v);
        self.commit(rec);
    }

    pub fn swap(&mut self, n: usize) {
        let mut rec = self.current_mut_clone();
        let len = rec.stack.len();
        if n < len {
            rec.stack.swap(len - 1, len - 1 - n);
        }
        self.commit(rec);
    }

    // --- arithmetic / comparison / bitwise -----------------------------------

    /// Pops `n` operands; if any is tainted, either build a new symbolic
    /// term via `build` (when not loop-guarded) or degrade to a plain
    /// taint union; pushes exactly one result slot.
    pub fn binary_op(
        &mut self,
        pc: usize,
        build: impl FnOnce(Rc<Expr>, Rc<Expr>) -> Rc<Expr>,
        concrete_lhs: Word,
        concrete_rhs: Word,
    ) {
        let mut rec = self.current_mut_clone();
        let operands = rec.pop_n(2);
        let lhs = operands[0].clone();
        let rhs = operands[1].clone();
        if lhs.is_none() && rhs.is_none() {
            rec.push(None);
            self.commit(rec);
            return;
        }
        if self.loop_guarded(pc) {
            let result = union(&lhs.unwrap_or_default(), &rhs.unwrap_or_default());
            rec.push(Some(result));
            self.commit(rec);
            return;
        }
        let lhs_expr = lhs
            .as_ref()
            .and_then(|l| l.last().cloned())
            .unwrap_or_else(|| Expr::constant(concrete_lhs));
        let rhs_expr = rhs
            .as_ref()
            .and_then(|r| r.last().cloned())
            .unwrap_or_else(|| Expr::constant(concrete_rhs));
        rec.push(Some(single(build(lhs_expr, rhs_expr))));
        self.commit(rec);
    }

    /// Opcodes that always degrade to taint union (EXP, BYTE,
    /// SIGNEXTEND, SHA3, and any call-like opcode): pop `n_in`, push
    /// `n_out` copies of the union.
    pub fn degrade(&mut self, n_in: usize, n_out: usize) {
        let mut rec = self.current_mut_clone();
        let operands = rec.pop_n(n_in);
        let merged = operands
            .into_iter()
            .flatten()
            .fold(Vec::new(), |acc, list| union(&acc, &list));
        for _ in 0..n_out {
            rec.push(if merged.is_empty() {
                None
            } else {
                Some(merged.clone())
            });
        }
        self.commit(rec);
    }

    pub fn unary_not(&mut self, build: impl FnOnce(Rc<Expr>) -> Rc<Expr>, concrete: Word) {
        let mut rec = self.current_mut_clone();
        let operand = rec.pop_n(1).remove(0);
        match operand {
            None => rec.push(None),
            Some(list) => {
                let e = list.last().cloned().unwrap_or_else(|| Expr::constant(concrete));
                rec.push(Some(single(build(e))));
            }
        }
        self.commit(rec);
    }

    // --- memory / storage -----------------------------------------------------

    pub fn mload(&mut self, offset: usize) {
        let mut rec = self.current_mut_clone();
        rec.pop_n(1);
        let v = rec.memory.get(&offset).cloned();
        rec.push(v);
        self.commit(rec);
    }

    pub fn mstore(&mut self, offset: usize) {
        let mut rec = self.current_mut_clone();
        let vals = rec.pop_n(2);
        if let Some(list) = vals[1].clone() {
            rec.memory.insert(offset, list);
        } else {
            rec.memory.remove(&offset);
        }
        self.commit(rec);
    }

    pub fn sload(&mut self, slot: Word) {
        let mut rec = self.current_mut_clone();
        rec.pop_n(1);
        let v = self.storage.get(&slot).cloned();
        rec.push(v);
        self.commit(rec);
    }

    pub fn sstore(&mut self, slot: Word) {
        let mut rec = self.current_mut_clone();
        let vals = rec.pop_n(2);
        match vals[0].clone() {
            Some(list) => {
                self.storage.insert(slot, list);
            }
            None => {
                self.storage.remove(&slot);
            }
        }
        self.commit(rec);
    }

    /// SHA3: pop the (offset, len) operands and push the union of
    /// whatever memory-region taint they span, per spec.md 4.2's "stash
    /// the input memory slice ... for the taint engine to consume" —
    /// the hash itself is opaque, but if any byte hashed was
    /// attacker-controlled the digest carries that taint forward.
    pub fn sha3(&mut self, offset: usize, len: usize) {
        let mut rec = self.current_mut_clone();
        rec.pop_n(2);
        let merged = rec
            .memory
            .iter()
            .filter(|(&key, _)| key >= offset && key < offset + len)
            .fold(Vec::new(), |acc, (_, list)| union(&acc, list));
        rec.push(if merged.is_empty() { None } else { Some(merged) });
        self.commit(rec);
    }

    /// CREATE/CREATE2: pop `n` operands, push one opaque (untainted)
    /// result (the new contract's address isn't attacker data), clear
    /// input/value/output.
    pub fn call_opaque(&mut self, n_in: usize) {
        let mut rec = self.current_mut_clone();
        rec.pop_n(n_in);
        rec.push(None);
        rec.input = None;
        rec.value = None;
        rec.output = None;
        self.commit(rec);
    }

    /// CALL/CALLCODE/DELEGATECALL/STATICCALL: pop `n` operands, push the
    /// success flag as a genuinely tainted `TaintKind::Call` free
    /// variable (spec.md 4.4/4.5: the success flag must stay a live
    /// symbolic value so SWC-104 can tell whether a later branch actually
    /// inspected it), clear input/value/output. `call_id` is a per-call-site
    /// identifier (the CALL's own pc) so two different call sites in the
    /// same transaction get distinct variables.
    pub fn call_tainted(&mut self, n_in: usize, call_id: u64) -> Var {
        let mut rec = self.current_mut_clone();
        rec.pop_n(n_in);
        let var = Var::with_extra(TaintKind::Call, self.tx_index, call_id);
        rec.push(Some(single(Expr::var(var))));
        rec.input = None;
        rec.value = None;
        rec.output = None;
        self.commit(rec);
        var
    }
}

pub use expr::BinOp;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::expr::TaintKind;

    #[test]
    fn introduce_and_check_taint() {
        let mut eng = TaintEngine::new(0);
        eng.introduce_taint(TaintKind::CallValue, None);
        assert!(eng.current().slot_tainted(0, None));
        assert!(eng.current().slot_tainted(0, Some(TaintKind::CallValue)));
        assert!(!eng.current().slot_tainted(0, Some(TaintKind::Caller)));
    }

    #[test]
    fn binary_op_builds_expression_when_tainted() {
        let mut eng = TaintEngine::new(0);
        eng.introduce_taint(TaintKind::CallValue, None);
        eng.push_concrete();
        eng.binary_op(1, expr::add, Word::from(0), Word::from(5));
        assert!(eng.current().slot_tainted(0, None));
    }

    #[test]
    fn loop_guard_degrades_to_union() {
        let mut eng = TaintEngine::new(0);
        eng.introduce_taint(TaintKind::CallValue, None);
        eng.push_concrete();
        eng.binary_op(1, expr::add, Word::from(0), Word::from(5));
        eng.introduce_taint(TaintKind::Caller, None);
        eng.push_concrete();
        // Same pc processed again -> degrade.
        eng.binary_op(1, expr::add, Word::from(0), Word::from(5));
        assert!(eng.current().slot_tainted(0, None));
    }

    #[test]
    fn sstore_sload_round_trip() {
        let mut eng = TaintEngine::new(0);
        eng.introduce_taint(TaintKind::CallValue, None); // value
        eng.push_concrete(); // slot
        eng.sstore(Word::from(7));
        eng.push_concrete(); // slot pushed for sload
        eng.sload(Word::from(7));
        assert!(eng.current().slot_tainted(0, Some(TaintKind::CallValue)));
    }
}
