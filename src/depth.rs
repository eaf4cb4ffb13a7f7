// Max operand-stack depth estimation.
//
// Each block gets a single number: the largest prefix sum of its
// instructions' stack effects. A depth-first walk from the entry then
// sums those numbers along every path and keeps the maximum. Depth is
// not propagated across jump edges instruction-by-instruction, so the
// result is an upper bound rather than the exact high-water mark;
// the VM only needs the bound.

use crate::graph::{Arg, FlowGraph, Insn};
use crate::opcode::Opcode;


pub fn max_stack_depth(g: &FlowGraph) -> i32 {
    // Per-block depths, indexed by block id.
    let mut depths = vec![0; g.blocks().count()];
    for b in g.blocks() {
        depths[b.id().0 as usize] = block_depth(b.insts());
    }

    let mut best = 0;
    let mut seen = vec![false; depths.len()];
    let mut todo = vec![(g.entry(), 0)];

    // Worklist rather than recursion: nested control flow can make
    // the graph arbitrarily deep.
    while let Some((id, d)) = todo.pop() {
        if seen[id.0 as usize] {
            if d > best {
                best = d;
            }
            continue;
        }
        seen[id.0 as usize] = true;

        let d = d + depths[id.0 as usize];
        let block = g.block(id);
        let children = block.children();
        if children.is_empty() {
            // A block with no successors falls through to the exit
            // block unless it is the exit block.
            if block.label() == "exit" {
                if d > best {
                    best = d;
                }
            } else {
                todo.push((g.exit(), d));
            }
        } else {
            for c in children {
                todo.push((c, d));
            }
        }
    }

    best
}


// Largest intermediate stack depth over one block's instructions.
pub fn block_depth(insts: &[Insn]) -> i32 {
    let mut depth = 0;
    let mut max = 0;
    for inst in insts {
        depth += effect(inst);
        if depth > max {
            max = depth;
        }
    }
    max
}


// Net stack effect of a single instruction. Resolution order: the
// exact per-opcode table, then the mnemonic-prefix patterns, then the
// operand-dependent formulas. Anything unmatched counts as zero.
fn effect(inst: &Insn) -> i32 {
    let op = inst.opcode();
    if let Some(delta) = fixed_effect(op) {
        return delta;
    }
    let name = op.name();
    if name.starts_with("BINARY_") {
        return -1;
    }
    if name.starts_with("LOAD_") {
        return 1;
    }
    if let Insn::OpArg(_, Arg::Int(n)) = inst {
        if let Some(delta) = arg_effect(op, *n) {
            return delta;
        }
    }
    0
}


fn fixed_effect(op: Opcode) -> Option<i32> {
    use Opcode::*;
    let delta = match op {
        PopTop => -1,
        DupTop => 1,
        ListAppend => -1,
        SetAdd => -1,
        MapAdd => -2,
        Slice1 => -1,
        Slice2 => -1,
        Slice3 => -2,
        StoreSlice0 => -1,
        StoreSlice1 => -2,
        StoreSlice2 => -2,
        StoreSlice3 => -3,
        DeleteSlice0 => -1,
        DeleteSlice1 => -2,
        DeleteSlice2 => -2,
        DeleteSlice3 => -3,
        StoreSubscr => -3,
        DeleteSubscr => -2,
        PrintItem => -1,
        ReturnValue => -1,
        YieldValue => -1,
        ExecStmt => -3,
        BuildClass => -2,
        StoreName => -1,
        StoreAttr => -2,
        DeleteAttr => -1,
        StoreGlobal => -1,
        BuildMap => 1,
        CompareOp => -1,
        StoreFast => -1,
        ImportStar => -1,
        ImportName => -1,
        ImportFrom => 1,
        // Unlike the other LOAD_ opcodes: replaces its operand.
        LoadAttr => 0,
        SetupExcept => 3,
        SetupFinally => 3,
        ForIter => 1,
        WithCleanup => -1,
        _ => return None,
    };
    Some(delta)
}


fn arg_effect(op: Opcode, oparg: i64) -> Option<i32> {
    use Opcode::*;
    let n = oparg as i32;
    let delta = match op {
        UnpackSequence => n - 1,
        BuildTuple | BuildList | BuildSet => -n + 1,
        CallFunction => call_effect(n),
        CallFunctionVar | CallFunctionKw => call_effect(n) - 1,
        CallFunctionVarKw => call_effect(n) - 2,
        MakeFunction => -n,
        // Free variables are not accounted for; the overestimate is
        // harmless in an upper bound.
        MakeClosure => -n,
        BuildSlice => {
            if n == 2 {
                -1
            } else if n == 3 {
                -2
            } else {
                0
            }
        }
        DupTopx => n,
        _ => return None,
    };
    Some(delta)
}


// The operand packs positional argument count in the low byte and
// keyword pair count in the high byte.
fn call_effect(argc: i32) -> i32 {
    let hi = argc / 256;
    let lo = argc % 256;
    -(lo + hi * 2)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FlowGraph;
    use crate::code::Value;

    fn op(o: Opcode) -> Insn {
        Insn::Op(o)
    }

    fn oparg(o: Opcode, n: i64) -> Insn {
        Insn::OpArg(o, Arg::Int(n))
    }

    #[test]
    fn test_fixed_effects() {
        assert_eq!(effect(&op(Opcode::PopTop)), -1);
        assert_eq!(effect(&op(Opcode::DupTop)), 1);
        assert_eq!(effect(&op(Opcode::StoreSubscr)), -3);
        assert_eq!(effect(&op(Opcode::SetupExcept)), 3);
        assert_eq!(effect(&oparg(Opcode::ForIter, 10)), 1);
    }

    #[test]
    fn test_prefix_patterns() {
        assert_eq!(effect(&op(Opcode::BinaryAdd)), -1);
        assert_eq!(effect(&op(Opcode::BinarySubscr)), -1);
        assert_eq!(effect(&oparg(Opcode::LoadConst, 0)), 1);
        assert_eq!(effect(&oparg(Opcode::LoadFast, 0)), 1);
        // The exact table wins over the LOAD_ pattern.
        assert_eq!(effect(&oparg(Opcode::LoadAttr, 0)), 0);
    }

    #[test]
    fn test_operand_dependent_effects() {
        assert_eq!(effect(&oparg(Opcode::UnpackSequence, 3)), 2);
        assert_eq!(effect(&oparg(Opcode::BuildTuple, 3)), -2);
        assert_eq!(effect(&oparg(Opcode::CallFunction, 2)), -2);
        // Two positional arguments and one keyword pair.
        assert_eq!(effect(&oparg(Opcode::CallFunction, 0x0102)), -4);
        assert_eq!(effect(&oparg(Opcode::CallFunctionVarKw, 1)), -3);
        assert_eq!(effect(&oparg(Opcode::MakeFunction, 2)), -2);
        assert_eq!(effect(&oparg(Opcode::BuildSlice, 2)), -1);
        assert_eq!(effect(&oparg(Opcode::BuildSlice, 3)), -2);
        assert_eq!(effect(&oparg(Opcode::DupTopx, 2)), 2);
    }

    #[test]
    fn test_block_depth_is_prefix_max() {
        // Push, push, pop, pop: the high-water mark is two even
        // though the net effect is zero.
        let insts = vec![
            oparg(Opcode::LoadConst, 0),
            oparg(Opcode::LoadConst, 1),
            op(Opcode::PopTop),
            op(Opcode::PopTop),
        ];
        assert_eq!(block_depth(&insts), 2);
    }

    #[test]
    fn test_max_depth_follows_deepest_path() {
        // entry branches to a shallow block or falls through to a
        // deep one; the deep path sets the high-water mark.
        let mut g = FlowGraph::new();
        let shallow = g.new_block();
        g.emit_arg(Opcode::PopJumpIfFalse, Arg::Block(shallow));
        g.next_block(None);
        g.emit_arg(Opcode::LoadConst, Arg::Const(Value::Int(1)));
        g.emit_arg(Opcode::LoadConst, Arg::Const(Value::Int(2)));
        g.emit_arg(Opcode::LoadConst, Arg::Const(Value::Int(3)));
        g.emit(Opcode::ReturnValue);
        g.start_block(shallow);
        g.emit_arg(Opcode::LoadConst, Arg::Const(Value::Int(1)));
        g.emit(Opcode::ReturnValue);

        assert_eq!(max_stack_depth(&g), 3);
    }

    #[test]
    fn test_cycle_terminates() {
        let mut g = FlowGraph::new();
        let top = g.next_block(None);
        g.emit_arg(Opcode::LoadConst, Arg::Const(Value::Int(1)));
        g.emit(Opcode::PopTop);
        g.emit_arg(Opcode::JumpAbsolute, Arg::Block(top));
        assert_eq!(max_stack_depth(&g), 1);
    }
}
