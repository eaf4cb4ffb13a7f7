// (C) 2020 Brandon Lewis
//
// Turning a flow graph into a code object.
//
// The stages run in a fixed order: measure the stack, pick an
// emission order for the blocks, lay the instructions out and patch
// jump targets, rewrite symbolic operands to intern-table indices,
// then pack bytes and the line-number table. Every stage is
// deterministic for a given graph; so is the output.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::code::{index_of, CodeFlag, CodeObject, Value};
use crate::depth;
use crate::graph::{Arg, BlockId, CodeGraph, Error, FlowGraph, Insn, Result};
use crate::opcode::{Opcode, CMP_OP};
use crate::util;


pub fn assemble(graph: CodeGraph) -> Result<CodeObject> {
    let CodeGraph {
        graph: flow,
        name,
        filename,
        flags,
        docstring,
        klass,
        mut consts,
        names,
        varnames,
        freevars,
        cellvars,
        mut argcount,
    } = graph;

    let stacksize = depth::max_stack_depth(&flow);
    let order = order_blocks(&flow)?;
    trace!("emission order: {:?}", order);
    let insts = flatten(&flow, &order);

    consts.insert(0, docstring);

    // Cell variables that are also locals come first, in varnames
    // order; the rest keep their original order.
    let mut cells: Vec<String> = varnames
        .iter()
        .filter(|v| cellvars.contains(*v))
        .cloned()
        .collect();
    for c in &cellvars {
        if !varnames.contains(c) {
            cells.push(c.clone());
        }
    }
    let cellvars = cells;

    let mut closure = cellvars.clone();
    closure.extend(freevars.iter().cloned());

    let mut enc = ArgEncoder { klass, consts, names, varnames, closure };
    let insts = enc.encode(insts)?;
    let ArgEncoder { consts, names, varnames, .. } = enc;

    let mut asm = Assembler::new();
    for inst in &insts {
        asm.emit(inst)?;
    }
    trace!("code: {}", util::hex(&asm.code));

    let nlocals = if flags.contains(CodeFlag::Newlocals) {
        varnames.len() as u32
    } else {
        0
    };
    // The *args slot was discounted when the flag was set; the
    // **kwargs slot is discounted here.
    if flags.contains(CodeFlag::Varkeywords) {
        argcount -= 1;
    }

    Ok(CodeObject {
        argcount,
        nlocals,
        stacksize: stacksize as u32,
        flags,
        code: asm.code,
        consts,
        names,
        varnames,
        freevars,
        cellvars,
        filename,
        name,
        firstlineno: asm.first_line,
        lnotab: asm.lnotab,
    })
}


// Pick the order blocks are emitted in.
//
// Rules: a block's fall-through successor comes immediately after it;
// the target of a relative jump comes somewhere after the jump; every
// reachable block appears. When a chain runs out without an
// unconditional transfer, the exit block is appended right there so
// execution falls into it.
pub fn order_blocks(g: &FlowGraph) -> Result<Vec<BlockId>> {
    let mut order = Vec::new();

    // Reachable set, depth-first from the entry.
    let mut remaining: BTreeSet<BlockId> = BTreeSet::new();
    let mut todo = vec![g.entry()];
    while let Some(b) = todo.pop() {
        if !remaining.insert(b) {
            continue;
        }
        for c in g.block(b).children() {
            if !remaining.contains(&c) {
                todo.push(c);
            }
        }
    }

    // Ordering leans on the next/prev links mirroring each other.
    for block in g.blocks() {
        if let Some(n) = block.next() {
            debug_assert_eq!(g.block(n).prev(), Some(block.id()));
        }
    }

    // dominators[c] holds the blocks that must be emitted before c.
    // A follower's whole fall-through chain is emitted as one run, so
    // the constraint is pushed backward along prev links to keep the
    // chain contiguous.
    let mut dominators: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
    for &b in &remaining {
        dominators.entry(b).or_insert_with(BTreeSet::new);
        for follower in g.block(b).followers() {
            let mut c = follower;
            loop {
                dominators.entry(c).or_insert_with(BTreeSet::new).insert(b);
                match g.block(c).prev() {
                    Some(p) if p != b => c = p,
                    _ => break,
                }
            }
        }
    }

    fn find_next(
        remaining: &BTreeSet<BlockId>,
        dominators: &BTreeMap<BlockId, BTreeSet<BlockId>>,
    ) -> Result<BlockId> {
        for &b in remaining {
            let free = match dominators.get(&b) {
                Some(dom) => dom.iter().all(|c| !remaining.contains(c)),
                None => true,
            };
            if free {
                return Ok(b);
            }
        }
        Err(Error::CircularDependency)
    }

    let mut b = g.entry();
    loop {
        order.push(b);
        remaining.remove(&b);
        if let Some(n) = g.block(b).next() {
            b = n;
            continue;
        }
        if b != g.exit() && !g.block(b).has_unconditional_transfer() {
            order.push(g.exit());
        }
        if remaining.is_empty() {
            break;
        }
        b = find_next(&remaining, &dominators)?;
    }
    Ok(order)
}


// Lay the ordered blocks out and replace symbolic jump targets with
// byte offsets. Two passes: the first records where each block
// begins, the second rewrites relative jumps to the distance from the
// following instruction and absolute jumps to the target's offset.
pub fn flatten(g: &FlowGraph, order: &[BlockId]) -> Vec<Insn> {
    let mut begin: BTreeMap<BlockId, i64> = BTreeMap::new();
    let mut pc: i64 = 0;
    for &b in order {
        begin.insert(b, pc);
        for inst in g.block(b).insts() {
            pc += inst.width() as i64;
        }
    }

    let mut insts = Vec::new();
    let mut pc: i64 = 0;
    for &b in order {
        for inst in g.block(b).insts() {
            pc += inst.width() as i64;
            let inst = match inst {
                Insn::OpArg(op, Arg::Block(t)) if op.has_jrel() => {
                    Insn::OpArg(*op, Arg::Int(begin[t] - pc))
                }
                Insn::OpArg(op, Arg::Block(t)) if op.has_jabs() => {
                    Insn::OpArg(*op, Arg::Int(begin[t]))
                }
                inst => inst.clone(),
            };
            insts.push(inst);
        }
    }
    insts
}


// Which intern tables an opcode's symbolic operand drives. The Python
// 2 code object keeps names and varnames as distinct but overlapping
// tables; several opcodes feed both.
#[derive(Copy, Clone, Debug, PartialEq)]
enum EncodeAction {
    // Intern the value (or a recursively assembled code object) in
    // consts.
    Const,
    // Locals: intern in names too, index into varnames.
    Fast,
    // Name-bearing opcodes: outside a class body also intern in
    // varnames, index into names.
    NameDefault,
    // Cell and free variables: intern in names and varnames, index
    // into the closure list.
    Deref,
    // Intern in varnames, index into the closure list.
    Closure,
    // Index into the fixed comparator table.
    Cmp,
    // Operand is already a small integer.
    Passthrough,
}

fn action(op: Opcode) -> EncodeAction {
    use Opcode::*;
    match op {
        LoadConst => EncodeAction::Const,
        LoadFast | StoreFast | DeleteFast => EncodeAction::Fast,
        LoadName | StoreName | DeleteName | ImportName | ImportFrom
        | LoadAttr | StoreAttr | DeleteAttr | LoadGlobal | StoreGlobal
        | DeleteGlobal => EncodeAction::NameDefault,
        LoadDeref | StoreDeref => EncodeAction::Deref,
        LoadClosure => EncodeAction::Closure,
        CompareOp => EncodeAction::Cmp,
        _ => EncodeAction::Passthrough,
    }
}


struct ArgEncoder {
    klass: bool,
    consts: Vec<Value>,
    names: Vec<String>,
    varnames: Vec<String>,
    closure: Vec<String>,
}

impl ArgEncoder {
    fn encode(&mut self, insts: Vec<Insn>) -> Result<Vec<Insn>> {
        insts.into_iter().map(|inst| self.encode_inst(inst)).collect()
    }

    fn encode_inst(&mut self, inst: Insn) -> Result<Insn> {
        let (op, arg) = match inst {
            Insn::OpArg(op, arg) => (op, arg),
            inst => return Ok(inst),
        };
        let arg = match (action(op), arg) {
            (EncodeAction::Const, Arg::Const(v)) => {
                Arg::Int(index_of(&v, &mut self.consts) as i64)
            }
            (EncodeAction::Const, Arg::Code(child)) => {
                let code = child.make_code_object()?;
                let v = Value::Code(Rc::new(code));
                Arg::Int(index_of(&v, &mut self.consts) as i64)
            }
            (EncodeAction::Fast, Arg::Name(n)) => {
                index_of(&n, &mut self.names);
                Arg::Int(index_of(&n, &mut self.varnames) as i64)
            }
            (EncodeAction::NameDefault, Arg::Name(n)) => {
                if !self.klass {
                    index_of(&n, &mut self.varnames);
                }
                Arg::Int(index_of(&n, &mut self.names) as i64)
            }
            (EncodeAction::Deref, Arg::Name(n)) => {
                index_of(&n, &mut self.names);
                index_of(&n, &mut self.varnames);
                Arg::Int(index_of(&n, &mut self.closure) as i64)
            }
            (EncodeAction::Closure, Arg::Name(n)) => {
                index_of(&n, &mut self.varnames);
                Arg::Int(index_of(&n, &mut self.closure) as i64)
            }
            (EncodeAction::Cmp, Arg::Name(n)) => {
                match CMP_OP.iter().position(|c| *c == n.as_str()) {
                    Some(i) => Arg::Int(i as i64),
                    None => return Err(Error::UnknownCompareOp(n)),
                }
            }
            (_, arg @ Arg::Int(_)) => arg,
            (_, _) => return Err(Error::UnresolvedArg(op)),
        };
        Ok(Insn::OpArg(op, arg))
    }
}


// Packs instructions to bytes and builds the line-number table.
//
// The line table is a string of (addr_delta, line_delta) byte pairs.
// For every SET_LINENO after the first, the distance from the
// previous one is split into as many 255-capped pairs as it takes.
// Line numbers that move backward cannot be encoded in unsigned
// deltas and are dropped.
pub struct Assembler {
    pub code: Vec<u8>,
    pub lnotab: Vec<u8>,
    pub first_line: u32,
    last_line: u32,
    last_off: usize,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler {
            code: Vec::new(),
            lnotab: Vec::new(),
            first_line: 0,
            last_line: 0,
            last_off: 0,
        }
    }

    pub fn emit(&mut self, inst: &Insn) -> Result<()> {
        match inst {
            Insn::Op(op) => self.code.push(op.number()),
            Insn::OpArg(Opcode::SetLineno, Arg::Int(line)) => {
                self.next_line(*line as u32);
            }
            Insn::OpArg(op, Arg::Int(oparg)) => {
                let oparg = *oparg;
                if oparg < 0 || oparg > 0xffff {
                    return Err(Error::OpargOutOfRange(*op, oparg));
                }
                self.code.push(op.number());
                self.code.push((oparg & 0xff) as u8);
                self.code.push((oparg >> 8) as u8);
            }
            Insn::OpArg(op, _) => return Err(Error::UnresolvedArg(*op)),
        }
        Ok(())
    }

    fn next_line(&mut self, lineno: u32) {
        if self.first_line == 0 {
            self.first_line = lineno;
            self.last_line = lineno;
            return;
        }
        let mut addr = self.code.len() - self.last_off;
        let line = lineno as i64 - self.last_line as i64;
        if line < 0 {
            return;
        }
        let mut line = line as usize;
        while addr > 255 {
            self.lnotab.push(255);
            self.lnotab.push(0);
            addr -= 255;
        }
        while line > 255 {
            self.lnotab.push(addr as u8);
            self.lnotab.push(255);
            line -= 255;
            addr = 0;
        }
        if addr > 0 || line > 0 {
            self.lnotab.push(addr as u8);
            self.lnotab.push(line as u8);
        }
        self.last_line = lineno;
        self.last_off = self.code.len();
    }
}
