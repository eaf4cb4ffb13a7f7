// (C) 2020 Brandon Lewis
//
// Flow-graph representation for stack-machine bytecode.
//
// A program under construction is a set of basic blocks. Each block
// is a straight-line run of symbolic instructions with at most one
// fall-through successor ("next") and any number of jump targets
// ("out edges"). The front end builds the graph through CodeGraph;
// assembly consumes it exactly once.
//
// Blocks live in an arena owned by the graph and refer to each other
// by id, never by owning links. Ids are assigned monotonically per
// graph, so iterating any id-ordered collection of blocks is
// deterministic across runs. That determinism is load-bearing: the
// emission order, and therefore every byte of output, depends on it.

use crate::code::{CodeFlag, CodeFlags, CodeObject, Value};
use crate::opcode::Opcode;


// The ways assembly can fail. Construction-time misuse of the graph
// (a second fall-through link, a foreign block id) is an assertion
// instead: those are compiler bugs, not recoverable states.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    CircularDependency,
    OpargOutOfRange(Opcode, i64),
    UnknownCompareOp(String),
    UnresolvedArg(Opcode),
}

pub type Result<T> = core::result::Result<T, Error>;


#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);


// Operand of a two-field instruction.
//
// Symbolic forms (Name, Const, Code, Block) are rewritten to Int
// during assembly; Int survives to the byte stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Int(i64),
    Name(String),
    Const(Value),
    Code(Box<CodeGraph>),
    Block(BlockId),
}


#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Op(Opcode),
    OpArg(Opcode, Arg),
}

impl Insn {
    pub fn opcode(&self) -> Opcode {
        match self {
            Insn::Op(op) => *op,
            Insn::OpArg(op, _) => *op,
        }
    }

    // Bytes this instruction occupies once packed. SET_LINENO stays
    // in the stream to drive the line table but packs to nothing.
    pub fn width(&self) -> usize {
        match self {
            Insn::Op(_) => 1,
            Insn::OpArg(Opcode::SetLineno, _) => 0,
            Insn::OpArg(_, _) => 3,
        }
    }
}


#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    id: BlockId,
    label: &'static str,
    insts: Vec<Insn>,
    out_edges: Vec<BlockId>,
    next: Option<BlockId>,
    prev: Option<BlockId>,
}

impl Block {
    fn new(id: BlockId, label: &'static str) -> Block {
        Block {
            id,
            label,
            insts: Vec::new(),
            out_edges: Vec::new(),
            next: None,
            prev: None,
        }
    }

    pub fn id(&self) -> BlockId { self.id }

    pub fn label(&self) -> &'static str { self.label }

    pub fn insts(&self) -> &[Insn] { &self.insts }

    pub fn next(&self) -> Option<BlockId> { self.next }

    pub fn prev(&self) -> Option<BlockId> { self.prev }

    pub fn emit(&mut self, inst: Insn) {
        self.insts.push(inst);
    }

    pub fn add_out_edge(&mut self, target: BlockId) {
        if !self.out_edges.contains(&target) {
            self.out_edges.push(target);
        }
    }

    // Jump targets plus the fall-through successor; the blocks
    // reachable from this one.
    pub fn children(&self) -> Vec<BlockId> {
        let mut ret = self.out_edges.clone();
        if let Some(n) = self.next {
            if !ret.contains(&n) {
                ret.push(n);
            }
        }
        ret
    }

    // Blocks that must be emitted after this one: the fall-through
    // successor and the targets of relative jumps. Absolute jumps can
    // land anywhere and do not constrain emission order.
    pub fn followers(&self) -> Vec<BlockId> {
        let mut ret = Vec::new();
        if let Some(n) = self.next {
            ret.push(n);
        }
        for inst in &self.insts {
            if let Insn::OpArg(op, Arg::Block(t)) = inst {
                if op.has_jrel() && !ret.contains(t) {
                    ret.push(*t);
                }
            }
        }
        ret
    }

    // True when the block ends in an instruction that never falls
    // through, so execution cannot run past its last byte.
    pub fn has_unconditional_transfer(&self) -> bool {
        match self.insts.last() {
            Some(inst) => inst.opcode().transfers_unconditionally(),
            None => false,
        }
    }
}


#[derive(Clone, Debug, PartialEq)]
pub struct FlowGraph {
    blocks: Vec<Block>,
    entry: BlockId,
    exit: BlockId,
    current: BlockId,
}

impl FlowGraph {
    pub fn new() -> FlowGraph {
        let mut g = FlowGraph {
            blocks: Vec::new(),
            entry: BlockId(0),
            exit: BlockId(0),
            current: BlockId(0),
        };
        g.entry = g.alloc("");
        g.exit = g.alloc("exit");
        g.current = g.entry;
        g
    }

    fn alloc(&mut self, label: &'static str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id, label));
        id
    }

    pub fn entry(&self) -> BlockId { self.entry }

    pub fn exit(&self) -> BlockId { self.exit }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn new_block(&mut self) -> BlockId {
        self.alloc("")
    }

    // Move the insertion cursor.
    pub fn start_block(&mut self, block: BlockId) {
        self.current = block;
    }

    // Link the current block to a fall-through successor and start
    // emitting there. Allocates a fresh block when none is supplied.
    pub fn next_block(&mut self, block: Option<BlockId>) -> BlockId {
        let block = block.unwrap_or_else(|| self.alloc(""));
        self.add_next(self.current, block);
        self.start_block(block);
        block
    }

    fn add_next(&mut self, from: BlockId, to: BlockId) {
        assert!(
            self.block(from).next.is_none(),
            "block {:?} already has a fall-through successor", from
        );
        assert!(
            self.block(to).prev.is_none(),
            "block {:?} already has a fall-through predecessor", to
        );
        self.block_mut(from).next = Some(to);
        self.block_mut(to).prev = Some(from);
    }

    pub fn start_exit_block(&mut self) {
        self.current = self.exit;
    }

    pub fn emit(&mut self, op: Opcode) {
        let current = self.current;
        self.block_mut(current).emit(Insn::Op(op));
    }

    pub fn emit_arg(&mut self, op: Opcode, arg: Arg) {
        let current = self.current;
        if let Arg::Block(target) = &arg {
            self.block_mut(current).add_out_edge(*target);
        }
        self.block_mut(current).emit(Insn::OpArg(op, arg));
    }

    pub fn set_lineno(&mut self, lineno: u32) {
        self.emit_arg(Opcode::SetLineno, Arg::Int(lineno as i64));
    }
}

// One code object under construction: a flow graph plus everything
// else that ends up in the code-object header and tables.
//
// Nested functions and class bodies are separate CodeGraphs, passed
// to LOAD_CONST as Arg::Code and assembled recursively with their own
// intern tables.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeGraph {
    pub graph: FlowGraph,
    pub name: String,
    pub filename: String,
    pub flags: CodeFlags,
    pub docstring: Value,
    // True when this graph is a class body; LOAD_NAME and friends
    // then leave varnames alone.
    pub klass: bool,
    pub consts: Vec<Value>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub argcount: u32,
}

impl CodeGraph {
    pub fn new(name: &str, filename: &str, optimized: bool, klass: bool) -> CodeGraph {
        let flags = if optimized {
            CodeFlag::Optimized | CodeFlag::Newlocals
        } else {
            CodeFlags::empty()
        };
        CodeGraph {
            graph: FlowGraph::new(),
            name: String::from(name),
            filename: String::from(filename),
            flags,
            docstring: Value::None,
            klass,
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            freevars: Vec::new(),
            cellvars: Vec::new(),
            argcount: 0,
        }
    }

    // Only functions have arguments; modules and classes never call
    // this. Must run before anything else touches varnames.
    pub fn set_args(&mut self, args: &[&str]) {
        assert!(self.varnames.is_empty(), "arguments must be set first");
        self.varnames = args.iter().map(|a| String::from(*a)).collect();
        self.argcount = args.len() as u32;
    }

    pub fn set_free_vars(&mut self, names: &[&str]) {
        self.freevars = names.iter().map(|n| String::from(*n)).collect();
    }

    pub fn set_cell_vars(&mut self, names: &[&str]) {
        self.cellvars = names.iter().map(|n| String::from(*n)).collect();
    }

    pub fn set_docstring(&mut self, doc: Value) {
        self.docstring = doc;
    }

    // The *args slot is not counted in argcount; the **kwargs slot is
    // discounted later, during assembly.
    pub fn set_flag(&mut self, flag: CodeFlag) {
        self.flags = self.flags | flag;
        if flag == CodeFlag::Varargs {
            self.argcount -= 1;
        }
    }

    pub fn check_flag(&self, flag: CodeFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn new_block(&mut self) -> BlockId {
        self.graph.new_block()
    }

    pub fn start_block(&mut self, block: BlockId) {
        self.graph.start_block(block);
    }

    pub fn next_block(&mut self, block: Option<BlockId>) -> BlockId {
        self.graph.next_block(block)
    }

    pub fn start_exit_block(&mut self) {
        self.graph.start_exit_block();
    }

    pub fn emit(&mut self, op: Opcode) {
        self.graph.emit(op);
    }

    pub fn emit_arg(&mut self, op: Opcode, arg: Arg) {
        self.graph.emit_arg(op, arg);
    }

    pub fn set_lineno(&mut self, lineno: u32) {
        self.graph.set_lineno(lineno);
    }

    pub fn make_code_object(self) -> Result<CodeObject> {
        crate::assemble::assemble(self)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_links_mirror() {
        let mut g = FlowGraph::new();
        let entry = g.entry();
        let b = g.next_block(None);
        assert_eq!(g.block(entry).next(), Some(b));
        assert_eq!(g.block(b).prev(), Some(entry));
    }

    #[test]
    #[should_panic(expected = "already has a fall-through successor")]
    fn test_double_next_is_refused() {
        let mut g = FlowGraph::new();
        let entry = g.entry();
        g.next_block(None);
        g.start_block(entry);
        g.next_block(None);
    }

    #[test]
    fn test_emit_block_arg_records_out_edge() {
        let mut g = FlowGraph::new();
        let target = g.new_block();
        g.emit_arg(Opcode::JumpAbsolute, Arg::Block(target));
        assert_eq!(g.block(g.entry()).children(), vec![target]);
    }

    #[test]
    fn test_followers_exclude_absolute_jumps() {
        let mut g = FlowGraph::new();
        let rel = g.new_block();
        let abs = g.new_block();
        g.emit_arg(Opcode::JumpForward, Arg::Block(rel));
        g.emit_arg(Opcode::JumpAbsolute, Arg::Block(abs));
        let entry = g.block(g.entry());
        assert!(entry.followers().contains(&rel));
        assert!(!entry.followers().contains(&abs));
        assert!(entry.children().contains(&abs));
    }

    #[test]
    fn test_unconditional_transfer() {
        let mut g = FlowGraph::new();
        g.emit(Opcode::ReturnValue);
        assert!(g.block(g.entry()).has_unconditional_transfer());

        let mut g = FlowGraph::new();
        g.emit(Opcode::PopTop);
        assert!(!g.block(g.entry()).has_unconditional_transfer());

        let mut g = FlowGraph::new();
        assert!(!g.block(g.entry()).has_unconditional_transfer());
    }

    #[test]
    fn test_varargs_discounts_argcount() {
        let mut cg = CodeGraph::new("f", "t.py", true, false);
        cg.set_args(&["a", "args"]);
        cg.set_flag(CodeFlag::Varargs);
        assert_eq!(cg.argcount, 1);
        assert!(cg.check_flag(CodeFlag::Varargs));
    }
}
