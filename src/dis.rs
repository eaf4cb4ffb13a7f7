// Human-readable listing of assembled bytecode: one instruction per
// line with its offset, mnemonic, raw operand, and what the operand
// resolves to in the code object's tables.

use crate::code::CodeObject;
use crate::opcode::{Opcode, CMP_OP};


pub fn listing(code: &CodeObject) -> String {
    let mut out = String::new();
    let bytes = &code.code;
    let mut i = 0;
    while i < bytes.len() {
        let number = bytes[i];
        match Opcode::from_number(number) {
            Some(op) if op.has_arg() => {
                if i + 2 >= bytes.len() {
                    out.push_str(&format!("{:>6}  <truncated {}>\n", i, op.name()));
                    break;
                }
                let oparg = bytes[i + 1] as usize | (bytes[i + 2] as usize) << 8;
                out.push_str(&format!(
                    "{:>6}  {:<24}{:>6}{}\n",
                    i, op.name(), oparg, annotate(code, op, oparg, i)
                ));
                i += 3;
            }
            Some(op) => {
                out.push_str(&format!("{:>6}  {}\n", i, op.name()));
                i += 1;
            }
            None => {
                out.push_str(&format!("{:>6}  <{}>\n", i, number));
                i += 1;
            }
        }
    }
    out
}


fn annotate(code: &CodeObject, op: Opcode, oparg: usize, offset: usize) -> String {
    use Opcode::*;

    if op.has_jrel() {
        return format!("  (to {})", offset + 3 + oparg);
    }
    if op.has_jabs() {
        return format!("  (to {})", oparg);
    }

    let closure_name = |i: usize| {
        if i < code.cellvars.len() {
            code.cellvars.get(i)
        } else {
            code.freevars.get(i - code.cellvars.len())
        }
    };

    let note = match op {
        LoadConst => code.consts.get(oparg).map(|v| format!("{}", v)),
        LoadName | StoreName | DeleteName | ImportName | ImportFrom
        | LoadAttr | StoreAttr | DeleteAttr | LoadGlobal | StoreGlobal
        | DeleteGlobal => code.names.get(oparg).cloned(),
        LoadFast | StoreFast | DeleteFast => code.varnames.get(oparg).cloned(),
        LoadClosure | LoadDeref | StoreDeref => closure_name(oparg).cloned(),
        CompareOp => CMP_OP.get(oparg).map(|c| String::from(*c)),
        _ => return String::new(),
    };

    match note {
        Some(note) => format!("  ({})", note),
        None => String::from("  (?)"),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Value;
    use crate::graph::{Arg, CodeGraph};
    use crate::opcode::Opcode::*;

    fn func() -> CodeGraph {
        CodeGraph::new("f", "test.py", true, false)
    }

    #[test]
    fn test_listing_resolves_operands() {
        let mut cg = func();
        let b2 = cg.new_block();
        cg.emit_arg(JumpForward, Arg::Block(b2));
        cg.next_block(None);
        cg.emit_arg(LoadConst, Arg::Const(Value::Int(1)));
        cg.emit(ReturnValue);
        cg.start_block(b2);
        cg.emit_arg(LoadConst, Arg::Const(Value::Int(2)));
        cg.emit(ReturnValue);
        let code = cg.make_code_object().unwrap();

        let text = listing(&code);
        trace!("{}", text);
        assert!(text.contains("JUMP_FORWARD"));
        assert!(text.contains("(to 7)"));
        assert!(text.contains("LOAD_CONST"));
        assert!(text.contains("(1)"));
        assert!(text.contains("RETURN_VALUE"));
    }

    #[test]
    fn test_listing_names_and_compares() {
        let mut cg = CodeGraph::new("m", "test.py", false, false);
        cg.emit_arg(LoadName, Arg::Name(String::from("x")));
        cg.emit_arg(LoadName, Arg::Name(String::from("y")));
        cg.emit_arg(CompareOp, Arg::Name(String::from("not in")));
        cg.emit(ReturnValue);
        let code = cg.make_code_object().unwrap();

        let text = listing(&code);
        assert!(text.contains("(x)"));
        assert!(text.contains("(y)"));
        assert!(text.contains("(not in)"));
    }

    #[test]
    fn test_listing_covers_every_byte() {
        let mut cg = func();
        cg.emit_arg(LoadConst, Arg::Const(Value::None));
        cg.emit(ReturnValue);
        let code = cg.make_code_object().unwrap();

        let text = listing(&code);
        assert_eq!(text.lines().count(), 2);
    }
}
