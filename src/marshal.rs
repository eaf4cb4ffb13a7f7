// Marshal serialization for code objects, CPython 2.7 wire format
// (version 2). Writer only: the assembler's output becomes the body
// of a .pyc file, it never reads one back.
//
// Every record is a one-byte type tag followed by a fixed layout.
// Multi-byte integers are little-endian.

use crate::code::{CodeObject, Value};


const TYPE_NONE: u8 = b'N';
const TYPE_FALSE: u8 = b'F';
const TYPE_TRUE: u8 = b'T';
const TYPE_INT: u8 = b'i';
const TYPE_INT64: u8 = b'I';
const TYPE_LONG: u8 = b'l';
const TYPE_BINARY_FLOAT: u8 = b'g';
const TYPE_STRING: u8 = b's';
const TYPE_TUPLE: u8 = b'(';
const TYPE_CODE: u8 = b'c';


pub fn dump_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    w_value(&mut out, value);
    out
}

pub fn dump_code(code: &CodeObject) -> Vec<u8> {
    let mut out = Vec::new();
    w_code(&mut out, code);
    out
}


fn w_long(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn w_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(TYPE_STRING);
    w_long(out, bytes.len() as i32);
    out.extend_from_slice(bytes);
}

fn w_str_tuple(out: &mut Vec<u8>, items: &[String]) {
    out.push(TYPE_TUPLE);
    w_long(out, items.len() as i32);
    for item in items {
        w_string(out, item.as_bytes());
    }
}

// Arbitrary-precision integers are runs of 15-bit digits, least
// significant first, preceded by the digit count (negated for
// negative numbers).
fn w_py_long(out: &mut Vec<u8>, v: i64) {
    let mut rest = v.unsigned_abs();
    let mut digits: Vec<u16> = Vec::new();
    while rest > 0 {
        digits.push((rest & 0x7fff) as u16);
        rest >>= 15;
    }
    out.push(TYPE_LONG);
    let size = digits.len() as i32;
    w_long(out, if v < 0 { -size } else { size });
    for digit in digits {
        out.extend_from_slice(&digit.to_le_bytes());
    }
}

fn w_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::None => out.push(TYPE_NONE),
        Value::Bool(true) => out.push(TYPE_TRUE),
        Value::Bool(false) => out.push(TYPE_FALSE),
        Value::Int(v) => {
            if *v >= i32::min_value() as i64 && *v <= i32::max_value() as i64 {
                out.push(TYPE_INT);
                w_long(out, *v as i32);
            } else {
                out.push(TYPE_INT64);
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Value::Long(v) => w_py_long(out, *v),
        Value::Float(v) => {
            out.push(TYPE_BINARY_FLOAT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(v) => w_string(out, v.as_bytes()),
        Value::Tuple(items) => {
            out.push(TYPE_TUPLE);
            w_long(out, items.len() as i32);
            for item in items.iter() {
                w_value(out, item);
            }
        }
        Value::Code(c) => w_code(out, c),
    }
}

fn w_code(out: &mut Vec<u8>, code: &CodeObject) {
    out.push(TYPE_CODE);
    w_long(out, code.argcount as i32);
    w_long(out, code.nlocals as i32);
    w_long(out, code.stacksize as i32);
    w_long(out, code.flags.bits() as i32);
    w_string(out, &code.code);
    out.push(TYPE_TUPLE);
    w_long(out, code.consts.len() as i32);
    for c in &code.consts {
        w_value(out, c);
    }
    w_str_tuple(out, &code.names);
    w_str_tuple(out, &code.varnames);
    w_str_tuple(out, &code.freevars);
    w_str_tuple(out, &code.cellvars);
    w_string(out, code.filename.as_bytes());
    w_string(out, code.name.as_bytes());
    w_long(out, code.firstlineno as i32);
    w_string(out, &code.lnotab);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(dump_value(&Value::None), b"N");
        assert_eq!(dump_value(&Value::Bool(true)), b"T");
        assert_eq!(dump_value(&Value::Bool(false)), b"F");
        assert_eq!(dump_value(&Value::Int(5)), b"i\x05\x00\x00\x00");
        assert_eq!(dump_value(&Value::Int(-1)), b"i\xff\xff\xff\xff");
    }

    #[test]
    fn test_wide_int_escapes_to_int64() {
        let mut expected = vec![b'I'];
        expected.extend_from_slice(&(1i64 << 40).to_le_bytes());
        assert_eq!(dump_value(&Value::Int(1 << 40)), expected);
    }

    #[test]
    fn test_long_digits() {
        // 2L: one 15-bit digit.
        assert_eq!(
            dump_value(&Value::Long(2)),
            b"l\x01\x00\x00\x00\x02\x00"
        );
        // 0L: no digits at all.
        assert_eq!(dump_value(&Value::Long(0)), b"l\x00\x00\x00\x00");
        // -40000L: two digits, negative count.
        let got = dump_value(&Value::Long(-40000));
        assert_eq!(&got[..5], b"l\xfe\xff\xff\xff");
        assert_eq!(&got[5..], &[0x40, 0x1c, 0x01, 0x00]);
    }

    #[test]
    fn test_float_and_string() {
        let mut expected = vec![b'g'];
        expected.extend_from_slice(&1.5f64.to_le_bytes());
        assert_eq!(dump_value(&Value::Float(1.5)), expected);

        assert_eq!(
            dump_value(&Value::string("ab")),
            b"s\x02\x00\x00\x00ab"
        );
    }

    #[test]
    fn test_tuple() {
        assert_eq!(
            dump_value(&Value::Tuple(std::rc::Rc::new(vec![
                Value::None,
                Value::Int(1),
            ]))),
            b"(\x02\x00\x00\x00Ni\x01\x00\x00\x00"
        );
    }

    #[test]
    fn test_code_record_layout() {
        use crate::graph::{Arg, CodeGraph};
        use crate::opcode::Opcode;

        let mut cg = CodeGraph::new("f", "test.py", true, false);
        cg.emit_arg(Opcode::LoadConst, Arg::Const(Value::None));
        cg.emit(Opcode::ReturnValue);
        let code = cg.make_code_object().unwrap();

        let out = dump_code(&code);
        assert_eq!(out[0], b'c');
        // argcount 0, nlocals 0, stacksize 1, flags OPTIMIZED|NEWLOCALS.
        assert_eq!(&out[1..5], &[0, 0, 0, 0]);
        assert_eq!(&out[5..9], &[0, 0, 0, 0]);
        assert_eq!(&out[9..13], &[1, 0, 0, 0]);
        assert_eq!(&out[13..17], &[3, 0, 0, 0]);
        // co_code as a string record.
        assert_eq!(&out[17..22], b"s\x04\x00\x00\x00");
        assert_eq!(&out[22..26], &[100, 0, 0, 83]);
        // consts: a 1-tuple holding the None docstring.
        assert_eq!(&out[26..31], b"(\x01\x00\x00\x00");
        assert_eq!(out[31], b'N');
    }
}
