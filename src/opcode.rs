// The instruction set of the CPython 2.7 stack machine.
//
// Each variant's discriminant is the opcode's number in the bytecode
// stream. The numbering is part of the output format and cannot drift:
// the VM dispatches on these exact values.

use std::collections::HashMap;
use std::fmt;


// Opcodes numbered 90 and above take a 16-bit operand.
pub const HAVE_ARGUMENT: u8 = 90;

// Operand values for COMPARE_OP, in operand order.
pub const CMP_OP: [&str; 12] = [
    "<", "<=", "==", "!=", ">", ">=",
    "in", "not in", "is", "is not",
    "exception match", "BAD",
];


#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    StopCode = 0,
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    RotFour = 5,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryConvert = 13,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryDivide = 21,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    Slice0 = 30,
    Slice1 = 31,
    Slice2 = 32,
    Slice3 = 33,
    StoreSlice0 = 40,
    StoreSlice1 = 41,
    StoreSlice2 = 42,
    StoreSlice3 = 43,
    DeleteSlice0 = 50,
    DeleteSlice1 = 51,
    DeleteSlice2 = 52,
    DeleteSlice3 = 53,
    StoreMap = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceDivide = 58,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    PrintExpr = 70,
    PrintItem = 71,
    PrintNewline = 72,
    PrintItemTo = 73,
    PrintNewlineTo = 74,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    WithCleanup = 81,
    LoadLocals = 82,
    ReturnValue = 83,
    ImportStar = 84,
    ExecStmt = 85,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    BuildClass = 89,
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    ListAppend = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    DupTopx = 99,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    // Pseudo-instruction: drives the line-number table and packs to
    // zero bytes. The number is unassigned in the 2.7 table.
    SetLineno = 127,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,
    SetupWith = 143,
    ExtendedArg = 145,
    SetAdd = 146,
    MapAdd = 147,
}


pub const ALL: [Opcode; 120] = [
    Opcode::StopCode,
    Opcode::PopTop,
    Opcode::RotTwo,
    Opcode::RotThree,
    Opcode::DupTop,
    Opcode::RotFour,
    Opcode::Nop,
    Opcode::UnaryPositive,
    Opcode::UnaryNegative,
    Opcode::UnaryNot,
    Opcode::UnaryConvert,
    Opcode::UnaryInvert,
    Opcode::BinaryPower,
    Opcode::BinaryMultiply,
    Opcode::BinaryDivide,
    Opcode::BinaryModulo,
    Opcode::BinaryAdd,
    Opcode::BinarySubtract,
    Opcode::BinarySubscr,
    Opcode::BinaryFloorDivide,
    Opcode::BinaryTrueDivide,
    Opcode::InplaceFloorDivide,
    Opcode::InplaceTrueDivide,
    Opcode::Slice0,
    Opcode::Slice1,
    Opcode::Slice2,
    Opcode::Slice3,
    Opcode::StoreSlice0,
    Opcode::StoreSlice1,
    Opcode::StoreSlice2,
    Opcode::StoreSlice3,
    Opcode::DeleteSlice0,
    Opcode::DeleteSlice1,
    Opcode::DeleteSlice2,
    Opcode::DeleteSlice3,
    Opcode::StoreMap,
    Opcode::InplaceAdd,
    Opcode::InplaceSubtract,
    Opcode::InplaceMultiply,
    Opcode::InplaceDivide,
    Opcode::InplaceModulo,
    Opcode::StoreSubscr,
    Opcode::DeleteSubscr,
    Opcode::BinaryLshift,
    Opcode::BinaryRshift,
    Opcode::BinaryAnd,
    Opcode::BinaryXor,
    Opcode::BinaryOr,
    Opcode::InplacePower,
    Opcode::GetIter,
    Opcode::PrintExpr,
    Opcode::PrintItem,
    Opcode::PrintNewline,
    Opcode::PrintItemTo,
    Opcode::PrintNewlineTo,
    Opcode::InplaceLshift,
    Opcode::InplaceRshift,
    Opcode::InplaceAnd,
    Opcode::InplaceXor,
    Opcode::InplaceOr,
    Opcode::BreakLoop,
    Opcode::WithCleanup,
    Opcode::LoadLocals,
    Opcode::ReturnValue,
    Opcode::ImportStar,
    Opcode::ExecStmt,
    Opcode::YieldValue,
    Opcode::PopBlock,
    Opcode::EndFinally,
    Opcode::BuildClass,
    Opcode::StoreName,
    Opcode::DeleteName,
    Opcode::UnpackSequence,
    Opcode::ForIter,
    Opcode::ListAppend,
    Opcode::StoreAttr,
    Opcode::DeleteAttr,
    Opcode::StoreGlobal,
    Opcode::DeleteGlobal,
    Opcode::DupTopx,
    Opcode::LoadConst,
    Opcode::LoadName,
    Opcode::BuildTuple,
    Opcode::BuildList,
    Opcode::BuildSet,
    Opcode::BuildMap,
    Opcode::LoadAttr,
    Opcode::CompareOp,
    Opcode::ImportName,
    Opcode::ImportFrom,
    Opcode::JumpForward,
    Opcode::JumpIfFalseOrPop,
    Opcode::JumpIfTrueOrPop,
    Opcode::JumpAbsolute,
    Opcode::PopJumpIfFalse,
    Opcode::PopJumpIfTrue,
    Opcode::LoadGlobal,
    Opcode::ContinueLoop,
    Opcode::SetupLoop,
    Opcode::SetupExcept,
    Opcode::SetupFinally,
    Opcode::LoadFast,
    Opcode::StoreFast,
    Opcode::DeleteFast,
    Opcode::SetLineno,
    Opcode::RaiseVarargs,
    Opcode::CallFunction,
    Opcode::MakeFunction,
    Opcode::BuildSlice,
    Opcode::MakeClosure,
    Opcode::LoadClosure,
    Opcode::LoadDeref,
    Opcode::StoreDeref,
    Opcode::CallFunctionVar,
    Opcode::CallFunctionKw,
    Opcode::CallFunctionVarKw,
    Opcode::SetupWith,
    Opcode::ExtendedArg,
    Opcode::SetAdd,
    Opcode::MapAdd,
];


lazy_static! {
    static ref BY_NAME: HashMap<&'static str, Opcode> =
        ALL.iter().map(|&op| (op.name(), op)).collect();

    static ref BY_NUMBER: HashMap<u8, Opcode> =
        ALL.iter().map(|&op| (op.number(), op)).collect();
}


impl Opcode {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn by_name(name: &str) -> Option<Opcode> {
        BY_NAME.get(name).copied()
    }

    pub fn from_number(number: u8) -> Option<Opcode> {
        BY_NUMBER.get(&number).copied()
    }

    pub fn has_arg(self) -> bool {
        self.number() >= HAVE_ARGUMENT
    }

    // Operand is a byte offset relative to the following instruction.
    pub fn has_jrel(self) -> bool {
        use Opcode::*;
        match self {
            ForIter | JumpForward | SetupLoop | SetupExcept | SetupFinally
            | SetupWith => true,
            _ => false,
        }
    }

    // Operand is an absolute byte offset into the code.
    pub fn has_jabs(self) -> bool {
        use Opcode::*;
        match self {
            JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute
            | PopJumpIfFalse | PopJumpIfTrue | ContinueLoop => true,
            _ => false,
        }
    }

    // True when control never falls through to the next instruction.
    pub fn transfers_unconditionally(self) -> bool {
        use Opcode::*;
        match self {
            ReturnValue | RaiseVarargs | JumpAbsolute | JumpForward
            | ContinueLoop => true,
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            StopCode => "STOP_CODE",
            PopTop => "POP_TOP",
            RotTwo => "ROT_TWO",
            RotThree => "ROT_THREE",
            DupTop => "DUP_TOP",
            RotFour => "ROT_FOUR",
            Nop => "NOP",
            UnaryPositive => "UNARY_POSITIVE",
            UnaryNegative => "UNARY_NEGATIVE",
            UnaryNot => "UNARY_NOT",
            UnaryConvert => "UNARY_CONVERT",
            UnaryInvert => "UNARY_INVERT",
            BinaryPower => "BINARY_POWER",
            BinaryMultiply => "BINARY_MULTIPLY",
            BinaryDivide => "BINARY_DIVIDE",
            BinaryModulo => "BINARY_MODULO",
            BinaryAdd => "BINARY_ADD",
            BinarySubtract => "BINARY_SUBTRACT",
            BinarySubscr => "BINARY_SUBSCR",
            BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            BinaryTrueDivide => "BINARY_TRUE_DIVIDE",
            InplaceFloorDivide => "INPLACE_FLOOR_DIVIDE",
            InplaceTrueDivide => "INPLACE_TRUE_DIVIDE",
            Slice0 => "SLICE+0",
            Slice1 => "SLICE+1",
            Slice2 => "SLICE+2",
            Slice3 => "SLICE+3",
            StoreSlice0 => "STORE_SLICE+0",
            StoreSlice1 => "STORE_SLICE+1",
            StoreSlice2 => "STORE_SLICE+2",
            StoreSlice3 => "STORE_SLICE+3",
            DeleteSlice0 => "DELETE_SLICE+0",
            DeleteSlice1 => "DELETE_SLICE+1",
            DeleteSlice2 => "DELETE_SLICE+2",
            DeleteSlice3 => "DELETE_SLICE+3",
            StoreMap => "STORE_MAP",
            InplaceAdd => "INPLACE_ADD",
            InplaceSubtract => "INPLACE_SUBTRACT",
            InplaceMultiply => "INPLACE_MULTIPLY",
            InplaceDivide => "INPLACE_DIVIDE",
            InplaceModulo => "INPLACE_MODULO",
            StoreSubscr => "STORE_SUBSCR",
            DeleteSubscr => "DELETE_SUBSCR",
            BinaryLshift => "BINARY_LSHIFT",
            BinaryRshift => "BINARY_RSHIFT",
            BinaryAnd => "BINARY_AND",
            BinaryXor => "BINARY_XOR",
            BinaryOr => "BINARY_OR",
            InplacePower => "INPLACE_POWER",
            GetIter => "GET_ITER",
            PrintExpr => "PRINT_EXPR",
            PrintItem => "PRINT_ITEM",
            PrintNewline => "PRINT_NEWLINE",
            PrintItemTo => "PRINT_ITEM_TO",
            PrintNewlineTo => "PRINT_NEWLINE_TO",
            InplaceLshift => "INPLACE_LSHIFT",
            InplaceRshift => "INPLACE_RSHIFT",
            InplaceAnd => "INPLACE_AND",
            InplaceXor => "INPLACE_XOR",
            InplaceOr => "INPLACE_OR",
            BreakLoop => "BREAK_LOOP",
            WithCleanup => "WITH_CLEANUP",
            LoadLocals => "LOAD_LOCALS",
            ReturnValue => "RETURN_VALUE",
            ImportStar => "IMPORT_STAR",
            ExecStmt => "EXEC_STMT",
            YieldValue => "YIELD_VALUE",
            PopBlock => "POP_BLOCK",
            EndFinally => "END_FINALLY",
            BuildClass => "BUILD_CLASS",
            StoreName => "STORE_NAME",
            DeleteName => "DELETE_NAME",
            UnpackSequence => "UNPACK_SEQUENCE",
            ForIter => "FOR_ITER",
            ListAppend => "LIST_APPEND",
            StoreAttr => "STORE_ATTR",
            DeleteAttr => "DELETE_ATTR",
            StoreGlobal => "STORE_GLOBAL",
            DeleteGlobal => "DELETE_GLOBAL",
            DupTopx => "DUP_TOPX",
            LoadConst => "LOAD_CONST",
            LoadName => "LOAD_NAME",
            BuildTuple => "BUILD_TUPLE",
            BuildList => "BUILD_LIST",
            BuildSet => "BUILD_SET",
            BuildMap => "BUILD_MAP",
            LoadAttr => "LOAD_ATTR",
            CompareOp => "COMPARE_OP",
            ImportName => "IMPORT_NAME",
            ImportFrom => "IMPORT_FROM",
            JumpForward => "JUMP_FORWARD",
            JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            JumpAbsolute => "JUMP_ABSOLUTE",
            PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            LoadGlobal => "LOAD_GLOBAL",
            ContinueLoop => "CONTINUE_LOOP",
            SetupLoop => "SETUP_LOOP",
            SetupExcept => "SETUP_EXCEPT",
            SetupFinally => "SETUP_FINALLY",
            LoadFast => "LOAD_FAST",
            StoreFast => "STORE_FAST",
            DeleteFast => "DELETE_FAST",
            SetLineno => "SET_LINENO",
            RaiseVarargs => "RAISE_VARARGS",
            CallFunction => "CALL_FUNCTION",
            MakeFunction => "MAKE_FUNCTION",
            BuildSlice => "BUILD_SLICE",
            MakeClosure => "MAKE_CLOSURE",
            LoadClosure => "LOAD_CLOSURE",
            LoadDeref => "LOAD_DEREF",
            StoreDeref => "STORE_DEREF",
            CallFunctionVar => "CALL_FUNCTION_VAR",
            CallFunctionKw => "CALL_FUNCTION_KW",
            CallFunctionVarKw => "CALL_FUNCTION_VAR_KW",
            SetupWith => "SETUP_WITH",
            ExtendedArg => "EXTENDED_ARG",
            SetAdd => "SET_ADD",
            MapAdd => "MAP_ADD",
        }
    }
}


impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbering() {
        assert_eq!(Opcode::StopCode.number(), 0);
        assert_eq!(Opcode::Slice0.number(), 30);
        assert_eq!(Opcode::StoreSlice3.number(), 43);
        assert_eq!(Opcode::ReturnValue.number(), 83);
        assert_eq!(Opcode::StoreName.number(), 90);
        assert_eq!(Opcode::LoadConst.number(), 100);
        assert_eq!(Opcode::CompareOp.number(), 107);
        assert_eq!(Opcode::JumpForward.number(), 110);
        assert_eq!(Opcode::LoadFast.number(), 124);
        assert_eq!(Opcode::CallFunction.number(), 131);
        assert_eq!(Opcode::SetupWith.number(), 143);
        assert_eq!(Opcode::ExtendedArg.number(), 145);
        assert_eq!(Opcode::MapAdd.number(), 147);
    }

    #[test]
    fn test_name_roundtrip() {
        for &op in ALL.iter() {
            assert_eq!(Opcode::by_name(op.name()), Some(op));
            assert_eq!(Opcode::from_number(op.number()), Some(op));
        }
        // Numbers and names are unique across the table.
        assert_eq!(BY_NAME.len(), ALL.len());
        assert_eq!(BY_NUMBER.len(), ALL.len());
    }

    #[test]
    fn test_jump_predicates() {
        let jrel: Vec<Opcode> =
            ALL.iter().copied().filter(|op| op.has_jrel()).collect();
        let jabs: Vec<Opcode> =
            ALL.iter().copied().filter(|op| op.has_jabs()).collect();

        use Opcode::*;
        assert_eq!(jrel, vec![
            ForIter, JumpForward, SetupLoop, SetupExcept, SetupFinally,
            SetupWith,
        ]);
        assert_eq!(jabs, vec![
            JumpIfFalseOrPop, JumpIfTrueOrPop, JumpAbsolute,
            PopJumpIfFalse, PopJumpIfTrue, ContinueLoop,
        ]);
    }

    #[test]
    fn test_have_argument_boundary() {
        assert!(!Opcode::BuildClass.has_arg());
        assert!(Opcode::StoreName.has_arg());
        assert!(Opcode::SetLineno.has_arg());
    }

    #[test]
    fn test_compare_table() {
        assert_eq!(CMP_OP.len(), 12);
        assert_eq!(CMP_OP[6], "in");
        assert_eq!(CMP_OP[10], "exception match");
    }
}
