//! Static table of JVM opcodes
//!
//! Every opcode knows how many stack words it pushes (or pops) and how many bytes it takes up in
//! the code array. This is all the static analysis in [`super::analysis`] needs to walk over
//! already encoded bytecode.

/// Net effect of an instruction on the depth of the operand stack (in words)
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StackEffect {
    /// Always the same delta
    Fixed(i8),

    /// Depends on the descriptor of the field or method referenced in the constant pool (or, for
    /// `wide`, on the instruction being widened)
    Variable,

    /// Never emitted by the code generator, so never analyzed
    Unsupported,
}

/// Stack effect and encoded length of an opcode
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OpcodeInfo {
    pub stack: StackEffect,

    /// Length of the instruction in bytes (including operands), or `0` for the instructions
    /// whose length depends on their operands (`tableswitch`, `lookupswitch`, `wide`)
    pub length: u8,
}

macro_rules! opcodes {
    ($($variant:ident = $byte:literal, $mnemonic:literal, $stack:expr, $length:literal;)*) => {
        /// JVM opcode
        ///
        /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-7.html
        #[repr(u8)]
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
        pub enum Opcode {
            $($variant = $byte,)*
        }

        impl Opcode {
            /// All opcodes, ordered by their encoding (so `ALL[op as usize] == op`)
            pub const ALL: [Opcode; 202] = [$(Opcode::$variant,)*];

            pub const fn info(self) -> OpcodeInfo {
                match self {
                    $(Opcode::$variant => OpcodeInfo { stack: $stack, length: $length },)*
                }
            }

            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }
        }
    };
}

use StackEffect::{Fixed as F, Unsupported as U, Variable as V};

opcodes! {
    Nop = 0x00, "nop", F(0), 1;
    AConstNull = 0x01, "aconst_null", F(1), 1;
    IConstM1 = 0x02, "iconst_m1", F(1), 1;
    IConst0 = 0x03, "iconst_0", F(1), 1;
    IConst1 = 0x04, "iconst_1", F(1), 1;
    IConst2 = 0x05, "iconst_2", F(1), 1;
    IConst3 = 0x06, "iconst_3", F(1), 1;
    IConst4 = 0x07, "iconst_4", F(1), 1;
    IConst5 = 0x08, "iconst_5", F(1), 1;
    LConst0 = 0x09, "lconst_0", F(2), 1;
    LConst1 = 0x0a, "lconst_1", F(2), 1;
    FConst0 = 0x0b, "fconst_0", F(1), 1;
    FConst1 = 0x0c, "fconst_1", F(1), 1;
    FConst2 = 0x0d, "fconst_2", F(1), 1;
    DConst0 = 0x0e, "dconst_0", F(2), 1;
    DConst1 = 0x0f, "dconst_1", F(2), 1;
    BiPush = 0x10, "bipush", F(1), 2;
    SiPush = 0x11, "sipush", F(1), 3;
    Ldc = 0x12, "ldc", F(1), 2;
    LdcW = 0x13, "ldc_w", F(1), 3;
    Ldc2W = 0x14, "ldc2_w", F(2), 3;
    ILoad = 0x15, "iload", F(1), 2;
    LLoad = 0x16, "lload", F(2), 2;
    FLoad = 0x17, "fload", F(1), 2;
    DLoad = 0x18, "dload", F(2), 2;
    ALoad = 0x19, "aload", F(1), 2;
    ILoad0 = 0x1a, "iload_0", F(1), 1;
    ILoad1 = 0x1b, "iload_1", F(1), 1;
    ILoad2 = 0x1c, "iload_2", F(1), 1;
    ILoad3 = 0x1d, "iload_3", F(1), 1;
    LLoad0 = 0x1e, "lload_0", F(2), 1;
    LLoad1 = 0x1f, "lload_1", F(2), 1;
    LLoad2 = 0x20, "lload_2", F(2), 1;
    LLoad3 = 0x21, "lload_3", F(2), 1;
    FLoad0 = 0x22, "fload_0", F(1), 1;
    FLoad1 = 0x23, "fload_1", F(1), 1;
    FLoad2 = 0x24, "fload_2", F(1), 1;
    FLoad3 = 0x25, "fload_3", F(1), 1;
    DLoad0 = 0x26, "dload_0", F(2), 1;
    DLoad1 = 0x27, "dload_1", F(2), 1;
    DLoad2 = 0x28, "dload_2", F(2), 1;
    DLoad3 = 0x29, "dload_3", F(2), 1;
    ALoad0 = 0x2a, "aload_0", F(1), 1;
    ALoad1 = 0x2b, "aload_1", F(1), 1;
    ALoad2 = 0x2c, "aload_2", F(1), 1;
    ALoad3 = 0x2d, "aload_3", F(1), 1;
    IALoad = 0x2e, "iaload", F(-1), 1;
    LALoad = 0x2f, "laload", F(0), 1;
    FALoad = 0x30, "faload", F(-1), 1;
    DALoad = 0x31, "daload", F(0), 1;
    AALoad = 0x32, "aaload", F(-1), 1;
    BALoad = 0x33, "baload", F(-1), 1;
    CALoad = 0x34, "caload", F(-1), 1;
    SALoad = 0x35, "saload", F(-1), 1;
    IStore = 0x36, "istore", F(-1), 2;
    LStore = 0x37, "lstore", F(-2), 2;
    FStore = 0x38, "fstore", F(-1), 2;
    DStore = 0x39, "dstore", F(-2), 2;
    AStore = 0x3a, "astore", F(-1), 2;
    IStore0 = 0x3b, "istore_0", F(-1), 1;
    IStore1 = 0x3c, "istore_1", F(-1), 1;
    IStore2 = 0x3d, "istore_2", F(-1), 1;
    IStore3 = 0x3e, "istore_3", F(-1), 1;
    LStore0 = 0x3f, "lstore_0", F(-2), 1;
    LStore1 = 0x40, "lstore_1", F(-2), 1;
    LStore2 = 0x41, "lstore_2", F(-2), 1;
    LStore3 = 0x42, "lstore_3", F(-2), 1;
    FStore0 = 0x43, "fstore_0", F(-1), 1;
    FStore1 = 0x44, "fstore_1", F(-1), 1;
    FStore2 = 0x45, "fstore_2", F(-1), 1;
    FStore3 = 0x46, "fstore_3", F(-1), 1;
    DStore0 = 0x47, "dstore_0", F(-2), 1;
    DStore1 = 0x48, "dstore_1", F(-2), 1;
    DStore2 = 0x49, "dstore_2", F(-2), 1;
    DStore3 = 0x4a, "dstore_3", F(-2), 1;
    AStore0 = 0x4b, "astore_0", F(-1), 1;
    AStore1 = 0x4c, "astore_1", F(-1), 1;
    AStore2 = 0x4d, "astore_2", F(-1), 1;
    AStore3 = 0x4e, "astore_3", F(-1), 1;
    IAStore = 0x4f, "iastore", F(-3), 1;
    LAStore = 0x50, "lastore", F(-4), 1;
    FAStore = 0x51, "fastore", F(-3), 1;
    DAStore = 0x52, "dastore", F(-4), 1;
    AAStore = 0x53, "aastore", F(-3), 1;
    BAStore = 0x54, "bastore", F(-3), 1;
    CAStore = 0x55, "castore", F(-3), 1;
    SAStore = 0x56, "sastore", F(-3), 1;
    Pop = 0x57, "pop", F(-1), 1;
    Pop2 = 0x58, "pop2", F(-2), 1;
    Dup = 0x59, "dup", F(1), 1;
    DupX1 = 0x5a, "dup_x1", F(1), 1;
    DupX2 = 0x5b, "dup_x2", F(1), 1;
    Dup2 = 0x5c, "dup2", F(2), 1;
    Dup2X1 = 0x5d, "dup2_x1", F(2), 1;
    Dup2X2 = 0x5e, "dup2_x2", F(2), 1;
    Swap = 0x5f, "swap", F(0), 1;
    IAdd = 0x60, "iadd", F(-1), 1;
    LAdd = 0x61, "ladd", F(-2), 1;
    FAdd = 0x62, "fadd", F(-1), 1;
    DAdd = 0x63, "dadd", F(-2), 1;
    ISub = 0x64, "isub", F(-1), 1;
    LSub = 0x65, "lsub", F(-2), 1;
    FSub = 0x66, "fsub", F(-1), 1;
    DSub = 0x67, "dsub", F(-2), 1;
    IMul = 0x68, "imul", F(-1), 1;
    LMul = 0x69, "lmul", F(-2), 1;
    FMul = 0x6a, "fmul", F(-1), 1;
    DMul = 0x6b, "dmul", F(-2), 1;
    IDiv = 0x6c, "idiv", F(-1), 1;
    LDiv = 0x6d, "ldiv", F(-2), 1;
    FDiv = 0x6e, "fdiv", F(-1), 1;
    DDiv = 0x6f, "ddiv", F(-2), 1;
    IRem = 0x70, "irem", F(-1), 1;
    LRem = 0x71, "lrem", F(-2), 1;
    FRem = 0x72, "frem", F(-1), 1;
    DRem = 0x73, "drem", F(-2), 1;
    INeg = 0x74, "ineg", F(0), 1;
    LNeg = 0x75, "lneg", F(0), 1;
    FNeg = 0x76, "fneg", F(0), 1;
    DNeg = 0x77, "dneg", F(0), 1;
    IShl = 0x78, "ishl", F(-1), 1;
    LShl = 0x79, "lshl", F(-1), 1;
    IShr = 0x7a, "ishr", F(-1), 1;
    LShr = 0x7b, "lshr", F(-1), 1;
    IUShr = 0x7c, "iushr", F(-1), 1;
    LUShr = 0x7d, "lushr", F(-1), 1;
    IAnd = 0x7e, "iand", F(-1), 1;
    LAnd = 0x7f, "land", F(-2), 1;
    IOr = 0x80, "ior", F(-1), 1;
    LOr = 0x81, "lor", F(-2), 1;
    IXor = 0x82, "ixor", F(-1), 1;
    LXor = 0x83, "lxor", F(-2), 1;
    IInc = 0x84, "iinc", F(0), 3;
    I2L = 0x85, "i2l", F(1), 1;
    I2F = 0x86, "i2f", F(0), 1;
    I2D = 0x87, "i2d", F(1), 1;
    L2I = 0x88, "l2i", F(-1), 1;
    L2F = 0x89, "l2f", F(-1), 1;
    L2D = 0x8a, "l2d", F(0), 1;
    F2I = 0x8b, "f2i", F(0), 1;
    F2L = 0x8c, "f2l", F(1), 1;
    F2D = 0x8d, "f2d", F(1), 1;
    D2I = 0x8e, "d2i", F(-1), 1;
    D2L = 0x8f, "d2l", F(0), 1;
    D2F = 0x90, "d2f", F(-1), 1;
    I2B = 0x91, "i2b", F(0), 1;
    I2C = 0x92, "i2c", F(0), 1;
    I2S = 0x93, "i2s", F(0), 1;
    LCmp = 0x94, "lcmp", F(-3), 1;
    FCmpL = 0x95, "fcmpl", F(-1), 1;
    FCmpG = 0x96, "fcmpg", F(-1), 1;
    DCmpL = 0x97, "dcmpl", F(-3), 1;
    DCmpG = 0x98, "dcmpg", F(-3), 1;
    IfEq = 0x99, "ifeq", F(-1), 3;
    IfNe = 0x9a, "ifne", F(-1), 3;
    IfLt = 0x9b, "iflt", F(-1), 3;
    IfGe = 0x9c, "ifge", F(-1), 3;
    IfGt = 0x9d, "ifgt", F(-1), 3;
    IfLe = 0x9e, "ifle", F(-1), 3;
    IfICmpEq = 0x9f, "if_icmpeq", F(-2), 3;
    IfICmpNe = 0xa0, "if_icmpne", F(-2), 3;
    IfICmpLt = 0xa1, "if_icmplt", F(-2), 3;
    IfICmpGe = 0xa2, "if_icmpge", F(-2), 3;
    IfICmpGt = 0xa3, "if_icmpgt", F(-2), 3;
    IfICmpLe = 0xa4, "if_icmple", F(-2), 3;
    IfACmpEq = 0xa5, "if_acmpeq", F(-2), 3;
    IfACmpNe = 0xa6, "if_acmpne", F(-2), 3;
    Goto = 0xa7, "goto", F(0), 3;
    Jsr = 0xa8, "jsr", U, 3;
    Ret = 0xa9, "ret", U, 2;
    TableSwitch = 0xaa, "tableswitch", U, 0;
    LookupSwitch = 0xab, "lookupswitch", U, 0;
    IReturn = 0xac, "ireturn", F(-1), 1;
    LReturn = 0xad, "lreturn", F(-2), 1;
    FReturn = 0xae, "freturn", F(-1), 1;
    DReturn = 0xaf, "dreturn", F(-2), 1;
    AReturn = 0xb0, "areturn", F(-1), 1;
    Return = 0xb1, "return", F(0), 1;
    GetStatic = 0xb2, "getstatic", V, 3;
    PutStatic = 0xb3, "putstatic", V, 3;
    GetField = 0xb4, "getfield", V, 3;
    PutField = 0xb5, "putfield", V, 3;
    InvokeVirtual = 0xb6, "invokevirtual", V, 3;
    InvokeSpecial = 0xb7, "invokespecial", V, 3;
    InvokeStatic = 0xb8, "invokestatic", V, 3;
    InvokeInterface = 0xb9, "invokeinterface", V, 5;
    InvokeDynamic = 0xba, "invokedynamic", U, 5;
    New = 0xbb, "new", F(1), 3;
    NewArray = 0xbc, "newarray", F(0), 2;
    ANewArray = 0xbd, "anewarray", F(0), 3;
    ArrayLength = 0xbe, "arraylength", F(0), 1;
    AThrow = 0xbf, "athrow", F(-1), 1;
    CheckCast = 0xc0, "checkcast", F(0), 3;
    InstanceOf = 0xc1, "instanceof", F(0), 3;
    MonitorEnter = 0xc2, "monitorenter", F(-1), 1;
    MonitorExit = 0xc3, "monitorexit", F(-1), 1;
    Wide = 0xc4, "wide", V, 0;
    MultiANewArray = 0xc5, "multianewarray", U, 4;
    IfNull = 0xc6, "ifnull", F(-1), 3;
    IfNonNull = 0xc7, "ifnonnull", F(-1), 3;
    GotoW = 0xc8, "goto_w", F(0), 5;
    JsrW = 0xc9, "jsr_w", U, 5;
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        Opcode::ALL.get(byte as usize).copied()
    }

    /// Conditional branch which jumps exactly when this one falls through
    pub fn negated(self) -> Option<Opcode> {
        // `if*` opcodes come in negated pairs: `ifeq`/`ifne`, `iflt`/`ifge`, etc.
        match self as u8 {
            byte @ 0x99..=0xa6 if (byte - 0x99) % 2 == 0 => Opcode::from_u8(byte + 1),
            byte @ 0x99..=0xa6 => Opcode::from_u8(byte - 1),
            0xc6 => Some(Opcode::IfNonNull),
            0xc7 => Some(Opcode::IfNull),
            _ => None,
        }
    }

    /// Does this opcode unconditionally leave the method?
    pub const fn is_return(self) -> bool {
        matches!(
            self,
            Opcode::IReturn
                | Opcode::LReturn
                | Opcode::FReturn
                | Opcode::DReturn
                | Opcode::AReturn
                | Opcode::Return
        )
    }
}
