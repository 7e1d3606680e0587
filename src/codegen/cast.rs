use super::opcode::Opcode;
use crate::jvm::BaseType;

/// Primitive types, as far as conversion instructions are concerned
///
/// `boolean` is just an `int` on the operand stack.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PrimitiveKind {
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl From<BaseType> for PrimitiveKind {
    fn from(base_type: BaseType) -> PrimitiveKind {
        match base_type {
            BaseType::Byte => PrimitiveKind::Byte,
            BaseType::Short => PrimitiveKind::Short,
            BaseType::Char => PrimitiveKind::Char,
            BaseType::Int | BaseType::Boolean => PrimitiveKind::Int,
            BaseType::Long => PrimitiveKind::Long,
            BaseType::Float => PrimitiveKind::Float,
            BaseType::Double => PrimitiveKind::Double,
        }
    }
}

impl PrimitiveKind {
    /// One step towards converting a value of this kind into `target`
    ///
    /// Returns the instruction to emit (if any) and the kind of the value after that instruction.
    /// Kinds narrower than `int` are already valid `int`s, so widening them is free.
    fn conversion_step(self, target: PrimitiveKind) -> (Option<Opcode>, PrimitiveKind) {
        use PrimitiveKind::*;
        match (self, target) {
            (Byte, Short) => (None, Short),
            (Short | Char, Byte) => (Some(Opcode::I2B), Byte),
            (Char, Short) => (Some(Opcode::I2S), Short),
            (Byte | Short, Char) => (Some(Opcode::I2C), Char),
            (Byte | Short | Char, _) => (None, Int),

            (Int, Byte) => (Some(Opcode::I2B), Byte),
            (Int, Short) => (Some(Opcode::I2S), Short),
            (Int, Char) => (Some(Opcode::I2C), Char),
            (Int, Long) => (Some(Opcode::I2L), Long),
            (Int, Float) => (Some(Opcode::I2F), Float),
            (Int, Double) => (Some(Opcode::I2D), Double),

            (Long, Float) => (Some(Opcode::L2F), Float),
            (Long, Double) => (Some(Opcode::L2D), Double),
            (Long, _) => (Some(Opcode::L2I), Int),

            (Float, Long) => (Some(Opcode::F2L), Long),
            (Float, Double) => (Some(Opcode::F2D), Double),
            (Float, _) => (Some(Opcode::F2I), Int),

            (Double, Long) => (Some(Opcode::D2L), Long),
            (Double, Float) => (Some(Opcode::D2F), Float),
            (Double, _) => (Some(Opcode::D2I), Int),

            (kind, _) => (None, kind),
        }
    }

    /// Sequence of instructions converting a value of this kind into `target`
    pub fn conversions(self, target: PrimitiveKind) -> Vec<Opcode> {
        let mut current = self;
        let mut instructions = vec![];
        while current != target {
            let (instruction, next) = current.conversion_step(target);
            instructions.extend(instruction);
            current = next;
        }
        instructions
    }
}
