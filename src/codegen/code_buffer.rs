use super::opcode::Opcode;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::{Cursor, Result};

/// Growable array of encoded bytecode for one method body
///
/// The program counter is always the length of the buffer: instructions are appended to the end
/// of the buffer. The only edit which touches earlier instructions is patching of operands (see
/// [`CodeBuffer::patch`] and [`CodeBuffer::insert_code_space`]).
#[derive(Default, Debug, Clone)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> CodeBuffer {
        CodeBuffer { bytes: vec![] }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> CodeBuffer {
        CodeBuffer { bytes }
    }

    /// Current program counter (offset of the next instruction added)
    pub fn pc(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Opcode at a given offset, if it decodes to one
    pub fn opcode(&self, pc: usize) -> Option<Opcode> {
        self.bytes.get(pc).copied().and_then(Opcode::from_u8)
    }

    pub fn add_instr(&mut self, opcode: Opcode) {
        self.bytes.push(opcode as u8);
    }

    pub fn add_instr_u1(&mut self, opcode: Opcode, operand: u8) {
        self.bytes.push(opcode as u8);
        self.bytes.push(operand);
    }

    pub fn add_instr_u2(&mut self, opcode: Opcode, operand: u16) {
        self.bytes.push(opcode as u8);
        self.push_u2(operand);
    }

    pub fn add_instr_s2(&mut self, opcode: Opcode, operand: i16) {
        self.add_instr_u2(opcode, operand as u16);
    }

    pub fn add_instr_u4(&mut self, opcode: Opcode, operand: u32) {
        self.bytes.push(opcode as u8);
        let mut buf = [0; 4];
        BigEndian::write_u32(&mut buf, operand);
        self.bytes.extend_from_slice(&buf);
    }

    /// Used by `invokeinterface` (constant index, argument count, then a zero byte)
    pub fn add_instr_u2_u1_u1(&mut self, opcode: Opcode, operand1: u16, operand2: u8, operand3: u8) {
        self.bytes.push(opcode as u8);
        self.push_u2(operand1);
        self.bytes.push(operand2);
        self.bytes.push(operand3);
    }

    /// Add a load or store of a local variable, picking the shortest encoding
    ///
    /// `short_form` is the `*_0` variant of the instruction (the `_1`, `_2`, `_3` variants follow
    /// it) and `normal_form` takes the slot as a single byte operand. Slots past 255 need the
    /// `wide` prefix.
    pub fn add_local_instr(&mut self, short_form: Opcode, normal_form: Opcode, slot: u16) {
        if slot <= 3 {
            self.bytes.push(short_form as u8 + slot as u8);
        } else if slot <= u8::MAX as u16 {
            self.add_instr_u1(normal_form, slot as u8);
        } else {
            self.add_instr(Opcode::Wide);
            self.add_instr_u2(normal_form, slot);
        }
    }

    fn push_u2(&mut self, value: u16) {
        let mut buf = [0; 2];
        BigEndian::write_u16(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
    }

    /// Append a run of already encoded instructions
    pub fn extend_from_slice(&mut self, code: &[u8]) {
        self.bytes.extend_from_slice(code);
    }

    pub fn u1(&self, pc: usize) -> u8 {
        self.bytes[pc]
    }

    pub fn u2(&self, pc: usize) -> u16 {
        BigEndian::read_u16(&self.bytes[pc..])
    }

    pub fn s2(&self, pc: usize) -> i16 {
        BigEndian::read_i16(&self.bytes[pc..])
    }

    pub fn s4(&self, pc: usize) -> i32 {
        BigEndian::read_i32(&self.bytes[pc..])
    }

    /// Overwrite already emitted bytes, starting at `pc`
    pub fn patch(&mut self, pc: usize) -> CodePatch<'_> {
        CodePatch {
            cursor: Cursor::new(&mut self.bytes[pc..]),
        }
    }

    /// Make room for `additional` bytes at `pc`, shifting everything from there onwards up
    ///
    /// The returned patch starts at `pc`, and spans the new space as well as the shifted code.
    pub fn insert_code_space(&mut self, pc: usize, additional: usize) -> CodePatch<'_> {
        self.bytes
            .splice(pc..pc, std::iter::repeat(0).take(additional));
        self.patch(pc)
    }
}

/// Bounded write access into an existing part of a [`CodeBuffer`]
///
/// Writes past the end of the buffer fail instead of growing it.
pub struct CodePatch<'a> {
    cursor: Cursor<&'a mut [u8]>,
}

impl<'a> CodePatch<'a> {
    pub fn write_opcode(&mut self, opcode: Opcode) -> Result<()> {
        self.cursor.write_u8(opcode as u8)
    }

    pub fn write_u2(&mut self, value: u16) -> Result<()> {
        self.cursor.write_u16::<BigEndian>(value)
    }

    pub fn write_s2(&mut self, value: i16) -> Result<()> {
        self.cursor.write_i16::<BigEndian>(value)
    }

    pub fn write_s4(&mut self, value: i32) -> Result<()> {
        self.cursor.write_i32::<BigEndian>(value)
    }

    /// Number of bytes written so far
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }
}
