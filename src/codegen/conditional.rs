use super::code_buffer::CodeBuffer;
use super::opcode::Opcode;
use crate::jvm::FieldType;
use std::io::{Error, ErrorKind, Result};

/// Open if/then/else in the method currently being generated
///
/// Branch offsets are emitted as `0` and patched once the target is known. Conditionals are only
/// ever generated with forward jumps.
#[derive(Debug)]
pub struct Conditional {
    /// Offset of the `if*` instruction
    if_pc: usize,

    /// Was the `if*` rewritten into `if!* +8; goto_w`?
    if_widened: bool,

    /// Offset of the `goto` at the end of the then-block (once the else block is started)
    then_goto_pc: Option<usize>,

    /// Stack on entry to the then-block, then (once the else block is started) the stack at the
    /// end of the then-block
    stack: Vec<FieldType>,
}

impl Conditional {
    /// Emit the `if*` (with a placeholder offset) and start the then-block
    pub fn new(code: &mut CodeBuffer, opcode: Opcode, entry_stack: Vec<FieldType>) -> Conditional {
        let if_pc = code.pc();
        code.add_instr_s2(opcode, 0);
        Conditional {
            if_pc,
            if_widened: false,
            then_goto_pc: None,
            stack: entry_stack,
        }
    }

    /// Stack that the current block needs to finish with
    pub fn expected_stack(&self) -> &[FieldType] {
        &self.stack
    }

    /// Swap in the stack at the end of the then-block, returning the entry stack (which is where
    /// the else block starts)
    pub fn swap_stack(&mut self, then_stack: Vec<FieldType>) -> Vec<FieldType> {
        std::mem::replace(&mut self.stack, then_stack)
    }

    /// End the then-block by jumping over the else block, and point the `if*` at the else block
    pub fn start_else(&mut self, code: &mut CodeBuffer) -> Result<()> {
        code.add_instr_s2(Opcode::Goto, 0);
        let else_pc = code.pc();
        self.if_widened = fill_in(code, self.if_pc, else_pc)?;
        self.then_goto_pc = Some(code.pc() - 3);
        Ok(())
    }

    /// Point the pending branch at the current end of the code
    pub fn end(&self, code: &mut CodeBuffer) -> Result<()> {
        let end_pc = code.pc();
        let goto_pc = match self.then_goto_pc {
            None => {
                fill_in(code, self.if_pc, end_pc)?;
                return Ok(());
            }
            Some(goto_pc) => goto_pc,
        };

        if fill_in(code, goto_pc, end_pc)? {
            // Widening the `goto` moved the start of the else block up by two bytes
            let else_pc = goto_pc + 5;
            if self.if_widened {
                let goto_w_pc = self.if_pc + 3;
                code.patch(goto_w_pc + 1)
                    .write_s4((else_pc - goto_w_pc) as i32)?;
            } else {
                fill_in(code, self.if_pc, else_pc)?;
            }
        }
        Ok(())
    }
}

/// Patch the offset of the branch at `branch_pc` so that it jumps to `target_pc`
///
/// Offsets that don't fit in the signed 16-bit operand of `goto`/`if*` get the branch widened:
///
/// ```text,ignore,no_run
///     goto L          =>    goto_w L
///
///     if* L           =>    if!* +8
///                           goto_w L
/// ```
///
/// Widening inserts code right after the branch, so everything from there on moves up (including
/// the target). Returns whether the branch was widened.
pub fn fill_in(code: &mut CodeBuffer, branch_pc: usize, target_pc: usize) -> Result<bool> {
    debug_assert!(target_pc > branch_pc, "Conditional branches only jump forward");
    let offset = target_pc - branch_pc;

    if offset <= i16::MAX as usize {
        code.patch(branch_pc + 1).write_s2(offset as i16)?;
        return Ok(false);
    }

    let opcode = code.opcode(branch_pc);
    let wide_offset = i32::try_from(offset + 2)
        .map_err(|_| Error::new(ErrorKind::InvalidData, "Branch offset out of range"))?;
    match opcode {
        Some(Opcode::Goto) => {
            let mut patch = code.insert_code_space(branch_pc, 2);
            patch.write_opcode(Opcode::GotoW)?;
            patch.write_s4(wide_offset)?;
        }
        Some(opcode) => {
            let negated = opcode.negated().ok_or_else(|| {
                let msg = format!("Cannot widen `{}`", opcode.mnemonic());
                Error::new(ErrorKind::InvalidData, msg)
            })?;
            let mut patch = code.insert_code_space(branch_pc, 5);
            patch.write_opcode(negated)?;
            patch.write_s2(8)?;
            patch.write_opcode(Opcode::GotoW)?;
            patch.write_s4(wide_offset)?;
        }
        None => return Err(Error::new(ErrorKind::InvalidData, "Invalid branch opcode")),
    }
    Ok(true)
}
