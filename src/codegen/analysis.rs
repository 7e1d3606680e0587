//! Static analysis of already encoded bytecode
//!
//! Method splitting works on the emitted bytes rather than on some higher level representation.
//! Everything here walks the code one instruction at a time, relying on the opcode table for
//! lengths and stack effects, and on the constant pool for field and method descriptors.
//!
//! The analysis only has to understand code that the assembler itself emits. In particular, the
//! only conditional branches that appear are those of `MethodAssembler::conditional_if` and
//! `MethodAssembler::conditional_if_null` (in their normal or widened forms), and the only
//! `goto`s are the ones ending a then-block.

use super::opcode::{Opcode, StackEffect};
use crate::jvm::class_file::{ConstantIndex, ConstantsPool};
use crate::jvm::{FieldType, MethodDescriptor, ParseDescriptor};
use crate::util::Width;
use byteorder::{BigEndian, ByteOrder};

/// Length in bytes of the instruction at `pc`
pub fn instruction_length(code: &[u8], pc: usize) -> usize {
    let opcode = match Opcode::from_u8(code[pc]) {
        Some(opcode) => opcode,
        None => return 1,
    };
    match opcode {
        Opcode::Wide if code.get(pc + 1) == Some(&(Opcode::IInc as u8)) => 6,
        Opcode::Wide => 4,
        Opcode::TableSwitch => {
            let operands = pc + 1 + switch_padding(pc);
            let low = BigEndian::read_i32(&code[operands + 4..]) as isize;
            let high = BigEndian::read_i32(&code[operands + 8..]) as isize;
            (operands - pc) + 12 + 4 * (high - low + 1) as usize
        }
        Opcode::LookupSwitch => {
            let operands = pc + 1 + switch_padding(pc);
            let pairs = BigEndian::read_i32(&code[operands + 4..]) as usize;
            (operands - pc) + 8 + 8 * pairs
        }
        _ => opcode.info().length as usize,
    }
}

/// Switch operands are aligned to a multiple of four bytes from the start of the code
fn switch_padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

/// Net change in operand stack depth (in words) from executing the instruction at `pc`
///
/// Field and method instructions have their effect decoded from the descriptor they reference.
/// If that lookup fails (which only happens after the constant pool has overflowed, at which
/// point the class is unusable anyway) the effect is taken to be `0`.
pub fn stack_word_delta(code: &[u8], pc: usize, constants: &ConstantsPool) -> isize {
    let opcode = match Opcode::from_u8(code[pc]) {
        Some(opcode) => opcode,
        None => return 0,
    };
    match opcode.info().stack {
        StackEffect::Fixed(delta) => delta as isize,
        StackEffect::Unsupported => panic!("Cannot analyze `{}`", opcode.mnemonic()),
        StackEffect::Variable if opcode == Opcode::Wide => match Opcode::from_u8(code[pc + 1]) {
            Some(Opcode::IInc) | None => 0,
            Some(widened) => match widened.info().stack {
                StackEffect::Fixed(delta) => delta as isize,
                _ => 0,
            },
        },
        StackEffect::Variable => {
            let index = ConstantIndex(BigEndian::read_u16(&code[pc + 1..]));
            member_stack_delta(opcode, code, pc, index, constants).unwrap_or(0)
        }
    }
}

fn member_stack_delta(
    opcode: Opcode,
    code: &[u8],
    pc: usize,
    index: ConstantIndex,
    constants: &ConstantsPool,
) -> Option<isize> {
    let descriptor = constants.member_descriptor(index)?;
    let delta = match opcode {
        Opcode::GetStatic | Opcode::PutStatic | Opcode::GetField | Opcode::PutField => {
            let width = FieldType::parse(descriptor).ok()?.width() as isize;
            match opcode {
                Opcode::GetStatic => width,
                Opcode::GetField => width - 1,
                Opcode::PutStatic => -width,
                _ => -width - 1,
            }
        }
        _ => {
            let method = MethodDescriptor::parse(descriptor).ok()?;
            let return_width = method.return_width() as isize;
            match opcode {
                Opcode::InvokeStatic => return_width - method.parameter_length(false) as isize,
                Opcode::InvokeInterface => return_width - code[pc + 3] as isize,
                _ => return_width - method.parameter_length(true) as isize,
            }
        }
    };
    Some(delta)
}

/// Descriptor of the method or field referenced by the instruction at `pc`
pub fn referenced_descriptor<'a>(
    code: &[u8],
    pc: usize,
    constants: &'a ConstantsPool,
) -> Option<&'a str> {
    let index = ConstantIndex(BigEndian::read_u16(&code[pc + 1..]));
    constants.member_descriptor(index)
}

/// Span of an if/then/else as it appears in the code
///
/// ```text,ignore,no_run
///       if*  ELSE                     ; or the wide form: `if!* +8; goto_w ELSE`
/// THEN: ...
///       goto END                      ; only when there is an else block
/// ELSE: ...
/// END:
/// ```
///
/// When there is no else block, the branch jumps straight to `END`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ConditionalRegion {
    /// Start of the then-block
    pub then_pc: usize,

    /// Start of the else block, if there is one
    pub else_pc: Option<usize>,

    /// First instruction after the whole conditional
    pub end_pc: usize,
}

impl ConditionalRegion {
    /// End of the then-block (including its trailing `goto`, if any)
    pub fn then_end_pc(&self) -> usize {
        self.else_pc.unwrap_or(self.end_pc)
    }
}

/// If the instruction at `pc` is the start of a conditional, find its extent
pub fn conditional_region(code: &[u8], pc: usize) -> Option<ConditionalRegion> {
    match Opcode::from_u8(code[pc])? {
        Opcode::IfEq | Opcode::IfNe | Opcode::IfNull | Opcode::IfNonNull => (),
        _ => return None,
    }

    let if_offset = BigEndian::read_i16(&code[pc + 1..]);
    let wide = if_offset == 8 && code.get(pc + 3) == Some(&(Opcode::GotoW as u8));
    let (then_pc, branch_target) = if wide {
        let goto_offset = BigEndian::read_i32(&code[pc + 4..]);
        (pc + 8, (pc + 3) as isize + goto_offset as isize)
    } else {
        (pc + 3, pc as isize + if_offset as isize)
    };
    let branch_target = branch_target as usize;

    // Look for a `goto` which finishes exactly where the branch lands
    let mut then_pc_scan = then_pc;
    while then_pc_scan < branch_target {
        if let Some(nested) = conditional_region(code, then_pc_scan) {
            then_pc_scan = nested.end_pc;
            continue;
        }

        let length = instruction_length(code, then_pc_scan);
        if then_pc_scan + length == branch_target {
            let end_pc = match Opcode::from_u8(code[then_pc_scan]) {
                Some(Opcode::Goto) => {
                    Some(then_pc_scan as isize + BigEndian::read_i16(&code[then_pc_scan + 1..]) as isize)
                }
                Some(Opcode::GotoW) => {
                    Some(then_pc_scan as isize + BigEndian::read_i32(&code[then_pc_scan + 1..]) as isize)
                }
                _ => None,
            };
            if let Some(end_pc) = end_pc {
                return Some(ConditionalRegion {
                    then_pc,
                    else_pc: Some(branch_target),
                    end_pc: end_pc as usize,
                });
            }
        }
        then_pc_scan += length;
    }

    Some(ConditionalRegion {
        then_pc,
        else_pc: None,
        end_pc: branch_target,
    })
}

/// Maximum stack depth reached running `code[start..end]` starting from an empty stack
///
/// For conditionals with an else block, the then-block is replayed separately (on top of the
/// stack at the branch) and the walk resumes at the start of the else block. Both arms of a
/// conditional always finish with the same stack.
pub fn find_max_stack(code: &[u8], constants: &ConstantsPool, start: usize, end: usize) -> usize {
    let mut stack: isize = 0;
    let mut max: isize = 0;
    let mut pc = start;
    while pc < end {
        stack += stack_word_delta(code, pc, constants);
        max = max.max(stack);

        if let Some(ConditionalRegion {
            then_pc,
            else_pc: Some(else_pc),
            ..
        }) = conditional_region(code, pc)
        {
            let then_max = find_max_stack(code, constants, then_pc, else_pc) as isize;
            max = max.max(stack + then_max);
            pc = else_pc;
            continue;
        }

        pc += instruction_length(code, pc);
    }
    max.max(0) as usize
}

/// Does `code[start..end]` contain a return instruction (including inside nested conditionals)?
pub fn contains_return(code: &[u8], start: usize, end: usize) -> bool {
    let mut pc = start;
    while pc < end {
        if Opcode::from_u8(code[pc]).map_or(false, Opcode::is_return) {
            return true;
        }
        pc += instruction_length(code, pc);
    }
    false
}

/// Stack depth after running `code[start..end]` from an empty stack, or `None` if the code would
/// need values from below its starting point
///
/// This is only meaningful on straight-line code.
pub fn replay_stack_depth(
    code: &[u8],
    constants: &ConstantsPool,
    start: usize,
    end: usize,
) -> Option<isize> {
    let mut stack: isize = 0;
    let mut pc = start;
    while pc < end {
        stack += stack_word_delta(code, pc, constants);
        if stack < 0 {
            return None;
        }
        pc += instruction_length(code, pc);
    }
    Some(stack)
}

/// Does `code[start..end]` read any method parameters?
///
/// The generated code never stores to locals, so every load is a parameter load. The exception
/// is `aload_0` in an instance method, which is just `this`.
pub fn uses_parameters(
    code: &[u8],
    start: usize,
    end: usize,
    is_static: bool,
    has_parameters: bool,
) -> bool {
    if !has_parameters {
        return false;
    }

    let mut pc = start;
    while pc < end {
        match Opcode::from_u8(code[pc]) {
            Some(Opcode::ALoad0) if !is_static => (),
            Some(opcode) if is_load(opcode) => return true,
            Some(Opcode::Wide) => {
                if Opcode::from_u8(code[pc + 1]).map_or(false, is_load) {
                    return true;
                }
            }
            _ => (),
        }
        pc += instruction_length(code, pc);
    }
    false
}

fn is_load(opcode: Opcode) -> bool {
    (Opcode::ILoad as u8..=Opcode::ALoad3 as u8).contains(&(opcode as u8))
}
