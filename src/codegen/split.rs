//! Splitting methods whose code is too long
//!
//! Once a physical method is complete, code beyond `Settings::split_length` gets moved out into
//! private sub-methods, and the moved code is replaced by a call. Two strategies are tried:
//!
//!   - **zero-stack splits** move a run of complete statements (code that starts and ends with an
//!     empty stack, and doesn't cut through any conditional) into a `void` sub-method
//!
//!   - **expression splits** move a chain of calls returning objects (something like
//!     `a.b(c).d().e(f)`) into a sub-method returning that object
//!
//! Sub-methods get the parameters of the method they are split from if the moved code reads any
//! of them. The code never stores to locals, so that is enough for the moved code to behave the
//! same as it did in place.

use super::analysis::{
    conditional_region, contains_return, find_max_stack, instruction_length,
    referenced_descriptor, replay_stack_depth, stack_word_delta, uses_parameters,
    ConditionalRegion,
};
use super::class::ClassAssembler;
use super::code_buffer::CodeBuffer;
use super::method::load_opcodes;
use super::opcode::Opcode;
use crate::jvm::class_file::{ConstantsWriter, MethodRef, MethodRefConstantIndex};
use crate::jvm::{FieldType, MethodDescriptor, Name, ParseDescriptor, RefType};
use crate::util::Width;

/// Code calling a sub-method with the same parameters as its caller
pub(super) struct SubMethodCall {
    pub code: CodeBuffer,

    /// Words pushed for the call, before the invoke consumes them
    pub argument_words: usize,
}

/// Which strategy the split loop is on
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum SplitStrategy {
    ZeroStack,
    Expression,
}

impl ClassAssembler {
    /// Split a completed (but not yet serialized) method until it fits in the split length
    ///
    /// Zero-stack splits are tried first, walking forward through the method. Once those run
    /// out, expression splits are tried from the start. If the method still doesn't fit, it is
    /// left as is (and, if it is over the hard limit, the limit gets reported when the method is
    /// finished off).
    pub(super) fn split_method(&mut self, idx: usize) {
        let split_length = self.settings.split_length;
        if split_length == 0 {
            log::warn!(
                "Not splitting {}: split length is 0",
                self.methods[idx].name.as_str()
            );
            return;
        }
        let mut strategy = SplitStrategy::ZeroStack;
        let mut split_pc = 0;

        while self.limit_exceeded().is_none() {
            let code_length = self.methods[idx].code.pc();
            if code_length <= split_length {
                break;
            }

            // Aim to take out just enough code, unless there is way too much
            let optimal_length = if code_length < 2 * split_length {
                code_length - split_length
            } else {
                split_length - 1
            };

            let split = match strategy {
                SplitStrategy::ZeroStack => {
                    let optimal_length = optimal_length.min(code_length - split_pc);
                    self.split_zero_stack(idx, split_pc, optimal_length)
                }
                SplitStrategy::Expression => self.split_expression_out(idx, optimal_length),
            };

            match split {
                Some(post_call_pc) => {
                    if strategy == SplitStrategy::ZeroStack {
                        split_pc = post_call_pc;
                    }
                }
                None if strategy == SplitStrategy::ZeroStack => {
                    log::debug!(
                        "No more statement splits in {}, trying expressions",
                        self.methods[idx].name.as_str()
                    );
                    strategy = SplitStrategy::Expression;
                    split_pc = 0;
                }
                None => break,
            }
        }
    }

    /// Length of the code calling a sub-method of `caller` (assuming it takes all parameters)
    ///
    /// Blocks that are no longer than this aren't worth moving.
    fn sub_method_call_length(&self, caller: usize) -> usize {
        let method = &self.methods[caller];
        let this_length = if method.is_static() { 0 } else { 1 };
        let loads_length: usize = method
            .parameter_slots
            .iter()
            .map(|slot| match *slot {
                0..=3 => 1,
                4..=255 => 2,
                _ => 4,
            })
            .sum();
        this_length + loads_length + 3
    }

    /// Build the code that calls `sub_method` from `caller`
    ///
    /// Pushes `this` (for instance methods) and the parameters the sub-method takes, then
    /// invokes it (with `invokespecial` since sub-methods are private).
    pub(super) fn sub_method_call(&mut self, caller: usize, sub_method: usize) -> SubMethodCall {
        let caller_method = &self.methods[caller];
        let sub = &self.methods[sub_method];
        let is_static = sub.is_static();

        let mut code = CodeBuffer::new();
        let mut argument_words = 0;
        if !is_static {
            code.add_instr(Opcode::ALoad0);
            argument_words += 1;
        }
        let parameters = caller_method
            .descriptor
            .parameters
            .iter()
            .zip(&caller_method.parameter_slots)
            .take(sub.descriptor.parameters.len());
        for (parameter, slot) in parameters {
            let (short_form, normal_form) = load_opcodes(parameter);
            code.add_local_instr(short_form, normal_form, *slot as u16);
            argument_words += parameter.width();
        }

        let method_ref = MethodRef {
            class: self.class_name().clone(),
            name: sub.name.clone(),
            descriptor: sub.descriptor.clone(),
            is_interface: false,
        };
        let caller_name = caller_method.name.clone();
        let index: MethodRefConstantIndex = {
            let result = method_ref.constant_index(&mut self.constants);
            self.record_overflow(Some(&caller_name), result)
        };
        let opcode = if is_static {
            Opcode::InvokeStatic
        } else {
            Opcode::InvokeSpecial
        };
        code.add_instr_u2(opcode, index.0 .0);

        SubMethodCall {
            code,
            argument_words,
        }
    }

    /// Move `code[start..end]` of a method into a new sub-method, replacing it with a call
    ///
    /// The moved code must leave either nothing (`return_type` is `None`) or a single object of
    /// type `return_type` on the stack. Returns the offset just after the call, or `None` if
    /// the split couldn't be done because a limit got exceeded.
    fn split_code_into_sub_method(
        &mut self,
        idx: usize,
        start: usize,
        end: usize,
        return_type: Option<FieldType>,
    ) -> Option<usize> {
        let method = &self.methods[idx];
        let with_parameters = uses_parameters(
            method.code.as_slice(),
            start,
            end,
            method.is_static(),
            !method.descriptor.parameters.is_empty(),
        );
        let moved = method.code.as_slice()[start..end].to_vec();
        let return_opcode = if return_type.is_some() {
            Opcode::AReturn
        } else {
            Opcode::Return
        };

        let sub_method = self.new_sub_method(idx, return_type, with_parameters);
        let sub = &mut self.methods[sub_method];
        sub.code.extend_from_slice(&moved);
        sub.code.add_instr(return_opcode);
        if self.limit_exceeded().is_some() {
            return None;
        }

        let sub = &self.methods[sub_method];
        let sub_max_stack = find_max_stack(sub.code.as_slice(), &self.constants, 0, sub.code.pc());
        self.methods[sub_method].stack.set_max_depth(sub_max_stack);
        self.complete_method(sub_method);

        let call = self.sub_method_call(idx, sub_method);
        let method = &mut self.methods[idx];
        let mut code = CodeBuffer::new();
        code.extend_from_slice(&method.code.as_slice()[..start]);
        code.extend_from_slice(call.code.as_slice());
        let post_call_pc = code.pc();
        code.extend_from_slice(&method.code.as_slice()[end..]);
        method.code = code;

        let method = &self.methods[idx];
        let max_stack = find_max_stack(method.code.as_slice(), &self.constants, 0, method.code.pc());
        log::debug!(
            "Split {} bytes at {} out of {} into {}",
            end - start,
            start,
            method.name.as_str(),
            self.methods[sub_method].name.as_str()
        );
        self.methods[idx].stack.set_max_depth(max_stack);
        Some(post_call_pc)
    }

    /// Try to move a run of complete statements starting at `split_pc` into a sub-method
    ///
    /// The stack must be empty at `split_pc`. The run ends at a point where the stack is empty
    /// again, outside of any conditional, and never takes in a return. The first such end making the run at least
    /// `optimal_length` long is picked, otherwise the longest run that still fits.
    fn split_zero_stack(
        &mut self,
        idx: usize,
        split_pc: usize,
        optimal_length: usize,
    ) -> Option<usize> {
        let max_length = self.settings.split_length - 1;
        let min_length = self.sub_method_call_length(idx);

        let code = self.methods[idx].code.as_slice();
        let mut stack: isize = 0;
        let mut outer_end_pc: Option<usize> = None;
        let mut possible_end: Option<usize> = None;
        let mut chosen_end: Option<usize> = None;

        let mut pc = split_pc;
        while pc < code.len() {
            if Opcode::from_u8(code[pc]).map_or(false, Opcode::is_return) {
                break;
            }
            stack += stack_word_delta(code, pc, &self.constants);

            let region = conditional_region(code, pc);

            // The then-block gets skipped over below, so returns in it have to be found here
            if let Some(region @ ConditionalRegion { else_pc: Some(_), .. }) = region {
                if contains_return(code, region.then_pc, region.then_end_pc()) {
                    break;
                }
            }

            match (region, outer_end_pc) {
                (Some(region), None) => outer_end_pc = Some(region.end_pc),
                (Some(region), Some(outer_end)) => debug_assert!(region.end_pc <= outer_end),
                (None, _) => (),
            }

            // Both arms of a conditional have the same stack effect, so only the else block is
            // followed
            pc = match region {
                Some(ConditionalRegion {
                    else_pc: Some(else_pc),
                    ..
                }) => else_pc,
                _ => pc + instruction_length(code, pc),
            };

            if let Some(outer_end) = outer_end_pc {
                if pc < outer_end {
                    continue;
                }
                outer_end_pc = None;
            }

            if stack != 0 {
                continue;
            }
            let block_length = pc - split_pc;
            if block_length <= min_length {
                continue;
            }
            if block_length > max_length {
                break;
            }
            if block_length >= optimal_length {
                chosen_end = Some(pc);
                break;
            }
            possible_end = Some(pc);
        }

        let end = chosen_end.or(possible_end)?;
        self.split_code_into_sub_method(idx, split_pc, end, None)
    }

    /// Try to move a chain of calls returning an object into a sub-method
    ///
    /// Only the straight-line code before the first conditional is considered. While walking it,
    /// `earliest[d]` tracks the earliest offset from which the code produces the stack word at
    /// depth `d` (from a stack that was `d` words deep), so that when an object-returning call
    /// is reached its whole receiver and argument computation can be moved along with it.
    fn split_expression_out(&mut self, idx: usize, optimal_length: usize) -> Option<usize> {
        let max_length = self.settings.split_length - 1;
        let min_length = self.sub_method_call_length(idx);

        let method = &self.methods[idx];
        let code = method.code.as_slice();
        let mut earliest: Vec<Option<usize>> = vec![None; method.stack.max_depth() + 1];
        let mut depth_before: Vec<isize> = vec![-1; code.len()];
        let mut stack: isize = 0;
        let mut best: Option<(usize, usize, FieldType)> = None;
        let mut chosen: Option<(usize, usize, FieldType)> = None;

        let mut pc = 0;
        while pc < code.len() {
            let opcode = match Opcode::from_u8(code[pc]) {
                Some(opcode) => opcode,
                None => break,
            };
            if conditional_region(code, pc).is_some() {
                break;
            }

            depth_before[pc] = stack;
            let next_pc = pc + instruction_length(code, pc);
            let stack_after = stack + stack_word_delta(code, pc, &self.constants);
            if stack_after < 0 {
                break;
            }
            let top = stack_after as usize;
            if top >= earliest.len() {
                earliest.resize(top + 1, None);
            }

            use Opcode::*;
            match opcode {
                // Same value, still starting in the same place
                Nop | CheckCast | ArrayLength | F2I | D2L | DNeg => (),

                AConstNull | IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4
                | IConst5 | FConst0 | FConst1 | FConst2 | BiPush | SiPush | Ldc | LdcW
                | ILoad | FLoad | ALoad | ILoad0 | ILoad1 | ILoad2 | ILoad3 | FLoad0 | FLoad1
                | FLoad2 | FLoad3 | ALoad0 | ALoad1 | ALoad2 | ALoad3 => {
                    earliest[top] = Some(pc);
                }

                LConst0 | LConst1 | DConst0 | DConst1 | Ldc2W | LLoad | DLoad | LLoad0
                | LLoad1 | LLoad2 | LLoad3 | DLoad0 | DLoad1 | DLoad2 | DLoad3 => {
                    earliest[top - 1] = Some(pc);
                    earliest[top] = Some(pc);
                }

                Pop | Pop2 => (),

                // The value at the top was started below (its other word, or the value swapped
                // into place)
                Swap | I2L => earliest[top] = earliest[top - 1],

                GetField => {
                    let width = referenced_descriptor(code, pc, &self.constants)
                        .and_then(|descriptor| FieldType::parse(descriptor).ok())
                        .map(|field_type| field_type.width());
                    match width {
                        Some(1) => (),
                        Some(_) => earliest[top] = earliest[top - 1],
                        None => earliest[..=top].iter_mut().for_each(|slot| *slot = None),
                    }
                }

                InvokeVirtual | InvokeInterface | InvokeSpecial | InvokeStatic => {
                    let descriptor = referenced_descriptor(code, pc, &self.constants)
                        .and_then(|descriptor| MethodDescriptor::parse(descriptor).ok());
                    let descriptor = match descriptor {
                        Some(descriptor) => descriptor,
                        None => {
                            earliest[..=top].iter_mut().for_each(|slot| *slot = None);
                            stack = stack_after;
                            pc = next_pc;
                            continue;
                        }
                    };

                    // A static call without arguments starts a value, like a load
                    if opcode == InvokeStatic && descriptor.parameters.is_empty() {
                        let width = descriptor.return_width();
                        earliest[top + 1 - width..=top]
                            .iter_mut()
                            .for_each(|slot| *slot = Some(pc));
                    }

                    match descriptor.return_type {
                        Some(FieldType::Ref(RefType::Object(class))) => {
                            if let Some(start) = earliest[top] {
                                let block_length = next_pc - start;
                                let valid = block_length > min_length
                                    && block_length <= max_length
                                    && depth_before[start] == stack_after - 1
                                    && replay_stack_depth(code, &self.constants, start, next_pc)
                                        == Some(1);
                                if valid {
                                    let candidate = (start, next_pc, FieldType::object(class));
                                    if block_length >= optimal_length {
                                        chosen = Some(candidate);
                                        break;
                                    }
                                    let longer = best
                                        .as_ref()
                                        .map_or(true, |(s, e, _)| block_length > e - s);
                                    if longer {
                                        best = Some(candidate);
                                    }
                                }
                            }
                        }
                        Some(return_type) if return_type.width() == 2 => {
                            earliest[top] = earliest[top - 1];
                        }
                        Some(_) => (),
                        None => earliest[..=top].iter_mut().for_each(|slot| *slot = None),
                    }
                }

                _ => earliest[..=top].iter_mut().for_each(|slot| *slot = None),
            }

            stack = stack_after;
            pc = next_pc;
        }

        let (start, end, return_type) = chosen.or(best)?;
        self.split_code_into_sub_method(idx, start, end, Some(return_type))
    }
}

#[cfg(test)]
mod test {
    use crate::codegen::{ClassAssembler, InvokeKind, Settings};
    use crate::jvm::{
        BinaryName, ClassAccessFlags, FieldType, MethodAccessFlags, Name, UnqualifiedName,
    };

    fn assembler(split_length: usize) -> ClassAssembler {
        let settings = Settings {
            split_length,
            overflow_threshold: usize::MAX,
            strict: true,
            ..Settings::default()
        };
        ClassAssembler::new(
            BinaryName::from_string(String::from("me/Splittable")).unwrap(),
            BinaryName::OBJECT,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            settings,
        )
    }

    fn name(name: &str) -> UnqualifiedName {
        UnqualifiedName::from_string(String::from(name)).unwrap()
    }

    fn print_statement(method: &mut crate::codegen::MethodAssembler<'_>, value: i32) {
        method.get_static_field(
            BinaryName::from_string(String::from("java/lang/System")).unwrap(),
            name("out"),
            FieldType::object(BinaryName::from_string(String::from("java/io/PrintStream")).unwrap()),
        );
        method.push_int(value);
        method.call_method(InvokeKind::Virtual, None, name("println"), None, 1);
    }

    #[test]
    fn short_method_is_untouched() {
        let mut class = assembler(1000);
        let id = class.new_method(None, name("run"), MethodAccessFlags::PUBLIC, vec![]);
        let mut method = class.method(id);
        for i in 0..10 {
            print_statement(&mut method, i);
        }
        method.method_return();
        method.complete();
        assert_eq!(class.methods.len(), 1);
        assert!(class.finish().is_ok());
    }

    #[test]
    fn zero_split_length_leaves_method_alone() {
        let mut class = assembler(0);
        let id = class.new_method(None, name("run"), MethodAccessFlags::PUBLIC, vec![]);
        let mut method = class.method(id);
        for i in 0..10 {
            print_statement(&mut method, i);
        }
        method.method_return();
        method.complete();
        assert_eq!(class.methods.len(), 1);
        assert!(class.limit_exceeded().is_none());
        assert!(class.finish().is_ok());
    }

    #[test]
    fn statements_move_into_sub_methods() {
        let mut class = assembler(100);
        let id = class.new_method(None, name("run"), MethodAccessFlags::PUBLIC, vec![]);
        let mut method = class.method(id);
        for i in 0..40 {
            print_statement(&mut method, i);
        }
        method.method_return();
        method.complete();

        assert!(class.methods.len() > 1);
        assert!(class.limit_exceeded().is_none());
        for method in &class.methods {
            assert!(method.code.pc() <= 100, "{} too long", method.name.as_str());
            assert!(method.is_completed());
        }
        assert_eq!(class.methods[1].name.as_str(), "run_s0");
        assert!(class.methods[1]
            .access_flags
            .contains(MethodAccessFlags::PRIVATE));
        assert!(class.finish().is_ok());
    }

    #[test]
    fn parameters_are_passed_along() {
        let mut class = assembler(100);
        let id = class.new_method(
            None,
            name("run"),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            vec![FieldType::long(), FieldType::int()],
        );
        let mut method = class.method(id);
        for _ in 0..20 {
            method.get_parameter(1);
            method.cast(FieldType::long());
            method.get_parameter(0);
            method.call_method(InvokeKind::Static, None, name("consume"), None, 2);
        }
        method.method_return();
        method.complete();

        assert!(class.methods.len() > 1);
        let sub = &class.methods[1];
        assert_eq!(sub.descriptor.parameters, vec![FieldType::long(), FieldType::int()]);
        assert!(sub.access_flags.contains(MethodAccessFlags::STATIC));
        for method in &class.methods {
            assert!(method.code.pc() <= 100);
        }
    }

    #[test]
    fn call_chains_are_split_as_expressions() {
        let mut class = assembler(60);
        let builder = BinaryName::STRINGBUILDER;
        let id = class.new_method(
            Some(FieldType::object(BinaryName::STRING)),
            name("describe"),
            MethodAccessFlags::PUBLIC,
            vec![FieldType::object(builder.clone())],
        );
        let mut method = class.method(id);
        method.get_parameter(0);
        for i in 0..20 {
            method.push_int(i);
            method.call_method(
                InvokeKind::Virtual,
                None,
                name("append"),
                Some(FieldType::object(builder.clone())),
                1,
            );
        }
        method.call_method(
            InvokeKind::Virtual,
            None,
            name("toString"),
            Some(FieldType::object(BinaryName::STRING)),
            0,
        );
        method.method_return();
        method.complete();

        assert!(class.methods.len() > 1);
        assert!(class.limit_exceeded().is_none());
        for method in &class.methods {
            assert!(method.code.pc() <= 60, "{} too long", method.name.as_str());
        }
        let sub = &class.methods[1];
        assert_eq!(
            sub.descriptor.return_type,
            Some(FieldType::object(BinaryName::STRINGBUILDER))
        );
        assert!(class.finish().is_ok());
    }

    #[test]
    fn conditionals_are_not_cut() {
        let mut class = assembler(120);
        let id = class.new_method(
            None,
            name("run"),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            vec![FieldType::boolean()],
        );
        let mut method = class.method(id);
        for i in 0..6 {
            method.get_parameter(0);
            method.conditional_if();
            print_statement(&mut method, i);
            method.start_else_code();
            print_statement(&mut method, -i);
            method.complete_conditional();
        }
        method.method_return();
        method.complete();

        for method in &class.methods {
            assert!(method.code.pc() <= 120);
            let code = method.code.as_slice();
            let mut pc = 0;
            while pc < code.len() {
                if let Some(region) = super::conditional_region(code, pc) {
                    assert!(region.end_pc <= code.len());
                }
                pc += super::instruction_length(code, pc);
            }
        }
        assert!(class.finish().is_ok());
    }
}
