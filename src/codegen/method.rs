use super::cast::PrimitiveKind;
use super::class::ClassAssembler;
use super::code_buffer::CodeBuffer;
use super::conditional::Conditional;
use super::opcode::Opcode;
use super::stack::OperandStack;
use crate::jvm::class_file::{
    Attribute, ClassConstantIndex, ConstantData, ConstantIndex, ConstantsWriter, FieldRef,
    FieldRefConstantIndex, MethodRef, MethodRefConstantIndex, Utf8ConstantIndex,
};
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodAccessFlags, MethodDescriptor, Name, RefType,
    UnqualifiedName,
};
use crate::util::Width;
use std::borrow::Cow;

/// Handle to a method being generated
///
/// The handle stays valid even as the code behind it gets moved around into other (physical)
/// methods by overflow handling.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodId(pub(super) usize);

/// Method as callers see it
#[derive(Debug)]
pub(super) struct LogicalMethod {
    pub name: UnqualifiedName,

    /// Physical method into which code is currently being generated
    pub current: usize,

    /// Number of sub-methods created so far (used to name the next one)
    sub_method_count: usize,

    pub statement_num: usize,

    /// Set while the current physical method is being wrapped up after an overflow
    pub handling_overflow: bool,
}

impl LogicalMethod {
    pub fn new(name: UnqualifiedName, physical: usize) -> LogicalMethod {
        LogicalMethod {
            name,
            current: physical,
            sub_method_count: 0,
            statement_num: 0,
            handling_overflow: false,
        }
    }

    pub fn next_sub_method_name(&mut self) -> UnqualifiedName {
        let name = self.name.sub_method(self.sub_method_count);
        self.sub_method_count += 1;
        name
    }
}

/// Method as it will appear in the class file
#[derive(Debug)]
pub(super) struct MethodState {
    /// Index of the logical method this physical method belongs to
    pub logical: usize,

    pub name: UnqualifiedName,
    pub access_flags: MethodAccessFlags,
    pub descriptor: MethodDescriptor,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub thrown_exceptions: Vec<BinaryName>,

    /// Local variable slot of each parameter
    pub parameter_slots: Vec<usize>,
    pub max_locals: usize,

    pub code: CodeBuffer,
    pub stack: OperandStack,

    /// Open conditionals, innermost last
    pub conditionals: Vec<Conditional>,

    /// Method attributes, set once the method is completed
    pub attributes: Option<Vec<Attribute>>,
}

impl MethodState {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_completed(&self) -> bool {
        self.attributes.is_some()
    }
}

/// How a method gets invoked
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum InvokeKind {
    Static,
    Virtual,
    Interface,

    /// Constructors, super calls, and private methods
    Special,
}

impl InvokeKind {
    fn opcode(self) -> Opcode {
        match self {
            InvokeKind::Static => Opcode::InvokeStatic,
            InvokeKind::Virtual => Opcode::InvokeVirtual,
            InvokeKind::Interface => Opcode::InvokeInterface,
            InvokeKind::Special => Opcode::InvokeSpecial,
        }
    }
}

/// Field declared on the class being generated
#[derive(Clone, Debug)]
pub struct LocalField {
    pub name: UnqualifiedName,
    pub field_type: FieldType,
    pub is_static: bool,
    pub(super) index: FieldRefConstantIndex,
}

/// Argument-less method call, resolved ahead of time (see `MethodAssembler::describe_method`)
#[derive(Clone, Debug)]
pub struct DescribedMethod {
    kind: InvokeKind,
    index: MethodRefConstantIndex,
    return_type: Option<FieldType>,
}

/// Instructions for loading a local of the given type (the `*load_0` form and the regular one)
pub(super) fn load_opcodes(field_type: &FieldType) -> (Opcode, Opcode) {
    match field_type {
        FieldType::Base(BaseType::Long) => (Opcode::LLoad0, Opcode::LLoad),
        FieldType::Base(BaseType::Float) => (Opcode::FLoad0, Opcode::FLoad),
        FieldType::Base(BaseType::Double) => (Opcode::DLoad0, Opcode::DLoad),
        FieldType::Base(_) => (Opcode::ILoad0, Opcode::ILoad),
        FieldType::Ref(_) => (Opcode::ALoad0, Opcode::ALoad),
    }
}

fn return_opcode(field_type: &FieldType) -> Opcode {
    match field_type {
        FieldType::Base(BaseType::Long) => Opcode::LReturn,
        FieldType::Base(BaseType::Float) => Opcode::FReturn,
        FieldType::Base(BaseType::Double) => Opcode::DReturn,
        FieldType::Base(_) => Opcode::IReturn,
        FieldType::Ref(_) => Opcode::AReturn,
    }
}

fn array_load_opcode(element_type: &FieldType) -> Opcode {
    match element_type {
        FieldType::Base(BaseType::Int) => Opcode::IALoad,
        FieldType::Base(BaseType::Long) => Opcode::LALoad,
        FieldType::Base(BaseType::Float) => Opcode::FALoad,
        FieldType::Base(BaseType::Double) => Opcode::DALoad,
        FieldType::Base(BaseType::Byte | BaseType::Boolean) => Opcode::BALoad,
        FieldType::Base(BaseType::Char) => Opcode::CALoad,
        FieldType::Base(BaseType::Short) => Opcode::SALoad,
        FieldType::Ref(_) => Opcode::AALoad,
    }
}

fn array_store_opcode(element_type: &FieldType) -> Opcode {
    match element_type {
        FieldType::Base(BaseType::Int) => Opcode::IAStore,
        FieldType::Base(BaseType::Long) => Opcode::LAStore,
        FieldType::Base(BaseType::Float) => Opcode::FAStore,
        FieldType::Base(BaseType::Double) => Opcode::DAStore,
        FieldType::Base(BaseType::Byte | BaseType::Boolean) => Opcode::BAStore,
        FieldType::Base(BaseType::Char) => Opcode::CAStore,
        FieldType::Base(BaseType::Short) => Opcode::SAStore,
        FieldType::Ref(_) => Opcode::AAStore,
    }
}

/// Values that can be consumed by `conditional_if`
fn is_int_like(field_type: &FieldType) -> bool {
    match field_type {
        FieldType::Base(base_type) => PrimitiveKind::from(*base_type) == PrimitiveKind::Int,
        FieldType::Ref(_) => false,
    }
}

/// Code generator for one method
///
/// Every operation acts on a simulated operand stack of typed values and appends the
/// corresponding instructions. When the method is completed, its `max_stack` comes from that
/// simulation and the method is split into sub-methods if it is too long.
pub struct MethodAssembler<'a> {
    class: &'a mut ClassAssembler,
    id: MethodId,
}

impl<'a> MethodAssembler<'a> {
    pub(super) fn new(class: &'a mut ClassAssembler, id: MethodId) -> MethodAssembler<'a> {
        MethodAssembler { class, id }
    }

    fn physical(&self) -> usize {
        self.class.logical[self.id.0].current
    }

    fn state(&mut self) -> &mut MethodState {
        let physical = self.physical();
        &mut self.class.methods[physical]
    }

    fn state_ref(&self) -> &MethodState {
        &self.class.methods[self.physical()]
    }

    fn strict(&self) -> bool {
        self.class.settings.strict
    }

    fn code(&mut self) -> &mut CodeBuffer {
        &mut self.state().code
    }

    fn stack(&mut self) -> &mut OperandStack {
        &mut self.state().stack
    }

    fn push_stack(&mut self, field_type: FieldType) {
        self.stack().push(field_type);
    }

    fn pop_stack(&mut self) -> FieldType {
        self.stack().pop()
    }

    /// Pop the top of the stack, checking (in strict mode) that it has the right sort of type
    fn pop_expecting(&mut self, expected: fn(&FieldType) -> bool, description: &str) -> FieldType {
        let popped = self.pop_stack();
        if self.strict() && !expected(&popped) {
            panic!(
                "Stack type mismatch in {}: expected {} but found {:?}",
                self.state_ref().name.as_str(),
                description,
                popped
            );
        }
        popped
    }

    /// Check (in strict mode) that the method can still be generated into
    fn check_open(&self) {
        let state = self.state_ref();
        if self.strict() && state.is_completed() {
            panic!("Method {} is already completed", state.name.as_str());
        }
    }

    fn intern<I: Default, C: ConstantsWriter<I>>(&mut self, constant: &C) -> I {
        match constant.constant_index(&mut self.class.constants) {
            Ok(index) => index,
            Err(overflow) => {
                let name = self.state_ref().name.clone();
                self.class.record_overflow(Some(&name), Err(overflow))
            }
        }
    }

    fn record_io_error(&mut self, err: std::io::Error) {
        let message = format!("method:{} {}", self.state_ref().name.as_str(), err);
        self.class.record_limit(message);
    }

    /// Class of an instance on the stack, for field and method references
    fn instance_class(&self, instance: &FieldType) -> BinaryName {
        match instance {
            FieldType::Ref(RefType::Object(class)) => class.clone(),
            other => {
                if self.strict() {
                    panic!("Expected an object instance but found {:?}", other);
                }
                BinaryName::OBJECT
            }
        }
    }

    /// Logical name of the method
    pub fn name(&self) -> &UnqualifiedName {
        &self.class.logical[self.id.0].name
    }

    /// Current depth of the operand stack, in words
    pub fn stack_depth(&self) -> usize {
        self.state_ref().stack.depth()
    }

    /// Maximum depth of the operand stack so far, in words
    pub fn max_stack(&self) -> usize {
        self.state_ref().stack.max_depth()
    }

    /// Length of the code generated so far into the current physical method
    pub fn code_length(&self) -> usize {
        self.state_ref().code.pc()
    }

    pub fn is_completed(&self) -> bool {
        self.state_ref().is_completed()
    }

    /// Declare that the method throws a checked exception
    ///
    /// This must happen before any code is generated.
    pub fn add_thrown_exception(&mut self, class: BinaryName) {
        if self.strict() && self.code_length() != 0 {
            panic!(
                "Thrown exceptions of {} must be declared before any code",
                self.name().as_str()
            );
        }
        self.state().thrown_exceptions.push(class);
    }

    /// Count `added` more statements towards the method, reporting whether the method already has
    /// too many statements (at which point callers should move on to a new method)
    pub fn statement_num_hit_limit(&mut self, added: usize) -> bool {
        let limit = self.class.settings.statement_limit;
        let logical = &mut self.class.logical[self.id.0];
        if logical.statement_num > limit {
            true
        } else {
            logical.statement_num += added;
            false
        }
    }

    // Literals

    pub fn push_int(&mut self, value: i32) {
        self.push_int_typed(value, FieldType::int());
    }

    pub fn push_byte(&mut self, value: i8) {
        self.push_int_typed(value as i32, FieldType::byte());
    }

    pub fn push_short(&mut self, value: i16) {
        self.push_int_typed(value as i32, FieldType::short());
    }

    pub fn push_boolean(&mut self, value: bool) {
        self.push_int_typed(value as i32, FieldType::boolean());
    }

    /// Push an integer, with the smallest instruction that can encode it
    fn push_int_typed(&mut self, value: i32, field_type: FieldType) {
        self.check_open();
        match value {
            -1..=5 => {
                let opcode = Opcode::ALL[(Opcode::IConst0 as i32 + value) as usize];
                self.code().add_instr(opcode);
            }
            -128..=127 => self.code().add_instr_u1(Opcode::BiPush, value as i8 as u8),
            -32768..=32767 => self.code().add_instr_s2(Opcode::SiPush, value as i16),
            _ => {
                let index: ConstantIndex = self.intern(&ConstantData::Integer(value));
                self.ldc(index);
            }
        }
        self.push_stack(field_type);
    }

    pub fn push_long(&mut self, value: i64) {
        self.check_open();
        match value {
            0 => self.code().add_instr(Opcode::LConst0),
            1 => self.code().add_instr(Opcode::LConst1),
            _ if i32::try_from(value).is_ok() => {
                self.push_int_typed(value as i32, FieldType::long());
                self.code().add_instr(Opcode::I2L);
                return;
            }
            _ => {
                let index: ConstantIndex = self.intern(&ConstantData::Long(value));
                self.code().add_instr_u2(Opcode::Ldc2W, index.0);
            }
        }
        self.push_stack(FieldType::long());
    }

    pub fn push_float(&mut self, value: f32) {
        self.check_open();
        let bits = value.to_bits();
        if bits == 0f32.to_bits() {
            self.code().add_instr(Opcode::FConst0);
        } else if bits == 1f32.to_bits() {
            self.code().add_instr(Opcode::FConst1);
        } else if bits == 2f32.to_bits() {
            self.code().add_instr(Opcode::FConst2);
        } else {
            let index: ConstantIndex = self.intern(&ConstantData::Float(value));
            self.ldc(index);
        }
        self.push_stack(FieldType::float());
    }

    pub fn push_double(&mut self, value: f64) {
        self.check_open();
        let bits = value.to_bits();
        if bits == 0f64.to_bits() {
            self.code().add_instr(Opcode::DConst0);
        } else if bits == 1f64.to_bits() {
            self.code().add_instr(Opcode::DConst1);
        } else {
            let index: ConstantIndex = self.intern(&ConstantData::Double(value));
            self.code().add_instr_u2(Opcode::Ldc2W, index.0);
        }
        self.push_stack(FieldType::double());
    }

    pub fn push_string(&mut self, value: impl Into<Cow<'static, str>>) {
        self.check_open();
        let index: ConstantIndex = self.intern(&ConstantData::String(value.into()));
        self.ldc(index);
        self.push_stack(FieldType::object(BinaryName::STRING));
    }

    /// Push `null`, typed as the given reference type
    pub fn push_null(&mut self, ref_type: RefType) {
        self.check_open();
        self.code().add_instr(Opcode::AConstNull);
        self.push_stack(FieldType::Ref(ref_type));
    }

    fn ldc(&mut self, index: ConstantIndex) {
        if index.0 <= u8::MAX as u16 {
            self.code().add_instr_u1(Opcode::Ldc, index.0 as u8);
        } else {
            self.code().add_instr_u2(Opcode::LdcW, index.0);
        }
    }

    // Stack shuffling

    pub fn dup(&mut self) {
        self.check_open();
        let top = self.pop_stack();
        let opcode = if top.width() == 2 { Opcode::Dup2 } else { Opcode::Dup };
        self.code().add_instr(opcode);
        self.push_stack(top.clone());
        self.push_stack(top);
    }

    pub fn pop(&mut self) {
        self.check_open();
        let top = self.pop_stack();
        let opcode = if top.width() == 2 { Opcode::Pop2 } else { Opcode::Pop };
        self.code().add_instr(opcode);
        self.overflow_method_check();
    }

    /// Swap the top two values on the stack, whatever their widths
    pub fn swap(&mut self) {
        self.check_open();
        let top = self.pop_stack();
        let below = self.pop_stack();
        let top_width = top.width();
        match (top_width, below.width()) {
            (1, 1) => self.code().add_instr(Opcode::Swap),
            (1, _) => {
                self.code().add_instr(Opcode::DupX2);
                self.code().add_instr(Opcode::Pop);
            }
            (_, 1) => {
                self.code().add_instr(Opcode::Dup2X1);
                self.code().add_instr(Opcode::Pop2);
            }
            _ => {
                self.code().add_instr(Opcode::Dup2X2);
                self.code().add_instr(Opcode::Pop2);
            }
        }
        let below_width = below.width();
        self.push_stack(top);
        self.push_stack(below);

        // Except for `swap`, these push an extra copy of the top value before popping it
        if (top_width, below_width) != (1, 1) {
            self.stack().reserve_transient(top_width);
        }
    }

    /// Discard whatever value a statement left on the stack
    pub fn end_statement(&mut self) {
        if !self.state_ref().stack.is_empty() {
            self.pop();
        }
    }

    // Parameters

    /// Push parameter `index` (counting from `0`, not including `this`)
    pub fn get_parameter(&mut self, index: usize) {
        self.check_open();
        let state = self.state();
        let (slot, field_type) = match (
            state.parameter_slots.get(index),
            state.descriptor.parameters.get(index),
        ) {
            (Some(slot), Some(field_type)) => (*slot, field_type.clone()),
            _ => panic!("Method {} has no parameter {}", state.name.as_str(), index),
        };
        let (short_form, normal_form) = load_opcodes(&field_type);
        self.code()
            .add_local_instr(short_form, normal_form, slot as u16);
        self.push_stack(field_type);
    }

    pub fn push_this(&mut self) {
        self.check_open();
        if self.strict() && self.state_ref().is_static() {
            panic!("No `this` in static method {}", self.name().as_str());
        }
        self.code().add_instr(Opcode::ALoad0);
        let this_type = FieldType::object(self.class.class_name().clone());
        self.push_stack(this_type);
    }

    // Fields

    /// Push the value of a field of the class being generated (on `this` for instance fields)
    pub fn get_field(&mut self, field: &LocalField) {
        self.check_open();
        if field.is_static {
            self.code()
                .add_instr_u2(Opcode::GetStatic, field.index.0 .0);
        } else {
            self.push_this();
            self.pop_stack();
            self.code().add_instr_u2(Opcode::GetField, field.index.0 .0);
        }
        self.push_stack(field.field_type.clone());
    }

    /// Replace the instance on top of the stack with the value of one of its fields
    ///
    /// The class declaring the field defaults to the type of the instance.
    pub fn get_field_of(
        &mut self,
        declaring_class: Option<BinaryName>,
        name: UnqualifiedName,
        field_type: FieldType,
    ) {
        self.check_open();
        let instance = self.pop_expecting(FieldType::is_reference, "an instance");
        let class = declaring_class.unwrap_or_else(|| self.instance_class(&instance));
        let field_ref = FieldRef {
            class,
            name,
            descriptor: field_type.clone(),
        };
        let index: FieldRefConstantIndex = self.intern(&field_ref);
        self.code().add_instr_u2(Opcode::GetField, index.0 .0);
        self.push_stack(field_type);
    }

    pub fn get_static_field(&mut self, class: BinaryName, name: UnqualifiedName, field_type: FieldType) {
        self.check_open();
        let field_ref = FieldRef {
            class,
            name,
            descriptor: field_type.clone(),
        };
        let index: FieldRefConstantIndex = self.intern(&field_ref);
        self.code().add_instr_u2(Opcode::GetStatic, index.0 .0);
        self.push_stack(field_type);
    }

    /// Store the value on top of the stack into a field, leaving the value on the stack
    pub fn put_field(&mut self, field: &LocalField) {
        self.put_local_field(field, true);
    }

    /// Store the value on top of the stack into a field, consuming the value
    pub fn set_field(&mut self, field: &LocalField) {
        self.put_local_field(field, false);
        self.overflow_method_check();
    }

    fn put_local_field(&mut self, field: &LocalField, keep_value: bool) {
        self.check_open();
        if keep_value {
            self.dup();
        }

        if field.is_static {
            self.code()
                .add_instr_u2(Opcode::PutStatic, field.index.0 .0);
            self.pop_stack();
        } else {
            // ..., value, this => ..., this, value
            self.push_this();
            self.swap();
            self.code().add_instr_u2(Opcode::PutField, field.index.0 .0);
            self.pop_stack();
            self.pop_stack();
        }
    }

    /// Store a value into a field of an instance, leaving the value on the stack
    ///
    /// Expects the instance and then the value on the stack. The class declaring the field
    /// defaults to the type of the instance.
    pub fn put_field_of(
        &mut self,
        declaring_class: Option<BinaryName>,
        name: UnqualifiedName,
        field_type: FieldType,
    ) {
        self.check_open();
        let value = self.pop_stack();
        let instance = self.pop_expecting(FieldType::is_reference, "an instance");
        let class = declaring_class.unwrap_or_else(|| self.instance_class(&instance));

        // ..., instance, value => ..., value, instance, value
        let opcode = if value.width() == 2 {
            Opcode::Dup2X1
        } else {
            Opcode::DupX1
        };
        self.code().add_instr(opcode);
        self.push_stack(value.clone());
        self.push_stack(instance);
        self.push_stack(value);

        let field_ref = FieldRef {
            class,
            name,
            descriptor: field_type,
        };
        let index: FieldRefConstantIndex = self.intern(&field_ref);
        self.code().add_instr_u2(Opcode::PutField, index.0 .0);
        self.pop_stack();
        self.pop_stack();
    }

    // Methods

    /// Call a method
    ///
    /// The arguments (and, unless `kind` is static, the instance before them) must already be
    /// on the stack. The parameter types of the method descriptor are the types of the
    /// arguments on the stack. The declaring class defaults to the type of the instance for
    /// instance calls, and to the class being generated for static calls.
    pub fn call_method(
        &mut self,
        kind: InvokeKind,
        declaring_class: Option<BinaryName>,
        name: UnqualifiedName,
        return_type: Option<FieldType>,
        num_args: usize,
    ) -> MethodRefConstantIndex {
        self.check_open();
        let initial_depth = self.stack_depth();

        let mut parameters: Vec<FieldType> = (0..num_args).map(|_| self.pop_stack()).collect();
        parameters.reverse();

        let class = if kind == InvokeKind::Static {
            declaring_class.unwrap_or_else(|| self.class.class_name().clone())
        } else {
            let instance = self.pop_expecting(FieldType::is_reference, "an instance");
            declaring_class.unwrap_or_else(|| self.instance_class(&instance))
        };

        let method_ref = MethodRef {
            class,
            name,
            descriptor: MethodDescriptor {
                parameters,
                return_type: return_type.clone(),
            },
            is_interface: kind == InvokeKind::Interface,
        };
        let index: MethodRefConstantIndex = self.intern(&method_ref);

        if kind == InvokeKind::Interface {
            let arg_words = (initial_depth - self.stack_depth()) as u8;
            self.code()
                .add_instr_u2_u1_u1(Opcode::InvokeInterface, index.0 .0, arg_words, 0);
        } else {
            self.code().add_instr_u2(kind.opcode(), index.0 .0);
        }

        match return_type {
            Some(return_type) => self.push_stack(return_type),
            None => self.overflow_method_check(),
        }
        index
    }

    /// Resolve an argument-less method ahead of time, to be called with `call_described`
    pub fn describe_method(
        &mut self,
        kind: InvokeKind,
        declaring_class: BinaryName,
        name: UnqualifiedName,
        return_type: Option<FieldType>,
    ) -> DescribedMethod {
        let method_ref = MethodRef {
            class: declaring_class,
            name,
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: return_type.clone(),
            },
            is_interface: kind == InvokeKind::Interface,
        };
        let index: MethodRefConstantIndex = self.intern(&method_ref);
        DescribedMethod {
            kind,
            index,
            return_type,
        }
    }

    pub fn call_described(&mut self, method: &DescribedMethod) {
        self.check_open();
        if method.kind != InvokeKind::Static {
            self.pop_expecting(FieldType::is_reference, "an instance");
        }
        if method.kind == InvokeKind::Interface {
            self.code()
                .add_instr_u2_u1_u1(Opcode::InvokeInterface, method.index.0 .0, 1, 0);
        } else {
            self.code()
                .add_instr_u2(method.kind.opcode(), method.index.0 .0);
        }

        match &method.return_type {
            Some(return_type) => self.push_stack(return_type.clone()),
            None => self.overflow_method_check(),
        }
    }

    /// Start constructing an object (`new` followed by `dup`)
    ///
    /// Follow up with the constructor arguments, then `push_new_complete`.
    pub fn push_new_start(&mut self, class: BinaryName) {
        self.check_open();
        let index: ClassConstantIndex = self.intern(&class);
        self.code().add_instr_u2(Opcode::New, index.0 .0);
        self.code().add_instr(Opcode::Dup);
        self.push_stack(FieldType::object(class.clone()));
        self.push_stack(FieldType::object(class));
    }

    /// Call the constructor of an object started with `push_new_start`
    pub fn push_new_complete(&mut self, num_args: usize) {
        self.call_method(InvokeKind::Special, None, UnqualifiedName::INIT, None, num_args);
    }

    /// Call the no-argument constructor of the super class on `this`
    pub fn call_super(&mut self) {
        self.push_this();
        let super_class = self.class.super_class().clone();
        self.call_method(
            InvokeKind::Special,
            Some(super_class),
            UnqualifiedName::INIT,
            None,
            0,
        );
    }

    // Arrays

    fn element_type(&self, array: &FieldType) -> FieldType {
        match array {
            FieldType::Ref(ref_type) => match ref_type.element_type() {
                Some(element_type) => return element_type,
                None if self.strict() => panic!("Expected an array but found {:?}", array),
                None => (),
            },
            _ if self.strict() => panic!("Expected an array but found {:?}", array),
            _ => (),
        }
        FieldType::object(BinaryName::OBJECT)
    }

    /// Replace the array on top of the stack with its element at `index`
    pub fn get_array_element(&mut self, index: i32) {
        self.push_int(index);
        self.pop_stack();
        let array = self.pop_stack();
        let element_type = self.element_type(&array);
        self.code().add_instr(array_load_opcode(&element_type));
        self.push_stack(element_type);
    }

    /// Store the value on top of the stack into the array below it, at `index`
    ///
    /// Both the value and the array are consumed.
    pub fn set_array_element(&mut self, index: i32) {
        // ..., array, value => ..., array, index, value
        self.push_int(index);
        self.swap();
        self.pop_stack();
        self.pop_stack();
        let array = self.pop_stack();
        let element_type = self.element_type(&array);
        self.code().add_instr(array_store_opcode(&element_type));
    }

    pub fn push_new_array(&mut self, element_type: FieldType, size: i32) {
        self.push_int(size);
        self.pop_stack();
        match &element_type {
            FieldType::Base(base_type) => {
                self.code()
                    .add_instr_u1(Opcode::NewArray, base_type.array_type_code());
            }
            FieldType::Ref(ref_type) => {
                let index: ClassConstantIndex = self.intern(ref_type);
                self.code().add_instr_u2(Opcode::ANewArray, index.0 .0);
            }
        }
        self.push_stack(FieldType::array(element_type));
    }

    // Types

    /// Convert the value on top of the stack to `target`
    ///
    /// Reference types get a `checkcast` (unless the type already matches), primitive types get
    /// whatever conversion instructions are needed.
    pub fn cast(&mut self, target: FieldType) {
        self.check_open();
        let source = self.pop_stack();
        match (&source, &target) {
            (FieldType::Ref(_), FieldType::Ref(target_ref)) => {
                if source != target {
                    let index: ClassConstantIndex = self.intern(target_ref);
                    self.code().add_instr_u2(Opcode::CheckCast, index.0 .0);
                }
            }
            (FieldType::Base(source_base), FieldType::Base(target_base)) => {
                let source_kind = PrimitiveKind::from(*source_base);
                for opcode in source_kind.conversions(PrimitiveKind::from(*target_base)) {
                    self.code().add_instr(opcode);
                }
            }
            _ => {
                if self.strict() {
                    panic!("Cannot cast {:?} to {:?}", source, target);
                }
            }
        }
        self.push_stack(target);
    }

    /// Change the static type of the value on top of the stack, without emitting any code
    pub fn up_cast(&mut self, target: FieldType) {
        self.pop_stack();
        self.push_stack(target);
    }

    pub fn is_instance_of(&mut self, class: RefType) {
        self.check_open();
        self.pop_expecting(FieldType::is_reference, "a reference");
        let index: ClassConstantIndex = self.intern(&class);
        self.code().add_instr_u2(Opcode::InstanceOf, index.0 .0);
        self.push_stack(FieldType::boolean());
    }

    // Control flow

    /// Pop an `int`/`boolean` and start the then-block, which runs when the value is non-zero
    pub fn conditional_if(&mut self) {
        self.check_open();
        self.pop_expecting(is_int_like, "an int or boolean");
        self.start_conditional(Opcode::IfEq);
    }

    /// Pop a reference and start the then-block, which runs when the reference is `null`
    pub fn conditional_if_null(&mut self) {
        self.check_open();
        self.pop_expecting(FieldType::is_reference, "a reference");
        self.start_conditional(Opcode::IfNonNull);
    }

    fn start_conditional(&mut self, opcode: Opcode) {
        let state = self.state();
        let entry_stack = state.stack.snapshot();
        let conditional = Conditional::new(&mut state.code, opcode, entry_stack);
        state.conditionals.push(conditional);
    }

    /// End the then-block and start the else block
    ///
    /// The stack is reset to what it was when the then-block started.
    pub fn start_else_code(&mut self) {
        self.check_open();
        let state = self.state();
        let then_stack = state.stack.snapshot();
        let conditional = match state.conditionals.last_mut() {
            Some(conditional) => conditional,
            None => panic!("No open conditional in {}", state.name.as_str()),
        };
        let entry_stack = conditional.swap_stack(then_stack);
        let result = conditional.start_else(&mut state.code);
        state.stack.restore(entry_stack);
        if let Err(err) = result {
            self.record_io_error(err);
        }
    }

    /// End the innermost open conditional
    ///
    /// Both branches must finish with the same stack.
    pub fn complete_conditional(&mut self) {
        self.check_open();
        let strict = self.strict();
        let state = self.state();
        let conditional = match state.conditionals.pop() {
            Some(conditional) => conditional,
            None => panic!("No open conditional in {}", state.name.as_str()),
        };
        let result = conditional.end(&mut state.code);
        if strict && conditional.expected_stack() != state.stack.entries() {
            panic!(
                "Branches of conditional in {} finish with different stacks: {:?} and {:?}",
                state.name.as_str(),
                conditional.expected_stack(),
                state.stack.entries()
            );
        }
        if let Err(err) = result {
            self.record_io_error(err);
        }
    }

    // Finishing

    /// Return the value on top of the stack (or return `void` if the stack is empty)
    pub fn method_return(&mut self) {
        self.check_open();
        let opcode = if self.state_ref().stack.is_empty() {
            Opcode::Return
        } else {
            let top = self.pop_stack();
            return_opcode(&top)
        };
        self.code().add_instr(opcode);

        if self.strict() && !self.state_ref().stack.is_empty() {
            panic!(
                "Values left on the stack after return in {}: {:?}",
                self.name().as_str(),
                self.state_ref().stack.entries()
            );
        }
    }

    /// Finish generating the method, splitting it into sub-methods if it is too long
    pub fn complete(&mut self) {
        let physical = self.physical();
        self.class.complete_method(physical);
    }

    /// Chain into a fresh sub-method once a method without parameters gets close to the code
    /// length limit
    ///
    /// This only happens at points where the stack is empty and no conditional is open. The
    /// current physical method is finished off with a call to the sub-method (returning whatever
    /// it returns), and all further code goes into the sub-method.
    fn overflow_method_check(&mut self) {
        let threshold = self.class.settings.overflow_threshold;
        if self.class.logical[self.id.0].handling_overflow {
            return;
        }
        let physical = self.physical();
        let state = &self.class.methods[physical];
        if !state.stack.is_empty()
            || !state.conditionals.is_empty()
            || state.code.pc() < threshold
            || !state.descriptor.parameters.is_empty()
        {
            return;
        }

        let return_type = state.descriptor.return_type.clone();
        let sub_method = self.class.new_sub_method(physical, return_type.clone(), false);
        log::info!(
            "Method {} overflowed at {} bytes, continuing in {}",
            self.class.methods[physical].name.as_str(),
            self.class.methods[physical].code.pc(),
            self.class.methods[sub_method].name.as_str()
        );

        self.class.logical[self.id.0].handling_overflow = true;
        let call = self.class.sub_method_call(physical, sub_method);
        let state = self.state();
        state.code.extend_from_slice(call.code.as_slice());
        state.stack.reserve_transient(call.argument_words);
        if let Some(return_type) = return_type {
            state.stack.push(return_type);
        }
        self.method_return();
        self.complete();
        self.class.logical[self.id.0].handling_overflow = false;
        self.class.logical[self.id.0].current = sub_method;
    }
}
