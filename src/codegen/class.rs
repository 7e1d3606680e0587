use super::method::{LocalField, LogicalMethod, MethodAssembler, MethodId, MethodState};
use super::Settings;
use crate::jvm::class_file::{
    Attribute, AttributeLike, BytecodeArray, ClassConstantIndex, ClassFile, Code, ConstantData, ConstantIndex,
    ConstantPoolOverflow, ConstantsPool, ConstantsWriter, Exceptions, Field, FieldRef,
    LineNumberTable, Method, Serialize,
};
use crate::jvm::{
    BinaryName, ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, RenderDescriptor, UnqualifiedName,
};
use crate::util::Width;

/// Largest `max_stack`/`max_locals` a method can declare
const MAX_WORDS: usize = u16::MAX as usize;

/// Builder for one generated class
///
/// The class owns the constant pool along with all of the fields and methods. Methods are
/// generated through [`MethodAssembler`]s, borrowed using the [`MethodId`] returned by
/// [`ClassAssembler::new_method`].
///
/// Running into one of the format limits of the class file (constant pool size, method code
/// length, etc.) doesn't stop generation: the first such problem is recorded and generation
/// carries on in a consistent (but useless) state. See [`ClassAssembler::limit_exceeded`].
pub struct ClassAssembler {
    pub(super) settings: Settings,
    name: BinaryName,
    super_class: BinaryName,
    access_flags: ClassAccessFlags,
    pub(super) constants: ConstantsPool,
    this_class_index: ClassConstantIndex,
    super_class_index: ClassConstantIndex,
    fields: Vec<Field>,

    /// Physical methods, in the order they will be written out
    pub(super) methods: Vec<MethodState>,

    /// Methods as callers see them (indexed by `MethodId`)
    pub(super) logical: Vec<LogicalMethod>,

    limit_exceeded: Option<String>,
}

impl ClassAssembler {
    pub fn new(
        name: BinaryName,
        super_class: BinaryName,
        access_flags: ClassAccessFlags,
        settings: Settings,
    ) -> ClassAssembler {
        let mut constants = ConstantsPool::new();

        // A fresh pool has plenty of room for two classes
        let this_class_index = name.constant_index(&mut constants).unwrap_or_default();
        let super_class_index = super_class.constant_index(&mut constants).unwrap_or_default();

        ClassAssembler {
            settings,
            name,
            super_class,
            access_flags,
            constants,
            this_class_index,
            super_class_index,
            fields: vec![],
            methods: vec![],
            logical: vec![],
            limit_exceeded: None,
        }
    }

    pub fn class_name(&self) -> &BinaryName {
        &self.name
    }

    pub fn super_class(&self) -> &BinaryName {
        &self.super_class
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// First format limit that was exceeded, if any
    ///
    /// Once this is set, the class will never be successfully finished.
    pub fn limit_exceeded(&self) -> Option<&str> {
        self.limit_exceeded.as_deref()
    }

    /// Record that a format limit was exceeded
    pub(super) fn record_limit(&mut self, message: String) {
        if self.limit_exceeded.is_none() {
            log::warn!("{}: {}", self.name.as_str(), message);
            self.limit_exceeded = Some(message);
        } else {
            log::debug!("{}: {}", self.name.as_str(), message);
        }
    }

    /// Unwrap the result of a constant pool insertion, recording overflows
    ///
    /// The index returned on overflow is `0`, which is never a valid constant.
    pub(super) fn record_overflow<I: Default>(
        &mut self,
        context: Option<&UnqualifiedName>,
        result: Result<I, ConstantPoolOverflow>,
    ) -> I {
        match result {
            Ok(index) => index,
            Err(overflow) => {
                let message = match context {
                    Some(method) => format!("method:{} {}", method.as_str(), overflow),
                    None => overflow.to_string(),
                };
                self.record_limit(message);
                I::default()
            }
        }
    }

    /// Add a constant to the constant pool
    ///
    /// If the constant pool is full, this returns the (invalid) index `0` and the class is
    /// flagged as having exceeded a limit.
    pub fn add_constant(&mut self, value: ConstantData) -> ConstantIndex {
        let result = value.constant_index(&mut self.constants);
        self.record_overflow(None, result)
    }

    /// Declare a field on the class being generated
    pub fn add_field(
        &mut self,
        access_flags: FieldAccessFlags,
        field_type: FieldType,
        name: UnqualifiedName,
    ) -> LocalField {
        let name_index = self.constants.get_utf8(name.as_str());
        let name_index = self.record_overflow(None, name_index);
        let descriptor_index = self.constants.get_utf8(field_type.render());
        let descriptor_index = self.record_overflow(None, descriptor_index);
        self.fields.push(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![],
        });

        let field_ref = FieldRef {
            class: self.name.clone(),
            name: name.clone(),
            descriptor: field_type.clone(),
        };
        let index = field_ref.constant_index(&mut self.constants);
        let index = self.record_overflow(None, index);

        LocalField {
            name,
            field_type,
            is_static: access_flags.contains(FieldAccessFlags::STATIC),
            index,
        }
    }

    /// Start a new method
    ///
    /// Parameters are allocated local variable slots in order (after `this`, for instance
    /// methods), with `long` and `double` parameters taking two slots.
    pub fn new_method(
        &mut self,
        return_type: Option<FieldType>,
        name: UnqualifiedName,
        access_flags: MethodAccessFlags,
        parameter_types: Vec<FieldType>,
    ) -> MethodId {
        let logical = self.logical.len();
        let descriptor = MethodDescriptor {
            parameters: parameter_types,
            return_type,
        };
        let physical = self.add_physical_method(logical, name.clone(), access_flags, descriptor);
        self.logical.push(LogicalMethod::new(name, physical));
        MethodId(logical)
    }

    /// Borrow a method for code generation
    pub fn method(&mut self, id: MethodId) -> MethodAssembler<'_> {
        MethodAssembler::new(self, id)
    }

    pub(super) fn add_physical_method(
        &mut self,
        logical: usize,
        name: UnqualifiedName,
        access_flags: MethodAccessFlags,
        descriptor: MethodDescriptor,
    ) -> usize {
        let name_index = self.constants.get_utf8(name.as_str());
        let name_index = self.record_overflow(Some(&name), name_index);
        let descriptor_index = self.constants.get_utf8(descriptor.render());
        let descriptor_index = self.record_overflow(Some(&name), descriptor_index);

        let is_static = access_flags.contains(MethodAccessFlags::STATIC);
        let mut next_slot = if is_static { 0 } else { 1 };
        let mut parameter_slots = vec![];
        for parameter in &descriptor.parameters {
            parameter_slots.push(next_slot);
            next_slot += parameter.width();
        }

        log::trace!("Starting method {}{}", name.as_str(), descriptor.render());
        self.methods.push(MethodState {
            logical,
            name,
            access_flags,
            descriptor,
            name_index,
            descriptor_index,
            thrown_exceptions: vec![],
            parameter_slots,
            max_locals: next_slot,
            code: Default::default(),
            stack: Default::default(),
            conditionals: vec![],
            attributes: None,
        });
        self.methods.len() - 1
    }

    /// Create a fresh physical method that will be called from `parent`
    ///
    /// The sub-method is private and is named after the logical method. It takes the same
    /// parameters as the parent if `with_parameters` is set, and none otherwise.
    pub(super) fn new_sub_method(
        &mut self,
        parent: usize,
        return_type: Option<FieldType>,
        with_parameters: bool,
    ) -> usize {
        let logical = self.methods[parent].logical;
        let name = self.logical[logical].next_sub_method_name();
        let parent_method = &self.methods[parent];
        let access_flags = parent_method.access_flags.sub_method();
        let parameters = if with_parameters {
            parent_method.descriptor.parameters.clone()
        } else {
            vec![]
        };
        let thrown_exceptions = parent_method.thrown_exceptions.clone();

        let descriptor = MethodDescriptor {
            parameters,
            return_type,
        };
        let sub_method = self.add_physical_method(logical, name, access_flags, descriptor);
        self.methods[sub_method].thrown_exceptions = thrown_exceptions;
        sub_method
    }

    /// Finish off a physical method: split it if needed, then write its attributes
    pub(super) fn complete_method(&mut self, idx: usize) {
        {
            let method = &self.methods[idx];
            if method.is_completed() {
                if self.settings.strict {
                    panic!("Method {} is already completed", method.name.as_str());
                }
                return;
            }
            if self.settings.strict && !method.conditionals.is_empty() {
                panic!(
                    "Method {} completed with an open conditional",
                    method.name.as_str()
                );
            }
        }

        if self.methods[idx].code.pc() > self.settings.split_length && self.limit_exceeded.is_none()
        {
            self.split_method(idx);
        }

        let name = self.methods[idx].name.clone();
        let mut attributes = vec![];

        // Exceptions
        let thrown_exceptions = self.methods[idx].thrown_exceptions.clone();
        if !thrown_exceptions.is_empty() {
            let mut exception_indices = vec![];
            for exception in &thrown_exceptions {
                let index = exception.constant_index(&mut self.constants);
                exception_indices.push(self.record_overflow(Some(&name), index));
            }
            if let Some(attribute) = self.attribute(&name, Exceptions(exception_indices)) {
                attributes.push(attribute);
            }
        }

        // Code
        let method = &self.methods[idx];
        let code_length = method.code.pc();
        let max_stack = method.stack.max_depth();
        let max_locals = method.max_locals;
        let code_array = BytecodeArray(method.code.as_slice().to_vec());
        let mut code_attributes = vec![];
        if self.settings.line_numbers {
            let covered = code_length.min(u16::MAX as usize);
            if let Some(attribute) = self.attribute(&name, LineNumberTable::identity(covered)) {
                code_attributes.push(attribute);
            }
        }
        let code = Code {
            max_stack: max_stack.min(MAX_WORDS) as u16,
            max_locals: max_locals.min(MAX_WORDS) as u16,
            code_array,
            attributes: code_attributes,
        };
        if let Some(attribute) = self.attribute(&name, code) {
            attributes.push(attribute);
        }

        // Limits
        if max_stack > MAX_WORDS {
            self.record_limit(limit_message(&name, "max_stack", MAX_WORDS, max_stack));
        }
        if max_locals > MAX_WORDS {
            self.record_limit(limit_message(&name, "max_locals", MAX_WORDS, max_locals));
        }
        if code_length > Settings::MAX_CODE_LENGTH {
            let message = limit_message(&name, "code_length", Settings::MAX_CODE_LENGTH, code_length);
            self.record_limit(message);
        }

        // Cross-check the stack simulation against the code actually emitted
        if self.settings.strict
            && code_length <= Settings::MAX_CODE_LENGTH
            && self.limit_exceeded.is_none()
        {
            let method = &self.methods[idx];
            let replayed = super::analysis::find_max_stack(
                method.code.as_slice(),
                &self.constants,
                0,
                code_length,
            );
            assert_eq!(
                replayed,
                max_stack,
                "Simulated max stack of {} doesn't match the code",
                name.as_str()
            );
        }

        log::debug!(
            "Completed method {} (code_length = {}, max_stack = {}, max_locals = {})",
            name.as_str(),
            code_length,
            max_stack,
            max_locals
        );
        self.methods[idx].attributes = Some(attributes);
    }

    /// Serialize an attribute, recording any failure as an exceeded limit
    fn attribute<A: AttributeLike>(
        &mut self,
        method: &UnqualifiedName,
        attribute: A,
    ) -> Option<Attribute> {
        match self.constants.get_attribute(attribute) {
            Ok(attribute) => Some(attribute),
            Err(Error::LimitExceeded(message)) => {
                self.record_limit(format!("method:{} {}", method.as_str(), message));
                None
            }
            Err(err) => {
                self.record_limit(format!("method:{} {:?}", method.as_str(), err));
                None
            }
        }
    }

    /// Produce the bytes of the class file
    ///
    /// This fails if any limit was exceeded or if any method hasn't been completed.
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        if let Some(message) = self.limit_exceeded {
            return Err(Error::LimitExceeded(message));
        }

        let mut methods = vec![];
        for method in self.methods {
            match method.attributes {
                None => return Err(Error::MethodNotCompleted(method.name)),
                Some(attributes) => methods.push(Method {
                    access_flags: method.access_flags,
                    name_index: method.name_index,
                    descriptor_index: method.descriptor_index,
                    attributes,
                }),
            }
        }

        let class = ClassFile {
            version: self.settings.version,
            constants: self.constants.into_offset_vec(),
            access_flags: self.access_flags,
            this_class: self.this_class_index,
            super_class: self.super_class_index,
            fields: self.fields,
            methods,
            attributes: vec![],
        };

        let mut bytes = vec![];
        class.serialize(&mut bytes)?;
        log::debug!(
            "Finished class {} ({} bytes)",
            self.name.as_str(),
            bytes.len()
        );
        Ok(bytes)
    }
}

/// Message for an exceeded limit (eg. `method:e0 max_stack 65535 (70000 > 65535)`)
pub(super) fn limit_message(
    method: &UnqualifiedName,
    limit_name: &str,
    limit: usize,
    value: usize,
) -> String {
    format!(
        "method:{} {} {} ({} > {})",
        method.as_str(),
        limit_name,
        limit,
        value,
        limit
    )
}
