//! Tiny JVM for running generated classes
//!
//! Supports the instructions the assembler emits, plus just enough of `java.lang` (`Object`,
//! `String`, `StringBuilder`, and `Integer`) to write interesting test methods. Every frame
//! checks that the operand stack never goes over the `max_stack` declared by the method.

use byteorder::{BigEndian, ReadBytesExt};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Ref(Rc<RefCell<Object>>),

    /// Second word of a `long` or `double`
    Top,
}

#[derive(Debug)]
pub enum Object {
    Instance {
        class: String,
        fields: HashMap<String, Value>,
    },
    Str(String),
    Builder(String),
    Boxed(i32),
    Array {
        element: String,
        values: Vec<Value>,
    },
}

impl Value {
    pub fn string(value: &str) -> Value {
        Value::object(Object::Str(value.to_owned()))
    }

    pub fn object(object: Object) -> Value {
        Value::Ref(Rc::new(RefCell::new(object)))
    }

    fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    pub fn as_int(&self) -> i32 {
        match self {
            Value::Int(i) => *i,
            other => panic!("Expected int but got {:?}", other),
        }
    }

    pub fn as_long(&self) -> i64 {
        match self {
            Value::Long(l) => *l,
            other => panic!("Expected long but got {:?}", other),
        }
    }

    pub fn as_float(&self) -> f32 {
        match self {
            Value::Float(f) => *f,
            other => panic!("Expected float but got {:?}", other),
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            Value::Double(d) => *d,
            other => panic!("Expected double but got {:?}", other),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::Ref(object) => match &*object.borrow() {
                Object::Str(s) | Object::Builder(s) => s.clone(),
                other => panic!("Expected string but got {:?}", other),
            },
            other => panic!("Expected string but got {:?}", other),
        }
    }

    fn as_object(&self) -> Rc<RefCell<Object>> {
        match self {
            Value::Ref(object) => object.clone(),
            Value::Null => panic!("NullPointerException"),
            other => panic!("Expected reference but got {:?}", other),
        }
    }

    /// Render a value the way `StringBuilder.append` would
    fn render(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Long(l) => l.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Null => String::from("null"),
            Value::Ref(object) => match &*object.borrow() {
                Object::Str(s) | Object::Builder(s) => s.clone(),
                Object::Boxed(i) => i.to_string(),
                Object::Instance { class, .. } => format!("{}@instance", class),
                Object::Array { element, .. } => format!("[{}", element),
            },
            Value::Top => panic!("Rendering the second word of a wide value"),
        }
    }
}

#[derive(Debug)]
enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    Member { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    Unusable,
}

#[derive(Debug)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub max_stack: usize,
    pub max_locals: usize,
    pub code: Vec<u8>,
    pub code_attributes: Vec<String>,
    pub exceptions: Vec<String>,
}

#[derive(Debug)]
pub struct ClassInfo {
    pub version: (u16, u16),
    pub name: String,
    pub super_class: String,
    pub fields: Vec<(String, String, u16)>,
    pub methods: Vec<MethodInfo>,
    constants: Vec<Constant>,
}

impl ClassInfo {
    /// Parse a class file
    pub fn parse(bytes: &[u8]) -> ClassInfo {
        let mut reader = Cursor::new(bytes);
        assert_eq!(reader.read_u32::<BigEndian>().unwrap(), 0xCAFE_BABE);
        let minor = reader.read_u16::<BigEndian>().unwrap();
        let major = reader.read_u16::<BigEndian>().unwrap();

        let constants_count = reader.read_u16::<BigEndian>().unwrap();
        let mut constants = vec![Constant::Unusable];
        while constants.len() < constants_count as usize {
            let tag = reader.read_u8().unwrap();
            let constant = match tag {
                1 => {
                    let length = reader.read_u16::<BigEndian>().unwrap();
                    let mut utf8 = vec![0; length as usize];
                    reader.read_exact(&mut utf8).unwrap();
                    Constant::Utf8(String::from_utf8(utf8).unwrap())
                }
                3 => Constant::Integer(reader.read_i32::<BigEndian>().unwrap()),
                4 => Constant::Float(reader.read_f32::<BigEndian>().unwrap()),
                5 => Constant::Long(reader.read_i64::<BigEndian>().unwrap()),
                6 => Constant::Double(reader.read_f64::<BigEndian>().unwrap()),
                7 => Constant::Class(reader.read_u16::<BigEndian>().unwrap()),
                8 => Constant::String(reader.read_u16::<BigEndian>().unwrap()),
                9 | 10 | 11 => Constant::Member {
                    class: reader.read_u16::<BigEndian>().unwrap(),
                    name_and_type: reader.read_u16::<BigEndian>().unwrap(),
                },
                12 => Constant::NameAndType {
                    name: reader.read_u16::<BigEndian>().unwrap(),
                    descriptor: reader.read_u16::<BigEndian>().unwrap(),
                },
                other => panic!("Unknown constant tag {}", other),
            };
            let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
            constants.push(constant);
            if wide {
                constants.push(Constant::Unusable);
            }
        }

        let mut class = ClassInfo {
            version: (major, minor),
            name: String::new(),
            super_class: String::new(),
            fields: vec![],
            methods: vec![],
            constants,
        };

        let _access_flags = reader.read_u16::<BigEndian>().unwrap();
        class.name = class.class_name(reader.read_u16::<BigEndian>().unwrap());
        class.super_class = class.class_name(reader.read_u16::<BigEndian>().unwrap());
        let interfaces = reader.read_u16::<BigEndian>().unwrap();
        for _ in 0..interfaces {
            reader.read_u16::<BigEndian>().unwrap();
        }

        let fields_count = reader.read_u16::<BigEndian>().unwrap();
        for _ in 0..fields_count {
            let access_flags = reader.read_u16::<BigEndian>().unwrap();
            let name = class.utf8(reader.read_u16::<BigEndian>().unwrap());
            let descriptor = class.utf8(reader.read_u16::<BigEndian>().unwrap());
            let attributes = reader.read_u16::<BigEndian>().unwrap();
            for _ in 0..attributes {
                skip_attribute(&mut reader);
            }
            class.fields.push((name, descriptor, access_flags));
        }

        let methods_count = reader.read_u16::<BigEndian>().unwrap();
        for _ in 0..methods_count {
            let access_flags = reader.read_u16::<BigEndian>().unwrap();
            let name = class.utf8(reader.read_u16::<BigEndian>().unwrap());
            let descriptor = class.utf8(reader.read_u16::<BigEndian>().unwrap());
            let mut method = MethodInfo {
                access_flags,
                name,
                descriptor,
                max_stack: 0,
                max_locals: 0,
                code: vec![],
                code_attributes: vec![],
                exceptions: vec![],
            };

            let attributes = reader.read_u16::<BigEndian>().unwrap();
            for _ in 0..attributes {
                let attribute_name = class.utf8(reader.read_u16::<BigEndian>().unwrap());
                let length = reader.read_u32::<BigEndian>().unwrap();
                match attribute_name.as_str() {
                    "Code" => {
                        method.max_stack = reader.read_u16::<BigEndian>().unwrap() as usize;
                        method.max_locals = reader.read_u16::<BigEndian>().unwrap() as usize;
                        let code_length = reader.read_u32::<BigEndian>().unwrap();
                        method.code = vec![0; code_length as usize];
                        reader.read_exact(&mut method.code).unwrap();
                        let exception_table = reader.read_u16::<BigEndian>().unwrap();
                        assert_eq!(exception_table, 0);
                        let code_attributes = reader.read_u16::<BigEndian>().unwrap();
                        for _ in 0..code_attributes {
                            let name = class.utf8(reader.read_u16::<BigEndian>().unwrap());
                            let length = reader.read_u32::<BigEndian>().unwrap();
                            let mut skipped = vec![0; length as usize];
                            reader.read_exact(&mut skipped).unwrap();
                            method.code_attributes.push(name);
                        }
                    }
                    "Exceptions" => {
                        let count = reader.read_u16::<BigEndian>().unwrap();
                        for _ in 0..count {
                            let exception = class.class_name(reader.read_u16::<BigEndian>().unwrap());
                            method.exceptions.push(exception);
                        }
                    }
                    _ => {
                        let mut skipped = vec![0; length as usize];
                        reader.read_exact(&mut skipped).unwrap();
                    }
                }
            }
            class.methods.push(method);
        }

        let attributes = reader.read_u16::<BigEndian>().unwrap();
        for _ in 0..attributes {
            skip_attribute(&mut reader);
        }
        assert_eq!(reader.position() as usize, bytes.len(), "Trailing bytes in class file");
        class
    }

    fn utf8(&self, index: u16) -> String {
        match &self.constants[index as usize] {
            Constant::Utf8(s) => s.clone(),
            other => panic!("Expected utf8 at {} but got {:?}", index, other),
        }
    }

    fn class_name(&self, index: u16) -> String {
        match &self.constants[index as usize] {
            Constant::Class(name) => self.utf8(*name),
            other => panic!("Expected class at {} but got {:?}", index, other),
        }
    }

    /// Class, name, and descriptor of a field or method reference
    fn member(&self, index: u16) -> (String, String, String) {
        match &self.constants[index as usize] {
            Constant::Member {
                class,
                name_and_type,
            } => match &self.constants[*name_and_type as usize] {
                Constant::NameAndType { name, descriptor } => (
                    self.class_name(*class),
                    self.utf8(*name),
                    self.utf8(*descriptor),
                ),
                other => panic!("Expected name and type but got {:?}", other),
            },
            other => panic!("Expected member reference at {} but got {:?}", index, other),
        }
    }

    fn loadable(&self, index: u16) -> Value {
        match &self.constants[index as usize] {
            Constant::Integer(i) => Value::Int(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::Long(l) => Value::Long(*l),
            Constant::Double(d) => Value::Double(*d),
            Constant::String(s) => Value::string(&self.utf8(*s)),
            other => panic!("Cannot load constant {:?}", other),
        }
    }

    pub fn method(&self, name: &str) -> &MethodInfo {
        self.methods
            .iter()
            .find(|method| method.name == name)
            .unwrap_or_else(|| panic!("No method {} in {}", name, self.name))
    }

    pub fn constants_count(&self) -> usize {
        self.constants.len()
    }
}

fn skip_attribute(reader: &mut Cursor<&[u8]>) {
    reader.read_u16::<BigEndian>().unwrap();
    let length = reader.read_u32::<BigEndian>().unwrap();
    let mut skipped = vec![0; length as usize];
    reader.read_exact(&mut skipped).unwrap();
}

/// Split a method descriptor into its parameter descriptors and return descriptor
pub fn split_descriptor(descriptor: &str) -> (Vec<String>, String) {
    let bytes = descriptor.as_bytes();
    assert_eq!(bytes[0], b'(');
    let mut parameters = vec![];
    let mut pos = 1;
    while bytes[pos] != b')' {
        let start = pos;
        while bytes[pos] == b'[' {
            pos += 1;
        }
        if bytes[pos] == b'L' {
            while bytes[pos] != b';' {
                pos += 1;
            }
        }
        pos += 1;
        parameters.push(descriptor[start..pos].to_owned());
    }
    (parameters, descriptor[pos + 1..].to_owned())
}

fn default_value(descriptor: &str) -> Value {
    match descriptor.as_bytes()[0] {
        b'J' => Value::Long(0),
        b'F' => Value::Float(0.0),
        b'D' => Value::Double(0.0),
        b'L' | b'[' => Value::Null,
        _ => Value::Int(0),
    }
}

fn array_element(array_type: u8) -> &'static str {
    match array_type {
        4 => "Z",
        5 => "C",
        6 => "F",
        7 => "D",
        8 => "B",
        9 => "S",
        10 => "I",
        11 => "J",
        other => panic!("Bad array type {}", other),
    }
}

fn read_u16(code: &[u8], pc: usize) -> u16 {
    u16::from_be_bytes([code[pc], code[pc + 1]])
}

fn read_i16(code: &[u8], pc: usize) -> i16 {
    i16::from_be_bytes([code[pc], code[pc + 1]])
}

fn read_i32(code: &[u8], pc: usize) -> i32 {
    i32::from_be_bytes([code[pc], code[pc + 1], code[pc + 2], code[pc + 3]])
}

struct Frame {
    locals: Vec<Value>,
    stack: Vec<Value>,
    max_stack: usize,
}

impl Frame {
    fn push(&mut self, value: Value) {
        let wide = value.is_wide();
        self.stack.push(value);
        if wide {
            self.stack.push(Value::Top);
        }
        assert!(
            self.stack.len() <= self.max_stack,
            "Stack depth {} over max_stack {}",
            self.stack.len(),
            self.max_stack
        );
    }

    fn pop(&mut self) -> Value {
        match self.stack.pop() {
            Some(Value::Top) => {
                let value = self.stack.pop().expect("stack underflow");
                assert!(value.is_wide());
                value
            }
            Some(value) => value,
            None => panic!("stack underflow"),
        }
    }

    fn pop_word(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn push_words(&mut self, words: impl IntoIterator<Item = Value>) {
        self.stack.extend(words);
        assert!(
            self.stack.len() <= self.max_stack,
            "Stack depth {} over max_stack {}",
            self.stack.len(),
            self.max_stack
        );
    }

    fn load(&mut self, slot: usize) {
        let value = self.locals[slot].clone();
        assert!(!matches!(value, Value::Top), "Loading an unset local {}", slot);
        self.push(value);
    }
}

/// Loaded classes, plus the static fields of those classes
#[derive(Default)]
pub struct Jvm {
    classes: HashMap<String, Rc<ClassInfo>>,
    statics: HashMap<(String, String), Value>,
    pub instructions_executed: usize,
}

impl Jvm {
    pub fn new() -> Jvm {
        Jvm::default()
    }

    /// Load a class, returning its name
    pub fn load(&mut self, bytes: &[u8]) -> String {
        let class = ClassInfo::parse(bytes);
        let name = class.name.clone();
        self.classes.insert(name.clone(), Rc::new(class));
        name
    }

    pub fn class(&self, name: &str) -> Rc<ClassInfo> {
        self.classes
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("Class {} is not loaded", name))
    }

    /// Call a static method (looked up by name only)
    pub fn invoke_static(&mut self, class: &str, method: &str, args: Vec<Value>) -> Option<Value> {
        let class = self.class(class);
        let method = class.method(method);
        assert!(method.access_flags & 0x0008 != 0, "{} is not static", method.name);
        self.execute(&class, method, args)
    }

    /// Construct an instance with the no-argument constructor
    pub fn new_instance(&mut self, class: &str) -> Value {
        let instance = self.allocate(class);
        let class_info = self.class(class);
        let init = class_info
            .methods
            .iter()
            .find(|method| method.name == "<init>" && method.descriptor == "()V")
            .expect("no default constructor");
        self.execute(&class_info, init, vec![instance.clone()]);
        instance
    }

    /// Call an instance method (looked up by name only)
    pub fn invoke_virtual(
        &mut self,
        instance: &Value,
        method: &str,
        mut args: Vec<Value>,
    ) -> Option<Value> {
        let class = match &*instance.as_object().borrow() {
            Object::Instance { class, .. } => class.clone(),
            other => panic!("Not an instance: {:?}", other),
        };
        let class = self.class(&class);
        let method = class.method(method);
        args.insert(0, instance.clone());
        self.execute(&class, method, args)
    }

    fn allocate(&self, class: &str) -> Value {
        match class {
            "java/lang/StringBuilder" => Value::object(Object::Builder(String::new())),
            _ => {
                let mut fields = HashMap::new();
                if let Some(class_info) = self.classes.get(class) {
                    for (name, descriptor, access_flags) in &class_info.fields {
                        if access_flags & 0x0008 == 0 {
                            fields.insert(name.clone(), default_value(descriptor));
                        }
                    }
                }
                Value::object(Object::Instance {
                    class: class.to_owned(),
                    fields,
                })
            }
        }
    }

    fn is_instance_of(&self, value: &Value, class: &str) -> bool {
        let object = match value {
            Value::Null => return false,
            other => other.as_object(),
        };
        let object = object.borrow();
        if class == "java/lang/Object" {
            return true;
        }
        match &*object {
            Object::Instance { class: actual, .. } => {
                let mut current = actual.clone();
                loop {
                    if current == class {
                        return true;
                    }
                    match self.classes.get(&current) {
                        Some(info) => current = info.super_class.clone(),
                        None => return false,
                    }
                }
            }
            Object::Str(_) => class == "java/lang/String",
            Object::Builder(_) => class == "java/lang/StringBuilder",
            Object::Boxed(_) => class == "java/lang/Integer" || class == "java/lang/Number",
            Object::Array { element, .. } => class == format!("[{}", element),
        }
    }

    /// Find the method to run for a call, resolving up the class hierarchy
    fn resolve(&self, class: &str, name: &str, descriptor: &str) -> Option<Rc<ClassInfo>> {
        let mut current = class.to_owned();
        loop {
            let info = self.classes.get(&current)?;
            if info
                .methods
                .iter()
                .any(|method| method.name == name && method.descriptor == descriptor)
            {
                return Some(info.clone());
            }
            current = info.super_class.clone();
        }
    }

    fn run_resolved(
        &mut self,
        class: &Rc<ClassInfo>,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Option<Value> {
        let method = class
            .methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
            .unwrap_or_else(|| panic!("No method {}{}", name, descriptor));
        self.execute(class, method, args)
    }

    /// Methods of classes which aren't loaded
    fn builtin(&mut self, class: &str, name: &str, descriptor: &str, args: Vec<Value>) -> Option<Value> {
        match (class, name, descriptor) {
            ("java/lang/Object", "<init>", "()V") => None,
            ("java/lang/Object", "toString", _) => Some(Value::string(&args[0].render())),
            ("java/lang/StringBuilder", "<init>", "()V") => None,
            ("java/lang/StringBuilder", "<init>", "(Ljava/lang/String;)V") => {
                let initial = args[1].as_string();
                *args[0].as_object().borrow_mut() = Object::Builder(initial);
                None
            }
            ("java/lang/StringBuilder", "append", _) => {
                let rendered = match (&args[1], split_descriptor(descriptor).0[0].as_str()) {
                    (Value::Int(i), "C") => char::from_u32(*i as u32).unwrap().to_string(),
                    (Value::Int(i), "Z") => (*i != 0).to_string(),
                    (value, _) => value.render(),
                };
                if let Object::Builder(s) = &mut *args[0].as_object().borrow_mut() {
                    s.push_str(&rendered);
                }
                Some(args[0].clone())
            }
            ("java/lang/StringBuilder" | "java/lang/String" | "java/lang/CharSequence", "toString", _) => {
                Some(Value::string(&args[0].render()))
            }
            ("java/lang/StringBuilder" | "java/lang/String" | "java/lang/CharSequence", "length", _) => {
                Some(Value::Int(args[0].render().chars().count() as i32))
            }
            ("java/lang/String", "concat", _) => {
                Some(Value::string(&(args[0].render() + &args[1].render())))
            }
            ("java/lang/String", "valueOf", _) => Some(Value::string(&args[0].render())),
            ("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;") => {
                Some(Value::object(Object::Boxed(args[0].as_int())))
            }
            ("java/lang/Integer" | "java/lang/Number", "intValue", "()I") => {
                match &*args[0].as_object().borrow() {
                    Object::Boxed(i) => Some(Value::Int(*i)),
                    other => panic!("Not an Integer: {:?}", other),
                }
            }
            _ => panic!("Unsupported builtin {}.{}{}", class, name, descriptor),
        }
    }

    fn invoke(&mut self, opcode: u8, class: String, name: String, descriptor: String, frame: &mut Frame) {
        let (parameters, return_type) = split_descriptor(&descriptor);
        let mut args: Vec<Value> = parameters.iter().map(|_| frame.pop()).collect();
        if opcode != 0xb8 {
            let receiver = frame.pop();
            assert!(!receiver.is_null(), "NullPointerException calling {}", name);
            args.push(receiver);
        }
        args.reverse();

        let result = match opcode {
            // invokevirtual, invokeinterface
            0xb6 | 0xb9 => {
                let runtime_class = match &*args[0].as_object().borrow() {
                    Object::Instance { class, .. } => Some(class.clone()),
                    _ => None,
                };
                let resolved = runtime_class
                    .as_deref()
                    .and_then(|class| self.resolve(class, &name, &descriptor));
                match resolved {
                    Some(resolved) => self.run_resolved(&resolved, &name, &descriptor, args),
                    None => self.builtin(&class, &name, &descriptor, args),
                }
            }

            // invokespecial, invokestatic
            _ => match self.classes.get(&class).cloned() {
                Some(resolved) => self.run_resolved(&resolved, &name, &descriptor, args),
                None => self.builtin(&class, &name, &descriptor, args),
            },
        };

        match (result, return_type.as_str()) {
            (None, "V") => (),
            (Some(value), ret) if ret != "V" => frame.push(value),
            (result, ret) => panic!("Bad result {:?} for return type {}", result, ret),
        }
    }

    fn execute(&mut self, class: &Rc<ClassInfo>, method: &MethodInfo, args: Vec<Value>) -> Option<Value> {
        let code = &method.code;
        assert!(!code.is_empty(), "{} has no code", method.name);

        let mut frame = Frame {
            locals: vec![Value::Top; method.max_locals],
            stack: vec![],
            max_stack: method.max_stack,
        };
        let mut slot = 0;
        for arg in args {
            let wide = arg.is_wide();
            frame.locals[slot] = arg;
            slot += if wide { 2 } else { 1 };
        }

        let mut pc: usize = 0;
        loop {
            self.instructions_executed += 1;
            let opcode = code[pc];
            let mut next_pc = pc + 1;
            match opcode {
                0x00 => (),
                0x01 => frame.push(Value::Null),
                0x02..=0x08 => frame.push(Value::Int(opcode as i32 - 0x03)),
                0x09 | 0x0a => frame.push(Value::Long(opcode as i64 - 0x09)),
                0x0b..=0x0d => frame.push(Value::Float((opcode - 0x0b) as f32)),
                0x0e | 0x0f => frame.push(Value::Double((opcode - 0x0e) as f64)),
                0x10 => {
                    frame.push(Value::Int(code[pc + 1] as i8 as i32));
                    next_pc = pc + 2;
                }
                0x11 => {
                    frame.push(Value::Int(read_i16(code, pc + 1) as i32));
                    next_pc = pc + 3;
                }
                0x12 => {
                    frame.push(class.loadable(code[pc + 1] as u16));
                    next_pc = pc + 2;
                }
                0x13 | 0x14 => {
                    frame.push(class.loadable(read_u16(code, pc + 1)));
                    next_pc = pc + 3;
                }
                0x15..=0x19 => {
                    frame.load(code[pc + 1] as usize);
                    next_pc = pc + 2;
                }
                0x1a..=0x2d => frame.load(((opcode - 0x1a) % 4) as usize),

                // xaload
                0x2e..=0x35 => {
                    let index = frame.pop().as_int();
                    let array = frame.pop().as_object();
                    let value = match &*array.borrow() {
                        Object::Array { values, .. } => values[index as usize].clone(),
                        other => panic!("Not an array: {:?}", other),
                    };
                    frame.push(value);
                }

                // xastore
                0x4f..=0x56 => {
                    let value = frame.pop();
                    let index = frame.pop().as_int();
                    let array = frame.pop().as_object();
                    match &mut *array.borrow_mut() {
                        Object::Array { values, .. } => values[index as usize] = value,
                        other => panic!("Not an array: {:?}", other),
                    };
                }

                // Stack shuffling, on raw words
                0x57 => {
                    frame.pop_word();
                }
                0x58 => {
                    frame.pop_word();
                    frame.pop_word();
                }
                0x59 => {
                    let a = frame.pop_word();
                    frame.push_words([a.clone(), a]);
                }
                0x5a => {
                    let a = frame.pop_word();
                    let b = frame.pop_word();
                    frame.push_words([a.clone(), b, a]);
                }
                0x5b => {
                    let a = frame.pop_word();
                    let b = frame.pop_word();
                    let c = frame.pop_word();
                    frame.push_words([a.clone(), c, b, a]);
                }
                0x5c => {
                    let a = frame.pop_word();
                    let b = frame.pop_word();
                    frame.push_words([b.clone(), a.clone(), b, a]);
                }
                0x5d => {
                    let a = frame.pop_word();
                    let b = frame.pop_word();
                    let c = frame.pop_word();
                    frame.push_words([b.clone(), a.clone(), c, b, a]);
                }
                0x5e => {
                    let a = frame.pop_word();
                    let b = frame.pop_word();
                    let c = frame.pop_word();
                    let d = frame.pop_word();
                    frame.push_words([b.clone(), a.clone(), d, c, b, a]);
                }
                0x5f => {
                    let a = frame.pop_word();
                    let b = frame.pop_word();
                    frame.push_words([a, b]);
                }

                // Conversions
                0x85 => {
                    let v = frame.pop().as_int();
                    frame.push(Value::Long(v as i64));
                }
                0x86 => {
                    let v = frame.pop().as_int();
                    frame.push(Value::Float(v as f32));
                }
                0x87 => {
                    let v = frame.pop().as_int();
                    frame.push(Value::Double(v as f64));
                }
                0x88 => {
                    let v = frame.pop().as_long();
                    frame.push(Value::Int(v as i32));
                }
                0x89 => {
                    let v = frame.pop().as_long();
                    frame.push(Value::Float(v as f32));
                }
                0x8a => {
                    let v = frame.pop().as_long();
                    frame.push(Value::Double(v as f64));
                }
                0x8b => {
                    let v = frame.pop().as_float();
                    frame.push(Value::Int(v as i32));
                }
                0x8c => {
                    let v = frame.pop().as_float();
                    frame.push(Value::Long(v as i64));
                }
                0x8d => {
                    let v = frame.pop().as_float();
                    frame.push(Value::Double(v as f64));
                }
                0x8e => {
                    let v = frame.pop().as_double();
                    frame.push(Value::Int(v as i32));
                }
                0x8f => {
                    let v = frame.pop().as_double();
                    frame.push(Value::Long(v as i64));
                }
                0x90 => {
                    let v = frame.pop().as_double();
                    frame.push(Value::Float(v as f32));
                }
                0x91 => {
                    let v = frame.pop().as_int();
                    frame.push(Value::Int(v as i8 as i32));
                }
                0x92 => {
                    let v = frame.pop().as_int();
                    frame.push(Value::Int(v as u16 as i32));
                }
                0x93 => {
                    let v = frame.pop().as_int();
                    frame.push(Value::Int(v as i16 as i32));
                }

                // Branches
                0x99 | 0x9a | 0xc6 | 0xc7 => {
                    let value = frame.pop();
                    let taken = match opcode {
                        0x99 => value.as_int() == 0,
                        0x9a => value.as_int() != 0,
                        0xc6 => value.is_null(),
                        _ => !value.is_null(),
                    };
                    next_pc = if taken {
                        (pc as isize + read_i16(code, pc + 1) as isize) as usize
                    } else {
                        pc + 3
                    };
                }
                0xa7 => next_pc = (pc as isize + read_i16(code, pc + 1) as isize) as usize,
                0xc8 => next_pc = (pc as isize + read_i32(code, pc + 1) as isize) as usize,

                // Returns
                0xac..=0xb0 => {
                    let value = frame.pop();
                    assert!(frame.stack.is_empty(), "Return with a non-empty stack");
                    return Some(value);
                }
                0xb1 => {
                    assert!(frame.stack.is_empty(), "Return with a non-empty stack");
                    return None;
                }

                // Fields
                0xb2 | 0xb3 => {
                    let (owner, name, descriptor) = class.member(read_u16(code, pc + 1));
                    let key = (owner, name);
                    if opcode == 0xb2 {
                        let value = self
                            .statics
                            .get(&key)
                            .cloned()
                            .unwrap_or_else(|| default_value(&descriptor));
                        frame.push(value);
                    } else {
                        let value = frame.pop();
                        self.statics.insert(key, value);
                    }
                    next_pc = pc + 3;
                }
                0xb4 => {
                    let (_, name, descriptor) = class.member(read_u16(code, pc + 1));
                    let instance = frame.pop().as_object();
                    let value = match &*instance.borrow() {
                        Object::Instance { fields, .. } => fields
                            .get(&name)
                            .cloned()
                            .unwrap_or_else(|| default_value(&descriptor)),
                        other => panic!("No field {} on {:?}", name, other),
                    };
                    frame.push(value);
                    next_pc = pc + 3;
                }
                0xb5 => {
                    let (_, name, _) = class.member(read_u16(code, pc + 1));
                    let value = frame.pop();
                    let instance = frame.pop().as_object();
                    match &mut *instance.borrow_mut() {
                        Object::Instance { fields, .. } => {
                            fields.insert(name, value);
                        }
                        other => panic!("No field {} on {:?}", name, other),
                    };
                    next_pc = pc + 3;
                }

                // Invokes
                0xb6..=0xb9 => {
                    let (owner, name, descriptor) = class.member(read_u16(code, pc + 1));
                    self.invoke(opcode, owner, name, descriptor, &mut frame);
                    next_pc = pc + if opcode == 0xb9 { 5 } else { 3 };
                }

                // Objects and arrays
                0xbb => {
                    let name = class.class_name(read_u16(code, pc + 1));
                    frame.push(self.allocate(&name));
                    next_pc = pc + 3;
                }
                0xbc => {
                    let element = array_element(code[pc + 1]);
                    let size = frame.pop().as_int();
                    let values = vec![default_value(element); size as usize];
                    frame.push(Value::object(Object::Array {
                        element: element.to_owned(),
                        values,
                    }));
                    next_pc = pc + 2;
                }
                0xbd => {
                    let name = class.class_name(read_u16(code, pc + 1));
                    let element = if name.starts_with('[') {
                        name
                    } else {
                        format!("L{};", name)
                    };
                    let size = frame.pop().as_int();
                    frame.push(Value::object(Object::Array {
                        element,
                        values: vec![Value::Null; size as usize],
                    }));
                    next_pc = pc + 3;
                }
                0xbe => {
                    let array = frame.pop().as_object();
                    let length = match &*array.borrow() {
                        Object::Array { values, .. } => values.len(),
                        other => panic!("Not an array: {:?}", other),
                    };
                    frame.push(Value::Int(length as i32));
                }
                0xc0 => {
                    let name = class.class_name(read_u16(code, pc + 1));
                    let value = frame.pop();
                    if !value.is_null() && !self.is_instance_of(&value, &name) {
                        panic!("ClassCastException: {:?} to {}", value, name);
                    }
                    frame.push(value);
                    next_pc = pc + 3;
                }
                0xc1 => {
                    let name = class.class_name(read_u16(code, pc + 1));
                    let value = frame.pop();
                    let result = self.is_instance_of(&value, &name);
                    frame.push(Value::Int(result as i32));
                    next_pc = pc + 3;
                }

                // wide
                0xc4 => {
                    let slot = read_u16(code, pc + 2) as usize;
                    match code[pc + 1] {
                        0x15..=0x19 => frame.load(slot),
                        other => panic!("Unsupported wide opcode {:#x}", other),
                    }
                    next_pc = pc + 4;
                }

                other => panic!("Unsupported opcode {:#x} at {} in {}", other, pc, method.name),
            }
            assert!(next_pc < code.len(), "Fell off the end of {}", method.name);
            pc = next_pc;
        }
    }
}
