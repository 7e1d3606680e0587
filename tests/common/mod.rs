#![allow(dead_code)]

mod interpreter;

pub use interpreter::*;

use classgen::codegen::{ClassAssembler, Settings};
use classgen::jvm::{BinaryName, ClassAccessFlags, MethodAccessFlags, Name, UnqualifiedName};

pub fn name(name: &str) -> UnqualifiedName {
    UnqualifiedName::from_string(String::from(name)).unwrap()
}

pub fn class_name(name: &str) -> BinaryName {
    BinaryName::from_string(String::from(name)).unwrap()
}

/// Settings for tests: strict checking, and splitting only when asked for
pub fn settings() -> Settings {
    Settings {
        strict: true,
        ..Settings::default()
    }
}

/// Public class extending `Object`, with a default constructor already generated
pub fn new_class(name: &str, settings: Settings) -> ClassAssembler {
    let mut class = ClassAssembler::new(
        class_name(name),
        BinaryName::OBJECT,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        settings,
    );
    let init = class.new_method(None, UnqualifiedName::INIT, MethodAccessFlags::PUBLIC, vec![]);
    let mut init = class.method(init);
    init.call_super();
    init.method_return();
    init.complete();
    class
}

/// Serialize the class and load it into a fresh interpreter
pub fn load(class: ClassAssembler) -> (Jvm, String) {
    let bytes = class.finish().expect("class should serialize");
    let mut jvm = Jvm::new();
    let name = jvm.load(&bytes);
    (jvm, name)
}
