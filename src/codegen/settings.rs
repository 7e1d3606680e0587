use crate::jvm::class_file::Version;

/// Knobs for class generation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Version of the class file format to emit
    ///
    /// Generated code has branches but no `StackMapTable`, so this must stay below Java 7.
    pub version: Version,

    /// Longest method body (in bytes) that is left alone when a method is completed
    ///
    /// Anything longer gets split into sub-methods. The class file format caps this at 65535, but
    /// a smaller value is useful to exercise splitting on small inputs.
    pub split_length: usize,

    /// Code length at which a parameterless method chains into a fresh sub-method
    ///
    /// This is checked at statement boundaries only (see `MethodAssembler::end_statement`).
    pub overflow_threshold: usize,

    /// Number of statements after which `MethodAssembler::statement_num_hit_limit` reports that
    /// callers should start a new method
    pub statement_limit: usize,

    /// Panic on misuse of the assembler API (stack type mismatches, pushing into a completed
    /// method, etc.)
    ///
    /// Popping an empty operand stack always panics, regardless of this setting.
    pub strict: bool,

    /// Emit a `LineNumberTable` mapping every bytecode offset to itself
    pub line_numbers: bool,
}

impl Settings {
    /// Largest `code_length` the class file format supports
    pub const MAX_CODE_LENGTH: usize = 65535;
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            version: Version::JAVA6,
            split_length: Settings::MAX_CODE_LENGTH,
            overflow_threshold: 55000,
            statement_limit: 2048,
            strict: cfg!(debug_assertions),
            line_numbers: false,
        }
    }
}
