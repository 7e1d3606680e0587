use crate::jvm::FieldType;
use crate::util::Width;

/// Simulated operand stack of a method being generated
///
/// One entry per value, so `long`/`double` entries count for two words of depth. The depth and
/// maximum depth are tracked in words since that is what `max_stack` is measured in.
#[derive(Debug, Default)]
pub struct OperandStack {
    entries: Vec<FieldType>,
    depth: usize,
    max_depth: usize,
}

impl OperandStack {
    /// Current depth, in words
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Largest depth ever reached, in words
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Override the maximum depth (after the code has been rewritten by splitting)
    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FieldType] {
        &self.entries
    }

    pub fn push(&mut self, field_type: FieldType) {
        self.depth += field_type.width();
        self.max_depth = self.max_depth.max(self.depth);
        self.entries.push(field_type);
    }

    /// Pop the top entry
    ///
    /// Popping an empty stack means the generated code would be invalid, so this always panics.
    pub fn pop(&mut self) -> FieldType {
        match self.entries.pop() {
            Some(field_type) => {
                self.depth -= field_type.width();
                field_type
            }
            None => panic!("Operand stack underflow"),
        }
    }

    /// Account for `words` extra words temporarily pushed on top of the current stack
    pub fn reserve_transient(&mut self, words: usize) {
        self.max_depth = self.max_depth.max(self.depth + words);
    }

    /// Copy of the current entries (see `restore`)
    pub fn snapshot(&self) -> Vec<FieldType> {
        self.entries.clone()
    }

    /// Reset the stack to a previous snapshot
    ///
    /// The maximum depth is untouched, since the code that produced it is still there.
    pub fn restore(&mut self, entries: Vec<FieldType>) {
        self.depth = entries.iter().map(Width::width).sum();
        self.entries = entries;
    }
}
