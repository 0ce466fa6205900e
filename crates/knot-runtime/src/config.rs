/// Knobs of a [crate::Runtime]. Sizes are counted in 64 bit heap words.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the first heap space.
    pub heap_words: usize,

    /// The heap never grows past this, allocations that would need more fail
    /// with an out of memory error.
    pub max_heap_words: usize,

    /// Maximum number of values on the vm stack.
    pub max_stack: usize,

    /// Collect before every allocation.
    pub gc_stress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heap_words: 1 << 16,
            max_heap_words: 1 << 27,
            max_stack: 1 << 20,
            gc_stress: false,
        }
    }
}

impl Config {
    pub fn with_heap_words(mut self, words: usize) -> Self {
        self.heap_words = words;
        self
    }

    pub fn with_max_heap_words(mut self, words: usize) -> Self {
        self.max_heap_words = words;
        self
    }

    pub fn with_max_stack(mut self, values: usize) -> Self {
        self.max_stack = values;
        self
    }

    pub fn with_gc_stress(mut self, stress: bool) -> Self {
        self.gc_stress = stress;
        self
    }
}
