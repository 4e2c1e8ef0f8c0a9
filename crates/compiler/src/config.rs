//! Builder-style configuration for a compile run.

use minic_core::MIN_MEMORY_CELLS;
use serde::{Deserialize, Serialize};

/// Options controlling how a source file is compiled and, if requested,
/// run. Construct with [`CompilerConfig::new`] and chain the `with_*`
/// setters; everything has a sane default so `CompilerConfig::new()` alone
/// compiles and runs a program with the VM's minimum memory image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Size of the VM's flat memory image, in cells. Clamped up to
    /// [`MIN_MEMORY_CELLS`] if set lower.
    pub memory_cells: usize,
    /// Stop after code generation and print the emitted program instead of
    /// running it.
    pub dump_program: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig { memory_cells: MIN_MEMORY_CELLS, dump_program: false }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_cells(mut self, cells: usize) -> Self {
        self.memory_cells = cells.max(MIN_MEMORY_CELLS);
        self
    }

    pub fn with_dump_program(mut self, dump: bool) -> Self {
        self.dump_program = dump;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_memory_meets_vm_minimum() {
        assert_eq!(CompilerConfig::new().memory_cells, MIN_MEMORY_CELLS);
    }

    #[test]
    fn low_memory_cells_are_clamped() {
        let cfg = CompilerConfig::new().with_memory_cells(16);
        assert_eq!(cfg.memory_cells, MIN_MEMORY_CELLS);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = CompilerConfig::new().with_dump_program(true);
        let text = toml::to_string(&cfg).unwrap();
        let back: CompilerConfig = toml::from_str(&text).unwrap();
        assert!(back.dump_program);
    }
}
