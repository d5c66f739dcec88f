//! Pipeline configuration
//!
//! Every optimization toggle is an explicit field on [`Config`]. Drivers
//! assemble one value at startup and pass it to
//! [`Optimizer::run`](crate::compiler::Optimizer::run),
//! [`compile_function`](crate::compile_function) or
//! [`compile_module`](crate::compile_module).

/// Maximum number of registers per class the register allocator and the
/// enter-frame save mask can describe.
pub const MAX_REGISTERS: u32 = 32;

/// Configuration for the optimization and code generation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// Convert to SSA form and run the SSA optimizations.
    /// Without it every temp lives in its own stack slot.
    pub enable_ssa: bool,

    /// Peel the first iteration of innermost loops (only with SSA)
    pub enable_loop_peeling: bool,

    /// Allocate machine registers with linear scan instead of putting every
    /// value in a stack slot (only with SSA)
    pub enable_register_allocation: bool,

    /// Compile property and global reads/writes to lookup-slot runtime calls
    pub enable_fast_lookups: bool,

    /// Log the IR after every pipeline stage at info level
    pub show_ir: bool,

    /// General-purpose registers available to the allocator (default: 8, max 32)
    pub register_count: u32,

    /// Floating-point registers available to the allocator (default: 8, max 32)
    pub fp_register_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_ssa: true,
            enable_loop_peeling: true,
            enable_register_allocation: true,
            enable_fast_lookups: true,
            show_ir: false,
            register_count: 8,
            fp_register_count: 8,
        }
    }
}

impl Config {
    /// Creates a configuration with every optimization disabled
    ///
    /// No SSA, every temp in its own stack slot, names looked up by string.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enable_ssa: false,
            enable_loop_peeling: false,
            enable_register_allocation: false,
            enable_fast_lookups: false,
            show_ir: false,
            register_count: 0,
            fp_register_count: 0,
        }
    }

    /// Creates a configuration running the SSA optimizer but allocating stack slots only
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            enable_ssa: true,
            enable_loop_peeling: false,
            enable_register_allocation: false,
            enable_fast_lookups: false,
            show_ir: false,
            register_count: 0,
            fp_register_count: 0,
        }
    }

    /// Sets whether SSA form and the SSA optimizations are used
    #[must_use]
    pub fn with_ssa(mut self, enable: bool) -> Self {
        self.enable_ssa = enable;
        self
    }

    /// Sets whether innermost loops get their first iteration peeled
    #[must_use]
    pub fn with_loop_peeling(mut self, enable: bool) -> Self {
        self.enable_loop_peeling = enable;
        self
    }

    /// Sets whether the linear-scan register allocator runs
    #[must_use]
    pub fn with_register_allocation(mut self, enable: bool) -> Self {
        self.enable_register_allocation = enable;
        self
    }

    /// Sets whether lookup-slot runtime calls are emitted
    #[must_use]
    pub fn with_fast_lookups(mut self, enable: bool) -> Self {
        self.enable_fast_lookups = enable;
        self
    }

    /// Sets whether the IR is logged after every stage
    #[must_use]
    pub fn with_show_ir(mut self, enable: bool) -> Self {
        self.show_ir = enable;
        self
    }

    /// Sets the register file sizes; values above [`MAX_REGISTERS`] are clamped
    #[must_use]
    pub fn with_registers(mut self, general: u32, fp: u32) -> Self {
        self.register_count = general.min(MAX_REGISTERS);
        self.fp_register_count = fp.min(MAX_REGISTERS);
        self
    }

    /// Returns `true` when the linear-scan allocator should run
    ///
    /// Register allocation needs SSA form and at least one register.
    #[must_use]
    pub fn uses_register_allocation(&self) -> bool {
        self.enable_ssa
            && self.enable_register_allocation
            && (self.register_count > 0 || self.fp_register_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let default = Config::default();
        assert!(default.enable_ssa && default.enable_loop_peeling && !default.show_ir);
        assert!(default.uses_register_allocation());

        let disabled = Config::disabled();
        assert!(!disabled.enable_ssa);
        assert!(!disabled.uses_register_allocation());

        let minimal = Config::minimal();
        assert!(minimal.enable_ssa && !minimal.enable_loop_peeling);
        assert!(!minimal.uses_register_allocation());
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::minimal()
            .with_register_allocation(true)
            .with_registers(64, 4)
            .with_show_ir(true);
        assert_eq!(config.register_count, MAX_REGISTERS);
        assert_eq!(config.fp_register_count, 4);
        assert!(config.uses_register_allocation());
        assert!(config.show_ir);

        let no_ssa = config.with_ssa(false);
        assert!(!no_ssa.uses_register_allocation());
    }
}
