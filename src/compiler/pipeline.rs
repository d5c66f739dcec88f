//! The per-function compilation pipeline.
//!
//! ```text
//! merge blocks → arg locals → dominators → loops (+ peeling) → SSA → types
//!   → optimize_ssa → merge/cleanup blocks → split critical edges → schedule
//!   → registers or stack slots → out of SSA → optional jumps → assemble
//! ```
//!
//! Functions with exception handlers, functions over the statement limit and
//! configurations with SSA disabled skip straight to block cleanup and get
//! one stack slot per temp.

use log::{debug, info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::{
    analysis::{
        cleanup_phis, convert_to_ssa,
        types::{ReverseInference, TypeInference, TypePropagation},
        verify_ssa, DefUses, DominatorTree, LifeRanges, LifeTimeIntervals, LoopDetection,
    },
    codegen::{
        can_compile, convert_out_of_ssa, AllocateStackSlots, Assembler, CompiledFunction, FrameLayout,
        RegisterAllocator,
    },
    compiler::{
        calculate_optional_jumps, optimize_ssa,
        passes::{
            cleanup_basic_blocks, convert_arg_locals, convert_temps, merge_basic_blocks, peel_loops,
            split_critical_edges,
        },
        schedule_blocks, StatementWorklist,
    },
    config::Config,
    ir::{BlockId, Function},
    Result,
};

/// Functions with more statements than this are not converted to SSA.
pub const MAX_SSA_STATEMENTS: usize = 300;

/// Drives the middle end over one function.
#[derive(Debug)]
pub struct Optimizer {
    function: Function,
    config: Config,
    in_ssa: bool,
    loop_ends: FxHashMap<BlockId, BlockId>,
}

impl Optimizer {
    /// Takes ownership of `function` for optimization under `config`.
    #[must_use]
    pub fn new(function: Function, config: &Config) -> Self {
        Self {
            function,
            config: *config,
            in_ssa: false,
            loop_ends: FxHashMap::default(),
        }
    }

    /// Returns `true` if [`Optimizer::run`] left the function in scheduled SSA form.
    #[must_use]
    pub fn is_in_ssa(&self) -> bool {
        self.in_ssa
    }

    /// The function being optimized.
    #[must_use]
    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Mutable access for the back end.
    pub fn function_mut(&mut self) -> &mut Function {
        &mut self.function
    }

    /// Gives the function back.
    #[must_use]
    pub fn into_function(self) -> Function {
        self.function
    }

    /// Last block of every loop, keyed by header, in the scheduled numbering.
    #[must_use]
    pub fn loop_ends(&self) -> &FxHashMap<BlockId, BlockId> {
        &self.loop_ends
    }

    /// Life-time intervals of the scheduled SSA function.
    #[must_use]
    pub fn lifetime_intervals(&self) -> LifeTimeIntervals {
        debug_assert!(self.in_ssa, "{} is not in SSA form", self.function.name);
        LifeRanges::new(&self.function, &self.loop_ends).intervals()
    }

    fn show_ir(&self, stage: &str) {
        if self.config.show_ir {
            info!("{} after {stage}:\n{}", self.function.name, self.function);
        }
    }

    /// Runs the middle end.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidIr`] or [`crate::Error::SsaError`] when
    /// verification fails in a debug build.
    pub fn run(&mut self) -> Result<()> {
        self.show_ir("front end");
        let statements = self.function.statement_count();
        let use_ssa = self.config.enable_ssa && !self.function.has_try && statements <= MAX_SSA_STATEMENTS;

        if !use_ssa {
            if self.config.enable_ssa {
                debug!(
                    "{}: staying out of SSA (try: {}, {statements} statements)",
                    self.function.name, self.function.has_try
                );
            }
            cleanup_basic_blocks(&mut self.function, None);
            self.in_ssa = false;
            self.show_ir("block cleanup");
            return Ok(());
        }

        let function = &mut self.function;
        merge_basic_blocks(function, None, None);
        convert_arg_locals(function);

        let mut dominators = DominatorTree::new(function);
        let loops = LoopDetection::run(function, &dominators);
        if self.config.enable_loop_peeling && peel_loops(function, &mut dominators, &loops) > 0 {
            LoopDetection::run(function, &dominators);
        }
        if cfg!(debug_assertions) {
            function.verify_cfg()?;
            dominators.verify(function)?;
        }
        dominators.compute_frontiers(function);

        let mut def_uses = DefUses::new(function);
        convert_to_ssa(function, &dominators, &mut def_uses);
        cleanup_phis(function, &mut def_uses);
        self.show_ir("SSA construction");

        let function = &mut self.function;
        let mut worklist = StatementWorklist::new(function);
        TypeInference::new(&mut def_uses, &mut worklist).run(function);
        ReverseInference::new(&mut def_uses).run(function);
        TypePropagation::new(&mut def_uses, &mut worklist).run(function);

        worklist.reset();
        optimize_ssa(function, &mut def_uses, &mut dominators, &mut worklist);
        if cfg!(debug_assertions) {
            verify_ssa(function, &dominators, &def_uses)?;
        }
        merge_basic_blocks(function, Some(&mut def_uses), Some(&mut dominators));
        cleanup_basic_blocks(function, Some(&mut def_uses));
        split_critical_edges(function, &mut dominators, &mut def_uses);
        // split back edges join their loop
        LoopDetection::run(function, &dominators);
        if cfg!(debug_assertions) {
            function.verify_cfg()?;
            dominators.verify(function)?;
        }
        self.show_ir("optimization");

        self.loop_ends = schedule_blocks(&mut self.function, &dominators);
        self.in_ssa = true;
        self.show_ir("scheduling");
        Ok(())
    }
}

/// Compiles one function to bytecode.
///
/// # Errors
///
/// Returns [`crate::Error::Unsupported`] for IR the back end cannot lower,
/// checked before any pass runs, and propagates verification and emission
/// failures.
///
/// # Examples
///
/// ```
/// use ssajit::{compile_function, ir::{AluOp, Expr, FunctionBuilder}, Config};
///
/// let mut b = FunctionBuilder::new("double");
/// let x = b.formal("x");
/// b.switch_to(b.entry());
/// b.ret(Expr::binop(AluOp::Add, x.clone(), x));
/// let compiled = compile_function(b.finish()?, &Config::default())?;
/// assert!(compiled.code_size() > 0);
/// # Ok::<(), ssajit::Error>(())
/// ```
pub fn compile_function(function: Function, config: &Config) -> Result<CompiledFunction> {
    can_compile(&function)?;

    let mut optimizer = Optimizer::new(function, config);
    optimizer.run()?;

    let mut frame = FrameLayout::default();
    if optimizer.is_in_ssa() {
        let intervals = optimizer.lifetime_intervals();
        if config.uses_register_allocation() {
            let usage = RegisterAllocator::new(config).run(optimizer.function_mut(), &intervals);
            convert_out_of_ssa(optimizer.function_mut());
            frame = FrameLayout {
                stack_slots: usage.stack_slots,
                gp_mask: usage.gp_mask,
                fp_mask: usage.fp_mask,
            };
        } else {
            if config.enable_register_allocation {
                warn!(
                    "{}: register allocation requested without registers, using stack slots",
                    optimizer.function().name
                );
            }
            frame.stack_slots = AllocateStackSlots::new(&intervals).run(optimizer.function_mut());
        }
    } else {
        frame.stack_slots = convert_temps(optimizer.function_mut());
    }
    optimizer.show_ir("allocation");

    let function = optimizer.into_function();
    let optional_jumps = calculate_optional_jumps(&function);
    Assembler::new(&function, &optional_jumps, config).assemble(frame)
}

/// Compiles every function of a module in parallel. Each function succeeds
/// or fails on its own; results are in input order.
#[must_use]
pub fn compile_module(functions: Vec<Function>, config: &Config) -> Vec<Result<CompiledFunction>> {
    debug!("compiling {} functions", functions.len());
    functions
        .into_par_iter()
        .map(|function| compile_function(function, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codegen::{Completion, PrimitiveRuntime, Value},
        ir::{AluOp, Expr, FunctionBuilder, StmtKind, TempKind},
        test::sum_loop,
    };

    #[test]
    fn test_sum_loop_reaches_scheduled_ssa() {
        let mut optimizer = Optimizer::new(sum_loop(), &Config::minimal());
        optimizer.run().unwrap();
        assert!(optimizer.is_in_ssa());
        assert_eq!(optimizer.loop_ends().len(), 1);

        let f = optimizer.function();
        let header = *optimizer.loop_ends().keys().next().unwrap();
        assert_eq!(f.phis(header).len(), 2);
        for id in f.phis(header) {
            let phi = f.stmt(id).as_phi().unwrap();
            assert!(phi.target.ty.is_number(), "{} is {}", phi.target, phi.target.ty);
        }
        assert!(!optimizer.lifetime_intervals().intervals().is_empty());
    }

    #[test]
    fn test_try_functions_stay_out_of_ssa() {
        let mut b = FunctionBuilder::new("f");
        let handler = b.handler();
        b.switch_to(b.entry());
        let body = b.protected_block(handler);
        b.jump(body);
        b.switch_to(body);
        b.ret(Expr::int(1));
        b.switch_to(handler);
        b.ret(Expr::int(2));

        let mut optimizer = Optimizer::new(b.finish().unwrap(), &Config::default());
        optimizer.run().unwrap();
        assert!(!optimizer.is_in_ssa());
    }

    #[test]
    fn test_sum_loop_runs_under_every_config() {
        for config in [Config::default(), Config::minimal(), Config::disabled()] {
            let compiled = compile_function(sum_loop(), &config).unwrap();
            let result = compiled
                .call(&mut PrimitiveRuntime::new(), &[Value::Int(4)])
                .unwrap();
            // 0 + 1 + 2 + 3
            assert_eq!(result.value().map(Value::to_number), Some(6.0), "{config:?}");
        }
    }

    #[test]
    fn test_register_allocation_rewrites_every_temp() {
        let config = Config::default();
        let mut optimizer = Optimizer::new(sum_loop(), &config);
        optimizer.run().unwrap();
        let intervals = optimizer.lifetime_intervals();
        RegisterAllocator::new(&config).run(optimizer.function_mut(), &intervals);
        convert_out_of_ssa(optimizer.function_mut());

        let f = optimizer.function();
        for block in f.blocks() {
            for stmt in f.statements(block.id) {
                assert!(!matches!(stmt.kind, StmtKind::Phi(_)));
                let mut stmt = stmt.clone();
                stmt.for_each_temp_mut(&mut |t| assert_ne!(t.kind, TempKind::VirtualRegister));
            }
        }
    }

    #[test]
    fn test_module_results_are_per_function() {
        let mut b = FunctionBuilder::new("bad");
        b.switch_to(b.entry());
        b.ret(Expr::binop(AluOp::Or, Expr::int(1), Expr::int(0)));
        let bad = b.finish().unwrap();

        let results = compile_module(vec![sum_loop(), bad], &Config::default());
        assert_eq!(results.len(), 2);
        let good = results[0].as_ref().unwrap();
        assert_eq!(good.name(), "f");
        assert!(matches!(results[1], Err(crate::Error::Unsupported(_))));
        assert!(matches!(
            good.call(&mut PrimitiveRuntime::new(), &[Value::Int(3)]),
            Ok(Completion::Normal(_))
        ));
    }
}
