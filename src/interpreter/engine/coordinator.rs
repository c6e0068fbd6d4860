//! Grid coordinator implementation.
//!
//! The engine runs one fresh [`IterationContext`] per point of the global
//! grid, sequentially, sharing only the caller's buffers between them.

use std::time::{Duration, Instant};

use crate::device::Buffer;
use crate::interpreter::core::CoreInterpreter;
use crate::interpreter::error::EmuResult;
use crate::interpreter::execute::MemoryPool;
use crate::interpreter::lanes::{grid_points, Warp};
use crate::interpreter::program::Program;
use crate::interpreter::state::IterationContext;
use crate::interpreter::value::Value;

/// Engine execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    /// No launch has run yet.
    #[default]
    Ready,
    /// The last launch ran every grid point.
    Completed,
    /// The last launch aborted with an error.
    Error,
}

/// Launch dimensions and scalar parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchParams {
    /// Global grid `[x, y, z]`; `z` is the outermost iteration axis.
    pub global_size: [usize; 3],
    /// Warp shape `[x, y, z]`.
    pub local_size: [usize; 3],
    /// Values bound, in order, by `DefineVar` instructions.
    pub vals: Vec<Value>,
    /// Measure wall-clock time of the launch.
    pub wait: bool,
}

impl Default for LaunchParams {
    fn default() -> Self {
        Self {
            global_size: [1, 1, 1],
            local_size: [1, 1, 1],
            vals: Vec::new(),
            wait: false,
        }
    }
}

impl LaunchParams {
    pub fn new(global_size: [usize; 3], local_size: [usize; 3]) -> Self {
        Self {
            global_size,
            local_size,
            ..Self::default()
        }
    }

    pub fn with_vals(mut self, vals: Vec<Value>) -> Self {
        self.vals = vals;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// Program execution entry point.
///
/// Coordinates execution of a validated program across the global grid.
pub struct InterpreterEngine<'p> {
    interpreter: CoreInterpreter<'p>,
    status: EngineStatus,
    /// Grid points executed across all launches.
    iterations: u64,
    /// Instructions executed across all launches.
    instructions: u64,
}

impl<'p> InterpreterEngine<'p> {
    /// Create an engine for `program`, validating its structure first.
    pub fn new(program: &'p Program) -> EmuResult<Self> {
        program.validate()?;
        Ok(Self {
            interpreter: CoreInterpreter::new(program),
            status: EngineStatus::Ready,
            iterations: 0,
            instructions: 0,
        })
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn program(&self) -> &Program {
        self.interpreter.program()
    }

    /// Run the program once per global grid point.
    ///
    /// Buffers bind, in order, to the program's global buffer definitions.
    /// Returns the elapsed wall-clock time when `params.wait` is set.
    pub fn launch(&mut self, bufs: &mut [Buffer], params: &LaunchParams) -> EmuResult<Option<Duration>> {
        log::debug!(
            "launch: global {:?} local {:?}, {} buffers, {} vals",
            params.global_size,
            params.local_size,
            bufs.len(),
            params.vals.len()
        );
        let start = Instant::now();

        match self.run_grid(bufs, params) {
            Ok(()) => self.status = EngineStatus::Completed,
            Err(e) => {
                self.status = EngineStatus::Error;
                return Err(e);
            }
        }

        let elapsed = start.elapsed();
        log::debug!("launch finished in {:?}", elapsed);
        Ok(params.wait.then_some(elapsed))
    }

    fn run_grid(&mut self, bufs: &mut [Buffer], params: &LaunchParams) -> EmuResult<()> {
        let warp = Warp::new(params.local_size);
        let program_len = self.program().len();

        for point in grid_points(params.global_size) {
            let mut ctx = IterationContext::new(
                program_len,
                point,
                &warp,
                MemoryPool::new(bufs),
                &params.vals,
            );
            let result = self.interpreter.run(&mut ctx);
            self.instructions += ctx.instructions;
            self.iterations += 1;
            result?;
        }
        Ok(())
    }
}
