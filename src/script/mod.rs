pub mod capabilities;
pub mod rhaiengine;

use thiserror::Error;

use crate::light::Frame;

/// Diagnostic from the script boundary. The runner decides which phase it
/// belongs to.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ScriptError {
    message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> ScriptError {
        ScriptError {
            message: message.into(),
        }
    }
}

/// Compiles and initializes user programs. Implementations only expose the
/// capabilities they were given and bound every call in time.
pub trait ScriptEngine {
    type Program;
    type Step: StepFunction;

    fn compile(&self, source: &str) -> Result<Self::Program, ScriptError>;

    /// Runs the program's entry point once on `lights` and hands back the
    /// per-tick step function it produced.
    fn initialize(
        &self,
        program: Self::Program,
        lights: &mut Frame,
    ) -> Result<Self::Step, ScriptError>;
}

pub trait StepFunction {
    /// Computes the next frame in place. Returns the delay in milliseconds
    /// until the next tick, or `None` if the script returned something that
    /// is not a number.
    fn step(&mut self, lights: &mut Frame) -> Result<Option<f64>, ScriptError>;
}
