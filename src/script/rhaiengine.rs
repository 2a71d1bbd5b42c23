use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FnPtr, Scope, AST};

use crate::light::Frame;
use crate::script::capabilities::{self, Capability, LightBuffer};
use crate::script::{ScriptEngine, ScriptError, StepFunction};

const ENTRY_POINT: &str = "main";

/// Wall-clock budget for a single call into a script.
#[derive(Clone)]
struct Watermark {
    deadline: Rc<Cell<Option<Instant>>>,
    budget: Duration,
}

impl Watermark {
    fn guard<T>(
        &self,
        call: impl FnOnce() -> Result<T, Box<EvalAltResult>>,
    ) -> Result<T, ScriptError> {
        self.deadline.set(Some(Instant::now() + self.budget));
        let result = call();
        self.deadline.set(None);

        result.map_err(|err| match *err {
            EvalAltResult::ErrorTerminated(..) => ScriptError::new(format!(
                "execution took longer than {} ms",
                self.budget.as_millis()
            )),
            err => ScriptError::new(err.to_string()),
        })
    }
}

/// Script engine for rhai programs. A program defines `fn main(lights)`,
/// which sets up the initial frame and returns the step function as a
/// closure or `Fn("name")` pointer:
///
/// ```text
/// fn main(lights) {
///     lights[0] = Light(1.0, 0.0, 0.0, 1.0);
///     |lights| { lights[0].a = 0.5; 30 }
/// }
/// ```
pub struct RhaiEngine {
    engine: Rc<Engine>,
    watermark: Watermark,
}

pub struct RhaiProgram {
    ast: AST,
    scope: Scope<'static>,
    buffer: LightBuffer,
}

pub struct RhaiStep {
    engine: Rc<Engine>,
    watermark: Watermark,
    ast: AST,
    buffer: LightBuffer,
    step: Result<FnPtr, String>,
}

impl RhaiEngine {
    pub fn new(capabilities: &[Capability], budget: Duration) -> RhaiEngine {
        let mut engine = Engine::new();

        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(1_000);
        engine.disable_symbol("eval");

        engine.on_print(|text| log::info!("Script: {text}"));
        engine.on_debug(|text, _, pos| log::debug!("Script {pos}: {text}"));

        let watermark = Watermark {
            deadline: Rc::new(Cell::new(None)),
            budget,
        };
        let deadline = Rc::clone(&watermark.deadline);
        engine.on_progress(move |ops| {
            if ops % 256 != 0 {
                return None;
            }
            match deadline.get() {
                Some(deadline) if Instant::now() > deadline => Some(Dynamic::UNIT),
                _ => None,
            }
        });

        capabilities::install(&mut engine, capabilities);

        RhaiEngine {
            engine: Rc::new(engine),
            watermark,
        }
    }
}

impl ScriptEngine for RhaiEngine {
    type Program = RhaiProgram;
    type Step = RhaiStep;

    fn compile(&self, source: &str) -> Result<RhaiProgram, ScriptError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|err| ScriptError::new(err.to_string()))?;

        // Top-level statements run once, as part of loading the program.
        let mut scope = Scope::new();
        self.watermark
            .guard(|| self.engine.run_ast_with_scope(&mut scope, &ast))?;

        Ok(RhaiProgram {
            ast,
            scope,
            buffer: LightBuffer::default(),
        })
    }

    fn initialize(
        &self,
        program: RhaiProgram,
        lights: &mut Frame,
    ) -> Result<RhaiStep, ScriptError> {
        let RhaiProgram {
            ast,
            mut scope,
            buffer,
        } = program;

        buffer.store(lights);
        let options = CallFnOptions::new().eval_ast(false);
        let result = self.watermark.guard(|| {
            self.engine.call_fn_with_options::<Dynamic>(
                options,
                &mut scope,
                &ast,
                ENTRY_POINT,
                (buffer.clone(),),
            )
        });
        *lights = buffer.load();
        let returned = result?;

        let step = if returned.is_fnptr() {
            Ok(returned.cast::<FnPtr>())
        } else {
            Err(format!(
                "{ENTRY_POINT} returned {} instead of a function",
                returned.type_name()
            ))
        };

        Ok(RhaiStep {
            engine: Rc::clone(&self.engine),
            watermark: self.watermark.clone(),
            ast,
            buffer,
            step,
        })
    }
}

impl StepFunction for RhaiStep {
    fn step(&mut self, lights: &mut Frame) -> Result<Option<f64>, ScriptError> {
        let step = match &self.step {
            Ok(step) => step,
            Err(msg) => return Err(ScriptError::new(msg.clone())),
        };

        self.buffer.store(lights);
        let result = self
            .watermark
            .guard(|| step.call::<Dynamic>(&self.engine, &self.ast, (self.buffer.clone(),)));
        *lights = self.buffer.load();
        let delay = result?;

        if let Ok(v) = delay.as_float() {
            return Ok(Some(v));
        }
        if let Ok(v) = delay.as_int() {
            return Ok(Some(v as f64));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::{blank_frame, Light};
    use crate::script::capabilities::DEFAULT_CAPABILITIES;

    fn engine() -> RhaiEngine {
        RhaiEngine::new(DEFAULT_CAPABILITIES, Duration::from_millis(100))
    }

    fn start(engine: &RhaiEngine, source: &str) -> Result<(RhaiStep, Frame), ScriptError> {
        let program = engine.compile(source)?;
        let mut lights = blank_frame();
        let step = engine.initialize(program, &mut lights)?;
        Ok((step, lights))
    }

    #[test]
    fn syntax_error_fails_compilation() {
        assert!(engine().compile("fn main(lights) {").is_err());
    }

    #[test]
    fn top_level_errors_fail_compilation() {
        assert!(engine().compile("let x = 1 / 0;").is_err());
    }

    #[test]
    fn missing_entry_point_fails_initialization() {
        let engine = engine();
        let program = engine.compile("let x = 1;").unwrap();
        assert!(engine.initialize(program, &mut blank_frame()).is_err());
    }

    #[test]
    fn closure_steps_through_frames() {
        let engine = engine();
        let (mut step, mut lights) = start(
            &engine,
            r#"
            fn main(lights) {
                lights[0] = Light(1.0, 0.0, 0.0, 1.0);
                |lights| {
                    lights[1].g = 0.5;
                    lights[2] = "not a light";
                    25
                }
            }
            "#,
        )
        .unwrap();

        assert_eq!(lights[0], Light::new(1.0, 0.0, 0.0, 1.0));

        lights[2] = Light::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(step.step(&mut lights).unwrap(), Some(25.0));
        assert_eq!(lights[0], Light::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(lights[1].g, 0.5);
        assert_eq!(lights[2], Light::default());
    }

    #[test]
    fn closure_state_survives_between_steps() {
        let engine = engine();
        let (mut step, mut lights) = start(
            &engine,
            r#"
            fn main(lights) {
                let count = 0;
                |lights| {
                    count += 1;
                    lights[0].r = count / 10.0;
                    -1 + count
                }
            }
            "#,
        )
        .unwrap();

        assert_eq!(step.step(&mut lights).unwrap(), Some(0.0));
        assert_eq!(step.step(&mut lights).unwrap(), Some(1.0));
        assert!((lights[0].r - 0.2).abs() < 1e-9);
    }

    #[test]
    fn named_step_function_and_non_numeric_delay() {
        let engine = engine();
        let (mut step, mut lights) = start(
            &engine,
            r#"
            fn main(lights) { Fn("step") }
            fn step(lights) { "soon" }
            "#,
        )
        .unwrap();

        assert_eq!(step.step(&mut lights).unwrap(), None);
    }

    #[test]
    fn non_function_step_fails_on_first_step() {
        let engine = engine();
        let (mut step, mut lights) = start(&engine, "fn main(lights) { 42 }").unwrap();
        let err = step.step(&mut lights).unwrap_err();
        assert!(err.to_string().contains("instead of a function"));
    }

    #[test]
    fn out_of_range_write_is_a_step_error() {
        let engine = engine();
        let (mut step, mut lights) = start(
            &engine,
            "fn main(lights) { |lights| { lights[lights.len] = Light(); 30 } }",
        )
        .unwrap();
        assert!(step.step(&mut lights).is_err());
    }

    #[test]
    fn runaway_step_hits_the_watermark() {
        let engine = RhaiEngine::new(DEFAULT_CAPABILITIES, Duration::from_millis(20));
        let (mut step, mut lights) =
            start(&engine, "fn main(lights) { |lights| { loop {} } }").unwrap();

        let err = step.step(&mut lights).unwrap_err();
        assert!(err.to_string().contains("longer than 20 ms"));
    }

    #[test]
    fn eval_is_not_available() {
        assert!(engine().compile(r#"eval("40 + 2")"#).is_err());
    }
}
