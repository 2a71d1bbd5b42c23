//! What a user script may touch. Nothing outside this list is registered
//! with the engine, so scripts have no ambient file, process or network
//! access.
//!
//! - `Window`: the `window` module, a placeholder for the browser global
//!   that scripts written for the web editor reference
//!   (`window::runnerWindow`, `window::protect()`).
//! - `Light`: the `Light(...)` constructor.
//! - `Osc`: `osc_connect("host:port")` returning a sender with
//!   `send(addr, value)`.

use std::cell::RefCell;
use std::rc::Rc;

use rhai::{Dynamic, Engine, EvalAltResult, Map, Module, Position, FLOAT, INT};
use rosc::OscType;

use crate::light::{sanitize, Frame, Light};
use crate::osc::OscSender;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Window,
    Light,
    Osc,
}

pub const DEFAULT_CAPABILITIES: &[Capability] =
    &[Capability::Window, Capability::Light, Capability::Osc];

/// The light array as the script sees it. Slots are untyped so a script can
/// put anything in them; [`LightBuffer::load`] turns them back into a frame.
#[derive(Clone, Default)]
pub struct LightBuffer(Rc<RefCell<Vec<Dynamic>>>);

impl LightBuffer {
    pub fn store(&self, lights: &[Light]) {
        let mut slots = self.0.borrow_mut();
        slots.clear();
        slots.extend(lights.iter().map(|light| Dynamic::from(*light)));
    }

    pub fn load(&self) -> Frame {
        let slots = self.0.borrow();
        sanitize(slots.iter().map(|slot| slot.clone().try_cast::<Light>()))
    }

    fn len(&self) -> usize {
        self.0.borrow().len()
    }

    fn slot(&self, idx: INT) -> Result<usize, Box<EvalAltResult>> {
        let len = self.len();
        match usize::try_from(idx) {
            Ok(i) if i < len => Ok(i),
            _ => Err(EvalAltResult::ErrorArrayBounds(len, idx, Position::NONE).into()),
        }
    }

    fn get(&self, idx: INT) -> Result<Dynamic, Box<EvalAltResult>> {
        let i = self.slot(idx)?;
        Ok(self.0.borrow()[i].clone())
    }

    fn set(&self, idx: INT, value: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let i = self.slot(idx)?;
        self.0.borrow_mut()[i] = value;
        Ok(())
    }
}

fn number(value: &Dynamic) -> Result<FLOAT, Box<EvalAltResult>> {
    if let Ok(v) = value.as_float() {
        return Ok(v);
    }
    if let Ok(v) = value.as_int() {
        return Ok(v as FLOAT);
    }
    Err(format!("expected a number, got {}", value.type_name()).into())
}

fn register_channel(
    engine: &mut Engine,
    name: &str,
    get: fn(&Light) -> f64,
    set: fn(&mut Light, f64),
) {
    engine
        .register_get(name, move |light: &mut Light| get(light))
        .register_set(name, move |light: &mut Light, v: FLOAT| set(light, v))
        .register_set(name, move |light: &mut Light, v: INT| set(light, v as FLOAT));
}

/// The light value type and the array it lives in. Always present, the
/// runner cannot work without them.
pub fn register_lights(engine: &mut Engine) {
    engine
        .register_type_with_name::<Light>("Light")
        .register_fn("to_string", |light: &mut Light| {
            format!(
                "Light({}, {}, {}, {})",
                light.r, light.g, light.b, light.a
            )
        });
    register_channel(engine, "r", |l| l.r, |l, v| l.r = v);
    register_channel(engine, "g", |l| l.g, |l, v| l.g = v);
    register_channel(engine, "b", |l| l.b, |l, v| l.b = v);
    register_channel(engine, "a", |l| l.a, |l, v| l.a = v);

    engine
        .register_type_with_name::<LightBuffer>("Lights")
        .register_indexer_get(|buf: &mut LightBuffer, idx: INT| buf.get(idx))
        .register_indexer_set(|buf: &mut LightBuffer, idx: INT, value: Dynamic| {
            buf.set(idx, value)
        })
        .register_get("len", |buf: &mut LightBuffer| buf.len() as INT)
        .register_fn("len", |buf: &mut LightBuffer| buf.len() as INT);
}

fn register_window(engine: &mut Engine) {
    let mut window = Module::new();
    window.set_var("runnerWindow", Map::new());
    window.set_native_fn("protect", || -> Result<bool, Box<EvalAltResult>> { Ok(false) });
    engine.register_static_module("window", window.into());
}

fn register_light_constructor(engine: &mut Engine) {
    engine
        .register_fn("Light", Light::default)
        .register_fn(
            "Light",
            |r: Dynamic, g: Dynamic, b: Dynamic| -> Result<Light, Box<EvalAltResult>> {
                Ok(Light::new(number(&r)?, number(&g)?, number(&b)?, 1.0))
            },
        )
        .register_fn(
            "Light",
            |r: Dynamic,
             g: Dynamic,
             b: Dynamic,
             a: Dynamic|
             -> Result<Light, Box<EvalAltResult>> {
                Ok(Light::new(
                    number(&r)?,
                    number(&g)?,
                    number(&b)?,
                    number(&a)?,
                ))
            },
        );
}

fn osc_args(value: Dynamic) -> Result<Vec<OscType>, Box<EvalAltResult>> {
    if value.is_array() {
        let mut args = Vec::new();
        for item in value.cast::<rhai::Array>() {
            args.extend(osc_args(item)?);
        }
        return Ok(args);
    }
    if let Ok(v) = value.as_float() {
        return Ok(vec![OscType::Float(v as f32)]);
    }
    if let Ok(v) = value.as_int() {
        return Ok(vec![OscType::Int(v as i32)]);
    }
    if let Ok(v) = value.as_bool() {
        return Ok(vec![OscType::Bool(v)]);
    }
    if value.is_string() {
        return Ok(vec![OscType::String(value.to_string())]);
    }
    Err(format!("cannot send {} over OSC", value.type_name()).into())
}

fn register_osc(engine: &mut Engine) {
    engine
        .register_type_with_name::<OscSender>("OscSender")
        .register_fn(
            "osc_connect",
            |dst: &str| -> Result<OscSender, Box<EvalAltResult>> {
                OscSender::new(dst).map_err(|err| format!("cannot connect to {dst}: {err}").into())
            },
        )
        .register_fn(
            "send",
            |sender: &mut OscSender, addr: &str, value: Dynamic| -> Result<bool, Box<EvalAltResult>> {
                let args = osc_args(value)?;
                match sender.send(addr, args) {
                    Ok(()) => Ok(true),
                    Err(err) => {
                        log::warn!("OSC send to {} failed: {err}", sender.dst_addr());
                        Ok(false)
                    }
                }
            },
        );
}

pub fn install(engine: &mut Engine, capabilities: &[Capability]) {
    register_lights(engine);

    for capability in capabilities {
        match capability {
            Capability::Window => register_window(engine),
            Capability::Light => register_light_constructor(engine),
            Capability::Osc => register_osc(engine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::{blank_frame, LIGHT_COUNT};

    #[test]
    fn buffer_load_sanitizes_slots() {
        let buffer = LightBuffer::default();
        buffer.store(&blank_frame());
        buffer.set(4, Dynamic::from(Light::new(0.0, 1.0, 0.0, 1.0))).unwrap();
        buffer.set(5, Dynamic::from(42 as INT)).unwrap();

        let frame = buffer.load();
        assert_eq!(frame.len(), LIGHT_COUNT);
        assert_eq!(frame[4], Light::new(0.0, 1.0, 0.0, 1.0));
        assert_eq!(frame[5], Light::default());
    }

    #[test]
    fn buffer_rejects_out_of_range_index() {
        let buffer = LightBuffer::default();
        buffer.store(&blank_frame());
        assert!(buffer.get(LIGHT_COUNT as INT).is_err());
        assert!(buffer.set(-1, Dynamic::UNIT).is_err());
    }

    #[test]
    fn osc_args_flatten_arrays() {
        let value: Dynamic = vec![Dynamic::from(1.5 as FLOAT), Dynamic::from(2 as INT)].into();
        let args = osc_args(value).unwrap();
        assert!(matches!(args[..], [OscType::Float(_), OscType::Int(2)]));
    }

    #[test]
    fn constructor_is_only_there_when_allowed() {
        let mut engine = Engine::new();
        install(&mut engine, &[Capability::Window]);
        assert!(engine.eval::<Light>("Light(1, 0, 0, 1)").is_err());

        let mut engine = Engine::new();
        install(&mut engine, DEFAULT_CAPABILITIES);
        let light = engine.eval::<Light>("Light(1, 0, 0.5, 1)").unwrap();
        assert_eq!(light, Light::new(1.0, 0.0, 0.5, 1.0));
    }

    #[test]
    fn window_placeholder_is_harmless() {
        let mut engine = Engine::new();
        install(&mut engine, &[Capability::Window]);
        assert!(!engine.eval::<bool>("window::protect()").unwrap());
        assert!(engine.eval::<Map>("window::runnerWindow").unwrap().is_empty());
    }
}
