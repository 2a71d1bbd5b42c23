use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::light::{blank_frame, Frame};
use crate::processor::fade_factor;
use crate::runinfo::{CurrentRun, RunInfo};
use crate::script::{ScriptEngine, StepFunction};
use crate::timerqueue::{Clock, TimerQueue};
use crate::transport::{FrameSink, Strand};

const FIRST_CANCEL_POLL: Duration = Duration::from_millis(50);
const CANCEL_POLL: Duration = Duration::from_millis(100);
const DEFAULT_DELAY: Duration = Duration::from_millis(30);
const MIN_DELAY: Duration = Duration::from_millis(1);
/// Longest delay a timer accepts; anything above fires almost immediately.
const MAX_DELAY_MS: f64 = i32::MAX as f64;

/// How a run ended. The `Display` text is what `after` receives.
#[derive(Debug, Error, PartialEq)]
pub enum Termination {
    #[error("Error during compilation: {0}")]
    Compile(String),
    #[error("Error during initialization: {0}")]
    Initialization(String),
    #[error("Error in step function: {0}")]
    Step(String),
    #[error("Time's up")]
    Timeout,
    #[error("Canceled")]
    Canceled,
    #[error("Completed")]
    Completed,
}

impl Termination {
    pub fn status(&self) -> i32 {
        match self {
            Termination::Compile(_) | Termination::Initialization(_) | Termination::Step(_) => -1,
            Termination::Timeout | Termination::Canceled | Termination::Completed => 0,
        }
    }
}

pub struct RunParams {
    pub code: String,
    pub limit: Duration,
    pub cancel: Box<dyn FnMut() -> bool + Send>,
    pub after: Box<dyn FnOnce(i32, String) + Send>,
    pub fade: bool,
}

impl RunParams {
    /// `limit_seconds` that are negative or NaN give the run no time at all.
    pub fn new(
        code: impl Into<String>,
        limit_seconds: f64,
        cancel: impl FnMut() -> bool + Send + 'static,
        after: impl FnOnce(i32, String) + Send + 'static,
    ) -> RunParams {
        let limit = if limit_seconds.is_nan() || limit_seconds <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(limit_seconds).unwrap_or(Duration::MAX)
        };

        RunParams {
            code: code.into(),
            limit,
            cancel: Box::new(cancel),
            after: Box::new(after),
            fade: false,
        }
    }

    pub fn with_fade(mut self, fade: bool) -> RunParams {
        self.fade = fade;
        self
    }
}

/// Generation counter. Exactly one run id is current at a time, and every
/// terminal transition moves the epoch past it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunEpoch(u64);

impl RunEpoch {
    fn advance(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.0 == id
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug)]
enum Tick {
    Timeout,
    CancelPoll,
    Step,
}

#[derive(Debug)]
struct Continuation {
    id: u64,
    tick: Tick,
}

#[derive(Debug, PartialEq)]
enum Next {
    Complete,
    After(Duration),
}

/// Interprets the step function's return value. Like a host timer, any
/// delay below 1 ms waits 1 ms.
fn next_tick(delay: Option<f64>) -> Next {
    match delay {
        None => Next::After(DEFAULT_DELAY),
        Some(ms) if ms.is_nan() => Next::After(MIN_DELAY),
        Some(ms) if ms < 0.0 => Next::Complete,
        Some(ms) if ms < 1.0 || ms > MAX_DELAY_MS => Next::After(MIN_DELAY),
        Some(ms) => Next::After(Duration::from_micros((ms * 1000.0).round() as u64)),
    }
}

/// Fade factor for a frame sent `elapsed` into a run. Anything below 1
/// keeps the strand's previous frame as the cross-fade source.
fn fade_at(enabled: bool, elapsed: Duration) -> f64 {
    if enabled {
        fade_factor(elapsed)
    } else {
        1.0
    }
}

struct ActiveRun<F> {
    id: u64,
    cancel: Box<dyn FnMut() -> bool + Send>,
    after: Box<dyn FnOnce(i32, String) + Send>,
    fade: bool,
    step: F,
    lights: Frame,
    started: Duration,
}

pub enum Command {
    Start(RunParams),
    SetHost(String),
    AddSubscriber(Box<dyn FrameSink + Send>),
    Shutdown,
}

/// Single-threaded scheduler for lightshow runs. All continuations live in
/// one timer queue and carry the id of the run that armed them; anything
/// armed by a run that is no longer current is dropped unseen.
pub struct Runner<E: ScriptEngine, S: Strand, C: Clock> {
    engine: E,
    strand: S,
    clock: C,
    epoch: RunEpoch,
    timers: TimerQueue<Continuation>,
    active: Option<ActiveRun<E::Step>>,
    current: CurrentRun,
}

impl<E: ScriptEngine, S: Strand, C: Clock> Runner<E, S, C> {
    pub fn new(engine: E, strand: S, clock: C, current: CurrentRun) -> Runner<E, S, C> {
        Runner {
            engine,
            strand,
            clock,
            epoch: RunEpoch::default(),
            timers: TimerQueue::new(),
            active: None,
            current,
        }
    }

    pub fn epoch(&self) -> RunEpoch {
        self.epoch
    }

    pub fn strand(&self) -> &S {
        &self.strand
    }

    /// Retires whatever is running and starts `params`. Returns -1 if the
    /// new run already failed, 0 otherwise.
    pub fn start(&mut self, params: RunParams) -> i32 {
        let RunParams {
            code,
            limit,
            cancel,
            after,
            fade,
        } = params;

        let id = self.epoch.advance();
        let now = self.clock.now();
        if let Some(previous) = self.active.take() {
            log::info!("Run {} replaced by run {id}", previous.id);
        }
        self.drop_stale_timers();

        self.timers.schedule(
            now,
            limit,
            Continuation {
                id,
                tick: Tick::Timeout,
            },
        );
        self.timers.schedule(
            now,
            FIRST_CANCEL_POLL,
            Continuation {
                id,
                tick: Tick::CancelPoll,
            },
        );
        self.publish(RunInfo::new(id, &code, limit, fade));
        log::info!("Starting run {id}, limit {:.1} s", limit.as_secs_f64());

        let program = match self.engine.compile(&code) {
            Ok(program) => program,
            Err(err) => return self.abort(after, Termination::Compile(err.to_string())),
        };

        let mut lights = blank_frame();
        let step = match self.engine.initialize(program, &mut lights) {
            Ok(step) => step,
            Err(err) => return self.abort(after, Termination::Initialization(err.to_string())),
        };
        self.strand.emit(&lights, fade_at(fade, Duration::ZERO));

        self.active = Some(ActiveRun {
            id,
            cancel,
            after,
            fade,
            step,
            lights,
            started: now,
        });
        self.run_step().unwrap_or(0)
    }

    /// Runs every continuation that is due. Continuations armed while doing
    /// so wait for the next call, even with a zero delay.
    pub fn fire_due(&mut self) {
        let now = self.clock.now();
        let mut due = Vec::new();
        while let Some(continuation) = self.timers.pop_due(now) {
            due.push(continuation);
        }

        for Continuation { id, tick } in due {
            if !self.epoch.is_current(id) {
                log::debug!("Ignoring {tick:?} of retired run {id}");
                continue;
            }

            match tick {
                Tick::Timeout => {
                    self.terminate(Termination::Timeout);
                }
                Tick::CancelPoll => self.poll_cancel(id),
                Tick::Step => {
                    self.run_step();
                }
            }
        }
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.timers.next_due()
    }

    fn poll_cancel(&mut self, id: u64) {
        let Some(run) = self.active.as_mut() else {
            return;
        };

        if (run.cancel)() {
            self.terminate(Termination::Canceled);
        } else {
            let now = self.clock.now();
            self.timers.schedule(
                now,
                CANCEL_POLL,
                Continuation {
                    id,
                    tick: Tick::CancelPoll,
                },
            );
        }
    }

    /// One tick of the active run. Returns the status if the run ended.
    fn run_step(&mut self) -> Option<i32> {
        let now = self.clock.now();
        let run = self.active.as_mut()?;
        let id = run.id;

        let delay = match run.step.step(&mut run.lights) {
            Ok(delay) => delay,
            Err(err) => return Some(self.terminate(Termination::Step(err.to_string()))),
        };
        let next = next_tick(delay);

        self.strand
            .emit(&run.lights, fade_at(run.fade, now.saturating_sub(run.started)));

        match next {
            Next::Complete => Some(self.terminate(Termination::Completed)),
            Next::After(delay) => {
                self.timers.schedule(
                    now,
                    delay,
                    Continuation {
                        id,
                        tick: Tick::Step,
                    },
                );
                None
            }
        }
    }

    fn terminate(&mut self, termination: Termination) -> i32 {
        self.epoch.advance();
        self.drop_stale_timers();
        match self.active.take() {
            Some(run) => self.report(run.after, termination),
            None => termination.status(),
        }
    }

    /// Ends a run that failed before it became active.
    fn abort(
        &mut self,
        after: Box<dyn FnOnce(i32, String) + Send>,
        termination: Termination,
    ) -> i32 {
        self.epoch.advance();
        self.drop_stale_timers();
        self.report(after, termination)
    }

    /// Forgets continuations of runs that are no longer current, so a
    /// long time limit does not outlive its run in the queue.
    fn drop_stale_timers(&mut self) {
        let epoch = self.epoch;
        self.timers.retain(|continuation| epoch.is_current(continuation.id));
    }

    fn report(
        &mut self,
        after: Box<dyn FnOnce(i32, String) + Send>,
        termination: Termination,
    ) -> i32 {
        let status = termination.status();
        let message = termination.to_string();
        if status < 0 {
            log::warn!("{message}");
        } else {
            log::info!("Run finished: {message}");
        }

        if let Some(info) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            info.finish(status, &message);
        }

        after(status, message);
        status
    }

    fn publish(&self, info: RunInfo) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Applies one command. Returns false once the runner should stop.
    pub fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Start(params) => {
                self.start(params);
            }
            Command::SetHost(host) => {
                if let Err(err) = self.strand.set_host(&host) {
                    log::error!("Cannot persist strand host {host}: {err}");
                }
            }
            Command::AddSubscriber(sink) => self.strand.add_subscriber(sink),
            Command::Shutdown => return false,
        }
        true
    }

    /// Event loop: sleeps until the next timer or command.
    pub fn run(mut self, commands: Receiver<Command>) {
        loop {
            self.fire_due();

            let command = match self.timers.next_due() {
                Some(due) => {
                    let wait = due.saturating_sub(self.clock.now());
                    match commands.recv_timeout(wait) {
                        Ok(command) => command,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match commands.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            if !self.handle(command) {
                break;
            }
        }
        log::info!("Runner stopped");
    }
}

/// Thread-safe front of a [`Runner`] running on its own thread.
#[derive(Clone)]
pub struct RunnerHandle {
    commands: Sender<Command>,
    current: CurrentRun,
}

impl RunnerHandle {
    /// Builds the runner on a new thread, so engines that are not `Send`
    /// can be used.
    pub fn spawn<E, S, C, F>(build: F) -> io::Result<(RunnerHandle, JoinHandle<()>)>
    where
        E: ScriptEngine + 'static,
        S: Strand + 'static,
        C: Clock + 'static,
        F: FnOnce(CurrentRun) -> Runner<E, S, C> + Send + 'static,
    {
        let (commands, receiver) = mpsc::channel();
        let current = CurrentRun::default();
        let shared = Arc::clone(&current);

        let thread = thread::Builder::new()
            .name("Runner".to_string())
            .spawn(move || build(shared).run(receiver))?;

        Ok((RunnerHandle { commands, current }, thread))
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("Runner is gone, command dropped");
        }
    }

    pub fn start(&self, params: RunParams) {
        self.send(Command::Start(params));
    }

    pub fn set_host(&self, host: &str) {
        self.send(Command::SetHost(host.to_string()));
    }

    pub fn add_subscriber(&self, sink: Box<dyn FrameSink + Send>) {
        self.send(Command::AddSubscriber(sink));
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn current(&self) -> Option<RunInfo> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
