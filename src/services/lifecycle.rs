//! Uniform init/run/wait/term state machine for background tasks.
//!
//! Every source and sink is a [`TaskRoutine`] driven by a [`TaskHarness`],
//! which owns the routine and the dedicated OS thread its loop runs on.

use log::{error, info};
use std::fmt;
use std::thread::{self, JoinHandle};

use crate::bus::Bus;
use crate::utils::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Uninitialized => write!(f, "uninitialized"),
            TaskState::Initialized => write!(f, "initialized"),
            TaskState::Running => write!(f, "running"),
            TaskState::Stopped => write!(f, "stopped"),
        }
    }
}

/// The loop a harness runs.
pub trait TaskRoutine: Sized + Send + 'static {
    type Config: Send;

    /// Validates `config`, takes ownership of it and binds to the Bus.
    fn init(config: Self::Config, bus: &Bus) -> Result<Self, GatewayError>;

    /// Runs until a fatal error, or until there is nothing left to do.
    fn run(&mut self) -> Result<(), GatewayError>;

    /// Releases whatever the routine still owns.
    fn term(self) {}
}

/// Object-safe view of a harness, so the pipeline can hold mixed tasks.
pub trait ManagedTask: Send {
    fn name(&self) -> &str;
    fn state(&self) -> TaskState;
    fn run(&mut self) -> Result<(), GatewayError>;
    fn wait(&mut self) -> Result<(), GatewayError>;
    fn term(&mut self) -> Result<(), GatewayError>;
}

type Outcome<R> = (Option<R>, Result<(), GatewayError>);

pub struct TaskHarness<R: TaskRoutine> {
    name: String,
    state: TaskState,
    routine: Option<R>,
    handle: Option<JoinHandle<Outcome<R>>>,
}

impl<R: TaskRoutine> TaskHarness<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: TaskState::Uninitialized,
            routine: None,
            handle: None,
        }
    }

    fn expect_state(&self, expected: TaskState, operation: &'static str) -> Result<(), GatewayError> {
        if self.state != expected {
            return Err(GatewayError::TaskState {
                task: self.name.clone(),
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: TaskState) {
        info!("🔄 Task '{}': {} -> {}", self.name, self.state, next);
        self.state = next;
    }

    pub fn init(&mut self, config: R::Config, bus: &Bus) -> Result<(), GatewayError> {
        self.expect_state(TaskState::Uninitialized, "init")?;
        let routine = R::init(config, bus).map_err(|e| {
            error!("❌ Task '{}' failed to initialize: {}", self.name, e);
            e
        })?;
        self.routine = Some(routine);
        self.transition(TaskState::Initialized);
        Ok(())
    }

    pub fn run(&mut self) -> Result<(), GatewayError> {
        self.expect_state(TaskState::Initialized, "run")?;
        let mut routine = match self.routine.take() {
            Some(routine) => routine,
            None => {
                return Err(GatewayError::TaskState {
                    task: self.name.clone(),
                    operation: "run",
                    state: self.state,
                })
            }
        };

        let name = self.name.clone();
        let spawned = thread::Builder::new().name(self.name.clone()).spawn(move || {
            let result = routine.run();
            match &result {
                Ok(()) => info!("🏁 Task '{}' finished", name),
                Err(e) => error!("❌ Task '{}' stopped: {} [{}]", name, e, e.as_label()),
            }
            (Some(routine), result)
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.transition(TaskState::Running);
                Ok(())
            }
            Err(e) => {
                self.transition(TaskState::Stopped);
                Err(GatewayError::Spawn {
                    task: self.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Blocks until the loop thread exits and returns its outcome.
    pub fn wait(&mut self) -> Result<(), GatewayError> {
        self.expect_state(TaskState::Running, "wait")?;
        let outcome = match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok((None, Ok(()))),
        };
        self.transition(TaskState::Stopped);

        match outcome {
            Ok((routine, result)) => {
                self.routine = routine;
                result
            }
            Err(_) => {
                error!("💥 Task '{}' panicked", self.name);
                Err(GatewayError::TaskPanicked(self.name.clone()))
            }
        }
    }

    pub fn term(&mut self) -> Result<(), GatewayError> {
        self.expect_state(TaskState::Stopped, "term")?;
        if let Some(routine) = self.routine.take() {
            routine.term();
        }
        self.transition(TaskState::Uninitialized);
        Ok(())
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<R: TaskRoutine> ManagedTask for TaskHarness<R> {
    fn name(&self) -> &str {
        TaskHarness::name(self)
    }

    fn state(&self) -> TaskState {
        TaskHarness::state(self)
    }

    fn run(&mut self) -> Result<(), GatewayError> {
        TaskHarness::run(self)
    }

    fn wait(&mut self) -> Result<(), GatewayError> {
        TaskHarness::wait(self)
    }

    fn term(&mut self) -> Result<(), GatewayError> {
        TaskHarness::term(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behaviour {
        Finish,
        Fail,
        Panic,
    }

    struct Scripted {
        behaviour: Behaviour,
        terms: Arc<AtomicUsize>,
    }

    impl TaskRoutine for Scripted {
        type Config = (Behaviour, Arc<AtomicUsize>);

        fn init((behaviour, terms): Self::Config, _bus: &Bus) -> Result<Self, GatewayError> {
            Ok(Self { behaviour, terms })
        }

        fn run(&mut self) -> Result<(), GatewayError> {
            match self.behaviour {
                Behaviour::Finish => Ok(()),
                Behaviour::Fail => Err(GatewayError::TransportRead("link lost".to_string())),
                Behaviour::Panic => panic!("loop blew up"),
            }
        }

        fn term(self) {
            self.terms.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Rejecting;

    impl TaskRoutine for Rejecting {
        type Config = ();

        fn init(_: (), _bus: &Bus) -> Result<Self, GatewayError> {
            Err(GatewayError::Config("bad value".to_string()))
        }

        fn run(&mut self) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn bus() -> Bus {
        Bus::new(4).unwrap()
    }

    #[test]
    fn test_full_lifecycle() {
        let terms = Arc::new(AtomicUsize::new(0));
        let mut task = TaskHarness::<Scripted>::new("ok");
        assert_eq!(task.state(), TaskState::Uninitialized);

        task.init((Behaviour::Finish, terms.clone()), &bus()).unwrap();
        assert_eq!(task.state(), TaskState::Initialized);
        task.run().unwrap();
        assert_eq!(task.state(), TaskState::Running);
        task.wait().unwrap();
        assert_eq!(task.state(), TaskState::Stopped);
        task.term().unwrap();
        assert_eq!(terms.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_out_of_order_operations_rejected() {
        let mut task = TaskHarness::<Scripted>::new("early");
        assert!(matches!(
            task.run(),
            Err(GatewayError::TaskState { operation: "run", state: TaskState::Uninitialized, .. })
        ));
        assert!(task.wait().is_err());
        assert!(task.term().is_err());

        task.init((Behaviour::Finish, Arc::new(AtomicUsize::new(0))), &bus()).unwrap();
        assert!(matches!(
            task.init((Behaviour::Finish, Arc::new(AtomicUsize::new(0))), &bus()),
            Err(GatewayError::TaskState { operation: "init", .. })
        ));
    }

    #[test]
    fn test_term_before_wait_rejected() {
        let mut task = TaskHarness::<Scripted>::new("busy");
        task.init((Behaviour::Finish, Arc::new(AtomicUsize::new(0))), &bus()).unwrap();
        task.run().unwrap();

        assert!(matches!(
            task.term(),
            Err(GatewayError::TaskState { operation: "term", state: TaskState::Running, .. })
        ));
        task.wait().unwrap();
        task.term().unwrap();
    }

    #[test]
    fn test_failed_init_stays_uninitialized() {
        let mut task = TaskHarness::<Rejecting>::new("rejecting");
        assert!(matches!(task.init((), &bus()), Err(GatewayError::Config(_))));
        assert_eq!(task.state(), TaskState::Uninitialized);
    }

    #[test]
    fn test_loop_error_returned_from_wait() {
        let terms = Arc::new(AtomicUsize::new(0));
        let mut task = TaskHarness::<Scripted>::new("failing");
        task.init((Behaviour::Fail, terms.clone()), &bus()).unwrap();
        task.run().unwrap();

        assert!(matches!(task.wait(), Err(GatewayError::TransportRead(_))));
        task.term().unwrap();
        assert_eq!(terms.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_reported_by_wait() {
        let terms = Arc::new(AtomicUsize::new(0));
        let mut task = TaskHarness::<Scripted>::new("panicking");
        task.init((Behaviour::Panic, terms.clone()), &bus()).unwrap();
        task.run().unwrap();

        assert!(matches!(task.wait(), Err(GatewayError::TaskPanicked(ref name)) if name == "panicking"));
        assert_eq!(task.state(), TaskState::Stopped);
        task.term().unwrap();
        assert_eq!(terms.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_leaves_other_tasks_running() {
        let terms = Arc::new(AtomicUsize::new(0));
        let bus = bus();
        let mut panicking = TaskHarness::<Scripted>::new("panicking");
        let mut steady = TaskHarness::<Scripted>::new("steady");
        panicking.init((Behaviour::Panic, terms.clone()), &bus).unwrap();
        steady.init((Behaviour::Finish, terms.clone()), &bus).unwrap();

        panicking.run().unwrap();
        steady.run().unwrap();

        assert!(matches!(panicking.wait(), Err(GatewayError::TaskPanicked(_))));
        assert!(steady.wait().is_ok());
        steady.term().unwrap();
        assert_eq!(terms.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_profile_unwinds_on_panic() {
        // Aborting would take every task down with the one that panicked.
        let manifest = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        assert!(!manifest
            .lines()
            .any(|line| line.trim_start().starts_with("panic") && line.contains("\"abort\"")));
    }
}
