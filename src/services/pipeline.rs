use log::{error, info, warn};

use super::lifecycle::{ManagedTask, TaskHarness, TaskRoutine, TaskState};
use super::sink::{SinkSettings, SinkTask};
use super::source::{SourceSettings, SourceTask};
use crate::bus::Bus;
use crate::config::Config;
use crate::modbus::FieldBusEndpoint;
use crate::utils::error::GatewayError;

/// How every task of a pipeline ended.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub completed: Vec<String>,
    pub failed: Vec<(String, GatewayError)>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the Bus and every task wired to it.
pub struct Pipeline {
    bus: Option<Bus>,
    tasks: Vec<Box<dyn ManagedTask>>,
    init_failures: Vec<(String, GatewayError)>,
}

impl Pipeline {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus: Some(bus),
            tasks: Vec::new(),
            init_failures: Vec::new(),
        }
    }

    /// Builds and initializes one task per configured section.
    ///
    /// A missing section is logged and skipped. A section with invalid
    /// values is recorded as a failed task; the others still start.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let bus = Bus::new(config.bus.capacity)?;
        info!("🚌 Bus created with capacity {}", bus.capacity());
        let mut pipeline = Self::new(bus);

        match &config.influx_sink {
            Some(influx) => pipeline.add_sink("sink:influx", SinkSettings::influx(influx)),
            None => skip_missing("influx_sink"),
        }
        match &config.mqtt_sink {
            Some(mqtt) => pipeline.add_sink("sink:mqtt", SinkSettings::mqtt(mqtt)),
            None => skip_missing("mqtt_sink"),
        }
        match &config.console_sink {
            Some(console) => pipeline.add_sink("sink:console", SinkSettings::console(console)),
            None => skip_missing("console_sink"),
        }

        if config.modbus_sources.is_empty() {
            skip_missing("modbus_source");
        }
        for source in &config.modbus_sources {
            let name = format!("source:{}", source.name);
            match source.validate() {
                Ok(()) => {
                    pipeline.add::<SourceTask<FieldBusEndpoint>>(&name, SourceSettings::from(source));
                }
                Err(e) => pipeline.record_init_failure(name, e),
            }
        }

        info!(
            "📋 Pipeline ready: {} task(s), {} rejected",
            pipeline.tasks.len(),
            pipeline.init_failures.len()
        );
        Ok(pipeline)
    }

    /// Initializes a task on this pipeline's Bus. Returns whether it was added.
    pub fn add<R: TaskRoutine>(&mut self, name: &str, config: R::Config) -> bool {
        let bus = match &self.bus {
            Some(bus) => bus,
            None => {
                warn!("⚠️  Pipeline already running, task '{}' not added", name);
                return false;
            }
        };

        let mut harness = TaskHarness::<R>::new(name);
        match harness.init(config, bus) {
            Ok(()) => {
                self.tasks.push(Box::new(harness));
                true
            }
            Err(e) => {
                self.record_init_failure(name.to_string(), e);
                false
            }
        }
    }

    fn add_sink(&mut self, name: &str, settings: Result<SinkSettings, GatewayError>) {
        match settings {
            Ok(settings) => {
                self.add::<SinkTask>(name, settings);
            }
            Err(e) => self.record_init_failure(name.to_string(), e),
        }
    }

    fn record_init_failure(&mut self, name: String, err: GatewayError) {
        error!("❌ Task '{}' rejected: {}", name, err);
        self.init_failures.push((name, err));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Starts every task, then releases the pipeline's own Bus handle so
    /// sinks see the Bus close once every source has stopped.
    pub fn run_all(&mut self) {
        for task in self.tasks.iter_mut() {
            if let Err(e) = task.run() {
                error!("❌ Task '{}' failed to start: {}", task.name(), e);
                self.init_failures.push((task.name().to_string(), e));
            }
        }
        self.bus = None;
        info!("🚀 {} task(s) running", self.tasks.len());
    }

    /// Blocks until every running task has stopped.
    pub fn wait_all(&mut self) -> PipelineReport {
        let mut report = PipelineReport {
            completed: Vec::new(),
            failed: std::mem::take(&mut self.init_failures),
        };

        for task in self.tasks.iter_mut() {
            if task.state() != TaskState::Running {
                continue;
            }
            match task.wait() {
                Ok(()) => report.completed.push(task.name().to_string()),
                Err(e) => report.failed.push((task.name().to_string(), e)),
            }
        }

        info!(
            "📊 Pipeline stopped: {} completed, {} failed",
            report.completed.len(),
            report.failed.len()
        );
        for (name, e) in &report.failed {
            warn!("   ❌ {}: {} [{}]", name, e, e.as_label());
        }
        report
    }

    pub fn term_all(&mut self) {
        for mut task in self.tasks.drain(..) {
            if let Err(e) = task.term() {
                warn!("⚠️  {}", e);
            }
        }
    }
}

fn skip_missing(section: &str) {
    warn!(
        "⏭️  {}; task skipped",
        GatewayError::ConfigMissing(section.to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{ConsoleSinkConfig, ModbusSourceConfig};
    use crate::services::sink::tests::recording_settings;
    use crate::services::sink::FailurePolicy;
    use crate::services::source::tests::{flaky_settings, FlakyMeter};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_missing_sections_are_skipped() {
        let config = Config {
            console_sink: Some(ConsoleSinkConfig::default()),
            ..Config::default()
        };
        let mut pipeline = Pipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.task_count(), 1);

        pipeline.run_all();
        let report = pipeline.wait_all();
        pipeline.term_all();

        assert!(report.is_success());
        assert_eq!(report.completed, vec!["sink:console".to_string()]);
    }

    #[test]
    fn test_invalid_section_fails_without_blocking_others() {
        let config = Config {
            modbus_sources: vec![ModbusSourceConfig {
                slave_id: 0,
                ..ModbusSourceConfig::default()
            }],
            console_sink: Some(ConsoleSinkConfig::default()),
            ..Config::default()
        };
        let mut pipeline = Pipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.task_count(), 1);

        pipeline.run_all();
        let report = pipeline.wait_all();
        pipeline.term_all();

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "source:meter1");
        assert!(matches!(report.failed[0].1, GatewayError::Config(_)));
    }

    #[test]
    fn test_zero_capacity_bus_is_rejected() {
        let mut config = Config::default();
        config.bus.capacity = 0;
        assert!(Pipeline::from_config(&config).is_err());
    }

    #[test]
    fn test_source_failure_is_isolated() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(Bus::new(256).unwrap());
        assert!(pipeline.add::<SinkTask>(
            "sink:recorder",
            recording_settings(sent.clone(), vec![], FailurePolicy::Fatal),
        ));
        assert!(pipeline.add::<SourceTask<FlakyMeter>>("source:flaky", flaky_settings("flaky", 2)));
        assert!(pipeline.add::<SourceTask<FlakyMeter>>("source:steady", flaky_settings("steady", 60)));

        pipeline.run_all();
        let report = pipeline.wait_all();
        pipeline.term_all();

        // The flaky source contributed two readings; the steady one kept going.
        assert_eq!(sent.lock().unwrap().len(), 62);

        assert_eq!(report.completed, vec!["sink:recorder".to_string()]);
        let failed: Vec<&str> = report.failed.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["source:flaky", "source:steady"]);
        assert!(report
            .failed
            .iter()
            .all(|(_, e)| matches!(e, GatewayError::TransportRead(_))));
    }

    #[test]
    fn test_add_after_run_is_refused() {
        let mut pipeline = Pipeline::new(Bus::new(4).unwrap());
        pipeline.run_all();
        assert!(!pipeline.add::<SourceTask<FlakyMeter>>("late", flaky_settings("late", 1)));
        assert!(pipeline.wait_all().is_success());
    }
}
