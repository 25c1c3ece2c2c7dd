//! Binding context shared by every wrapper

use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::config::BindingConfig;
use crate::native::{NativeEngine, UserDataCallbacks};
use crate::pressure::{PressureAccountant, PressureSink, TracingSink};
use crate::report::{ErrorReporter, TracingReporter};
use crate::userdata::UserDataRegistry;

/// Runtime state shared by all wrappers over one engine.
///
/// Built once per engine and handed around as `Rc<BindingContext>`. Building
/// it installs the user-data registry as the engine's callback table.
pub struct BindingContext {
    engine: Rc<dyn NativeEngine>,
    config: BindingConfig,
    pressure: PressureAccountant,
    user_data: Rc<UserDataRegistry>,
    reporter: Rc<dyn ErrorReporter>,
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingContext")
            .field("config", &self.config)
            .field("pressure", &self.pressure)
            .field("user_data", &self.user_data)
            .finish_non_exhaustive()
    }
}

impl BindingContext {
    /// Create a context with default settings.
    pub fn new(engine: Rc<dyn NativeEngine>) -> Rc<Self> {
        Self::builder(engine).build()
    }

    /// Start configuring a context.
    pub fn builder(engine: Rc<dyn NativeEngine>) -> BindingContextBuilder {
        BindingContextBuilder {
            engine,
            config: BindingConfig::default(),
            sink: None,
            reporter: None,
        }
    }

    /// The native engine.
    pub fn engine(&self) -> &dyn NativeEngine {
        self.engine.as_ref()
    }

    /// Active configuration.
    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Memory pressure totals.
    pub fn pressure(&self) -> &PressureAccountant {
        &self.pressure
    }

    /// The user-data registry.
    pub fn user_data(&self) -> &UserDataRegistry {
        &self.user_data
    }

    /// Channel for failures that cannot be returned to a caller.
    pub fn reporter(&self) -> &dyn ErrorReporter {
        self.reporter.as_ref()
    }
}

/// Builder for [`BindingContext`].
pub struct BindingContextBuilder {
    engine: Rc<dyn NativeEngine>,
    config: BindingConfig,
    sink: Option<Box<dyn PressureSink>>,
    reporter: Option<Rc<dyn ErrorReporter>>,
}

impl BindingContextBuilder {
    /// Use `config` instead of the defaults.
    pub fn with_config(mut self, config: BindingConfig) -> Self {
        self.config = config;
        self
    }

    /// Forward pressure deltas to `sink` instead of the tracing sink.
    pub fn with_pressure_sink(mut self, sink: impl PressureSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Send hook failures to `reporter` instead of the tracing reporter.
    pub fn with_reporter(mut self, reporter: Rc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Finish and install the user-data callbacks on the engine.
    pub fn build(self) -> Rc<BindingContext> {
        let reporter = self
            .reporter
            .unwrap_or_else(|| Rc::new(TracingReporter) as Rc<dyn ErrorReporter>);
        let sink = self.sink.unwrap_or_else(|| Box::new(TracingSink));
        let user_data = Rc::new(UserDataRegistry::new(self.engine.clone(), reporter.clone()));
        let callbacks: Weak<dyn UserDataCallbacks> = Rc::downgrade(&user_data) as Weak<dyn UserDataCallbacks>;
        self.engine.set_user_data_callbacks(callbacks);
        debug!(
            memory_pressure = self.config.memory_pressure,
            report_after_mutation = self.config.report_after_mutation,
            "binding context ready"
        );
        Rc::new(BindingContext {
            pressure: PressureAccountant::new(self.config.memory_pressure, sink),
            engine: self.engine,
            config: self.config,
            user_data,
            reporter,
        })
    }
}
