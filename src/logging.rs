use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

fn default_filter_expression(level: &str) -> String {
    format!("warn,duroflow={level}")
}

/// Install a global `tracing` subscriber. Fails if one is already set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to initialize JSON logging: {e}")),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| format!("Failed to initialize pretty logging: {e}")),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("Failed to initialize compact logging: {e}")),
    }
}

// Execution-scoped logging: `$scope` is anything with `workflow_name()` and
// `execution_id()`, such as a `WorkflowContext` or `WorkflowInstance`.

#[macro_export]
macro_rules! workflow_info {
    ($scope:expr, $($arg:tt)+) => {{
        ::tracing::info!(
            workflow = %$scope.workflow_name(),
            execution_id = %$scope.execution_id(),
            $($arg)+
        );
    }};
}

#[macro_export]
macro_rules! workflow_warn {
    ($scope:expr, $($arg:tt)+) => {{
        ::tracing::warn!(
            workflow = %$scope.workflow_name(),
            execution_id = %$scope.execution_id(),
            $($arg)+
        );
    }};
}

#[macro_export]
macro_rules! workflow_error {
    ($scope:expr, $($arg:tt)+) => {{
        ::tracing::error!(
            workflow = %$scope.workflow_name(),
            execution_id = %$scope.execution_id(),
            $($arg)+
        );
    }};
}
