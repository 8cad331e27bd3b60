//! Configuration for telemetry bootstrap.
//!
//! Supports:
//! - CLI arguments via clap (flattened into the host binary's parser)
//! - Environment variable overrides, including the standard `OTEL_*` names
//! - Defaults that work without a collector

use clap::Args;

use crate::error::TelemetryError;

/// Telemetry settings: service identity, export target and sampling.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Application name, used as service name and instrumentation scope
    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = "beacon")]
    pub service_name: String,

    /// Application version (optional)
    #[arg(long, env = "OTEL_SERVICE_VERSION")]
    pub service_version: Option<String>,

    /// OpenTelemetry collector endpoint for trace and metric export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,

    /// Fraction of activities to sample, between 0 and 1
    #[arg(long, env = "BEACON_SAMPLE_RATIO", default_value_t = 1.0)]
    pub sample_ratio: f64,

    /// Period of the metric export cycle in seconds
    #[arg(long, env = "BEACON_EXPORT_INTERVAL_SECS", default_value_t = 10)]
    pub export_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl TelemetryConfig {
    /// Default configuration for the named service.
    pub fn for_service(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.service_name.trim().is_empty() {
            return Err(TelemetryError::InvalidArgument(
                "service name must not be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sample_ratio) {
            return Err(TelemetryError::InvalidArgument(format!(
                "sample ratio must be between 0 and 1, got {}",
                self.sample_ratio
            )));
        }
        if self.export_interval_secs == 0 {
            return Err(TelemetryError::InvalidArgument(
                "export interval must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Create a configuration for testing: no exporter, everything sampled.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            service_name: "beacon-test".into(),
            service_version: Some("0.0.0-test".into()),
            log_level: "debug".into(),
            ..Self::default()
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "beacon".into(),
            service_version: None,
            otel_endpoint: None,
            sample_ratio: 1.0,
            export_interval_secs: 10,
            log_level: "info".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        telemetry: TelemetryConfig,
    }

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "beacon");
        assert_eq!(config.sample_ratio, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_flags_override_defaults() {
        let cli = Cli::parse_from([
            "beacon",
            "--service-name",
            "orders",
            "--service-version",
            "1.4.2",
            "--sample-ratio",
            "0.25",
        ]);
        assert_eq!(cli.telemetry.service_name, "orders");
        assert_eq!(cli.telemetry.service_version.as_deref(), Some("1.4.2"));
        assert_eq!(cli.telemetry.sample_ratio, 0.25);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let blank = TelemetryConfig::for_service("  ");
        assert!(matches!(
            blank.validate(),
            Err(TelemetryError::InvalidArgument(_))
        ));

        let mut ratio = TelemetryConfig::test_config();
        ratio.sample_ratio = 1.5;
        assert!(ratio.validate().is_err());
        ratio.sample_ratio = f64::NAN;
        assert!(ratio.validate().is_err());

        let mut interval = TelemetryConfig::test_config();
        interval.export_interval_secs = 0;
        assert!(interval.validate().is_err());
    }
}
