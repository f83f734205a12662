//! Engine configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/buoy_daq.toml` (base configuration)
//! 2. Environment variables prefixed with `BUOY_DAQ_`, nested keys separated by `__`
//!
//! Every value has a default, so an absent file yields [`EngineConfig::default`].
//!
//! # Example
//! ```no_run
//! use buoy_daq::config::EngineConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::load()?;
//! config.validate()?;
//! println!("Gap limit: {} s", config.reconstruction.eps_gap_secs);
//! # Ok(())
//! # }
//! ```

use crate::data::dataset::SignalDelay;
use crate::data::retime::RetimeConfig;
use crate::data::welch::WindowConfig;
use crate::error::{AppResult, TelemetryError};
use crate::validation;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/buoy_daq.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "BUOY_DAQ_";

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Reconstruction (segmenting, frequency estimation, retiming) settings
    pub reconstruction: ReconstructionConfig,
    /// Windowed spectral statistics settings
    pub statistics: StatisticsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Parameters of the reconstruction chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Largest tolerated distance in seconds between the end of one package and the
    /// start of the next before the data is split into separate segments.
    pub eps_gap_secs: f64,
    /// Largest relative deviation of a per-interval frequency estimate from the
    /// declared frequency before the estimate is discarded.
    pub frequency_tolerance: f64,
    /// Constant delay of the on-board FIR filter.
    pub signal_delay: SignalDelayConfig,
}

/// On-board FIR filter delay compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalDelayConfig {
    /// Whether retimed datasets are shifted by the filter delay
    pub enabled: bool,
    /// Number of filter taps
    pub taps: u32,
    /// Rate the filter runs at (Hz)
    pub filter_frequency: f64,
}

/// Windowed spectral statistics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Window length in seconds
    pub window_secs: f64,
    /// Welch segment length in samples
    pub nperseg: usize,
    /// Energy below this frequency is discarded (Hz)
    pub low_cutoff_hz: f64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "buoy-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            eps_gap_secs: 10.0,
            frequency_tolerance: 0.1,
            signal_delay: SignalDelayConfig::default(),
        }
    }
}

impl Default for SignalDelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            taps: 128,
            filter_frequency: 208.0,
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            window_secs: 20.0 * 60.0,
            nperseg: 4096,
            low_cutoff_hz: 0.05,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `config/buoy_daq.toml` and environment variables
    ///
    /// Environment variables override file values with prefix `BUOY_DAQ_`.
    /// Example: `BUOY_DAQ_RECONSTRUCTION__EPS_GAP_SECS=3`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid =
            |field: &str, reason: &str| TelemetryError::Configuration(format!("{field}: {reason}"));

        validation::is_not_empty(&self.application.name)
            .map_err(|e| invalid("application.name", e))?;
        validation::is_valid_log_level(&self.application.log_level)
            .map_err(|e| invalid("application.log_level", e))?;

        let reconstruction = &self.reconstruction;
        validation::is_positive_finite(reconstruction.eps_gap_secs)
            .map_err(|e| invalid("reconstruction.eps_gap_secs", e))?;
        validation::is_relative_tolerance(reconstruction.frequency_tolerance)
            .map_err(|e| invalid("reconstruction.frequency_tolerance", e))?;

        let delay = &reconstruction.signal_delay;
        if delay.enabled {
            validation::is_in_range(delay.taps, 1..=u32::MAX)
                .map_err(|e| invalid("reconstruction.signal_delay.taps", e))?;
            validation::is_positive_finite(delay.filter_frequency)
                .map_err(|e| invalid("reconstruction.signal_delay.filter_frequency", e))?;
        }

        let statistics = &self.statistics;
        validation::is_positive_finite(statistics.window_secs)
            .map_err(|e| invalid("statistics.window_secs", e))?;
        validation::is_in_range(statistics.nperseg, 8..=usize::MAX)
            .map_err(|e| invalid("statistics.nperseg", e))?;
        validation::is_positive_finite(statistics.low_cutoff_hz)
            .map_err(|e| invalid("statistics.low_cutoff_hz", e))?;

        Ok(())
    }

    /// Signal delay to compensate, if enabled.
    pub fn signal_delay(&self) -> Option<SignalDelay> {
        let delay = &self.reconstruction.signal_delay;
        delay
            .enabled
            .then(|| SignalDelay::new(delay.taps, delay.filter_frequency))
    }

    /// Parameters for the retimer.
    pub fn retime_config(&self) -> RetimeConfig {
        RetimeConfig {
            eps_gap: self.reconstruction.eps_gap_secs,
            frequency_tolerance: self.reconstruction.frequency_tolerance,
            signal_delay: self.signal_delay(),
        }
    }

    /// Parameters for windowed statistics.
    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            window_secs: self.statistics.window_secs,
            nperseg: self.statistics.nperseg,
            low_cutoff_hz: self.statistics.low_cutoff_hz,
        }
    }
}
