//! Windowed wave statistics.
//!
//! The vertical acceleration of a retimed dataset is split into fixed windows aligned to
//! multiples of the window length (default 20 minutes). For each window a Welch
//! acceleration spectrum is computed (Hann window, 50 % overlap, linear detrend,
//! one-sided density), divided by `(2 pi f)^4` to get the elevation spectrum, and
//! integrated above a low cutoff:
//!
//! - `hm0 = 4 * sqrt(m0)`
//! - `tp = 1 / f_peak`
//!
//! Windows are independent. [`window_statistics_parallel`] maps them on the tokio
//! blocking pool and returns the same values as [`window_statistics`].

use super::dataset::Dataset;
use crate::error::{AppResult, TelemetryError};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, warn};

/// Parameters of the windowed statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// Window length (s)
    pub window_secs: f64,
    /// Welch segment length (samples)
    pub nperseg: usize,
    /// Energy below this frequency is discarded (Hz)
    pub low_cutoff_hz: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_secs: 20.0 * 60.0,
            nperseg: 4096,
            low_cutoff_hz: 0.05,
        }
    }
}

/// Statistics of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStatistic {
    /// Start of the window (s)
    pub start: f64,
    /// End of the window (s)
    pub end: f64,
    /// Number of samples in the window
    pub samples: usize,
    /// Zeroth moment of the elevation spectrum (m^2)
    pub m0: f64,
    /// Significant wave height (m)
    pub hm0: f64,
    /// Peak period (s), `None` for a flat spectrum
    pub tp: Option<f64>,
}

/// A window's samples, cut out of the dataset.
struct Window {
    start: f64,
    end: f64,
    samples: Vec<f64>,
}

fn windows(dataset: &Dataset, channel: &str, window_secs: f64) -> AppResult<Vec<Window>> {
    let values = dataset.channel(channel).ok_or_else(|| {
        TelemetryError::ChannelMismatch(format!("dataset has no channel '{channel}'"))
    })?;

    let mut out: Vec<Window> = Vec::new();
    let mut current: Option<(i64, Window)> = None;

    for (&t, &v) in dataset.time().iter().zip(values) {
        let key = (t / window_secs).floor() as i64;
        match current.as_mut() {
            Some((k, w)) if *k == key => w.samples.push(f64::from(v)),
            _ => {
                let start = key as f64 * window_secs;
                let next = Window {
                    start,
                    end: start + window_secs,
                    samples: vec![f64::from(v)],
                };
                if let Some((_, done)) = current.replace((key, next)) {
                    out.push(done);
                }
            }
        }
    }
    if let Some((_, done)) = current {
        out.push(done);
    }

    Ok(out)
}

/// Periodic Hann window.
fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / n as f64).cos()))
        .collect()
}

/// Remove the least-squares line from `x`.
fn detrend_linear(x: &mut [f64]) {
    let n = x.len() as f64;
    if n < 2.0 {
        return;
    }
    let mean_i = (n - 1.0) / 2.0;
    let mean_x = x.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &v) in x.iter().enumerate() {
        let di = i as f64 - mean_i;
        sxy += di * (v - mean_x);
        sxx += di * di;
    }
    let slope = sxy / sxx;
    for (i, v) in x.iter_mut().enumerate() {
        *v -= mean_x + slope * (i as f64 - mean_i);
    }
}

/// One-sided Welch power spectral density. Returns `(frequencies, density)`.
fn welch(x: &[f64], fs: f64, nperseg: usize, fft: &dyn Fft<f64>) -> (Vec<f64>, Vec<f64>) {
    let window = hann(nperseg);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());
    let step = nperseg / 2;
    let bins = nperseg / 2 + 1;

    let mut density = vec![0.0; bins];
    let mut segments = 0usize;
    let mut buffer: Vec<Complex<f64>> = vec![Complex::new(0.0, 0.0); nperseg];
    let mut segment = vec![0.0; nperseg];

    let mut offset = 0;
    while offset + nperseg <= x.len() {
        segment.copy_from_slice(&x[offset..offset + nperseg]);
        detrend_linear(&mut segment);

        for ((b, &v), &w) in buffer.iter_mut().zip(&segment).zip(&window) {
            *b = Complex::new(v * w, 0.0);
        }
        fft.process(&mut buffer);

        for (d, c) in density.iter_mut().zip(&buffer) {
            *d += c.norm_sqr() * scale;
        }

        segments += 1;
        offset += step.max(1);
    }

    if segments > 0 {
        let last = bins - 1;
        for (k, d) in density.iter_mut().enumerate() {
            *d /= segments as f64;
            // one-sided: fold negative frequencies, except DC and (even length) Nyquist
            if k != 0 && !(nperseg % 2 == 0 && k == last) {
                *d *= 2.0;
            }
        }
    }

    let frequencies = (0..bins).map(|k| k as f64 * fs / nperseg as f64).collect();
    (frequencies, density)
}

fn statistic(
    window: &Window,
    fs: f64,
    config: &WindowConfig,
    fft: &dyn Fft<f64>,
) -> Option<WindowStatistic> {
    if window.samples.len() < config.nperseg {
        debug!(
            start = window.start,
            samples = window.samples.len(),
            "Window shorter than one Welch segment, skipping"
        );
        return None;
    }

    let (f, paa) = welch(&window.samples, fs, config.nperseg, fft);

    // Acceleration to elevation: divide by (2 pi f)^4.
    let eta: Vec<f64> = f
        .iter()
        .zip(&paa)
        .map(|(&f, &p)| {
            if f > config.low_cutoff_hz {
                p / (2.0 * PI * f).powi(4)
            } else {
                0.0
            }
        })
        .collect();

    let m0: f64 = f
        .windows(2)
        .zip(eta.windows(2))
        .map(|(f, e)| (f[1] - f[0]) * (e[0] + e[1]) / 2.0)
        .sum();

    let tp = eta
        .iter()
        .enumerate()
        .filter(|&(_, &e)| e > 0.0)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, _)| 1.0 / f[k]);

    Some(WindowStatistic {
        start: window.start,
        end: window.end,
        samples: window.samples.len(),
        m0,
        hm0: 4.0 * m0.sqrt(),
        tp,
    })
}

fn check(config: &WindowConfig) -> AppResult<()> {
    if config.nperseg < 8 || !(config.window_secs > 0.0) {
        return Err(TelemetryError::Configuration(format!(
            "invalid window parameters: window_secs={}, nperseg={}",
            config.window_secs, config.nperseg
        )));
    }
    Ok(())
}

/// Statistics of every window of `channel` holding at least one Welch segment.
pub fn window_statistics(
    dataset: &Dataset,
    channel: &str,
    config: &WindowConfig,
) -> AppResult<Vec<WindowStatistic>> {
    check(config)?;
    let fs = dataset.sample_rate();
    let fft = FftPlanner::<f64>::new().plan_fft_forward(config.nperseg);

    let stats: Vec<WindowStatistic> = windows(dataset, channel, config.window_secs)?
        .iter()
        .filter_map(|w| statistic(w, fs, config, fft.as_ref()))
        .collect();

    debug!(windows = stats.len(), "Computed window statistics");
    Ok(stats)
}

/// Like [`window_statistics`], with one blocking task per window on the current tokio
/// runtime.
pub async fn window_statistics_parallel(
    dataset: &Dataset,
    channel: &str,
    config: &WindowConfig,
) -> AppResult<Vec<WindowStatistic>> {
    check(config)?;
    let fs = dataset.sample_rate();
    let fft: Arc<dyn Fft<f64>> = FftPlanner::<f64>::new().plan_fft_forward(config.nperseg);
    let config = *config;

    let tasks = windows(dataset, channel, config.window_secs)?
        .into_iter()
        .map(|w| {
            let fft = Arc::clone(&fft);
            tokio::task::spawn_blocking(move || statistic(&w, fs, &config, fft.as_ref()))
        });

    let mut stats = Vec::new();
    for result in futures::future::join_all(tasks).await {
        match result {
            Ok(Some(s)) => stats.push(s),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Window statistics task failed");
                return Err(e.into());
            }
        }
    }

    debug!(windows = stats.len(), "Computed window statistics in parallel");
    Ok(stats)
}
