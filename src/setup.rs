use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{CleanserError, Result};
use crate::inpaint::InpaintClient;
use crate::media::MediaAdapter;

/// Outcome of one environment check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentReport {
    pub checks: Vec<CheckResult>,
}

impl EnvironmentReport {
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn render(&self) -> String {
        self.checks
            .iter()
            .map(|c| format!("[{}] {:<16} {}", if c.passed { " OK " } else { "FAIL" }, c.name, c.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&mut self, name: &'static str, result: Result<String>) {
        let check = match result {
            Ok(detail) => CheckResult { name, passed: true, detail },
            Err(e) => CheckResult { name, passed: false, detail: e.to_string() },
        };
        if !check.passed {
            warn!("Environment check '{}' failed: {}", check.name, check.detail);
        }
        self.checks.push(check);
    }
}

/// Prepares directories and verifies external dependencies before work starts
pub struct SetupManager {
    config: Config,
    show_progress: bool,
}

impl SetupManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Create the output, temp, state and log directories
    pub fn ensure_directories(&self) -> Result<()> {
        let paths = &self.config.paths;
        for dir in [&paths.output_dir, &paths.temp_dir, &paths.state_dir, &self.config.log_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| {
                CleanserError::Config(format!("Cannot create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Run every check, collecting results instead of stopping at the first failure
    pub async fn validate_environment(
        &self,
        media: &dyn MediaAdapter,
        inpaint: &dyn InpaintClient,
    ) -> EnvironmentReport {
        let spinner = self.spinner();
        let mut report = EnvironmentReport::default();
        let paths = &self.config.paths;

        spinner.set_message("Checking ffmpeg and ffprobe");
        report.push(
            "media tools",
            media.check_availability().await.map(|_| {
                format!("{} / {}", self.config.media.ffmpeg_path, self.config.media.ffprobe_path)
            }),
        );

        spinner.set_message("Checking directories");
        report.push("input directory", check_input_dir(&paths.input_dir));
        report.push("output directory", check_writable_dir(&paths.output_dir));
        report.push("temp directory", check_writable_dir(&paths.temp_dir));
        report.push("state directory", check_writable_dir(&paths.state_dir));

        spinner.set_message("Checking inpaint service");
        report.push(
            "inpaint service",
            inpaint.check_availability().await.map(|_| self.config.inpaint.endpoint.clone()),
        );

        spinner.finish_and_clear();
        if report.is_ok() {
            info!("Environment validation passed ({} checks)", report.checks.len());
        }
        report
    }

    /// Create directories and fail unless every check passes
    pub async fn initialize(
        &self,
        media: &dyn MediaAdapter,
        inpaint: &dyn InpaintClient,
    ) -> Result<EnvironmentReport> {
        self.ensure_directories()?;
        let report = self.validate_environment(media, inpaint).await;
        if !report.is_ok() {
            let failed: Vec<&str> = report.failures().iter().map(|c| c.name).collect();
            return Err(CleanserError::Config(format!(
                "Environment validation failed: {}",
                failed.join(", ")
            )));
        }
        Ok(report)
    }

    fn spinner(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

fn check_input_dir(dir: &Path) -> Result<String> {
    if dir.is_dir() {
        Ok(dir.display().to_string())
    } else {
        Err(CleanserError::FileNotFound(format!("input directory {}", dir.display())))
    }
}

fn check_writable_dir(dir: &Path) -> Result<String> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".vidcleanser-write-test");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)?;
    Ok(dir.display().to_string())
}
