pub mod invoker;
pub mod orchestrator;
pub mod parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Shared data model structs
// ============================================================================

/// Lighthouse device profile for a page.
///
/// Rows written before validation existed (or by hand) may carry any string, so
/// unknown values are kept as `Unsupported` instead of failing to load. The
/// invoker refuses to run them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    Mobile,
    Desktop,
    Unsupported(String),
}

impl DeviceType {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Desktop => "desktop",
            DeviceType::Unsupported(raw) => raw,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, DeviceType::Unsupported(_))
    }
}

impl From<&str> for DeviceType {
    fn from(value: &str) -> Self {
        match value {
            "mobile" => DeviceType::Mobile,
            "desktop" => DeviceType::Desktop,
            other => DeviceType::Unsupported(other.to_string()),
        }
    }
}

impl From<String> for DeviceType {
    fn from(value: String) -> Self {
        DeviceType::from(value.as_str())
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub name: String,
    pub env: String,
    pub device: DeviceType,
    #[serde(rename = "benchmarkScore")]
    pub benchmark_score: u8,
    #[serde(rename = "thresholdPercentage")]
    pub threshold_percentage: u8,
    #[serde(rename = "isEnabled")]
    pub enabled: bool,
    /// Header bag handed to Lighthouse as `--extra-headers`, never inspected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PageValidationError {
    #[error("url must be an absolute http(s) URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported device '{0}', expected 'mobile' or 'desktop'")]
    UnsupportedDevice(String),

    #[error("{field} must be between 0 and 100, got {value}")]
    OutOfRange { field: &'static str, value: u8 },

    #[error("name must not be empty")]
    EmptyName,
}

impl PageConfig {
    pub fn validate(&self) -> Result<(), PageValidationError> {
        match url::Url::parse(&self.url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
            _ => return Err(PageValidationError::InvalidUrl(self.url.clone())),
        }
        if !self.device.is_supported() {
            return Err(PageValidationError::UnsupportedDevice(
                self.device.as_str().to_string(),
            ));
        }
        if self.benchmark_score > 100 {
            return Err(PageValidationError::OutOfRange {
                field: "benchmarkScore",
                value: self.benchmark_score,
            });
        }
        if self.threshold_percentage > 100 {
            return Err(PageValidationError::OutOfRange {
                field: "thresholdPercentage",
                value: self.threshold_percentage,
            });
        }
        if self.name.trim().is_empty() {
            return Err(PageValidationError::EmptyName);
        }
        Ok(())
    }

    /// Lowest performance score still inside the page's tolerance band.
    pub fn score_floor(&self) -> u32 {
        let benchmark = u32::from(self.benchmark_score);
        let tolerance = u32::from(self.threshold_percentage.min(100));
        benchmark * (100 - tolerance) / 100
    }
}

/// Body of a page creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPage {
    pub url: String,
    pub name: String,
    pub env: String,
    pub device: DeviceType,
    #[serde(rename = "benchmarkScore")]
    pub benchmark_score: u8,
    #[serde(rename = "thresholdPercentage")]
    pub threshold_percentage: u8,
    #[serde(rename = "isEnabled", default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auth: Option<serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl NewPage {
    pub fn into_page(self) -> PageConfig {
        PageConfig {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            url: self.url,
            name: self.name,
            env: self.env,
            device: self.device,
            benchmark_score: self.benchmark_score,
            threshold_percentage: self.threshold_percentage,
            enabled: self.enabled,
            auth: self.auth,
        }
    }
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageUpdate {
    #[serde(rename = "isEnabled")]
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub env: Option<String>,
    pub device: Option<DeviceType>,
    #[serde(rename = "benchmarkScore")]
    pub benchmark_score: Option<u8>,
    #[serde(rename = "thresholdPercentage")]
    pub threshold_percentage: Option<u8>,
    pub auth: Option<serde_json::Value>,
}

impl PageUpdate {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.name.is_none()
            && self.env.is_none()
            && self.device.is_none()
            && self.benchmark_score.is_none()
            && self.threshold_percentage.is_none()
            && self.auth.is_none()
    }

    pub fn apply_to(self, page: &mut PageConfig) {
        if let Some(enabled) = self.enabled {
            page.enabled = enabled;
        }
        if let Some(name) = self.name {
            page.name = name;
        }
        if let Some(env) = self.env {
            page.env = env;
        }
        if let Some(device) = self.device {
            page.device = device;
        }
        if let Some(score) = self.benchmark_score {
            page.benchmark_score = score;
        }
        if let Some(pct) = self.threshold_percentage {
            page.threshold_percentage = pct;
        }
        if let Some(auth) = self.auth {
            page.auth = Some(auth);
        }
    }
}

/// Conjunction of optional page predicates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageFilter {
    #[serde(default)]
    pub enabled_only: bool,
    pub url: Option<String>,
    pub device: Option<DeviceType>,
    pub env: Option<String>,
}

impl PageFilter {
    pub fn matches(&self, page: &PageConfig) -> bool {
        (!self.enabled_only || page.enabled)
            && self.url.as_ref().is_none_or(|url| *url == page.url)
            && self.device.as_ref().is_none_or(|device| *device == page.device)
            && self.env.as_ref().is_none_or(|env| *env == page.env)
    }
}

/// The audit tool's JSON document, alive only between invoker and parser.
#[derive(Debug, Clone)]
pub struct RawReport(pub serde_json::Value);

/// Lab metrics kept from a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMetrics {
    pub first_contentful_paint: u64,
    pub speed_index: u64,
    pub largest_contentful_paint: u64,
    pub time_to_interactive: u64,
    pub total_blocking_time: u64,
    pub cumulative_layout_shift: f64,
}

/// One completed audit. Append-only: never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditScore {
    #[serde(rename = "_id")]
    pub id: String,
    pub page_id: String,
    pub created_at: DateTime<Utc>,
    /// Final URL after redirects.
    pub url: String,
    pub device: DeviceType,
    pub psi_score: u8,
    pub seo_score: u8,
    pub metrics: AuditMetrics,
}

/// Identity assigned to a score before parsing, so parsing stays pure.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreStamp {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl ScoreStamp {
    pub fn now() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Invoke,
    Parse,
    Persist,
    Cancelled,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Invoke => "invoke",
            FailureStage::Parse => "parse",
            FailureStage::Persist => "persist",
            FailureStage::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    pub page_id: String,
    pub url: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// Outcome of one batch. `attempted == succeeded + failed` always holds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub failures: Vec<PageFailure>,
}

impl RunResult {
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, failure: PageFailure) {
        self.attempted += 1;
        self.failed += 1;
        self.failures.push(failure);
    }
}
