use serde_json::Value;

use super::{AuditMetrics, AuditScore, PageConfig, RawReport, ScoreStamp};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("report is missing field {0}")]
    MissingField(String),

    #[error("report field {0} has an unexpected type or value")]
    TypeMismatch(String),
}

const FIRST_CONTENTFUL_PAINT: &str = "first-contentful-paint";
const SPEED_INDEX: &str = "speed-index";
const LARGEST_CONTENTFUL_PAINT: &str = "largest-contentful-paint";
const INTERACTIVE: &str = "interactive";
const TOTAL_BLOCKING_TIME: &str = "total-blocking-time";
const CUMULATIVE_LAYOUT_SHIFT: &str = "cumulative-layout-shift";

/// The subset of a Lighthouse report the scorer reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportView<'a> {
    pub final_url: &'a str,
    pub performance: f64,
    pub seo: f64,
    pub first_contentful_paint: f64,
    pub speed_index: f64,
    pub largest_contentful_paint: f64,
    pub interactive: f64,
    pub total_blocking_time: f64,
    pub cumulative_layout_shift: f64,
}

impl<'a> ReportView<'a> {
    pub fn from_report(report: &'a RawReport) -> Result<Self, ParseError> {
        let root = &report.0;
        Ok(Self {
            final_url: string_at(root, &["finalUrl"])?,
            performance: number_at(root, &["categories", "performance", "score"])?,
            seo: number_at(root, &["categories", "seo", "score"])?,
            first_contentful_paint: audit_value(root, FIRST_CONTENTFUL_PAINT)?,
            speed_index: audit_value(root, SPEED_INDEX)?,
            largest_contentful_paint: audit_value(root, LARGEST_CONTENTFUL_PAINT)?,
            interactive: audit_value(root, INTERACTIVE)?,
            total_blocking_time: audit_value(root, TOTAL_BLOCKING_TIME)?,
            cumulative_layout_shift: audit_value(root, CUMULATIVE_LAYOUT_SHIFT)?,
        })
    }
}

/// Normalize a raw report into a score record for `page`.
pub fn parse_report(
    report: &RawReport,
    page: &PageConfig,
    stamp: ScoreStamp,
) -> Result<AuditScore, ParseError> {
    let view = ReportView::from_report(report)?;

    Ok(AuditScore {
        id: stamp.id,
        page_id: page.id.clone(),
        created_at: stamp.created_at,
        url: view.final_url.to_string(),
        device: page.device.clone(),
        psi_score: category_score(view.performance, "categories.performance.score")?,
        seo_score: category_score(view.seo, "categories.seo.score")?,
        metrics: AuditMetrics {
            first_contentful_paint: millis(view.first_contentful_paint, FIRST_CONTENTFUL_PAINT)?,
            speed_index: millis(view.speed_index, SPEED_INDEX)?,
            largest_contentful_paint: millis(
                view.largest_contentful_paint,
                LARGEST_CONTENTFUL_PAINT,
            )?,
            time_to_interactive: millis(view.interactive, INTERACTIVE)?,
            total_blocking_time: millis(view.total_blocking_time, TOTAL_BLOCKING_TIME)?,
            cumulative_layout_shift: round_layout_shift(view.cumulative_layout_shift),
        },
    })
}

/// Fractional category score (0.0..=1.0) to a truncated percentage.
pub fn category_score(score: f64, path: &str) -> Result<u8, ParseError> {
    if !(0.0..=1.0).contains(&score) {
        return Err(ParseError::TypeMismatch(path.to_string()));
    }
    Ok((score * 100.0).trunc() as u8)
}

/// Four decimals, halves rounded away from zero.
pub fn round_layout_shift(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn millis(value: f64, audit: &str) -> Result<u64, ParseError> {
    if value < 0.0 {
        return Err(ParseError::TypeMismatch(audit_path(audit)));
    }
    Ok(value.trunc() as u64)
}

fn audit_path(audit: &str) -> String {
    format!("audits.{audit}.numericValue")
}

fn audit_value(root: &Value, audit: &str) -> Result<f64, ParseError> {
    number_at(root, &["audits", audit, "numericValue"])
}

fn lookup<'a>(root: &'a Value, path: &[&str]) -> Result<&'a Value, ParseError> {
    let mut current = root;
    for (depth, key) in path.iter().enumerate() {
        current = match current {
            Value::Object(map) => map
                .get(*key)
                .ok_or_else(|| ParseError::MissingField(path[..=depth].join(".")))?,
            // An intermediate node that is not an object cannot hold the field.
            _ => return Err(ParseError::TypeMismatch(path[..depth].join("."))),
        };
    }
    Ok(current)
}

fn number_at(root: &Value, path: &[&str]) -> Result<f64, ParseError> {
    lookup(root, path)?
        .as_f64()
        .ok_or_else(|| ParseError::TypeMismatch(path.join(".")))
}

fn string_at<'a>(root: &'a Value, path: &[&str]) -> Result<&'a str, ParseError> {
    lookup(root, path)?
        .as_str()
        .ok_or_else(|| ParseError::TypeMismatch(path.join(".")))
}
