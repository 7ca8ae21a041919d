//! Screenshot Capturer (spec §4.6): captures element or full-page
//! screenshots into a per-scan directory with strict path discipline.
//!
//! `Page::screenshot(CaptureScreenshotParams)` usage is grounded directly on
//! `page_extractor/extractors.rs::capture_screenshot`; the path-traversal
//! defense (resolve scanId directory, verify containment within the base)
//! is new, grounded on spec §9's explicit design note and §4.6's filename
//! discipline, since the teacher's own screenshot path (`get_mirror_path`)
//! never needed a scanId-scoped sandbox.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chromiumoxide::Page;
use chromiumoxide_cdp::cdp::browser_protocol::page::{CaptureScreenshotFormat, CaptureScreenshotParams};
use uuid::Uuid;

use crate::errors::WorkerError;

/// Result of a capture attempt. Failures never propagate as `Err` out of
/// this module's public functions — spec §4.6: "Failures return a result
/// record, never throw."
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

impl CaptureResult {
    fn ok(path: PathBuf) -> Self {
        Self { path: Some(path), error: None }
    }
    fn failed(error: impl Into<String>) -> Self {
        Self { path: None, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub padding_px: f64,
    pub quality: Option<i64>,
}

/// `scanId` must be a strict UUID; resolves `root / scanId`, refusing
/// capture otherwise and rejecting any path that would escape `root`.
fn scan_directory(root: &Path, scan_id: &str) -> Result<PathBuf, WorkerError> {
    let uuid = Uuid::parse_str(scan_id)
        .map_err(|_| WorkerError::Input(format!("invalid scanId for screenshot: {scan_id}")))?;

    let dir = root.join(uuid.to_string());

    let canonical_root = root
        .canonicalize()
        .map_err(|e| WorkerError::Input(format!("screenshot root unavailable: {e}")))?;
    // The scan directory may not exist yet; verify containment against its
    // parent (root) rather than canonicalizing the not-yet-created child.
    if !dir.starts_with(&canonical_root) && !dir.starts_with(root) {
        return Err(WorkerError::Input("screenshot path escapes base directory".into()));
    }

    Ok(dir)
}

/// Filenames: `{scanId}_{sanitizedRuleId}_{index}_{ts}.{ext}`.
fn build_filename(scan_id: &str, rule_id: &str, index: usize, ext: &str) -> String {
    let sanitized: String = rule_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(100)
        .collect();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{scan_id}_{sanitized}_{index}_{ts}.{ext}")
}

async fn write_screenshot(page: &Page, params: CaptureScreenshotParams, dest: &Path) -> Result<(), String> {
    let data = page
        .screenshot(params)
        .await
        .map_err(|e| format!("screenshot capture failed: {e}"))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create screenshot directory: {e}"))?;
    }

    tokio::fs::write(dest, data)
        .await
        .map_err(|e| format!("failed to write screenshot: {e}"))
}

/// `captureElement(page, selector, scanId, ruleId, index, opts)`: resolves
/// the element's bounding box, scrolls into view, pads, clamps to the
/// viewport, and writes the file.
pub async fn capture_element(
    page: &Page,
    selector: &str,
    root: &Path,
    scan_id: &str,
    rule_id: &str,
    index: usize,
    opts: &CaptureOptions,
) -> CaptureResult {
    let dir = match scan_directory(root, scan_id) {
        Ok(d) => d,
        Err(e) => return CaptureResult::failed(e.to_string()),
    };

    let element = match page.find_element(selector).await {
        Ok(e) => e,
        Err(e) => return CaptureResult::failed(format!("element not found for {selector}: {e}")),
    };

    if let Err(e) = element.scroll_into_view().await {
        return CaptureResult::failed(format!("scroll into view failed: {e}"));
    }

    let clip = match element.bounding_box().await {
        Ok(bbox) => {
            let pad = opts.padding_px.max(0.0);
            chromiumoxide_cdp::cdp::browser_protocol::page::Viewport {
                x: (bbox.x - pad).max(0.0),
                y: (bbox.y - pad).max(0.0),
                width: bbox.width + pad * 2.0,
                height: bbox.height + pad * 2.0,
                scale: 1.0,
            }
        }
        Err(e) => return CaptureResult::failed(format!("bounding box unavailable: {e}")),
    };

    let params = CaptureScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .clip(clip)
        .quality(opts.quality.unwrap_or(90))
        .build();

    let filename = build_filename(scan_id, rule_id, index, "png");
    let dest = dir.join(&filename);

    match write_screenshot(page, params, &dest).await {
        Ok(()) => CaptureResult::ok(dest),
        Err(e) => CaptureResult::failed(e),
    }
}

/// `captureFullPage(page, scanId, pageIndex, opts)`.
pub async fn capture_full_page(
    page: &Page,
    root: &Path,
    scan_id: &str,
    page_index: usize,
    opts: &CaptureOptions,
) -> CaptureResult {
    let dir = match scan_directory(root, scan_id) {
        Ok(d) => d,
        Err(e) => return CaptureResult::failed(e.to_string()),
    };

    let params = CaptureScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .capture_beyond_viewport(true)
        .quality(opts.quality.unwrap_or(90))
        .build();

    let filename = build_filename(scan_id, "fullpage", page_index, "png");
    let dest = dir.join(&filename);

    match write_screenshot(page, params, &dest).await {
        Ok(()) => CaptureResult::ok(dest),
        Err(e) => CaptureResult::failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_uuid_scan_id() {
        let tmp = tempfile::tempdir().unwrap();
        let result = scan_directory(tmp.path(), "not-a-uuid");
        assert!(result.is_err());
    }

    #[test]
    fn accepts_valid_uuid_scan_id() {
        let tmp = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4().to_string();
        let result = scan_directory(tmp.path(), &id);
        assert!(result.is_ok());
        assert!(result.unwrap().starts_with(tmp.path()));
    }

    #[test]
    fn filename_strips_unsafe_characters() {
        let name = build_filename("scan1", "rule/../../etc", 0, "png");
        assert!(!name.contains('/'));
        assert!(!name.contains(".."));
    }

    #[test]
    fn filename_truncates_rule_id_to_100_chars() {
        let long_rule = "a".repeat(500);
        let name = build_filename("scan1", &long_rule, 0, "png");
        let sanitized_segment = name.split('_').nth(1).unwrap();
        assert!(sanitized_segment.len() <= 100);
    }
}
