//! Browser Pool (spec §4.3): owns a single long-lived headless browser and
//! hands out hardened, isolated pages.
//!
//! This diverges from the teacher's original N-instance warm pool
//! (`BrowserPool` maintaining a `VecDeque<PooledBrowser>` scaled by demand):
//! the spec calls for one shared browser with per-page hardening, not a pool
//! of browser processes. The teacher's pieces that still fit are kept almost
//! verbatim — the `PooledBrowserWrapper`/temp-dir cleanup shape, the
//! disconnect-is-logged-then-relaunched posture, and
//! `browser_setup::launch_browser` itself — while the VecDeque/scaler/
//! keepalive machinery (sized for a process pool, not a page pool) is
//! dropped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::fetch::{EventRequestPaused, RequestPattern, RequestStage};
use chromiumoxide::cdp::browser_protocol::network::ResourceType;
use chromiumoxide::cdp::browser_protocol::page::SetDownloadBehaviorBehavior;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_VIEWPORT_WIDTH: u32 = 1920;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;

#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    pub headless: bool,
    pub page_timeout: Duration,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            headless: true,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

struct LiveBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl Drop for LiveBrowser {
    fn drop(&mut self) {
        self.handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            warn!(
                "failed to clean up browser profile {}: {e}",
                self.user_data_dir.display()
            );
        }
    }
}

/// Owns the single shared browser instance and lazily relaunches it after a
/// disconnect, per spec §4.3's "Disconnects are logged and trigger a lazy
/// re-launch on next acquire."
pub struct BrowserPool {
    config: BrowserPoolConfig,
    current: Mutex<Option<LiveBrowser>>,
    shutting_down: AtomicBool,
}

impl BrowserPool {
    pub fn new(config: BrowserPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            current: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    async fn launch(&self) -> Result<LiveBrowser> {
        let profile = crate::browser_profile::create_unique_profile_with_prefix("scanworker_chrome_pool")
            .context("failed to create browser profile")?;
        let user_data_dir = profile.into_path();

        let (browser, handler, returned_dir) =
            crate::browser_setup::launch_browser(self.config.headless, Some(user_data_dir))
                .await
                .context("failed to launch pool browser")?;

        Ok(LiveBrowser { browser, handler, user_data_dir: returned_dir })
    }

    async fn ensure_connected(&self) -> Result<()> {
        let mut guard = self.current.lock().await;

        let needs_relaunch = match guard.as_ref() {
            None => true,
            Some(live) => live.browser.version().await.is_err(),
        };

        if needs_relaunch {
            if guard.is_some() {
                warn!("browser pool detected a disconnected browser; relaunching");
            }
            *guard = Some(self.launch().await?);
        }

        Ok(())
    }

    /// `acquirePage()`: returns a hardened page per spec §4.3.
    pub async fn acquire_page(self: &Arc<Self>) -> Result<HardenedPage> {
        self.ensure_connected().await?;

        let guard = self.current.lock().await;
        let live = guard.as_ref().context("browser pool has no live browser")?;

        let page = live
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open new page")?;

        harden_page(&page, &self.config).await?;

        Ok(HardenedPage { page })
    }

    /// `releasePage(page)`: closes the page, never propagates an error.
    pub async fn release_page(&self, page: HardenedPage) {
        if let Err(e) = page.page.close().await {
            warn!("failed to close page cleanly: {e}");
        }
    }

    /// `shutdown()`: closes the browser.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        let mut guard = self.current.lock().await;
        if let Some(mut live) = guard.take() {
            if let Err(e) = live.browser.close().await {
                warn!("failed to close browser during shutdown: {e}");
            }
            let _ = live.browser.wait().await;
            info!("browser pool shut down");
        }
    }
}

/// A page acquired from the pool, hardened per spec §4.3. Holds no pool
/// reference; callers pass it back to `BrowserPool::release_page`.
pub struct HardenedPage {
    page: Page,
}

impl HardenedPage {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn into_inner(self) -> Page {
        self.page
    }
}

const BLOCKED_DATA_SCHEMES: &[&str] = &["data:", "javascript:", "vbscript:"];

async fn harden_page(page: &Page, config: &BrowserPoolConfig) -> Result<()> {
    page.set_user_agent(crate::browser_setup::CHROME_USER_AGENT)
        .await
        .context("failed to set user agent")?;

    page.set_viewport(chromiumoxide::page::Viewport {
        width: config.viewport_width,
        height: config.viewport_height,
        device_scale_factor: Some(1.0),
        emulating_mobile: false,
        is_landscape: false,
        has_touch: false,
    })
    .await
    .context("failed to set viewport")?;

    page.execute(
        chromiumoxide::cdp::browser_protocol::page::SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Deny)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?,
    )
    .await
    .context("failed to deny downloads")?;

    page.execute(
        chromiumoxide::cdp::browser_protocol::page::SetBypassCspParams::builder()
            .enabled(false)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?,
    )
    .await
    .ok();

    // Dialogs auto-dismissed: chromiumoxide auto-dismisses `Page.javascriptDialogOpening`
    // by default; this task exists only to drain the event stream so the CDP
    // connection doesn't stall waiting on an unhandled dialog.
    if let Ok(mut dialogs) = page.event_listener::<chromiumoxide::cdp::browser_protocol::page::EventJavascriptDialogOpening>().await {
        let page_for_dialogs = page.clone();
        tokio::spawn(async move {
            while dialogs.next().await.is_some() {
                let _ = page_for_dialogs
                    .execute(
                        chromiumoxide::cdp::browser_protocol::page::HandleJavaScriptDialogParams::builder()
                            .accept(false)
                            .build()
                            .unwrap_or_default(),
                    )
                    .await;
            }
        });
    }

    setup_request_interception(page).await?;

    page.set_default_timeout(config.page_timeout);

    Ok(())
}

/// Request interception aborting `media` resources and navigation to
/// `data:`/`javascript:`/`vbscript:` URLs, per spec §4.3.
async fn setup_request_interception(page: &Page) -> Result<()> {
    page.execute(
        chromiumoxide::cdp::browser_protocol::fetch::EnableParams::builder()
            .patterns(vec![RequestPattern::builder()
                .url_pattern("*")
                .request_stage(RequestStage::Request)
                .build()])
            .build(),
    )
    .await
    .context("failed to enable fetch interception")?;

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .context("failed to subscribe to paused requests")?;

    let page_for_intercept = page.clone();
    tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let should_abort = event.resource_type == ResourceType::Media
                || BLOCKED_DATA_SCHEMES
                    .iter()
                    .any(|scheme| event.request.url.to_lowercase().starts_with(scheme));

            let request_id = event.request_id.clone();
            let result = if should_abort {
                debug!("blocking intercepted request: {}", event.request.url);
                page_for_intercept
                    .execute(
                        chromiumoxide::cdp::browser_protocol::fetch::FailRequestParams::builder()
                            .request_id(request_id)
                            .error_reason(
                                chromiumoxide::cdp::browser_protocol::network::ErrorReason::BlockedByClient,
                            )
                            .build()
                            .unwrap(),
                    )
                    .await
            } else {
                page_for_intercept
                    .execute(
                        chromiumoxide::cdp::browser_protocol::fetch::ContinueRequestParams::builder()
                            .request_id(request_id)
                            .build(),
                    )
                    .await
            };

            if let Err(e) = result {
                debug!("failed to resolve intercepted request: {e}");
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = BrowserPoolConfig::default();
        assert_eq!(config.viewport_width, 1920);
        assert_eq!(config.viewport_height, 1080);
        assert_eq!(config.page_timeout, Duration::from_secs(30));
        assert!(config.headless);
    }

    #[test]
    fn blocked_schemes_cover_spec_list() {
        assert!(BLOCKED_DATA_SCHEMES.contains(&"data:"));
        assert!(BLOCKED_DATA_SCHEMES.contains(&"javascript:"));
        assert!(BLOCKED_DATA_SCHEMES.contains(&"vbscript:"));
    }
}
