//! Chromium-backed implementation of the [`BrowserDriver`] capability.
//!
//! Lifecycle operations (launch, close) take the page guard exclusively;
//! every page interaction takes it shared. Each operation class carries its
//! own timeout: navigation gets the long window, click/type the short one.

pub mod selector;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::traits::{BrowserDriver, ElementInfo, FormField, LoadState, PageSnapshot, ViewportBounds};

pub struct ChromiumDriver {
    cfg: BrowserConfig,
    inner: RwLock<Option<BrowserHandle>>,
}

struct BrowserHandle {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// Run a driver future under the operation timeout, aborting early on
/// cancellation. Timeout errors spell out "timeout" so the error
/// classifier files them as retryable.
async fn with_deadline<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    what: &str,
    fut: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("{} cancelled", what),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(inner) => inner,
            Err(_) => anyhow::bail!("{} timeout after {:?}", what, timeout),
        },
    }
}

impl ChromiumDriver {
    pub fn new(cfg: BrowserConfig) -> Self {
        Self {
            cfg,
            inner: RwLock::new(None),
        }
    }

    async fn page(&self) -> anyhow::Result<Page> {
        let guard = self.inner.read().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("browser not launched"))?;

        let pages = handle.browser.pages().await?;
        if let Some(page) = pages.into_iter().next() {
            return Ok(page);
        }
        Ok(handle.browser.new_page("about:blank").await?)
    }

    async fn eval_json<T: serde::de::DeserializeOwned>(&self, script: &str) -> anyhow::Result<T> {
        let page = self.page().await?;
        let value = page.evaluate(script).await?.into_value::<T>()?;
        Ok(value)
    }
}

/// Snapshot shape produced by the in-page collector script.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    url: String,
    title: String,
    viewport: RawViewport,
    elements: Vec<RawElement>,
}

#[derive(Debug, Deserialize)]
struct RawViewport {
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
struct RawElement {
    tag: String,
    text: String,
    visible: bool,
    interactive: bool,
    in_viewport: bool,
    bounds: RawBounds,
    role: String,
    label: String,
    priority: i32,
    attrs: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawBounds {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Collects candidate elements with the attributes the selector builder
/// scores on. Priority is a coarse in-page heuristic: interactive controls
/// in the viewport rank highest.
const SNAPSHOT_SCRIPT: &str = r#"
(() => {
    const interactiveTags = new Set(['button', 'a', 'input', 'select', 'textarea', 'form']);
    const elements = [];
    const nodes = document.querySelectorAll(
        'button, a, input, select, textarea, form, nav, [role], [onclick], h1, h2, h3, label'
    );
    const vw = window.innerWidth;
    const vh = window.innerHeight;

    for (const node of nodes) {
        if (elements.length >= 300) break;
        const rect = node.getBoundingClientRect();
        const style = window.getComputedStyle(node);
        const visible = rect.width > 0 && rect.height > 0 &&
            style.visibility !== 'hidden' && style.display !== 'none';
        const inViewport = visible && rect.bottom > 0 && rect.top < vh &&
            rect.right > 0 && rect.left < vw;
        const tag = node.tagName.toLowerCase();
        const interactive = interactiveTags.has(tag) ||
            node.hasAttribute('onclick') || node.hasAttribute('role');

        let text = (node.innerText || node.value || '').trim().slice(0, 200);
        if (!text) {
            text = node.getAttribute('aria-label') || node.getAttribute('title') ||
                node.getAttribute('alt') || node.getAttribute('placeholder') || '';
        }

        let priority = 0;
        if (interactive) priority += 3;
        if (inViewport) priority += 2;
        if (tag === 'button' || (tag === 'a' && text)) priority += 1;

        const attrs = { tag };
        for (const name of ['id', 'name', 'class', 'role', 'aria-label', 'data-testid']) {
            const value = node.getAttribute(name);
            if (value) attrs[name] = value;
        }
        attrs['text'] = text;

        elements.push({
            tag,
            text,
            visible,
            interactive,
            in_viewport: inViewport,
            bounds: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
            role: node.getAttribute('role') || '',
            label: node.getAttribute('aria-label') || '',
            priority,
            attrs,
        });
    }

    return {
        url: window.location.href,
        title: document.title,
        viewport: { width: vw, height: vh },
        elements,
    };
})()
"#;

/// Best-effort dismissal of overlays: cookie banners and modals with a
/// recognizable close control.
const CLOSE_POPUPS_SCRIPT: &str = r#"
(() => {
    let closed = 0;
    const closeSelectors = [
        '[class*="modal"] [class*="close"]',
        '[class*="popup"] [class*="close"]',
        '[class*="overlay"] [class*="close"]',
        '[aria-label="Close"]',
        '[aria-label="Закрыть"]',
        '[id*="cookie"] button',
        '[class*="cookie"] button',
    ];
    for (const selector of closeSelectors) {
        for (const el of document.querySelectorAll(selector)) {
            const rect = el.getBoundingClientRect();
            if (rect.width > 0 && rect.height > 0) {
                el.click();
                closed++;
            }
        }
    }
    return closed;
})()
"#;

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut guard = self.inner.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut builder = ChromeConfig::builder();
        if self.cfg.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }
        if let Some(ref user_data_dir) = self.cfg.user_data_dir {
            builder = builder.arg(format!("--user-data-dir={}", user_data_dir));
        }
        builder = builder
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");

        let chrome_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {}", e))?;

        let launch = Browser::launch(chrome_config);
        let (browser, mut handler) = with_deadline(cancel, self.cfg.timeout(), "launch", async {
            launch.await.map_err(|e| {
                anyhow::anyhow!("failed to launch browser: {}. Is Chromium installed?", e)
            })
        })
        .await?;

        let handler_task = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        info!(headless = self.cfg.headless, "browser launched");
        *guard = Some(BrowserHandle {
            browser,
            handler_task,
        });
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut guard = self.inner.write().await;
        if let Some(mut handle) = guard.take() {
            if let Err(e) = handle.browser.close().await {
                warn!(error = %e, "browser close reported an error");
            }
            let _ = handle.browser.wait().await;
            handle.handler_task.abort();
            info!("browser closed");
        }
        Ok(())
    }

    async fn navigate(&self, cancel: &CancellationToken, url: &str) -> anyhow::Result<()> {
        with_deadline(cancel, self.cfg.navigate_timeout(), "navigate", async {
            let page = self.page().await?;
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            debug!(url, "navigated");
            Ok(())
        })
        .await?;

        // Settle the page and clear anything covering it; both are
        // best-effort after a successful navigation.
        if let Err(e) = self.wait_for_load_state(cancel, LoadState::Load).await {
            warn!(url, error = %e, "load state wait failed after navigation");
        }
        if let Err(e) = self.close_popups(cancel).await {
            warn!(url, error = %e, "popup cleanup failed after navigation");
        }
        Ok(())
    }

    async fn click(&self, cancel: &CancellationToken, selector: &str) -> anyhow::Result<()> {
        with_deadline(cancel, self.cfg.action_timeout(), "click", async {
            let page = self.page().await?;
            let element = page
                .find_element(selector)
                .await
                .map_err(|e| anyhow::anyhow!("element not found '{}': {}", selector, e))?;
            element.click().await?;
            debug!(selector, "clicked");
            Ok(())
        })
        .await
    }

    async fn type_text(
        &self,
        cancel: &CancellationToken,
        selector: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        with_deadline(cancel, self.cfg.action_timeout(), "type", async {
            let page = self.page().await?;
            let element = page
                .find_element(selector)
                .await
                .map_err(|e| anyhow::anyhow!("element not found '{}': {}", selector, e))?;
            element.click().await?;
            element.type_str(text).await?;
            debug!(selector, "typed text");
            Ok(())
        })
        .await
    }

    async fn page_html(&self, cancel: &CancellationToken) -> anyhow::Result<String> {
        with_deadline(cancel, self.cfg.timeout(), "get page content", async {
            let page = self.page().await?;
            Ok(page.content().await?)
        })
        .await
    }

    async fn page_snapshot(&self, cancel: &CancellationToken) -> anyhow::Result<PageSnapshot> {
        with_deadline(cancel, self.cfg.timeout(), "snapshot", async {
            let raw: RawSnapshot = self.eval_json(SNAPSHOT_SCRIPT).await?;

            let elements = raw
                .elements
                .into_iter()
                .map(|el| {
                    let selector = selector::build_smart_selector(&el.attrs);
                    ElementInfo {
                        tag: el.tag,
                        text: el.text,
                        selector,
                        visible: el.visible,
                        interactive: el.interactive,
                        in_viewport: el.in_viewport,
                        bounds: ViewportBounds {
                            x: el.bounds.x,
                            y: el.bounds.y,
                            width: el.bounds.width,
                            height: el.bounds.height,
                        },
                        role: el.role,
                        label: el.label,
                        priority: el.priority,
                    }
                })
                .collect();

            Ok(PageSnapshot {
                url: raw.url,
                title: raw.title,
                viewport: ViewportBounds {
                    x: 0.0,
                    y: 0.0,
                    width: raw.viewport.width,
                    height: raw.viewport.height,
                },
                accessibility_tree: String::new(),
                elements,
            })
        })
        .await
    }

    async fn wait_for_selector(
        &self,
        cancel: &CancellationToken,
        selector: &str,
    ) -> anyhow::Result<()> {
        with_deadline(cancel, self.cfg.timeout(), "wait for selector", async {
            let page = self.page().await?;
            loop {
                if page.find_element(selector).await.is_ok() {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await
    }

    async fn wait_for_load_state(
        &self,
        cancel: &CancellationToken,
        state: LoadState,
    ) -> anyhow::Result<()> {
        let wanted = match state {
            LoadState::Load => "complete",
            LoadState::DomContentLoaded => "interactive",
            LoadState::NetworkIdle => "complete",
        };
        with_deadline(cancel, self.cfg.timeout(), "wait for load state", async {
            loop {
                let ready: String = self.eval_json("document.readyState").await?;
                let reached = match wanted {
                    "interactive" => ready == "interactive" || ready == "complete",
                    other => ready == other,
                };
                if reached {
                    // Network idle has no direct readyState; give in-flight
                    // requests a moment to drain.
                    if state == LoadState::NetworkIdle {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
    }

    async fn close_popups(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        with_deadline(cancel, self.cfg.action_timeout(), "close popups", async {
            let closed: i64 = self.eval_json(CLOSE_POPUPS_SCRIPT).await?;
            if closed > 0 {
                debug!(closed, "closed popups");
            }
            Ok(())
        })
        .await
    }

    async fn find_form_fields(
        &self,
        cancel: &CancellationToken,
        form_selector: &str,
    ) -> anyhow::Result<Vec<FormField>> {
        let script = format!(
            r#"
(() => {{
    const form = document.querySelector({sel});
    if (!form) return [];
    const fields = [];
    for (const el of form.querySelectorAll('input, select, textarea')) {{
        if (el.type === 'hidden') continue;
        let label = '';
        if (el.id) {{
            const labelEl = document.querySelector(`label[for="${{el.id}}"]`);
            if (labelEl) label = labelEl.innerText.trim();
        }}
        fields.push({{
            selector: el.id ? '#' + el.id : (el.name ? `[name="${{el.name}}"]` : el.tagName.toLowerCase()),
            name: el.name || '',
            field_type: el.type || el.tagName.toLowerCase(),
            label,
            required: el.required || false,
            value: el.value || '',
        }});
    }}
    return fields;
}})()
"#,
            sel = serde_json::to_string(form_selector)?
        );

        with_deadline(cancel, self.cfg.timeout(), "find form fields", async {
            self.eval_json(&script).await
        })
        .await
    }

    async fn fill_form_field(
        &self,
        cancel: &CancellationToken,
        selector: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        self.type_text(cancel, selector, value).await
    }

    async fn submit_form(
        &self,
        cancel: &CancellationToken,
        form_selector: &str,
    ) -> anyhow::Result<()> {
        let script = format!(
            r#"
(() => {{
    const form = document.querySelector({sel});
    if (!form) return false;
    const submit = form.querySelector('[type="submit"], button:not([type])');
    if (submit) {{ submit.click(); }} else {{ form.submit(); }}
    return true;
}})()
"#,
            sel = serde_json::to_string(form_selector)?
        );

        with_deadline(cancel, self.cfg.action_timeout(), "submit form", async {
            let submitted: bool = self.eval_json(&script).await?;
            if !submitted {
                anyhow::bail!("form not found: '{}'", form_selector);
            }
            Ok(())
        })
        .await
    }

    async fn validate_form(
        &self,
        cancel: &CancellationToken,
        form_selector: &str,
    ) -> anyhow::Result<(bool, Vec<String>)> {
        let script = format!(
            r#"
(() => {{
    const form = document.querySelector({sel});
    if (!form) return {{ valid: false, messages: ['form not found'] }};
    const messages = [];
    for (const el of form.querySelectorAll('input, select, textarea')) {{
        if (!el.checkValidity()) {{
            messages.push((el.name || el.id || el.tagName.toLowerCase()) + ': ' + el.validationMessage);
        }}
    }}
    return {{ valid: messages.length === 0, messages }};
}})()
"#,
            sel = serde_json::to_string(form_selector)?
        );

        #[derive(Deserialize)]
        struct Validation {
            valid: bool,
            messages: Vec<String>,
        }

        with_deadline(cancel, self.cfg.timeout(), "validate form", async {
            let validation: Validation = self.eval_json(&script).await?;
            Ok((validation.valid, validation.messages))
        })
        .await
    }

    async fn wait_for_navigation(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        with_deadline(cancel, self.cfg.navigate_timeout(), "wait for navigation", async {
            let page = self.page().await?;
            page.wait_for_navigation().await?;
            Ok(())
        })
        .await
    }

    async fn wait_for_request(
        &self,
        cancel: &CancellationToken,
        url_pattern: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let script = format!(
            "performance.getEntriesByType('resource').some(e => e.name.includes({}))",
            serde_json::to_string(url_pattern)?
        );
        with_deadline(cancel, timeout, "wait for request", async {
            loop {
                let seen: bool = self.eval_json(&script).await?;
                if seen {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await
    }

    async fn wait_for_response(
        &self,
        cancel: &CancellationToken,
        url_pattern: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        // Resource timing entries complete when the response has arrived, so
        // a finished entry doubles as response observation.
        let script = format!(
            "performance.getEntriesByType('resource').some(e => e.name.includes({}) && e.responseEnd > 0)",
            serde_json::to_string(url_pattern)?
        );
        with_deadline(cancel, timeout, "wait for response", async {
            loop {
                let seen: bool = self.eval_json(&script).await?;
                if seen {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await
    }

    async fn wait_for_network_idle(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        with_deadline(cancel, timeout, "wait for network idle", async {
            let mut last_count: i64 = -1;
            loop {
                let count: i64 = self
                    .eval_json("performance.getEntriesByType('resource').length")
                    .await?;
                if count == last_count {
                    return Ok(());
                }
                last_count = count;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
        .await
    }

    async fn scroll_to_element(
        &self,
        cancel: &CancellationToken,
        selector: &str,
    ) -> anyhow::Result<()> {
        let script = format!(
            r#"
(() => {{
    const el = document.querySelector({sel});
    if (!el) return false;
    el.scrollIntoView({{ behavior: 'instant', block: 'center' }});
    return true;
}})()
"#,
            sel = serde_json::to_string(selector)?
        );

        with_deadline(cancel, self.cfg.action_timeout(), "scroll to element", async {
            let found: bool = self.eval_json(&script).await?;
            if !found {
                anyhow::bail!("element not found: '{}'", selector);
            }
            Ok(())
        })
        .await
    }
}
