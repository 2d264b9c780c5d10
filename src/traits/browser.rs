use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A snapshot of the current page: url, title, interactive elements and the
/// accessibility tree. This is the preferred input to context distillation;
/// raw HTML is the fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub viewport: ViewportBounds,
    pub accessibility_tree: String,
    pub elements: Vec<ElementInfo>,
}

/// One element as reported by the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    pub text: String,
    pub selector: String,
    pub visible: bool,
    pub interactive: bool,
    pub in_viewport: bool,
    pub bounds: ViewportBounds,
    pub role: String,
    pub label: String,
    /// Driver-assigned importance; >=5 maps to Critical during distillation.
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ViewportBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A form input discovered by `find_form_fields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormField {
    pub selector: String,
    pub name: String,
    pub field_type: String,
    pub label: String,
    pub required: bool,
    pub value: String,
}

/// Page load states the driver can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// Browser driver capability. Every operation honors the cancellation token
/// and applies its own operation-class timeout (navigate gets a longer
/// window than click/type).
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;

    async fn navigate(&self, cancel: &CancellationToken, url: &str) -> anyhow::Result<()>;
    async fn click(&self, cancel: &CancellationToken, selector: &str) -> anyhow::Result<()>;
    async fn type_text(
        &self,
        cancel: &CancellationToken,
        selector: &str,
        text: &str,
    ) -> anyhow::Result<()>;

    /// Raw HTML of the current page (distillation fallback).
    async fn page_html(&self, cancel: &CancellationToken) -> anyhow::Result<String>;
    /// Structured snapshot (distillation preferred path).
    async fn page_snapshot(&self, cancel: &CancellationToken) -> anyhow::Result<PageSnapshot>;

    async fn wait_for_selector(
        &self,
        cancel: &CancellationToken,
        selector: &str,
    ) -> anyhow::Result<()>;
    async fn wait_for_load_state(
        &self,
        cancel: &CancellationToken,
        state: LoadState,
    ) -> anyhow::Result<()>;

    /// Detect and dismiss cookie banners / modals covering the page.
    async fn close_popups(&self, cancel: &CancellationToken) -> anyhow::Result<()>;

    async fn find_form_fields(
        &self,
        cancel: &CancellationToken,
        form_selector: &str,
    ) -> anyhow::Result<Vec<FormField>>;
    async fn fill_form_field(
        &self,
        cancel: &CancellationToken,
        selector: &str,
        value: &str,
    ) -> anyhow::Result<()>;
    async fn submit_form(
        &self,
        cancel: &CancellationToken,
        form_selector: &str,
    ) -> anyhow::Result<()>;
    /// Returns (valid, validation_messages).
    async fn validate_form(
        &self,
        cancel: &CancellationToken,
        form_selector: &str,
    ) -> anyhow::Result<(bool, Vec<String>)>;

    async fn wait_for_navigation(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
    async fn wait_for_request(
        &self,
        cancel: &CancellationToken,
        url_pattern: &str,
        timeout: Duration,
    ) -> anyhow::Result<()>;
    async fn wait_for_response(
        &self,
        cancel: &CancellationToken,
        url_pattern: &str,
        timeout: Duration,
    ) -> anyhow::Result<()>;
    async fn wait_for_network_idle(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> anyhow::Result<()>;

    async fn scroll_to_element(
        &self,
        cancel: &CancellationToken,
        selector: &str,
    ) -> anyhow::Result<()>;
}
