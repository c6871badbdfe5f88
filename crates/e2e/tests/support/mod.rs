//! In-memory storefront used as a browser backend in integration tests
//!
//! Models just enough of the order-management UI for the bundled scenarios:
//! login and registration, tabs, entity modals and tables, dashboard charts, order autocomplete, the partial
//! payment fields, backup download and restore upload.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use uiflow_e2e::adapter::{BrowserAdapter, DownloadInfo, Locator, OptionRef, SessionFactory};
use uiflow_e2e::error::{E2eError, E2eResult};
use uiflow_e2e::wait::ElementProbe;

pub const EMAIL: &str = "test@example.com";
pub const PASSWORD: &str = "password123";

const TABS: [&str; 6] = ["dashboard", "products", "customers", "orders", "payments", "settings"];

/// Entities with a table, an add button, a modal and a form
const ENTITIES: [&str; 4] = ["product", "customer", "order", "payment"];

#[derive(Debug, Clone)]
pub struct Order {
    pub customer: String,
    pub status: String,
}

#[derive(Debug, Default)]
pub struct FakeStore {
    logged_in: bool,
    register_shown: bool,
    active_tab: String,
    open_modal: Option<String>,
    fields: HashMap<String, String>,
    order_status: String,
    order_items: usize,
    autocomplete: Vec<String>,
    selected_customer: Option<String>,

    pub products: Vec<String>,
    pub customers: Vec<String>,
    pub orders: Vec<Order>,
    pub payments: Vec<f64>,
    /// E-mails registered through the register form
    pub accounts: Vec<String>,

    pending_errors: Vec<String>,
    /// Entities whose form submit silently does nothing
    broken_forms: HashSet<String>,
    /// Locators that stay attached but never become visible
    never_visible: HashSet<String>,
    /// Probes remaining before a locator turns visible
    delayed: HashMap<String, u32>,
    /// Locators that only render once this instant has passed
    appears_at: HashMap<String, Instant>,
    backup_filename: Option<String>,
    pub restored_from: Option<PathBuf>,
    pub dialogs_accepted: usize,
    latency: Duration,
    /// Time each probe or count takes to answer
    read_latency: Duration,

    /// Every state-changing call, in order
    pub log: Vec<String>,
    pub probes: usize,
    pub screenshots: usize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            active_tab: "dashboard".into(),
            order_status: "Pending".into(),
            backup_filename: Some("store-backup.xlsx".into()),
            ..Default::default()
        }
    }

    pub fn with_products(mut self, names: &[&str]) -> Self {
        self.products.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn with_customers(mut self, names: &[&str]) -> Self {
        self.customers.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn with_order(mut self, customer: &str) -> Self {
        self.orders.push(Order {
            customer: customer.into(),
            status: "Pending".into(),
        });
        self
    }

    pub fn with_page_error(mut self, message: &str) -> Self {
        self.pending_errors.push(message.into());
        self
    }

    pub fn with_broken_form(mut self, entity: &str) -> Self {
        self.broken_forms.insert(entity.into());
        self
    }

    pub fn with_never_visible(mut self, locator: &str) -> Self {
        self.never_visible.insert(locator.into());
        self
    }

    pub fn with_delayed(mut self, locator: &str, probes: u32) -> Self {
        self.delayed.insert(locator.into(), probes);
        self
    }

    /// `locator` is absent until `after` has elapsed from now
    pub fn with_appearing_after(mut self, locator: &str, after: Duration) -> Self {
        self.appears_at.insert(locator.into(), Instant::now() + after);
        self
    }

    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    pub fn with_backup_filename(mut self, name: Option<&str>) -> Self {
        self.backup_filename = name.map(str::to_string);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Already past the login form, on the dashboard
    pub fn logged_in(mut self) -> Self {
        self.logged_in = true;
        self
    }

    fn rows(&self, tab: &str) -> Option<usize> {
        match tab {
            "products" => Some(self.products.len()),
            "customers" => Some(self.customers.len()),
            "orders" => Some(self.orders.len()),
            "payments" => Some(self.payments.len()),
            _ => None,
        }
    }

    fn modal_open(&self, entity: &str) -> bool {
        self.open_modal.as_deref() == Some(entity)
    }

    fn field(&self, selector: &str) -> &str {
        self.fields.get(selector).map(String::as_str).unwrap_or("")
    }

    /// Newest order first, right after the placeholder option
    fn newest_order_label(&self) -> Option<String> {
        self.orders
            .last()
            .map(|order| format!("Order #{} - {}", self.orders.len(), order.customer))
    }

    /// (match count, first match visible) for the current UI state
    fn lookup(&self, selector: &str) -> (usize, bool) {
        let shown = |on: bool| if on { (1, true) } else { (0, false) };

        match selector {
            "#login-form" | "#login-email" | "#login-password" | "#login-form button[type='submit']"
            | "#show-register" => return shown(!self.logged_in && !self.register_shown),
            "#register-form"
            | "#register-email"
            | "#register-password"
            | "#register-form button[type='submit']" => {
                return shown(!self.logged_in && self.register_shown)
            }
            "body" => return (1, true),
            "body[data-ready='true']" => return (usize::from(self.logged_in), self.logged_in),
            "#app-container" => return shown(self.logged_in),
            "#sales-chart" => return shown(self.logged_in && self.active_tab == "dashboard"),
            // Canvases are always placed; they only draw once there is data
            "#product-sales-chart" | "#customer-ranking-chart" => {
                let placed = self.logged_in && self.active_tab == "dashboard";
                return (usize::from(placed), placed && !self.orders.is_empty());
            }
            "#pending-orders-list tr" => {
                let pending = self.orders.iter().filter(|o| o.status != "Paid").count();
                return (pending, self.logged_in && self.active_tab == "dashboard" && pending > 0);
            }
            "#backup-data-btn" => return shown(self.logged_in && self.active_tab == "settings"),
            // Hidden file input: attached, never visible
            "#restore-data-input" => {
                return (usize::from(self.logged_in && self.active_tab == "settings"), false)
            }
            "#order-customer-autocomplete" | "#order-status" | "#add-order-item-btn" => {
                return shown(self.modal_open("order"))
            }
            ".order-item-product" | ".order-item-quantity" => {
                let n = if self.modal_open("order") { self.order_items } else { 0 };
                return (n, n > 0);
            }
            "#autocomplete-results div" | "#autocomplete-results div:visible" => {
                let n = self.autocomplete.len();
                return (n, n > 0);
            }
            "#payment-details-container:not(.hidden)" | "#order-amount-paid" | "#order-reference" => {
                return shown(self.modal_open("order") && self.order_status == "Partial")
            }
            "#product-description" | "#product-retail-price" | "#product-wholesale-price" => {
                return shown(self.modal_open("product"))
            }
            "#customer-name" | "#customer-phone" => return shown(self.modal_open("customer")),
            "#payment-order" | "#payment-amount" => return shown(self.modal_open("payment")),
            "#payment-order option:nth-child(2)" => {
                return (usize::from(self.modal_open("payment") && !self.orders.is_empty()), false)
            }
            _ => {}
        }

        if let Some(tab) = selector
            .strip_prefix("a[data-tab='")
            .and_then(|s| s.strip_suffix("']"))
        {
            return shown(self.logged_in && TABS.contains(&tab));
        }
        if let Some(tab) = selector.strip_prefix('#').and_then(|s| s.strip_suffix(".tab-content.active")) {
            return shown(self.logged_in && self.active_tab == tab);
        }
        if let Some(tab) = selector.strip_prefix('#').and_then(|s| s.strip_suffix("-table-body tr")) {
            if let Some(n) = self.rows(tab) {
                return (n, n > 0 && self.active_tab == tab);
            }
        }
        for entity in ENTITIES {
            let tab = format!("{entity}s");
            if selector == format!("#add-{entity}-btn") {
                return shown(self.logged_in && self.active_tab == tab && self.open_modal.is_none());
            }
            if selector == format!("#{entity}-modal")
                || selector == format!("#{entity}-modal .close-btn")
                || selector == format!("#{entity}-form button[type='submit']")
            {
                return shown(self.modal_open(entity));
            }
        }
        (0, false)
    }

    fn require(&self, locator: &Locator) -> E2eResult<()> {
        let (count, visible) = self.lookup(locator.as_str());
        if count == 0 {
            return Err(E2eError::ElementNotFound(locator.clone()));
        }
        if !visible || self.never_visible.contains(locator.as_str()) {
            return Err(E2eError::Timeout {
                what: format!("{locator} to be actionable"),
                waited_ms: 0,
            });
        }
        Ok(())
    }

    fn open(&mut self, entity: &str) {
        self.open_modal = Some(entity.to_string());
        self.fields.clear();
        self.order_status = "Pending".into();
        self.order_items = 1;
        self.autocomplete.clear();
        self.selected_customer = None;
    }

    fn register(&mut self) {
        let email = self.field("#register-email").to_string();
        let password_ok = self.field("#register-password").len() >= 6;
        let taken = email == EMAIL || self.accounts.contains(&email);
        self.fields.clear();
        if email.contains('@') && password_ok && !taken {
            self.accounts.push(email);
            self.logged_in = true;
            self.register_shown = false;
            self.active_tab = "dashboard".into();
        }
    }

    fn submit(&mut self, entity: &str) {
        if self.broken_forms.contains(entity) {
            // The dialog closes as if the save went through
            self.open_modal = None;
            return;
        }
        match entity {
            "product" => {
                let name = self.field("#product-description").to_string();
                if name.is_empty() {
                    return;
                }
                self.products.push(name);
            }
            "customer" => {
                let name = self.field("#customer-name").to_string();
                if name.is_empty() {
                    return;
                }
                self.customers.push(name);
            }
            "order" => {
                let Some(customer) = self.selected_customer.clone() else {
                    return;
                };
                if !self.fields.contains_key(".order-item-product") {
                    return;
                }
                if self.order_status == "Partial" {
                    match self.field("#order-amount-paid").parse::<f64>() {
                        Ok(paid) if paid > 0.0 => self.payments.push(paid),
                        _ => return,
                    }
                }
                self.orders.push(Order {
                    customer,
                    status: self.order_status.clone(),
                });
            }
            "payment" => {
                if !self.fields.contains_key("#payment-order") {
                    return;
                }
                match self.field("#payment-amount").parse::<f64>() {
                    Ok(amount) if amount > 0.0 => self.payments.push(amount),
                    _ => return,
                }
            }
            _ => return,
        }
        self.open_modal = None;
    }

    /// Sleep for the read latency, then report whether `selector` has rendered yet
    async fn observed_rendered(&self, selector: &str) -> bool {
        if !self.read_latency.is_zero() {
            tokio::time::sleep(self.read_latency).await;
        }
        self.appears_at
            .get(selector)
            .map_or(true, |at| Instant::now() >= *at)
    }

    async fn settle(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl BrowserAdapter for FakeStore {
    async fn navigate(&mut self, url: &str) -> E2eResult<()> {
        self.settle().await;
        self.log.push(format!("navigate:{url}"));
        if url.starts_with("http://unreachable") {
            return Err(E2eError::Navigation(format!("net::ERR_CONNECTION_REFUSED at {url}")));
        }
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, text: &str) -> E2eResult<()> {
        self.require(locator)?;
        self.log.push(format!("fill:{locator}"));
        let selector = locator.as_str();
        if selector == "#order-customer-autocomplete" {
            let needle = text.to_lowercase();
            self.autocomplete = self
                .customers
                .iter()
                .filter(|c| !needle.is_empty() && c.to_lowercase().contains(&needle))
                .cloned()
                .collect();
        }
        self.fields.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> E2eResult<()> {
        self.require(locator)?;
        self.settle().await;
        self.log.push(format!("click:{locator}"));
        let selector = locator.as_str();

        if selector == "#login-form button[type='submit']" {
            if self.field("#login-email") == EMAIL && self.field("#login-password") == PASSWORD {
                self.logged_in = true;
                self.active_tab = "dashboard".into();
            }
            self.fields.clear();
            return Ok(());
        }
        if selector == "#show-register" {
            self.register_shown = true;
            return Ok(());
        }
        if selector == "#register-form button[type='submit']" {
            self.register();
            return Ok(());
        }
        if selector == "#autocomplete-results div:visible" {
            self.selected_customer = self.autocomplete.first().cloned();
            self.autocomplete.clear();
            return Ok(());
        }
        if selector == "#add-order-item-btn" {
            self.order_items += 1;
            return Ok(());
        }
        if let Some(tab) = selector
            .strip_prefix("a[data-tab='")
            .and_then(|s| s.strip_suffix("']"))
        {
            self.active_tab = tab.to_string();
            self.open_modal = None;
            return Ok(());
        }
        for entity in ENTITIES {
            if selector == format!("#add-{entity}-btn") {
                self.open(entity);
                return Ok(());
            }
            if selector == format!("#{entity}-modal .close-btn") {
                self.open_modal = None;
                return Ok(());
            }
            if selector == format!("#{entity}-form button[type='submit']") {
                self.submit(entity);
                return Ok(());
            }
        }
        Ok(())
    }

    async fn select_option(&mut self, locator: &Locator, option: &OptionRef) -> E2eResult<()> {
        self.require(locator)?;
        self.log.push(format!("select:{locator}"));
        let selector = locator.as_str();
        let choices = match selector {
            ".order-item-product" => self.products.len(),
            "#payment-order" => self.orders.len(),
            "#order-status" => 3,
            _ => 0,
        };
        let picked = match option {
            // Index 0 is the placeholder option
            OptionRef::Index(i) if (1..=choices).contains(i) => i.to_string(),
            OptionRef::Label(label) | OptionRef::Value(label)
                if selector == "#order-status"
                    && ["Pending", "Partial", "Paid"].contains(&label.as_str()) =>
            {
                self.order_status = label.clone();
                label.clone()
            }
            other => {
                return Err(E2eError::Playwright(format!("{locator}: no option {other}")));
            }
        };
        self.fields.insert(selector.to_string(), picked);
        Ok(())
    }

    async fn probe(&mut self, locator: &Locator) -> E2eResult<ElementProbe> {
        self.probes += 1;
        if !self.observed_rendered(locator.as_str()).await {
            return Ok(ElementProbe::absent());
        }
        let (count, mut visible) = self.lookup(locator.as_str());
        if self.never_visible.contains(locator.as_str()) {
            visible = false;
        }
        if let Some(remaining) = self.delayed.get_mut(locator.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                visible = false;
            }
        }
        Ok(ElementProbe { count, visible })
    }

    async fn read_text(&mut self, locator: &Locator) -> E2eResult<String> {
        let (count, _) = self.lookup(locator.as_str());
        if count == 0 {
            return Err(E2eError::ElementNotFound(locator.clone()));
        }
        let text = match locator.as_str() {
            "#payment-order option:nth-child(2)" => self.newest_order_label().unwrap_or_default(),
            "#products-table-body tr" => self.products[0].clone(),
            "#customers-table-body tr" => self.customers[0].clone(),
            other => self.field(other).to_string(),
        };
        Ok(text)
    }

    async fn read_attribute(&mut self, locator: &Locator, name: &str) -> E2eResult<Option<String>> {
        let (count, _) = self.lookup(locator.as_str());
        if count == 0 {
            return Err(E2eError::ElementNotFound(locator.clone()));
        }
        let value = match (locator.as_str(), name) {
            ("body", "data-ready") if self.logged_in => Some("true".to_string()),
            _ => None,
        };
        Ok(value)
    }

    async fn count(&mut self, locator: &Locator) -> E2eResult<usize> {
        if !self.observed_rendered(locator.as_str()).await {
            return Ok(0);
        }
        Ok(self.lookup(locator.as_str()).0)
    }

    async fn expect_download(
        &mut self,
        trigger: &Locator,
        timeout_ms: u64,
        save_to: Option<&Path>,
    ) -> E2eResult<DownloadInfo> {
        self.require(trigger)?;
        self.log.push(format!("download:{trigger}"));
        let filename = match (trigger.as_str(), &self.backup_filename) {
            ("#backup-data-btn", Some(name)) => name.clone(),
            _ => {
                return Err(E2eError::NoDownload {
                    trigger: trigger.to_string(),
                    waited_ms: timeout_ms,
                })
            }
        };
        if let Some(path) = save_to {
            std::fs::write(path, format!("products={}", self.products.len()))?;
        }
        Ok(DownloadInfo {
            suggested_filename: filename,
            saved_to: save_to.map(Path::to_path_buf),
        })
    }

    async fn set_input_files(&mut self, locator: &Locator, paths: &[PathBuf]) -> E2eResult<()> {
        let (count, _) = self.lookup(locator.as_str());
        if count == 0 {
            return Err(E2eError::ElementNotFound(locator.clone()));
        }
        for path in paths {
            std::fs::metadata(path)?;
        }
        self.log.push(format!("upload:{locator}"));
        if locator.as_str() == "#restore-data-input" {
            // The app asks for confirmation before replacing data
            self.dialogs_accepted += 1;
            self.restored_from = paths.first().cloned();
        }
        Ok(())
    }

    async fn screenshot(&mut self, dest: &Path) -> E2eResult<()> {
        self.screenshots += 1;
        std::fs::write(dest, format!("\u{89}PNG tab={}", self.active_tab))?;
        Ok(())
    }

    async fn take_page_errors(&mut self) -> E2eResult<Vec<String>> {
        Ok(std::mem::take(&mut self.pending_errors))
    }
}

/// Hands out fresh stores and tracks how many are open at once
pub struct FakeFactory {
    seed: fn() -> FakeStore,
    fail_open: bool,
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl FakeFactory {
    pub fn new(seed: fn() -> FakeStore) -> Self {
        Self {
            seed,
            fail_open: false,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(FakeStore::new)
        }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeStore;

    async fn open(&self) -> E2eResult<FakeStore> {
        if self.fail_open {
            return Err(E2eError::PlaywrightNotFound);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok((self.seed)())
    }

    async fn close(&self, _session: FakeStore) -> E2eResult<()> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Bundled scenarios shipped with the crate
pub fn scenarios_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios")
}
