//! Navigation and session shell
//!
//! The shell owns what outlives a page: the route guard, login and logout,
//! the backend health banner, and the sidebar counters with their own
//! subscriptions.

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::gateway::{BotInfo, LoginOutcome};
use crate::models::{timestamp, AgentLog, Lead, LeadStatus, Record};
use crate::realtime::{ChangeKind, RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::Query;
use crate::views::{
    AgentsView, AnalyticsView, CampaignsView, ConversationsView, DashboardView, LeadsView,
    MeetingsView, QuotesView, SettingsView, TelegramView, View, ViewContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Pages reachable from the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Dashboard,
    Leads,
    Conversations,
    Telegram,
    Quotes,
    Meetings,
    Campaigns,
    Agents,
    Analytics,
    Settings,
}

impl Route {
    /// Authenticated pages, in sidebar order
    pub const PAGES: [Route; 10] = [
        Route::Dashboard,
        Route::Leads,
        Route::Conversations,
        Route::Telegram,
        Route::Quotes,
        Route::Meetings,
        Route::Campaigns,
        Route::Agents,
        Route::Analytics,
        Route::Settings,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Dashboard => "/dashboard",
            Route::Leads => "/leads",
            Route::Conversations => "/conversaciones",
            Route::Telegram => "/telegram",
            Route::Quotes => "/cotizaciones",
            Route::Meetings => "/reuniones",
            Route::Campaigns => "/campanas",
            Route::Agents => "/agentes",
            Route::Analytics => "/analitica",
            Route::Settings => "/configuracion",
        }
    }

    /// Short English name used by the CLI
    pub fn name(&self) -> &'static str {
        match self {
            Route::Login => "login",
            Route::Dashboard => "dashboard",
            Route::Leads => "leads",
            Route::Conversations => "conversations",
            Route::Telegram => "telegram",
            Route::Quotes => "quotes",
            Route::Meetings => "meetings",
            Route::Campaigns => "campaigns",
            Route::Agents => "agents",
            Route::Analytics => "analytics",
            Route::Settings => "settings",
        }
    }

    fn lookup(raw: &str) -> Option<Route> {
        let key = raw.trim().trim_matches('/').to_lowercase();
        if key.is_empty() {
            return Some(Route::Dashboard);
        }
        std::iter::once(Route::Login)
            .chain(Route::PAGES)
            .find(|r| r.name() == key || r.path().trim_start_matches('/') == key)
    }

    /// Resolve a path; unknown paths land on the dashboard
    pub fn from_path(path: &str) -> Route {
        Self::lookup(path).unwrap_or(Route::Dashboard)
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Route::Login)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Route {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::lookup(s).ok_or_else(|| Error::InvalidInput(format!("unknown page: {}", s)))
    }
}

/// How a login attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    Granted,
    /// The backend gave no credential; a demo session was opened instead
    Demo,
    Denied { message: String },
}

/// Backend reachability as shown above every page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Banner {
    #[default]
    Unknown,
    Connected,
    /// Read-only: the health probe failed
    Disconnected { reason: String },
}

impl Banner {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Banner::Disconnected { .. })
    }
}

const SLOT_LEADS: &str = "leads";
const SLOT_ACTIVITY: &str = "activity";

/// Cross-page counters: active leads and the latest agent activity
pub struct Sidebar {
    ctx: ViewContext,
    subs: SubscriptionSet,
    active_leads: u64,
    last_activity: Option<DateTime<Utc>>,
    bots: Option<BotInfo>,
}

impl Sidebar {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            subs: ctx.subscriptions("sidebar"),
            ctx,
            active_leads: 0,
            last_activity: None,
            bots: None,
        }
    }

    pub fn active_leads(&self) -> u64 {
        self.active_leads
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    pub fn bots(&self) -> Option<&BotInfo> {
        self.bots.as_ref()
    }

    pub async fn recount(&mut self) -> Result<()> {
        let query = Query::table(Lead::TABLE).neq("estado", LeadStatus::Inactive);
        self.active_leads = self.ctx.data.count(&query).await?;
        Ok(())
    }

    async fn load_last_activity(&mut self) -> Result<()> {
        let query = Query::table(AgentLog::TABLE)
            .select(&["created_at"])
            .order("created_at", false)
            .limit(1);
        let rows = self.ctx.data.select(&query).await?;
        self.last_activity = rows
            .first()
            .and_then(|row| row.get("created_at"))
            .and_then(Value::as_str)
            .and_then(timestamp::parse);
        Ok(())
    }
}

#[async_trait]
impl View for Sidebar {
    fn name(&self) -> &'static str {
        "sidebar"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(SLOT_LEADS, SubscriptionKey::for_record::<Lead>())
            .await;
        self.subs
            .ensure(
                SLOT_ACTIVITY,
                SubscriptionKey::for_record::<AgentLog>().only(ChangeKind::Insert),
            )
            .await;
        match self.ctx.gateway.bot_info().await {
            Ok(bots) => self.bots = Some(bots),
            Err(e) => debug!("sidebar bot info unavailable: {}", e),
        }
        self.recount().await?;
        self.load_last_activity().await
    }

    async fn on_change(&mut self, slot: &'static str, change: RawChange) -> Result<()> {
        match slot {
            SLOT_LEADS => self.recount().await,
            SLOT_ACTIVITY => {
                let at = change
                    .row()
                    .and_then(|row| row.get("created_at"))
                    .and_then(Value::as_str)
                    .and_then(timestamp::parse)
                    .unwrap_or_else(Utc::now);
                self.last_activity = Some(at);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}

pub struct Shell {
    ctx: ViewContext,
    auth: AuthConfig,
    banner: Banner,
    sidebar: Sidebar,
}

impl Shell {
    pub fn new(ctx: ViewContext, auth: AuthConfig) -> Self {
        Self {
            sidebar: Sidebar::new(ctx.clone()),
            ctx,
            auth,
            banner: Banner::Unknown,
        }
    }

    pub fn context(&self) -> &ViewContext {
        &self.ctx
    }

    pub fn banner(&self) -> &Banner {
        &self.banner
    }

    pub fn sidebar(&self) -> &Sidebar {
        &self.sidebar
    }

    pub fn sidebar_mut(&mut self) -> &mut Sidebar {
        &mut self.sidebar
    }

    pub fn is_authenticated(&self) -> bool {
        self.ctx.session.is_authenticated()
    }

    /// Probe the backend; a failure only changes the banner
    pub async fn probe(&mut self) -> &Banner {
        self.banner = match self.ctx.gateway.health().await {
            Ok(_) => Banner::Connected,
            Err(e) => {
                warn!("backend health probe failed: {}", e);
                Banner::Disconnected {
                    reason: e.to_string(),
                }
            }
        };
        &self.banner
    }

    /// Health probe plus the sidebar counters; never fails the shell
    pub async fn mount(&mut self) {
        self.probe().await;
        if let Err(e) = self.sidebar.mount().await {
            warn!("sidebar counters unavailable: {}", e);
        }
    }

    pub fn teardown(&mut self) {
        self.sidebar.teardown();
    }

    /// Where a navigation to `route` actually lands
    pub fn resolve(&self, route: Route) -> Route {
        if route.requires_auth() && !self.is_authenticated() {
            debug!("{} requires a session, redirecting to login", route);
            return Route::Login;
        }
        route
    }

    /// Store for an authenticated page; `None` for the login route
    pub fn page(&self, route: Route) -> Option<Box<dyn View>> {
        let ctx = self.ctx.clone();
        let view: Box<dyn View> = match self.resolve(route) {
            Route::Login => return None,
            Route::Dashboard => Box::new(DashboardView::new(ctx)),
            Route::Leads => Box::new(LeadsView::new(ctx)),
            Route::Conversations => Box::new(ConversationsView::new(ctx)),
            Route::Telegram => Box::new(TelegramView::new(ctx)),
            Route::Quotes => Box::new(QuotesView::new(ctx)),
            Route::Meetings => Box::new(MeetingsView::new(ctx)),
            Route::Campaigns => Box::new(CampaignsView::new(ctx)),
            Route::Agents => Box::new(AgentsView::new(ctx)),
            Route::Analytics => Box::new(AnalyticsView::new(ctx)),
            Route::Settings => Box::new(SettingsView::new(ctx)),
        };
        Some(view)
    }

    async fn open_demo_session(&self) -> Result<()> {
        self.ctx.session.set_token(&self.auth.demo_token).await
    }

    /// Log in; with the demo fallback enabled a silent or absent backend
    /// still opens a session, an explicit refusal never does
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
        if email.trim().is_empty() || password.is_empty() {
            let message = "Email and password are required".to_string();
            let err = Error::InvalidInput(message.clone());
            self.ctx.notifier.error("Could not log in", &err);
            return Ok(LoginResult::Denied { message });
        }

        let notifier = &self.ctx.notifier;
        match self.ctx.gateway.login(email.trim(), password).await {
            Ok(LoginOutcome::Granted { token }) => {
                self.ctx.session.set_token(&token).await?;
                info!("logged in as {}", email.trim());
                notifier.success("Access granted. Welcome to ORBITA.");
                Ok(LoginResult::Granted)
            }
            Ok(LoginOutcome::Denied { message }) => {
                notifier.error(
                    "Could not log in",
                    &Error::Rejected(message.clone()),
                );
                Ok(LoginResult::Denied { message })
            }
            Ok(LoginOutcome::Unrecognized) if self.auth.demo_fallback => {
                self.open_demo_session().await?;
                info!("login answered without a credential, demo session opened");
                notifier.success("Demo mode active. Welcome to ORBITA.");
                Ok(LoginResult::Demo)
            }
            Ok(LoginOutcome::Unrecognized) => {
                let message = "Invalid credentials".to_string();
                notifier.error("Could not log in", &Error::Rejected(message.clone()));
                Ok(LoginResult::Denied { message })
            }
            Err(e) if self.auth.demo_fallback => {
                warn!("login call failed ({}), opening a demo session", e);
                self.open_demo_session().await?;
                notifier.info("Backend unavailable. Demo mode active.");
                Ok(LoginResult::Demo)
            }
            Err(e) => {
                notifier.error("Could not reach the backend", &e);
                Err(e)
            }
        }
    }

    /// Drop the credential; the next navigation lands on the login page
    pub async fn logout(&mut self) -> Result<Route> {
        self.ctx.session.clear().await?;
        self.sidebar.teardown();
        info!("logged out");
        Ok(Route::Login)
    }
}
