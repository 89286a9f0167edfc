//! Settings page: company profile, notification toggles, bot webhooks

use super::{View, ViewContext};
use crate::error::{Error, Result};
use crate::gateway::{BotInfo, WebhookTarget};
use crate::models::{Company, Record};
use crate::realtime::{RawChange, SubscriptionSet};
use crate::rest::{fetch_records, Query};
use crate::session::NotificationPrefs;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

pub struct SettingsView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    company: Option<Company>,
    prefs: NotificationPrefs,
    bots: Option<BotInfo>,
}

impl SettingsView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            subs: ctx.subscriptions("settings"),
            ctx,
            company: None,
            prefs: NotificationPrefs::default(),
            bots: None,
        }
    }

    /// The company profile; `None` until one exists
    pub fn company(&self) -> Option<&Company> {
        self.company.as_ref()
    }

    pub fn prefs(&self) -> &NotificationPrefs {
        &self.prefs
    }

    pub fn bots(&self) -> Option<&BotInfo> {
        self.bots.as_ref()
    }

    pub async fn load_company(&mut self) -> Result<()> {
        let query = Query::table(Company::TABLE).limit(1);
        let mut rows: Vec<Company> = fetch_records(self.ctx.data.as_ref(), &query).await?;
        self.company = rows.pop();
        Ok(())
    }

    pub async fn refresh_bots(&mut self) {
        match self.ctx.gateway.bot_info().await {
            Ok(bots) => self.bots = Some(bots),
            Err(e) => debug!("bot info unavailable: {}", e),
        }
    }

    /// Read the stored toggles; unreadable storage falls back to all-on
    pub async fn load_prefs(&mut self) {
        self.prefs = match self.ctx.session.notification_prefs().await {
            Ok(prefs) => prefs,
            Err(e) => {
                debug!("stored notification prefs unreadable: {}", e);
                NotificationPrefs::default()
            }
        };
    }

    /// Write the edited profile over the stored one
    pub async fn save_company(&mut self, form: Company) -> bool {
        let Some(id) = self.company.as_ref().map(|c| c.id.clone()) else {
            let err = Error::NotFound("company profile".to_string());
            self.ctx.notifier.error("Could not save the settings", &err);
            return false;
        };
        let saved = async {
            let mut patch = serde_json::to_value(&form)?;
            if let Value::Object(map) = &mut patch {
                map.remove("id");
            }
            let row = self
                .ctx
                .data
                .update(Company::TABLE, &id, patch)
                .await?
                .ok_or_else(|| Error::NotFound(format!("company {}", id)))?;
            Company::from_row(row)
        }
        .await;
        match saved {
            Ok(company) => {
                info!("company profile {} saved", company.id);
                self.company = Some(company);
                self.ctx.notifier.success("Company settings saved");
                true
            }
            Err(e) => {
                self.ctx.notifier.error("Could not save the settings", &e);
                false
            }
        }
    }

    /// Flip one notification toggle and persist the whole map
    pub async fn toggle_pref(&mut self, key: &str) -> Option<bool> {
        if !NotificationPrefs::KEYS.contains(&key) {
            let err = Error::InvalidInput(format!("unknown notification: {}", key));
            self.ctx.notifier.error("Could not change the notification", &err);
            return None;
        }
        let mut next = self.prefs.clone();
        let enabled = next.toggle(key);
        if let Err(e) = self.ctx.session.save_notification_prefs(&next).await {
            self.ctx.notifier.error("Could not change the notification", &e);
            return None;
        }
        self.prefs = next;
        let message = if enabled {
            format!("Enabled: {}", key)
        } else {
            format!("Disabled: {}", key)
        };
        self.ctx.notifier.success(&message);
        Some(enabled)
    }

    pub async fn setup_webhooks(&mut self) -> bool {
        match self.ctx.gateway.setup_webhooks(WebhookTarget::Both).await {
            Ok(_) => {
                self.ctx.notifier.success("Webhook configured");
                self.refresh_bots().await;
                true
            }
            Err(e) => {
                self.ctx.notifier.error("Could not configure the webhook", &e);
                false
            }
        }
    }
}

#[async_trait]
impl View for SettingsView {
    fn name(&self) -> &'static str {
        "settings"
    }

    async fn mount(&mut self) -> Result<()> {
        self.refresh_bots().await;
        self.load_prefs().await;
        if let Err(e) = self.load_company().await {
            self.ctx.notifier.error("Could not load the company profile", &e);
            return Err(e);
        }
        Ok(())
    }

    async fn on_change(&mut self, _slot: &'static str, _change: RawChange) -> Result<()> {
        Ok(())
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoticeLevel;
    use crate::session::SessionContext;
    use crate::storage::LocalStore;
    use crate::views::testkit::Harness;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_company_load_and_save() {
        let h = Harness::new();
        h.data.seed(
            "empresas",
            vec![json!({"id": 7, "nombre": "Orbita Labs", "sector": "software"})],
        );
        let mut view = SettingsView::new(h.ctx.clone());
        view.mount().await.unwrap();
        assert_eq!(view.company().map(|c| c.name.as_str()), Some("Orbita Labs"));

        let mut form = view.company().cloned().unwrap();
        form.website = Some("https://orbita.example".to_string());
        assert!(view.save_company(form).await);

        let stored = h.data.rows("empresas");
        assert_eq!(stored[0]["sitio_web"], "https://orbita.example");
        assert_eq!(stored[0]["id"], 7);
    }

    #[tokio::test]
    async fn test_save_without_profile_fails_once() {
        let h = Harness::new();
        let mut view = SettingsView::new(h.ctx.clone());
        view.mount().await.unwrap();
        assert!(view.company().is_none());

        assert!(!view.save_company(Company::default()).await);
        assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
    }

    #[tokio::test]
    async fn test_prefs_toggle_persists() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(&dir.path().join("local.db")).await.unwrap();
        let mut h = Harness::new();
        h.ctx.session = SessionContext::init(store).await.unwrap();

        let mut view = SettingsView::new(h.ctx.clone());
        view.mount().await.unwrap();
        assert!(view.prefs().get("nuevo_lead"));

        assert_eq!(view.toggle_pref("nuevo_lead").await, Some(false));
        assert_eq!(view.toggle_pref("desconocida").await, None);

        let reread = h.ctx.session.notification_prefs().await.unwrap();
        assert!(!reread.get("nuevo_lead"));
        assert!(reread.get("alerta_sistema"));
    }

    #[tokio::test]
    async fn test_webhook_setup_refreshes_bots() {
        let h = Harness::new();
        let mut view = SettingsView::new(h.ctx.clone());
        assert!(view.setup_webhooks().await);
        assert_eq!(h.gateway.call_count("setup_webhooks"), 1);
        assert_eq!(h.gateway.call_count("bot_info"), 1);
    }
}
