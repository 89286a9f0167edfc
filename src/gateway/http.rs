use super::envelope::{decode_bytes, Envelope};
use super::types::*;
use super::Gateway;
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::models::CampaignChannel;
use crate::session::SessionContext;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Gateway over the backend's HTTP API
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    session: SessionContext,
}

impl HttpGateway {
    pub fn new(config: &ApiConfig, session: SessionContext) -> Result<Self> {
        let mut base_url = Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("Invalid API URL: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    /// Resolve `path` under the base URL, keeping any path prefix it carries
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid API URL: {}", e)))
    }

    /// Request with the session credential read at call time
    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        debug!("{} {}", method, url);
        let token = self.session.token().unwrap_or_default();
        Ok(self
            .client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token)))
    }

    /// Send and decode the envelope; non-2xx and failure envelopes become errors
    async fn call(&self, request: RequestBuilder) -> Result<Envelope> {
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let envelope = decode_bytes(&bytes);

        if !status.is_success() {
            let message = envelope
                .message()
                .map(str::to_string)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }

        match envelope {
            Envelope::Failure { message, .. } => Err(Error::Rejected(message)),
            success => Ok(success),
        }
    }

    async fn get_typed<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.request(Method::GET, path)?;
        self.call(request).await?.into_typed()
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> Result<Envelope> {
        let mut request = self.request(Method::POST, path)?;
        if let Some(body) = body {
            request = request.json(body);
        }
        self.call(request).await
    }

    fn ack(envelope: Envelope) -> Ack {
        match envelope {
            Envelope::Success { data, message } => Ack { message, data },
            Envelope::Failure { message, data } => Ack {
                message: Some(message),
                data,
            },
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn health(&self) -> Result<HealthReport> {
        self.get_typed("/health").await
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let request = self
            .request(Method::POST, "/api/v1/auth/login")?
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            });

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        debug!("Login answered {}", status);

        let outcome = LoginOutcome::from_body(&body);
        if !status.is_success() && !matches!(outcome, LoginOutcome::Denied { .. }) {
            let message = body
                .get("detail")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(outcome)
    }

    async fn chat(&self, lead_id: &str, message: &str, session_id: &str) -> Result<ChatReply> {
        let path = format!("/api/v1/leads/{}/chat", lead_id);
        let body = ChatRequest {
            mensaje: message,
            session_id,
        };
        self.post(&path, Some(&body)).await?.into_typed()
    }

    async fn send_channel_message(
        &self,
        chat_id: &str,
        message: &str,
        lead_id: &str,
    ) -> Result<Ack> {
        let body = ChannelMessageRequest {
            chat_id,
            mensaje: message,
            lead_id,
        };
        let envelope = self
            .post("/api/v1/telegram/send-message", Some(&body))
            .await?;
        Ok(Self::ack(envelope))
    }

    async fn send_campaign(
        &self,
        channel: CampaignChannel,
        message: &str,
        audience: &CampaignAudience,
    ) -> Result<Ack> {
        let body = CampaignSendRequest {
            tipo: channel.as_str(),
            mensaje: message,
            filtros: audience,
        };
        let envelope = self.post("/api/v1/campanas/enviar", Some(&body)).await?;
        Ok(Self::ack(envelope))
    }

    async fn preview_campaign(&self, message: &str) -> Result<CampaignPreview> {
        let body = CampaignPreviewRequest { mensaje: message };
        self.post("/api/v1/campanas/preview", Some(&body))
            .await?
            .into_typed()
    }

    async fn run_analytics(&self, kind: &str) -> Result<AnalyticsReport> {
        let body = AnalyticsRequest { tipo_analisis: kind };
        self.post("/api/v1/agents/analitico/run", Some(&body))
            .await?
            .into_typed()
    }

    async fn agent_status(&self) -> Result<BTreeMap<String, AgentStatusPatch>> {
        let raw: Option<BTreeMap<String, AgentStatusPatch>> =
            self.get_typed("/api/v1/agents/status").await?;
        Ok(raw.unwrap_or_default())
    }

    async fn dashboard(&self) -> Result<DashboardSnapshot> {
        let raw: Option<DashboardSnapshot> = self.get_typed("/api/v1/analytics/dashboard").await?;
        Ok(raw.unwrap_or_default())
    }

    async fn alerts(&self) -> Result<Vec<Alert>> {
        let request = self.request(Method::GET, "/api/v1/analytics/alertas")?;
        let data = self.call(request).await?.into_data()?;
        // Either a bare list or a report object carrying `alertas`
        match data {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(serde_json::from_value(Value::Array(items))?),
            Some(other) => {
                let report: AnalyticsReport = serde_json::from_value(other)
                    .map_err(|e| Error::Envelope(format!("unexpected alerts shape: {}", e)))?;
                Ok(report.alerts)
            }
        }
    }

    async fn channel_metrics(&self) -> Result<ChannelMetrics> {
        let raw: Option<ChannelMetrics> = self.get_typed("/api/v1/analytics/telegram").await?;
        Ok(raw.unwrap_or_default())
    }

    async fn bot_info(&self) -> Result<BotInfo> {
        let raw: Option<BotInfo> = self.get_typed("/api/v1/telegram/info").await?;
        Ok(raw.unwrap_or_default())
    }

    async fn setup_webhooks(&self, target: WebhookTarget) -> Result<Ack> {
        let envelope = self.post::<Value>(target.path(), None).await?;
        Ok(Self::ack(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer, session: SessionContext) -> HttpGateway {
        let config = ApiConfig {
            url: server.uri(),
            timeout_secs: 5,
        };
        HttpGateway::new(&config, session).unwrap()
    }

    #[tokio::test]
    async fn test_bearer_token_read_at_call_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/telegram/info"))
            .and(header("authorization", "Bearer tok-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"bot_leads": {"username": "orbita_leads_bot"}}
            })))
            .mount(&server)
            .await;

        let session = SessionContext::with_token("tok-1");
        let gateway = gateway_for(&server, session.clone());
        session.set_token("tok-2").await.unwrap();

        let info = gateway.bot_info().await.unwrap();
        assert_eq!(
            info.bot_leads.unwrap().username.as_deref(),
            Some("orbita_leads_bot")
        );
    }

    #[tokio::test]
    async fn test_missing_token_still_sends() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "healthy", "services": {"api": "running"}})),
            )
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        let report = gateway.health().await.unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.services.get("api").map(String::as_str), Some("running"));
    }

    #[tokio::test]
    async fn test_chat_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/leads/L1/chat"))
            .and(body_json(json!({"mensaje": "hola", "session_id": "s-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"respuesta_final": "¡Hola!"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        let reply = gateway.chat("L1", "hola", "s-1").await.unwrap();
        assert_eq!(reply.reply.as_deref(), Some("¡Hola!"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_status_error_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/telegram/send-message"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Token inválido"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        let err = gateway
            .send_channel_message("123", "hola", "L1")
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert!(err.to_string().contains("Token inválido"));
    }

    #[tokio::test]
    async fn test_failure_envelope_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/campanas/enviar"))
            .and(body_json(json!({"tipo": "telegram", "mensaje": "Promo", "filtros": {"estado": "nuevo"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "Sin destinatarios"
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        let audience = CampaignAudience {
            status: Some(crate::models::LeadStatus::New),
            stage: None,
        };
        let err = gateway
            .send_campaign(CampaignChannel::Telegram, "Promo", &audience)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(ref m) if m == "Sin destinatarios"));
    }

    #[tokio::test]
    async fn test_login_classifies_any_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "success": false,
                "message": "Credenciales incorrectas"
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        let outcome = gateway.login("a@b.c", "bad").await.unwrap();
        assert_eq!(
            outcome,
            LoginOutcome::Denied {
                message: "Credenciales incorrectas".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_login_missing_route_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not Found"})))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        let err = gateway.login("a@b.c", "pw").await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 404, ref message } if message == "Not Found"));
    }

    #[tokio::test]
    async fn test_base_url_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/backend/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/backend/api/v1/leads/L1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"respuesta_final": "ok"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ApiConfig {
            url: format!("{}/backend", server.uri()),
            timeout_secs: 5,
        };
        let gateway = HttpGateway::new(&config, SessionContext::detached()).unwrap();
        assert!(gateway.health().await.unwrap().is_healthy());
        let reply = gateway.chat("L1", "hola", "s-1").await.unwrap();
        assert_eq!(reply.reply.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_as_error() {
        let config = ApiConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
        };
        let gateway = HttpGateway::new(&config, SessionContext::detached()).unwrap();
        let err = gateway.login("a@b.c", "pw").await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_alerts_accept_list_or_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/analytics/alertas"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"alertas": [{"mensaje": "Leads fríos", "prioridad": "media"}]}
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        let alerts = gateway.alerts().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "Leads fríos");
    }

    #[tokio::test]
    async fn test_webhook_targets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/telegram/setup-admin-webhook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"webhook_url": "https://api.example.com/webhook/admin"}
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        let ack = gateway.setup_webhooks(WebhookTarget::Admin).await.unwrap();
        assert_eq!(ack.webhook_url(), Some("https://api.example.com/webhook/admin"));
    }

    #[tokio::test]
    async fn test_agent_status_missing_data_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agents/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, SessionContext::detached());
        assert!(gateway.agent_status().await.unwrap().is_empty());
    }
}
