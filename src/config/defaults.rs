//! Default values for configuration

/// Default backend API URL
pub fn default_api_url() -> String {
    std::env::var("ORBITA_API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string())
}

/// Default request timeout for gateway calls
pub fn default_api_timeout() -> u64 {
    30
}

/// Default realtime/data service URL
pub fn default_realtime_url() -> String {
    std::env::var("ORBITA_REALTIME_URL")
        .unwrap_or_else(|_| "https://placeholder.supabase.co".to_string())
}

/// Default environment variable holding the realtime service key
pub fn default_realtime_key_env() -> String {
    "ORBITA_REALTIME_KEY".to_string()
}

/// Default interval between channel heartbeats
pub fn default_heartbeat_secs() -> u64 {
    25
}

/// Default time to wait for a channel join reply
pub fn default_join_timeout_secs() -> u64 {
    10
}

/// Realtime is on unless explicitly disabled
pub fn default_realtime_enabled() -> bool {
    true
}

/// Fall back to a demo session when the login call cannot be completed
pub fn default_demo_fallback() -> bool {
    true
}

/// Credential stored for demo sessions
pub fn default_demo_token() -> String {
    "demo-token-orbita-2026".to_string()
}

/// Default page size for the leads list
pub fn default_leads_limit() -> usize {
    100
}

/// Default number of messages loaded per conversation thread
pub fn default_thread_limit() -> usize {
    100
}

/// Default number of leads shown on the conversations page
pub fn default_conversation_leads_limit() -> usize {
    30
}

/// Default page size for quotes and meetings
pub fn default_records_limit() -> usize {
    100
}

/// Default number of campaigns listed
pub fn default_campaigns_limit() -> usize {
    50
}

/// Default number of bot sessions listed
pub fn default_sessions_limit() -> usize {
    50
}

/// Default number of activity log entries on the agents page
pub fn default_activity_limit() -> usize {
    30
}

/// Default number of activity log entries on the dashboard
pub fn default_dashboard_activity_limit() -> usize {
    10
}

/// Default number of admin notifications listed
pub fn default_notifications_limit() -> usize {
    20
}
