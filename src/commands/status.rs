//! Status command implementation

use crate::app::App;
use crate::error::Result;
use crate::shell::Banner;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub api_url: String,
    pub realtime_url: String,
    pub realtime_enabled: bool,
    pub realtime_key_present: bool,
    pub authenticated: bool,
    pub backend_connected: bool,
    pub backend_error: Option<String>,
    pub services: BTreeMap<String, String>,
    pub active_leads: Option<u64>,
}

/// Probe the backend and read the sidebar counters
pub async fn cmd_status(app: &mut App) -> Result<StatusInfo> {
    info!("Getting status");

    let banner = app.shell.probe().await.clone();
    let services = match app.context().gateway.health().await {
        Ok(report) => report.services,
        Err(e) => {
            debug!("health details unavailable: {}", e);
            BTreeMap::new()
        }
    };

    let authenticated = app.shell.is_authenticated();
    let active_leads = if authenticated {
        match app.shell.sidebar_mut().recount().await {
            Ok(()) => Some(app.shell.sidebar().active_leads()),
            Err(e) => {
                debug!("lead count unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let config = &app.config;
    let (backend_connected, backend_error) = match banner {
        Banner::Connected => (true, None),
        Banner::Disconnected { reason } => (false, Some(reason)),
        Banner::Unknown => (false, None),
    };
    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        api_url: config.api.url.clone(),
        realtime_url: config.realtime.url.clone(),
        realtime_enabled: config.realtime.enabled,
        realtime_key_present: config.realtime.key().is_some(),
        authenticated,
        backend_connected,
        backend_error,
        services,
        active_leads,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 orbita Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Local storage: {}", status.db_path);
    println!("\nBackend:");
    println!("  URL: {}", status.api_url);
    let connection = if status.backend_connected {
        "✓ Connected".to_string()
    } else {
        match &status.backend_error {
            Some(reason) => format!("✗ Disconnected, read-only ({})", reason),
            None => "✗ Disconnected, read-only".to_string(),
        }
    };
    println!("  Status: {}", connection);
    for (name, state) in &status.services {
        println!("    {}: {}", name, state);
    }

    println!("\nRealtime:");
    println!("  URL: {}", status.realtime_url);
    let live = match (status.realtime_enabled, status.realtime_key_present) {
        (false, _) => "disabled in config",
        (true, false) => "⚠ key not set, live updates off",
        (true, true) => "✓ enabled",
    };
    println!("  Live updates: {}", live);

    println!("\nSession:");
    if status.authenticated {
        println!("  ✓ Logged in");
    } else {
        println!("  ✗ Not logged in (run 'orbita login')");
    }
    if let Some(count) = status.active_leads {
        println!("  Active leads: {}", count);
    }
}
