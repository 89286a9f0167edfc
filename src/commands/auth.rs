//! Login and logout commands

use crate::app::App;
use crate::error::Result;
use crate::shell::LoginResult;
use serde::Serialize;
use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, Serialize)]
pub struct LoginReport {
    pub email: String,
    /// `granted`, `demo` or `denied`
    pub outcome: String,
    pub message: Option<String>,
}

impl LoginReport {
    pub fn is_authenticated(&self) -> bool {
        self.outcome != "denied"
    }
}

/// Read a password from stdin when none was given on the command line
pub fn read_password(prompt: &str) -> Result<String> {
    eprint!("{}", prompt);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

pub async fn cmd_login(app: &App, email: &str, password: &str) -> Result<LoginReport> {
    let result = app.shell.login(email, password).await?;
    let (outcome, message) = match result {
        LoginResult::Granted => ("granted", None),
        LoginResult::Demo => ("demo", None),
        LoginResult::Denied { message } => ("denied", Some(message)),
    };
    Ok(LoginReport {
        email: email.trim().to_string(),
        outcome: outcome.to_string(),
        message,
    })
}

pub fn print_login(report: &LoginReport) {
    match report.outcome.as_str() {
        "granted" => println!("✓ Logged in as {}", report.email),
        "demo" => println!("✓ Logged in as {} (demo session)", report.email),
        _ => println!(
            "✗ Login refused: {}",
            report.message.as_deref().unwrap_or("invalid credentials")
        ),
    }
}

pub async fn cmd_logout(app: &mut App) -> Result<()> {
    app.shell.logout().await?;
    Ok(())
}
