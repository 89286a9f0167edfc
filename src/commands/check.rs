//! Credential check: reports which backend variables are set

use serde::Serialize;

/// Variables the CLI needs, and whether each is required
pub const CREDENTIALS: [(&str, bool); 4] = [
    ("ORBITA_API_URL", true),
    ("ORBITA_REALTIME_URL", true),
    ("ORBITA_REALTIME_KEY", true),
    ("ORBITA_ENV", false),
];

const MASK_KEEP: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub name: String,
    pub required: bool,
    /// Masked value, `None` when unset
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub credentials: Vec<CredentialStatus>,
}

impl CheckReport {
    pub fn missing(&self) -> Vec<&str> {
        self.credentials
            .iter()
            .filter(|c| c.required && c.value.is_none())
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// First and last ten characters of long values, `***` otherwise
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 2 * MASK_KEEP {
        let head: String = chars[..MASK_KEEP].iter().collect();
        let tail: String = chars[chars.len() - MASK_KEEP..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "***".to_string()
    }
}

/// Check credentials against an arbitrary lookup
pub fn check_with(lookup: impl Fn(&str) -> Option<String>) -> CheckReport {
    let credentials = CREDENTIALS
        .iter()
        .map(|(name, required)| CredentialStatus {
            name: name.to_string(),
            required: *required,
            value: lookup(name)
                .filter(|v| !v.trim().is_empty())
                .map(|v| mask(&v)),
        })
        .collect();
    CheckReport { credentials }
}

/// Check credentials in the process environment
pub fn cmd_check() -> CheckReport {
    check_with(|name| std::env::var(name).ok())
}

pub fn print_check(report: &CheckReport) {
    println!("\n🔑 Backend credentials\n");
    for credential in &report.credentials {
        match &credential.value {
            Some(value) => println!("  ✓ {}: {}", credential.name, value),
            None if credential.required => println!("  ✗ {}: missing", credential.name),
            None => println!("  · {}: not set (optional)", credential.name),
        }
    }
    let missing = report.missing();
    if missing.is_empty() {
        println!("\nAll required credentials are set.");
    } else {
        println!("\nMissing: {}", missing.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_mask() {
        assert_eq!(mask("short"), "***");
        assert_eq!(mask("exactly-twenty-chars"), "***");
        assert_eq!(
            mask("eyJhbGciOiJIUzI1NiJ9.payload.signature0123"),
            "eyJhbGciOi...nature0123"
        );
    }

    #[test]
    fn test_missing_required_only() {
        let env: HashMap<&str, &str> = [
            ("ORBITA_API_URL", "http://localhost:8000"),
            ("ORBITA_REALTIME_URL", "https://abc.supabase.co"),
            ("ORBITA_REALTIME_KEY", "   "),
        ]
        .into_iter()
        .collect();
        let report = check_with(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(report.missing(), vec!["ORBITA_REALTIME_KEY"]);
        assert!(!report.is_complete());
        assert_eq!(report.credentials[1].value.as_deref(), Some("https://ab...upabase.co"));
        assert!(report.credentials[3].value.is_none());
    }
}
