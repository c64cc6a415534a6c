//! Provider registry: the static list of monitored endpoints and the one-time
//! validation that turns raw records into `ProviderIdentity` values.

use std::collections::HashSet;
use tracing::{error, info, warn};
use url::Url;

use crate::config::ProviderRecord;
use crate::error::RegistryIssue;
use crate::models::ProviderIdentity;

const FALLBACK_COLOR: &str = "#888888";

const DEFAULT_PROVIDERS: &[(&str, &str, &str, &str, &str)] = &[
    ("openai", "OpenAI", "https://api.openai.com", "/v1/models", "#10A37F"),
    ("anthropic", "Anthropic", "https://api.anthropic.com", "/v1/models", "#D97757"),
    ("gemini", "Google Gemini", "https://generativelanguage.googleapis.com", "/v1beta/models", "#4285F4"),
    ("mistral", "Mistral AI", "https://api.mistral.ai", "/v1/models", "#FF7000"),
    ("groq", "Groq", "https://api.groq.com", "/openai/v1/models", "#F55036"),
    ("cohere", "Cohere", "https://api.cohere.com", "/v1/models", "#39594D"),
    ("deepseek", "DeepSeek", "https://api.deepseek.com", "/models", "#4D6BFE"),
    ("openrouter", "OpenRouter", "https://openrouter.ai", "/api/v1/models", "#6566F1"),
];

pub fn default_records() -> Vec<ProviderRecord> {
    DEFAULT_PROVIDERS
        .iter()
        .map(|&(id, name, endpoint, probe_path, color)| ProviderRecord {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            probe_path: probe_path.into(),
            color: color.into(),
        })
        .collect()
}

/// Validates every record, collecting all findings.
///
/// Records with a fatal issue are left out of the returned identities. Records
/// with only cosmetic issues are kept, with an empty name or color defaulted.
pub fn validate(records: &[ProviderRecord]) -> (Vec<ProviderIdentity>, Vec<RegistryIssue>) {
    let mut identities = Vec::with_capacity(records.len());
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for (index, record) in records.iter().enumerate() {
        let mut record_issues = Vec::new();

        for (field, value) in [
            ("id", &record.id),
            ("name", &record.name),
            ("endpoint", &record.endpoint),
            ("probePath", &record.probe_path),
            ("color", &record.color),
        ] {
            if value.trim().is_empty() {
                record_issues.push(RegistryIssue::MissingField { index, field });
            }
        }

        if !record.id.trim().is_empty() {
            if !record.endpoint.trim().is_empty() {
                if let Err(reason) = check_endpoint(&record.endpoint) {
                    record_issues.push(RegistryIssue::InvalidEndpoint {
                        id: record.id.clone(),
                        endpoint: record.endpoint.clone(),
                        reason,
                    });
                }
            }
            if !record.color.is_empty() && !is_hex_color(&record.color) {
                record_issues.push(RegistryIssue::InvalidColor {
                    id: record.id.clone(),
                    color: record.color.clone(),
                });
            }
            if !seen.insert(record.id.clone()) {
                record_issues.push(RegistryIssue::DuplicateId { id: record.id.clone() });
            }
        }

        let fatal = record_issues.iter().any(RegistryIssue::is_fatal);
        issues.extend(record_issues);
        if fatal {
            continue;
        }

        identities.push(ProviderIdentity {
            id: record.id.clone(),
            name: if record.name.trim().is_empty() { record.id.clone() } else { record.name.clone() },
            color: if record.color.trim().is_empty() { FALLBACK_COLOR.into() } else { record.color.clone() },
            endpoint: record.endpoint.clone(),
            probe_path: record.probe_path.clone(),
        });
    }

    (identities, issues)
}

/// Validates and logs. Never fails: the worst case is an empty registry.
pub fn build(records: &[ProviderRecord]) -> Vec<ProviderIdentity> {
    let (identities, issues) = validate(records);

    for issue in &issues {
        if issue.is_fatal() {
            error!("Provider registry: {} (record dropped)", issue);
        } else {
            warn!("Provider registry: {}", issue);
        }
    }

    if identities.is_empty() {
        warn!("Provider registry is empty; rounds will probe nothing");
    } else {
        info!("Registered {} providers ({} issues reported)", identities.len(), issues.len());
    }
    identities
}

fn check_endpoint(endpoint: &str) -> Result<(), String> {
    let parsed = Url::parse(endpoint).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(()),
        "http" | "https" => Err("missing host".into()),
        other => Err(format!("unsupported scheme {other}")),
    }
}

fn is_hex_color(color: &str) -> bool {
    color
        .strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
