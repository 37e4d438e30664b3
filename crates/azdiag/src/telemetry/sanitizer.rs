//! Secret scrubbing for outgoing telemetry

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::Properties;

const REDACTED: &str = "[REDACTED]";

/// `name=value` secrets inside connection strings and query strings
static KEY_VALUE_SECRETS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(AccountKey|SharedAccessKey|InstrumentationKey|api-key|sig)=([^;&\s]+)").ok()
});

/// Authorization header values
static AUTH_SCHEMES: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(SharedKeyLite|SharedKey|Bearer)\s+[A-Za-z0-9+/=:._-]+").ok());

const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "key",
    "authorization",
    "credential",
    "signature",
];

/// Redact credentials embedded in free text
pub fn sanitize_string(s: &str) -> String {
    let mut result = s.to_string();
    if let Some(pattern) = KEY_VALUE_SECRETS.as_ref() {
        result = pattern
            .replace_all(&result, |caps: &regex::Captures<'_>| {
                format!("{}={}", &caps[1], REDACTED)
            })
            .into_owned();
    }
    if let Some(pattern) = AUTH_SCHEMES.as_ref() {
        result = pattern
            .replace_all(&result, |caps: &regex::Captures<'_>| {
                format!("{} {}", &caps[1], REDACTED)
            })
            .into_owned();
    }
    result
}

/// Token counters are numbers, not secrets
fn is_sensitive_field(key: &str) -> bool {
    let lower = key.to_lowercase();
    !lower.ends_with("tokens") && SENSITIVE_FIELDS.iter().any(|f| lower.contains(f))
}

/// Redact sensitive property values and scrub the rest
pub fn sanitize_properties(properties: &Properties) -> Properties {
    properties
        .iter()
        .map(|(k, v)| {
            if is_sensitive_field(k) {
                (k.clone(), REDACTED.to_string())
            } else {
                (k.clone(), sanitize_string(v))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_connection_string() {
        let input = "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=abc123==;EndpointSuffix=core.windows.net";
        let result = sanitize_string(input);
        assert!(result.contains("AccountKey=[REDACTED]"));
        assert!(result.contains("AccountName=acct"));
        assert!(!result.contains("abc123"));
    }

    #[test]
    fn test_sanitize_sas_and_auth_header() {
        let result = sanitize_string("https://a.blob.core.windows.net/c?sv=1&sig=xyz%3D");
        assert!(result.ends_with("sig=[REDACTED]"));

        let result = sanitize_string("Authorization: SharedKeyLite acct:c2lnbmF0dXJl");
        assert_eq!(result, "Authorization: SharedKeyLite [REDACTED]");
    }

    #[test]
    fn test_sanitize_properties() {
        let mut properties = Properties::new();
        properties.insert("apiKey".to_string(), "s3cret".to_string());
        properties.insert("totalTokens".to_string(), "42".to_string());
        properties.insert("model".to_string(), "gpt-3.5".to_string());

        let result = sanitize_properties(&properties);
        assert_eq!(result["apiKey"], REDACTED);
        assert_eq!(result["totalTokens"], "42");
        assert_eq!(result["model"], "gpt-3.5");
    }
}
