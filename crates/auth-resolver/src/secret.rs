use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// A single resolved parameter and the provider that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    pub value: String,
    pub provider: String,
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("value", &redact_value(&self.value))
            .field("provider", &self.provider)
            .finish()
    }
}

/// Output of one resolution call: parameter name to value.
///
/// Values are never cached by the resolver itself; only identity credentials
/// folded in here may come from the token cache, and their expiry is carried
/// in `expires_at`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResolvedSecret {
    values: BTreeMap<String, SecretValue>,
    expires_at: Option<DateTime<Utc>>,
}

impl ResolvedSecret {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        parameter: impl Into<String>,
        value: impl Into<String>,
        provider: impl Into<String>,
    ) {
        self.values.insert(
            parameter.into(),
            SecretValue {
                value: value.into(),
                provider: provider.into(),
            },
        );
    }

    pub fn get(&self, parameter: &str) -> Option<&str> {
        self.values.get(parameter).map(|v| v.value.as_str())
    }

    pub fn provider_of(&self, parameter: &str) -> Option<&str> {
        self.values.get(parameter).map(|v| v.provider.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Keep the earliest expiry seen.
    pub fn fold_expiry(&mut self, expires_at: Option<DateTime<Utc>>) {
        self.expires_at = match (self.expires_at, expires_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    /// Merge `other` into `self`; parameters in `other` win.
    pub fn merge(&mut self, other: ResolvedSecret) {
        self.fold_expiry(other.expires_at);
        self.values.extend(other.values);
    }

    /// Fold an identity credential in under the provider's name.
    pub fn absorb_credential(&mut self, provider: &str, credential: IssuedCredential) {
        self.fold_expiry(credential.expires_at);
        for (parameter, value) in credential.values {
            self.insert(parameter, value, provider);
        }
    }

    /// Plain parameter map, for handing to a scaler.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }
}

impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("values", &self.values)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Short-lived material issued for a pod identity or a login session.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    pub values: BTreeMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssuedCredential {
    pub fn token(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        let mut values = BTreeMap::new();
        values.insert(ACCESS_TOKEN.to_string(), token.into());
        Self { values, expires_at }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get(ACCESS_TOKEN)
    }
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, String> = self
            .values
            .iter()
            .map(|(k, v)| (k.as_str(), redact_value(v)))
            .collect();
        f.debug_struct("IssuedCredential")
            .field("values", &redacted)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Parameter name under which bearer tokens are exposed.
pub const ACCESS_TOKEN: &str = "accessToken";

/// Redact a secret value for display
pub fn redact_value(value: &str) -> String {
    let char_count = value.chars().count();
    if char_count <= 6 {
        "***".to_string()
    } else {
        let prefix: String = value.chars().take(3).collect();
        format!("{}***", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_merge_later_wins() {
        let mut first = ResolvedSecret::new();
        first.insert("password", "from-cluster", "secretTargetRef");
        first.insert("user", "admin", "secretTargetRef");

        let mut second = ResolvedSecret::new();
        second.insert("password", "from-vault", "hashiCorpVault");

        first.merge(second);
        assert_eq!(first.get("password"), Some("from-vault"));
        assert_eq!(first.provider_of("password"), Some("hashiCorpVault"));
        assert_eq!(first.get("user"), Some("admin"));
    }

    #[test]
    fn test_fold_expiry_keeps_earliest() {
        let now = Utc::now();
        let mut secret = ResolvedSecret::new();
        secret.fold_expiry(Some(now + Duration::minutes(10)));
        secret.fold_expiry(None);
        secret.fold_expiry(Some(now + Duration::minutes(5)));
        assert_eq!(secret.expires_at(), Some(now + Duration::minutes(5)));
    }

    #[test]
    fn test_debug_redacts_values() {
        let mut secret = ResolvedSecret::new();
        secret.insert("password", "verysecretpassword", "env");
        let rendered = format!("{:?}", secret);
        assert!(rendered.contains("ver***"));
        assert!(!rendered.contains("verysecretpassword"));

        let credential = IssuedCredential::token("eyJhbGciOiJSUzI1NiJ9", None);
        assert!(!format!("{:?}", credential).contains("eyJhbGciOiJSUzI1NiJ9"));
    }

    #[test]
    fn test_redact_value() {
        assert_eq!(redact_value("abc"), "***");
        assert_eq!(redact_value("secret"), "***");
        assert_eq!(redact_value("verylongsecret"), "ver***");
        assert_eq!(redact_value("密码12345"), "密码1***");
        assert_eq!(redact_value(""), "***");
    }
}
