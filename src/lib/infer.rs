//! Secret and encryption inference for `.env` values.
//!
//! Pure functions over a value string: Shannon entropy and prefix heuristics
//! decide whether a value is a secret, already encrypted at rest, or safe to
//! expose as-is. The prefix and marker sets are explicit configuration so
//! callers can extend them without touching global state.

use std::collections::HashMap;

#[cfg(feature = "tracing")]
use tracing::trace;

/// Entropy above this many bits per character marks a value as a secret.
pub const ENTROPY_THRESHOLD: f64 = 4.5;

/// How a value is classified. Derived, never persisted; recomputed per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
  Secret,
  EncryptedAtRest,
  Plain,
}

/// Prefix and marker sets consulted by [`classify`].
#[derive(Debug, Clone)]
pub struct InferenceConfig {
  /// Value prefixes that mark a secret (vendor API keys and the like).
  pub secret_prefixes: Vec<String>,
  /// Value prefixes of recognized encrypted-at-rest formats.
  pub encrypted_markers: Vec<String>,
}

impl Default for InferenceConfig {
  fn default() -> Self {
    Self {
      secret_prefixes: [
        "sk_",      // Stripe, OpenAI
        "pk_",      // publishable keys, still sensitive in places
        "AKIA",     // AWS access key id
        "arn:aws:", // AWS ARN
        "ghp_",     // GitHub personal access token
        "gho_",     // GitHub OAuth token
        "ghs_",     // GitHub server-to-server token
        "key_",
        "token_",
        "secret_",
      ]
      .map(String::from)
      .to_vec(),
      encrypted_markers: ["encrypted:", "sops:", "ENC[", "vault:", "age:"]
        .map(String::from)
        .to_vec(),
    }
  }
}

impl InferenceConfig {
  /// Adds a caller-supplied secret prefix.
  pub fn with_secret_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.secret_prefixes.push(prefix.into());
    self
  }
}

/// Shannon entropy of `value` in bits per character. Empty strings have
/// entropy zero.
pub fn shannon_entropy(value: &str) -> f64 {
  if value.is_empty() {
    return 0.0;
  }

  let mut freq: HashMap<char, usize> = HashMap::new();
  let mut length = 0usize;
  for c in value.chars() {
    *freq.entry(c).or_insert(0) += 1;
    length += 1;
  }

  let length = length as f64;
  freq
    .values()
    .map(|&count| {
      let p = count as f64 / length;
      -p * p.log2()
    })
    .sum()
}

/// Classifies a single value. Pure, O(len).
///
/// Encrypted markers are checked first: an encrypted blob is high-entropy by
/// nature but must keep its own classification. Entropy and secret prefixes
/// are independent signals; either one firing is sufficient.
pub fn classify(value: &str, config: &InferenceConfig) -> Classification {
  if value.is_empty() {
    return Classification::Plain;
  }

  if config
    .encrypted_markers
    .iter()
    .any(|marker| value.starts_with(marker.as_str()))
  {
    return Classification::EncryptedAtRest;
  }

  let entropy = shannon_entropy(value);
  if entropy > ENTROPY_THRESHOLD {
    #[cfg(feature = "tracing")]
    trace!(entropy, "classified as secret by entropy");
    return Classification::Secret;
  }

  if config
    .secret_prefixes
    .iter()
    .any(|prefix| value.starts_with(prefix.as_str()))
  {
    return Classification::Secret;
  }

  Classification::Plain
}

/// Derives the value written to `.env.example` for `key`.
///
/// Plain values are exposed unchanged; secrets and encrypted values get a
/// human-readable placeholder built from the lowercased key.
pub fn placeholder(key: &str, classification: Classification, value: &str) -> String {
  let key_lower = key.to_lowercase();
  match classification {
    Classification::Plain => value.to_string(),
    Classification::Secret => format!("<your_{key_lower}>"),
    Classification::EncryptedAtRest => format!("<your_{key_lower}_encrypted>"),
  }
}

/// Convenience wrapper: classify and derive the placeholder in one step.
pub fn placeholder_for(key: &str, value: &str, config: &InferenceConfig) -> String {
  placeholder(key, classify(value, config), value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entropy_empty_string() {
    assert_eq!(shannon_entropy(""), 0.0);
    assert_eq!(classify("", &InferenceConfig::default()), Classification::Plain);
  }

  #[test]
  fn test_entropy_single_char_repeated() {
    assert_eq!(shannon_entropy("aaaa"), 0.0);
  }

  #[test]
  fn test_entropy_uniform_distribution() {
    // Four distinct characters, one each: exactly 2 bits per char.
    let entropy = shannon_entropy("abcd");
    assert!((entropy - 2.0).abs() < 1e-9);
  }

  #[test]
  fn test_plain_config_values() {
    let config = InferenceConfig::default();
    assert_eq!(classify("development", &config), Classification::Plain);
    assert_eq!(classify("true", &config), Classification::Plain);
    assert_eq!(classify("5432", &config), Classification::Plain);
  }

  #[test]
  fn test_high_entropy_token_is_secret() {
    let config = InferenceConfig::default();
    // 32 distinct characters: entropy is exactly 5 bits per char.
    let token = "aB3dE5gH7jK9mN1pQrStUvWxYz024689";
    assert_eq!(token.len(), 32);
    assert!(shannon_entropy(token) > ENTROPY_THRESHOLD);
    assert_eq!(classify(token, &config), Classification::Secret);
  }

  #[test]
  fn test_prefix_beats_borderline_entropy() {
    let config = InferenceConfig::default();
    // Low entropy, but the vendor prefix alone marks it.
    assert_eq!(classify("sk_test_aaaaaaaa", &config), Classification::Secret);
    assert_eq!(
      classify("sk_test_51HqK2xJ3yF8gD9nP", &config),
      Classification::Secret
    );
    assert_eq!(classify("ghp_aaaaaaaa", &config), Classification::Secret);
    assert_eq!(classify("AKIAAAAAAAAA", &config), Classification::Secret);
  }

  #[test]
  fn test_encrypted_markers() {
    let config = InferenceConfig::default();
    assert_eq!(
      classify("encrypted:abcdef", &config),
      Classification::EncryptedAtRest
    );
    assert_eq!(
      classify("ENC[AES256_GCM,data:...]", &config),
      Classification::EncryptedAtRest
    );
    assert_eq!(
      classify("vault:v1:abcdef", &config),
      Classification::EncryptedAtRest
    );
  }

  #[test]
  fn test_custom_prefix() {
    let config = InferenceConfig::default().with_secret_prefix("acme_");
    assert_eq!(classify("acme_live_123", &config), Classification::Secret);
    assert_eq!(
      classify("acme_live_123", &InferenceConfig::default()),
      Classification::Plain
    );
  }

  #[test]
  fn test_placeholder_generation() {
    assert_eq!(
      placeholder("STRIPE_SECRET_KEY", Classification::Secret, "sk_test_x"),
      "<your_stripe_secret_key>"
    );
    assert_eq!(
      placeholder("DB_KEY", Classification::EncryptedAtRest, "sops:x"),
      "<your_db_key_encrypted>"
    );
    assert_eq!(
      placeholder("APP_ENV", Classification::Plain, "development"),
      "development"
    );
  }

  #[test]
  fn test_placeholder_for_pipeline() {
    let config = InferenceConfig::default();
    assert_eq!(
      placeholder_for("STRIPE_SECRET_KEY", "sk_test_51HqK2xJ3yF8gD9nP", &config),
      "<your_stripe_secret_key>"
    );
    assert_eq!(placeholder_for("DEBUG", "true", &config), "true");
  }
}
