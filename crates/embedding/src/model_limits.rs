//! Per-model token-limit lookup, with a provider-family conservative
//! default when the model is unrecognized (§4.2).

const GENERIC_DEFAULT: usize = 8192;
const VOYAGE_FAMILY_DEFAULT: usize = 2048;

const KNOWN_LIMITS: &[(&str, usize)] = &[
  ("voyage-3-large", 32_000),
  ("voyage-3", 32_000),
  ("voyage-3-lite", 32_000),
  ("text-embedding-3-large", 8191),
  ("text-embedding-3-small", 8191),
  ("nomic-embed-text", 8192),
  ("mxbai-embed-large", 512),
];

/// Resolve the maximum input tokens for `model`, falling back to a
/// provider-family default (Voyage-family names contain "voyage") and
/// finally the generic default.
pub fn token_limit_for(model: &str) -> usize {
  if let Some((_, limit)) = KNOWN_LIMITS.iter().find(|(name, _)| *name == model) {
    return *limit;
  }
  if model.contains("voyage") {
    return VOYAGE_FAMILY_DEFAULT;
  }
  GENERIC_DEFAULT
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_model_returns_exact_limit() {
    assert_eq!(token_limit_for("text-embedding-3-large"), 8191);
  }

  #[test]
  fn unknown_voyage_family_model_gets_family_default() {
    assert_eq!(token_limit_for("voyage-4-unreleased"), VOYAGE_FAMILY_DEFAULT);
  }

  #[test]
  fn totally_unknown_model_gets_generic_default() {
    assert_eq!(token_limit_for("some-future-model"), GENERIC_DEFAULT);
  }
}
