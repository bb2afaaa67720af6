use sha2::{Digest, Sha256};

use super::traits::Cacheable;

/// Cache key for a collection of `T` fetched with `extra` query parameters.
///
/// Without parameters the key is the bare entity type. Otherwise the
/// parameters are sorted and hashed so the key is stable and fixed-length.
pub fn cache_key<T: Cacheable>(extra: &[(String, String)]) -> String {
  if extra.is_empty() {
    return T::entity_type().to_string();
  }

  let mut pairs: Vec<String> = extra
    .iter()
    .map(|(k, v)| format!("{}={}", k.trim(), v.trim()))
    .collect();
  pairs.sort();

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(pairs.join("&").as_bytes());
  format!("{}:{}", T::entity_type(), hex::encode(hasher.finalize()))
}
