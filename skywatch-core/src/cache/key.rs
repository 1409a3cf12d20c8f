//! Deterministic cache keys

use std::collections::BTreeMap;
use url::form_urlencoded;

/// Request parameters, always iterated in name order
pub type Params = BTreeMap<String, String>;

/// Form-url-encode parameters in name order
pub fn encode_query(params: &Params) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

/// Key identifying one logical request.
///
/// Built from the endpoint's base address and the sorted parameters, so the
/// order in which a caller supplied parameters never matters. Credentials are
/// attached later and are never part of the key.
pub fn compute_key(provider: &str, operation: &str, base_address: &str, params: &Params) -> String {
    format!(
        "{}:{}:{}?{}",
        provider,
        operation,
        base_address,
        encode_query(params)
    )
}
