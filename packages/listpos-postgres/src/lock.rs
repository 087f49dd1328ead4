use blake3::Hasher;

use listpos_core::ScopeKey;

const SCOPE_LOCK_DOMAIN: &[u8] = b"listpos/scope-lock/v0";

/// Advisory lock key for one scope of `table`.
///
/// Stable across processes so every writer of the scope contends on the same key. Distinct
/// scopes can collide on a key; that only costs concurrency, never correctness.
pub fn scope_lock_key(table: &str, scope: &ScopeKey) -> i64 {
    let mut hasher = Hasher::new();
    hasher.update(SCOPE_LOCK_DOMAIN);
    hasher.update(&(table.len() as u32).to_be_bytes());
    hasher.update(table.as_bytes());

    let mut key = Vec::new();
    for value in scope.values() {
        value.write_key_bytes(&mut key);
    }
    hasher.update(&key);

    let hash = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash.as_bytes()[0..8]);
    i64::from_be_bytes(out)
}
