//! Snapshot checksums
//!
//! Venues publish their own checksum formats, so the manager takes the
//! function as a parameter. The SHA-256 digests here are the defaults.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::order_book::{OrderBookData, PriceLevel};
use crate::value::Value;

/// Checksum over snapshot data, injected per feed.
pub type ChecksumFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Wrap a closure as a [`ChecksumFn`].
pub fn checksum_fn<T, F>(f: F) -> ChecksumFn<T>
where
    F: Fn(&T) -> String + Send + Sync + 'static,
{
    Arc::new(f)
}

fn hash_levels(hasher: &mut Sha256, levels: &[PriceLevel]) {
    for level in levels {
        hasher.update(level.price.normalize().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(level.amount.normalize().to_string().as_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"---");
}

/// SHA-256 over `price:amount|` for every bid then every ask, best first.
///
/// Decimals are normalised so `1.50` and `1.5` hash the same.
pub fn sha256_order_book(book: &OrderBookData) -> String {
    let mut hasher = Sha256::new();
    hash_levels(&mut hasher, book.bids());
    hash_levels(&mut hasher, book.asks());
    format!("{:x}", hasher.finalize())
}

fn hash_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"null"),
        Value::Bool(b) => hasher.update(if *b { &b"true"[..] } else { &b"false"[..] }),
        Value::Number(d) => hasher.update(d.normalize().to_string().as_bytes()),
        Value::Text(s) => hasher.update(serde_json::Value::from(s.as_str()).to_string().as_bytes()),
        Value::Sequence(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hash_value(hasher, item);
            }
            hasher.update(b"]");
        }
        Value::Record(map) => {
            hasher.update(b"{");
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hasher.update(serde_json::Value::from(key.as_str()).to_string().as_bytes());
                hasher.update(b":");
                hash_value(hasher, item);
            }
            hasher.update(b"}");
        }
    }
}

/// SHA-256 over a canonical JSON-like rendering: records key-sorted,
/// numbers as exact normalised decimals.
pub fn sha256_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hash_value(&mut hasher, value);
    format!("{:x}", hasher.finalize())
}
