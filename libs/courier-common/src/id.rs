use ulid::Ulid;
use uuid::Uuid;

/// Generate a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = courier_common::id::prefixed_ulid("ses");
/// assert!(id.starts_with("ses_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Fresh identity for a logical message. Assigned once, never per delivery.
pub fn message_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a shared secret for a freshly written default config.
///
/// Two v4 UUIDs joined by `-`, which gives 244 random bits in a string that
/// is safe to paste into a JSON file or an environment variable.
pub fn generate_auth_key() -> String {
    format!("{}-{}", Uuid::new_v4(), Uuid::new_v4())
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const SESSION: &str = "ses";
}
