pub mod config;
pub mod db;
pub mod tracing;

#[cfg(test)]
test_r::enable!();

/// Trait for errors that have a client-safe representation.
///
/// `Display` (and `Error`) implementations may contain internal details that
/// only belong in logs. `to_safe_string` is what API layers are allowed to
/// hand out.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;
}
