pub mod redaction;
pub mod sandbox;

pub use redaction::{SecretKind, SecretRedactor};
pub use sandbox::{validate_path, SandboxPolicy};
