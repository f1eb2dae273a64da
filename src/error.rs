//! Error classification shared by the hardware and network layers

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retry or skip locally; log only
    Transient,
    /// A capability (microphone or speaker) is lost for the session
    Degraded,
    /// The session ends
    Fatal,
}
