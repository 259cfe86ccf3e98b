use std::sync::Arc;

use crate::transport::Transport;

pub mod retry;

pub use retry::RetrySettings;

/// Request body compression opt-in. `None` disables the compression stage
/// entirely; the remaining levels trade CPU for wire size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

/// Global initialization arguments. All fields are optional; `initialize`
/// falls back to the built-in defaults for anything left unset.
#[derive(Clone, Default)]
pub struct InitArgs {
    /// Transport to install instead of the built-in default. When this is
    /// `None` and the `reqwest-transport` feature is enabled, the reqwest
    /// transport is installed; otherwise no transport is registered and
    /// performs fail until the host installs one.
    pub transport: Option<Arc<dyn Transport>>,
}

impl std::fmt::Debug for InitArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitArgs")
            .field("transport", &self.transport.is_some())
            .finish()
    }
}
