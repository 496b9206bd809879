//! Shared handler state.

use std::path::PathBuf;
use std::sync::Arc;

use cordon_policy::PolicyStore;

/// Dependencies every handler needs: the policy store and the fallback
/// working directory for children.
#[derive(Debug, Clone)]
pub struct ApiState {
    /// The live policy store; handlers capture one snapshot per request.
    pub policy: Arc<PolicyStore>,
    /// Working directory for children that do not request one.
    pub default_cwd: PathBuf,
}
