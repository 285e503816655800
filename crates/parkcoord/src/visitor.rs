//! Visitor identity carried into every blocking facility operation.

use std::fmt;

use tokio_util::sync::CancellationToken;

/// A park visitor: a name for logs and a token to abandon waits.
#[derive(Debug, Clone)]
pub struct Visitor {
    name: String,
    cancel: CancellationToken,
}

impl Visitor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// A visitor whose waits are abandoned when `parent` is cancelled.
    pub fn with_parent(name: impl Into<String>, parent: &CancellationToken) -> Self {
        Self {
            name: name.into(),
            cancel: parent.child_token(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Give up whatever the visitor is currently waiting for.
    pub fn abandon(&self) {
        self.cancel.cancel();
    }

    pub fn is_abandoned(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Display for Visitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
