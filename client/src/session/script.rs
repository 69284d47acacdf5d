//! Invocation script: the configured sequence of hub methods

use super::connection::{InvocationBody, invocation_body};
use crate::transport::SharedConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Hub methods invoked in order on every tick, with a pause between
/// consecutive methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationScript {
    pub methods: Vec<String>,
    pub pause: Duration,
}

impl InvocationScript {
    pub fn new<I, S>(methods: I, pause: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
            pause,
        }
    }

    /// Parse a comma-separated method list. Blank entries are dropped.
    pub fn parse(methods: &str, pause: Duration) -> Self {
        Self::new(
            methods
                .split(',')
                .map(str::trim)
                .filter(|method| !method.is_empty()),
            pause,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Build the invocation body. `None` when there is nothing to invoke,
    /// which leaves pooled connections idle.
    pub fn into_body(self) -> Option<InvocationBody> {
        if self.methods.is_empty() {
            return None;
        }

        let methods: Arc<[String]> = self.methods.into();
        let pause = self.pause;
        Some(invocation_body(move |connection: SharedConnection| {
            let methods = methods.clone();
            async move {
                for (i, method) in methods.iter().enumerate() {
                    if i > 0 && !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                    let result = connection.invoke(method, Vec::new()).await?;
                    debug!(
                        "{} returned {} on connection {}",
                        method,
                        result,
                        connection.connection_id()
                    );
                }
                Ok(())
            }
        }))
    }
}

impl Default for InvocationScript {
    fn default() -> Self {
        Self::new(["Hello", "Bye"], Duration::from_secs(1))
    }
}
