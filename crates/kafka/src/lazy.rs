use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;

/// A client created on first use and shared by every later caller.
///
/// Creation runs under the lock, so concurrent first callers resolve to a
/// single client: the first creates it, the rest wait and receive the same one.
pub(crate) struct LazyClient<C: ?Sized> {
    slot: Mutex<Option<Arc<C>>>,
}

impl<C: ?Sized> LazyClient<C> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub(crate) async fn get_or_create<F>(&self, create: F) -> Result<Arc<C>>
    where
        F: FnOnce() -> Result<Arc<C>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = create()?;
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Detach the cached client, if any. Only one caller ever receives it.
    pub(crate) async fn take(&self) -> Option<Arc<C>> {
        self.slot.lock().await.take()
    }
}
