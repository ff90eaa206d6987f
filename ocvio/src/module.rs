//! Backend lifecycle.
//!
//! The host loads the backend once, obtains the operation table, drives
//! it for the whole run, and tears it down once. All state the backend
//! accumulates (session, caches, callbacks) lives inside the returned
//! object; dropping it is the teardown.

use std::sync::Arc;

use ocdav::auth::AuthPrompt;

use crate::base::Vio;
use crate::webdav::WebdavDefinition;

/// Creates a backend instance.
///
/// `prompt` is the host's interactive callback, consulted for missing
/// credentials and for certificate-trust questions.
#[must_use]
pub fn init(
    definition: WebdavDefinition,
    prompt: Option<Arc<dyn AuthPrompt>>,
) -> Box<dyn Vio> {
    Box::new(definition.vio(prompt))
}

/// Tears a backend down, releasing its session and caches.
pub fn shutdown(vio: Box<dyn Vio>) {
    drop(vio);
}
