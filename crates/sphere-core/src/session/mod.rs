//! Session context shared by the request gateway and the live channel.
//!
//! ## Lifecycle
//!
//! ```text
//! Unauthenticated
//!   │
//!   ├─► establish(user, token)      login / login-success callback
//!   │
//! Authenticated
//!   │
//!   ├─► replace_credential(token)   gateway refresh, identity untouched
//!   ├─► update_following / update_identity
//!   │
//!   └─► clear()                     logout / irrecoverable refresh failure
//! ```
//!
//! All writes go through [`SessionStore`]; observers subscribe to a watch
//! channel and react to transitions instead of polling.

mod store;

pub use store::*;
