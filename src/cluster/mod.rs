//! Cluster interaction helpers: the `oc` wrapper, the convergence poller,
//! manifest templating, resource lifecycle, state extraction, and probes.
//!
//! Everything here crosses the `oc` process boundary; no API client is
//! linked in.

pub mod extract;
pub mod net;
pub mod node;
pub mod oc;
pub mod poll;
pub mod probe;
pub mod resource;
pub mod template;
