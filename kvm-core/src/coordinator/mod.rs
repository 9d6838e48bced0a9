//! Edge-Crossing Coordinator (spec.md §4.G): the server-side listener and
//! client-side controller that decide, at any moment, whose inputs are
//! being captured and where they go.
//!
//! Split into [`server`] and [`client`] because the two sides run
//! different state machines (LOCAL/REMOTE vs. INACTIVE/ACTIVE) over the
//! same wire contract: a `command` message with `command: "cross_screen"`
//! and `{x, y}` normalized params, plus ordinary `mouse`/`keyboard`
//! messages forwarded while a peer is active.

pub mod client;
pub mod server;

/// Command string used for the edge-crossing handoff in both directions
/// (spec.md §6).
pub const CROSS_SCREEN: &str = "cross_screen";

/// `event` tag on the one `mouse` message that carries an absolute
/// normalized position instead of a relative delta: the position at which
/// the cursor enters a client from the opposite edge (spec.md §4.G). Every
/// other mouse message while REMOTE/ACTIVE carries `dx`/`dy` deltas or a
/// normalized click/scroll position with an ordinary event tag.
pub const CROSS_ENTER_EVENT: &str = "cross_enter";

pub use client::ClientEdgeCoordinator;
pub use server::ServerEdgeCoordinator;
