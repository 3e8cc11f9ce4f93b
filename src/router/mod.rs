//! Priority-ordered event router from synced Matrix events to agent
//! handlers (component G).

mod domain_types;
mod router;
mod traits;

pub use domain_types::{Route, RouteId, RouteSpec, RouterEvent};
pub use router::{Router, DEFAULT_QUEUE_SIZE};
pub use traits::{RouteHandler, RouterError};
