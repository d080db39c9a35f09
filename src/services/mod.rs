//! External collaborators of the solver core: the routing engine client,
//! the travel-time cache and the output writers.

pub mod gexf;
pub mod location_cache;
pub mod routing;
pub mod routing_server;
