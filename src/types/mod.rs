//! Domain model shared by the loader, the solver pipeline and the writers.

pub mod breaks;
pub mod carer;
pub mod diary;
pub mod location;
pub mod problem;
pub mod route;
pub mod scheduled_visit;
pub mod service_user;
pub mod solution;
pub mod visit;

pub use breaks::Break;
pub use carer::{Carer, Transport};
pub use diary::{Diary, Event};
pub use location::{Address, Location};
pub use problem::{Problem, ProblemError};
pub use route::Route;
pub use scheduled_visit::{ScheduledVisit, ScheduledVisitKind};
pub use service_user::{ExtendedServiceUser, ServiceUser};
pub use solution::Solution;
pub use visit::{CalendarVisit, VisitId};
