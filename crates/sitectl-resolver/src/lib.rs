mod planner;
mod satisfy;

pub use planner::{Planned, Planner};
pub use satisfy::{DependencyView, Resolver, Satisfaction, VisitPath};

#[cfg(test)]
mod tests;
