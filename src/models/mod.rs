pub mod geo;
pub mod location;
pub mod snapshot;
pub mod trip;
