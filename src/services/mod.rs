pub mod dispatcher;
pub mod geolocation;
pub mod http_store;
pub mod map;
pub mod reconciler;
pub mod reporter;
pub mod routing;
pub mod storage;
pub mod store;
pub mod trips;
