pub mod relay_routes;
pub mod relay_websocket;

pub use relay_routes::routes;
