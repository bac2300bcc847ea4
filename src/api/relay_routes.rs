use std::sync::Arc;
use warp::Filter;

use super::relay_websocket;
use crate::config::IceConfig;
use crate::signaling::MemoryHub;

/// Every relay endpoint: the signaling socket plus health and ICE config.
pub fn routes(
    hub: Arc<MemoryHub>,
    ice: IceConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    relay_websocket_route(hub.clone())
        .or(relay_health_check(hub))
        .or(relay_config_endpoint(ice))
}

pub fn relay_websocket_route(
    hub: Arc<MemoryHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("live")
        .and(warp::path("ws"))
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_hub(hub))
        .map(|ws: warp::ws::Ws, hub: Arc<MemoryHub>| {
            ws.on_upgrade(move |websocket| relay_websocket::handle_relay_websocket(websocket, hub))
        })
}

pub fn relay_health_check(
    hub: Arc<MemoryHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("live")
        .and(warp::path("health"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_hub(hub))
        .and_then(|hub: Arc<MemoryHub>| async move {
            Ok::<_, warp::Rejection>(warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Live Classroom Relay",
                "version": env!("CARGO_PKG_VERSION"),
                "topics": hub.topic_count().await,
            })))
        })
}

/// ICE servers clients should hand to their peer connections.
pub fn relay_config_endpoint(
    ice: IceConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("live")
        .and(warp::path("config"))
        .and(warp::path::end())
        .and(warp::get())
        .map(move || warp::reply::json(&ice))
}

fn with_hub(
    hub: Arc<MemoryHub>,
) -> impl Filter<Extract = (Arc<MemoryHub>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hub.clone())
}
