pub mod assets;
pub mod audit;
pub mod events;
pub mod executions;
pub mod handlers;
pub mod middleware;
pub mod queue;
pub mod routes;
pub mod ws;

pub use routes::create_router;
pub use ws::WsMessage;
