mod admission;
mod events_ws;
mod gateway;
mod handlers;
mod routes;
mod socket;

pub use admission::{admit, Admitted};
pub use events_ws::events_ws_handler;
pub use gateway::video_ws_handler;
pub use routes::create_router;
pub use socket::SocketPump;
