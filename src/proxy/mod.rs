mod handler;
mod relay;
mod server;

pub use handler::*;
pub use relay::*;
pub use server::*;
