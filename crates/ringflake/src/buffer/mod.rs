mod handler;
mod padding;
mod ring;

pub use handler::*;
pub use padding::*;
pub use ring::*;
