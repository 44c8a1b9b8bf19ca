mod event;
mod payloads;
mod token;

pub use event::*;
pub use payloads::*;
pub use token::*;
