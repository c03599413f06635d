pub mod accept_loop;

pub use accept_loop::AcceptLoop;
