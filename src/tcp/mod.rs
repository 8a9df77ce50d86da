//! TCP relay engine: CONNECT, BIND, and the shared bidirectional pipe.

pub mod relay;
