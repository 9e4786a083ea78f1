pub mod bloat;
pub mod connection;
pub mod index;
pub mod settings;

pub use bloat::*;
pub use connection::*;
pub use index::*;
pub use settings::*;
