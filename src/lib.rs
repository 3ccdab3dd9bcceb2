pub mod appledb;
pub mod config;
pub mod mosyle;
pub mod snipe;
pub mod sync;
pub mod tracing;

pub mod util {
    pub mod env;
}
