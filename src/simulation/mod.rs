pub mod config;
pub mod context;
pub mod error;
pub mod io;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod population;
pub mod random;
pub mod table;
pub mod trace;
