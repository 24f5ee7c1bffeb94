//! Logger initialisation, the level can be overridden with `RUST_LOG`
use env_logger::Builder;
use log::LevelFilter;
pub use log::{debug, info, warn};

pub fn init() {
    // Init the logger
    let mut builder = Builder::new();
    builder.filter(None, LevelFilter::Info).parse_default_env();
    // Ignore a logger already installed by the host application
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init();
        init();
        info!("Logger ready");
    }
}
