//! Logging bootstrap for the command-line tools. Everything goes to stderr;
//! the severity is taken from the `PPCB_LOG` environment variable and
//! defaults to `error`, so normal transfers stay quiet.

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};
use std::env;

/// Builds the stderr terminal logger.
pub fn init() -> Logger {
    let level = env::var("PPCB_LOG").unwrap_or_else(|_| "error".to_string());

    let config: LoggerConfig = serdeconv::from_toml_str(&format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    ))
    .expect("invalid logging config");

    config.build_logger().expect("failed to build logger")
}

/// Child logger from an optional parent; silent when no parent is given.
pub fn child<'a, L: Into<Option<&'a Logger>>>(parent: L) -> Logger {
    match parent.into() {
        Some(parent) => parent.new(o!()),
        None => Logger::root(Discard, o!()),
    }
}
