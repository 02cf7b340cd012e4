use std::sync::Arc;
use std::time::SystemTime;

use autoinit::{bind_instance, bind_singleton, get_instance, AutoInit, InitError};

// Define regular traits and implementor structs

trait Logger {
    fn log(&self, content: &str);
}

trait DateLogger {
    fn log_date(&self);
}

#[derive(AutoInit, Debug)]
struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, content: &str) {
        println!("{content}");
    }
}

#[derive(AutoInit)]
#[auto_init(repr = false, eq = false)]
struct DateLoggerImpl {
    logger: Arc<dyn Logger>,
}

impl DateLogger for DateLoggerImpl {
    fn log_date(&self) {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap();
        self.logger.log(&format!("{}s since epoch", now.as_secs()));
    }
}

// Wire the interfaces to their default implementations
bind_singleton!(dyn Logger => ConsoleLogger);
bind_instance!(dyn DateLogger => DateLoggerImpl);

#[allow(ambiguous_wide_pointer_comparisons)]
fn main() -> Result<(), InitError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let date_logger: Arc<dyn DateLogger> = get_instance()?;
    date_logger.log_date();

    // The logger is a singleton of the base context.
    let a: Arc<dyn Logger> = get_instance()?;
    let b: Arc<dyn Logger> = get_instance()?;
    assert!(Arc::ptr_eq(&a, &b));

    Ok(())
}
