mod cancel;
mod log_sink;

pub mod prelude {
    pub use crate::cancel::{CancelHandle, CancelListener, CancelledError};
    pub use crate::log_sink::LogSink;
}
