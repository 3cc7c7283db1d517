use std::io::Write;

use tokio::sync::{mpsc, oneshot};

/// One line of process output, or the exit marker for a finished process.
#[derive(Debug)]
enum LogEvent {
    Line {
        tag: String,
        line: String,
    },
    Exit {
        tag: String,
        code: Option<i32>,
    },
    /// Acknowledged once every event queued before it has been written.
    Synced(oneshot::Sender<()>),
}

/// Append-only sink shared by every run strategy.
///
/// All producers funnel their lines through one channel into a single writer task, so
/// concurrent runs can append freely. Ordering between runs is not guaranteed and is not
/// relied upon; ordering within one producer is preserved.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl LogSink {
    /// Create a sink that appends to `writer`. The writer task runs until every handle to
    /// the sink has been dropped.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx, Box::new(writer)));
        Self { tx }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Append one line of process output under the given strategy tag.
    pub fn append(&self, tag: &str, line: &str) {
        let _ = self.tx.send(LogEvent::Line {
            tag: tag.to_string(),
            line: line.to_string(),
        });
    }

    /// Record that the process for `tag` exited. A `None` code means the numeric exit code
    /// was unavailable, e.g. because the process was killed.
    pub fn record_exit(&self, tag: &str, code: Option<i32>) {
        let _ = self.tx.send(LogEvent::Exit {
            tag: tag.to_string(),
            code,
        });
    }

    /// Wait until everything appended so far has reached the writer.
    pub async fn synced(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(LogEvent::Synced(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_writer(mut rx: mpsc::UnboundedReceiver<LogEvent>, mut writer: Box<dyn Write + Send>) {
    while let Some(event) = rx.recv().await {
        let result = match event {
            LogEvent::Line { tag, line } => writeln!(writer, "[{tag}] {line}"),
            LogEvent::Exit { tag, code } => match code {
                Some(code) => writeln!(writer, "[{tag}] exited with code {code}"),
                None => writeln!(writer, "[{tag}] exited with code unknown"),
            },
            LogEvent::Synced(ack) => {
                let result = writer.flush();
                let _ = ack.send(());
                result
            }
        };
        if let Err(e) = result {
            log::error!("Failed to write to the run log: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lines_are_tagged_and_ordered_per_producer() {
        let capture = Capture::default();
        let sink = LogSink::new(capture.clone());

        sink.append("run", "starting");
        sink.append("run", "working");
        sink.record_exit("run", Some(0));
        sink.synced().await;

        assert_eq!(
            capture.contents(),
            "[run] starting\n[run] working\n[run] exited with code 0\n"
        );
    }

    #[tokio::test]
    async fn killed_process_reports_unknown_exit_code() {
        let capture = Capture::default();
        let sink = LogSink::new(capture.clone());

        sink.record_exit("debug", None);
        sink.synced().await;

        assert_eq!(capture.contents(), "[debug] exited with code unknown\n");
    }

    #[tokio::test]
    async fn clones_share_one_writer() {
        let capture = Capture::default();
        let sink = LogSink::new(capture.clone());
        let other = sink.clone();

        sink.append("run", "from the original");
        other.append("detached", "from the clone");
        sink.synced().await;

        let contents = capture.contents();
        assert!(contents.contains("[run] from the original\n"));
        assert!(contents.contains("[detached] from the clone\n"));
    }
}
