//! Pipelines d'encodage : capture du moniteur d'un sink puis encodage.
//!
//! ```text
//! parec --device=<sink>.monitor  ──stdout──►  <encodeur>  ──stdout──►  pump
//! ```

use std::process::Stdio;

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::encoders::Encoder;
use crate::errors::StreamError;
use crate::model::Sink;

/// Un pipeline en cours : sa sortie encodée et les processus qui la
/// produisent.
pub struct Pipeline {
    output: Box<dyn AsyncRead + Send + Unpin>,
    children: Vec<Child>,
}

impl Pipeline {
    /// Pipeline sans processus (source en mémoire, tests)
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            output: Box::new(reader),
            children: Vec::new(),
        }
    }

    pub fn from_processes<R>(output: R, children: Vec<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            output: Box::new(output),
            children,
        }
    }

    pub fn output(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.output.as_mut()
    }

    /// Tue les processus et attend leur fin.
    pub async fn shutdown(mut self) {
        for child in self.children.iter_mut() {
            if let Err(e) = child.start_kill() {
                debug!("Pipeline process already gone: {}", e);
            }
        }
        for child in self.children.iter_mut() {
            let _ = child.wait().await;
        }
    }
}

/// Fabrique de pipelines, injectée dans les hubs de flux
pub trait PipelineFactory: Send + Sync {
    fn spawn(&self, sink: &Sink, encoder: &Encoder) -> Result<Pipeline, StreamError>;
}

/// Pipeline réel : `parec` (ou la commande configurée) vers le codec
pub struct ProcessPipelineFactory {
    capture_command: String,
}

impl ProcessPipelineFactory {
    pub fn new(capture_command: impl Into<String>) -> Self {
        Self {
            capture_command: capture_command.into(),
        }
    }

    fn capture_args(sink: &Sink) -> Vec<String> {
        vec![
            format!("--device={}.monitor", sink.id),
            format!("--format=s{}le", sink.format.bits),
            format!("--rate={}", sink.format.rate),
            format!("--channels={}", sink.format.channels),
        ]
    }
}

impl PipelineFactory for ProcessPipelineFactory {
    fn spawn(&self, sink: &Sink, encoder: &Encoder) -> Result<Pipeline, StreamError> {
        let capture_args = Self::capture_args(sink);
        debug!("Spawning {} {}", self.capture_command, capture_args.join(" "));

        let mut capture = Command::new(&self.capture_command)
            .args(&capture_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StreamError::Spawn {
                command: self.capture_command.clone(),
                source,
            })?;

        let capture_out: Stdio = capture
            .stdout
            .take()
            .ok_or_else(|| StreamError::Pipeline("capture stdout unavailable".into()))?
            .try_into()
            .map_err(|source| StreamError::Spawn {
                command: self.capture_command.clone(),
                source,
            })?;

        let encoder_args = encoder.args(&sink.format);
        debug!("Spawning {} {}", encoder.command(), encoder_args.join(" "));

        let mut encode = match Command::new(encoder.command())
            .args(&encoder_args)
            .stdin(capture_out)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                if let Err(e) = capture.start_kill() {
                    warn!("Cannot kill {}: {}", self.capture_command, e);
                }
                return Err(StreamError::Spawn {
                    command: encoder.command().to_string(),
                    source,
                });
            }
        };

        let output = encode
            .stdout
            .take()
            .ok_or_else(|| StreamError::Pipeline("encoder stdout unavailable".into()))?;

        Ok(Pipeline::from_processes(output, vec![capture, encode]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::select_by_suffix;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_capture_args_follow_sink_format() {
        let mut sink = Sink::new("alsa_output.usb", "USB DAC");
        sink.format.rate = 48_000;
        assert_eq!(
            ProcessPipelineFactory::capture_args(&sink),
            vec![
                "--device=alsa_output.usb.monitor",
                "--format=s16le",
                "--rate=48000",
                "--channels=2"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_capture_command_is_reported() {
        let factory = ProcessPipelineFactory::new("pmodlna-no-such-capture-binary");
        let sink = Sink::new("s", "S");
        match factory.spawn(&sink, &select_by_suffix("wav").unwrap()) {
            Err(StreamError::Spawn { command, .. }) => {
                assert_eq!(command, "pmodlna-no-such-capture-binary")
            }
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[tokio::test]
    async fn test_in_memory_pipeline() {
        let mut pipeline = Pipeline::from_reader(std::io::Cursor::new(b"abc".to_vec()));
        let mut out = Vec::new();
        pipeline.output().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
        pipeline.shutdown().await;
    }
}
