//! External driver process transport
//!
//! The driver executable is spawned with piped stdin/stdout; stdin carries
//! messages to the driver and stdout its replies. Stderr is inherited so
//! driver diagnostics end up in the server log.

use crate::stream::{ByteStream, TransportLayer};
use async_trait::async_trait;
use indi_core::{IndiError, IndiResult};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// What to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessSettings {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Spawned driver process
#[derive(Debug)]
pub struct ProcessTransport {
    settings: ProcessSettings,
    child: Option<Child>,
    stream: Option<ByteStream>,
}

impl ProcessTransport {
    pub fn new(settings: ProcessSettings) -> Self {
        Self {
            settings,
            child: None,
            stream: None,
        }
    }

    /// OS process id while running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl TransportLayer for ProcessTransport {
    async fn open(&mut self) -> IndiResult<()> {
        if self.child.is_some() {
            return Err(IndiError::AlreadyLoaded(self.identifier()));
        }

        let mut child = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IndiError::Backend(format!("Cannot spawn {}: {}", self.identifier(), e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.kill().await;
            return Err(IndiError::Backend(format!("No stdio pipes for {}", self.identifier())));
        };

        log::info!("Spawned {} (pid {:?})", self.identifier(), child.id());
        self.stream = Some(ByteStream::new(stdout, stdin));
        self.child = Some(child);
        Ok(())
    }

    fn take_stream(&mut self) -> IndiResult<ByteStream> {
        self.stream
            .take()
            .ok_or_else(|| IndiError::NotFound(format!("No open stream for {}", self.identifier())))
    }

    async fn close(&mut self) -> IndiResult<()> {
        self.stream = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill {}: {}", self.identifier(), e);
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.child.is_none()
    }

    fn identifier(&self) -> String {
        self.settings.program.display().to_string()
    }
}
