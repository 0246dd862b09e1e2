//! Exporting the roast on screen.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use url::Url;

pub const SHARE_TITLE: &str = "Moody Mirror Roasted Me";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharePayload {
    pub title: String,
    pub text: String,
    pub url: Option<Url>,
}

impl SharePayload {
    pub fn for_roast(roast: &str, url: Option<Url>) -> Self {
        Self {
            title: SHARE_TITLE.to_owned(),
            text: format!("My roast: \"{roast}\" - Try it yourself!"),
            url,
        }
    }

    /// Plain-text form shown when no share target is available.
    pub fn prompt(roast: &str, url: Option<&Url>) -> String {
        let link = url.map(Url::as_str).unwrap_or_default();
        format!("Share this roast:\n\n\"{roast}\"\n\n{link}")
    }

    fn document(&self) -> String {
        match &self.url {
            Some(url) => format!("{}\n{}\n{}\n", self.title, self.text, url),
            None => format!("{}\n{}\n", self.title, self.text),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ShareError {
    #[error("failed to launch share command '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("share command i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("share command exited with {0}")]
    Exit(std::process::ExitStatus),
}

pub trait ShareTarget: Send + Sync {
    fn is_available(&self) -> bool;

    fn share(&self, payload: SharePayload) -> BoxFuture<'_, Result<(), ShareError>>;
}

/// Pipes the payload (title, text, url; one per line) into a program's stdin,
/// e.g. a clipboard tool.
#[derive(Clone, Debug)]
pub struct CommandShare {
    program: String,
    args: Vec<String>,
}

impl CommandShare {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace-separated command line. Empty input yields `None`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl ShareTarget for CommandShare {
    fn is_available(&self) -> bool {
        !self.program.is_empty()
    }

    fn share(&self, payload: SharePayload) -> BoxFuture<'_, Result<(), ShareError>> {
        async move {
            let mut child = Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .spawn()
                .map_err(|source| ShareError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload.document().as_bytes()).await?;
                stdin.shutdown().await?;
            }

            let status = child.wait().await?;
            if !status.success() {
                return Err(ShareError::Exit(status));
            }
            tracing::info!(program = %self.program, "roast shared");
            Ok(())
        }
        .boxed()
    }
}
