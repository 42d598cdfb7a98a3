use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use crate::error::ConversionError;

/// Converts one revision's text from wiki markup to the target markup.
///
/// Called once per revision with no state carried between calls.
pub trait ContentConverter {
    fn convert(&self, page: &str, lines: &[String]) -> Result<Vec<String>, ConversionError>;
}

/// Leaves the text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

impl ContentConverter for PassthroughConverter {
    fn convert(&self, _page: &str, lines: &[String]) -> Result<Vec<String>, ConversionError> {
        Ok(lines.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PandocOptions {
    pub binary: String,
    pub from: String,
    pub to: String,
    pub extra_args: Vec<String>,
}

impl Default for PandocOptions {
    fn default() -> Self {
        Self {
            binary: "pandoc".to_string(),
            from: "mediawiki".to_string(),
            to: "gfm".to_string(),
            // level-one wiki headings become `##`
            extra_args: vec!["--shift-heading-level-by=1".to_string()],
        }
    }
}

impl PandocOptions {
    fn arguments(&self) -> Vec<String> {
        let mut args = vec![
            "--from".to_string(),
            self.from.clone(),
            "--to".to_string(),
            self.to.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Default)]
pub struct PandocConverter {
    options: PandocOptions,
}

impl PandocConverter {
    pub fn new(options: PandocOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PandocOptions {
        &self.options
    }
}

impl ContentConverter for PandocConverter {
    fn convert(&self, page: &str, lines: &[String]) -> Result<Vec<String>, ConversionError> {
        let failure = |diagnostic: String| ConversionError {
            page: page.to_string(),
            diagnostic,
        };

        let mut child = Command::new(&self.options.binary)
            .args(self.options.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| failure(format!("failed to execute {}: {error}", self.options.binary)))?;

        let mut input = lines.join("\n");
        input.push('\n');
        let stdin = child.stdin.take();

        // Stdin is written while stdout drains; a streaming converter
        // otherwise fills its output pipe and both sides block.
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(input.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
            (written, output)
        });

        let output =
            output.map_err(|error| failure(format!("failed to wait for pandoc: {error}")))?;
        // An early exit closes the pipe; the exit status and stderr explain why.
        if let Err(error) = written
            && error.kind() != io::ErrorKind::BrokenPipe
        {
            return Err(failure(format!("failed to write to pandoc: {error}")));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            return Err(failure(if detail.is_empty() {
                format!("pandoc exited with {}", output.status)
            } else {
                detail.to_string()
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}
