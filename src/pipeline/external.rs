// src/pipeline/external.rs

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{BuildError, Result};
use crate::hashing;
use crate::pipeline::Artifact;
use crate::rules::{take_reference, DeclSite};
use crate::scheduler::BuildInstance;

/// Seed for hashing an external stage's invocation into its structural
/// hash.
const IDENTITY_SEED: u32 = 0x5057_0002;
/// Seed for deriving temp file names when in-memory artifacts have to be
/// materialized for a tool.
const TEMP_NAME_SEED: u32 = 0x5057_0003;

/// Flags controlling how an external tool stage runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Forward the tool's stdout into the build log, line by line.
    pub redirect_stdout: bool,
    /// Forward the tool's stderr into the build log, line by line.
    pub redirect_stderr: bool,
    /// Treat any exit code as success.
    pub ignore_exit_code: bool,
}

impl RunOptions {
    /// The common case: capture diagnostics, leave stdout to the console,
    /// and fail on non-zero exit codes.
    pub fn capture_stderr() -> Self {
        Self {
            redirect_stderr: true,
            ..Self::default()
        }
    }
}

/// A pipeline stage that shells out to an external program.
///
/// The argument template and the declared result paths go through the same
/// substitution: `$N` capture references plus the `$(...)` token language
/// (`Output`, `Output[n]`, `Input`, `Input[n]`, `Name`, `TempName`,
/// `TempDir`). The process inherits this process's working directory and
/// blocks its build worker for its entire lifetime.
pub struct ExternalStage {
    program: String,
    args_template: String,
    options: RunOptions,
    results: Vec<String>,
    decl_site: DeclSite,
}

impl ExternalStage {
    pub(crate) fn new(
        program: &str,
        args_template: &str,
        options: RunOptions,
        results: Vec<String>,
        decl_site: DeclSite,
    ) -> Self {
        Self {
            program: program.to_string(),
            args_template: args_template.to_string(),
            options,
            results,
            decl_site,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn results(&self) -> &[String] {
        &self.results
    }

    pub fn decl_site(&self) -> DeclSite {
        self.decl_site
    }

    pub fn structural_hash(&self) -> String {
        let identity = format!(
            "{}\n{}\n{}\n{}{}{}",
            self.program,
            self.args_template,
            self.results.join("\n"),
            u8::from(self.options.redirect_stdout),
            u8::from(self.options.redirect_stderr),
            u8::from(self.options.ignore_exit_code),
        );
        format!("run/{:08x}", hashing::hash_str(&identity, IDENTITY_SEED))
    }

    pub(crate) fn evaluate(
        &self,
        instance: &mut BuildInstance,
        inputs: Vec<Artifact>,
    ) -> Result<Vec<Artifact>> {
        // Temp files created for in-memory inputs are cached per index so
        // a token repeated in args and results names the same file.
        let mut materialized: HashMap<usize, PathBuf> = HashMap::new();

        let args = self.substitute(&self.args_template, instance, &inputs, &mut materialized)?;
        let argv: Vec<String> = args.split_whitespace().map(str::to_string).collect();

        debug!(
            asset = %instance.name(),
            program = %self.program,
            args = %args,
            "running external tool"
        );

        let asset = instance.name().to_string();
        let status = instance.block_on(self.run_process(&asset, argv))?;

        let code = status.code().unwrap_or(-1);
        if !self.options.ignore_exit_code && !status.success() {
            return Err(BuildError::ExternalToolFailed {
                program: self.program.clone(),
                code,
                site: self.decl_site,
            });
        }

        info!(
            asset = %asset,
            program = %self.program,
            exit_code = code,
            "external tool finished"
        );

        let mut artifacts = Vec::with_capacity(self.results.len());
        for template in &self.results {
            let resolved = self.substitute(template, instance, &inputs, &mut materialized)?;
            let path = PathBuf::from(resolved);
            fs::metadata(&path)
                .with_context(|| format!("opening result {path:?} of '{}'", self.program))?;
            artifacts.push(Artifact::File(path));
        }

        Ok(artifacts)
    }

    async fn run_process(
        &self,
        asset: &str,
        argv: Vec<String>,
    ) -> Result<std::process::ExitStatus> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&argv).kill_on_drop(true);
        cmd.stdout(if self.options.redirect_stdout {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        cmd.stderr(if self.options.redirect_stderr {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });

        let mut child = cmd.spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BuildError::ExternalToolNotFound {
                    program: self.program.clone(),
                    site: self.decl_site,
                }
            } else {
                BuildError::Io(err)
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let log_stdout = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(asset = %asset, tool = %self.program, "{}", line);
                }
            }
        };
        let log_stderr = async {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(asset = %asset, tool = %self.program, "{}", line);
                }
            }
        };

        let (status, (), ()) = tokio::join!(child.wait(), log_stdout, log_stderr);
        Ok(status.with_context(|| format!("waiting for '{}'", self.program))?)
    }

    /// Apply capture references and `$(...)` tokens to a template.
    fn substitute(
        &self,
        template: &str,
        instance: &BuildInstance,
        inputs: &[Artifact],
        materialized: &mut HashMap<usize, PathBuf>,
    ) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];

            if let Some(after) = rest.strip_prefix('$') {
                out.push('$');
                rest = after;
                continue;
            }

            if let Some(inner) = rest.strip_prefix('(') {
                let end = inner.find(')').ok_or_else(|| {
                    anyhow!(
                        "unterminated token in '{template}' ({})",
                        self.decl_site
                    )
                })?;
                let token = &inner[..end];
                out.push_str(&self.resolve_token(token, instance, inputs, materialized)?);
                rest = &inner[end + 1..];
                continue;
            }

            match take_reference(rest) {
                Some((reference, remainder)) => {
                    out.push_str(instance.name_match().resolve_reference(reference));
                    rest = remainder;
                }
                None => out.push('$'),
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    fn resolve_token(
        &self,
        token: &str,
        instance: &BuildInstance,
        inputs: &[Artifact],
        materialized: &mut HashMap<usize, PathBuf>,
    ) -> Result<String> {
        let (base, index) = parse_token(token)
            .ok_or_else(|| anyhow!("malformed token '$({token})' ({})", self.decl_site))?;

        match base {
            "Output" => {
                let index = index.unwrap_or(0);
                if index == 0 {
                    let path = instance.output_path().ok_or_else(|| {
                        anyhow!("output path not resolved for '{}'", instance.name())
                    })?;
                    Ok(path.display().to_string())
                } else {
                    let path = instance.byproduct_paths().get(index - 1).ok_or_else(|| {
                        anyhow!(
                            "$(Output[{index}]) is out of bounds ({} byproducts) ({})",
                            instance.byproduct_paths().len(),
                            self.decl_site
                        )
                    })?;
                    Ok(path.display().to_string())
                }
            }
            "Input" => {
                let index = index.unwrap_or(0);
                let artifact = inputs.get(index).ok_or_else(|| {
                    anyhow!(
                        "$(Input[{index}]) is out of bounds ({} inputs) ({})",
                        inputs.len(),
                        self.decl_site
                    )
                })?;
                match artifact {
                    Artifact::File(path) => Ok(path.display().to_string()),
                    Artifact::Memory(bytes) => {
                        if let Some(path) = materialized.get(&index) {
                            return Ok(path.display().to_string());
                        }
                        let path = instance.env().temp_path.join(format!(
                            "pw-{:08x}-in{index}.tmp",
                            hashing::hash_str(instance.name(), TEMP_NAME_SEED)
                        ));
                        fs::write(&path, bytes)
                            .with_context(|| format!("materializing input to {path:?}"))?;
                        materialized.insert(index, path.clone());
                        Ok(path.display().to_string())
                    }
                }
            }
            "Name" => Ok(instance.name().to_string()),
            "TempName" => {
                let path = instance.env().resolve_temp(instance.name()).ok_or_else(|| {
                    anyhow!("could not resolve temp name for '{}'", instance.name())
                })?;
                Ok(path.display().to_string())
            }
            "TempDir" => Ok(instance.env().temp_path.display().to_string()),
            other => Err(anyhow!(
                "unknown token '$({other})' ({})",
                self.decl_site
            )
            .into()),
        }
    }
}

/// Split `Name[index]` into its parts. `None` means the token is
/// malformed (e.g. an unclosed bracket).
fn parse_token(token: &str) -> Option<(&str, Option<usize>)> {
    match token.find('[') {
        None => Some((token, None)),
        Some(open) => {
            let inner = token[open + 1..].strip_suffix(']')?;
            let index = inner.trim().parse().ok()?;
            Some((&token[..open], Some(index)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_handles_indices() {
        assert_eq!(parse_token("Output"), Some(("Output", None)));
        assert_eq!(parse_token("Input[2]"), Some(("Input", Some(2))));
        assert_eq!(parse_token("Input[2"), None);
        assert_eq!(parse_token("Input[x]"), None);
    }
}
