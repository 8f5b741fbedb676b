//! Command-line composition for the distributed launcher.

use std::collections::HashSet;
use std::fmt;

use crate::config::{LauncherKind, Profile};
use crate::GlmError;

/// A program and its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// How many times `flag` is given, counting `--flag=value` forms
    pub fn occurrences(&self, flag: &str) -> usize {
        self.args.iter().filter(|a| flag_name(a) == Some(flag)).count()
    }

    /// Value following the first occurrence of `flag`
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        let idx = self.args.iter().position(|a| a == flag)?;
        self.args.get(idx + 1).map(String::as_str)
    }

    /// Single shell-quoted string, suitable for logs and copy-paste
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| shell_quote(s))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Name of the flag an argument spells, if it is one
fn flag_name(arg: &str) -> Option<&str> {
    if !arg.starts_with("--") || arg.len() == 2 {
        return None;
    }
    Some(arg.split_once('=').map_or(arg, |(name, _)| name))
}

pub(crate) fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Flags forwarded to the entry point: run mode, model, sampling, extras.
///
/// Fails when an extra argument repeats a flag the profile already sets.
pub fn entry_args(profile: &Profile) -> crate::Result<Vec<String>> {
    let mut args = vec!["--mode".to_string(), "inference".to_string()];
    args.extend(profile.model.to_args());
    args.extend(profile.sampling.to_args());

    let mut seen: HashSet<String> = args
        .iter()
        .filter_map(|a| flag_name(a))
        .map(str::to_string)
        .collect();

    for extra in &profile.launch.extra_args {
        if let Some(name) = flag_name(extra) {
            if !seen.insert(name.to_string()) {
                return Err(GlmError::DuplicateFlag(name.to_string()));
            }
        }
        args.push(extra.clone());
    }

    Ok(args)
}

/// Compose the full launcher invocation for a profile and a resolved port
pub fn compose(profile: &Profile, master_port: u16) -> crate::Result<CommandLine> {
    let launch = &profile.launch;
    let mp = profile.model.model_parallel_size;

    let command = match launch.launcher {
        LauncherKind::Torchrun => CommandLine::new(launch.launcher.program())
            .arg("--nproc_per_node")
            .arg(launch.workers(mp).to_string())
            .arg("--master_port")
            .arg(master_port.to_string()),
        LauncherKind::Deepspeed => {
            let gpus = launch
                .gpu_ids(mp)
                .iter()
                .map(|g| g.to_string())
                .collect::<Vec<_>>()
                .join(",");

            let mut command = CommandLine::new(launch.launcher.program())
                .arg("--master_port")
                .arg(master_port.to_string())
                .arg("--include")
                .arg(format!("localhost:{gpus}"));
            if let Some(hostfile) = &launch.hostfile {
                command = command.arg("--hostfile").arg(hostfile.display().to_string());
            }
            command
        }
    };

    Ok(command
        .arg(launch.entry_point.display().to_string())
        .args(entry_args(profile)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchConfig;
    use std::path::PathBuf;

    const DOCUMENTED_FLAGS: &[&str] = &[
        "--model-parallel-size",
        "--num-layers",
        "--hidden-size",
        "--inner-hidden-size",
        "--vocab-size",
        "--num-attention-heads",
        "--max-sequence-length",
        "--tokenizer-type",
        "--layernorm-order",
        "--load",
        "--skip-init",
        "--fp16",
        "--mode",
        "--sampling-strategy",
        "--num-beams",
        "--no-repeat-ngram-size",
        "--length-penalty",
        "--out-seq-length",
        "--temperature",
        "--top_k",
        "--top_p",
        "--output-path",
        "--input-source",
    ];

    fn profile() -> Profile {
        let mut profile = Profile::default();
        profile.model.checkpoint_path = PathBuf::from("/data/glm 130b");
        profile.sampling.temperature = 0.9;
        profile.sampling.input_source = "queries.txt".to_string();
        profile
    }

    #[test]
    fn test_every_flag_exactly_once() {
        let command = compose(&profile(), 23456).unwrap();

        for flag in DOCUMENTED_FLAGS {
            assert_eq!(command.occurrences(flag), 1, "flag {flag}");
        }
        assert_eq!(command.value_of("--mode"), Some("inference"));
        assert_eq!(command.value_of("--load"), Some("/data/glm 130b"));
        assert_eq!(command.value_of("--temperature"), Some("0.9"));
        assert_eq!(command.value_of("--input-source"), Some("queries.txt"));
    }

    #[test]
    fn test_torchrun_prefix() {
        let command = compose(&profile(), 23456).unwrap();
        assert_eq!(command.program, "torchrun");
        assert_eq!(
            &command.args[..5],
            &["--nproc_per_node", "8", "--master_port", "23456", "inference.py"]
        );
    }

    #[test]
    fn test_deepspeed_prefix() {
        let mut profile = profile();
        profile.model.model_parallel_size = 4;
        profile.launch = LaunchConfig {
            launcher: LauncherKind::Deepspeed,
            hostfile: Some(PathBuf::from("hostfile")),
            ..Default::default()
        };

        let command = compose(&profile, 30000).unwrap();
        assert_eq!(command.program, "deepspeed");
        assert_eq!(command.value_of("--include"), Some("localhost:0,1,2,3"));
        assert_eq!(command.value_of("--hostfile"), Some("hostfile"));
        assert_eq!(command.value_of("--master_port"), Some("30000"));
    }

    #[test]
    fn test_composition_is_idempotent() {
        let profile = profile();
        let first = compose(&profile, 20000).unwrap().render();
        let second = compose(&profile, 20000).unwrap().render();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_extra_flag_rejected() {
        let mut profile = profile();
        profile.launch.extra_args = vec!["--top_k=5".to_string()];
        assert!(matches!(
            compose(&profile, 20000),
            Err(GlmError::DuplicateFlag(flag)) if flag == "--top_k"
        ));

        profile.launch.extra_args = vec!["--deepspeed-activation-checkpointing".to_string()];
        let command = compose(&profile, 20000).unwrap();
        assert_eq!(command.args.last().unwrap(), "--deepspeed-activation-checkpointing");
    }

    #[test]
    fn test_render_quotes() {
        let command = CommandLine::new("torchrun").arg("--load").arg("/a b/it's");
        assert_eq!(command.render(), r"torchrun --load '/a b/it'\''s'");
    }
}
