use super::command_registry::{find_command, CommandShape};

/// How a command names a version: by 1-based position or by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    Position(usize),
    Id(String),
}

impl VersionRef {
    /// `3`, `#3` and `v3` are positions; anything else is taken as an id.
    ///
    /// Digits with a leading zero are always an id prefix, since short ids are
    /// hex and may be all digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_start_matches('#');
        if trimmed.is_empty() {
            return None;
        }
        let digits = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if digits.starts_with('0') {
            return Some(VersionRef::Id(trimmed.to_string()));
        }
        if let Some(position) = digits
            .parse::<usize>()
            .ok()
            .filter(|value| *value > 0)
        {
            return Some(VersionRef::Position(position));
        }
        Some(VersionRef::Id(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioCommand {
    Noop,
    Edit { instruction: String },
    Select { target: VersionRef },
    History,
    Diff { from: VersionRef, to: VersionRef },
    Prompt,
    Export { target: VersionRef, path: String },
    Save,
    Regenerate,
    Usage,
    Help,
    Quit,
    Invalid { command: String, reason: String },
    Unknown { command: String },
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn invalid(command: &str, reason: &str) -> StudioCommand {
    StudioCommand::Invalid {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses one line typed into the interactive studio.
///
/// Lines starting with `/` are commands; anything else is an edit instruction.
pub fn parse_command(text: &str) -> StudioCommand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return StudioCommand::Noop;
    }

    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return StudioCommand::Edit {
            instruction: trimmed.to_string(),
        };
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    let Some(spec) = find_command(&command) else {
        return StudioCommand::Unknown { command };
    };

    match spec.shape {
        CommandShape::FreeText => {
            if arg.is_empty() {
                return invalid(&command, "an instruction is required");
            }
            StudioCommand::Edit {
                instruction: arg.to_string(),
            }
        }
        CommandShape::OneVersion => {
            let args = split_args(arg);
            match args.as_slice() {
                [one] => match VersionRef::parse(one) {
                    Some(target) => StudioCommand::Select { target },
                    None => invalid(&command, "expected a version id or position"),
                },
                _ => invalid(&command, "expected exactly one version"),
            }
        }
        CommandShape::TwoVersions => {
            let args = split_args(arg);
            match args.as_slice() {
                [a, b] => match (VersionRef::parse(a), VersionRef::parse(b)) {
                    (Some(from), Some(to)) => StudioCommand::Diff { from, to },
                    _ => invalid(&command, "expected two version ids or positions"),
                },
                _ => invalid(&command, "expected exactly two versions"),
            }
        }
        CommandShape::VersionAndPath => {
            let args = split_args(arg);
            match args.as_slice() {
                [version, path] => match VersionRef::parse(version) {
                    Some(target) => StudioCommand::Export {
                        target,
                        path: path.clone(),
                    },
                    None => invalid(&command, "expected a version id or position"),
                },
                _ => invalid(&command, "expected a version and an output path"),
            }
        }
        CommandShape::NoArg => match command.as_str() {
            "history" => StudioCommand::History,
            "prompt" => StudioCommand::Prompt,
            "save" => StudioCommand::Save,
            "regenerate" => StudioCommand::Regenerate,
            "usage" => StudioCommand::Usage,
            "help" => StudioCommand::Help,
            "quit" => StudioCommand::Quit,
            _ => StudioCommand::Unknown { command },
        },
    }
}
