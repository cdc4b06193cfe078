#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandShape {
    NoArg,
    OneVersion,
    TwoVersions,
    VersionAndPath,
    FreeText,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub shape: CommandShape,
    pub usage: &'static str,
}

pub(crate) const STUDIO_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "edit",
        shape: CommandShape::FreeText,
        usage: "/edit <instruction>   retouch the current version (plain text works too)",
    },
    CommandSpec {
        command: "select",
        shape: CommandShape::OneVersion,
        usage: "/select <id|position> make an earlier version the base for edits",
    },
    CommandSpec {
        command: "history",
        shape: CommandShape::NoArg,
        usage: "/history              list versions in append order",
    },
    CommandSpec {
        command: "diff",
        shape: CommandShape::TwoVersions,
        usage: "/diff <a> <b>         show how two versions' instructions differ",
    },
    CommandSpec {
        command: "prompt",
        shape: CommandShape::NoArg,
        usage: "/prompt               print the current version's full instruction",
    },
    CommandSpec {
        command: "export",
        shape: CommandShape::VersionAndPath,
        usage: "/export <id> <path>   write a version's image to disk",
    },
    CommandSpec {
        command: "save",
        shape: CommandShape::NoArg,
        usage: "/save                 persist the project manifest",
    },
    CommandSpec {
        command: "regenerate",
        shape: CommandShape::NoArg,
        usage: "/regenerate           run a fresh generation (uses quota)",
    },
    CommandSpec {
        command: "usage",
        shape: CommandShape::NoArg,
        usage: "/usage                show generation credits",
    },
    CommandSpec {
        command: "help",
        shape: CommandShape::NoArg,
        usage: "/help                 this list",
    },
    CommandSpec {
        command: "quit",
        shape: CommandShape::NoArg,
        usage: "/quit                 leave the studio",
    },
];

pub fn help_lines() -> Vec<&'static str> {
    STUDIO_COMMANDS.iter().map(|spec| spec.usage).collect()
}

pub(crate) fn find_command(command: &str) -> Option<&'static CommandSpec> {
    STUDIO_COMMANDS.iter().find(|spec| spec.command == command)
}
